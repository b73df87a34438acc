//! Hands the purged settings to the application process.
//!
//! The bootstrap never rewrites its own environment. The application is
//! started as a child whose settings variable holds the purged tree, so the
//! `admin` block is unreachable from it and from anything it spawns.

use std::ffi::{OsStr, OsString};
use std::io;
use std::process::{Command, ExitStatus};

use thiserror::Error;

use crate::config::Settings;

/// Errors starting the application.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// No program was given.
    #[error("no application command given")]
    Empty,

    /// The program could not be started or waited on.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Build the application command from `argv`, with `var` set to the
/// serialized `settings`.
///
/// # Errors
///
/// Returns `LaunchError::Empty` if `argv` is empty.
pub fn app_command(
    argv: &[OsString],
    var: &str,
    settings: &Settings,
) -> Result<Command, LaunchError> {
    let (program, args) = argv.split_first().ok_or(LaunchError::Empty)?;
    let mut command = Command::new(program);
    command.args(args).env(var, settings.to_json());
    Ok(command)
}

/// Run the application to completion with the purged settings.
///
/// # Errors
///
/// Returns `LaunchError` if `argv` is empty or the program cannot be run.
pub fn run_app(
    argv: &[OsString],
    var: &str,
    settings: &Settings,
) -> Result<ExitStatus, LaunchError> {
    let mut command = app_command(argv, var, settings)?;
    let program = display_program(command.get_program());

    tracing::info!(program = %program, var, "starting application with purged settings");
    command
        .status()
        .map_err(|source| LaunchError::Spawn { program, source })
}

fn display_program(program: &OsStr) -> String {
    program.to_string_lossy().into_owned()
}
