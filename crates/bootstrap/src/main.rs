//! First Admin - startup bootstrap binary.
//!
//! Connects to `PostgreSQL`, applies migrations, provisions the first
//! administrator if none exists, then starts the application command with
//! the purged settings tree in the settings variable. Exits non-zero on any
//! failure so the deployment stops before the application starts.
//!
//! ```text
//! first-admin -- ./server --port 3000
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::ffi::OsString;
use std::process::{ExitCode, ExitStatus};

use clap::Parser;
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use first_admin::config::{AppConfig, Settings};
use first_admin::db::{self, PgStore};
use first_admin::launch;
use first_admin::services::{AccountError, Mailer};
use first_admin::{AdminBootstrapper, BootstrapError, BootstrapOutcome};

#[derive(Parser)]
#[command(name = "first-admin")]
#[command(author, version, about = "Provision the first administrator, then start the application")]
struct Cli {
    /// Application to start with the purged settings
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<OsString>,
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &AppConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            send_default_pii: false,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "first_admin=info".into());

    // JSON for log shippers, text for terminals
    let is_json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let json_layer = is_json.then(|| tracing_subscriber::fmt::layer().json().flatten_event(true));
    let text_layer = (!is_json).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

async fn run(config: &AppConfig) -> Result<Settings, BootstrapError> {
    let pool = db::create_pool(&config.database_url)
        .await
        .map_err(db::RepositoryError::from)?;
    tracing::info!("Database pool created");

    db::init_schema(&pool).await?;

    let mailer = Mailer::from_config(config.email.as_ref())
        .map_err(|e| AccountError::Email(e.into()))?;

    let store = PgStore::new(pool);
    let bootstrapper = AdminBootstrapper::new(&store, &mailer, config.root_url.clone());
    let report = bootstrapper.bootstrap(config.settings.clone()).await?;

    match &report.outcome {
        BootstrapOutcome::Created { enrollment, .. } => {
            tracing::info!(user_id = %enrollment.user_id, "first admin provisioned");
        }
        BootstrapOutcome::Skipped { admins } => {
            tracing::info!(admins, "bootstrap not needed");
        }
    }

    Ok(report.settings)
}

fn exit_code(status: ExitStatus) -> ExitCode {
    status
        .code()
        .and_then(|code| u8::try_from(code).ok())
        .map_or(ExitCode::FAILURE, ExitCode::from)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration from environment (needed for Sentry init)
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("first-admin: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);
    init_tracing();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    let settings = match runtime.block_on(run(&config)) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "startup aborted");
            return ExitCode::FAILURE;
        }
    };
    drop(runtime);

    if cli.command.is_empty() {
        tracing::warn!(
            var = %config.settings_var,
            "no application command given; purged settings were not handed off"
        );
        return ExitCode::SUCCESS;
    }

    match launch::run_app(&cli.command, &config.settings_var, &settings) {
        Ok(status) => {
            if !status.success() {
                tracing::warn!(%status, "application exited unsuccessfully");
            }
            exit_code(status)
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start application");
            ExitCode::FAILURE
        }
    }
}
