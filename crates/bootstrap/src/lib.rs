//! First Admin - provisions the first administrator account at startup.
//!
//! On a fresh deployment the bootstrap reads an `admin` block from the JSON
//! settings tree, creates a passwordless user with an admin record, and
//! mails that user an enrollment link to set their own password. The
//! `admin` block is then purged from the settings so the rest of the
//! application never sees it. Once any admin exists the bootstrap does
//! nothing but the purge.
//!
//! # Architecture
//!
//! - [`bootstrap`] - The startup procedure and its rollback
//! - [`config`] - Environment and settings tree
//! - [`db`] - `users`/`admins` storage (`PostgreSQL` and in-memory)
//! - [`launch`] - Starting the application with the purged settings
//! - [`services`] - Account creation and enrollment mail
//!
//! # Example
//!
//! ```rust,ignore
//! let store = PgStore::new(pool);
//! let bootstrapper = AdminBootstrapper::new(&store, &mailer, config.root_url.clone());
//! let report = bootstrapper.bootstrap(config.settings.clone()).await?;
//! let status = run_app(&argv, &config.settings_var, &report.settings)?;
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod error;
pub mod launch;
pub mod services;

pub use bootstrap::{
    AdminBootstrapper, BootstrapOutcome, BootstrapReport, BootstrapStage, CreatedRecords,
    NoRoles, RoleAssigner, RollbackFailure, RollbackReport, check_admin_config, check_first_user,
    purge_settings, rollback,
};
pub use config::{AdminSettings, AdminSettingsError, AppConfig, ConfigError, Settings};
pub use db::{AdminStore, MemoryStore, NewUser, PgStore, RepositoryError, UserStore};
pub use error::BootstrapError;
pub use launch::{LaunchError, app_command, run_app};
