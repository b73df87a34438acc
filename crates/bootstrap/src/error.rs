//! Unified error handling for the bootstrap.
//!
//! Every variant aborts startup. None are retried.

use thiserror::Error;

use crate::config::{AdminSettingsError, ConfigError};
use crate::db::RepositoryError;
use crate::services::AccountError;

/// Why the bootstrap stopped.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The admin block or the surrounding configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Users exist without an admin, or admins exist without users.
    #[error("Unexpected users/admin mismatch: There were {users} users and {admins} admins.")]
    OrderingInvariant { users: u64, admins: u64 },

    /// Storage failure, passed through as the store reported it.
    #[error("Database error: {0}")]
    Repository(#[from] RepositoryError),

    /// A write was reported as done but re-reading contradicts it.
    #[error("Postcondition failed: {0}")]
    Postcondition(String),

    /// Account collaborator failure (invalid email, enrollment delivery).
    #[error("Account error: {0}")]
    Account(#[from] AccountError),
}

impl From<AdminSettingsError> for BootstrapError {
    fn from(e: AdminSettingsError) -> Self {
        Self::Config(ConfigError::AdminSettings(e))
    }
}

impl BootstrapError {
    /// The underlying storage error, if this failure came from the store
    /// directly or through the account collaborator.
    #[must_use]
    pub const fn repository(&self) -> Option<&RepositoryError> {
        match self {
            Self::Repository(e) | Self::Account(AccountError::Repository(e)) => Some(e),
            _ => None,
        }
    }

    /// The admin settings violation, if that is what stopped the bootstrap.
    #[must_use]
    pub const fn admin_settings(&self) -> Option<&AdminSettingsError> {
        match self {
            Self::Config(ConfigError::AdminSettings(e)) => Some(e),
            _ => None,
        }
    }
}
