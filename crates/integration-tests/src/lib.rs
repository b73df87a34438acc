//! Integration tests for the first admin bootstrap.
//!
//! # Running Tests
//!
//! ```bash
//! # In-memory suites
//! cargo test -p first-admin-integration-tests
//!
//! # PostgreSQL suite (needs a disposable database)
//! DATABASE_URL=postgres://localhost/first_admin_test \
//!     cargo test -p first-admin-integration-tests -- --ignored
//! ```
//!
//! # Test Categories
//!
//! - `bootstrap_config` - Admin block validation
//! - `bootstrap_creation` - Account creation, idempotence and purge
//! - `bootstrap_rollback` - Compensation after partial failure
//! - `bootstrap_postgres` - The same flow against `PostgreSQL`
//!
//! This crate provides the shared fixtures: a store wrapper that injects
//! failures and a mailer that records what it was asked to send.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::{Value, json};
use url::Url;

use first_admin::config::Settings;
use first_admin::db::{AdminStore, MemoryStore, NewUser, RepositoryError, UserStore};
use first_admin::services::{EmailError, EnrollmentMailer, EnrollmentMessage};
use first_admin_core::{Admin, AdminId, PasswordReset, User, UserId};

/// Root URL the fixtures build enrollment links under.
pub const ROOT_URL: &str = "http://localhost:3000";

/// Parsed [`ROOT_URL`].
///
/// # Panics
///
/// Never; the constant is a valid URL.
#[must_use]
#[allow(clippy::missing_panics_doc, clippy::unwrap_used)]
pub fn root_url() -> Url {
    Url::parse(ROOT_URL).unwrap()
}

/// The `admin` block used throughout the suites.
#[must_use]
pub fn admin_block() -> Value {
    json!({
        "firstName": "A",
        "lastName": "B",
        "username": "u1",
        "email": "u1@x.tld"
    })
}

/// Settings holding `admin` plus an unrelated `public` section.
#[must_use]
pub fn settings_with(admin: Value) -> Settings {
    let mut tree = serde_json::Map::new();
    tree.insert("admin".to_owned(), admin);
    tree.insert("public".to_owned(), json!({ "siteName": "app" }));
    Settings::from(tree)
}

// =============================================================================
// Failure injection
// =============================================================================

/// Which store operations misbehave.
#[derive(Debug, Default, Clone, Copy)]
pub struct Faults {
    /// `insert_admin` fails as if the connection dropped.
    pub insert_admin: bool,
    /// `user_exists` reports the user missing.
    pub lose_user: bool,
    /// `set_names` reports zero modified records.
    pub names_unchanged: bool,
    /// `remove_admin` fails.
    pub remove_admin: bool,
    /// `remove_user` fails.
    pub remove_user: bool,
    /// `count_admins` reports one admin more than is stored, as if an admin
    /// outlived its user.
    pub orphan_admin: bool,
}

/// Error every injected failure returns.
#[must_use]
pub fn injected() -> RepositoryError {
    RepositoryError::Database(sqlx::Error::PoolTimedOut)
}

/// Returns true if `err` is the error [`injected`] produces.
#[must_use]
pub fn is_injected(err: &RepositoryError) -> bool {
    matches!(err, RepositoryError::Database(sqlx::Error::PoolTimedOut))
}

/// [`MemoryStore`] with configurable failures.
#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    faults: Faults,
}

impl FaultyStore {
    /// Wrap an empty store.
    #[must_use]
    pub fn new(faults: Faults) -> Self {
        Self {
            inner: MemoryStore::new(),
            faults,
        }
    }

    /// The wrapped store, for seeding and inspection.
    #[must_use]
    pub const fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

impl UserStore for FaultyStore {
    async fn count_users(&self) -> Result<u64, RepositoryError> {
        self.inner.count_users().await
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        self.inner.get_user(id).await
    }

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<User>, RepositoryError> {
        self.inner.find_user_by_username(username).await
    }

    async fn user_exists(&self, id: UserId) -> Result<bool, RepositoryError> {
        if self.faults.lose_user {
            return Ok(false);
        }
        self.inner.user_exists(id).await
    }

    async fn insert_user(&self, user: NewUser) -> Result<UserId, RepositoryError> {
        self.inner.insert_user(user).await
    }

    async fn set_names(
        &self,
        id: UserId,
        first_name: &str,
        last_name: &str,
    ) -> Result<u64, RepositoryError> {
        if self.faults.names_unchanged {
            return Ok(0);
        }
        self.inner.set_names(id, first_name, last_name).await
    }

    async fn set_password_reset(
        &self,
        id: UserId,
        reset: &PasswordReset,
    ) -> Result<u64, RepositoryError> {
        self.inner.set_password_reset(id, reset).await
    }

    async fn remove_user(&self, id: UserId) -> Result<u64, RepositoryError> {
        if self.faults.remove_user {
            return Err(injected());
        }
        self.inner.remove_user(id).await
    }
}

impl AdminStore for FaultyStore {
    async fn count_admins(&self) -> Result<u64, RepositoryError> {
        let stored = self.inner.count_admins().await?;
        Ok(stored + u64::from(self.faults.orphan_admin))
    }

    async fn admin_exists(&self, id: AdminId) -> Result<bool, RepositoryError> {
        self.inner.admin_exists(id).await
    }

    async fn list_admins(&self) -> Result<Vec<Admin>, RepositoryError> {
        self.inner.list_admins().await
    }

    async fn insert_admin(&self, user_id: UserId) -> Result<AdminId, RepositoryError> {
        if self.faults.insert_admin {
            return Err(injected());
        }
        self.inner.insert_admin(user_id).await
    }

    async fn remove_admin(&self, id: AdminId) -> Result<u64, RepositoryError> {
        if self.faults.remove_admin {
            return Err(injected());
        }
        self.inner.remove_admin(id).await
    }
}

// =============================================================================
// Recording mailer
// =============================================================================

/// Keeps every enrollment message instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EnrollmentMessage>>,
    fail: bool,
}

impl RecordingMailer {
    /// A mailer that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A mailer that refuses every message, after recording it.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: true,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<EnrollmentMessage>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Messages handed to the mailer so far.
    #[must_use]
    pub fn sent(&self) -> Vec<EnrollmentMessage> {
        self.lock().clone()
    }
}

impl EnrollmentMailer for RecordingMailer {
    async fn send_enrollment(&self, message: &EnrollmentMessage) -> Result<(), EmailError> {
        self.lock().push(message.clone());
        if self.fail {
            return Err(EmailError::Delivery("mailbox unavailable".to_owned()));
        }
        Ok(())
    }
}
