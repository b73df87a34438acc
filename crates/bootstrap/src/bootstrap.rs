//! First administrator bootstrap.
//!
//! Runs once per process start, before the application takes work:
//!
//! 1. If an admin already exists, skip straight to the purge.
//! 2. Validate the `admin` settings block.
//! 3. Check that no user was created before the admin.
//! 4. Create the passwordless user, link an admin record to it, verify both
//!    by re-reading, set the profile names, assign roles and send the
//!    enrollment link. Partial writes are compensated before the error is
//!    returned.
//! 5. Strip the `admin` block from the settings.
//!
//! Any error must abort startup.

use std::cell::Cell;
use std::fmt;

use url::Url;

use first_admin_core::{AdminId, UserId};

use crate::config::{AdminSettings, Settings};
use crate::db::{AdminStore, RepositoryError, UserStore};
use crate::error::BootstrapError;
use crate::services::{AccountService, EnrollmentLink, EnrollmentMailer, NewAccount};

/// How far a bootstrap run got.
///
/// `NotStarted → ConfigValidated → OrderingValidated → AccountCreated →
/// SettingsPurged`, or `NotStarted → SettingsPurged` when an admin already
/// exists. Any step may end in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootstrapStage {
    #[default]
    NotStarted,
    ConfigValidated,
    OrderingValidated,
    AccountCreated,
    SettingsPurged,
    Failed,
}

impl BootstrapStage {
    /// Returns true once a run can make no further progress.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::SettingsPurged | Self::Failed)
    }
}

impl fmt::Display for BootstrapStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not_started",
            Self::ConfigValidated => "config_validated",
            Self::OrderingValidated => "ordering_validated",
            Self::AccountCreated => "account_created",
            Self::SettingsPurged => "settings_purged",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Grants authorization roles to the new admin user.
#[allow(async_fn_in_trait)]
pub trait RoleAssigner {
    /// Assign roles. A failure rolls back the created records.
    async fn assign_roles(&self, user_id: UserId) -> Result<(), BootstrapError>;
}

/// Assigns nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRoles;

impl RoleAssigner for NoRoles {
    async fn assign_roles(&self, _user_id: UserId) -> Result<(), BootstrapError> {
        Ok(())
    }
}

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The first admin was created and sent an enrollment link.
    Created {
        user_id: UserId,
        admin_id: AdminId,
        enrollment: EnrollmentLink,
    },
    /// Admins already existed; nothing was created.
    Skipped { admins: u64 },
}

/// Result of a successful run.
#[derive(Debug)]
pub struct BootstrapReport {
    pub outcome: BootstrapOutcome,
    /// Settings with the `admin` block removed, for the rest of startup.
    pub settings: Settings,
}

// =============================================================================
// Rollback
// =============================================================================

/// Records written so far by a creation attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreatedRecords {
    pub user: Option<UserId>,
    pub admin: Option<AdminId>,
}

/// A compensating delete that did not go through.
#[derive(Debug)]
pub enum RollbackFailure {
    Admin(AdminId, RepositoryError),
    User(UserId, RepositoryError),
}

/// What a rollback removed and what it could not.
#[derive(Debug, Default)]
pub struct RollbackReport {
    pub admins_removed: u64,
    pub users_removed: u64,
    pub failures: Vec<RollbackFailure>,
}

impl RollbackReport {
    /// Returns true if every compensating delete succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Delete the records a failed creation left behind.
///
/// The admin goes first, since it references the user. Delete failures are
/// collected and logged, never returned as errors: the caller still reports
/// the failure that triggered the rollback.
pub async fn rollback<S>(store: &S, created: CreatedRecords) -> RollbackReport
where
    S: UserStore + AdminStore,
{
    let mut report = RollbackReport::default();

    if let Some(admin_id) = created.admin {
        match store.remove_admin(admin_id).await {
            Ok(n) => report.admins_removed = n,
            Err(e) => {
                tracing::error!(
                    admin_id = %admin_id,
                    error = %e,
                    "rollback: failed to remove admin"
                );
                report.failures.push(RollbackFailure::Admin(admin_id, e));
            }
        }
    }

    if let Some(user_id) = created.user {
        match store.remove_user(user_id).await {
            Ok(n) => report.users_removed = n,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "rollback: failed to remove user");
                report.failures.push(RollbackFailure::User(user_id, e));
            }
        }
    }

    tracing::warn!(
        users_removed = report.users_removed,
        admins_removed = report.admins_removed,
        failures = report.failures.len(),
        "rolled back partial admin creation"
    );
    report
}

// =============================================================================
// Steps
// =============================================================================

/// Validate the `admin` settings block.
///
/// # Errors
///
/// Returns `BootstrapError::Config` naming the first missing, empty,
/// mistyped or unknown key.
pub fn check_admin_config(settings: &Settings) -> Result<AdminSettings, BootstrapError> {
    Ok(AdminSettings::from_settings(settings)?)
}

/// Check that the admin will be the first user.
///
/// Passes when both record sets are empty or both are populated.
///
/// # Errors
///
/// Returns `BootstrapError::OrderingInvariant` when users exist without an
/// admin or admins exist without users.
pub async fn check_first_user<S>(store: &S) -> Result<(), BootstrapError>
where
    S: UserStore + AdminStore,
{
    let users = store.count_users().await?;
    let admins = store.count_admins().await?;

    let users_before_admin = admins == 0 && users > 0;
    let admin_without_users = users == 0 && admins > 0;
    if users_before_admin || admin_without_users {
        return Err(BootstrapError::OrderingInvariant { users, admins });
    }
    Ok(())
}

/// Drop the `admin` block from the settings.
#[must_use]
pub fn purge_settings(settings: Settings) -> Settings {
    if settings.has_admin() {
        tracing::info!("removed admin credentials from settings");
    }
    settings.without_admin()
}

// =============================================================================
// Bootstrapper
// =============================================================================

/// Creates the first administrator account.
pub struct AdminBootstrapper<'a, S, M, R = NoRoles> {
    store: &'a S,
    accounts: AccountService<'a, S, M>,
    roles: R,
    stage: Cell<BootstrapStage>,
}

impl<'a, S, M> AdminBootstrapper<'a, S, M>
where
    S: UserStore + AdminStore,
    M: EnrollmentMailer,
{
    /// Create a bootstrapper; enrollment links point under `root_url`.
    #[must_use]
    pub const fn new(store: &'a S, mailer: &'a M, root_url: Url) -> Self {
        Self {
            store,
            accounts: AccountService::new(store, mailer, root_url),
            roles: NoRoles,
            stage: Cell::new(BootstrapStage::NotStarted),
        }
    }
}

impl<'a, S, M, R> AdminBootstrapper<'a, S, M, R>
where
    S: UserStore + AdminStore,
    M: EnrollmentMailer,
    R: RoleAssigner,
{
    /// Replace the role assignment step.
    #[must_use]
    pub fn with_roles<R2: RoleAssigner>(self, roles: R2) -> AdminBootstrapper<'a, S, M, R2> {
        AdminBootstrapper {
            store: self.store,
            accounts: self.accounts,
            roles,
            stage: self.stage,
        }
    }

    /// The stage the last run reached.
    #[must_use]
    pub fn stage(&self) -> BootstrapStage {
        self.stage.get()
    }

    fn advance(&self, stage: BootstrapStage) {
        tracing::debug!(%stage, "bootstrap stage");
        self.stage.set(stage);
    }

    /// Run the bootstrap against `settings`.
    ///
    /// On success the returned report carries the settings with the
    /// `admin` block removed; this happens whether or not an account was
    /// created.
    ///
    /// # Errors
    ///
    /// Returns the `BootstrapError` of the first failing step. Records
    /// written before a failure in steps 2-5 of account creation have been
    /// deleted again.
    pub async fn bootstrap(&self, settings: Settings) -> Result<BootstrapReport, BootstrapError> {
        self.stage.set(BootstrapStage::NotStarted);
        let result = self.run(settings).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "admin bootstrap failed");
            self.advance(BootstrapStage::Failed);
        }
        result
    }

    async fn run(&self, settings: Settings) -> Result<BootstrapReport, BootstrapError> {
        let admins = self.store.count_admins().await?;

        let outcome = if admins == 0 {
            let admin = check_admin_config(&settings)?;
            self.advance(BootstrapStage::ConfigValidated);

            check_first_user(self.store).await?;
            self.advance(BootstrapStage::OrderingValidated);

            let outcome = self.create_admin_account(&admin).await?;
            self.advance(BootstrapStage::AccountCreated);
            outcome
        } else {
            tracing::info!(admins, "admin already exists; skipping account creation");
            BootstrapOutcome::Skipped { admins }
        };

        let settings = purge_settings(settings);
        self.advance(BootstrapStage::SettingsPurged);

        Ok(BootstrapReport { outcome, settings })
    }

    async fn create_admin_account(
        &self,
        admin: &AdminSettings,
    ) -> Result<BootstrapOutcome, BootstrapError> {
        let user_id = self
            .accounts
            .create_user(NewAccount {
                username: &admin.username,
                email: &admin.email,
            })
            .await?;

        let mut created = CreatedRecords {
            user: Some(user_id),
            admin: None,
        };
        let admin_id = match self.link_admin(user_id, admin, &mut created).await {
            Ok(admin_id) => admin_id,
            Err(e) => {
                rollback(self.store, created).await;
                return Err(e);
            }
        };

        // The account stays. Later runs take the skip path, so the link
        // must be re-sent by hand.
        let enrollment = match self.accounts.send_enrollment_email(user_id).await {
            Ok(enrollment) => enrollment,
            Err(e) => {
                tracing::error!(
                    user_id = %user_id,
                    admin_id = %admin_id,
                    error = %e,
                    "admin created but enrollment link not sent; re-send it manually"
                );
                return Err(e.into());
            }
        };

        tracing::info!(
            user_id = %user_id,
            admin_id = %admin_id,
            username = %admin.username,
            "created first admin account"
        );
        Ok(BootstrapOutcome::Created {
            user_id,
            admin_id,
            enrollment,
        })
    }

    /// Steps that must be compensated on failure. `created` records every
    /// ID as soon as it exists.
    async fn link_admin(
        &self,
        user_id: UserId,
        admin: &AdminSettings,
        created: &mut CreatedRecords,
    ) -> Result<AdminId, BootstrapError> {
        let admin_id = self.store.insert_admin(user_id).await?;
        created.admin = Some(admin_id);

        let user_exists = self.store.user_exists(user_id).await?;
        let admin_exists = self.store.admin_exists(admin_id).await?;
        if !user_exists || !admin_exists {
            return Err(BootstrapError::Postcondition(format!(
                "failed to create user/admin account. UserId={user_id} AdminId={admin_id}"
            )));
        }

        let modified = self
            .store
            .set_names(user_id, &admin.first_name, &admin.last_name)
            .await?;
        if modified == 0 {
            return Err(BootstrapError::Postcondition(format!(
                "expected admin user profile to be updated, got {modified} modified records"
            )));
        }

        self.roles.assign_roles(user_id).await?;
        Ok(admin_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex, PoisonError};

    use crate::db::{MemoryStore, NewUser};
    use crate::services::{EmailError, EnrollmentMessage, LogMailer};
    use first_admin_core::Email;
    use serde_json::json;
    use tracing_subscriber::fmt::MakeWriter;

    /// Log sink for asserting on emitted events.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner);
            String::from_utf8_lossy(&bytes).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    struct RefusingMailer;

    impl EnrollmentMailer for RefusingMailer {
        async fn send_enrollment(&self, _message: &EnrollmentMessage) -> Result<(), EmailError> {
            Err(EmailError::Delivery("relay down".to_owned()))
        }
    }

    fn root() -> Url {
        Url::parse("http://localhost:3000").unwrap()
    }

    fn settings_with_admin() -> Settings {
        Settings::from_json(
            &json!({
                "admin": {
                    "firstName": "A",
                    "lastName": "B",
                    "username": "u1",
                    "email": "u1@x.tld"
                },
                "public": { "name": "app" }
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_terminal_stages() {
        assert!(BootstrapStage::SettingsPurged.is_terminal());
        assert!(BootstrapStage::Failed.is_terminal());
        assert!(!BootstrapStage::AccountCreated.is_terminal());
        assert_eq!(BootstrapStage::OrderingValidated.to_string(), "ordering_validated");
    }

    #[test]
    fn test_purge_settings_removes_only_admin() {
        let purged = purge_settings(settings_with_admin());
        assert!(!purged.has_admin());
        assert!(purged.get("public").is_some());
    }

    #[tokio::test]
    async fn test_check_first_user_cases() {
        let store = MemoryStore::new();
        check_first_user(&store).await.unwrap();

        let user_id = store
            .insert_user(NewUser {
                username: "early".to_owned(),
                email: Email::parse("early@x.tld").unwrap(),
            })
            .await
            .unwrap();
        let err = check_first_user(&store).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unexpected users/admin mismatch: There were 1 users and 0 admins."
        );

        store.insert_admin(user_id).await.unwrap();
        check_first_user(&store).await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_removes_admin_then_user() {
        let store = MemoryStore::new();
        let user = store
            .insert_user(NewUser {
                username: "u1".to_owned(),
                email: Email::parse("u1@x.tld").unwrap(),
            })
            .await
            .unwrap();
        let admin = store.insert_admin(user).await.unwrap();

        let report = rollback(
            &store,
            CreatedRecords {
                user: Some(user),
                admin: Some(admin),
            },
        )
        .await;

        assert!(report.is_clean());
        assert_eq!(report.admins_removed, 1);
        assert_eq!(report.users_removed, 1);
        assert!(store.users().is_empty());
        assert!(store.admins().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_of_nothing_is_clean() {
        let store = MemoryStore::new();
        let report = rollback(&store, CreatedRecords::default()).await;
        assert!(report.is_clean());
        assert_eq!(report.users_removed + report.admins_removed, 0);
    }

    #[tokio::test]
    async fn test_bootstrap_creates_and_purges() {
        let store = MemoryStore::new();
        let bootstrapper = AdminBootstrapper::new(&store, &LogMailer, root());

        let report = bootstrapper.bootstrap(settings_with_admin()).await.unwrap();

        assert_eq!(bootstrapper.stage(), BootstrapStage::SettingsPurged);
        assert!(!report.settings.has_admin());
        let BootstrapOutcome::Created {
            user_id, admin_id, ..
        } = report.outcome
        else {
            panic!("expected the admin to be created");
        };
        assert_eq!(store.admins()[0].id, admin_id);
        assert_eq!(store.admins()[0].user_id, user_id);
    }

    #[tokio::test]
    async fn test_bootstrap_failure_marks_stage() {
        let store = MemoryStore::new();
        let bootstrapper = AdminBootstrapper::new(&store, &LogMailer, root());

        let err = bootstrapper.bootstrap(Settings::default()).await.unwrap_err();

        assert!(err.admin_settings().is_some());
        assert_eq!(bootstrapper.stage(), BootstrapStage::Failed);
    }

    #[tokio::test]
    async fn test_enrollment_failure_logs_stranded_account() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let store = MemoryStore::new();
        let bootstrapper = AdminBootstrapper::new(&store, &RefusingMailer, root());
        let err = bootstrapper.bootstrap(settings_with_admin()).await.unwrap_err();

        assert!(matches!(err, BootstrapError::Account(_)), "got {err}");
        let user_id = store.users()[0].id;
        let output = logs.contents();
        assert!(output.contains("enrollment link not sent"), "{output}");
        assert!(output.contains(&format!("user_id={user_id}")), "{output}");
    }
}
