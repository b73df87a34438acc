//! Integration tests for first admin creation.
//!
//! Runs the whole bootstrap against the in-memory store and checks the
//! records it leaves behind, the enrollment message and the settings the
//! application process receives.

#![allow(clippy::unwrap_used)]

use std::ffi::OsString;

use first_admin::config::Settings;
use first_admin::db::NewUser;
use first_admin::launch::app_command;
use first_admin::{
    AdminBootstrapper, AdminStore, BootstrapError, BootstrapOutcome, BootstrapStage, MemoryStore,
    UserStore, check_first_user,
};
use first_admin_core::{Email, ResetReason, Verification};
use first_admin_integration_tests::{
    Faults, FaultyStore, RecordingMailer, admin_block, root_url, settings_with,
};

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_creates_passwordless_admin_from_settings() {
    let store = MemoryStore::new();
    let mailer = RecordingMailer::new();
    let bootstrapper = AdminBootstrapper::new(&store, &mailer, root_url());

    let report = bootstrapper
        .bootstrap(settings_with(admin_block()))
        .await
        .unwrap();
    assert_eq!(bootstrapper.stage(), BootstrapStage::SettingsPurged);

    let BootstrapOutcome::Created {
        user_id,
        admin_id,
        enrollment,
    } = report.outcome
    else {
        panic!("expected the first admin to be created");
    };

    let users = store.users();
    assert_eq!(users.len(), 1);
    let user = &users[0];
    assert_eq!(user.id, user_id);
    assert_eq!(user.username, "u1");
    assert_eq!(user.first_name.as_deref(), Some("A"));
    assert_eq!(user.last_name.as_deref(), Some("B"));
    assert_eq!(user.emails.len(), 1);
    assert_eq!(user.emails[0].address, "u1@x.tld");
    assert_eq!(user.emails[0].verified, Verification::Unverified);

    assert!(!user.has_password(), "bootstrap must not set a password");
    let reset = user.pending_reset().unwrap();
    assert_eq!(reset.reason, ResetReason::Enroll);
    assert_eq!(reset.email, "u1@x.tld");
    assert_eq!(reset.token, enrollment.token);

    let admins = store.list_admins().await.unwrap();
    assert_eq!(admins.len(), 1);
    assert_eq!(admins[0].id, admin_id);
    assert_eq!(admins[0].user_id, user_id);

    assert!(!report.settings.has_admin());
    assert_eq!(
        report.settings.get("public"),
        settings_with(admin_block()).get("public")
    );
}

#[tokio::test]
async fn test_exactly_one_enrollment_message_is_sent() {
    let store = MemoryStore::new();
    let mailer = RecordingMailer::new();
    let bootstrapper = AdminBootstrapper::new(&store, &mailer, root_url());

    let report = bootstrapper
        .bootstrap(settings_with(admin_block()))
        .await
        .unwrap();
    let BootstrapOutcome::Created { enrollment, .. } = report.outcome else {
        panic!("expected the first admin to be created");
    };

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "u1@x.tld");
    assert_eq!(sent[0].username, "u1");
    assert_eq!(
        sent[0].url,
        format!("http://localhost:3000/#/enroll-account/{}", enrollment.token)
    );
}

// ============================================================================
// Idempotence
// ============================================================================

#[tokio::test]
async fn test_second_run_creates_nothing_and_still_purges() {
    let store = MemoryStore::new();
    let mailer = RecordingMailer::new();
    let bootstrapper = AdminBootstrapper::new(&store, &mailer, root_url());

    let first = bootstrapper
        .bootstrap(settings_with(admin_block()))
        .await
        .unwrap();
    assert!(matches!(first.outcome, BootstrapOutcome::Created { .. }));
    assert!(!first.settings.has_admin());

    // Same settings again, as after a restart with unchanged deployment config
    let second = bootstrapper
        .bootstrap(settings_with(admin_block()))
        .await
        .unwrap();
    assert_eq!(second.outcome, BootstrapOutcome::Skipped { admins: 1 });
    assert!(!second.settings.has_admin());
    assert_eq!(bootstrapper.stage(), BootstrapStage::SettingsPurged);

    assert_eq!(store.count_users().await.unwrap(), 1);
    assert_eq!(store.count_admins().await.unwrap(), 1);
    assert_eq!(mailer.sent().len(), 1);
}

#[tokio::test]
async fn test_skip_path_ignores_invalid_admin_block() {
    let store = MemoryStore::new();
    let mailer = RecordingMailer::new();
    let bootstrapper = AdminBootstrapper::new(&store, &mailer, root_url());
    bootstrapper
        .bootstrap(settings_with(admin_block()))
        .await
        .unwrap();

    let report = bootstrapper
        .bootstrap(settings_with(serde_json::json!({ "username": "" })))
        .await
        .unwrap();

    assert!(matches!(report.outcome, BootstrapOutcome::Skipped { .. }));
    assert!(!report.settings.has_admin());
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_user_before_admin_is_refused() {
    let store = MemoryStore::new();
    store
        .insert_user(NewUser {
            username: "early".to_owned(),
            email: Email::parse("early@x.tld").unwrap(),
        })
        .await
        .unwrap();
    let mailer = RecordingMailer::new();
    let bootstrapper = AdminBootstrapper::new(&store, &mailer, root_url());

    let err = bootstrapper
        .bootstrap(settings_with(admin_block()))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BootstrapError::OrderingInvariant {
            users: 1,
            admins: 0
        }
    ));
    assert_eq!(
        err.to_string(),
        "Unexpected users/admin mismatch: There were 1 users and 0 admins."
    );
    assert_eq!(bootstrapper.stage(), BootstrapStage::Failed);
    assert_eq!(store.count_users().await.unwrap(), 1);
    assert_eq!(store.count_admins().await.unwrap(), 0);
    assert!(mailer.sent().is_empty());
}

#[tokio::test]
async fn test_admin_without_users_is_refused() {
    let store = FaultyStore::new(Faults {
        orphan_admin: true,
        ..Faults::default()
    });

    let err = check_first_user(&store).await.unwrap_err();

    assert!(matches!(
        err,
        BootstrapError::OrderingInvariant {
            users: 0,
            admins: 1
        }
    ));
    assert_eq!(
        err.to_string(),
        "Unexpected users/admin mismatch: There were 0 users and 1 admins."
    );
    assert!(store.inner().users().is_empty());
}

// ============================================================================
// Settings hand-off
// ============================================================================

#[cfg(unix)]
#[tokio::test]
async fn test_application_receives_purged_settings() {
    const VAR: &str = "FIRST_ADMIN_IT_CHILD_SETTINGS";

    let store = MemoryStore::new();
    let mailer = RecordingMailer::new();
    let bootstrapper = AdminBootstrapper::new(&store, &mailer, root_url());
    let report = bootstrapper
        .bootstrap(settings_with(admin_block()))
        .await
        .unwrap();

    let script = format!("printf '%s' \"${VAR}\"");
    let argv: Vec<OsString> = ["sh", "-c", script.as_str()].map(OsString::from).into();
    let output = app_command(&argv, VAR, &report.settings)
        .unwrap()
        .output()
        .unwrap();
    assert!(output.status.success());

    let raw = String::from_utf8(output.stdout).unwrap();
    assert!(!raw.contains("u1@x.tld"));
    let seen = Settings::from_json(&raw).unwrap();
    assert!(!seen.has_admin());
    assert_eq!(seen, report.settings);
}
