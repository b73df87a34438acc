//! Account records: users and the admin privilege table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{AdminId, UserId};

/// Verification state of a [`UserEmail`], stored as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Verification {
    #[default]
    Unverified,
    Verified,
}

/// One email entry on a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEmail {
    pub address: String,
    pub verified: Verification,
}

impl UserEmail {
    /// An address that has not been confirmed yet.
    #[must_use]
    pub fn unverified(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            verified: Verification::Unverified,
        }
    }
}

/// Why a password reset record was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetReason {
    /// First password for an account created without one.
    Enroll,
    /// Forgotten password.
    Reset,
}

/// A pending password-setup pathway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordReset {
    pub token: String,
    pub email: String,
    pub when: DateTime<Utc>,
    pub reason: ResetReason,
}

/// Password credential sub-record.
///
/// A user holds a usable `bcrypt` hash, a `reset` pathway, or both while a
/// reset is outstanding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordService {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bcrypt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<PasswordReset>,
}

/// Login services attached to a user. Absent for freshly created accounts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserServices {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<PasswordService>,
}

/// An application account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub created_at: DateTime<Utc>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: String,
    pub emails: Vec<UserEmail>,
    pub services: Option<UserServices>,
}

impl User {
    /// The first email entry, which enrollment links are sent to.
    #[must_use]
    pub fn primary_email(&self) -> Option<&str> {
        self.emails.first().map(|e| e.address.as_str())
    }

    fn password(&self) -> Option<&PasswordService> {
        self.services.as_ref()?.password.as_ref()
    }

    /// Returns true if the account can log in with a password.
    #[must_use]
    pub fn has_password(&self) -> bool {
        self.password().is_some_and(|p| p.bcrypt.is_some())
    }

    /// The outstanding reset record, if any.
    #[must_use]
    pub fn pending_reset(&self) -> Option<&PasswordReset> {
        self.password()?.reset.as_ref()
    }
}

/// A privilege record linking to exactly one [`User`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admin {
    pub id: AdminId,
    pub user_id: UserId,
}
