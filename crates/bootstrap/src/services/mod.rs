//! Collaborators the bootstrap drives.
//!
//! # Services
//!
//! - `accounts` - Passwordless account creation and enrollment tokens
//! - `email` - Enrollment link delivery via SMTP or the log

pub mod accounts;
pub mod email;

pub use accounts::{AccountError, AccountService, EnrollmentLink, NewAccount};
pub use email::{EmailError, EnrollmentMailer, EnrollmentMessage, LogMailer, Mailer, SmtpMailer};
