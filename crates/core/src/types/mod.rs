//! Core types for the first-admin bootstrap.
//!
//! This module provides type-safe wrappers for account records.

pub mod account;
pub mod email;
pub mod id;

pub use account::{
    Admin, PasswordReset, PasswordService, ResetReason, User, UserEmail, UserServices, Verification,
};
pub use email::{Email, EmailError};
pub use id::*;
