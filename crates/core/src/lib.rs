//! First Admin Core - Shared account types.
//!
//! This crate provides the record types the bootstrap procedure reads and
//! writes:
//! - [`User`] - An application account (passwordless until enrollment)
//! - [`Admin`] - A privilege record linking to exactly one [`User`]
//! - [`Email`] - A validated email address
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access, no mail
//! transport. Storage backends live in the `first-admin` crate.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
