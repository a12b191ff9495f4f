//! # Domain Models
//!
//! Core data structures: credentials, directory users, permission check
//! results and progress reports.
//!
//! ## Security Design
//!
//! The [`SecureString`] type provides memory-safe secret handling:
//! - Password data is zeroed on drop to prevent leakage via swap/core dumps
//! - Never exposed in `Debug` or `Display` implementations
//! - Uses unsafe code (carefully audited) for memory zeroing
//!
//! A [`Credential`] owns its secret; the synchronization coordinator shares
//! credentials between tasks through `Arc`, so the secret is scrubbed when the
//! last in-flight task releases it.
//!
//! ## Identity
//!
//! [`UserRecord`] identity is the case-insensitive (domain, account name)
//! pair exposed as [`UserKey`]. Group names in a [`GroupSet`] are compared
//! case-insensitively and keep their first spelling.

pub mod credentials;
pub mod permission;
pub mod progress;
pub mod user;

pub use credentials::{Credential, CredentialProfile, GroupSet, SecureString, Username};
pub use permission::PermissionCheckResult;
pub use progress::{ProgressReport, ProgressSink};
pub use user::{UserKey, UserRecord};
