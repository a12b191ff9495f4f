//! Core business logic (platform-agnostic)
//!
//! CRITICAL: This module MUST NOT import platform-specific code or UI frameworks.
//! Directory access goes through [`DirectoryProvider`]; storage goes through
//! [`CredentialStore`], [`SecretVault`] and [`RosterStore`].

pub mod credential;
pub mod permission;
pub mod reset;
pub mod roster;
pub mod security;
pub mod session;
pub mod sync;
pub mod validation;

// Test utilities for mock sessions (tests only)
#[cfg(test)]
pub mod mock_session;

pub use credential::{CredentialStore, RosterStore, SecretVault};
pub use permission::{AggregatePolicy, PermissionCheckOptions, PermissionVerifier};
pub use reset::{temp_password_for_date, PasswordResetService};
pub use roster::GroupRosterFetcher;
pub use security::{
    grants_password_reset, privileged_memberships, AccessControlEntry, AceKind,
    SecurityDescriptor, Sid, WellKnownGroup,
};
pub use session::{DirectoryProvider, DirectorySession, ObjectCategory, ObjectRef};
pub use sync::{dedupe_users, SyncOptions, SynchronizationCoordinator};
pub use validation::{validate_check_request, validate_credentials, validate_credentials_basic};
