//! ADRoster - Active Directory reset-permission checks and roster synchronization
//!
//! Core library exposing platform-agnostic services and the LDAP provider.

// Public modules
pub mod config;
pub mod constants;
pub mod core;
pub mod logger;
pub mod models;
pub mod normalize;
pub mod platform;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use core::{
    validate_credentials, validate_credentials_basic, CredentialStore, PasswordResetService,
    PermissionVerifier, SynchronizationCoordinator,
};
pub use models::{Credential, CredentialProfile, PermissionCheckResult, SecureString, Username};
pub use utils::{BindError, CredentialError, ResetError, ValidationError};
