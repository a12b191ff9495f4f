//! Platform-agnostic credential storage traits

use crate::models::{Credential, CredentialProfile, SecureString, UserRecord};
use crate::utils::{CredentialError, StoreError};
use async_trait::async_trait;

/// List of administrative credentials used by synchronization and reset
///
/// Implementations keep non-secret metadata and secrets apart; `load`
/// returns credentials with their secrets already resolved.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load every stored credential
    ///
    /// # Returns
    /// * `Ok(vec![])` - If nothing is stored (not an error)
    /// * `Err(CredentialError)` - If the list or a secret could not be read
    async fn load(&self) -> Result<Vec<Credential>, CredentialError>;

    /// Replace the stored list
    ///
    /// # Security
    /// - Secrets MUST go to a [`SecretVault`], never into the metadata file
    /// - MUST NOT log password values
    async fn save(&self, credentials: &[Credential]) -> Result<(), CredentialError>;

    /// Remove every credential and its secret
    async fn clear(&self) -> Result<(), CredentialError>;

    async fn has_credentials(&self) -> Result<bool, CredentialError> {
        Ok(!self.load().await?.is_empty())
    }
}

/// Secret storage keyed by profile
///
/// Implementations handle platform-specific storage (Windows Credential
/// Manager, a local file, etc.)
pub trait SecretVault: Send + Sync {
    /// Store a secret under a profile name, replacing any previous value
    ///
    /// # Arguments
    /// * `profile` - Profile identifier (e.g., "ADRoster:corp.example.com\\svc-reset")
    /// * `username` - Account the secret belongs to
    /// * `secret` - Secret to store
    fn store(
        &self,
        profile: &CredentialProfile,
        username: &str,
        secret: &SecureString,
    ) -> Result<(), CredentialError>;

    /// Retrieve a secret by profile
    ///
    /// # Returns
    /// * `Ok(Some(secret))` - If a secret exists
    /// * `Ok(None)` - If no secret is stored (not an error)
    fn retrieve(&self, profile: &CredentialProfile) -> Result<Option<SecureString>, CredentialError>;

    /// Delete a profile
    ///
    /// # Returns
    /// * `Ok(())` - Success (idempotent - succeeds even if profile doesn't exist)
    fn delete(&self, profile: &CredentialProfile) -> Result<(), CredentialError>;
}

/// Persistence of the synchronized roster
#[async_trait]
pub trait RosterStore: Send + Sync {
    /// Replace the persisted roster with `users`
    async fn save_roster(&self, users: &[UserRecord]) -> Result<(), StoreError>;

    /// Read the persisted roster; missing file yields an empty list
    async fn load_roster(&self) -> Result<Vec<UserRecord>, StoreError>;
}
