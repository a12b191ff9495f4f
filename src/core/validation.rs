//! Input and credential validation
//!
//! Checks run before any directory traffic, plus a live bind check used when
//! an operator stores a new credential.

use crate::core::session::DirectoryProvider;
use crate::models::{Credential, SecureString};
use crate::normalize::{normalize_domain, normalize_group_name};
use crate::utils::ValidationError;

/// Normalised inputs of a permission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRequest {
    pub domain: String,
    pub username: String,
    /// Requested group names, trimmed, in the order given
    pub groups: Vec<String>,
}

/// Validate the inputs of a permission check
///
/// Blank group names are dropped; duplicates are kept so that the result map
/// simply ends up with one entry for them.
pub fn validate_check_request(
    domain: &str,
    username: &str,
    secret: &SecureString,
    groups: &[String],
) -> Result<CheckRequest, ValidationError> {
    if domain.trim().is_empty() {
        return Err(ValidationError::MissingDomain);
    }
    let domain = normalize_domain(domain).map_err(ValidationError::InvalidDomain)?;

    let username = username.trim();
    if username.is_empty() {
        return Err(ValidationError::MissingUsername);
    }
    if secret.is_empty() {
        return Err(ValidationError::EmptySecret);
    }

    let groups = groups
        .iter()
        .filter_map(|g| normalize_group_name(g).ok())
        .collect();

    Ok(CheckRequest {
        domain,
        username: username.to_string(),
        groups,
    })
}

/// Basic shape check of a stored credential (no network)
pub fn validate_credentials_basic(credential: &Credential) -> Result<(), ValidationError> {
    if credential.domain().is_empty() {
        return Err(ValidationError::MissingDomain);
    }
    normalize_domain(credential.domain()).map_err(ValidationError::InvalidDomain)?;
    if credential.secret().is_empty() {
        return Err(ValidationError::EmptySecret);
    }
    for group in credential.groups().iter() {
        normalize_group_name(group).map_err(ValidationError::InvalidGroup)?;
    }
    Ok(())
}

/// Validate a credential by binding with it
///
/// # Security
/// - The secret is only handed to the provider's bind call
/// - Password is never logged
pub async fn validate_credentials(
    provider: &dyn DirectoryProvider,
    credential: &Credential,
) -> Result<(), ValidationError> {
    validate_credentials_basic(credential)?;
    let session = provider
        .bind(
            credential.domain(),
            credential.username().as_str(),
            credential.secret(),
        )
        .await?;
    session.unbind().await;
    Ok(())
}
