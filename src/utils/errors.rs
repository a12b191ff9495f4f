//! Error types for ADRoster
//!
//! All error types use thiserror for clean error handling.
//! SECURITY: Error messages MUST NOT contain passwords or sensitive data.

use std::any::Any;
use std::time::Duration;

/// Classified outcome of a failed directory bind
///
/// Downstream messaging depends on this being precise: an authentication
/// failure tells the operator to fix the credential, an unreachable server
/// tells them to fix the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BindErrorKind {
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("server unreachable")]
    ServerUnreachable,
    #[error("bind error")]
    Other,
}

/// Failure to bind a session against a directory endpoint
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", bind_message(.kind, .domain, .username, .detail))]
pub struct BindError {
    pub kind: BindErrorKind,
    pub domain: String,
    pub username: String,
    pub detail: String,
}

impl BindError {
    pub fn new(
        kind: BindErrorKind,
        domain: impl Into<String>,
        username: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        BindError {
            kind,
            domain: domain.into(),
            username: username.into(),
            detail: detail.into(),
        }
    }
}

fn bind_message(kind: &BindErrorKind, domain: &str, username: &str, detail: &str) -> String {
    match kind {
        BindErrorKind::AuthenticationFailed => format!(
            "Authentication failed for user '{}' on domain '{}'. Please check credentials. ({})",
            username, domain, detail
        ),
        BindErrorKind::ServerUnreachable => format!(
            "The AD server for '{}' is not operational or firewalled. ({})",
            domain, detail
        ),
        BindErrorKind::Other => format!("AD binding error on domain '{}': {}", domain, detail),
    }
}

/// Errors from directory lookups on an already bound session
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Directory query failed: {0}")]
    Query(String),

    #[error("Failed to decode directory data: {0}")]
    Decode(String),

    #[error("Directory write failed: {0}")]
    Write(String),
}

impl From<SecurityDescriptorError> for LookupError {
    fn from(err: SecurityDescriptorError) -> Self {
        LookupError::Decode(err.to_string())
    }
}

/// Errors from decoding binary security descriptors and SIDs
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecurityDescriptorError {
    #[error("Buffer too short: needed {needed} bytes at offset {offset}, have {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Unsupported revision {0}")]
    UnsupportedRevision(u8),

    #[error("Invalid SID: {0}")]
    InvalidSid(String),
}

/// Per-group outcome of the ACL sampling phase
///
/// Display strings are the exact lines appended to a permission check's
/// error text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GroupCheckError {
    #[error("Target group '{0}' not found.")]
    GroupNotFound(String),

    #[error("No members found to check in group '{0}'.")]
    NoMembers(String),

    #[error("User lacks permission for group '{0}'.")]
    NoAclMatch(String),

    #[error("Failed to look up target group '{group}': {detail}")]
    Lookup { group: String, detail: String },
}

/// How a synchronization task ended when it did not produce a roster
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task faulted: {0}")]
    Faulted(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("task exceeded {0:?} and was cancelled")]
    TimedOut(Duration),
}

/// Errors from fetching one group's roster under one credential
#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("Password for user '{username}' in domain '{domain}' is empty")]
    EmptySecret { domain: String, username: String },

    #[error("{0}")]
    Bind(#[from] BindError),

    #[error("Group '{group}' not found in domain '{domain}'")]
    GroupNotFound { group: String, domain: String },

    #[error("{0}")]
    Lookup(#[from] LookupError),
}

/// Errors from the password reset write path
#[derive(Debug, thiserror::Error)]
pub enum ResetError {
    #[error("No administrative credentials are configured")]
    NoCredentials,

    #[error("Account name is empty")]
    EmptyAccount,

    #[error("{0}")]
    Credential(#[from] CredentialError),

    #[error("{0}")]
    Bind(#[from] BindError),

    #[error("User '{account}' not found in domain '{domain}'")]
    UserNotFound { account: String, domain: String },

    #[error("{0}")]
    Lookup(#[from] LookupError),
}

/// Errors from credential storage operations
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Credential not found: {0}")]
    NotFound(String),

    #[error("Secret vault error: {0}")]
    Platform(String),

    #[error("Invalid credential format")]
    InvalidFormat,

    #[error("Invalid username format: {0}")]
    InvalidUsername(String),

    #[error("Credential storage error: {0}")]
    Storage(String),
}

/// Errors from input validation
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Domain is required")]
    MissingDomain,

    #[error("{0}")]
    InvalidDomain(String),

    #[error("Username is required")]
    MissingUsername,

    #[error("Password is empty")]
    EmptySecret,

    #[error("{0}")]
    InvalidGroup(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(#[from] BindError),
}

/// Errors from reading settings
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Cannot determine data directory: {0}")]
    DataDir(String),
}

/// Errors from JSON persistence
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error on '{path}': {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Text of a caught panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_message_names_domain() {
        let err = BindError::new(
            BindErrorKind::ServerUnreachable,
            "corp.example.com",
            "admin",
            "connection refused",
        );
        let text = err.to_string();
        assert!(text.contains("corp.example.com"));
        assert!(text.contains("not operational"));
    }

    #[test]
    fn test_auth_message_names_user_and_domain() {
        let err = BindError::new(
            BindErrorKind::AuthenticationFailed,
            "corp.example.com",
            "admin",
            "code 49",
        );
        let text = err.to_string();
        assert!(text.contains("Authentication failed"));
        assert!(text.contains("'admin'"));
        assert!(text.contains("corp.example.com"));
    }

    #[test]
    fn test_other_bind_error_and_kind_labels() {
        let err = BindError::new(BindErrorKind::Other, "corp.example.com", "admin", "rc 53");
        assert_eq!(
            err.to_string(),
            "AD binding error on domain 'corp.example.com': rc 53"
        );
        assert_eq!(
            BindErrorKind::AuthenticationFailed.to_string(),
            "authentication failed"
        );
        assert_eq!(BindErrorKind::ServerUnreachable.to_string(), "server unreachable");
    }

    #[test]
    fn test_group_check_messages() {
        assert_eq!(
            GroupCheckError::GroupNotFound("Sales".into()).to_string(),
            "Target group 'Sales' not found."
        );
        assert_eq!(
            GroupCheckError::NoMembers("Sales".into()).to_string(),
            "No members found to check in group 'Sales'."
        );
        assert_eq!(
            GroupCheckError::NoAclMatch("Sales".into()).to_string(),
            "User lacks permission for group 'Sales'."
        );
    }
}
