//! Credential model types
//!
//! SECURITY: Credential types implement Drop to clear sensitive data.

use crate::utils::CredentialError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Directory account name in various formats
///
/// Valid formats:
/// - `user` (bare sAMAccountName)
/// - `DOMAIN\\user` (down-level logon name)
/// - `user@domain.com` (UPN format)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    /// Create a new username after validation
    pub fn new(username: impl Into<String>) -> Result<Self, CredentialError> {
        let username = username.into().trim().to_string();

        if username.is_empty() {
            return Err(CredentialError::InvalidUsername(
                "Username cannot be empty".to_string(),
            ));
        }

        if username.len() > 256 {
            return Err(CredentialError::InvalidUsername(
                "Username exceeds maximum length (256)".to_string(),
            ));
        }

        Ok(Username(username))
    }

    /// Get the username as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Username {
    type Error = CredentialError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Username::new(value)
    }
}

impl TryFrom<&str> for Username {
    type Error = CredentialError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Username::new(value)
    }
}

impl From<Username> for String {
    fn from(value: Username) -> Self {
        value.0
    }
}

/// Password that zeros memory on drop
///
/// SECURITY: This type never implements Display or Debug in a way that reveals the password.
pub struct SecureString(String);

impl Clone for SecureString {
    fn clone(&self) -> Self {
        SecureString(self.0.clone())
    }
}

impl SecureString {
    /// Create a new secure string
    pub fn new(password: impl Into<String>) -> Self {
        SecureString(password.into())
    }

    /// Get the password as a string slice
    ///
    /// Use this sparingly and only for the duration of a single bind or write call.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the length of the password
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the password is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for SecureString {
    fn drop(&mut self) {
        // SAFETY: We own this String and are zeroing it before drop. Zero bytes
        // are valid UTF-8 so the String invariant holds until deallocation.
        unsafe {
            let bytes = self.0.as_bytes_mut();
            for byte in bytes {
                std::ptr::write_volatile(byte, 0);
            }
        }
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // SECURITY: Never reveal the password content
        write!(f, "SecureString(*** {} bytes ***)", self.0.len())
    }
}

/// Name of a secret stored in a [`SecretVault`](crate::core::SecretVault)
///
/// This is just a name/identifier, not the actual secret.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CredentialProfile(String);

impl CredentialProfile {
    /// Prefix shared by every profile this crate writes
    pub const PREFIX: &'static str = "ADRoster";

    /// Create a new credential profile reference
    pub fn new(name: impl Into<String>) -> Self {
        CredentialProfile(name.into())
    }

    /// Profile that holds the secret of one administrative account
    ///
    /// Domain and username are case-folded so that re-saving `CORP\Admin`
    /// overwrites the entry saved as `corp\admin`.
    pub fn for_account(domain: &str, username: &str) -> Self {
        CredentialProfile(format!(
            "{}:{}\\{}",
            Self::PREFIX,
            domain.trim().to_lowercase(),
            username.trim().to_lowercase()
        ))
    }

    /// Get the profile name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered set of group names compared case-insensitively
///
/// The first spelling of a name wins; later case variants are ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct GroupSet(Vec<String>);

impl GroupSet {
    pub fn new() -> Self {
        GroupSet(Vec::new())
    }

    /// Insert a group name; returns false if an equivalent name is present
    /// or the name is blank.
    pub fn insert(&mut self, name: impl AsRef<str>) -> bool {
        let name = name.as_ref().trim();
        if name.is_empty() || self.contains(name) {
            return false;
        }
        self.0.push(name.to_string());
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|g| g.eq_ignore_ascii_case(name.trim()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for GroupSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = GroupSet::new();
        for name in iter {
            set.insert(name);
        }
        set
    }
}

impl From<Vec<String>> for GroupSet {
    fn from(value: Vec<String>) -> Self {
        value.into_iter().collect()
    }
}

impl From<GroupSet> for Vec<String> {
    fn from(value: GroupSet) -> Self {
        value.0
    }
}

/// Administrative credential used to read one domain's groups
#[derive(Clone, Debug)]
pub struct Credential {
    domain: String,
    username: Username,
    secret: SecureString,
    groups: GroupSet,
}

impl Credential {
    /// Create a new credential
    pub fn new(
        domain: impl Into<String>,
        username: Username,
        secret: SecureString,
        groups: GroupSet,
    ) -> Self {
        Credential {
            domain: domain.into().trim().to_string(),
            username,
            secret,
            groups,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn username(&self) -> &Username {
        &self.username
    }

    /// Get the secret
    pub fn secret(&self) -> &SecureString {
        &self.secret
    }

    pub fn groups(&self) -> &GroupSet {
        &self.groups
    }

    /// Vault profile under which this credential's secret is stored
    pub fn profile(&self) -> CredentialProfile {
        CredentialProfile::for_account(&self.domain, self.username.as_str())
    }
}
