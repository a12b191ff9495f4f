//! Directory session abstraction
//!
//! This trait allows testing without a domain controller by supporting mock
//! implementations. The LDAP implementation lives in `src/platform/ldap.rs`.
//!
//! A session is pure I/O: it finds objects and reads attributes. Interpreting
//! what it returns (privilege, ACL grants, dedupe) is the job of the callers
//! in `core`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use super::security::{AccessControlEntry, Sid};
use crate::models::{SecureString, UserRecord};
use crate::utils::{BindError, LookupError};

/// `objectCategory` of a directory object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectCategory {
    User,
    Group,
}

impl ObjectCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectCategory::User => "user",
            ObjectCategory::Group => "group",
        }
    }
}

impl fmt::Display for ObjectCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to one located directory object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub dn: String,
    pub account_name: String,
    pub category: ObjectCategory,
    pub sid: Option<Sid>,
}

/// Opens sessions against a domain
///
/// Implementations classify every bind failure into a
/// [`BindErrorKind`](crate::utils::BindErrorKind); callers never inspect
/// provider error codes.
#[async_trait::async_trait]
pub trait DirectoryProvider: Send + Sync {
    /// Bind to `domain` as `username`
    ///
    /// SECURITY: implementations MUST NOT log or retain `secret` beyond the
    /// bind call.
    async fn bind(
        &self,
        domain: &str,
        username: &str,
        secret: &SecureString,
    ) -> Result<Box<dyn DirectorySession>, BindError>;
}

/// Bound directory session
#[async_trait::async_trait]
pub trait DirectorySession: Send + Sync {
    /// Domain this session is bound to
    fn domain(&self) -> &str;

    /// Locate exactly one object of `category` by sAMAccountName
    ///
    /// Returns `Ok(None)` when there are zero or several matches.
    async fn find_object(
        &self,
        account_name: &str,
        category: ObjectCategory,
    ) -> Result<Option<ObjectRef>, LookupError>;

    /// Distinguished names of the group's direct members
    async fn list_group_members(&self, group: &ObjectRef) -> Result<Vec<String>, LookupError>;

    /// Enabled users whose direct or nested membership includes `group_dn`
    ///
    /// The returned records have `domain` set to the session's domain and an
    /// empty `user_groups`.
    async fn list_enabled_group_members(
        &self,
        group_dn: &str,
    ) -> Result<Vec<UserRecord>, LookupError>;

    /// DACL of the object at `dn`, read fresh from the directory
    async fn get_access_control_entries(
        &self,
        dn: &str,
    ) -> Result<Vec<AccessControlEntry>, LookupError>;

    /// The account's own SID plus every group SID it holds transitively
    async fn get_authorization_sids(&self, user: &ObjectRef) -> Result<HashSet<Sid>, LookupError>;

    /// Set a new password, optionally forcing a change at next logon
    async fn reset_password(
        &self,
        user: &ObjectRef,
        new_password: &SecureString,
        must_change: bool,
    ) -> Result<(), LookupError>;

    /// When the password was last set; `None` when never set or must change
    async fn last_password_set(
        &self,
        user: &ObjectRef,
    ) -> Result<Option<DateTime<Utc>>, LookupError>;

    /// Release the connection
    async fn unbind(&self) {}
}
