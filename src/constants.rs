//! # Application-Wide Constants
//!
//! Directory attribute names, well-known identifiers, and tuning values used
//! across ADRoster. Values that an operator may want to change are also
//! exposed through [`AppSettings`](crate::config::AppSettings); the constants
//! here are the defaults.
//!
//! ## Usage
//!
//! ```rust
//! use adroster::constants::*;
//!
//! let timeout = std::time::Duration::from_millis(REACHABILITY_TIMEOUT_MS);
//! ```

use uuid::Uuid;

// ============================================================================
// Permission Check
// ============================================================================

/// Number of group members whose ACL is inspected per target group
///
/// Reading every member's security descriptor does not scale to large
/// groups. A `false` verdict only covers the sampled members.
pub const MEMBER_SAMPLE_SIZE: usize = 2;

/// `00299570-246d-11d0-a768-00aa006e0529` — the "Reset Password" extended right
pub const RESET_PASSWORD_RIGHT: Uuid = Uuid::from_u128(0x00299570_246d_11d0_a768_00aa006e0529);

/// `bf967a0a-0de6-11d0-a285-00aa003049e2` — schemaIDGUID of `unicodePwd`
pub const UNICODE_PWD_ATTRIBUTE: Uuid = Uuid::from_u128(0xbf967a0a_0de6_11d0_a285_00aa003049e2);

// ============================================================================
// LDAP
// ============================================================================

pub const LDAP_PORT: u16 = 389;
pub const LDAPS_PORT: u16 = 636;

/// Connect timeout for the LDAP socket (seconds)
pub const LDAP_CONNECT_TIMEOUT_SECS: u64 = 10;

/// TCP timeout for the advisory reachability probe before a bind (milliseconds)
///
/// The probe only produces a warning; the bind result is authoritative.
pub const REACHABILITY_TIMEOUT_MS: u64 = 2000;

/// Page size for roster searches
///
/// Domain controllers cap unpaged results at `MaxPageSize` (1000 by default).
pub const ROSTER_PAGE_SIZE: i32 = 1000;

/// `LDAP_MATCHING_RULE_IN_CHAIN`: transitive membership match
pub const OID_MATCHING_RULE_IN_CHAIN: &str = "1.2.840.113556.1.4.1941";

/// `LDAP_MATCHING_RULE_BIT_AND`
pub const OID_MATCHING_RULE_BIT_AND: &str = "1.2.840.113556.1.4.803";

/// `LDAP_SERVER_SD_FLAGS_OID`
pub const OID_SD_FLAGS_CONTROL: &str = "1.2.840.113556.1.4.801";

/// `DACL_SECURITY_INFORMATION` for the SD flags control
pub const SD_FLAGS_DACL: u8 = 0x04;

/// `userAccountControl` bit for disabled accounts
pub const UF_ACCOUNTDISABLE: u32 = 0x0002;

/// Attributes projected by roster searches
pub const ROSTER_ATTRIBUTES: [&str; 7] = [
    "sAMAccountName",
    "displayName",
    "givenName",
    "sn",
    "mail",
    "extensionAttribute2",
    "description",
];

/// `member` values returned per ranged read on Windows Server 2008+
pub const MEMBER_RANGE_STEP: usize = 1500;

// ============================================================================
// Synchronization
// ============================================================================

/// Percent reached once every fetch task has settled
///
/// The remaining 5% covers dedupe and persistence.
pub const PROGRESS_FETCH_CEILING: usize = 95;

// ============================================================================
// Password Reset
// ============================================================================

/// Default prefix of the temporary password `<prefix>@DD.MM.YYYY`
pub const DEFAULT_TEMP_PASSWORD_PREFIX: &str = "Reset";

// ============================================================================
// Logging and Storage
// ============================================================================

/// Log file size before rotation to `.bak` (10 MiB)
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Entries retained by the in-memory log viewer sink
pub const MEMORY_LOG_CAPACITY: usize = 5000;

/// Directory name under the platform data root
pub const APP_DIR_NAME: &str = "ADRoster";
