//! Platform-specific implementations
//!
//! All directory protocol and operating-system code is isolated here.
//! The LDAP provider is portable; the Credential Manager vault is Windows only.

#[cfg(windows)]
pub mod credman;
pub mod ldap;

#[cfg(windows)]
pub use credman::WindowsCredentialManager;
pub use ldap::LdapDirectory;
