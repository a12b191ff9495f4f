//! # Utilities Module
//!
//! Cross-cutting concerns shared throughout the crate.
//!
//! ## Modules
//!
//! - [`errors`]: Typed error hierarchy using `thiserror` for domain-specific errors
//!
//! ## Design Notes
//!
//! Error types are defined in this module to avoid circular dependencies between
//! the `core` and `platform` modules. The directory provider in `platform`
//! produces [`BindError`] and [`LookupError`]; `core` consumes them and folds
//! them into result objects at the public entry points.

pub mod errors;

pub use errors::{
    BindError, BindErrorKind, ConfigError, CredentialError, GroupCheckError, LookupError, ResetError,
    RosterError, SecurityDescriptorError, StoreError, TaskError, ValidationError,
};
pub use errors::panic_message;
