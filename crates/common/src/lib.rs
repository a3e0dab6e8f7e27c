//! Common types for the credentialed client factory
//!
//! Holds the pieces every other crate leans on: the redacting `Secret`
//! wrapper, the immutable `CredentialSet`, and the pure credential validator.

mod credentials;
mod error;
mod secret;
mod validate;

pub use credentials::CredentialSet;
pub use error::{Error, Result};
pub use secret::Secret;
pub use validate::{CredentialValidationError, ValidationResult, check};
