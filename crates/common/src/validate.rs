//! Credential validation
//!
//! `check` is the single gate every scheme passes through before a client is
//! built. Optional fields are removed from consideration first; what is left
//! must cover the required list. Unknown extra fields are tolerated, so the
//! check only ever reports *missing* fields.

use std::collections::BTreeSet;

use crate::credentials::CredentialSet;

/// Outcome of validating a credential set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid { missing: BTreeSet<String> },
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    /// Convert into a `Result`, attaching the scheme name and required list
    /// to the error.
    pub fn into_result(
        self,
        scheme: &str,
        required: &[&str],
    ) -> Result<(), CredentialValidationError> {
        match self {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid { missing } => Err(CredentialValidationError {
                scheme: scheme.to_string(),
                required: required.iter().map(|s| s.to_string()).collect(),
                missing,
            }),
        }
    }
}

/// Required credential fields were missing for an authentication scheme.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "{scheme} authentication requires the credentials [{}]; missing [{}]",
    .required.join(", "),
    .missing.iter().cloned().collect::<Vec<_>>().join(", ")
)]
pub struct CredentialValidationError {
    /// Scheme name (e.g. "oauth1", "basic")
    pub scheme: String,
    /// Full required-field list for the scheme, in declaration order
    pub required: Vec<String>,
    /// Required fields that were not supplied
    pub missing: BTreeSet<String>,
}

/// Validate `provided` against `required`, ignoring any `optional` fields.
///
/// A set that is empty once optional fields are removed is always invalid,
/// even when nothing is required. In that case every required field is
/// reported missing.
pub fn check(required: &[&str], provided: &CredentialSet, optional: &[&str]) -> ValidationResult {
    let remaining: BTreeSet<&str> = provided
        .keys()
        .filter(|key| !optional.contains(key))
        .collect();

    let missing: BTreeSet<String> = required
        .iter()
        .filter(|field| !remaining.contains(*field))
        .map(|field| field.to_string())
        .collect();

    if remaining.is_empty() || !missing.is_empty() {
        return ValidationResult::Invalid { missing };
    }

    ValidationResult::Valid
}
