//! Immutable credential sets
//!
//! A `CredentialSet` maps scheme-defined field names (`client_id`, `token`,
//! `consumer_secret`, ...) to values. It is built once per factory call and
//! only ever read afterwards. Values are held as `Secret` so a stray `{:?}`
//! never prints a password.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Deserialize;

use crate::secret::Secret;

/// Named credential fields for one authentication attempt.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "BTreeMap<String, String>")]
pub struct CredentialSet {
    fields: BTreeMap<String, Secret<String>>,
}

impl CredentialSet {
    /// An empty credential set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy of this set with `name` set to `value`.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), Secret::new(value.into()));
        self
    }

    /// Value of a field, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(Secret::expose_str)
    }

    /// Value of a field as a `Secret`, if present.
    pub fn secret(&self, name: &str) -> Option<&Secret<String>> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Field names in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Field names as an owned set.
    pub fn key_set(&self) -> BTreeSet<String> {
        self.fields.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for CredentialSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let fields = iter
            .into_iter()
            .map(|(k, v)| (k.into(), Secret::new(v.into())))
            .collect();
        Self { fields }
    }
}

impl From<BTreeMap<String, String>> for CredentialSet {
    fn from(map: BTreeMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Field names are not secret; values always render redacted.
        f.debug_map().entries(self.fields.iter()).finish()
    }
}
