//! Cache key generation.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::normalize::NormalizedParams;

/// Length of a generated key: hex-encoded SHA-256.
pub const CACHE_KEY_LENGTH: usize = 64;

// == Cache Key ==
/// Opaque fixed-length lookup token derived from a normalized parameter set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Wraps a key read back from storage.
    pub(crate) fn from_stored(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// == Key Generator ==
/// Hashes normalized parameters into a `CacheKey`.
///
/// An optional namespace is mixed into the digest so that two deployments sharing
/// one database can keep disjoint key spaces.
#[derive(Debug, Clone, Default)]
pub struct KeyGenerator {
    namespace: Option<String>,
}

impl KeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn generate(&self, params: &NormalizedParams) -> CacheKey {
        let mut hasher = Sha256::new();
        if let Some(ref ns) = self.namespace {
            hasher.update(ns.as_bytes());
            hasher.update(b"\n");
        }
        hasher.update(params.canonical().as_bytes());
        CacheKey(hex::encode(hasher.finalize()))
    }
}
