//! Keys Module
//!
//! Deterministic cache key derivation: normalization of request parameters
//! followed by a SHA-256 digest of the canonical form.

mod generate;
mod normalize;
mod params;

pub use generate::{CacheKey, KeyGenerator, CACHE_KEY_LENGTH};
pub use normalize::{normalize, normalize_value, normalize_wkt, NormalizationRules, NormalizedParams};
pub use params::{ArchiveSearchParams, FeasibilityParams, ARCHIVE_SEARCH_RULES, FEASIBILITY_RULES};
