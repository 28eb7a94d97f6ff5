//! Compatibility shim for cached records written by older releases.
//!
//! Earlier releases stored an extra top-level `unknown` category on every
//! assessment. Fresh analyses no longer produce it, but cached entries keep
//! it so that older readers of the same store still find a value. The field
//! lives only on [`CachedAssessment`]; [`Assessment`] itself stays clean.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Assessment, Verdict};

/// Neutral value given to the legacy field when a record lacks it.
pub const LEGACY_UNKNOWN_DEFAULT: &str = "Mixed";

/// The on-disk form of an assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAssessment {
    #[serde(flatten)]
    pub assessment: Assessment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unknown: Option<String>,
}

/// Wrap a fresh assessment for storage, defaulting the legacy field.
pub fn normalize(assessment: Assessment) -> CachedAssessment {
    normalize_cached(CachedAssessment {
        assessment,
        unknown: None,
    })
}

/// Default a missing or blank legacy field; every other field is untouched.
pub fn normalize_cached(mut cached: CachedAssessment) -> CachedAssessment {
    if cached.unknown.as_deref().map_or(true, str::is_empty) {
        cached.unknown = Some(LEGACY_UNKNOWN_DEFAULT.to_string());
    }
    cached
}

/// Read-time migration of a stored value.
///
/// Returns `None` when the value is not an object with a recognizable
/// overall verdict, or when it no longer deserializes into the current
/// record shape. Such entries are treated as absent so that they get
/// re-analyzed instead of surfacing half-formed data.
pub fn migrate(value: Value) -> Option<CachedAssessment> {
    let verdict = value.as_object()?.get("assessment")?.clone();
    serde_json::from_value::<Verdict>(verdict).ok()?;

    let cached: CachedAssessment = serde_json::from_value(value).ok()?;
    Some(normalize_cached(cached))
}
