//! Stable fingerprints identifying the semantic identity of a timeline request.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::model::{normalize_name, TimelineRequest};

/// Hex-encoded SHA-256 over a request's normalized semantic fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestFingerprint(String);

impl RequestFingerprint {
    /// Computes the fingerprint of a request.
    ///
    /// The name is trimmed and lowercased, description and requester are
    /// trimmed and scope ids sorted, so requests differing only in case,
    /// whitespace or scope order collide.
    pub fn of(request: &TimelineRequest) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical_form(request).as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Wraps an already computed fingerprint (e.g., read back from storage).
    pub fn from_hex(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn canonical_form(request: &TimelineRequest) -> String {
    let mut scope_ids = request.scope_ids.clone();
    scope_ids.sort_unstable();
    let scope = scope_ids
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",");

    format!(
        "name:{}|description:{}|scope:[{}]|start:{}|end:{}|requester:{}",
        normalize_name(&request.name),
        request.description.as_deref().map(str::trim).unwrap_or(""),
        scope,
        request.start.to_rfc3339(),
        request.end.to_rfc3339(),
        request.requester.trim(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn base() -> TimelineRequest {
        TimelineRequest::new(
            "Red Sea shipping",
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
            "user-7",
        )
        .with_description("attacks and reroutes")
        .with_scope_ids(vec![3, 1, 2])
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = RequestFingerprint::of(&base());
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_ignores_whitespace_and_scope_order() {
        let mut other = base();
        other.name = "  Red Sea shipping ".to_string();
        other.scope_ids = vec![2, 3, 1];
        other.description = Some(" attacks and reroutes\n".to_string());

        assert_eq!(RequestFingerprint::of(&base()), RequestFingerprint::of(&other));
    }

    #[test]
    fn test_fingerprint_ignores_name_case() {
        let mut other = base();
        other.name = "RED SEA Shipping".to_string();

        assert_eq!(RequestFingerprint::of(&base()), RequestFingerprint::of(&other));

        let mut other = base();
        other.description = Some("ATTACKS and reroutes".to_string());
        assert_ne!(
            RequestFingerprint::of(&base()),
            RequestFingerprint::of(&other),
            "only the name is case-folded"
        );
    }

    #[test]
    fn test_fingerprint_distinguishes_semantic_fields() {
        let fp = RequestFingerprint::of(&base());

        let mut other = base();
        other.requester = "user-8".to_string();
        assert_ne!(fp, RequestFingerprint::of(&other));

        let mut other = base();
        other.end = Utc.with_ymd_and_hms(2024, 2, 2, 0, 0, 0).unwrap();
        assert_ne!(fp, RequestFingerprint::of(&other));

        let mut other = base();
        other.scope_ids.push(4);
        assert_ne!(fp, RequestFingerprint::of(&other));
    }
}
