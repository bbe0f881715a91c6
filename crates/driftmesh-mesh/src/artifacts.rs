//! Shared canvas artifacts.
//!
//! An artifact is an encoded image keyed by a stable location identifier.
//! Payloads travel as base64 data URLs (`data:image/png;base64,...`).
//! The store is last-writer-wins with a retention window: an artifact
//! whose last write is older than the window reads as the blank payload,
//! exactly as if it had never been written.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::MeshError;

/// A 1×1 transparent PNG.
const BLANK_PAYLOAD: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

/// A validated artifact payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPayload(String);

impl ArtifactPayload {
    /// Validates `raw` as a base64 data URL no longer than `max_len`.
    ///
    /// # Errors
    /// - [`MeshError::ArtifactTooLarge`] if `raw` exceeds `max_len` bytes.
    /// - [`MeshError::InvalidArtifact`] if it is not a base64 data URL.
    pub fn parse(raw: &str, max_len: usize) -> Result<Self, MeshError> {
        if raw.len() > max_len {
            return Err(MeshError::ArtifactTooLarge {
                len: raw.len(),
                max: max_len,
            });
        }
        let (mime, body) = split_data_url(raw)?;
        if mime.is_empty() {
            return Err(MeshError::InvalidArtifact("missing media type".into()));
        }
        STANDARD
            .decode(body)
            .map_err(|e| MeshError::InvalidArtifact(e.to_string()))?;
        Ok(Self(raw.to_string()))
    }

    /// The default payload for artifacts that are absent or expired.
    pub fn blank() -> Self {
        Self(BLANK_PAYLOAD.to_string())
    }

    pub fn is_blank(&self) -> bool {
        self.0 == BLANK_PAYLOAD
    }

    /// The media type, e.g. `image/png`.
    pub fn mime(&self) -> &str {
        split_data_url(&self.0).map(|(mime, _)| mime).unwrap_or_default()
    }

    /// The decoded image bytes.
    ///
    /// # Errors
    /// Never fails for a payload built by [`parse`](Self::parse) or
    /// [`blank`](Self::blank).
    pub fn decode(&self) -> Result<Vec<u8>, MeshError> {
        let (_, body) = split_data_url(&self.0)?;
        STANDARD
            .decode(body)
            .map_err(|e| MeshError::InvalidArtifact(e.to_string()))
    }

    /// Encodes raw image bytes as a data URL.
    pub fn encode(mime: &str, bytes: &[u8]) -> Self {
        Self(format!("data:{mime};base64,{}", STANDARD.encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

fn split_data_url(raw: &str) -> Result<(&str, &str), MeshError> {
    let rest = raw
        .strip_prefix("data:")
        .ok_or_else(|| MeshError::InvalidArtifact("not a data URL".into()))?;
    let (header, body) = rest
        .split_once(',')
        .ok_or_else(|| MeshError::InvalidArtifact("missing data separator".into()))?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| MeshError::InvalidArtifact("payload is not base64".into()))?;
    Ok((mime, body))
}

#[derive(Debug, Clone)]
struct Artifact {
    payload: ArtifactPayload,
    written_at: Instant,
}

/// Cached artifacts with expiry.
#[derive(Debug)]
pub struct ArtifactStore {
    entries: HashMap<String, Artifact>,
    retention: Duration,
    max_payload: usize,
}

impl ArtifactStore {
    pub fn new(retention: Duration, max_payload: usize) -> Self {
        Self {
            entries: HashMap::new(),
            retention,
            max_payload,
        }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Stores `payload` for `id` and refreshes its timestamp.
    ///
    /// Returns `true` if the live payload changed (a new artifact, an
    /// expired one, or different content).
    pub fn put(&mut self, id: &str, payload: ArtifactPayload, now: Instant) -> bool {
        let changed = match self.entries.get(id) {
            Some(current) if self.is_fresh(current, now) => current.payload != payload,
            _ => true,
        };
        self.entries.insert(
            id.to_string(),
            Artifact {
                payload,
                written_at: now,
            },
        );
        changed
    }

    /// The live payload for `id`, or the blank payload if it is absent or
    /// expired.
    pub fn get(&self, id: &str, now: Instant) -> ArtifactPayload {
        self.entries
            .get(id)
            .filter(|artifact| self.is_fresh(artifact, now))
            .map(|artifact| artifact.payload.clone())
            .unwrap_or_else(ArtifactPayload::blank)
    }

    /// Whether `id` has a live (unexpired) payload.
    pub fn is_live(&self, id: &str, now: Instant) -> bool {
        self.entries
            .get(id)
            .is_some_and(|artifact| self.is_fresh(artifact, now))
    }

    /// Drops expired artifacts. Returns how many were dropped.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let retention = self.retention;
        self.entries
            .retain(|_, artifact| now.saturating_duration_since(artifact.written_at) < retention);
        let pruned = before - self.entries.len();
        if pruned > 0 {
            tracing::debug!(pruned, "expired artifacts pruned");
        }
        pruned
    }

    /// Number of stored artifacts, including expired ones not yet pruned.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_fresh(&self, artifact: &Artifact, now: Instant) -> bool {
        now.saturating_duration_since(artifact.written_at) < self.retention
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RETENTION: Duration = Duration::from_secs(30 * 60);

    fn store() -> ArtifactStore {
        ArtifactStore::new(RETENTION, 1024)
    }

    fn payload(bytes: &[u8]) -> ArtifactPayload {
        ArtifactPayload::encode("image/png", bytes)
    }

    #[test]
    fn test_parse_accepts_base64_data_url() {
        let parsed = ArtifactPayload::parse("data:image/png;base64,AAEC", 1024).unwrap();
        assert_eq!(parsed.mime(), "image/png");
        assert_eq!(parsed.decode().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_parse_rejects_non_data_url() {
        assert!(matches!(
            ArtifactPayload::parse("https://example.com/a.png", 1024),
            Err(MeshError::InvalidArtifact(_))
        ));
    }

    #[test]
    fn test_parse_rejects_non_base64_encoding() {
        assert!(ArtifactPayload::parse("data:text/plain,hello", 1024).is_err());
    }

    #[test]
    fn test_parse_rejects_corrupt_body() {
        assert!(ArtifactPayload::parse("data:image/png;base64,@@@", 1024).is_err());
    }

    #[test]
    fn test_parse_rejects_oversized_payload() {
        let raw = format!("data:image/png;base64,{}", "A".repeat(2048));
        assert!(matches!(
            ArtifactPayload::parse(&raw, 1024),
            Err(MeshError::ArtifactTooLarge { max: 1024, .. })
        ));
    }

    #[test]
    fn test_blank_payload_is_valid() {
        let blank = ArtifactPayload::blank();
        assert!(ArtifactPayload::parse(blank.as_str(), 1024).is_ok());
        assert!(blank.is_blank());
    }

    #[test]
    fn test_get_missing_returns_blank() {
        assert!(store().get("wall", Instant::now()).is_blank());
    }

    #[test]
    fn test_put_reports_change_only_for_new_content() {
        let mut store = store();
        let now = Instant::now();
        assert!(store.put("wall", payload(b"a"), now));
        assert!(!store.put("wall", payload(b"a"), now));
        assert!(store.put("wall", payload(b"b"), now));
        assert_eq!(store.get("wall", now), payload(b"b"));
    }

    #[test]
    fn test_get_expired_returns_blank() {
        let mut store = store();
        let t0 = Instant::now();
        store.put("wall", payload(b"a"), t0);

        let later = t0 + RETENTION + Duration::from_secs(1);
        assert!(store.get("wall", later).is_blank());
        assert!(!store.is_live("wall", later));
    }

    #[test]
    fn test_put_after_expiry_counts_as_change() {
        let mut store = store();
        let t0 = Instant::now();
        store.put("wall", payload(b"a"), t0);
        assert!(store.put("wall", payload(b"a"), t0 + RETENTION));
    }

    #[test]
    fn test_prune_drops_only_expired() {
        let mut store = store();
        let t0 = Instant::now();
        store.put("old", payload(b"a"), t0);
        store.put("new", payload(b"b"), t0 + Duration::from_secs(20 * 60));

        assert_eq!(store.prune(t0 + Duration::from_secs(31 * 60)), 1);
        assert_eq!(store.len(), 1);
    }
}
