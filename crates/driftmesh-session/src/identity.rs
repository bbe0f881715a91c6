//! Local participant identity: identifier candidate, display name, color.

use std::time::{SystemTime, UNIX_EPOCH};

use driftmesh_protocol::{Color, ParticipantRecord, PeerId, Vec3};
use rand::Rng;

/// Who this participant is, before and after the provider assigns an id.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    /// The identifier we ask the provider for.
    pub candidate: PeerId,
    /// User-supplied display name.
    pub username: String,
    /// Assigned once here and never renegotiated.
    pub color: Color,
}

impl LocalIdentity {
    /// Creates an identity with a fresh candidate and a random color.
    pub fn generate(username: impl Into<String>) -> Self {
        Self {
            candidate: generate_candidate(),
            username: username.into(),
            color: random_color(),
        }
    }

    /// The presence record for this participant under the assigned `id`.
    pub fn record(&self, id: PeerId, position: Vec3, rotation: f32) -> ParticipantRecord {
        ParticipantRecord {
            id,
            username: self.username.clone(),
            color: self.color,
            position,
            rotation,
        }
    }
}

/// Generates an identifier candidate.
///
/// The candidate is the wall-clock time in milliseconds (hex) followed by
/// 48 random bits, e.g. `18f2c3a1b7e-9c04d2aa31f0`. The time prefix keeps
/// candidates from different sessions apart even if the random part
/// collided, and the random part separates participants that start in
/// the same millisecond.
pub fn generate_candidate() -> PeerId {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    let bytes: [u8; 6] = rand::rng().random();
    let token: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    PeerId::new(format!("{millis:x}-{token}"))
}

/// Picks a random color bright enough to read against a dark scene.
pub fn random_color() -> Color {
    let mut rng = rand::rng();
    Color::from_rgb(
        rng.random_range(64..=255),
        rng.random_range(64..=255),
        rng.random_range(64..=255),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_candidate_has_time_and_token_parts() {
        let candidate = generate_candidate();
        let (time, token) = candidate.as_str().split_once('-').unwrap();
        assert!(u128::from_str_radix(time, 16).is_ok());
        assert_eq!(token.len(), 12);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_candidate_is_unique() {
        let a = generate_candidate();
        let b = generate_candidate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_random_color_channels_are_bright() {
        for _ in 0..32 {
            let Color(packed) = random_color();
            for shift in [0, 8, 16] {
                assert!((packed >> shift) & 0xff >= 64);
            }
        }
    }

    #[test]
    fn test_record_uses_assigned_id() {
        let identity = LocalIdentity::generate("ada");
        let record = identity.record(PeerId::from("host1"), Vec3::ZERO, 0.25);
        assert_eq!(record.id, PeerId::from("host1"));
        assert_eq!(record.username, "ada");
        assert_eq!(record.color, identity.color);
        assert_eq!(record.rotation, 0.25);
    }
}
