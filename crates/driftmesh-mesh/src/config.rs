//! Mesh configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the mesh and its replicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Maximum outbound position updates per second.
    ///
    /// Default: 10. Clamped to `1..=30`.
    pub position_rate_hz: u32,

    /// How long an artifact stays live after its last write.
    ///
    /// Default: 30 minutes.
    pub artifact_retention: Duration,

    /// Largest accepted artifact payload, in bytes of encoded string.
    ///
    /// Default: 2 MiB.
    pub max_artifact_payload: usize,

    /// Minimum time between attempts to re-dial locator targets that are
    /// not linked. `None` disables rejoining.
    ///
    /// Default: 5 seconds.
    pub rejoin_interval: Option<Duration>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            position_rate_hz: 10,
            artifact_retention: Duration::from_secs(30 * 60),
            max_artifact_payload: 2 * 1024 * 1024,
            rejoin_interval: Some(Duration::from_secs(5)),
        }
    }
}

impl MeshConfig {
    pub const MAX_POSITION_RATE_HZ: u32 = 30;

    /// Clamps out-of-range values so the config is safe to use.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        if self.position_rate_hz == 0 || self.position_rate_hz > Self::MAX_POSITION_RATE_HZ {
            tracing::warn!(
                rate = self.position_rate_hz,
                max = Self::MAX_POSITION_RATE_HZ,
                "position_rate_hz out of range, clamping"
            );
            self.position_rate_hz = self.position_rate_hz.clamp(1, Self::MAX_POSITION_RATE_HZ);
        }
        if self.artifact_retention.is_zero() {
            self.artifact_retention = defaults.artifact_retention;
        }
        if self.max_artifact_payload == 0 {
            self.max_artifact_payload = defaults.max_artifact_payload;
        }
        self
    }

    /// Time between outbound position updates.
    pub fn position_interval(&self) -> Duration {
        Duration::from_secs(1) / self.position_rate_hz.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_config_default() {
        let config = MeshConfig::default();
        assert_eq!(config.position_rate_hz, 10);
        assert_eq!(config.artifact_retention, Duration::from_secs(1800));
        assert_eq!(config.position_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_validated_clamps_rate() {
        let fast = MeshConfig {
            position_rate_hz: 120,
            ..MeshConfig::default()
        }
        .validated();
        assert_eq!(fast.position_rate_hz, 30);

        let zero = MeshConfig {
            position_rate_hz: 0,
            ..MeshConfig::default()
        }
        .validated();
        assert_eq!(zero.position_rate_hz, 1);
    }

    #[test]
    fn test_validated_restores_zero_limits() {
        let config = MeshConfig {
            artifact_retention: Duration::ZERO,
            max_artifact_payload: 0,
            ..MeshConfig::default()
        }
        .validated();
        assert_eq!(config.artifact_retention, Duration::from_secs(1800));
        assert_eq!(config.max_artifact_payload, 2 * 1024 * 1024);
    }
}
