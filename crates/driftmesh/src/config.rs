//! Participant configuration and builder.

use std::time::Duration;

use driftmesh_mesh::MeshConfig;
use driftmesh_session::SupervisorConfig;

/// Locator used when none is given: nobody to join, so this participant
/// starts a new session.
pub const DEFAULT_LOCATOR: &str = "driftmesh://local/space";

/// Everything needed to run one participant.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Display name shown to other participants.
    pub username: String,

    /// The shared session locator. Without a `p`/`peer` parameter this
    /// participant is the initiator.
    pub locator: String,

    /// Reconnect ladder timing and transport profiles.
    pub supervisor: SupervisorConfig,

    /// Rate limits, artifact retention, rejoin interval.
    pub mesh: MeshConfig,

    /// Period of the health check (rejoin, artifact pruning).
    ///
    /// Default: 1 second. Never less than 1 second.
    pub health_interval: Duration,

    /// How many recent events the diagnostics log keeps.
    ///
    /// Default: 64.
    pub event_log_capacity: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            username: "guest".to_string(),
            locator: DEFAULT_LOCATOR.to_string(),
            supervisor: SupervisorConfig::default(),
            mesh: MeshConfig::default(),
            health_interval: Duration::from_secs(1),
            event_log_capacity: 64,
        }
    }
}

impl PeerConfig {
    pub const MIN_HEALTH_INTERVAL: Duration = Duration::from_secs(1);

    /// Clamps out-of-range values so the config is safe to use.
    pub fn validated(mut self) -> Self {
        if self.health_interval < Self::MIN_HEALTH_INTERVAL {
            tracing::warn!(
                requested_ms = self.health_interval.as_millis() as u64,
                "health_interval below minimum, clamping to 1s"
            );
            self.health_interval = Self::MIN_HEALTH_INTERVAL;
        }
        if self.event_log_capacity == 0 {
            self.event_log_capacity = 1;
        }
        if self.username.trim().is_empty() {
            self.username = "guest".to_string();
        }
        self.supervisor = self.supervisor.validated();
        self.mesh = self.mesh.validated();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_config_default() {
        let config = PeerConfig::default();
        assert_eq!(config.health_interval, Duration::from_secs(1));
        assert_eq!(config.event_log_capacity, 64);
        assert_eq!(config.locator, DEFAULT_LOCATOR);
    }

    #[test]
    fn test_validated_clamps_health_interval() {
        let config = PeerConfig {
            health_interval: Duration::from_millis(100),
            ..PeerConfig::default()
        }
        .validated();
        assert_eq!(config.health_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_validated_fills_blank_username() {
        let config = PeerConfig {
            username: "  ".into(),
            event_log_capacity: 0,
            ..PeerConfig::default()
        }
        .validated();
        assert_eq!(config.username, "guest");
        assert_eq!(config.event_log_capacity, 1);
    }
}
