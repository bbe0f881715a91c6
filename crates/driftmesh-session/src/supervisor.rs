//! The link supervisor: keeps one transport session alive.
//!
//! The supervisor is a state machine. It never calls the transport; it
//! returns [`SupervisorCommand`]s for its owner to execute, and it owns at
//! most one pending timer, which the owner polls.
//!
//! ```text
//!  Initializing ──start──→ Connecting ──open──→ Open
//!                              │                  │
//!                     timeout: fallback    fault / disconnect
//!                              │                  ▼
//!                              │        Errored | Disconnected
//!                              │                  │ reconnect timer
//!                              ▼                  ▼
//!                          Reconnecting ──open──→ Open
//!                              │
//!                   fault: fallback timer (once), then
//!                              ▼
//!                   Destroyed(Exhausted)  ← needs user action
//! ```
//!
//! Every `open` bumps the epoch. Events carrying an older epoch come from
//! a session that was already destroyed and are ignored.

use std::time::{Duration, Instant};

use driftmesh_protocol::PeerId;
use driftmesh_transport::{TransportFault, TransportProfile};

// ---------------------------------------------------------------------------
// SupervisorConfig
// ---------------------------------------------------------------------------

/// Timing and transport profiles for the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Delay before each reconnect or fallback attempt.
    ///
    /// Default: 3 seconds.
    pub reconnect_delay: Duration,

    /// How long a session may stay unopened before the supervisor falls
    /// back without waiting for an explicit error.
    ///
    /// Default: 10 seconds.
    pub connect_timeout: Duration,

    /// Profile used first and after every user-requested reconnect.
    pub primary: TransportProfile,

    /// Profile used for the single fallback attempt.
    pub alternate: TransportProfile,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(10),
            primary: TransportProfile::primary(),
            alternate: TransportProfile::alternate(),
        }
    }
}

impl SupervisorConfig {
    /// Returns a copy with zero durations replaced by their defaults.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        if self.reconnect_delay.is_zero() {
            self.reconnect_delay = defaults.reconnect_delay;
        }
        if self.connect_timeout.is_zero() {
            self.connect_timeout = defaults.connect_timeout;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// States and commands
// ---------------------------------------------------------------------------

/// Why the supervisor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    /// The owner tore the session down. Final.
    Teardown,
    /// The user chose to continue without a mesh. Retryable.
    Solo,
    /// The reconnect ladder ran out. Retryable by user action.
    Exhausted,
}

/// Where the supervisor is in the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Initializing,
    Connecting,
    Open,
    Disconnected,
    Errored,
    Reconnecting,
    Destroyed(DestroyReason),
}

/// The one timer the supervisor may have outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Retry the active profile.
    Reconnect,
    /// Switch to the alternate profile.
    Fallback,
    /// The current attempt took too long to open.
    ConnectTimeout,
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    kind: TimerKind,
    deadline: Instant,
}

/// What the owner must do to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorCommand {
    /// Open a session for `epoch` with `profile`.
    Open {
        epoch: u64,
        profile: TransportProfile,
    },
    /// Close every link and destroy the transport session.
    Destroy,
    /// Forget the pending connection attempt to this peer only.
    DropAttempt(PeerId),
}

/// The coarse status shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProfileChoice {
    Primary,
    Alternate,
}

// ---------------------------------------------------------------------------
// LinkSupervisor
// ---------------------------------------------------------------------------

/// Owns the lifecycle of the transport session.
#[derive(Debug)]
pub struct LinkSupervisor {
    config: SupervisorConfig,
    state: SupervisorState,
    epoch: u64,
    timer: Option<Timer>,
    profile: ProfileChoice,
    /// Set once the fallback has been spent in the current episode.
    fallback_used: bool,
    last_fault: Option<String>,
    reconnect_attempts: u64,
    fallbacks: u64,
}

impl LinkSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config: config.validated(),
            state: SupervisorState::Initializing,
            epoch: 0,
            timer: None,
            profile: ProfileChoice::Primary,
            fallback_used: false,
            last_fault: None,
            reconnect_attempts: 0,
            fallbacks: 0,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Epoch of the most recent `Open` command.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The kind of the pending timer, if any.
    pub fn pending_timer(&self) -> Option<TimerKind> {
        self.timer.map(|timer| timer.kind)
    }

    /// When the owner should next call [`poll`](Self::poll).
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.map(|timer| timer.deadline)
    }

    /// The profile the current (or next) attempt uses.
    pub fn active_profile(&self) -> &TransportProfile {
        match self.profile {
            ProfileChoice::Primary => &self.config.primary,
            ProfileChoice::Alternate => &self.config.alternate,
        }
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts
    }

    pub fn fallbacks(&self) -> u64 {
        self.fallbacks
    }

    /// Starts the first session. Does nothing unless `Initializing`.
    pub fn start(&mut self, now: Instant) -> Vec<SupervisorCommand> {
        if self.state != SupervisorState::Initializing {
            return Vec::new();
        }
        vec![self.open(SupervisorState::Connecting, now)]
    }

    /// Handles the transport reporting `Open` for `epoch`.
    ///
    /// Returns `true` exactly once per session instance; stale epochs and
    /// repeats return `false`.
    pub fn on_open(&mut self, epoch: u64) -> bool {
        if epoch != self.epoch || !self.is_attempting() {
            tracing::debug!(epoch, current = self.epoch, state = ?self.state, "ignoring open");
            return false;
        }
        tracing::info!(epoch, profile = %self.active_profile().name, "transport session open");
        self.state = SupervisorState::Open;
        self.timer = None;
        self.fallback_used = false;
        self.last_fault = None;
        true
    }

    /// Handles a session fault.
    pub fn on_fault(&mut self, epoch: u64, fault: &TransportFault, now: Instant) -> Vec<SupervisorCommand> {
        if epoch != self.epoch {
            tracing::debug!(epoch, %fault, "ignoring fault from stale session");
            return Vec::new();
        }
        if let TransportFault::PeerUnavailable(peer) = fault {
            tracing::info!(%peer, "peer unavailable, dropping attempt");
            return vec![SupervisorCommand::DropAttempt(peer.clone())];
        }
        self.last_fault = Some(fault.to_string());
        self.degrade(SupervisorState::Errored, now)
    }

    /// Handles the session losing its signaling connection.
    pub fn on_disconnected(&mut self, epoch: u64, now: Instant) -> Vec<SupervisorCommand> {
        if epoch != self.epoch {
            tracing::debug!(epoch, "ignoring disconnect from stale session");
            return Vec::new();
        }
        self.last_fault = Some("signaling connection lost".to_string());
        self.degrade(SupervisorState::Disconnected, now)
    }

    /// Fires the pending timer if it is due.
    pub fn poll(&mut self, now: Instant) -> Vec<SupervisorCommand> {
        let Some(timer) = self.timer.filter(|timer| timer.deadline <= now) else {
            return Vec::new();
        };
        self.timer = None;
        match timer.kind {
            TimerKind::Reconnect => {
                self.reconnect_attempts += 1;
                tracing::info!(attempt = self.reconnect_attempts, "reconnecting");
                vec![
                    SupervisorCommand::Destroy,
                    self.open(SupervisorState::Reconnecting, now),
                ]
            }
            TimerKind::Fallback => self.fall_back(now),
            TimerKind::ConnectTimeout => {
                tracing::warn!(epoch = self.epoch, "session did not open in time");
                self.last_fault = Some("connection timed out".to_string());
                if self.fallback_used {
                    self.give_up()
                } else {
                    self.fall_back(now)
                }
            }
        }
    }

    /// User action: start over on the primary profile with a fresh ladder.
    pub fn request_reconnect(&mut self, now: Instant) -> Vec<SupervisorCommand> {
        if self.state == SupervisorState::Destroyed(DestroyReason::Teardown) {
            return Vec::new();
        }
        self.profile = ProfileChoice::Primary;
        self.fallback_used = false;
        self.reconnect_attempts += 1;
        vec![
            SupervisorCommand::Destroy,
            self.open(SupervisorState::Connecting, now),
        ]
    }

    /// User action: switch to the alternate profile now. The fallback is
    /// considered spent.
    pub fn request_alternate(&mut self, now: Instant) -> Vec<SupervisorCommand> {
        if self.state == SupervisorState::Destroyed(DestroyReason::Teardown) {
            return Vec::new();
        }
        self.profile = ProfileChoice::Alternate;
        self.fallback_used = true;
        self.fallbacks += 1;
        vec![
            SupervisorCommand::Destroy,
            self.open(SupervisorState::Connecting, now),
        ]
    }

    /// User action: stop meshing and continue alone.
    pub fn go_solo(&mut self) -> Vec<SupervisorCommand> {
        if matches!(self.state, SupervisorState::Destroyed(DestroyReason::Teardown)) {
            return Vec::new();
        }
        tracing::info!("continuing without a mesh");
        self.stop(DestroyReason::Solo)
    }

    /// Stops for good. Safe to call any number of times.
    pub fn teardown(&mut self) -> Vec<SupervisorCommand> {
        if self.state == SupervisorState::Destroyed(DestroyReason::Teardown) {
            return Vec::new();
        }
        tracing::info!("supervisor torn down");
        self.stop(DestroyReason::Teardown)
    }

    /// Coarse status for display.
    pub fn status(&self) -> ConnectionStatus {
        match self.state {
            SupervisorState::Initializing
            | SupervisorState::Connecting
            | SupervisorState::Reconnecting => ConnectionStatus::Connecting,
            SupervisorState::Open => ConnectionStatus::Connected,
            SupervisorState::Disconnected
            | SupervisorState::Destroyed(DestroyReason::Solo | DestroyReason::Teardown) => {
                ConnectionStatus::Disconnected
            }
            SupervisorState::Errored | SupervisorState::Destroyed(DestroyReason::Exhausted) => {
                ConnectionStatus::Errored
            }
        }
    }

    /// A one-line, human-readable status.
    pub fn status_text(&self) -> String {
        let fault = self.last_fault.as_deref().unwrap_or("unknown error");
        match self.state {
            SupervisorState::Initializing => "Starting".to_string(),
            SupervisorState::Connecting => {
                format!("Connecting via {}", self.active_profile().name)
            }
            SupervisorState::Open => "Connected".to_string(),
            SupervisorState::Disconnected | SupervisorState::Errored => {
                format!("Connection lost ({fault}), retrying shortly")
            }
            SupervisorState::Reconnecting => {
                format!("Reconnecting via {}", self.active_profile().name)
            }
            SupervisorState::Destroyed(DestroyReason::Exhausted) => format!(
                "Could not connect ({fault}). Reconnect, try the alternate transport, or continue solo"
            ),
            SupervisorState::Destroyed(DestroyReason::Solo) => "Playing solo".to_string(),
            SupervisorState::Destroyed(DestroyReason::Teardown) => "Closed".to_string(),
        }
    }

    /// `true` when nothing more will happen without a user action.
    pub fn needs_user_action(&self) -> bool {
        self.state == SupervisorState::Destroyed(DestroyReason::Exhausted)
    }

    // -- internals --

    fn is_attempting(&self) -> bool {
        matches!(
            self.state,
            SupervisorState::Connecting | SupervisorState::Reconnecting
        )
    }

    fn open(&mut self, state: SupervisorState, now: Instant) -> SupervisorCommand {
        self.epoch += 1;
        self.state = state;
        self.timer = Some(Timer {
            kind: TimerKind::ConnectTimeout,
            deadline: now + self.config.connect_timeout,
        });
        SupervisorCommand::Open {
            epoch: self.epoch,
            profile: self.active_profile().clone(),
        }
    }

    fn schedule(&mut self, kind: TimerKind, now: Instant) {
        if let Some(previous) = self.timer.replace(Timer {
            kind,
            deadline: now + self.config.reconnect_delay,
        }) {
            tracing::debug!(?previous.kind, ?kind, "rescheduling supervisor timer");
        }
        tracing::info!(?kind, delay = ?self.config.reconnect_delay, "supervisor timer scheduled");
    }

    fn degrade(&mut self, next: SupervisorState, now: Instant) -> Vec<SupervisorCommand> {
        match self.state {
            SupervisorState::Initializing | SupervisorState::Destroyed(_) => {}
            SupervisorState::Open | SupervisorState::Connecting => {
                self.state = next;
                self.schedule(TimerKind::Reconnect, now);
            }
            SupervisorState::Disconnected | SupervisorState::Errored => {
                let kind = match self.timer.map(|timer| timer.kind) {
                    Some(TimerKind::Fallback) => TimerKind::Fallback,
                    _ => TimerKind::Reconnect,
                };
                self.state = next;
                self.schedule(kind, now);
            }
            SupervisorState::Reconnecting => {
                if self.fallback_used {
                    return self.give_up();
                }
                self.state = next;
                self.schedule(TimerKind::Fallback, now);
            }
        }
        Vec::new()
    }

    fn fall_back(&mut self, now: Instant) -> Vec<SupervisorCommand> {
        self.fallback_used = true;
        self.fallbacks += 1;
        self.profile = ProfileChoice::Alternate;
        tracing::warn!(profile = %self.config.alternate.name, "falling back to alternate transport");
        vec![
            SupervisorCommand::Destroy,
            self.open(SupervisorState::Reconnecting, now),
        ]
    }

    fn give_up(&mut self) -> Vec<SupervisorCommand> {
        tracing::warn!(fault = ?self.last_fault, "reconnect attempts exhausted");
        self.stop(DestroyReason::Exhausted)
    }

    fn stop(&mut self, reason: DestroyReason) -> Vec<SupervisorCommand> {
        self.state = SupervisorState::Destroyed(reason);
        self.timer = None;
        vec![SupervisorCommand::Destroy]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> (LinkSupervisor, Instant) {
        let now = Instant::now();
        let mut sup = LinkSupervisor::new(SupervisorConfig::default());
        sup.start(now);
        (sup, now)
    }

    fn opened() -> (LinkSupervisor, Instant) {
        let (mut sup, now) = started();
        assert!(sup.on_open(sup.epoch()));
        (sup, now)
    }

    fn network() -> TransportFault {
        TransportFault::Network("reset".into())
    }

    #[test]
    fn test_start_opens_primary_with_connect_timeout() {
        let now = Instant::now();
        let mut sup = LinkSupervisor::new(SupervisorConfig::default());

        let commands = sup.start(now);

        assert_eq!(
            commands,
            vec![SupervisorCommand::Open {
                epoch: 1,
                profile: TransportProfile::primary()
            }]
        );
        assert_eq!(sup.state(), SupervisorState::Connecting);
        assert_eq!(sup.pending_timer(), Some(TimerKind::ConnectTimeout));
        assert_eq!(sup.next_deadline(), Some(now + Duration::from_secs(10)));
    }

    #[test]
    fn test_start_twice_is_noop() {
        let (mut sup, now) = started();
        assert!(sup.start(now).is_empty());
        assert_eq!(sup.epoch(), 1);
    }

    #[test]
    fn test_on_open_fires_once_per_epoch() {
        let (mut sup, now) = started();
        assert!(sup.on_open(1));
        assert!(!sup.on_open(1));
        assert_eq!(sup.state(), SupervisorState::Open);
        assert_eq!(sup.pending_timer(), None);
    }

    #[test]
    fn test_on_open_stale_epoch_is_ignored() {
        let (mut sup, now) = started();
        assert!(!sup.on_open(0));
        assert_eq!(sup.state(), SupervisorState::Connecting);
    }

    #[test]
    fn test_peer_unavailable_drops_attempt_only() {
        let (mut sup, now) = opened();
        let commands = sup.on_fault(1, &TransportFault::PeerUnavailable(PeerId::from("x")), now);
        assert_eq!(commands, vec![SupervisorCommand::DropAttempt(PeerId::from("x"))]);
        assert_eq!(sup.state(), SupervisorState::Open);
        assert_eq!(sup.pending_timer(), None);
    }

    #[test]
    fn test_degraded_schedules_exactly_one_reconnect() {
        let (mut sup, now) = opened();

        assert!(sup.on_fault(1, &network(), now).is_empty());

        assert_eq!(sup.state(), SupervisorState::Errored);
        assert_eq!(sup.pending_timer(), Some(TimerKind::Reconnect));
        assert_eq!(sup.next_deadline(), Some(now + Duration::from_secs(3)));
    }

    #[test]
    fn test_second_degrade_reschedules_instead_of_stacking() {
        let (mut sup, now) = opened();
        sup.on_disconnected(1, now);

        let later = now + Duration::from_secs(2);
        sup.on_fault(1, &network(), later);

        assert_eq!(sup.pending_timer(), Some(TimerKind::Reconnect));
        assert_eq!(sup.next_deadline(), Some(later + Duration::from_secs(3)));
        // The original deadline passes without anything firing.
        assert!(sup.poll(now + Duration::from_secs(3)).is_empty());
    }

    #[test]
    fn test_reconnect_timer_reopens_same_profile() {
        let (mut sup, now) = opened();
        sup.on_disconnected(1, now);

        let commands = sup.poll(now + Duration::from_secs(3));

        assert_eq!(
            commands,
            vec![
                SupervisorCommand::Destroy,
                SupervisorCommand::Open {
                    epoch: 2,
                    profile: TransportProfile::primary()
                }
            ]
        );
        assert_eq!(sup.state(), SupervisorState::Reconnecting);
        assert_eq!(sup.reconnect_attempts(), 1);
    }

    #[test]
    fn test_repeated_failure_falls_back_then_gives_up() {
        let (mut sup, mut now) = opened();
        sup.on_disconnected(1, now);
        now += Duration::from_secs(3);
        sup.poll(now);

        // The reconnect attempt fails: fallback is scheduled.
        sup.on_fault(2, &network(), now);
        assert_eq!(sup.pending_timer(), Some(TimerKind::Fallback));
        now += Duration::from_secs(3);
        let commands = sup.poll(now);
        assert_eq!(
            commands,
            vec![
                SupervisorCommand::Destroy,
                SupervisorCommand::Open {
                    epoch: 3,
                    profile: TransportProfile::alternate()
                }
            ]
        );

        // The fallback fails too: terminal, retryable by the user.
        let commands = sup.on_fault(3, &network(), now);
        assert_eq!(commands, vec![SupervisorCommand::Destroy]);
        assert_eq!(sup.state(), SupervisorState::Destroyed(DestroyReason::Exhausted));
        assert!(sup.needs_user_action());
        assert_eq!(sup.status(), ConnectionStatus::Errored);
        assert_eq!(sup.next_deadline(), None);
    }

    #[test]
    fn test_connect_timeout_forces_immediate_fallback() {
        let (mut sup, now) = started();

        let commands = sup.poll(now + Duration::from_secs(10));

        assert_eq!(
            commands,
            vec![
                SupervisorCommand::Destroy,
                SupervisorCommand::Open {
                    epoch: 2,
                    profile: TransportProfile::alternate()
                }
            ]
        );
        assert_eq!(sup.fallbacks(), 1);
    }

    #[test]
    fn test_connect_timeout_after_fallback_gives_up() {
        let (mut sup, now) = started();
        sup.poll(now + Duration::from_secs(10));

        let commands = sup.poll(now + Duration::from_secs(20));

        assert_eq!(commands, vec![SupervisorCommand::Destroy]);
        assert!(sup.needs_user_action());
    }

    #[test]
    fn test_stale_fault_is_ignored() {
        let (mut sup, now) = opened();
        sup.on_disconnected(1, now);
        sup.poll(now + Duration::from_secs(3));

        assert!(sup.on_fault(1, &network(), now).is_empty());
        assert_eq!(sup.state(), SupervisorState::Reconnecting);
    }

    #[test]
    fn test_request_reconnect_from_exhausted_restarts_on_primary() {
        let (mut sup, now) = started();
        sup.poll(now + Duration::from_secs(10));
        sup.poll(now + Duration::from_secs(20));
        assert!(sup.needs_user_action());

        let commands = sup.request_reconnect(now + Duration::from_secs(30));

        assert!(matches!(
            commands.as_slice(),
            [SupervisorCommand::Destroy, SupervisorCommand::Open { profile, .. }]
                if *profile == TransportProfile::primary()
        ));
        assert_eq!(sup.state(), SupervisorState::Connecting);
    }

    #[test]
    fn test_request_alternate_switches_profile() {
        let (mut sup, now) = opened();
        let commands = sup.request_alternate(now);
        assert!(matches!(
            commands.as_slice(),
            [SupervisorCommand::Destroy, SupervisorCommand::Open { profile, .. }]
                if *profile == TransportProfile::alternate()
        ));
        assert_eq!(sup.active_profile(), &TransportProfile::alternate());
    }

    #[test]
    fn test_teardown_is_idempotent_and_cancels_timer() {
        let (mut sup, now) = opened();
        sup.on_disconnected(1, now);

        assert_eq!(sup.teardown(), vec![SupervisorCommand::Destroy]);
        assert!(sup.teardown().is_empty());
        assert_eq!(sup.next_deadline(), None);
        assert!(sup.poll(now + Duration::from_secs(60)).is_empty());
        assert!(sup.request_reconnect(now).is_empty());
    }

    #[test]
    fn test_go_solo_is_disconnected_and_retryable() {
        let (mut sup, now) = opened();
        assert_eq!(sup.go_solo(), vec![SupervisorCommand::Destroy]);
        assert_eq!(sup.status(), ConnectionStatus::Disconnected);
        assert!(!sup.request_reconnect(now).is_empty());
    }
}
