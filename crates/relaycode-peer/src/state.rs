//! The peer connection lifecycle state machine, pure and independent of the
//! underlying WebRTC transport so it can be driven and tested without a
//! live network.

/// Which side of the handshake this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Joiner,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

/// An ICE candidate buffered before the remote description is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingIceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_m_line_index: Option<u32>,
}

/// Drives the peer connection lifecycle. This struct holds no transport
/// handle; it only tracks role, connection state, and the pending-ICE
/// buffer, returning an action for the caller (the actor loop in
/// `session.rs`) to execute against the real `webrtc` objects.
pub struct PeerSession {
    role: Role,
    state: SessionState,
    remote_description_set: bool,
    pending_ice: Vec<PendingIceCandidate>,
}

#[derive(Debug, PartialEq)]
pub enum Action {
    /// Create the peer transport and an offer; emit it via signaling.
    BeginAsInitiator,
    /// Create the peer transport from a received offer, apply it as the
    /// remote description, drain buffered ICE, then create + emit an answer.
    CreateAnswer { drained_ice: Vec<PendingIceCandidate> },
    /// Apply the received answer as the remote description and drain
    /// buffered ICE.
    ApplyAnswer { drained_ice: Vec<PendingIceCandidate> },
    /// Apply a single ICE candidate immediately (remote description is set).
    ApplyIceCandidate(PendingIceCandidate),
    /// Buffer a candidate; nothing to apply yet.
    BufferIceCandidate,
    /// Tear down the peer transport and discard all session state.
    TearDown,
    /// Nothing to do (e.g. a stray or duplicate event).
    None,
}

impl PeerSession {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: SessionState::Idle,
            remote_description_set: false,
            pending_ice: Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// `peer-joined` observed on the signaling transport.
    pub fn on_peer_joined(&mut self) -> Action {
        if self.state != SessionState::Idle {
            return Action::None;
        }
        self.state = SessionState::Connecting;
        match self.role {
            Role::Initiator => Action::BeginAsInitiator,
            // The joiner waits for the offer; nothing to do yet.
            Role::Joiner => Action::None,
        }
    }

    /// Received `offer {sdp}` (joiner only).
    pub fn on_offer_received(&mut self) -> Action {
        if self.role != Role::Joiner {
            return Action::None;
        }
        self.state = SessionState::Connecting;
        self.remote_description_set = true;
        Action::CreateAnswer {
            drained_ice: std::mem::take(&mut self.pending_ice),
        }
    }

    /// Received `answer {sdp}` (initiator only).
    pub fn on_answer_received(&mut self) -> Action {
        if self.role != Role::Initiator {
            return Action::None;
        }
        self.remote_description_set = true;
        Action::ApplyAnswer {
            drained_ice: std::mem::take(&mut self.pending_ice),
        }
    }

    /// Received `ice-candidate` from the peer via signaling.
    pub fn on_remote_ice_candidate(&mut self, candidate: PendingIceCandidate) -> Action {
        if self.remote_description_set {
            Action::ApplyIceCandidate(candidate)
        } else {
            self.pending_ice.push(candidate);
            Action::BufferIceCandidate
        }
    }

    /// The data channel reported its `open` event.
    pub fn on_data_channel_open(&mut self) {
        self.state = SessionState::Connected;
    }

    /// `peer-left` on signaling, or a benign transport close.
    pub fn on_peer_left(&mut self) -> Action {
        self.state = SessionState::Disconnected;
        self.reset_session_state();
        Action::TearDown
    }

    /// The underlying peer transport reported `failed`.
    pub fn on_transport_failed(&mut self) -> Action {
        self.state = SessionState::Failed;
        self.reset_session_state();
        Action::TearDown
    }

    /// The underlying peer transport reported `disconnected` -- recoverable,
    /// not torn down.
    pub fn on_transport_disconnected(&mut self) {
        // Spec.md: "disconnected is treated as recoverable (no teardown)".
        // The session state itself only moves to Disconnected on peer-left
        // or an explicit benign close, so this is intentionally a no-op
        // beyond logging at the call site.
    }

    /// Explicit cleanup from `{disconnected, failed, connected}`, re-entrant.
    pub fn cleanup(&mut self) {
        self.state = SessionState::Idle;
        self.reset_session_state();
    }

    fn reset_session_state(&mut self) {
        self.remote_description_set = false;
        self.pending_ice.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiator_begins_handshake_on_peer_joined() {
        let mut session = PeerSession::new(Role::Initiator);
        let action = session.on_peer_joined();
        assert_eq!(action, Action::BeginAsInitiator);
        assert_eq!(session.state(), &SessionState::Connecting);
    }

    #[test]
    fn joiner_waits_on_peer_joined() {
        let mut session = PeerSession::new(Role::Joiner);
        let action = session.on_peer_joined();
        assert_eq!(action, Action::None);
        assert_eq!(session.state(), &SessionState::Connecting);
    }

    #[test]
    fn ice_candidates_before_remote_description_are_buffered() {
        let mut session = PeerSession::new(Role::Joiner);
        let candidate = PendingIceCandidate {
            candidate: "candidate:1 1 UDP ...".into(),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        };
        let action = session.on_remote_ice_candidate(candidate);
        assert_eq!(action, Action::BufferIceCandidate);
    }

    #[test]
    fn joiner_drains_pending_ice_after_offer() {
        let mut session = PeerSession::new(Role::Joiner);
        let candidate = PendingIceCandidate {
            candidate: "candidate:1 1 UDP ...".into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        };
        session.on_remote_ice_candidate(candidate.clone());

        let action = session.on_offer_received();
        match action {
            Action::CreateAnswer { drained_ice } => {
                assert_eq!(drained_ice, vec![candidate]);
            }
            other => panic!("expected CreateAnswer, got {other:?}"),
        }
    }

    #[test]
    fn ice_candidates_after_remote_description_apply_immediately() {
        let mut session = PeerSession::new(Role::Initiator);
        session.on_peer_joined();
        session.on_answer_received();

        let candidate = PendingIceCandidate {
            candidate: "candidate:2 1 UDP ...".into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        };
        let action = session.on_remote_ice_candidate(candidate.clone());
        assert_eq!(action, Action::ApplyIceCandidate(candidate));
    }

    #[test]
    fn data_channel_open_transitions_to_connected() {
        let mut session = PeerSession::new(Role::Initiator);
        session.on_peer_joined();
        session.on_data_channel_open();
        assert_eq!(session.state(), &SessionState::Connected);
    }

    #[test]
    fn peer_left_tears_down_and_goes_disconnected() {
        let mut session = PeerSession::new(Role::Initiator);
        session.on_peer_joined();
        session.on_data_channel_open();

        let action = session.on_peer_left();
        assert_eq!(action, Action::TearDown);
        assert_eq!(session.state(), &SessionState::Disconnected);
    }

    #[test]
    fn transport_failed_is_terminal() {
        let mut session = PeerSession::new(Role::Initiator);
        session.on_peer_joined();
        let action = session.on_transport_failed();
        assert_eq!(action, Action::TearDown);
        assert_eq!(session.state(), &SessionState::Failed);
    }

    #[test]
    fn cleanup_from_any_terminal_state_returns_to_idle() {
        for mut session in [
            PeerSession::new(Role::Initiator),
            PeerSession::new(Role::Joiner),
        ] {
            session.on_peer_joined();
            session.on_transport_failed();
            session.cleanup();
            assert_eq!(session.state(), &SessionState::Idle);
        }
    }
}
