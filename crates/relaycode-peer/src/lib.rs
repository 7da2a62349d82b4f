pub mod error;
pub mod session;
pub mod state;

pub use error::PeerSessionError;
pub use session::{spawn_peer_session, PeerCommand, PeerNotification};
pub use state::{Action, PeerSession, PendingIceCandidate, Role, SessionState};
