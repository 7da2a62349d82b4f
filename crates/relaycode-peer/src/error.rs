use thiserror::Error;

#[derive(Error, Debug)]
pub enum PeerSessionError {
    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("failed to apply SDP: {0}")]
    SdpApply(String),

    #[error("session already has an open handshake")]
    AlreadyHandshaking,
}
