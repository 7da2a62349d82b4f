use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("unknown frame tag: 0x{0:02x}")]
    UnknownTag(u8),

    #[error(transparent)]
    Crypto(#[from] relaycode_shared::error::CryptoError),

    #[error("file io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("data channel send failed: {0}")]
    DataChannel(String),
}
