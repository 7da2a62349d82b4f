/// Default signaling server HTTP port, overridable by the `PORT` env var.
pub const DEFAULT_SIGNAL_PORT: u16 = 8080;

/// Room code length (uppercase alphanumeric).
pub const ROOM_CODE_LEN: usize = 6;

/// AES-256 key size in bytes.
pub const AES_KEY_SIZE: usize = 32;

/// AES-GCM nonce (IV) size in bytes.
pub const GCM_NONCE_SIZE: usize = 12;

/// Size of the random high-order bytes of an IV, unique per sender role.
pub const SESSION_PREFIX_SIZE: usize = 4;

/// Plaintext chunk size in bytes. The final chunk of a file may be shorter.
pub const CHUNK_SIZE: usize = 65_536;

/// Sender pauses when the transport's buffered-byte count exceeds this.
pub const BUFFER_FULL: usize = 262_144;

/// Low-water mark at which the transport resumes the sender.
pub const BUFFER_LOW: usize = 131_072;

/// Minimum interval between progress samples, in milliseconds.
pub const PROGRESS_SAMPLE_INTERVAL_MS: u64 = 100;

/// Pragmatic drain delay after FILE_COMPLETE before sending the next file.
pub const FILE_COMPLETE_DRAIN_MS: u64 = 100;

/// Signaling transport reconnect backoff schedule, capped at the last value.
pub const RECONNECT_BACKOFF_MS: &[u64] = &[1_000, 2_000, 4_000, 8_000, 16_000];

/// Data channel label used for the file-transfer channel.
pub const DATA_CHANNEL_LABEL: &str = "file-transfer";
