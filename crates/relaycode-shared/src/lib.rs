pub mod constants;
pub mod crypto;
pub mod error;
pub mod signaling;
pub mod types;
