pub mod engine;
pub mod error;
pub mod types;
pub mod wire;

pub use engine::{spawn_transfer_engine, PendingUpload, TransferCommand, TransferEvent};
pub use error::TransferError;
pub use types::{FileInfo, QueueInfo};
pub use wire::Frame;
