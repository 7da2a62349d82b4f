//! Drives the send and receive halves of the file-transfer protocol over an
//! already-open data channel. Runs as a single cooperative actor task, in
//! keeping with the rest of this workspace's command/notification channel
//! pattern (see `relaycode-peer::session`).

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

use relaycode_shared::constants::{
    BUFFER_FULL, CHUNK_SIZE, FILE_COMPLETE_DRAIN_MS, PROGRESS_SAMPLE_INTERVAL_MS,
};
use relaycode_shared::crypto::{
    decrypt_chunk, encrypt_chunk, generate_session_key, IvSequence, SenderRole, SessionKey,
};

use crate::error::TransferError;
use crate::types::{FileInfo, QueueInfo};
use crate::wire::Frame;

/// One file the application asked to send.
#[derive(Debug, Clone)]
pub struct PendingUpload {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

#[derive(Debug)]
pub enum TransferCommand {
    /// Enqueue a fresh batch of files to send. Replaces any prior empty
    /// queue; a batch already in progress is not interrupted.
    EnqueueFiles(Vec<PendingUpload>),
    /// The application's answer to the most recent `IncomingOffer` event.
    RespondToOffer(bool),
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum TransferEvent {
    EncryptionReady,
    IncomingOffer(FileInfo),
    QueueUpdate(QueueInfo),
    SendProgress {
        file_id: String,
        bytes_sent: u64,
        total_size: u64,
    },
    ReceiveProgress {
        file_id: String,
        bytes_received: u64,
        total_size: u64,
    },
    FileSent {
        file_id: String,
    },
    FileReceived {
        file_id: String,
        name: String,
        mime_type: String,
        data: Vec<u8>,
    },
    SendRejected {
        file_id: String,
    },
    QueueCancelled,
    TransferComplete,
    Error(String),
}

enum ChannelEvent {
    Message(DataChannelMessage),
    BufferedAmountLow,
}

struct QueuedFile {
    id: String,
    path: PathBuf,
    name: String,
    size: u64,
    mime_type: String,
    total_chunks: u32,
}

struct InFlightSend {
    file_id: String,
    total_chunks: u32,
    total_size: u64,
    next_chunk: u32,
    bytes_sent: u64,
    handle: tokio::fs::File,
    last_progress: Instant,
}

struct ReassemblyRecord {
    file_id: String,
    name: String,
    mime_type: String,
    total_chunks: u32,
    total_size: u64,
    chunks: Vec<Option<Vec<u8>>>,
    bytes_received: u64,
    last_progress: Instant,
}

enum SendProgress {
    Advanced,
    WaitingForAccept,
    WaitingForCapacity,
    QueueEmpty,
}

struct EngineState {
    role: SenderRole,
    key: Option<SessionKey>,
    ready: bool,
    ivs: IvSequence,

    queue: VecDeque<QueuedFile>,
    pending: Option<InFlightSend>,
    in_flight: Option<InFlightSend>,
    batch_active: bool,

    incoming_offer: Option<FileInfo>,
    active_receive: Option<ReassemblyRecord>,
    recv_fatal: bool,
}

/// Spawns the transfer engine actor bound to an already-open data channel.
/// `role` determines this peer's IV namespace and whether it generates the
/// session key (initiator) or waits to import it (joiner).
pub fn spawn_transfer_engine(
    dc: Arc<RTCDataChannel>,
    role: SenderRole,
) -> (mpsc::Sender<TransferCommand>, mpsc::Receiver<TransferEvent>) {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<TransferCommand>(64);
    let (notif_tx, notif_rx) = mpsc::channel::<TransferEvent>(256);

    let (internal_tx, mut internal_rx) = mpsc::unbounded_channel::<ChannelEvent>();
    let tx = internal_tx.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(ChannelEvent::Message(msg));
        })
    }));

    let tx = internal_tx.clone();
    dc.on_buffered_amount_low(Box::new(move || {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(ChannelEvent::BufferedAmountLow);
        })
    }));

    tokio::spawn(async move {
        let mut state = EngineState {
            role,
            key: None,
            ready: false,
            ivs: IvSequence::new(role),
            queue: VecDeque::new(),
            pending: None,
            in_flight: None,
            batch_active: false,
            incoming_offer: None,
            active_receive: None,
            recv_fatal: false,
        };

        if role == SenderRole::Initiator {
            let key = generate_session_key();
            state.key = Some(key);
            state.ready = true;
            if let Err(e) = dc.send(&Frame::EncryptionKey(key).encode()).await {
                error!(error = %e, "failed to send encryption key");
            }
            let _ = notif_tx.send(TransferEvent::EncryptionReady).await;
        }

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(TransferCommand::EnqueueFiles(uploads)) => {
                            enqueue_files(&mut state, uploads, &dc, &notif_tx).await;
                        }
                        Some(TransferCommand::RespondToOffer(accept)) => {
                            respond_to_offer(&mut state, accept, &dc, &notif_tx).await;
                        }
                        Some(TransferCommand::Shutdown) | None => break,
                    }
                }
                event = internal_rx.recv() => {
                    match event {
                        Some(ChannelEvent::Message(msg)) => {
                            handle_message(&mut state, msg.data, &notif_tx).await;
                        }
                        Some(ChannelEvent::BufferedAmountLow) => {
                            // Just a wakeup; the drain loop below re-evaluates
                            // advance_send() and resumes sending if a chunk was
                            // waiting on buffer capacity.
                            debug!("buffered amount low, resuming send");
                        }
                        None => {}
                    }
                }
            }

            loop {
                match advance_send(&mut state, &dc, &notif_tx).await {
                    SendProgress::Advanced => {
                        tokio::task::yield_now().await;
                    }
                    _ => break,
                }
            }
        }

        debug!("transfer engine actor terminated");
    });

    (cmd_tx, notif_rx)
}

/// Number of `CHUNK_SIZE` chunks needed to cover `size` bytes. A zero-byte
/// file needs zero chunks -- `FILE_INFO` is still sent, followed directly by
/// `FILE_COMPLETE`.
fn compute_total_chunks(size: u64) -> u32 {
    if size == 0 {
        0
    } else {
        ((size + CHUNK_SIZE as u64 - 1) / CHUNK_SIZE as u64) as u32
    }
}

async fn enqueue_files(
    state: &mut EngineState,
    uploads: Vec<PendingUpload>,
    dc: &Arc<RTCDataChannel>,
    notif_tx: &mpsc::Sender<TransferEvent>,
) {
    let total_files = uploads.len() as u32;
    for upload in uploads {
        let total_chunks = compute_total_chunks(upload.size);
        state.queue.push_back(QueuedFile {
            id: Uuid::new_v4().to_string(),
            path: upload.path,
            name: upload.name,
            size: upload.size,
            mime_type: upload.mime_type,
            total_chunks,
        });
    }

    if !state.batch_active {
        state.batch_active = true;
        let info = QueueInfo {
            total_files,
            current_index: 0,
        };
        if let Err(e) = dc.send(&Frame::QueueInfo(info.clone()).encode()).await {
            warn!(error = %e, "failed to send queue info");
        }
        let _ = notif_tx.send(TransferEvent::QueueUpdate(info)).await;
    }
}

async fn respond_to_offer(
    state: &mut EngineState,
    accept: bool,
    dc: &Arc<RTCDataChannel>,
    notif_tx: &mpsc::Sender<TransferEvent>,
) {
    let Some(info) = state.incoming_offer.take() else {
        return;
    };

    if accept {
        state.active_receive = Some(ReassemblyRecord {
            file_id: info.id.clone(),
            name: info.name.clone(),
            mime_type: info.mime_type.clone(),
            total_chunks: info.total_chunks,
            total_size: info.size,
            chunks: vec![None; info.total_chunks as usize],
            bytes_received: 0,
            last_progress: Instant::now(),
        });
        if let Err(e) = dc.send(&Frame::FileAccept.encode()).await {
            error!(error = %e, "failed to send FILE_ACCEPT");
            let err = TransferError::DataChannel(e.to_string());
            let _ = notif_tx.send(TransferEvent::Error(err.to_string())).await;
        }
    } else if let Err(e) = dc.send(&Frame::FileReject.encode()).await {
        error!(error = %e, "failed to send FILE_REJECT");
    }
}

async fn handle_message(
    state: &mut EngineState,
    data: bytes::Bytes,
    notif_tx: &mpsc::Sender<TransferEvent>,
) {
    let frame = match Frame::decode(data) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "dropping malformed frame");
            return;
        }
    };

    match frame {
        Frame::EncryptionKey(key) => {
            if !state.ready {
                state.key = Some(key);
                state.ready = true;
                let _ = notif_tx.send(TransferEvent::EncryptionReady).await;
            }
        }
        Frame::QueueInfo(info) => {
            let _ = notif_tx.send(TransferEvent::QueueUpdate(info)).await;
        }
        Frame::FileInfo(info) => {
            if state.incoming_offer.is_some() || state.active_receive.is_some() {
                // A request arrived while one is already pending or active;
                // the protocol serializes offers, so this one is refused.
                debug!(file_id = %info.id, "auto-rejecting FILE_INFO while an offer is already pending");
            } else if state.recv_fatal {
                debug!(file_id = %info.id, "ignoring FILE_INFO after a fatal decryption error");
            } else {
                state.incoming_offer = Some(info.clone());
                let _ = notif_tx.send(TransferEvent::IncomingOffer(info)).await;
            }
        }
        Frame::FileAccept => {
            if let Some(pending) = state.pending.take() {
                state.in_flight = Some(pending);
            }
        }
        Frame::FileReject => {
            if let Some(pending) = state.pending.take() {
                let _ = notif_tx
                    .send(TransferEvent::SendRejected {
                        file_id: pending.file_id,
                    })
                    .await;
            }
            state.queue.clear();
            state.batch_active = false;
            let _ = notif_tx.send(TransferEvent::QueueCancelled).await;
        }
        Frame::FileChunk {
            chunk_index,
            file_id,
            iv,
            ciphertext,
        } => {
            if state.recv_fatal {
                return;
            }
            let Some(key) = state.key else {
                warn!("received FILE_CHUNK before encryption key was established");
                return;
            };
            let Some(record) = state.active_receive.as_mut() else {
                debug!(%file_id, "dropping FILE_CHUNK with no active reassembly record");
                return;
            };
            if record.file_id != file_id || chunk_index as usize >= record.chunks.len() {
                let _ = notif_tx
                    .send(TransferEvent::Error(format!(
                        "out-of-range chunk_index {chunk_index} for file {file_id}"
                    )))
                    .await;
                return;
            }

            match decrypt_chunk(&key, &iv, &ciphertext) {
                Ok(plaintext) => {
                    record.bytes_received += plaintext.len() as u64;
                    record.chunks[chunk_index as usize] = Some(plaintext);

                    if record.last_progress.elapsed().as_millis() as u64
                        >= PROGRESS_SAMPLE_INTERVAL_MS
                    {
                        let _ = notif_tx
                            .send(TransferEvent::ReceiveProgress {
                                file_id: record.file_id.clone(),
                                bytes_received: record.bytes_received,
                                total_size: record.total_size,
                            })
                            .await;
                        record.last_progress = Instant::now();
                    }
                }
                Err(_) => {
                    // A GCM authentication failure means the key is wrong or
                    // the channel was tampered with; the session cannot be
                    // trusted to continue.
                    error!(%file_id, chunk_index, "chunk decryption failed, aborting session");
                    state.active_receive = None;
                    state.recv_fatal = true;
                    let _ = notif_tx
                        .send(TransferEvent::Error(format!(
                            "decryption failed for file {file_id} chunk {chunk_index}; session aborted"
                        )))
                        .await;
                }
            }
        }
        Frame::FileComplete => {
            if let Some(record) = state.active_receive.take() {
                let mut data = Vec::with_capacity(record.total_size as usize);
                let mut missing = false;
                for chunk in record.chunks.into_iter() {
                    match chunk {
                        Some(bytes) => data.extend_from_slice(&bytes),
                        None => {
                            missing = true;
                            break;
                        }
                    }
                }
                if missing {
                    let _ = notif_tx
                        .send(TransferEvent::Error(format!(
                            "file {} completed with missing chunks",
                            record.file_id
                        )))
                        .await;
                } else {
                    let _ = notif_tx
                        .send(TransferEvent::FileReceived {
                            file_id: record.file_id,
                            name: record.name,
                            mime_type: record.mime_type,
                            data,
                        })
                        .await;
                }
            }
        }
    }
}

/// Whether the sender may write another chunk given the channel's current
/// buffered-byte count. The high watermark (`BUFFER_FULL`) is inclusive: a
/// buffer sitting exactly at the limit is still sendable, it is only
/// exceeding it that pauses the sender until `on_buffered_amount_low` fires.
fn watermark_allows_send(buffered_amount: usize) -> bool {
    buffered_amount <= BUFFER_FULL
}

async fn advance_send(
    state: &mut EngineState,
    dc: &Arc<RTCDataChannel>,
    notif_tx: &mpsc::Sender<TransferEvent>,
) -> SendProgress {
    if !state.ready {
        return SendProgress::QueueEmpty;
    }

    if let Some(in_flight) = state.in_flight.as_mut() {
        if in_flight.next_chunk >= in_flight.total_chunks {
            if let Err(e) = dc.send(&Frame::FileComplete.encode()).await {
                warn!(error = %e, "failed to send FILE_COMPLETE");
            }
            let file_id = in_flight.file_id.clone();
            state.in_flight = None;
            let _ = notif_tx.send(TransferEvent::FileSent { file_id }).await;
            tokio::time::sleep(Duration::from_millis(FILE_COMPLETE_DRAIN_MS)).await;
            return SendProgress::Advanced;
        }

        let buffered = dc.buffered_amount().await;
        if !watermark_allows_send(buffered) {
            return SendProgress::WaitingForCapacity;
        }

        let mut buf = vec![0u8; CHUNK_SIZE];
        let n = match in_flight.handle.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                let err = TransferError::from(e);
                let _ = notif_tx.send(TransferEvent::Error(err.to_string())).await;
                state.in_flight = None;
                state.queue.clear();
                state.batch_active = false;
                return SendProgress::Advanced;
            }
        };

        let iv = match state.ivs.next_iv() {
            Ok(iv) => iv,
            Err(e) => {
                let err = TransferError::Crypto(e);
                let _ = notif_tx.send(TransferEvent::Error(err.to_string())).await;
                state.in_flight = None;
                state.queue.clear();
                state.batch_active = false;
                return SendProgress::Advanced;
            }
        };
        let key = state.key.expect("send readiness implies a key is set");
        let ciphertext = match encrypt_chunk(&key, &iv, &buf[..n]) {
            Ok(c) => c,
            Err(e) => {
                let err = TransferError::Crypto(e);
                let _ = notif_tx.send(TransferEvent::Error(err.to_string())).await;
                state.in_flight = None;
                state.queue.clear();
                state.batch_active = false;
                return SendProgress::Advanced;
            }
        };

        let frame = Frame::FileChunk {
            chunk_index: in_flight.next_chunk,
            file_id: in_flight.file_id.clone(),
            iv: iv.to_vec(),
            ciphertext: ciphertext.into(),
        };
        if let Err(e) = dc.send(&frame.encode()).await {
            let err = TransferError::DataChannel(e.to_string());
            let _ = notif_tx.send(TransferEvent::Error(err.to_string())).await;
            state.in_flight = None;
            return SendProgress::Advanced;
        }

        in_flight.next_chunk += 1;
        in_flight.bytes_sent += n as u64;
        if in_flight.last_progress.elapsed().as_millis() as u64 >= PROGRESS_SAMPLE_INTERVAL_MS {
            let _ = notif_tx
                .send(TransferEvent::SendProgress {
                    file_id: in_flight.file_id.clone(),
                    bytes_sent: in_flight.bytes_sent,
                    total_size: in_flight.total_size,
                })
                .await;
            in_flight.last_progress = Instant::now();
        }

        return SendProgress::Advanced;
    }

    if state.pending.is_some() {
        return SendProgress::WaitingForAccept;
    }

    match state.queue.pop_front() {
        Some(file) => {
            let handle = match tokio::fs::File::open(&file.path).await {
                Ok(h) => h,
                Err(e) => {
                    let err = TransferError::from(e);
                    let _ = notif_tx.send(TransferEvent::Error(err.to_string())).await;
                    return SendProgress::Advanced;
                }
            };

            let info = FileInfo {
                id: file.id.clone(),
                name: file.name.clone(),
                size: file.size,
                mime_type: file.mime_type.clone(),
                total_chunks: file.total_chunks,
                path: None,
            };
            if let Err(e) = dc.send(&Frame::FileInfo(info).encode()).await {
                let err = TransferError::DataChannel(e.to_string());
                let _ = notif_tx.send(TransferEvent::Error(err.to_string())).await;
                return SendProgress::Advanced;
            }

            state.pending = Some(InFlightSend {
                file_id: file.id,
                total_chunks: file.total_chunks,
                total_size: file.size,
                next_chunk: 0,
                bytes_sent: 0,
                handle,
                last_progress: Instant::now(),
            });
            SendProgress::Advanced
        }
        None => {
            if state.batch_active {
                state.batch_active = false;
                let _ = notif_tx.send(TransferEvent::TransferComplete).await;
            }
            SendProgress::QueueEmpty
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Opens a throwaway file with the given contents for `InFlightSend`'s
    /// handle. Unlinked immediately; the open file descriptor keeps reading.
    fn temp_file_with(contents: &[u8]) -> tokio::fs::File {
        let path = std::env::temp_dir().join(format!("relaycode-engine-test-{}", Uuid::new_v4()));
        std::fs::write(&path, contents).expect("write temp file");
        let file = std::fs::File::open(&path).expect("reopen temp file");
        let _ = std::fs::remove_file(&path);
        tokio::fs::File::from_std(file)
    }

    fn fresh_state(role: SenderRole) -> EngineState {
        EngineState {
            role,
            key: Some(generate_session_key()),
            ready: true,
            ivs: IvSequence::new(role),
            queue: VecDeque::new(),
            pending: None,
            in_flight: None,
            batch_active: true,
            incoming_offer: None,
            active_receive: None,
            recv_fatal: false,
        }
    }

    fn sample_info(id: &str, total_chunks: u32) -> FileInfo {
        FileInfo {
            id: id.to_string(),
            name: "a.bin".into(),
            size: total_chunks as u64 * CHUNK_SIZE as u64,
            mime_type: "application/octet-stream".into(),
            total_chunks,
            path: None,
        }
    }

    #[test]
    fn watermark_allows_send_up_to_and_including_buffer_full() {
        assert!(watermark_allows_send(0));
        assert!(watermark_allows_send(BUFFER_FULL));
        assert!(!watermark_allows_send(BUFFER_FULL + 1));
    }

    #[test]
    fn total_chunks_rounds_up_and_is_zero_for_empty_file() {
        assert_eq!(compute_total_chunks(0), 0);
        assert_eq!(compute_total_chunks(1), 1);
        assert_eq!(compute_total_chunks(CHUNK_SIZE as u64), 1);
        assert_eq!(compute_total_chunks(CHUNK_SIZE as u64 + 1), 2);
    }

    #[tokio::test]
    async fn file_accept_moves_pending_send_into_in_flight() {
        let mut state = fresh_state(SenderRole::Initiator);
        state.pending = Some(InFlightSend {
            file_id: "f1".into(),
            total_chunks: 1,
            total_size: 5,
            next_chunk: 0,
            bytes_sent: 0,
            handle: temp_file_with(b"hello"),
            last_progress: Instant::now(),
        });

        let (notif_tx, mut notif_rx) = mpsc::channel(8);
        handle_message(&mut state, Frame::FileAccept.encode(), &notif_tx).await;

        assert!(state.pending.is_none());
        let in_flight = state.in_flight.expect("accepted send should be in flight");
        assert_eq!(in_flight.file_id, "f1");
        assert!(notif_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn file_reject_clears_the_queue_and_reports_rejection() {
        let mut state = fresh_state(SenderRole::Initiator);
        state.pending = Some(InFlightSend {
            file_id: "f1".into(),
            total_chunks: 1,
            total_size: 5,
            next_chunk: 0,
            bytes_sent: 0,
            handle: temp_file_with(b"hello"),
            last_progress: Instant::now(),
        });
        state.queue.push_back(QueuedFile {
            id: "f2".into(),
            path: PathBuf::new(),
            name: "b.bin".into(),
            size: 1,
            mime_type: "application/octet-stream".into(),
            total_chunks: 1,
        });

        let (notif_tx, mut notif_rx) = mpsc::channel(8);
        handle_message(&mut state, Frame::FileReject.encode(), &notif_tx).await;

        assert!(state.pending.is_none());
        assert!(state.queue.is_empty());
        assert!(!state.batch_active);

        match notif_rx.try_recv().expect("SendRejected expected") {
            TransferEvent::SendRejected { file_id } => assert_eq!(file_id, "f1"),
            other => panic!("expected SendRejected, got {other:?}"),
        }
        assert!(matches!(
            notif_rx.try_recv().expect("QueueCancelled expected"),
            TransferEvent::QueueCancelled
        ));
    }

    #[tokio::test]
    async fn file_info_offer_is_auto_rejected_while_one_is_already_pending() {
        let mut state = fresh_state(SenderRole::Joiner);
        state.incoming_offer = Some(sample_info("existing", 1));

        let (notif_tx, mut notif_rx) = mpsc::channel(8);
        handle_message(
            &mut state,
            Frame::FileInfo(sample_info("incoming", 1)).encode(),
            &notif_tx,
        )
        .await;

        assert_eq!(state.incoming_offer.unwrap().id, "existing");
        assert!(notif_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn file_info_is_ignored_once_the_session_is_recv_fatal() {
        let mut state = fresh_state(SenderRole::Joiner);
        state.recv_fatal = true;

        let (notif_tx, mut notif_rx) = mpsc::channel(8);
        handle_message(
            &mut state,
            Frame::FileInfo(sample_info("incoming", 1)).encode(),
            &notif_tx,
        )
        .await;

        assert!(state.incoming_offer.is_none());
        assert!(notif_rx.try_recv().is_err());
    }
}
