//! Wires C1 (signaling), C2 (peer session), and C3 (transfer engine)
//! together behind plain async functions -- no event-name plumbing, no
//! callback soup, just channels read in a single select loop per session.

use std::path::PathBuf;

use anyhow::{bail, Result};
use tokio::sync::mpsc;

use relaycode_peer::{spawn_peer_session, PeerCommand, PeerNotification, Role};
use relaycode_shared::crypto::SenderRole;
use relaycode_shared::signaling::{ClientMessage, ServerMessage};
use relaycode_transfer::{spawn_transfer_engine, PendingUpload, TransferCommand, TransferEvent};

use crate::files::build_uploads;
use crate::signaling::SignalingClient;

/// Awaits the next item from an optional receiver, pending forever if the
/// receiver hasn't been created yet.
async fn recv_opt<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(r) => r.recv().await,
        None => std::future::pending().await,
    }
}

pub async fn run_send(server: &str, paths: Vec<PathBuf>) -> Result<()> {
    let mut uploads: Option<Vec<PendingUpload>> = Some(build_uploads(&paths).await?);
    let mut sig = SignalingClient::connect(server).await?;
    sig.send(ClientMessage::CreateRoom).await?;

    let mut peer_cmd_tx: Option<mpsc::Sender<PeerCommand>> = None;
    let mut peer_notif_rx: Option<mpsc::Receiver<PeerNotification>> = None;
    let mut transfer_cmd_tx: Option<mpsc::Sender<TransferCommand>> = None;
    let mut transfer_notif_rx: Option<mpsc::Receiver<TransferEvent>> = None;

    loop {
        tokio::select! {
            msg = sig.recv() => {
                match msg? {
                    ServerMessage::RoomCreated { room_id } => {
                        println!("Room code: {room_id}");
                        println!("Share link: {server}?room={room_id}");
                        println!("Waiting for a peer to join...");
                    }
                    ServerMessage::PeerJoined => {
                        tracing::info!("peer joined, beginning handshake as initiator");
                        let (tx, rx) = spawn_peer_session(Role::Initiator);
                        tx.send(PeerCommand::PeerJoined).await?;
                        peer_cmd_tx = Some(tx);
                        peer_notif_rx = Some(rx);
                    }
                    ServerMessage::Answer { sdp } => {
                        if let Some(tx) = &peer_cmd_tx {
                            tx.send(PeerCommand::RemoteAnswer(sdp)).await?;
                        }
                    }
                    ServerMessage::IceCandidate { candidate, sdp_mid, sdp_m_line_index } => {
                        if let Some(tx) = &peer_cmd_tx {
                            tx.send(PeerCommand::RemoteIceCandidate { candidate, sdp_mid, sdp_m_line_index }).await?;
                        }
                    }
                    ServerMessage::PeerLeft => {
                        println!("Peer left.");
                        if let Some(tx) = &peer_cmd_tx {
                            let _ = tx.send(PeerCommand::PeerLeft).await;
                        }
                        break;
                    }
                    ServerMessage::Error { code, message } => {
                        bail!("signaling error {code:?}: {message}");
                    }
                    _ => {}
                }
            }

            Some(notif) = recv_opt(&mut peer_notif_rx) => {
                match notif {
                    PeerNotification::LocalOffer(sdp) => {
                        sig.send(ClientMessage::Offer { sdp }).await?;
                    }
                    PeerNotification::LocalIceCandidate { candidate, sdp_mid, sdp_m_line_index } => {
                        sig.send(ClientMessage::IceCandidate { candidate, sdp_mid, sdp_m_line_index }).await?;
                    }
                    PeerNotification::DataChannelOpen(dc) => {
                        println!("Connected. Sending {} file(s)...", paths.len());
                        let (tx, rx) = spawn_transfer_engine(dc, SenderRole::Initiator);
                        transfer_cmd_tx = Some(tx);
                        transfer_notif_rx = Some(rx);
                    }
                    PeerNotification::StateChanged(state) => {
                        tracing::debug!(?state, "peer session state changed");
                    }
                    PeerNotification::Error(e) => tracing::error!(%e, "peer session error"),
                    _ => {}
                }
            }

            Some(event) = recv_opt(&mut transfer_notif_rx) => {
                match event {
                    TransferEvent::EncryptionReady => {
                        if let (Some(tx), Some(files)) = (&transfer_cmd_tx, uploads.take()) {
                            tx.send(TransferCommand::EnqueueFiles(files)).await?;
                        }
                    }
                    TransferEvent::SendProgress { file_id, bytes_sent, total_size } => {
                        print!("\rsending {file_id}: {bytes_sent}/{total_size} bytes");
                    }
                    TransferEvent::FileSent { file_id } => println!("\nsent {file_id}"),
                    TransferEvent::SendRejected { file_id } => println!("peer rejected {file_id}"),
                    TransferEvent::QueueCancelled => println!("transfer cancelled by peer"),
                    TransferEvent::TransferComplete => {
                        println!("all files sent");
                        break;
                    }
                    TransferEvent::Error(e) => {
                        tracing::error!(%e, "transfer error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(())
}

pub async fn run_receive(server: &str, room_code: &str, out_dir: PathBuf) -> Result<()> {
    tokio::fs::create_dir_all(&out_dir).await?;

    let mut sig = SignalingClient::connect(server).await?;
    sig.send(ClientMessage::JoinRoom {
        room_id: room_code.to_string(),
    })
    .await?;

    let mut peer_cmd_tx: Option<mpsc::Sender<PeerCommand>> = None;
    let mut peer_notif_rx: Option<mpsc::Receiver<PeerNotification>> = None;
    let mut transfer_cmd_tx: Option<mpsc::Sender<TransferCommand>> = None;
    let mut transfer_notif_rx: Option<mpsc::Receiver<TransferEvent>> = None;

    loop {
        tokio::select! {
            msg = sig.recv() => {
                match msg? {
                    ServerMessage::RoomJoined { room_id, .. } => {
                        println!("Joined room {room_id}. Waiting for the other side's offer...");
                        let (tx, rx) = spawn_peer_session(Role::Joiner);
                        peer_cmd_tx = Some(tx);
                        peer_notif_rx = Some(rx);
                    }
                    ServerMessage::Offer { sdp } => {
                        if let Some(tx) = &peer_cmd_tx {
                            tx.send(PeerCommand::RemoteOffer(sdp)).await?;
                        }
                    }
                    ServerMessage::IceCandidate { candidate, sdp_mid, sdp_m_line_index } => {
                        if let Some(tx) = &peer_cmd_tx {
                            tx.send(PeerCommand::RemoteIceCandidate { candidate, sdp_mid, sdp_m_line_index }).await?;
                        }
                    }
                    ServerMessage::PeerLeft => {
                        println!("Peer left.");
                        if let Some(tx) = &peer_cmd_tx {
                            let _ = tx.send(PeerCommand::PeerLeft).await;
                        }
                        break;
                    }
                    ServerMessage::Error { code, message } => {
                        bail!("signaling error {code:?}: {message}");
                    }
                    _ => {}
                }
            }

            Some(notif) = recv_opt(&mut peer_notif_rx) => {
                match notif {
                    PeerNotification::LocalAnswer(sdp) => {
                        sig.send(ClientMessage::Answer { sdp }).await?;
                    }
                    PeerNotification::LocalIceCandidate { candidate, sdp_mid, sdp_m_line_index } => {
                        sig.send(ClientMessage::IceCandidate { candidate, sdp_mid, sdp_m_line_index }).await?;
                    }
                    PeerNotification::DataChannelOpen(dc) => {
                        println!("Connected. Waiting for incoming files...");
                        let (tx, rx) = spawn_transfer_engine(dc, SenderRole::Joiner);
                        transfer_cmd_tx = Some(tx);
                        transfer_notif_rx = Some(rx);
                    }
                    PeerNotification::StateChanged(state) => {
                        tracing::debug!(?state, "peer session state changed");
                    }
                    PeerNotification::Error(e) => tracing::error!(%e, "peer session error"),
                    _ => {}
                }
            }

            Some(event) = recv_opt(&mut transfer_notif_rx) => {
                match event {
                    TransferEvent::IncomingOffer(info) => {
                        println!("Incoming file: {} ({} bytes) - accepting", info.name, info.size);
                        if let Some(tx) = &transfer_cmd_tx {
                            tx.send(TransferCommand::RespondToOffer(true)).await?;
                        }
                    }
                    TransferEvent::ReceiveProgress { file_id, bytes_received, total_size } => {
                        print!("\rreceiving {file_id}: {bytes_received}/{total_size} bytes");
                    }
                    TransferEvent::FileReceived { file_id, name, data, .. } => {
                        let dest = out_dir.join(&name);
                        tokio::fs::write(&dest, &data).await?;
                        println!("\nsaved {file_id} -> {}", dest.display());
                    }
                    TransferEvent::Error(e) => {
                        tracing::error!(%e, "transfer error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(())
}
