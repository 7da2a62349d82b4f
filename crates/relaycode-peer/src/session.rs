//! Wires the pure [`state::PeerSession`] state machine to a real
//! `webrtc::peer_connection::RTCPeerConnection`, running the whole thing as a
//! dedicated tokio task behind a command/notification channel pair.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use relaycode_shared::constants::{BUFFER_LOW, DATA_CHANNEL_LABEL};

use crate::error::PeerSessionError;
use crate::state::{Action, PeerSession as SessionState, PendingIceCandidate, Role, SessionState as LifecycleState};

/// Commands driven into the peer session from the application (the CLI
/// wiring C1's client half with this controller).
#[derive(Debug)]
pub enum PeerCommand {
    /// `peer-joined` observed on the signaling transport.
    PeerJoined,
    /// Remote SDP offer relayed via signaling.
    RemoteOffer(String),
    /// Remote SDP answer relayed via signaling.
    RemoteAnswer(String),
    /// Remote ICE candidate relayed via signaling.
    RemoteIceCandidate {
        candidate: String,
        sdp_mid: Option<String>,
        sdp_m_line_index: Option<u32>,
    },
    /// `peer-left` observed on the signaling transport.
    PeerLeft,
    /// Explicit cleanup / cancellation.
    Cleanup,
    Shutdown,
}

/// Notifications surfaced to the application.
#[derive(Debug)]
pub enum PeerNotification {
    /// A local SDP offer was created; emit it via signaling.
    LocalOffer(String),
    /// A local SDP answer was created; emit it via signaling.
    LocalAnswer(String),
    /// A local ICE candidate was gathered; emit it via signaling.
    LocalIceCandidate {
        candidate: String,
        sdp_mid: Option<String>,
        sdp_m_line_index: Option<u32>,
    },
    /// The data channel opened. C3 should take ownership of it.
    DataChannelOpen(Arc<RTCDataChannel>),
    /// The lifecycle state changed.
    StateChanged(LifecycleState),
    Error(String),
}

enum InternalEvent {
    LocalIceCandidate(RTCIceCandidate),
    PeerConnectionStateChanged(RTCPeerConnectionState),
    DataChannelCreated(Arc<RTCDataChannel>),
    DataChannelOpened(Arc<RTCDataChannel>),
}

/// Spawns the peer session actor. Returns the command sender and
/// notification receiver; the task runs until `PeerCommand::Shutdown` or
/// both channel ends are dropped.
pub fn spawn_peer_session(
    role: Role,
) -> (mpsc::Sender<PeerCommand>, mpsc::Receiver<PeerNotification>) {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<PeerCommand>(32);
    let (notif_tx, notif_rx) = mpsc::channel::<PeerNotification>(32);

    tokio::spawn(async move {
        let mut fsm = SessionState::new(role);
        let mut pc: Option<Arc<RTCPeerConnection>> = None;
        let (internal_tx, mut internal_rx) = mpsc::unbounded_channel::<InternalEvent>();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(PeerCommand::PeerJoined) => {
                            match fsm.on_peer_joined() {
                                Action::BeginAsInitiator => {
                                    match begin_as_initiator(internal_tx.clone()).await {
                                        Ok((new_pc, offer_sdp)) => {
                                            pc = Some(new_pc);
                                            let _ = notif_tx.send(PeerNotification::LocalOffer(offer_sdp)).await;
                                        }
                                        Err(e) => {
                                            error!(error = %e, "failed to begin handshake as initiator");
                                            let _ = notif_tx.send(PeerNotification::Error(e.to_string())).await;
                                        }
                                    }
                                }
                                _ => {}
                            }
                            notify_state(&notif_tx, &fsm).await;
                        }

                        Some(PeerCommand::RemoteOffer(sdp)) => {
                            if pc.is_some() {
                                let err = PeerSessionError::AlreadyHandshaking;
                                warn!(error = %err, "dropping remote offer, a handshake is already in progress");
                                let _ = notif_tx.send(PeerNotification::Error(err.to_string())).await;
                                continue;
                            }
                            let offer_desc = match RTCSessionDescription::offer(sdp) {
                                Ok(d) => d,
                                Err(e) => {
                                    let err = PeerSessionError::SdpApply(e.to_string());
                                    error!(error = %err, "failed to parse remote offer");
                                    let _ = notif_tx.send(PeerNotification::Error(err.to_string())).await;
                                    continue;
                                }
                            };
                            match create_peer_connection(internal_tx.clone()).await {
                                Ok(new_pc) => {
                                    if let Err(e) = apply_remote_description(&new_pc, offer_desc).await {
                                        error!(error = %e, "failed to apply remote offer");
                                        let _ = notif_tx.send(PeerNotification::Error(e.to_string())).await;
                                        continue;
                                    }
                                    pc = Some(new_pc.clone());
                                    let action = fsm.on_offer_received();
                                    if let Action::CreateAnswer { drained_ice } = action {
                                        drain_ice(&new_pc, drained_ice).await;
                                        match create_and_send_answer(&new_pc).await {
                                            Ok(answer_sdp) => {
                                                let _ = notif_tx.send(PeerNotification::LocalAnswer(answer_sdp)).await;
                                            }
                                            Err(e) => {
                                                error!(error = %e, "failed to create answer");
                                                let _ = notif_tx.send(PeerNotification::Error(e.to_string())).await;
                                            }
                                        }
                                    }
                                }
                                Err(e) => {
                                    error!(error = %e, "failed to create peer connection for offer");
                                    let _ = notif_tx.send(PeerNotification::Error(e.to_string())).await;
                                }
                            }
                            notify_state(&notif_tx, &fsm).await;
                        }

                        Some(PeerCommand::RemoteAnswer(sdp)) => {
                            if let Some(ref active_pc) = pc {
                                let desc = match RTCSessionDescription::answer(sdp) {
                                    Ok(d) => d,
                                    Err(e) => {
                                        let _ = notif_tx.send(PeerNotification::Error(e.to_string())).await;
                                        continue;
                                    }
                                };
                                if let Err(e) = apply_remote_description(active_pc, desc).await {
                                    error!(error = %e, "failed to apply remote answer");
                                    let _ = notif_tx.send(PeerNotification::Error(e.to_string())).await;
                                    continue;
                                }
                                if let Action::ApplyAnswer { drained_ice } = fsm.on_answer_received() {
                                    drain_ice(active_pc, drained_ice).await;
                                }
                            }
                            notify_state(&notif_tx, &fsm).await;
                        }

                        Some(PeerCommand::RemoteIceCandidate { candidate, sdp_mid, sdp_m_line_index }) => {
                            let pending = PendingIceCandidate { candidate, sdp_mid, sdp_m_line_index };
                            match fsm.on_remote_ice_candidate(pending.clone()) {
                                Action::ApplyIceCandidate(c) => {
                                    if let Some(ref active_pc) = pc {
                                        apply_ice_candidate(active_pc, c).await;
                                    }
                                }
                                Action::BufferIceCandidate => {
                                    debug!("buffered ICE candidate before remote description was set");
                                }
                                _ => {}
                            }
                        }

                        Some(PeerCommand::PeerLeft) => {
                            let _ = fsm.on_peer_left();
                            if let Some(active_pc) = pc.take() {
                                let _ = active_pc.close().await;
                            }
                            notify_state(&notif_tx, &fsm).await;
                        }

                        Some(PeerCommand::Cleanup) => {
                            fsm.cleanup();
                            if let Some(active_pc) = pc.take() {
                                let _ = active_pc.close().await;
                            }
                            notify_state(&notif_tx, &fsm).await;
                        }

                        Some(PeerCommand::Shutdown) | None => {
                            if let Some(active_pc) = pc.take() {
                                let _ = active_pc.close().await;
                            }
                            break;
                        }
                    }
                }

                event = internal_rx.recv() => {
                    match event {
                        Some(InternalEvent::LocalIceCandidate(candidate)) => {
                            if let Ok(init) = candidate.to_json() {
                                let _ = notif_tx.send(PeerNotification::LocalIceCandidate {
                                    candidate: init.candidate,
                                    sdp_mid: init.sdp_mid,
                                    sdp_m_line_index: init.sdp_mline_index,
                                }).await;
                            }
                        }
                        Some(InternalEvent::PeerConnectionStateChanged(new_state)) => {
                            match new_state {
                                RTCPeerConnectionState::Failed => {
                                    let _ = fsm.on_transport_failed();
                                    notify_state(&notif_tx, &fsm).await;
                                }
                                RTCPeerConnectionState::Disconnected => {
                                    fsm.on_transport_disconnected();
                                }
                                _ => {}
                            }
                        }
                        Some(InternalEvent::DataChannelCreated(dc)) => {
                            register_data_channel_callbacks(dc, internal_tx.clone());
                        }
                        Some(InternalEvent::DataChannelOpened(dc)) => {
                            fsm.on_data_channel_open();
                            let _ = notif_tx.send(PeerNotification::DataChannelOpen(dc)).await;
                            notify_state(&notif_tx, &fsm).await;
                        }
                        None => {}
                    }
                }
            }
        }

        info!("peer session actor terminated");
    });

    (cmd_tx, notif_rx)
}

async fn notify_state(notif_tx: &mpsc::Sender<PeerNotification>, fsm: &SessionState) {
    let _ = notif_tx
        .send(PeerNotification::StateChanged(fsm.state().clone()))
        .await;
}

async fn create_peer_connection(
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
) -> Result<Arc<RTCPeerConnection>, PeerSessionError> {
    let api = APIBuilder::new().build();
    let config = RTCConfiguration {
        ice_servers: vec![webrtc::ice_transport::ice_server::RTCIceServer {
            urls: vec!["stun:stun.l.google.com:19302".to_owned()],
            ..Default::default()
        }],
        ..Default::default()
    };

    let pc = Arc::new(api.new_peer_connection(config).await?);

    let tx = internal_tx.clone();
    pc.on_ice_candidate(Box::new(move |candidate| {
        let tx = tx.clone();
        Box::pin(async move {
            if let Some(c) = candidate {
                let _ = tx.send(InternalEvent::LocalIceCandidate(c));
            }
        })
    }));

    let tx = internal_tx.clone();
    pc.on_peer_connection_state_change(Box::new(move |state| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(InternalEvent::PeerConnectionStateChanged(state));
        })
    }));

    let tx = internal_tx.clone();
    pc.on_data_channel(Box::new(move |dc| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(InternalEvent::DataChannelCreated(dc));
        })
    }));

    Ok(pc)
}

fn register_data_channel_callbacks(
    dc: Arc<RTCDataChannel>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
) {
    dc.set_buffered_amount_low_threshold(BUFFER_LOW);

    let tx = internal_tx.clone();
    let dc_for_open = dc.clone();
    dc.on_open(Box::new(move || {
        let tx = tx.clone();
        let dc = dc_for_open.clone();
        Box::pin(async move {
            let _ = tx.send(InternalEvent::DataChannelOpened(dc));
        })
    }));
}

async fn begin_as_initiator(
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
) -> Result<(Arc<RTCPeerConnection>, String), PeerSessionError> {
    let pc = create_peer_connection(internal_tx.clone()).await?;

    let dc = pc
        .create_data_channel(
            DATA_CHANNEL_LABEL,
            Some(RTCDataChannelInit {
                ordered: Some(true),
                ..Default::default()
            }),
        )
        .await?;
    register_data_channel_callbacks(dc, internal_tx);

    let offer = pc.create_offer(None).await?;
    pc.set_local_description(offer.clone()).await?;

    Ok((pc, offer.sdp))
}

async fn apply_remote_description(
    pc: &Arc<RTCPeerConnection>,
    desc: RTCSessionDescription,
) -> Result<(), PeerSessionError> {
    pc.set_remote_description(desc).await?;
    Ok(())
}

async fn create_and_send_answer(pc: &Arc<RTCPeerConnection>) -> Result<String, PeerSessionError> {
    let answer = pc.create_answer(None).await?;
    pc.set_local_description(answer.clone()).await?;
    Ok(answer.sdp)
}

async fn drain_ice(pc: &Arc<RTCPeerConnection>, candidates: Vec<PendingIceCandidate>) {
    for candidate in candidates {
        apply_ice_candidate(pc, candidate).await;
    }
}

async fn apply_ice_candidate(pc: &Arc<RTCPeerConnection>, candidate: PendingIceCandidate) {
    let init = RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_m_line_index,
        ..Default::default()
    };
    // Apply failures are logged and discarded -- they are not fatal.
    if let Err(e) = pc.add_ice_candidate(init).await {
        warn!(error = %e, "failed to apply ICE candidate, discarding");
    }
}
