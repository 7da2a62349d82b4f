//! Room registry mapping 6-character codes to at most two client sessions.
//!
//! Uses a [`DashMap`] for lock-free concurrent access across per-connection
//! tasks, the same structural choice used elsewhere in this codebase for
//! registries keyed by a short-lived identifier.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use relaycode_shared::signaling::{ErrorCode, ServerMessage};
use relaycode_shared::types::{ClientId, RoomCode};

pub type ClientSender = mpsc::UnboundedSender<ServerMessage>;

struct Room {
    creator: ClientId,
    members: Vec<ClientId>,
}

struct ClientEntry {
    sender: ClientSender,
    room: Option<RoomCode>,
}

/// Owns the `clients` and `rooms` mappings -- the only process-wide state on
/// the signaling server.
pub struct Registry {
    rooms: DashMap<RoomCode, Room>,
    clients: DashMap<ClientId, ClientEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            clients: DashMap::new(),
        }
    }

    /// Registers a freshly accepted connection's outbound sender.
    pub fn register_client(&self, id: ClientId, sender: ClientSender) {
        self.clients.insert(
            id,
            ClientEntry {
                sender,
                room: None,
            },
        );
    }

    /// Drops a client's record, implicitly leaving its room if any.
    pub fn disconnect(&self, id: ClientId) {
        self.leave_room(id);
        self.clients.remove(&id);
    }

    pub fn create_room(&self, id: ClientId) -> Result<RoomCode, ErrorCode> {
        let Some(mut entry) = self.clients.get_mut(&id) else {
            return Err(ErrorCode::NotInRoom);
        };
        if entry.room.is_some() {
            return Err(ErrorCode::AlreadyInRoom);
        }

        let code = loop {
            let candidate = RoomCode::generate();
            match self.rooms.entry(candidate.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(v) => {
                    v.insert(Room {
                        creator: id,
                        members: vec![id],
                    });
                    break candidate;
                }
            }
        };

        entry.room = Some(code.clone());
        info!(room = %code, client = %id, "room created");
        Ok(code)
    }

    /// Joins `id` into the room named by `code`. On success, sends
    /// `peer-joined` to the existing occupant and returns the normalized
    /// room code. The caller is responsible for sending `room-joined` on
    /// the joiner's own transport so that it is observed before any other
    /// message addressed to the joiner.
    pub fn join_room(&self, id: ClientId, code: &str) -> Result<RoomCode, ErrorCode> {
        let normalized = RoomCode::normalize(code);

        {
            let entry = self.clients.get(&id).ok_or(ErrorCode::NotInRoom)?;
            if entry.room.is_some() {
                return Err(ErrorCode::AlreadyInRoom);
            }
        }

        let mut room = self
            .rooms
            .get_mut(&normalized)
            .ok_or(ErrorCode::RoomNotFound)?;

        if room.members.len() >= 2 {
            return Err(ErrorCode::RoomFull);
        }

        room.members.push(id);

        for &other in room.members.iter().filter(|&&m| m != id) {
            if let Some(peer) = self.clients.get(&other) {
                let _ = peer.sender.send(ServerMessage::PeerJoined);
            }
        }

        drop(room);
        if let Some(mut entry) = self.clients.get_mut(&id) {
            entry.room = Some(normalized.clone());
        }

        info!(room = %normalized, client = %id, "room joined");
        Ok(normalized)
    }

    /// Idempotent: removes `id` from its room if it is in one, notifies the
    /// remaining occupant, and deletes the room if it becomes empty.
    pub fn leave_room(&self, id: ClientId) {
        let code = match self.clients.get(&id) {
            Some(entry) => match entry.room.clone() {
                Some(code) => code,
                None => return,
            },
            None => return,
        };

        let should_remove_room = {
            let Some(mut room) = self.rooms.get_mut(&code) else {
                return;
            };
            room.members.retain(|&m| m != id);

            for &other in room.members.iter() {
                if let Some(peer) = self.clients.get(&other) {
                    let _ = peer.sender.send(ServerMessage::PeerLeft);
                }
            }

            room.members.is_empty()
        };

        if should_remove_room {
            self.rooms.remove(&code);
            debug!(room = %code, "room cleaned up (empty)");
        }

        if let Some(mut entry) = self.clients.get_mut(&id) {
            entry.room = None;
        }
    }

    /// Relays a verbatim signaling message to the unique other occupant of
    /// `id`'s room.
    pub fn relay_to_peer(&self, id: ClientId, message: ServerMessage) -> Result<(), ErrorCode> {
        let code = self
            .clients
            .get(&id)
            .and_then(|entry| entry.room.clone())
            .ok_or(ErrorCode::NotInRoom)?;

        let room = self.rooms.get(&code).ok_or(ErrorCode::NotInRoom)?;
        let peer_id = room
            .members
            .iter()
            .copied()
            .find(|&m| m != id)
            .ok_or(ErrorCode::NoPeer)?;
        drop(room);

        let peer = self.clients.get(&peer_id).ok_or(ErrorCode::NoPeer)?;
        let _ = peer.sender.send(message);
        Ok(())
    }

    /// True iff `id`'s room existed with the given creator as initiator.
    pub fn is_initiator(&self, id: ClientId) -> bool {
        self.clients
            .get(&id)
            .and_then(|entry| entry.room.clone())
            .and_then(|code| self.rooms.get(&code).map(|r| r.creator == id))
            .unwrap_or(false)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_client(reg: &Registry) -> (ClientId, mpsc::UnboundedReceiver<ServerMessage>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        reg.register_client(id, tx);
        (id, rx)
    }

    #[test]
    fn create_room_succeeds_for_fresh_client() {
        let reg = Registry::new();
        let (alice, _rx) = make_client(&reg);

        let code = reg.create_room(alice).unwrap();
        assert_eq!(code.as_str().len(), 6);
        assert_eq!(reg.room_count(), 1);
    }

    #[test]
    fn create_room_fails_if_already_in_room() {
        let reg = Registry::new();
        let (alice, _rx) = make_client(&reg);

        reg.create_room(alice).unwrap();
        let err = reg.create_room(alice).unwrap_err();
        assert_eq!(err, ErrorCode::AlreadyInRoom);
    }

    #[test]
    fn two_simultaneous_create_room_requests_get_distinct_codes() {
        let reg = Registry::new();
        let (alice, _ra) = make_client(&reg);
        let (bob, _rb) = make_client(&reg);

        let code_a = reg.create_room(alice).unwrap();
        let code_b = reg.create_room(bob).unwrap();
        assert_ne!(code_a, code_b);
    }

    #[test]
    fn join_room_normalizes_case_and_notifies_creator() {
        let reg = Registry::new();
        let (alice, mut alice_rx) = make_client(&reg);
        let (bob, _bob_rx) = make_client(&reg);

        let code = reg.create_room(alice).unwrap();
        let joined = reg
            .join_room(bob, &code.as_str().to_ascii_lowercase())
            .unwrap();
        assert_eq!(joined, code);

        let msg = alice_rx.try_recv().unwrap();
        assert!(matches!(msg, ServerMessage::PeerJoined));
        assert!(!reg.is_initiator(bob));
        assert!(reg.is_initiator(alice));
    }

    #[test]
    fn join_room_fails_for_nonexistent_room() {
        let reg = Registry::new();
        let (bob, _rx) = make_client(&reg);

        let err = reg.join_room(bob, "ZZZZZZ").unwrap_err();
        assert_eq!(err, ErrorCode::RoomNotFound);
    }

    #[test]
    fn join_room_fails_when_full() {
        let reg = Registry::new();
        let (alice, _ra) = make_client(&reg);
        let (bob, _rb) = make_client(&reg);
        let (charlie, _rc) = make_client(&reg);

        let code = reg.create_room(alice).unwrap();
        reg.join_room(bob, code.as_str()).unwrap();

        let err = reg.join_room(charlie, code.as_str()).unwrap_err();
        assert_eq!(err, ErrorCode::RoomFull);
    }

    #[test]
    fn join_room_fails_if_already_in_a_room() {
        let reg = Registry::new();
        let (alice, _ra) = make_client(&reg);
        let (bob, _rb) = make_client(&reg);

        reg.create_room(alice).unwrap();
        let other_code = reg.create_room(bob).unwrap();

        let err = reg.join_room(alice, other_code.as_str()).unwrap_err();
        assert_eq!(err, ErrorCode::AlreadyInRoom);
    }

    #[test]
    fn leave_room_notifies_remaining_occupant_and_is_idempotent() {
        let reg = Registry::new();
        let (alice, mut alice_rx) = make_client(&reg);
        let (bob, _rb) = make_client(&reg);

        let code = reg.create_room(alice).unwrap();
        reg.join_room(bob, code.as_str()).unwrap();
        let _ = alice_rx.try_recv(); // drain PeerJoined

        reg.leave_room(bob);
        let msg = alice_rx.try_recv().unwrap();
        assert!(matches!(msg, ServerMessage::PeerLeft));

        // Idempotent: leaving again does nothing and does not panic.
        reg.leave_room(bob);
        assert_eq!(reg.room_count(), 1);
    }

    #[test]
    fn leave_room_deletes_empty_room() {
        let reg = Registry::new();
        let (alice, _rx) = make_client(&reg);

        reg.create_room(alice).unwrap();
        assert_eq!(reg.room_count(), 1);

        reg.leave_room(alice);
        assert_eq!(reg.room_count(), 0);
    }

    #[test]
    fn disconnect_triggers_implicit_leave() {
        let reg = Registry::new();
        let (alice, mut alice_rx) = make_client(&reg);
        let (bob, _rb) = make_client(&reg);

        let code = reg.create_room(alice).unwrap();
        reg.join_room(bob, code.as_str()).unwrap();
        let _ = alice_rx.try_recv();

        reg.disconnect(bob);
        let msg = alice_rx.try_recv().unwrap();
        assert!(matches!(msg, ServerMessage::PeerLeft));
        assert_eq!(reg.room_count(), 1); // Alice's room survives
    }

    #[test]
    fn relay_requires_two_occupants() {
        let reg = Registry::new();
        let (alice, _rx) = make_client(&reg);

        reg.create_room(alice).unwrap();
        let err = reg
            .relay_to_peer(alice, ServerMessage::Offer { sdp: "v=0".into() })
            .unwrap_err();
        assert_eq!(err, ErrorCode::NoPeer);
    }

    #[test]
    fn relay_delivers_verbatim_to_the_other_occupant() {
        let reg = Registry::new();
        let (alice, _ra) = make_client(&reg);
        let (bob, mut bob_rx) = make_client(&reg);

        let code = reg.create_room(alice).unwrap();
        reg.join_room(bob, code.as_str()).unwrap();

        reg.relay_to_peer(
            alice,
            ServerMessage::Offer {
                sdp: "v=0 test-sdp".into(),
            },
        )
        .unwrap();

        let msg = bob_rx.try_recv().unwrap();
        match msg {
            ServerMessage::Offer { sdp } => assert_eq!(sdp, "v=0 test-sdp"),
            other => panic!("expected Offer, got {other:?}"),
        }
    }

    #[test]
    fn no_room_ever_observed_with_zero_members() {
        let reg = Registry::new();
        let (alice, _ra) = make_client(&reg);
        let (bob, _rb) = make_client(&reg);

        let code = reg.create_room(alice).unwrap();
        reg.join_room(bob, code.as_str()).unwrap();

        reg.leave_room(alice);
        assert_eq!(reg.room_count(), 1);
        reg.leave_room(bob);
        assert_eq!(reg.room_count(), 0);
    }
}
