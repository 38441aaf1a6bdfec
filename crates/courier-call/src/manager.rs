//! Call rooms and signaling relay.
//!
//! The manager never looks inside an SDP body or ICE candidate; at this
//! layer it is a transparent relay between the peers of a room. Room
//! membership is the only state machine: a socket is `unauth` until a
//! token validates, `authed` until it joins, and `in_room` while its id
//! is present in a room's participant table. Optional call metadata is
//! persisted through the store; a store failure never affects routing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use courier_hub::{SignalingRouter, Socket};
use courier_proto::payload::{
    self, AuthPayload, ControlPayload, DtmfPayload, IcePayload, JoinPayload, SdpPayload,
};
use courier_proto::{Envelope, Kind};
use courier_store::Database;

use crate::token::TokenValidator;

const DEFAULT_ROLE: &str = "participant";
const ROOM_STATUS_ACTIVE: &str = "active";

/// A room member, tied to one live socket.
struct Peer {
    socket: Arc<Socket>,
    user_id: String,
    display_name: String,
    role: String,
    joined_at: DateTime<Utc>,
    muted: bool,
    #[allow(dead_code)]
    on_hold: bool,
    /// Row id of the persisted participant record, for `left_at`.
    participant_row: Option<Uuid>,
}

impl Peer {
    fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            id: self.socket.id().to_string(),
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            role: self.role.clone(),
        }
    }
}

struct Room {
    id: String,
    call_id: Uuid,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
    participants: RwLock<HashMap<String, Peer>>,
}

impl Room {
    fn new(id: String, call_id: Uuid) -> Self {
        Self {
            id,
            call_id,
            created_at: Utc::now(),
            participants: RwLock::new(HashMap::new()),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ParticipantInfo {
    pub id: String,
    pub user_id: String,
    pub display_name: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomState {
    pub room_id: String,
    pub participants: Vec<ParticipantInfo>,
    pub call_id: Uuid,
    pub status: String,
}

struct ManagerState {
    rooms: HashMap<String, Arc<Room>>,
    /// socket id -> room id, for O(1) peer lookup on signaling frames.
    peers: HashMap<String, String>,
}

pub struct CallManager {
    state: RwLock<ManagerState>,
    db: Option<Arc<Mutex<Database>>>,
    validator: Arc<dyn TokenValidator>,
}

impl CallManager {
    pub fn new(validator: Arc<dyn TokenValidator>, db: Option<Arc<Mutex<Database>>>) -> Self {
        Self {
            state: RwLock::new(ManagerState {
                rooms: HashMap::new(),
                peers: HashMap::new(),
            }),
            db,
            validator,
        }
    }

    pub fn room_count(&self) -> usize {
        self.state.read().expect("call lock poisoned").rooms.len()
    }

    /// Snapshot of a room, or `None` once its last participant left.
    pub fn room_state(&self, room_id: &str) -> Option<RoomState> {
        let room = self
            .state
            .read()
            .expect("call lock poisoned")
            .rooms
            .get(room_id)
            .cloned()?;
        Some(self.snapshot(&room))
    }

    // ------------------------------------------------------------------
    // Signaling handlers
    // ------------------------------------------------------------------

    fn handle_auth(&self, socket: &Arc<Socket>, envelope: &Envelope) {
        let auth: AuthPayload = match payload::extract(envelope, "auth") {
            Ok(auth) => auth,
            Err(_) => {
                socket.send_error("auth requires a token");
                return;
            }
        };

        match self.validator.validate(&auth.token) {
            Ok(user_id) => {
                socket.set_property("user_id", json!(user_id));
                socket.send_message(&Envelope::ack(json!({
                    "status": "authenticated",
                    "user_id": user_id,
                })));
            }
            Err(error) => {
                debug!(socket = socket.id(), %error, "token rejected");
                socket.send_error("invalid token");
            }
        }
    }

    fn handle_join(&self, socket: &Arc<Socket>, envelope: &Envelope) {
        let join: JoinPayload = match payload::extract(envelope, "join") {
            Ok(join) => join,
            Err(_) => {
                socket.send_error("join requires room and display_name");
                return;
            }
        };

        let Some(user_id) = socket
            .property("user_id")
            .and_then(|v| v.as_str().map(String::from))
        else {
            socket.send_error("not authenticated");
            return;
        };

        // A socket is a member of at most one room; joining again moves it.
        self.remove_peer(socket.id(), true);

        let room = self.get_or_create_room(&join.room);
        let participant_row = self.persist_participant(room.call_id, &user_id);

        let peer = Peer {
            socket: socket.clone(),
            user_id,
            display_name: join.display_name,
            role: DEFAULT_ROLE.to_string(),
            joined_at: Utc::now(),
            muted: false,
            on_hold: false,
            participant_row,
        };
        let info = peer.info();

        room.participants
            .write()
            .expect("room lock poisoned")
            .insert(socket.id().to_string(), peer);
        self.state
            .write()
            .expect("call lock poisoned")
            .peers
            .insert(socket.id().to_string(), room.id.clone());

        info!(room = %room.id, socket = socket.id(), "peer joined call room");

        let room_state = self.snapshot(&room);
        socket.send_message(&Envelope::new(Kind::Joined).with_data(json!({
            "participant_id": socket.id(),
            "room_state": serde_json::to_value(&room_state).unwrap_or_default(),
        })));

        let announcement = Envelope::new(Kind::PeerJoined).with_data(json!({
            "participant": serde_json::to_value(&info).unwrap_or_default(),
        }));
        self.broadcast_to_room(&room, &announcement, socket.id());
    }

    /// Offer and answer relay: the SDP rides through untouched, with the
    /// sender's socket id attached.
    fn forward_sdp(&self, socket: &Arc<Socket>, envelope: &Envelope, kind: Kind) {
        let sdp: SdpPayload = match payload::extract(envelope, kind.name()) {
            Ok(sdp) => sdp,
            Err(_) => {
                socket.send_error("signaling payload requires sdp");
                return;
            }
        };

        let Some(room) = self.room_of(socket.id()) else {
            debug!(socket = socket.id(), "signaling frame from socket outside any room");
            return;
        };

        let mut data = serde_json::to_value(&sdp).unwrap_or_default();
        attach_from(&mut data, socket.id());
        self.broadcast_to_room(&room, &Envelope::new(kind).with_data(data), socket.id());
    }

    fn forward_ice(&self, socket: &Arc<Socket>, envelope: &Envelope) {
        let ice: IcePayload = match payload::extract(envelope, "ice-candidate") {
            Ok(ice) => ice,
            Err(_) => {
                socket.send_error("ice_candidate requires a candidate");
                return;
            }
        };

        let Some(room) = self.room_of(socket.id()) else {
            return;
        };

        let mut data = serde_json::to_value(&ice).unwrap_or_default();
        attach_from(&mut data, socket.id());
        self.broadcast_to_room(
            &room,
            &Envelope::new(Kind::IceCandidate).with_data(data),
            socket.id(),
        );
    }

    fn handle_mute(&self, socket: &Arc<Socket>, envelope: &Envelope, muted: bool) {
        let control: ControlPayload = match payload::extract(envelope, "mute") {
            Ok(control) => control,
            Err(_) => {
                socket.send_error("mute requires a payload");
                return;
            }
        };

        let Some(room) = self.room_of(socket.id()) else {
            return;
        };

        // Flip the flag and broadcast the peer's new state.
        let muted = {
            let mut participants = room.participants.write().expect("room lock poisoned");
            match participants.get_mut(socket.id()) {
                Some(peer) => {
                    peer.muted = muted;
                    peer.muted
                }
                None => muted,
            }
        };

        let kind = if muted { Kind::Mute } else { Kind::Unmute };
        let mut data = json!({
            "track": control.track_or_default(),
            "muted": muted,
            "from": socket.id(),
        });
        if let Some(call_id) = control.call_id {
            data["call_id"] = json!(call_id);
        }
        self.broadcast_to_room(&room, &Envelope::new(kind).with_data(data), socket.id());
    }

    fn handle_hold(&self, socket: &Arc<Socket>, envelope: &Envelope) {
        let control: ControlPayload = match payload::extract(envelope, "hold") {
            Ok(control) => control,
            Err(_) => {
                socket.send_error("hold requires a payload");
                return;
            }
        };

        let Some(room) = self.room_of(socket.id()) else {
            return;
        };

        if let Some(peer) = room
            .participants
            .write()
            .expect("room lock poisoned")
            .get_mut(socket.id())
        {
            peer.on_hold = true;
        }

        let mut data = json!({
            "track": control.track_or_default(),
            "from": socket.id(),
        });
        if let Some(call_id) = control.call_id {
            data["call_id"] = json!(call_id);
        }
        self.broadcast_to_room(&room, &Envelope::new(Kind::Hold).with_data(data), socket.id());
    }

    fn forward_dtmf(&self, socket: &Arc<Socket>, envelope: &Envelope) {
        let dtmf: DtmfPayload = match payload::extract(envelope, "dtmf") {
            Ok(dtmf) => dtmf,
            Err(_) => {
                socket.send_error("dtmf requires tones");
                return;
            }
        };

        let Some(room) = self.room_of(socket.id()) else {
            return;
        };

        let mut data = serde_json::to_value(&dtmf).unwrap_or_default();
        attach_from(&mut data, socket.id());
        self.broadcast_to_room(&room, &Envelope::new(Kind::Dtmf).with_data(data), socket.id());
    }

    // ------------------------------------------------------------------
    // Rooms
    // ------------------------------------------------------------------

    fn get_or_create_room(&self, room_id: &str) -> Arc<Room> {
        if let Some(room) = self
            .state
            .read()
            .expect("call lock poisoned")
            .rooms
            .get(room_id)
        {
            return room.clone();
        }

        let mut state = self.state.write().expect("call lock poisoned");
        if let Some(room) = state.rooms.get(room_id) {
            return room.clone();
        }

        let call_id = self.create_call_record(room_id);
        let room = Arc::new(Room::new(room_id.to_string(), call_id));
        state.rooms.insert(room_id.to_string(), room.clone());
        info!(room = room_id, call = %call_id, "created call room");
        room
    }

    /// Remove a socket's peer from its room, if any. Marks the persisted
    /// participant as departed, tells the rest of the room when `notify`,
    /// and deletes the room once its table is empty.
    fn remove_peer(&self, socket_id: &str, notify: bool) {
        let room = {
            let mut state = self.state.write().expect("call lock poisoned");
            let Some(room_id) = state.peers.remove(socket_id) else {
                return;
            };
            state.rooms.get(&room_id).cloned()
        };
        let Some(room) = room else {
            return;
        };

        let (peer, now_empty) = {
            let mut participants = room.participants.write().expect("room lock poisoned");
            let peer = participants.remove(socket_id);
            (peer, participants.is_empty())
        };

        if now_empty {
            self.state
                .write()
                .expect("call lock poisoned")
                .rooms
                .remove(&room.id);
            info!(room = %room.id, "removed empty call room");
        }

        let Some(peer) = peer else {
            return;
        };

        info!(
            room = %room.id,
            socket = socket_id,
            seconds = (Utc::now() - peer.joined_at).num_seconds(),
            "peer left call room"
        );

        if let Some(row) = peer.participant_row {
            self.persist_departure(row);
        }

        if notify {
            let farewell = Envelope::new(Kind::PeerLeft).with_data(json!({
                "participant_id": socket_id,
            }));
            self.broadcast_to_room(&room, &farewell, socket_id);
        }
    }

    fn room_of(&self, socket_id: &str) -> Option<Arc<Room>> {
        let state = self.state.read().expect("call lock poisoned");
        let room_id = state.peers.get(socket_id)?;
        state.rooms.get(room_id).cloned()
    }

    /// Send to every room peer other than `except`. Sockets are collected
    /// under the room lock and written to after it is released.
    fn broadcast_to_room(&self, room: &Arc<Room>, envelope: &Envelope, except: &str) {
        let recipients: Vec<Arc<Socket>> = {
            let participants = room.participants.read().expect("room lock poisoned");
            participants
                .values()
                .filter(|peer| peer.socket.id() != except)
                .map(|peer| peer.socket.clone())
                .collect()
        };

        for socket in recipients {
            socket.send_message(envelope);
        }
    }

    fn snapshot(&self, room: &Arc<Room>) -> RoomState {
        let participants = room
            .participants
            .read()
            .expect("room lock poisoned")
            .values()
            .map(Peer::info)
            .collect();

        RoomState {
            room_id: room.id.clone(),
            participants,
            call_id: room.call_id,
            status: ROOM_STATUS_ACTIVE.to_string(),
        }
    }

    // ------------------------------------------------------------------
    // Optional persistence
    // ------------------------------------------------------------------

    fn create_call_record(&self, room_id: &str) -> Uuid {
        let Some(db) = &self.db else {
            return Uuid::new_v4();
        };
        match db.lock().expect("store lock poisoned").create_call(room_id) {
            Ok(call) => call.id,
            Err(error) => {
                warn!(%error, room = room_id, "failed to persist call, continuing in-memory");
                Uuid::new_v4()
            }
        }
    }

    fn persist_participant(&self, call_id: Uuid, user_id: &str) -> Option<Uuid> {
        let db = self.db.as_ref()?;
        match db
            .lock()
            .expect("store lock poisoned")
            .add_participant(call_id, user_id, DEFAULT_ROLE, "")
        {
            Ok(participant) => Some(participant.id),
            Err(error) => {
                warn!(%error, %call_id, "failed to persist participant");
                None
            }
        }
    }

    fn persist_departure(&self, participant_row: Uuid) {
        if let Some(db) = &self.db {
            if let Err(error) = db
                .lock()
                .expect("store lock poisoned")
                .mark_participant_left(participant_row)
            {
                warn!(%error, row = %participant_row, "failed to persist departure");
            }
        }
    }
}

impl SignalingRouter for CallManager {
    fn handle_signaling(&self, socket: &Arc<Socket>, envelope: Envelope) {
        match envelope.kind() {
            Some(Kind::Auth) => self.handle_auth(socket, &envelope),
            Some(Kind::Join) => self.handle_join(socket, &envelope),
            Some(kind @ (Kind::Offer | Kind::Answer)) => self.forward_sdp(socket, &envelope, kind),
            Some(Kind::IceCandidate) => self.forward_ice(socket, &envelope),
            Some(Kind::Mute) => self.handle_mute(socket, &envelope, true),
            Some(Kind::Unmute) => self.handle_mute(socket, &envelope, false),
            Some(Kind::Hold) => self.handle_hold(socket, &envelope),
            Some(Kind::Dtmf) => self.forward_dtmf(socket, &envelope),
            other => debug!(?other, "non-signaling frame handed to call manager"),
        }
    }

    fn handle_disconnect(&self, socket_id: &str) {
        self.remove_peer(socket_id, true);
    }
}

fn attach_from(data: &mut Value, socket_id: &str) {
    if let Some(map) = data.as_object_mut() {
        map.insert("from".to_string(), json!(socket_id));
    }
}
