use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent between client and broker (must match the server protocol)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Message {
    // Client -> Broker
    JoinRoom {
        room_id: String,
        #[serde(default)]
        username: Option<String>,
    },
    Playback {
        room_id: String,
        event: PlaybackEvent,
    },
    CreateParty {
        #[serde(default)]
        username: Option<String>,
    },
    JoinParty {
        party_id: String,
        #[serde(default)]
        username: Option<String>,
    },
    LeaveParty,
    HostState {
        room_id: String,
        state: PlaybackState,
    },

    // Broker -> Client
    PlaybackBroadcast {
        from_client: Uuid,
        event: PlaybackEvent,
    },
    HostSync {
        from_client: Uuid,
        state: PlaybackState,
    },
    PartyCreated {
        party_id: String,
        client_id: Uuid,
        username: String,
    },
    PartyJoined {
        party_id: String,
        client_id: Uuid,
        members: Vec<MemberSummary>,
        is_host: bool,
    },
    PartyMembers {
        room_id: String,
        members: Vec<MemberSummary>,
    },
    PartyLeft,
    PartyError {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Transport-control events relayed between viewers of a room
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum PlaybackEvent {
    Play { time: f64 },
    Pause { time: f64 },
    Seek { time: f64 },
}

/// Party host's playback position and play state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub time: f64,
}

/// One roster entry, ordered by join order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSummary {
    pub client_id: Uuid,
    pub display_name: String,
    pub is_host: bool,
}

impl PlaybackEvent {
    pub fn time(&self) -> f64 {
        match *self {
            PlaybackEvent::Play { time }
            | PlaybackEvent::Pause { time }
            | PlaybackEvent::Seek { time } => time,
        }
    }

    pub fn kind(&self) -> PlaybackKind {
        match self {
            PlaybackEvent::Play { .. } => PlaybackKind::Play,
            PlaybackEvent::Pause { .. } => PlaybackKind::Pause,
            PlaybackEvent::Seek { .. } => PlaybackKind::Seek,
        }
    }

    pub fn new(kind: PlaybackKind, time: f64) -> Self {
        match kind {
            PlaybackKind::Play => PlaybackEvent::Play { time },
            PlaybackKind::Pause => PlaybackEvent::Pause { time },
            PlaybackKind::Seek => PlaybackEvent::Seek { time },
        }
    }
}

/// Transport action without its position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackKind {
    Play,
    Pause,
    Seek,
}
