use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::BrokerError;
use crate::protocol::{MemberSummary, Message, PlaybackEvent, PlaybackState};

const LOG_TAG: &str = "[Watchparty]";
const PARTY_CODE_LEN: usize = 6;
const MAX_DISPLAY_NAME: usize = 32;

pub type SessionSender = mpsc::UnboundedSender<Message>;

/// Process-wide registry of sessions and the rooms they watch together in.
///
/// Membership changes for one room happen under that room's map entry lock,
/// and the roster broadcast is pushed before the lock is released, so every
/// member observes rosters in the order the room changed. The sessions map
/// and the rooms map are never locked at the same time.
#[derive(Clone, Default)]
pub struct RoomBroker {
    /// All active rooms: room_id -> Room
    rooms: Arc<DashMap<String, Room>>,
    /// All connected sessions: client_id -> SessionInfo
    sessions: Arc<DashMap<Uuid, SessionInfo>>,
}

struct SessionInfo {
    room_id: Option<String>,
    display_name: String,
    tx: SessionSender,
}

struct Member {
    client_id: Uuid,
    display_name: String,
    tx: SessionSender,
}

#[derive(Default)]
struct Room {
    /// Join order
    members: Vec<Member>,
    host_id: Option<Uuid>,
}

/// Result of a successful join, as seen by the joining session.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    pub room_id: String,
    pub is_host: bool,
    pub already_member: bool,
    pub members: Vec<MemberSummary>,
}

#[derive(Clone, Copy, PartialEq)]
enum Admission {
    CreateIfMissing,
    ExistingOnly,
}

impl Room {
    fn contains(&self, client_id: Uuid) -> bool {
        self.members.iter().any(|m| m.client_id == client_id)
    }

    fn roster(&self) -> Vec<MemberSummary> {
        self.members
            .iter()
            .map(|m| MemberSummary {
                client_id: m.client_id,
                display_name: m.display_name.clone(),
                is_host: self.host_id == Some(m.client_id),
            })
            .collect()
    }

    fn members_message(&self, room_id: &str) -> Message {
        Message::PartyMembers {
            room_id: room_id.to_string(),
            members: self.roster(),
        }
    }

    fn send_to(&self, client_id: Uuid, msg: Message) {
        if let Some(member) = self.members.iter().find(|m| m.client_id == client_id) {
            let _ = member.tx.send(msg);
        }
    }

    fn broadcast(&self, msg: &Message) {
        for member in &self.members {
            let _ = member.tx.send(msg.clone());
        }
    }

    /// Removes a member and hands the host role to the earliest remaining joiner.
    fn remove(&mut self, client_id: Uuid) {
        self.members.retain(|m| m.client_id != client_id);
        if self.host_id == Some(client_id) {
            self.host_id = self.members.first().map(|m| m.client_id);
        }
    }
}

impl RoomBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, client_id: Uuid, tx: SessionSender) {
        self.sessions.insert(
            client_id,
            SessionInfo {
                room_id: None,
                display_name: default_display_name(client_id),
                tx,
            },
        );
        tracing::info!("{LOG_TAG} Client {} connected", client_id);
    }

    pub fn unregister(&self, client_id: Uuid) {
        let _ = self.leave(client_id);
        self.sessions.remove(&client_id);
        tracing::info!("{LOG_TAG} Client {} disconnected", client_id);
    }

    /// Simple sync mode: join (or implicitly create) the room.
    pub fn join_room(
        &self,
        client_id: Uuid,
        room_id: &str,
        username: Option<String>,
    ) -> Result<JoinOutcome, BrokerError> {
        self.admit(
            client_id,
            room_id,
            username,
            Admission::CreateIfMissing,
            |_| Vec::new(),
        )
    }

    /// Party mode: allocate a fresh code and become its host.
    pub fn create_party(
        &self,
        client_id: Uuid,
        username: Option<String>,
    ) -> Result<JoinOutcome, BrokerError> {
        let party_id = self.generate_party_code();
        let outcome = self.admit(
            client_id,
            &party_id,
            username,
            Admission::CreateIfMissing,
            |outcome| {
                let username = outcome
                    .members
                    .iter()
                    .find(|m| m.client_id == client_id)
                    .map(|m| m.display_name.clone())
                    .unwrap_or_default();
                vec![
                    Message::PartyCreated {
                        party_id: outcome.room_id.clone(),
                        client_id,
                        username,
                    },
                    party_joined(client_id, outcome),
                ]
            },
        )?;
        tracing::info!(
            "{LOG_TAG} Party {} created by client {}",
            outcome.room_id,
            client_id
        );
        Ok(outcome)
    }

    /// Party mode: join a party that must already exist.
    pub fn join_party(
        &self,
        client_id: Uuid,
        party_id: &str,
        username: Option<String>,
    ) -> Result<JoinOutcome, BrokerError> {
        if !self.rooms.contains_key(party_id) {
            return Err(BrokerError::PartyNotFound(party_id.to_string()));
        }
        self.admit(
            client_id,
            party_id,
            username,
            Admission::ExistingOnly,
            |outcome| vec![party_joined(client_id, outcome)],
        )
    }

    fn admit<F>(
        &self,
        client_id: Uuid,
        room_id: &str,
        username: Option<String>,
        admission: Admission,
        replies: F,
    ) -> Result<JoinOutcome, BrokerError>
    where
        F: FnOnce(&JoinOutcome) -> Vec<Message>,
    {
        let (tx, display_name, current_room) = {
            let mut session = self
                .sessions
                .get_mut(&client_id)
                .ok_or(BrokerError::UnknownSession)?;
            if let Some(name) = username.as_deref().and_then(sanitize_display_name) {
                session.display_name = name;
            }
            (
                session.tx.clone(),
                session.display_name.clone(),
                session.room_id.clone(),
            )
        };

        // A session watches in one room at a time.
        if current_room.as_deref().is_some_and(|current| current != room_id) {
            let _ = self.leave(client_id);
        }

        let outcome = {
            let mut room = match self.rooms.entry(room_id.to_string()) {
                Entry::Occupied(entry) => entry.into_ref(),
                Entry::Vacant(entry) if admission == Admission::CreateIfMissing => {
                    tracing::info!("{LOG_TAG} Room {} created", room_id);
                    entry.insert(Room::default())
                }
                Entry::Vacant(_) => return Err(BrokerError::PartyNotFound(room_id.to_string())),
            };

            let already_member = room.contains(client_id);
            if already_member {
                if let Some(member) = room.members.iter_mut().find(|m| m.client_id == client_id) {
                    member.display_name = display_name;
                }
            } else {
                room.members.push(Member {
                    client_id,
                    display_name,
                    tx,
                });
                if room.host_id.is_none() {
                    room.host_id = Some(client_id);
                }
            }

            let outcome = JoinOutcome {
                room_id: room_id.to_string(),
                is_host: room.host_id == Some(client_id),
                already_member,
                members: room.roster(),
            };

            for reply in replies(&outcome) {
                room.send_to(client_id, reply);
            }
            let roster = room.members_message(room_id);
            if already_member {
                room.send_to(client_id, roster);
            } else {
                room.broadcast(&roster);
            }
            outcome
        };

        if let Some(mut session) = self.sessions.get_mut(&client_id) {
            session.room_id = Some(room_id.to_string());
        }

        tracing::info!(
            "{LOG_TAG} Client {} joined room {} ({} members)",
            client_id,
            room_id,
            outcome.members.len()
        );
        Ok(outcome)
    }

    /// Removes the session from its room. Returns the room it left, if any.
    pub fn leave(&self, client_id: Uuid) -> Option<String> {
        let room_id = self
            .sessions
            .get_mut(&client_id)
            .and_then(|mut session| session.room_id.take())?;

        if let Entry::Occupied(mut entry) = self.rooms.entry(room_id.clone()) {
            let room = entry.get_mut();
            room.remove(client_id);
            if room.members.is_empty() {
                entry.remove();
                tracing::info!("{LOG_TAG} Room {} deleted (empty)", room_id);
            } else {
                room.broadcast(&room.members_message(&room_id));
            }
        }

        tracing::info!("{LOG_TAG} Client {} left room {}", client_id, room_id);
        Some(room_id)
    }

    /// Forwards `event` to every other member of `room_id`.
    ///
    /// The sender must currently be a member of the room it names. Returns
    /// the number of sessions the event was handed to; zero is not an error.
    pub fn relay(
        &self,
        client_id: Uuid,
        room_id: &str,
        event: PlaybackEvent,
    ) -> Result<usize, BrokerError> {
        let delivered = self.fan_out(
            client_id,
            room_id,
            Message::PlaybackBroadcast {
                from_client: client_id,
                event,
            },
            false,
        )?;
        tracing::debug!(
            "{LOG_TAG} Relayed {:?} from {} to {} members in room {}",
            event,
            client_id,
            delivered,
            room_id
        );
        Ok(delivered)
    }

    /// Forwards the host's playback state to the other members. Only the
    /// current host of the room may send it.
    pub fn relay_host_state(
        &self,
        client_id: Uuid,
        room_id: &str,
        state: PlaybackState,
    ) -> Result<usize, BrokerError> {
        let delivered = self.fan_out(
            client_id,
            room_id,
            Message::HostSync {
                from_client: client_id,
                state,
            },
            true,
        )?;
        tracing::debug!(
            "{LOG_TAG} Host {} synced {} members in room {} to {:?}",
            client_id,
            delivered,
            room_id,
            state
        );
        Ok(delivered)
    }

    fn fan_out(
        &self,
        client_id: Uuid,
        room_id: &str,
        msg: Message,
        host_only: bool,
    ) -> Result<usize, BrokerError> {
        let current = self.room_of(client_id).ok_or(BrokerError::NotInRoom)?;
        if current != room_id {
            return Err(BrokerError::RoomMismatch {
                claimed: room_id.to_string(),
                actual: current,
            });
        }

        let Some(room) = self.rooms.get(room_id) else {
            return Ok(0);
        };
        if host_only && room.host_id != Some(client_id) {
            return Err(BrokerError::NotHost);
        }
        let mut delivered = 0;
        for member in room.members.iter().filter(|m| m.client_id != client_id) {
            if member.tx.send(msg.clone()).is_ok() {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Sends the current ordered roster to every member of the room.
    pub fn broadcast_membership(&self, room_id: &str) {
        if let Some(room) = self.rooms.get(room_id) {
            room.broadcast(&room.members_message(room_id));
        }
    }

    pub fn room_members(&self, room_id: &str) -> Vec<MemberSummary> {
        self.rooms
            .get(room_id)
            .map(|room| room.roster())
            .unwrap_or_default()
    }

    pub fn room_of(&self, client_id: Uuid) -> Option<String> {
        self.sessions
            .get(&client_id)
            .and_then(|session| session.room_id.clone())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn generate_party_code(&self) -> String {
        loop {
            let mut raw = Uuid::new_v4().as_u128();
            let code: String = (0..PARTY_CODE_LEN)
                .map(|_| {
                    let digit = (raw % 36) as u32;
                    raw /= 36;
                    char::from_digit(digit, 36).unwrap_or('0')
                })
                .collect();
            if !self.rooms.contains_key(&code) {
                break code;
            }
        }
    }
}

fn party_joined(client_id: Uuid, outcome: &JoinOutcome) -> Message {
    Message::PartyJoined {
        party_id: outcome.room_id.clone(),
        client_id,
        members: outcome.members.clone(),
        is_host: outcome.is_host,
    }
}

fn sanitize_display_name(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|ch| !ch.is_control())
        .take(MAX_DISPLAY_NAME)
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn default_display_name(client_id: Uuid) -> String {
    let short = &client_id.simple().to_string()[..8];
    format!("User_{short}")
}
