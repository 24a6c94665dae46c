use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};
use uuid::Uuid;

use crate::constants::{
    ECHO_TOLERANCE_SECS, HOST_SYNC_INTERVAL, SAMPLE_INTERVAL, SUPPRESSION_WINDOW,
};
use crate::error::ClientError;
use crate::player::Player;
use crate::protocol::{MemberSummary, Message, PlaybackEvent, PlaybackKind, PlaybackState};
use crate::room::ROOM_PREFIX;

/// Where a player state transition came from. Only local transitions are
/// announced to the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting { attempt: u32 },
    Connected,
    Disconnected,
}

/// Outbound half of the relay, as far as playback is concerned.
pub trait PlaybackSink: Send + Sync {
    fn send_playback(&self, room_id: &str, event: PlaybackEvent) -> anyhow::Result<()>;
    fn send_host_state(&self, room_id: &str, state: PlaybackState) -> anyhow::Result<()>;
}

pub type SharedSession<P, S> = Arc<Mutex<SessionController<P, S>>>;

/// A transition this session applied on behalf of a peer and expects the
/// player to report back.
struct RemoteTransition {
    kind: PlaybackKind,
    time: f64,
    expires_at: Instant,
}

/// Mediates between the local player and the room.
pub struct SessionController<P, S> {
    player: Arc<P>,
    sink: S,

    // Room state
    room_id: Option<String>,
    client_id: Option<Uuid>,
    members: Vec<MemberSummary>,
    is_host: bool,
    /// Set by an explicit leave, cleared by the next join
    left_room: bool,

    // Playback state as last known
    current_time: f64,
    is_playing: bool,
    remote_transitions: Vec<RemoteTransition>,

    // Status surfaced to the UI
    status: ConnectionStatus,
    status_message: String,
    error_message: Option<String>,
}

impl<P: Player, S: PlaybackSink> SessionController<P, S> {
    pub fn new(player: Arc<P>, sink: S) -> Self {
        Self {
            player,
            sink,
            room_id: None,
            client_id: None,
            members: Vec::new(),
            is_host: false,
            left_room: false,
            current_time: 0.0,
            is_playing: false,
            remote_transitions: Vec::new(),
            status: ConnectionStatus::Disconnected,
            status_message: "Not connected".to_string(),
            error_message: None,
        }
    }

    pub fn shared(self) -> SharedSession<P, S> {
        Arc::new(Mutex::new(self))
    }

    /// Announces a viewer action to the rest of the room.
    pub fn emit_local(&mut self, kind: PlaybackKind, time: f64) -> Result<(), ClientError> {
        let room_id = self.room_id.as_deref().ok_or(ClientError::NotInRoom)?;
        let event = PlaybackEvent::new(kind, time);
        self.sink
            .send_playback(room_id, event)
            .map_err(ClientError::Transport)?;
        self.record(event);
        Ok(())
    }

    /// Classifies a player callback and emits it when it was not caused by a
    /// remote event.
    pub fn on_player_event(&mut self, event: PlaybackEvent) -> Origin {
        let now = Instant::now();
        self.remote_transitions.retain(|t| t.expires_at > now);

        let matched = self.remote_transitions.iter().position(|t| {
            t.kind == event.kind() && (t.time - event.time()).abs() <= ECHO_TOLERANCE_SECS
        });
        if let Some(index) = matched {
            self.remote_transitions.remove(index);
            self.record(event);
            return Origin::Remote;
        }

        if let Err(e) = self.emit_local(event.kind(), event.time()) {
            tracing::warn!("Could not announce {:?}: {}", event, e);
            self.record(event);
            self.error_message = Some(e.to_string());
        }
        self.announce_host_state();
        Origin::Local
    }

    /// Applies a peer's event to the local player. Returns false when the
    /// event was dropped.
    pub fn apply_remote(&mut self, event: PlaybackEvent) -> bool {
        if !self.player.is_ready() {
            tracing::debug!("Player not ready; dropping remote {:?}", event);
            return false;
        }

        let time = event.time();
        let was_paused = self.player.is_paused().unwrap_or(!self.is_playing);

        self.expect(PlaybackKind::Seek, time);
        match event {
            PlaybackEvent::Play { .. } if was_paused => self.expect(PlaybackKind::Play, time),
            PlaybackEvent::Pause { .. } if !was_paused => self.expect(PlaybackKind::Pause, time),
            _ => {}
        }

        let result = self.player.seek(time).and_then(|_| match event {
            PlaybackEvent::Play { .. } => self.player.play(),
            PlaybackEvent::Pause { .. } => self.player.pause(),
            // A seek keeps whatever play state the viewer had.
            PlaybackEvent::Seek { .. } => Ok(()),
        });

        match result {
            Ok(()) => {
                self.record(event);
                true
            }
            Err(e) => {
                self.error_message = Some(ClientError::Player(e).to_string());
                false
            }
        }
    }

    /// Brings a party guest's player to the host's state. The host itself
    /// ignores it. Seeks only when the drift exceeds the echo tolerance.
    pub fn apply_host_state(&mut self, state: PlaybackState) -> bool {
        if self.is_host {
            return false;
        }
        if !self.player.is_ready() {
            tracing::debug!("Player not ready; dropping host state {:?}", state);
            return false;
        }

        let was_paused = self.player.is_paused().unwrap_or(!self.is_playing);
        let position = self.player.get_position().unwrap_or(self.current_time);
        let drifted = (position - state.time).abs() > ECHO_TOLERANCE_SECS;

        let mut result = Ok(());
        if drifted {
            self.expect(PlaybackKind::Seek, state.time);
            result = self.player.seek(state.time);
        }
        if result.is_ok() && state.is_playing && was_paused {
            self.expect(PlaybackKind::Play, state.time);
            result = self.player.play();
        } else if result.is_ok() && !state.is_playing && !was_paused {
            self.expect(PlaybackKind::Pause, state.time);
            result = self.player.pause();
        }

        match result {
            Ok(()) => {
                if drifted {
                    self.current_time = state.time;
                }
                self.is_playing = state.is_playing;
                true
            }
            Err(e) => {
                self.error_message = Some(ClientError::Player(e).to_string());
                false
            }
        }
    }

    /// Sends the player's state to the party when this session hosts one.
    pub fn announce_host_state(&mut self) {
        let Some(room_id) = self.hosted_party() else {
            return;
        };
        let (Ok(paused), Ok(time)) = (self.player.is_paused(), self.player.get_position()) else {
            return;
        };
        let state = PlaybackState {
            is_playing: !paused,
            time,
        };
        if let Err(e) = self.sink.send_host_state(&room_id, state) {
            tracing::warn!("Could not send host state: {:#}", e);
        }
    }

    /// Periodic host broadcast; a paused host stays quiet.
    pub fn host_heartbeat(&mut self) {
        if self.player.is_paused() == Ok(false) {
            self.announce_host_state();
        }
    }

    /// Progress callback from the player.
    pub fn on_progress(&mut self, time: f64) {
        self.current_time = time;
    }

    /// Refreshes the displayed time; continuous playback fires no events.
    pub fn sample(&mut self) {
        if !self.player.is_ready() {
            return;
        }
        if let Ok(position) = self.player.get_position() {
            self.current_time = position;
        }
    }

    pub fn handle_server_message(&mut self, msg: Message) {
        match msg {
            Message::PlaybackBroadcast { event, .. } => {
                self.apply_remote(event);
            }
            Message::HostSync { state, .. } => {
                self.apply_host_state(state);
            }
            Message::PartyCreated {
                party_id,
                client_id,
                username,
            } => {
                self.client_id = Some(client_id);
                self.room_id = Some(party_id.clone());
                self.is_host = true;
                self.left_room = false;
                self.status_message = format!("Party {} created by {}", party_id, username);
            }
            Message::PartyJoined {
                party_id,
                client_id,
                members,
                is_host,
            } => {
                self.client_id = Some(client_id);
                self.room_id = Some(party_id.clone());
                self.members = members;
                self.is_host = is_host;
                self.left_room = false;
                self.error_message = None;
                self.status_message = format!(
                    "Joined party {} ({})",
                    party_id,
                    if is_host { "Host" } else { "Guest" }
                );
            }
            Message::PartyMembers { room_id, members } => {
                if self.room_id.as_deref() == Some(room_id.as_str()) {
                    if let Some(me) = self.client_id {
                        self.is_host = members.iter().any(|m| m.client_id == me && m.is_host);
                    }
                    self.members = members;
                }
            }
            Message::PartyLeft => {
                self.clear_room();
                self.left_room = true;
                self.status_message = "Left party".to_string();
            }
            Message::PartyError { message } | Message::Error { message } => {
                self.error_message = Some(message);
            }
            other => {
                tracing::warn!("Unexpected message from relay: {:?}", other);
            }
        }
    }

    /// Marks the room as joined without waiting for a roster.
    pub fn joined_room(&mut self, room_id: &str) {
        if self.room_id.as_deref() != Some(room_id) {
            self.members.clear();
        }
        self.room_id = Some(room_id.to_string());
        self.left_room = false;
    }

    pub fn clear_room(&mut self) {
        self.room_id = None;
        self.members.clear();
        self.is_host = false;
        self.remote_transitions.clear();
    }

    pub fn set_connection_status(&mut self, status: ConnectionStatus, message: String) {
        self.status = status;
        self.status_message = message;
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn members(&self) -> &[MemberSummary] {
        &self.members
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    /// True after the viewer left a room and has not joined another.
    pub fn has_left_room(&self) -> bool {
        self.left_room
    }

    /// The party code when this session hosts a party. Simple-sync rooms
    /// have no authority.
    fn hosted_party(&self) -> Option<String> {
        self.room_id
            .as_deref()
            .filter(|room| self.is_host && !room.starts_with(ROOM_PREFIX))
            .map(str::to_string)
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    fn expect(&mut self, kind: PlaybackKind, time: f64) {
        self.remote_transitions.push(RemoteTransition {
            kind,
            time,
            expires_at: Instant::now() + SUPPRESSION_WINDOW,
        });
    }

    fn record(&mut self, event: PlaybackEvent) {
        self.current_time = event.time();
        match event {
            PlaybackEvent::Play { .. } => self.is_playing = true,
            PlaybackEvent::Pause { .. } => self.is_playing = false,
            PlaybackEvent::Seek { .. } => {}
        }
    }
}

/// Feeds player callbacks into the session until the player goes away.
pub fn spawn_player_pump<P, S>(
    session: SharedSession<P, S>,
    mut callbacks: mpsc::UnboundedReceiver<PlaybackEvent>,
) -> JoinHandle<()>
where
    P: Player + 'static,
    S: PlaybackSink + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = callbacks.recv().await {
            let origin = session.lock().on_player_event(event);
            tracing::debug!("Player reported {:?} ({:?})", event, origin);
        }
    })
}

/// Samples the player clock once per interval.
pub fn spawn_time_sampler<P, S>(session: SharedSession<P, S>) -> JoinHandle<()>
where
    P: Player + 'static,
    S: PlaybackSink + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
        loop {
            ticker.tick().await;
            session.lock().sample();
        }
    })
}

/// Broadcasts the host's state while it plays, so guests that joined late or
/// drifted converge.
pub fn spawn_host_sync<P, S>(session: SharedSession<P, S>) -> JoinHandle<()>
where
    P: Player + 'static,
    S: PlaybackSink + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HOST_SYNC_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            session.lock().host_heartbeat();
        }
    })
}
