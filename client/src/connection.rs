use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::mpsc, time::sleep};

use crate::constants::{RECONNECT_ATTEMPTS, RECONNECT_DELAY};
use crate::player::Player;
use crate::room::{
    content_id_from_url, is_party_page, party_code_from_url, room_id_for_content, ROOM_PREFIX,
};
use crate::session::{ConnectionStatus, SharedSession};
use crate::sync::SyncClient;

/// Which room to enter once the socket is up.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinIntent {
    /// Simple sync mode, e.g. `video_42`
    Room(String),
    CreateParty,
    JoinParty(String),
    /// Connected but in no room, after an explicit leave
    Lobby,
}

impl JoinIntent {
    /// Reads the intent off a page address: a party page joins the party in
    /// its fragment (or creates one when there is none), any other page
    /// joins the room of its content.
    pub fn from_page(page: &str) -> Option<Self> {
        if is_party_page(page) {
            return Some(match party_code_from_url(page) {
                Some(code) => Self::JoinParty(code),
                None => Self::CreateParty,
            });
        }
        content_id_from_url(page).map(|content| Self::Room(room_id_for_content(&content)))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Retries after the first failed attempt
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: RECONNECT_ATTEMPTS,
            delay: RECONNECT_DELAY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionPlan {
    pub relay_url: String,
    pub username: String,
    pub intent: JoinIntent,
    pub policy: ReconnectPolicy,
}

pub type ClientSession<P> = SharedSession<P, SyncClient>;

/// Keeps the session connected and joined.
///
/// Returns the number of connection attempts once the retry budget is spent;
/// the session is left showing a disconnected status. A message on
/// `reconnect_rx` while waiting between attempts restarts the budget.
/// `plan.intent` is rewritten so that a later call rejoins the same party.
pub async fn run_connection_loop<P>(
    sync: SyncClient,
    session: ClientSession<P>,
    plan: &mut ConnectionPlan,
    reconnect_rx: &mut mpsc::UnboundedReceiver<()>,
) -> u32
where
    P: Player + 'static,
{
    let mut attempt: u32 = 0;
    let mut failures: u32 = 0;

    loop {
        attempt += 1;
        update_status(
            &session,
            ConnectionStatus::Connecting { attempt },
            format!("Connecting to relay (attempt {attempt})..."),
        );

        let handler = Arc::clone(&session);
        match sync
            .connect(&plan.relay_url, move |msg| {
                handler.lock().handle_server_message(msg);
            })
            .await
        {
            Ok(closed) => {
                failures = 0;
                sync.mark_connected(&plan.relay_url);
                tracing::info!("Connected to relay at {}", plan.relay_url);
                update_status(
                    &session,
                    ConnectionStatus::Connected,
                    "Connected to relay".to_string(),
                );

                if let Err(e) = send_join(&sync, &session, plan) {
                    tracing::warn!("Failed to join after connecting: {:#}", e);
                }

                let _ = closed.await;
                sync.mark_disconnected();
                plan.intent = rejoin_intent(&session, &plan.intent);
                session.lock().clear_room();
                tracing::warn!("Connection to relay lost");
                update_status(
                    &session,
                    ConnectionStatus::Disconnected,
                    "Connection lost, reconnecting...".to_string(),
                );
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(
                    "Failed to connect to relay at {}: {:#}",
                    plan.relay_url,
                    e
                );
                if failures > plan.policy.max_retries {
                    update_status(
                        &session,
                        ConnectionStatus::Disconnected,
                        format!("Relay unavailable ({e:#}), gave up after {attempt} attempts"),
                    );
                    return attempt;
                }
                update_status(
                    &session,
                    ConnectionStatus::Disconnected,
                    format!("Relay unavailable ({e:#}), retrying..."),
                );
            }
        }

        tokio::select! {
            _ = sleep(plan.policy.delay) => {}
            Some(()) = reconnect_rx.recv() => {
                tracing::info!("Manual reconnect requested; restarting connection attempts");
                failures = 0;
            }
        }
    }
}

fn send_join<P: Player>(
    sync: &SyncClient,
    session: &ClientSession<P>,
    plan: &ConnectionPlan,
) -> anyhow::Result<()> {
    let username = Some(plan.username.clone());
    match &plan.intent {
        JoinIntent::Room(room_id) => {
            // Set before sending so the first roster is not mistaken for another room's.
            session.lock().joined_room(room_id);
            sync.join_room(room_id.clone(), username)
        }
        JoinIntent::CreateParty => sync.create_party(username),
        JoinIntent::JoinParty(party_id) => sync.join_party(party_id.clone(), username),
        JoinIntent::Lobby => Ok(()),
    }
}

/// Where the session stands now decides what the next connection joins: the
/// room it is in, a party by its code, or nothing after a leave.
fn rejoin_intent<P: Player>(session: &ClientSession<P>, intent: &JoinIntent) -> JoinIntent {
    let session = session.lock();
    match session.room_id() {
        Some(room_id) if room_id.starts_with(ROOM_PREFIX) => JoinIntent::Room(room_id.to_string()),
        Some(party_id) => JoinIntent::JoinParty(party_id.to_string()),
        None if session.has_left_room() => JoinIntent::Lobby,
        None => intent.clone(),
    }
}

fn update_status<P: Player>(session: &ClientSession<P>, status: ConnectionStatus, message: String) {
    session.lock().set_connection_status(status, message);
}
