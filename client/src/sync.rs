use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::{sync::Arc, time::Instant};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::sleep,
};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use uuid::Uuid;

use crate::constants::KEEPALIVE_INTERVAL;
use crate::protocol::{Message, PlaybackEvent, PlaybackState};
use crate::session::PlaybackSink;

type Transport = mpsc::UnboundedSender<WsMessage>;
type WeakTransport = mpsc::WeakUnboundedSender<WsMessage>;
type ClosedSignal = Arc<Mutex<Option<oneshot::Sender<()>>>>;

/// The one connection a viewer holds to the relay.
///
/// Cheap to clone; clones share the same socket.
#[derive(Clone)]
pub struct SyncClient {
    inner: Arc<SyncClientState>,
}

struct SyncClientState {
    transport: Mutex<Option<Transport>>,
    traffic: Mutex<Traffic>,
}

#[derive(Default)]
struct Traffic {
    frames_out: u64,
    frames_in: u64,
    bytes_out: u64,
    bytes_in: u64,
    /// Nonce and send time of the ping awaiting its pong
    pending_ping: Option<(u64, Instant)>,
    rtt_ms: Option<f32>,
    connected_since: Option<Instant>,
    disconnects: u32,
    endpoint: Option<String>,
}

/// Point-in-time view of the relay connection, for status output.
#[derive(Debug, Clone)]
pub struct TrafficSnapshot {
    pub frames_out: u64,
    pub frames_in: u64,
    pub bytes_out: u64,
    pub bytes_in: u64,
    pub rtt_ms: Option<f32>,
    pub connected_secs: Option<f32>,
    pub disconnects: u32,
    pub endpoint: Option<String>,
}

impl SyncClient {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SyncClientState {
                transport: Mutex::new(None),
                traffic: Mutex::new(Traffic::default()),
            }),
        }
    }

    /// Connect to the relay. Returns a receiver that resolves when the socket closes.
    pub async fn connect<F>(&self, relay_url: &str, on_message: F) -> Result<oneshot::Receiver<()>>
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        let (ws_stream, _) = connect_async(relay_url)
            .await
            .context("Failed to connect to relay")?;

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        let ours = tx.downgrade();
        *self.inner.transport.lock() = Some(tx);

        let (closed_tx, closed_rx) = oneshot::channel();
        let closed: ClosedSignal = Arc::new(Mutex::new(Some(closed_tx)));

        // Writer
        let state = Arc::clone(&self.inner);
        let writer_closed = Arc::clone(&closed);
        let writer_ours = ours.clone();
        let keepalive_ours = ours.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let is_close = matches!(frame, WsMessage::Close(_));
                if ws_sender.send(frame).await.is_err() || is_close {
                    break;
                }
            }
            let _ = ws_sender.close().await;
            state.release(&writer_ours, &writer_closed);
        });

        // Reader
        let state = Arc::clone(&self.inner);
        tokio::spawn(async move {
            while let Some(frame) = ws_receiver.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        state.count_in(text.len());
                        match serde_json::from_str::<Message>(&text) {
                            Ok(msg) => on_message(msg),
                            Err(e) => tracing::warn!("Ignoring malformed relay frame: {}", e),
                        }
                    }
                    Ok(WsMessage::Pong(payload)) => state.pong(&payload),
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            state.release(&ours, &closed);
        });

        spawn_keepalive(Arc::clone(&self.inner), keepalive_ours);

        Ok(closed_rx)
    }

    /// Closes the socket. The receiver returned by `connect` resolves once it is gone.
    pub fn disconnect(&self) {
        if let Some(tx) = self.inner.transport.lock().take() {
            let _ = tx.send(WsMessage::Close(None));
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.transport.lock().is_some()
    }

    pub fn mark_connected(&self, endpoint: &str) {
        let mut traffic = self.inner.traffic.lock();
        traffic.connected_since = Some(Instant::now());
        traffic.endpoint = Some(endpoint.to_string());
    }

    pub fn mark_disconnected(&self) {
        let mut traffic = self.inner.traffic.lock();
        traffic.connected_since = None;
        traffic.disconnects += 1;
    }

    pub fn traffic(&self) -> TrafficSnapshot {
        let traffic = self.inner.traffic.lock();
        TrafficSnapshot {
            frames_out: traffic.frames_out,
            frames_in: traffic.frames_in,
            bytes_out: traffic.bytes_out,
            bytes_in: traffic.bytes_in,
            rtt_ms: traffic.rtt_ms,
            connected_secs: traffic
                .connected_since
                .map(|since| since.elapsed().as_secs_f32()),
            disconnects: traffic.disconnects,
            endpoint: traffic.endpoint.clone(),
        }
    }

    /// Simple sync mode: subscribe to the room of the content on screen
    pub fn join_room(&self, room_id: String, username: Option<String>) -> Result<()> {
        self.send_message(Message::JoinRoom { room_id, username })
    }

    /// Create a new party and become its host
    pub fn create_party(&self, username: Option<String>) -> Result<()> {
        self.send_message(Message::CreateParty { username })
    }

    /// Join an existing party by code
    pub fn join_party(&self, party_id: String, username: Option<String>) -> Result<()> {
        self.send_message(Message::JoinParty { party_id, username })
    }

    pub fn leave_party(&self) -> Result<()> {
        self.send_message(Message::LeaveParty)
    }

    fn send_message(&self, msg: Message) -> Result<()> {
        let json = serde_json::to_string(&msg).context("Failed to serialize message")?;
        let tx = self
            .inner
            .transport
            .lock()
            .clone()
            .context("Not connected to the relay")?;
        let len = json.len();
        tx.send(WsMessage::Text(json.into()))
            .context("Failed to queue message to socket")?;
        self.inner.count_out(len);
        Ok(())
    }
}

impl Default for SyncClient {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackSink for SyncClient {
    fn send_playback(&self, room_id: &str, event: PlaybackEvent) -> Result<()> {
        self.send_message(Message::Playback {
            room_id: room_id.to_string(),
            event,
        })
    }

    fn send_host_state(&self, room_id: &str, state: PlaybackState) -> Result<()> {
        self.send_message(Message::HostState {
            room_id: room_id.to_string(),
            state,
        })
    }
}

/// Pings the socket behind `ours` every keep-alive period; stops once that
/// socket is gone or replaced.
fn spawn_keepalive(state: Arc<SyncClientState>, ours: WeakTransport) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(KEEPALIVE_INTERVAL).await;
            if !state.ping(&ours) {
                break;
            }
        }
    })
}

impl SyncClientState {
    fn count_out(&self, bytes: usize) {
        let mut traffic = self.traffic.lock();
        traffic.frames_out += 1;
        traffic.bytes_out += bytes as u64;
    }

    fn count_in(&self, bytes: usize) {
        let mut traffic = self.traffic.lock();
        traffic.frames_in += 1;
        traffic.bytes_in += bytes as u64;
    }

    /// Sends a nonce-stamped ping on our socket. False once that socket is
    /// no longer the live one.
    fn ping(&self, ours: &WeakTransport) -> bool {
        let Some(tx) = self.live(ours) else {
            return false;
        };
        let nonce = Uuid::new_v4().as_u128() as u64;
        self.traffic.lock().pending_ping = Some((nonce, Instant::now()));
        tx.send(WsMessage::Ping(nonce.to_le_bytes().to_vec().into()))
            .is_ok()
    }

    /// The live transport, if it is still the one `ours` points at.
    fn live(&self, ours: &WeakTransport) -> Option<Transport> {
        let mine = ours.upgrade()?;
        let current = self.transport.lock();
        current
            .as_ref()
            .filter(|current| current.same_channel(&mine))
            .cloned()
    }

    fn pong(&self, payload: &[u8]) {
        let Some(nonce) = payload
            .get(..8)
            .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
            .map(u64::from_le_bytes)
        else {
            return;
        };
        let mut traffic = self.traffic.lock();
        if let Some((pending, sent)) = traffic.pending_ping {
            if pending == nonce {
                traffic.rtt_ms = Some(sent.elapsed().as_secs_f32() * 1000.0);
                traffic.pending_ping = None;
            }
        }
    }

    /// Forgets the socket unless a newer connection already replaced it, and
    /// fires the closed signal once.
    fn release(&self, ours: &WeakTransport, closed: &ClosedSignal) {
        if self.live(ours).is_some() {
            *self.transport.lock() = None;
            self.traffic.lock().pending_ping = None;
        }
        if let Some(tx) = closed.lock().take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sending_while_offline_fails_without_counting() {
        let client = SyncClient::new();

        let err = client.leave_party().unwrap_err();

        assert!(err.to_string().contains("Not connected"));
        assert!(!client.is_connected());
        assert_eq!(client.traffic().frames_out, 0);
    }

    #[test]
    fn disconnects_are_counted() {
        let client = SyncClient::new();
        client.mark_connected("ws://relay/ws");
        assert!(client.traffic().connected_secs.is_some());

        client.mark_disconnected();

        let traffic = client.traffic();
        assert_eq!(traffic.disconnects, 1);
        assert!(traffic.connected_secs.is_none());
        assert_eq!(traffic.endpoint.as_deref(), Some("ws://relay/ws"));
    }

    #[test]
    fn only_the_matching_pong_sets_rtt() {
        let client = SyncClient::new();
        client.inner.traffic.lock().pending_ping = Some((7, Instant::now()));

        client.inner.pong(&9u64.to_le_bytes());
        assert!(client.traffic().rtt_ms.is_none());

        client.inner.pong(&7u64.to_le_bytes());
        assert!(client.traffic().rtt_ms.is_some());
        assert!(client.inner.traffic.lock().pending_ping.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn replaced_socket_stops_its_keepalive() {
        let client = SyncClient::new();
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        *client.inner.transport.lock() = Some(old_tx.clone());
        let old_keepalive = spawn_keepalive(Arc::clone(&client.inner), old_tx.downgrade());

        let (new_tx, mut new_rx) = mpsc::unbounded_channel();
        *client.inner.transport.lock() = Some(new_tx.clone());
        let _new_keepalive = spawn_keepalive(Arc::clone(&client.inner), new_tx.downgrade());

        sleep(KEEPALIVE_INTERVAL + std::time::Duration::from_secs(1)).await;

        assert!(matches!(new_rx.try_recv(), Ok(WsMessage::Ping(_))));
        assert!(new_rx.try_recv().is_err());
        assert!(old_rx.try_recv().is_err());
        assert!(old_keepalive.is_finished());
    }
}
