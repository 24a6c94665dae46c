use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::{net::TcpListener, sync::mpsc, task::JoinHandle};
use watchparty_client::{
    connection::{run_connection_loop, ConnectionPlan, JoinIntent, ReconnectPolicy},
    player::{Player, SimulatedPlayer},
    session::{spawn_host_sync, spawn_player_pump, SharedSession},
    ConnectionStatus, SessionController, SyncClient,
};
use watchparty_server::RoomBroker;

struct Viewer {
    player: Arc<SimulatedPlayer>,
    sync: SyncClient,
    session: SharedSession<SimulatedPlayer, SyncClient>,
    connection: JoinHandle<()>,
    _reconnect: mpsc::UnboundedSender<()>,
}

async fn start_relay() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(watchparty_server::serve(listener, RoomBroker::new()));
    addr
}

fn viewer(addr: SocketAddr, name: &str, intent: JoinIntent) -> Viewer {
    let (player, callbacks) = SimulatedPlayer::new(0.0);
    player.set_ready(true);
    let player = Arc::new(player);
    let sync = SyncClient::new();
    let session = SessionController::new(Arc::clone(&player), sync.clone()).shared();
    spawn_player_pump(Arc::clone(&session), callbacks);
    spawn_host_sync(Arc::clone(&session));

    let (reconnect_tx, mut reconnect_rx) = mpsc::unbounded_channel();
    let mut plan = ConnectionPlan {
        relay_url: format!("ws://{addr}/ws"),
        username: name.to_string(),
        intent,
        policy: ReconnectPolicy::default(),
    };
    let connection = tokio::spawn({
        let sync = sync.clone();
        let session = Arc::clone(&session);
        async move {
            run_connection_loop(sync, session, &mut plan, &mut reconnect_rx).await;
        }
    });

    Viewer {
        player,
        sync,
        session,
        connection,
        _reconnect: reconnect_tx,
    }
}

impl Viewer {
    fn roster(&self) -> Vec<String> {
        self.session
            .lock()
            .members()
            .iter()
            .map(|m| m.display_name.clone())
            .collect()
    }
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn seek_on_one_screen_moves_the_other_without_echo() {
    let addr = start_relay().await;
    let ann = viewer(addr, "ann", JoinIntent::Room("video_42".into()));
    let bob = viewer(addr, "bob", JoinIntent::Room("video_42".into()));

    eventually("both rosters", || ann.roster().len() == 2 && bob.roster().len() == 2).await;
    let bob_sent = bob.sync.traffic().frames_out;

    ann.player.seek(37.5).unwrap();

    eventually("bob's player to follow", || {
        bob.player.get_position().ok() == Some(37.5)
    })
    .await;
    assert!(bob.player.is_paused().unwrap());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(bob.sync.traffic().frames_out, bob_sent);
    assert_eq!(ann.player.get_position().unwrap(), 37.5);
    assert_eq!(bob.session.lock().current_time(), 37.5);
}

#[tokio::test]
async fn party_roster_shrinks_when_the_host_leaves() {
    let addr = start_relay().await;
    let ann = viewer(addr, "ann", JoinIntent::CreateParty);

    eventually("party code", || ann.session.lock().room_id().is_some()).await;
    let code = ann.session.lock().room_id().unwrap().to_string();
    assert_eq!(code.len(), 6);
    assert!(ann.session.lock().is_host());

    let bob = viewer(addr, "bob", JoinIntent::JoinParty(code.clone()));
    eventually("both rosters", || ann.roster() == ["ann", "bob"] && bob.roster() == ["ann", "bob"])
        .await;
    assert!(!bob.session.lock().is_host());

    ann.connection.abort();
    ann.sync.disconnect();

    eventually("bob alone", || bob.roster() == ["bob"]).await;
    assert!(bob.session.lock().is_host());
    assert_eq!(bob.session.lock().room_id(), Some(code.as_str()));
}

#[tokio::test]
async fn unknown_party_is_reported_and_local_actions_stay_local() {
    let addr = start_relay().await;
    let ann = viewer(addr, "ann", JoinIntent::JoinParty("zzzzzz".into()));

    eventually("party error", || {
        ann.session.lock().error_message() == Some("Party not found")
    })
    .await;
    assert!(ann.sync.is_connected());

    ann.player.play().unwrap();

    eventually("not-in-room error", || {
        ann.session.lock().error_message() == Some("Not in a room")
    })
    .await;
    assert!(ann.session.lock().is_playing());
}

#[tokio::test]
async fn dropped_connection_rejoins_the_party_joined_by_hand() {
    let addr = start_relay().await;
    let ann = viewer(addr, "ann", JoinIntent::CreateParty);
    eventually("party code", || ann.session.lock().room_id().is_some()).await;
    let code = ann.session.lock().room_id().unwrap().to_string();

    let bob = viewer(addr, "bob", JoinIntent::Room("video_42".into()));
    eventually("bob in the content room", || bob.roster() == ["bob"]).await;
    bob.sync.join_party(code.clone(), Some("bob".into())).unwrap();
    eventually("both rosters", || ann.roster() == ["ann", "bob"] && bob.roster() == ["ann", "bob"])
        .await;

    bob.sync.disconnect();
    eventually("bob disconnected", || {
        bob.session.lock().status() == &ConnectionStatus::Disconnected
    })
    .await;
    assert_eq!(bob.session.lock().room_id(), None);

    eventually("bob back in the party", || {
        bob.session.lock().status() == &ConnectionStatus::Connected
            && bob.session.lock().room_id() == Some(code.as_str())
            && bob.roster() == ["ann", "bob"]
    })
    .await;
    eventually("ann's roster refreshed", || ann.roster() == ["ann", "bob"]).await;
    assert!(!bob.session.lock().is_host());

    let traffic = bob.sync.traffic();
    assert_eq!(traffic.disconnects, 1);
    assert!(traffic.connected_secs.is_some());
    assert!(!bob.connection.is_finished());
}

#[tokio::test]
async fn leaving_survives_a_reconnect() {
    let addr = start_relay().await;
    let ann = viewer(addr, "ann", JoinIntent::Room("video_42".into()));
    eventually("ann in the room", || ann.roster() == ["ann"]).await;

    ann.sync.leave_party().unwrap();
    eventually("ann left", || ann.session.lock().has_left_room()).await;

    ann.sync.disconnect();
    eventually("ann reconnected", || {
        ann.sync.traffic().disconnects == 1
            && ann.session.lock().status() == &ConnectionStatus::Connected
    })
    .await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(ann.session.lock().room_id(), None);
    assert!(ann.roster().is_empty());
}

#[tokio::test]
async fn late_guest_converges_on_the_host_state() {
    let addr = start_relay().await;
    let ann = viewer(addr, "ann", JoinIntent::CreateParty);
    eventually("party code", || ann.session.lock().room_id().is_some()).await;
    let code = ann.session.lock().room_id().unwrap().to_string();
    let bob = viewer(addr, "bob", JoinIntent::JoinParty(code));
    eventually("both rosters", || ann.roster().len() == 2 && bob.roster().len() == 2).await;

    // Bob misses the transitions themselves
    bob.player.set_ready(false);
    ann.player.seek(50.0).unwrap();
    ann.player.play().unwrap();
    eventually("ann playing", || ann.session.lock().is_playing()).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(bob.player.get_position().unwrap(), 0.0);

    bob.player.set_ready(true);
    let bob_sent = bob.sync.traffic().frames_out;
    ann.session.lock().announce_host_state();

    eventually("bob to follow the host", || {
        bob.player.is_paused().ok() == Some(false)
            && bob.player.get_position().is_ok_and(|time| (time - 50.0).abs() < 2.0)
    })
    .await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(bob.sync.traffic().frames_out, bob_sent);
    assert!(bob.session.lock().is_playing());
}

