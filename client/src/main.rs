use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};

use watchparty_client::{
    connection::{run_connection_loop, ConnectionPlan, JoinIntent, ReconnectPolicy},
    constants::{LOCAL_WS_URL, VERSION},
    identity::IdentityStore,
    player::{Player, SimulatedPlayer},
    room::{build_party_link, content_id_from_url, origin_of, ROOM_PREFIX},
    session::{spawn_host_sync, spawn_player_pump, spawn_time_sampler, SharedSession},
    SessionController, SyncClient,
};

const DEFAULT_ORIGIN: &str = "http://localhost:3000";

const HELP: &str = "\
commands:
  play | pause | seek <seconds>   control the local player
  join <code>                     join a party by code
  leave                           leave the current room
  status                          show room, members and connection
  link                            print the shareable party link
  reconnect                       retry the relay after giving up
  quit";

type Session = SharedSession<SimulatedPlayer, SyncClient>;

#[derive(Debug, Parser)]
#[command(name = "watchparty-client", version)]
#[command(about = "Headless viewer that keeps a player in sync through the watch-party relay")]
struct Cli {
    /// Page being watched; a party page joins the party in its fragment
    #[arg(value_name = "PAGE_URL")]
    page: Option<String>,

    /// Create a new party and host it
    #[arg(long, conflicts_with = "join_party")]
    create_party: bool,

    #[arg(long, value_name = "CODE")]
    join_party: Option<String>,

    /// Display name; overrides the persisted one
    #[arg(long, env = "WATCHPARTY_USERNAME")]
    name: Option<String>,

    /// WebSocket endpoint of the relay
    #[arg(long, env = "WATCHPARTY_RELAY_URL", default_value = LOCAL_WS_URL)]
    relay: String,

    /// Starting position of the player, in seconds
    #[arg(long, default_value_t = 0.0, value_parser = parse_seconds)]
    start: f64,
}

impl Cli {
    fn intent(&self) -> Result<JoinIntent> {
        if let Some(code) = &self.join_party {
            return Ok(JoinIntent::JoinParty(code.trim().to_string()));
        }
        if self.create_party {
            return Ok(JoinIntent::CreateParty);
        }
        self.page
            .as_deref()
            .and_then(JoinIntent::from_page)
            .context("Nothing to join: pass a page URL, --create-party or --join-party CODE")
    }
}

/// A playback position: finite and not negative.
fn parse_seconds(value: &str) -> Result<f64, String> {
    let seconds: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("not a number of seconds: {value}"))?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(format!("not a playback position: {value}"));
    }
    Ok(seconds)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "watchparty_client=debug,info".into()),
        )
        .init();

    tracing::info!("watchparty-client v{}", VERSION);

    let args = Cli::parse();
    let intent = args.intent()?;
    let username = IdentityStore::new().resolve(args.name.clone());
    let mut plan = ConnectionPlan {
        relay_url: args.relay.clone(),
        username,
        intent,
        policy: ReconnectPolicy::default(),
    };
    tracing::info!("Watching as {} via {}", plan.username, plan.relay_url);
    let username = plan.username.clone();

    let (player, callbacks) = SimulatedPlayer::new(args.start);
    player.set_ready(true);
    let player = Arc::new(player);

    let sync = SyncClient::new();
    let session = SessionController::new(Arc::clone(&player), sync.clone()).shared();
    spawn_player_pump(Arc::clone(&session), callbacks);
    spawn_time_sampler(Arc::clone(&session));
    spawn_host_sync(Arc::clone(&session));

    let (reconnect_tx, mut reconnect_rx) = mpsc::unbounded_channel::<()>();
    let supervisor = {
        let sync = sync.clone();
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            loop {
                let attempts = run_connection_loop(
                    sync.clone(),
                    Arc::clone(&session),
                    &mut plan,
                    &mut reconnect_rx,
                )
                .await;
                println!("Relay unavailable after {attempts} attempts; type `reconnect` to retry");
                if reconnect_rx.recv().await.is_none() {
                    break;
                }
            }
        })
    };

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };
        let arg = words.next();
        match command {
            "play" => report(player.play()),
            "pause" => report(player.pause()),
            "seek" => match arg.map(parse_seconds) {
                Some(Ok(time)) => report(player.seek(time)),
                Some(Err(e)) => println!("Error: {e}"),
                None => println!("usage: seek <seconds>"),
            },
            "join" => match arg {
                Some(code) => report(
                    sync.join_party(code.to_string(), Some(username.clone()))
                        .map_err(|e| format!("{e:#}")),
                ),
                None => println!("usage: join <code>"),
            },
            "leave" => report(sync.leave_party().map_err(|e| format!("{e:#}"))),
            "status" => print_status(&session, &sync),
            "link" => print_link(&session, args.page.as_deref()),
            "reconnect" => {
                if sync.is_connected() {
                    println!("Already connected");
                } else {
                    let _ = reconnect_tx.send(());
                }
            }
            "quit" | "exit" => break,
            "help" => println!("{HELP}"),
            other => println!("Unknown command: {other} (try `help`)"),
        }
    }

    sync.disconnect();
    supervisor.abort();
    Ok(())
}

fn report(result: Result<(), String>) {
    if let Err(e) = result {
        println!("Error: {e}");
    }
}

fn print_status(session: &Session, sync: &SyncClient) {
    let session = session.lock();
    println!("Status: {} ({:?})", session.status_message(), session.status());
    match session.room_id() {
        Some(room_id) => println!(
            "Room: {room_id}{}",
            if session.is_host() { " (host)" } else { "" }
        ),
        None => println!("Room: none"),
    }
    for member in session.members() {
        println!(
            "  - {}{}",
            member.display_name,
            if member.is_host { " [host]" } else { "" }
        );
    }
    println!(
        "Time: {:.1}s ({})",
        session.current_time(),
        if session.is_playing() { "playing" } else { "paused" }
    );
    if let Some(error) = session.error_message() {
        println!("Last error: {error}");
    }

    let traffic = sync.traffic();
    println!(
        "Relay: {} ({} frames out / {} in, rtt {})",
        traffic.endpoint.as_deref().unwrap_or("none"),
        traffic.frames_out,
        traffic.frames_in,
        traffic
            .rtt_ms
            .map(|rtt| format!("{rtt:.0} ms"))
            .unwrap_or_else(|| "n/a".to_string())
    );
}

fn print_link(session: &Session, page: Option<&str>) {
    let session = session.lock();
    let Some(code) = session.room_id().filter(|room| !room.starts_with(ROOM_PREFIX)) else {
        println!("Not in a party");
        return;
    };
    let origin = page
        .and_then(origin_of)
        .unwrap_or_else(|| DEFAULT_ORIGIN.to_string());
    let video_id = page
        .and_then(content_id_from_url)
        .unwrap_or_else(|| "watch".to_string());
    println!("{}", build_party_link(&origin, &video_id, code));
}
