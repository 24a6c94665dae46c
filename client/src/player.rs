use parking_lot::Mutex;
use tokio::{sync::mpsc, time::Instant};

use crate::protocol::PlaybackEvent;

/// Capabilities the session needs from a video player.
///
/// Implementations report every transport change through their own callback
/// channel, whoever caused it; telling local from remote changes is the
/// session's job.
pub trait Player: Send + Sync {
    /// False until the underlying media is loaded
    fn is_ready(&self) -> bool;
    fn play(&self) -> Result<(), String>;
    fn pause(&self) -> Result<(), String>;
    fn seek(&self, timestamp: f64) -> Result<(), String>;
    fn get_position(&self) -> Result<f64, String>;
    fn is_paused(&self) -> Result<bool, String>;
}

/// In-memory player with a running clock, used by the headless client.
pub struct SimulatedPlayer {
    state: Mutex<SimulatedState>,
    callbacks: mpsc::UnboundedSender<PlaybackEvent>,
}

struct SimulatedState {
    ready: bool,
    /// Position at `resumed_at`, or the frozen position while paused
    position: f64,
    resumed_at: Option<Instant>,
}

impl SimulatedState {
    fn position(&self) -> f64 {
        match self.resumed_at {
            Some(at) => self.position + at.elapsed().as_secs_f64(),
            None => self.position,
        }
    }
}

impl SimulatedPlayer {
    /// Returns the player and the receiving end of its callbacks.
    pub fn new(start_time: f64) -> (Self, mpsc::UnboundedReceiver<PlaybackEvent>) {
        let (callbacks, rx) = mpsc::unbounded_channel();
        let player = Self {
            state: Mutex::new(SimulatedState {
                ready: false,
                position: start_time.max(0.0),
                resumed_at: None,
            }),
            callbacks,
        };
        (player, rx)
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.lock().ready = ready;
    }

    fn notify(&self, event: PlaybackEvent) {
        let _ = self.callbacks.send(event);
    }

    fn ensure_ready(state: &SimulatedState) -> Result<(), String> {
        if state.ready {
            Ok(())
        } else {
            Err("player not ready".to_string())
        }
    }
}

impl Player for SimulatedPlayer {
    fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    fn play(&self) -> Result<(), String> {
        let time = {
            let mut state = self.state.lock();
            Self::ensure_ready(&state)?;
            if state.resumed_at.is_some() {
                return Ok(());
            }
            state.resumed_at = Some(Instant::now());
            state.position
        };
        self.notify(PlaybackEvent::Play { time });
        Ok(())
    }

    fn pause(&self) -> Result<(), String> {
        let time = {
            let mut state = self.state.lock();
            Self::ensure_ready(&state)?;
            if state.resumed_at.is_none() {
                return Ok(());
            }
            state.position = state.position();
            state.resumed_at = None;
            state.position
        };
        self.notify(PlaybackEvent::Pause { time });
        Ok(())
    }

    fn seek(&self, timestamp: f64) -> Result<(), String> {
        if !timestamp.is_finite() {
            return Err(format!("Invalid seek position: {timestamp}"));
        }
        let time = timestamp.max(0.0);
        {
            let mut state = self.state.lock();
            Self::ensure_ready(&state)?;
            state.position = time;
            if state.resumed_at.is_some() {
                state.resumed_at = Some(Instant::now());
            }
        }
        self.notify(PlaybackEvent::Seek { time });
        Ok(())
    }

    fn get_position(&self) -> Result<f64, String> {
        let state = self.state.lock();
        Self::ensure_ready(&state)?;
        Ok(state.position())
    }

    fn is_paused(&self) -> Result<bool, String> {
        let state = self.state.lock();
        Self::ensure_ready(&state)?;
        Ok(state.resumed_at.is_none())
    }
}
