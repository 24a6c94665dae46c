//! Session client for synchronized watch parties.
//!
//! A [`SyncClient`] owns the socket to the relay, a [`SessionController`]
//! sits between it and the local [`Player`], and
//! [`connection::run_connection_loop`] keeps the two connected and joined.

pub mod connection;
pub mod constants;
pub mod error;
pub mod identity;
pub mod player;
pub mod protocol;
pub mod room;
pub mod session;
pub mod sync;

pub use error::ClientError;
pub use player::{Player, SimulatedPlayer};
pub use session::{ConnectionStatus, Origin, PlaybackSink, SessionController};
pub use sync::SyncClient;
