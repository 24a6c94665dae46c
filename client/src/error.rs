use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Not in a room")]
    NotInRoom,
    #[error("Player error: {0}")]
    Player(String),
    #[error("Relay unavailable: {0:#}")]
    Transport(anyhow::Error),
}
