use thiserror::Error;

/// Failures a session can provoke; none of them close the connection.
#[derive(Debug, Error, PartialEq)]
pub enum BrokerError {
    #[error("Party not found")]
    PartyNotFound(String),
    #[error("Not in a room")]
    NotInRoom,
    #[error("Not a member of room {claimed} (current room: {actual})")]
    RoomMismatch { claimed: String, actual: String },
    #[error("Only the host controls playback")]
    NotHost,
    #[error("Unknown session")]
    UnknownSession,
}
