use axum::extract::ws::{Message as AxumWsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::broker::RoomBroker;
use crate::error::BrokerError;
use crate::protocol::Message;

/// Drives one viewer connection until the socket closes, then removes the
/// session from the broker so its room hears about the departure.
pub async fn handle_connection(socket: WebSocket, broker: RoomBroker) {
    let client_id = Uuid::new_v4();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    broker.register(client_id, tx.clone());

    // Spawn task to send messages to client
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {}", e);
                    continue;
                }
            };

            if let Err(e) = ws_sender.send(AxumWsMessage::Text(json)).await {
                tracing::warn!("Failed to send message to {}: {}", client_id, e);
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(AxumWsMessage::Text(text)) => {
                if let Some(reply) = handle_message(&text, client_id, &broker) {
                    let _ = tx.send(reply);
                }
            }
            Ok(AxumWsMessage::Close(_)) => {
                tracing::info!("Client {} closing connection", client_id);
                break;
            }
            Err(e) => {
                tracing::warn!("WebSocket error from {}: {}", client_id, e);
                break;
            }
            _ => {}
        }
    }

    broker.unregister(client_id);
    send_task.abort();
}

/// Applies one inbound frame. Returns a direct reply for failures; successful
/// operations answer through the broker's own fan-out.
pub fn handle_message(text: &str, client_id: Uuid, broker: &RoomBroker) -> Option<Message> {
    let msg: Message = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!("Malformed frame from {}: {}", client_id, e);
            return Some(Message::Error {
                message: format!("Malformed message: {e}"),
            });
        }
    };

    match msg {
        Message::JoinRoom { room_id, username } => broker
            .join_room(client_id, &room_id, username)
            .err()
            .map(error_reply),

        Message::CreateParty { username } => {
            broker.create_party(client_id, username).err().map(error_reply)
        }

        Message::JoinParty { party_id, username } => broker
            .join_party(client_id, &party_id, username)
            .err()
            .map(party_error_reply),

        Message::LeaveParty => {
            let _ = broker.leave(client_id);
            Some(Message::PartyLeft)
        }

        Message::Playback { room_id, event } => match broker.relay(client_id, &room_id, event) {
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Dropped {:?} from {}: {}", event, client_id, e);
                Some(error_reply(e))
            }
        },

        Message::HostState { room_id, state } => {
            match broker.relay_host_state(client_id, &room_id, state) {
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("Dropped host state from {}: {}", client_id, e);
                    Some(error_reply(e))
                }
            }
        }

        other => {
            tracing::warn!("Unexpected message from client {}: {:?}", client_id, other);
            Some(Message::Error {
                message: "Unexpected message".to_string(),
            })
        }
    }
}

fn error_reply(e: BrokerError) -> Message {
    Message::Error {
        message: e.to_string(),
    }
}

fn party_error_reply(e: BrokerError) -> Message {
    Message::PartyError {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PlaybackEvent, PlaybackState};

    fn frame(msg: &Message) -> String {
        serde_json::to_string(msg).unwrap()
    }

    #[test]
    fn malformed_frame_gets_error_reply() {
        let broker = RoomBroker::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        broker.register(id, tx);

        let reply = handle_message("{not json", id, &broker);

        assert!(matches!(reply, Some(Message::Error { .. })));
        assert_eq!(broker.session_count(), 1);
    }

    #[test]
    fn playback_outside_room_is_reported_not_fatal() {
        let broker = RoomBroker::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        broker.register(id, tx);

        let reply = handle_message(
            &frame(&Message::Playback {
                room_id: "video_3".into(),
                event: PlaybackEvent::Play { time: 4.0 },
            }),
            id,
            &broker,
        );

        assert_eq!(
            reply,
            Some(Message::Error {
                message: "Not in a room".into()
            })
        );
    }

    #[test]
    fn unknown_party_yields_party_error() {
        let broker = RoomBroker::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        broker.register(id, tx);

        let reply = handle_message(
            &frame(&Message::JoinParty {
                party_id: "abc123".into(),
                username: None,
            }),
            id,
            &broker,
        );

        assert_eq!(
            reply,
            Some(Message::PartyError {
                message: "Party not found".into()
            })
        );
    }

    #[test]
    fn leave_is_acknowledged_even_outside_a_room() {
        let broker = RoomBroker::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        broker.register(id, tx);

        let reply = handle_message(&frame(&Message::LeaveParty), id, &broker);

        assert_eq!(reply, Some(Message::PartyLeft));
    }

    #[test]
    fn guest_host_state_is_refused() {
        let broker = RoomBroker::new();
        let (host_tx, _host_rx) = mpsc::unbounded_channel();
        let (guest_tx, _guest_rx) = mpsc::unbounded_channel();
        let (host, guest) = (Uuid::new_v4(), Uuid::new_v4());
        broker.register(host, host_tx);
        broker.register(guest, guest_tx);
        let party_id = broker.create_party(host, None).unwrap().room_id;
        broker.join_party(guest, &party_id, None).unwrap();

        let reply = handle_message(
            &frame(&Message::HostState {
                room_id: party_id,
                state: PlaybackState {
                    is_playing: false,
                    time: 3.0,
                },
            }),
            guest,
            &broker,
        );

        assert_eq!(
            reply,
            Some(Message::Error {
                message: "Only the host controls playback".into()
            })
        );
    }
}
