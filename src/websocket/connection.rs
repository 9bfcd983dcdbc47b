use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::WebSocketError;
use crate::game::{AppliedMove, GameManager, MoveRequest, Side};

pub const INVALID_FORMAT_HINT: &str = "Invalid JSON format. Expected: {\"type\": \"init_game\"} or {\"type\": \"move\", \"move\": {\"from\": \"e2\", \"to\": \"e4\"}}";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "init_game")]
    InitGame,
    #[serde(rename = "move")]
    Move {
        #[serde(rename = "move")]
        mv: MoveRequest,
    },
    #[serde(rename = "get_valid_moves")]
    GetValidMoves {
        #[serde(default)]
        square: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    #[serde(rename = "init_game")]
    InitGame(InitGamePayload),
    #[serde(rename = "move")]
    Move(MovePayload),
    #[serde(rename = "ERROR")]
    Error(ErrorPayload),
    #[serde(rename = "VALID_MOVES")]
    ValidMoves(ValidMovesPayload),
    #[serde(rename = "WAITING_FOR_OPPONENT")]
    WaitingForOpponent(WaitingPayload),
    #[serde(rename = "GAME_OVER")]
    GameOver(GameOverPayload),
    #[serde(rename = "GAME_ENDED")]
    GameEnded(GameEndedPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitGamePayload {
    pub color: Side,
    pub game_id: Uuid,
    pub board: String,
    pub turn: Side,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MovePayload {
    #[serde(rename = "move")]
    pub mv: AppliedMove,
    pub board: String,
    pub turn: Side,
    pub is_check: bool,
    pub move_count: u32,
    pub history: Vec<String>,
    pub possible_moves: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub possible_moves: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidMovesPayload {
    pub square: String,
    pub moves: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitingPayload {
    pub color: Side,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameOverPayload {
    pub winner: Option<Side>,
    pub reason: String,
    pub board: String,
    pub history: Vec<String>,
    pub final_position: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameEndedPayload {
    pub reason: String,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorPayload {
            message: message.into(),
            possible_moves: None,
            board: None,
        })
    }

    pub fn to_text(&self) -> Result<String, WebSocketError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Inbound side of one client socket. Every frame is handled to completion
/// before the next one is read.
pub struct Connection {
    id: Uuid,
    games: Arc<GameManager>,
}

impl Connection {
    pub fn new(id: Uuid, games: Arc<GameManager>) -> Self {
        Self { id, games }
    }

    /// Returns an error only when the socket should be closed.
    pub async fn handle_message(&mut self, msg: Message) -> Result<(), WebSocketError> {
        match msg {
            Message::Text(text) => {
                self.handle_text(&text).await;
            }
            Message::Binary(bin) => {
                debug!(connection_id = %self.id, bytes = bin.len(), "Binary frame rejected");
                self.games
                    .notify(self.id, ServerMessage::error("Binary messages are not supported"))
                    .await;
            }
            Message::Close(frame) => {
                info!(connection_id = %self.id, ?frame, "Client initiated close");
                return Err(WebSocketError::ConnectionError("Connection closed by client".to_string()));
            }
            // tungstenite answers pings on its own
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
        Ok(())
    }

    async fn handle_text(&mut self, text: &str) {
        let client_msg = match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(connection_id = %self.id, error = %e, "Failed to parse client message");
                self.games
                    .notify(self.id, ServerMessage::error(INVALID_FORMAT_HINT))
                    .await;
                return;
            }
        };

        debug!(connection_id = %self.id, message = ?client_msg, "Received message");

        match client_msg {
            ClientMessage::InitGame => self.games.request_match(self.id).await,
            ClientMessage::Move { mv } => self.games.submit_move(self.id, mv).await,
            ClientMessage::GetValidMoves { square } => {
                self.games.query_legal_moves(self.id, &square).await
            }
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}
