use std::collections::HashMap;
use std::sync::Arc;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::game::rules::{MoveRequest, RulesFactory, Side};
use crate::game::session::{Notice, Session};
use crate::websocket::{ConnectionPool, ServerMessage, WaitingPayload};

pub const NOT_IN_GAME: &str = "You are not in any active game!";
pub const ALREADY_IN_GAME: &str = "You are already in an active game!";
pub const WAITING_MESSAGE: &str = "You are White. Waiting for an opponent to join...";

/// Matchmaking and session bookkeeping. Guarded as a whole by one mutex.
#[derive(Default)]
struct Lobby {
    waiting: Option<Uuid>,
    sessions: HashMap<Uuid, Session>,
    membership: HashMap<Uuid, Uuid>,
}

impl Lobby {
    fn session_of(&mut self, connection: Uuid) -> Option<&mut Session> {
        let game_id = self.membership.get(&connection)?;
        self.sessions.get_mut(game_id)
    }

    fn remove_session(&mut self, game_id: Uuid) -> Option<Session> {
        let session = self.sessions.remove(&game_id)?;
        self.membership.remove(&session.white());
        self.membership.remove(&session.black());
        Some(session)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyStats {
    pub connections: usize,
    pub active_games: usize,
    pub player_waiting: bool,
}

/// Shared entry point for every connection task: pairs players, owns the
/// running sessions and routes their notices through the connection pool.
pub struct GameManager {
    pool: Arc<ConnectionPool>,
    rules: RulesFactory,
    lobby: Mutex<Lobby>,
}

impl GameManager {
    pub fn new(pool: Arc<ConnectionPool>, rules: RulesFactory) -> Self {
        Self {
            pool,
            rules,
            lobby: Mutex::new(Lobby::default()),
        }
    }

    pub async fn connect(&self, id: Uuid, sender: mpsc::UnboundedSender<Message>) {
        self.pool.add(id, sender).await;
    }

    /// Drops the connection from the registry, the waiting slot and any
    /// session it was playing in.
    pub async fn disconnect(&self, id: Uuid) {
        let mut lobby = self.lobby.lock().await;
        self.pool.remove(&id).await;

        if lobby.waiting == Some(id) {
            lobby.waiting = None;
            info!(connection_id = %id, "Waiting player left");
        }

        let Some(game_id) = lobby.membership.get(&id).copied() else {
            return;
        };
        if let Some(mut session) = lobby.remove_session(game_id) {
            let notices = session.end_for_disconnect(id);
            info!(
                game_id = %game_id,
                connection_id = %id,
                moves = session.move_count(),
                duration_secs = (Utc::now() - session.started_at()).num_seconds(),
                "Game ended by disconnect"
            );
            self.dispatch(notices).await;
        }
    }

    pub async fn request_match(&self, id: Uuid) {
        let mut lobby = self.lobby.lock().await;

        if !self.pool.contains(&id).await {
            debug!(connection_id = %id, "Ignoring match request from unregistered connection");
            return;
        }

        if lobby.membership.contains_key(&id) {
            self.notify(id, ServerMessage::error(ALREADY_IN_GAME)).await;
            return;
        }

        match lobby.waiting.filter(|waiting| *waiting != id) {
            Some(waiting) => {
                lobby.waiting = None;
                let session = Session::new(waiting, id, (self.rules)());
                let game_id = session.id();
                let notices = session.start();
                lobby.membership.insert(waiting, game_id);
                lobby.membership.insert(id, game_id);
                lobby.sessions.insert(game_id, session);
                info!(game_id = %game_id, white = %waiting, black = %id, "Starting new game");
                self.dispatch(notices).await;
            }
            None => {
                lobby.waiting = Some(id);
                debug!(connection_id = %id, "Player waiting for opponent");
                self.notify(
                    id,
                    ServerMessage::WaitingForOpponent(WaitingPayload {
                        color: Side::White,
                        message: WAITING_MESSAGE.to_string(),
                    }),
                )
                .await;
            }
        }
    }

    /// Frees the waiting slot if `id` holds it. Returns whether it did.
    pub async fn cancel_wait(&self, id: Uuid) -> bool {
        let mut lobby = self.lobby.lock().await;
        if lobby.waiting == Some(id) {
            lobby.waiting = None;
            true
        } else {
            false
        }
    }

    pub async fn submit_move(&self, id: Uuid, request: MoveRequest) {
        let mut lobby = self.lobby.lock().await;
        let Some(session) = lobby.session_of(id) else {
            self.notify(id, ServerMessage::error(NOT_IN_GAME)).await;
            return;
        };

        let notices = session.submit_move(id, &request);
        let finished = (!session.is_active()).then(|| session.id());
        if let Some(game_id) = finished {
            lobby.remove_session(game_id);
            info!(game_id = %game_id, "Removed finished game");
        }
        self.dispatch(notices).await;
    }

    pub async fn query_legal_moves(&self, id: Uuid, square: &str) {
        let mut lobby = self.lobby.lock().await;
        let notice = match lobby.session_of(id) {
            Some(session) => session.query_legal_moves(id, square),
            None => Notice::to(id, ServerMessage::error(NOT_IN_GAME)),
        };
        self.dispatch(vec![notice]).await;
    }

    pub async fn notify(&self, id: Uuid, msg: ServerMessage) {
        self.pool.deliver(&id, &msg).await;
    }

    async fn dispatch(&self, notices: Vec<Notice>) {
        for notice in notices {
            match notice.recipients.as_slice() {
                [single] => {
                    self.pool.deliver(single, &notice.message).await;
                }
                many => {
                    if let Err(e) = self.pool.send_to_many(many, &notice.message).await {
                        error!(error = %e, "Failed to broadcast game message");
                    }
                }
            }
        }
    }

    pub async fn stats(&self) -> LobbyStats {
        let lobby = self.lobby.lock().await;
        LobbyStats {
            connections: self.pool.connection_count().await,
            active_games: lobby.sessions.len(),
            player_waiting: lobby.waiting.is_some(),
        }
    }

    pub async fn waiting(&self) -> Option<Uuid> {
        self.lobby.lock().await.waiting
    }

    pub async fn game_of(&self, id: Uuid) -> Option<Uuid> {
        self.lobby.lock().await.membership.get(&id).copied()
    }

    pub async fn move_count(&self, id: Uuid) -> Option<u32> {
        self.lobby.lock().await.session_of(id).map(|s| s.move_count())
    }
}
