use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::RuleError;
use crate::game::rules::{MoveRequest, RulesEngine, Side};
use crate::websocket::{
    ErrorPayload, GameEndedPayload, GameOverPayload, InitGamePayload, MovePayload, ServerMessage,
    ValidMovesPayload,
};

pub const NOT_YOUR_TURN: &str = "It's not your turn!";
pub const INVALID_MOVE_FORMAT: &str = "Invalid move format. Expected: {\"from\": \"e2\", \"to\": \"e4\"}";
pub const OPPONENT_DISCONNECTED: &str = "Player disconnected";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Terminated,
}

/// A message addressed to one or more connections.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub recipients: Vec<Uuid>,
    pub message: ServerMessage,
}

impl Notice {
    pub fn to(connection: Uuid, message: ServerMessage) -> Self {
        Self {
            recipients: vec![connection],
            message,
        }
    }
}

/// Two paired connections and the game between them.
///
/// Sessions never touch sockets. Every operation returns the notices it
/// wants delivered and the game manager routes them.
pub struct Session {
    id: Uuid,
    white: Uuid,
    black: Uuid,
    engine: Box<dyn RulesEngine>,
    move_count: u32,
    state: SessionState,
    started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(white: Uuid, black: Uuid, engine: Box<dyn RulesEngine>) -> Self {
        Self {
            id: Uuid::new_v4(),
            white,
            black,
            engine,
            move_count: 0,
            state: SessionState::Active,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn white(&self) -> Uuid {
        self.white
    }

    pub fn black(&self) -> Uuid {
        self.black
    }

    pub fn move_count(&self) -> u32 {
        self.move_count
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Whose turn it is, derived from the session's own move counter.
    pub fn turn(&self) -> Side {
        Side::for_move_count(self.move_count)
    }

    pub fn side_of(&self, connection: Uuid) -> Option<Side> {
        if connection == self.white {
            Some(Side::White)
        } else if connection == self.black {
            Some(Side::Black)
        } else {
            None
        }
    }

    pub fn opponent_of(&self, connection: Uuid) -> Option<Uuid> {
        match self.side_of(connection)? {
            Side::White => Some(self.black),
            Side::Black => Some(self.white),
        }
    }

    fn players(&self) -> Vec<Uuid> {
        vec![self.white, self.black]
    }

    /// `init_game` notices announcing colors and the starting position.
    pub fn start(&self) -> Vec<Notice> {
        let board = self.engine.position();
        [(self.white, Side::White), (self.black, Side::Black)]
            .into_iter()
            .map(|(connection, color)| {
                Notice::to(
                    connection,
                    ServerMessage::InitGame(InitGamePayload {
                        color,
                        game_id: self.id,
                        board: board.clone(),
                        turn: self.turn(),
                        message: format!("Game started! You are {}.", color),
                    }),
                )
            })
            .collect()
    }

    pub fn submit_move(&mut self, connection: Uuid, request: &MoveRequest) -> Vec<Notice> {
        if !self.is_active() {
            return vec![Notice::to(connection, ServerMessage::error("This game has already ended"))];
        }

        if self.side_of(connection) != Some(self.turn()) {
            debug!(game_id = %self.id, connection_id = %connection, "Move submitted out of turn");
            return vec![Notice::to(connection, ServerMessage::error(NOT_YOUR_TURN))];
        }

        if !request.is_well_formed() {
            return vec![Notice::to(connection, ServerMessage::error(INVALID_MOVE_FORMAT))];
        }

        let applied = match self.engine.apply_move(request) {
            Ok(applied) => applied,
            Err(e) => return vec![Notice::to(connection, self.rejection(request, e))],
        };

        self.move_count += 1;
        info!(
            game_id = %self.id,
            san = %applied.san,
            move_count = self.move_count,
            "Move accepted"
        );

        let board = self.engine.position();
        let history = self.engine.history();
        let mut notices = vec![Notice {
            recipients: self.players(),
            message: ServerMessage::Move(MovePayload {
                mv: applied,
                board: board.clone(),
                turn: self.turn(),
                is_check: self.engine.is_check(),
                move_count: self.move_count,
                history: history.clone(),
                possible_moves: self.engine.possible_moves(),
            }),
        }];

        if let Some(outcome) = self.engine.terminal_status() {
            self.state = SessionState::Terminated;
            info!(
                game_id = %self.id,
                winner = ?outcome.winner,
                reason = %outcome.reason,
                "Game over"
            );
            notices.push(Notice {
                recipients: self.players(),
                message: ServerMessage::GameOver(GameOverPayload {
                    winner: outcome.winner,
                    reason: outcome.reason.to_string(),
                    board: board.clone(),
                    history,
                    final_position: board,
                }),
            });
        }

        notices
    }

    /// Error reply for a move the engine refused, with the legal
    /// destinations of the source square when it can be resolved.
    fn rejection(&self, request: &MoveRequest, error: RuleError) -> ServerMessage {
        debug!(game_id = %self.id, error = %error, "Move rejected");
        ServerMessage::Error(ErrorPayload {
            message: format!("Invalid move: {}", error),
            possible_moves: self.engine.legal_moves(&request.from).ok(),
            board: Some(self.engine.position()),
        })
    }

    pub fn query_legal_moves(&self, connection: Uuid, square: &str) -> Notice {
        let message = match self.engine.legal_moves(square) {
            Ok(moves) => ServerMessage::ValidMoves(ValidMovesPayload {
                square: square.to_string(),
                moves,
            }),
            Err(e) => ServerMessage::error(e.to_string()),
        };
        Notice::to(connection, message)
    }

    /// Ends the game because `connection` went away. The surviving player
    /// gets a single `GAME_ENDED`; a session that already ended sends nothing.
    pub fn end_for_disconnect(&mut self, connection: Uuid) -> Vec<Notice> {
        if !self.is_active() {
            return Vec::new();
        }
        let Some(survivor) = self.opponent_of(connection) else {
            return Vec::new();
        };
        self.state = SessionState::Terminated;
        vec![Notice::to(
            survivor,
            ServerMessage::GameEnded(GameEndedPayload {
                reason: OPPONENT_DISCONNECTED.to_string(),
            }),
        )]
    }
}
