//! WebSocket module for the chess relay server
//!
//! This module accepts client sockets, parses the JSON protocol and keeps
//! the registry of live connections.

mod connection;
mod pool;
mod server;

pub use connection::{
    ClientMessage, Connection, ErrorPayload, GameEndedPayload, GameOverPayload, InitGamePayload,
    MovePayload, ServerMessage, ValidMovesPayload, WaitingPayload, INVALID_FORMAT_HINT,
};
pub use pool::ConnectionPool;
pub use server::WebSocketServer;
