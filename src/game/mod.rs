//! Matchmaking and the per-game turn relay.

mod manager;
pub mod rules;
mod session;

pub use manager::{GameManager, LobbyStats, ALREADY_IN_GAME, NOT_IN_GAME, WAITING_MESSAGE};
pub use rules::{
    shakmaty_factory, AppliedMove, EndReason, MoveRequest, Outcome, RulesEngine, RulesFactory,
    ShakmatyRules, Side,
};
pub use session::{Notice, Session, SessionState, NOT_YOUR_TURN, OPPONENT_DISCONNECTED};
