//! Chess rules capability used by sessions.
//!
//! The relay never inspects positions itself. Everything it needs to know
//! about the game (legality, check, terminal conditions, notation) comes
//! through [`RulesEngine`], and [`ShakmatyRules`] is the production
//! implementation backed by the `shakmaty` crate.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::{Chess, Color, EnPassantMode, File, Move, Position, Role, Square};

use crate::error::RuleError;

/// Side of the board. The first matched connection always plays white.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl Side {
    /// Side to move after `move_count` half-moves from the initial position.
    pub fn for_move_count(move_count: u32) -> Self {
        if move_count % 2 == 0 {
            Side::White
        } else {
            Side::Black
        }
    }

    pub fn opponent(self) -> Self {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::White => f.write_str("white"),
            Side::Black => f.write_str("black"),
        }
    }
}

impl From<Color> for Side {
    fn from(color: Color) -> Self {
        match color {
            Color::White => Side::White,
            Color::Black => Side::Black,
        }
    }
}

/// A move as submitted by a client: algebraic squares plus an optional
/// promotion piece letter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<String>,
}

impl MoveRequest {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            promotion: None,
        }
    }

    pub fn with_promotion(mut self, piece: impl Into<String>) -> Self {
        self.promotion = Some(piece.into());
        self
    }

    /// Both squares must be present before the engine is consulted.
    pub fn is_well_formed(&self) -> bool {
        !self.from.trim().is_empty() && !self.to.trim().is_empty()
    }
}

/// A move the engine accepted, echoed back to both players.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMove {
    pub from: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promotion: Option<String>,
    pub san: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    #[serde(rename = "checkmate")]
    Checkmate,
    #[serde(rename = "stalemate")]
    Stalemate,
    #[serde(rename = "insufficient material")]
    InsufficientMaterial,
    #[serde(rename = "threefold repetition")]
    ThreefoldRepetition,
    #[serde(rename = "fifty-move rule")]
    FiftyMoveRule,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            EndReason::Checkmate => "checkmate",
            EndReason::Stalemate => "stalemate",
            EndReason::InsufficientMaterial => "insufficient material",
            EndReason::ThreefoldRepetition => "threefold repetition",
            EndReason::FiftyMoveRule => "fifty-move rule",
        };
        f.write_str(text)
    }
}

/// Terminal result of a game. `winner` is `None` for every kind of draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub winner: Option<Side>,
    pub reason: EndReason,
}

impl Outcome {
    pub fn decisive(winner: Side, reason: EndReason) -> Self {
        Self { winner: Some(winner), reason }
    }

    pub fn draw(reason: EndReason) -> Self {
        Self { winner: None, reason }
    }
}

/// Per-game rules capability. One instance lives inside each session and
/// tracks that game's position and history.
#[cfg_attr(test, mockall::automock)]
pub trait RulesEngine: Send {
    /// Current position in FEN.
    fn position(&self) -> String;

    fn is_check(&self) -> bool;

    /// Plays `request` if it is legal, leaving the position untouched otherwise.
    fn apply_move(&mut self, request: &MoveRequest) -> Result<AppliedMove, RuleError>;

    /// Legal destination squares for the piece on `square`.
    fn legal_moves(&self, square: &str) -> Result<Vec<String>, RuleError>;

    /// Every legal move for the side to move, in SAN.
    fn possible_moves(&self) -> Vec<String>;

    /// Played moves in SAN, oldest first.
    fn history(&self) -> Vec<String>;

    fn terminal_status(&self) -> Option<Outcome>;
}

/// Builds a fresh engine for every new session.
pub type RulesFactory = Arc<dyn Fn() -> Box<dyn RulesEngine> + Send + Sync>;

pub fn shakmaty_factory() -> RulesFactory {
    Arc::new(|| Box::new(ShakmatyRules::new()) as Box<dyn RulesEngine>)
}

/// Standard chess rules from the `shakmaty` crate, with the repetition
/// bookkeeping the crate leaves to callers.
#[derive(Debug, Clone)]
pub struct ShakmatyRules {
    position: Chess,
    history: Vec<String>,
    repetitions: HashMap<String, u32>,
}

impl Default for ShakmatyRules {
    fn default() -> Self {
        Self::new()
    }
}

impl ShakmatyRules {
    pub fn new() -> Self {
        Self::from_position(Chess::default())
    }

    /// Starts from an arbitrary legal position, e.g. for endgame tests.
    pub fn from_position(position: Chess) -> Self {
        let mut rules = Self {
            position,
            history: Vec::new(),
            repetitions: HashMap::new(),
        };
        rules.record_position();
        rules
    }

    /// Side to move according to the position itself.
    pub fn turn(&self) -> Side {
        self.position.turn().into()
    }

    fn fen(&self) -> String {
        Fen::from_position(self.position.clone(), EnPassantMode::Legal).to_string()
    }

    /// FEN without the halfmove and fullmove clocks, so identical positions
    /// reached at different times compare equal.
    fn repetition_key(&self) -> String {
        self.fen()
            .split_whitespace()
            .take(4)
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn record_position(&mut self) {
        let key = self.repetition_key();
        *self.repetitions.entry(key).or_insert(0) += 1;
    }

    fn is_threefold_repetition(&self) -> bool {
        self.repetitions
            .get(&self.repetition_key())
            .is_some_and(|count| *count >= 3)
    }

    fn find_move(&self, request: &MoveRequest) -> Result<Move, RuleError> {
        let from = parse_square(&request.from)?;
        let to = parse_square(&request.to)?;
        let promotion = match request.promotion.as_deref() {
            Some(piece) => Some(parse_promotion(piece)?),
            None => None,
        };

        let candidates: Vec<Move> = self
            .position
            .legal_moves()
            .into_iter()
            .filter(|m| m.from() == Some(from) && destination(m) == to)
            .collect();

        candidates
            .iter()
            .find(|m| match m.promotion() {
                Some(role) => role == promotion.unwrap_or(Role::Queen),
                None => true,
            })
            .cloned()
            .ok_or_else(|| RuleError::IllegalMove {
                from: request.from.clone(),
                to: request.to.clone(),
            })
    }
}

impl RulesEngine for ShakmatyRules {
    fn position(&self) -> String {
        self.fen()
    }

    fn is_check(&self) -> bool {
        self.position.is_check()
    }

    fn apply_move(&mut self, request: &MoveRequest) -> Result<AppliedMove, RuleError> {
        let m = self.find_move(request)?;
        // plays the move and appends the check or mate suffix
        let san = SanPlus::from_move_and_play_unchecked(&mut self.position, &m).to_string();
        let applied = AppliedMove {
            from: square_name(m.from().unwrap_or_else(|| m.to())),
            to: square_name(destination(&m)),
            promotion: m.promotion().map(|role| role.char().to_string()),
            san: san.clone(),
        };

        self.history.push(san);
        self.record_position();
        Ok(applied)
    }

    fn legal_moves(&self, square: &str) -> Result<Vec<String>, RuleError> {
        let from = parse_square(square)?;
        let mut moves: Vec<String> = Vec::new();
        for m in self.position.legal_moves().iter() {
            if m.from() != Some(from) {
                continue;
            }
            let to = square_name(destination(m));
            // promotions yield one entry per piece on the same square
            if !moves.contains(&to) {
                moves.push(to);
            }
        }
        Ok(moves)
    }

    fn possible_moves(&self) -> Vec<String> {
        self.position
            .legal_moves()
            .iter()
            .map(|m| SanPlus::from_move(self.position.clone(), m).to_string())
            .collect()
    }

    fn history(&self) -> Vec<String> {
        self.history.clone()
    }

    fn terminal_status(&self) -> Option<Outcome> {
        if self.position.is_checkmate() {
            let loser = Side::from(self.position.turn());
            return Some(Outcome::decisive(loser.opponent(), EndReason::Checkmate));
        }
        if self.position.is_stalemate() {
            return Some(Outcome::draw(EndReason::Stalemate));
        }
        if self.position.is_insufficient_material() {
            return Some(Outcome::draw(EndReason::InsufficientMaterial));
        }
        if self.is_threefold_repetition() {
            return Some(Outcome::draw(EndReason::ThreefoldRepetition));
        }
        if self.position.halfmoves() >= 100 {
            return Some(Outcome::draw(EndReason::FiftyMoveRule));
        }
        None
    }
}

fn parse_square(name: &str) -> Result<Square, RuleError> {
    name.trim()
        .to_ascii_lowercase()
        .parse::<Square>()
        .map_err(|_| RuleError::InvalidSquare(name.to_string()))
}

fn parse_promotion(piece: &str) -> Result<Role, RuleError> {
    let mut chars = piece.trim().chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => match Role::from_char(c.to_ascii_lowercase()) {
            Some(role @ (Role::Queen | Role::Rook | Role::Bishop | Role::Knight)) => Ok(role),
            _ => Err(RuleError::InvalidPromotion(piece.to_string())),
        },
        _ => Err(RuleError::InvalidPromotion(piece.to_string())),
    }
}

/// Where the moving piece lands. Castling is addressed by the king's target
/// square rather than the rook square `shakmaty` uses internally.
fn destination(m: &Move) -> Square {
    match *m {
        Move::Castle { king, rook } => {
            let file = if rook.file() > king.file() { File::G } else { File::C };
            Square::from_coords(file, king.rank())
        }
        _ => m.to(),
    }
}

fn square_name(square: Square) -> String {
    square.to_string()
}
