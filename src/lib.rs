pub mod config;
pub mod error;
pub mod game;
pub mod websocket;

use std::sync::Arc;
use actix_web::{web, HttpResponse};

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

pub use game::{GameManager, RulesEngine, ShakmatyRules};
pub use websocket::{ConnectionPool, WebSocketServer};

/// Health check endpoint handler
/// Returns a JSON response with server status, timestamp and lobby counters
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let stats = state.games.stats().await;

    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "connections": stats.connections,
        "activeGames": stats.active_games,
        "playerWaiting": stats.player_waiting,
    }))
}

/// Application state shared across all components
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub games: Arc<GameManager>,
}

impl AppState {
    pub fn new(config: Settings) -> Self {
        let pool = Arc::new(ConnectionPool::new());
        Self::with_rules(config, pool, game::shakmaty_factory())
    }

    pub fn with_rules(config: Settings, pool: Arc<ConnectionPool>, rules: game::RulesFactory) -> Self {
        Self {
            config: Arc::new(config),
            games: Arc::new(GameManager::new(pool, rules)),
        }
    }

    pub fn websocket_server(&self) -> Arc<WebSocketServer> {
        Arc::new(WebSocketServer::new(self.games.clone()))
    }
}
