use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;
use crate::error::WebSocketError;
use crate::websocket::ServerMessage;
use tracing::{error, info, warn};

/// Registry of live connections and their outbound frame channels.
#[derive(Debug, Default)]
pub struct ConnectionPool {
    connections: Arc<RwLock<HashMap<Uuid, mpsc::UnboundedSender<Message>>>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn add(&self, id: Uuid, sender: mpsc::UnboundedSender<Message>) {
        self.connections.write().await.insert(id, sender);
        info!(connection_id = %id, "Added connection to pool");
    }

    pub async fn remove(&self, id: &Uuid) -> bool {
        let removed = self.connections.write().await.remove(id).is_some();
        if removed {
            info!(connection_id = %id, "Removed connection from pool");
        }
        removed
    }

    pub async fn contains(&self, id: &Uuid) -> bool {
        self.connections.read().await.contains_key(id)
    }

    pub async fn send_to(&self, id: &Uuid, msg: &ServerMessage) -> Result<(), WebSocketError> {
        let text = msg.to_text()?;
        if let Some(sender) = self.connections.read().await.get(id) {
            sender
                .send(Message::Text(text))
                .map_err(|e| WebSocketError::SendError(e.to_string()))?;
            Ok(())
        } else {
            Err(WebSocketError::ConnectionError(format!("Connection {} not found", id)))
        }
    }

    /// Sends to one connection, dropping the message if it is already gone.
    pub async fn deliver(&self, id: &Uuid, msg: &ServerMessage) -> bool {
        match self.send_to(id, msg).await {
            Ok(()) => true,
            Err(WebSocketError::InvalidFormat(e)) => {
                error!(connection_id = %id, error = %e, "Failed to serialize server message");
                false
            }
            Err(e) => {
                warn!(connection_id = %id, error = %e, "Dropped message for closed connection");
                false
            }
        }
    }

    pub async fn send_to_many(&self, ids: &[Uuid], msg: &ServerMessage) -> Result<(), WebSocketError> {
        let text = msg.to_text()?;
        let connections = self.connections.read().await;
        let message = Message::Text(text);

        for id in ids {
            if let Some(sender) = connections.get(id) {
                if let Err(e) = sender.send(message.clone()) {
                    warn!(connection_id = %id, error = %e, "Failed to send to connection");
                }
            }
        }

        Ok(())
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
