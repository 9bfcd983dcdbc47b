use std::future::Future;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use futures::{StreamExt, SinkExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::game::GameManager;
use crate::websocket::Connection as WebSocketConnection;

pub struct WebSocketServer {
    games: Arc<GameManager>,
}

impl WebSocketServer {
    pub fn new(games: Arc<GameManager>) -> Self {
        Self { games }
    }

    /// Accepts sockets until `shutdown` resolves.
    pub async fn run<F>(self: Arc<Self>, listener: TcpListener, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let server = self.clone();
                        tokio::spawn(async move {
                            server.handle_connection(stream, addr).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept TCP connection");
                    }
                },
                _ = &mut shutdown => {
                    info!("WebSocket server stopped accepting connections");
                    break;
                }
            }
        }
    }

    pub async fn handle_connection(
        self: Arc<Self>,
        raw_stream: TcpStream,
        addr: std::net::SocketAddr,
    ) {
        debug!(peer = %addr, "New TCP connection");

        let ws_stream = match tokio_tungstenite::accept_async(raw_stream).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(peer = %addr, error = %e, "Error during WebSocket handshake");
                return;
            }
        };

        let (ws_sink, ws_stream) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        let connection_id = Uuid::new_v4();
        let mut connection = WebSocketConnection::new(connection_id, self.games.clone());

        self.games.connect(connection_id, tx).await;
        info!(connection_id = %connection_id, peer = %addr, "Client connected");

        // Forward messages from rx to WebSocket
        let send_task = tokio::spawn(async move {
            let mut ws_sink = ws_sink;
            let mut rx = rx;

            while let Some(message) = rx.recv().await {
                if let Err(e) = ws_sink.send(message).await {
                    debug!(error = %e, "Error sending WebSocket message");
                    break;
                }
            }

            let _ = ws_sink.close().await;
        });

        // Handle incoming WebSocket messages
        let receive_task = tokio::spawn(async move {
            let mut ws_stream = ws_stream;

            while let Some(message) = ws_stream.next().await {
                match message {
                    Ok(msg) => {
                        if let Err(e) = connection.handle_message(msg).await {
                            debug!(connection_id = %connection.id(), reason = %e, "Closing connection");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(connection_id = %connection.id(), error = %e, "Error receiving WebSocket message");
                        break;
                    }
                }
            }
        });

        let mut send_task = send_task;
        let mut receive_task = receive_task;

        // Wait for either task to complete, then stop the other one so no
        // frame is handled after the connection is unregistered
        tokio::select! {
            _ = &mut send_task => {
                debug!(connection_id = %connection_id, "Send task completed");
                receive_task.abort();
            }
            _ = &mut receive_task => {
                debug!(connection_id = %connection_id, "Receive task completed");
                send_task.abort();
            }
        }

        self.games.disconnect(connection_id).await;
        info!(connection_id = %connection_id, "Client disconnected");
    }

    pub fn games(&self) -> Arc<GameManager> {
        self.games.clone()
    }
}
