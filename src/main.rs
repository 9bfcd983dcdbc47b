use actix_web::{web, App, HttpServer};
use actix_cors::Cors;
use chess_relay_server::config::CorsConfig;
use chess_relay_server::{health_check, AppError, AppState, Settings};
use dotenv::dotenv;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_line_number(true),
        )
        .init();
}

fn cors(config: &CorsConfig) -> Cors {
    if !config.enabled {
        // CORS disabled - use most restrictive settings
        return Cors::default();
    }

    let cors = if config.allow_any_origin {
        Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET"])
    } else {
        Cors::default()
            .allowed_origin("http://localhost:5173")
            .allowed_origin("http://127.0.0.1:5173")
            .allowed_methods(vec!["GET"])
    };

    cors.max_age(config.max_age as usize)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down server"),
        _ = terminate => info!("Received terminate signal, shutting down server"),
    }
}

#[actix_web::main]
async fn main() -> chess_relay_server::Result<()> {
    // Load environment variables
    dotenv().ok();

    init_tracing();

    let config = Settings::new()?;
    info!(environment = %config.environment, "Configuration loaded successfully");

    let state = AppState::new(config.clone());

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Chess WebSocket server started on ws://{}", listener.local_addr()?);

    let health = if config.health.enabled {
        let data = web::Data::new(state.clone());
        let cors_config = config.cors.clone();
        let server = HttpServer::new(move || {
            App::new()
                .wrap(cors(&cors_config))
                .app_data(data.clone())
                .route("/health", web::get().to(health_check))
        })
        .bind(config.health_addr())
        .map_err(|e| AppError::InternalError(format!("binding health check server: {}", e)))?
        .workers(config.health.workers as usize)
        .disable_signals()
        .run();
        info!("Health check server started on http://{}/health", config.health_addr());
        Some(server)
    } else {
        None
    };

    let health_handle = health.as_ref().map(|server| server.handle());
    if let Some(server) = health {
        actix_rt::spawn(async move {
            if let Err(e) = server.await {
                error!(error = %e, "Health check server failed");
            }
        });
    }

    state
        .websocket_server()
        .run(listener, shutdown_signal())
        .await;

    if let Some(handle) = health_handle {
        handle.stop(true).await;
    }

    info!("Server closed");
    Ok(())
}
