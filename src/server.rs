//! HTTP surface of the user service

use crate::error::AppError;
use crate::session::SessionManager;
use crate::types::{NewUser, User, UserList};
use crate::users;
use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
            database_url: "test.db".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub id: i64,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/add_user", post(add_user))
        .route("/users", get(list_users))
        .route("/user", get(get_user))
        .with_state(state)
}

async fn add_user(
    State(state): State<AppState>,
    Json(body): Json<NewUser>,
) -> Result<Json<User>, AppError> {
    let mut session = state.sessions.acquire()?;
    let outcome = users::create(&mut session, &body.name).await;
    let user = session.finish(outcome).await?;

    debug!(id = user.id, "User created");
    Ok(Json(user))
}

async fn list_users(State(state): State<AppState>) -> Result<Json<UserList>, AppError> {
    let mut session = state.sessions.acquire()?;
    let outcome = users::list_all(&mut session).await;
    let users = session.finish(outcome).await?;

    Ok(Json(UserList { users }))
}

async fn get_user(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Option<User>>, AppError> {
    let mut session = state.sessions.acquire()?;
    let outcome = users::get_by_id(&mut session, query.id).await;
    let user = session.finish(outcome).await?;

    Ok(Json(user))
}

/// Bind `host:port`, resolving host names (`localhost`, `::1`, ...) through tokio
pub async fn bind(config: &ServerConfig) -> Result<TcpListener> {
    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .context(format!("Failed to bind {}:{}", config.host, config.port))?;
    Ok(listener)
}

/// Open the database, serve until Ctrl+C, then dispose of the engine
pub async fn run_server(config: ServerConfig) -> Result<()> {
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping server");
    };
    serve(config, shutdown_signal).await
}

/// Same lifespan as [`run_server`], stopping when `shutdown` resolves
pub async fn serve<S>(config: ServerConfig, shutdown: S) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let sessions = Arc::new(SessionManager::new(config.database_url.clone()));
    sessions.init()?;
    sessions.create_tables().await?;
    let existing = sessions.count_users().await?;
    info!(database = %config.database_url, users = existing, "Database ready");

    let app = create_router(AppState {
        sessions: Arc::clone(&sessions),
    });

    let listener = bind(&config).await?;
    info!(
        address = %listener.local_addr()?,
        pid = std::process::id(),
        "Server listening"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;

    sessions.shutdown().await?;
    served?;

    info!("Server shut down cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8001);
        assert_eq!(config.database_url, "test.db");
    }

    fn local_config(host: &str) -> ServerConfig {
        ServerConfig {
            host: host.to_string(),
            port: 0,
            database_url: ":memory:".to_string(),
        }
    }

    #[tokio::test]
    async fn test_bind_resolves_host_names() {
        let listener = bind(&local_config("localhost"))
            .await
            .expect("localhost should resolve and bind");
        let addr = listener.local_addr().expect("Failed to read local address");
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_ipv4_literal() {
        let listener = bind(&local_config("127.0.0.1"))
            .await
            .expect("Failed to bind 127.0.0.1");
        let addr = listener.local_addr().expect("Failed to read local address");
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
    }

    #[tokio::test]
    async fn test_serve_on_localhost_until_shutdown() {
        serve(local_config("localhost"), async {})
            .await
            .expect("Server should start on localhost and stop cleanly");
    }
}
