use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use futures::StreamExt;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use super::Fixture;
use crate::session::backend::{CHANNEL_PATH, SNAPSHOT_PATH};

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub fixture: Fixture,
    pub port: u16,
    /// Pause before each frame
    pub delay: Duration,
    pub snapshots: bool,
    /// Permissive CORS and bind on all interfaces
    pub dev_mode: bool,
}

impl MockConfig {
    pub fn new(fixture: Fixture) -> Self {
        Self {
            fixture,
            port: 0,
            delay: Duration::ZERO,
            snapshots: true,
            dev_mode: false,
        }
    }
}

struct MockState {
    fixture: Fixture,
    delay: Duration,
    snapshots: bool,
}

#[derive(Debug, Deserialize)]
struct ChannelQuery {
    owner_name: String,
    repo_name: String,
    #[serde(default)]
    codebase_ids: String,
}

#[derive(Debug, Deserialize)]
struct SnapshotQuery {
    owner_name: String,
    repo_name: String,
}

pub fn build_router(config: &MockConfig) -> Router {
    let state = Arc::new(MockState {
        fixture: config.fixture.clone(),
        delay: config.delay,
        snapshots: config.snapshots,
    });

    let app = Router::new()
        .route("/health", get(health))
        .route(CHANNEL_PATH, get(channel))
        .route(SNAPSHOT_PATH, get(snapshot))
        .with_state(state);

    if config.dev_mode {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn channel(State(state): State<Arc<MockState>>, Query(query): Query<ChannelQuery>) -> Response {
    if !state.fixture.matches(&query.owner_name, &query.repo_name) {
        return (StatusCode::NOT_FOUND, "unknown repository").into_response();
    }
    let codebase_ids: Vec<String> = query
        .codebase_ids
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();

    let frames = state.fixture.frames(&codebase_ids);
    info!(
        repository = %state.fixture.repository(),
        frames = frames.len(),
        "Replaying generation channel"
    );

    let delay = state.delay;
    let stream = futures::stream::iter(frames).then(move |frame| async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        debug!(event = %frame.event, "Sending frame");
        Ok::<_, Infallible>(Event::default().event(frame.event).data(frame.data.to_string()))
    });

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

async fn snapshot(
    State(state): State<Arc<MockState>>,
    Query(query): Query<SnapshotQuery>,
) -> Response {
    if !state.snapshots || !state.fixture.matches(&query.owner_name, &query.repo_name) {
        return (StatusCode::NOT_FOUND, "no snapshot").into_response();
    }
    let created_at = chrono::Utc::now().to_rfc3339();
    Json(state.fixture.snapshot(&created_at)).into_response()
}

/// Replay server running in the background on its own task.
pub struct MockServer {
    config: MockConfig,
    shutdown_tx: Option<oneshot::Sender<()>>,
    addr: Option<SocketAddr>,
}

impl MockServer {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            shutdown_tx: None,
            addr: None,
        }
    }

    /// Bind and start serving; returns the base URL.
    pub async fn start(&mut self) -> Result<String> {
        let listener = TcpListener::bind(bind_addr(&self.config))
            .await
            .context("Failed to bind mock server")?;
        let addr = listener
            .local_addr()
            .context("Failed to get server address")?;
        self.addr = Some(addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let app = build_router(&self.config);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                warn!(error = %e, "Mock server error");
            }
        });

        Ok(format!("http://{}", addr))
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.addr = None;
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn bind_addr(config: &MockConfig) -> String {
    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    format!("{}:{}", host, config.port)
}

/// Serve in the foreground until Ctrl+C.
pub async fn serve(config: MockConfig) -> Result<()> {
    let addr = bind_addr(&config);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    println!(
        "Mock backend for {} running at http://{}",
        config.fixture.repository(),
        local_addr
    );

    axum::serve(listener, build_router(&config))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}
