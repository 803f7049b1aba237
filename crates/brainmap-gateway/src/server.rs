//! HTTP/WebSocket server: shared state, routes, and startup.

use crate::config::BrainmapConfig;
use crate::sessions::SessionRegistry;
use crate::ws::handle_connection;
use brainmap_agent::{
    validate_graph_name, GraphRepository, GraphStore, LocalFsRepository, ModelSlot, Saver, Scheduler,
};
use brainmap_core::{Graph, ServerMessage};
use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Everything a session handler can reach.
pub struct AppState {
    pub store: Arc<GraphStore>,
    pub scheduler: Arc<Scheduler>,
    pub model: Arc<ModelSlot>,
    pub repo: Arc<dyn GraphRepository>,
    pub sessions: SessionRegistry,
    pub config: Mutex<BrainmapConfig>,
    /// Where UPDATE_AI_CONFIG writes back to. `None` keeps changes in memory.
    pub config_path: Option<PathBuf>,
    pub started_at: std::time::Instant,
}

impl AppState {
    /// Open the default graph (creating it if needed) and wire the store,
    /// saver and scheduler together. The scheduler is not started.
    pub async fn new(
        config: BrainmapConfig,
        config_path: Option<PathBuf>,
        model: Arc<ModelSlot>,
    ) -> anyhow::Result<Arc<Self>> {
        let repo: Arc<dyn GraphRepository> = Arc::new(LocalFsRepository::new(&config.storage.data_dir));
        let name = validate_graph_name(&config.storage.default_graph)?.to_string();

        let graph = if repo.exists(&name).await? {
            let graph = repo
                .load(&name)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to load graph '{}': {}", name, e))?;
            info!("Loaded graph '{}' ({} nodes)", name, graph.nodes.len());
            graph
        } else {
            let graph = Graph::default();
            repo.save(&name, &serde_json::to_value(&graph)?).await?;
            info!("Created graph '{}'", name);
            graph
        };

        let (saver, _) = Saver::spawn(repo.clone(), config.save_debounce());
        let store = Arc::new(GraphStore::new(name, graph, saver));
        let scheduler = Arc::new(Scheduler::new(store.clone(), model.clone(), config.scheduler_config()));

        Ok(Arc::new(Self {
            store,
            scheduler,
            model,
            repo,
            sessions: SessionRegistry::new(),
            config: Mutex::new(config),
            config_path,
            started_at: std::time::Instant::now(),
        }))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_gateway(config: BrainmapConfig, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let bind_addr: SocketAddr = config.bind_addr().parse()?;
    let autoload = config.ai.autoload;
    let model = Arc::new(ModelSlot::from_config(config.ai.clone()));
    let data_dir = config.storage.data_dir.clone();
    let state = AppState::new(config, config_path, model).await?;

    if autoload {
        let status = state.model.load().await;
        state.store.broadcast(ServerMessage::AiStatus(status));
    }
    let scheduler = state.scheduler.spawn();

    info!("Brainmap v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  Listening on: {}", bind_addr);
    info!("  WebSocket: ws://{}/ws", bind_addr);
    info!("  Data dir:  {}", data_dir.display());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.abort();
    state.store.flush().await;
    info!("Brainmap stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

async fn index_handler() -> &'static str {
    "Brainmap server online"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let identity = state.store.identity().await;
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "graph": identity.name,
        "sessions": state.sessions.count(),
        "connected": state
            .sessions
            .list()
            .iter()
            .map(|s| serde_json::json!({ "id": s.id, "connected_at": s.connected_at }))
            .collect::<Vec<_>>(),
        "busy": state.scheduler.is_busy(),
        "ai": state.model.status().await,
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}
