//! Client message handlers
//!
//! Graph edits go straight through the store, so every session (including
//! the sender) sees them as a PATCH. Agent work is only ever enqueued here;
//! the scheduler picks it up on its next tick. The returned messages go to
//! the requesting session alone.

use crate::server::AppState;
use brainmap_agent::validate_graph_name;
use brainmap_core::{ClientMessage, Graph, NodeStatus, ServerMessage, Task};
use tracing::{debug, error, info, warn};

const DEFAULT_NEW_GRAPH: &str = "Untitled";
const MAX_NAME_SUFFIX: u32 = 1000;

/// Route one parsed client message.
pub async fn handle_message(msg: ClientMessage, state: &AppState) -> Vec<ServerMessage> {
    let kind = msg.kind();
    debug!("Handling {}", kind);

    match msg {
        // -------------------------------------------------------------------
        // Graph edits
        // -------------------------------------------------------------------
        ClientMessage::SetFocus { node_id } => edit(state, kind, |g| g.set_focus(node_id)).await,
        ClientMessage::UpdateSettings { settings } => {
            edit(state, kind, |g| g.update_settings(&settings)).await
        }
        ClientMessage::AddNode { label, parent_id } => {
            let added = state
                .store
                .mutate(|g| g.add_node(&label, parent_id.as_ref()))
                .await;
            if added.is_none() {
                warn!("ADD_NODE ignored: blank label");
            }
        }
        ClientMessage::AcceptNode { node_id } => {
            edit(state, kind, |g| g.set_status(&node_id, NodeStatus::Accepted)).await
        }
        ClientMessage::ForbidNode { node_id } => {
            edit(state, kind, |g| g.set_status(&node_id, NodeStatus::Forbidden)).await
        }
        ClientMessage::DeleteNode { node_id } => {
            if state.store.mutate(|g| g.delete_node(&node_id)).await.is_none() {
                warn!("DELETE_NODE ignored: no node {}", node_id);
            }
        }
        ClientMessage::ClearGraph => state.store.mutate(|g| g.clear()).await,

        // -------------------------------------------------------------------
        // Agent work
        // -------------------------------------------------------------------
        ClientMessage::ExploreNew { node_id } => enqueue(state, Task::explore_new(node_id, None)).await,
        ClientMessage::ExploreLimited { node_id, relations } => {
            enqueue(state, Task::explore_limited(node_id, relations)).await
        }
        ClientMessage::ExploreExisting { node_id } => enqueue(state, Task::explore_existing(node_id)).await,
        ClientMessage::UpdateNodeAspects { node_id } => enqueue(state, Task::describe(node_id)).await,
        ClientMessage::GenerateGraphName => enqueue(state, Task::generate_name()).await,

        // -------------------------------------------------------------------
        // Named graphs
        // -------------------------------------------------------------------
        ClientMessage::ListGraphs => return vec![graph_list(state).await],
        ClientMessage::NewGraph { name } => new_graph(state, name).await,
        ClientMessage::LoadGraph { name } => load_graph(state, &name).await,

        // -------------------------------------------------------------------
        // AI model
        // -------------------------------------------------------------------
        ClientMessage::LoadAiModel => {
            if state.scheduler.is_busy() {
                warn!("LOAD_AI_MODEL refused: a task is running");
                return Vec::new();
            }
            state.store.broadcast(ServerMessage::AiStatus(brainmap_core::AiStatus::loading()));
            let status = state.model.load().await;
            state.store.broadcast(ServerMessage::AiStatus(status));
        }
        ClientMessage::UnloadAiModel => {
            if state.scheduler.is_busy() {
                warn!("UNLOAD_AI_MODEL refused: a task is running");
                return Vec::new();
            }
            let status = state.model.unload().await;
            state.store.broadcast(ServerMessage::AiStatus(status));
        }
        ClientMessage::UpdateAiConfig { config } => update_ai_config(state, &config).await,
    }
    Vec::new()
}

async fn edit(
    state: &AppState,
    kind: &str,
    f: impl FnOnce(&mut Graph) -> brainmap_core::Result<()>,
) {
    if let Err(e) = state.store.mutate(f).await {
        warn!("{} ignored: {}", kind, e);
    }
}

async fn enqueue(state: &AppState, task: Task) {
    let kind = task.kind;
    match state.store.mutate(|g| g.enqueue(task)).await {
        Ok(()) => debug!("Queued {}", kind),
        Err(e) => warn!("{} not queued: {}", kind, e),
    }
}

async fn graph_list(state: &AppState) -> ServerMessage {
    let graphs = match state.repo.list().await {
        Ok(graphs) => graphs,
        Err(e) => {
            error!("Failed to list graphs: {}", e);
            Vec::new()
        }
    };
    ServerMessage::GraphList { graphs }
}

/// `base`, or `base 2`, `base 3`, ... if taken.
async fn unused_name(state: &AppState, base: &str) -> Option<String> {
    if !state.repo.exists(base).await.ok()? {
        return Some(base.to_string());
    }
    for n in 2..MAX_NAME_SUFFIX {
        let candidate = format!("{} {}", base, n);
        if validate_graph_name(&candidate).is_err() {
            return None;
        }
        if !state.repo.exists(&candidate).await.ok()? {
            return Some(candidate);
        }
    }
    None
}

async fn new_graph(state: &AppState, requested: Option<String>) {
    let requested = requested.unwrap_or_default();
    let base = match requested.trim() {
        "" => DEFAULT_NEW_GRAPH,
        name => name,
    };
    let base = match validate_graph_name(base) {
        Ok(name) => name,
        Err(e) => {
            warn!("NEW_GRAPH refused: {}", e);
            return;
        }
    };
    let Some(name) = unused_name(state, base).await else {
        warn!("NEW_GRAPH refused: no free name for '{}'", base);
        return;
    };

    let graph = Graph::default();
    let written = match serde_json::to_value(&graph) {
        Ok(snapshot) => state.repo.save(&name, &snapshot).await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    if let Err(e) = written {
        error!("Failed to create graph '{}': {}", name, e);
        return;
    }

    info!("Created graph '{}'", name);
    state.store.replace(name, graph).await;
    state.store.broadcast(graph_list(state).await);
}

async fn load_graph(state: &AppState, name: &str) {
    let name = match validate_graph_name(name) {
        Ok(name) => name,
        Err(e) => {
            warn!("LOAD_GRAPH refused: {}", e);
            return;
        }
    };
    if let Err(e) = state.store.load(name, state.repo.as_ref()).await {
        warn!("LOAD_GRAPH failed for '{}': {}", name, e);
    }
}

async fn update_ai_config(state: &AppState, partial: &serde_json::Value) {
    let updated = match state.model.update_config(partial).await {
        Ok(updated) => updated,
        Err(e) => {
            warn!("UPDATE_AI_CONFIG ignored: {}", e);
            return;
        }
    };

    {
        let mut config = state.config.lock().await;
        config.ai = updated.clone();
        if let Some(path) = &state.config_path {
            match config.save(path) {
                Ok(()) => info!("Wrote AI config to {}", path.display()),
                Err(e) => error!("Failed to write {}: {}", path.display(), e),
            }
        }
    }
    state.store.broadcast(ServerMessage::AiConfigUpdated { config: updated });
}
