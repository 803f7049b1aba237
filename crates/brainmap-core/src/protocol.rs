//! WebSocket session protocol
//!
//! Every frame is a JSON object tagged by `type`:
//!
//! Client → Server:
//!   { "type": "ADD_NODE", "label": "Rust", "parentId": null }
//!   { "type": "EXPLORE_LIMITED", "nodeId": "n-…", "relations": ["part_of"] }
//!
//! Server → Client:
//!   { "type": "FULL_STATE", "state": { … }, "filename": "default" }
//!   { "type": "PATCH", "patches": [{ "op": "replace", "path": "/focusNodeId", "value": "n-…" }] }

use crate::patch::PatchOp;
use crate::types::{AiConfig, AiStatus, NodeId, Relation};
use serde::{Deserialize, Serialize};

/// Client-to-server messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    SetFocus { node_id: Option<NodeId> },

    UpdateSettings { settings: serde_json::Value },

    #[serde(rename_all = "camelCase")]
    AddNode {
        label: String,
        #[serde(default)]
        parent_id: Option<NodeId>,
    },

    #[serde(rename_all = "camelCase")]
    AcceptNode { node_id: NodeId },

    #[serde(rename_all = "camelCase")]
    ForbidNode { node_id: NodeId },

    #[serde(rename_all = "camelCase")]
    DeleteNode { node_id: NodeId },

    ClearGraph,

    #[serde(rename_all = "camelCase")]
    ExploreNew { node_id: NodeId },

    #[serde(rename_all = "camelCase")]
    ExploreLimited {
        node_id: NodeId,
        relations: Vec<Relation>,
    },

    #[serde(rename_all = "camelCase")]
    ExploreExisting { node_id: NodeId },

    /// Enqueues DESCRIBE for the node.
    #[serde(rename_all = "camelCase")]
    UpdateNodeAspects { node_id: NodeId },

    NewGraph {
        #[serde(default)]
        name: Option<String>,
    },

    LoadGraph { name: String },

    ListGraphs,

    GenerateGraphName,

    LoadAiModel,

    UnloadAiModel,

    UpdateAiConfig { config: serde_json::Value },
}

impl ClientMessage {
    /// Wire name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::SetFocus { .. } => "SET_FOCUS",
            ClientMessage::UpdateSettings { .. } => "UPDATE_SETTINGS",
            ClientMessage::AddNode { .. } => "ADD_NODE",
            ClientMessage::AcceptNode { .. } => "ACCEPT_NODE",
            ClientMessage::ForbidNode { .. } => "FORBID_NODE",
            ClientMessage::DeleteNode { .. } => "DELETE_NODE",
            ClientMessage::ClearGraph => "CLEAR_GRAPH",
            ClientMessage::ExploreNew { .. } => "EXPLORE_NEW",
            ClientMessage::ExploreLimited { .. } => "EXPLORE_LIMITED",
            ClientMessage::ExploreExisting { .. } => "EXPLORE_EXISTING",
            ClientMessage::UpdateNodeAspects { .. } => "UPDATE_NODE_ASPECTS",
            ClientMessage::NewGraph { .. } => "NEW_GRAPH",
            ClientMessage::LoadGraph { .. } => "LOAD_GRAPH",
            ClientMessage::ListGraphs => "LIST_GRAPHS",
            ClientMessage::GenerateGraphName => "GENERATE_GRAPH_NAME",
            ClientMessage::LoadAiModel => "LOAD_AI_MODEL",
            ClientMessage::UnloadAiModel => "UNLOAD_AI_MODEL",
            ClientMessage::UpdateAiConfig { .. } => "UPDATE_AI_CONFIG",
        }
    }
}

/// Server-to-client messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    FullState {
        state: serde_json::Value,
        filename: String,
    },

    Patch { patches: Vec<PatchOp> },

    GraphList { graphs: Vec<String> },

    AiStatus(AiStatus),

    AiConfigUpdated { config: AiConfig },
}

impl ServerMessage {
    pub fn full_state(state: serde_json::Value, filename: impl Into<String>) -> Self {
        Self::FullState {
            state,
            filename: filename.into(),
        }
    }

    pub fn patch(patches: Vec<PatchOp>) -> Self {
        Self::Patch { patches }
    }
}
