//! Core types for Brainmap

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque node identifier.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Fresh random id.
    pub fn generate() -> Self {
        Self(format!("n-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Lifecycle status of a concept
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Proposed,
    Accepted,
    Forbidden,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Root,
    Concept,
}

/// Who created a link
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    User,
    Ai,
    Bridge,
}

impl LinkKind {
    /// Agent-created edges are subject to the no-duplicate invariant.
    pub fn is_agent(&self) -> bool {
        matches!(self, LinkKind::Ai | LinkKind::Bridge)
    }
}

/// Closed relation vocabulary.
#[derive(Clone, Copy, Debug, Hash, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    // hierarchical
    SubclassOf,
    // structural
    PartOf,
    HasPart,
    // causal
    Causes,
    Enables,
    DependsOn,
    // historical
    PrecededBy,
    #[serde(alias = "succeded_by")]
    SucceededBy,
    // logical
    IncompatibleWith,
    SimilarTo,
    OppositeOf,
}

impl Relation {
    pub const ALL: [Relation; 11] = [
        Relation::SubclassOf,
        Relation::PartOf,
        Relation::HasPart,
        Relation::Causes,
        Relation::Enables,
        Relation::DependsOn,
        Relation::PrecededBy,
        Relation::SucceededBy,
        Relation::IncompatibleWith,
        Relation::SimilarTo,
        Relation::OppositeOf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::SubclassOf => "subclass_of",
            Relation::PartOf => "part_of",
            Relation::HasPart => "has_part",
            Relation::Causes => "causes",
            Relation::Enables => "enables",
            Relation::DependsOn => "depends_on",
            Relation::PrecededBy => "preceded_by",
            Relation::SucceededBy => "succeeded_by",
            Relation::IncompatibleWith => "incompatible_with",
            Relation::SimilarTo => "similar_to",
            Relation::OppositeOf => "opposite_of",
        }
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of agent work.
#[derive(Clone, Copy, Debug, Hash, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    Describe,
    ExploreNew,
    ExploreExisting,
    ExploreLimited,
    GenerateName,
}

impl TaskKind {
    /// Graph-level tasks have no target node.
    pub fn is_graph_level(&self) -> bool {
        matches!(self, TaskKind::GenerateName)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Describe => "DESCRIBE",
            TaskKind::ExploreNew => "EXPLORE_NEW",
            TaskKind::ExploreExisting => "EXPLORE_EXISTING",
            TaskKind::ExploreLimited => "EXPLORE_LIMITED",
            TaskKind::GenerateName => "GENERATE_NAME",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-flight marker shown to viewers.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskMarker {
    Queued,
    Running,
}

/// Free-form task parameters
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskParams {
    /// Restrict proposals to these relations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relations: Option<Vec<Relation>>,
    /// Explicit candidate labels for EXPLORE_EXISTING.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<String>>,
}

/// A task, either user-submitted or computed by the scheduler.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub kind: TaskKind,
    #[serde(default)]
    pub node_id: Option<NodeId>,
    #[serde(default)]
    pub params: TaskParams,
}

impl Task {
    pub fn new(kind: TaskKind, node_id: Option<NodeId>) -> Self {
        Self {
            kind,
            node_id,
            params: TaskParams::default(),
        }
    }

    pub fn describe(node_id: NodeId) -> Self {
        Self::new(TaskKind::Describe, Some(node_id))
    }

    pub fn explore_new(node_id: NodeId, relations: Option<Vec<Relation>>) -> Self {
        let mut task = Self::new(TaskKind::ExploreNew, Some(node_id));
        task.params.relations = relations;
        task
    }

    pub fn explore_limited(node_id: NodeId, relations: Vec<Relation>) -> Self {
        let mut task = Self::new(TaskKind::ExploreLimited, Some(node_id));
        task.params.relations = Some(relations);
        task
    }

    pub fn explore_existing(node_id: NodeId) -> Self {
        Self::new(TaskKind::ExploreExisting, Some(node_id))
    }

    pub fn with_candidates(mut self, candidates: Vec<String>) -> Self {
        self.params.candidates = Some(candidates);
        self
    }

    pub fn generate_name() -> Self {
        Self::new(TaskKind::GenerateName, None)
    }
}

/// Transient pointer to whatever the agent is working on.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Thinking {
    Node { id: NodeId },
    Graph,
}

/// A concept in the graph
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub label: String,
    pub status: NodeStatus,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Size hint for renderers.
    pub val: u32,
    #[serde(default)]
    pub aspects: BTreeMap<String, f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Failure counts per task kind.
    #[serde(default)]
    pub attempts: BTreeMap<TaskKind, u32>,
    #[serde(default)]
    pub tasks: BTreeMap<TaskKind, TaskMarker>,
}

impl Node {
    pub fn new(label: impl Into<String>, status: NodeStatus, node_type: NodeType, val: u32) -> Self {
        Self {
            id: NodeId::generate(),
            label: label.into(),
            status,
            node_type,
            val,
            aspects: BTreeMap::new(),
            description: None,
            emoji: None,
            created_at: Utc::now(),
            attempts: BTreeMap::new(),
            tasks: BTreeMap::new(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == NodeStatus::Accepted
    }

    /// Missing description, emoji, or (when aspects are defined) aspect scores.
    pub fn needs_description(&self, aspects_defined: bool) -> bool {
        let blank = |s: &Option<String>| s.as_deref().map_or(true, |v| v.trim().is_empty());
        blank(&self.description) || blank(&self.emoji) || (aspects_defined && self.aspects.is_empty())
    }

    pub fn attempts_for(&self, kind: TaskKind) -> u32 {
        self.attempts.get(&kind).copied().unwrap_or(0)
    }
}

/// An edge between two nodes
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(rename = "type")]
    pub kind: LinkKind,
    #[serde(default)]
    pub relation_type: Option<Relation>,
}

impl Link {
    pub fn new(source: NodeId, target: NodeId, kind: LinkKind, relation_type: Option<Relation>) -> Self {
        Self {
            id: format!("l-{}", uuid::Uuid::new_v4().simple()),
            source,
            target,
            kind,
            relation_type,
        }
    }

    pub fn touches(&self, id: &NodeId) -> bool {
        &self.source == id || &self.target == id
    }

    /// True if this link joins `a` and `b` in either direction.
    pub fn connects(&self, a: &NodeId, b: &NodeId) -> bool {
        (&self.source == a && &self.target == b) || (&self.source == b && &self.target == a)
    }

    /// The endpoint opposite `id`, if `id` is an endpoint.
    pub fn other(&self, id: &NodeId) -> Option<&NodeId> {
        if &self.source == id {
            Some(&self.target)
        } else if &self.target == id {
            Some(&self.source)
        } else {
            None
        }
    }
}

/// Renderer hints carried with the graph.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct DisplaySettings {
    pub show_labels: bool,
    pub show_relation_labels: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            show_labels: true,
            show_relation_labels: false,
        }
    }
}

/// Per-graph agent settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Sampling temperature for exploration, 0..1.
    pub creativity: f64,
    pub max_words: u32,
    /// Desired incident links per accepted node.
    pub min_connections: usize,
    pub auto_explore: bool,
    pub defined_aspects: Vec<String>,
    pub active_aspects: Vec<String>,
    pub allowed_relations: Vec<Relation>,
    pub display: DisplaySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            creativity: 0.7,
            max_words: 3,
            min_connections: 3,
            auto_explore: false,
            defined_aspects: vec!["Technical".into(), "Emotional".into(), "Practical".into()],
            active_aspects: Vec::new(),
            allowed_relations: Relation::ALL.to_vec(),
            display: DisplaySettings::default(),
        }
    }
}

impl Settings {
    /// Clamp numeric ranges and drop blank or repeated aspects.
    pub fn normalize(&mut self) {
        if !self.creativity.is_finite() {
            self.creativity = Settings::default().creativity;
        }
        self.creativity = self.creativity.clamp(0.0, 1.0);

        let mut seen = std::collections::HashSet::new();
        self.defined_aspects = self
            .defined_aspects
            .iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty() && seen.insert(a.to_lowercase()))
            .collect();
        self.active_aspects.retain(|a| self.defined_aspects.contains(a));

        let mut relations = self.allowed_relations.clone();
        relations.sort();
        relations.dedup();
        self.allowed_relations = relations;
    }
}

/// AI capability configuration, editable at runtime.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AiConfig {
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    /// Log prompts and raw responses at debug level.
    pub log_prompts: bool,
    /// Load the model at startup.
    pub autoload: bool,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-haiku-4-5-20251001".to_string(),
            api_url: None,
            log_prompts: false,
            autoload: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelState {
    Unloaded,
    Loading,
    Ready,
    Error,
}

/// Model availability as reported to viewers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AiStatus {
    pub status: ModelState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AiStatus {
    fn bare(status: ModelState) -> Self {
        Self {
            status,
            provider: None,
            model: None,
            error: None,
        }
    }

    pub fn unloaded() -> Self {
        Self::bare(ModelState::Unloaded)
    }

    pub fn loading() -> Self {
        Self::bare(ModelState::Loading)
    }

    pub fn ready(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: Some(provider.into()),
            model: Some(model.into()),
            ..Self::bare(ModelState::Ready)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::bare(ModelState::Error)
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == ModelState::Ready
    }
}
