//! Graph aggregate: nodes, links, focus pointer, task queue and settings.
//!
//! Every mutation here keeps one invariant: no link references a node that
//! does not exist. Transient execution state (thinking pointer, user queue,
//! task markers, attempt counters) is dropped whenever a graph is loaded.

use crate::error::{Error, Result};
use crate::merge::normalize_label;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};

/// Display name given to graphs that have not been named yet.
pub const PLACEHOLDER_NAME: &str = "Untitled Graph";

fn placeholder_name() -> String {
    PLACEHOLDER_NAME.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Graph {
    #[serde(default = "placeholder_name")]
    pub name: String,
    #[serde(default)]
    pub nodes: BTreeMap<NodeId, Node>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub focus_node_id: Option<NodeId>,
    #[serde(default)]
    pub thinking: Option<Thinking>,
    #[serde(default)]
    pub user_queue: VecDeque<Task>,
    /// Markers for graph-level tasks.
    #[serde(default)]
    pub tasks: BTreeMap<TaskKind, TaskMarker>,
    #[serde(default)]
    pub name_attempts: u32,
    #[serde(default)]
    pub settings: Settings,
}

impl Default for Graph {
    fn default() -> Self {
        Self::create_default(PLACEHOLDER_NAME)
    }
}

impl Graph {
    pub fn create_default(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: BTreeMap::new(),
            links: Vec::new(),
            focus_node_id: None,
            thinking: None,
            user_queue: VecDeque::new(),
            tasks: BTreeMap::new(),
            name_attempts: 0,
            settings: Settings::default(),
        }
    }

    /// Decode a durable snapshot. Transient fields are reset and links with
    /// missing endpoints are pruned, whatever the file contained.
    pub fn load_from_durable(bytes: &[u8]) -> Result<Self> {
        let mut graph: Graph = serde_json::from_slice(bytes)?;
        graph.reset_transient();
        graph.settings.normalize();

        let before = graph.links.len();
        let nodes = &graph.nodes;
        graph
            .links
            .retain(|l| nodes.contains_key(&l.source) && nodes.contains_key(&l.target));
        let pruned = before - graph.links.len();
        if pruned > 0 {
            tracing::warn!("Pruned {} dangling links from stored graph '{}'", pruned, graph.name);
        }
        if let Some(focus) = &graph.focus_node_id {
            if !graph.nodes.contains_key(focus) {
                graph.focus_node_id = None;
            }
        }
        Ok(graph)
    }

    pub fn reset_transient(&mut self) {
        self.thinking = None;
        self.user_queue.clear();
        self.tasks.clear();
        self.name_attempts = 0;
        for node in self.nodes.values_mut() {
            node.tasks.clear();
            node.attempts.clear();
        }
    }

    pub fn has_placeholder_name(&self) -> bool {
        let name = self.name.trim();
        name.is_empty() || name == PLACEHOLDER_NAME
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Find a node by case-insensitive, whitespace-normalized label.
    pub fn find_by_label(&self, label: &str) -> Option<&Node> {
        let key = normalize_label(label);
        if key.is_empty() {
            return None;
        }
        self.nodes.values().find(|n| normalize_label(&n.label) == key)
    }

    pub fn accepted_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|n| n.is_accepted())
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted_nodes().count()
    }

    pub fn incident_count(&self, id: &NodeId) -> usize {
        self.links.iter().filter(|l| l.touches(id)).count()
    }

    /// Distinct neighbours in link order.
    pub fn neighbors(&self, id: &NodeId) -> Vec<&Node> {
        let mut seen = HashSet::new();
        self.links
            .iter()
            .filter_map(|l| l.other(id))
            .filter(|other| *other != id && seen.insert((*other).clone()))
            .filter_map(|other| self.nodes.get(other))
            .collect()
    }

    pub fn neighbor_labels(&self, id: &NodeId, limit: usize) -> Vec<String> {
        self.neighbors(id)
            .into_iter()
            .take(limit)
            .map(|n| n.label.clone())
            .collect()
    }

    /// Case-folded labels of every forbidden node.
    pub fn forbidden_labels(&self) -> Vec<String> {
        self.nodes
            .values()
            .filter(|n| n.status == NodeStatus::Forbidden)
            .map(|n| normalize_label(&n.label))
            .collect()
    }

    /// True if an ai or bridge edge already joins `a` and `b` in either direction.
    pub fn has_agent_edge(&self, a: &NodeId, b: &NodeId) -> bool {
        self.links.iter().any(|l| l.kind.is_agent() && l.connects(a, b))
    }

    /// Links whose endpoints are missing. Always empty for a well-formed graph.
    pub fn dangling_links(&self) -> Vec<&Link> {
        self.links
            .iter()
            .filter(|l| !self.nodes.contains_key(&l.source) || !self.nodes.contains_key(&l.target))
            .collect()
    }

    // -----------------------------------------------------------------------
    // User edits
    // -----------------------------------------------------------------------

    /// Add a user concept. The first node becomes the root and takes focus.
    /// Returns `None` for a blank label.
    pub fn add_node(&mut self, label: &str, parent: Option<&NodeId>) -> Option<NodeId> {
        let label = label.trim();
        if label.is_empty() {
            return None;
        }
        let is_first = self.nodes.is_empty();
        let node = if is_first {
            Node::new(label, NodeStatus::Accepted, NodeType::Root, 5)
        } else {
            Node::new(label, NodeStatus::Accepted, NodeType::Concept, 3)
        };
        let id = self.insert_node(node);

        if let Some(parent) = parent {
            self.add_link(Link::new(parent.clone(), id.clone(), LinkKind::User, None));
        }
        if is_first {
            self.focus_node_id = Some(id.clone());
        }
        Some(id)
    }

    pub fn insert_node(&mut self, node: Node) -> NodeId {
        let id = node.id.clone();
        self.nodes.insert(id.clone(), node);
        id
    }

    /// Append a link if both endpoints exist. Returns whether it was added.
    pub fn add_link(&mut self, link: Link) -> bool {
        if link.source == link.target
            || !self.nodes.contains_key(&link.source)
            || !self.nodes.contains_key(&link.target)
        {
            return false;
        }
        self.links.push(link);
        true
    }

    pub fn set_status(&mut self, id: &NodeId, status: NodeStatus) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| Error::NodeNotFound(id.to_string()))?;
        node.status = status;
        Ok(())
    }

    /// Point focus at an existing node, or clear it.
    pub fn set_focus(&mut self, id: Option<NodeId>) -> Result<()> {
        match id {
            Some(id) if !self.nodes.contains_key(&id) => Err(Error::NodeNotFound(id.to_string())),
            other => {
                self.focus_node_id = other;
                Ok(())
            }
        }
    }

    /// Remove a node and everything that references it.
    pub fn delete_node(&mut self, id: &NodeId) -> Option<Node> {
        let removed = self.nodes.remove(id)?;
        self.links.retain(|l| !l.touches(id));
        if self.focus_node_id.as_ref() == Some(id) {
            self.focus_node_id = None;
        }
        if self.thinking == Some(Thinking::Node { id: id.clone() }) {
            self.thinking = None;
        }
        self.user_queue.retain(|t| t.node_id.as_ref() != Some(id));
        Some(removed)
    }

    /// Drop all nodes, links and pending work. Name and settings survive.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.links.clear();
        self.focus_node_id = None;
        self.thinking = None;
        self.user_queue.clear();
        self.tasks.clear();
    }

    /// Shallow-merge a partial settings object. Invalid input leaves settings untouched.
    pub fn update_settings(&mut self, partial: &serde_json::Value) -> Result<()> {
        let patch = partial
            .as_object()
            .ok_or_else(|| Error::InvalidSettings("expected an object".into()))?;
        let mut merged = serde_json::to_value(&self.settings)?;
        if let Some(obj) = merged.as_object_mut() {
            for (k, v) in patch {
                obj.insert(k.clone(), v.clone());
            }
        }
        let mut settings: Settings =
            serde_json::from_value(merged).map_err(|e| Error::InvalidSettings(e.to_string()))?;
        settings.normalize();
        self.settings = settings;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Task bookkeeping
    // -----------------------------------------------------------------------

    /// Push a user task and mark its target as queued.
    pub fn enqueue(&mut self, task: Task) -> Result<()> {
        if let Some(id) = &task.node_id {
            if !self.nodes.contains_key(id) {
                return Err(Error::NodeNotFound(id.to_string()));
            }
        }
        self.set_marker(task.kind, task.node_id.as_ref(), Some(TaskMarker::Queued));
        self.user_queue.push_back(task);
        Ok(())
    }

    pub fn set_marker(&mut self, kind: TaskKind, node_id: Option<&NodeId>, marker: Option<TaskMarker>) {
        let markers = match node_id {
            Some(id) => match self.nodes.get_mut(id) {
                Some(node) => &mut node.tasks,
                None => return,
            },
            None => &mut self.tasks,
        };
        match marker {
            Some(m) => {
                markers.insert(kind, m);
            }
            None => {
                markers.remove(&kind);
            }
        }
    }

    /// Count a failed attempt against the task's target.
    pub fn record_failure(&mut self, kind: TaskKind, node_id: Option<&NodeId>) {
        match node_id {
            Some(id) => {
                if let Some(node) = self.nodes.get_mut(id) {
                    *node.attempts.entry(kind).or_insert(0) += 1;
                }
            }
            None => self.name_attempts += 1,
        }
    }
}
