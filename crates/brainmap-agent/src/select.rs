//! Automatic task selection.
//!
//! Strict priority: GENERATE_NAME, DESCRIBE, EXPLORE_EXISTING, EXPLORE_NEW.
//! Within a kind, nodes with fewer recorded failures go first.

use brainmap_core::{normalize_label, Graph, Node, NodeId, NodeStatus, Task, TaskKind};
use std::collections::HashSet;

/// Accepted concepts required before a graph gets a generated name.
pub const NAME_MIN_ACCEPTED: usize = 3;
/// EXPLORE_EXISTING runs while links < nodes × this ratio.
pub const LINK_DENSITY_TARGET: f64 = 1.5;

/// Pick the next automatic task, if any.
pub fn select_task(graph: &Graph) -> Option<Task> {
    if wants_name(graph) {
        return Some(Task::generate_name());
    }
    if let Some(id) = describe_target(graph) {
        return Some(Task::describe(id));
    }
    if let Some(id) = explore_existing_target(graph) {
        return Some(Task::explore_existing(id));
    }
    if let Some(id) = explore_new_target(graph) {
        return Some(Task::explore_new(id, None));
    }
    None
}

fn is_busy(node: &Node, kind: TaskKind) -> bool {
    node.tasks.contains_key(&kind)
}

fn wants_name(graph: &Graph) -> bool {
    graph.has_placeholder_name()
        && graph.accepted_count() >= NAME_MIN_ACCEPTED
        && !graph.tasks.contains_key(&TaskKind::GenerateName)
}

fn describe_target(graph: &Graph) -> Option<NodeId> {
    let aspects_defined = !graph.settings.defined_aspects.is_empty();
    graph
        .accepted_nodes()
        .filter(|n| n.needs_description(aspects_defined) && !is_busy(n, TaskKind::Describe))
        .min_by_key(|n| (n.attempts_for(TaskKind::Describe), n.created_at))
        .map(|n| n.id.clone())
}

fn explore_existing_target(graph: &Graph) -> Option<NodeId> {
    let density_goal = graph.nodes.len() as f64 * LINK_DENSITY_TARGET;
    if graph.links.len() as f64 >= density_goal {
        return None;
    }
    graph
        .accepted_nodes()
        .filter(|n| !is_busy(n, TaskKind::ExploreExisting))
        .filter(|n| !candidate_pool(graph, &n.id).is_empty())
        .min_by_key(|n| {
            (
                graph.incident_count(&n.id),
                n.attempts_for(TaskKind::ExploreExisting),
                n.created_at,
            )
        })
        .map(|n| n.id.clone())
}

fn explore_new_target(graph: &Graph) -> Option<NodeId> {
    if !graph.settings.auto_explore {
        return None;
    }
    let minimum = graph.settings.min_connections;
    graph
        .accepted_nodes()
        .filter(|n| !is_busy(n, TaskKind::ExploreNew))
        .filter(|n| graph.incident_count(&n.id) < minimum)
        .min_by_key(|n| {
            (
                n.attempts_for(TaskKind::ExploreNew),
                graph.incident_count(&n.id),
                n.created_at,
            )
        })
        .map(|n| n.id.clone())
}

/// Labels of nodes that could be linked to `id`: not `id` itself, not a
/// neighbour, not forbidden. In node order.
pub fn candidate_pool(graph: &Graph, id: &NodeId) -> Vec<String> {
    let neighbours: HashSet<&NodeId> = graph.links.iter().filter_map(|l| l.other(id)).collect();
    let own = graph.node(id).map(|n| normalize_label(&n.label));
    graph
        .nodes
        .values()
        .filter(|n| &n.id != id && !neighbours.contains(&n.id))
        .filter(|n| n.status != NodeStatus::Forbidden)
        .filter(|n| own.as_deref() != Some(normalize_label(&n.label).as_str()))
        .map(|n| n.label.clone())
        .collect()
}
