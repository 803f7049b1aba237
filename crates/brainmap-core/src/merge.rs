//! Merge engine: folds agent-proposed associations into a graph.
//!
//! Identity is the normalized label. A proposal naming an existing concept
//! becomes a `bridge` link; anything else becomes a new node joined by an
//! `ai` link. Re-running a merge with the same proposals changes nothing.

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Trim, collapse inner whitespace, case-fold.
pub fn normalize_label(label: &str) -> String {
    label.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// One association proposed by the agent.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Proposal {
    pub label: String,
    #[serde(default)]
    pub relation: Option<Relation>,
}

impl Proposal {
    pub fn new(label: impl Into<String>, relation: Option<Relation>) -> Self {
        Self {
            label: label.into(),
            relation,
        }
    }
}

/// Status given to concepts the agent creates.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergePolicy {
    pub new_node_status: NodeStatus,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            new_node_status: NodeStatus::Accepted,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub created: Vec<NodeId>,
    pub bridged: Vec<NodeId>,
    pub skipped: usize,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        !self.created.is_empty() || !self.bridged.is_empty()
    }
}

/// Merge `proposals` around `target`. Fails only if the target is gone.
pub fn merge_associations(
    graph: &mut Graph,
    target: &NodeId,
    proposals: &[Proposal],
    policy: MergePolicy,
) -> Result<MergeReport> {
    let target_key = match graph.node(target) {
        Some(node) => normalize_label(&node.label),
        None => return Err(Error::NodeNotFound(target.to_string())),
    };

    let mut index: HashMap<String, NodeId> = graph
        .nodes
        .values()
        .map(|n| (normalize_label(&n.label), n.id.clone()))
        .collect();
    let mut report = MergeReport::default();

    for proposal in proposals {
        let key = normalize_label(&proposal.label);
        if key.is_empty() || key == target_key {
            report.skipped += 1;
            continue;
        }

        match index.get(&key).cloned() {
            Some(existing) => {
                let forbidden = graph
                    .node(&existing)
                    .map_or(true, |n| n.status == NodeStatus::Forbidden);
                if forbidden || graph.has_agent_edge(target, &existing) {
                    report.skipped += 1;
                    continue;
                }
                graph.add_link(Link::new(
                    target.clone(),
                    existing.clone(),
                    LinkKind::Bridge,
                    proposal.relation,
                ));
                report.bridged.push(existing);
            }
            None => {
                let node = Node::new(
                    proposal.label.trim(),
                    policy.new_node_status,
                    NodeType::Concept,
                    1,
                );
                let id = graph.insert_node(node);
                graph.add_link(Link::new(target.clone(), id.clone(), LinkKind::Ai, proposal.relation));
                index.insert(key, id.clone());
                report.created.push(id);
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_case_and_whitespace() {
        assert_eq!(normalize_label("  Machine   Learning "), "machine learning");
        assert_eq!(normalize_label("\t\n"), "");
    }

    #[test]
    fn self_reference_is_skipped() {
        let mut g = Graph::default();
        let a = g.add_node("Rust", None).unwrap();
        let report =
            merge_associations(&mut g, &a, &[Proposal::new("rust ", None)], MergePolicy::default()).unwrap();
        assert_eq!(report.skipped, 1);
        assert!(g.links.is_empty());
    }

    #[test]
    fn forbidden_match_is_not_linked() {
        let mut g = Graph::default();
        let a = g.add_node("Rust", None).unwrap();
        let b = g.add_node("Garbage Collector", None).unwrap();
        g.set_status(&b, NodeStatus::Forbidden).unwrap();

        let report = merge_associations(
            &mut g,
            &a,
            &[Proposal::new("garbage collector", Some(Relation::OppositeOf))],
            MergePolicy::default(),
        )
        .unwrap();
        assert!(!report.changed());
        assert!(g.links.is_empty());
    }

    #[test]
    fn duplicates_within_one_batch_collapse() {
        let mut g = Graph::default();
        let a = g.add_node("Rust", None).unwrap();
        let proposals = vec![
            Proposal::new("Borrowing", Some(Relation::PartOf)),
            Proposal::new("borrowing", Some(Relation::DependsOn)),
        ];
        let report = merge_associations(&mut g, &a, &proposals, MergePolicy::default()).unwrap();
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(g.links.len(), 1);
    }

    #[test]
    fn policy_controls_new_status() {
        let mut g = Graph::default();
        let a = g.add_node("Rust", None).unwrap();
        let policy = MergePolicy {
            new_node_status: NodeStatus::Proposed,
        };
        let report = merge_associations(&mut g, &a, &[Proposal::new("Traits", None)], policy).unwrap();
        assert_eq!(g.nodes[&report.created[0]].status, NodeStatus::Proposed);
        assert_eq!(g.nodes[&report.created[0]].val, 1);
    }

    #[test]
    fn missing_target_errors() {
        let mut g = Graph::default();
        let res = merge_associations(
            &mut g,
            &NodeId::new("ghost"),
            &[Proposal::new("x", None)],
            MergePolicy::default(),
        );
        assert!(matches!(res, Err(Error::NodeNotFound(_))));
    }
}
