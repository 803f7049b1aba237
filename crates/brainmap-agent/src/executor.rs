//! Task executors.
//!
//! A `Job` is a task with its graph context captured under the read side of
//! a mutation, so the capability call can run without holding the store
//! lock. Each variant builds its own prompt and result shape, validates the
//! reply into an `Outcome`, and applies that outcome to the graph.

use crate::prompts;
use crate::schemas::{self, ConnectionsReply, DescribeReply, NameReply};
use crate::select::candidate_pool;
use brainmap_core::{
    merge_associations, normalize_label, Graph, MergePolicy, NodeId, Proposal, Relation, Task,
    TaskKind,
};
use brainmap_llm::{SamplingParams, StructuredTask};
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Labels passed as context (neighbours, candidates, graph concepts).
pub const CONTEXT_LIMIT: usize = 10;
/// Associations kept from one reply.
pub const MAX_ASSOCIATIONS: usize = 5;

#[derive(Clone, Debug, PartialEq)]
pub enum Job {
    Describe {
        node: NodeId,
        label: String,
        aspects: Vec<String>,
    },
    /// EXPLORE_NEW and EXPLORE_LIMITED.
    Explore {
        kind: TaskKind,
        node: NodeId,
        label: String,
        neighbors: Vec<String>,
        forbidden: Vec<String>,
        relations: Vec<Relation>,
        creativity: f64,
        max_words: u32,
    },
    ExploreExisting {
        node: NodeId,
        label: String,
        candidates: Vec<String>,
        relations: Vec<Relation>,
    },
    GenerateName {
        labels: Vec<String>,
        aspects: Vec<String>,
    },
}

/// A validated reply.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Description {
        description: String,
        emoji: String,
        aspects: BTreeMap<String, f64>,
    },
    Associations(Vec<Proposal>),
    Name(String),
}

/// Relations an exploration may use. An explicit request is honoured as
/// given, even outside the graph's allowed set; otherwise the allowed set.
fn effective_relations(requested: Option<&Vec<Relation>>, allowed: &[Relation]) -> Vec<Relation> {
    match requested {
        Some(requested) if !requested.is_empty() => {
            let mut relations = requested.clone();
            relations.sort();
            relations.dedup();
            relations
        }
        _ => allowed.to_vec(),
    }
}

impl Job {
    /// Capture everything `task` needs from `graph`. `None` means the task
    /// can no longer run: its node is gone or it has nothing to work with.
    pub fn prepare(task: &Task, graph: &Graph) -> Option<Job> {
        let settings = &graph.settings;
        if task.kind == TaskKind::GenerateName {
            let labels: Vec<String> = graph
                .accepted_nodes()
                .take(CONTEXT_LIMIT)
                .map(|n| n.label.clone())
                .collect();
            if labels.is_empty() {
                return None;
            }
            return Some(Job::GenerateName {
                labels,
                aspects: settings.defined_aspects.clone(),
            });
        }

        let id = task.node_id.as_ref()?;
        let node = graph.node(id)?;
        let label = node.label.clone();

        let job = match task.kind {
            TaskKind::Describe => Job::Describe {
                node: id.clone(),
                label,
                aspects: settings.defined_aspects.clone(),
            },
            TaskKind::ExploreNew | TaskKind::ExploreLimited => Job::Explore {
                kind: task.kind,
                node: id.clone(),
                label,
                neighbors: graph.neighbor_labels(id, CONTEXT_LIMIT),
                forbidden: graph.forbidden_labels(),
                relations: effective_relations(task.params.relations.as_ref(), &settings.allowed_relations),
                creativity: settings.creativity,
                max_words: settings.max_words,
            },
            TaskKind::ExploreExisting => {
                let pool = candidate_pool(graph, id);
                let candidates: Vec<String> = match &task.params.candidates {
                    Some(explicit) => {
                        let allowed: HashSet<String> = pool.iter().map(|l| normalize_label(l)).collect();
                        explicit
                            .iter()
                            .filter(|c| allowed.contains(&normalize_label(c)))
                            .take(CONTEXT_LIMIT)
                            .cloned()
                            .collect()
                    }
                    None => pool
                        .choose_multiple(&mut rand::thread_rng(), CONTEXT_LIMIT)
                        .cloned()
                        .collect(),
                };
                if candidates.is_empty() {
                    return None;
                }
                Job::ExploreExisting {
                    node: id.clone(),
                    label,
                    candidates,
                    relations: settings.allowed_relations.clone(),
                }
            }
            TaskKind::GenerateName => return None,
        };
        Some(job)
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            Job::Describe { .. } => TaskKind::Describe,
            Job::Explore { kind, .. } => *kind,
            Job::ExploreExisting { .. } => TaskKind::ExploreExisting,
            Job::GenerateName { .. } => TaskKind::GenerateName,
        }
    }

    /// Target node, `None` for graph-level jobs.
    pub fn node(&self) -> Option<&NodeId> {
        match self {
            Job::Describe { node, .. } | Job::Explore { node, .. } | Job::ExploreExisting { node, .. } => {
                Some(node)
            }
            Job::GenerateName { .. } => None,
        }
    }

    pub fn structured_task(&self) -> StructuredTask {
        let (prompt, shape, temperature, max_tokens) = match self {
            Job::Describe { label, aspects, .. } => (
                prompts::describe(label, aspects),
                schemas::describe_shape(aspects),
                0.1,
                500,
            ),
            Job::Explore {
                label,
                neighbors,
                forbidden,
                relations,
                creativity,
                max_words,
                ..
            } => (
                prompts::explore_new(label, neighbors, forbidden, relations, *max_words),
                schemas::connections_shape(relations),
                *creativity as f32,
                1000,
            ),
            Job::ExploreExisting {
                label,
                candidates,
                relations,
                ..
            } => (
                prompts::explore_existing(label, candidates, relations),
                schemas::connections_shape(relations),
                0.3,
                1000,
            ),
            Job::GenerateName { labels, aspects } => (
                prompts::generate_name(labels, aspects),
                schemas::name_shape(),
                0.5,
                100,
            ),
        };
        StructuredTask {
            name: self.kind().to_string(),
            system: prompts::SYSTEM_PROMPT.to_string(),
            prompt,
            shape,
            sampling: SamplingParams {
                temperature,
                max_tokens,
            },
        }
    }

    /// Validate a raw reply. `None` is a failed attempt.
    pub fn interpret(&self, value: serde_json::Value) -> Option<Outcome> {
        match self {
            Job::Describe { aspects, .. } => {
                let reply: DescribeReply = parse(self.kind(), value)?;
                let description = reply.description.trim().to_string();
                if description.is_empty() {
                    return None;
                }
                let scores = keep_defined_aspects(&reply.aspects, aspects);
                if !aspects.is_empty() && scores.is_empty() {
                    debug!("DESCRIBE reply scored none of the defined aspects");
                    return None;
                }
                Some(Outcome::Description {
                    description,
                    emoji: schemas::extract_emoji(&reply.emoji),
                    aspects: scores,
                })
            }
            Job::Explore { relations, .. } => {
                let reply: ConnectionsReply = parse(self.kind(), value)?;
                proposals(reply, relations, |_| true)
            }
            Job::ExploreExisting {
                candidates, relations, ..
            } => {
                let reply: ConnectionsReply = parse(self.kind(), value)?;
                let pool: HashSet<String> = candidates.iter().map(|c| normalize_label(c)).collect();
                proposals(reply, relations, |label| pool.contains(&normalize_label(label)))
            }
            Job::GenerateName { .. } => {
                let reply: NameReply = parse(self.kind(), value)?;
                schemas::clean_name(&reply.name).map(Outcome::Name)
            }
        }
    }

    /// Write `outcome` into `graph`. Returns whether anything changed.
    pub fn apply(&self, graph: &mut Graph, outcome: Outcome, policy: MergePolicy) -> bool {
        match outcome {
            Outcome::Description {
                description,
                emoji,
                aspects,
            } => {
                let Some(node) = self.node().and_then(|id| graph.node_mut(id)) else {
                    return false;
                };
                node.description = Some(description);
                node.emoji = Some(emoji);
                node.aspects = aspects;
                true
            }
            Outcome::Associations(proposals) => {
                let Some(target) = self.node() else {
                    return false;
                };
                match merge_associations(graph, target, &proposals, policy) {
                    Ok(report) => {
                        debug!(
                            "{} merge: {} created, {} bridged, {} skipped",
                            self.kind(),
                            report.created.len(),
                            report.bridged.len(),
                            report.skipped
                        );
                        report.changed()
                    }
                    Err(e) => {
                        warn!("{} merge failed: {}", self.kind(), e);
                        false
                    }
                }
            }
            Outcome::Name(name) => {
                graph.name = name;
                true
            }
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(kind: TaskKind, value: serde_json::Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(reply) => Some(reply),
        Err(e) => {
            debug!("{} reply does not match its shape: {}", kind, e);
            None
        }
    }
}

/// Scores for defined aspects only, keyed by the defined spelling, clamped to 0..1.
fn keep_defined_aspects(raw: &BTreeMap<String, serde_json::Value>, defined: &[String]) -> BTreeMap<String, f64> {
    let mut scores = BTreeMap::new();
    for (name, value) in raw {
        let Some(aspect) = defined.iter().find(|d| d.eq_ignore_ascii_case(name.trim())) else {
            continue;
        };
        let Some(score) = value.as_f64().filter(|s| s.is_finite()) else {
            continue;
        };
        scores.insert(aspect.clone(), score.clamp(0.0, 1.0));
    }
    scores
}

fn proposals(
    reply: ConnectionsReply,
    relations: &[Relation],
    admit: impl Fn(&str) -> bool,
) -> Option<Outcome> {
    let kept: Vec<Proposal> = reply
        .connections
        .into_iter()
        .filter_map(|c| {
            let label = c.target.trim().to_string();
            if label.is_empty() || !admit(&label) {
                return None;
            }
            let relation = c
                .relation
                .as_deref()
                .and_then(schemas::parse_relation)
                .filter(|r| relations.contains(r));
            if relation.is_none() && !relations.is_empty() {
                return None;
            }
            Some(Proposal::new(label, relation))
        })
        .take(MAX_ASSOCIATIONS)
        .collect();
    (!kept.is_empty()).then_some(Outcome::Associations(kept))
}

#[cfg(test)]
mod tests {
    use super::*;
    use brainmap_core::{Link, LinkKind, NodeStatus};
    use serde_json::json;

    fn graph(labels: &[&str]) -> (Graph, Vec<NodeId>) {
        let mut g = Graph::default();
        let ids = labels.iter().map(|l| g.add_node(l, None).unwrap()).collect();
        (g, ids)
    }

    #[test]
    fn describe_keeps_only_defined_aspects() {
        let (g, ids) = graph(&["Rust"]);
        let job = Job::prepare(&Task::describe(ids[0].clone()), &g).unwrap();
        let outcome = job
            .interpret(json!({
                "description": " A systems language ",
                "emoji": "🦀",
                "aspects": { "technical": 1.7, "Mystical": 0.4, "Practical": "high" }
            }))
            .unwrap();
        match outcome {
            Outcome::Description {
                description,
                emoji,
                aspects,
            } => {
                assert_eq!(description, "A systems language");
                assert_eq!(emoji, "🦀");
                assert_eq!(aspects.len(), 1);
                assert_eq!(aspects["Technical"], 1.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn describe_without_scores_fails() {
        let (g, ids) = graph(&["Rust"]);
        let job = Job::prepare(&Task::describe(ids[0].clone()), &g).unwrap();
        assert!(job
            .interpret(json!({ "description": "x", "emoji": "⚙", "aspects": {} }))
            .is_none());
        assert!(job.interpret(json!({ "description": "  ", "emoji": "⚙" })).is_none());
        assert!(job.interpret(json!({ "emoji": "⚙" })).is_none());
    }

    #[test]
    fn explore_drops_disallowed_relations() {
        let (mut g, ids) = graph(&["Rust"]);
        g.settings.allowed_relations = vec![Relation::PartOf];
        let job = Job::prepare(&Task::explore_new(ids[0].clone(), None), &g).unwrap();
        let outcome = job
            .interpret(json!({ "connections": [
                { "target": "Cargo", "relation": "part of" },
                { "target": "Mozilla", "relation": "causes" },
                { "target": "  ", "relation": "part_of" }
            ]}))
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::Associations(vec![Proposal::new("Cargo", Some(Relation::PartOf))])
        );
    }

    #[test]
    fn limited_relations_are_used_as_requested() {
        let (mut g, ids) = graph(&["Rust"]);
        g.settings.allowed_relations = vec![Relation::PartOf, Relation::Causes];
        let task = Task::explore_limited(ids[0].clone(), vec![Relation::OppositeOf, Relation::Causes]);
        match Job::prepare(&task, &g).unwrap() {
            Job::Explore { kind, relations, .. } => {
                assert_eq!(kind, TaskKind::ExploreLimited);
                assert_eq!(relations, vec![Relation::Causes, Relation::OppositeOf]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn limited_exploration_outside_allowed_set_stays_constrained() {
        let (mut g, ids) = graph(&["Rust"]);
        g.settings.allowed_relations = vec![Relation::PartOf];
        let task = Task::explore_limited(ids[0].clone(), vec![Relation::OppositeOf]);
        let job = Job::prepare(&task, &g).unwrap();

        let schema = &job.structured_task().shape.schema;
        let relation = &schema["properties"]["connections"]["items"]["properties"]["relation"];
        assert_eq!(relation["enum"], json!(["opposite_of"]));

        assert!(job
            .interpret(json!({ "connections": [{ "target": "Cargo", "relation": "causes" }] }))
            .is_none());
        assert_eq!(
            job.interpret(json!({ "connections": [{ "target": "C", "relation": "opposite_of" }] })),
            Some(Outcome::Associations(vec![Proposal::new("C", Some(Relation::OppositeOf))]))
        );
    }

    #[test]
    fn explore_existing_filters_to_candidates() {
        let (g, ids) = graph(&["Rust", "Cargo", "Go"]);
        let task = Task::explore_existing(ids[0].clone()).with_candidates(vec!["cargo".into(), "Rust".into()]);
        let job = Job::prepare(&task, &g).unwrap();
        match &job {
            Job::ExploreExisting { candidates, .. } => assert_eq!(candidates, &vec!["cargo".to_string()]),
            other => panic!("unexpected {:?}", other),
        }
        let outcome = job
            .interpret(json!({ "connections": [
                { "target": "Go", "relation": "similar_to" },
                { "target": "Cargo", "relation": "has_part" }
            ]}))
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::Associations(vec![Proposal::new("Cargo", Some(Relation::HasPart))])
        );
    }

    #[test]
    fn explore_existing_without_pool_is_dropped() {
        let (mut g, ids) = graph(&["Rust", "Cargo"]);
        g.add_link(Link::new(ids[0].clone(), ids[1].clone(), LinkKind::User, None));
        assert!(Job::prepare(&Task::explore_existing(ids[0].clone()), &g).is_none());
    }

    #[test]
    fn missing_node_is_dropped() {
        let (g, _) = graph(&["Rust"]);
        assert!(Job::prepare(&Task::describe(NodeId::new("ghost")), &g).is_none());
    }

    #[test]
    fn naming_uses_accepted_labels() {
        let (mut g, ids) = graph(&["Rust", "Cargo", "Java"]);
        g.set_status(&ids[2], NodeStatus::Forbidden).unwrap();
        let job = Job::prepare(&Task::generate_name(), &g).unwrap();
        match &job {
            Job::GenerateName { labels, .. } => {
                assert_eq!(labels.len(), 2);
                assert!(!labels.contains(&"Java".to_string()));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(job.node().is_none());
        let task = job.structured_task();
        assert_eq!(task.name, "GENERATE_NAME");
        assert_eq!(task.sampling.max_tokens, 100);

        let outcome = job.interpret(json!({ "name": "'Rust Tooling'" })).unwrap();
        assert!(job.apply(&mut g, outcome, MergePolicy::default()));
        assert_eq!(g.name, "Rust Tooling");
    }

    #[test]
    fn sampling_follows_task_kind() {
        let (mut g, ids) = graph(&["Rust"]);
        g.settings.creativity = 0.9;
        let describe = Job::prepare(&Task::describe(ids[0].clone()), &g).unwrap();
        assert_eq!(describe.structured_task().sampling.max_tokens, 500);
        let explore = Job::prepare(&Task::explore_new(ids[0].clone(), None), &g).unwrap();
        let sampling = explore.structured_task().sampling;
        assert!((sampling.temperature - 0.9).abs() < 1e-6);
        assert_eq!(sampling.max_tokens, 1000);
    }
}
