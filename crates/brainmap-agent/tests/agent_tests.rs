//! Tests for brainmap-agent: scheduling, executors, store, persistence

use brainmap_agent::*;
use brainmap_core::*;
use brainmap_llm::{ScriptedProvider, ScriptedReply};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

struct Harness {
    store: Arc<GraphStore>,
    scheduler: Arc<Scheduler>,
    provider: Arc<ScriptedProvider>,
    _tmp: tempfile::TempDir,
}

fn harness(graph: Graph, provider: ScriptedProvider) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let repo = Arc::new(LocalFsRepository::new(tmp.path()));
    let (saver, _) = Saver::spawn(repo, Duration::from_millis(10));
    let store = Arc::new(GraphStore::new("default", graph, saver));
    let provider = Arc::new(provider);
    let model = Arc::new(ModelSlot::preloaded(provider.clone().structured("claude-test")));
    let scheduler = Arc::new(Scheduler::new(store.clone(), model, SchedulerConfig::default()));
    Harness {
        store,
        scheduler,
        provider,
        _tmp: tmp,
    }
}

fn named(labels: &[&str]) -> (Graph, Vec<NodeId>) {
    let mut g = Graph::create_default("Test Graph");
    let ids = labels.iter().map(|l| g.add_node(l, None).unwrap()).collect();
    (g, ids)
}

fn describe_reply() -> ScriptedReply {
    ScriptedReply::Tool(json!({
        "description": "x",
        "aspects": { "Technical": 0.8 },
        "emoji": "⚙"
    }))
}

fn mark_described(g: &mut Graph) {
    for node in g.nodes.values_mut() {
        node.description = Some("d".into());
        node.emoji = Some("⚙".into());
        node.aspects.insert("Technical".into(), 0.5);
    }
}

fn patches(rx: &mut tokio::sync::broadcast::Receiver<ServerMessage>) -> Vec<Vec<PatchOp>> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let ServerMessage::Patch { patches } = msg {
            out.push(patches);
        }
    }
    out
}

// ===========================================================================
// Scheduler
// ===========================================================================

#[tokio::test]
async fn describe_scenario_patches_exactly_three_fields() {
    let (g, ids) = named(&["A"]);
    let h = harness(g, ScriptedProvider::constant(describe_reply()));
    let mut rx = h.store.subscribe();

    let outcome = h.scheduler.tick().await;
    assert_eq!(
        outcome,
        TickOutcome::Completed {
            kind: TaskKind::Describe,
            success: true
        }
    );

    let batches = patches(&mut rx);
    assert_eq!(batches.len(), 3, "mark, apply, cleanup");

    let applied = &batches[1];
    assert_eq!(applied.len(), 3);
    let prefix = format!("/nodes/{}/", ids[0]);
    let mut fields: Vec<&str> = applied
        .iter()
        .map(|op| {
            assert!(matches!(op, PatchOp::Replace { .. }), "{:?}", op);
            op.path().strip_prefix(prefix.as_str()).unwrap()
        })
        .collect();
    fields.sort();
    assert_eq!(fields, vec!["aspects", "description", "emoji"]);

    h.store
        .read(|g| {
            let node = g.node(&ids[0]).unwrap();
            assert_eq!(node.description.as_deref(), Some("x"));
            assert_eq!(node.emoji.as_deref(), Some("⚙"));
            assert_eq!(node.aspects.get("Technical"), Some(&0.8));
            assert!(node.tasks.is_empty());
            assert!(g.thinking.is_none());
        })
        .await;
}

#[tokio::test]
async fn busy_tick_is_a_noop() {
    let (g, _) = named(&["A"]);
    let release = Arc::new(Notify::new());
    let provider = ScriptedProvider::constant(ScriptedReply::held(release.clone(), describe_reply()));
    let h = harness(g, provider);
    let entered = h.provider.entered();

    let running = {
        let scheduler = h.scheduler.clone();
        tokio::spawn(async move { scheduler.tick().await })
    };
    entered.notified().await;
    assert!(h.scheduler.is_busy());

    let before = h.store.snapshot().await.0;
    let mut rx = h.store.subscribe();
    assert_eq!(h.scheduler.tick().await, TickOutcome::Busy);
    assert!(rx.try_recv().is_err());
    assert_eq!(h.store.snapshot().await.0, before);
    assert_eq!(h.provider.call_count().await, 1);

    release.notify_one();
    let outcome = running.await.unwrap();
    assert!(matches!(outcome, TickOutcome::Completed { success: true, .. }));
    assert!(!h.scheduler.is_busy());
}

#[tokio::test]
async fn no_model_and_idle() {
    let tmp = tempfile::tempdir().unwrap();
    let (saver, _) = Saver::spawn(Arc::new(LocalFsRepository::new(tmp.path())), Duration::from_millis(10));
    let (g, _) = named(&["A"]);
    let store = Arc::new(GraphStore::new("default", g, saver));
    let unloaded = Arc::new(ModelSlot::from_config(AiConfig::default()));
    let scheduler = Scheduler::new(store, unloaded, SchedulerConfig::default());
    assert_eq!(scheduler.tick().await, TickOutcome::NoModel);

    let h = harness(Graph::default(), ScriptedProvider::constant(describe_reply()));
    assert_eq!(h.scheduler.tick().await, TickOutcome::Idle);
    assert_eq!(h.provider.call_count().await, 0);
}

#[tokio::test]
async fn priority_name_then_describe_then_explore() {
    let mut g = Graph::default();
    for label in ["A", "B", "C"] {
        g.add_node(label, None).unwrap();
    }
    let provider = ScriptedProvider::sequence(vec![
        ScriptedReply::Tool(json!({ "name": "Letters" })),
        describe_reply(),
        describe_reply(),
        describe_reply(),
    ]);
    let h = harness(g, provider);

    let mut kinds = Vec::new();
    for _ in 0..5 {
        match h.scheduler.tick().await {
            TickOutcome::Completed { kind, .. } => kinds.push(kind),
            other => panic!("unexpected {:?}", other),
        }
    }
    assert_eq!(
        kinds,
        vec![
            TaskKind::GenerateName,
            TaskKind::Describe,
            TaskKind::Describe,
            TaskKind::Describe,
            TaskKind::ExploreExisting,
        ]
    );
    assert_eq!(h.store.read(|g| g.name.clone()).await, "Letters");
}

#[tokio::test]
async fn user_task_preempts_selection() {
    let (g, ids) = named(&["A", "B"]);
    let h = harness(g, ScriptedProvider::constant(ScriptedReply::Fail("down".into())));
    h.store
        .mutate(|g| g.enqueue(Task::explore_new(ids[1].clone(), None)))
        .await
        .unwrap();

    assert_eq!(
        h.scheduler.tick().await,
        TickOutcome::Completed {
            kind: TaskKind::ExploreNew,
            success: false
        }
    );
    let attempts = h
        .store
        .read(|g| g.node(&ids[1]).unwrap().attempts_for(TaskKind::ExploreNew))
        .await;
    assert_eq!(attempts, 1);
}

#[tokio::test]
async fn failures_back_off_between_equal_nodes() {
    let (mut g, ids) = named(&["A", "B"]);
    mark_described(&mut g);
    for kind in [LinkKind::User, LinkKind::Ai, LinkKind::Bridge] {
        g.add_link(Link::new(ids[0].clone(), ids[1].clone(), kind, None));
    }
    g.settings.auto_explore = true;
    g.settings.min_connections = 10;
    let h = harness(g, ScriptedProvider::constant(ScriptedReply::Text("no tool".into())));

    let attempts = |g: &Graph| -> Vec<u32> {
        let mut a: Vec<u32> = ids
            .iter()
            .map(|id| g.node(id).unwrap().attempts_for(TaskKind::ExploreNew))
            .collect();
        a.sort();
        a
    };

    h.scheduler.tick().await;
    assert_eq!(h.store.read(|g| attempts(g)).await, vec![0, 1]);
    h.scheduler.tick().await;
    assert_eq!(h.store.read(|g| attempts(g)).await, vec![1, 1]);
    h.scheduler.tick().await;
    assert_eq!(h.store.read(|g| attempts(g)).await, vec![1, 2]);
}

#[tokio::test]
async fn explore_new_bridges_and_creates_once() {
    let (g, ids) = named(&["A", "Beta"]);
    let reply = ScriptedReply::Tool(json!({ "connections": [
        { "target": "beta", "relation": "similar_to" },
        { "target": "Gamma", "relation": "part_of" }
    ]}));
    let h = harness(g, ScriptedProvider::constant(reply));

    for expected in [true, false] {
        h.store
            .mutate(|g| g.enqueue(Task::explore_new(ids[0].clone(), None)))
            .await
            .unwrap();
        assert_eq!(
            h.scheduler.tick().await,
            TickOutcome::Completed {
                kind: TaskKind::ExploreNew,
                success: expected
            }
        );
    }

    h.store
        .read(|g| {
            assert_eq!(g.nodes.len(), 3);
            assert_eq!(g.links.len(), 2);
            let bridge = g.links.iter().find(|l| l.kind == LinkKind::Bridge).unwrap();
            assert!(bridge.connects(&ids[0], &ids[1]));
            assert_eq!(bridge.relation_type, Some(Relation::SimilarTo));
            let gamma = g.find_by_label("gamma").unwrap();
            let ai = g.links.iter().find(|l| l.kind == LinkKind::Ai).unwrap();
            assert!(ai.connects(&ids[0], &gamma.id));
            assert!(g.dangling_links().is_empty());
        })
        .await;
}

#[tokio::test]
async fn deleted_target_is_dropped_not_failed() {
    let (g, ids) = named(&["A", "B"]);
    let h = harness(g, ScriptedProvider::constant(describe_reply()));
    h.store
        .mutate(|g| {
            g.enqueue(Task::describe(ids[0].clone())).unwrap();
            g.nodes.remove(&ids[0]);
        })
        .await;
    assert_eq!(h.scheduler.tick().await, TickOutcome::Dropped);
    assert_eq!(h.provider.call_count().await, 0);
}

#[tokio::test]
async fn result_for_replaced_graph_is_discarded() {
    let (g, _) = named(&["A"]);
    let release = Arc::new(Notify::new());
    let provider = ScriptedProvider::constant(ScriptedReply::held(release.clone(), describe_reply()));
    let h = harness(g, provider);
    let entered = h.provider.entered();

    let running = {
        let scheduler = h.scheduler.clone();
        tokio::spawn(async move { scheduler.tick().await })
    };
    entered.notified().await;
    h.store.replace("other", Graph::create_default("Other")).await;
    release.notify_one();

    assert_eq!(
        running.await.unwrap(),
        TickOutcome::Completed {
            kind: TaskKind::Describe,
            success: false
        }
    );
    h.store
        .read(|g| {
            assert_eq!(g.name, "Other");
            assert!(g.nodes.is_empty());
            assert!(g.thinking.is_none());
        })
        .await;
    assert_eq!(h.store.identity().await.name, "other");
}

#[tokio::test]
async fn request_carries_forced_tool_and_sampling() {
    let (g, _) = named(&["A"]);
    let h = harness(g, ScriptedProvider::constant(describe_reply()));
    h.scheduler.tick().await;

    let requests = h.provider.requests().await;
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert_eq!(req.model, "claude-test");
    assert_eq!(req.max_tokens, Some(500));
    assert_eq!(req.tool_choice, Some(brainmap_llm::ToolChoice::Tool { name: "describe_concept".into() }));
    assert!(req.system.as_deref().unwrap_or("").starts_with("You are a knowledge graph generator"));
}

struct CrashingProvider;

#[async_trait::async_trait]
impl brainmap_llm::StructuredProvider for CrashingProvider {
    fn name(&self) -> &str {
        "crashing"
    }

    fn model(&self) -> &str {
        "none"
    }

    async fn run_structured_task(&self, _task: brainmap_llm::StructuredTask) -> brainmap_llm::LlmResult<Value> {
        panic!("capability crashed");
    }
}

#[tokio::test]
async fn panicking_capability_still_clears_markers() {
    let (g, ids) = named(&["A"]);
    let tmp = tempfile::tempdir().unwrap();
    let (saver, _) = Saver::spawn(Arc::new(LocalFsRepository::new(tmp.path())), Duration::from_millis(10));
    let store = Arc::new(GraphStore::new("default", g, saver));
    let model = Arc::new(ModelSlot::preloaded(Arc::new(CrashingProvider)));
    let scheduler = Scheduler::new(store.clone(), model, SchedulerConfig::default());

    assert_eq!(
        scheduler.tick().await,
        TickOutcome::Completed {
            kind: TaskKind::Describe,
            success: false
        }
    );
    assert!(!scheduler.is_busy());

    store
        .read(|g| {
            assert!(g.thinking.is_none());
            let node = g.node(&ids[0]).unwrap();
            assert!(node.tasks.is_empty());
            assert_eq!(node.attempts_for(TaskKind::Describe), 1);

            let next = select_task(g).unwrap();
            assert_eq!(next.kind, TaskKind::Describe);
            assert_eq!(next.node_id.as_ref(), Some(&ids[0]));
        })
        .await;
}

// ===========================================================================
// Persistence
// ===========================================================================

#[derive(Default)]
struct CountingRepository {
    saves: Mutex<Vec<(String, Value)>>,
}

#[async_trait::async_trait]
impl GraphRepository for CountingRepository {
    async fn list(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn load(&self, name: &str) -> Result<Graph> {
        Err(Error::storage(name, "not stored"))
    }

    async fn save(&self, name: &str, snapshot: &Value) -> Result<()> {
        self.saves.lock().unwrap().push((name.to_string(), snapshot.clone()));
        Ok(())
    }

    async fn exists(&self, _name: &str) -> Result<bool> {
        Ok(false)
    }

    fn location(&self) -> String {
        "memory".into()
    }
}

#[tokio::test(start_paused = true)]
async fn burst_of_saves_coalesces() {
    let repo = Arc::new(CountingRepository::default());
    let (handle, _) = Saver::spawn(repo.clone(), Duration::from_secs(1));

    for n in 1..=3 {
        handle.schedule("g", json!({ "n": n }));
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    assert!(repo.saves.lock().unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let saves = repo.saves.lock().unwrap().clone();
    assert_eq!(saves, vec![("g".to_string(), json!({ "n": 3 }))]);
}

#[tokio::test(start_paused = true)]
async fn switching_names_flushes_pending_snapshot() {
    let repo = Arc::new(CountingRepository::default());
    let (handle, _) = Saver::spawn(repo.clone(), Duration::from_secs(1));

    handle.schedule("a", json!(1));
    handle.schedule("b", json!(2));
    handle.flush().await;

    let names: Vec<String> = repo.saves.lock().unwrap().iter().map(|(n, _)| n.clone()).collect();
    assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn repository_round_trip_resets_transient_state() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = LocalFsRepository::new(tmp.path());

    let (mut g, ids) = named(&["A", "B"]);
    g.enqueue(Task::describe(ids[0].clone())).unwrap();
    g.thinking = Some(Thinking::Graph);
    g.record_failure(TaskKind::Describe, Some(&ids[0]));
    repo.save("physics", &serde_json::to_value(&g).unwrap()).await.unwrap();

    assert_eq!(repo.list().await.unwrap(), vec!["physics".to_string()]);
    assert!(repo.exists("physics").await.unwrap());

    let loaded = repo.load("physics").await.unwrap();
    assert_eq!(loaded.nodes.len(), 2);
    assert!(loaded.thinking.is_none());
    assert!(loaded.user_queue.is_empty());
    assert!(loaded.nodes.values().all(|n| n.tasks.is_empty() && n.attempts.is_empty()));

    assert!(repo.save("../escape", &json!({})).await.is_err());
    assert!(repo.load("missing").await.is_err());
}

#[tokio::test]
async fn store_mutations_reach_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = Arc::new(LocalFsRepository::new(tmp.path()));
    let (saver, _) = Saver::spawn(repo.clone(), Duration::from_millis(10));
    let store = GraphStore::new("notes", Graph::default(), saver);

    store.mutate(|g| g.add_node("Rust", None)).await;
    store.flush().await;

    let loaded = repo.load("notes").await.unwrap();
    assert!(loaded.find_by_label("rust").is_some());
}

#[tokio::test]
async fn attach_then_patches_rebuild_state() {
    let tmp = tempfile::tempdir().unwrap();
    let (saver, _) = Saver::spawn(Arc::new(LocalFsRepository::new(tmp.path())), Duration::from_millis(10));
    let store = GraphStore::new("default", Graph::default(), saver);
    store.mutate(|g| g.add_node("Root", None)).await;

    let Attachment {
        mut state,
        name,
        mut events,
    } = store.attach().await;
    assert_eq!(name, "default");

    let root = store.read(|g| g.focus_node_id.clone()).await.unwrap();
    store.mutate(|g| g.add_node("Child", Some(&root))).await;
    store.mutate(|g| g.set_status(&root, NodeStatus::Forbidden)).await.unwrap();

    while let Ok(msg) = events.try_recv() {
        if let ServerMessage::Patch { patches } = msg {
            apply_patch(&mut state, &patches).unwrap();
        }
    }
    assert_eq!(state, store.snapshot().await.0);
}
