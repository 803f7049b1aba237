//! Graph store and change notifier.
//!
//! The store owns the active graph. Every mutation runs under the write lock,
//! is diffed against the last broadcast snapshot, and the resulting patch is
//! broadcast and handed to the saver before the lock is released. Broadcast
//! order is therefore application order.

use crate::repository::GraphRepository;
use crate::saver::SaveHandle;
use brainmap_core::{diff, Graph, ServerMessage};
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info};

const EVENT_CAPACITY: usize = 1024;

/// Which graph instance is active. `generation` changes on every switch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphIdentity {
    pub name: String,
    pub generation: u64,
}

/// Everything a new session needs, taken atomically.
pub struct Attachment {
    pub state: serde_json::Value,
    pub name: String,
    pub events: broadcast::Receiver<ServerMessage>,
}

struct Active {
    name: String,
    generation: u64,
    graph: Graph,
    baseline: serde_json::Value,
}

impl Active {
    fn identity(&self) -> GraphIdentity {
        GraphIdentity {
            name: self.name.clone(),
            generation: self.generation,
        }
    }
}

pub struct GraphStore {
    inner: RwLock<Active>,
    events: broadcast::Sender<ServerMessage>,
    saver: SaveHandle,
}

fn snapshot(graph: &Graph) -> serde_json::Value {
    serde_json::to_value(graph).unwrap_or_else(|e| {
        error!("Failed to serialize graph '{}': {}", graph.name, e);
        serde_json::Value::Null
    })
}

impl GraphStore {
    pub fn new(name: impl Into<String>, graph: Graph, saver: SaveHandle) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let baseline = snapshot(&graph);
        Self {
            inner: RwLock::new(Active {
                name: name.into(),
                generation: 0,
                graph,
                baseline,
            }),
            events,
            saver,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.events.subscribe()
    }

    /// Send a message that is not a graph change (AI status, graph list, ...).
    pub fn broadcast(&self, message: ServerMessage) {
        let _ = self.events.send(message);
    }

    pub async fn identity(&self) -> GraphIdentity {
        self.inner.read().await.identity()
    }

    pub async fn read<R>(&self, f: impl FnOnce(&Graph) -> R) -> R {
        let active = self.inner.read().await;
        f(&active.graph)
    }

    /// Current full state and file name.
    pub async fn snapshot(&self) -> (serde_json::Value, String) {
        let active = self.inner.read().await;
        (active.baseline.clone(), active.name.clone())
    }

    /// Snapshot plus a receiver positioned right after it.
    pub async fn attach(&self) -> Attachment {
        let active = self.inner.read().await;
        Attachment {
            state: active.baseline.clone(),
            name: active.name.clone(),
            events: self.events.subscribe(),
        }
    }

    /// Apply `f` to the active graph, then broadcast the patch and schedule a save.
    pub async fn mutate<R>(&self, f: impl FnOnce(&mut Graph) -> R) -> R {
        let (_, result) = self.mutate_tracked(f).await;
        result
    }

    /// Like `mutate`, also returning the identity the mutation applied to.
    pub async fn mutate_tracked<R>(&self, f: impl FnOnce(&mut Graph) -> R) -> (GraphIdentity, R) {
        let mut active = self.inner.write().await;
        let result = f(&mut active.graph);
        self.publish(&mut active);
        (active.identity(), result)
    }

    /// Apply `f` only if `expected` is still the active graph.
    pub async fn mutate_if<R>(&self, expected: &GraphIdentity, f: impl FnOnce(&mut Graph) -> R) -> Option<R> {
        let mut active = self.inner.write().await;
        if active.generation != expected.generation || active.name != expected.name {
            return None;
        }
        let result = f(&mut active.graph);
        self.publish(&mut active);
        Some(result)
    }

    fn publish(&self, active: &mut Active) {
        let current = snapshot(&active.graph);
        if current.is_null() {
            return;
        }
        let patches = diff(&active.baseline, &current);
        if patches.is_empty() {
            return;
        }
        self.saver.schedule(&active.name, current.clone());
        active.baseline = current;
        let _ = self.events.send(ServerMessage::patch(patches));
    }

    /// Install a different graph. The old graph's pending save is flushed
    /// first, and every session receives the new full state.
    pub async fn replace(&self, name: impl Into<String>, graph: Graph) -> GraphIdentity {
        let mut active = self.inner.write().await;
        self.saver.flush().await;
        self.install(&mut active, name.into(), graph)
    }

    /// Read `name` from `repo` and make it active. Pending saves are written
    /// and the file is read while the write lock is held, so an edit cannot
    /// slip in between and be lost.
    pub async fn load(&self, name: &str, repo: &dyn GraphRepository) -> brainmap_core::Result<GraphIdentity> {
        let mut active = self.inner.write().await;
        self.saver.flush().await;
        let graph = repo.load(name).await?;
        info!("Loaded graph '{}' ({} nodes)", name, graph.nodes.len());
        Ok(self.install(&mut active, name.to_string(), graph))
    }

    fn install(&self, active: &mut Active, name: String, graph: Graph) -> GraphIdentity {
        active.name = name;
        active.generation += 1;
        active.baseline = snapshot(&graph);
        active.graph = graph;
        info!("Active graph is now '{}' (generation {})", active.name, active.generation);

        let _ = self.events.send(ServerMessage::full_state(
            active.baseline.clone(),
            active.name.clone(),
        ));
        active.identity()
    }

    /// Write any pending snapshot now.
    pub async fn flush(&self) {
        self.saver.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::LocalFsRepository;
    use crate::saver::Saver;
    use std::sync::Arc;
    use std::time::Duration;

    fn store(dir: &std::path::Path) -> GraphStore {
        let (saver, _) = Saver::spawn(Arc::new(LocalFsRepository::new(dir)), Duration::from_millis(10));
        GraphStore::new("default", Graph::default(), saver)
    }

    #[tokio::test]
    async fn noop_mutation_broadcasts_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let mut rx = store.subscribe();
        store.mutate(|_| ()).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn mutation_broadcasts_patch() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let mut rx = store.subscribe();
        store.mutate(|g| g.add_node("Rust", None)).await;
        match rx.try_recv().unwrap() {
            ServerMessage::Patch { patches } => assert!(!patches.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn stale_identity_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let before = store.identity().await;
        store.replace("other", Graph::default()).await;
        assert!(store.mutate_if(&before, |g| g.add_node("x", None)).await.is_none());
        assert!(store.read(|g| g.nodes.is_empty()).await);
    }

    #[tokio::test]
    async fn load_of_active_graph_keeps_pending_edits() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Arc::new(LocalFsRepository::new(tmp.path()));
        let (saver, _) = Saver::spawn(repo.clone(), Duration::from_secs(60));
        let store = GraphStore::new("default", Graph::default(), saver);
        store.mutate(|g| g.add_node("Rust", None)).await;

        let before = store.identity().await;
        let after = store.load("default", repo.as_ref()).await.unwrap();
        assert_eq!(after.name, "default");
        assert_eq!(after.generation, before.generation + 1);
        assert!(store.read(|g| g.find_by_label("rust").is_some()).await);
    }

    #[tokio::test]
    async fn failed_load_keeps_active_graph() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = LocalFsRepository::new(tmp.path());
        let store = store(tmp.path());
        let before = store.identity().await;
        assert!(store.load("missing", &repo).await.is_err());
        assert_eq!(store.identity().await, before);
    }
}
