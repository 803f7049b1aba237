//! Single-flight task scheduler.
//!
//! One task runs at a time, globally. A tick that finds the gate held returns
//! immediately; it never queues behind the running task. Each dispatched task
//! goes through three store mutations: mark the target as running, apply the
//! result (or count a failure), then clear the markers. A panic inside the
//! capability is caught and treated as a failure. The store lock is never
//! held across the capability call.

use crate::executor::Job;
use crate::model::ModelSlot;
use crate::select::select_task;
use crate::store::GraphStore;
use brainmap_core::{Graph, MergePolicy, Task, TaskKind, TaskMarker, Thinking};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub tick: Duration,
    pub merge_policy: MergePolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            merge_policy: MergePolicy::default(),
        }
    }
}

/// What a tick decided.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another task holds the gate.
    Busy,
    NoModel,
    /// Nothing to do.
    Idle,
    /// A user task whose target no longer exists.
    Dropped,
    Completed { kind: TaskKind, success: bool },
}

/// Holds the busy flag; releases it on drop.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Dispatch {
    Nothing,
    Dropped(Task),
    Ready(Job),
}

/// Pop the next task and mark it running, under the store write lock.
fn dispatch(graph: &mut Graph) -> Dispatch {
    let task = match graph.user_queue.pop_front() {
        Some(task) => task,
        None => match select_task(graph) {
            Some(task) => task,
            None => return Dispatch::Nothing,
        },
    };
    match Job::prepare(&task, graph) {
        Some(job) => {
            graph.set_marker(job.kind(), job.node(), Some(TaskMarker::Running));
            graph.thinking = Some(match job.node() {
                Some(id) => Thinking::Node { id: id.clone() },
                None => Thinking::Graph,
            });
            Dispatch::Ready(job)
        }
        None => {
            graph.set_marker(task.kind, task.node_id.as_ref(), None);
            Dispatch::Dropped(task)
        }
    }
}

pub struct Scheduler {
    store: Arc<GraphStore>,
    model: Arc<ModelSlot>,
    config: SchedulerConfig,
    busy: AtomicBool,
}

impl Scheduler {
    pub fn new(store: Arc<GraphStore>, model: Arc<ModelSlot>, config: SchedulerConfig) -> Self {
        Self {
            store,
            model,
            config,
            busy: AtomicBool::new(false),
        }
    }

    /// True while a task is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn tick(&self) -> TickOutcome {
        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            return TickOutcome::Busy;
        };
        let Some(provider) = self.model.current().await else {
            return TickOutcome::NoModel;
        };

        // Cheap read-side check so idle ticks never touch the write lock.
        let pending = self
            .store
            .read(|g| !g.user_queue.is_empty() || select_task(g).is_some())
            .await;
        if !pending {
            return TickOutcome::Idle;
        }

        let (identity, dispatched) = self.store.mutate_tracked(dispatch).await;
        let job = match dispatched {
            Dispatch::Nothing => return TickOutcome::Idle,
            Dispatch::Dropped(task) => {
                warn!(
                    "Dropped {} task: target {} is gone or has nothing to work with",
                    task.kind,
                    task.node_id.as_ref().map_or("graph".to_string(), |id| id.to_string())
                );
                return TickOutcome::Dropped;
            }
            Dispatch::Ready(job) => job,
        };
        let kind = job.kind();
        debug!("Dispatching {} on graph '{}'", kind, identity.name);

        // A panicking provider counts as a failed call so the markers below
        // are still cleared.
        let call = AssertUnwindSafe(provider.run_structured_task(job.structured_task())).catch_unwind();
        let outcome = match call.await {
            Ok(Ok(value)) => job.interpret(value),
            Ok(Err(e)) => {
                warn!("{} capability call failed: {}", kind, e);
                None
            }
            Err(_) => {
                error!("{} capability call panicked", kind);
                None
            }
        };

        let policy = self.config.merge_policy;
        let applied = self
            .store
            .mutate_if(&identity, |g| {
                let success = match outcome {
                    Some(outcome) => job.apply(g, outcome, policy),
                    None => false,
                };
                if !success {
                    g.record_failure(kind, job.node());
                }
                success
            })
            .await;

        let Some(success) = applied else {
            warn!("Discarded {} result: graph '{}' was replaced", kind, identity.name);
            return TickOutcome::Completed { kind, success: false };
        };

        self.store
            .mutate_if(&identity, |g| {
                g.set_marker(kind, job.node(), None);
                g.thinking = None;
            })
            .await;

        if success {
            info!("{} completed", kind);
        } else {
            debug!("{} produced no usable result", kind);
        }
        TickOutcome::Completed { kind, success }
    }

    /// Run ticks forever on a fixed interval. Missed ticks are skipped.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            info!("Scheduler started (tick {}ms)", scheduler.config.tick.as_millis());
            let mut interval = tokio::time::interval(scheduler.config.tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if scheduler.is_busy() {
                    continue;
                }
                let worker = Arc::clone(&scheduler);
                tokio::spawn(async move {
                    worker.tick().await;
                });
            }
        })
    }
}
