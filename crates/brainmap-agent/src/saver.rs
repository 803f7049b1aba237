//! Debounced persistence.
//!
//! Every schedule replaces the pending snapshot and resets the timer, so a
//! burst of mutations produces one write carrying the last snapshot. A
//! snapshot for a different graph name flushes the pending one first.

use crate::repository::GraphRepository;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

enum SaveCommand {
    Schedule { name: String, snapshot: serde_json::Value },
    Flush { ack: oneshot::Sender<()> },
}

/// Cheap, cloneable handle to the background saver.
#[derive(Clone)]
pub struct SaveHandle {
    tx: mpsc::UnboundedSender<SaveCommand>,
}

impl SaveHandle {
    /// Queue `snapshot` as the latest state of `name`. Non-blocking.
    pub fn schedule(&self, name: &str, snapshot: serde_json::Value) {
        let _ = self.tx.send(SaveCommand::Schedule {
            name: name.to_string(),
            snapshot,
        });
    }

    /// Write any pending snapshot now and wait for it.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(SaveCommand::Flush { ack }).is_ok() {
            let _ = done.await;
        }
    }
}

pub struct Saver;

impl Saver {
    /// Spawn the saver task. It exits, after a final flush, once every handle is dropped.
    pub fn spawn(repo: Arc<dyn GraphRepository>, debounce: Duration) -> (SaveHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<SaveCommand>();

        let join = tokio::spawn(async move {
            info!("Saver started (debounce {}ms, {})", debounce.as_millis(), repo.location());
            let mut pending: Option<(String, serde_json::Value)> = None;
            let mut deadline: Option<Instant> = None;

            loop {
                let at = deadline;
                let timer = async move {
                    match at {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                };

                tokio::select! {
                    biased;

                    cmd = rx.recv() => match cmd {
                        Some(SaveCommand::Schedule { name, snapshot }) => {
                            if pending.as_ref().is_some_and(|(prev, _)| *prev != name) {
                                write(repo.as_ref(), pending.take()).await;
                            }
                            pending = Some((name, snapshot));
                            deadline = Some(Instant::now() + debounce);
                        }
                        Some(SaveCommand::Flush { ack }) => {
                            write(repo.as_ref(), pending.take()).await;
                            deadline = None;
                            let _ = ack.send(());
                        }
                        None => {
                            write(repo.as_ref(), pending.take()).await;
                            break;
                        }
                    },

                    _ = timer => {
                        write(repo.as_ref(), pending.take()).await;
                        deadline = None;
                    }
                }
            }
            info!("Saver stopped");
        });

        (SaveHandle { tx }, join)
    }
}

async fn write(repo: &dyn GraphRepository, pending: Option<(String, serde_json::Value)>) {
    let Some((name, snapshot)) = pending else {
        return;
    };
    match repo.save(&name, &snapshot).await {
        Ok(()) => debug!("Saved graph '{}'", name),
        Err(e) => error!("Failed to save graph '{}': {}", name, e),
    }
}
