//! Brainmap Agent - graph store, persistence, task selection and the single-flight scheduler

pub mod executor;
pub mod model;
pub mod prompts;
pub mod repository;
pub mod saver;
pub mod scheduler;
pub mod schemas;
pub mod select;
pub mod store;

pub use executor::{Job, Outcome};
pub use model::{ModelSlot, ProviderFactory};
pub use repository::{validate_graph_name, GraphRepository, LocalFsRepository};
pub use saver::{SaveHandle, Saver};
pub use scheduler::{Scheduler, SchedulerConfig, TickOutcome};
pub use select::{candidate_pool, select_task};
pub use store::{Attachment, GraphIdentity, GraphStore};
