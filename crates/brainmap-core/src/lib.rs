//! Brainmap Core - Graph model, merge engine, patch diffing, and wire protocol

pub mod error;
pub mod graph;
pub mod merge;
pub mod patch;
pub mod protocol;
pub mod types;

pub use error::{Error, Result};
pub use graph::{Graph, PLACEHOLDER_NAME};
pub use merge::{merge_associations, normalize_label, MergePolicy, MergeReport, Proposal};
pub use patch::{apply_patch, diff, PatchOp};
pub use protocol::*;
pub use types::*;
