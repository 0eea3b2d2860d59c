//! Orchestration core for kapply.
//!
//! The `Applier` diffs a desired resource set against an inventory ledger,
//! builds an ordered queue of action groups (inventory-add, apply, wait,
//! prune, inventory-set) and executes it on a background task, reporting
//! everything through a single ordered event stream. The `Destroyer` runs the
//! same machinery to remove every object an inventory owns. Runs are
//! cancelled cooperatively through a `RunContext`.

pub mod applier;
pub mod concurrency;
pub mod context;
pub mod destroyer;
pub mod event;
pub mod lifecycle;
pub mod options;
pub mod ordering;
pub mod prepare;
pub mod queue;

mod apply;
mod prune;
mod runner;
mod wait;

pub use applier::Applier;
pub use concurrency::{install_signal_handler, StateLock};
pub use context::{CancelReason, RunContext};
pub use destroyer::Destroyer;
pub use event::{
    collect_events, ActionKind, ApplyOperation, ErrorKind, Event, EventError, GroupInfo,
    GroupPhase, PruneOperation, RunSummary, WaitOperation,
};
pub use lifecycle::{validate_transition, WaitState};
pub use options::{Options, RunConfig, CONFIG_FILE_NAME};
pub use ordering::{parse_group_kind, ApplyOrdering, KindPhases, SingleBatch};
pub use prepare::{prepare_objects, Prepared};
pub use queue::{Task, TaskQueue};
pub use wait::WaitCondition;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest error: {0}")]
    Manifest(#[from] kapply_schema::ManifestError),
    #[error("resource error: {0}")]
    Resource(#[from] kapply_schema::ResourceError),
    #[error("store error: {0}")]
    Store(#[from] kapply_store::StoreError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid wait transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
