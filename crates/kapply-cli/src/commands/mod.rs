pub mod apply;
pub mod completions;
pub mod destroy;
pub mod status;

use kapply_core::{
    CancelReason, ErrorKind, Event, KindPhases, Options, RunContext, RunSummary, StateLock,
    WaitOperation,
};
use kapply_store::{FileInventory, InventoryInfo, MemoryStore, StateLayout};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_MANIFEST_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;
pub const EXIT_OBJECTS_FAILED: u8 = 4;

/// Everything an apply, preview or destroy run needs from the command line.
#[derive(Debug)]
pub struct RunRequest {
    pub paths: Vec<PathBuf>,
    pub inventory: InventoryInfo,
    pub options: Options,
    pub ordering: KindPhases,
    pub timeout: Option<Duration>,
}

impl RunRequest {
    pub fn context(&self) -> RunContext {
        match self.timeout {
            Some(timeout) => RunContext::with_timeout(timeout),
            None => RunContext::background(),
        }
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn colorize_outcome(outcome: &str) -> String {
    use console::Style;
    match outcome {
        "Created" | "Updated" | "Pruned" | "Reconciled" | "Current" => {
            Style::new().green().apply_to(outcome).to_string()
        }
        "Unchanged" | "Skipped" => Style::new().dim().apply_to(outcome).to_string(),
        "InProgress" | "Pending" | "Terminating" => {
            Style::new().yellow().apply_to(outcome).to_string()
        }
        "Errored" | "Failed" | "Timeout" => Style::new().red().bold().apply_to(outcome).to_string(),
        other => other.to_owned(),
    }
}

/// An opened, locked state directory: the resource store snapshot and the
/// inventory ledgers beside it.
pub struct StateDir {
    layout: StateLayout,
    _lock: StateLock,
    pub store: Arc<MemoryStore>,
    pub inventory: Arc<FileInventory>,
}

impl StateDir {
    pub fn open(path: &Path) -> Result<Self, String> {
        let layout = StateLayout::new(path);
        layout
            .initialize()
            .map_err(|e| format!("store error: {e}"))?;
        let lock = StateLock::try_acquire(&layout.lock_file())
            .map_err(|e| format!("store lock: {e}"))?
            .ok_or_else(|| {
                format!(
                    "store lock: {} is in use by another kapply process",
                    path.display()
                )
            })?;
        let store = MemoryStore::load(&layout.resources_file())
            .map_err(|e| format!("store error: {e}"))?;
        Ok(Self {
            inventory: Arc::new(FileInventory::new(layout.clone())),
            store: Arc::new(store),
            _lock: lock,
            layout,
        })
    }

    /// Write the resource store snapshot back to disk.
    pub fn persist(&self) -> Result<(), String> {
        self.store
            .save(&self.layout.resources_file())
            .map_err(|e| format!("store error: {e}"))
    }
}

pub fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to start async runtime: {e}"))
}

/// What a drained event stream amounted to.
#[derive(Debug, Default)]
pub struct RunReport {
    pub summary: RunSummary,
    /// Kind of the first run-level error, if any.
    pub fatal: Option<ErrorKind>,
}

impl RunReport {
    pub fn observe(&mut self, event: &Event) {
        self.summary.observe(event);
        if let Event::Error { error } = event {
            if error.kind != ErrorKind::Unsupported && self.fatal.is_none() {
                self.fatal = Some(error.kind);
            }
        }
    }

    pub fn exit_code(&self, cancelled: Option<CancelReason>) -> u8 {
        match self.fatal {
            Some(ErrorKind::Store | ErrorKind::StoreConflict) => return EXIT_STORE_ERROR,
            Some(_) => return EXIT_FAILURE,
            None => {}
        }
        if cancelled.is_some() {
            EXIT_FAILURE
        } else if self.summary.has_failures() {
            EXIT_OBJECTS_FAILED
        } else {
            EXIT_SUCCESS
        }
    }
}

/// Print every event as it arrives and fold them into a report.
pub async fn report_events(mut rx: mpsc::Receiver<Event>, json: bool) -> RunReport {
    let mut report = RunReport::default();
    while let Some(event) = rx.recv().await {
        report.observe(&event);
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!("failed to encode event: {e}"),
            }
        } else {
            print_event(&event);
        }
    }
    report
}

fn print_event(event: &Event) {
    match event {
        Event::Init { .. } | Event::ActionGroup { .. } => tracing::debug!("{event}"),
        Event::Apply {
            id,
            operation,
            error,
            ..
        } => {
            let op = colorize_outcome(&format!("{operation:?}"));
            match error {
                Some(e) => println!("{id} {op}: {e}"),
                None => println!("{id} {op}"),
            }
        }
        Event::Prune {
            id,
            operation,
            error,
            ..
        } => {
            let op = colorize_outcome(&format!("{operation:?}"));
            match error {
                Some(e) => println!("{id} {op}: {e}"),
                None => println!("{id} {op}"),
            }
        }
        Event::Wait { operation, .. } if *operation == WaitOperation::Pending => {
            tracing::debug!("{event}");
        }
        Event::Wait { id, operation, .. } => {
            println!("{id} {}", colorize_outcome(&format!("{operation:?}")));
        }
        Event::Status {
            id,
            status,
            message,
            ..
        } => println!(
            "{id} {} {message}",
            colorize_outcome(&format!("{status:?}"))
        ),
        Event::Error { error } => eprintln!("error: {error}"),
    }
}

/// Print the closing summary line of a run.
pub fn print_summary(
    report: &RunReport,
    cancelled: Option<CancelReason>,
    dry_run: bool,
    json: bool,
) -> Result<(), String> {
    if json {
        let payload = serde_json::json!({
            "type": "Summary",
            "dry_run": dry_run,
            "cancelled": cancelled.map(|r| r.to_string()),
            "counts": report.summary,
        });
        println!("{}", serde_json::to_string(&payload).map_err(|e| e.to_string())?);
        return Ok(());
    }
    if let Some(reason) = cancelled {
        eprintln!("run stopped early: {reason}");
    }
    let prefix = if dry_run { "preview: " } else { "" };
    println!("{prefix}{}", report.summary);
    Ok(())
}
