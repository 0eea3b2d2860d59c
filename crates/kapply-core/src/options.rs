use crate::CoreError;
use kapply_store::InventoryPolicy;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "kapply.toml";

/// Immutable settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Never delete objects that left the desired set.
    pub no_prune: bool,
    /// Run every group and emit every event without writing anything.
    pub dry_run: bool,
    pub inventory_policy: InventoryPolicy,
    /// How long each wait barrier blocks. Zero disables wait barriers.
    pub reconcile_timeout: Duration,
    pub poll_interval: Duration,
    pub emit_status_events: bool,
    pub emit_wait_events: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            no_prune: false,
            dry_run: false,
            inventory_policy: InventoryPolicy::MustMatch,
            reconcile_timeout: Duration::ZERO,
            poll_interval: Duration::from_secs(2),
            emit_status_events: false,
            emit_wait_events: false,
        }
    }
}

impl Options {
    /// Whether wait barriers are queued at all.
    pub fn waits_enabled(&self) -> bool {
        !self.reconcile_timeout.is_zero() && !self.dry_run
    }
}

/// Run defaults read from a TOML config file. Unset keys keep the
/// [`Options`] defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub no_prune: Option<bool>,
    pub dry_run: Option<bool>,
    pub inventory_policy: Option<InventoryPolicy>,
    pub reconcile_timeout_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub emit_status_events: Option<bool>,
    pub emit_wait_events: Option<bool>,
}

impl RunConfig {
    pub fn parse(content: &str) -> Result<Self, CoreError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load `path` when it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, CoreError> {
        if path.exists() {
            tracing::debug!("loading run config from {}", path.display());
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_options(&self) -> Options {
        let defaults = Options::default();
        Options {
            no_prune: self.no_prune.unwrap_or(defaults.no_prune),
            dry_run: self.dry_run.unwrap_or(defaults.dry_run),
            inventory_policy: self.inventory_policy.unwrap_or(defaults.inventory_policy),
            reconcile_timeout: self
                .reconcile_timeout_secs
                .map_or(defaults.reconcile_timeout, Duration::from_secs),
            poll_interval: self
                .poll_interval_ms
                .map_or(defaults.poll_interval, Duration::from_millis),
            emit_status_events: self
                .emit_status_events
                .unwrap_or(defaults.emit_status_events),
            emit_wait_events: self.emit_wait_events.unwrap_or(defaults.emit_wait_events),
        }
    }
}
