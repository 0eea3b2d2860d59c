mod commands;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_MANIFEST_ERROR, EXIT_STORE_ERROR};
use kapply_core::{parse_group_kind, KindPhases, Options, RunConfig, CONFIG_FILE_NAME};
use kapply_store::{InventoryInfo, InventoryPolicy};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "kapply",
    version,
    about = "Apply, prune and reconcile declarative resources tracked by an inventory"
)]
struct Cli {
    /// Path to the kapply state directory.
    #[arg(long, default_value = ".kapply", global = true)]
    state_dir: PathBuf,

    /// Run config file. Defaults to kapply.toml in the working directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output events and results as JSON, one object per line.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct InventoryArgs {
    /// Name of the inventory object.
    #[arg(long = "inventory-name", default_value = "inventory")]
    name: String,
    /// Namespace of the inventory object.
    #[arg(long = "inventory-namespace", default_value = "default")]
    namespace: String,
    /// Id stamped on every owned object. Defaults to the inventory name.
    #[arg(long = "inventory-id")]
    id: Option<String>,
}

impl InventoryArgs {
    fn info(&self) -> Result<InventoryInfo, String> {
        let id = self.id.clone().unwrap_or_else(|| self.name.clone());
        let info = InventoryInfo::new(&self.name, &self.namespace, id);
        info.validate().map_err(|e| e.to_string())?;
        Ok(info)
    }
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Ownership policy: must-match, adopt-if-no-inventory or adopt-all.
    #[arg(long)]
    policy: Option<InventoryPolicy>,
    /// Seconds each wait group blocks for objects to reconcile. 0 disables waiting.
    #[arg(long)]
    reconcile_timeout: Option<u64>,
    /// Milliseconds between status polls while waiting.
    #[arg(long)]
    poll_interval_ms: Option<u64>,
    /// Overall run deadline in seconds.
    #[arg(long)]
    timeout: Option<u64>,
    /// Comma separated kinds (`Kind` or `Kind.group`) applied before the rest.
    /// Repeat to add further phases.
    #[arg(long = "phase")]
    phases: Vec<String>,
    /// Report every observed status change while waiting.
    #[arg(long, default_value_t = false)]
    status_events: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply manifests and prune objects that left the set.
    Apply {
        /// Manifest files or directories (.json, .toml).
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[command(flatten)]
        inventory: InventoryArgs,
        #[command(flatten)]
        run: RunArgs,
        /// Keep objects that are no longer in the manifests.
        #[arg(long, default_value_t = false)]
        no_prune: bool,
        /// Report what would change without writing anything.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Show what `apply` would do without writing anything.
    Preview {
        /// Manifest files or directories (.json, .toml).
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[command(flatten)]
        inventory: InventoryArgs,
        #[command(flatten)]
        run: RunArgs,
        /// Keep objects that are no longer in the manifests.
        #[arg(long, default_value_t = false)]
        no_prune: bool,
    },
    /// Delete every object an inventory owns, then the inventory.
    Destroy {
        #[command(flatten)]
        inventory: InventoryArgs,
        #[command(flatten)]
        run: RunArgs,
        /// Report what would be deleted without writing anything.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Show the objects an inventory tracks and their current status.
    Status {
        #[command(flatten)]
        inventory: InventoryArgs,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Merge the config file defaults with command-line overrides.
fn resolve_options(config: &RunConfig, run: &RunArgs, no_prune: bool, dry_run: bool) -> Options {
    let mut options = config.to_options();
    options.no_prune |= no_prune;
    options.dry_run |= dry_run;
    options.emit_status_events |= run.status_events;
    options.emit_wait_events = true;
    if let Some(policy) = run.policy {
        options.inventory_policy = policy;
    }
    if let Some(secs) = run.reconcile_timeout {
        options.reconcile_timeout = Duration::from_secs(secs);
    }
    if let Some(ms) = run.poll_interval_ms {
        options.poll_interval = Duration::from_millis(ms);
    }
    options
}

fn resolve_ordering(run: &RunArgs) -> Result<KindPhases, String> {
    let mut ordering = KindPhases::new();
    for phase in &run.phases {
        let kinds = phase
            .split(',')
            .map(|s| {
                parse_group_kind(s).ok_or_else(|| format!("empty kind in --phase '{phase}'"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        ordering = ordering.then(kinds);
    }
    Ok(ordering)
}

fn load_config(cli: &Cli) -> Result<RunConfig, String> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    RunConfig::load_or_default(&path).map_err(|e| format!("config {}: {e}", path.display()))
}

fn run_request(
    cli: &Cli,
    paths: Vec<PathBuf>,
    inventory: &InventoryArgs,
    run: &RunArgs,
    no_prune: bool,
    dry_run: bool,
) -> Result<commands::RunRequest, String> {
    let config = load_config(cli)?;
    Ok(commands::RunRequest {
        paths,
        inventory: inventory.info()?,
        options: resolve_options(&config, run, no_prune, dry_run),
        ordering: resolve_ordering(run)?,
        timeout: run.timeout.map(Duration::from_secs),
    })
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("KAPPLY_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let json_output = cli.json;
    let result = match &cli.command {
        Commands::Apply {
            paths,
            inventory,
            run,
            no_prune,
            dry_run,
        } => run_request(&cli, paths.clone(), inventory, run, *no_prune, *dry_run)
            .and_then(|req| commands::apply::run(&cli.state_dir, req, json_output)),
        Commands::Preview {
            paths,
            inventory,
            run,
            no_prune,
        } => run_request(&cli, paths.clone(), inventory, run, *no_prune, true)
            .and_then(|req| commands::apply::run(&cli.state_dir, req, json_output)),
        Commands::Destroy {
            inventory,
            run,
            dry_run,
        } => run_request(&cli, Vec::new(), inventory, run, false, *dry_run)
            .and_then(|req| commands::destroy::run(&cli.state_dir, req, json_output)),
        Commands::Status { inventory } => inventory
            .info()
            .and_then(|info| commands::status::run(&cli.state_dir, &info, json_output)),
        Commands::Completions { shell } => commands::completions::run::<Cli>(*shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("manifest error:") {
                EXIT_MANIFEST_ERROR
            } else if msg.starts_with("store error:") || msg.starts_with("store lock:") {
                EXIT_STORE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(phases: &[&str]) -> RunArgs {
        RunArgs {
            policy: None,
            reconcile_timeout: None,
            poll_interval_ms: None,
            timeout: None,
            phases: phases.iter().map(|s| (*s).to_owned()).collect(),
            status_events: false,
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_config() {
        let config = RunConfig::parse("no_prune = false\nreconcile_timeout_secs = 5\n").unwrap();
        let mut run = run_args(&[]);
        run.reconcile_timeout = Some(30);
        run.policy = Some(InventoryPolicy::AdoptAll);
        let options = resolve_options(&config, &run, true, false);
        assert!(options.no_prune);
        assert_eq!(options.reconcile_timeout, Duration::from_secs(30));
        assert_eq!(options.inventory_policy, InventoryPolicy::AdoptAll);
        assert!(options.emit_wait_events);
    }

    #[test]
    fn config_applies_when_flags_absent() {
        let config = RunConfig::parse("dry_run = true\npoll_interval_ms = 250\n").unwrap();
        let options = resolve_options(&config, &run_args(&[]), false, false);
        assert!(options.dry_run);
        assert_eq!(options.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn phases_parse_in_order() {
        let ordering = resolve_ordering(&run_args(&[
            "Namespace",
            "CustomResourceDefinition.apiextensions.k8s.io,Secret",
        ]))
        .unwrap();
        assert_eq!(ordering.len(), 2);
        assert!(resolve_ordering(&run_args(&["Namespace,,Secret"])).is_err());
    }

    #[test]
    fn inventory_id_defaults_to_name() {
        let args = InventoryArgs {
            name: "app".to_owned(),
            namespace: "prod".to_owned(),
            id: None,
        };
        let info = args.info().unwrap();
        assert_eq!(info.id.as_str(), "app");
        assert_eq!(info.key(), "prod_app");
    }

    #[test]
    fn inventory_name_must_be_an_object_name() {
        let args = InventoryArgs {
            name: "../../etc".to_owned(),
            namespace: "default".to_owned(),
            id: Some("x".to_owned()),
        };
        let err = args.info().unwrap_err();
        assert!(err.starts_with("invalid inventory:"), "{err}");
    }
}
