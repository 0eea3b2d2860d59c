use super::{print_summary, report_events, runtime, RunRequest, StateDir};
use kapply_core::{install_signal_handler, Applier};
use kapply_schema::parse_manifest_paths;
use kapply_store::StorePoller;
use std::path::Path;
use std::sync::Arc;

/// Apply (or preview, with `dry_run`) the manifests in `req.paths`.
pub fn run(state_dir: &Path, req: RunRequest, json: bool) -> Result<u8, String> {
    let desired =
        parse_manifest_paths(&req.paths).map_err(|e| format!("manifest error: {e}"))?;
    let state = StateDir::open(state_dir)?;
    let dry_run = req.options.dry_run;
    let ctx = req.context();

    let rt = runtime()?;
    let report = rt.block_on(async {
        install_signal_handler(ctx.clone());
        let poller = Arc::new(StorePoller::new(state.store.clone()));
        let applier = Applier::new(state.store.clone(), state.inventory.clone(), poller)
            .with_ordering(req.ordering);
        let events = applier.run(ctx.clone(), req.inventory, desired, req.options);
        report_events(events, json).await
    });

    if !dry_run {
        state.persist()?;
    }
    let cancelled = ctx.err();
    print_summary(&report, cancelled, dry_run, json)?;
    Ok(report.exit_code(cancelled))
}
