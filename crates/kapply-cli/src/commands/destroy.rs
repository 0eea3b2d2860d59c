use super::{print_summary, report_events, runtime, RunRequest, StateDir};
use kapply_core::{install_signal_handler, Destroyer};
use kapply_store::StorePoller;
use std::path::Path;
use std::sync::Arc;

pub fn run(state_dir: &Path, req: RunRequest, json: bool) -> Result<u8, String> {
    let state = StateDir::open(state_dir)?;
    let dry_run = req.options.dry_run;
    let ctx = req.context();

    let rt = runtime()?;
    let report = rt.block_on(async {
        install_signal_handler(ctx.clone());
        let poller = Arc::new(StorePoller::new(state.store.clone()));
        let destroyer = Destroyer::new(state.store.clone(), state.inventory.clone(), poller)
            .with_ordering(req.ordering);
        let events = destroyer.run(ctx.clone(), req.inventory, req.options);
        report_events(events, json).await
    });

    if !dry_run {
        state.persist()?;
    }
    let cancelled = ctx.err();
    print_summary(&report, cancelled, dry_run, json)?;
    Ok(report.exit_code(cancelled))
}
