use crate::context::RunContext;
use crate::event::{ErrorKind, Event, EventError};
use crate::options::Options;
use crate::ordering::{ApplyOrdering, SingleBatch};
use crate::prepare::prepare_objects;
use crate::queue::TaskQueue;
use crate::runner::{Aborted, Collaborators, EventSink, Runner, EVENT_BUFFER};
use crate::CoreError;
use kapply_schema::ResourceSet;
use kapply_store::{InventoryInfo, InventoryStorage, ResourceStore, StatusPoller};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Applies a desired resource set for one inventory and prunes what the
/// inventory owns but no longer desires.
///
/// ```ignore
/// let applier = Applier::new(store, inventory, poller);
/// let mut events = applier.run(RunContext::background(), info, desired, Options::default());
/// while let Some(event) = events.recv().await {
///     println!("{event}");
/// }
/// ```
pub struct Applier {
    deps: Collaborators,
    ordering: Arc<dyn ApplyOrdering>,
}

impl Applier {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        inventory: Arc<dyn InventoryStorage>,
        poller: Arc<dyn StatusPoller>,
    ) -> Self {
        Self {
            deps: Collaborators {
                store,
                inventory,
                poller,
            },
            ordering: Arc::new(SingleBatch),
        }
    }

    #[must_use]
    pub fn with_ordering(mut self, ordering: impl ApplyOrdering + 'static) -> Self {
        self.ordering = Arc::new(ordering);
        self
    }

    /// Start a run on a background task and return its event stream.
    ///
    /// Must be called within a tokio runtime. The stream closes exactly once,
    /// when the run completes, is cancelled or fails. Invalid input produces a
    /// single `Error` event and no groups. Dropping the receiver stops the run
    /// after the current object.
    pub fn run(
        &self,
        ctx: RunContext,
        inventory: InventoryInfo,
        desired: ResourceSet,
        options: Options,
    ) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let deps = self.deps.clone();
        let ordering = Arc::clone(&self.ordering);

        tokio::spawn(async move {
            let sink = EventSink::new(tx);
            let _ = apply_run(deps, ordering, sink, ctx, inventory, desired, options).await;
        });
        rx
    }
}

async fn apply_run(
    deps: Collaborators,
    ordering: Arc<dyn ApplyOrdering>,
    sink: EventSink,
    ctx: RunContext,
    info: InventoryInfo,
    desired: ResourceSet,
    options: Options,
) -> Result<(), Aborted> {
    if let Err(e) = info.validate() {
        return sink
            .emit(Event::Error {
                error: EventError::from(&e),
            })
            .await;
    }
    let ledger = match deps.load_ledger(&info).await {
        Ok(ledger) => ledger,
        Err(error) => return sink.emit(Event::Error { error }).await,
    };

    let prepared = match prepare_objects(&info, &ledger, &desired, &options) {
        Ok(prepared) => prepared,
        Err(e) => {
            let message = match e {
                CoreError::InvalidInput(message) => message,
                other => other.to_string(),
            };
            return sink
                .emit(Event::Error {
                    error: EventError::new(ErrorKind::InvalidInput, message),
                })
                .await;
        }
    };
    info!(
        "applying {} objects for inventory {} ({} to prune)",
        prepared.apply.len(),
        info.key(),
        prepared.prune.len()
    );

    let queue = TaskQueue::for_apply(&prepared, ordering.as_ref(), &options);
    debug!("queued {} groups", queue.len());

    let mut runner = Runner::new(deps, sink, ctx, info, options, ledger, prepared.desired);
    runner.execute(queue, prepared.unsupported).await
}
