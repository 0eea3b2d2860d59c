use crate::context::RunContext;
use crate::event::{Event, EventError};
use crate::options::Options;
use crate::ordering::{ApplyOrdering, SingleBatch};
use crate::queue::TaskQueue;
use crate::runner::{Aborted, Collaborators, EventSink, Runner, EVENT_BUFFER};
use kapply_schema::IdSet;
use kapply_store::{InventoryInfo, InventoryStorage, ResourceStore, StatusPoller};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Removes every object an inventory owns, then the inventory's ledger.
///
/// Objects owned by another inventory are skipped and stay in the ledger,
/// which is then kept instead of deleted. `Options::no_prune` has no effect.
pub struct Destroyer {
    deps: Collaborators,
    ordering: Arc<dyn ApplyOrdering>,
}

impl Destroyer {
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

    /// Start a destroy run on a background task and return its event stream.
    pub fn run(
        &self,
        ctx: RunContext,
        inventory: InventoryInfo,
        options: Options,
    ) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let deps = self.deps.clone();
        let ordering = Arc::clone(&self.ordering);

        tokio::spawn(async move {
            let sink = EventSink::new(tx);
            let _ = destroy_run(deps, ordering, sink, ctx, inventory, options).await;
        });
        rx
    }
}

async fn destroy_run(
    deps: Collaborators,
    ordering: Arc<dyn ApplyOrdering>,
    sink: EventSink,
    ctx: RunContext,
    info: InventoryInfo,
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
    info!(
        "destroying {} objects of inventory {}",
        ledger.len(),
        info.key()
    );

    let queue = TaskQueue::for_destroy(&ledger, ordering.as_ref(), &options);
    let mut runner = Runner::new(deps, sink, ctx, info, options, ledger, IdSet::new());
    runner.execute(queue, Vec::new()).await
}
