use crate::apply::apply_object;
use crate::context::RunContext;
use crate::event::{ApplyOperation, ErrorKind, Event, EventError, GroupPhase, PruneOperation};
use crate::options::Options;
use crate::prune::prune_object;
use crate::queue::{Task, TaskQueue};
use crate::wait::{BarrierOutcome, WaitBarrier};
use kapply_schema::{IdSet, ResourceSet};
use kapply_store::{InventoryInfo, InventoryStorage, ResourceStore, StatusPoller};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Capacity of a run's event channel.
pub(crate) const EVENT_BUFFER: usize = 128;

/// The event receiver is gone or the run hit a fault it cannot continue past.
#[derive(Debug)]
pub(crate) struct Aborted;

/// Single writer of a run's event stream. Dropping the last sink closes it.
pub(crate) struct EventSink {
    tx: mpsc::Sender<Event>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    pub(crate) async fn emit(&self, event: Event) -> Result<(), Aborted> {
        self.tx.send(event).await.map_err(|_| {
            debug!("event receiver dropped; stopping run");
            Aborted
        })
    }
}

/// Collaborators shared by every run of an `Applier` or `Destroyer`.
#[derive(Clone)]
pub(crate) struct Collaborators {
    pub store: Arc<dyn ResourceStore>,
    pub inventory: Arc<dyn InventoryStorage>,
    pub poller: Arc<dyn StatusPoller>,
}

impl Collaborators {
    /// Read the persisted ledger. Missing ledgers are empty; a ledger owned by
    /// another inventory id is invalid input.
    pub(crate) async fn load_ledger(&self, info: &InventoryInfo) -> Result<IdSet, EventError> {
        match self.inventory.load(info).await {
            Ok(Some(record)) => Ok(record.objects),
            Ok(None) => Ok(IdSet::new()),
            Err(e) => Err(EventError::from(&e)),
        }
    }
}

/// Mutable state of one run, owned by the single orchestration flow.
pub(crate) struct Runner {
    deps: Collaborators,
    sink: EventSink,
    ctx: RunContext,
    info: InventoryInfo,
    options: Options,
    /// Ledger as loaded at run start.
    prior: IdSet,
    desired: IdSet,
    /// In-memory ledger persisted by inventory-set.
    working: IdSet,
    failed_apply: IdSet,
    failed_prune: IdSet,
}

impl Runner {
    pub(crate) fn new(
        deps: Collaborators,
        sink: EventSink,
        ctx: RunContext,
        info: InventoryInfo,
        options: Options,
        prior: IdSet,
        desired: IdSet,
    ) -> Self {
        Self {
            deps,
            sink,
            ctx,
            info,
            options,
            working: prior.clone(),
            prior,
            desired,
            failed_apply: IdSet::new(),
            failed_prune: IdSet::new(),
        }
    }

    async fn emit(&self, event: Event) -> Result<(), Aborted> {
        self.sink.emit(event).await
    }

    /// Execute every group in order, reporting `preflight` errors right
    /// after `Init`. Cancellation is checked before each group; a group that
    /// has started always finishes.
    pub(crate) async fn execute(
        &mut self,
        queue: TaskQueue,
        preflight: Vec<EventError>,
    ) -> Result<(), Aborted> {
        self.emit(Event::Init {
            groups: queue.groups(),
        })
        .await?;
        for error in preflight {
            self.emit(Event::Error { error }).await?;
        }

        for task in queue {
            if let Some(reason) = self.ctx.err() {
                info!("{reason}; not starting {}", task.group());
                break;
            }

            let action = task.action();
            let group = task.group().to_owned();
            debug!("starting group {group}");
            self.emit(Event::ActionGroup {
                action,
                group: group.clone(),
                phase: GroupPhase::Started,
            })
            .await?;

            let keep_going = self.run_task(task).await?;

            self.emit(Event::ActionGroup {
                action,
                group: group.clone(),
                phase: GroupPhase::Finished,
            })
            .await?;
            if !keep_going {
                warn!("stopping run after {group}");
                break;
            }
        }
        Ok(())
    }

    /// Returns `false` when the run must stop after this group.
    async fn run_task(&mut self, task: Task) -> Result<bool, Aborted> {
        match task {
            Task::InventoryAdd { .. } => {
                self.working = self.prior.union(&self.desired);
                Ok(true)
            }
            Task::Apply { group, objects } => {
                self.apply_batch(&group, &objects).await?;
                Ok(true)
            }
            Task::Prune { group, ids } => {
                self.prune_batch(&group, &ids).await?;
                Ok(true)
            }
            Task::Wait {
                group,
                ids,
                condition,
                timeout,
            } => {
                let skip = self.failed_apply.union(&self.failed_prune);
                let barrier = WaitBarrier {
                    group: &group,
                    condition,
                    timeout,
                    options: &self.options,
                };
                let outcome = barrier
                    .run(self.deps.poller.as_ref(), &self.sink, &self.ctx, &ids, &skip)
                    .await?;
                debug!("{group} ended: {outcome:?}");
                Ok(outcome != BarrierOutcome::FeedFailed)
            }
            Task::InventorySet { group } => self.persist_ledger(&group, false).await,
            Task::DeleteInventory { group } => self.persist_ledger(&group, true).await,
        }
    }

    async fn apply_batch(&mut self, group: &str, objects: &ResourceSet) -> Result<(), Aborted> {
        for desired in objects {
            let Ok(id) = desired.id() else {
                self.emit(Event::Error {
                    error: EventError::new(
                        ErrorKind::Unsupported,
                        format!("cannot identify {}", desired.summary()),
                    ),
                })
                .await?;
                continue;
            };

            let result =
                apply_object(self.deps.store.as_ref(), &self.info, desired, &self.options).await;
            let (operation, error) = match result {
                Ok(operation) => (operation, None),
                Err(error) => {
                    warn!("apply {id} failed: {error}");
                    self.failed_apply.insert(id.clone());
                    if error.kind == ErrorKind::OwnershipConflict || !self.prior.contains(&id) {
                        self.working.remove(&id);
                    }
                    (ApplyOperation::Errored, Some(error))
                }
            };
            self.emit(Event::Apply {
                group: group.to_owned(),
                id,
                operation,
                error,
            })
            .await?;
        }
        Ok(())
    }

    async fn prune_batch(&mut self, group: &str, ids: &IdSet) -> Result<(), Aborted> {
        for id in ids {
            let (operation, error) =
                prune_object(self.deps.store.as_ref(), &self.info, id, &self.options).await;
            match operation {
                PruneOperation::Pruned => {
                    self.working.remove(id);
                }
                PruneOperation::Skipped | PruneOperation::Errored => {
                    self.failed_prune.insert(id.clone());
                }
            }
            self.emit(Event::Prune {
                group: group.to_owned(),
                id: id.clone(),
                operation,
                error,
            })
            .await?;
        }
        Ok(())
    }

    async fn persist_ledger(&mut self, group: &str, delete_when_empty: bool) -> Result<bool, Aborted> {
        if self.options.dry_run {
            debug!("{group}: dry run, ledger not written");
            return Ok(true);
        }
        let result = if delete_when_empty && self.working.is_empty() {
            self.deps.inventory.delete(&self.info).await
        } else {
            self.deps.inventory.save(&self.info, &self.working).await
        };
        match result {
            Ok(()) => {
                info!(
                    "inventory {} now tracks {} objects",
                    self.info.key(),
                    self.working.len()
                );
                Ok(true)
            }
            Err(e) => {
                warn!("failed to persist inventory {}: {e}", self.info.key());
                self.emit(Event::Error {
                    error: EventError::from(&e),
                })
                .await?;
                Ok(false)
            }
        }
    }
}
