use crate::context::RunContext;
use crate::event::{ErrorKind, Event, EventError, WaitOperation};
use crate::lifecycle::{validate_transition, WaitState};
use crate::options::Options;
use crate::runner::{Aborted, EventSink};
use kapply_schema::{IdSet, ResourceId};
use kapply_store::{PollEvent, PollOptions, Status, StatusPoller};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Status a wait barrier waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    /// Applied objects become `Current`. `Failed` ends the wait for that object.
    Current,
    /// Pruned objects disappear from the store.
    NotFound,
}

impl WaitCondition {
    pub fn evaluate(self, status: Status) -> WaitState {
        match (self, status) {
            (WaitCondition::Current, Status::Current)
            | (WaitCondition::NotFound, Status::NotFound) => WaitState::Reconciled,
            (WaitCondition::Current, Status::Failed) => WaitState::Failed,
            _ => WaitState::InProgress,
        }
    }
}

/// How a barrier ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BarrierOutcome {
    Completed,
    TimedOut,
    Cancelled,
    /// The status feed reported a fault. The run must stop.
    FeedFailed,
}

pub(crate) struct WaitBarrier<'a> {
    pub group: &'a str,
    pub condition: WaitCondition,
    pub timeout: Duration,
    pub options: &'a Options,
}

impl WaitBarrier<'_> {
    /// Block until every id in `ids` reaches a terminal state, the timeout
    /// elapses or `ctx` finishes. Ids in `skip` are marked skipped up front.
    pub(crate) async fn run(
        &self,
        poller: &dyn StatusPoller,
        sink: &EventSink,
        ctx: &RunContext,
        ids: &IdSet,
        skip: &IdSet,
    ) -> Result<BarrierOutcome, Aborted> {
        let mut states: HashMap<ResourceId, WaitState> = HashMap::new();
        let mut pending = IdSet::new();
        for id in ids {
            if skip.contains(id) {
                states.insert(id.clone(), WaitState::Skipped);
                self.emit_wait(sink, id, WaitOperation::Skipped).await?;
            } else {
                states.insert(id.clone(), WaitState::Pending);
                pending.insert(id.clone());
                self.emit_wait(sink, id, WaitOperation::Pending).await?;
            }
        }
        if pending.is_empty() {
            return Ok(BarrierOutcome::Completed);
        }

        debug!(
            "{}: waiting up to {:?} for {} objects",
            self.group,
            self.timeout,
            pending.len()
        );
        let poll_cancel = ctx.child_token();
        let mut feed = poller.poll(
            pending.clone(),
            PollOptions {
                interval: self.options.poll_interval,
            },
            poll_cancel.clone(),
        );
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        let mut feed_open = true;

        let outcome = loop {
            if pending.iter().all(|id| states[id].is_terminal()) {
                break BarrierOutcome::Completed;
            }
            tokio::select! {
                received = feed.recv(), if feed_open => match received {
                    Some(PollEvent::Update(update)) => {
                        if !pending.contains(&update.id) {
                            continue;
                        }
                        let next = self.condition.evaluate(update.status);
                        let id = update.id.clone();
                        if self.options.emit_status_events {
                            sink.emit(Event::status(update)).await?;
                        }
                        self.advance(sink, &mut states, &id, next).await?;
                    }
                    Some(PollEvent::Error(message)) => {
                        warn!("{}: status feed failed: {message}", self.group);
                        sink.emit(Event::Error {
                            error: EventError::new(ErrorKind::Store, message),
                        })
                        .await?;
                        break BarrierOutcome::FeedFailed;
                    }
                    None => {
                        debug!("{}: status feed closed", self.group);
                        feed_open = false;
                    }
                },
                () = &mut deadline => break BarrierOutcome::TimedOut,
                () = ctx.done() => break BarrierOutcome::Cancelled,
            }
        };
        poll_cancel.cancel();

        if matches!(outcome, BarrierOutcome::TimedOut | BarrierOutcome::Cancelled) {
            for id in &pending {
                if !states[id].is_terminal() {
                    self.advance(sink, &mut states, id, WaitState::TimedOut)
                        .await?;
                }
            }
        }
        Ok(outcome)
    }

    async fn advance(
        &self,
        sink: &EventSink,
        states: &mut HashMap<ResourceId, WaitState>,
        id: &ResourceId,
        next: WaitState,
    ) -> Result<(), Aborted> {
        let Some(current) = states.get(id).copied() else {
            return Ok(());
        };
        if current == next || validate_transition(current, next).is_err() {
            return Ok(());
        }
        states.insert(id.clone(), next);
        let operation = match next {
            WaitState::Reconciled => WaitOperation::Reconciled,
            WaitState::Failed => WaitOperation::Failed,
            WaitState::TimedOut => WaitOperation::Timeout,
            WaitState::Pending | WaitState::InProgress | WaitState::Skipped => return Ok(()),
        };
        self.emit_wait(sink, id, operation).await
    }

    async fn emit_wait(
        &self,
        sink: &EventSink,
        id: &ResourceId,
        operation: WaitOperation,
    ) -> Result<(), Aborted> {
        if !self.options.emit_wait_events {
            return Ok(());
        }
        sink.emit(Event::Wait {
            group: self.group.to_owned(),
            id: id.clone(),
            operation,
        })
        .await
    }
}
