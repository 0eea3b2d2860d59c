use crate::poller::{PollEvent, PollOptions, ResourceStatus, StatusPoller};
use crate::status::Status;
use kapply_schema::{IdSet, ResourceId};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
enum Step {
    Emit(PollEvent),
    Sleep(Duration),
}

#[derive(Debug, Default)]
struct Script {
    steps: Vec<Step>,
    settle: Option<Status>,
    close_after_script: bool,
    calls: Vec<IdSet>,
}

/// Status poller driven by a prepared script, for tests.
///
/// Every `poll` call replays the script from the start, forwarding only
/// updates for the requested ids (errors are always forwarded). With
/// [`ScriptedPoller::settle`], every requested id then receives the given
/// status. The feed stays open until cancelled unless
/// [`ScriptedPoller::close_after_script`] was set.
#[derive(Debug, Default)]
pub struct ScriptedPoller {
    script: Mutex<Script>,
}

impl ScriptedPoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Poller that reports every requested id as `status` right away.
    pub fn settling(status: Status) -> Self {
        let poller = Self::new();
        poller.settle(status);
        poller
    }

    pub fn push(&self, event: PollEvent) -> &Self {
        self.lock().steps.push(Step::Emit(event));
        self
    }

    pub fn push_status(&self, id: ResourceId, status: Status) -> &Self {
        self.push(PollEvent::Update(ResourceStatus::new(id, status)))
    }

    pub fn sleep(&self, duration: Duration) -> &Self {
        self.lock().steps.push(Step::Sleep(duration));
        self
    }

    pub fn settle(&self, status: Status) -> &Self {
        self.lock().settle = Some(status);
        self
    }

    pub fn close_after_script(&self) -> &Self {
        self.lock().close_after_script = true;
        self
    }

    /// Id sets passed to each `poll` call so far.
    pub fn calls(&self) -> Vec<IdSet> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StatusPoller for ScriptedPoller {
    fn poll(
        &self,
        ids: IdSet,
        _options: PollOptions,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<PollEvent> {
        let (tx, rx) = mpsc::channel(64);
        let (steps, settle, close) = {
            let mut script = self.lock();
            script.calls.push(ids.clone());
            (
                script.steps.clone(),
                script.settle,
                script.close_after_script,
            )
        };

        tokio::spawn(async move {
            for step in steps {
                let event = match step {
                    Step::Sleep(duration) => {
                        tokio::select! {
                            () = cancel.cancelled() => return,
                            () = tokio::time::sleep(duration) => continue,
                        }
                    }
                    Step::Emit(event) => event,
                };
                let wanted = match &event {
                    PollEvent::Update(update) => ids.contains(&update.id),
                    PollEvent::Error(_) => true,
                };
                if wanted && tx.send(event).await.is_err() {
                    return;
                }
            }
            if let Some(status) = settle {
                for id in &ids {
                    let update = ResourceStatus::new(id.clone(), status);
                    if tx.send(PollEvent::Update(update)).await.is_err() {
                        return;
                    }
                }
            }
            if !close {
                cancel.cancelled().await;
            }
        });

        rx
    }
}
