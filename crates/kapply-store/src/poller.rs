use crate::status::{compute_status, Status};
use crate::ResourceStore;
use kapply_schema::{IdSet, Resource, ResourceId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const FEED_CAPACITY: usize = 64;

/// Shortest period the store is polled at; a zero interval is raised to it.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// One observation of a resource's status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceStatus {
    pub id: ResourceId,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Resource>,
    pub message: String,
}

impl ResourceStatus {
    pub fn new(id: ResourceId, status: Status) -> Self {
        Self {
            id,
            status,
            resource: None,
            message: String::new(),
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    #[must_use]
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Update(ResourceStatus),
    /// The feed hit an unrecoverable fault and will send nothing more.
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
        }
    }
}

/// Source of live status updates for a set of resources.
///
/// `poll` must be called from within a tokio runtime. The returned feed
/// stays open until `cancel` fires or the poller fails; dropping the
/// receiver also stops it.
pub trait StatusPoller: Send + Sync {
    fn poll(
        &self,
        ids: IdSet,
        options: PollOptions,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<PollEvent>;
}

/// Polls a [`ResourceStore`] on a fixed interval and reports every status
/// change, starting with the first observation of each resource.
pub struct StorePoller {
    store: Arc<dyn ResourceStore>,
}

impl StorePoller {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }
}

impl StatusPoller for StorePoller {
    fn poll(
        &self,
        ids: IdSet,
        options: PollOptions,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<PollEvent> {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let store = Arc::clone(&self.store);

        tokio::spawn(async move {
            let mut last: HashMap<ResourceId, Status> = HashMap::new();
            let mut ticker = tokio::time::interval(options.interval.max(MIN_POLL_INTERVAL));
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                for id in &ids {
                    let observed = observe(store.as_ref(), id).await;
                    if last.get(id) == Some(&observed.status) {
                        continue;
                    }
                    last.insert(id.clone(), observed.status);
                    if tx.send(PollEvent::Update(observed)).await.is_err() {
                        return;
                    }
                }
            }
            tracing::trace!("status poller for {} objects stopped", ids.len());
        });

        rx
    }
}

async fn observe(store: &dyn ResourceStore, id: &ResourceId) -> ResourceStatus {
    match store.get(id).await {
        Ok(resource) => {
            let (status, message) = compute_status(&resource);
            ResourceStatus::new(id.clone(), status)
                .with_message(message)
                .with_resource(resource)
        }
        Err(e) if e.is_not_found() => {
            ResourceStatus::new(id.clone(), Status::NotFound).with_message("resource not found")
        }
        Err(e) => ResourceStatus::new(id.clone(), Status::Unknown).with_message(e.to_string()),
    }
}
