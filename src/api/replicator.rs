use crate::actor::{ActorClient, ActorExited};
use crate::api::{Broadcaster, QuorumChange, ReceiptFuture, ReplicatorInstanceEvent, ReplicatorState, Subscription};
use crate::replica::{IndexCommitNotice, NodeId, QuorumConfiguration, ReplicatorInstanceId, ReplicatorReceipt};
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;

pub(crate) type BackgroundTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Failure to hand a request to the replicator. The request's own outcome is reported through
/// the returned future instead.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Replicator hasn't been started")]
    NotStarted,
    #[error("Replicator has shut down")]
    ReplicatorExited,
}

impl From<ActorExited> for SubmitError {
    fn from(_: ActorExited) -> Self {
        SubmitError::ReplicatorExited
    }
}

/// Handle to one node's replicator of one quorum. Cheap to clone; all clones drive the same
/// replicator.
#[derive(Clone)]
pub struct Replicator {
    inner: Arc<ReplicatorInner>,
}

struct ReplicatorInner {
    logger: slog::Logger,
    instance: ReplicatorInstanceId,
    actor_client: ActorClient,
    runtime: Handle,
    lifecycle: Mutex<Lifecycle>,
    state_broadcaster: Broadcaster<ReplicatorState>,
    event_broadcaster: Broadcaster<ReplicatorInstanceEvent>,
    commit_notice_broadcaster: Broadcaster<IndexCommitNotice>,
}

enum Lifecycle {
    // Event loop and inbound pump, spawned by `start()`.
    Created(Vec<BackgroundTask>),
    Started,
    Stopped,
}

pub(crate) struct ReplicatorParts {
    pub logger: slog::Logger,
    pub instance: ReplicatorInstanceId,
    pub actor_client: ActorClient,
    pub runtime: Handle,
    pub background_tasks: Vec<BackgroundTask>,
    pub state_broadcaster: Broadcaster<ReplicatorState>,
    pub event_broadcaster: Broadcaster<ReplicatorInstanceEvent>,
    pub commit_notice_broadcaster: Broadcaster<IndexCommitNotice>,
}

impl Replicator {
    pub(crate) fn new(parts: ReplicatorParts) -> Self {
        Replicator {
            inner: Arc::new(ReplicatorInner {
                logger: parts.logger,
                instance: parts.instance,
                actor_client: parts.actor_client,
                runtime: parts.runtime,
                lifecycle: Mutex::new(Lifecycle::Created(parts.background_tasks)),
                state_broadcaster: parts.state_broadcaster,
                event_broadcaster: parts.event_broadcaster,
                commit_notice_broadcaster: parts.commit_notice_broadcaster,
            }),
        }
    }

    pub fn quorum_id(&self) -> &str {
        &self.inner.instance.quorum_id
    }

    pub fn id(&self) -> NodeId {
        self.inner.instance.node_id
    }

    pub fn instance(&self) -> &ReplicatorInstanceId {
        &self.inner.instance
    }

    /// Spawns the event loop. Subscriptions made before this call observe everything the
    /// replicator emits. Calling it again does nothing.
    pub fn start(&self) {
        let mut lifecycle = self.lifecycle();
        if let Lifecycle::Created(_) = &*lifecycle {
            if let Lifecycle::Created(tasks) = std::mem::replace(&mut *lifecycle, Lifecycle::Started) {
                slog::info!(self.inner.logger, "Starting replicator");
                for task in tasks {
                    self.inner.runtime.spawn(task);
                }
            }
        }
    }

    /// Stops the event loop. Pending quorum changes resolve `Cancelled`, and every subscription
    /// ends once drained.
    pub async fn shutdown(&self) {
        let was_started = {
            let mut lifecycle = self.lifecycle();
            let was_started = matches!(&*lifecycle, Lifecycle::Started);
            // Dropping never-spawned tasks drops the event loop with them.
            *lifecycle = Lifecycle::Stopped;
            was_started
        };

        if was_started {
            if self.inner.actor_client.shutdown().await.is_err() {
                slog::info!(self.inner.logger, "Event loop already exited");
            }
        } else {
            self.inner.state_broadcaster.close();
            self.inner.event_broadcaster.close();
            self.inner.commit_notice_broadcaster.close();
        }
    }

    /// The configuration in effect, as of the latest configuration entry in the local log.
    pub async fn quorum_configuration(&self) -> Result<QuorumConfiguration, SubmitError> {
        self.check_started()?;
        Ok(self.inner.actor_client.quorum_configuration().await?)
    }

    /// Appends one entry holding `buffers` if this node is leader. The future resolves to
    /// `Ok(None)` if it isn't.
    pub async fn log_data(&self, buffers: Vec<Bytes>) -> Result<ReceiptFuture<Option<ReplicatorReceipt>>, SubmitError> {
        self.check_started()?;
        let rx = self.inner.actor_client.log_data(buffers).await?;

        Ok(ReceiptFuture::new(rx))
    }

    /// Starts moving the quorum to exactly `new_peers`, via a transitional configuration.
    pub async fn change_quorum(&self, new_peers: impl IntoIterator<Item = NodeId>) -> Result<QuorumChange, SubmitError> {
        self.check_started()?;
        let (receipt_rx, completion_rx) = self
            .inner
            .actor_client
            .change_quorum(new_peers.into_iter().collect())
            .await?;

        Ok(QuorumChange {
            receipt: ReceiptFuture::new(receipt_rx),
            completion: ReceiptFuture::new(completion_rx),
        })
    }

    pub fn subscribe_state(&self) -> Subscription<ReplicatorState> {
        self.inner.state_broadcaster.subscribe()
    }

    pub fn subscribe_events(&self) -> Subscription<ReplicatorInstanceEvent> {
        self.inner.event_broadcaster.subscribe()
    }

    pub fn subscribe_commit_notices(&self) -> Subscription<IndexCommitNotice> {
        self.inner.commit_notice_broadcaster.subscribe()
    }

    fn check_started(&self) -> Result<(), SubmitError> {
        match &*self.lifecycle() {
            Lifecycle::Created(_) => Err(SubmitError::NotStarted),
            Lifecycle::Started => Ok(()),
            Lifecycle::Stopped => Err(SubmitError::ReplicatorExited),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner.lifecycle.lock().expect("Replicator lifecycle mutex guard poison")
    }
}
