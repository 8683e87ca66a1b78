use crate::actor::{self, ActorClient, ReplicatorActor};
use crate::api::options::ReplicatorOptionsValidated;
use crate::api::replicator::{BackgroundTask, ReplicatorParts};
use crate::api::{Broadcaster, InstanceEventPublisher, Replicator, ReplicatorOptions};
use crate::commitlog::{InMemoryLog, InMemoryLogFactory, Log, LogConfig, LogFactory};
use crate::replica::{
    InMemoryLocalStateFactory, LocalStateFactory, NodeId, PersistentLocalState, QuorumConfiguration, Replica,
    ReplicaConfig, ReplicatorInstanceId, VolatileLocalState, WriteAheadLogEntry,
};
use crate::rpc::Transport;
use std::collections::BTreeSet;
use std::convert::TryFrom;
use std::io;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::runtime::Handle;

#[derive(Debug, thiserror::Error)]
pub enum ModuleCreationError {
    #[error("Illegal options for configuring replicators: {0}")]
    IllegalOptions(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CreateReplicatorError {
    #[error("Log initialization failure")]
    LogInitialization(io::Error),
    #[error("Local state initialization failure")]
    LocalStateInitialization(io::Error),
    #[error("Existing log can't be read")]
    CorruptLog(io::Error),
    #[error("my node ID not in the quorum's peers")]
    MeNotInQuorum,
}

/// Creates this node's replicators, one per quorum, all sharing one set of storage factories and
/// one transport.
pub struct ReplicationModule<LF, SF, L, S> {
    logger: slog::Logger,
    node_id: NodeId,
    log_factory: LF,
    local_state_factory: SF,
    transport: Arc<dyn Transport>,
    options: ReplicatorOptionsValidated,
    _storage: PhantomData<fn() -> (L, S)>,
}

pub type InMemoryReplicationModule = ReplicationModule<
    InMemoryLogFactory<WriteAheadLogEntry>,
    InMemoryLocalStateFactory,
    InMemoryLog<WriteAheadLogEntry>,
    VolatileLocalState,
>;

impl InMemoryReplicationModule {
    /// Nothing survives the process, but everything survives re-creating a replicator.
    pub fn in_memory(
        logger: slog::Logger,
        node_id: NodeId,
        transport: Arc<dyn Transport>,
        options: ReplicatorOptions,
    ) -> Result<Self, ModuleCreationError> {
        ReplicationModule::new(
            logger,
            node_id,
            InMemoryLogFactory::new(),
            InMemoryLocalStateFactory::new(),
            transport,
            options,
        )
    }
}

impl<LF, SF, L, S> ReplicationModule<LF, SF, L, S>
where
    LF: LogFactory<WriteAheadLogEntry, L>,
    SF: LocalStateFactory<S>,
    L: Log<WriteAheadLogEntry> + Send + 'static,
    S: PersistentLocalState + Send + 'static,
{
    pub fn new(
        logger: slog::Logger,
        node_id: NodeId,
        log_factory: LF,
        local_state_factory: SF,
        transport: Arc<dyn Transport>,
        options: ReplicatorOptions,
    ) -> Result<Self, ModuleCreationError> {
        let options = ReplicatorOptionsValidated::try_from(options)
            .map_err(|e| ModuleCreationError::IllegalOptions(e.to_string()))?;

        Ok(ReplicationModule {
            logger,
            node_id,
            log_factory,
            local_state_factory,
            transport,
            options,
            _storage: PhantomData,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Creates the replicator of `quorum_id` on this node, not yet started. If this node has
    /// history for the quorum, it resumes from it and `peers` is ignored. Otherwise `peers` is
    /// the quorum's initial configuration: it must include this node, or be empty to create an
    /// observer that waits to be added by a leader.
    pub async fn create_replicator(
        &self,
        quorum_id: impl Into<String>,
        peers: impl IntoIterator<Item = NodeId>,
    ) -> Result<Replicator, CreateReplicatorError> {
        let quorum_id = quorum_id.into();
        let instance = ReplicatorInstanceId::new(quorum_id.clone(), self.node_id);
        let logger = self
            .logger
            .new(slog::o!("QuorumId" => quorum_id.clone(), "NodeId" => self.node_id.as_u64()));

        let log = self
            .log_factory
            .try_create_log(LogConfig {
                quorum_id: quorum_id.clone(),
            })
            .map_err(CreateReplicatorError::LogInitialization)?;
        let mut local_state = self
            .local_state_factory
            .try_create_local_state(&quorum_id, self.node_id)
            .map_err(CreateReplicatorError::LocalStateInitialization)?;

        let bootstrap_configuration = match local_state.bootstrap_configuration() {
            Some(configuration) => {
                slog::info!(logger, "Resuming quorum, ignoring requested peers");
                configuration
            }
            // Configuration entries in the log take over from here.
            None if log.last_index().is_some() => QuorumConfiguration::empty(),
            None => {
                let peers: BTreeSet<NodeId> = peers.into_iter().collect();
                if !peers.is_empty() && !peers.contains(&self.node_id) {
                    return Err(CreateReplicatorError::MeNotInQuorum);
                }
                let configuration = QuorumConfiguration::new(peers);
                local_state.store_bootstrap_configuration_if_absent(configuration.clone());
                configuration
            }
        };

        let (actor_client, actor_queue_rx) = ActorClient::new(self.options.actor_queue_size);
        let inbound = self.transport.subscribe(&quorum_id, self.node_id);

        let state_broadcaster = Broadcaster::new();
        let event_broadcaster = Broadcaster::new();
        let commit_notice_broadcaster = Broadcaster::new();

        let replica = Replica::new(ReplicaConfig {
            logger: logger.clone(),
            instance: instance.clone(),
            log,
            local_state,
            bootstrap_configuration,
            transport: self.transport.clone(),
            actor_client: actor_client.weak(),
            state_broadcaster: state_broadcaster.clone(),
            event_publisher: InstanceEventPublisher::new(instance.clone(), event_broadcaster.clone()),
            commit_notice_broadcaster: commit_notice_broadcaster.clone(),
            leader_heartbeat_duration: self.options.leader_heartbeat_duration,
            follower_min_timeout: self.options.follower_min_timeout,
            follower_max_timeout: self.options.follower_max_timeout,
            append_entries_timeout: self.options.leader_append_entries_timeout,
            max_entries_per_append: self.options.max_entries_per_append,
        })
        .map_err(CreateReplicatorError::CorruptLog)?;

        let replica_actor = ReplicatorActor::new(logger.clone(), actor_queue_rx, replica);
        let background_tasks: Vec<BackgroundTask> = vec![
            Box::pin(replica_actor.run_event_loop()),
            Box::pin(actor::forward_inbound(inbound, actor_client.weak())),
        ];

        Ok(Replicator::new(ReplicatorParts {
            logger,
            instance,
            actor_client,
            runtime: Handle::current(),
            background_tasks,
            state_broadcaster,
            event_broadcaster,
            commit_notice_broadcaster,
        }))
    }
}
