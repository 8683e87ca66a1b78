use bytes::Bytes;
use replicator::{
    InMemoryNetwork, InMemoryReplicationModule, NodeId, Replicator, ReplicatorEventKind, ReplicatorOptions,
};
use slog::Drain;
use std::error::Error;
use std::sync::Arc;
use tokio::time::Duration;

const QUORUM_ID: &str = "helloworld";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let root_logger = create_root_logger_for_stdout();
    let network = InMemoryNetwork::new(root_logger.new(slog::o!("Component" => "Network")));
    let peers: Vec<NodeId> = (1..=3).map(NodeId).collect();

    let mut modules = Vec::with_capacity(peers.len());
    let mut replicators = Vec::with_capacity(peers.len());
    for node_id in peers.iter().copied() {
        let module = InMemoryReplicationModule::in_memory(
            root_logger.clone(),
            node_id,
            Arc::new(network.clone()),
            ReplicatorOptions::default(),
        )?;
        let replicator = module.create_replicator(QUORUM_ID, peers.clone()).await?;
        modules.push(module);
        replicators.push(replicator);
    }

    let mut events = replicators[0].subscribe_events();
    for replicator in replicators.iter() {
        replicator.start();
    }

    let leader_id = loop {
        match tokio::time::timeout(Duration::from_secs(10), events.next()).await? {
            Some(event) => {
                if let ReplicatorEventKind::LeaderElected { new_leader, term } = event.kind {
                    slog::info!(root_logger, "{:?} leads term {:?}", new_leader, term);
                    break new_leader;
                }
            }
            None => return Err("replicator exited before a leader was elected".into()),
        }
    };
    let leader = find(&replicators, leader_id)?;

    let mut notices = leader.subscribe_commit_notices();
    for message in &["Hello", "world"] {
        let receipt = leader.log_data(vec![Bytes::from(message.to_string())]).await?.await?;
        slog::info!(root_logger, "Logged {:?}: {:?}", message, receipt);
    }
    while let Some(notice) = tokio::time::timeout(Duration::from_secs(5), notices.next()).await? {
        slog::info!(root_logger, "Committed up to {:?}", notice.up_to_and_including);
        if notice.up_to_and_including.as_u64() >= 2 {
            break;
        }
    }

    for replicator in replicators.iter() {
        replicator.shutdown().await;
    }

    Ok(())
}

fn find(replicators: &[Replicator], node_id: NodeId) -> Result<&Replicator, Box<dyn Error>> {
    replicators
        .iter()
        .find(|replicator| replicator.id() == node_id)
        .ok_or_else(|| format!("no replicator for {:?}", node_id).into())
}

fn create_root_logger_for_stdout() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}
