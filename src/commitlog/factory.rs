use crate::commitlog::{Entry, InMemoryLog, Log};
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

// -- Log factory --
pub trait LogFactory<E, L>
where
    E: Entry,
    L: Log<E>,
{
    /// Opens the log of a quorum, creating it if this node has never hosted the quorum.
    fn try_create_log(&self, config: LogConfig) -> Result<L, io::Error>;
}

pub struct LogConfig {
    pub quorum_id: String,
}

// -- InMemoryLogFactory --

/// Hands out one log per quorum ID for the lifetime of the factory, so a replicator that's
/// re-created for the same quorum resumes the same history.
pub struct InMemoryLogFactory<E: Entry> {
    logs: Arc<Mutex<HashMap<String, InMemoryLog<E>>>>,
}

impl<E: Entry> InMemoryLogFactory<E> {
    pub fn new() -> Self {
        InMemoryLogFactory {
            logs: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<E: Entry> Default for InMemoryLogFactory<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entry> Clone for InMemoryLogFactory<E> {
    fn clone(&self) -> Self {
        InMemoryLogFactory {
            logs: self.logs.clone(),
        }
    }
}

impl<E: Entry> LogFactory<E, InMemoryLog<E>> for InMemoryLogFactory<E> {
    fn try_create_log(&self, config: LogConfig) -> Result<InMemoryLog<E>, io::Error> {
        let mut logs = self
            .logs
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "InMemoryLogFactory mutex guard poison"))?;

        match logs.get(&config.quorum_id) {
            Some(log) => Ok(log.clone()),
            None => {
                let log = InMemoryLog::create()?;
                logs.insert(config.quorum_id, log.clone());
                Ok(log)
            }
        }
    }
}
