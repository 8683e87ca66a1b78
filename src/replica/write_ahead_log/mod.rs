//! This module is a replicator-specific commit log that wraps the generic commit log. The generic
//! commitlog mod only knows about bytes; everything about terms, configurations and commit
//! progress lives here.

mod commit_notifier;
mod log;
mod log_entry;

pub use commit_notifier::IndexCommitNotice;
pub use log_entry::EntryPayload;
pub use log_entry::WriteAheadLogEntry;

pub(crate) use commit_notifier::CommitNotifier;
pub(crate) use log::WriteAheadLog;
pub(crate) use log_entry::invalid_data;
