use crate::replica::{QuorumConfiguration, ReceiptError, ReplicatorReceipt};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Resolves once the replicator decided the outcome of a submission. Never hangs: if the
/// replicator goes away first, it resolves to `Err(ReceiptError::Cancelled)`.
#[derive(Debug)]
pub struct ReceiptFuture<T> {
    receiver: oneshot::Receiver<Result<T, ReceiptError>>,
}

impl<T> ReceiptFuture<T> {
    pub(crate) fn new(receiver: oneshot::Receiver<Result<T, ReceiptError>>) -> Self {
        ReceiptFuture { receiver }
    }
}

impl<T> Future for ReceiptFuture<T> {
    type Output = Result<T, ReceiptError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(ReceiptError::Cancelled)))
    }
}

/// The two outcomes of `Replicator::change_quorum()`.
#[derive(Debug)]
pub struct QuorumChange {
    /// The transitional configuration entry's position. `Ok(None)` if this node isn't leader.
    pub receipt: ReceiptFuture<Option<ReplicatorReceipt>>,
    /// The final configuration, once it committed.
    pub completion: ReceiptFuture<QuorumConfiguration>,
}
