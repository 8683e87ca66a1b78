use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Fan-out to any number of subscribers. Each subscriber buffers independently, and sees items
/// in the order they were published. Subscribers that are gone are pruned on publish.
pub(crate) struct Broadcaster<T: Clone> {
    inner: Arc<Mutex<BroadcasterInner<T>>>,
}

struct BroadcasterInner<T> {
    subscribers: Vec<mpsc::UnboundedSender<T>>,
    closed: bool,
}

impl<T: Clone> Broadcaster<T> {
    pub(crate) fn new() -> Self {
        Broadcaster {
            inner: Arc::new(Mutex::new(BroadcasterInner {
                subscribers: Vec::new(),
                closed: false,
            })),
        }
    }

    pub(crate) fn publish(&self, item: T) {
        self.inner()
            .subscribers
            .retain(|subscriber| subscriber.send(item.clone()).is_ok());
    }

    /// Only items published after this call are observed.
    pub(crate) fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner();
        if !inner.closed {
            inner.subscribers.push(tx);
        }

        Subscription { receiver: rx }
    }

    /// Ends every subscription, current and future, once buffered items are drained.
    pub(crate) fn close(&self) {
        let mut inner = self.inner();
        inner.closed = true;
        inner.subscribers.clear();
    }

    fn inner(&self) -> MutexGuard<'_, BroadcasterInner<T>> {
        self.inner.lock().expect("Broadcaster mutex guard poison")
    }
}

impl<T: Clone> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Broadcaster {
            inner: self.inner.clone(),
        }
    }
}

/// One subscriber's stream of a replicator's broadcasts.
pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// `next()` returns the next item, or None once the replicator has shut down and every
    /// buffered item was returned.
    pub async fn next(&mut self) -> Option<T> {
        self.receiver.recv().await
    }
}
