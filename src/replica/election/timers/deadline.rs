use crate::replica::election::timers::time::Clock;
use std::sync::{Arc, Mutex, Weak};
use tokio::time::{Duration, Instant};

/// What a timer does once its deadline passes without anybody pushing it back.
#[async_trait::async_trait]
pub(super) trait OnDeadline: Send + 'static {
    /// Returns how long to wait before firing again, or None to stop the timer.
    async fn fire(&mut self) -> Option<Duration>;
}

/// The owning side of a timer task. Dropping it stops the task the next time it wakes up.
pub(super) struct DeadlineTimer<C: Clock> {
    next: Arc<Mutex<Option<Instant>>>,
    clock: C,
}

pub(super) struct DeadlineTask<C: Clock, T: OnDeadline> {
    next: Weak<Mutex<Option<Instant>>>,
    clock: C,
    on_deadline: T,
}

impl<C: Clock> DeadlineTimer<C> {
    /// `first_deadline` of None fires right after the task starts.
    pub(super) fn new<T: OnDeadline>(
        clock: C,
        first_deadline: Option<Instant>,
        on_deadline: T,
    ) -> (DeadlineTask<C, T>, Self) {
        let next = Arc::new(Mutex::new(first_deadline));
        let task = DeadlineTask {
            next: Arc::downgrade(&next),
            clock: clock.clone(),
            on_deadline,
        };

        (task, DeadlineTimer { next, clock })
    }

    pub(super) fn spawn<T: OnDeadline>(clock: C, first_deadline: Option<Instant>, on_deadline: T) -> Self {
        let (task, timer) = Self::new(clock, first_deadline, on_deadline);
        tokio::task::spawn(task.run());

        timer
    }

    /// Replaces whatever deadline was set.
    pub(super) fn fire_after(&self, delay: Duration) {
        let deadline = self.clock.now() + delay;
        lock(&self.next).replace(deadline);
    }
}

impl<C: Clock, T: OnDeadline> DeadlineTask<C, T> {
    pub(super) async fn run(mut self) {
        loop {
            let next = match self.next.upgrade() {
                Some(next) => next,
                None => return,
            };
            let deadline = lock(&next).take();
            drop(next);

            match deadline {
                Some(deadline) => self.clock.sleep_until(deadline).await,
                None => {
                    let delay = match self.on_deadline.fire().await {
                        Some(delay) => delay,
                        None => return,
                    };
                    // A deadline pushed while firing wins over our own.
                    match self.next.upgrade() {
                        Some(next) => {
                            lock(&next).get_or_insert(self.clock.now() + delay);
                        }
                        None => return,
                    }
                }
            }
        }
    }
}

fn lock(next: &Mutex<Option<Instant>>) -> std::sync::MutexGuard<'_, Option<Instant>> {
    next.lock().expect("DeadlineTimer mutex guard poison")
}
