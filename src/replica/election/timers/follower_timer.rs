use crate::actor::WeakActorClient;
use crate::replica::election::timers::deadline::{DeadlineTimer, OnDeadline};
use crate::replica::election::timers::time::{Clock, RealClock};
use rand::Rng;
use std::ops::RangeInclusive;
use tokio::time::Duration;

/// Election timer of a voting follower or candidate. Dropping the handle stops the timer task.
pub(crate) struct FollowerTimerHandle<C: Clock = RealClock> {
    timer: DeadlineTimer<C>,
    timeout_range: RangeInclusive<Duration>,
}

struct StartElection {
    actor_client: WeakActorClient,
    // Between repeated timeouts while the actor hasn't reset us, e.g. a split vote.
    retry_after: Duration,
}

#[async_trait::async_trait]
impl OnDeadline for StartElection {
    async fn fire(&mut self) -> Option<Duration> {
        self.actor_client.follower_timeout().await.ok()?;
        Some(self.retry_after)
    }
}

impl FollowerTimerHandle {
    pub(crate) fn spawn_timer_task(min_timeout: Duration, max_timeout: Duration, actor_client: WeakActorClient) -> Self {
        let timeout_range = min_timeout..=max_timeout;
        let first_deadline = RealClock.now() + random_timeout(&timeout_range);
        let timer = DeadlineTimer::spawn(RealClock, Some(first_deadline), start_election(min_timeout, actor_client));

        FollowerTimerHandle { timer, timeout_range }
    }
}

impl<C: Clock> FollowerTimerHandle<C> {
    /// We heard from a leader (or granted a vote), so push the election back.
    pub(crate) fn reset_timeout(&self) {
        self.timer.fire_after(random_timeout(&self.timeout_range));
    }
}

fn start_election(retry_after: Duration, actor_client: WeakActorClient) -> StartElection {
    StartElection {
        actor_client,
        retry_after,
    }
}

// Every node draws its own timeout, so peers don't time out in lockstep.
fn random_timeout(range: &RangeInclusive<Duration>) -> Duration {
    rand::thread_rng().gen_range(range.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;
    use crate::replica::election::timers::deadline::DeadlineTask;
    use crate::replica::election::timers::test_utils::TestUtilActor;
    use crate::replica::election::timers::time::{manual_clock, ManualTime};

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn fixed_timer<C: Clock>(
        clock: C,
        time: &ManualTime,
        actor_client: WeakActorClient,
    ) -> (DeadlineTask<C, StartElection>, FollowerTimerHandle<C>) {
        let (task, timer) = DeadlineTimer::new(clock, Some(time.now() + TIMEOUT), start_election(TIMEOUT, actor_client));
        (
            task,
            FollowerTimerHandle {
                timer,
                timeout_range: TIMEOUT..=TIMEOUT,
            },
        )
    }

    #[tokio::test]
    async fn heartbeats_keep_election_away() {
        let (actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (clock, mut time) = manual_clock();
        let (task, handle) = fixed_timer(clock, &time, actor_client.weak());
        tokio::spawn(task.run());

        for _ in 0..6 {
            time.advance(TIMEOUT / 2);
            handle.reset_timeout();
        }
        actor.assert_no_event().await;

        // Last reset at T=3.
        time.advance(TIMEOUT - Duration::from_nanos(1));
        actor.assert_no_event().await;
        time.advance(Duration::from_nanos(1));
        actor.assert_follower_timeout_event().await;
    }

    #[tokio::test]
    async fn unanswered_timeout_repeats_until_reset() {
        let (actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (clock, mut time) = manual_clock();
        let (task, handle) = fixed_timer(clock, &time, actor_client.weak());
        tokio::spawn(task.run());

        time.advance(TIMEOUT);
        actor.assert_follower_timeout_event().await;

        // No leader showed up, try again.
        time.advance(TIMEOUT);
        actor.assert_follower_timeout_event().await;

        // A reset after a timeout is honored like any other.
        handle.reset_timeout();
        time.advance(TIMEOUT / 2);
        handle.reset_timeout();
        time.advance(TIMEOUT / 2);
        actor.assert_no_event().await;
        time.advance(TIMEOUT / 2);
        actor.assert_follower_timeout_event().await;
    }

    #[tokio::test]
    async fn dropped_handle_never_times_out() {
        let (actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (clock, mut time) = manual_clock();
        let (task, handle) = fixed_timer(clock, &time, actor_client.weak());
        let join_handle = tokio::spawn(task.run());

        drop(handle);
        time.advance(TIMEOUT * 2);
        join_handle.await.unwrap();
        actor.assert_no_event().await;
    }

    #[tokio::test]
    async fn timer_exits_with_the_actor() {
        let (actor_client, rx) = ActorClient::new(10);
        let weak = actor_client.weak();
        drop(actor_client);
        drop(rx);

        let (clock, mut time) = manual_clock();
        let (task, _handle) = fixed_timer(clock, &time, weak);
        let join_handle = tokio::spawn(task.run());

        time.advance(TIMEOUT);
        join_handle.await.unwrap();
    }

    #[test]
    fn random_timeout_stays_in_range() {
        let range = Duration::from_millis(150)..=Duration::from_millis(300);
        for _ in 0..100 {
            assert!(range.contains(&random_timeout(&range)));
        }
    }
}
