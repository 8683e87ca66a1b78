use crate::actor::WeakActorClient;
use crate::replica::election::timers::deadline::{DeadlineTimer, OnDeadline};
use crate::replica::election::timers::time::{Clock, RealClock};
use crate::replica::{LeaderTimerTick, NodeId, Term};
use tokio::time::Duration;

/// Per-peer timer of a leader. It ticks when this peer is due a heartbeat, or when the
/// outstanding AppendEntries to it has gone unanswered for too long. Dropping the handle stops
/// the timer task.
pub(crate) struct LeaderTimerHandle<C: Clock = RealClock> {
    timer: DeadlineTimer<C>,
    heartbeat_duration: Duration,
}

struct Tick {
    actor_client: WeakActorClient,
    tick: LeaderTimerTick,
    heartbeat_duration: Duration,
}

#[async_trait::async_trait]
impl OnDeadline for Tick {
    async fn fire(&mut self) -> Option<Duration> {
        self.actor_client.leader_timer(self.tick.clone()).await.ok()?;
        Some(self.heartbeat_duration)
    }
}

impl LeaderTimerHandle {
    /// The first tick is immediate, so a new leader (or new member) hears from us right away.
    pub(crate) fn spawn_timer_task(
        heartbeat_duration: Duration,
        actor_client: WeakActorClient,
        peer_id: NodeId,
        term: Term,
    ) -> Self {
        let tick = Tick {
            actor_client,
            tick: LeaderTimerTick { peer_id, term },
            heartbeat_duration,
        };

        LeaderTimerHandle {
            timer: DeadlineTimer::spawn(RealClock, None, tick),
            heartbeat_duration,
        }
    }
}

impl<C: Clock> LeaderTimerHandle<C> {
    /// Next tick once the peer has gone a heartbeat duration without hearing from us.
    pub(crate) fn reset_heartbeat_timer(&self) {
        self.timer.fire_after(self.heartbeat_duration);
    }

    /// Next tick once the request just sent is overdue, so it's retried then.
    pub(crate) fn expect_reply_within(&self, timeout: Duration) {
        self.timer.fire_after(timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;
    use crate::replica::election::timers::deadline::DeadlineTask;
    use crate::replica::election::timers::test_utils::TestUtilActor;
    use crate::replica::election::timers::time::manual_clock;

    const HEARTBEAT: Duration = Duration::from_millis(100);

    fn tick(peer_id: u64, term: u64) -> LeaderTimerTick {
        LeaderTimerTick {
            peer_id: NodeId(peer_id),
            term: Term::new(term),
        }
    }

    fn timer<C: Clock>(
        clock: C,
        actor_client: WeakActorClient,
        expected: &LeaderTimerTick,
    ) -> (DeadlineTask<C, Tick>, LeaderTimerHandle<C>) {
        let (task, timer) = DeadlineTimer::new(
            clock,
            None,
            Tick {
                actor_client,
                tick: expected.clone(),
                heartbeat_duration: HEARTBEAT,
            },
        );
        (
            task,
            LeaderTimerHandle {
                timer,
                heartbeat_duration: HEARTBEAT,
            },
        )
    }

    #[tokio::test]
    async fn ticks_immediately_then_every_heartbeat() {
        let (actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (clock, mut time) = manual_clock();
        let expected = tick(123, 10);
        let (task, handle) = timer(clock, actor_client.weak(), &expected);
        let join_handle = tokio::spawn(task.run());

        actor.assert_leader_heartbeat_event(expected.clone()).await;
        actor.assert_no_event().await;

        for _ in 0..3 {
            time.advance(HEARTBEAT);
            actor.assert_leader_heartbeat_event(expected.clone()).await;
            actor.assert_no_event().await;
        }

        // A long silence is still one tick.
        time.advance(HEARTBEAT * 5);
        actor.assert_leader_heartbeat_event(expected.clone()).await;
        actor.assert_no_event().await;

        drop(handle);
        time.advance(HEARTBEAT);
        join_handle.await.unwrap();
        actor.assert_no_event().await;
    }

    #[tokio::test]
    async fn sending_postpones_heartbeat() {
        let (actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (clock, mut time) = manual_clock();
        let expected = tick(7, 3);
        let (task, handle) = timer(clock, actor_client.weak(), &expected);
        tokio::spawn(task.run());
        actor.assert_leader_heartbeat_event(expected.clone()).await;

        // Replies keep coming in, each resets the heartbeat. Last one at T=2.5.
        for _ in 0..5 {
            time.advance(HEARTBEAT / 2);
            handle.reset_heartbeat_timer();
        }
        time.advance(HEARTBEAT / 2);
        actor.assert_no_event().await;

        time.advance(HEARTBEAT / 2);
        actor.assert_leader_heartbeat_event(expected).await;
        assert_eq!(time.elapsed(), HEARTBEAT * 7 / 2);
    }

    #[tokio::test]
    async fn unanswered_request_ticks_at_reply_timeout() {
        let (actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (clock, mut time) = manual_clock();
        let expected = tick(2, 1);
        let (task, handle) = timer(clock, actor_client.weak(), &expected);
        tokio::spawn(task.run());
        actor.assert_leader_heartbeat_event(expected.clone()).await;

        // Request sent at T=0, due back by T=3. No heartbeats in between.
        handle.expect_reply_within(HEARTBEAT * 3);
        for _ in 0..5 {
            time.advance(HEARTBEAT / 2);
            actor.assert_no_event().await;
        }
        time.advance(HEARTBEAT / 2);
        actor.assert_leader_heartbeat_event(expected.clone()).await;

        // The reply to the retry arrives in time, back to heartbeats.
        handle.expect_reply_within(HEARTBEAT * 3);
        time.advance(HEARTBEAT / 2);
        handle.reset_heartbeat_timer();
        time.advance(HEARTBEAT / 2);
        actor.assert_no_event().await;
        time.advance(HEARTBEAT / 2);
        actor.assert_leader_heartbeat_event(expected).await;
    }

    #[tokio::test]
    async fn timer_exits_with_the_actor() {
        let (actor_client, rx) = ActorClient::new(10);
        let weak = actor_client.weak();
        drop(actor_client);
        drop(rx);

        let (clock, _time) = manual_clock();
        let (task, _handle) = timer(clock, weak, &tick(2, 1));

        // The immediate tick finds nobody listening.
        tokio::spawn(task.run()).await.unwrap();
    }
}
