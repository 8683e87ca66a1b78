use crate::actor::Event;
use crate::replica::LeaderTimerTick;
use std::time::Duration;
use tokio::sync::mpsc;

/// Stands in for the replicator actor, so timer tests can assert what they'd enqueue.
pub(super) struct TestUtilActor {
    rx: mpsc::Receiver<Event>,
    no_event_timeout: Duration,
}

impl TestUtilActor {
    pub(super) fn new(actor_queue_rx: mpsc::Receiver<Event>) -> Self {
        TestUtilActor {
            rx: actor_queue_rx,
            no_event_timeout: Duration::from_millis(10),
        }
    }

    async fn recv(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("Unexpected timeout")
            .expect("Expected event")
    }

    pub(super) async fn assert_leader_heartbeat_event(&mut self, expected_leader_heartbeat: LeaderTimerTick) {
        match self.recv().await {
            Event::LeaderTimer(event) => assert_eq!(event, expected_leader_heartbeat),
            other => panic!("Unexpected event {:?}", other),
        }
    }

    pub(super) async fn assert_follower_timeout_event(&mut self) {
        match self.recv().await {
            Event::FollowerTimeout => { /* Success! */ }
            other => panic!("Unexpected event {:?}", other),
        }
    }

    pub(super) async fn assert_no_event(&mut self) {
        tokio::time::timeout(self.no_event_timeout, self.rx.recv())
            .await
            .expect_err("Expected timeout");
    }
}
