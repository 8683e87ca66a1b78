use std::convert::TryFrom;
use tokio::time::Duration;

/// Tuning knobs shared by every replicator a module creates. Unset fields take defaults.
#[derive(Clone, Debug, Default)]
pub struct ReplicatorOptions {
    pub leader_heartbeat_duration: Option<Duration>,
    pub follower_min_timeout: Option<Duration>,
    pub follower_max_timeout: Option<Duration>,
    pub leader_append_entries_timeout: Option<Duration>,
    pub max_entries_per_append: Option<usize>,
    pub actor_queue_size: Option<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub(super) struct ReplicatorOptionsValidated {
    pub leader_heartbeat_duration: Duration,
    pub follower_min_timeout: Duration,
    pub follower_max_timeout: Duration,
    pub leader_append_entries_timeout: Duration,
    pub max_entries_per_append: usize,
    pub actor_queue_size: usize,
}

impl ReplicatorOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.leader_heartbeat_duration >= self.follower_min_timeout {
            return Err("Follower minimum timeout must be greater than leader's heartbeat");
        }
        if self.follower_min_timeout >= self.follower_max_timeout {
            return Err("Follower minimum timeout must be less than maximum timeout");
        }
        if self.leader_append_entries_timeout >= self.follower_min_timeout {
            return Err("Leader's AppendEntries RPC timeout must be less than the follower's heartbeat timeout");
        }
        if self.max_entries_per_append == 0 {
            return Err("Max entries per AppendEntries must be positive");
        }
        if self.actor_queue_size == 0 {
            return Err("Actor queue size must be positive");
        }

        Ok(())
    }
}

impl TryFrom<ReplicatorOptions> for ReplicatorOptionsValidated {
    type Error = &'static str;

    fn try_from(options: ReplicatorOptions) -> Result<Self, Self::Error> {
        let values = ReplicatorOptionsValidated {
            leader_heartbeat_duration: options.leader_heartbeat_duration.unwrap_or(Duration::from_millis(100)),
            follower_min_timeout: options.follower_min_timeout.unwrap_or(Duration::from_millis(500)),
            follower_max_timeout: options.follower_max_timeout.unwrap_or(Duration::from_millis(1500)),
            leader_append_entries_timeout: options
                .leader_append_entries_timeout
                .unwrap_or(Duration::from_millis(300)),
            max_entries_per_append: options.max_entries_per_append.unwrap_or(64),
            actor_queue_size: options.actor_queue_size.unwrap_or(64),
        };

        values.validate()?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = ReplicatorOptionsValidated::try_from(ReplicatorOptions::default()).unwrap();
        assert_eq!(options.leader_heartbeat_duration, Duration::from_millis(100));
        assert_eq!(options.follower_min_timeout, Duration::from_millis(500));
        assert_eq!(options.follower_max_timeout, Duration::from_millis(1500));
        assert_eq!(options.leader_append_entries_timeout, Duration::from_millis(300));
        assert_eq!(options.max_entries_per_append, 64);
        assert_eq!(options.actor_queue_size, 64);
    }

    #[test]
    fn rejects_inconsistent_timeouts() {
        let heartbeat_too_slow = ReplicatorOptions {
            leader_heartbeat_duration: Some(Duration::from_millis(600)),
            ..Default::default()
        };
        assert!(ReplicatorOptionsValidated::try_from(heartbeat_too_slow).is_err());

        let min_above_max = ReplicatorOptions {
            follower_min_timeout: Some(Duration::from_millis(2000)),
            ..Default::default()
        };
        assert!(ReplicatorOptionsValidated::try_from(min_above_max).is_err());

        let append_timeout_too_long = ReplicatorOptions {
            leader_append_entries_timeout: Some(Duration::from_millis(500)),
            ..Default::default()
        };
        assert!(ReplicatorOptionsValidated::try_from(append_timeout_too_long).is_err());

        let no_entries = ReplicatorOptions {
            max_entries_per_append: Some(0),
            ..Default::default()
        };
        assert!(ReplicatorOptionsValidated::try_from(no_entries).is_err());
    }
}
