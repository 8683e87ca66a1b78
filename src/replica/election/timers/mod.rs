mod deadline;
mod follower_timer;
mod leader_timer;
mod time;

#[cfg(test)]
mod test_utils;

pub(crate) use follower_timer::FollowerTimerHandle;
pub(crate) use leader_timer::LeaderTimerHandle;
pub(crate) use time::{Clock, RealClock};
