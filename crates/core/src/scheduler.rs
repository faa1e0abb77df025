//! Failure injection and recovery scheduling.
//!
//! Once per tick the scheduler runs three steps in a fixed order:
//! 1. the fail decision, which may take one available failable node down,
//! 2. the recovery sweep, which brings back every node whose recovery is due,
//! 3. the beacon check, which re-arms the source once per packet interval.
//!
//! All state here is owned by the tick loop; nothing is shared.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

use crate::{
    node::NodeId,
    registry::{InvalidNodeError, NodeRegistry},
    util::rng::Randomness,
};

/// Per-tick failure draw: a node fails when a uniform draw from `1..=max` equals
/// `target`. Only valid draws can be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureDraw {
    max: u32,
    target: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidDrawError {
    #[error("failure draw range 1..=0 is empty")]
    EmptyRange,
    #[error("failure target {target} is outside 1..={max}")]
    TargetOutOfRange { max: u32, target: u32 },
}

impl FailureDraw {
    pub fn new(max: u32, target: u32) -> Result<Self, InvalidDrawError> {
        if max == 0 {
            return Err(InvalidDrawError::EmptyRange);
        }
        if !(1..=max).contains(&target) {
            return Err(InvalidDrawError::TargetOutOfRange { max, target });
        }
        Ok(Self { max, target })
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn target(&self) -> u32 {
        self.target
    }
}

impl Default for FailureDraw {
    fn default() -> Self {
        Self {
            max: crate::config::DEFAULT_FAIL_DRAW_MAX,
            target: crate::config::DEFAULT_FAIL_TARGET,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailurePolicy {
    pub draw: FailureDraw,
    /// How long a failed node stays down.
    pub sleep_time: Duration,
    /// Interval between beacon re-arms.
    pub packet_time: Duration,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            draw: FailureDraw::default(),
            sleep_time: Duration::from_secs(crate::config::DEFAULT_SLEEP_TIME_SECS),
            packet_time: Duration::from_secs(crate::config::DEFAULT_PACKET_TIME_SECS),
        }
    }
}

/// A failed node and the time it is due back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecovery {
    pub node: NodeId,
    pub recover_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    NodeFailed {
        node: NodeId,
        recover_at: DateTime<Utc>,
    },
    NodeRecovered {
        node: NodeId,
    },
    BeaconRearm,
}

pub struct FailureScheduler<R> {
    policy: FailurePolicy,
    sleep_time: TimeDelta,
    packet_time: TimeDelta,
    rng: R,
    pending: Vec<PendingRecovery>,
    last_beacon: DateTime<Utc>,
}

impl<R: Randomness> FailureScheduler<R> {
    /// Creates a scheduler whose beacon timer starts at `started_at`.
    pub fn new(policy: FailurePolicy, rng: R, started_at: DateTime<Utc>) -> Self {
        Self {
            sleep_time: to_delta(policy.sleep_time),
            packet_time: to_delta(policy.packet_time),
            policy,
            rng,
            pending: Vec::new(),
            last_beacon: started_at,
        }
    }

    pub fn policy(&self) -> &FailurePolicy {
        &self.policy
    }

    pub fn pending(&self) -> &[PendingRecovery] {
        &self.pending
    }

    /// Restarts the beacon timer, as done when the source is started.
    pub fn reset_beacon(&mut self, now: DateTime<Utc>) {
        self.last_beacon = now;
    }

    /// Runs one tick and returns what happened, in order.
    ///
    /// An error means the registry and the pending set disagree, which cannot happen
    /// as long as this scheduler is the only mutator of the registry.
    pub fn tick(
        &mut self,
        registry: &mut NodeRegistry,
        now: DateTime<Utc>,
    ) -> Result<Vec<SchedulerEvent>, InvalidNodeError> {
        let mut events = Vec::new();
        if let Some(event) = self.fail_decision(registry, now)? {
            events.push(event);
        }
        self.recovery_sweep(registry, now, &mut events)?;
        if self.beacon_due(now) {
            events.push(SchedulerEvent::BeaconRearm);
        }
        Ok(events)
    }

    fn fail_decision(
        &mut self,
        registry: &mut NodeRegistry,
        now: DateTime<Utc>,
    ) -> Result<Option<SchedulerEvent>, InvalidNodeError> {
        let draw = self.rng.roll(1..=self.policy.draw.max());
        if draw != self.policy.draw.target() {
            return Ok(None);
        }
        let available = registry.available_failable_nodes();
        if available.is_empty() {
            tracing::debug!("Fail decision drawn but no failable node is up");
            return Ok(None);
        }
        let node = available[self.rng.pick(available.len())].clone();
        registry.mark_failed(&node)?;
        let recover_at = now
            .checked_add_signed(self.sleep_time)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        tracing::info!(%node, %recover_at, "Failing node");
        self.pending.push(PendingRecovery {
            node: node.clone(),
            recover_at,
        });
        Ok(Some(SchedulerEvent::NodeFailed { node, recover_at }))
    }

    fn recovery_sweep(
        &mut self,
        registry: &mut NodeRegistry,
        now: DateTime<Utc>,
        events: &mut Vec<SchedulerEvent>,
    ) -> Result<(), InvalidNodeError> {
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| p.recover_at <= now);
        self.pending = waiting;
        for recovery in due {
            registry.mark_recovered(&recovery.node)?;
            tracing::info!(node = %recovery.node, "Node coming back online");
            events.push(SchedulerEvent::NodeRecovered {
                node: recovery.node,
            });
        }
        Ok(())
    }

    fn beacon_due(&mut self, now: DateTime<Utc>) -> bool {
        if now - self.last_beacon >= self.packet_time {
            tracing::debug!(last = %self.last_beacon, "Beacon interval elapsed");
            self.last_beacon = now;
            true
        } else {
            false
        }
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
