//! Drives an experiment from provisioning to its end.
//!
//! ```text
//! Idle -> Provisioning -> Running -> Finished
//! ```
//!
//! The idle step is construction itself: [`ExperimentDriver::new`] fills the
//! registry and hands back a driver that is already provisioning.
//!
//! The driver owns the registry, the scheduler and the dispatcher, and is the only
//! code mutating them. Each tick runs the scheduler once, sends the resulting
//! commands, then sleeps until the next whole second of the wall clock.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::{
    dispatcher::{CommandDispatcher, DispatchOptions, NodeCommand},
    experiment::ExperimentWindow,
    node::NodeId,
    registry::{InvalidNodeError, NodeRegistry, Roles},
    scheduler::{FailureDraw, FailurePolicy, FailureScheduler, SchedulerEvent},
    serial_log::{SerialLog, ROOT_SOURCE},
    transport::Transport,
    util::{
        rng::Randomness,
        time_source::{until_next_tick, Clock},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Provisioning,
    Running,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    StopTimeReached,
    Cancelled,
}

impl Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndReason::StopTimeReached => write!(f, "stop time reached"),
            EndReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentReport {
    pub ticks: u64,
    pub failures: u64,
    pub recoveries: u64,
    pub beacons: u64,
    pub send_errors: u64,
    pub end: EndReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverOptions {
    /// Command toggles. The sleep length sent to failed nodes is taken from the window.
    pub dispatch: DispatchOptions,
    /// End the run once the window's stop time is reached.
    pub enforce_stop_time: bool,
    pub draw: FailureDraw,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            dispatch: DispatchOptions::default(),
            enforce_stop_time: true,
            draw: FailureDraw::default(),
        }
    }
}

pub struct ExperimentDriver<T, C, R> {
    state: DriverState,
    registry: NodeRegistry,
    scheduler: FailureScheduler<R>,
    dispatcher: CommandDispatcher<T>,
    clock: C,
    window: ExperimentWindow,
    options: DriverOptions,
    log: SerialLog,
}

impl<T, C, R> ExperimentDriver<T, C, R>
where
    T: Transport,
    C: Clock,
    R: Randomness,
{
    /// Populates the registry from the node list with the given roles.
    pub fn new(
        nodes: Vec<NodeId>,
        roles: Roles,
        window: ExperimentWindow,
        options: DriverOptions,
        transport: T,
        clock: C,
        rng: R,
    ) -> Result<Self, InvalidNodeError> {
        let registry = NodeRegistry::new(nodes, roles)?;
        let policy = FailurePolicy {
            draw: options.draw,
            sleep_time: window.sleep_time,
            packet_time: window.packet_time,
        };
        let now = clock.now();
        let dispatch = DispatchOptions {
            sleep_time_secs: window.sleep_time.as_secs(),
            ..options.dispatch
        };
        let dispatcher = CommandDispatcher::new(transport, dispatch, registry.source().clone());
        Ok(Self {
            state: DriverState::Provisioning,
            registry,
            scheduler: FailureScheduler::new(policy, rng, now),
            dispatcher,
            clock,
            window,
            options,
            log: SerialLog::disabled(),
        })
    }

    pub fn with_serial_log(mut self, log: SerialLog) -> Self {
        self.log = log;
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Sets up the sink, starts the source and arms the beacon timer.
    pub async fn provision(&mut self) {
        if self.state != DriverState::Provisioning {
            return;
        }
        let sink = self.registry.sink().clone();
        let source = self.registry.source().clone();
        tracing::info!(%source, %sink, "Provisioning experiment");
        self.dispatcher.send(&[sink], NodeCommand::SetSink).await;
        self.dispatcher.send(&[source], NodeCommand::Start).await;
        self.scheduler.reset_beacon(self.clock.now());
        self.state = DriverState::Running;
    }

    /// Runs the tick loop until the stop time passes or `cancel` fires. The transport
    /// is shut down and the serial log released on every exit path.
    pub async fn run(&mut self, cancel: CancellationToken) -> anyhow::Result<ExperimentReport> {
        if self.state == DriverState::Finished {
            anyhow::bail!("experiment already finished");
        }
        self.log.record(ROOT_SOURCE, "Experiment Starting");
        let res = self.run_loop(&cancel).await;
        self.dispatcher.shutdown().await;
        self.state = DriverState::Finished;
        match &res {
            Ok(report) => tracing::info!(
                end = %report.end,
                ticks = report.ticks,
                failures = report.failures,
                recoveries = report.recoveries,
                "Experiment finished"
            ),
            Err(err) => tracing::error!("Experiment aborted: {err}"),
        }
        self.log.record(ROOT_SOURCE, "Experiment Finished");
        self.log = SerialLog::disabled();
        res
    }

    async fn run_loop(&mut self, cancel: &CancellationToken) -> anyhow::Result<ExperimentReport> {
        let mut report = ExperimentReport {
            ticks: 0,
            failures: 0,
            recoveries: 0,
            beacons: 0,
            send_errors: 0,
            end: EndReason::Cancelled,
        };
        if cancel.is_cancelled() {
            return Ok(report);
        }
        if self.stop_reached(self.clock.now()) {
            tracing::info!(stop = %self.window.stop, "Stop time already passed, nothing sent");
            report.end = EndReason::StopTimeReached;
            return Ok(report);
        }
        self.provision().await;
        loop {
            if cancel.is_cancelled() {
                report.end = EndReason::Cancelled;
                break;
            }
            let now = self.clock.now();
            if self.stop_reached(now) {
                report.end = EndReason::StopTimeReached;
                break;
            }
            self.tick(now, &mut report).await?;

            let wait = until_next_tick(self.clock.now());
            tokio::select! {
                _ = cancel.cancelled() => {
                    report.end = EndReason::Cancelled;
                    break;
                }
                _ = self.clock.sleep(wait) => {}
            }
        }
        Ok(report)
    }

    async fn tick(
        &mut self,
        now: DateTime<Utc>,
        report: &mut ExperimentReport,
    ) -> Result<(), InvalidNodeError> {
        let events = self.scheduler.tick(&mut self.registry, now)?;
        for event in &events {
            match event {
                SchedulerEvent::NodeFailed { .. } => report.failures += 1,
                SchedulerEvent::NodeRecovered { .. } => report.recoveries += 1,
                SchedulerEvent::BeaconRearm => report.beacons += 1,
            }
        }
        let sent = self.dispatcher.dispatch_all(&events).await;
        report.send_errors += sent.failures.len() as u64;
        report.ticks += 1;
        Ok(())
    }

    fn stop_reached(&self, now: DateTime<Utc>) -> bool {
        self.options.enforce_stop_time && self.window.is_over(now)
    }
}
