//! Turns scheduler decisions into commands written to the nodes.

use std::fmt::Display;

use crate::{
    node::NodeId,
    scheduler::SchedulerEvent,
    transport::{Transport, TransportError},
};

/// Commands understood by the node firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCommand {
    /// Makes the node the traffic sink.
    SetSink,
    /// Starts traffic generation on the source.
    Start,
    /// Puts the node to sleep for the given number of seconds.
    Sleep(u64),
}

impl NodeCommand {
    pub fn to_line(self) -> String {
        format!("{self}\n")
    }
}

impl Display for NodeCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeCommand::SetSink => write!(f, "set sink"),
            NodeCommand::Start => write!(f, "start"),
            NodeCommand::Sleep(secs) => write!(f, "sleep {secs}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Send `start` to the source when the beacon interval elapses.
    pub restart_source_on_beacon: bool,
    /// Send `sleep <secs>` to a node when it is failed.
    pub sleep_failed_nodes: bool,
    pub sleep_time_secs: u64,
}

/// Outcome of one send. Failures are per node and never abort the caller.
#[derive(Debug, Default)]
pub struct SendReport {
    pub delivered: usize,
    pub failures: Vec<TransportError>,
}

impl SendReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    fn merge(&mut self, other: SendReport) {
        self.delivered += other.delivered;
        self.failures.extend(other.failures);
    }
}

pub struct CommandDispatcher<T> {
    transport: T,
    options: DispatchOptions,
    source: NodeId,
}

impl<T: Transport> CommandDispatcher<T> {
    pub fn new(transport: T, options: DispatchOptions, source: NodeId) -> Self {
        Self {
            transport,
            options,
            source,
        }
    }

    /// Writes `command` to every node in `nodes`. A node whose channel fails is
    /// logged and reported; the remaining nodes still get the command.
    pub async fn send(&mut self, nodes: &[NodeId], command: NodeCommand) -> SendReport {
        let line = command.to_line();
        let mut report = SendReport::default();
        for node in nodes {
            match self.transport.send_line(node, &line).await {
                Ok(()) => {
                    tracing::debug!(%node, %command, "Command sent");
                    report.delivered += 1;
                }
                Err(err) => {
                    tracing::warn!(%node, %command, "Failed sending command: {err}");
                    report.failures.push(err);
                }
            }
        }
        report
    }

    pub async fn dispatch(&mut self, event: &SchedulerEvent) -> SendReport {
        match event {
            SchedulerEvent::NodeFailed { node, .. } if self.options.sleep_failed_nodes => {
                let secs = self.options.sleep_time_secs;
                self.send(std::slice::from_ref(node), NodeCommand::Sleep(secs))
                    .await
            }
            SchedulerEvent::BeaconRearm if self.options.restart_source_on_beacon => {
                let source = self.source.clone();
                self.send(&[source], NodeCommand::Start).await
            }
            SchedulerEvent::NodeFailed { .. }
            | SchedulerEvent::NodeRecovered { .. }
            | SchedulerEvent::BeaconRearm => SendReport::default(),
        }
    }

    pub async fn dispatch_all(&mut self, events: &[SchedulerEvent]) -> SendReport {
        let mut report = SendReport::default();
        for event in events {
            report.merge(self.dispatch(event).await);
        }
        report
    }

    pub async fn shutdown(&mut self) {
        self.transport.shutdown().await;
    }
}
