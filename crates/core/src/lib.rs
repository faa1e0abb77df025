/// Experiment settings, setup errors and logger initialization.
pub mod config;

/// Translation of scheduler decisions into node commands.
pub mod dispatcher;

/// Experiment state machine and tick loop.
pub mod driver;

/// Experiment timing and node list, as loaded from the metadata service.
pub mod experiment;

/// Client for the lab-management service.
pub mod metadata;

/// Node identities and node list resolution.
pub mod node;

/// Participating nodes and the failable pool.
pub mod registry;

/// Failure injection and recovery scheduling.
pub mod scheduler;

/// Log of payloads received from the nodes.
pub mod serial_log;

#[cfg(feature = "trace")]
mod tracing;

/// Command channels to the nodes.
pub mod transport;

pub mod util;

pub use driver::{DriverState, EndReason, ExperimentDriver, ExperimentReport};
pub use node::NodeId;
