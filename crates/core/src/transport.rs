//! Line-oriented command channels to the nodes.

use std::future::Future;

use thiserror::Error;

use crate::node::NodeId;

mod memory;
mod serial;

pub use memory::{MemoryTransport, SentLine};
pub use serial::SerialTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("node {0} has no open connection")]
    NotConnected(NodeId),
    #[error("connection to node {node} failed: {source}")]
    Io {
        node: NodeId,
        #[source]
        source: std::io::Error,
    },
    #[error("node {0} rejected the command")]
    Rejected(NodeId),
}

pub trait Transport: Send {
    /// Writes one line of text to the node's channel. `line` carries its own terminator.
    fn send_line(
        &mut self,
        node: &NodeId,
        line: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Closes every channel. Sends after this fail with [`TransportError::NotConnected`].
    fn shutdown(&mut self) -> impl Future<Output = ()> + Send;
}
