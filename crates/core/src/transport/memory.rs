use std::{collections::HashSet, sync::Arc};

use parking_lot::Mutex;

use super::{Transport, TransportError};
use crate::node::NodeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentLine {
    pub node: NodeId,
    pub line: String,
}

/// Keeps every sent line in memory instead of reaching the nodes.
///
/// Clones share the same record, so a test can keep one handle while the driver owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    sent: Arc<Mutex<Vec<SentLine>>>,
    rejecting: Arc<Mutex<HashSet<NodeId>>>,
    closed: Arc<Mutex<bool>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later send to `node` fail.
    pub fn reject(&self, node: NodeId) {
        self.rejecting.lock().insert(node);
    }

    pub fn sent(&self) -> Vec<SentLine> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, node: &NodeId) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|s| &s.node == node)
            .map(|s| s.line.clone())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

impl Transport for MemoryTransport {
    async fn send_line(&mut self, node: &NodeId, line: &str) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::NotConnected(node.clone()));
        }
        if self.rejecting.lock().contains(node) {
            return Err(TransportError::Rejected(node.clone()));
        }
        tracing::debug!(%node, line = line.trim_end(), "Recorded command");
        self.sent.lock().push(SentLine {
            node: node.clone(),
            line: line.to_owned(),
        });
        Ok(())
    }

    async fn shutdown(&mut self) {
        *self.closed.lock() = true;
    }
}
