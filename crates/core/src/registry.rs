//! Participating nodes and the pool of nodes currently eligible for failure.

use std::collections::HashMap;

use thiserror::Error;

use crate::{
    config::ConfigurationError,
    node::{Node, NodeId, NodeRole, NodeStatus},
    util::rng::Randomness,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidNodeError {
    #[error("node {0} is not part of the experiment")]
    Unknown(NodeId),
    #[error("node {node} is the {role} and cannot fail")]
    Protected { node: NodeId, role: NodeRole },
    #[error("node {0} is already failed")]
    AlreadyFailed(NodeId),
    #[error("node {0} is not failed")]
    NotFailed(NodeId),
}

/// Source and sink picked for an experiment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roles {
    pub source: NodeId,
    pub sink: NodeId,
}

impl Roles {
    /// Draws two distinct nodes, the first becomes the source and the second the sink.
    pub fn select(nodes: &[NodeId], rng: &mut impl Randomness) -> Result<Self, ConfigurationError> {
        if nodes.len() < 2 {
            return Err(ConfigurationError::TooFewNodes(nodes.len()));
        }
        let source = rng.pick(nodes.len());
        let mut sink = rng.pick(nodes.len() - 1);
        if sink >= source {
            sink += 1;
        }
        Ok(Self {
            source: nodes[source].clone(),
            sink: nodes[sink].clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct NodeRegistry {
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    available: Vec<NodeId>,
    roles: Roles,
}

impl NodeRegistry {
    /// Builds the registry from the experiment node list; every node other than the
    /// source and the sink starts up and available for failure.
    pub fn new(node_list: Vec<NodeId>, roles: Roles) -> Result<Self, InvalidNodeError> {
        let mut nodes = Vec::with_capacity(node_list.len());
        let mut index = HashMap::with_capacity(node_list.len());
        let mut available = Vec::new();
        for id in node_list {
            if index.contains_key(&id) {
                continue;
            }
            let role = if id == roles.source {
                NodeRole::Source
            } else if id == roles.sink {
                NodeRole::Sink
            } else {
                available.push(id.clone());
                NodeRole::Failable
            };
            index.insert(id.clone(), nodes.len());
            nodes.push(Node {
                id,
                role,
                status: NodeStatus::Up,
            });
        }
        for required in [&roles.source, &roles.sink] {
            if !index.contains_key(required) {
                return Err(InvalidNodeError::Unknown(required.clone()));
            }
        }
        if roles.source == roles.sink {
            return Err(InvalidNodeError::Protected {
                node: roles.sink.clone(),
                role: NodeRole::Sink,
            });
        }
        Ok(Self {
            nodes,
            index,
            available,
            roles,
        })
    }

    pub fn source(&self) -> &NodeId {
        &self.roles.source
    }

    pub fn sink(&self) -> &NodeId {
        &self.roles.sink
    }

    /// Failable nodes that are currently up, in pool order.
    pub fn available_failable_nodes(&self) -> &[NodeId] {
        &self.available
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn failed_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Failed)
            .count()
    }

    pub fn mark_failed(&mut self, id: &NodeId) -> Result<(), InvalidNodeError> {
        let node = self.failable_mut(id)?;
        if node.status == NodeStatus::Failed {
            return Err(InvalidNodeError::AlreadyFailed(id.clone()));
        }
        node.status = NodeStatus::Failed;
        self.available.retain(|n| n != id);
        Ok(())
    }

    /// Returns a failed node to the end of the available pool.
    pub fn mark_recovered(&mut self, id: &NodeId) -> Result<(), InvalidNodeError> {
        let node = self.failable_mut(id)?;
        if node.status == NodeStatus::Up {
            return Err(InvalidNodeError::NotFailed(id.clone()));
        }
        node.status = NodeStatus::Up;
        self.available.push(id.clone());
        Ok(())
    }

    fn failable_mut(&mut self, id: &NodeId) -> Result<&mut Node, InvalidNodeError> {
        let &i = self
            .index
            .get(id)
            .ok_or_else(|| InvalidNodeError::Unknown(id.clone()))?;
        let node = &mut self.nodes[i];
        if node.role != NodeRole::Failable {
            return Err(InvalidNodeError::Protected {
                node: id.clone(),
                role: node.role,
            });
        }
        Ok(node)
    }
}
