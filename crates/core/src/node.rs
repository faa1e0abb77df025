//! Node identities and resolution of the lab's compact node lists.

use std::{collections::HashSet, fmt::Display};

use serde::{Deserialize, Serialize};

use crate::config::ConfigurationError;

/// Short host name of a testbed node, e.g. `m3-4`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Reduces a fully qualified name (`m3-4.grenoble.iot-lab.info`) to the node id.
    pub fn from_fqdn(fqdn: &str) -> Self {
        let host = fqdn.split('.').next().unwrap_or(fqdn);
        Self(host.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Role a node plays for the whole experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    Source,
    Sink,
    Failable,
}

impl Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Source => write!(f, "source"),
            NodeRole::Sink => write!(f, "sink"),
            NodeRole::Failable => write!(f, "failable"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    Up,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub role: NodeRole,
    pub status: NodeStatus,
}

/// Expands the lab's range notation (`"1-3+7"`) into node ids of the given architecture.
///
/// Order of first appearance is kept and repeated numbers are dropped.
pub fn nodes_from_info(archi: &str, ranges: &str) -> Result<Vec<NodeId>, ConfigurationError> {
    let malformed = || ConfigurationError::MalformedNodeList(ranges.to_owned());
    let mut seen = HashSet::new();
    let mut nodes = Vec::new();
    for part in ranges.split('+').map(str::trim).filter(|p| !p.is_empty()) {
        let (first, last) = match part.split_once('-') {
            Some((a, b)) => (
                a.trim().parse::<u32>().map_err(|_| malformed())?,
                b.trim().parse::<u32>().map_err(|_| malformed())?,
            ),
            None => {
                let n = part.parse::<u32>().map_err(|_| malformed())?;
                (n, n)
            }
        };
        if first > last {
            return Err(malformed());
        }
        for n in first..=last {
            if seen.insert(n) {
                nodes.push(NodeId(format!("{archi}-{n}")));
            }
        }
    }
    Ok(nodes)
}

/// Reads the node list of `site` out of the resource info document returned by the
/// metadata service (`items[0][site][archi]`).
pub fn resolve_nodes(
    site: &str,
    archi: &str,
    raw: &serde_json::Value,
) -> Result<Vec<NodeId>, ConfigurationError> {
    let Some(first) = raw
        .get("items")
        .and_then(|items| items.as_array())
        .and_then(|items| items.first())
    else {
        return Err(ConfigurationError::NoNodes);
    };
    let ranges = match first.get(site).and_then(|s| s.get(archi)) {
        Some(serde_json::Value::String(ranges)) => ranges.clone(),
        Some(serde_json::Value::Array(ids)) => ids
            .iter()
            .map(|id| match id {
                serde_json::Value::Number(n) => n.to_string(),
                other => other.as_str().unwrap_or_default().to_owned(),
            })
            .collect::<Vec<_>>()
            .join("+"),
        _ => return Err(ConfigurationError::NoNodes),
    };
    let nodes = nodes_from_info(archi, &ranges)?;
    if nodes.is_empty() {
        return Err(ConfigurationError::NoNodes);
    }
    Ok(nodes)
}
