use std::{collections::HashMap, time::Duration};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    task::JoinHandle,
};

use super::{Transport, TransportError};
use crate::{
    node::NodeId,
    serial_log::{LineBuffer, SerialLog},
};

/// How long a single node may take to accept the connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Reaches each node's serial line through the TCP redirection the lab exposes on
/// every node (`<node-id>:<port>`).
///
/// Incoming payloads are split into lines and appended to the [`SerialLog`]. Reader
/// tasks are aborted on [`Transport::shutdown`] or when the transport is dropped.
pub struct SerialTransport {
    writers: HashMap<NodeId, OwnedWriteHalf>,
    readers: Vec<JoinHandle<()>>,
}

impl SerialTransport {
    /// Opens a connection per node. Nodes that cannot be reached are logged and left
    /// out; sends to them fail with [`TransportError::NotConnected`].
    pub async fn connect(nodes: &[NodeId], port: u16, log: SerialLog) -> Self {
        let addrs = nodes
            .iter()
            .map(|node| (node.clone(), format!("{node}:{port}")));
        Self::connect_to(addrs, log).await
    }

    /// Like [`SerialTransport::connect`] but with an explicit address per node.
    ///
    /// All nodes are dialed at once and each attempt gives up after
    /// [`CONNECT_TIMEOUT`].
    pub async fn connect_to(
        addrs: impl IntoIterator<Item = (NodeId, String)>,
        log: SerialLog,
    ) -> Self {
        let attempts = addrs.into_iter().map(|(node, addr)| async move {
            let res = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr)).await;
            (node, addr, res)
        });
        let mut writers = HashMap::new();
        let mut readers = Vec::new();
        for (node, addr, res) in futures::future::join_all(attempts).await {
            match res {
                Ok(Ok(stream)) => {
                    tracing::debug!(%node, %addr, "Connected to node");
                    let (read, write) = stream.into_split();
                    readers.push(tokio::spawn(read_lines(node.clone(), read, log.clone())));
                    writers.insert(node, write);
                }
                Ok(Err(err)) => {
                    tracing::warn!(%node, %addr, "Failed connecting to node: {err}");
                }
                Err(_) => {
                    tracing::warn!(
                        %node,
                        %addr,
                        timeout = ?CONNECT_TIMEOUT,
                        "Timed out connecting to node"
                    );
                }
            }
        }
        Self { writers, readers }
    }

    pub fn connected(&self) -> usize {
        self.writers.len()
    }
}

impl Transport for SerialTransport {
    async fn send_line(&mut self, node: &NodeId, line: &str) -> Result<(), TransportError> {
        let writer = self
            .writers
            .get_mut(node)
            .ok_or_else(|| TransportError::NotConnected(node.clone()))?;
        let res = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(source) = res {
            // a broken channel stays closed for the rest of the run
            self.writers.remove(node);
            return Err(TransportError::Io {
                node: node.clone(),
                source,
            });
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        for (node, mut writer) in self.writers.drain() {
            if let Err(err) = writer.shutdown().await {
                tracing::debug!(%node, "Error closing connection: {err}");
            }
        }
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}

async fn read_lines(node: NodeId, mut read: OwnedReadHalf, log: SerialLog) {
    let mut lines = LineBuffer::new();
    let mut buffer = [0u8; 1024];
    loop {
        match read.read(&mut buffer).await {
            Ok(0) => {
                tracing::debug!(%node, "Node closed its serial connection");
                break;
            }
            Ok(n) => {
                for line in lines.push(&buffer[..n]) {
                    log.record(node.as_str(), &line);
                }
            }
            Err(err) => {
                tracing::warn!(%node, "Error reading from node: {err}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncBufReadExt, BufReader},
        net::TcpListener,
    };

    use super::*;

    #[tokio::test]
    async fn sends_lines_and_logs_payloads() -> testresult::TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("1.log");
        let (log, writer) = SerialLog::create(&path).await?;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?.to_string();
        let node_side = tokio::spawn(async move {
            let (stream, _) = listener.accept().await?;
            let (read, mut write) = stream.into_split();
            write.write_all(b"[INFO] booted\n[INFO] par").await?;
            write.write_all(b"tial done\n").await?;
            let mut received = String::new();
            BufReader::new(read).read_line(&mut received).await?;
            Ok::<_, std::io::Error>(received)
        });

        let mut transport =
            SerialTransport::connect_to([(NodeId::from("m3-1"), addr)], log.clone()).await;
        assert_eq!(transport.connected(), 1);
        transport.send_line(&"m3-1".into(), "set sink\n").await?;
        assert_eq!(node_side.await??, "set sink\n");

        // let the reader drain what the node wrote before closing
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        transport.shutdown().await;
        drop(transport);
        drop(log);
        writer.finish().await?;

        let content = std::fs::read_to_string(&path)?;
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(";m3-1;[INFO] booted"));
        assert!(lines[1].ends_with(";m3-1;[INFO] partial done"));
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_node_is_reported_on_send() -> testresult::TestResult {
        // bind then drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0").await?.local_addr()?;
        let mut transport = SerialTransport::connect_to(
            [(NodeId::from("m3-7"), addr.to_string())],
            SerialLog::disabled(),
        )
        .await;
        assert_eq!(transport.connected(), 0);
        assert!(matches!(
            transport.send_line(&"m3-7".into(), "start\n").await,
            Err(TransportError::NotConnected(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn reachable_nodes_connect_alongside_unreachable_ones() -> testresult::TestResult {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let open = listener.local_addr()?.to_string();
        let closed = TcpListener::bind("127.0.0.1:0").await?.local_addr()?.to_string();
        let accept = tokio::spawn(async move { listener.accept().await.map(|(stream, _)| stream) });

        let mut transport = SerialTransport::connect_to(
            [
                (NodeId::from("m3-1"), closed),
                (NodeId::from("m3-2"), open),
            ],
            SerialLog::disabled(),
        )
        .await;
        let _node_side = accept.await??;
        assert_eq!(transport.connected(), 1);
        transport.send_line(&"m3-2".into(), "start\n").await?;
        assert!(matches!(
            transport.send_line(&"m3-1".into(), "start\n").await,
            Err(TransportError::NotConnected(_))
        ));
        Ok(())
    }
}
