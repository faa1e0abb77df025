//! Log of the payloads received from the nodes' serial lines.
//!
//! Every record is one line, `<system-time>;<node-id>;<message>`, where system time
//! is seconds since the epoch with microsecond precision:
//!
//! ```text
//! 1588584749.859566;m3-99;[INFO: TPWSN-RMHB] Sending data beacon
//! ```

use std::path::Path;

use chrono::{DateTime, Utc};
use tokio::{
    fs::File,
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    task::JoinHandle,
};

/// Source name used for records written by the controller itself.
pub const ROOT_SOURCE: &str = "root";

struct Record {
    at: DateTime<Utc>,
    source: String,
    message: String,
}

/// Cheap handle used to append records; the file is written by a single task.
#[derive(Clone, Debug)]
pub struct SerialLog {
    sender: Option<mpsc::UnboundedSender<Record>>,
}

/// Owns the writer task. Records still queued are written when all handles are gone.
pub struct SerialLogWriter {
    task: JoinHandle<std::io::Result<()>>,
}

impl SerialLog {
    pub async fn create(path: &Path) -> std::io::Result<(Self, SerialLogWriter)> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        tracing::info!(?path, "Writing serial log");
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(write_records(BufWriter::new(file), receiver));
        Ok((
            Self {
                sender: Some(sender),
            },
            SerialLogWriter { task },
        ))
    }

    /// A log that drops every record.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn record(&self, source: &str, message: &str) {
        let Some(sender) = &self.sender else {
            return;
        };
        let record = Record {
            at: Utc::now(),
            source: source.to_owned(),
            message: message.to_owned(),
        };
        if sender.send(record).is_err() {
            tracing::warn!(source, "Serial log writer is gone, dropping record");
        }
    }
}

impl SerialLogWriter {
    /// Waits until every handle is dropped and the file is flushed.
    pub async fn finish(self) -> std::io::Result<()> {
        match self.task.await {
            Ok(res) => res,
            Err(err) => Err(std::io::Error::other(err)),
        }
    }
}

async fn write_records(
    mut out: BufWriter<File>,
    mut receiver: mpsc::UnboundedReceiver<Record>,
) -> std::io::Result<()> {
    while let Some(record) = receiver.recv().await {
        out.write_all(format_record(&record).as_bytes()).await?;
        while let Ok(record) = receiver.try_recv() {
            out.write_all(format_record(&record).as_bytes()).await?;
        }
        out.flush().await?;
    }
    out.flush().await?;
    Ok(())
}

fn format_record(record: &Record) -> String {
    format!(
        "{}.{:06};{};{}\n",
        record.at.timestamp(),
        record.at.timestamp_subsec_micros(),
        record.source,
        record.message
    )
}

/// Longest line kept back waiting for its newline. Longer runs of bytes are
/// emitted as a line of their own.
pub const MAX_LINE_LEN: usize = 4096;

/// Splits a byte stream into lines, holding back a trailing partial line until the
/// rest of it arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `data` and returns every line it completed, without the newline.
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(data);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
        }
        while self.pending.len() >= MAX_LINE_LEN {
            let line: Vec<u8> = self.pending.drain(..MAX_LINE_LEN).collect();
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Bytes of the line not yet terminated.
    pub fn remainder(&self) -> &[u8] {
        &self.pending
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn record_format() {
        let record = Record {
            at: Utc.timestamp_opt(1_588_584_749, 859_566_000).unwrap(),
            source: "m3-99".into(),
            message: "[INFO: TPWSN-RMHB] Sending data beacon".into(),
        };
        assert_eq!(
            format_record(&record),
            "1588584749.859566;m3-99;[INFO: TPWSN-RMHB] Sending data beacon\n"
        );
    }

    #[test]
    fn partial_line_waits_for_rest() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push(b"Sending data"), Vec::<String>::new());
        assert_eq!(buf.push(b" beacon\nSending nei"), vec!["Sending data beacon"]);
        assert_eq!(buf.remainder(), b"Sending nei");
        assert_eq!(buf.push(b"ghbour\n\n"), vec!["Sending neighbour", ""]);
        assert!(buf.remainder().is_empty());
    }

    #[test]
    fn unterminated_output_is_cut_at_max_len() {
        let mut buf = LineBuffer::new();
        let noise = vec![b'x'; MAX_LINE_LEN * 2 + 10];
        let lines = buf.push(&noise);
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.len() == MAX_LINE_LEN));
        assert_eq!(buf.remainder().len(), 10);
        assert_eq!(buf.push(b"\n"), vec!["x".repeat(10)]);
    }

    #[test]
    fn multibyte_split_across_reads() {
        let mut buf = LineBuffer::new();
        let bytes = "temp 21°C\n".as_bytes();
        let split = bytes.iter().position(|b| *b == 0xC2).unwrap() + 1;
        assert!(buf.push(&bytes[..split]).is_empty());
        assert_eq!(buf.push(&bytes[split..]), vec!["temp 21°C"]);
    }

    #[tokio::test]
    async fn records_reach_the_file() -> testresult::TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("214061.log");
        let (log, writer) = SerialLog::create(&path).await?;
        log.record(ROOT_SOURCE, "Experiment Starting");
        log.clone().record("m3-1", "hello");
        drop(log);
        writer.finish().await?;

        let content = std::fs::read_to_string(&path)?;
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(";root;Experiment Starting"));
        assert!(lines[1].ends_with(";m3-1;hello"));
        Ok(())
    }
}
