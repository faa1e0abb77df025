//! Experiment metadata from the lab-management service.
//!
//! The service is reached through its command line client, which prints JSON:
//! `get -l` lists the user's experiments and `get -i <id> -ri` describes the
//! resources of one experiment per site.

use std::{
    future::Future,
    path::{Path, PathBuf},
    process::Stdio,
};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;

use crate::{config::ConfigurationError, node::NodeId};

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("failed to run {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{program:?} exited with {status}: {stderr}")]
    Failed {
        program: PathBuf,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("unexpected output from the metadata service: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentMetadata {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    /// Start time, seconds since the epoch (UTC).
    pub date: i64,
    /// Length of the experiment in seconds.
    pub duration: i64,
    /// Fully qualified names of the experiment's nodes.
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub nb_resources: Option<usize>,
}

impl ExperimentMetadata {
    pub fn start_timestamp(&self) -> Result<DateTime<Utc>, ConfigurationError> {
        DateTime::from_timestamp(self.date, 0).ok_or(ConfigurationError::InvalidSchedule(self.id))
    }

    /// `date + duration`.
    pub fn stop_timestamp(&self) -> Result<DateTime<Utc>, ConfigurationError> {
        let invalid = || ConfigurationError::InvalidSchedule(self.id);
        let duration = TimeDelta::try_seconds(self.duration).ok_or_else(invalid)?;
        self.start_timestamp()?
            .checked_add_signed(duration)
            .ok_or_else(invalid)
    }

    pub fn resource_nodes(&self) -> Vec<NodeId> {
        self.resources.iter().map(|r| NodeId::from_fqdn(r)).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentList {
    #[serde(default)]
    pub items: Vec<ExperimentMetadata>,
}

impl ExperimentList {
    pub fn find(&self, id: u64) -> Result<&ExperimentMetadata, ConfigurationError> {
        if self.items.is_empty() {
            return Err(ConfigurationError::NoExperiments);
        }
        self.items
            .iter()
            .find(|e| e.id == id)
            .ok_or(ConfigurationError::ExperimentNotFound(id))
    }
}

pub trait MetadataService: Send + Sync {
    fn list_experiments(&self) -> impl Future<Output = Result<ExperimentList, MetadataError>> + Send;

    /// Raw per-site resource description of an experiment.
    fn experiment_resources(
        &self,
        id: u64,
    ) -> impl Future<Output = Result<serde_json::Value, MetadataError>> + Send;

    /// Blocks until the experiment is running.
    fn wait_until_running(&self, id: u64) -> impl Future<Output = Result<(), MetadataError>> + Send;
}

/// Runs the lab's `iotlab-experiment` client.
#[derive(Debug, Clone)]
pub struct IotLabCli {
    program: PathBuf,
}

impl IotLabCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>, MetadataError> {
        tracing::debug!(program = ?self.program, ?args, "Querying metadata service");
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| MetadataError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(MetadataError::Failed {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(output.stdout)
    }
}

impl MetadataService for IotLabCli {
    async fn list_experiments(&self) -> Result<ExperimentList, MetadataError> {
        let out = self.run(&["get", "-l"]).await?;
        Ok(serde_json::from_slice(&out)?)
    }

    async fn experiment_resources(&self, id: u64) -> Result<serde_json::Value, MetadataError> {
        let id = id.to_string();
        let out = self.run(&["get", "-i", &id, "-ri"]).await?;
        Ok(serde_json::from_slice(&out)?)
    }

    async fn wait_until_running(&self, id: u64) -> Result<(), MetadataError> {
        let id = id.to_string();
        self.run(&["wait", "-i", &id, "--step", "1"]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const LISTING: &str = r#"{
        "items": [{
            "date": 1589371980,
            "duration": 320,
            "id": 214061,
            "name": "",
            "nb_resources": 3,
            "owner": "drichard",
            "resources": [
                "m3-4.grenoble.iot-lab.info",
                "m3-5.grenoble.iot-lab.info",
                "m3-11.grenoble.iot-lab.info"
            ],
            "state": "Terminated"
        }]
    }"#;

    #[test]
    fn parses_listing_and_computes_stop() -> testresult::TestResult {
        let list: ExperimentList = serde_json::from_str(LISTING)?;
        let exp = list.find(214061)?;
        assert_eq!(exp.state, "Terminated");
        assert_eq!(
            exp.stop_timestamp()?,
            Utc.timestamp_opt(1_589_371_980 + 320, 0).unwrap()
        );
        assert_eq!(
            exp.resource_nodes(),
            vec![NodeId::from("m3-4"), "m3-5".into(), "m3-11".into()]
        );
        Ok(())
    }

    #[test]
    fn lookup_errors() -> testresult::TestResult {
        let empty = ExperimentList::default();
        assert!(matches!(
            empty.find(1),
            Err(ConfigurationError::NoExperiments)
        ));
        let list: ExperimentList = serde_json::from_str(LISTING)?;
        assert!(matches!(
            list.find(1),
            Err(ConfigurationError::ExperimentNotFound(1))
        ));
        Ok(())
    }

    #[test]
    fn minimal_entry_uses_defaults() -> testresult::TestResult {
        let list: ExperimentList =
            serde_json::from_str(r#"{"items":[{"id":7,"date":0,"duration":60}]}"#)?;
        let exp = list.find(7)?;
        assert!(exp.resources.is_empty());
        assert_eq!(exp.owner, None);
        Ok(())
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let cli = IotLabCli::new("/nonexistent/iotlab-experiment");
        assert!(matches!(
            cli.list_experiments().await,
            Err(MetadataError::Spawn { .. })
        ));
    }
}
