use std::{
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scheduler::{FailureDraw, FailurePolicy, InvalidDrawError};

/// Default time a failed node stays down before it is brought back.
pub const DEFAULT_SLEEP_TIME_SECS: u64 = 15;
/// Default interval between beacon re-arms of the source.
pub const DEFAULT_PACKET_TIME_SECS: u64 = 60;
/// Upper bound of the per-tick failure draw (`1..=DEFAULT_FAIL_DRAW_MAX`).
pub const DEFAULT_FAIL_DRAW_MAX: u32 = 5;
/// Draw value that fails a node; with the default bound this is a 1 in 5 chance per tick.
pub const DEFAULT_FAIL_TARGET: u32 = 5;
/// Port on which the lab exposes each node's serial line.
pub const DEFAULT_SERIAL_PORT: u16 = 20000;
pub const DEFAULT_ARCHI: &str = "m3";
pub const DEFAULT_CLI_PROGRAM: &str = "iotlab-experiment";

/// Durations above this are rejected when building the failure policy.
const MAX_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

/// Errors in the experiment's setup which abort the run before the loop starts.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("no experiments listed")]
    NoExperiments,
    #[error("experiment {0} not found among listed experiments")]
    ExperimentNotFound(u64),
    #[error("experiment had no nodes assigned")]
    NoNodes,
    #[error("malformed node list: {0:?}")]
    MalformedNodeList(String),
    #[error("at least two nodes are needed for a source and a sink, got {0}")]
    TooFewNodes(usize),
    #[error("experiment {0} has an invalid schedule")]
    InvalidSchedule(u64),
}

impl ConfigurationError {
    /// Process exit status reported for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            ConfigurationError::NoExperiments => 2,
            ConfigurationError::NoNodes => 3,
            ConfigurationError::ExperimentNotFound(_) => 4,
            ConfigurationError::MalformedNodeList(_)
            | ConfigurationError::TooFewNodes(_)
            | ConfigurationError::InvalidSchedule(_) => 5,
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed reading settings file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// How commands reach the nodes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// One TCP connection per node to its serial redirection port.
    #[default]
    Serial,
    /// Record commands in memory and log them, without touching the nodes.
    DryRun,
}

/// Tuning of an experiment run. Can be read from a TOML file; every field is optional
/// there and falls back to its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentSettings {
    pub sleep_time_secs: u64,
    pub packet_time_secs: u64,
    pub fail_draw_max: u32,
    pub fail_target: u32,
    pub archi: String,
    pub serial_port: u16,
    pub restart_source_on_beacon: bool,
    pub sleep_failed_nodes: bool,
    pub wait_for_start: bool,
    pub enforce_stop_time: bool,
    pub transport: TransportKind,
    pub log_dir: PathBuf,
    pub cli_program: PathBuf,
    pub seed: Option<u64>,
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            sleep_time_secs: DEFAULT_SLEEP_TIME_SECS,
            packet_time_secs: DEFAULT_PACKET_TIME_SECS,
            fail_draw_max: DEFAULT_FAIL_DRAW_MAX,
            fail_target: DEFAULT_FAIL_TARGET,
            archi: DEFAULT_ARCHI.to_owned(),
            serial_port: DEFAULT_SERIAL_PORT,
            restart_source_on_beacon: false,
            sleep_failed_nodes: false,
            wait_for_start: false,
            enforce_stop_time: true,
            transport: TransportKind::default(),
            log_dir: PathBuf::from("."),
            cli_program: PathBuf::from(DEFAULT_CLI_PROGRAM),
            seed: None,
        }
    }
}

impl ExperimentSettings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        tracing::debug!(?path, "Reading settings file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_owned(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    pub fn failure_policy(&self) -> Result<FailurePolicy, SettingsError> {
        let draw = FailureDraw::new(self.fail_draw_max, self.fail_target).map_err(|err| {
            let field = match err {
                InvalidDrawError::EmptyRange => "fail_draw_max",
                InvalidDrawError::TargetOutOfRange { .. } => "fail_target",
            };
            SettingsError::Invalid {
                field,
                reason: err.to_string(),
            }
        })?;
        Ok(FailurePolicy {
            draw,
            sleep_time: interval("sleep_time_secs", self.sleep_time_secs)?,
            packet_time: interval("packet_time_secs", self.packet_time_secs)?,
        })
    }

    /// Path of the serial payload log for an experiment.
    pub fn serial_log_path(&self, experiment_id: u64) -> PathBuf {
        self.log_dir.join(format!("{experiment_id}.log"))
    }
}

fn interval(field: &'static str, secs: u64) -> Result<Duration, SettingsError> {
    if secs > MAX_INTERVAL_SECS {
        return Err(SettingsError::Invalid {
            field,
            reason: format!("{secs}s is longer than a year"),
        });
    }
    Ok(Duration::from_secs(secs))
}

/// Command line overrides for [`ExperimentSettings`].
#[derive(clap::Args, Debug, Clone, Default)]
pub struct SettingsArgs {
    /// TOML file with experiment settings. Flags given on the command line take precedence.
    #[arg(long, env = "FAULTLINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Seconds a failed node stays down.
    #[arg(long)]
    pub sleep_time: Option<u64>,

    /// Seconds between beacon re-arms of the source.
    #[arg(long)]
    pub packet_time: Option<u64>,

    /// Upper bound of the per-tick failure draw.
    #[arg(long)]
    pub fail_draw_max: Option<u32>,

    /// Draw value that fails a node.
    #[arg(long)]
    pub fail_target: Option<u32>,

    /// Node architecture to read from the experiment's resources.
    #[arg(long)]
    pub archi: Option<String>,

    /// Port of the nodes' serial redirection.
    #[arg(long)]
    pub serial_port: Option<u16>,

    /// Send `start` to the source every time the beacon interval elapses.
    #[arg(long)]
    pub restart_source_on_beacon: bool,

    /// Send `sleep <secs>` to a node when it is failed.
    #[arg(long)]
    pub sleep_failed_nodes: bool,

    /// Wait for the experiment to be running before provisioning the nodes.
    #[arg(long)]
    pub wait_for_start: bool,

    /// Keep running past the experiment's stop time, until interrupted.
    #[arg(long)]
    pub ignore_stop_time: bool,

    #[arg(long, value_enum)]
    pub transport: Option<TransportKind>,

    /// Directory where the serial payload log is written.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Program used to query the lab's experiment metadata.
    #[arg(long, env = "FAULTLINE_CLI_PROGRAM")]
    pub cli_program: Option<PathBuf>,

    /// Seed for all random decisions. A random seed is used when not provided.
    #[arg(long)]
    pub seed: Option<u64>,
}

impl SettingsArgs {
    pub fn build(self) -> Result<ExperimentSettings, SettingsError> {
        let mut settings = match &self.config {
            Some(path) => ExperimentSettings::load(path)?,
            None => ExperimentSettings::default(),
        };
        if let Some(v) = self.sleep_time {
            settings.sleep_time_secs = v;
        }
        if let Some(v) = self.packet_time {
            settings.packet_time_secs = v;
        }
        if let Some(v) = self.fail_draw_max {
            settings.fail_draw_max = v;
        }
        if let Some(v) = self.fail_target {
            settings.fail_target = v;
        }
        if let Some(v) = self.archi {
            settings.archi = v;
        }
        if let Some(v) = self.serial_port {
            settings.serial_port = v;
        }
        if let Some(v) = self.transport {
            settings.transport = v;
        }
        if let Some(v) = self.log_dir {
            settings.log_dir = v;
        }
        if let Some(v) = self.cli_program {
            settings.cli_program = v;
        }
        if self.seed.is_some() {
            settings.seed = self.seed;
        }
        settings.restart_source_on_beacon |= self.restart_source_on_beacon;
        settings.sleep_failed_nodes |= self.sleep_failed_nodes;
        settings.wait_for_start |= self.wait_for_start;
        if self.ignore_stop_time {
            settings.enforce_stop_time = false;
        }
        settings.failure_policy()?;
        Ok(settings)
    }
}

pub fn set_logger(level: Option<tracing::level_filters::LevelFilter>) {
    #[cfg(feature = "trace")]
    {
        static LOGGER_SET: AtomicBool = AtomicBool::new(false);
        if LOGGER_SET
            .compare_exchange(
                false,
                true,
                std::sync::atomic::Ordering::Release,
                std::sync::atomic::Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }

        if let Err(err) = crate::tracing::tracer::init_tracer(level) {
            eprintln!("failed tracing initialization: {err}");
        }
    }
}
