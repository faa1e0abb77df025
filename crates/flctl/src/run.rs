use faultline::{
    config::{ConfigurationError, TransportKind},
    dispatcher::DispatchOptions,
    driver::DriverOptions,
    experiment::{ExperimentPlan, PlanError},
    metadata::{IotLabCli, MetadataService},
    registry::Roles,
    serial_log::SerialLog,
    transport::{MemoryTransport, SerialTransport, Transport},
    util::{rng::SeededRandomness, time_source::SystemClock},
    ExperimentDriver, ExperimentReport,
};
use tokio_util::sync::CancellationToken;

use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<PlanError> for Error {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::Configuration(err) => Error::Configuration(err),
            PlanError::Metadata(err) => Error::Other(err.into()),
        }
    }
}

impl Error {
    pub(crate) fn exit_code(&self) -> u8 {
        match self {
            Error::Configuration(err) => err.exit_code(),
            Error::Other(_) => 1,
        }
    }
}

pub(crate) async fn run_experiment(config: Config) -> Result<ExperimentReport, Error> {
    let settings = config.settings.build().map_err(anyhow::Error::from)?;
    let policy = settings.failure_policy().map_err(anyhow::Error::from)?;
    let service = IotLabCli::new(&settings.cli_program);
    let plan = ExperimentPlan::load(&service, config.experiment_id, &config.site, &settings).await?;

    let mut rng = SeededRandomness::from_optional_seed(settings.seed);
    tracing::info!(seed = rng.seed(), "Random decisions seeded");
    let roles = Roles::select(&plan.nodes, &mut rng)?;
    tracing::info!(source = %roles.source, sink = %roles.sink, "Roles selected");

    if settings.wait_for_start {
        tracing::info!(id = plan.id, "Waiting for the experiment to start");
        service
            .wait_until_running(plan.id)
            .await
            .map_err(anyhow::Error::from)?;
    }

    let log_path = settings.serial_log_path(plan.id);
    let (log, log_writer) = SerialLog::create(&log_path)
        .await
        .map_err(anyhow::Error::from)?;

    let options = DriverOptions {
        dispatch: DispatchOptions {
            restart_source_on_beacon: settings.restart_source_on_beacon,
            sleep_failed_nodes: settings.sleep_failed_nodes,
            sleep_time_secs: settings.sleep_time_secs,
        },
        enforce_stop_time: settings.enforce_stop_time,
        draw: policy.draw,
    };
    let cancel = cancel_on_ctrl_c();
    let report = match settings.transport {
        TransportKind::Serial => {
            let transport =
                SerialTransport::connect(&plan.nodes, settings.serial_port, log.clone()).await;
            tracing::info!(
                connected = transport.connected(),
                nodes = plan.nodes.len(),
                "Opened serial connections"
            );
            drive(plan, roles, options, transport, rng, log, cancel).await
        }
        TransportKind::DryRun => {
            drive(plan, roles, options, MemoryTransport::new(), rng, log, cancel).await
        }
    };
    if let Err(err) = log_writer.finish().await {
        tracing::warn!(path = ?log_path, "Failed writing serial log: {err}");
    }
    report
}

async fn drive<T: Transport>(
    plan: ExperimentPlan,
    roles: Roles,
    options: DriverOptions,
    transport: T,
    rng: SeededRandomness,
    log: SerialLog,
    cancel: CancellationToken,
) -> Result<ExperimentReport, Error> {
    let mut driver = ExperimentDriver::new(
        plan.nodes,
        roles,
        plan.window,
        options,
        transport,
        SystemClock::new(),
        rng,
    )
    .map_err(anyhow::Error::from)?
    .with_serial_log(log);
    Ok(driver.run(cancel).await?)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping experiment");
            token.cancel();
        }
    });
    cancel
}
