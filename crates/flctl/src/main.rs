use std::process::ExitCode;

use clap::Parser;

mod config;
mod run;

use crate::{config::Config, run::run_experiment};

fn main() -> ExitCode {
    let tokio_rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("Failed to start runtime: {err}");
            return ExitCode::FAILURE;
        }
    };
    let config = Config::parse();
    faultline::config::set_logger(config.log_level);
    tokio_rt.block_on(async move {
        match run_experiment(config).await {
            Ok(report) => {
                tracing::info!(
                    end = %report.end,
                    ticks = report.ticks,
                    failures = report.failures,
                    recoveries = report.recoveries,
                    beacons = report.beacons,
                    send_errors = report.send_errors,
                    "Experiment done"
                );
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("Error: {err:#}");
                ExitCode::from(err.exit_code())
            }
        }
    })
}
