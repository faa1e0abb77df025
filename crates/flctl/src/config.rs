use faultline::config::SettingsArgs;

/// Control a failure injection experiment on the testbed.
///
/// Reads the experiment's metadata and nodes from the lab, picks a traffic source
/// and sink, and then fails and recovers the other nodes at random until the
/// experiment's stop time.
#[derive(clap::Parser, Clone, Debug)]
#[clap(name = "flctl")]
#[clap(version)]
pub struct Config {
    /// The experiment ID to control.
    pub experiment_id: u64,
    /// The deployment site.
    pub site: String,
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<tracing::level_filters::LevelFilter>,
    #[command(flatten)]
    pub settings: SettingsArgs,
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use faultline::config::TransportKind;

    use super::*;

    #[test]
    fn positional_arguments() -> testresult::TestResult {
        let config = Config::try_parse_from(["flctl", "214061", "grenoble"])?;
        assert_eq!(config.experiment_id, 214061);
        assert_eq!(config.site, "grenoble");
        let settings = config.settings.build()?;
        assert_eq!(settings.sleep_time_secs, 15);
        assert_eq!(settings.transport, TransportKind::Serial);
        Ok(())
    }

    #[test]
    fn flags() -> testresult::TestResult {
        let config = Config::try_parse_from([
            "flctl",
            "214061",
            "grenoble",
            "--transport",
            "dry-run",
            "--seed",
            "7",
            "--restart-source-on-beacon",
            "--packet-time",
            "30",
        ])?;
        let settings = config.settings.build()?;
        assert_eq!(settings.transport, TransportKind::DryRun);
        assert_eq!(settings.seed, Some(7));
        assert!(settings.restart_source_on_beacon);
        assert_eq!(settings.packet_time_secs, 30);
        Ok(())
    }

    #[test]
    fn experiment_id_must_be_numeric() {
        assert!(Config::try_parse_from(["flctl", "abc", "grenoble"]).is_err());
    }
}
