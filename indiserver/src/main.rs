use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use indiserver::{
    init_logging, Broker, BrokerConfig, BrokerError, DriverSpec, SystemLauncher, INDI_PORT,
};

/// INDI server: routes property traffic between clients and device drivers.
#[derive(Debug, Parser)]
#[command(name = "indiserver", version)]
struct Cli {
    /// Port to listen on for clients
    #[arg(short = 'p', long, default_value_t = INDI_PORT)]
    port: u16,

    /// Restarts allowed per driver before exiting
    #[arg(short = 'r', long = "max-restarts", default_value_t = 4)]
    max_restarts: u32,

    /// More output: -v connections, -vv message headers, -vvv full XML
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Driver programs, or device@host[:port] for remote drivers
    #[arg(value_name = "DRIVER", required = true)]
    drivers: Vec<DriverSpec>,
}

impl Cli {
    fn into_config(self) -> BrokerConfig {
        BrokerConfig {
            port: self.port,
            max_restarts: self.max_restarts,
            verbosity: self.verbose,
            drivers: self.drivers,
            ..BrokerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    let config = cli.into_config();
    if let Err(e) = init_logging(config.verbosity) {
        let e = BrokerError::from(e);
        eprintln!("indiserver: {e}");
        return ExitCode::from(e.exit_code());
    }

    match serve(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("indiserver: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn serve(config: BrokerConfig) -> Result<(), BrokerError> {
    let mut broker = Broker::start(config, Arc::new(SystemLauncher::new())).await?;
    broker.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["indiserver", "indi_simulator_ccd"]).unwrap();
        let config = cli.into_config();
        assert_eq!(config.port, 7624);
        assert_eq!(config.max_restarts, 4);
        assert_eq!(config.verbosity, 0);
        assert_eq!(config.drivers.len(), 1);
    }

    #[test]
    fn test_cli_flags_and_remote_drivers() {
        let cli = Cli::try_parse_from([
            "indiserver",
            "-p",
            "7700",
            "-r",
            "2",
            "-vvv",
            "indi_lx200generic",
            "Mount@dome.local:7625",
        ])
        .unwrap();
        let config = cli.into_config();
        assert_eq!(config.port, 7700);
        assert_eq!(config.max_restarts, 2);
        assert_eq!(config.verbosity, 3);
        assert!(config.drivers[1].is_remote());
    }

    #[test]
    fn test_cli_requires_a_driver() {
        assert!(Cli::try_parse_from(["indiserver", "-p", "7700"]).is_err());
    }

    #[test]
    fn test_cli_rejects_bad_remote_spec() {
        assert!(Cli::try_parse_from(["indiserver", "Mount@host:notaport"]).is_err());
    }
}
