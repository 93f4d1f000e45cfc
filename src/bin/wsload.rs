//! Command-line entry point.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use wsload::config::DEFAULT_TARGET;
use wsload::{ConfigError, Error, FileConfig, LoadDriver, Target, TestConfig};

#[derive(Parser, Debug)]
#[command(name = "wsload")]
#[command(version, about = "WebSocket virtual-user load generator", long_about = None)]
struct Cli {
    /// Target WebSocket URL [default: ws://localhost:8583]
    #[arg(env = "WSLOAD_URL")]
    url: Option<String>,

    /// Number of virtual users [default: 10]
    #[arg(long, env = "WSLOAD_VUS")]
    vus: Option<u32>,

    /// Test duration, e.g. 30s, 1m, 1h [default: 1m]
    #[arg(long, env = "WSLOAD_DURATION", value_parser = humantime::parse_duration)]
    duration: Option<Duration>,

    /// TOML config file; command-line values take precedence
    #[arg(long, env = "WSLOAD_CONFIG")]
    config: Option<PathBuf>,

    /// Substring replies are checked for [default: ACK]
    #[arg(long)]
    ack_marker: Option<String>,

    /// Message of the hello event [default: "from wsload"]
    #[arg(long)]
    hello_message: Option<String>,

    /// How long each connection stays open [default: 5s]
    #[arg(long, value_parser = humantime::parse_duration)]
    hold: Option<Duration>,

    /// Interval between ping events [default: 1s]
    #[arg(long, value_parser = humantime::parse_duration)]
    ping_interval: Option<Duration>,

    /// Pause between iterations [default: 1s]
    #[arg(long, value_parser = humantime::parse_duration)]
    pacing: Option<Duration>,

    /// Limit for establishing a connection [default: 10s]
    #[arg(long, value_parser = humantime::parse_duration)]
    connect_timeout: Option<Duration>,

    /// Time sessions get to close after Ctrl-C [default: 5s]
    #[arg(long, value_parser = humantime::parse_duration)]
    grace_period: Option<Duration>,

    /// Skip the reachability probe before the run
    #[arg(long)]
    no_preflight: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    /// Defaults, then the config file, then command-line values.
    fn build_config(&self) -> Result<TestConfig, ConfigError> {
        let file = match &self.config {
            Some(path) => Some(FileConfig::load(path)?),
            None => None,
        };

        let url = self
            .url
            .as_deref()
            .or_else(|| file.as_ref().and_then(|f| f.target.as_deref()))
            .unwrap_or(DEFAULT_TARGET);
        let mut config = TestConfig::new(Target::parse(url)?);

        if let Some(file) = &file {
            file.apply(&mut config);
        }

        if let Some(vus) = self.vus {
            config.virtual_users = vus;
        }
        if let Some(duration) = self.duration {
            config.duration = duration;
        }
        if let Some(marker) = &self.ack_marker {
            config.ack_marker = marker.clone();
        }
        if let Some(message) = &self.hello_message {
            config.hello_message = message.clone();
        }
        if let Some(hold) = self.hold {
            config.session.hold = hold;
        }
        if let Some(interval) = self.ping_interval {
            config.session.ping_interval = interval;
        }
        if let Some(pacing) = self.pacing {
            config.session.pacing = pacing;
        }
        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout = timeout;
        }
        if let Some(grace) = self.grace_period {
            config.grace_period = grace;
        }
        if self.no_preflight {
            config.preflight = false;
        }

        config.validate()?;
        Ok(config)
    }
}

fn exit_code(err: &Error) -> ExitCode {
    if err.is_configuration() {
        ExitCode::from(2)
    } else {
        ExitCode::FAILURE
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match cli.build_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(2);
        }
    };

    let driver = LoadDriver::tcp(config);
    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    let summary = match driver.run_until(shutdown).await {
        Ok(summary) => summary,
        Err(e) => {
            error!("{e}");
            return exit_code(&e);
        }
    };

    if cli.json {
        match summary.to_json() {
            Ok(json) => println!("{json}"),
            Err(e) => {
                error!("{e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        print!("{}", summary.render_text());
    }
    ExitCode::SUCCESS
}
