pub mod camera;
pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod peer;
pub mod session;

mod util;

use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};

use crate::config::{
    ClientConfig, EndpointSource, DEFAULT_CONFIG_URL, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_STUN_SERVER,
};
use crate::model::media::MediaConstraints;

#[derive(Parser, Debug)]
#[command(name = "stress-monitor-rtc", about = "Signaling client for the stress & anxiety monitor")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream the camera to the analysis agent and print its metrics
    Connect(ConnectArgs),
    /// Print mock metrics without connecting anywhere
    Demo(DemoArgs),
}

#[derive(Args, Debug)]
struct ConnectArgs {
    /// Configuration service returning the signaling address
    #[arg(long, env = "STRESS_MONITOR_CONFIG_URL", default_value = DEFAULT_CONFIG_URL)]
    config_url: String,

    /// Connect to this ws:// or wss:// address directly
    #[arg(long, conflicts_with = "from_env")]
    ws_url: Option<String>,

    /// Read the address from NEXT_PUBLIC_WS_URL or WS_URL
    #[arg(long)]
    from_env: bool,

    /// IVF (VP8/VP9) clip used as the camera
    #[arg(long, env = "STRESS_MONITOR_CAMERA")]
    camera: Option<PathBuf>,

    /// ICE server hint, repeatable
    #[arg(long = "stun", env = "STRESS_MONITOR_STUN", value_delimiter = ',', default_value = DEFAULT_STUN_SERVER)]
    ice_servers: Vec<String>,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Timeout for the configuration request
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    timeout_secs: u64,
}

#[derive(Args, Debug)]
struct DemoArgs {
    #[arg(long, default_value_t = 2000)]
    interval_ms: u64,

    /// Stop after this many snapshots
    #[arg(long)]
    count: Option<u64>,
}

impl From<ConnectArgs> for ClientConfig {
    fn from(args: ConnectArgs) -> Self {
        let endpoint = match (args.ws_url, args.from_env) {
            (Some(url), _) => EndpointSource::Fixed(url),
            (None, true) => EndpointSource::Environment,
            (None, false) => EndpointSource::ConfigService(args.config_url),
        };

        ClientConfig {
            endpoint,
            ice_servers: args.ice_servers,
            camera: args.camera,
            constraints: MediaConstraints { width: args.width, height: args.height, audio: false },
            request_timeout: Duration::from_secs(args.timeout_secs),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    util::init_log();

    match Cli::parse().command {
        Command::Connect(args) => {
            let outcome = client::run(args.into()).await?;
            println!("{outcome}");
            if let Some(err) = outcome.error {
                if !err.is_recoverable() {
                    bail!(err);
                }
            }
        }
        Command::Demo(args) => {
            client::run_demo(Duration::from_millis(args.interval_ms), args.count).await;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ClientConfig {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Connect(args) => args.into(),
            Command::Demo(_) => panic!("expected connect"),
        }
    }

    #[test]
    fn ws_url_wins_over_config_service() {
        let cfg = parse(&["stress-monitor-rtc", "connect", "--ws-url", "ws://relay.test"]);
        assert_eq!(cfg.endpoint, EndpointSource::Fixed("ws://relay.test".into()));
    }

    #[test]
    fn stun_hints_are_repeatable() {
        let cfg = parse(&[
            "stress-monitor-rtc",
            "connect",
            "--from-env",
            "--stun",
            "stun:a.test:3478",
            "--stun",
            "stun:b.test:3478",
        ]);
        assert_eq!(cfg.endpoint, EndpointSource::Environment);
        assert_eq!(cfg.ice_servers, vec!["stun:a.test:3478", "stun:b.test:3478"]);
    }

    #[test]
    fn ws_url_and_from_env_conflict() {
        assert!(Cli::try_parse_from(["stress-monitor-rtc", "connect", "--ws-url", "ws://x", "--from-env"]).is_err());
    }
}
