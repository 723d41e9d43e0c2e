//! handshake-sim: drive the login handshake controller through a scripted
//! daemon and print what a user would see.

mod scenario;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use handshake_observability::LogConfig;
use login_challenge_types::FlowId;
use login_handshake::{FlowKind, HandshakeConfig};

use crate::scenario::Scenario;

/// Login handshake simulator.
#[derive(Parser)]
#[command(name = "handshake-sim")]
#[command(about = "Run login handshake scenarios against a scripted daemon")]
#[command(version)]
struct Cli {
    /// Scenario to run
    #[arg(short, long, value_enum, default_value = "interactive")]
    scenario: ScenarioArg,

    /// Session identifier the controller is bound to
    #[arg(long, env = "HANDSHAKE_SESSION_ID", default_value = "sim-session")]
    session_id: String,

    /// Flow identifier scoping push topics
    #[arg(long, env = "HANDSHAKE_FLOW_ID", default_value = "sim-flow")]
    flow_id: String,

    /// Device approval timeout in seconds (overrides HANDSHAKE_DEVICE_APPROVAL_TIMEOUT_SECS)
    #[arg(long)]
    approval_timeout_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "HANDSHAKE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log file path. Defaults to ~/.login-handshake/logs/handshake.jsonl
    #[arg(long, env = "HANDSHAKE_LOG_PATH")]
    log_path: Option<PathBuf>,

    /// Also log to stderr
    #[arg(long)]
    stderr: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScenarioArg {
    Interactive,
    DeviceApproval,
    DeviceTimeout,
    AuthorizationCode,
    AuthorizationRejected,
}

impl From<ScenarioArg> for Scenario {
    fn from(arg: ScenarioArg) -> Self {
        match arg {
            ScenarioArg::Interactive => Scenario::Interactive,
            ScenarioArg::DeviceApproval => Scenario::DeviceApproval,
            ScenarioArg::DeviceTimeout => Scenario::DeviceTimeout,
            ScenarioArg::AuthorizationCode => Scenario::AuthorizationCode,
            ScenarioArg::AuthorizationRejected => Scenario::AuthorizationRejected,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_path = handshake_observability::init_with_config(LogConfig {
        service_name: "handshake-sim".into(),
        default_level: cli.log_level.clone(),
        log_path: cli.log_path.clone(),
        also_stderr: cli.stderr,
    })?;

    let scenario = Scenario::from(cli.scenario);
    let mut config = HandshakeConfig::from_env(FlowId::from(cli.flow_id.as_str()), scenario.flow())?;
    if let Some(secs) = cli.approval_timeout_secs {
        config.device_approval_timeout = Duration::from_secs(secs);
    }

    println!("scenario: {scenario:?}");
    println!("logs:     {}", log_path.display());
    if matches!(config.flow, FlowKind::Interactive) {
        println!("flow:     interactive ({})", config.flow_id);
    } else {
        println!("flow:     authorization code ({})", config.flow_id);
    }

    let outcome = scenario::run(scenario, config, cli.session_id).await?;
    println!("outcome:  {outcome}");

    Ok(())
}
