//! poolmigrate - Octavia pool protocol migration tool
//!
//! Exit codes: 0 when every listener was migrated or skipped, 1 on setup
//! errors, 2 when at least one listener failed or was not processed.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use octavia_api::{AuthOptions, OctaviaClient, Protocol};
use octavia_poolmigrate::{
    ConfigOverrides, CutoverFlags, MigrationReport, MigrationScope, MigratorConfig, Orchestrator,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_SETUP_ERROR: u8 = 1;
const EXIT_LISTENER_FAILED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Migrate Octavia pools to a new protocol without downtime
#[derive(Parser, Debug)]
#[command(name = "poolmigrate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Migrate every listener of this load balancer
    #[arg(long)]
    load_balancer_id: Option<String>,

    /// Migrate only this listener
    #[arg(long)]
    listener_id: Option<String>,

    /// Target pool protocol
    #[arg(long, default_value = "PROXY")]
    protocol: Protocol,

    /// Point the listener's default pool at the migrated pool
    #[arg(long)]
    switch_default_pool: bool,

    /// Delete the old pool after switching (implies --switch-default-pool)
    #[arg(long)]
    delete: bool,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds between provisioning status checks
    #[arg(long)]
    poll_interval_secs: Option<u64>,

    /// Seconds to wait for the load balancer to become ACTIVE
    #[arg(long)]
    settle_timeout_secs: Option<u64>,

    /// How many times a timed-out wait is restarted
    #[arg(long)]
    settle_retries: Option<u32>,

    /// Stop processing further listeners after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Octavia endpoint; skips Keystone and uses OS_TOKEN
    #[arg(long)]
    endpoint: Option<String>,

    /// Report format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    let output = args.output;
    let report = match run(args).await {
        Ok(report) => report,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_SETUP_ERROR);
        }
    };

    match output {
        OutputFormat::Text => println!("{}", report),
        OutputFormat::Json => match report.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("failed to serialize report: {}", e);
                return ExitCode::from(EXIT_SETUP_ERROR);
            }
        },
    }

    if report.has_failures() {
        ExitCode::from(EXIT_LISTENER_FAILED)
    } else {
        ExitCode::SUCCESS
    }
}

async fn run(args: Args) -> Result<MigrationReport> {
    let scope = MigrationScope::from_ids(args.load_balancer_id, args.listener_id)?;

    let mut config = MigratorConfig::load_or_default(args.config.as_deref())?;
    config.apply_overrides(&ConfigOverrides {
        poll_interval_secs: args.poll_interval_secs,
        settle_timeout_secs: args.settle_timeout_secs,
        settle_retries: args.settle_retries,
        endpoint: args.endpoint,
    });
    config.validate()?;

    let client = build_client(&config).await?;
    info!(endpoint = %client.base_url(), "Connected to Octavia");

    let cancel = CancellationToken::new();
    spawn_cancel_watcher(cancel.clone(), args.deadline_secs.map(Duration::from_secs));

    let flags = CutoverFlags {
        switch_default_pool: args.switch_default_pool,
        delete_old_pool: args.delete,
    };
    let orchestrator = Orchestrator::new(Arc::new(client), config.settle_config(), cancel);
    let report = orchestrator
        .run(&scope, &args.protocol, flags)
        .await
        .context("migration aborted")?;
    Ok(report)
}

async fn build_client(config: &MigratorConfig) -> Result<OctaviaClient> {
    let timeout = config.request_timeout();

    if let Some(endpoint) = &config.client.endpoint {
        let token = std::env::var("OS_TOKEN")
            .context("an explicit endpoint requires OS_TOKEN to be set")?;
        return OctaviaClient::new(endpoint, &token, timeout)
            .context("failed to create Octavia client");
    }

    let mut opts = AuthOptions::from_env().context("failed to read OpenStack credentials")?;
    if let Some(interface) = &config.client.interface {
        opts.interface = interface.clone();
    }
    if let Some(region) = &config.client.region {
        opts.region = Some(region.clone());
    }
    OctaviaClient::authenticate(&opts, timeout)
        .await
        .context("Keystone authentication failed")
}

/// Cancels the run on Ctrl-C or when the deadline elapses.
fn spawn_cancel_watcher(cancel: CancellationToken, deadline: Option<Duration>) {
    tokio::spawn(async move {
        let deadline = async {
            match deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => warn!("Interrupted, cancelling remaining work"),
                Err(e) => {
                    warn!("failed to listen for Ctrl-C: {}", e);
                    (&mut deadline).await;
                    warn!("Run deadline reached, cancelling remaining work");
                }
            },
            _ = &mut deadline => warn!("Run deadline reached, cancelling remaining work"),
        }
        cancel.cancel();
    });
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .init();
}
