use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::Method;
use clap::{Parser, Subcommand, ValueEnum};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::json;

use gateway_dispatch::config::load_config;
use gateway_dispatch::context::Phase;
use gateway_dispatch::invoker::{Connection, Connector, ConnectorError, OutboundRequest};
use gateway_dispatch::observability::logging;
use gateway_dispatch::DispatchRuntime;

#[derive(Parser)]
#[command(name = "dispatch-cli")]
#[command(about = "Inspect flow resolution and endpoint selection of a dispatch configuration", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, default_value = "dispatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration
    Check,
    /// Print the flows and path parameters matched by a request
    Resolve {
        #[arg(long)]
        api: String,
        #[arg(long, default_value = "GET")]
        method: String,
        #[arg(long)]
        path: String,
        #[arg(long, value_enum, default_value_t = PhaseArg::Request)]
        phase: PhaseArg,
    },
    /// Draw endpoints from a group and print how often each was picked
    Select {
        #[arg(long)]
        group: String,
        #[arg(short = 'n', long, default_value_t = 100)]
        count: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PhaseArg {
    Request,
    Response,
    MessageRequest,
    MessageResponse,
}

impl From<PhaseArg> for Phase {
    fn from(phase: PhaseArg) -> Self {
        match phase {
            PhaseArg::Request => Phase::Request,
            PhaseArg::Response => Phase::Response,
            PhaseArg::MessageRequest => Phase::MessageRequest,
            PhaseArg::MessageResponse => Phase::MessageResponse,
        }
    }
}

/// The CLI never forwards traffic.
#[derive(Debug)]
struct OfflineConnector;

impl Connector for OfflineConnector {
    fn connect<'a>(&'a self, request: OutboundRequest) -> BoxFuture<'a, Result<Connection, ConnectorError>> {
        async move { Err(ConnectorError::Refused(request.endpoint)) }.boxed()
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    logging::init(&config.observability.log_level)?;

    let runtime = DispatchRuntime::from_config(&config, Arc::new(OfflineConnector));

    match cli.command {
        Commands::Check => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "valid": true,
                    "apis": config.apis.len(),
                    "endpoint_groups": config.endpoint_groups.len(),
                }))?
            );
        }
        Commands::Resolve { api, method, path, phase } => {
            let method = Method::from_bytes(method.as_bytes())?;
            let phase = Phase::from(phase);
            let mut ctx = runtime.new_context(&api, method, &path)?;
            let flows: Vec<_> = runtime
                .resolve_flows(&mut ctx, phase)?
                .map(|flow| {
                    json!({
                        "id": flow.id(),
                        "name": flow.name(),
                        "steps": flow.steps(phase).iter().map(|s| s.policy.as_str()).collect::<Vec<_>>(),
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "api": api,
                    "path_info": ctx.path_info(),
                    "phase": phase.as_str(),
                    "flows": flows,
                    "path_parameters": ctx.path_parameters(),
                }))?
            );
        }
        Commands::Select { group, count } => {
            let Some(endpoints) = runtime.endpoints().group(&group) else {
                return Err(format!("unknown endpoint group '{group}'").into());
            };
            let mut picks: BTreeMap<String, usize> = BTreeMap::new();
            let mut misses = 0usize;
            for _ in 0..count {
                match endpoints.next() {
                    Some(endpoint) => *picks.entry(endpoint.name().to_string()).or_default() += 1,
                    None => misses += 1,
                }
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "group": group,
                    "load_balancer": endpoints.kind().as_str(),
                    "picks": picks,
                    "no_endpoint": misses,
                }))?
            );
        }
    }

    Ok(())
}
