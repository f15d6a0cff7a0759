use std::io::Read;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{error, info};

use fluxconn_compose::{Function, FunctionRunner};
use fluxconn_core::RunFunctionRequest;
use fluxconn_schema::Adapters;

#[derive(Parser, Debug)]
#[command(name = "fluxconnctl", version, about = "Run the flux remote connection function against a request document")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Json)]
    output: Output,

    /// Seconds the orchestrator may cache a response for
    #[arg(long = "ttl-secs", env = "FLUXCONN_TTL_SECS", global = true, default_value_t = 60)]
    ttl_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Json, Yaml }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one function pass and print the full response
    Run {
        /// Request document (JSON or YAML); "-" reads stdin
        #[arg(short = 'r', long = "request", env = "FLUXCONN_REQUEST", default_value = "-")]
        request: String,
    },
    /// Print only the resources the function declares it needs
    Requirements {
        /// Request document (JSON or YAML); "-" reads stdin
        #[arg(short = 'r', long = "request", env = "FLUXCONN_REQUEST", default_value = "-")]
        request: String,
    },
}

fn init_tracing() {
    let env = std::env::var("FLUXCONN_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // stdout carries the response document
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("FLUXCONN_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid FLUXCONN_METRICS_ADDR; expected host:port");
        }
    }
}

fn max_request_bytes() -> usize {
    std::env::var("FLUXCONN_MAX_REQUEST_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(4_000_000)
}

fn read_source(path: &str) -> Result<String> {
    if path == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("reading request from stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading request file {}", path))
    }
}

/// JSON is valid YAML, so one parser covers both input formats.
fn parse_request(raw: &str) -> Result<RunFunctionRequest> {
    if raw.len() > max_request_bytes() {
        return Err(anyhow!("request too large (>{} bytes)", max_request_bytes()));
    }
    let val: serde_yaml::Value = serde_yaml::from_str(raw).context("parsing request document")?;
    let json = serde_json::to_value(val).context("converting request to JSON")?;
    serde_json::from_value(json).context("decoding RunFunctionRequest")
}

fn print<T: Serialize>(output: Output, value: &T) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(value)?),
        Output::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn main() -> Result<ExitCode> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let function = Function::new(Adapters::default()).with_ttl(Duration::from_secs(cli.ttl_secs));

    match cli.command {
        Commands::Run { request } => {
            info!(request = %request, "run invoked");
            let req = parse_request(&read_source(&request)?)?;
            let rsp = function.run_function(&req);
            print(cli.output, &rsp)?;
            if rsp.is_fatal() {
                error!("function pass ended with a fatal result");
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Requirements { request } => {
            info!(request = %request, "requirements invoked");
            let req = parse_request(&read_source(&request)?)?;
            let rsp = function.run_function(&req);
            let reqs = rsp.requirements.clone().unwrap_or_default();
            print(cli.output, &reqs.resources)?;
            if rsp.requirements.is_none() && rsp.is_fatal() {
                for r in &rsp.results {
                    eprintln!("requirements error: {}", r.message);
                }
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
