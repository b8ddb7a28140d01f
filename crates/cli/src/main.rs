//! restout CLI entry point.
//!
//! This binary is the composition root for the gateway. Responsibilities:
//!
//! 1. **Parse configuration**: load the TOML service file and validate it
//!    into a [`gateway::ServiceRegistry`].
//! 2. **Wire observability**: install `tracing-subscriber` (human-readable or
//!    JSON) and, when requested, an OpenTelemetry OTLP exporter.
//! 3. **Construct infrastructure**: create the [`backend::ReqwestExchange`],
//!    the slot pool, and a bus adapter, and inject them into the
//!    [`dispatch::Dispatcher`].
//! 4. **Run a command**: `check` validates the configuration; `call`
//!    dispatches one payload and prints the verdict and reply.

mod bus;
mod config;
mod observability;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use backend::ReqwestExchange;
use clap::{Args, Parser, Subcommand};
use dispatch::{Dispatcher, SlotPool};
use gateway::buffer;
use gateway::{BufferFormat, CallDescriptor, InboundCall, Reply, ServiceName, ServiceRegistry};

use crate::bus::SingleShotBus;

/// Upper bound for `--slots`.
const MAX_SLOTS: i64 = 4096;

#[derive(Debug, Parser)]
#[command(name = "restoutsv", version, about = "Outbound REST gateway")]
struct Cli {
    /// Service configuration file.
    #[arg(long, default_value = "restout.toml", global = true)]
    config: PathBuf,

    /// Log level or filter directive; `RUST_LOG` takes precedence.
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Export spans to this OTLP/gRPC endpoint.
    #[arg(long, global = true)]
    otlp_endpoint: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration and list the services.
    Check,
    /// Dispatch one call and print the verdict and reply payload.
    Call(CallArgs),
}

#[derive(Debug, Args)]
struct CallArgs {
    /// Target service.
    service: String,

    /// Buffer format of the payload.
    #[arg(long)]
    format: BufferFormat,

    /// Payload text.
    #[arg(long, conflicts_with = "payload_file", required_unless_present = "payload_file")]
    payload: Option<String>,

    /// Read the payload from a file.
    #[arg(long)]
    payload_file: Option<PathBuf>,

    /// Execution slots in the pool.
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..=MAX_SLOTS))]
    slots: u16,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let telemetry = match observability::init(&cli.log_level, cli.log_json, cli.otlp_endpoint.as_deref()) {
        Ok(telemetry) => telemetry,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let result = run(cli).await;
    telemetry.shutdown();

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the command succeeded.
async fn run(cli: Cli) -> anyhow::Result<bool> {
    let registry = config::load_registry(&cli.config)?;
    match cli.command {
        Command::Check => {
            check(&registry);
            Ok(true)
        }
        Command::Call(args) => call(registry, args).await,
    }
}

fn check(registry: &ServiceRegistry) {
    println!("{} service(s) configured", registry.len());
    for name in registry.names() {
        if let Some(service) = registry.lookup(name) {
            println!(
                "  {name}: {} errors={} timeout={}s ssl_insecure={}",
                service.url,
                service.error_mode(),
                service.timeout.as_secs(),
                service.ssl_insecure
            );
        }
    }
}

async fn call(registry: ServiceRegistry, args: CallArgs) -> anyhow::Result<bool> {
    let raw = read_payload(args.payload, args.payload_file.as_deref())?;
    let request = buffer::deserialize(args.format, &raw)
        .with_context(|| format!("payload is not a valid {} buffer", args.format))?;
    let service = ServiceName::new(args.service).ok_or_else(|| anyhow!("service name must not be empty"))?;

    let bus = Arc::new(SingleShotBus::new(request));
    let dispatcher = Dispatcher::new(
        Arc::new(registry),
        Arc::new(ReqwestExchange::new()?),
        bus.clone(),
        SlotPool::new(usize::from(args.slots))?,
    );

    let outcome = dispatcher
        .dispatch(InboundCall {
            service,
            descriptor: CallDescriptor::new(1),
        })
        .await?;
    let reply = bus
        .take_reply()
        .ok_or_else(|| anyhow!("dispatcher finished without committing a reply"))?;

    print_reply(&reply)?;
    Ok(outcome.kind.is_success())
}

fn read_payload(text: Option<String>, file: Option<&Path>) -> anyhow::Result<Vec<u8>> {
    match (text, file) {
        (Some(text), _) => Ok(text.into_bytes()),
        (None, Some(path)) => {
            std::fs::read(path).with_context(|| format!("failed to read payload file {}", path.display()))
        }
        (None, None) => Err(anyhow!("either --payload or --payload-file is required")),
    }
}

fn print_reply(reply: &Reply) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "status: {:?}", reply.status())?;
    if let Some(flag) = reply.soft_flag() {
        writeln!(stdout, "soft: {flag:?}")?;
    }
    writeln!(stdout, "code: {}", reply.code().as_i64())?;
    if let Some(message) = reply.message() {
        writeln!(stdout, "message: {message}")?;
    }
    if let Some(payload) = reply.buffer() {
        let (bytes, _) = buffer::serialize(payload).context("failed to render reply payload")?;
        writeln!(stdout, "payload ({}):", payload.format())?;
        stdout.write_all(&bytes)?;
        writeln!(stdout)?;
    }
    Ok(())
}
