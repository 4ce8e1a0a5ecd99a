//! Zeebe gateway CLI
//!
//! Thin adapter over the client: each subcommand runs one operation and
//! prints the result as JSON on stdout.
//!
//! Usage:
//!   cargo run --features cli --bin zeebe-cli -- \
//!     publish --name orderPlaced --correlation-key order-42 --variables '{"qty":3}'
//!
//! Examples:
//!   # Start a process instance (credentials from .env / environment)
//!   cargo run --features cli --bin zeebe-cli -- \
//!     create-instance --process-id order-process --variables '{"orderId":"A-1"}'
//!
//!   # Run a batch file, recording every failure instead of stopping
//!   cargo run --features cli --bin zeebe-cli -- \
//!     batch --file ops.json --continue-on-error

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use zeebe_gateway_client::gateway::batch::{self, BatchPolicy};
use zeebe_gateway_client::gateway::{
    CallOptions, ClientConfig, CreateProcessInstance, JobHandle, JobOutcome, PublishMessage,
    Variables, ZeebeClient,
};

/// Reason reported by `fail-job` when none is given.
const DEFAULT_FAIL_REASON: &str = "an error occured while executing n8n workflow";

/// Zeebe / Camunda Cloud gateway client
#[derive(Parser, Debug)]
#[command(name = "zeebe-cli")]
#[command(about = "Create instances, publish messages and resolve jobs on a Zeebe gateway")]
struct Args {
    /// YAML config file (default: ZEEBE_* / CAMUNDA_* environment variables)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Per-call timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a new process instance
    CreateInstance {
        #[arg(long, short = 'p')]
        process_id: String,
        /// Process version (default: latest)
        #[arg(long)]
        version: Option<i32>,
        /// Variables as JSON text
        #[arg(long, default_value = "{}")]
        variables: String,
    },
    /// Publish a message; omit the correlation key to publish a start message
    Publish {
        #[arg(long, short = 'n')]
        name: String,
        #[arg(long, short = 'k')]
        correlation_key: Option<String>,
        /// Idempotency id (default: fresh UUID)
        #[arg(long)]
        message_id: Option<String>,
        #[arg(long, default_value_t = 3600)]
        ttl_secs: u64,
        #[arg(long, default_value = "{}")]
        variables: String,
    },
    /// Complete an activated job
    CompleteJob {
        #[arg(long, short = 'j')]
        job_key: String,
        #[arg(long, default_value = "{}")]
        variables: String,
    },
    /// Fail an activated job with zero retries
    FailJob {
        #[arg(long, short = 'j')]
        job_key: String,
        #[arg(long, default_value = DEFAULT_FAIL_REASON)]
        reason: String,
    },
    /// Print the cluster topology
    Topology,
    /// Run a JSON array of operations
    Batch {
        #[arg(long, short = 'f')]
        file: PathBuf,
        /// Continue on error (don't stop on first failure)
        #[arg(long)]
        continue_on_error: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing (stderr, so stdout stays JSON)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ClientConfig::load_from_file(path)?,
        None => ClientConfig::from_env()?,
    };
    let client = ZeebeClient::connect(config)?;

    let mut options = CallOptions::default();
    if let Some(ms) = args.timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }

    let outcome = run(&client, args.command, options).await;
    client.close().await;
    outcome
}

async fn run(client: &ZeebeClient, command: Command, options: CallOptions) -> Result<()> {
    match command {
        Command::CreateInstance {
            process_id,
            version,
            variables,
        } => {
            let mut request = CreateProcessInstance::new(process_id, Variables::parse(&variables)?);
            request.version = version;
            let instance = client.create_process_instance_with(request, options).await?;
            print_json(&instance)
        }
        Command::Publish {
            name,
            correlation_key,
            message_id,
            ttl_secs,
            variables,
        } => {
            let mut message = PublishMessage::new(name)
                .time_to_live(Duration::from_secs(ttl_secs))
                .variables(Variables::parse(&variables)?);
            if let Some(key) = correlation_key {
                message = message.correlation_key(key);
            }
            if let Some(id) = message_id {
                message = message.message_id(id);
            }
            let ack = client.publish_message_with(message, options).await?;
            print_json(&ack)
        }
        Command::CompleteJob { job_key, variables } => {
            let handle = JobHandle {
                job_key: job_key.into(),
                outcome: JobOutcome::Complete {
                    variables: Variables::parse(&variables)?,
                },
            };
            let ack = client.resolve_job(handle, options).await?;
            print_json(&ack)
        }
        Command::FailJob { job_key, reason } => {
            let handle = JobHandle {
                job_key: job_key.into(),
                outcome: JobOutcome::Fail { reason },
            };
            let ack = client.resolve_job(handle, options).await?;
            print_json(&ack)
        }
        Command::Topology => {
            let topology = client.topology().await?;
            print_json(&topology)
        }
        Command::Batch {
            file,
            continue_on_error,
        } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Reading {}", file.display()))?;
            let operations = batch::parse_operations(&content)
                .with_context(|| format!("Parsing {}", file.display()))?;
            let policy = BatchPolicy::from_continue_flag(continue_on_error);

            match batch::run_batch(client, operations, policy, options).await {
                Ok(report) => {
                    eprintln!(
                        "{} {} succeeded, {} failed",
                        "Batch:".cyan().bold(),
                        report.success_count().to_string().green(),
                        report.failure_count().to_string().red()
                    );
                    print_json(&report)
                }
                Err(aborted) => {
                    eprintln!(
                        "{} stopped at item {}: {}",
                        "FAIL".red(),
                        aborted.index,
                        aborted.error
                    );
                    print_json(&aborted.completed)?;
                    Err(aborted.into())
                }
            }
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
