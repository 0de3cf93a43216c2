//! SSDB Command Line Interface

use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use prettytable::{row, Table};
use ssdb_client::{Arg, Pool, PoolBuilder, ReconnectPolicy, Response, RetryPolicy, Status};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ssdb-cli")]
#[command(author, version, about = "SSDB Command Line Interface", long_about = None)]
struct Cli {
    /// Server address (host:port)
    #[arg(short, long, env = "SSDB_ADDR", default_value = "127.0.0.1:8888")]
    server: String,

    /// Number of pooled connections
    #[arg(short, long, default_value_t = 1)]
    pool_size: usize,

    /// Socket read and write timeout in milliseconds
    #[arg(short, long, default_value_t = 3000)]
    timeout_ms: u64,

    /// Return I/O errors instead of redialing
    #[arg(long)]
    fail_fast: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one raw command, e.g. `exec hset h k v`
    Exec {
        /// Command name
        command: String,
        /// Arguments, sent as text frames
        args: Vec<String>,
    },

    /// Ping the server
    Ping,

    /// Fire many pings across concurrent tasks
    Stress {
        /// Total requests
        #[arg(short, long, default_value_t = 1000)]
        requests: usize,
        /// Concurrent tasks
        #[arg(short, long, default_value_t = 8)]
        concurrency: usize,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Raw,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let timeout = Duration::from_millis(cli.timeout_ms);
    let reconnect = if cli.fail_fast {
        ReconnectPolicy::FailFast
    } else {
        ReconnectPolicy::Retry(RetryPolicy::default())
    };
    let pool = PoolBuilder::new()
        .addr(cli.server.clone())
        .pool_size(cli.pool_size)
        .read_timeout(timeout)
        .write_timeout(timeout)
        .reconnect(reconnect)
        .on_event(|msg| eprintln!("{}", msg.yellow()))
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", cli.server))?;

    let outcome = match cli.command {
        Commands::Exec { command, args } => {
            handle_exec_command(&pool, command, args, cli.format).await
        }
        Commands::Ping => handle_ping_command(&pool, cli.format).await,
        Commands::Stress {
            requests,
            concurrency,
        } => handle_stress_command(&pool, requests, concurrency, cli.format).await,
    };

    pool.close().await?;
    outcome
}

async fn handle_exec_command(
    pool: &Pool,
    command: String,
    args: Vec<String>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let args: Vec<Arg> = args.into_iter().map(Arg::from).collect();
    let response = pool.execute(&command, &args).await?;
    print_response(&response, format)
}

fn print_response(response: &Response, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Raw => {
            for frame in response.data() {
                println!("{}", display_frame(frame));
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(response)?),
        OutputFormat::Table => {
            let mut table = Table::new();
            table.add_row(row!["Status", colored_status(response.status)]);
            for (idx, frame) in response.data().iter().enumerate() {
                table.add_row(row![idx, display_frame(frame)]);
            }
            table.printstd();
        }
    }
    Ok(())
}

fn display_frame(frame: &[u8]) -> String {
    match std::str::from_utf8(frame) {
        Ok(text) => text.to_string(),
        Err(_) => format!("0x{}", hex::encode(frame)),
    }
}

fn colored_status(status: Status) -> ColoredString {
    match status {
        Status::Ok => status.as_str().green(),
        Status::NotFound => status.as_str().yellow(),
        _ => status.as_str().red(),
    }
}

async fn handle_ping_command(pool: &Pool, format: OutputFormat) -> anyhow::Result<()> {
    let start = Instant::now();
    let response = pool.execute(ssdb_client::PING_COMMAND, &[]).await?;
    let duration = start.elapsed();

    match format {
        OutputFormat::Raw => println!("{}", response.status),
        OutputFormat::Json => {
            let json = serde_json::json!({
                "status": response.status,
                "latency_ms": duration.as_millis(),
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table.add_row(row!["Status", "Latency"]);
            table.add_row(row![
                colored_status(response.status),
                format!("{} ms", duration.as_millis())
            ]);
            table.printstd();
        }
    }
    Ok(())
}

async fn handle_stress_command(
    pool: &Pool,
    requests: usize,
    concurrency: usize,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let concurrency = concurrency.max(1);
    let start = Instant::now();
    let mut handles = Vec::with_capacity(concurrency);
    for task in 0..concurrency {
        let pool = pool.clone();
        let share = requests / concurrency + usize::from(task < requests % concurrency);
        handles.push(tokio::spawn(async move {
            let mut failures = 0usize;
            for _ in 0..share {
                if pool.execute(ssdb_client::PING_COMMAND, &[]).await.is_err() {
                    failures += 1;
                }
            }
            failures
        }));
    }

    let mut failures = 0;
    for handle in handles {
        failures += handle.await?;
    }
    let elapsed = start.elapsed();
    let rate = requests as f64 / elapsed.as_secs_f64().max(f64::EPSILON);

    match format {
        OutputFormat::Raw => println!("{} {} {:.0}", requests, failures, rate),
        OutputFormat::Json => {
            let json = serde_json::json!({
                "requests": requests,
                "failures": failures,
                "elapsed_ms": elapsed.as_millis(),
                "requests_per_sec": rate,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table.add_row(row!["Requests", "Failures", "Elapsed", "Req/s"]);
            let failures = if failures == 0 {
                failures.to_string().green()
            } else {
                failures.to_string().red()
            };
            table.add_row(row![
                requests,
                failures,
                format!("{} ms", elapsed.as_millis()),
                format!("{:.0}", rate)
            ]);
            table.printstd();
        }
    }
    Ok(())
}
