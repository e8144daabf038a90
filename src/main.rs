use userbench::processor::{self, BenchConfig};
use userbench::server::{self, ServerConfig};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "userbench")]
#[command(about = "Parallel column apply benchmark and a small user CRUD service", long_about = None)]
struct Cli {
    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Time sequential vs worker-pool apply over a column
    Bench(BenchArgs),
    /// Serve the user endpoints over HTTP
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct BenchArgs {
    /// Rows of generated data (ignored with --input)
    #[arg(long, default_value_t = 30_000)]
    rows: usize,

    /// Worker threads (defaults to the number of CPUs)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Column to transform
    #[arg(long, default_value = "a")]
    column: String,

    /// Column receiving the result
    #[arg(long, default_value = "add_col")]
    target: String,

    /// CSV file to load instead of generated data
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to bind
    #[arg(long, env = "USERBENCH_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind
    #[arg(short, long, env = "USERBENCH_PORT", default_value_t = 8001)]
    port: u16,

    /// DuckDB database path
    #[arg(short, long, env = "USERBENCH_DATABASE", default_value = "test.db")]
    database: String,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose >= 2)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    debug!(?cli, "Parsed arguments");

    match cli.command {
        Command::Bench(args) => {
            let defaults = BenchConfig::default();
            let config = BenchConfig {
                rows: args.rows,
                workers: args.workers.unwrap_or(defaults.workers),
                column: args.column,
                target: args.target,
                input: args.input,
                progress: !args.no_progress,
            };
            processor::run(&config)?;
        }
        Command::Serve(args) => {
            let config = ServerConfig {
                host: args.host,
                port: args.port,
                database_url: args.database,
            };
            let runtime = tokio::runtime::Runtime::new().context("Failed to start Tokio runtime")?;
            runtime.block_on(server::run_server(config))?;
        }
    }

    Ok(())
}
