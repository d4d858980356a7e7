//! clamd client CLI.
//!
//! Sends one command to a ClamAV daemon and prints the result.

use anyhow::{Context, Result};
use clamd_client::{ClamdClient, Config, TransportKind, TransportProvider, STREAM_OK};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Client for the ClamAV daemon.
#[derive(Parser, Debug)]
#[command(name = "clamd-client")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// clamd Unix socket (overrides the config file).
    #[arg(short, long, conflicts_with = "tcp")]
    socket: Option<PathBuf>,

    /// clamd TCP address as HOST:PORT (overrides the config file).
    #[arg(long, value_name = "HOST:PORT")]
    tcp: Option<String>,

    /// Connect/send/receive timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Print example configuration and exit.
    #[arg(long)]
    example_config: bool,

    /// Validate configuration and exit.
    #[arg(long)]
    validate: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that clamd answers PONG.
    Ping,
    /// Print the clamd version.
    Version,
    /// Reload the signature databases.
    Reload,
    /// Stop the daemon.
    Shutdown,
    /// Scan a path on the daemon's filesystem.
    Scan { path: String },
    /// Scan a path recursively, reporting every detection.
    Contscan { path: String },
    /// Stream a local file to the daemon and scan it.
    Instream { path: PathBuf },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout carries results only.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(Args::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    // Print example config if requested
    if args.example_config {
        println!("{}", Config::example());
        return Ok(ExitCode::SUCCESS);
    }

    let config = resolve_config(&args)?;

    if args.validate {
        println!("Configuration is valid");
        return Ok(ExitCode::SUCCESS);
    }

    let command = args
        .command
        .context("no command given (try --help)")?;

    debug!(transport = ?config.clamd.transport, "Using clamd transport");

    match config.clamd.transport {
        TransportKind::Unix => {
            execute(ClamdClient::new(config.clamd.unix_transport()), command).await
        }
        TransportKind::Tcp => {
            execute(ClamdClient::new(config.clamd.tcp_transport()), command).await
        }
    }
}

/// Config file (or defaults) with command-line overrides applied, validated last
/// so a flag can replace an invalid file value.
fn resolve_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::parse(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => Config::default(),
    };
    apply_overrides(&mut config, args)?;
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut Config, args: &Args) -> Result<()> {
    if let Some(socket) = &args.socket {
        config.clamd.transport = TransportKind::Unix;
        config.clamd.socket_path = socket.clone();
    }

    if let Some(address) = &args.tcp {
        let (host, port) = address
            .rsplit_once(':')
            .with_context(|| format!("expected HOST:PORT, got {:?}", address))?;
        config.clamd.transport = TransportKind::Tcp;
        config.clamd.host = host.to_string();
        config.clamd.port = port
            .parse()
            .with_context(|| format!("invalid port in {:?}", address))?;
    }

    if let Some(timeout_ms) = args.timeout_ms {
        config.clamd.timeout_ms = timeout_ms;
    }

    Ok(())
}

/// Exit status 0 means clean or success, 1 means not clean or no PONG.
async fn execute<T: TransportProvider>(client: ClamdClient<T>, command: Command) -> Result<ExitCode> {
    match command {
        Command::Ping => {
            if client.ping().await {
                println!("PONG");
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("clamd did not answer PING");
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Version => {
            println!("{}", client.version().await?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Reload => {
            if let Some(reply) = client.reload().await? {
                println!("{}", reply);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Shutdown => {
            if let Some(reply) = client.shutdown().await? {
                println!("{}", reply);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Scan { path } => {
            let result = client.scan_file_result(&path).await?;
            println!("{}: {}", result.path, result.status);
            Ok(verdict_code(result.is_clean()))
        }
        Command::Contscan { path } => {
            let results = client.continue_scan(&path).await?;
            for result in &results {
                println!("{}: {}", result.path, result.status);
            }
            Ok(verdict_code(results.iter().all(|r| r.is_clean())))
        }
        Command::Instream { path } => {
            let response = client.file_scan_in_stream_response(&path).await?;
            if response.is_empty() {
                println!("{}: no reply from clamd", path.display());
            } else {
                println!("{}: {}", path.display(), response);
            }
            Ok(verdict_code(response == STREAM_OK))
        }
    }
}

fn verdict_code(clean: bool) -> ExitCode {
    if clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
