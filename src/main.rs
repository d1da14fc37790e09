use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use windowlimit::config::{LoggingConfig, WindowLimitConfig};
use windowlimit::ratelimit::{LimiterHandle, LimiterWorker, WindowLimiter};

/// Per-key fixed-window rate limiter driven from stdin.
///
/// Reads one command per line: `add <key>`, `ask <key>`, `clear <key>`,
/// `configure <window> <threshold>`, `snapshot` or `dump`.
#[derive(Debug, Parser)]
#[command(name = "windowlimit", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Window length in seconds, overriding the configuration
    #[arg(short, long)]
    window: Option<i64>,

    /// Hits allowed per window, overriding the configuration
    #[arg(short, long)]
    threshold: Option<i64>,

    /// Log filter directive, overriding the configuration
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = WindowLimitConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(window) = args.window {
        config.limiter.window_secs = window;
    }
    if let Some(threshold) = args.threshold {
        config.limiter.threshold = threshold;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.logging.json |= args.json_logs;

    init_tracing(&config.logging);

    info!("Starting windowlimit");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        window = config.limiter.window_secs,
        threshold = config.limiter.threshold,
        "Configuration loaded"
    );

    let limiter = WindowLimiter::<String>::new(config.limiter);
    let (handle, worker) = LimiterWorker::spawn(limiter, config.worker.channel_capacity);

    serve_stdin(&handle).await?;

    handle.shutdown().await?;
    worker.await?;

    info!("windowlimit stopped");
    Ok(())
}

/// Initialize tracing. Logs go to stderr so stdout carries only replies.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Answer commands from stdin until EOF or a shutdown signal.
async fn serve_stdin(handle: &LimiterHandle<String>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = &mut shutdown => break,
        };
        let Some(line) = line else {
            info!("Input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match Request::parse(&line) {
            Ok(request) => execute(handle, request).await?,
            Err(e) => {
                warn!(line = %line, error = %e, "Rejected command");
                format!("error: {}", e)
            }
        };

        stdout.write_all(reply.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    Ok(())
}

/// One parsed input line.
#[derive(Debug, PartialEq, Eq)]
enum Request {
    Add(String),
    Ask(String),
    Clear(String),
    Configure { window: i64, threshold: i64 },
    Snapshot,
    Dump,
}

impl Request {
    fn parse(line: &str) -> anyhow::Result<Self> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        let request = match (verb, args.as_slice()) {
            ("add", [key]) => Request::Add(key.to_string()),
            ("ask", [key]) => Request::Ask(key.to_string()),
            ("clear", [key]) => Request::Clear(key.to_string()),
            ("configure", [window, threshold]) => Request::Configure {
                window: window.parse().context("window must be an integer")?,
                threshold: threshold.parse().context("threshold must be an integer")?,
            },
            ("snapshot", []) => Request::Snapshot,
            ("dump", []) => Request::Dump,
            ("add" | "ask" | "clear", _) => bail!("usage: {} <key>", verb),
            ("configure", _) => bail!("usage: configure <window> <threshold>"),
            _ => bail!("unknown command: {}", verb),
        };
        Ok(request)
    }
}

#[derive(Debug, Serialize)]
struct SnapshotEntry {
    key: String,
    count: u64,
    deadline: i64,
}

async fn execute(handle: &LimiterHandle<String>, request: Request) -> anyhow::Result<String> {
    let reply = match request {
        Request::Add(key) => verdict(handle.add(key).await?),
        Request::Ask(key) => verdict(handle.ask(key).await?),
        Request::Clear(key) => {
            handle.clear(key).await?;
            "ok".to_string()
        }
        Request::Configure { window, threshold } => {
            handle.configure(window, threshold).await?;
            "ok".to_string()
        }
        Request::Snapshot => {
            let entries: Vec<SnapshotEntry> = handle
                .snapshot()
                .await?
                .into_iter()
                .map(|(key, record)| SnapshotEntry {
                    key,
                    count: record.count,
                    deadline: record.deadline,
                })
                .collect();
            serde_json::to_string(&entries)?
        }
        Request::Dump => handle.dump().await?.join(" "),
    };
    Ok(reply)
}

fn verdict(admitted: bool) -> String {
    let verdict = if admitted { "allow" } else { "deny" };
    verdict.to_string()
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_commands() {
        assert_eq!(Request::parse("add alice").unwrap(), Request::Add("alice".to_string()));
        assert_eq!(Request::parse("  ask   bob ").unwrap(), Request::Ask("bob".to_string()));
        assert_eq!(Request::parse("clear 10.0.0.1").unwrap(), Request::Clear("10.0.0.1".to_string()));
    }

    #[test]
    fn test_parse_configure() {
        assert_eq!(
            Request::parse("configure 60 -1").unwrap(),
            Request::Configure { window: 60, threshold: -1 }
        );
        assert!(Request::parse("configure sixty 3").is_err());
        assert!(Request::parse("configure 60").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Request::parse("add").is_err());
        assert!(Request::parse("add a b").is_err());
        assert!(Request::parse("dump now").is_err());
        assert!(Request::parse("frobnicate x").is_err());
    }

    #[tokio::test]
    async fn test_execute_against_worker() {
        let limiter = WindowLimiter::<String>::new(windowlimit::config::LimiterConfig::new(60, 1));
        let (handle, _task) = LimiterWorker::spawn(limiter, 4);

        assert_eq!(execute(&handle, Request::Add("k".into())).await.unwrap(), "allow");
        assert_eq!(execute(&handle, Request::Add("k".into())).await.unwrap(), "deny");
        assert_eq!(execute(&handle, Request::Ask("k".into())).await.unwrap(), "deny");

        let snapshot = execute(&handle, Request::Snapshot).await.unwrap();
        assert!(snapshot.contains(r#""key":"k""#));
        assert!(snapshot.contains(r#""count":2"#));

        assert_eq!(execute(&handle, Request::Dump).await.unwrap(), "k");
        assert_eq!(execute(&handle, Request::Ask("k".into())).await.unwrap(), "allow");
    }
}
