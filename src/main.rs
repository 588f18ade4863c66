// ============================================================================
// CENAYANG INGEST — Market-Data Ingestion & Order-Book Maintenance Gateway
//
// Pipeline: Exchange push/pull streams → dedup → parse → order-book store
//
// Guarantees:
//   - One push (WebSocket) and one pull (REST poll) handler per symbol
//   - Event-loop pool, least-loaded placement, one OS thread per loop
//   - Bloom+LRU content deduplication with bounded false-positive growth
//   - Back-pressured pipeline: shed above cap, never block producers
//   - Sharded order-book store with depth-truncated JSON snapshots
//   - Circuit breaker guarding the pull stream's outbound requests
// ============================================================================

use std::sync::Arc;

use anyhow::Context;
use cenayang_ingest::{Config, Coordinator, Symbol};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("╔═══════════════════════════════════════════════════════════╗");
    info!("║  CENAYANG INGEST — Market Data & Order-Book Gateway v3.0  ║");
    info!("╚═══════════════════════════════════════════════════════════╝");

    let config = Config::from_env();
    info!(
        shard_count = config.shard_count,
        event_loop_count = config.event_loop_count,
        push_host = %config.push_host,
        pull_host = %config.pull_host,
        "loaded configuration"
    );

    let coordinator =
        Arc::new(Coordinator::new(config).context("failed to initialize coordinator")?);
    coordinator.start();

    info!("[Gateway] Ready. Commands: add <symbol> | remove <symbol> | list | status | exit");
    run_control_shell(coordinator.clone()).await;

    info!("[Shutdown] Draining handlers...");
    coordinator.stop();
    info!("[Shutdown] Complete");
    Ok(())
}

/// Reads commands from stdin until `exit`/EOF or a termination signal,
/// whichever comes first.
async fn run_control_shell(coordinator: Arc<Coordinator>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    loop {
        #[cfg(unix)]
        let signal = sigterm.recv();
        #[cfg(not(unix))]
        let signal = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("[Shutdown] SIGINT received");
                break;
            }
            _ = signal => {
                info!("[Shutdown] SIGTERM received");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(raw)) => {
                        if !handle_command(&coordinator, raw.trim()) {
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("[Shutdown] stdin closed");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "failed to read command");
                        break;
                    }
                }
            }
        }
    }
}

/// Returns `false` to signal the shell should stop reading further commands.
fn handle_command(coordinator: &Coordinator, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("add") => match parts.next() {
            Some(symbol) => coordinator.add_symbol(Symbol::from(symbol)),
            None => println!("usage: add <symbol>"),
        },
        Some("remove") => match parts.next() {
            Some(symbol) => coordinator.remove_symbol(&Symbol::from(symbol)),
            None => println!("usage: remove <symbol>"),
        },
        Some("list") => {
            let symbols = coordinator.active_symbols();
            println!("{} active symbol(s):", symbols.len());
            for symbol in symbols {
                println!("  {symbol}");
            }
        }
        Some("status") => {
            let snapshot = coordinator.metrics().snapshot();
            println!(
                "processed={} deduplicated={} dropped={} parse_errors={} reconnects={} circuit_trips={}",
                snapshot.messages_processed,
                snapshot.messages_deduplicated,
                snapshot.messages_dropped,
                snapshot.parse_errors,
                snapshot.reconnects,
                snapshot.circuit_trips,
            );
        }
        Some("snapshot") => match parts.next() {
            Some(symbol) => {
                let depth = parts.next().and_then(|d| d.parse().ok()).unwrap_or(10);
                println!("{}", coordinator.snapshot(&Symbol::from(symbol), depth));
            }
            None => println!("usage: snapshot <symbol> [depth]"),
        },
        Some("exit") | Some("quit") => return false,
        Some(other) => println!("unrecognized command: {other}"),
        None => {}
    }
    true
}
