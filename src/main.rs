//! Liquidity-cycling bot entry point.
//!
//! Wires configuration, wallet persistence, the rate-limited RPC client,
//! the funds router, the instruction builder, the cycle orchestrator and
//! the outer agent loop together, installs a Ctrl-C handler the agent
//! loop observes only between cycles, and logs final run statistics on
//! exit.

use anyhow::Result;
use solana_sdk::signature::Signer;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};

use bablo_cycle_bot::agent_loop::{self, AgentLoop, CaProvider};
use bablo_cycle_bot::config::{Config, Mode};
use bablo_cycle_bot::orchestrator::CycleOrchestrator;
use bablo_cycle_bot::rpc_client::SolanaRpcClient;
use bablo_cycle_bot::wallet_store::WalletStore;
use bablo_cycle_bot::ws_monitor::StopEvent;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info,bablo_cycle_bot=debug".to_string()),
        )
        .init();

    info!("starting liquidity-cycling bot");

    let config = Config::from_env()?;
    let fund_secret = std::env::var("FUND_PRIVATE_KEY").expect("validated present by Config::from_env");

    let wallets = Arc::new(WalletStore::new(PathBuf::from(&config.wallets_dir), &fund_secret)?);
    info!(fund = %wallets.fund().pubkey(), "fund wallet loaded");

    let rpc = Arc::new(SolanaRpcClient::new(
        config.rpc_http_url.clone(),
        config.jito_block_engine_url.clone(),
        config.rpc_max_calls_per_window,
        config.rpc_window_secs,
        config.circuit_breaker_threshold,
    ));

    let das_rpc_url = config.rpc_http_url.clone();
    let orchestrator = Arc::new(CycleOrchestrator::new(
        rpc.clone(),
        wallets.clone(),
        config.rpc_ws_url.clone(),
        das_rpc_url,
    ));

    let on_status: agent_loop::StatusSink = Arc::new(|text: String| -> Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move { info!(%text, "status") })
    });
    let on_alert: agent_loop::StatusSink = Arc::new(|text: String| -> Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move { error!(%text, "alert") })
    });

    let agent = AgentLoop::new(orchestrator, on_status, on_alert);

    let stop = StopEvent::new();
    let ctrlc_stop = stop.clone();
    let shutdown_handle = tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received, finishing current cycle then stopping");
                ctrlc_stop.signal();
            }
            Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
        }
    });

    let ca_provider = build_ca_provider(config.cycle.mode);

    let stats = agent.run(&config.cycle, ca_provider, stop).await;
    shutdown_handle.abort();

    info!(
        cycles_run = stats.cycles_run,
        cycles_profitable = stats.cycles_profitable,
        cycles_timed_out = stats.cycles_timed_out,
        total_sol_withdrawn = stats.total_sol_withdrawn,
        "final run statistics"
    );

    Ok(())
}

/// Manual mode reads one contract address per line from stdin into the
/// operator queue; auto mode polls `AUTO_CA` on each cycle boundary,
/// leaving real automated discovery to whatever provider an operator
/// plugs in later.
fn build_ca_provider(mode: Mode) -> CaProvider {
    match mode {
        Mode::Manual => {
            let (tx, rx) = mpsc::channel(16);
            tokio::spawn(async move {
                let mut lines = BufReader::new(tokio::io::stdin()).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let ca = line.trim().to_string();
                    if !ca.is_empty() && tx.send(ca).await.is_err() {
                        break;
                    }
                }
            });
            agent_loop::manual_queue_provider(rx)
        }
        Mode::Auto => Box::new(|| {
            Box::pin(async move { std::env::var("AUTO_CA").ok().filter(|s| !s.is_empty()) })
                as Pin<Box<dyn std::future::Future<Output = Option<String>> + Send>>
        }),
    }
}
