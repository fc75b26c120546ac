//! Outer agent loop (C7): picks the next contract address, draws
//! per-cycle amounts, runs one cycle through the orchestrator, and
//! decides how to continue depending on the configured mode.
//!
//! Grounded on `orchestrate()`'s top-level driving shape, generalized from
//! a single operator prompt into a manual-queue-or-auto-provider choice
//! the way the bot's surrounding CLI layer actually dispatches cycles.

use solana_sdk::pubkey::Pubkey;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::{CycleConfig, Mode};
use crate::errors::AppError;
use crate::orchestrator::{CycleOrchestrator, CycleState};
use crate::ws_monitor::StopEvent;

/// Returns the next CA in manual mode, or `None` ("sleep and retry") in
/// auto mode. Boxed so callers can hand in a queue receiver, an HTTP
/// poller, or anything else shaped like this contract.
pub type CaProvider = Box<dyn FnMut() -> Pin<Box<dyn Future<Output = Option<String>> + Send>> + Send>;

/// Human-facing progress/error sinks. Must never be allowed to fail the
/// calling cycle — the loop swallows their errors.
pub type StatusSink = Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Wraps a `tokio::sync::mpsc::Receiver<String>` as a manual-mode
/// [`CaProvider`] that blocks until the operator enqueues a CA.
pub fn manual_queue_provider(rx: mpsc::Receiver<String>) -> CaProvider {
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    Box::new(move || {
        let rx = rx.clone();
        Box::pin(async move { rx.lock().await.recv().await })
            as Pin<Box<dyn Future<Output = Option<String>> + Send>>
    })
}

pub struct AgentLoop {
    orchestrator: Arc<CycleOrchestrator>,
    on_status: StatusSink,
    on_alert: StatusSink,
}

pub struct RunStats {
    pub cycles_run: u64,
    pub cycles_profitable: u64,
    pub cycles_timed_out: u64,
    pub total_sol_withdrawn: f64,
}

impl AgentLoop {
    pub fn new(orchestrator: Arc<CycleOrchestrator>, on_status: StatusSink, on_alert: StatusSink) -> Self {
        Self { orchestrator, on_status, on_alert }
    }

    async fn status(&self, text: impl Into<String>) {
        (self.on_status)(text.into()).await;
    }

    async fn alert(&self, text: impl Into<String>) {
        (self.on_alert)(text.into()).await;
    }

    /// Runs cycles until `stop` is signaled, draining manual CAs or
    /// polling the auto provider between runs per `cycle.mode`.
    pub async fn run(&self, cycle: &CycleConfig, mut ca_provider: CaProvider, stop: Arc<StopEvent>) -> RunStats {
        let mut stats = RunStats {
            cycles_run: 0,
            cycles_profitable: 0,
            cycles_timed_out: 0,
            total_sol_withdrawn: 0.0,
        };

        while !stop.is_set() {
            let ca = match ca_provider().await {
                Some(ca) => ca,
                None => {
                    if cycle.mode == Mode::Auto {
                        tokio::time::sleep(cycle.auto_sleep).await;
                        continue;
                    }
                    // Manual providers are expected to block; a `None`
                    // here means the channel closed — stop the loop.
                    break;
                }
            };

            let source_mint: Pubkey = match ca.trim().parse() {
                Ok(p) => p,
                Err(_) => {
                    self.alert(format!("rejected CA {ca:?}: not a valid base58 pubkey")).await;
                    continue;
                }
            };
            self.status(format!("CA accepted: {source_mint}")).await;

            let token_amount_ui = *pick(&cycle.token_amount_choices);
            let wsol_amount_sol = *pick(&cycle.wsol_amount_choices);

            let report = self
                .orchestrator
                .run_cycle(
                    &source_mint,
                    token_amount_ui,
                    wsol_amount_sol,
                    cycle.profit_threshold_sol,
                    cycle.cycle_timeout,
                    stop.clone(),
                )
                .await;

            stats.cycles_run += 1;
            match report {
                Ok(r) => {
                    if let Some(tx) = &r.tx_withdraw {
                        stats.total_sol_withdrawn += wsol_amount_sol + r.pnl_sol;
                        self.status(format!("withdraw executed: {tx}")).await;
                    }
                    if r.trigger == Some(crate::orchestrator::Trigger::Timeout) {
                        stats.cycles_timed_out += 1;
                    }
                    if r.trigger == Some(crate::orchestrator::Trigger::Profit) {
                        stats.cycles_profitable += 1;
                    }
                    if r.state == CycleState::Aborted {
                        self.alert(format!("cycle for {source_mint} ended aborted (trigger={:?})", r.trigger)).await;
                    }
                }
                Err(e) => {
                    // A cancelled cycle is a clean teardown the operator already
                    // requested, not a failure worth alerting on.
                    let cancelled = e.downcast_ref::<AppError>().is_some_and(AppError::is_cancelled);
                    if cancelled {
                        info!(mint = %source_mint, "cycle cancelled");
                    } else {
                        error!(mint = %source_mint, error = %e, "cycle failed");
                        self.alert(format!("cycle for {source_mint} failed: {e:#}")).await;
                    }
                }
            }

            if cycle.mode == Mode::Auto {
                tokio::time::sleep(cycle.auto_sleep).await;
            }
        }

        info!(
            cycles_run = stats.cycles_run,
            cycles_profitable = stats.cycles_profitable,
            cycles_timed_out = stats.cycles_timed_out,
            total_sol_withdrawn = stats.total_sol_withdrawn,
            "agent loop stopped"
        );
        stats
    }
}

fn pick<T>(choices: &[T]) -> &T {
    let idx = fastrand::usize(..choices.len());
    &choices[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_stays_within_bounds() {
        let choices = vec![1u64, 2, 3];
        for _ in 0..50 {
            assert!(choices.contains(pick(&choices)));
        }
    }

    #[tokio::test]
    async fn manual_provider_yields_enqueued_ca() {
        let (tx, rx) = mpsc::channel(4);
        let mut provider = manual_queue_provider(rx);
        tx.send("4k3Dyjzvzp8eMZWUXbBCjEvwSkkk59S5iCNLY3QrkX6R".to_string()).await.unwrap();
        let ca = provider().await;
        assert_eq!(ca.as_deref(), Some("4k3Dyjzvzp8eMZWUXbBCjEvwSkkk59S5iCNLY3QrkX6R"));
    }

    #[tokio::test]
    async fn manual_provider_returns_none_once_channel_closes() {
        let (tx, rx) = mpsc::channel::<String>(4);
        let mut provider = manual_queue_provider(rx);
        drop(tx);
        assert_eq!(provider().await, None);
    }
}
