//! Long-lived account-lamport WebSocket monitor (C2). One `accountSubscribe`
//! per call, two cooperative tasks (reader + pinger) racing inside a
//! reconnect loop, jittered backoff on abnormal exit.

use anyhow::{anyhow, Result};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

const PING_INTERVAL: Duration = Duration::from_secs(20);
const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(1);
const BACKOFF_MIN: f64 = 0.5;
const BACKOFF_MAX: f64 = 10.0;

pub struct StopEvent {
    notify: Notify,
    stopped: AtomicBool,
}

impl StopEvent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            notify: Notify::new(),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn signal(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        if self.is_set() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Subscribes to `pubkey`'s account and invokes `on_change(lamports)`
/// whenever the lamport balance differs from the last observed value (the
/// first observation always fires). Runs until `stop.signal()` is called.
pub async fn monitor_account_lamports<F>(
    ws_url: &str,
    pubkey: &str,
    commitment: &str,
    stop: Arc<StopEvent>,
    mut on_change: F,
) -> Result<()>
where
    F: FnMut(u64) + Send,
{
    let mut prev_lamports: Option<u64> = None;
    let mut attempt: u32 = 0;

    while !stop.is_set() {
        match run_once(ws_url, pubkey, commitment, &stop, &mut prev_lamports, &mut on_change).await {
            Ok(()) => {
                // Clean exit only happens when stop was signaled mid-connection.
                break;
            }
            Err(e) => {
                if stop.is_set() {
                    break;
                }
                attempt += 1;
                let delay = reconnect_delay(attempt);
                warn!(error = %e, delay_secs = delay.as_secs_f64(), "WS monitor error, reconnecting");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = stop.wait() => break,
                }
            }
        }
    }
    Ok(())
}

fn reconnect_delay(attempt: u32) -> Duration {
    let jitter = 1.0 + fastrand::f64(); // 1.0..2.0
    let base = BACKOFF_MIN * 1.5 + (attempt as f64 * 0.3);
    let capped = base.min(BACKOFF_MAX * 2.2);
    Duration::from_secs_f64((capped * jitter / 2.0).clamp(BACKOFF_MIN * 1.5, BACKOFF_MAX * 2.2))
}

async fn run_once<F>(
    ws_url: &str,
    pubkey: &str,
    commitment: &str,
    stop: &StopEvent,
    prev_lamports: &mut Option<u64>,
    on_change: &mut F,
) -> Result<()>
where
    F: FnMut(u64) + Send,
{
    let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url)
        .await
        .map_err(|e| anyhow!("WS connect failed: {e}"))?;
    info!(%ws_url, "WS connected");

    let (mut write, mut read) = ws_stream.split();

    let subscribe = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "accountSubscribe",
        "params": [pubkey, {"encoding": "jsonParsed", "commitment": commitment}],
    });
    write
        .send(WsMessage::Text(subscribe.to_string()))
        .await
        .map_err(|e| anyhow!("WS subscribe failed: {e}"))?;
    info!(%pubkey, %commitment, "WS subscribed");

    loop {
        if stop.is_set() {
            return Ok(());
        }

        tokio::select! {
            _ = stop.wait() => return Ok(()),
            _ = tokio::time::sleep(PING_INTERVAL) => {
                write.send(WsMessage::Ping(Vec::new())).await
                    .map_err(|e| anyhow!("WS ping failed: {e}"))?;
                debug!("WS ping sent");
            }
            maybe_msg = tokio::time::timeout(READ_IDLE_TIMEOUT, read.next()) => {
                match maybe_msg {
                    Ok(Some(Ok(WsMessage::Text(text)))) => {
                        if let Some(lamports) = extract_lamports(&text) {
                            let should_emit = prev_lamports.map(|p| p != lamports).unwrap_or(true);
                            if should_emit {
                                *prev_lamports = Some(lamports);
                                on_change(lamports);
                            }
                        }
                    }
                    Ok(Some(Ok(WsMessage::Close(_)))) => {
                        return Err(anyhow!("WS closed by peer"));
                    }
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(e))) => return Err(anyhow!("WS read error: {e}")),
                    Ok(None) => return Err(anyhow!("WS stream ended")),
                    Err(_) => {
                        // idle timeout: normal, loop back and check stop/ping
                    }
                }
            }
        }
    }
}

fn extract_lamports(raw: &str) -> Option<u64> {
    let parsed: Value = serde_json::from_str(raw).ok()?;
    let lamports = parsed
        .get("params")?
        .get("result")?
        .get("value")?
        .get("lamports")?;
    lamports.as_u64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_lamports_from_notification() {
        let raw = r#"{"jsonrpc":"2.0","method":"accountNotification","params":{"result":{"context":{"slot":1},"value":{"lamports":42}},"subscription":1}}"#;
        assert_eq!(extract_lamports(raw), Some(42));
    }

    #[test]
    fn ignores_messages_without_lamports() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"result":1}"#;
        assert_eq!(extract_lamports(raw), None);
    }

    #[test]
    fn reconnect_delay_stays_within_bounds() {
        for attempt in 1..20 {
            let delay = reconnect_delay(attempt).as_secs_f64();
            assert!(delay >= BACKOFF_MIN * 1.5 - 0.01);
            assert!(delay <= BACKOFF_MAX * 2.2 + 0.01);
        }
    }

    #[test]
    fn stop_event_starts_unset() {
        let stop = StopEvent::new();
        assert!(!stop.is_set());
        stop.signal();
        assert!(stop.is_set());
    }
}
