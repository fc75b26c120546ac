//! Plain HTTP submission of bundle-only transactions to a Jito block engine.
//!
//! No gRPC searcher stream here: a signed transaction is base64-encoded and
//! POSTed as a standard JSON-RPC `sendTransaction` call with `bundleOnly=true`,
//! matching the block-engine's public HTTP endpoint.

use anyhow::{anyhow, Result};
use base64::Engine;
use serde_json::json;
use solana_sdk::{pubkey::Pubkey, pubkey, transaction::Transaction};

/// Jito tip account transactions pay into when `jito_tip >= 1000` lamports.
pub const TIP_ACCOUNT: Pubkey = pubkey!("96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5");

pub struct JitoClient {
    http: reqwest::Client,
    send_tx_url: String,
}

impl JitoClient {
    pub fn new(block_engine_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            send_tx_url: block_engine_url,
        }
    }

    /// Submits `tx` as a bundle-only transaction. Returns the base58
    /// signature string the block engine echoes back.
    pub async fn send_bundle(&self, tx: &Transaction) -> Result<String> {
        let raw = bincode::serialize(tx)?;
        let b64 = base64::engine::general_purpose::STANDARD.encode(raw);

        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "sendTransaction",
            "params": [b64, {"encoding": "base64"}],
        });

        let resp = self
            .http
            .post(format!("{}?bundleOnly=true", self.send_tx_url))
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Jito returned HTTP {status}: {body}"));
        }

        let body: serde_json::Value = resp.json().await?;
        if let Some(error) = body.get("error") {
            return Err(anyhow!("Jito RPC error: {error}"));
        }
        body.get("result")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("Jito response missing `result`: {body}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tip_account_matches_known_address() {
        assert_eq!(
            TIP_ACCOUNT.to_string(),
            "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5"
        );
    }
}
