//! Rate-limited, backoff-retrying, circuit-breaking RPC submission layer
//! (C1). Wraps the async Solana RPC client so every call — reads and
//! transaction submission alike — passes through the same limiter, the same
//! 429-aware retry loop, and the same consecutive-failure circuit breaker.

use anyhow::{anyhow, Context, Result};
use governor::{Quota, RateLimiter};
use governor::state::{InMemoryState, NotKeyed};
use governor::clock::DefaultClock;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    commitment_config::{CommitmentConfig, CommitmentLevel},
    compute_budget::ComputeBudgetInstruction,
    hash::Hash,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    system_instruction,
    transaction::Transaction,
};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cached_blockhash::{self, SharedCachedBlockhash};
use crate::constants::MAX_TRANSACTION_SIZE;
use crate::errors::AppError;
use crate::jito_client::JitoClient;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Circuit breaker trips after this many *consecutive* failures and stays
/// tripped until a call succeeds.
const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 5;

fn is_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("429")
        || lower.contains("too many requests")
        || lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection")
}

fn is_not_found(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("not found") || lower.contains("accountnotfound")
}

pub struct SolanaRpcClient {
    client: RpcClient,
    commitment: CommitmentConfig,
    limiter: Limiter,
    consecutive_failures: AtomicU32,
    circuit_breaker_threshold: u32,
    blockhash_cache: SharedCachedBlockhash,
    jito: JitoClient,
}

impl SolanaRpcClient {
    pub fn new(
        rpc_http_url: String,
        jito_block_engine_url: String,
        max_calls_per_window: u32,
        window_secs: f64,
        circuit_breaker_threshold: u32,
    ) -> Self {
        let client =
            RpcClient::new_with_commitment(rpc_http_url, CommitmentConfig::processed());

        let burst = NonZeroU32::new(max_calls_per_window.max(1)).unwrap();
        let period = Duration::from_secs_f64((window_secs / max_calls_per_window as f64).max(0.001));
        let limiter = RateLimiter::direct(Quota::with_period(period).unwrap().allow_burst(burst));

        Self {
            client,
            commitment: CommitmentConfig::processed(),
            limiter,
            consecutive_failures: AtomicU32::new(0),
            circuit_breaker_threshold: if circuit_breaker_threshold == 0 {
                DEFAULT_CIRCUIT_BREAKER_THRESHOLD
            } else {
                circuit_breaker_threshold
            },
            blockhash_cache: cached_blockhash::new_shared(),
            jito: JitoClient::new(jito_block_engine_url),
        }
    }

    fn check_circuit_breaker(&self) -> Result<()> {
        let failures = self.consecutive_failures.load(Ordering::Relaxed);
        if failures >= self.circuit_breaker_threshold {
            return Err(AppError::CircuitOpen { consecutive_failures: failures }.into());
        }
        Ok(())
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Runs `op` behind the rate limiter, the circuit breaker, and a
    /// 429-shaped-error retry loop with capped exponential backoff.
    async fn with_retry<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.check_circuit_breaker()?;

        let min_delay = Duration::from_millis(200);
        let max_delay = Duration::from_secs(5);
        let mut delay = min_delay;
        let max_attempts = 5;

        for attempt in 1..=max_attempts {
            self.limiter.until_ready().await;

            match op().await {
                Ok(value) => {
                    self.record_success();
                    return Ok(value);
                }
                Err(e) => {
                    let message = e.to_string();
                    if is_not_found(&message) {
                        // A definitive, permanent answer - not RPC trouble.
                        return Err(e);
                    }
                    if !is_transient(&message) {
                        self.record_failure();
                        return Err(e.context(format!("{label} failed")));
                    }
                    if attempt == max_attempts {
                        self.record_failure();
                        return Err(AppError::Transient(message).into());
                    }
                    warn!(%label, attempt, %message, "transient RPC error, backing off");
                    let jitter = 1.0 + fastrand::f64() * 0.4 - 0.2;
                    tokio::time::sleep(delay.mul_f64(jitter.max(0.1))).await;
                    delay = (delay * 2).min(max_delay);
                }
            }
        }
        unreachable!("loop always returns")
    }

    pub async fn account_info(&self, pubkey: &Pubkey) -> Result<Option<solana_sdk::account::Account>> {
        self.with_retry("get_account", || async {
            match self.client.get_account(pubkey).await {
                Ok(account) => Ok(Some(account)),
                Err(e) if e.to_string().to_lowercase().contains("not found") => Ok(None),
                Err(e) => Err(anyhow!(e)),
            }
        })
        .await
    }

    pub async fn account_exists(&self, pubkey: &Pubkey) -> Result<bool> {
        match self.account_info(pubkey).await? {
            Some(account) => Ok(account.lamports > 0 && !account.data.is_empty()),
            None => Ok(false),
        }
    }

    pub async fn multi_account_lamports(&self, pubkeys: &[Pubkey]) -> Result<Vec<u64>> {
        self.with_retry("get_multiple_accounts", || async {
            let accounts = self
                .client
                .get_multiple_accounts(pubkeys)
                .await
                .map_err(|e| anyhow!(e))?;
            Ok(accounts
                .into_iter()
                .map(|maybe| maybe.map(|a| a.lamports).unwrap_or(0))
                .collect())
        })
        .await
    }

    pub async fn get_balance(&self, pubkey: &Pubkey) -> Result<u64> {
        self.with_retry("get_balance", || async {
            self.client.get_balance(pubkey).await.map_err(|e| anyhow!(e))
        })
        .await
    }

    pub async fn token_account_amount(&self, ata: &Pubkey) -> Result<u64> {
        self.with_retry("get_token_account_balance", || async {
            let balance = self
                .client
                .get_token_account_balance(ata)
                .await
                .map_err(|e| anyhow!(e))?;
            balance.amount.parse::<u64>().context("malformed token amount")
        })
        .await
    }

    /// Pull-based 15 s TTL blockhash cache (§4.1, §3).
    pub async fn latest_blockhash(&self) -> Result<Hash> {
        cached_blockhash::get_blockhash(&self.blockhash_cache, self).await
    }

    /// Direct, uncached fetch used by the cache itself to refresh.
    pub(crate) async fn fetch_latest_blockhash(&self) -> Result<Hash> {
        self.with_retry("get_latest_blockhash", || async {
            self.client
                .get_latest_blockhash_with_commitment(CommitmentConfig {
                    commitment: CommitmentLevel::Processed,
                })
                .await
                .map(|(hash, _)| hash)
                .map_err(|e| anyhow!(e))
        })
        .await
    }

    pub async fn confirm(&self, signature: &Signature, max_retries: u32) -> Result<bool> {
        for _ in 0..max_retries.max(1) {
            self.limiter.until_ready().await;
            let statuses = self
                .client
                .get_signature_statuses(&[*signature])
                .await
                .map_err(|e| anyhow!(e))?;
            if let Some(Some(status)) = statuses.value.first().cloned() {
                if status.confirmations.is_some() || status.confirmation_status.is_some() {
                    return Ok(status.err.is_none());
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Ok(false)
    }

    /// Builds, signs, sends and confirms one atomic transaction per §4.1's
    /// assembly contract. `msg_signer` pays fees and is always the first
    /// signer; `signers` is deduplicated against it, order preserved.
    #[allow(clippy::too_many_arguments)]
    pub async fn build_and_send(
        &self,
        instructions: Vec<Instruction>,
        msg_signer: &Keypair,
        signers: &[&Keypair],
        priority_fee: Option<u64>,
        compute_limit: Option<u32>,
        jito_tip: u64,
        max_retries: u32,
        max_confirm_retries: u32,
        label: &str,
    ) -> Result<(Signature, bool)> {
        let mut all_ixs = Vec::with_capacity(instructions.len() + 3);

        if let Some(limit) = compute_limit {
            all_ixs.push(ComputeBudgetInstruction::set_compute_unit_limit(limit));
        }
        if let Some(fee) = priority_fee {
            all_ixs.push(ComputeBudgetInstruction::set_compute_unit_price(fee));
        }
        if jito_tip >= 1000 {
            all_ixs.push(system_instruction::transfer(
                &msg_signer.pubkey(),
                &crate::jito_client::TIP_ACCOUNT,
                jito_tip,
            ));
        }
        all_ixs.extend(instructions);

        let mut dedup_signers: Vec<&Keypair> = vec![msg_signer];
        for s in signers {
            if s.pubkey() != msg_signer.pubkey()
                && !dedup_signers.iter().any(|x| x.pubkey() == s.pubkey())
            {
                dedup_signers.push(s);
            }
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let blockhash = self.latest_blockhash().await?;

            let mut tx = Transaction::new_with_payer(&all_ixs, Some(&msg_signer.pubkey()));
            tx.sign(&dedup_signers, blockhash);

            let size = bincode::serialize(&tx).map(|b| b.len()).unwrap_or(usize::MAX);
            if size > MAX_TRANSACTION_SIZE {
                return Err(AppError::TransactionTooLarge { size, limit: MAX_TRANSACTION_SIZE }.into());
            }

            let result = if jito_tip >= 1000 {
                self.jito.send_bundle(&tx).await.map(|_| tx.signatures[0])
            } else {
                self.with_retry(label, || async {
                    self.client
                        .send_transaction(&tx)
                        .await
                        .map_err(|e| anyhow!(e))
                })
                .await
            };

            match result {
                Ok(signature) => {
                    let confirmed = self.confirm(&signature, max_confirm_retries).await?;
                    info!(%label, %signature, confirmed, "transaction submitted");
                    return Ok((signature, confirmed));
                }
                Err(e) if attempt >= max_retries.max(1) => {
                    return Err(AppError::Transaction { label: label.to_string(), attempts: attempt, source: e }.into());
                }
                Err(e) => {
                    warn!(%label, attempt, error = %e, "send failed, retrying");
                    tokio::time::sleep(Duration::from_secs_f64(0.5_f64.powi(attempt as i32))).await;
                }
            }
        }
    }

    pub fn commitment(&self) -> CommitmentConfig {
        self.commitment
    }
}

pub type SharedRpcClient = Arc<SolanaRpcClient>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transient_errors() {
        assert!(is_transient("HTTP error: 429 Too Many Requests"));
        assert!(is_transient("connection reset by peer"));
        assert!(!is_transient("AccountNotFound"));
    }

    #[test]
    fn classifies_not_found() {
        assert!(is_not_found("Error: AccountNotFound: pubkey could not be found"));
        assert!(!is_not_found("429 Too Many Requests"));
    }

    #[test]
    fn rpc_client_construction() {
        let client = SolanaRpcClient::new(
            "https://api.mainnet-beta.solana.com".to_string(),
            "https://mainnet.block-engine.jito.wtf/api/v1/transactions".to_string(),
            50,
            1.0,
            5,
        );
        assert_eq!(client.consecutive_failures.load(Ordering::Relaxed), 0);
    }
}
