//! Cycle orchestrator (C6): the per-launch state machine that clones a
//! token, opens a pool against it, waits for either a profit threshold or
//! a timeout, then pulls the liquidity back out exactly once.
//!
//! The race between the timeout and the profit poll, and the run-once
//! guard around the withdraw, mirror the asyncio `asyncio.wait` +
//! `OneShot` shape the cycle was modeled on: two independent tasks race,
//! the first to finish decides the trigger, and a mutex-guarded flag makes
//! sure the withdraw fires at most once no matter how many triggers land.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    system_instruction,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

use crate::constants::{
    launch_cost_sol, sol_to_lamports, AMM_CONFIG_INDEX, AUTHORITY_TYPE_FREEZE_ACCOUNT,
    AUTHORITY_TYPE_MINT_TOKENS, CREATE_MINT_ACCOUNT_LAMPORTS, CREATE_MINT_ACCOUNT_SPACE,
    LAUNCH_COST_LAMPORTS, MILLION, SOL_WRAPPED_MINT, TOKEN_DECIMALS, TRANSFER_FEE_BPS,
};
use crate::errors::AppError;
use crate::instructions::{self, InitializePoolAccounts, WithdrawAccounts};
use crate::pda::PoolDescriptor;
use crate::rpc_client::SolanaRpcClient;
use crate::wallet_store::WalletStore;
use crate::ws_monitor::{self, StopEvent};

/// Maximum a Token-2022 transfer can be charged in a single hop, regardless
/// of `TRANSFER_FEE_BPS`. Mirrors the platform-wide cap the original
/// transfer-fee config used.
const MAX_TRANSFER_FEE: u64 = 10_000_000_000;

/// Draws one of `blueprint`'s tokens from Helius's `getAsset` DAS endpoint,
/// then follows `content.json_uri` to pick up `name`/`symbol`.
pub struct TokenBlueprint {
    pub name: String,
    pub symbol: String,
    pub uri: String,
}

#[derive(Deserialize)]
struct DasAssetResponse {
    result: Option<DasAssetResult>,
}

#[derive(Deserialize)]
struct DasAssetResult {
    content: Option<DasAssetContent>,
}

#[derive(Deserialize)]
struct DasAssetContent {
    json_uri: Option<String>,
    metadata: Option<DasAssetMetadata>,
}

#[derive(Deserialize)]
struct DasAssetMetadata {
    name: Option<String>,
    symbol: Option<String>,
}

/// Fetches `source_mint`'s on-chain metadata via `getAsset`, then follows
/// `json_uri` to pick up the `name`/`symbol` a wallet would display,
/// copying them verbatim onto the blueprint for the new mint.
pub async fn copy_token_contract(das_rpc_url: &str, source_mint: &Pubkey) -> Result<TokenBlueprint> {
    let http = reqwest::Client::new();
    let body = http
        .post(das_rpc_url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "id": "1",
            "method": "getAsset",
            "params": {"id": source_mint.to_string()},
        }))
        .send()
        .await
        .context("getAsset request failed")?
        .json::<DasAssetResponse>()
        .await
        .context("getAsset response was not valid JSON")?;

    let content = body
        .result
        .and_then(|r| r.content)
        .ok_or_else(|| anyhow::anyhow!("getAsset returned no content for {source_mint}"))?;
    let json_uri = content
        .json_uri
        .ok_or_else(|| anyhow::anyhow!("json_uri missing from asset content"))?;

    // Prefer DAS's inline metadata if present; otherwise follow json_uri.
    if let Some(meta) = content.metadata {
        if let (Some(name), Some(symbol)) = (meta.name, meta.symbol) {
            return Ok(TokenBlueprint { name, symbol, uri: json_uri });
        }
    }

    let offchain: serde_json::Value = http
        .get(&json_uri)
        .send()
        .await
        .context("fetching json_uri failed")?
        .json()
        .await
        .context("json_uri body was not valid JSON")?;
    let name = offchain
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let symbol = offchain
        .get("symbol")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    Ok(TokenBlueprint { name, symbol, uri: json_uri })
}

/// Ensures an at-most-once run of a fallible async action, no matter how
/// many callers race to invoke it.
struct OneShot {
    done: Mutex<bool>,
}

impl OneShot {
    fn new() -> Self {
        Self { done: Mutex::new(false) }
    }

    /// Runs `action` the first time this is called; every subsequent call
    /// (even one racing concurrently) returns `Ok(None)` without running it.
    async fn run_once<F, Fut, T>(&self, action: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut guard = self.done.lock().await;
        if *guard {
            return Ok(None);
        }
        *guard = true;
        drop(guard);
        action().await.map(Some)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Prepared,
    MintCreated,
    PoolInitialized,
    Monitoring,
    Withdrawing,
    Done,
    Aborted,
}

/// What ended the monitoring race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Timeout,
    Profit,
    Stop,
}

pub struct CycleReport {
    pub state: CycleState,
    pub trigger: Option<Trigger>,
    pub pnl_sol: f64,
    pub mint: Option<Pubkey>,
    pub pool: Option<Pubkey>,
    pub tx_mint: Option<String>,
    pub tx_pool: Option<String>,
    pub tx_withdraw: Option<String>,
}

pub struct CycleOrchestrator {
    rpc: Arc<SolanaRpcClient>,
    wallets: Arc<WalletStore>,
    ws_url: String,
    das_rpc_url: String,
}

impl CycleOrchestrator {
    pub fn new(rpc: Arc<SolanaRpcClient>, wallets: Arc<WalletStore>, ws_url: String, das_rpc_url: String) -> Self {
        Self { rpc, wallets, ws_url, das_rpc_url }
    }

    /// Runs exactly one cycle for `source_mint` with the given per-cycle
    /// parameters, holding the dev wallet pinned for its whole duration. The
    /// dev wallet itself is immutable across cycles — it is created once at
    /// agent start and only ever rotated by an explicit operator-triggered
    /// `rollover_dev` call, never from here.
    pub async fn run_cycle(
        &self,
        source_mint: &Pubkey,
        token_amount_ui: u64,
        wsol_amount_sol: f64,
        profit_threshold_sol: f64,
        cycle_timeout: Duration,
        stop: Arc<StopEvent>,
    ) -> Result<CycleReport> {
        if stop.is_set() {
            return Err(AppError::Cancelled.into());
        }

        let guard = self.wallets.dev_cycle().await;
        let dev = &*guard;

        let mut report = CycleReport {
            state: CycleState::Idle,
            trigger: None,
            pnl_sol: 0.0,
            mint: None,
            pool: None,
            tx_mint: None,
            tx_pool: None,
            tx_withdraw: None,
        };

        // --- Prepared ---
        let blueprint = copy_token_contract(&self.das_rpc_url, source_mint).await?;
        info!(name = %blueprint.name, symbol = %blueprint.symbol, "token contract copied");
        let mint_keypair = Keypair::new();
        let token_amount_base = token_amount_ui
            .checked_mul(MILLION)
            .and_then(|v| v.checked_mul(10u64.pow(TOKEN_DECIMALS as u32)))
            .context("token amount overflowed base units")?;
        let wsol_lamports = sol_to_lamports(wsol_amount_sol);
        report.state = CycleState::Prepared;

        // --- Funding check ---
        let required = wsol_lamports + LAUNCH_COST_LAMPORTS;
        let dev_balance = self.rpc.get_balance(&dev.pubkey()).await?;
        if dev_balance < required {
            let shortfall_sol = (required - dev_balance) as f64 / crate::constants::LAMPORTS_PER_SOL as f64;
            info!(shortfall_sol, "topping up dev wallet before mint creation");
            self.wallets
                .distribute_lamports_unlocked(&self.rpc, dev, shortfall_sol)
                .await
                .context("funding dev wallet failed")?;
        }

        // --- MintCreated ---
        let mint_tx = match self
            .build_mint_creation(dev, &mint_keypair, &blueprint, token_amount_base)
            .await
        {
            Ok(tx) => tx,
            Err(e) => {
                report.state = CycleState::Aborted;
                return Err(e.context("mint creation failed"));
            }
        };
        report.state = CycleState::MintCreated;
        report.mint = Some(mint_keypair.pubkey());
        report.tx_mint = Some(mint_tx);
        info!(mint = %mint_keypair.pubkey(), "mint created");

        // --- PoolInitialized ---
        let (pool, pool_tx) = match self
            .initialize_pool(dev, &mint_keypair.pubkey(), token_amount_base, wsol_lamports)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                report.state = CycleState::Aborted;
                return Err(e.context("pool initialization failed"));
            }
        };
        report.state = CycleState::PoolInitialized;
        report.pool = Some(pool.pool_state);
        report.tx_pool = Some(pool_tx);
        info!(pool = %pool.pool_state, "pool initialized");

        // --- Monitoring ---
        report.state = CycleState::Monitoring;
        let sol_vault = pool.vault_for(&SOL_WRAPPED_MINT).unwrap_or(pool.token0_vault);
        let initial_sol = wsol_lamports as f64 / crate::constants::LAMPORTS_PER_SOL as f64;
        let launch_cost = launch_cost_sol();

        let (trigger, pnl_sol) = self
            .race_timeout_and_profit(&sol_vault, initial_sol, launch_cost, profit_threshold_sol, cycle_timeout, stop.clone())
            .await?;
        report.trigger = Some(trigger);
        report.pnl_sol = pnl_sol;
        if trigger == Trigger::Stop {
            report.state = CycleState::Aborted;
        }

        // --- Withdrawing (exactly once) ---
        if report.state != CycleState::Aborted {
            report.state = CycleState::Withdrawing;
        }
        let once = OneShot::new();
        let withdraw_result = once
            .run_once(|| self.withdraw(dev, &pool))
            .await?;

        match withdraw_result {
            Some(sig) => {
                report.tx_withdraw = Some(sig);
                if trigger != Trigger::Stop {
                    report.state = CycleState::Done;
                }
                info!(mint = %mint_keypair.pubkey(), pool = %pool.pool_state, "withdraw executed");
            }
            None => {
                report.state = CycleState::Aborted;
            }
        }

        Ok(report)
    }

    /// Races a fixed-duration timer against a profit poller on the pool's
    /// SOL-side vault, returning whichever fired first. `cycle_timeout ==
    /// Duration::ZERO` disables the timer path entirely, so only profit or
    /// an external stop can end the cycle.
    async fn race_timeout_and_profit(
        &self,
        sol_vault: &Pubkey,
        initial_sol: f64,
        launch_cost: f64,
        profit_threshold_sol: f64,
        cycle_timeout: Duration,
        stop: Arc<StopEvent>,
    ) -> Result<(Trigger, f64)> {
        let ws_stop = StopEvent::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<f64>();
        let sol_vault = *sol_vault;
        let ws_url = self.ws_url.clone();
        let monitor_stop = ws_stop.clone();
        let monitor_handle = tokio::spawn(async move {
            let _ = ws_monitor::monitor_account_lamports(&ws_url, &sol_vault.to_string(), "processed", monitor_stop, move |lamports| {
                let current_sol = lamports as f64 / crate::constants::LAMPORTS_PER_SOL as f64;
                let pnl = current_sol - initial_sol - launch_cost;
                let _ = tx.send(pnl);
            })
            .await;
        });

        let profit_poll = async {
            while let Some(pnl) = rx.recv().await {
                if pnl >= profit_threshold_sol {
                    return (Trigger::Profit, pnl);
                }
            }
            // Channel closed without ever crossing the threshold: block
            // forever on this branch, letting the other two win the race.
            std::future::pending::<(Trigger, f64)>().await
        };

        let timeout_fut = async {
            if cycle_timeout.is_zero() {
                std::future::pending::<()>().await;
            } else {
                tokio::time::sleep(cycle_timeout).await;
            }
        };

        let result = tokio::select! {
            biased;
            _ = stop.wait() => (Trigger::Stop, 0.0),
            _ = timeout_fut => (Trigger::Timeout, 0.0),
            (trigger, pnl) = profit_poll => (trigger, pnl),
        };

        ws_stop.signal();
        monitor_handle.abort();
        let _ = monitor_handle.await;

        Ok(result)
    }

    /// Builds and sends the single atomic mint-creation transaction: account
    /// allocation, both Token-2022 extensions, the mint itself, metadata,
    /// dev's ATA, the full mint-to, then revoking both authorities.
    async fn build_mint_creation(
        &self,
        dev: &Keypair,
        mint_keypair: &Keypair,
        blueprint: &TokenBlueprint,
        token_amount_base: u64,
    ) -> Result<String> {
        let mint = mint_keypair.pubkey();
        let program_id = spl_token_2022::id();

        let create_account_ix = system_instruction::create_account(
            &dev.pubkey(),
            &mint,
            CREATE_MINT_ACCOUNT_LAMPORTS,
            CREATE_MINT_ACCOUNT_SPACE,
            &program_id,
        );
        let transfer_fee_ix =
            instructions::initialize_transfer_fee_config(&mint, &dev.pubkey(), TRANSFER_FEE_BPS, MAX_TRANSFER_FEE);
        let metadata_pointer_ix = instructions::initialize_metadata_pointer(&mint, Some(&dev.pubkey()), Some(&mint));
        let initialize_mint_ix =
            instructions::initialize_mint(&mint, &dev.pubkey(), Some(&dev.pubkey()), TOKEN_DECIMALS);
        let metadata_ix = instructions::initialize_token_metadata(
            &mint,
            &dev.pubkey(),
            &mint,
            &dev.pubkey(),
            &blueprint.name,
            &blueprint.symbol,
            &blueprint.uri,
        );

        let dev_ata =
            spl_associated_token_account::get_associated_token_address_with_program_id(&dev.pubkey(), &mint, &program_id);
        let create_ata_ix = spl_associated_token_account::instruction::create_associated_token_account_idempotent(
            &dev.pubkey(),
            &dev.pubkey(),
            &mint,
            &program_id,
        );
        let mint_to_ix =
            spl_token_2022::instruction::mint_to(&program_id, &mint, &dev_ata, &dev.pubkey(), &[], token_amount_base)?;
        let revoke_mint_ix = instructions::set_authority(
            &mint,
            &dev.pubkey(),
            AUTHORITY_TYPE_MINT_TOKENS,
            None,
            &program_id,
        );
        let revoke_freeze_ix = instructions::set_authority(
            &mint,
            &dev.pubkey(),
            AUTHORITY_TYPE_FREEZE_ACCOUNT,
            None,
            &program_id,
        );

        let (signature, _) = self
            .rpc
            .build_and_send(
                vec![
                    create_account_ix,
                    transfer_fee_ix,
                    metadata_pointer_ix,
                    initialize_mint_ix,
                    metadata_ix,
                    create_ata_ix,
                    mint_to_ix,
                    revoke_mint_ix,
                    revoke_freeze_ix,
                ],
                dev,
                &[mint_keypair],
                None,
                None,
                0,
                5,
                10,
                "mint creation",
            )
            .await
            .context("mint creation transaction failed")?;

        Ok(signature.to_string())
    }

    /// Builds and sends the pool-initialization transaction: wraps
    /// `wsol_lamports` into dev's WSOL ATA, then calls the AMM's
    /// `initialize`.
    async fn initialize_pool(
        &self,
        dev: &Keypair,
        mint: &Pubkey,
        token_amount_base: u64,
        wsol_lamports: u64,
    ) -> Result<(PoolDescriptor, String)> {
        let pool = PoolDescriptor::derive(*mint, SOL_WRAPPED_MINT, AMM_CONFIG_INDEX);
        let (amount0, amount1) = if pool.token_mint0 == *mint {
            (token_amount_base, wsol_lamports)
        } else {
            (wsol_lamports, token_amount_base)
        };
        let pool = pool
            .with_lp_amount_expected(amount0, amount1)
            .context("computing expected LP amount failed")?;

        let dev_wsol_ata =
            spl_associated_token_account::get_associated_token_address(&dev.pubkey(), &SOL_WRAPPED_MINT);
        let create_wsol_ata_ix = spl_associated_token_account::instruction::create_associated_token_account_idempotent(
            &dev.pubkey(),
            &dev.pubkey(),
            &SOL_WRAPPED_MINT,
            &spl_token::id(),
        );
        let wrap_sol_ix = system_instruction::transfer(&dev.pubkey(), &dev_wsol_ata, wsol_lamports);
        let sync_native_ix = spl_token::instruction::sync_native(&spl_token::id(), &dev_wsol_ata)?;

        let dev_token_ata = spl_associated_token_account::get_associated_token_address_with_program_id(
            &dev.pubkey(),
            mint,
            &spl_token_2022::id(),
        );
        let dev_lp_ata = spl_associated_token_account::get_associated_token_address(&dev.pubkey(), &pool.lp_mint);
        let create_lp_ata_ix = spl_associated_token_account::instruction::create_associated_token_account_idempotent(
            &dev.pubkey(),
            &dev.pubkey(),
            &pool.lp_mint,
            &spl_token::id(),
        );

        let (creator_token0, creator_token1, token_0_program, token_1_program) = if pool.token_mint0 == *mint {
            (dev_token_ata, dev_wsol_ata, spl_token_2022::id(), spl_token::id())
        } else {
            (dev_wsol_ata, dev_token_ata, spl_token::id(), spl_token_2022::id())
        };

        let open_time = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .context("system clock before unix epoch")?
            .as_secs();

        let init_ix = instructions::initialize_pool(
            &InitializePoolAccounts {
                creator: &dev.pubkey(),
                pool: &pool,
                creator_token0: &creator_token0,
                creator_token1: &creator_token1,
                creator_lp_token: &dev_lp_ata,
                token_0_program: &token_0_program,
                token_1_program: &token_1_program,
            },
            amount0,
            amount1,
            open_time,
        );

        let (signature, _) = self
            .rpc
            .build_and_send(
                vec![create_wsol_ata_ix, wrap_sol_ix, sync_native_ix, create_lp_ata_ix, init_ix],
                dev,
                &[],
                Some(50_000),
                None,
                0,
                5,
                10,
                "pool initialization",
            )
            .await
            .context("pool initialization transaction failed")?;

        Ok((pool, signature.to_string()))
    }

    /// Pulls the pool's liquidity back to the fund wallet: fund's WSOL ATA,
    /// the AMM `withdraw`, then closing the WSOL ATA back into fund's SOL
    /// balance. Fund is fee payer; dev co-signs as the LP token owner.
    async fn withdraw(&self, dev: &Keypair, pool: &PoolDescriptor) -> Result<String> {
        let fund = self.wallets.fund();
        let fund_wsol_ata = spl_associated_token_account::get_associated_token_address(&fund.pubkey(), &SOL_WRAPPED_MINT);
        let create_fund_wsol_ata_ix = spl_associated_token_account::instruction::create_associated_token_account_idempotent(
            &fund.pubkey(),
            &fund.pubkey(),
            &SOL_WRAPPED_MINT,
            &spl_token::id(),
        );

        let dev_lp_ata = spl_associated_token_account::get_associated_token_address(&dev.pubkey(), &pool.lp_mint);
        let lp_amount = self.rpc.token_account_amount(&dev_lp_ata).await.unwrap_or(0);
        let lp_amount = if lp_amount == 0 { pool.lp_amount_expected } else { lp_amount };
        if lp_amount == 0 {
            bail!("no LP tokens available to withdraw for pool {}", pool.pool_state);
        }

        let dev_token0_ata = spl_associated_token_account::get_associated_token_address_with_program_id(
            &dev.pubkey(),
            &pool.token_mint0,
            &spl_token_2022::id(),
        );
        let (token_0_ata, token_1_ata) = if pool.token_mint0 == SOL_WRAPPED_MINT {
            (fund_wsol_ata, dev_token0_ata)
        } else {
            (dev_token0_ata, fund_wsol_ata)
        };

        let withdraw_ix = instructions::withdraw(
            &WithdrawAccounts {
                creator: &fund.pubkey(),
                pool,
                creator_lp_token: &dev_lp_ata,
                token_0_ata: &token_0_ata,
                token_1_ata: &token_1_ata,
            },
            lp_amount,
            0,
            0,
        );
        let close_wsol_ix =
            spl_token::instruction::close_account(&spl_token::id(), &fund_wsol_ata, &fund.pubkey(), &fund.pubkey(), &[])?;

        let (signature, _) = self
            .rpc
            .build_and_send(
                vec![create_fund_wsol_ata_ix, withdraw_ix, close_wsol_ix],
                fund,
                &[dev],
                Some(100_000),
                None,
                0,
                5,
                10,
                "withdraw liquidity",
            )
            .await
            .context("withdraw transaction failed")?;

        Ok(signature.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn one_shot_runs_exactly_once() {
        let once = OneShot::new();
        let first = once.run_once(|| async { Ok::<_, anyhow::Error>(1) }).await.unwrap();
        let second = once.run_once(|| async { Ok::<_, anyhow::Error>(2) }).await.unwrap();
        assert_eq!(first, Some(1));
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn one_shot_survives_a_concurrent_race() {
        let once = Arc::new(OneShot::new());
        let a = once.clone();
        let b = once.clone();
        let (r1, r2) = tokio::join!(
            a.run_once(|| async { Ok::<_, anyhow::Error>("a") }),
            b.run_once(|| async { Ok::<_, anyhow::Error>("b") }),
        );
        let results = [r1.unwrap(), r2.unwrap()];
        let winners: Vec<_> = results.into_iter().flatten().collect();
        assert_eq!(winners.len(), 1);
    }

    #[test]
    fn cycle_state_variants_are_distinct() {
        assert_ne!(CycleState::Idle, CycleState::Done);
        assert_ne!(CycleState::Monitoring, CycleState::Aborted);
    }
}
