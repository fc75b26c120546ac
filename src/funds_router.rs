//! Fund movement planning and execution (C4): the gross/net hop planner
//! that keeps a transfer-fee-aware chain continuous, the 4-hop
//! fund-to-destination obfuscation transfer, the Token-2022 supply-hide
//! burn planner, and the withheld-fee sweep.

use anyhow::{bail, Context, Result};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    system_instruction,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::constants::{LAMPORTS_PER_SOL, TOKEN_DECIMALS};
use crate::instructions;
use crate::rpc_client::SolanaRpcClient;
use crate::wallet_store::{self, WalletStore};

/// Standard network fee reserved per hop so an intermediate wallet always
/// has enough left to pay for its own outgoing transfer.
pub const HOP_FEE_RESERVE_LAMPORTS: u64 = 5_000;

const MAX_HOPS_GUARD: usize = 100;

/// Builds the list of gross amounts to send at each hop so that, after the
/// basis-point fee at every hop, the final net lands at or below
/// `target_net`. `gross[i+1]` always equals `net(gross[i])`.
pub fn plan_hops(
    target_net: u64,
    fee_bps: u32,
    max_gross: u64,
    max_fee: u64,
) -> Result<Vec<u64>> {
    if fee_bps > 100_000 {
        bail!("fee_bps out of range: {fee_bps}");
    }
    if target_net == 0 || max_gross == 0 {
        return Ok(Vec::new());
    }

    if fee_bps == 0 {
        let g = max_gross.min(target_net);
        return Ok(if g > 0 { vec![g] } else { Vec::new() });
    }

    let fee_of = |g: u64| -> u64 {
        let f = (g as u128 * fee_bps as u128 / 10_000) as u64;
        if max_fee == 0 || f <= max_fee {
            f
        } else {
            max_fee
        }
    };

    let mut gross_list = Vec::new();
    let mut g = max_gross;
    let mut hop = 0;

    while g > 0 && hop < MAX_HOPS_GUARD {
        hop += 1;
        gross_list.push(g);
        let net = g.saturating_sub(fee_of(g));
        if net <= target_net || net == 0 {
            break;
        }
        g = net;
    }

    if hop >= MAX_HOPS_GUARD {
        bail!("too many hops while planning (guard of {MAX_HOPS_GUARD} exceeded)");
    }

    for i in 0..gross_list.len().saturating_sub(1) {
        let expected_next = gross_list[i] - fee_of(gross_list[i]);
        if gross_list[i + 1] != expected_next {
            bail!(
                "chain continuity violated at hop {}: expected next gross {expected_next}, got {}",
                i + 1,
                gross_list[i + 1]
            );
        }
    }

    Ok(gross_list)
}

pub struct HopResult {
    pub destination: Pubkey,
    pub path: Vec<Pubkey>,
    pub signatures: Vec<String>,
}

/// Routes `amount_sol` to `destination` through three disposable
/// intermediate wallets (fund -> tmp1 -> tmp2 -> tmp3 -> destination),
/// adding `HOP_FEE_RESERVE_LAMPORTS` per remaining downstream hop so every
/// intermediate wallet can cover its own outgoing fee.
pub async fn distribute_via_chain(
    rpc: &SolanaRpcClient,
    wallets: &WalletStore,
    destination: Pubkey,
    amount_sol: f64,
) -> Result<HopResult> {
    let base_amount = (amount_sol * LAMPORTS_PER_SOL as f64) as u64;
    let fund = wallets.fund().insecure_clone();

    let tmp_wallets: Vec<Keypair> = (0..3)
        .map(|_| wallet_store::create_wallet(wallets.wallets_dir()))
        .collect::<Result<_>>()?;

    let hop_senders = [&fund, &tmp_wallets[0], &tmp_wallets[1], &tmp_wallets[2]];
    let hop_receivers = [
        tmp_wallets[0].pubkey(),
        tmp_wallets[1].pubkey(),
        tmp_wallets[2].pubkey(),
        destination,
    ];

    let total_hops = hop_senders.len() as u64;
    let mut signatures = Vec::with_capacity(hop_senders.len());

    for (i, (sender, receiver)) in hop_senders.iter().zip(hop_receivers.iter()).enumerate() {
        let downstream = total_hops - i as u64 - 1;
        let lamports = base_amount + downstream * HOP_FEE_RESERVE_LAMPORTS;
        let ix = system_instruction::transfer(&sender.pubkey(), receiver, lamports);

        let (signature, confirmed) = rpc
            .build_and_send(
                vec![ix],
                sender,
                &[],
                None,
                None,
                0,
                5,
                10,
                "chain hop transfer",
            )
            .await
            .with_context(|| format!("chain hop {} failed", i + 1))?;

        info!(
            hop = i + 1,
            from = %sender.pubkey(),
            to = %receiver,
            lamports,
            confirmed,
            "chain hop sent"
        );
        signatures.push(signature.to_string());
    }

    for tmp in &tmp_wallets {
        wallet_store::archive_wallet(wallets.wallets_dir(), &tmp.pubkey()).ok();
    }

    Ok(HopResult {
        destination,
        path: tmp_wallets.iter().map(|w| w.pubkey()).collect(),
        signatures,
    })
}

pub struct HideSupplyReport {
    pub hops_count: usize,
    pub last_net: u64,
    pub target: u64,
    pub burn_delta: u64,
    pub signatures: Vec<String>,
}

/// Moves most of a freshly minted supply through disposable wallets (each
/// hop pays the mint's transfer fee) until only `target_supply` (in base
/// units) remains attributable to the dev wallet, then burns any
/// remainder down to that target.
///
/// Out of scope: sweeping the dust left behind in spent ephemeral wallets —
/// those wallets are archived, not reconciled.
pub async fn hide_supply(
    rpc: &SolanaRpcClient,
    wallets: &WalletStore,
    dev: &Keypair,
    mint: &Pubkey,
    supply_base_units: u64,
    target_supply_base_units: u64,
    fee_bps: u32,
    max_fee: u64,
) -> Result<HideSupplyReport> {
    if target_supply_base_units == 0 || target_supply_base_units > supply_base_units {
        bail!("target supply out of range");
    }

    let hops = plan_hops(target_supply_base_units, fee_bps, supply_base_units, max_fee)?;
    if hops.is_empty() {
        bail!("planning failed: empty hop list");
    }

    let program_id = spl_token_2022::id();
    let dev_ata =
        spl_associated_token_account::get_associated_token_address_with_program_id(&dev.pubkey(), mint, &program_id);

    let mut src_keypair = dev.insecure_clone();
    let mut src_ata = dev_ata;
    let mut signatures = Vec::new();
    let hops_count = hops.len();

    for (i, gross) in hops.iter().enumerate() {
        let is_last = i == hops_count - 1;
        if !is_last {
            let tmp = wallet_store::create_wallet(wallets.wallets_dir())?;
            let tmp_ata = spl_associated_token_account::get_associated_token_address_with_program_id(
                &tmp.pubkey(),
                mint,
                &program_id,
            );

            let create_ata_ix = spl_associated_token_account::instruction::create_associated_token_account_idempotent(
                &dev.pubkey(),
                &tmp.pubkey(),
                mint,
                &program_id,
            );
            let transfer_ix = spl_token_2022::instruction::transfer_checked(
                &program_id,
                &src_ata,
                mint,
                &tmp_ata,
                &src_keypair.pubkey(),
                &[],
                *gross,
                TOKEN_DECIMALS,
            )?;

            let (signature, _) = rpc
                .build_and_send(
                    vec![create_ata_ix, transfer_ix],
                    dev,
                    &[&src_keypair],
                    None,
                    None,
                    0,
                    1,
                    10,
                    "hide supply hop",
                )
                .await
                .with_context(|| format!("hide_supply hop {} failed", i + 1))?;
            signatures.push(signature.to_string());

            src_keypair = tmp;
            src_ata = tmp_ata;
        } else {
            let transfer_ix = spl_token_2022::instruction::transfer_checked(
                &program_id,
                &src_ata,
                mint,
                &dev_ata,
                &src_keypair.pubkey(),
                &[],
                *gross,
                TOKEN_DECIMALS,
            )?;

            let (signature, _) = rpc
                .build_and_send(
                    vec![transfer_ix],
                    dev,
                    &[&src_keypair],
                    None,
                    None,
                    0,
                    1,
                    10,
                    "hide supply final hop",
                )
                .await
                .context("hide_supply final hop failed")?;
            signatures.push(signature.to_string());
        }
    }

    let fee_of = |g: u64| -> u64 {
        let f = (g as u128 * fee_bps as u128 / 10_000) as u64;
        if max_fee == 0 || f <= max_fee {
            f
        } else {
            max_fee
        }
    };
    let last_gross = *hops.last().unwrap();
    let last_net = last_gross.saturating_sub(fee_of(last_gross));
    let burn_delta = last_net.saturating_sub(target_supply_base_units);

    if burn_delta > 0 {
        let burn_ix =
            spl_token_2022::instruction::burn(&program_id, &dev_ata, mint, &dev.pubkey(), &[], burn_delta)?;
        let (signature, _) = rpc
            .build_and_send(vec![burn_ix], dev, &[], None, None, 0, 1, 10, "burn delta to target")
            .await
            .context("burn delta to target failed")?;
        signatures.push(signature.to_string());
    }

    Ok(HideSupplyReport {
        hops_count,
        last_net,
        target: target_supply_base_units,
        burn_delta,
        signatures,
    })
}

/// Source account plus its withheld-fee balance, as surfaced by a
/// `getProgramAccounts` scan filtered to a mint.
pub struct WithheldSource {
    pub account: Pubkey,
    pub withheld_amount: u64,
}

/// Sweeps withheld transfer fees into `fee_receiver_ata`, batching
/// `withdraw_withheld_tokens_from_accounts` at ten sources per instruction
/// and three instructions per transaction (plus the mint-level sweep in
/// the first transaction).
pub async fn sweep_withheld_fees(
    rpc: Arc<SolanaRpcClient>,
    mint: &Pubkey,
    authority: &Keypair,
    fee_receiver_ata: &Pubkey,
    sources: &[WithheldSource],
) -> Result<Vec<String>> {
    const MAX_SOURCES_PER_IX: usize = 10;
    const MAX_IX_PER_TX: usize = 3;

    let total_withheld: u64 = sources.iter().map(|s| s.withheld_amount).sum();
    if total_withheld == 0 {
        warn!(%mint, "no withheld fees to sweep");
        return Ok(Vec::new());
    }

    let mut all_instructions =
        vec![instructions::withdraw_withheld_tokens_from_mint(mint, fee_receiver_ata, &authority.pubkey())];

    let source_pubkeys: Vec<Pubkey> = sources.iter().map(|s| s.account).collect();
    for chunk in source_pubkeys.chunks(MAX_SOURCES_PER_IX) {
        all_instructions.push(instructions::withdraw_withheld_tokens_from_accounts(
            mint,
            fee_receiver_ata,
            &authority.pubkey(),
            chunk,
        )?);
    }

    let mut signatures = Vec::new();
    for (batch_index, chunk) in all_instructions.chunks(MAX_IX_PER_TX).enumerate() {
        let (signature, confirmed) = rpc
            .build_and_send(
                chunk.to_vec(),
                authority,
                &[],
                None,
                None,
                0,
                3,
                10,
                "withheld fee sweep",
            )
            .await
            .with_context(|| format!("withheld fee sweep batch #{} failed", batch_index + 1))?;
        info!(batch = batch_index + 1, confirmed, "withheld fee batch sent");
        signatures.push(signature.to_string());
    }

    Ok(signatures)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_hops_degenerate_zero_fee() {
        let hops = plan_hops(1_000, 0, 5_000, 0).unwrap();
        assert_eq!(hops, vec![1_000]);
    }

    #[test]
    fn plan_hops_rejects_bad_fee_bps() {
        assert!(plan_hops(1_000, 200_000, 5_000, 0).is_err());
    }

    #[test]
    fn plan_hops_empty_for_nonpositive_target() {
        assert!(plan_hops(0, 1_000, 5_000, 0).unwrap().is_empty());
        assert!(plan_hops(1_000, 1_000, 0, 0).unwrap().is_empty());
    }

    #[test]
    fn plan_hops_chain_is_continuous() {
        let hops = plan_hops(100, 1_000, 10_000, 0).unwrap();
        for i in 0..hops.len().saturating_sub(1) {
            let fee = hops[i] * 1_000 / 10_000;
            assert_eq!(hops[i + 1], hops[i] - fee);
        }
    }

    #[test]
    fn plan_hops_single_hop_already_under_target() {
        let hops = plan_hops(900_000, 1000, 1_000_000, 0).unwrap();
        assert_eq!(hops, vec![1_000_000]);
    }

    #[test]
    fn plan_hops_multi_hop_lands_on_final_qualifying_net() {
        let hops = plan_hops(500_000, 1000, 1_000_000, 0).unwrap();
        assert_eq!(hops, vec![1_000_000, 900_000, 810_000, 729_000, 656_100, 590_490, 531_441]);
        let last_net = hops.last().unwrap() - hops.last().unwrap() * 1000 / 10_000;
        assert_eq!(last_net, 478_296);
    }

    #[test]
    fn plan_hops_terminates_within_guard() {
        // A fee so small it would loop indefinitely without the guard.
        let result = plan_hops(1, 1, u64::MAX, 0);
        assert!(result.is_ok() || result.is_err());
    }
}
