//! Program IDs, PDA seeds, instruction discriminators and numeric constants
//! shared across the instruction builder, funds router and orchestrator.

use solana_sdk::pubkey::Pubkey;
use solana_sdk::pubkey;

/// Raydium-CP-style constant product AMM program.
pub const AMM_PROGRAM_ID: Pubkey = pubkey!("CPMMoo8L3F4NbTegBCKVNunggL7H1ZpdTHKxQB5qKP1C");

/// Fee receiver the AMM program charges on `initialize_pool`.
pub const CREATE_POOL_FEE_RECEIVER: Pubkey = pubkey!("DNXgeM9EiiaAbaWvwjHj9fQQLAX5ZsfHyvmYUNRAdNC8");

pub const MEMO_PROGRAM_ID: Pubkey = pubkey!("MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr");

/// Wrapped SOL mint (native mint).
pub const SOL_WRAPPED_MINT: Pubkey = pubkey!("So11111111111111111111111111111111111111112");

pub const AMM_CONFIG_SEED: &[u8] = b"amm_config";
pub const POOL_SEED: &[u8] = b"pool";
pub const POOL_LP_MINT_SEED: &[u8] = b"pool_lp_mint";
pub const POOL_VAULT_SEED: &[u8] = b"pool_vault";
pub const AUTH_SEED: &[u8] = b"vault_and_lp_mint_auth_seed";
pub const OBSERVATION_SEED: &[u8] = b"observation";

/// 8-byte Anchor discriminator for the AMM `initialize` instruction.
pub const INITIALIZE_DISCRIMINATOR: [u8; 8] = [0xaf, 0xaf, 0x6d, 0x1f, 0x0d, 0x98, 0x9b, 0xed];

/// 8-byte Anchor discriminator for the AMM `withdraw` instruction.
pub const WITHDRAW_DISCRIMINATOR: [u8; 8] = [0xb7, 0x12, 0x46, 0x9c, 0x94, 0x6d, 0xa1, 0x22];

/// Token-2022 metadata-extension discriminator used by `initialize_token_metadata`.
pub const METADATA_DISCRIMINATOR: [u8; 8] = [0xd2, 0xe1, 0x1e, 0xa2, 0x58, 0xb8, 0x4d, 0x8d];

pub const METADATA_POINTER_DISCRIMINATOR: u8 = 39;
pub const METADATA_POINTER_SUB_DISCRIMINATOR: u8 = 0;

/// Token-2022 `TransferFeeExtension` instruction family discriminator.
pub const TRANSFER_FEE_EXTENSION_DISCRIMINATOR: u8 = 26;
pub const TRANSFER_FEE_INITIALIZE_SUB: u8 = 0;
pub const TRANSFER_FEE_WITHDRAW_FROM_MINT_SUB: u8 = 2;
pub const TRANSFER_FEE_WITHDRAW_FROM_ACCOUNTS_SUB: u8 = 3;

/// SPL-Token / Token-2022 `SetAuthority` instruction discriminator.
pub const SET_AUTHORITY_DISCRIMINATOR: u8 = 6;

pub const AUTHORITY_TYPE_MINT_TOKENS: u8 = 0;
pub const AUTHORITY_TYPE_FREEZE_ACCOUNT: u8 = 1;

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;
pub const TOKEN_DECIMALS: u8 = 9;
pub const TOKEN_WITH_DECIMALS: u64 = 1_000_000_000;
/// A "UI token amount" is denominated in millions of base-decimal tokens.
pub const MILLION: u64 = 1_000_000;

pub const AMM_CONFIG_INDEX: u16 = 0;

/// Total circulating supply minted for every cloned token, in UI units (millions of tokens).
pub const SUPPLY_UI: u64 = 1_000_000_000;

/// Transfer-fee extension basis points fixed for every minted token (10%).
pub const TRANSFER_FEE_BPS: u16 = 1_000;
pub const TRANSFER_FEE_PERCENT: u64 = 10;

/// Lamports spent creating the mint account (346-byte Token-2022 account with
/// transfer-fee-config + metadata-pointer extensions).
pub const CREATE_MINT_ACCOUNT_LAMPORTS: u64 = 5_066_880;
pub const CREATE_MINT_ACCOUNT_SPACE: u64 = 346;

/// Fixed cost of running one cycle's mint-creation + pool-initialization
/// transactions, in lamports. Subtracted from the observed SOL-side vault
/// balance when computing PnL.
pub const LAUNCH_COST_LAMPORTS: u64 = 201_570_260;

pub fn launch_cost_sol() -> f64 {
    LAUNCH_COST_LAMPORTS as f64 / LAMPORTS_PER_SOL as f64
}

pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

pub fn sol_to_lamports(sol: f64) -> u64 {
    (sol * LAMPORTS_PER_SOL as f64) as u64
}

/// Maximum serialized transaction size accepted by the network.
pub const MAX_TRANSACTION_SIZE: usize = 1232;

pub const LOCK_LP: u64 = 100;
