//! Pure instruction builders (C5). Every function here only assembles
//! account metas and byte-packed instruction data — no RPC calls, no
//! signing. Byte layouts mirror the on-chain programs' hand-packed wire
//! formats rather than going through a higher-level SDK, since several of
//! these (the metadata extension, the AMM's `initialize`/`withdraw`) predate
//! or diverge from their crate's convenience builders.

use anyhow::{bail, Result};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program, sysvar,
};

use crate::constants::*;
use crate::pda::PoolDescriptor;

pub fn encode_zeroable_option(pubkey: Option<&Pubkey>) -> [u8; 32] {
    pubkey.map(|p| p.to_bytes()).unwrap_or([0u8; 32])
}

pub fn encode_string(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(4 + bytes.len());
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
    out
}

pub fn encode_optional_pubkey(pubkey: Option<&Pubkey>) -> Vec<u8> {
    match pubkey {
        None => vec![0],
        Some(p) => {
            let mut out = Vec::with_capacity(33);
            out.push(1);
            out.extend_from_slice(p.as_ref());
            out
        }
    }
}

/// Token-2022 `InitializeMint` (discriminator 0), with extensions expected
/// to already be initialized on the account (transfer-fee config, metadata
/// pointer) before this instruction runs.
pub fn initialize_mint(
    mint: &Pubkey,
    mint_authority: &Pubkey,
    freeze_authority: Option<&Pubkey>,
    decimals: u8,
) -> Instruction {
    let mut data = vec![0u8, decimals];
    data.extend_from_slice(mint_authority.as_ref());
    data.extend_from_slice(&encode_optional_pubkey(freeze_authority));

    Instruction {
        program_id: spl_token_2022::id(),
        accounts: vec![
            AccountMeta::new(*mint, false),
            AccountMeta::new_readonly(sysvar::rent::id(), false),
        ],
        data,
    }
}

/// Token-2022 `TransferFeeExtension::InitializeTransferFeeConfig`.
pub fn initialize_transfer_fee_config(
    mint: &Pubkey,
    authority: &Pubkey,
    basis_points: u16,
    max_fee: u64,
) -> Instruction {
    let mut data = vec![
        TRANSFER_FEE_EXTENSION_DISCRIMINATOR,
        TRANSFER_FEE_INITIALIZE_SUB,
    ];
    data.extend(encode_optional_pubkey(Some(authority)));
    data.extend(encode_optional_pubkey(Some(authority)));
    data.extend_from_slice(&basis_points.to_le_bytes());
    data.extend_from_slice(&max_fee.to_le_bytes());

    Instruction {
        program_id: spl_token_2022::id(),
        accounts: vec![AccountMeta::new(*mint, false)],
        data,
    }
}

/// Token-2022 `MetadataPointerExtension::Initialize`.
pub fn initialize_metadata_pointer(
    mint: &Pubkey,
    authority: Option<&Pubkey>,
    metadata_address: Option<&Pubkey>,
) -> Instruction {
    let mut data = vec![
        METADATA_POINTER_DISCRIMINATOR,
        METADATA_POINTER_SUB_DISCRIMINATOR,
    ];
    data.extend_from_slice(&encode_zeroable_option(authority));
    data.extend_from_slice(&encode_zeroable_option(metadata_address));

    Instruction {
        program_id: spl_token_2022::id(),
        accounts: vec![AccountMeta::new(*mint, false)],
        data,
    }
}

/// Token metadata-interface `Initialize` (name/symbol/uri), stored
/// directly in the mint's own metadata-pointer target.
pub fn initialize_token_metadata(
    metadata: &Pubkey,
    update_authority: &Pubkey,
    mint: &Pubkey,
    mint_authority: &Pubkey,
    name: &str,
    symbol: &str,
    uri: &str,
) -> Instruction {
    let mut data = METADATA_DISCRIMINATOR.to_vec();
    data.extend(encode_string(name));
    data.extend(encode_string(symbol));
    data.extend(encode_string(uri));

    Instruction {
        program_id: spl_token_2022::id(),
        accounts: vec![
            AccountMeta::new(*metadata, false),
            AccountMeta::new_readonly(*update_authority, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(*mint_authority, true),
        ],
        data,
    }
}

/// SPL-Token / Token-2022 `SetAuthority`.
pub fn set_authority(
    account: &Pubkey,
    current_authority: &Pubkey,
    authority_type: u8,
    new_authority: Option<&Pubkey>,
    token_program: &Pubkey,
) -> Instruction {
    let mut data = vec![SET_AUTHORITY_DISCRIMINATOR, authority_type];
    data.extend(encode_optional_pubkey(new_authority));

    Instruction {
        program_id: *token_program,
        accounts: vec![
            AccountMeta::new(*account, false),
            AccountMeta::new_readonly(*current_authority, true),
        ],
        data,
    }
}

#[allow(clippy::too_many_arguments)]
pub struct InitializePoolAccounts<'a> {
    pub creator: &'a Pubkey,
    pub pool: &'a PoolDescriptor,
    pub creator_token0: &'a Pubkey,
    pub creator_token1: &'a Pubkey,
    pub creator_lp_token: &'a Pubkey,
    pub token_0_program: &'a Pubkey,
    pub token_1_program: &'a Pubkey,
}

/// AMM `initialize`, creating the pool state account and minting the
/// initial LP supply to `creator_lp_token`.
pub fn initialize_pool(
    accounts: &InitializePoolAccounts,
    token_mint0_amount: u64,
    token_mint1_amount: u64,
    open_time_unix: u64,
) -> Instruction {
    let mut data = INITIALIZE_DISCRIMINATOR.to_vec();
    data.extend_from_slice(&token_mint0_amount.to_le_bytes());
    data.extend_from_slice(&token_mint1_amount.to_le_bytes());
    data.extend_from_slice(&open_time_unix.to_le_bytes());

    let pool = accounts.pool;
    Instruction {
        program_id: AMM_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(*accounts.creator, true),
            AccountMeta::new_readonly(pool.amm_config, false),
            AccountMeta::new_readonly(pool.authority, false),
            AccountMeta::new(pool.pool_state, false),
            AccountMeta::new_readonly(pool.token_mint0, false),
            AccountMeta::new_readonly(pool.token_mint1, false),
            AccountMeta::new(pool.lp_mint, false),
            AccountMeta::new(*accounts.creator_token0, false),
            AccountMeta::new(*accounts.creator_token1, false),
            AccountMeta::new(*accounts.creator_lp_token, false),
            AccountMeta::new(pool.token0_vault, false),
            AccountMeta::new(pool.token1_vault, false),
            AccountMeta::new(CREATE_POOL_FEE_RECEIVER, false),
            AccountMeta::new(pool.observation, false),
            AccountMeta::new_readonly(spl_token::id(), false),
            AccountMeta::new_readonly(*accounts.token_0_program, false),
            AccountMeta::new_readonly(*accounts.token_1_program, false),
            AccountMeta::new_readonly(spl_associated_token_account::id(), false),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(sysvar::rent::id(), false),
        ],
        data,
    }
}

#[allow(clippy::too_many_arguments)]
pub struct WithdrawAccounts<'a> {
    pub creator: &'a Pubkey,
    pub pool: &'a PoolDescriptor,
    pub creator_lp_token: &'a Pubkey,
    pub token_0_ata: &'a Pubkey,
    pub token_1_ata: &'a Pubkey,
}

/// AMM `withdraw`, burning LP tokens for both vaults' underlying balances.
pub fn withdraw(
    accounts: &WithdrawAccounts,
    lp_token_amount: u64,
    min_token_0: u64,
    min_token_1: u64,
) -> Instruction {
    let mut data = WITHDRAW_DISCRIMINATOR.to_vec();
    data.extend_from_slice(&lp_token_amount.to_le_bytes());
    data.extend_from_slice(&min_token_0.to_le_bytes());
    data.extend_from_slice(&min_token_1.to_le_bytes());

    let pool = accounts.pool;
    Instruction {
        program_id: AMM_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(*accounts.creator, true),
            AccountMeta::new_readonly(pool.authority, false),
            AccountMeta::new(pool.pool_state, false),
            AccountMeta::new(*accounts.creator_lp_token, false),
            AccountMeta::new(*accounts.token_0_ata, false),
            AccountMeta::new(*accounts.token_1_ata, false),
            AccountMeta::new(pool.token0_vault, false),
            AccountMeta::new(pool.token1_vault, false),
            AccountMeta::new_readonly(spl_token::id(), false),
            AccountMeta::new_readonly(spl_token_2022::id(), false),
            AccountMeta::new_readonly(pool.token_mint0, false),
            AccountMeta::new_readonly(pool.token_mint1, false),
            AccountMeta::new(pool.lp_mint, false),
            AccountMeta::new_readonly(MEMO_PROGRAM_ID, false),
        ],
        data,
    }
}

/// Withheld-fee sweep into the mint's designated withdraw-withheld
/// authority account, batched `from_accounts` sources first.
pub fn withdraw_withheld_tokens_from_mint(
    mint: &Pubkey,
    fee_receiver: &Pubkey,
    authority: &Pubkey,
) -> Instruction {
    Instruction {
        program_id: spl_token_2022::id(),
        accounts: vec![
            AccountMeta::new(*mint, false),
            AccountMeta::new(*fee_receiver, false),
            AccountMeta::new_readonly(*authority, true),
        ],
        data: vec![TRANSFER_FEE_EXTENSION_DISCRIMINATOR, TRANSFER_FEE_WITHDRAW_FROM_MINT_SUB],
    }
}

pub const MAX_WITHHELD_SOURCES_PER_IX: usize = 10;

pub fn withdraw_withheld_tokens_from_accounts(
    mint: &Pubkey,
    fee_receiver: &Pubkey,
    authority: &Pubkey,
    sources: &[Pubkey],
) -> Result<Instruction> {
    if sources.len() > MAX_WITHHELD_SOURCES_PER_IX {
        bail!(
            "cannot place more than {MAX_WITHHELD_SOURCES_PER_IX} source accounts in one instruction, got {}",
            sources.len()
        );
    }

    let mut accounts = vec![
        AccountMeta::new_readonly(*mint, false),
        AccountMeta::new(*fee_receiver, false),
        AccountMeta::new_readonly(*authority, true),
    ];
    accounts.extend(sources.iter().map(|s| AccountMeta::new(*s, false)));

    Ok(Instruction {
        program_id: spl_token_2022::id(),
        accounts,
        data: vec![
            TRANSFER_FEE_EXTENSION_DISCRIMINATOR,
            TRANSFER_FEE_WITHDRAW_FROM_ACCOUNTS_SUB,
            sources.len() as u8,
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_string_prefixes_length() {
        let encoded = encode_string("abc");
        assert_eq!(&encoded[0..4], &3u32.to_le_bytes());
        assert_eq!(&encoded[4..], b"abc");
    }

    #[test]
    fn encode_optional_pubkey_tags_presence() {
        assert_eq!(encode_optional_pubkey(None), vec![0]);
        let key = Pubkey::new_unique();
        let encoded = encode_optional_pubkey(Some(&key));
        assert_eq!(encoded[0], 1);
        assert_eq!(&encoded[1..], key.as_ref());
    }

    #[test]
    fn withdraw_from_accounts_rejects_oversized_batch() {
        let sources = vec![Pubkey::new_unique(); MAX_WITHHELD_SOURCES_PER_IX + 1];
        let err = withdraw_withheld_tokens_from_accounts(
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            &sources,
        )
        .unwrap_err();
        assert!(err.to_string().contains("cannot place more than"));
    }

    #[test]
    fn initialize_pool_data_layout() {
        let pool = PoolDescriptor::derive(Pubkey::new_unique(), Pubkey::new_unique(), 0);
        let creator = Pubkey::new_unique();
        let creator_token0 = Pubkey::new_unique();
        let creator_token1 = Pubkey::new_unique();
        let creator_lp_token = Pubkey::new_unique();
        let ix = initialize_pool(
            &InitializePoolAccounts {
                creator: &creator,
                pool: &pool,
                creator_token0: &creator_token0,
                creator_token1: &creator_token1,
                creator_lp_token: &creator_lp_token,
                token_0_program: &spl_token::id(),
                token_1_program: &spl_token_2022::id(),
            },
            1_000,
            2_000,
            0,
        );
        assert_eq!(&ix.data[0..8], &INITIALIZE_DISCRIMINATOR);
        assert_eq!(ix.accounts.len(), 19);
    }
}
