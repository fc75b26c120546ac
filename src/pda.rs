//! Program-derived addresses and the pool descriptor the instruction
//! builder and orchestrator pass around once a mint and pool exist.

use anyhow::{bail, Result};
use solana_sdk::pubkey::Pubkey;

use crate::constants::{
    AMM_CONFIG_SEED, AMM_PROGRAM_ID, AUTH_SEED, LOCK_LP, OBSERVATION_SEED, POOL_LP_MINT_SEED,
    POOL_SEED, POOL_VAULT_SEED,
};

pub fn get_amm_config_address(index: u16) -> Pubkey {
    Pubkey::find_program_address(&[AMM_CONFIG_SEED, &index.to_be_bytes()], &AMM_PROGRAM_ID).0
}

pub fn get_authority_address() -> Pubkey {
    Pubkey::find_program_address(&[AUTH_SEED], &AMM_PROGRAM_ID).0
}

/// `token_mint0`/`token_mint1` must already be in canonical byte-lexicographic
/// order; callers are responsible for sorting via [`order_mints`].
pub fn get_pool_address(amm_config: &Pubkey, token_mint0: &Pubkey, token_mint1: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[
            POOL_SEED,
            amm_config.as_ref(),
            token_mint0.as_ref(),
            token_mint1.as_ref(),
        ],
        &AMM_PROGRAM_ID,
    )
    .0
}

pub fn get_pool_vault_address(pool: &Pubkey, vault_token_mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[POOL_VAULT_SEED, pool.as_ref(), vault_token_mint.as_ref()],
        &AMM_PROGRAM_ID,
    )
    .0
}

pub fn get_pool_lp_mint_address(pool: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[POOL_LP_MINT_SEED, pool.as_ref()], &AMM_PROGRAM_ID).0
}

pub fn get_oracle_account_address(pool: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[OBSERVATION_SEED, pool.as_ref()], &AMM_PROGRAM_ID).0
}

/// The AMM requires `token_mint0 < token_mint1` by raw byte comparison.
/// Returns `(mint0, mint1, swapped)` where `swapped` tells the caller
/// whether the amounts associated with the two mints must also swap.
pub fn order_mints(a: Pubkey, b: Pubkey) -> (Pubkey, Pubkey, bool) {
    if a.to_bytes() < b.to_bytes() {
        (a, b, false)
    } else {
        (b, a, true)
    }
}

/// Integer square root via Newton's method, matching `math.isqrt` semantics
/// for non-negative integers.
pub fn isqrt(n: u128) -> u128 {
    if n == 0 {
        return 0;
    }
    let mut x = n;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}

/// LP tokens minted by `initialize_pool` for the given vault balances, minus
/// the amount Raydium permanently locks.
pub fn calculate_lp_tokens(vault_0: u64, vault_1: u64) -> Result<u64> {
    let raw = isqrt(vault_0 as u128 * vault_1 as u128);
    let expected = raw
        .checked_sub(LOCK_LP as u128)
        .ok_or_else(|| anyhow::anyhow!("vault product too small to cover the locked LP amount"))?;
    u64::try_from(expected).map_err(|_| anyhow::anyhow!("lp amount overflowed u64"))
}

/// Full set of addresses describing one liquidity pool, derived once a
/// mint and its counterpart WSOL side are known.
#[derive(Debug, Clone)]
pub struct PoolDescriptor {
    pub amm_config: Pubkey,
    pub authority: Pubkey,
    pub pool_state: Pubkey,
    pub token_mint0: Pubkey,
    pub token_mint1: Pubkey,
    pub token0_vault: Pubkey,
    pub token1_vault: Pubkey,
    pub lp_mint: Pubkey,
    pub observation: Pubkey,
    /// LP tokens `initialize_pool` is expected to mint to the creator, computed
    /// analytically from the deposited vault amounts at pool-prep time via
    /// [`calculate_lp_tokens`]. Read back at withdraw time instead of
    /// re-deriving it from vault balances, which drift once swaps occur.
    pub lp_amount_expected: u64,
}

impl PoolDescriptor {
    pub fn derive(token_mint_a: Pubkey, token_mint_b: Pubkey, amm_config_index: u16) -> Self {
        let (token_mint0, token_mint1, _swapped) = order_mints(token_mint_a, token_mint_b);
        let amm_config = get_amm_config_address(amm_config_index);
        let authority = get_authority_address();
        let pool_state = get_pool_address(&amm_config, &token_mint0, &token_mint1);
        Self {
            amm_config,
            authority,
            token0_vault: get_pool_vault_address(&pool_state, &token_mint0),
            token1_vault: get_pool_vault_address(&pool_state, &token_mint1),
            lp_mint: get_pool_lp_mint_address(&pool_state),
            observation: get_oracle_account_address(&pool_state),
            pool_state,
            token_mint0,
            token_mint1,
            lp_amount_expected: 0,
        }
    }

    /// Computes and stores the LP amount `initialize_pool` will mint for
    /// depositing `amount0`/`amount1` into this pool's two sides.
    pub fn with_lp_amount_expected(mut self, amount0: u64, amount1: u64) -> Result<Self> {
        self.lp_amount_expected = calculate_lp_tokens(amount0, amount1)?;
        Ok(self)
    }

    /// Returns the vault holding `mint`, failing if `mint` is neither side
    /// of the pool.
    pub fn vault_for(&self, mint: &Pubkey) -> Result<Pubkey> {
        if *mint == self.token_mint0 {
            Ok(self.token0_vault)
        } else if *mint == self.token_mint1 {
            Ok(self.token1_vault)
        } else {
            bail!("mint {mint} is not part of pool {}", self.pool_state)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isqrt_matches_known_values() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(1), 1);
        assert_eq!(isqrt(15), 3);
        assert_eq!(isqrt(16), 4);
        assert_eq!(isqrt(u128::from(u64::MAX) * 2), 6_074_000_999);
    }

    #[test]
    fn lp_tokens_subtract_lock_amount() {
        let amount = calculate_lp_tokens(1_000_000, 1_000_000).unwrap();
        assert_eq!(amount, isqrt(1_000_000u128 * 1_000_000u128) as u64 - LOCK_LP);
    }

    #[test]
    fn lp_tokens_reject_undersized_vaults() {
        assert!(calculate_lp_tokens(1, 1).is_err());
    }

    #[test]
    fn order_mints_is_byte_lexicographic() {
        let low = Pubkey::new_from_array([0u8; 32]);
        let high = Pubkey::new_from_array([0xff; 32]);
        let (m0, m1, swapped) = order_mints(high, low);
        assert_eq!(m0, low);
        assert_eq!(m1, high);
        assert!(swapped);
    }

    #[test]
    fn pool_descriptor_derives_distinct_addresses() {
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let descriptor = PoolDescriptor::derive(a, b, 0);
        assert_ne!(descriptor.token0_vault, descriptor.token1_vault);
        assert!(descriptor.vault_for(&descriptor.token_mint0).is_ok());
        assert!(descriptor.vault_for(&Pubkey::new_unique()).is_err());
    }

    #[test]
    fn with_lp_amount_expected_stores_the_analytic_amount() {
        let descriptor = PoolDescriptor::derive(Pubkey::new_unique(), Pubkey::new_unique(), 0)
            .with_lp_amount_expected(1_000_000, 1_000_000)
            .unwrap();
        assert_eq!(descriptor.lp_amount_expected, calculate_lp_tokens(1_000_000, 1_000_000).unwrap());
    }
}
