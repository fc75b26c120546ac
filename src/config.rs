//! Process configuration, loaded once at startup from the environment.

use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

use crate::errors::AppError;

/// The two supported outer-loop modes (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Manual,
    Auto,
}

impl Mode {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "manual" => Ok(Mode::Manual),
            "auto" => Ok(Mode::Auto),
            other => bail!("mode must be manual|auto, got {other:?}"),
        }
    }
}

/// Per-cycle configuration, mutable only while the orchestrator is Idle.
#[derive(Debug, Clone)]
pub struct CycleConfig {
    /// UI token amounts (millions of tokens) to draw from for each cycle.
    pub token_amount_choices: Vec<u64>,
    /// WSOL amounts (SOL) to draw from for each cycle.
    pub wsol_amount_choices: Vec<f64>,
    pub profit_threshold_sol: f64,
    pub cycle_timeout: Duration,
    pub mode: Mode,
    pub auto_sleep: Duration,
}

impl CycleConfig {
    /// Rejects an invalid cycle configuration with [`AppError::Validation`] —
    /// this runs both at startup and on every operator `set` command, so the
    /// error it raises must be the "reject, don't crash" kind.
    fn validate(&self) -> Result<(), AppError> {
        if self.token_amount_choices.is_empty() {
            return Err(AppError::Validation("token_amount_choices must be non-empty".into()));
        }
        if self.token_amount_choices.iter().any(|&v| v == 0) {
            return Err(AppError::Validation(
                "token_amount_choices must contain only positive integers".into(),
            ));
        }
        if self.wsol_amount_choices.is_empty() {
            return Err(AppError::Validation("wsol_amount_choices must be non-empty".into()));
        }
        if self.wsol_amount_choices.iter().any(|&v| v < 0.0 || !v.is_finite()) {
            return Err(AppError::Validation(
                "wsol_amount_choices must be finite and non-negative".into(),
            ));
        }
        if self.profit_threshold_sol < 0.0 || !self.profit_threshold_sol.is_finite() {
            return Err(AppError::Validation(
                "profit_threshold_sol must be finite and non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// Top-level process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_http_url: String,
    pub rpc_ws_url: String,
    pub wallets_dir: String,
    pub jito_block_engine_url: String,
    pub rpc_max_calls_per_window: u32,
    pub rpc_window_secs: f64,
    pub circuit_breaker_threshold: u32,
    pub cycle: CycleConfig,
}

impl Config {
    /// Loads and validates configuration from the environment. Any failure
    /// here is a startup-fatal [`AppError::Configuration`] — unlike
    /// [`apply_set_command`]'s rejectable [`AppError::Validation`], there is
    /// no running process to fall back to yet.
    pub fn from_env() -> Result<Self> {
        Self::load().map_err(|e| anyhow::Error::new(AppError::Configuration(e.to_string())))
    }

    fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        env::var("FUND_PRIVATE_KEY").context(
            "FUND_PRIVATE_KEY is required (base58-encoded 64-byte fund wallet secret)",
        )?;

        let config = Self {
            rpc_http_url: env::var("RPC_HTTP_URL")
                .unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".to_string()),
            rpc_ws_url: env::var("RPC_WS_URL")
                .unwrap_or_else(|_| "wss://api.mainnet-beta.solana.com".to_string()),
            wallets_dir: env::var("WALLETS_DIR").unwrap_or_else(|_| "wallets".to_string()),
            jito_block_engine_url: env::var("JITO_BLOCK_ENGINE_URL").unwrap_or_else(|_| {
                "https://mainnet.block-engine.jito.wtf/api/v1/transactions".to_string()
            }),
            rpc_max_calls_per_window: env::var("RPC_MAX_CALLS_PER_WINDOW")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .context("RPC_MAX_CALLS_PER_WINDOW must be a positive integer")?,
            rpc_window_secs: env::var("RPC_WINDOW_SECS")
                .unwrap_or_else(|_| "1.0".to_string())
                .parse()
                .context("RPC_WINDOW_SECS must be a number")?,
            circuit_breaker_threshold: env::var("CIRCUIT_BREAKER_THRESHOLD")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("CIRCUIT_BREAKER_THRESHOLD must be a positive integer")?,
            cycle: CycleConfig {
                token_amount_choices: parse_u64_list(
                    &env::var("TOKEN_AMOUNT_CHOICES").unwrap_or_else(|_| "1000".to_string()),
                )?,
                wsol_amount_choices: parse_f64_list(
                    &env::var("WSOL_AMOUNT_CHOICES").unwrap_or_else(|_| "3.0".to_string()),
                )?,
                profit_threshold_sol: env::var("PROFIT_THRESHOLD_SOL")
                    .unwrap_or_else(|_| "0.05".to_string())
                    .parse()
                    .context("PROFIT_THRESHOLD_SOL must be a number")?,
                cycle_timeout: Duration::from_secs(
                    env::var("CYCLE_TIMEOUT_SECS")
                        .unwrap_or_else(|_| "120".to_string())
                        .parse()
                        .context("CYCLE_TIMEOUT_SECS must be a non-negative integer")?,
                ),
                mode: Mode::parse(&env::var("MODE").unwrap_or_else(|_| "manual".to_string()))?,
                auto_sleep: Duration::from_secs(
                    env::var("AUTO_SLEEP_SECS")
                        .unwrap_or_else(|_| "300".to_string())
                        .parse()
                        .context("AUTO_SLEEP_SECS must be a non-negative integer")?,
                ),
            },
        };

        config.cycle.validate()?;
        if config.rpc_max_calls_per_window == 0 {
            bail!("RPC_MAX_CALLS_PER_WINDOW must be > 0");
        }
        if !config.rpc_window_secs.is_finite() || config.rpc_window_secs <= 0.0 {
            bail!("RPC_WINDOW_SECS must be finite and > 0");
        }

        Ok(config)
    }
}

fn parse_u64_list(s: &str) -> Result<Vec<u64>> {
    s.split(',')
        .map(|v| v.trim().parse::<u64>().context("expected a comma-separated list of integers"))
        .collect()
}

fn parse_f64_list(s: &str) -> Result<Vec<f64>> {
    s.split(',')
        .map(|v| v.trim().parse::<f64>().context("expected a comma-separated list of numbers"))
        .collect()
}

/// Apply one `set <key> <value>` command from the external CLI/bot surface
/// (§6). Rejects unknown keys and malformed values at the boundary; never
/// mutates `cycle` unless the whole command parses and validates.
pub fn apply_set_command(cycle: &mut CycleConfig, key: &str, value: &str) -> Result<()> {
    let mut candidate = cycle.clone();
    let parse_err = |e: anyhow::Error| AppError::Validation(e.to_string());
    match key {
        "token_amount_ui" => candidate.token_amount_choices = parse_u64_list(value).map_err(parse_err)?,
        "wsol_amount_ui" => candidate.wsol_amount_choices = parse_f64_list(value).map_err(parse_err)?,
        "profit" => {
            candidate.profit_threshold_sol = value
                .parse()
                .map_err(|_| AppError::Validation("profit must be a number".into()))?
        }
        "timeout" => {
            candidate.cycle_timeout = Duration::from_secs(
                value
                    .parse()
                    .map_err(|_| AppError::Validation("timeout must be a non-negative integer".into()))?,
            )
        }
        "mode" => candidate.mode = Mode::parse(value).map_err(parse_err)?,
        "interval" => {
            candidate.auto_sleep = Duration::from_secs(
                value
                    .parse()
                    .map_err(|_| AppError::Validation("interval must be a non-negative integer".into()))?,
            )
        }
        other => return Err(AppError::Validation(format!("unknown configuration key: {other:?}")).into()),
    }
    candidate.validate()?;
    *cycle = candidate;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_mode() {
        let mut cycle = CycleConfig {
            token_amount_choices: vec![1000],
            wsol_amount_choices: vec![3.0],
            profit_threshold_sol: 0.05,
            cycle_timeout: Duration::from_secs(120),
            mode: Mode::Manual,
            auto_sleep: Duration::from_secs(300),
        };
        let before = cycle.clone();
        let err = apply_set_command(&mut cycle, "mode", "xauto").unwrap_err();
        assert!(err.to_string().contains("manual|auto"));
        assert_eq!(cycle.mode, before.mode);
    }

    #[test]
    fn rejects_unknown_key() {
        let mut cycle = CycleConfig {
            token_amount_choices: vec![1000],
            wsol_amount_choices: vec![3.0],
            profit_threshold_sol: 0.05,
            cycle_timeout: Duration::from_secs(120),
            mode: Mode::Manual,
            auto_sleep: Duration::from_secs(300),
        };
        assert!(apply_set_command(&mut cycle, "bogus", "1").is_err());
    }

    #[test]
    fn parses_comma_separated_choices() {
        assert_eq!(parse_u64_list("10, 20,30").unwrap(), vec![10, 20, 30]);
        assert_eq!(parse_f64_list("0.1,0.2").unwrap(), vec![0.1, 0.2]);
    }
}
