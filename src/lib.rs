//! Library surface for the liquidity-cycling bot: every module re-exported
//! here is unit-tested directly, and `main.rs` wires them into a running
//! process.

pub mod agent_loop;
pub mod cached_blockhash;
pub mod config;
pub mod constants;
pub mod errors;
pub mod funds_router;
pub mod instructions;
pub mod jito_client;
pub mod orchestrator;
pub mod pda;
pub mod rpc_client;
pub mod wallet_store;
pub mod ws_monitor;
