//! Walletflow - transaction orchestration for a non-custodial Solana wallet
//!
//! The engine builds, submits and confirms transactions on behalf of a user
//! whose keys live behind a remote signer: native and token sends (creating
//! the recipient's token account when absent), Solana Pay payments, and
//! aggregator swaps with a two-phase account setup flow.
//!
//! The ledger, the signer and the quote provider are injected capabilities
//! ([`rpc_manager::LedgerRpc`], [`submission::RemoteSigner`],
//! [`swap::QuoteProvider`]), so every flow can run against the fakes in
//! `test_utils`.

pub mod balances;
pub mod config;
pub mod engine;
pub mod errors;
pub mod metrics;
pub mod observability;
pub mod payment_request;
pub mod rpc_manager;
pub mod security;
pub mod send;
pub mod structured_logging;
pub mod submission;
pub mod swap;
pub mod test_utils;
pub mod tx_builder;
pub mod types;
pub mod wallet;

pub use engine::{EngineOptions, WalletEngine};
pub use errors::{WalletFlowError, WalletFlowResult};
pub use types::{Asset, Credential, SubmissionResult, TokenAmount};

// Re-export commonly used types
pub use solana_sdk::{pubkey::Pubkey, signature::Signature};

#[cfg(test)]
mod tests {
    mod rpc_resilience_tests;
    mod send_flow_tests;
    mod swap_flow_tests;
}
