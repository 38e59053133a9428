//! RPC Manager Module
//!
//! The ledger is reached through an injected [`LedgerRpc`] capability. This
//! module provides the RpcClient-backed implementation, multi-endpoint
//! failover, the central retry helper and confirmation polling.

use async_trait::async_trait;
use solana_sdk::{account::Account, hash::Hash, pubkey::Pubkey, signature::Signature};

// Submodules
pub mod rpc_errors;
pub mod rpc_pool;
pub mod rpc_retry;

// Re-exports for convenience
pub use rpc_errors::{RetryPolicy, RpcManagerError};
pub use rpc_pool::{select_endpoint, FailoverLedger, RpcEndpoint};
pub use rpc_retry::{poll_until, with_retry, PollOptions};

/// Recent blockhash plus the last block height at which it is still accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessToken {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

/// Snapshot of a signature's status as reported by the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureState {
    /// The ledger has not seen the signature (yet)
    Unknown,
    /// Seen but below the configured commitment
    Processing,
    /// Reached the configured commitment without error
    Confirmed,
    /// Executed with an error; carries the ledger's reason
    Failed(String),
}

impl SignatureState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SignatureState::Confirmed | SignatureState::Failed(_))
    }
}

/// Narrow request/response view of the ledger used by the engine
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Identifier used in logs and errors (normally the endpoint URL)
    fn endpoint(&self) -> &str;

    /// Raw account, or `None` when no account data exists at `address`
    async fn get_account_info(&self, address: &Pubkey) -> Result<Option<Account>, RpcManagerError>;

    async fn get_latest_blockhash(&self) -> Result<FreshnessToken, RpcManagerError>;

    /// Submit serialized signed transaction bytes, returning the signature ID
    async fn submit_raw(&self, signed_tx: &[u8]) -> Result<Signature, RpcManagerError>;

    async fn get_signature_status(&self, signature: &Signature) -> Result<SignatureState, RpcManagerError>;

    /// Native balance in lamports
    async fn get_balance(&self, address: &Pubkey) -> Result<u64, RpcManagerError>;

    /// Cheap liveness check used by endpoint selection
    async fn probe(&self) -> Result<(), RpcManagerError>;
}
