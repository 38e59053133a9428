//! Top-level error taxonomy
//!
//! Every layer keeps its own error enum (`RpcManagerError`,
//! `TransactionBuilderError`, `SignerError`, `QuoteError`,
//! `KeyDerivationError`); they are classified into [`WalletFlowError`] at the
//! boundary of the public operations.

use crate::rpc_manager::RpcManagerError;
use crate::submission::SignerError;
use crate::swap::QuoteError;
use crate::tx_builder::TransactionBuilderError;
use crate::types::AmountError;
use crate::wallet::KeyDerivationError;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use thiserror::Error;

pub type WalletFlowResult<T> = Result<T, WalletFlowError>;

#[derive(Error, Debug)]
pub enum WalletFlowError {
    /// Bad address, amount, memo or URL; rejected before any network call
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Recovery phrase failed the word-list or checksum check
    #[error("Invalid recovery phrase: {0}")]
    InvalidSeed(String),

    /// Transient ledger failures persisted past the retry budget
    #[error("Ledger unavailable during {operation} after {attempts} attempt(s): {source}")]
    RpcUnavailable {
        operation: String,
        attempts: u32,
        #[source]
        source: RpcManagerError,
    },

    #[error("No ledger endpoint answered the liveness probe ({tried} tried)")]
    NoEndpointAvailable { tried: usize },

    /// Wrong password; never retried
    #[error("Signer rejected the credential")]
    AuthFailed,

    #[error("Signer unavailable: {0}")]
    SignerUnavailable(String),

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("Token account {address} does not exist")]
    AccountMissing { address: Pubkey },

    /// The quote no longer matches the displayed amount or has expired
    #[error("Stale quote: {0}")]
    StaleQuote(String),

    /// Not a failure: the transaction may still land
    #[error("No confirmation observed for {signature} within the polling window")]
    Timeout { signature: Signature },

    /// The ledger executed or simulated the transaction and rejected it
    #[error("Rejected by the ledger: {reason}")]
    OnChainRejected {
        signature: Option<Signature>,
        reason: String,
    },

    #[error("Freshness token expired before the transaction landed")]
    FreshnessExpired,

    #[error("A submission for fee payer {payer} is already in flight")]
    SubmissionInFlight { payer: Pubkey },

    #[error("Quote provider error: {0}")]
    Quote(#[from] QuoteError),

    #[error(transparent)]
    Build(#[from] TransactionBuilderError),
}

impl WalletFlowError {
    /// Stable label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            WalletFlowError::InvalidInput(_) => "invalid_input",
            WalletFlowError::InvalidSeed(_) => "invalid_seed",
            WalletFlowError::RpcUnavailable { .. } => "rpc_unavailable",
            WalletFlowError::NoEndpointAvailable { .. } => "no_endpoint_available",
            WalletFlowError::AuthFailed => "auth_failed",
            WalletFlowError::SignerUnavailable(_) => "signer_unavailable",
            WalletFlowError::InsufficientBalance(_) => "insufficient_balance",
            WalletFlowError::AccountMissing { .. } => "account_missing",
            WalletFlowError::StaleQuote(_) => "stale_quote",
            WalletFlowError::Timeout { .. } => "timeout",
            WalletFlowError::OnChainRejected { .. } => "on_chain_rejected",
            WalletFlowError::FreshnessExpired => "freshness_expired",
            WalletFlowError::SubmissionInFlight { .. } => "submission_in_flight",
            WalletFlowError::Quote(_) => "quote",
            WalletFlowError::Build(e) => e.category(),
        }
    }

    /// Errors worth surfacing as "try again later" rather than as a verdict
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WalletFlowError::RpcUnavailable { .. }
                | WalletFlowError::NoEndpointAvailable { .. }
                | WalletFlowError::FreshnessExpired
                | WalletFlowError::SignerUnavailable(_)
        )
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        WalletFlowError::InvalidInput(msg.into())
    }
}

impl From<RpcManagerError> for WalletFlowError {
    fn from(err: RpcManagerError) -> Self {
        match err {
            RpcManagerError::InsufficientFunds { .. } => {
                WalletFlowError::InsufficientBalance(err.to_string())
            }
            RpcManagerError::BlockhashNotFound { .. } | RpcManagerError::TransactionExpired { .. } => {
                WalletFlowError::FreshnessExpired
            }
            RpcManagerError::Rejected { message, .. } => WalletFlowError::OnChainRejected {
                signature: None,
                reason: message,
            },
            RpcManagerError::NoHealthyEndpoints { total } => {
                WalletFlowError::NoEndpointAvailable { tried: total }
            }
            RpcManagerError::Validation(msg) => WalletFlowError::InvalidInput(msg),
            other => WalletFlowError::RpcUnavailable {
                operation: "ledger call".to_string(),
                attempts: 1,
                source: other,
            },
        }
    }
}

impl From<SignerError> for WalletFlowError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::AuthFailed => WalletFlowError::AuthFailed,
            other => WalletFlowError::SignerUnavailable(other.to_string()),
        }
    }
}

impl From<KeyDerivationError> for WalletFlowError {
    fn from(err: KeyDerivationError) -> Self {
        match err {
            KeyDerivationError::InvalidSeed(msg) => WalletFlowError::InvalidSeed(msg),
            other => WalletFlowError::InvalidInput(other.to_string()),
        }
    }
}

impl From<AmountError> for WalletFlowError {
    fn from(err: AmountError) -> Self {
        WalletFlowError::InvalidInput(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_classification() {
        let err: WalletFlowError = RpcManagerError::InsufficientFunds {
            endpoint: "http://rpc".into(),
        }
        .into();
        assert_eq!(err.kind(), "insufficient_balance");

        let err: WalletFlowError = RpcManagerError::BlockhashNotFound {
            endpoint: "http://rpc".into(),
        }
        .into();
        assert!(matches!(err, WalletFlowError::FreshnessExpired));

        let err: WalletFlowError = RpcManagerError::Rejected {
            endpoint: "http://rpc".into(),
            message: "custom program error: 0x1771".into(),
        }
        .into();
        match err {
            WalletFlowError::OnChainRejected { reason, signature } => {
                assert!(signature.is_none());
                assert!(reason.contains("0x1771"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let err: WalletFlowError = RpcManagerError::Transport {
            endpoint: "http://rpc".into(),
            message: "connection reset".into(),
        }
        .into();
        assert!(err.is_transient());
    }

    #[test]
    fn test_signer_error_classification() {
        assert!(matches!(
            WalletFlowError::from(SignerError::AuthFailed),
            WalletFlowError::AuthFailed
        ));
        let err = WalletFlowError::from(SignerError::Unavailable("503".into()));
        assert_eq!(err.kind(), "signer_unavailable");
        assert!(!WalletFlowError::AuthFailed.is_transient());
    }

    #[test]
    fn test_amount_error_is_invalid_input() {
        let err = WalletFlowError::from(AmountError::Empty);
        assert_eq!(err.kind(), "invalid_input");
    }
}
