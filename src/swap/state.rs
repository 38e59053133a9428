//! Swap session state and failure classification

use super::quote::Quote;
use crate::errors::WalletFlowError;
use crate::tx_builder::ProvisionedAccount;
use crate::types::Asset;
use solana_sdk::signature::Signature;
use std::fmt;

/// Which transaction an awaiting/submitting/confirming state refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapPhase {
    Swap,
    /// Creating the missing token accounts before the swap
    Setup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapFailure {
    InsufficientBalance(String),
    SlippageExceeded(String),
    AuthFailed,
    SignerUnavailable(String),
    /// Ledger reads or endpoints exhausted their retry budget
    NetworkExhausted(String),
    StaleQuote(String),
    /// No terminal status inside the polling window; may still land
    Timeout { signature: Signature },
    OnChainRejected(String),
    QuoteUnavailable(String),
    InvalidInput(String),
    SubmissionInFlight,
}

impl fmt::Display for SwapFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwapFailure::InsufficientBalance(m) => write!(f, "insufficient balance: {}", m),
            SwapFailure::SlippageExceeded(m) => write!(f, "price moved beyond slippage budget: {}", m),
            SwapFailure::AuthFailed => f.write_str("wrong password"),
            SwapFailure::SignerUnavailable(m) => write!(f, "signer unavailable: {}", m),
            SwapFailure::NetworkExhausted(m) => write!(f, "network unavailable: {}", m),
            SwapFailure::StaleQuote(m) => write!(f, "quote is stale: {}", m),
            SwapFailure::Timeout { signature } => {
                write!(f, "no confirmation yet for {}; it may still land", signature)
            }
            SwapFailure::OnChainRejected(m) => write!(f, "rejected on-chain: {}", m),
            SwapFailure::QuoteUnavailable(m) => write!(f, "quote unavailable: {}", m),
            SwapFailure::InvalidInput(m) => write!(f, "invalid input: {}", m),
            SwapFailure::SubmissionInFlight => f.write_str("another transaction is still being submitted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapStatus {
    Idle,
    QuoteLoading,
    QuoteReady,
    AwaitingPassword(SwapPhase),
    Submitting(SwapPhase),
    NeedsAccountSetup,
    Confirming(SwapPhase),
    Success { signature: Signature },
    Failed(SwapFailure),
}

impl SwapStatus {
    /// A transaction is being signed, submitted or confirmed
    pub fn is_busy(&self) -> bool {
        matches!(self, SwapStatus::Submitting(_) | SwapStatus::Confirming(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapPair {
    pub input: Asset,
    pub output: Asset,
}

/// Read-only projection of the swap screen
#[derive(Debug, Clone, PartialEq)]
pub struct SwapSession {
    pub pair: Option<SwapPair>,
    /// Amount as typed, in input-asset units
    pub amount: String,
    /// Most recently applied quote
    pub quote: Option<Quote>,
    /// Incremented every time a quote is applied
    pub quote_revision: u64,
    /// Token accounts the last attempt found missing
    pub required_accounts: Vec<ProvisionedAccount>,
    pub status: SwapStatus,
}

impl Default for SwapSession {
    fn default() -> Self {
        Self {
            pair: None,
            amount: String::new(),
            quote: None,
            quote_revision: 0,
            required_accounts: Vec::new(),
            status: SwapStatus::Idle,
        }
    }
}

/// Aggregator slippage tolerance error (custom program error 6001)
const SLIPPAGE_CODES: [&str; 2] = ["0x1771", "Custom(6001)"];

/// Map an on-chain failure reason onto the swap failure it represents
pub fn classify_on_chain(reason: &str) -> SwapFailure {
    let lower = reason.to_ascii_lowercase();
    if SLIPPAGE_CODES.iter().any(|code| reason.contains(code)) || lower.contains("slippage") {
        SwapFailure::SlippageExceeded(reason.to_string())
    } else if lower.contains("insufficient") {
        SwapFailure::InsufficientBalance(reason.to_string())
    } else {
        SwapFailure::OnChainRejected(reason.to_string())
    }
}

/// Map an engine error raised during an attempt onto a swap failure
pub fn classify_failure(err: &WalletFlowError) -> SwapFailure {
    match err {
        WalletFlowError::InsufficientBalance(m) => SwapFailure::InsufficientBalance(m.clone()),
        WalletFlowError::AuthFailed => SwapFailure::AuthFailed,
        WalletFlowError::SignerUnavailable(m) => SwapFailure::SignerUnavailable(m.clone()),
        WalletFlowError::RpcUnavailable { .. }
        | WalletFlowError::NoEndpointAvailable { .. }
        | WalletFlowError::FreshnessExpired => SwapFailure::NetworkExhausted(err.to_string()),
        WalletFlowError::StaleQuote(m) => SwapFailure::StaleQuote(m.clone()),
        WalletFlowError::Timeout { signature } => SwapFailure::Timeout {
            signature: *signature,
        },
        WalletFlowError::OnChainRejected { reason, .. } => classify_on_chain(reason),
        WalletFlowError::Quote(e) => SwapFailure::QuoteUnavailable(e.to_string()),
        WalletFlowError::SubmissionInFlight { .. } => SwapFailure::SubmissionInFlight,
        WalletFlowError::InvalidInput(m) | WalletFlowError::InvalidSeed(m) => {
            SwapFailure::InvalidInput(m.clone())
        }
        WalletFlowError::AccountMissing { .. } | WalletFlowError::Build(_) => {
            SwapFailure::InvalidInput(err.to_string())
        }
    }
}
