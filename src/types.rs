//! Core domain types shared across the engine
//!
//! Assets, human/base-unit amount conversion, the signer credential and
//! the terminal outcome of a submission.

use crate::errors::WalletFlowError;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

/// Decimal precision of the native coin (1 SOL = 10^9 lamports)
pub const NATIVE_DECIMALS: u8 = 9;

/// Largest precision whose scale (10^19) still fits in a u64
pub const MAX_DECIMALS: u8 = 19;

/// Something the wallet can hold and move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Asset {
    /// The chain's native coin, moved with a system transfer
    Native,
    /// A fungible token living in per-owner token accounts
    Token { mint: Pubkey, decimals: u8 },
}

impl Asset {
    pub fn token(mint: Pubkey, decimals: u8) -> Self {
        Asset::Token { mint, decimals }
    }

    pub fn decimals(&self) -> u8 {
        match self {
            Asset::Native => NATIVE_DECIMALS,
            Asset::Token { decimals, .. } => *decimals,
        }
    }

    /// Mint identifier as seen by the aggregator; the native coin maps to wrapped SOL
    pub fn mint(&self) -> Pubkey {
        match self {
            Asset::Native => spl_token::native_mint::id(),
            Asset::Token { mint, .. } => *mint,
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Asset::Native)
    }

    /// Whether balances of this asset live in an associated token account that
    /// may have to be created. Wrapped SOL is handled by the aggregator itself.
    pub fn needs_sub_account(&self) -> bool {
        match self {
            Asset::Native => false,
            Asset::Token { mint, .. } => *mint != spl_token::native_mint::id(),
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Native => write!(f, "SOL"),
            Asset::Token { mint, .. } => write!(f, "{}", mint),
        }
    }
}

/// Errors produced while converting human-readable amounts
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,

    #[error("malformed amount '{0}'")]
    Malformed(String),

    #[error("amount '{amount}' does not fit in base units at {decimals} decimals")]
    Overflow { amount: String, decimals: u8 },

    #[error("unsupported decimal precision {0} (max {MAX_DECIMALS})")]
    Precision(u8),
}

/// An amount expressed in integer base units together with its precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount {
    base_units: u64,
    decimals: u8,
}

impl TokenAmount {
    pub fn from_base_units(base_units: u64, decimals: u8) -> Self {
        Self {
            base_units,
            decimals,
        }
    }

    /// Parse a plain decimal string ("1.5", ".25", "10") into base units.
    ///
    /// Fractional digits beyond `decimals` are truncated, so the result is
    /// always `floor(amount * 10^decimals)` and never overspends.
    pub fn parse(input: &str, decimals: u8) -> Result<Self, AmountError> {
        if decimals > MAX_DECIMALS {
            return Err(AmountError::Precision(decimals));
        }

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(AmountError::Empty);
        }

        let (whole, frac) = trimmed.split_once('.').unwrap_or((trimmed, ""));
        let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        if (whole.is_empty() && frac.is_empty()) || !all_digits(whole) || !all_digits(frac) {
            return Err(AmountError::Malformed(trimmed.to_string()));
        }

        let overflow = || AmountError::Overflow {
            amount: trimmed.to_string(),
            decimals,
        };

        let scale = 10u128.pow(decimals as u32);
        let whole_units: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| overflow())?
        };

        let kept: String = frac.chars().take(decimals as usize).collect();
        let frac_units: u128 = if kept.is_empty() {
            0
        } else {
            let digits: u128 = kept.parse().map_err(|_| overflow())?;
            digits * 10u128.pow((decimals as usize - kept.len()) as u32)
        };

        let total = whole_units
            .checked_mul(scale)
            .and_then(|v| v.checked_add(frac_units))
            .ok_or_else(overflow)?;
        let base_units = u64::try_from(total).map_err(|_| overflow())?;

        Ok(Self {
            base_units,
            decimals,
        })
    }

    pub fn base_units(&self) -> u64 {
        self.base_units
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn is_zero(&self) -> bool {
        self.base_units == 0
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scale = 10u128.pow(self.decimals as u32);
        let units = self.base_units as u128;
        let whole = units / scale;
        let frac = units % scale;

        if frac == 0 {
            return write!(f, "{}", whole);
        }

        let padded = format!("{:0width$}", frac, width = self.decimals as usize);
        write!(f, "{}.{}", whole, padded.trim_end_matches('0'))
    }
}

/// Password forwarded to the remote signer
///
/// The secret is zeroed when the value is dropped. It is deliberately not
/// `Clone`: every submission attempt consumes the credential it was given.
pub struct Credential(Zeroizing<String>);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Outcome of handing a transaction to the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionResult {
    /// Submitted, no terminal status observed yet
    Pending,
    /// Reached the configured commitment without error
    Confirmed(Signature),
    /// Executed and rejected by the ledger; `reason` is the ledger's text
    Failed { signature: Signature, reason: String },
    /// No terminal status inside the polling window; the transaction may still land
    TimedOut(Signature),
}

impl SubmissionResult {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SubmissionResult::Pending)
    }

    pub fn signature(&self) -> Option<Signature> {
        match self {
            SubmissionResult::Pending => None,
            SubmissionResult::Confirmed(sig) | SubmissionResult::TimedOut(sig) => Some(*sig),
            SubmissionResult::Failed { signature, .. } => Some(*signature),
        }
    }

    /// Collapse into a typed result for callers that only care about success
    pub fn into_result(self) -> Result<Signature, WalletFlowError> {
        match self {
            SubmissionResult::Confirmed(sig) => Ok(sig),
            SubmissionResult::Failed { signature, reason } => Err(WalletFlowError::OnChainRejected {
                signature: Some(signature),
                reason,
            }),
            SubmissionResult::TimedOut(signature) => Err(WalletFlowError::Timeout { signature }),
            SubmissionResult::Pending => Err(WalletFlowError::InvalidInput(
                "submission has no terminal status yet".to_string(),
            )),
        }
    }
}
