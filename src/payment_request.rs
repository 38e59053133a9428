//! Solana Pay transfer request URLs
//!
//! `solana:<recipient>?amount=<decimal>&spl-token=<mint>&reference=<key>&label=..&message=..&memo=..&url=..`
//!
//! `reference` may repeat. `url` is the merchant callback notified with the
//! signature once the payment is confirmed.

use crate::errors::WalletFlowError;
use crate::security::{parse_address, validate_callback_url, validate_memo};
use solana_sdk::pubkey::Pubkey;
use url::Url;

pub const SCHEME: &str = "solana";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub recipient: Pubkey,
    /// Decimal amount in user units of the requested asset
    pub amount: Option<String>,
    /// Token mint; `None` requests native SOL
    pub spl_token: Option<Pubkey>,
    pub references: Vec<Pubkey>,
    pub label: Option<String>,
    pub message: Option<String>,
    pub memo: Option<String>,
    pub callback: Option<Url>,
}

impl PaymentRequest {
    pub fn parse(input: &str) -> Result<Self, WalletFlowError> {
        let url = Url::parse(input.trim())
            .map_err(|e| WalletFlowError::invalid_input(format!("invalid payment URL: {}", e)))?;
        if url.scheme() != SCHEME {
            return Err(WalletFlowError::invalid_input(format!(
                "payment URL scheme must be '{}', got '{}'",
                SCHEME,
                url.scheme()
            )));
        }

        let recipient = parse_address(url.path())?;
        let mut request = PaymentRequest {
            recipient,
            amount: None,
            spl_token: None,
            references: Vec::new(),
            label: None,
            message: None,
            memo: None,
            callback: None,
        };

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "amount" => {
                    validate_decimal(&value)?;
                    set_once(&mut request.amount, "amount", value.into_owned())?;
                }
                "spl-token" => set_once(&mut request.spl_token, "spl-token", parse_address(&value)?)?,
                "reference" => request.references.push(parse_address(&value)?),
                "label" => set_once(&mut request.label, "label", value.into_owned())?,
                "message" => set_once(&mut request.message, "message", value.into_owned())?,
                "memo" => {
                    validate_memo(&value)?;
                    set_once(&mut request.memo, "memo", value.into_owned())?;
                }
                "url" => set_once(&mut request.callback, "url", validate_callback_url(&value)?)?,
                // Unknown parameters are ignored for forward compatibility
                _ => {}
            }
        }

        Ok(request)
    }
}

fn set_once<T>(slot: &mut Option<T>, name: &str, value: T) -> Result<(), WalletFlowError> {
    if slot.is_some() {
        return Err(WalletFlowError::invalid_input(format!("'{}' given more than once", name)));
    }
    *slot = Some(value);
    Ok(())
}

/// Non-negative plain decimal: digits with at most one interior point
fn validate_decimal(value: &str) -> Result<(), WalletFlowError> {
    let (whole, fraction) = match value.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (value, None),
    };
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if digits(whole) && fraction.map_or(true, digits) {
        Ok(())
    } else {
        Err(WalletFlowError::invalid_input(format!("'{}' is not a valid amount", value)))
    }
}
