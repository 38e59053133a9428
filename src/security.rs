//! Input validation applied before any network call

use crate::errors::WalletFlowError;
use crate::tx_builder::MAX_MEMO_BYTES;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use url::Url;

/// Parse a base58 address typed or pasted by the user
pub fn parse_address(input: &str) -> Result<Pubkey, WalletFlowError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(WalletFlowError::invalid_input("address is empty"));
    }
    Pubkey::from_str(trimmed)
        .map_err(|e| WalletFlowError::invalid_input(format!("'{}' is not a valid address: {}", trimmed, e)))
}

/// Program and sysvar addresses nobody can hold a balance at
pub fn is_system_address(pubkey: &Pubkey) -> bool {
    *pubkey == solana_sdk::system_program::id()
        || *pubkey == spl_token::id()
        || *pubkey == spl_associated_token_account::id()
}

/// Address that may receive a transfer from `sender`
pub fn validate_recipient(recipient: &Pubkey, sender: &Pubkey) -> Result<(), WalletFlowError> {
    if recipient == sender {
        return Err(WalletFlowError::invalid_input("recipient is the sending account"));
    }
    if is_system_address(recipient) {
        return Err(WalletFlowError::invalid_input(format!(
            "{} is a program address, not a wallet",
            recipient
        )));
    }
    Ok(())
}

pub fn validate_memo(memo: &str) -> Result<(), WalletFlowError> {
    if memo.len() > MAX_MEMO_BYTES {
        return Err(WalletFlowError::invalid_input(format!(
            "memo is {} bytes, limit is {}",
            memo.len(),
            MAX_MEMO_BYTES
        )));
    }
    Ok(())
}

/// Payment callbacks only go to http(s) URLs with a host
pub fn validate_callback_url(input: &str) -> Result<Url, WalletFlowError> {
    let url = Url::parse(input.trim())
        .map_err(|e| WalletFlowError::invalid_input(format!("invalid callback URL: {}", e)))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        scheme => Err(WalletFlowError::invalid_input(format!(
            "callback URL scheme '{}' is not allowed",
            scheme
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        let key = Pubkey::new_unique();
        assert_eq!(parse_address(&format!(" {} ", key)).unwrap(), key);
        assert!(parse_address("").is_err());
        assert!(parse_address("0OIl").is_err());
    }

    #[test]
    fn test_recipient_rules() {
        let me = Pubkey::new_unique();
        assert!(validate_recipient(&me, &me).is_err());
        assert!(validate_recipient(&spl_token::id(), &me).is_err());
        assert!(validate_recipient(&Pubkey::new_unique(), &me).is_ok());
    }

    #[test]
    fn test_memo_limit_is_bytes() {
        assert!(validate_memo(&"a".repeat(MAX_MEMO_BYTES)).is_ok());
        // 2 bytes per character
        assert!(validate_memo(&"é".repeat(MAX_MEMO_BYTES / 2 + 1)).is_err());
    }

    #[test]
    fn test_callback_scheme() {
        assert!(validate_callback_url("https://shop.example/paid").is_ok());
        assert!(validate_callback_url("http://localhost:8080/cb").is_ok());
        assert!(validate_callback_url("ftp://shop.example/paid").is_err());
        assert!(validate_callback_url("javascript:alert(1)").is_err());
    }
}
