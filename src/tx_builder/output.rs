//! Transaction build output
//!
//! [`UnsignedTransaction`] is what the builder hands to the submission
//! pipeline: a compiled message with placeholder signatures, the fee payer,
//! and the freshness token it was compiled against. It crosses the signer
//! boundary as base64 of the bincode wire format.

use crate::rpc_manager::FreshnessToken;
use crate::tx_builder::errors::TransactionBuilderError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use solana_sdk::{
    message::VersionedMessage,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};

/// Compiled, not yet signed transaction
#[derive(Debug, Clone, PartialEq)]
pub struct UnsignedTransaction {
    /// Signatures are all `Signature::default()` until the signer fills them
    pub tx: VersionedTransaction,
    pub fee_payer: Pubkey,
    pub freshness: FreshnessToken,
}

impl UnsignedTransaction {
    pub fn new(message: VersionedMessage, fee_payer: Pubkey, freshness: FreshnessToken) -> Self {
        let required = message.header().num_required_signatures as usize;
        Self {
            tx: VersionedTransaction {
                signatures: vec![Signature::default(); required],
                message,
            },
            fee_payer,
            freshness,
        }
    }

    pub fn message(&self) -> &VersionedMessage {
        &self.tx.message
    }

    /// Static account keys of the compiled message (lookup table entries excluded)
    pub fn account_keys(&self) -> &[Pubkey] {
        self.tx.message.static_account_keys()
    }

    /// Static keys the transaction may write to (balances that change on success)
    pub fn writable_accounts(&self) -> Vec<Pubkey> {
        let header = self.tx.message.header();
        let keys = self.account_keys();
        let signed = header.num_required_signatures as usize;
        let signed_writable = signed.saturating_sub(header.num_readonly_signed_accounts as usize);
        let unsigned_writable_end = keys
            .len()
            .saturating_sub(header.num_readonly_unsigned_accounts as usize);

        keys.iter()
            .enumerate()
            .filter(|(i, _)| *i < signed_writable || (*i >= signed && *i < unsigned_writable_end))
            .map(|(_, key)| *key)
            .collect()
    }

    pub fn last_valid_block_height(&self) -> u64 {
        self.freshness.last_valid_block_height
    }

    /// Wire bytes, base64 encoded, as the signer expects them
    pub fn to_base64(&self) -> Result<String, TransactionBuilderError> {
        let bytes = bincode::serialize(&self.tx)?;
        Ok(STANDARD.encode(bytes))
    }
}

/// A signed transaction returned by the signer, checked against what was sent
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub bytes: Vec<u8>,
    pub signature: Signature,
}

impl SignedTransaction {
    /// Decode the signer's base64 payload and verify it signs `expected`.
    ///
    /// The message must be byte-identical to the unsigned one and the fee
    /// payer signature must be present.
    pub fn decode(payload: &str, expected: &UnsignedTransaction) -> Result<Self, TransactionBuilderError> {
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| TransactionBuilderError::Serialization(format!("signed payload is not base64: {}", e)))?;
        let tx: VersionedTransaction = bincode::deserialize(&bytes)?;

        if tx.message != expected.tx.message {
            return Err(TransactionBuilderError::internal(
                "signed transaction does not match the transaction sent for signing",
            ));
        }

        let signature = tx
            .signatures
            .first()
            .copied()
            .filter(|sig| *sig != Signature::default())
            .ok_or_else(|| TransactionBuilderError::internal("signed transaction carries no fee payer signature"))?;

        Ok(Self { bytes, signature })
    }
}
