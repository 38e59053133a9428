//! Structured lifecycle events for user actions

use crate::observability::CorrelationId;
use solana_sdk::{pubkey::Pubkey, signature::Signature};

/// Structured logger for one action's lifecycle events
#[derive(Debug, Clone)]
pub struct FlowLogger {
    correlation_id: CorrelationId,
}

impl FlowLogger {
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self { correlation_id }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn log_build(&self, fee_payer: &Pubkey, instructions: usize, last_valid_block_height: u64) {
        tracing::debug!(
            correlation_id = %self.correlation_id,
            fee_payer = %fee_payer,
            instructions,
            last_valid_block_height,
            "Transaction built"
        );
    }

    pub fn log_signing_requested(&self, fee_payer: &Pubkey) {
        tracing::debug!(
            correlation_id = %self.correlation_id,
            fee_payer = %fee_payer,
            "Requesting signature"
        );
    }

    pub fn log_submitted(&self, signature: &Signature) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            signature = %signature,
            "Transaction submitted"
        );
    }

    pub fn log_confirmed(&self, signature: &Signature, latency_ms: u64) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            signature = %signature,
            latency_ms,
            "Transaction confirmed"
        );
    }

    pub fn log_failed(&self, kind: &str, error: &str) {
        tracing::warn!(
            correlation_id = %self.correlation_id,
            kind,
            error = %error,
            "Action failed"
        );
    }

    pub fn log_timed_out(&self, signature: &Signature) {
        tracing::warn!(
            correlation_id = %self.correlation_id,
            signature = %signature,
            "Confirmation not observed in time; transaction may still land"
        );
    }

    pub fn log_account_setup(&self, owner: &Pubkey, missing: usize) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            owner = %owner,
            missing,
            "Token account setup required"
        );
    }

    pub fn log_quote_applied(&self, revision: u64, in_amount: u64, out_amount: u64) {
        tracing::debug!(
            correlation_id = %self.correlation_id,
            revision,
            in_amount,
            out_amount,
            "Quote applied"
        );
    }

    pub fn log_quote_discarded(&self, revision: u64) {
        tracing::debug!(
            correlation_id = %self.correlation_id,
            revision,
            "Quote superseded by a newer edit"
        );
    }

    pub fn log_webhook(&self, url: &str, delivered: bool, detail: &str) {
        if delivered {
            tracing::info!(
                correlation_id = %self.correlation_id,
                url = %url,
                "Payment callback delivered"
            );
        } else {
            tracing::warn!(
                correlation_id = %self.correlation_id,
                url = %url,
                detail = %detail,
                "Payment callback failed"
            );
        }
    }
}

impl Default for FlowLogger {
    fn default() -> Self {
        Self::new(CorrelationId::new())
    }
}
