//! Submission pipeline, remote signer and payment callbacks

use solana_sdk::pubkey::Pubkey;

pub mod pipeline;
pub mod signer;
pub mod webhook;

pub use pipeline::SubmissionPipeline;
pub use signer::{HttpSigner, RemoteSigner, SignerError};
pub use webhook::WebhookNotifier;

/// Hook invoked with the writable accounts of a confirmed transaction so a
/// collaborator can reload the balances shown to the user
pub trait BalanceRefresher: Send + Sync {
    fn refresh(&self, accounts: &[Pubkey]);
}
