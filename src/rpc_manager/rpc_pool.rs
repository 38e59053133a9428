//! Ledger endpoints
//!
//! - [`RpcEndpoint`]: one RPC URL behind the nonblocking `RpcClient`, with a
//!   hard per-call timeout
//! - [`select_endpoint`]: first candidate that answers a liveness probe
//! - [`FailoverLedger`]: routes calls to the active candidate and rotates to
//!   the next one when the active endpoint looks unhealthy

use super::{FreshnessToken, LedgerRpc, RpcManagerError, SignatureState};
use crate::errors::WalletFlowError;
use crate::metrics::metrics;
use async_trait::async_trait;
use itertools::Itertools;
use nonempty::NonEmpty;
use solana_client::client_error::Result as ClientResult;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_rpc_client_api::config::RpcSendTransactionConfig;
use solana_sdk::{
    account::Account,
    commitment_config::CommitmentConfig,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use solana_transaction_status::UiTransactionEncoding;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// A single RPC endpoint
pub struct RpcEndpoint {
    url: String,
    client: RpcClient,
    commitment: CommitmentConfig,
    timeout: Duration,
}

impl RpcEndpoint {
    pub fn new(url: impl Into<String>, commitment: CommitmentConfig, timeout: Duration) -> Self {
        let url = url.into();
        let client = RpcClient::new_with_timeout_and_commitment(url.clone(), timeout, commitment);
        Self {
            url,
            client,
            commitment,
            timeout,
        }
    }

    /// Run one client call under the endpoint timeout and classify failures
    async fn call<T, Fut>(&self, fut: Fut) -> Result<T, RpcManagerError>
    where
        Fut: Future<Output = ClientResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(RpcManagerError::from_client_error(err, &self.url)),
            Err(_) => Err(RpcManagerError::Timeout {
                endpoint: self.url.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl LedgerRpc for RpcEndpoint {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn get_account_info(&self, address: &Pubkey) -> Result<Option<Account>, RpcManagerError> {
        let response = self
            .call(self.client.get_account_with_commitment(address, self.commitment))
            .await?;
        Ok(response.value)
    }

    async fn get_latest_blockhash(&self) -> Result<FreshnessToken, RpcManagerError> {
        let (blockhash, last_valid_block_height) = self
            .call(self.client.get_latest_blockhash_with_commitment(self.commitment))
            .await?;
        Ok(FreshnessToken {
            blockhash,
            last_valid_block_height,
        })
    }

    async fn submit_raw(&self, signed_tx: &[u8]) -> Result<Signature, RpcManagerError> {
        let tx: VersionedTransaction = bincode::deserialize(signed_tx)
            .map_err(|e| RpcManagerError::Validation(format!("signed transaction does not decode: {}", e)))?;

        let config = RpcSendTransactionConfig {
            skip_preflight: false,
            preflight_commitment: Some(self.commitment.commitment),
            encoding: Some(UiTransactionEncoding::Base64),
            ..RpcSendTransactionConfig::default()
        };

        self.call(self.client.send_transaction_with_config(&tx, config)).await
    }

    async fn get_signature_status(&self, signature: &Signature) -> Result<SignatureState, RpcManagerError> {
        let response = self
            .call(self.client.get_signature_statuses(&[*signature]))
            .await?;

        let state = match response.value.into_iter().next().flatten() {
            None => SignatureState::Unknown,
            Some(status) => match &status.err {
                Some(err) => SignatureState::Failed(err.to_string()),
                None if status.satisfies_commitment(self.commitment) => SignatureState::Confirmed,
                None => SignatureState::Processing,
            },
        };
        Ok(state)
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64, RpcManagerError> {
        let response = self
            .call(self.client.get_balance_with_commitment(address, self.commitment))
            .await?;
        Ok(response.value)
    }

    async fn probe(&self) -> Result<(), RpcManagerError> {
        let version = self.call(self.client.get_version()).await?;
        debug!(url = %self.url, version = %version.solana_core, "Liveness probe succeeded");
        Ok(())
    }
}

/// Index of the first candidate answering its liveness probe
async fn select_index(candidates: &[Arc<dyn LedgerRpc>]) -> Result<usize, WalletFlowError> {
    for (idx, candidate) in candidates.iter().enumerate() {
        match candidate.probe().await {
            Ok(()) => {
                info!(url = %candidate.endpoint(), "Selected ledger endpoint");
                return Ok(idx);
            }
            Err(err) => {
                warn!(url = %candidate.endpoint(), error = %err, "Endpoint failed liveness probe");
            }
        }
    }

    warn!(
        endpoints = %candidates.iter().map(|c| c.endpoint()).join(", "),
        "No ledger endpoint answered"
    );
    Err(WalletFlowError::NoEndpointAvailable {
        tried: candidates.len(),
    })
}

/// Try candidates in order and return the first one that answers a probe
pub async fn select_endpoint(
    candidates: &[Arc<dyn LedgerRpc>],
) -> Result<Arc<dyn LedgerRpc>, WalletFlowError> {
    let idx = select_index(candidates).await?;
    Ok(Arc::clone(&candidates[idx]))
}

/// Ledger capability spread over an ordered list of candidate endpoints
///
/// Calls go to the active endpoint. A transport failure, timeout or rate
/// limit rotates the active index so the caller's next retry lands on the
/// following candidate.
pub struct FailoverLedger {
    candidates: Vec<Arc<dyn LedgerRpc>>,
    active: AtomicUsize,
}

impl FailoverLedger {
    pub fn new(candidates: NonEmpty<Arc<dyn LedgerRpc>>) -> Self {
        Self {
            candidates: candidates.into(),
            active: AtomicUsize::new(0),
        }
    }

    /// Build the failover set with the first live candidate as active endpoint
    #[instrument(skip(candidates), fields(total = candidates.len()))]
    pub async fn connect(candidates: NonEmpty<Arc<dyn LedgerRpc>>) -> Result<Self, WalletFlowError> {
        let ledger = Self::new(candidates);
        let idx = select_index(&ledger.candidates).await?;
        ledger.active.store(idx, Ordering::SeqCst);
        Ok(ledger)
    }

    pub fn active_index(&self) -> usize {
        self.active.load(Ordering::SeqCst) % self.candidates.len()
    }

    fn current(&self) -> (usize, Arc<dyn LedgerRpc>) {
        let idx = self.active_index();
        (idx, Arc::clone(&self.candidates[idx]))
    }

    fn note_failure(&self, idx: usize, err: &RpcManagerError) {
        if !err.is_endpoint_failure() || self.candidates.len() < 2 {
            return;
        }
        let next = (idx + 1) % self.candidates.len();
        if self
            .active
            .compare_exchange(idx, next, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            metrics().endpoint_rotations.inc();
            warn!(
                from = %self.candidates[idx].endpoint(),
                to = %self.candidates[next].endpoint(),
                error = %err,
                "Rotating ledger endpoint"
            );
        }
    }

    async fn route<T, F, Fut>(&self, op: F) -> Result<T, RpcManagerError>
    where
        F: FnOnce(Arc<dyn LedgerRpc>) -> Fut,
        Fut: Future<Output = Result<T, RpcManagerError>>,
    {
        let (idx, rpc) = self.current();
        let result = op(rpc).await;
        if let Err(err) = &result {
            self.note_failure(idx, err);
        }
        result
    }
}

#[async_trait]
impl LedgerRpc for FailoverLedger {
    fn endpoint(&self) -> &str {
        self.candidates[self.active_index()].endpoint()
    }

    async fn get_account_info(&self, address: &Pubkey) -> Result<Option<Account>, RpcManagerError> {
        let address = *address;
        self.route(|rpc| async move { rpc.get_account_info(&address).await })
            .await
    }

    async fn get_latest_blockhash(&self) -> Result<FreshnessToken, RpcManagerError> {
        self.route(|rpc| async move { rpc.get_latest_blockhash().await })
            .await
    }

    async fn submit_raw(&self, signed_tx: &[u8]) -> Result<Signature, RpcManagerError> {
        let bytes = signed_tx.to_vec();
        self.route(|rpc| async move { rpc.submit_raw(&bytes).await })
            .await
    }

    async fn get_signature_status(&self, signature: &Signature) -> Result<SignatureState, RpcManagerError> {
        let signature = *signature;
        self.route(|rpc| async move { rpc.get_signature_status(&signature).await })
            .await
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64, RpcManagerError> {
        let address = *address;
        self.route(|rpc| async move { rpc.get_balance(&address).await })
            .await
    }

    async fn probe(&self) -> Result<(), RpcManagerError> {
        self.route(|rpc| async move { rpc.probe().await }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc_manager::{with_retry, RetryPolicy};
    use crate::test_utils::FakeLedger;

    fn candidates(ledgers: &[Arc<FakeLedger>]) -> NonEmpty<Arc<dyn LedgerRpc>> {
        let list: Vec<Arc<dyn LedgerRpc>> = ledgers
            .iter()
            .map(|l| Arc::clone(l) as Arc<dyn LedgerRpc>)
            .collect();
        NonEmpty::from_vec(list).unwrap()
    }

    #[tokio::test]
    async fn test_select_endpoint_skips_dead_candidates() {
        let dead = Arc::new(FakeLedger::with_endpoint("http://dead"));
        dead.set_alive(false);
        let live = Arc::new(FakeLedger::with_endpoint("http://live"));

        let list: Vec<Arc<dyn LedgerRpc>> = vec![dead.clone(), live.clone()];
        let selected = select_endpoint(&list).await.unwrap();
        assert_eq!(selected.endpoint(), "http://live");
    }

    #[tokio::test]
    async fn test_select_endpoint_none_alive() {
        let a = Arc::new(FakeLedger::with_endpoint("http://a"));
        let b = Arc::new(FakeLedger::with_endpoint("http://b"));
        a.set_alive(false);
        b.set_alive(false);

        let list: Vec<Arc<dyn LedgerRpc>> = vec![a, b];
        match select_endpoint(&list).await {
            Err(WalletFlowError::NoEndpointAvailable { tried }) => assert_eq!(tried, 2),
            other => panic!("unexpected {:?}", other.map(|r| r.endpoint().to_string())),
        }
    }

    #[tokio::test]
    async fn test_failover_connect_starts_on_first_live() {
        let dead = Arc::new(FakeLedger::with_endpoint("http://primary"));
        dead.set_alive(false);
        let backup = Arc::new(FakeLedger::with_endpoint("http://backup"));

        let ledger = FailoverLedger::connect(candidates(&[dead, backup])).await.unwrap();
        assert_eq!(ledger.endpoint(), "http://backup");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_rotates_and_retry_lands_on_backup() {
        let primary = Arc::new(FakeLedger::with_endpoint("http://primary"));
        primary.fail_blockhash_fetches(u32::MAX);
        let backup = Arc::new(FakeLedger::with_endpoint("http://backup"));

        let ledger = FailoverLedger::new(candidates(&[primary.clone(), backup.clone()]));
        let token = with_retry("get_latest_blockhash", &RetryPolicy::default(), || {
            ledger.get_latest_blockhash()
        })
        .await
        .unwrap();

        assert_eq!(token, backup.current_token());
        assert_eq!(ledger.active_index(), 1);
        assert_eq!(primary.blockhash_calls(), 1);
        assert_eq!(backup.blockhash_calls(), 1);
    }

    #[tokio::test]
    async fn test_failover_keeps_endpoint_on_request_errors() {
        let primary = Arc::new(FakeLedger::with_endpoint("http://primary"));
        let backup = Arc::new(FakeLedger::with_endpoint("http://backup"));
        let ledger = FailoverLedger::new(candidates(&[primary, backup]));

        // Garbage bytes are a request problem, not an endpoint problem
        assert!(ledger.submit_raw(&[1, 2, 3]).await.is_err());
        assert_eq!(ledger.active_index(), 0);
    }
}
