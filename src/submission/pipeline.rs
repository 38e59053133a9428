//! Sign, submit, confirm
//!
//! base64 → signer → `submit_raw` → `poll_until`. The credential is only
//! borrowed: the public operations own it for exactly one user action and
//! drop (zero) it when that action returns, whatever the outcome.

use super::signer::RemoteSigner;
use super::BalanceRefresher;
use crate::errors::WalletFlowError;
use crate::metrics::metrics;
use crate::rpc_manager::{poll_until, LedgerRpc, PollOptions};
use crate::structured_logging::FlowLogger;
use crate::tx_builder::{InstructionPlan, SignedTransaction, TransactionBuilder, UnsignedTransaction};
use crate::types::{Credential, SubmissionResult};
use dashmap::DashSet;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::warn;

pub struct SubmissionPipeline {
    rpc: Arc<dyn LedgerRpc>,
    builder: TransactionBuilder,
    signer: Arc<dyn RemoteSigner>,
    poll: PollOptions,
    refresher: Option<Arc<dyn BalanceRefresher>>,
    in_flight: DashSet<Pubkey>,
}

impl SubmissionPipeline {
    pub fn new(
        rpc: Arc<dyn LedgerRpc>,
        builder: TransactionBuilder,
        signer: Arc<dyn RemoteSigner>,
        poll: PollOptions,
    ) -> Self {
        Self {
            rpc,
            builder,
            signer,
            poll,
            refresher: None,
            in_flight: DashSet::new(),
        }
    }

    /// Notify `refresher` with the writable accounts of every confirmed transaction
    pub fn with_refresher(mut self, refresher: Arc<dyn BalanceRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn builder(&self) -> &TransactionBuilder {
        &self.builder
    }

    /// Whether a submission for `fee_payer` is between signing and a terminal status
    pub fn is_in_flight(&self, fee_payer: &Pubkey) -> bool {
        self.in_flight.contains(fee_payer)
    }

    /// Sign and submit an already built transaction, then wait for a terminal status.
    ///
    /// `Err` means nothing reached the ledger (or the ledger refused it at
    /// submission); `Ok` carries the confirmation outcome.
    pub async fn submit(
        &self,
        tx: &UnsignedTransaction,
        credential: &Credential,
        log: &FlowLogger,
    ) -> Result<SubmissionResult, WalletFlowError> {
        let payer = tx.fee_payer;
        if !self.in_flight.insert(payer) {
            return Err(WalletFlowError::SubmissionInFlight { payer });
        }
        let _guard = scopeguard::guard((), |_| {
            self.in_flight.remove(&payer);
        });

        let signature = self.sign_and_send(tx, credential, log).await?;
        Ok(self.confirm(tx, signature, log).await)
    }

    /// Build from `plan`, sign, submit and confirm.
    ///
    /// If the freshness token expires while the signer works, the
    /// transaction is rebuilt once against a new token and signed again with
    /// the same credential. A second expiry is reported as
    /// [`WalletFlowError::FreshnessExpired`].
    pub async fn build_and_submit(
        &self,
        plan: &InstructionPlan,
        fee_payer: &Pubkey,
        lookup_tables: &[Pubkey],
        credential: &Credential,
        log: &FlowLogger,
    ) -> Result<SubmissionResult, WalletFlowError> {
        self.build_and_submit_with(plan, fee_payer, lookup_tables, credential, log, |_| {})
            .await
    }

    /// [`build_and_submit`](Self::build_and_submit), calling `on_submitted`
    /// once the ledger has accepted the transaction and polling begins
    pub async fn build_and_submit_with<F>(
        &self,
        plan: &InstructionPlan,
        fee_payer: &Pubkey,
        lookup_tables: &[Pubkey],
        credential: &Credential,
        log: &FlowLogger,
        on_submitted: F,
    ) -> Result<SubmissionResult, WalletFlowError>
    where
        F: FnOnce(&Signature) + Send,
    {
        let payer = *fee_payer;
        if !self.in_flight.insert(payer) {
            return Err(WalletFlowError::SubmissionInFlight { payer });
        }
        let _guard = scopeguard::guard((), |_| {
            self.in_flight.remove(&payer);
        });

        let mut rebuilt = false;
        let (tx, signature) = loop {
            let tx = self
                .builder
                .build_with_lookup_tables(plan, fee_payer, lookup_tables)
                .await?;
            log.log_build(fee_payer, plan.len(), tx.last_valid_block_height());

            match self.sign_and_send(&tx, credential, log).await {
                Ok(signature) => break (tx, signature),
                Err(WalletFlowError::FreshnessExpired) if !rebuilt => {
                    warn!(
                        correlation_id = %log.correlation_id(),
                        last_valid_block_height = tx.last_valid_block_height(),
                        "Freshness token expired before submission, rebuilding"
                    );
                    metrics().freshness_rebuilds.inc();
                    rebuilt = true;
                }
                Err(err) => return Err(err),
            }
        };

        on_submitted(&signature);
        Ok(self.confirm(&tx, signature, log).await)
    }

    async fn sign_and_send(
        &self,
        tx: &UnsignedTransaction,
        credential: &Credential,
        log: &FlowLogger,
    ) -> Result<Signature, WalletFlowError> {
        let payload = tx.to_base64()?;

        log.log_signing_requested(&tx.fee_payer);
        let signed_payload = self.signer.sign(credential, &payload).await?;
        let signed = SignedTransaction::decode(&signed_payload, tx)
            .map_err(|e| WalletFlowError::SignerUnavailable(format!("unusable signed transaction: {}", e)))?;

        let signature = self.rpc.submit_raw(&signed.bytes).await?;
        if signature != signed.signature {
            warn!(
                returned = %signature,
                signed = %signed.signature,
                "Ledger returned a different signature than the one signed"
            );
        }

        metrics().submissions_total.inc();
        log.log_submitted(&signature);
        Ok(signature)
    }

    async fn confirm(&self, tx: &UnsignedTransaction, signature: Signature, log: &FlowLogger) -> SubmissionResult {
        let started = Instant::now();
        let result = poll_until(self.rpc.as_ref(), &signature, &self.poll).await;

        match &result {
            SubmissionResult::Confirmed(sig) => {
                let elapsed = started.elapsed();
                metrics().confirmations_total.inc();
                metrics().confirmation_latency.observe(elapsed.as_secs_f64());
                log.log_confirmed(sig, elapsed.as_millis() as u64);
                if let Some(refresher) = &self.refresher {
                    refresher.refresh(&tx.writable_accounts());
                }
            }
            SubmissionResult::Failed { reason, .. } => {
                metrics().record_failure("on_chain_rejected");
                log.log_failed("on_chain_rejected", reason);
            }
            SubmissionResult::TimedOut(sig) => {
                metrics().timeouts_total.inc();
                log.log_timed_out(sig);
            }
            SubmissionResult::Pending => {}
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc_manager::{RetryPolicy, RpcManagerError, SignatureState};
    use crate::test_utils::{FakeLedger, FakeSigner};
    use crate::tx_builder::instructions::native_transfer;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Harness {
        ledger: Arc<FakeLedger>,
        signer: Arc<FakeSigner>,
        pipeline: SubmissionPipeline,
    }

    fn harness(signer: FakeSigner) -> Harness {
        let ledger = Arc::new(FakeLedger::new());
        let signer = Arc::new(signer);
        let builder = TransactionBuilder::new(ledger.clone(), RetryPolicy::default());
        let pipeline = SubmissionPipeline::new(ledger.clone(), builder, signer.clone(), PollOptions::default());
        Harness {
            ledger,
            signer,
            pipeline,
        }
    }

    fn transfer_plan(payer: &Pubkey) -> InstructionPlan {
        let mut plan = InstructionPlan::new();
        plan.push_core(native_transfer(payer, &Pubkey::new_unique(), 42, &[]));
        plan
    }

    #[derive(Default)]
    struct RecordingRefresher(Mutex<Vec<Pubkey>>);

    impl BalanceRefresher for RecordingRefresher {
        fn refresh(&self, accounts: &[Pubkey]) {
            self.0.lock().extend_from_slice(accounts);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_confirms_and_forwards_credential() {
        let h = harness(FakeSigner::new());
        let payer = Pubkey::new_unique();

        let result = h
            .pipeline
            .build_and_submit(&transfer_plan(&payer), &payer, &[], &Credential::new("pw"), &FlowLogger::default())
            .await
            .unwrap();

        let sig = match result {
            SubmissionResult::Confirmed(sig) => sig,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(h.ledger.submitted(), vec![sig]);
        assert_eq!(h.signer.credentials_seen(), vec!["pw".to_string()]);
        assert!(!h.pipeline.is_in_flight(&payer));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_never_reaches_ledger() {
        let h = harness(FakeSigner::auth_failure());
        let payer = Pubkey::new_unique();

        let err = h
            .pipeline
            .build_and_submit(&transfer_plan(&payer), &payer, &[], &Credential::new("wrong"), &FlowLogger::default())
            .await
            .unwrap_err();

        assert!(matches!(err, WalletFlowError::AuthFailed));
        assert!(h.ledger.submitted().is_empty());
        assert_eq!(h.signer.calls(), 1);
        assert!(!h.pipeline.is_in_flight(&payer));
    }

    #[tokio::test(start_paused = true)]
    async fn test_signer_outage_is_unavailable() {
        let h = harness(FakeSigner::unavailable());
        let payer = Pubkey::new_unique();

        let err = h
            .pipeline
            .build_and_submit(&transfer_plan(&payer), &payer, &[], &Credential::new("pw"), &FlowLogger::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WalletFlowError::SignerUnavailable(_)));
        assert_eq!(h.signer.calls(), 1);
        assert!(h.ledger.submitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_rebuilds_once() {
        let h = harness(FakeSigner::new());
        let payer = Pubkey::new_unique();
        h.ledger.fail_next_submission(RpcManagerError::BlockhashNotFound {
            endpoint: "fake".into(),
        });

        let result = h
            .pipeline
            .build_and_submit(&transfer_plan(&payer), &payer, &[], &Credential::new("pw"), &FlowLogger::default())
            .await
            .unwrap();

        assert!(matches!(result, SubmissionResult::Confirmed(_)));
        assert_eq!(h.ledger.blockhash_calls(), 2);
        assert_eq!(h.signer.calls(), 2);
        assert_eq!(h.ledger.submitted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_expiry_surfaces_freshness_expired() {
        let h = harness(FakeSigner::new());
        let payer = Pubkey::new_unique();
        for _ in 0..2 {
            h.ledger.fail_next_submission(RpcManagerError::TransactionExpired {
                endpoint: "fake".into(),
            });
        }

        let err = h
            .pipeline
            .build_and_submit(&transfer_plan(&payer), &payer, &[], &Credential::new("pw"), &FlowLogger::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WalletFlowError::FreshnessExpired));
        assert_eq!(h.signer.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_terminal_status_is_timed_out() {
        let h = harness(FakeSigner::new());
        h.ledger.set_auto_confirm(false);
        let payer = Pubkey::new_unique();

        let result = h
            .pipeline
            .build_and_submit(&transfer_plan(&payer), &payer, &[], &Credential::new("pw"), &FlowLogger::default())
            .await
            .unwrap();

        assert!(matches!(result, SubmissionResult::TimedOut(_)));
        assert!(matches!(
            result.into_result(),
            Err(WalletFlowError::Timeout { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_chain_failure_carries_reason() {
        let h = harness(FakeSigner::new());
        let payer = Pubkey::new_unique();
        let tx = h.pipeline.builder().build(&transfer_plan(&payer), &payer).await.unwrap();
        let expected_sig = h.signer.signature_for(&payer);
        h.ledger.script_statuses(
            expected_sig,
            vec![SignatureState::Processing, SignatureState::Failed("custom program error: 0x1".into())],
        );

        let result = h
            .pipeline
            .submit(&tx, &Credential::new("pw"), &FlowLogger::default())
            .await
            .unwrap();
        match result {
            SubmissionResult::Failed { signature, reason } => {
                assert_eq!(signature, expected_sig);
                assert!(reason.contains("0x1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_submission_for_same_payer_is_refused() {
        let h = harness(FakeSigner::new().with_latency(Duration::from_secs(2)));
        let payer = Pubkey::new_unique();
        let plan = transfer_plan(&payer);
        let log = FlowLogger::default();
        let (cred_a, cred_b) = (Credential::new("pw"), Credential::new("pw"));

        let first = h.pipeline.build_and_submit(&plan, &payer, &[], &cred_a, &log);
        let second = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(h.pipeline.is_in_flight(&payer));
            h.pipeline
                .build_and_submit(&plan, &payer, &[], &cred_b, &log)
                .await
        };
        let (first, second) = tokio::join!(first, second);

        assert!(matches!(first, Ok(SubmissionResult::Confirmed(_))));
        assert!(matches!(second, Err(WalletFlowError::SubmissionInFlight { .. })));
        assert_eq!(h.signer.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresher_sees_writable_accounts() {
        let ledger = Arc::new(FakeLedger::new());
        let refresher = Arc::new(RecordingRefresher::default());
        let builder = TransactionBuilder::new(ledger.clone(), RetryPolicy::default());
        let pipeline = SubmissionPipeline::new(ledger, builder, Arc::new(FakeSigner::new()), PollOptions::default())
            .with_refresher(refresher.clone());
        let payer = Pubkey::new_unique();
        let recipient = Pubkey::new_unique();
        let mut plan = InstructionPlan::new();
        plan.push_core(native_transfer(&payer, &recipient, 1, &[]));

        pipeline
            .build_and_submit(&plan, &payer, &[], &Credential::new("pw"), &FlowLogger::default())
            .await
            .unwrap();

        let refreshed = refresher.0.lock().clone();
        assert_eq!(refreshed, vec![payer, recipient]);
    }
}
