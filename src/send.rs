//! Native and token sends, and Solana Pay payments built on them

use crate::balances::Balances;
use crate::errors::WalletFlowError;
use crate::metrics::metrics;
use crate::observability::{action_span, CorrelationId};
use crate::payment_request::PaymentRequest;
use crate::security::{parse_address, validate_memo, validate_recipient};
use crate::structured_logging::FlowLogger;
use crate::submission::{SubmissionPipeline, WebhookNotifier};
use crate::tx_builder::{
    memo_instruction, native_transfer, token_transfer, AccountProvisioner, InstructionPlan, TokenTransfer,
};
use crate::types::{Asset, Credential, SubmissionResult, TokenAmount};
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};

/// Fully validated transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub asset: Asset,
    pub recipient: Pubkey,
    pub amount: TokenAmount,
    pub memo: Option<String>,
    /// Solana Pay reference keys, attached read-only to the transfer
    pub references: Vec<Pubkey>,
}

/// Outcome of a payment plus the pending merchant callback, if any
#[derive(Debug)]
pub struct PaymentReceipt {
    pub result: SubmissionResult,
    pub callback: Option<JoinHandle<()>>,
}

pub struct SendFlow {
    owner: Pubkey,
    provisioner: AccountProvisioner,
    balances: Balances,
    pipeline: Arc<SubmissionPipeline>,
    assets: HashMap<Pubkey, Asset>,
    memo_prefix: Option<String>,
    notifier: WebhookNotifier,
}

impl SendFlow {
    pub fn new(
        owner: Pubkey,
        provisioner: AccountProvisioner,
        balances: Balances,
        pipeline: Arc<SubmissionPipeline>,
    ) -> Self {
        Self {
            owner,
            provisioner,
            balances,
            pipeline,
            assets: HashMap::new(),
            memo_prefix: None,
            notifier: WebhookNotifier::default(),
        }
    }

    /// Tokens payment requests may ask for, keyed by mint
    pub fn with_assets(mut self, assets: impl IntoIterator<Item = Asset>) -> Self {
        self.assets
            .extend(assets.into_iter().filter(|a| !a.is_native()).map(|a| (a.mint(), a)));
        self
    }

    /// Tag prepended verbatim to every memo
    pub fn with_memo_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.memo_prefix = Some(prefix.into());
        self
    }

    pub fn with_notifier(mut self, notifier: WebhookNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn owner(&self) -> &Pubkey {
        &self.owner
    }

    /// Send `amount` (user units) of `asset` to `recipient`.
    /// The credential is dropped when this returns.
    pub async fn send_asset(
        &self,
        asset: Asset,
        recipient: &str,
        amount: &str,
        credential: Credential,
    ) -> Result<SubmissionResult, WalletFlowError> {
        let request = self.validate(asset, recipient, amount, None, Vec::new())?;
        self.send(&request, credential).await
    }

    /// Validate user input into a [`SendRequest`] without touching the network
    pub fn validate(
        &self,
        asset: Asset,
        recipient: &str,
        amount: &str,
        memo: Option<&str>,
        references: Vec<Pubkey>,
    ) -> Result<SendRequest, WalletFlowError> {
        let recipient = parse_address(recipient)?;
        validate_recipient(&recipient, &self.owner)?;

        let amount = TokenAmount::parse(amount, asset.decimals())?;
        if amount.is_zero() {
            return Err(WalletFlowError::invalid_input(format!(
                "amount is below the smallest unit of {}",
                asset
            )));
        }

        let memo = match (memo, &self.memo_prefix) {
            (Some(memo), Some(prefix)) => Some(format!("{}{}", prefix, memo)),
            (Some(memo), None) => Some(memo.to_string()),
            (None, _) => None,
        };
        if let Some(memo) = &memo {
            validate_memo(memo)?;
        }

        Ok(SendRequest {
            asset,
            recipient,
            amount,
            memo,
            references,
        })
    }

    pub async fn send(&self, request: &SendRequest, credential: Credential) -> Result<SubmissionResult, WalletFlowError> {
        if credential.is_empty() {
            return Err(WalletFlowError::invalid_input("password is empty"));
        }

        let correlation_id = CorrelationId::new();
        let log = FlowLogger::new(correlation_id.clone());
        let result = async {
            let plan = self.plan_transfer(request).await?;
            self.check_balance(request).await?;
            self.pipeline
                .build_and_submit(&plan, &self.owner, &[], &credential, &log)
                .await
        }
        .instrument(action_span("send", &correlation_id))
        .await;
        drop(credential);

        if let Err(err) = &result {
            metrics().record_failure(err.kind());
            log.log_failed(err.kind(), &err.to_string());
        }
        result
    }

    /// Resolve accounts and lay out the instructions for `request`
    pub async fn plan_transfer(&self, request: &SendRequest) -> Result<InstructionPlan, WalletFlowError> {
        let mut plan = InstructionPlan::new();
        if let Some(memo) = &request.memo {
            plan.set_memo(memo_instruction(memo, &[self.owner])?);
        }

        match request.asset {
            Asset::Native => {
                plan.push_core(native_transfer(
                    &self.owner,
                    &request.recipient,
                    request.amount.base_units(),
                    &request.references,
                ));
            }
            Asset::Token { mint, .. } => {
                let source = self.provisioner.ensure(&self.owner, &mint, &self.owner).await?;
                if source.is_missing() {
                    return Err(WalletFlowError::InsufficientBalance(format!(
                        "no {} token account at {}",
                        mint, source.address
                    )));
                }

                let destination = self.provisioner.ensure(&request.recipient, &mint, &self.owner).await?;
                if let Some(create) = destination.create_instruction.clone() {
                    info!(
                        recipient = %request.recipient,
                        account = %destination.address,
                        "Recipient token account will be created"
                    );
                    plan.push_provisioning(create);
                }

                plan.push_core(token_transfer(&TokenTransfer {
                    source: source.address,
                    mint,
                    destination: destination.address,
                    authority: self.owner,
                    amount: request.amount,
                    references: &request.references,
                })?);
            }
        }
        Ok(plan)
    }

    /// Best effort; a failed read does not block the send
    async fn check_balance(&self, request: &SendRequest) -> Result<(), WalletFlowError> {
        match self.balances.token_balance(&self.owner, &request.asset).await {
            Ok(held) if held < request.amount.base_units() => Err(WalletFlowError::InsufficientBalance(format!(
                "holding {} {}, sending {}",
                TokenAmount::from_base_units(held, request.asset.decimals()),
                request.asset,
                request.amount
            ))),
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(error = %e, "Balance check skipped");
                Ok(())
            }
        }
    }

    /// Pay a parsed Solana Pay request. The merchant callback, if any, is
    /// notified in the background once the payment is confirmed.
    pub async fn pay(&self, payment: &PaymentRequest, credential: Credential) -> Result<PaymentReceipt, WalletFlowError> {
        let asset = match payment.spl_token {
            None => Asset::Native,
            Some(mint) => *self
                .assets
                .get(&mint)
                .ok_or_else(|| WalletFlowError::invalid_input(format!("unknown token mint {}", mint)))?,
        };
        let amount = payment
            .amount
            .as_deref()
            .ok_or_else(|| WalletFlowError::invalid_input("payment request carries no amount"))?;

        let request = self.validate(
            asset,
            &payment.recipient.to_string(),
            amount,
            payment.memo.as_deref(),
            payment.references.clone(),
        )?;
        let result = self.send(&request, credential).await?;

        let callback = match (&result, &payment.callback) {
            (SubmissionResult::Confirmed(signature), Some(url)) => {
                Some(self.notifier.notify(url.clone(), *signature, FlowLogger::default()))
            }
            _ => None,
        };
        Ok(PaymentReceipt { result, callback })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc_manager::{PollOptions, RetryPolicy};
    use crate::test_utils::{FakeLedger, FakeSigner};
    use crate::tx_builder::{AddressResolver, TransactionBuilder};
    #[allow(deprecated)]
    use solana_sdk::system_instruction;

    struct Harness {
        ledger: Arc<FakeLedger>,
        signer: Arc<FakeSigner>,
        resolver: Arc<AddressResolver>,
        owner: Pubkey,
        flow: SendFlow,
    }

    fn harness(signer: FakeSigner) -> Harness {
        let ledger = Arc::new(FakeLedger::new());
        let signer = Arc::new(signer);
        let resolver = Arc::new(AddressResolver::new());
        let retry = RetryPolicy::default();
        let owner = Pubkey::new_unique();
        ledger.set_balance(owner, 5_000_000_000);

        let pipeline = Arc::new(SubmissionPipeline::new(
            ledger.clone(),
            TransactionBuilder::new(ledger.clone(), retry.clone()),
            signer.clone(),
            PollOptions::default(),
        ));
        let flow = SendFlow::new(
            owner,
            AccountProvisioner::new(ledger.clone(), resolver.clone(), retry.clone()),
            Balances::new(ledger.clone(), resolver.clone(), retry),
            pipeline,
        );
        Harness {
            ledger,
            signer,
            resolver,
            owner,
            flow,
        }
    }

    #[tokio::test]
    async fn test_native_plan_uses_floor_base_units() {
        let h = harness(FakeSigner::new());
        let recipient = Pubkey::new_unique();
        let request = h
            .flow
            .validate(Asset::Native, &recipient.to_string(), "1.5", None, vec![])
            .unwrap();

        let plan = h.flow.plan_transfer(&request).await.unwrap();
        assert!(plan.provisioning().is_empty());
        assert_eq!(plan.core(), &[system_instruction::transfer(&h.owner, &recipient, 1_500_000_000)]);
    }

    #[tokio::test]
    async fn test_token_plan_creates_missing_recipient_account_first() {
        let h = harness(FakeSigner::new());
        let mint = Pubkey::new_unique();
        let recipient = Pubkey::new_unique();
        h.ledger.add_token_account(h.resolver.resolve(&h.owner, &mint), mint, h.owner, 10_000_000);
        let asset = Asset::token(mint, 6);

        let request = h.flow.validate(asset, &recipient.to_string(), "2.5", None, vec![]).unwrap();
        let plan = h.flow.plan_transfer(&request).await.unwrap();

        assert_eq!(plan.provisioning().len(), 1);
        assert_eq!(plan.provisioning()[0].accounts[0].pubkey, h.owner);
        assert_eq!(plan.provisioning()[0].accounts[1].pubkey, h.resolver.resolve(&recipient, &mint));
        let ordered = plan.ordered();
        assert_eq!(ordered[0].program_id, spl_associated_token_account::id());
        assert_eq!(ordered[1].program_id, spl_token::id());

        // Once the account exists nothing is created
        h.ledger.add_token_account(h.resolver.resolve(&recipient, &mint), mint, recipient, 0);
        let plan = h.flow.plan_transfer(&request).await.unwrap();
        assert!(plan.provisioning().is_empty());
        assert_eq!(plan.core().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_sender_account_is_insufficient_balance() {
        let h = harness(FakeSigner::new());
        let mint = Pubkey::new_unique();
        let result = h
            .flow
            .send_asset(Asset::token(mint, 6), &Pubkey::new_unique().to_string(), "1", Credential::new("pw"))
            .await;

        assert!(matches!(result, Err(WalletFlowError::InsufficientBalance(_))));
        assert_eq!(h.signer.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_input_rejected_before_network() {
        let h = harness(FakeSigner::new());
        let other = Pubkey::new_unique().to_string();
        let me = h.owner.to_string();
        let cases: Vec<(&str, &str)> = vec![
            ("not-an-address", "1"),
            (other.as_str(), "0"),
            // Below one lamport: floors to zero
            (other.as_str(), "0.0000000001"),
            (other.as_str(), "abc"),
            (me.as_str(), "1"),
        ];

        for (recipient, amount) in cases {
            let result = h
                .flow
                .send_asset(Asset::Native, recipient, amount, Credential::new("pw"))
                .await;
            assert!(
                matches!(result, Err(WalletFlowError::InvalidInput(_))),
                "{recipient} {amount}: {result:?}"
            );
        }

        let long_memo = "x".repeat(567);
        assert!(h
            .flow
            .validate(Asset::Native, &other, "1", Some(&long_memo), vec![])
            .is_err());
        assert_eq!(h.ledger.blockhash_calls(), 0);
        assert_eq!(h.signer.calls(), 0);
    }

    #[tokio::test]
    async fn test_native_send_confirms() {
        let h = harness(FakeSigner::new());
        let result = h
            .flow
            .send_asset(Asset::Native, &Pubkey::new_unique().to_string(), "1.25", Credential::new("pw"))
            .await
            .unwrap();

        assert!(matches!(result, SubmissionResult::Confirmed(_)));
        assert_eq!(h.ledger.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_native_send_over_balance_is_refused() {
        let h = harness(FakeSigner::new());
        let result = h
            .flow
            .send_asset(Asset::Native, &Pubkey::new_unique().to_string(), "6", Credential::new("pw"))
            .await;
        assert!(matches!(result, Err(WalletFlowError::InsufficientBalance(_))));
        assert_eq!(h.signer.calls(), 0);
    }

    #[tokio::test]
    async fn test_auth_failure_submits_nothing() {
        let h = harness(FakeSigner::auth_failure());
        let result = h
            .flow
            .send_asset(Asset::Native, &Pubkey::new_unique().to_string(), "1", Credential::new("nope"))
            .await;
        assert!(matches!(result, Err(WalletFlowError::AuthFailed)));
        assert!(h.ledger.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_memo_prefix_and_references() {
        let h = harness(FakeSigner::new());
        let flow = h.flow.with_memo_prefix("wf:");
        let reference = Pubkey::new_unique();
        let request = flow
            .validate(Asset::Native, &Pubkey::new_unique().to_string(), "1", Some("order-7"), vec![reference])
            .unwrap();
        assert_eq!(request.memo.as_deref(), Some("wf:order-7"));

        let plan = flow.plan_transfer(&request).await.unwrap();
        let memo = plan.memo().unwrap();
        assert_eq!(memo.data, b"wf:order-7");
        let transfer = &plan.core()[0];
        let meta = transfer.accounts.last().unwrap();
        assert_eq!(meta.pubkey, reference);
        assert!(!meta.is_signer && !meta.is_writable);
    }

    #[tokio::test]
    async fn test_pay_notifies_callback_after_confirmation() {
        let mut server = mockito::Server::new_async().await;
        let recipient = Pubkey::new_unique();
        let h = harness(FakeSigner::new());
        let mock = server
            .mock("POST", "/paid")
            .match_body(mockito::Matcher::JsonString(format!(
                r#"{{"signatureId":"{}"}}"#,
                h.signer.signature_for(&h.owner)
            )))
            .with_status(200)
            .create_async()
            .await;

        let url = format!(
            "solana:{}?amount=0.01&memo=inv-9&url={}",
            recipient,
            url::form_urlencoded::byte_serialize(format!("{}/paid", server.url()).as_bytes()).collect::<String>()
        );
        let payment = PaymentRequest::parse(&url).unwrap();
        let receipt = h.flow.pay(&payment, Credential::new("pw")).await.unwrap();

        assert!(matches!(receipt.result, SubmissionResult::Confirmed(_)));
        receipt.callback.expect("callback scheduled").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_pay_unknown_token_rejected() {
        let h = harness(FakeSigner::new());
        let payment = PaymentRequest::parse(&format!(
            "solana:{}?amount=1&spl-token={}",
            Pubkey::new_unique(),
            Pubkey::new_unique()
        ))
        .unwrap();
        assert!(matches!(
            h.flow.pay(&payment, Credential::new("pw")).await,
            Err(WalletFlowError::InvalidInput(_))
        ));
    }
}
