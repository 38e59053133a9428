//! Engine facade: wires the collaborators once and exposes the public
//! operations (send, pay, swap session, submit swap, confirm account setup).

use crate::balances::Balances;
use crate::config::Config;
use crate::errors::WalletFlowError;
use crate::payment_request::PaymentRequest;
use crate::rpc_manager::{FailoverLedger, LedgerRpc, PollOptions, RetryPolicy, RpcEndpoint};
use crate::send::{PaymentReceipt, SendFlow};
use crate::submission::{BalanceRefresher, HttpSigner, RemoteSigner, SubmissionPipeline, WebhookNotifier};
use crate::swap::{JupiterClient, QuoteProvider, SwapDeps, SwapOrchestrator, SwapSession, SwapSettings, SwapStatus};
use crate::tx_builder::{AccountProvisioner, AddressResolver, TransactionBuilder};
use crate::types::{Asset, Credential, SubmissionResult, TokenAmount};
use anyhow::Context;
use nonempty::NonEmpty;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Tunables for [`WalletEngine::new`]
#[derive(Clone)]
pub struct EngineOptions {
    pub retry: RetryPolicy,
    pub poll: PollOptions,
    pub swap: SwapSettings,
    /// Tokens payment requests may ask for
    pub assets: Vec<Asset>,
    pub memo_prefix: Option<String>,
    pub webhook_timeout: Duration,
    pub refresher: Option<Arc<dyn BalanceRefresher>>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poll: PollOptions::default(),
            swap: SwapSettings::default(),
            assets: Vec::new(),
            memo_prefix: None,
            webhook_timeout: Duration::from_secs(10),
            refresher: None,
        }
    }
}

pub struct WalletEngine {
    owner: Pubkey,
    resolver: Arc<AddressResolver>,
    balances: Balances,
    send: SendFlow,
    swap: SwapOrchestrator,
}

impl WalletEngine {
    pub fn new(
        owner: Pubkey,
        rpc: Arc<dyn LedgerRpc>,
        signer: Arc<dyn RemoteSigner>,
        quotes: Arc<dyn QuoteProvider>,
        options: EngineOptions,
    ) -> Self {
        let resolver = Arc::new(AddressResolver::new());
        let provisioner = AccountProvisioner::new(rpc.clone(), resolver.clone(), options.retry.clone());
        let balances = Balances::new(rpc.clone(), resolver.clone(), options.retry.clone());

        let builder = TransactionBuilder::new(rpc.clone(), options.retry.clone());
        let mut pipeline = SubmissionPipeline::new(rpc, builder, signer, options.poll);
        if let Some(refresher) = options.refresher {
            pipeline = pipeline.with_refresher(refresher);
        }
        let pipeline = Arc::new(pipeline);

        let mut send = SendFlow::new(owner, provisioner.clone(), balances.clone(), pipeline.clone())
            .with_assets(options.assets)
            .with_notifier(WebhookNotifier::new(options.webhook_timeout));
        if let Some(prefix) = options.memo_prefix {
            send = send.with_memo_prefix(prefix);
        }

        let swap = SwapOrchestrator::new(
            owner,
            SwapDeps {
                provider: quotes,
                provisioner,
                balances: balances.clone(),
                pipeline,
            },
            options.swap,
        );

        Self {
            owner,
            resolver,
            balances,
            send,
            swap,
        }
    }

    /// Connect to the configured endpoints, signer and quote provider
    pub async fn connect(config: &Config, owner: Pubkey, signer_token: &str) -> anyhow::Result<Self> {
        let commitment = config.commitment()?;
        let endpoints: Vec<Arc<dyn LedgerRpc>> = config
            .rpc
            .endpoints
            .iter()
            .map(|url| Arc::new(RpcEndpoint::new(url.clone(), commitment, config.rpc_timeout())) as Arc<dyn LedgerRpc>)
            .collect();
        let candidates = NonEmpty::from_vec(endpoints).context("no RPC endpoints configured")?;
        let rpc = FailoverLedger::connect(candidates).await?;
        info!(endpoint = %rpc.endpoint(), owner = %owner, "Ledger connected");

        let signer = HttpSigner::new(config.signer.base_url.clone(), signer_token, config.signer_timeout())?;
        let quotes = JupiterClient::new(
            config.swap.quote_url.clone(),
            config.rpc_timeout(),
            config.swap.requests_per_second,
        )?;

        let options = EngineOptions {
            retry: config.retry_policy(),
            poll: config.poll_options(),
            swap: config.swap_settings(),
            assets: config.token_assets()?,
            memo_prefix: config.payments.memo_prefix.clone(),
            ..EngineOptions::default()
        };
        Ok(Self::new(owner, Arc::new(rpc), Arc::new(signer), Arc::new(quotes), options))
    }

    pub fn owner(&self) -> &Pubkey {
        &self.owner
    }

    /// Associated token account of `owner` for `mint`
    pub fn sub_account(&self, owner: &Pubkey, mint: &Pubkey) -> Pubkey {
        self.resolver.resolve(owner, mint)
    }

    pub async fn balance(&self, asset: &Asset) -> Result<TokenAmount, WalletFlowError> {
        self.balances.balance_of(&self.owner, asset).await
    }

    pub async fn send_asset(
        &self,
        asset: Asset,
        recipient: &str,
        amount: &str,
        credential: Credential,
    ) -> Result<SubmissionResult, WalletFlowError> {
        self.send.send_asset(asset, recipient, amount, credential).await
    }

    /// Send flow, for memos and references beyond [`send_asset`](Self::send_asset)
    pub fn sender(&self) -> &SendFlow {
        &self.send
    }

    pub async fn pay(&self, request: &PaymentRequest, credential: Credential) -> Result<PaymentReceipt, WalletFlowError> {
        self.send.pay(request, credential).await
    }

    /// Intent functions (pair, amount, execute, reset) live on the orchestrator
    pub fn swap(&self) -> &SwapOrchestrator {
        &self.swap
    }

    pub fn swap_session(&self) -> SwapSession {
        self.swap.session()
    }

    pub fn subscribe_swap(&self) -> watch::Receiver<SwapSession> {
        self.swap.subscribe()
    }

    pub async fn submit_swap(&self, credential: Credential) -> Result<SwapStatus, WalletFlowError> {
        self.swap.submit_swap(credential).await
    }

    pub async fn confirm_account_setup(&self, credential: Credential) -> Result<SwapStatus, WalletFlowError> {
        self.swap.confirm_account_setup(credential).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeLedger, FakeQuoteProvider, FakeSigner};

    #[tokio::test]
    async fn test_engine_wires_send_and_balance() {
        let ledger = Arc::new(FakeLedger::new());
        let owner = Pubkey::new_unique();
        ledger.set_balance(owner, 3_000_000_000);
        let engine = WalletEngine::new(
            owner,
            ledger.clone(),
            Arc::new(FakeSigner::new()),
            Arc::new(FakeQuoteProvider::new()),
            EngineOptions::default(),
        );

        assert_eq!(engine.balance(&Asset::Native).await.unwrap().to_string(), "3");
        let result = engine
            .send_asset(Asset::Native, &Pubkey::new_unique().to_string(), "0.5", Credential::new("pw"))
            .await
            .unwrap();
        assert!(matches!(result, SubmissionResult::Confirmed(_)));
        assert_eq!(engine.swap_session().status, SwapStatus::Idle);

        let mint = Pubkey::new_unique();
        assert_eq!(
            engine.sub_account(&owner, &mint),
            spl_associated_token_account::get_associated_token_address(&owner, &mint)
        );
    }
}
