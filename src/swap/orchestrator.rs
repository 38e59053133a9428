//! Swap state machine
//!
//! ```text
//! Idle → QuoteLoading → QuoteReady → AwaitingPassword(swap) → Submitting(swap)
//!      → NeedsAccountSetup | Confirming(swap) → Success | Failed
//!
//! NeedsAccountSetup → AwaitingPassword(setup) → Submitting(setup)
//!      → Confirming(setup) → QuoteReady → AwaitingPassword(swap) → ...
//! ```
//!
//! The session is published through a `watch` channel; callers drive it with
//! intent methods. Quote fetches are debounced and last-edit-wins.

use super::debounce::{debounced, QuoteDebouncer, Ticket};
use super::quote::{Quote, QuoteError, QuoteProvider, QuoteRequest};
use super::state::{classify_failure, SwapFailure, SwapPair, SwapPhase, SwapSession, SwapStatus};
use crate::balances::Balances;
use crate::errors::WalletFlowError;
use crate::metrics::metrics;
use crate::observability::{action_span, CorrelationId};
use crate::structured_logging::FlowLogger;
use crate::submission::SubmissionPipeline;
use crate::tx_builder::{AccountProvisioner, InstructionPlan};
use crate::types::{Credential, SubmissionResult, TokenAmount};
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapSettings {
    /// Quiet period after the last edit before a quote is fetched
    pub debounce: Duration,
    pub slippage_bps: u16,
    /// Age after which a quote may no longer be executed
    pub quote_ttl: Duration,
}

impl Default for SwapSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            slippage_bps: 50,
            quote_ttl: Duration::from_secs(30),
        }
    }
}

/// Collaborators of the orchestrator
pub struct SwapDeps {
    pub provider: Arc<dyn QuoteProvider>,
    pub provisioner: AccountProvisioner,
    pub balances: Balances,
    pub pipeline: Arc<SubmissionPipeline>,
}

struct Inner {
    owner: Pubkey,
    deps: SwapDeps,
    settings: SwapSettings,
    session: watch::Sender<SwapSession>,
    debouncer: QuoteDebouncer,
}

#[derive(Clone)]
pub struct SwapOrchestrator {
    inner: Arc<Inner>,
}

impl SwapOrchestrator {
    pub fn new(owner: Pubkey, deps: SwapDeps, settings: SwapSettings) -> Self {
        let (session, _) = watch::channel(SwapSession::default());
        Self {
            inner: Arc::new(Inner {
                owner,
                deps,
                settings,
                session,
                debouncer: QuoteDebouncer::new(),
            }),
        }
    }

    /// Observe every session change
    pub fn subscribe(&self) -> watch::Receiver<SwapSession> {
        self.inner.session.subscribe()
    }

    /// Current session snapshot
    pub fn session(&self) -> SwapSession {
        self.inner.session.borrow().clone()
    }

    pub fn set_pair(&self, pair: SwapPair) -> Result<(), WalletFlowError> {
        self.inner.ensure_editable()?;
        if pair.input.mint() == pair.output.mint() {
            return Err(WalletFlowError::invalid_input("input and output assets are the same"));
        }
        self.inner.session.send_modify(|s| {
            if s.pair != Some(pair) {
                s.quote = None;
            }
            s.pair = Some(pair);
        });
        let amount = self.inner.session.borrow().amount.clone();
        self.set_amount(&amount)
    }

    /// Record an amount edit and schedule a debounced quote fetch for it
    pub fn set_amount(&self, amount: &str) -> Result<(), WalletFlowError> {
        self.inner.ensure_editable()?;
        let amount = amount.trim().to_string();
        let pair = self.inner.session.borrow().pair;

        let parsed = match pair {
            Some(pair) if !amount.is_empty() => Some((pair, TokenAmount::parse(&amount, pair.input.decimals()))),
            _ => None,
        };

        match parsed {
            None => {
                self.inner.debouncer.cancel();
                self.inner.session.send_modify(|s| {
                    s.amount = amount;
                    s.status = SwapStatus::Idle;
                });
                Ok(())
            }
            Some((_, Err(e))) => {
                self.inner.debouncer.cancel();
                let message = e.to_string();
                self.inner.session.send_modify(|s| {
                    s.amount = amount;
                    s.status = SwapStatus::Failed(SwapFailure::InvalidInput(message));
                });
                Err(e.into())
            }
            Some((_, Ok(value))) if value.is_zero() => {
                self.inner.debouncer.cancel();
                self.inner.session.send_modify(|s| {
                    s.amount = amount;
                    s.status = SwapStatus::Idle;
                });
                Ok(())
            }
            Some((pair, Ok(value))) => {
                let ticket = self.inner.debouncer.next_ticket();
                self.inner.session.send_modify(|s| {
                    s.amount = amount;
                    s.status = SwapStatus::QuoteLoading;
                });
                let request = QuoteRequest {
                    input_mint: pair.input.mint(),
                    output_mint: pair.output.mint(),
                    amount: value.base_units(),
                    slippage_bps: self.inner.settings.slippage_bps,
                };
                Inner::spawn_fetch(Arc::clone(&self.inner), ticket, request);
                Ok(())
            }
        }
    }

    /// The user asked to execute the displayed quote; a password is needed next
    pub fn request_execute(&self) -> Result<(), WalletFlowError> {
        self.inner.transition(
            |status| matches!(status, SwapStatus::QuoteReady),
            SwapStatus::AwaitingPassword(SwapPhase::Swap),
        )
    }

    /// The user accepted the account setup; a password is needed next
    pub fn request_account_setup(&self) -> Result<(), WalletFlowError> {
        self.inner.transition(
            |status| matches!(status, SwapStatus::NeedsAccountSetup),
            SwapStatus::AwaitingPassword(SwapPhase::Setup),
        )
    }

    /// Execute the current quote. The credential is dropped when this returns.
    ///
    /// `Err` only signals a call in the wrong state; attempt outcomes are
    /// reported as the resulting [`SwapStatus`].
    pub async fn submit_swap(&self, credential: Credential) -> Result<SwapStatus, WalletFlowError> {
        self.inner.transition(
            |status| {
                matches!(
                    status,
                    SwapStatus::QuoteReady | SwapStatus::AwaitingPassword(SwapPhase::Swap)
                )
            },
            SwapStatus::Submitting(SwapPhase::Swap),
        )?;

        let correlation_id = CorrelationId::new();
        let log = FlowLogger::new(correlation_id.clone());
        let status = self
            .inner
            .execute_swap(&credential, &log)
            .instrument(action_span("swap", &correlation_id))
            .await;
        drop(credential);
        Ok(status)
    }

    /// Create the missing token accounts, then resume the swap with the same
    /// credential if the quote is still fresh.
    pub async fn confirm_account_setup(&self, credential: Credential) -> Result<SwapStatus, WalletFlowError> {
        self.inner.transition(
            |status| {
                matches!(
                    status,
                    SwapStatus::NeedsAccountSetup | SwapStatus::AwaitingPassword(SwapPhase::Setup)
                )
            },
            SwapStatus::Submitting(SwapPhase::Setup),
        )?;

        let correlation_id = CorrelationId::new();
        let log = FlowLogger::new(correlation_id.clone());
        let status = self
            .inner
            .setup_then_swap(&credential, &log)
            .instrument(action_span("swap_account_setup", &correlation_id))
            .await;
        drop(credential);
        Ok(status)
    }

    /// Back to an empty session; pending fetches are cancelled
    pub fn reset(&self) -> Result<(), WalletFlowError> {
        self.inner.ensure_editable()?;
        self.inner.debouncer.cancel();
        self.inner.session.send_replace(SwapSession::default());
        Ok(())
    }
}

impl Inner {
    fn status(&self) -> SwapStatus {
        self.session.borrow().status.clone()
    }

    fn set_status(&self, status: SwapStatus) {
        self.session.send_modify(|s| s.status = status);
    }

    fn ensure_editable(&self) -> Result<(), WalletFlowError> {
        if self.status().is_busy() {
            return Err(WalletFlowError::invalid_input("a swap transaction is in progress"));
        }
        Ok(())
    }

    /// Move to `next` if the current status satisfies `allowed`
    fn transition(&self, allowed: impl FnOnce(&SwapStatus) -> bool, next: SwapStatus) -> Result<(), WalletFlowError> {
        let mut rejected = None;
        self.session.send_if_modified(|s| {
            if allowed(&s.status) {
                s.status = next;
                true
            } else {
                rejected = Some(s.status.clone());
                false
            }
        });
        match rejected {
            None => Ok(()),
            Some(current) => Err(WalletFlowError::invalid_input(format!(
                "not allowed while the swap is {:?}",
                current
            ))),
        }
    }

    fn fail(&self, failure: SwapFailure, log: &FlowLogger) -> SwapStatus {
        metrics().record_failure("swap");
        log.log_failed("swap", &failure.to_string());
        let status = SwapStatus::Failed(failure);
        self.set_status(status.clone());
        status
    }

    fn spawn_fetch(inner: Arc<Inner>, ticket: Ticket, request: QuoteRequest) {
        tokio::spawn(async move {
            let outcome = debounced(&ticket, inner.settings.debounce, || {
                inner.deps.provider.get_quote(&request)
            })
            .await;

            match outcome {
                Some(result) => inner.apply_quote(&ticket, result),
                None => {
                    metrics().quotes_discarded.inc();
                    tracing::debug!(generation = ticket.generation, "Quote fetch cancelled by a newer edit");
                }
            }
        });
    }

    fn apply_quote(&self, ticket: &Ticket, result: Result<Quote, QuoteError>) {
        let mut revision = None;
        let applied = self.session.send_if_modified(|s| {
            if !self.debouncer.is_current(ticket) || s.status.is_busy() {
                return false;
            }
            match result {
                Ok(quote) => {
                    s.quote_revision += 1;
                    revision = Some((s.quote_revision, quote.in_amount, quote.out_amount));
                    s.quote = Some(quote);
                    s.status = SwapStatus::QuoteReady;
                }
                Err(e) => {
                    s.status = SwapStatus::Failed(SwapFailure::QuoteUnavailable(e.to_string()));
                }
            }
            true
        });

        let log = FlowLogger::default();
        if !applied {
            metrics().quotes_discarded.inc();
            log.log_quote_discarded(ticket.generation);
        } else if let Some((revision, in_amount, out_amount)) = revision {
            metrics().quotes_applied.inc();
            log.log_quote_applied(revision, in_amount, out_amount);
        }
    }

    /// Quote to execute, or why it may not be executed
    fn executable_quote(&self) -> Result<(SwapPair, Quote), String> {
        let session = self.session.borrow();
        let pair = session.pair.ok_or_else(|| "no asset pair selected".to_string())?;
        let quote = session.quote.clone().ok_or_else(|| "no quote available".to_string())?;

        if quote.input_mint != pair.input.mint() || quote.output_mint != pair.output.mint() {
            return Err("quote is for a different asset pair".to_string());
        }
        let displayed = TokenAmount::parse(&session.amount, pair.input.decimals())
            .map_err(|e| e.to_string())?;
        if displayed.base_units() != quote.in_amount {
            return Err(format!(
                "displayed amount {} differs from the quoted input {}",
                displayed.base_units(),
                quote.in_amount
            ));
        }
        if quote.is_expired(self.settings.quote_ttl) {
            return Err(format!("quote is {}s old", quote.age().as_secs()));
        }
        Ok((pair, quote))
    }

    async fn execute_swap(&self, credential: &Credential, log: &FlowLogger) -> SwapStatus {
        self.set_status(SwapStatus::Submitting(SwapPhase::Swap));

        let (pair, quote) = match self.executable_quote() {
            Ok(v) => v,
            Err(reason) => return self.fail(SwapFailure::StaleQuote(reason), log),
        };

        // Wrapped SOL is created and closed by the aggregator's own setup/cleanup
        let mut missing = Vec::new();
        for asset in [pair.input, pair.output] {
            if !asset.needs_sub_account() {
                continue;
            }
            match self
                .deps
                .provisioner
                .ensure(&self.owner, &asset.mint(), &self.owner)
                .await
            {
                Ok(account) if account.is_missing() => missing.push(account),
                Ok(_) => {}
                Err(e) => return self.fail(classify_failure(&e), log),
            }
        }
        if !missing.is_empty() {
            log.log_account_setup(&self.owner, missing.len());
            self.session.send_modify(|s| {
                s.required_accounts = missing;
                s.status = SwapStatus::NeedsAccountSetup;
            });
            return SwapStatus::NeedsAccountSetup;
        }

        // Best effort only; the ledger has the final word
        match self.deps.balances.token_balance(&self.owner, &pair.input).await {
            Ok(balance) if balance < quote.in_amount => {
                return self.fail(
                    SwapFailure::InsufficientBalance(format!(
                        "holding {} base units, swap needs {}",
                        balance, quote.in_amount
                    )),
                    log,
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Balance check skipped"),
        }

        let instructions = match self.deps.provider.swap_instructions(&quote, &self.owner).await {
            Ok(v) => v,
            Err(e) => return self.fail(SwapFailure::QuoteUnavailable(e.to_string()), log),
        };
        let lookup_tables = instructions.lookup_tables.clone();
        let mut plan = InstructionPlan::new();
        for ix in instructions.into_instructions() {
            plan.push_core(ix);
        }

        let result = self
            .deps
            .pipeline
            .build_and_submit_with(&plan, &self.owner, &lookup_tables, credential, log, |_| {
                self.set_status(SwapStatus::Confirming(SwapPhase::Swap))
            })
            .await;

        match result.and_then(SubmissionResult::into_result) {
            Ok(signature) => {
                info!(signature = %signature, "Swap confirmed");
                let status = SwapStatus::Success { signature };
                self.set_status(status.clone());
                status
            }
            Err(e) => self.fail(classify_failure(&e), log),
        }
    }

    async fn setup_then_swap(&self, credential: &Credential, log: &FlowLogger) -> SwapStatus {
        let required = self.session.borrow().required_accounts.clone();
        let mut plan = InstructionPlan::new();
        for ix in required.iter().filter_map(|a| a.create_instruction.clone()) {
            plan.push_provisioning(ix);
        }
        if plan.is_empty() {
            return self.fail(SwapFailure::InvalidInput("no account setup pending".to_string()), log);
        }

        let result = self
            .deps
            .pipeline
            .build_and_submit_with(&plan, &self.owner, &[], credential, log, |_| {
                self.set_status(SwapStatus::Confirming(SwapPhase::Setup))
            })
            .await;

        match result.and_then(SubmissionResult::into_result) {
            Ok(signature) => info!(signature = %signature, accounts = required.len(), "Token accounts created"),
            Err(e) => return self.fail(classify_failure(&e), log),
        }
        self.session.send_modify(|s| s.required_accounts.clear());

        if let Err(reason) = self.executable_quote() {
            return self.fail(SwapFailure::StaleQuote(reason), log);
        }
        self.set_status(SwapStatus::QuoteReady);
        self.set_status(SwapStatus::AwaitingPassword(SwapPhase::Swap));
        self.execute_swap(credential, log).await
    }
}
