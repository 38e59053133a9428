//! Sends end to end through the engine facade

use crate::engine::{EngineOptions, WalletEngine};
use crate::rpc_manager::SignatureState;
use crate::test_utils::{FakeLedger, FakeQuoteProvider, FakeSigner};
use crate::tx_builder::AddressResolver;
use crate::types::{Asset, Credential, SubmissionResult};
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;

struct World {
    ledger: Arc<FakeLedger>,
    signer: Arc<FakeSigner>,
    owner: Pubkey,
    engine: WalletEngine,
}

fn world() -> World {
    let ledger = Arc::new(FakeLedger::new());
    let signer = Arc::new(FakeSigner::new());
    let owner = Pubkey::new_unique();
    ledger.set_balance(owner, 20_000_000_000);
    let engine = WalletEngine::new(
        owner,
        ledger.clone(),
        signer.clone(),
        Arc::new(FakeQuoteProvider::new()),
        EngineOptions::default(),
    );
    World {
        ledger,
        signer,
        owner,
        engine,
    }
}

#[tokio::test(start_paused = true)]
async fn test_first_token_send_creates_recipient_account_once() {
    let w = world();
    let mint = Pubkey::new_unique();
    let asset = Asset::token(mint, 6);
    let resolver = AddressResolver::new();
    w.ledger
        .add_token_account(resolver.resolve(&w.owner, &mint), mint, w.owner, 50_000_000);
    let recipient = Pubkey::new_unique();

    let request = w
        .engine
        .sender()
        .validate(asset, &recipient.to_string(), "12.5", None, vec![])
        .unwrap();
    let plan = w.engine.sender().plan_transfer(&request).await.unwrap();
    assert_eq!(plan.provisioning().len(), 1);

    let result = w
        .engine
        .send_asset(asset, &recipient.to_string(), "12.5", Credential::new("pw"))
        .await
        .unwrap();
    assert!(matches!(result, SubmissionResult::Confirmed(_)));

    // The creation landed with the transfer; the next send only transfers
    let plan = w.engine.sender().plan_transfer(&request).await.unwrap();
    assert!(plan.provisioning().is_empty());
    assert_eq!(plan.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_each_send_uses_the_credential_it_was_given() {
    let w = world();
    let to = Pubkey::new_unique().to_string();

    w.engine
        .send_asset(Asset::Native, &to, "1", Credential::new("first"))
        .await
        .unwrap();
    w.engine
        .send_asset(Asset::Native, &to, "1", Credential::new("second"))
        .await
        .unwrap();

    assert_eq!(w.signer.credentials_seen(), vec!["first".to_string(), "second".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_send_is_timed_out_not_failed() {
    let w = world();
    w.ledger.set_auto_confirm(false);

    let started = tokio::time::Instant::now();
    let result = w
        .engine
        .send_asset(Asset::Native, &Pubkey::new_unique().to_string(), "0.1", Credential::new("pw"))
        .await
        .unwrap();

    assert_eq!(result, SubmissionResult::TimedOut(w.signer.signature_for(&w.owner)));
    assert!(started.elapsed() >= std::time::Duration::from_secs(15));
}

#[tokio::test(start_paused = true)]
async fn test_on_chain_rejection_reason_is_verbatim() {
    let w = world();
    let reason = "Error processing Instruction 0: custom program error: 0x1";
    w.ledger.script_statuses(
        w.signer.signature_for(&w.owner),
        vec![SignatureState::Failed(reason.to_string())],
    );

    let result = w
        .engine
        .send_asset(Asset::Native, &Pubkey::new_unique().to_string(), "0.1", Credential::new("pw"))
        .await
        .unwrap();

    match result {
        SubmissionResult::Failed { reason: got, .. } => assert_eq!(got, reason),
        other => panic!("unexpected {other:?}"),
    }
}
