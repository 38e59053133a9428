//! Test Utilities Module
//!
//! In-memory stand-ins for the ledger, the remote signer and the quote
//! provider. Everything is deterministic and driven by the test through the
//! scripting methods; nothing touches the network.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use crate::rpc_manager::{FreshnessToken, LedgerRpc, RpcManagerError, SignatureState};
use crate::submission::{RemoteSigner, SignerError};
use crate::swap::{Quote, QuoteError, QuoteProvider, QuoteRequest, SwapInstructions};
use crate::types::Credential;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use solana_sdk::{
    account::Account,
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    program_pack::Pack,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Lamports a rent-exempt token account holds
const TOKEN_ACCOUNT_RENT: u64 = 2_039_280;

/// Serialized size of the lookup table header that precedes the addresses
const LOOKUP_TABLE_META_SIZE: usize = 56;

// ============================================================================
// LEDGER
// ============================================================================

#[derive(Default)]
struct LedgerState {
    freshness: Option<FreshnessToken>,
    blockhash_failures: u32,
    blockhash_calls: u32,
    accounts: HashMap<Pubkey, Account>,
    balances: HashMap<Pubkey, u64>,
    scripted: HashMap<Signature, VecDeque<SignatureState>>,
    confirm_at: HashMap<Signature, Instant>,
    status_failures: u32,
    status_latency: Option<Duration>,
    status_calls: u32,
    submitted: Vec<Signature>,
    submission_failures: VecDeque<RpcManagerError>,
}

/// Scriptable in-memory ledger
///
/// Defaults: alive, every blockhash fetch succeeds, no accounts exist, and
/// any submitted signature without a script reports `Confirmed`.
pub struct FakeLedger {
    endpoint: String,
    alive: AtomicBool,
    auto_confirm: AtomicBool,
    state: Mutex<LedgerState>,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::with_endpoint("fake://ledger")
    }

    pub fn with_endpoint(endpoint: &str) -> Self {
        let ledger = Self {
            endpoint: endpoint.to_string(),
            alive: AtomicBool::new(true),
            auto_confirm: AtomicBool::new(true),
            state: Mutex::new(LedgerState::default()),
        };
        ledger.advance_blockhash();
        ledger
    }

    /// A dead ledger fails every call with a transport error
    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    pub fn set_auto_confirm(&self, auto_confirm: bool) {
        self.auto_confirm.store(auto_confirm, Ordering::SeqCst);
    }

    /// Fail the next `n` blockhash fetches with a transport error
    pub fn fail_blockhash_fetches(&self, n: u32) {
        self.state.lock().blockhash_failures = n;
    }

    pub fn blockhash_calls(&self) -> u32 {
        self.state.lock().blockhash_calls
    }

    /// Token the next successful blockhash fetch returns
    pub fn current_token(&self) -> FreshnessToken {
        let state = self.state.lock();
        state.freshness.unwrap_or(FreshnessToken {
            blockhash: Hash::default(),
            last_valid_block_height: 0,
        })
    }

    /// Move to a new blockhash with a later validity window
    pub fn advance_blockhash(&self) {
        let mut state = self.state.lock();
        let height = state
            .freshness
            .map(|f| f.last_valid_block_height)
            .unwrap_or(1_000);
        state.freshness = Some(FreshnessToken {
            blockhash: Hash::new_unique(),
            last_valid_block_height: height + 150,
        });
    }

    /// Status reads for `signature` return `states` in order; the last one repeats
    pub fn script_statuses(&self, signature: Signature, states: Vec<SignatureState>) {
        self.state.lock().scripted.insert(signature, states.into());
    }

    /// `signature` reads `Processing` until `after` has elapsed, then `Confirmed`
    pub fn confirm_after(&self, signature: Signature, after: Duration) {
        self.state
            .lock()
            .confirm_at
            .insert(signature, Instant::now() + after);
    }

    /// Fail the next `n` status reads with a transport error
    pub fn fail_status_reads(&self, n: u32) {
        self.state.lock().status_failures = n;
    }

    /// Every status read takes `latency` before answering
    pub fn slow_status_reads(&self, latency: Duration) {
        self.state.lock().status_latency = Some(latency);
    }

    pub fn status_calls(&self) -> u32 {
        self.state.lock().status_calls
    }

    /// Reject the next submission with `err`; queued in call order
    pub fn fail_next_submission(&self, err: RpcManagerError) {
        self.state.lock().submission_failures.push_back(err);
    }

    /// Signatures of every accepted submission
    pub fn submitted(&self) -> Vec<Signature> {
        self.state.lock().submitted.clone()
    }

    pub fn set_balance(&self, owner: Pubkey, lamports: u64) {
        self.state.lock().balances.insert(owner, lamports);
    }

    /// Store an initialized SPL token account at `address`
    pub fn add_token_account(&self, address: Pubkey, mint: Pubkey, owner: Pubkey, amount: u64) {
        let token_account = spl_token::state::Account {
            mint,
            owner,
            amount,
            state: spl_token::state::AccountState::Initialized,
            ..Default::default()
        };
        let mut data = vec![0u8; spl_token::state::Account::LEN];
        spl_token::state::Account::pack(token_account, &mut data).expect("token account fits its own LEN");

        self.state.lock().accounts.insert(
            address,
            Account {
                lamports: TOKEN_ACCOUNT_RENT,
                data,
                owner: spl_token::id(),
                executable: false,
                rent_epoch: 0,
            },
        );
    }

    /// Store an active address lookup table holding `addresses`
    pub fn add_lookup_table(&self, table: Pubkey, addresses: Vec<Pubkey>) {
        let mut data = vec![0u8; LOOKUP_TABLE_META_SIZE];
        // ProgramState::LookupTable discriminant, then a deactivation slot of u64::MAX
        data[0..4].copy_from_slice(&1u32.to_le_bytes());
        data[4..12].copy_from_slice(&u64::MAX.to_le_bytes());
        for address in &addresses {
            data.extend_from_slice(address.as_ref());
        }

        self.state.lock().accounts.insert(
            table,
            Account {
                lamports: 1_000_000,
                data,
                owner: solana_sdk::address_lookup_table::program::id(),
                executable: false,
                rent_epoch: 0,
            },
        );
    }

    fn transport_error(&self, message: &str) -> RpcManagerError {
        RpcManagerError::Transport {
            endpoint: self.endpoint.clone(),
            message: message.to_string(),
        }
    }

    fn ensure_alive(&self) -> Result<(), RpcManagerError> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(self.transport_error("connection refused"))
        }
    }

    /// Materialize the associated token accounts a landed transaction creates
    fn apply_account_creations(&self, tx: &VersionedTransaction) {
        let keys = tx.message.static_account_keys();
        for ix in tx.message.instructions() {
            let program = keys.get(ix.program_id_index as usize);
            if program != Some(&spl_associated_token_account::id()) {
                continue;
            }
            let account = |pos: usize| ix.accounts.get(pos).and_then(|idx| keys.get(*idx as usize)).copied();
            if let (Some(address), Some(owner), Some(mint)) = (account(1), account(2), account(3)) {
                self.add_token_account(address, mint, owner, 0);
            }
        }
    }
}

impl Default for FakeLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerRpc for FakeLedger {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn get_account_info(&self, address: &Pubkey) -> Result<Option<Account>, RpcManagerError> {
        self.ensure_alive()?;
        Ok(self.state.lock().accounts.get(address).cloned())
    }

    async fn get_latest_blockhash(&self) -> Result<FreshnessToken, RpcManagerError> {
        {
            let mut state = self.state.lock();
            state.blockhash_calls += 1;
            if state.blockhash_failures > 0 {
                state.blockhash_failures -= 1;
                drop(state);
                return Err(self.transport_error("blockhash fetch failed"));
            }
        }
        self.ensure_alive()?;
        Ok(self.current_token())
    }

    async fn submit_raw(&self, signed_tx: &[u8]) -> Result<Signature, RpcManagerError> {
        self.ensure_alive()?;
        let tx: VersionedTransaction = bincode::deserialize(signed_tx)
            .map_err(|e| RpcManagerError::Validation(format!("undecodable transaction: {}", e)))?;
        let signature = *tx
            .signatures
            .first()
            .ok_or_else(|| RpcManagerError::Validation("transaction carries no signature".to_string()))?;

        if let Some(err) = self.state.lock().submission_failures.pop_front() {
            return Err(err);
        }

        self.apply_account_creations(&tx);
        self.state.lock().submitted.push(signature);
        Ok(signature)
    }

    async fn get_signature_status(&self, signature: &Signature) -> Result<SignatureState, RpcManagerError> {
        let latency = self.state.lock().status_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        state.status_calls += 1;
        if state.status_failures > 0 {
            state.status_failures -= 1;
            drop(state);
            return Err(self.transport_error("status read failed"));
        }

        if let Some(script) = state.scripted.get_mut(signature) {
            let next = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            };
            return Ok(next.unwrap_or(SignatureState::Unknown));
        }
        if let Some(at) = state.confirm_at.get(signature) {
            return Ok(if Instant::now() >= *at {
                SignatureState::Confirmed
            } else {
                SignatureState::Processing
            });
        }
        if state.submitted.contains(signature) {
            return Ok(if self.auto_confirm.load(Ordering::SeqCst) {
                SignatureState::Confirmed
            } else {
                SignatureState::Processing
            });
        }
        Ok(SignatureState::Unknown)
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64, RpcManagerError> {
        self.ensure_alive()?;
        Ok(self.state.lock().balances.get(address).copied().unwrap_or(0))
    }

    async fn probe(&self) -> Result<(), RpcManagerError> {
        self.ensure_alive()
    }
}

// ============================================================================
// SIGNER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignerMode {
    Sign,
    RejectCredential,
    Down,
}

/// Remote signer that fills the fee payer's signature slot deterministically
pub struct FakeSigner {
    mode: SignerMode,
    latency: Option<Duration>,
    calls: AtomicU32,
    credentials: Mutex<Vec<String>>,
}

impl FakeSigner {
    pub fn new() -> Self {
        Self::with_mode(SignerMode::Sign)
    }

    /// Every request fails as a wrong password
    pub fn auth_failure() -> Self {
        Self::with_mode(SignerMode::RejectCredential)
    }

    /// Every request fails as a backend outage
    pub fn unavailable() -> Self {
        Self::with_mode(SignerMode::Down)
    }

    fn with_mode(mode: SignerMode) -> Self {
        Self {
            mode,
            latency: None,
            calls: AtomicU32::new(0),
            credentials: Mutex::new(Vec::new()),
        }
    }

    /// Delay every response by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Passwords received, in call order
    pub fn credentials_seen(&self) -> Vec<String> {
        self.credentials.lock().clone()
    }

    /// Signature this signer produces for transactions paid by `fee_payer`
    pub fn signature_for(&self, fee_payer: &Pubkey) -> Signature {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(fee_payer.as_ref());
        bytes[32..].copy_from_slice(fee_payer.as_ref());
        bytes[63] ^= 0xA5;
        Signature::from(bytes)
    }
}

impl Default for FakeSigner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteSigner for FakeSigner {
    async fn sign(&self, credential: &Credential, unsigned_tx_base64: &str) -> Result<String, SignerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.credentials.lock().push(credential.expose().to_string());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match self.mode {
            SignerMode::Sign => {}
            SignerMode::RejectCredential => return Err(SignerError::AuthFailed),
            SignerMode::Down => return Err(SignerError::Unavailable("signer offline".to_string())),
        }

        let bytes = STANDARD
            .decode(unsigned_tx_base64)
            .map_err(|e| SignerError::MalformedResponse(e.to_string()))?;
        let mut tx: VersionedTransaction =
            bincode::deserialize(&bytes).map_err(|e| SignerError::MalformedResponse(e.to_string()))?;

        let fee_payer = *tx
            .message
            .static_account_keys()
            .first()
            .ok_or_else(|| SignerError::MalformedResponse("message has no accounts".to_string()))?;
        let slot = tx
            .signatures
            .first_mut()
            .ok_or_else(|| SignerError::MalformedResponse("no signature slot".to_string()))?;
        *slot = self.signature_for(&fee_payer);

        let signed = bincode::serialize(&tx).map_err(|e| SignerError::MalformedResponse(e.to_string()))?;
        Ok(STANDARD.encode(signed))
    }
}

// ============================================================================
// QUOTES
// ============================================================================

/// Program the fake swap instruction targets
pub const FAKE_SWAP_PROGRAM: Pubkey = Pubkey::new_from_array([7u8; 32]);

/// Quote provider pricing every pair at `out = in * 150 / 1000`
///
/// That is 1 SOL (9 decimals) for 150 units of a 6-decimal token.
pub struct FakeQuoteProvider {
    rate: (u64, u64),
    latencies: Mutex<HashMap<u64, Duration>>,
    requested: Mutex<Vec<u64>>,
    failure: Mutex<Option<QuoteError>>,
    swap_calls: AtomicU32,
}

impl FakeQuoteProvider {
    pub fn new() -> Self {
        Self {
            rate: (150, 1000),
            latencies: Mutex::new(HashMap::new()),
            requested: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            swap_calls: AtomicU32::new(0),
        }
    }

    /// Quotes for exactly `amount` take `latency` to arrive
    pub fn set_latency(&self, amount: u64, latency: Duration) {
        self.latencies.lock().insert(amount, latency);
    }

    /// Fail every following quote with `err`
    pub fn fail_quotes(&self, err: QuoteError) {
        *self.failure.lock() = Some(err);
    }

    pub fn clear_failure(&self) {
        *self.failure.lock() = None;
    }

    /// Input amounts of every quote fetch that was started
    pub fn requested_amounts(&self) -> Vec<u64> {
        self.requested.lock().clone()
    }

    pub fn swap_instruction_calls(&self) -> u32 {
        self.swap_calls.load(Ordering::SeqCst)
    }
}

impl Default for FakeQuoteProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuoteProvider for FakeQuoteProvider {
    async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote, QuoteError> {
        self.requested.lock().push(request.amount);
        let latency = self.latencies.lock().get(&request.amount).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }

        let (num, den) = self.rate;
        let out_amount = (request.amount as u128 * num as u128 / den as u128) as u64;
        let threshold = (out_amount as u128 * (10_000 - request.slippage_bps as u128) / 10_000) as u64;

        Ok(Quote {
            input_mint: request.input_mint,
            output_mint: request.output_mint,
            in_amount: request.amount,
            out_amount,
            other_amount_threshold: threshold,
            slippage_bps: request.slippage_bps,
            price_impact_pct: 0.0,
            route: vec!["FakeAmm".to_string()],
            raw: serde_json::json!({
                "inAmount": request.amount.to_string(),
                "outAmount": out_amount.to_string(),
            }),
            fetched_at: Instant::now(),
        })
    }

    async fn swap_instructions(&self, _quote: &Quote, user: &Pubkey) -> Result<SwapInstructions, QuoteError> {
        self.swap_calls.fetch_add(1, Ordering::SeqCst);
        Ok(SwapInstructions {
            swap: Some(Instruction::new_with_bytes(
                FAKE_SWAP_PROGRAM,
                &[1],
                vec![AccountMeta::new(*user, true)],
            )),
            ..Default::default()
        })
    }
}
