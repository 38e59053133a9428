//! Quote provider boundary and the Jupiter implementation

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuoteError {
    #[error("Quote request failed: {0}")]
    Transport(String),

    #[error("Quote provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("No route between the selected assets")]
    NoRoute,

    #[error("Malformed quote response: {0}")]
    Malformed(String),
}

/// Parameters of one quote fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteRequest {
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    /// Input amount in base units
    pub amount: u64,
    pub slippage_bps: u16,
}

/// Priced, time-bounded exchange proposal
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub in_amount: u64,
    pub out_amount: u64,
    /// Minimum output after slippage
    pub other_amount_threshold: u64,
    pub slippage_bps: u16,
    pub price_impact_pct: f64,
    pub route: Vec<String>,
    /// Provider response verbatim; the swap endpoint needs every field back
    pub raw: serde_json::Value,
    pub fetched_at: Instant,
}

impl Quote {
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.age() >= ttl
    }
}

/// Instructions that execute a quote, in provider order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SwapInstructions {
    pub compute_budget: Vec<Instruction>,
    pub setup: Vec<Instruction>,
    pub swap: Option<Instruction>,
    pub cleanup: Option<Instruction>,
    pub lookup_tables: Vec<Pubkey>,
}

impl SwapInstructions {
    /// Flatten into transaction order: compute budget, setup, swap, cleanup
    pub fn into_instructions(self) -> Vec<Instruction> {
        self.compute_budget
            .into_iter()
            .chain(self.setup)
            .chain(self.swap)
            .chain(self.cleanup)
            .collect()
    }
}

#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote, QuoteError>;

    async fn swap_instructions(&self, quote: &Quote, user: &Pubkey) -> Result<SwapInstructions, QuoteError>;
}

// ============================================================================
// API TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct JupiterQuoteRequest {
    #[serde(rename = "inputMint")]
    input_mint: String,
    #[serde(rename = "outputMint")]
    output_mint: String,
    amount: String,
    #[serde(rename = "slippageBps")]
    slippage_bps: u16,
}

#[derive(Debug, Deserialize)]
struct JupiterQuoteResponse {
    #[serde(rename = "inAmount")]
    in_amount: String,
    #[serde(rename = "outAmount")]
    out_amount: String,
    #[serde(rename = "otherAmountThreshold")]
    other_amount_threshold: Option<String>,
    #[serde(rename = "priceImpactPct")]
    price_impact_pct: Option<String>,
    #[serde(rename = "routePlan", default)]
    route_plan: Vec<RoutePlanStep>,
}

#[derive(Debug, Deserialize)]
struct RoutePlanStep {
    #[serde(rename = "swapInfo")]
    swap_info: SwapInfo,
}

#[derive(Debug, Deserialize)]
struct SwapInfo {
    label: Option<String>,
}

#[derive(Debug, Serialize)]
struct JupiterSwapRequest<'a> {
    #[serde(rename = "quoteResponse")]
    quote_response: &'a serde_json::Value,
    #[serde(rename = "userPublicKey")]
    user_public_key: String,
    #[serde(rename = "wrapAndUnwrapSol")]
    wrap_and_unwrap_sol: bool,
    #[serde(rename = "dynamicComputeUnitLimit")]
    dynamic_compute_unit_limit: bool,
}

#[derive(Debug, Deserialize)]
struct JupiterSwapInstructionsResponse {
    #[serde(rename = "computeBudgetInstructions", default)]
    compute_budget_instructions: Vec<JupiterInstruction>,
    #[serde(rename = "setupInstructions", default)]
    setup_instructions: Vec<JupiterInstruction>,
    #[serde(rename = "swapInstruction")]
    swap_instruction: JupiterInstruction,
    #[serde(rename = "cleanupInstruction")]
    cleanup_instruction: Option<JupiterInstruction>,
    #[serde(rename = "addressLookupTableAddresses", default)]
    address_lookup_table_addresses: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct JupiterInstruction {
    #[serde(rename = "programId")]
    program_id: String,
    accounts: Vec<JupiterAccountMeta>,
    data: String,
}

#[derive(Debug, Deserialize)]
struct JupiterAccountMeta {
    pubkey: String,
    #[serde(rename = "isSigner")]
    is_signer: bool,
    #[serde(rename = "isWritable")]
    is_writable: bool,
}

fn parse_pubkey(value: &str) -> Result<Pubkey, QuoteError> {
    Pubkey::from_str(value).map_err(|e| QuoteError::Malformed(format!("bad address {}: {}", value, e)))
}

fn parse_amount(field: &str, value: &str) -> Result<u64, QuoteError> {
    value
        .parse::<u64>()
        .map_err(|e| QuoteError::Malformed(format!("{} '{}': {}", field, value, e)))
}

impl TryFrom<JupiterInstruction> for Instruction {
    type Error = QuoteError;

    fn try_from(ix: JupiterInstruction) -> Result<Self, Self::Error> {
        let accounts = ix
            .accounts
            .iter()
            .map(|meta| {
                Ok(AccountMeta {
                    pubkey: parse_pubkey(&meta.pubkey)?,
                    is_signer: meta.is_signer,
                    is_writable: meta.is_writable,
                })
            })
            .collect::<Result<Vec<_>, QuoteError>>()?;

        Ok(Instruction {
            program_id: parse_pubkey(&ix.program_id)?,
            accounts,
            data: STANDARD
                .decode(&ix.data)
                .map_err(|e| QuoteError::Malformed(format!("instruction data: {}", e)))?,
        })
    }
}

// ============================================================================
// JUPITER CLIENT
// ============================================================================

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

pub struct JupiterClient {
    client: Client,
    base_url: String,
    limiter: DirectLimiter,
}

impl JupiterClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration, requests_per_second: u32) -> Result<Self, QuoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QuoteError::Transport(e.to_string()))?;
        let rate = NonZeroU32::new(requests_per_second.max(1)).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limiter: RateLimiter::direct(Quota::per_second(rate)),
        })
    }

    async fn read_body(response: reqwest::Response) -> Result<String, QuoteError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| QuoteError::Transport(format!("failed to read response: {}", e)))?;

        if status.is_success() {
            return Ok(body);
        }
        if body.contains("COULD_NOT_FIND_ANY_ROUTE") || body.contains("NO_ROUTES_FOUND") {
            return Err(QuoteError::NoRoute);
        }
        Err(QuoteError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl QuoteProvider for JupiterClient {
    async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote, QuoteError> {
        self.limiter.until_ready().await;

        let query = JupiterQuoteRequest {
            input_mint: request.input_mint.to_string(),
            output_mint: request.output_mint.to_string(),
            amount: request.amount.to_string(),
            slippage_bps: request.slippage_bps,
        };

        let response = self
            .client
            .get(format!("{}/quote", self.base_url))
            .query(&query)
            .send()
            .await
            .map_err(|e| QuoteError::Transport(e.to_string()))?;
        let body = Self::read_body(response).await?;

        // Keep the raw JSON: the swap endpoint wants the full quote back
        let raw: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| QuoteError::Malformed(e.to_string()))?;
        let parsed: JupiterQuoteResponse =
            serde_json::from_value(raw.clone()).map_err(|e| QuoteError::Malformed(e.to_string()))?;

        let in_amount = parse_amount("inAmount", &parsed.in_amount)?;
        let out_amount = parse_amount("outAmount", &parsed.out_amount)?;
        let other_amount_threshold = match parsed.other_amount_threshold.as_deref() {
            Some(value) => parse_amount("otherAmountThreshold", value)?,
            None => out_amount,
        };
        let price_impact_pct = parsed
            .price_impact_pct
            .as_deref()
            .map(|v| {
                v.parse::<f64>().unwrap_or_else(|_| {
                    warn!(value = %v, "Unparseable priceImpactPct, using 0");
                    0.0
                })
            })
            .unwrap_or(0.0);
        let route = parsed
            .route_plan
            .into_iter()
            .map(|step| step.swap_info.label.unwrap_or_else(|| "Unknown".to_string()))
            .collect::<Vec<_>>();

        debug!(
            input = %request.input_mint,
            output = %request.output_mint,
            in_amount,
            out_amount,
            hops = route.len(),
            "Quote received"
        );

        Ok(Quote {
            input_mint: request.input_mint,
            output_mint: request.output_mint,
            in_amount,
            out_amount,
            other_amount_threshold,
            slippage_bps: request.slippage_bps,
            price_impact_pct,
            route,
            raw,
            fetched_at: Instant::now(),
        })
    }

    async fn swap_instructions(&self, quote: &Quote, user: &Pubkey) -> Result<SwapInstructions, QuoteError> {
        self.limiter.until_ready().await;

        let request = JupiterSwapRequest {
            quote_response: &quote.raw,
            user_public_key: user.to_string(),
            wrap_and_unwrap_sol: true,
            dynamic_compute_unit_limit: true,
        };

        let response = self
            .client
            .post(format!("{}/swap-instructions", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| QuoteError::Transport(e.to_string()))?;
        let body = Self::read_body(response).await?;

        let parsed: JupiterSwapInstructionsResponse =
            serde_json::from_str(&body).map_err(|e| QuoteError::Malformed(e.to_string()))?;

        Ok(SwapInstructions {
            compute_budget: parsed
                .compute_budget_instructions
                .into_iter()
                .map(Instruction::try_from)
                .collect::<Result<_, _>>()?,
            setup: parsed
                .setup_instructions
                .into_iter()
                .map(Instruction::try_from)
                .collect::<Result<_, _>>()?,
            swap: Some(Instruction::try_from(parsed.swap_instruction)?),
            cleanup: parsed.cleanup_instruction.map(Instruction::try_from).transpose()?,
            lookup_tables: parsed
                .address_lookup_table_addresses
                .iter()
                .map(|a| parse_pubkey(a))
                .collect::<Result<_, _>>()?,
        })
    }
}
