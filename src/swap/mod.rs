//! Swap flow: quotes, debouncing and the session state machine

pub mod debounce;
pub mod orchestrator;
pub mod quote;
pub mod state;

pub use debounce::{debounced, QuoteDebouncer, Ticket};
pub use orchestrator::{SwapDeps, SwapOrchestrator, SwapSettings};
pub use quote::{JupiterClient, Quote, QuoteError, QuoteProvider, QuoteRequest, SwapInstructions};
pub use state::{classify_failure, classify_on_chain, SwapFailure, SwapPair, SwapPhase, SwapSession, SwapStatus};
