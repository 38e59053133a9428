//! Last-edit-wins scheduling for quote fetches
//!
//! Every edit takes a new ticket. Taking a ticket cancels the previous
//! one, and a result may only be applied while its ticket is still current.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Handle of one scheduled fetch
#[derive(Debug, Clone)]
pub struct Ticket {
    pub generation: u64,
    pub token: CancellationToken,
}

#[derive(Debug, Default)]
pub struct QuoteDebouncer {
    generation: AtomicU64,
    current: Mutex<Option<CancellationToken>>,
}

impl QuoteDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel whatever is pending and hand out the next ticket
    pub fn next_ticket(&self) -> Ticket {
        let token = CancellationToken::new();
        let mut current = self.current.lock();
        if let Some(previous) = current.replace(token.clone()) {
            previous.cancel();
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        Ticket { generation, token }
    }

    /// Cancel the pending fetch without scheduling a new one
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(previous) = self.current.lock().take() {
            previous.cancel();
        }
    }

    pub fn is_current(&self, ticket: &Ticket) -> bool {
        !ticket.token.is_cancelled() && self.generation.load(Ordering::SeqCst) == ticket.generation
    }
}

/// Wait out the quiet period, then run `fetch`; `None` if the ticket is
/// cancelled at any point before `fetch` completes.
pub async fn debounced<F, Fut, T>(ticket: &Ticket, quiet: Duration, fetch: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    tokio::select! {
        _ = ticket.token.cancelled() => return None,
        _ = tokio::time::sleep(quiet) => {}
    }

    tokio::select! {
        _ = ticket.token.cancelled() => None,
        result = fetch() => Some(result),
    }
}
