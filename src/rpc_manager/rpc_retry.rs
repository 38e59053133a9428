//! Central retry helper and confirmation polling

use super::{LedgerRpc, RetryPolicy, RpcManagerError, SignatureState};
use crate::errors::WalletFlowError;
use crate::metrics::metrics;
use crate::types::SubmissionResult;
use solana_sdk::signature::Signature;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

/// Retry a ledger read with exponential backoff.
///
/// Non-retryable errors are returned immediately (classified through
/// `From<RpcManagerError>`). When the attempt budget runs out, the last error
/// is surfaced as [`WalletFlowError::RpcUnavailable`].
pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, WalletFlowError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RpcManagerError>>,
{
    let start_time = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        duration_ms = start_time.elapsed().as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if !err.is_retryable() => {
                warn!(
                    operation = operation_name,
                    error = %err,
                    "Permanent error, not retrying"
                );
                return Err(err.into());
            }
            Err(err) => match policy.calculate_delay(attempt) {
                Some(backoff) => {
                    metrics().rpc_retries.inc();
                    debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max_attempts = policy.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Transient error, backing off"
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
                None => {
                    warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        duration_ms = start_time.elapsed().as_millis() as u64,
                        error = %err,
                        "Retry budget exhausted"
                    );
                    return Err(WalletFlowError::RpcUnavailable {
                        operation: operation_name.to_string(),
                        attempts: attempt + 1,
                        source: err,
                    });
                }
            },
        }
    }
}

/// Confirmation polling bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            interval: Duration::from_secs(1),
        }
    }
}

/// Poll a signature until it reaches a terminal state or the window closes.
///
/// A status read is made immediately, then every `interval`, with a final
/// read at the deadline. Each read is cut off at the deadline, so a slow
/// ledger cannot stretch the window. Errors on individual reads are logged
/// and polling continues. Running out of time yields
/// [`SubmissionResult::TimedOut`], never `Failed`.
pub async fn poll_until(
    rpc: &dyn LedgerRpc,
    signature: &Signature,
    options: &PollOptions,
) -> SubmissionResult {
    let started = Instant::now();
    let deadline = started + options.timeout;
    let mut polls: u32 = 0;

    loop {
        polls += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, rpc.get_signature_status(signature)).await {
            Ok(Ok(SignatureState::Confirmed)) => {
                debug!(
                    signature = %signature,
                    polls,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Signature confirmed"
                );
                return SubmissionResult::Confirmed(*signature);
            }
            Ok(Ok(SignatureState::Failed(reason))) => {
                warn!(signature = %signature, reason = %reason, "Transaction failed on-chain");
                return SubmissionResult::Failed {
                    signature: *signature,
                    reason,
                };
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                debug!(signature = %signature, error = %err, "Status poll failed, continuing");
            }
            Err(_) => {
                debug!(signature = %signature, polls, "Status read cut off at the deadline");
            }
        }

        let now = Instant::now();
        if now >= deadline {
            warn!(
                signature = %signature,
                polls,
                timeout_ms = options.timeout.as_millis() as u64,
                "Confirmation not observed within polling window"
            );
            return SubmissionResult::TimedOut(*signature);
        }

        sleep(options.interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeLedger;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transport() -> RpcManagerError {
        RpcManagerError::Transport {
            endpoint: "fake".to_string(),
            message: "connection reset".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_succeeds_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let started = Instant::now();

        let result = with_retry("get_latest_blockhash", &RetryPolicy::default(), move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(transport())
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 250ms + 500ms of backoff
        assert!(started.elapsed() >= Duration::from_millis(750));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_exhaustion_is_rpc_unavailable() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = with_retry("get_balance", &RetryPolicy::default(), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(transport())
        })
        .await;

        match result {
            Err(WalletFlowError::RpcUnavailable { operation, attempts, .. }) => {
                assert_eq!(operation, "get_balance");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = with_retry("get_account_info", &RetryPolicy::default(), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(RpcManagerError::Validation("bad pubkey".to_string()))
        })
        .await;

        assert!(matches!(result, Err(WalletFlowError::InvalidInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_returns_on_first_confirmation() {
        let ledger = FakeLedger::new();
        let sig = Signature::from([3u8; 64]);
        ledger.script_statuses(
            sig,
            vec![SignatureState::Unknown, SignatureState::Processing, SignatureState::Confirmed],
        );

        let started = Instant::now();
        let result = poll_until(&ledger, &sig, &PollOptions::default()).await;

        assert_eq!(result, SubmissionResult::Confirmed(sig));
        assert_eq!(ledger.status_calls(), 3);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_fails_fast_on_chain_error() {
        let ledger = FakeLedger::new();
        let sig = Signature::from([4u8; 64]);
        ledger.script_statuses(sig, vec![SignatureState::Failed("InstructionError(2, Custom(6001))".into())]);

        let result = poll_until(&ledger, &sig, &PollOptions::default()).await;
        assert!(matches!(result, SubmissionResult::Failed { .. }));
        assert_eq!(ledger.status_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_times_out_instead_of_failing() {
        let ledger = FakeLedger::new();
        let sig = Signature::from([5u8; 64]);
        ledger.confirm_after(sig, Duration::from_millis(15_001));

        let started = Instant::now();
        let result = poll_until(&ledger, &sig, &PollOptions::default()).await;

        assert_eq!(result, SubmissionResult::TimedOut(sig));
        assert!(started.elapsed() >= Duration::from_secs(15));
        // Reads at t = 0..=15s
        assert_eq!(ledger.status_calls(), 16);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_slow_reads_do_not_stretch_the_window() {
        let ledger = FakeLedger::new();
        let sig = Signature::from([8u8; 64]);
        ledger.slow_status_reads(Duration::from_secs(10));

        let started = Instant::now();
        let result = poll_until(&ledger, &sig, &PollOptions::default()).await;

        assert_eq!(result, SubmissionResult::TimedOut(sig));
        // First read answers at 10s, the second is cut off at 15s before it counts
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(15));
        assert!(elapsed < Duration::from_millis(15_500));
        assert_eq!(ledger.status_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_tolerates_read_errors() {
        let ledger = FakeLedger::new();
        let sig = Signature::from([6u8; 64]);
        ledger.fail_status_reads(2);
        ledger.script_statuses(sig, vec![SignatureState::Confirmed]);

        let result = poll_until(&ledger, &sig, &PollOptions::default()).await;
        assert_eq!(result, SubmissionResult::Confirmed(sig));
        assert_eq!(ledger.status_calls(), 3);
    }
}
