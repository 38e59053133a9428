use solana_client::client_error::{ClientError, ClientErrorKind};
use std::time::Duration;
use thiserror::Error;

/// Ledger call error types
#[derive(Debug, Clone, Error)]
pub enum RpcManagerError {
    /// Transport-level errors (network, connection)
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    /// Timeout errors
    #[error("Timeout after {timeout_ms}ms (endpoint: {endpoint})")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// RPC response errors (from the RPC server)
    #[error("RPC response error: {message} (endpoint: {endpoint}, code: {code:?})")]
    RpcResponse {
        endpoint: String,
        message: String,
        code: Option<i64>,
    },

    /// Rate limit exceeded
    #[error("Rate limit exceeded (endpoint: {endpoint})")]
    RateLimitExceeded { endpoint: String },

    /// No candidate endpoint answered
    #[error("No healthy endpoints available (total: {total})")]
    NoHealthyEndpoints { total: usize },

    /// The freshness token attached to a submission is unknown to the ledger
    #[error("Blockhash not found (endpoint: {endpoint})")]
    BlockhashNotFound { endpoint: String },

    #[error("Transaction expired (endpoint: {endpoint})")]
    TransactionExpired { endpoint: String },

    #[error("Insufficient funds (endpoint: {endpoint})")]
    InsufficientFunds { endpoint: String },

    /// Preflight simulation or program execution rejected the transaction
    #[error("Transaction rejected: {message} (endpoint: {endpoint})")]
    Rejected { endpoint: String, message: String },

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RpcManagerError {
    /// Check if this error is retryable
    ///
    /// Expired freshness tokens are not: the transaction has to be rebuilt,
    /// not resent.
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcManagerError::Transport { .. } => true,
            RpcManagerError::Timeout { .. } => true,
            RpcManagerError::RateLimitExceeded { .. } => true,
            RpcManagerError::NoHealthyEndpoints { .. } => true,

            RpcManagerError::BlockhashNotFound { .. } => false,
            RpcManagerError::TransactionExpired { .. } => false,
            RpcManagerError::InsufficientFunds { .. } => false,
            RpcManagerError::Rejected { .. } => false,
            RpcManagerError::Validation(_) => false,
            RpcManagerError::Internal(_) => false,

            // Retry on server errors (5xx)
            RpcManagerError::RpcResponse { code, .. } => {
                matches!(code, Some(c) if (500..600).contains(c))
            }
        }
    }

    /// Whether the endpoint itself looks unhealthy (as opposed to the request)
    pub fn is_endpoint_failure(&self) -> bool {
        matches!(
            self,
            RpcManagerError::Transport { .. }
                | RpcManagerError::Timeout { .. }
                | RpcManagerError::RateLimitExceeded { .. }
        )
    }

    /// Get the endpoint associated with this error, if any
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            RpcManagerError::Transport { endpoint, .. } => Some(endpoint),
            RpcManagerError::Timeout { endpoint, .. } => Some(endpoint),
            RpcManagerError::RpcResponse { endpoint, .. } => Some(endpoint),
            RpcManagerError::RateLimitExceeded { endpoint } => Some(endpoint),
            RpcManagerError::BlockhashNotFound { endpoint } => Some(endpoint),
            RpcManagerError::TransactionExpired { endpoint } => Some(endpoint),
            RpcManagerError::InsufficientFunds { endpoint } => Some(endpoint),
            RpcManagerError::Rejected { endpoint, .. } => Some(endpoint),
            _ => None,
        }
    }

    /// Create from ClientError with context
    pub fn from_client_error(err: ClientError, endpoint: &str) -> Self {
        if matches!(err.kind(), ClientErrorKind::Reqwest(_) | ClientErrorKind::Io(_)) {
            return Self::classify_message(&err.to_string(), endpoint, true);
        }
        Self::classify_message(&err.to_string(), endpoint, false)
    }

    /// Classify a ledger error message; `transport` marks errors raised
    /// below the JSON-RPC layer.
    pub fn classify_message(message: &str, endpoint: &str, transport: bool) -> Self {
        let lowered = message.to_lowercase();
        let endpoint = endpoint.to_string();

        if lowered.contains("blockhash not found") {
            RpcManagerError::BlockhashNotFound { endpoint }
        } else if lowered.contains("transaction expired") || lowered.contains("block height exceeded") {
            RpcManagerError::TransactionExpired { endpoint }
        } else if lowered.contains("insufficient funds")
            || lowered.contains("insufficient lamports")
            || lowered.contains("no record of a prior credit")
        {
            RpcManagerError::InsufficientFunds { endpoint }
        } else if lowered.contains("rate limit")
            || lowered.contains("too many requests")
            || lowered.contains("429")
        {
            RpcManagerError::RateLimitExceeded { endpoint }
        } else if lowered.contains("timeout") || lowered.contains("timed out") {
            RpcManagerError::Timeout {
                endpoint,
                timeout_ms: 0,
            }
        } else if lowered.contains("simulation failed")
            || lowered.contains("custom program error")
            || lowered.contains("instruction error")
        {
            RpcManagerError::Rejected {
                endpoint,
                message: message.to_string(),
            }
        } else if transport {
            RpcManagerError::Transport {
                endpoint,
                message: message.to_string(),
            }
        } else {
            // Extract error code if available
            let code = lowered
                .split("code:")
                .nth(1)
                .and_then(|s| s.split_whitespace().next())
                .and_then(|s| s.trim_end_matches(|c: char| !c.is_ascii_digit()).parse::<i64>().ok());

            RpcManagerError::RpcResponse {
                endpoint,
                message: message.to_string(),
                code,
            }
        }
    }
}

/// Retry policy for ledger reads
///
/// Delay before retry `n` (0-indexed) is `base_delay_ms * 2^n`, capped at
/// `max_delay_ms`, with optional jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Base delay in milliseconds
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,

    /// Jitter factor (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 4_000,
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt `attempt` (0-indexed), or `None`
    /// when that attempt was the last one allowed.
    pub fn calculate_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt.saturating_add(1) >= self.max_attempts {
            return None;
        }

        let delay_ms = (self.base_delay_ms as f64) * 2f64.powi(attempt as i32);
        let delay_ms = delay_ms.min(self.max_delay_ms as f64);

        if self.jitter_factor <= 0.0 {
            return Some(Duration::from_millis(delay_ms as u64));
        }

        let jitter = (rand::random::<f64>() - 0.5) * 2.0 * self.jitter_factor;
        let jittered = (delay_ms * (1.0 + jitter)).max(0.0) as u64;
        Some(Duration::from_millis(jittered))
    }

    /// Single attempt, no backoff
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_retryable() {
        assert!(RpcManagerError::Transport {
            endpoint: "test".to_string(),
            message: "connection failed".to_string(),
        }
        .is_retryable());

        assert!(RpcManagerError::Timeout {
            endpoint: "test".to_string(),
            timeout_ms: 5000,
        }
        .is_retryable());

        assert!(RpcManagerError::RpcResponse {
            endpoint: "test".to_string(),
            message: "bad gateway".to_string(),
            code: Some(502),
        }
        .is_retryable());

        assert!(!RpcManagerError::Validation("test".to_string()).is_retryable());
        assert!(!RpcManagerError::BlockhashNotFound {
            endpoint: "test".to_string(),
        }
        .is_retryable());
        assert!(!RpcManagerError::RpcResponse {
            endpoint: "test".to_string(),
            message: "invalid params".to_string(),
            code: Some(-32602),
        }
        .is_retryable());
    }

    #[test]
    fn test_classify_message() {
        let endpoint = "https://rpc.test";
        assert!(matches!(
            RpcManagerError::classify_message("Blockhash not found", endpoint, false),
            RpcManagerError::BlockhashNotFound { .. }
        ));
        assert!(matches!(
            RpcManagerError::classify_message(
                "Transaction simulation failed: Error processing Instruction 3: custom program error: 0x1771",
                endpoint,
                false
            ),
            RpcManagerError::Rejected { .. }
        ));
        assert!(matches!(
            RpcManagerError::classify_message(
                "Attempt to debit an account but found no record of a prior credit.",
                endpoint,
                false
            ),
            RpcManagerError::InsufficientFunds { .. }
        ));
        assert!(matches!(
            RpcManagerError::classify_message("HTTP status client error (429 Too Many Requests)", endpoint, true),
            RpcManagerError::RateLimitExceeded { .. }
        ));
        assert!(matches!(
            RpcManagerError::classify_message("error sending request: connection refused", endpoint, true),
            RpcManagerError::Transport { .. }
        ));
        match RpcManagerError::classify_message("server error, code: 503 unavailable", endpoint, false) {
            RpcManagerError::RpcResponse { code, .. } => assert_eq!(code, Some(503)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_error_endpoint() {
        let err = RpcManagerError::Timeout {
            endpoint: "https://test.com".to_string(),
            timeout_ms: 5000,
        };
        assert_eq!(err.endpoint(), Some("https://test.com"));
        assert!(err.is_endpoint_failure());

        let internal = RpcManagerError::Internal("test".to_string());
        assert_eq!(internal.endpoint(), None);
        assert!(!internal.is_endpoint_failure());
    }

    #[test]
    fn test_retry_policy_delay_doubles() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            jitter_factor: 0.0,
        };

        assert_eq!(policy.calculate_delay(0), Some(Duration::from_millis(100)));
        assert_eq!(policy.calculate_delay(1), Some(Duration::from_millis(200)));
        // Third attempt is the last one
        assert_eq!(policy.calculate_delay(2), None);
        assert_eq!(policy.calculate_delay(10), None);
    }

    #[test]
    fn test_retry_policy_caps_and_jitter() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 1_000,
            max_delay_ms: 3_000,
            jitter_factor: 0.0,
        };
        assert_eq!(policy.calculate_delay(5), Some(Duration::from_millis(3_000)));

        let jittered = RetryPolicy {
            jitter_factor: 0.1,
            ..policy
        };
        let delay = jittered.calculate_delay(0).unwrap();
        assert!(delay >= Duration::from_millis(900) && delay <= Duration::from_millis(1_100));

        assert_eq!(RetryPolicy::no_retry().calculate_delay(0), None);
    }
}
