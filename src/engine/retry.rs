//! Failure classification and retry delays.
//!
//! Typed errors classify directly. Free-text errors from providers and
//! collaborators are classified by phrase: authorization and quota phrases
//! are terminal, circuit-breaker phrases ask for a cool-down, and network,
//! timeout, 5xx and 429 phrases are transient. Anything else is terminal.

use std::time::Duration;

use rand::Rng;

use crate::error::Error;

/// What the queue should do with a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retry at boosted priority.
    Transient,
    /// Retry after a cool-down. `None` means use the policy default.
    CircuitOpen { cooldown: Option<Duration> },
    /// Never retry.
    Terminal,
}

impl FailureClass {
    pub fn is_retryable(self) -> bool {
        !matches!(self, FailureClass::Terminal)
    }
}

const TERMINAL_PHRASES: &[&str] = &[
    "invalid api key",
    "invalid_api_key",
    "invalid x-api-key",
    "unauthorized",
    "authentication",
    "permission denied",
    "forbidden",
    "quota",
    "billing",
];

const CIRCUIT_PHRASES: &[&str] = &["circuit breaker", "circuit open", "circuit is open"];

const TRANSIENT_PHRASES: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "connection reset",
    "connection refused",
    "connection closed",
    "econnreset",
    "econnrefused",
    "socket hang up",
    "temporarily unavailable",
    "service unavailable",
    "bad gateway",
    "overloaded",
    "rate limit",
    "too many requests",
];

/// Upper bound on any cool-down parsed from error text.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

const TERMINAL_CODES: &[&str] = &["401", "403"];
const TRANSIENT_CODES: &[&str] = &["429", "500", "502", "503", "504", "529"];

pub fn classify(err: &Error) -> FailureClass {
    match err {
        Error::Timeout(_) => FailureClass::Transient,
        Error::CircuitOpen { retry_after } => FailureClass::CircuitOpen {
            cooldown: *retry_after,
        },
        Error::Io(e) => match e.kind() {
            std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::BrokenPipe => FailureClass::Transient,
            _ => classify_message(&e.to_string()),
        },
        Error::Provider { message, .. } | Error::Other(message) => classify_message(message),
        Error::Unauthorized(_)
        | Error::QuotaExhausted(_)
        | Error::SourceUnavailable(_)
        | Error::MalformedOutput(_)
        | Error::NotFound(_)
        | Error::InvalidTransition { .. }
        | Error::Config(_)
        | Error::Json(_) => FailureClass::Terminal,
    }
}

pub fn is_retryable(err: &Error) -> bool {
    classify(err).is_retryable()
}

/// Classify free text. Terminal phrases win over transient ones.
pub fn classify_message(message: &str) -> FailureClass {
    let lower = message.to_lowercase();

    if TERMINAL_PHRASES.iter().any(|p| lower.contains(p)) || has_code(&lower, TERMINAL_CODES) {
        return FailureClass::Terminal;
    }
    if CIRCUIT_PHRASES.iter().any(|p| lower.contains(p)) {
        return FailureClass::CircuitOpen {
            cooldown: parse_retry_after(&lower),
        };
    }
    if TRANSIENT_PHRASES.iter().any(|p| lower.contains(p)) || has_code(&lower, TRANSIENT_CODES) {
        return FailureClass::Transient;
    }
    FailureClass::Terminal
}

/// True if any of `codes` appears as a standalone numeric token.
fn has_code(message: &str, codes: &[&str]) -> bool {
    message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| codes.contains(&token))
}

/// Extract a delay from "retry after 30s", "retry in 1500ms", "cooldown: 5 min".
/// Capped at [`MAX_RETRY_AFTER`].
pub fn parse_retry_after(message: &str) -> Option<Duration> {
    let lower = message.to_lowercase();
    let start = ["retry after", "retry in", "cooldown"]
        .iter()
        .filter_map(|marker| lower.find(marker).map(|i| i + marker.len()))
        .min()?;

    let rest = lower[start..].trim_start_matches(|c: char| c == ':' || c == '=' || c.is_whitespace());
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    let amount: u64 = digits.parse().ok()?;
    let unit = rest[digits.len()..].trim_start();

    let delay = if unit.starts_with("ms") || unit.starts_with("milli") {
        Duration::from_millis(amount)
    } else if unit.starts_with('m') {
        Duration::from_secs(amount.saturating_mul(60))
    } else {
        Duration::from_secs(amount)
    };
    Some(delay.min(MAX_RETRY_AFTER))
}

/// Retry limits and delays for failed executions.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first failure.
    pub max_attempts: u32,
    /// First transient retry delay; doubles per attempt. Zero re-inserts immediately.
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random extra delay, as a fraction of the delay.
    pub jitter: f64,
    /// Cool-down used when a circuit-breaker failure names no delay.
    pub circuit_cooldown: Duration,
    /// Added to a job's priority on each retry.
    pub priority_boost: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
            circuit_cooldown: Duration::from_secs(300),
            priority_boost: 10,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32, class: FailureClass) -> Duration {
        let base = match class {
            FailureClass::Terminal => return Duration::ZERO,
            FailureClass::CircuitOpen { cooldown } => cooldown
                .unwrap_or(self.circuit_cooldown)
                .min(MAX_RETRY_AFTER.max(self.circuit_cooldown)),
            FailureClass::Transient => {
                if self.base_delay.is_zero() {
                    return Duration::ZERO;
                }
                let exponent = attempt.saturating_sub(1).min(16);
                self.base_delay
                    .saturating_mul(1u32 << exponent)
                    .min(self.max_delay)
            }
        };
        self.with_jitter(base)
    }

    fn with_jitter(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::rng().random_range(0.0..=self.jitter);
        Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + factor)).unwrap_or(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_phrases_are_retryable() {
        for msg in [
            "request timed out",
            "HTTP 503 Service Unavailable",
            "status 429",
            "ECONNRESET",
            "upstream overloaded",
        ] {
            assert_eq!(classify_message(msg), FailureClass::Transient, "{msg}");
        }
    }

    #[test]
    fn auth_and_quota_are_terminal() {
        for msg in [
            "401 Unauthorized",
            "invalid api key provided",
            "insufficient_quota: you exceeded your current quota",
            "rate limit hit, quota exhausted",
        ] {
            assert_eq!(classify_message(msg), FailureClass::Terminal, "{msg}");
        }
    }

    #[test]
    fn status_codes_match_whole_tokens_only() {
        assert_eq!(classify_message("used 5000 tokens"), FailureClass::Terminal);
        assert_eq!(classify_message("upstream returned 502"), FailureClass::Transient);
    }

    #[test]
    fn circuit_breaker_carries_parsed_cooldown() {
        assert_eq!(
            classify_message("Circuit breaker open, retry after 45s"),
            FailureClass::CircuitOpen {
                cooldown: Some(Duration::from_secs(45))
            }
        );
        assert_eq!(
            classify_message("circuit breaker tripped"),
            FailureClass::CircuitOpen { cooldown: None }
        );
    }

    #[test]
    fn parses_retry_after_units() {
        assert_eq!(parse_retry_after("retry in 1500ms"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_retry_after("cooldown: 5 min"), Some(Duration::from_secs(300)));
        assert_eq!(parse_retry_after("retry after soon"), None);
    }

    #[test]
    fn transient_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay(1, FailureClass::Transient), Duration::from_secs(1));
        assert_eq!(policy.delay(2, FailureClass::Transient), Duration::from_secs(2));
        assert_eq!(policy.delay(3, FailureClass::Transient), Duration::from_secs(3));
    }

    #[test]
    fn circuit_delay_uses_default_and_jitter_bounds() {
        let policy = RetryPolicy::default();
        let delay = policy.delay(1, FailureClass::CircuitOpen { cooldown: None });
        assert!(delay >= Duration::from_secs(300));
        assert!(delay <= Duration::from_secs(360));
        assert_eq!(policy.delay(1, FailureClass::Transient), Duration::ZERO);
    }

    #[test]
    fn oversized_retry_after_is_capped() {
        assert_eq!(
            parse_retry_after("retry after 307445734561825861 min"),
            Some(MAX_RETRY_AFTER)
        );
        assert_eq!(
            classify_message("circuit breaker open, retry after 18446744073709551615s"),
            FailureClass::CircuitOpen {
                cooldown: Some(MAX_RETRY_AFTER)
            }
        );
    }

    #[test]
    fn huge_typed_cooldown_does_not_overflow_jitter() {
        let policy = RetryPolicy {
            jitter: 1.0,
            ..RetryPolicy::default()
        };
        let delay = policy.delay(
            1,
            FailureClass::CircuitOpen {
                cooldown: Some(Duration::MAX),
            },
        );
        assert!(delay >= MAX_RETRY_AFTER);
        assert!(delay <= MAX_RETRY_AFTER * 2);
    }
}
