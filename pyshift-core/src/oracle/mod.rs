//! External oracle interfaces.
//!
//! The engine delegates two high-judgement steps: turning free-form
//! release notes into structured breaking changes (extraction), and
//! rewriting a source slice the deterministic tiers cannot handle
//! (rewrite). Both are pluggable; the engine depends only on the traits
//! here plus an [`AccessGate`] consulted before any rewrite call.

pub mod providers;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::OracleError;
use crate::types::BreakingChange;

/// One changelog/migration-guide document fetched from upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub url: String,
    pub content_type: String,
    pub content: String,
}

/// Converts release documents into breaking-change candidates.
#[async_trait::async_trait]
pub trait ExtractionOracle: Send + Sync + std::fmt::Debug {
    async fn extract(
        &self,
        library: &str,
        from_version: &str,
        to_version: &str,
        document: &SourceDocument,
    ) -> Result<Vec<BreakingChange>, OracleError>;
}

/// Everything a rewrite call needs.
#[derive(Debug)]
pub struct RewriteRequest<'a> {
    pub library: &'a str,
    pub from_version: &'a str,
    pub to_version: &'a str,
    /// The spec entry guiding a tier-2 rewrite; `None` for tier-3.
    pub breaking_change: Option<&'a BreakingChange>,
    /// The source slice to rewrite.
    pub slice: &'a str,
}

/// Rewrites a source slice for the target version.
///
/// The returned replacement is accepted only if it parses; that check is
/// the caller's responsibility.
#[async_trait::async_trait]
pub trait RewriteOracle: Send + Sync + std::fmt::Debug {
    async fn rewrite(&self, request: &RewriteRequest<'_>) -> Result<String, OracleError>;
}

/// Yes/no predicate consulted before invoking the rewrite oracle.
/// On `false` the engine degrades to a lower tier.
pub trait AccessGate: Send + Sync + std::fmt::Debug {
    fn allows_rewrite(&self) -> bool;

    /// Why rewrite access is denied, for the skip diagnostic.
    fn denial_reason(&self) -> String {
        "rewrite oracle access denied".to_string()
    }
}

/// Gate that always allows oracle use.
#[derive(Debug, Default)]
pub struct AllowAllGate;

impl AccessGate for AllowAllGate {
    fn allows_rewrite(&self) -> bool {
        true
    }
}

/// Gate that always denies, with a fixed reason.
#[derive(Debug)]
pub struct DenyAllGate(pub String);

impl AccessGate for DenyAllGate {
    fn allows_rewrite(&self) -> bool {
        false
    }

    fn denial_reason(&self) -> String {
        self.0.clone()
    }
}

/// Token usage from one oracle call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Cumulative oracle accounting across a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageTracker {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_requests: u64,
    pub cache_hits: u64,
}

impl UsageTracker {
    pub fn record_call(&mut self, usage: &TokenUsage) {
        self.total_input_tokens += usage.input_tokens;
        self.total_output_tokens += usage.output_tokens;
        self.total_requests += 1;
    }

    pub fn record_cache_hit(&mut self) {
        self.cache_hits += 1;
    }
}

/// Retry an I/O-bound operation with exponential backoff.
///
/// Only retriable resource errors are retried; everything else fails
/// immediately. The backoff schedule is 500 ms doubling per attempt.
pub async fn with_backoff<T, F, Fut>(attempts: u32, mut operation: F) -> Result<T, OracleError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, OracleError>>,
{
    let mut delay = Duration::from_millis(500);
    let mut last_error = None;
    for attempt in 0..attempts.max(1) {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retriable() && attempt + 1 < attempts => {
                tracing::debug!(attempt, error = %e, "retriable oracle failure, backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_error.unwrap_or_else(|| OracleError::Network("retry budget exhausted".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn usage_tracker_accumulates() {
        let mut tracker = UsageTracker::default();
        tracker.record_call(&TokenUsage {
            input_tokens: 100,
            output_tokens: 50,
        });
        tracker.record_call(&TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        });
        tracker.record_cache_hit();
        assert_eq!(tracker.total_requests, 2);
        assert_eq!(tracker.total_input_tokens, 110);
        assert_eq!(tracker.total_output_tokens, 55);
        assert_eq!(tracker.cache_hits, 1);
    }

    #[tokio::test]
    async fn backoff_retries_retriable_errors() {
        let calls = AtomicU32::new(0);
        let result = with_backoff(3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(OracleError::Network("flaky".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn backoff_does_not_retry_non_retriable() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(OracleError::Denied("quota".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn gates() {
        assert!(AllowAllGate.allows_rewrite());
        let deny = DenyAllGate("no subscription".into());
        assert!(!deny.allows_rewrite());
        assert_eq!(deny.denial_reason(), "no subscription");
    }
}
