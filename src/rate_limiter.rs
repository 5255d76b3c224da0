use crate::error::Result;
use crate::key_generator::bucket_key;
use crate::rate_limit_config::RateLimitRule;
use crate::store::CounterStore;
use axum::extract::Request;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of recording one request against a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { count: u64 },
    Limited { count: u64, retry_after_secs: u64 },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// Post-increment count the decision was based on.
    pub fn count(&self) -> u64 {
        match *self {
            Decision::Allowed { count } | Decision::Limited { count, .. } => count,
        }
    }
}

/// Fixed-window admission control against a shared counter store.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    rule: RateLimitRule,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, rule: RateLimitRule) -> Result<Self> {
        rule.validate()?;
        Ok(Self { store, rule })
    }

    pub fn rule(&self) -> &RateLimitRule {
        &self.rule
    }

    /// Identity of the requester according to the rule's key selector.
    pub fn identify(&self, request: &Request) -> String {
        self.rule.key_selector.select(request)
    }

    /// Record one request for `path` from `identity` and decide whether it
    /// may proceed.
    ///
    /// Once a key is over the limit it stays limited until the store expires
    /// it; the count is never decremented.
    pub async fn check(&self, path: &str, identity: &str) -> Result<Decision> {
        let key = bucket_key(path, identity);
        let count = self
            .store
            .increment(&key, self.rule.window_secs, self.rule.window_mode)
            .await?;

        if count > self.rule.max_requests {
            info!(
                target: "redis_ratelimit::limiter",
                key = %key,
                count,
                limit = self.rule.max_requests,
                "Rate limit exceeded"
            );
            return Ok(Decision::Limited {
                count,
                retry_after_secs: self.rule.window_secs,
            });
        }

        debug!(
            target: "redis_ratelimit::limiter",
            key = %key,
            count,
            limit = self.rule.max_requests,
            "Request admitted"
        );
        Ok(Decision::Allowed { count })
    }
}
