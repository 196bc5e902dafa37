//! Token-bucket request budget
//!
//! Implements rate limiting using the Governor crate. Each fetch pays a
//! number of tokens chosen by its [`CostClass`]: delta queries that start
//! without a usable token are the most expensive call the service offers.

use crate::error::{PagerError, Result};
use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Kind of remote call, deciding how much budget a fetch consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CostClass {
    /// Plain paged listing
    #[default]
    Default,
    /// Single item get, or a delta query resuming from a valid token
    SingleGetOrDelta,
    /// Delta query without a usable previous token
    DeltaNoToken,
}

/// Token cost of each [`CostClass`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostTable {
    /// Tokens for [`CostClass::Default`]
    pub default: u32,
    /// Tokens for [`CostClass::SingleGetOrDelta`]
    pub single_get_or_delta: u32,
    /// Tokens for [`CostClass::DeltaNoToken`]
    pub delta_no_token: u32,
}

impl Default for CostTable {
    fn default() -> Self {
        Self {
            default: 1,
            single_get_or_delta: 1,
            delta_no_token: 4,
        }
    }
}

impl CostTable {
    /// Tokens charged for a call of the given class (never zero)
    pub fn tokens(&self, cost: CostClass) -> u32 {
        let tokens = match cost {
            CostClass::Default => self.default,
            CostClass::SingleGetOrDelta => self.single_get_or_delta,
            CostClass::DeltaNoToken => self.delta_no_token,
        };
        tokens.max(1)
    }
}

/// Consulted before every page fetch
#[async_trait]
pub trait RequestLimiter: Send + Sync {
    /// Wait until a call of class `cost` may proceed.
    ///
    /// Returns [`PagerError::Cancelled`] if `ctx` is cancelled first.
    async fn consume(&self, ctx: &CancellationToken, cost: CostClass) -> Result<()>;
}

/// Limiter that never waits
#[derive(Debug, Clone, Copy, Default)]
pub struct Unlimited;

#[async_trait]
impl RequestLimiter for Unlimited {
    async fn consume(&self, ctx: &CancellationToken, _cost: CostClass) -> Result<()> {
        if ctx.is_cancelled() {
            return Err(PagerError::cancelled("waiting for request budget"));
        }
        Ok(())
    }
}

/// Shared request budget backed by a governor token bucket
pub struct RequestBudget {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    costs: CostTable,
}

impl RequestBudget {
    /// Create a new request budget
    ///
    /// # Arguments
    /// * `requests_per_second` - Sustained token refill rate
    /// * `burst` - Bucket size; how many tokens may be spent at once
    ///
    /// # Example
    /// ```
    /// use deltapager::limiter::RequestBudget;
    /// let budget = RequestBudget::new(16, 200);
    /// ```
    pub fn new(requests_per_second: u32, burst: u32) -> Self {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(rate);
        let quota = Quota::per_second(rate).allow_burst(burst);

        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
            costs: CostTable::default(),
        }
    }

    /// Override the per-class token costs
    pub fn with_costs(mut self, costs: CostTable) -> Self {
        self.costs = costs;
        self
    }

    /// Try to pay for a call without waiting.
    ///
    /// All or nothing: a refused call takes no tokens. Returns true if the
    /// whole cost was available.
    pub fn try_acquire(&self, cost: CostClass) -> bool {
        let tokens = NonZeroU32::new(self.costs.tokens(cost)).unwrap_or(NonZeroU32::MIN);
        matches!(self.limiter.check_n(tokens), Ok(Ok(_)))
    }
}

impl Clone for RequestBudget {
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            costs: self.costs,
        }
    }
}

#[async_trait]
impl RequestLimiter for RequestBudget {
    async fn consume(&self, ctx: &CancellationToken, cost: CostClass) -> Result<()> {
        let tokens = self.costs.tokens(cost);

        if self.try_acquire(cost) {
            tracing::trace!(?cost, tokens, "request budget consumed");
            return Ok(());
        }

        // One cell at a time so a cost above the burst size still drains.
        for _ in 0..tokens {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    return Err(PagerError::cancelled("waiting for request budget"));
                }
                _ = self.limiter.until_ready() => {}
            }
        }

        tracing::trace!(?cost, tokens, "request budget consumed");
        Ok(())
    }
}
