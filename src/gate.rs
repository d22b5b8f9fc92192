//! Admission rate gate
//!
//! A token bucket in front of the mutation endpoint. One configured rate is
//! used both as the refill rate (tokens per second, refilled continuously) and
//! as the bucket capacity.

use std::num::NonZeroU32;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as GovernorLimiter};

/// Non-blocking token-bucket limiter shared by all request workers
pub struct AdmissionGate {
    inner: DefaultDirectRateLimiter,
    rate: NonZeroU32,
}

impl AdmissionGate {
    /// Create a gate allowing `rate` requests per second with a burst of `rate`
    #[must_use]
    pub fn new(rate: NonZeroU32) -> Self {
        let quota = Quota::per_second(rate).allow_burst(rate);
        Self {
            inner: GovernorLimiter::direct(quota),
            rate,
        }
    }

    /// Try to take one token.
    ///
    /// Never waits: returns `false` immediately when the bucket is empty.
    pub fn try_acquire(&self) -> bool {
        self.inner.check().is_ok()
    }

    /// Configured rate (and capacity)
    #[must_use]
    pub fn rate(&self) -> NonZeroU32 {
        self.rate
    }
}

impl std::fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("rate", &self.rate)
            .finish_non_exhaustive()
    }
}
