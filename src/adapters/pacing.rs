//! Per-source request pacing

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::trace;

/// Rate limiter shared by every call an adapter makes to its source
#[derive(Clone)]
pub struct SourcePacer {
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl SourcePacer {
    /// Pace to `requests_per_hour`; no budget means no pacing
    pub fn per_hour(requests_per_hour: Option<u32>) -> Self {
        let limiter = requests_per_hour.map(|n| {
            let n = NonZeroU32::new(n).unwrap_or(nonzero!(1u32));
            Arc::new(RateLimiter::direct(Quota::per_hour(n)))
        });
        Self { limiter }
    }

    pub fn unlimited() -> Self {
        Self { limiter: None }
    }

    /// Wait until the next request is allowed
    pub async fn wait(&self) {
        if let Some(limiter) = &self.limiter {
            trace!("Waiting for source rate limit");
            limiter.until_ready().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_burst_within_budget_is_immediate() {
        let pacer = SourcePacer::per_hour(Some(100));
        let start = Instant::now();
        for _ in 0..5 {
            pacer.wait().await;
        }
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_unlimited() {
        let pacer = SourcePacer::unlimited();
        pacer.wait().await;
        assert!(pacer.limiter.is_none());
    }
}
