//! Backoff delay computation.

use std::fmt;
use std::time::Duration;

use rand::Rng;

use super::RetryContext;

/// Computes how long to wait before the next retry.
///
/// The context passed in is the one *before* the transition, so the first
/// retry sees `attempt == 0`. Delays are whole milliseconds.
pub trait RetryStrategy: Send + Sync {
    /// Delay to apply before the next retry.
    fn delay(&self, context: &RetryContext) -> Duration;
}

impl<F> RetryStrategy for F
where
    F: Fn(&RetryContext) -> Duration + Send + Sync,
{
    fn delay(&self, context: &RetryContext) -> Duration {
        self(context)
    }
}

/// Retry immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl RetryStrategy for NoDelay {
    fn delay(&self, _context: &RetryContext) -> Duration {
        Duration::ZERO
    }
}

/// Constant delay between retries.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    /// Wait `delay` before every retry.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay: truncate_to_millis(delay),
        }
    }
}

impl RetryStrategy for FixedDelay {
    fn delay(&self, _context: &RetryContext) -> Duration {
        self.delay
    }
}

/// Exponential backoff with optional full jitter.
///
/// The capped delay is `min(base * multiplier^attempt, max)`. With jitter the
/// returned value is drawn uniformly from `[0, capped]` on every call.
#[derive(Clone, Copy)]
pub struct ExponentialBackoff {
    base: Duration,
    multiplier: f64,
    max: Duration,
    jitter: bool,
}

impl fmt::Debug for ExponentialBackoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExponentialBackoff")
            .field("base_ms", &self.base.as_millis())
            .field("multiplier", &self.multiplier)
            .field("max_ms", &self.max.as_millis())
            .field("jitter", &self.jitter)
            .finish()
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 2.0, Duration::from_secs(30))
    }
}

impl ExponentialBackoff {
    /// Backoff without jitter.
    ///
    /// Multipliers below `1.0` (or NaN) are raised to `1.0`.
    #[must_use]
    pub fn new(base: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            base: truncate_to_millis(base),
            multiplier: if multiplier >= 1.0 { multiplier } else { 1.0 },
            max: truncate_to_millis(max),
            jitter: false,
        }
    }

    /// Enable or disable full jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Capped delay for a 0-based retry number, before jitter.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let max_ms = self.max.as_millis() as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw_ms = self.base.as_millis() as f64 * self.multiplier.powi(exponent);
        // `as` saturates; an infinite product lands on the cap first
        Duration::from_millis(raw_ms.min(max_ms).max(0.0) as u64)
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn delay(&self, context: &RetryContext) -> Duration {
        let capped = self.capped_delay(context.attempt());
        if !self.jitter {
            return capped;
        }
        let capped_ms = u64::try_from(capped.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::rng().random_range(0..=capped_ms))
    }
}

fn truncate_to_millis(duration: Duration) -> Duration {
    Duration::from_millis(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{Error, Method, Request};

    fn context_at(attempt: u32) -> RetryContext {
        let url = url::Url::parse("https://example.com").expect("url");
        let request = Request::builder(Method::Get, url).build().expect("request");
        (0..attempt).fold(RetryContext::new(request, 100), |ctx, _| {
            ctx.next_attempt(Arc::new(Error::Timeout), Duration::ZERO)
        })
    }

    fn millis(strategy: &dyn RetryStrategy, attempt: u32) -> u128 {
        strategy.delay(&context_at(attempt)).as_millis()
    }

    #[test]
    fn fixed_delay_ignores_context() {
        let strategy = FixedDelay::new(Duration::from_millis(250));
        assert_eq!(millis(&strategy, 0), 250);
        assert_eq!(millis(&strategy, 7), 250);
    }

    #[test]
    fn fixed_delay_truncates_sub_millisecond_part() {
        let strategy = FixedDelay::new(Duration::from_micros(1_999));
        assert_eq!(strategy.delay(&context_at(0)), Duration::from_millis(1));
    }

    #[test]
    fn exponential_without_jitter() {
        let strategy = ExponentialBackoff::new(
            Duration::from_millis(1000),
            2.0,
            Duration::from_millis(30_000),
        );

        assert_eq!(millis(&strategy, 0), 1000);
        assert_eq!(millis(&strategy, 1), 2000);
        assert_eq!(millis(&strategy, 2), 4000);
        assert_eq!(millis(&strategy, 3), 8000);
        assert_eq!(millis(&strategy, 4), 16_000);
        assert_eq!(millis(&strategy, 5), 30_000);
    }

    #[test]
    fn exponential_saturates_on_huge_attempts() {
        let strategy = ExponentialBackoff::new(
            Duration::from_millis(100),
            10.0,
            Duration::from_secs(60),
        );
        assert_eq!(strategy.capped_delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn exponential_clamps_small_multiplier() {
        let strategy =
            ExponentialBackoff::new(Duration::from_millis(500), 0.5, Duration::from_secs(10));
        assert_eq!(strategy.capped_delay(4), Duration::from_millis(500));

        let strategy =
            ExponentialBackoff::new(Duration::from_millis(500), f64::NAN, Duration::from_secs(10));
        assert_eq!(strategy.capped_delay(4), Duration::from_millis(500));
    }

    #[test]
    fn full_jitter_stays_within_zero_and_cap() {
        let strategy = ExponentialBackoff::new(
            Duration::from_millis(100),
            2.0,
            Duration::from_millis(1_000),
        )
        .with_jitter(true);

        for attempt in 0..6 {
            let cap = strategy.capped_delay(attempt);
            for _ in 0..50 {
                assert!(strategy.delay(&context_at(attempt)) <= cap);
            }
        }
    }

    #[test]
    fn closure_strategy() {
        let strategy = |ctx: &RetryContext| Duration::from_millis(u64::from(ctx.attempt()) * 10);
        assert_eq!(millis(&strategy, 3), 30);
        assert_eq!(millis(&NoDelay, 3), 0);
    }
}
