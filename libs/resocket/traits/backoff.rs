use std::time::Duration;

/// Trait for defining reconnection backoff strategies
///
/// A backoff tracks how many consecutive retries have happened since the
/// last successful connection and computes the delay before the next one.
///
/// The connection calls [`Backoff::next`] once per scheduled retry and
/// [`Backoff::reset`] exactly once after a successful re-open. `next` may be
/// called before any `reset` (the very first failure).
pub trait Backoff: Send {
    /// Compute the delay before the next retry and count the retry
    fn next(&mut self) -> Duration;

    /// Forget accumulated retries (called after a successful re-open)
    fn reset(&mut self);

    /// Consecutive retries since the last reset
    fn retries(&self) -> usize;

    /// The delay returned by the last call to `next` (zero before any)
    fn current(&self) -> Duration;
}

/// Constant backoff strategy
///
/// Always waits the same amount of time between retries
#[derive(Debug, Clone)]
pub struct ConstantBackoff {
    delay: Duration,
    retries: usize,
    current: Duration,
}

impl ConstantBackoff {
    /// Create a new constant backoff
    ///
    /// # Arguments
    /// * `delay` - The fixed delay between retries
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            retries: 0,
            current: Duration::ZERO,
        }
    }
}

impl Backoff for ConstantBackoff {
    fn next(&mut self) -> Duration {
        self.retries += 1;
        self.current = self.delay;
        self.current
    }

    fn reset(&mut self) {
        self.retries = 0;
        self.current = Duration::ZERO;
    }

    fn retries(&self) -> usize {
        self.retries
    }

    fn current(&self) -> Duration {
        self.current
    }
}

/// Linear backoff strategy
///
/// Delays grow by a fixed increment per retry:
/// initial + increment * retries, optionally capped at max_delay
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    initial_delay: Duration,
    increment: Duration,
    max_delay: Option<Duration>,
    retries: usize,
    current: Duration,
}

impl LinearBackoff {
    /// Create a new linear backoff
    ///
    /// # Arguments
    /// * `initial_delay` - Delay before the first retry
    /// * `increment` - Added to the delay on every subsequent retry
    /// * `max_delay` - Upper bound on the delay (None = unbounded)
    pub fn new(initial_delay: Duration, increment: Duration, max_delay: Option<Duration>) -> Self {
        Self {
            initial_delay,
            increment,
            max_delay,
            retries: 0,
            current: Duration::ZERO,
        }
    }
}

impl Backoff for LinearBackoff {
    fn next(&mut self) -> Duration {
        let steps = u32::try_from(self.retries).unwrap_or(u32::MAX);
        let delay = self
            .increment
            .checked_mul(steps)
            .and_then(|extra| self.initial_delay.checked_add(extra))
            .unwrap_or(Duration::MAX);

        self.current = match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        };
        self.retries += 1;
        self.current
    }

    fn reset(&mut self) {
        self.retries = 0;
        self.current = Duration::ZERO;
    }

    fn retries(&self) -> usize {
        self.retries
    }

    fn current(&self) -> Duration {
        self.current
    }
}

/// Exponential backoff strategy
///
/// Delays between retries grow exponentially:
/// initial_delay * 2^retries, with the exponent capped at max_exponent
/// and the resulting delay capped at max_delay
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    max_exponent: Option<u32>,
    retries: usize,
    current: Duration,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff strategy
    ///
    /// # Arguments
    /// * `initial_delay` - The delay before the first retry
    /// * `max_delay` - The maximum delay between retries
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_exponent: None,
            retries: 0,
            current: Duration::ZERO,
        }
    }

    /// Stop doubling once the exponent reaches `max_exponent`
    pub fn with_max_exponent(mut self, max_exponent: u32) -> Self {
        self.max_exponent = Some(max_exponent);
        self
    }
}

impl Backoff for ExponentialBackoff {
    fn next(&mut self) -> Duration {
        let mut exponent = u32::try_from(self.retries).unwrap_or(u32::MAX);
        if let Some(max) = self.max_exponent {
            exponent = exponent.min(max);
        }

        let delay = 2u32
            .checked_pow(exponent)
            .and_then(|factor| self.initial_delay.checked_mul(factor))
            .unwrap_or(self.max_delay);

        self.current = delay.min(self.max_delay);
        self.retries += 1;
        self.current
    }

    fn reset(&mut self) {
        self.retries = 0;
        self.current = Duration::ZERO;
    }

    fn retries(&self) -> usize {
        self.retries
    }

    fn current(&self) -> Duration {
        self.current
    }
}
