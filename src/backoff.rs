/*
 * Copyright 2026 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! How long to wait between connection attempts.

use std::fmt;
use std::time::Duration;

/// Maps a retry attempt (numbered from 1) to the time to wait before making it.
///
/// Implemented for any `Fn(u32) -> Duration`, so a closure can be passed wherever a `Backoff`
/// is expected:
///
/// ```
/// use std::time::Duration;
/// use redis_dispatch::client::ConnectionBuilder;
///
/// let mut builder = ConnectionBuilder::new("127.0.0.1", 6379).unwrap();
/// builder.backoff(|attempt: u32| Duration::from_millis(100 * attempt as u64));
/// ```
pub trait Backoff: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

impl<F> Backoff for F
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    fn delay(&self, attempt: u32) -> Duration {
        self(attempt)
    }
}

/// `min(max, min * multiplier ^ (attempt - 1))`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    multiplier: f64,
    min: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    /// A `multiplier` below 1 is raised to 1, and `max` is never allowed below `min`, so delays
    /// never shrink as attempts increase.
    pub fn new(multiplier: f64, min: Duration, max: Duration) -> Self {
        let multiplier = if multiplier.is_finite() && multiplier >= 1.0 {
            multiplier
        } else {
            1.0
        };
        ExponentialBackoff {
            multiplier,
            min,
            max: max.max(min),
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        ExponentialBackoff::new(2.0, Duration::from_millis(500), Duration::from_millis(5000))
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.min.as_millis() as f64 * self.multiplier.powi(exponent);
        if !millis.is_finite() || millis >= self.max.as_millis() as f64 {
            self.max
        } else {
            Duration::from_millis(millis as u64)
        }
    }
}

impl fmt::Display for ExponentialBackoff {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "exponential({}x, {:?}..{:?})",
            self.multiplier, self.min, self.max
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Backoff, ExponentialBackoff};

    fn millis(backoff: &dyn Backoff, attempt: u32) -> u128 {
        backoff.delay(attempt).as_millis()
    }

    #[test]
    fn doubles_until_clamped() {
        let backoff =
            ExponentialBackoff::new(2.0, Duration::from_millis(1000), Duration::from_millis(5000));
        let delays: Vec<_> = (1..=5).map(|attempt| millis(&backoff, attempt)).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 5000, 5000]);
    }

    #[test]
    fn default_policy() {
        let backoff = ExponentialBackoff::default();
        assert_eq!(millis(&backoff, 1), 500);
        assert_eq!(millis(&backoff, 2), 1000);
        assert_eq!(millis(&backoff, 4), 4000);
        assert_eq!(millis(&backoff, 5), 5000);
        assert_eq!(millis(&backoff, u32::MAX), 5000);
    }

    #[test]
    fn never_decreases() {
        for multiplier in [1.0, 1.5, 2.0, 3.0, 10.0] {
            let backoff = ExponentialBackoff::new(
                multiplier,
                Duration::from_millis(7),
                Duration::from_millis(60_000),
            );
            let mut previous = 0;
            for attempt in 1..200 {
                let delay = millis(&backoff, attempt);
                assert!(delay >= previous, "{} at attempt {}", backoff, attempt);
                previous = delay;
            }
        }
    }

    #[test]
    fn bad_parameters_are_normalised() {
        let backoff =
            ExponentialBackoff::new(0.5, Duration::from_millis(100), Duration::from_millis(10));
        assert_eq!(millis(&backoff, 1), 100);
        assert_eq!(millis(&backoff, 3), 100);
    }

    #[test]
    fn closures_are_policies() {
        let backoff = |attempt: u32| Duration::from_secs(attempt as u64);
        assert_eq!(millis(&backoff, 3), 3000);
    }
}
