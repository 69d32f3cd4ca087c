//! Timing harness: short-lived measurement of a batch of kernel launches.
//!
//! A measured batch enqueues every launch back-to-back and ends with one
//! blocking wait; the clock starts immediately before the first submission and
//! stops when the wait returns. Callers run one untimed batch first to absorb
//! first-launch overhead (pipeline compilation, first-dispatch costs).

use anyhow::Result;
use std::time::{Duration, Instant};

/// Elapsed wall time for a batch of kernel launches.
#[derive(Debug, Clone, Copy)]
pub struct LaunchTiming {
    pub elapsed: Duration,
    pub launches: u32,
}

impl LaunchTiming {
    pub fn average_micros(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1.0e6 / f64::from(self.launches.max(1))
    }

    pub fn average_millis(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1.0e3 / f64::from(self.launches.max(1))
    }
}

/// Run `f` and return how long it took.
pub fn measure<F: FnOnce() -> Result<()>>(f: F) -> Result<Duration> {
    let start = Instant::now();
    f()?;
    Ok(start.elapsed())
}

/// Enqueue `launches` kernel launches back-to-back, then block on `wait`.
pub fn measure_batch<E, W>(launches: u32, mut enqueue: E, wait: W) -> Result<LaunchTiming>
where
    E: FnMut() -> Result<()>,
    W: FnOnce() -> Result<()>,
{
    let elapsed = measure(|| {
        for _ in 0..launches {
            enqueue()?;
        }
        wait()
    })?;
    Ok(LaunchTiming { elapsed, launches })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_runs_every_launch_then_waits() {
        let mut enqueued = 0u32;
        let mut waited = false;
        let timing = measure_batch(
            5,
            || {
                enqueued += 1;
                Ok(())
            },
            || {
                waited = true;
                Ok(())
            },
        )
        .expect("measure");
        assert_eq!(enqueued, 5);
        assert!(waited);
        assert_eq!(timing.launches, 5);
    }

    #[test]
    fn averages_do_not_divide_by_zero() {
        let timing = LaunchTiming {
            elapsed: Duration::from_micros(100),
            launches: 0,
        };
        assert!(timing.average_micros() >= 0.0);
    }

    #[test]
    fn enqueue_error_propagates() {
        let result = measure_batch(1, || Err(anyhow::anyhow!("boom")), || Ok(()));
        assert!(result.is_err());
    }
}
