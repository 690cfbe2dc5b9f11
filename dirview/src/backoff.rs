use rand::Rng;
use std::time::Duration;

/// Exponential delay doubling from `base` and capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter,
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        if !self.jitter {
            return self.exponential(attempt);
        }
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exp = self.exponential(attempt);
        if self.jitter {
            let exp_ms = exp.as_millis().min(u128::from(u64::MAX)) as u64;
            Duration::from_millis(rng.gen_range(0..=exp_ms))
        } else {
            exp
        }
    }

    fn exponential(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let shift = attempt.min(16);
        Duration::from_millis(base_ms.saturating_mul(1u64 << shift).min(max_ms))
    }
}
