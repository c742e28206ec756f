//! Lock-free many-producer scalar accumulators.
//!
//! Pair kernels running on different worker threads add their potential and
//! virial contributions here; the driver reads the total once the parallel
//! phase has finished. Summation order across threads is unspecified, which
//! is acceptable for the diagnostic quantities collected this way.

use std::sync::atomic::{AtomicU64, Ordering};

/// A `f64` accumulator that many threads may add to concurrently.
#[derive(Debug, Default)]
pub struct ScalarAdder {
    bits: AtomicU64,
}

impl ScalarAdder {
    /// New adder holding zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bits: AtomicU64::new(0),
        }
    }

    /// Adds `value` with a compare-and-swap loop over the raw bits.
    pub fn add(&self, value: f64) {
        if value == 0.0 {
            return;
        }
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + value).to_bits();
            match self.bits.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Current total.
    #[must_use]
    pub fn sum(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Resets the total to zero.
    pub fn reset(&self) {
        self.bits.store(0, Ordering::Relaxed);
    }
}

/// Diagonal virial accumulators, one adder per axis.
#[derive(Debug, Default)]
pub struct PressureAdders {
    /// `sum(dx * Fx)` contributions.
    pub xx: ScalarAdder,
    /// `sum(dy * Fy)` contributions.
    pub yy: ScalarAdder,
    /// `sum(dz * Fz)` contributions.
    pub zz: ScalarAdder,
}

impl PressureAdders {
    /// New adder set holding zeros.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            xx: ScalarAdder::new(),
            yy: ScalarAdder::new(),
            zz: ScalarAdder::new(),
        }
    }

    /// Adds one pair's `delta * force` product per axis.
    pub fn add_pair(&self, delta: [f64; 3], force: [f64; 3]) {
        self.xx.add(delta[0] * force[0]);
        self.yy.add(delta[1] * force[1]);
        self.zz.add(delta[2] * force[2]);
    }

    /// The three diagonal sums.
    #[must_use]
    pub fn sums(&self) -> [f64; 3] {
        [self.xx.sum(), self.yy.sum(), self.zz.sum()]
    }

    /// Resets all three adders.
    pub fn reset(&self) {
        self.xx.reset();
        self.yy.reset();
        self.zz.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn accumulates_serially() {
        let adder = ScalarAdder::new();
        adder.add(1.5);
        adder.add(-0.5);
        adder.add(2.0);
        assert_approx_eq!(f64, adder.sum(), 3.0);
    }

    #[test]
    fn accumulates_from_many_threads() {
        let adder = Arc::new(ScalarAdder::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let adder = Arc::clone(&adder);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        adder.add(0.25);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_approx_eq!(f64, adder.sum(), 8.0 * 10_000.0 * 0.25);
    }

    #[test]
    fn reset_clears_the_total() {
        let adder = ScalarAdder::new();
        adder.add(4.0);
        adder.reset();
        assert_approx_eq!(f64, adder.sum(), 0.0);
    }

    #[test]
    fn pressure_adders_track_per_axis_products() {
        let adders = PressureAdders::new();
        adders.add_pair([1.0, 2.0, 3.0], [0.5, 0.5, 0.5]);
        adders.add_pair([1.0, 0.0, -1.0], [1.0, 1.0, 1.0]);
        let [xx, yy, zz] = adders.sums();
        assert_approx_eq!(f64, xx, 1.5);
        assert_approx_eq!(f64, yy, 1.0);
        assert_approx_eq!(f64, zz, 0.5);
    }
}
