//! Weighted random selection.
//!
//! Picks one effect from a pool with probability proportional to its
//! weight. Weights are read once per call so a concurrent knob change
//! cannot skew a single walk.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::effect::EffectDescriptor;
use crate::error::ChaosError;

/// Selects an effect from `pool` by relative weight.
///
/// Disabled entries and entries with weight `<= 0` contribute nothing and
/// are never returned. A value `r` is drawn uniformly from `[0, total)` and
/// the pool is walked in order; the first eligible entry whose running sum
/// reaches `r` wins. If floating-point accumulation leaves the walk without
/// a winner, the last eligible entry is returned.
///
/// # Errors
///
/// Returns [`ChaosError::NoEligibleEffects`] when the pool is empty or its
/// eligible weight sums to zero (or a non-finite value).
pub fn select<R: Rng + ?Sized>(
    pool: &[Arc<EffectDescriptor>],
    rng: &mut R,
) -> Result<Arc<EffectDescriptor>, ChaosError> {
    let weighted: Vec<(&Arc<EffectDescriptor>, f64)> = pool
        .iter()
        .filter_map(|effect| {
            let weight = effect.weight();
            (effect.enabled() && weight > 0.0).then_some((effect, weight))
        })
        .collect();

    let total: f64 = weighted.iter().map(|(_, w)| w).sum();
    if !(total.is_finite() && total > 0.0) {
        return Err(ChaosError::NoEligibleEffects);
    }

    let roll = rng.random_range(0.0..total);
    let mut cumulative = 0.0;
    for (effect, weight) in &weighted {
        cumulative += weight;
        if cumulative >= roll {
            return Ok(Arc::clone(effect));
        }
    }

    // Accumulated rounding kept the walk below the roll.
    weighted
        .last()
        .map(|(effect, _)| Arc::clone(effect))
        .ok_or(ChaosError::NoEligibleEffects)
}

/// Thread-safe selector owning its random source.
///
/// Also draws the scheduler's inter-cycle intervals so that a seeded run is
/// reproducible end to end.
#[derive(Debug)]
pub struct WeightedSelector {
    rng: Mutex<StdRng>,
}

impl WeightedSelector {
    /// Creates a selector seeded from the operating system.
    #[must_use]
    pub fn from_os_rng() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Creates a deterministic selector.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Creates a selector from an optional seed.
    #[must_use]
    pub fn new(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::from_os_rng, Self::seeded)
    }

    /// Selects an effect from `pool`. See [`select`].
    ///
    /// # Errors
    ///
    /// Returns [`ChaosError::NoEligibleEffects`] for an empty or zero-weight pool.
    pub fn select(
        &self,
        pool: &[Arc<EffectDescriptor>],
    ) -> Result<Arc<EffectDescriptor>, ChaosError> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        select(pool, &mut *rng)
    }

    /// Draws a duration uniformly from `[min, max]`.
    ///
    /// Bounds are swapped if given in the wrong order.
    #[must_use]
    pub fn draw_interval(&self, min: Duration, max: Duration) -> Duration {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        if lo == hi {
            return lo;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let secs = rng.random_range(lo.as_secs_f64()..=hi.as_secs_f64());
        drop(rng);
        Duration::try_from_secs_f64(secs).unwrap_or(hi)
    }
}
