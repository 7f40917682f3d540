use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use ndarray::{ArrayD, IxDyn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::config::{self, DType, Device};
use crate::error::{FactorError, Result};

/// Source of pseudo-random draws, one method per supported family.
///
/// Injected per distribution node; shared as [`SharedGenerator`]. Implementations
/// must be internally synchronized. No ordering is guaranteed between
/// concurrent draws from the same instance.
pub trait RandomGenerator: Send + Sync + fmt::Debug {
    /// Draw i.i.d. standard-normal values with the given shape.
    fn sample_normal(&self, shape: &[usize], dtype: DType, device: Device) -> Result<ArrayD<f64>>;

    /// Draw i.i.d. values uniform on `[low, high)`.
    fn sample_uniform(
        &self,
        low: f64,
        high: f64,
        shape: &[usize],
        dtype: DType,
        device: Device,
    ) -> Result<ArrayD<f64>>;

    /// A new, independent generator seeded from this one's stream.
    ///
    /// Forking advances `self`, so forks taken in the same order from
    /// equally seeded parents are identical.
    fn fork(&self) -> Result<SharedGenerator>;
}

pub type SharedGenerator = Arc<dyn RandomGenerator>;

/// ChaCha8-backed generator; deterministic for a given seed.
#[derive(Debug)]
pub struct ChaChaGenerator {
    rng: Mutex<ChaCha8Rng>,
}

impl ChaChaGenerator {
    pub fn seed_from_u64(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::from_entropy()),
        }
    }

    pub fn shared(self) -> SharedGenerator {
        Arc::new(self)
    }

    fn draw(
        &self,
        shape: &[usize],
        dtype: DType,
        device: Device,
        mut f: impl FnMut(&mut ChaCha8Rng) -> f64,
    ) -> Result<ArrayD<f64>> {
        if device != Device::Cpu {
            return Err(FactorError::config(format!(
                "ChaChaGenerator only draws on cpu, got {}",
                device
            )));
        }
        let n: usize = shape.iter().product();
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let data: Vec<f64> = (0..n).map(|_| dtype.round(f(&mut *rng))).collect();
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map_err(|e| FactorError::config(format!("bad sample shape {:?}: {}", shape, e)))
    }
}

impl RandomGenerator for ChaChaGenerator {
    fn sample_normal(&self, shape: &[usize], dtype: DType, device: Device) -> Result<ArrayD<f64>> {
        self.draw(shape, dtype, device, |rng| StandardNormal.sample(rng))
    }

    fn sample_uniform(
        &self,
        low: f64,
        high: f64,
        shape: &[usize],
        dtype: DType,
        device: Device,
    ) -> Result<ArrayD<f64>> {
        if !(low.is_finite() && high.is_finite() && low < high) {
            return Err(FactorError::config(format!(
                "uniform bounds must be finite with low < high, got [{}, {})",
                low, high
            )));
        }
        self.draw(shape, dtype, device, |rng| rng.gen_range(low..high))
    }

    fn fork(&self) -> Result<SharedGenerator> {
        let seed: u64 = self
            .rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .gen();
        Ok(ChaChaGenerator::seed_from_u64(seed).shared())
    }
}

static DEFAULT_GENERATOR: OnceLock<SharedGenerator> = OnceLock::new();

/// Process-wide generator used when a node is built without one.
///
/// Seeded from `Settings::seed` at first use, from entropy otherwise.
pub fn default_generator() -> SharedGenerator {
    DEFAULT_GENERATOR
        .get_or_init(|| match config::global().seed {
            Some(seed) => ChaChaGenerator::seed_from_u64(seed).shared(),
            None => ChaChaGenerator::from_entropy().shared(),
        })
        .clone()
}
