//! Process-wide defaults for model authoring.
//!
//! Nothing in the core reads these directly. They are resolved at the
//! model-authoring boundary (`DistributionOptions::default()`,
//! `compute::resolve_mode(None)`, `random::default_generator()`), so tests can
//! always inject explicit handles instead.

use std::fmt;
use std::sync::{OnceLock, RwLock};

use serde::{Deserialize, Serialize};

use crate::compute::ComputeMode;

/// Element type requested for sampled tensors.
///
/// Storage is always `f64`; `F32` rounds draws and distribution outputs
/// through `f32`. Intermediate arithmetic stays in `f64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    #[default]
    F64,
}

impl DType {
    /// Round a value to the precision of this dtype.
    #[inline]
    pub fn round(self, v: f64) -> f64 {
        match self {
            DType::F32 => v as f32 as f64,
            DType::F64 => v,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "f32" | "float32" => Some(DType::F32),
            "f64" | "float64" => Some(DType::F64),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F64 => write!(f, "f64"),
        }
    }
}

/// Device a tensor lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Gpu(usize),
}

impl Device {
    /// Parse `cpu` or `gpu:<ordinal>` (a bare `gpu` means ordinal 0).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "cpu" => Some(Device::Cpu),
            "gpu" => Some(Device::Gpu(0)),
            _ => s
                .strip_prefix("gpu:")
                .and_then(|n| n.parse().ok())
                .map(Device::Gpu),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Gpu(n) => write!(f, "gpu:{}", n),
        }
    }
}

pub const ENV_DTYPE: &str = "FACTORGRAPH_DTYPE";
pub const ENV_DEVICE: &str = "FACTORGRAPH_DEVICE";
pub const ENV_COMPUTE_MODE: &str = "FACTORGRAPH_COMPUTE_MODE";
pub const ENV_SEED: &str = "FACTORGRAPH_SEED";

/// Defaults applied when a model author does not pass explicit options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub dtype: DType,
    pub device: Device,
    pub compute_mode: ComputeMode,
    /// Seed for the process-wide default generator. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dtype: DType::F64,
            device: Device::Cpu,
            compute_mode: ComputeMode::Eager,
            seed: None,
        }
    }
}

impl Settings {
    /// Defaults overridden by `FACTORGRAPH_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();

        if let Some(raw) = lookup(ENV_DTYPE) {
            match DType::parse(&raw) {
                Some(dtype) => settings.dtype = dtype,
                None => log::warn!("ignoring {}={:?}: expected f32 or f64", ENV_DTYPE, raw),
            }
        }
        if let Some(raw) = lookup(ENV_DEVICE) {
            match Device::parse(&raw) {
                Some(device) => settings.device = device,
                None => log::warn!("ignoring {}={:?}: expected cpu or gpu:<n>", ENV_DEVICE, raw),
            }
        }
        if let Some(raw) = lookup(ENV_COMPUTE_MODE) {
            match ComputeMode::parse(&raw) {
                Some(mode) => settings.compute_mode = mode,
                None => log::warn!(
                    "ignoring {}={:?}: expected eager or symbolic",
                    ENV_COMPUTE_MODE,
                    raw
                ),
            }
        }
        if let Some(raw) = lookup(ENV_SEED) {
            match raw.trim().parse::<u64>() {
                Ok(seed) => settings.seed = Some(seed),
                Err(_) => log::warn!("ignoring {}={:?}: expected an unsigned integer", ENV_SEED, raw),
            }
        }

        settings
    }
}

static GLOBAL: OnceLock<RwLock<Settings>> = OnceLock::new();

fn global_cell() -> &'static RwLock<Settings> {
    GLOBAL.get_or_init(|| RwLock::new(Settings::from_env()))
}

/// Snapshot of the process-wide settings (initialised from the environment).
pub fn global() -> Settings {
    global_cell()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

/// Replace the process-wide settings.
pub fn set_global(settings: Settings) {
    let mut guard = global_cell()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = settings;
}
