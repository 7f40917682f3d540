use ndarray::{ArrayD, Axis, IxDyn, Zip};

use super::{broadcast_shapes, ComputeBackend, ComputeMode};
use crate::config::{DType, Device};
use crate::error::{FactorError, Result};
use crate::random::SharedGenerator;

/// Immediate evaluation on in-memory `f64` tensors.
#[derive(Debug, Clone, Copy, Default)]
pub struct Eager;

impl Eager {
    fn zip_with(
        a: &ArrayD<f64>,
        b: &ArrayD<f64>,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<ArrayD<f64>> {
        let shape = broadcast_shapes(a.shape(), b.shape())?;
        let av = a
            .broadcast(IxDyn(&shape))
            .ok_or_else(|| FactorError::shape(a.shape(), &shape))?;
        let bv = b
            .broadcast(IxDyn(&shape))
            .ok_or_else(|| FactorError::shape(b.shape(), &shape))?;
        Ok(Zip::from(av).and(bv).map_collect(|&x, &y| f(x, y)))
    }
}

impl ComputeBackend for Eager {
    type Tensor = ArrayD<f64>;

    fn mode(&self) -> ComputeMode {
        ComputeMode::Eager
    }

    fn shape(&self, t: &ArrayD<f64>) -> Vec<usize> {
        t.shape().to_vec()
    }

    fn constant(&mut self, value: f64) -> ArrayD<f64> {
        ArrayD::from_elem(IxDyn(&[]), value)
    }

    fn add(&mut self, a: &ArrayD<f64>, b: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        Self::zip_with(a, b, |x, y| x + y)
    }

    fn subtract(&mut self, a: &ArrayD<f64>, b: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        Self::zip_with(a, b, |x, y| x - y)
    }

    fn multiply(&mut self, a: &ArrayD<f64>, b: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        Self::zip_with(a, b, |x, y| x * y)
    }

    fn divide(&mut self, a: &ArrayD<f64>, b: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        Self::zip_with(a, b, |x, y| x / y)
    }

    fn log(&mut self, a: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        Ok(a.mapv(f64::ln))
    }

    fn sqrt(&mut self, a: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        Ok(a.mapv(f64::sqrt))
    }

    fn square(&mut self, a: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        Ok(a.mapv(|x| x * x))
    }

    fn sum_last_axis(&mut self, a: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        if a.ndim() == 0 {
            return Err(FactorError::config("cannot sum the last axis of a 0-d tensor"));
        }
        Ok(a.sum_axis(Axis(a.ndim() - 1)))
    }

    fn broadcast_to(&mut self, a: &ArrayD<f64>, shape: &[usize]) -> Result<ArrayD<f64>> {
        let target = broadcast_shapes(a.shape(), shape)?;
        if target != shape {
            return Err(FactorError::shape(a.shape(), shape));
        }
        let view = a
            .broadcast(IxDyn(shape))
            .ok_or_else(|| FactorError::shape(a.shape(), shape))?;
        Ok(view.to_owned())
    }

    fn round_to(&mut self, a: &ArrayD<f64>, dtype: DType) -> Result<ArrayD<f64>> {
        Ok(match dtype {
            DType::F64 => a.clone(),
            DType::F32 => a.mapv(|x| dtype.round(x)),
        })
    }

    fn random_normal(
        &mut self,
        generator: &SharedGenerator,
        shape: &[usize],
        dtype: DType,
        device: Device,
    ) -> Result<ArrayD<f64>> {
        generator.sample_normal(shape, dtype, device)
    }
}
