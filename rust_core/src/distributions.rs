use std::f64::consts::PI;

use crate::compute::ComputeBackend;
use crate::config::{DType, Device};
use crate::distribution::{Distribution, DistributionKind, DistributionOptions, Param};
use crate::error::Result;
use crate::model::FactorGraph;
use crate::random::SharedGenerator;
use crate::variable::Variable;

// ── Kernels ─────────────────────────────────────────────────────────

/// `-½ln(2π) - ½ln(variance) - (x - mean)² / (2·variance)`, elementwise.
pub(crate) fn normal_log_pdf<B: ComputeBackend>(
    f: &mut B,
    mean: &B::Tensor,
    variance: &B::Tensor,
    x: &B::Tensor,
) -> Result<B::Tensor> {
    let diff = f.subtract(x, mean)?;
    let sq = f.square(&diff)?;
    let two_var = f.scale(variance, 2.0)?;
    let quad = f.divide(&sq, &two_var)?;

    let log_var = f.log(variance)?;
    let half_log_var = f.scale(&log_var, 0.5)?;
    let norm = f.constant(-0.5 * (2.0 * PI).ln());

    let head = f.subtract(&norm, &half_log_var)?;
    f.subtract(&head, &quad)
}

/// Independent Normal terms summed over the trailing joint axis.
pub(crate) fn diagonal_normal_log_pdf<B: ComputeBackend>(
    f: &mut B,
    mean: &B::Tensor,
    variance: &B::Tensor,
    x: &B::Tensor,
) -> Result<B::Tensor> {
    let terms = normal_log_pdf(f, mean, variance, x)?;
    f.sum_last_axis(&terms)
}

/// `mean + sqrt(variance) · ε`, with `ε` standard normal of `out_shape`.
pub(crate) fn normal_draw<B: ComputeBackend>(
    f: &mut B,
    generator: &SharedGenerator,
    mean: &B::Tensor,
    variance: &B::Tensor,
    out_shape: &[usize],
    dtype: DType,
    device: Device,
) -> Result<B::Tensor> {
    let eps = f.random_normal(generator, out_shape, dtype, device)?;
    let std = f.sqrt(variance)?;
    let scaled = f.multiply(&eps, &std)?;
    f.add(&scaled, mean)
}

// ── Normal (univariate) ─────────────────────────────────────────────

pub struct Normal;

impl Normal {
    /// An unmaterialized Normal node over `mean` and `variance`.
    pub fn new(
        mean: impl Into<Param>,
        variance: impl Into<Param>,
        options: DistributionOptions,
    ) -> Result<Distribution> {
        Distribution::new(
            DistributionKind::Normal,
            vec![
                ("mean".to_string(), mean.into().into_variable("mean")),
                ("variance".to_string(), variance.into().into_variable("variance")),
            ],
            options,
        )
    }

    /// Add a Normal node to `graph` and return its random variable.
    pub fn define_variable(
        graph: &mut FactorGraph,
        mean: impl Into<Param>,
        variance: impl Into<Param>,
        shape: Vec<usize>,
        options: DistributionOptions,
    ) -> Result<Variable> {
        Distribution::define_variable(
            graph,
            DistributionKind::Normal,
            vec![mean.into(), variance.into()],
            shape,
            options,
        )
    }
}

// ── DiagonalNormal (multivariate, trailing joint axis) ──────────────

pub struct DiagonalNormal;

impl DiagonalNormal {
    pub fn new(
        mean: impl Into<Param>,
        variance: impl Into<Param>,
        options: DistributionOptions,
    ) -> Result<Distribution> {
        Distribution::new(
            DistributionKind::DiagonalNormal,
            vec![
                ("mean".to_string(), mean.into().into_variable("mean")),
                ("variance".to_string(), variance.into().into_variable("variance")),
            ],
            options,
        )
    }

    pub fn define_variable(
        graph: &mut FactorGraph,
        mean: impl Into<Param>,
        variance: impl Into<Param>,
        shape: Vec<usize>,
        options: DistributionOptions,
    ) -> Result<Variable> {
        Distribution::define_variable(
            graph,
            DistributionKind::DiagonalNormal,
            vec![mean.into(), variance.into()],
            shape,
            options,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{ComputeMode, Eager, TensorMap};
    use crate::error::FactorError;
    use crate::factor::Factor;
    use crate::random::ChaChaGenerator;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::{arr1, arr2, ArrayD, IxDyn};

    fn seeded(seed: u64) -> DistributionOptions {
        DistributionOptions::default().with_rand_gen(ChaChaGenerator::seed_from_u64(seed).shared())
    }

    fn scalar(v: f64) -> ArrayD<f64> {
        ArrayD::from_elem(IxDyn(&[]), v)
    }

    fn params(mean: ArrayD<f64>, variance: ArrayD<f64>) -> TensorMap<ArrayD<f64>> {
        let mut m = TensorMap::new();
        m.insert("mean".to_string(), mean);
        m.insert("variance".to_string(), variance);
        m
    }

    #[test]
    fn test_standard_normal_density_at_zero() {
        let d = Normal::new(0.0, 1.0, seeded(0)).unwrap();
        let out = d
            .log_pdf(&mut Eager, &params(scalar(0.0), scalar(1.0)), &scalar(0.0))
            .unwrap();
        assert_eq!(out.ndim(), 0);
        assert_abs_diff_eq!(out.sum(), -0.9189, epsilon = 1e-4);
        assert_relative_eq!(out.sum(), -0.5 * (2.0 * PI).ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_log_pdf_matches_closed_form() {
        let d = Normal::new(1.0, 4.0, seeded(0)).unwrap();
        let x = arr1(&[-2.0, 1.0, 3.5]).into_dyn();
        let out = d
            .log_pdf(&mut Eager, &params(scalar(1.0), scalar(4.0)), &x)
            .unwrap();
        for (xi, lp) in x.iter().zip(out.iter()) {
            let expected = -0.5 * (2.0 * PI).ln() - 0.5 * 4.0_f64.ln() - (xi - 1.0).powi(2) / 8.0;
            assert_relative_eq!(*lp, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_broadcast_mean_vector_over_matrix() {
        let d = Normal::new(0.0, 1.0, seeded(0)).unwrap();
        let mean = arr1(&[0.0, 1.0, 2.0]).into_dyn();
        let x = ArrayD::zeros(IxDyn(&[5, 3]));
        let out = d.log_pdf(&mut Eager, &params(mean, scalar(1.0)), &x).unwrap();
        assert_eq!(out.shape(), &[5, 3]);
    }

    #[test]
    fn test_sample_shape_is_count_then_rv_shape() {
        let d = Normal::new(0.0, 1.0, seeded(3)).unwrap();
        let p = params(scalar(0.0), scalar(1.0));
        for (n, rv) in [(1, vec![]), (7, vec![]), (4, vec![2]), (3, vec![5, 3])] {
            let s = d.draw_samples(&mut Eager, &p, &rv, n).unwrap();
            let mut expected = vec![n];
            expected.extend_from_slice(&rv);
            assert_eq!(s.shape(), expected.as_slice());
        }
    }

    #[test]
    fn test_sample_moments_converge() {
        let d = Normal::new(2.0, 4.0, seeded(2024)).unwrap();
        let n = 100_000;
        let s = d
            .draw_samples(&mut Eager, &params(scalar(2.0), scalar(4.0)), &[], n)
            .unwrap();
        let mean = s.sum() / n as f64;
        let var = s.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!((mean - 2.0).abs() < 0.05, "sample mean {}", mean);
        assert!((var - 4.0).abs() < 0.3, "sample variance {}", var);
    }

    #[test]
    fn test_per_entry_parameters_in_samples() {
        let d = Normal::new(0.0, 1.0, seeded(5)).unwrap();
        let mean = arr1(&[-10.0, 0.0, 10.0]).into_dyn();
        let s = d
            .draw_samples(&mut Eager, &params(mean, scalar(1e-6)), &[3], 2)
            .unwrap();
        assert_eq!(s.shape(), &[2, 3]);
        for row in s.outer_iter() {
            let row: Vec<f64> = row.iter().copied().collect();
            assert_abs_diff_eq!(row[0], -10.0, epsilon = 0.01);
            assert_abs_diff_eq!(row[2], 10.0, epsilon = 0.01);
        }
    }

    #[test]
    fn test_eager_and_symbolic_agree() {
        let d = Normal::new(0.0, 1.0, seeded(0)).unwrap();
        let cases = [
            (scalar(0.0), scalar(1.0), scalar(0.3)),
            (
                arr1(&[0.0, 1.0, -2.0]).into_dyn(),
                scalar(2.5),
                arr2(&[[0.1, 0.2, 0.3], [1.0, -1.0, 4.0]]).into_dyn(),
            ),
            (
                scalar(-1.0),
                arr1(&[0.5, 1.5]).into_dyn(),
                arr1(&[0.0, 2.0]).into_dyn(),
            ),
        ];
        for (mean, variance, x) in cases {
            let p = params(mean, variance);
            let eager = d.log_pdf_concrete(&p, &x, Some(ComputeMode::Eager)).unwrap();
            let symbolic = d.log_pdf_concrete(&p, &x, Some(ComputeMode::Symbolic)).unwrap();
            assert_eq!(eager.shape(), symbolic.shape());
            for (a, b) in eager.iter().zip(symbolic.iter()) {
                assert_relative_eq!(*a, *b, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_symbolic_sampling_matches_seeded_eager() {
        let eager = Normal::new(0.0, 1.0, seeded(77)).unwrap();
        let symbolic = Normal::new(0.0, 1.0, seeded(77)).unwrap();
        let p = params(scalar(1.0), scalar(9.0));
        let a = eager
            .draw_samples_concrete(&p, &[4], 3, Some(ComputeMode::Eager))
            .unwrap();
        let b = symbolic
            .draw_samples_concrete(&p, &[4], 3, Some(ComputeMode::Symbolic))
            .unwrap();
        assert_eq!(a.shape(), &[3, 4]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_shape_errors_match_across_modes() {
        let d = Normal::new(0.0, 1.0, seeded(0)).unwrap();
        let p = params(arr1(&[0.0, 1.0, 2.0]).into_dyn(), scalar(1.0));
        let x = ArrayD::zeros(IxDyn(&[4]));
        let e = d.log_pdf_concrete(&p, &x, Some(ComputeMode::Eager)).unwrap_err();
        let s = d.log_pdf_concrete(&p, &x, Some(ComputeMode::Symbolic)).unwrap_err();
        assert_eq!(e, s);
        assert!(matches!(e, FactorError::Shape { .. }));
    }

    #[test]
    fn test_diagonal_normal_sums_joint_axis() {
        let d = DiagonalNormal::new(0.0, 1.0, seeded(0)).unwrap();
        let mean = arr1(&[0.0, 0.0]).into_dyn();
        let x = arr2(&[[0.0, 0.0], [1.0, -1.0], [2.0, 0.0]]).into_dyn();
        let out = d.log_pdf(&mut Eager, &params(mean, scalar(1.0)), &x).unwrap();
        assert_eq!(out.shape(), &[3]);
        let norm = -(2.0 * PI).ln();
        let expected = [norm, norm - 1.0, norm - 2.0];
        for (got, want) in out.iter().zip(expected) {
            assert_relative_eq!(*got, want, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_diagonal_normal_requires_joint_axis() {
        let d = DiagonalNormal::new(0.0, 1.0, seeded(0)).unwrap();
        let p = params(scalar(0.0), scalar(1.0));
        let err = d.draw_samples(&mut Eager, &p, &[], 5).unwrap_err();
        assert!(matches!(err, FactorError::Configuration(_)));
        let s = d.draw_samples(&mut Eager, &p, &[3], 5).unwrap();
        assert_eq!(s.shape(), &[5, 3]);
    }

    #[test]
    fn test_define_variable_inserts_node() {
        let mut graph = FactorGraph::new();
        let loc = Normal::define_variable(&mut graph, 0.0, 10.0, vec![], seeded(1)).unwrap();
        let x = Normal::define_variable(&mut graph, &loc, 1.0, vec![4], seeded(2)).unwrap();

        assert_eq!(graph.len(), 2);
        assert_eq!(x.shape(), Some(&[4usize][..]));
        let producer = graph.producer_of(&x).unwrap();
        assert_eq!(producer.core().input("mean"), Some(&loc));
        assert_eq!(producer.core().output("random_variable"), Some(&x));
    }

    #[test]
    fn test_define_variable_rejects_bad_shape() {
        let mut graph = FactorGraph::new();
        let mean = arr1(&[0.0, 1.0, 2.0]).into_dyn();
        let err = Normal::define_variable(&mut graph, mean, 1.0, vec![2], seeded(0)).unwrap_err();
        assert!(matches!(err, FactorError::Configuration(_)));
        assert!(graph.is_empty());
    }
}
