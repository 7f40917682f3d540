//! Property tests for density agreement, sample shapes and replication.

use approx::assert_abs_diff_eq;
use ndarray::{ArrayD, IxDyn};
use proptest::prelude::*;

use factorgraph_core::{
    ChaChaGenerator, ComputeMode, DType, DiagonalNormal, Distribution, DistributionOptions,
    Factor, FactorGraph, Normal, StaticAttributes, TensorMap,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn opts(seed: u64) -> DistributionOptions {
    DistributionOptions {
        dtype: DType::F64,
        ..DistributionOptions::default()
    }
    .with_rand_gen(ChaChaGenerator::seed_from_u64(seed).shared())
}

fn tensor(shape: &[usize], data: Vec<f64>) -> ArrayD<f64> {
    ArrayD::from_shape_vec(IxDyn(shape), data).unwrap()
}

fn params(mean: ArrayD<f64>, variance: ArrayD<f64>) -> TensorMap<ArrayD<f64>> {
    let mut m = TensorMap::new();
    m.insert("mean".to_string(), mean);
    m.insert("variance".to_string(), variance);
    m
}

/// A random-variable shape plus mean and variance tensors whose shapes are
/// trailing suffixes of it, so both broadcast to exactly that shape.
#[derive(Debug, Clone)]
struct Case {
    shape: Vec<usize>,
    mean: ArrayD<f64>,
    variance: ArrayD<f64>,
    x: ArrayD<f64>,
}

fn case(min_rank: usize) -> impl Strategy<Value = Case> {
    prop::collection::vec(1usize..4, min_rank..4)
        .prop_flat_map(|shape| {
            let n = shape.len();
            (Just(shape), 0..=n, 0..=n)
        })
        .prop_flat_map(|(shape, mk, vk)| {
            let n = shape.len();
            let ms = shape[n - mk..].to_vec();
            let vs = shape[n - vk..].to_vec();
            let len = |s: &[usize]| s.iter().product::<usize>();
            (
                Just(shape.clone()),
                Just(ms.clone()),
                Just(vs.clone()),
                prop::collection::vec(-3.0f64..3.0, len(&ms)),
                prop::collection::vec(0.1f64..10.0, len(&vs)),
                prop::collection::vec(-5.0f64..5.0, len(&shape)),
            )
        })
        .prop_map(|(shape, ms, vs, m, v, x)| Case {
            mean: tensor(&ms, m),
            variance: tensor(&vs, v),
            x: tensor(&shape, x),
            shape,
        })
}

fn assert_modes_agree(d: &Distribution, c: &Case) {
    let inputs = params(c.mean.clone(), c.variance.clone());
    let eager = d.log_pdf_concrete(&inputs, &c.x, Some(ComputeMode::Eager)).unwrap();
    let symbolic = d
        .log_pdf_concrete(&inputs, &c.x, Some(ComputeMode::Symbolic))
        .unwrap();
    assert_eq!(eager.shape(), symbolic.shape());
    for (a, b) in eager.iter().zip(symbolic.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
    }
}

// ── Density agreement ───────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]

    #[test]
    fn normal_log_pdf_same_in_both_modes(c in case(0)) {
        let d = Normal::new(c.mean.clone(), c.variance.clone(), opts(0)).unwrap();
        assert_modes_agree(&d, &c);
        let eager = d
            .log_pdf_concrete(&params(c.mean.clone(), c.variance.clone()), &c.x, Some(ComputeMode::Eager))
            .unwrap();
        prop_assert_eq!(eager.shape(), &c.shape[..]);
    }

    #[test]
    fn diagonal_normal_log_pdf_same_in_both_modes(c in case(1)) {
        let d = DiagonalNormal::new(c.mean.clone(), c.variance.clone(), opts(0)).unwrap();
        assert_modes_agree(&d, &c);
        let eager = d
            .log_pdf_concrete(&params(c.mean.clone(), c.variance.clone()), &c.x, Some(ComputeMode::Eager))
            .unwrap();
        prop_assert_eq!(eager.shape(), &c.shape[..c.shape.len() - 1]);
    }
}

// ── Sample shapes ───────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]

    #[test]
    fn samples_have_count_then_rv_shape(c in case(0), n in 1usize..20, seed in any::<u64>()) {
        let d = Normal::new(c.mean.clone(), c.variance.clone(), opts(seed)).unwrap();
        let inputs = params(c.mean.clone(), c.variance.clone());
        let mut expected = vec![n];
        expected.extend_from_slice(&c.shape);
        for mode in [ComputeMode::Eager, ComputeMode::Symbolic] {
            let s = d.draw_samples_concrete(&inputs, &c.shape, n, Some(mode)).unwrap();
            prop_assert_eq!(s.shape(), &expected[..]);
            prop_assert!(s.iter().all(|v| v.is_finite()));
        }
    }
}

// ── Replication ─────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]

    #[test]
    fn replicating_twice_keeps_structure(
        shape in prop::collection::vec(1usize..4, 0..3),
        scaling in 0.1f64..5.0,
        variance in 0.1f64..10.0,
    ) {
        let mut g = FactorGraph::new();
        let loc = Normal::define_variable(&mut g, 0.0, variance, vec![], opts(1)).unwrap();
        let attrs = StaticAttributes::new().with_log_pdf_scaling(scaling).unwrap();
        let x = Normal::define_variable(
            &mut g,
            &loc,
            variance,
            shape.clone(),
            opts(2).with_attributes(attrs),
        )
        .unwrap();

        let once = g.replicate(None).unwrap();
        let twice = once.replicate(None).unwrap();
        prop_assert_eq!(twice.len(), g.len());

        for ((a, b), c) in g.nodes().zip(once.nodes()).zip(twice.nodes()) {
            prop_assert!(a.id() != b.id() && b.id() != c.id() && a.id() != c.id());
            let (da, dc) = (a.as_distribution().unwrap(), c.as_distribution().unwrap());
            prop_assert_eq!(da.kind(), dc.kind());
            prop_assert_eq!(da.attributes(), dc.attributes());
            prop_assert_eq!(a.input_names(), c.input_names());
            for (va, vc) in a.outputs().values().zip(c.outputs().values()) {
                prop_assert!(va != vc);
                prop_assert_eq!(va.shape(), vc.shape());
            }
        }

        // The second node of the twice-replicated graph still reads the first's output.
        let last = twice.nodes().last().unwrap();
        let first = twice.nodes().next().unwrap();
        prop_assert_eq!(&last.inputs()["mean"], &first.outputs()["random_variable"]);
        prop_assert!(twice.variables().iter().all(|v| *v != x && *v != loc));
    }
}
