// =============================================================================
// End-to-end tests for mixtures fit by Expectation-Maximization
// =============================================================================

use approx::assert_abs_diff_eq;
use mixstats_core::distributions::{
    Component, MultivariateComponent, MultivariateNormal, MultivariateNormalOptions, Normal,
    UnivariateComponent,
};
use mixstats_core::{
    CancellationToken, EmConfig, MixStatsError, Mixture, MultivariateMixture,
};
use ndarray::{array, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal as NormalDraw};

/// 1000 draws, half from N(2, 1) and half from N(5, 1).
fn two_normal_sample(seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let a = NormalDraw::new(2.0, 1.0).unwrap();
    let b = NormalDraw::new(5.0, 1.0).unwrap();
    (0..1000)
        .map(|i| if i % 2 == 0 { a.sample(&mut rng) } else { b.sample(&mut rng) })
        .collect()
}

fn initial_guess() -> Mixture<Normal> {
    Mixture::new(
        vec![Normal::new(1.0, 1.5).unwrap(), Normal::new(6.0, 1.5).unwrap()],
        vec![0.5, 0.5],
    )
    .unwrap()
}

fn assert_valid_coefficients(coefficients: &[f64]) {
    assert!(coefficients.iter().all(|&c| c >= 0.0));
    assert_abs_diff_eq!(coefficients.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
}

#[test]
fn recovers_two_normal_components() {
    let data = two_normal_sample(42);
    let mut mixture = initial_guess();
    let result = mixture.fit(&data, None, &EmConfig::default()).unwrap();

    assert!(result.converged);
    assert_valid_coefficients(mixture.coefficients());
    for &c in mixture.coefficients() {
        assert_abs_diff_eq!(c, 0.5, epsilon = 0.05);
    }
    // Components may come back in either order
    let mut means: Vec<f64> = mixture.components().iter().map(|c| c.mean()).collect();
    means.sort_by(|a, b| a.total_cmp(b));
    assert_abs_diff_eq!(means[0], 2.0, epsilon = 0.2);
    assert_abs_diff_eq!(means[1], 5.0, epsilon = 0.2);
    for component in mixture.components() {
        assert_abs_diff_eq!(component.std_dev(), 1.0, epsilon = 0.2);
    }
}

#[test]
fn log_likelihood_is_monotone() {
    let data = two_normal_sample(7);
    let mut mixture = initial_guess();
    let result = mixture.fit(&data, None, &EmConfig::default()).unwrap();
    for pair in result.log_likelihood_history.windows(2) {
        assert!(pair[1] >= pair[0] - 1e-9, "{} then {}", pair[0], pair[1]);
    }
    assert_abs_diff_eq!(
        mixture.log_likelihood(&data, None).unwrap(),
        result.log_likelihood,
        epsilon = 1e-8
    );
}

#[test]
fn mixture_density_integrates_to_one() {
    let mixture = Mixture::new(
        vec![
            Normal::new(-3.0, 0.5).unwrap(),
            Normal::new(1.0, 2.0).unwrap(),
            Normal::new(6.0, 1.0).unwrap(),
        ],
        vec![0.2, 0.5, 0.3],
    )
    .unwrap();

    // Trapezoid rule over [-20, 25]
    let h = 0.005;
    let steps = (45.0 / h) as usize;
    let integral: f64 = (0..steps)
        .map(|i| {
            let x = -20.0 + i as f64 * h;
            0.5 * h * (mixture.density(x) + mixture.density(x + h))
        })
        .sum();
    assert_abs_diff_eq!(integral, 1.0, epsilon = 1e-6);
    assert_abs_diff_eq!(mixture.cdf(25.0), 1.0, epsilon = 1e-9);
}

#[test]
fn coefficients_stay_normalised() {
    let mixture = Mixture::new(vec![Normal::standard(); 3], vec![2.0, 1.0, 1.0]).unwrap();
    assert_valid_coefficients(mixture.coefficients());

    for seed in [1, 2, 3] {
        let data = two_normal_sample(seed);
        let mut three = Mixture::new(
            vec![
                Normal::new(0.0, 2.0).unwrap(),
                Normal::new(3.5, 2.0).unwrap(),
                Normal::new(7.0, 2.0).unwrap(),
            ],
            vec![0.3, 0.3, 0.4],
        )
        .unwrap();
        three.fit(&data, None, &EmConfig::default().with_max_iterations(50)).unwrap();
        assert_valid_coefficients(three.coefficients());
    }
}

#[test]
fn uniform_weights_match_unweighted_fit() {
    let data = two_normal_sample(11);
    let ones = vec![1.0; data.len()];

    let mut single = Normal::standard();
    single.fit(&data).unwrap();
    let mut single_weighted = Normal::standard();
    single_weighted.fit_weighted(&data, Some(&ones), &Default::default()).unwrap();
    assert_abs_diff_eq!(single.mean(), single_weighted.mean(), epsilon = 1e-10);
    assert_abs_diff_eq!(single.std_dev(), single_weighted.std_dev(), epsilon = 1e-10);

    let mut plain = initial_guess();
    plain.fit(&data, None, &EmConfig::default()).unwrap();
    let mut weighted = initial_guess();
    weighted.fit(&data, Some(&ones), &EmConfig::default()).unwrap();
    for (a, b) in plain.coefficients().iter().zip(weighted.coefficients()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-10);
    }
    for (a, b) in plain.components().iter().zip(weighted.components()) {
        assert_abs_diff_eq!(a.mean(), b.mean(), epsilon = 1e-10);
    }
}

#[test]
fn cancellation_after_first_iteration() {
    let data = two_normal_sample(3);
    let token = CancellationToken::new();
    let config = EmConfig::default().with_cancellation(token.clone());

    let mut mixture = initial_guess();
    let before = mixture.coefficients().to_vec();
    let before_mean = mixture.components()[0].mean();
    let initial_log_likelihood = mixture.log_likelihood(&data, None).unwrap();
    let result = mixture
        .fit_with_callback(&data, None, &config, |report| {
            if report.iteration == 1 {
                token.cancel();
            }
        })
        .unwrap();

    assert!(result.cancelled);
    assert_eq!(result.iterations, 1);
    assert!(!result.converged);
    assert_valid_coefficients(mixture.coefficients());
    assert!(result.log_likelihood > initial_log_likelihood);
    // One EM step has moved the parameters
    assert!(
        mixture.coefficients() != before.as_slice()
            || (mixture.components()[0].mean() - before_mean).abs() > 1e-6
    );
}

#[test]
fn log_domain_handles_far_outliers() {
    let mut data = two_normal_sample(5);
    data.extend([80.0, 85.0]);

    let mut mixture = initial_guess();
    let config = EmConfig::default().with_log_domain(true);
    let result = mixture.fit(&data, None, &config).unwrap();
    assert!(result.log_likelihood.is_finite());
    let n = data.len();
    let outlier_row = result.responsibilities.row(n - 1);
    assert_abs_diff_eq!(outlier_row.sum(), 1.0, epsilon = 1e-9);
    assert!(outlier_row[1] > outlier_row[0]);
}

#[test]
fn log_domain_rejects_non_uniform_weights() {
    let data = two_normal_sample(9);
    let mut weights = vec![1.0; data.len()];
    weights[0] = 3.0;
    let mut mixture = initial_guess();
    let config = EmConfig::default().with_log_domain(true);
    assert!(matches!(
        mixture.fit(&data, Some(&weights), &config),
        Err(MixStatsError::InvalidArgument(_))
    ));
}

#[test]
fn non_finite_observations_are_rejected() {
    for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        let mut data = two_normal_sample(4);
        data[3] = bad;
        let mut mixture = initial_guess();
        let before = mixture.coefficients().to_vec();
        assert!(matches!(
            mixture.fit(&data, None, &EmConfig::default()),
            Err(MixStatsError::InvalidArgument(_))
        ));
        assert_eq!(mixture.coefficients(), before.as_slice());
    }
}

#[test]
fn sampling_is_reproducible_with_a_seed() {
    let mixture = initial_guess();
    let a = mixture.sample_n(50, &mut StdRng::seed_from_u64(99)).unwrap();
    let b = mixture.sample_n(50, &mut StdRng::seed_from_u64(99)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn nested_mixture_is_a_component() {
    let inner = initial_guess();
    let outer = Mixture::new(vec![inner.clone(), inner], vec![0.25, 0.75]).unwrap();
    assert_abs_diff_eq!(outer.mean(), 3.5, epsilon = 1e-12);
    assert_abs_diff_eq!(
        outer.density(3.0),
        Component::density(&outer.components()[0], &3.0),
        epsilon = 1e-14
    );
}

// =============================================================================
// Multivariate
// =============================================================================

fn two_blob_sample(seed: u64) -> Array2<f64> {
    let truth = MultivariateMixture::new(
        vec![
            MultivariateNormal::new(array![-2.0, 0.0], array![[1.0, 0.3], [0.3, 0.5]]).unwrap(),
            MultivariateNormal::new(array![3.0, 3.0], array![[0.5, 0.0], [0.0, 1.0]]).unwrap(),
        ],
        vec![0.4, 0.6],
    )
    .unwrap();
    truth.sample_n(800, &mut StdRng::seed_from_u64(seed)).unwrap()
}

#[test]
fn multivariate_mixture_recovers_two_clusters() {
    let data = two_blob_sample(13);
    let mut mixture = MultivariateMixture::new(
        vec![
            MultivariateNormal::new(array![-1.0, 1.0], Array2::eye(2)).unwrap(),
            MultivariateNormal::new(array![2.0, 2.0], Array2::eye(2)).unwrap(),
        ],
        vec![0.5, 0.5],
    )
    .unwrap();
    let config = EmConfig::default()
        .with_inner_options(MultivariateNormalOptions::default().with_regularization(1e-6));
    let result = mixture.fit(&data, None, &config).unwrap();

    assert!(result.converged);
    assert_valid_coefficients(mixture.coefficients());
    assert_abs_diff_eq!(mixture.coefficients()[0], 0.4, epsilon = 0.06);
    let first = mixture.components()[0].mean();
    let second = mixture.components()[1].mean();
    assert_abs_diff_eq!(first[0], -2.0, epsilon = 0.2);
    assert_abs_diff_eq!(second[1], 3.0, epsilon = 0.2);
    assert_eq!(mixture.classify(&array![3.1, 2.8]).unwrap(), 1);
}

#[test]
fn multivariate_fit_rejects_non_finite_rows() {
    let mut data = two_blob_sample(17);
    data[[5, 1]] = f64::NAN;
    let mut mixture = MultivariateMixture::with_uniform_coefficients(vec![
        MultivariateNormal::new(array![-1.0, 1.0], Array2::eye(2)).unwrap(),
        MultivariateNormal::new(array![2.0, 2.0], Array2::eye(2)).unwrap(),
    ])
    .unwrap();
    assert!(matches!(
        mixture.fit(&data, None, &EmConfig::default()),
        Err(MixStatsError::InvalidArgument(_))
    ));
}

#[test]
fn multivariate_cdf_is_not_supported() {
    let mixture = MultivariateMixture::with_uniform_coefficients(vec![
        MultivariateNormal::standard(2).unwrap(),
        MultivariateNormal::new(array![1.0, 1.0], Array2::eye(2)).unwrap(),
    ])
    .unwrap();
    assert!(matches!(
        mixture.cdf(&array![0.0, 0.0]),
        Err(MixStatsError::NotSupported(_))
    ));
}
