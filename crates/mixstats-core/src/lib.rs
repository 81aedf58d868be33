// =============================================================================
// mixstats Core Library
// =============================================================================
//
// Finite mixture distributions fit by Expectation-Maximization, and
// generalized linear models fit by IRLS and lower-bound Newton-Raphson.
//
// STRUCTURE:
// ----------
//   - distributions: Component densities (Normal, Exponential, Poisson,
//                    MultivariateNormal, Independent) and the traits the
//                    mixture engine consumes
//   - mixture:       Mixture<T> and MultivariateMixture<T>
//   - convergence:   Convergence tracking and cooperative cancellation
//   - solvers:       EM, IRLS and lower-bound Newton-Raphson engines
//   - links:         Canonical link functions (logit, log, identity)
//   - regression:    GLM and multinomial logistic regression models
//   - inference:     Wald tests, confidence intervals, likelihood-ratio test
//   - diagnostics:   Log-likelihoods, deviance, residuals, AIC/BIC
//   - linalg:        ndarray <-> nalgebra conversion and robust solves
//   - error:         Error type used throughout the library
//
// CONVENTIONS:
// ------------
//   - Public APIs take and return ndarray types; nalgebra is used only
//     inside `linalg` for decompositions.
//   - Fitting never panics on bad data: inputs are validated up front and
//     problems come back as `MixStatsError`.
//   - Randomness is always passed in by the caller (`&mut dyn RngCore`).
//
// =============================================================================

pub mod convergence;
pub mod diagnostics;
pub mod distributions;
pub mod error;
pub mod inference;
pub mod linalg;
pub mod links;
pub mod mixture;
pub mod regression;
pub mod solvers;

pub use convergence::{CancellationToken, ConvergenceCriterion, ConvergenceTracker, IterationReport};
pub use distributions::{Component, MultivariateComponent, Sampler, UnivariateComponent};
pub use error::{MixStatsError, Result};
pub use links::{IdentityLink, Link, LogLink, LogitLink};
pub use mixture::{Mixture, MultivariateMixture};
pub use regression::{
    GeneralizedLinearRegression, LogisticRegression, MultinomialLogisticRegression, PoissonRegression,
};
pub use solvers::{
    fit_glm, EmConfig, EmResult, ExpectationMaximization, IrlsConfig, IrlsResult,
    IterativeReweightedLeastSquares, LogExpectationMaximization, LowerBoundConfig,
    LowerBoundNewtonRaphson, LowerBoundResult,
};
