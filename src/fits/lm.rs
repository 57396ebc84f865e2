//! # Local refinement (Levenberg-Marquardt)
//!
//! Trust-region refinement of the normalized residual vector, with the analytic
//! flux Jacobian whenever the model supports it and a central-difference fallback
//! otherwise. After convergence the parameter covariance is estimated as
//! `pinv(JᵀJ) · chi2 / (n - p)`.

use std::time::Instant;

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::storage::Owned;
use nalgebra::{DMatrix, DVector, Dyn};

use crate::models::MicrolensModel;
use crate::mulens_errors::{MulensError, NumericalError};

use super::{chi2, normalized_residuals, FitResult};

/// Step of the numerical Jacobian fallback, as a fraction of each parameter's
/// bound range. Epoch parameters carry absolute values of millions of days but
/// vary over a narrow range, so value-proportional steps are unusable.
const NUMERIC_STEP: f64 = 1e-6;

/// Singular values below this threshold are truncated by the pseudo-inverse.
const PSEUDO_INVERSE_EPS: f64 = 1e-12;

/// Levenberg-Marquardt driver for one model.
pub struct LmFit<'a> {
    model: &'a MicrolensModel,
}

impl<'a> LmFit<'a> {
    pub fn new(model: &'a MicrolensModel) -> Self {
        LmFit { model }
    }

    /// Refine `guess` and estimate the covariance at the optimum.
    ///
    /// Arguments
    /// -----------------
    /// * `guess`: Starting vector in dictionary order.
    ///
    /// Return
    /// ----------
    /// * A [`FitResult`] with the chi-square objective and the covariance, or an
    ///   error when the model cannot be evaluated at the optimum or the normal
    ///   matrix is singular.
    pub fn fit(&self, guess: &DVector<f64>) -> Result<FitResult, MulensError> {
        self.model.dictionary().check_length(guess)?;
        let start = Instant::now();

        let problem = LmProblem {
            model: self.model,
            params: guess.clone(),
        };
        let (problem, _report) = LevenbergMarquardt::new().minimize(problem);
        let parameters = problem.params;

        // Recompute the objective through the model so that evaluation failures
        // at the optimum surface as errors instead of a silent report value.
        let objective = chi2(self.model, &parameters)?;
        let covariance = covariance(self.model, &parameters)?;

        Ok(FitResult {
            parameters,
            objective,
            covariance: Some(covariance),
            population: None,
            duration: start.elapsed(),
        })
    }
}

struct LmProblem<'a> {
    model: &'a MicrolensModel,
    params: DVector<f64>,
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for LmProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, params: &DVector<f64>) {
        self.params.copy_from(params);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        normalized_residuals(self.model, &self.params).ok()
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        residual_jacobian(self.model, &self.params).ok()
    }
}

/// Jacobian `∂r/∂θ` of the normalized residual vector.
///
/// Analytic when the model supports it (`r = (flux - model)/err` gives
/// `∂r/∂θ = -(∂model/∂θ)/err`), central differences otherwise.
pub fn residual_jacobian(
    model: &MicrolensModel,
    vector: &DVector<f64>,
) -> Result<DMatrix<f64>, MulensError> {
    if model.has_analytic_jacobian() {
        analytic_residual_jacobian(model, vector)
    } else {
        numeric_residual_jacobian(model, vector)
    }
}

fn analytic_residual_jacobian(
    model: &MicrolensModel,
    vector: &DVector<f64>,
) -> Result<DMatrix<f64>, MulensError> {
    let params = model.resolve(vector)?;
    let mut jacobian = DMatrix::zeros(model.event().n_data(), vector.len());
    let mut offset = 0;
    for telescope in &model.event().telescopes {
        let flux_jacobian = model.flux_jacobian(telescope, &params)?;
        for i in 0..telescope.n_data() {
            let err = telescope.err_flux()[i];
            for j in 0..vector.len() {
                jacobian[(offset + i, j)] = -flux_jacobian[(i, j)] / err;
            }
        }
        offset += telescope.n_data();
    }
    Ok(jacobian)
}

fn numeric_residual_jacobian(
    model: &MicrolensModel,
    vector: &DVector<f64>,
) -> Result<DMatrix<f64>, MulensError> {
    let n = model.event().n_data();
    let bounds = model.dictionary().boundaries();
    let mut jacobian = DMatrix::zeros(n, vector.len());
    for j in 0..vector.len() {
        let (low, high) = bounds[j];
        let step = NUMERIC_STEP * (high - low);
        let mut forward = vector.clone();
        forward[j] += step;
        let mut backward = vector.clone();
        backward[j] -= step;
        let r_forward = normalized_residuals(model, &forward)?;
        let r_backward = normalized_residuals(model, &backward)?;
        for i in 0..n {
            jacobian[(i, j)] = (r_forward[i] - r_backward[i]) / (2.0 * step);
        }
    }
    Ok(jacobian)
}

/// Parameter covariance at `vector`, `pinv(JᵀJ) · chi2 / (n - p)`.
pub fn covariance(
    model: &MicrolensModel,
    vector: &DVector<f64>,
) -> Result<DMatrix<f64>, MulensError> {
    let jacobian = residual_jacobian(model, vector)?;
    let (n, p) = (jacobian.nrows(), jacobian.ncols());
    let normal_matrix = jacobian.transpose() * &jacobian;
    let pseudo_inverse = normal_matrix
        .svd(true, true)
        .pseudo_inverse(PSEUDO_INVERSE_EPS)
        .map_err(|reason| NumericalError::SingularCovariance(reason.to_string()))?;

    let chi2_value = chi2(model, vector)?;
    let scale = if n > p {
        chi2_value / (n - p) as f64
    } else {
        1.0
    };
    Ok(pseudo_inverse * scale)
}
