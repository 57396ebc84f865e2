//! # Fitting objectives and drivers
//!
//! The residual builder concatenates, in event telescope order, the normalized
//! photometric residuals `(flux - model) / err` of every telescope into one
//! vector. On top of it:
//!
//! - `chi2` — squared norm of the normalized residuals;
//! - `likelihood` — `-2 ln L` of the Gaussian photometric model,
//!   `chi2 + Σ 2·ln σ + N·ln 2π`;
//! - [`lm`] — local refinement (Levenberg-Marquardt) with covariance estimation;
//! - [`de`] — global search (differential evolution) within the dictionary bounds;
//! - [`guess`] — data-driven starting point for the refinement.

pub mod de;
pub mod guess;
pub mod lm;

use std::time::Duration;

use nalgebra::{DMatrix, DVector};

use crate::models::MicrolensModel;
use crate::mulens_errors::MulensError;

/// Outcome of a fitting driver.
#[derive(Debug, Clone)]
pub struct FitResult {
    /// Best parameter vector found, in dictionary order.
    pub parameters: DVector<f64>,
    /// Objective at `parameters`: chi-square for the local refinement,
    /// `-2 ln L` for the global search.
    pub objective: f64,
    /// Parameter covariance, local refinement only.
    pub covariance: Option<DMatrix<f64>>,
    /// Final population with objectives, global search only.
    pub population: Option<Vec<(DVector<f64>, f64)>>,
    /// Wall-clock duration of the driver.
    pub duration: Duration,
}

/// Raw flux residuals `flux - model`, one vector per telescope in event order.
pub fn photometric_residuals(
    model: &MicrolensModel,
    vector: &DVector<f64>,
) -> Result<Vec<DVector<f64>>, MulensError> {
    let params = model.resolve(vector)?;
    let mut residuals = Vec::with_capacity(model.event().telescopes.len());
    for telescope in &model.event().telescopes {
        let model_flux = model.model_flux(telescope, &params)?;
        residuals.push(telescope.flux() - model_flux);
    }
    Ok(residuals)
}

/// Normalized residuals of the whole event, concatenated in telescope order.
pub fn normalized_residuals(
    model: &MicrolensModel,
    vector: &DVector<f64>,
) -> Result<DVector<f64>, MulensError> {
    let params = model.resolve(vector)?;
    let mut residuals = DVector::zeros(model.event().n_data());
    let mut offset = 0;
    for telescope in &model.event().telescopes {
        let model_flux = model.model_flux(telescope, &params)?;
        for index in 0..telescope.n_data() {
            residuals[offset + index] =
                (telescope.flux()[index] - model_flux[index]) / telescope.err_flux()[index];
        }
        offset += telescope.n_data();
    }
    Ok(residuals)
}

/// Chi-square of the event at `vector`.
pub fn chi2(model: &MicrolensModel, vector: &DVector<f64>) -> Result<f64, MulensError> {
    Ok(normalized_residuals(model, vector)?.norm_squared())
}

/// `-2 ln L` of the Gaussian photometric model at `vector`.
///
/// Differs from the chi-square by data-dependent constants only, so both rank
/// parameter vectors identically; the likelihood is the objective of the global
/// search so that runs with different error bars stay comparable.
pub fn likelihood(model: &MicrolensModel, vector: &DVector<f64>) -> Result<f64, MulensError> {
    let chi2_value = chi2(model, vector)?;
    let mut log_err_sum = 0.0;
    for telescope in &model.event().telescopes {
        log_err_sum += telescope.err_flux().iter().map(|e| 2.0 * e.ln()).sum::<f64>();
    }
    let n = model.event().n_data() as f64;
    Ok(chi2_value + log_err_sum + n * (2.0 * std::f64::consts::PI).ln())
}
