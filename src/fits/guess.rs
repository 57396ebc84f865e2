//! # Data-driven starting point
//!
//! Estimates `(to, uo, tE)` and, when they are fitted, the per-telescope fluxes
//! directly from the light curves, giving the local refinement a starting point
//! inside the basin of the true minimum. The heuristic reads the first
//! telescope of the event:
//!
//! - baseline flux: median of the lower half of the sorted fluxes, robust to the
//!   magnified points;
//! - `to`: timestamp of the peak flux;
//! - `uo`: inversion of the point-source law at `A_max = f_peak / f_base`;
//! - `tE`: full width at half magnification, converted through the same
//!   inversion.
//!
//! Second-order parameters start at zero (`rho` at a small finite value) and the
//! whole vector is clamped into the dictionary bounds.

use nalgebra::DVector;

use crate::models::MicrolensModel;
use crate::mulens_errors::{GuessEstimationError, MulensError};
use crate::telescopes::Telescope;

/// Minimum number of points needed by the heuristic.
const MIN_POINTS: usize = 5;

/// Starting value of `rho` for finite-source models.
const RHO_GUESS: f64 = 0.01;

/// Estimate a starting vector for `model`, in dictionary order.
pub fn initial_guess(model: &MicrolensModel) -> Result<DVector<f64>, MulensError> {
    // The model constructor rejects events without telescopes.
    let telescope = &model.event().telescopes[0];
    let n = telescope.n_data();
    if n < MIN_POINTS {
        return Err(GuessEstimationError::TooFewPoints(telescope.name.clone(), n).into());
    }

    let flux = telescope.flux();
    let time = telescope.time();

    let f_base = baseline_flux(telescope);
    let (peak_index, f_peak) = flux
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(index, &value)| (index, value))
        .unwrap_or((0, flux[0]));
    if f_peak <= f_base {
        return Err(GuessEstimationError::NoPeakDetected(telescope.name.clone()).into());
    }

    let to = time[peak_index];
    let a_max = f_peak / f_base;
    let uo = impact_parameter(a_max);

    // Full width at half magnification.
    let half_flux = 0.5 * (f_peak + f_base);
    let first = (0..n).find(|&i| flux[i] >= half_flux);
    let last = (0..n).rev().find(|&i| flux[i] >= half_flux);
    let u_half = impact_parameter(0.5 * (a_max + 1.0));
    let te = match (first, last) {
        (Some(i), Some(j)) if j > i && u_half * u_half > uo * uo => {
            (time[j] - time[i]) / (2.0 * (u_half * u_half - uo * uo).sqrt())
        }
        // Degenerate width: fall back to a fraction of the observing window.
        _ => (time[n - 1] - time[0]) / 10.0,
    };

    let dictionary = model.dictionary();
    let mut vector = DVector::zeros(dictionary.len());
    let mut set = |name: &str, value: f64| {
        if let Some(index) = dictionary.index_of(name) {
            vector[index] = value;
        }
    };
    set("to", to);
    set("uo", uo);
    set("tE", te);
    set("rho", RHO_GUESS);
    for telescope in &model.event().telescopes {
        set(&format!("fs_{}", telescope.name), baseline_flux(telescope));
        set(&format!("g_{}", telescope.name), 0.0);
    }

    dictionary.clamp(&mut vector);
    Ok(vector)
}

/// Median of the lower half of the sorted fluxes.
fn baseline_flux(telescope: &Telescope) -> f64 {
    let mut sorted: Vec<f64> = telescope.flux().iter().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let lower = &sorted[..(sorted.len() / 2).max(1)];
    lower[lower.len() / 2]
}

/// Invert the point-source law: the `u` with `A(u) = a`, for `a > 1`.
fn impact_parameter(a: f64) -> f64 {
    (2.0 * a / (a * a - 1.0).sqrt() - 2.0).max(0.0).sqrt()
}
