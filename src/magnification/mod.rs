//! # Magnification laws
//!
//! Point-source (PSPL, Paczynski 1986) and finite-source (FSPL, Yoo et al. 2004)
//! point-lens magnification, evaluated on the source trajectory `(x, y)` expressed
//! in the lens frame.
//!
//! The finite-source law splits into three regimes of `z = u / rho` relative to the
//! tabulated domain `[z_min, z_max]` of the [`B0B1Table`]:
//!
//! - `z > z_max` — the source is point-like, PSPL applies unchanged;
//! - `z < z_min` — Witt & Mao small-z limit, `A = A_pspl · z · (2 - γ(2 - 3π/4))`;
//! - `z_min ≤ z ≤ z_max` — table branch, `A = A_pspl · (B0(z) - γ·B1(z))`.
//!
//! Boundary ties resolve to the table branch so that no timestamp is counted in two
//! regimes.

pub mod b0b1_table;

use nalgebra::DVector;

use crate::constants::WITT_MAO_COEFF;
use b0b1_table::B0B1Table;

/// Point-source magnification of a single impact parameter `u`.
///
/// `A(u) = (u² + 2) / (u·sqrt(u² + 4))`. Diverges as `u → 0` and tends to 1 as
/// `u → ∞`; the caller decides how to handle `u = 0`.
#[inline]
pub fn pspl_magnification_scalar(u: f64) -> f64 {
    let u2 = u * u;
    (u2 + 2.0) / (u * (u2 + 4.0).sqrt())
}

/// Derivative of the point-source magnification with respect to `u`,
/// `dA/du = -8 / (u²·(u² + 4)^{3/2})`.
#[inline]
pub fn pspl_magnification_derivative(u: f64) -> f64 {
    let u2 = u * u;
    -8.0 / (u2 * (u2 + 4.0).powf(1.5))
}

/// Point-source magnification along a trajectory.
///
/// Arguments
/// -----------------
/// * `x`, `y`: Trajectory components in the lens frame (Einstein radii).
///
/// Return
/// ----------
/// * `(A, u)`: the magnification and the source-lens separation, per timestamp.
pub fn pspl_magnification(x: &DVector<f64>, y: &DVector<f64>) -> (DVector<f64>, DVector<f64>) {
    let u = x.zip_map(y, |xi, yi| (xi * xi + yi * yi).sqrt());
    let amplification = u.map(pspl_magnification_scalar);
    (amplification, u)
}

/// Finite-source magnification with linear limb darkening along a trajectory.
///
/// Arguments
/// -----------------
/// * `x`, `y`: Trajectory components in the lens frame (Einstein radii).
/// * `rho`: Normalized source radius.
/// * `gamma`: Linear limb-darkening coefficient of the telescope.
/// * `table`: Finite-source interpolation table.
///
/// Return
/// ----------
/// * `(A, u)`: the magnification and the source-lens separation, per timestamp.
pub fn fspl_magnification(
    x: &DVector<f64>,
    y: &DVector<f64>,
    rho: f64,
    gamma: f64,
    table: &B0B1Table,
) -> (DVector<f64>, DVector<f64>) {
    let (mut amplification, u) = pspl_magnification(x, y);
    let (z_min, z_max) = (table.z_min(), table.z_max());

    for (a, &ui) in amplification.iter_mut().zip(u.iter()) {
        let z = ui / rho;
        if z > z_max {
            // Point-source limit, finite-source correction negligible.
        } else if z < z_min {
            *a *= z * (2.0 - gamma * WITT_MAO_COEFF);
        } else {
            let (b0, b1, _, _) = table.evaluate(z);
            *a *= b0 - gamma * b1;
        }
    }

    (amplification, u)
}
