//! # Finite-source interpolation table (B0, B1)
//!
//! Loads the tabulated finite-source magnification factors `B0(z)` and `B1(z)`
//! (Yoo et al. 2004) on a monotonic grid of the normalized source-lens separation
//! `z = u / rho`, and builds their derivatives `dB0/dz`, `dB1/dz` by central
//! differences of the linear interpolant.
//!
//! The table is pure data: immutable after construction, `Send + Sync`, and shared
//! by reference-counted handle across every model evaluation. There is **no safe
//! default magnification law** — a missing or malformed table is a fatal load error.
//!
//! ## File format
//!
//! Whitespace-delimited numeric columns `z B0(z) B1(z)`, strictly increasing in `z`;
//! lines starting with `#` are skipped; extra columns (e.g. precomputed derivatives)
//! are ignored and the derivatives are rebuilt here so that all tables share the
//! same differentiation scheme.

use std::fs;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use crate::constants::WITT_MAO_COEFF;
use crate::mulens_errors::{DataError, MulensError};

/// Step of the central-difference derivative of the linear interpolant.
const DERIVATIVE_STEP: f64 = 1e-4;

/// Table shipped with the crate, covering `z` in `[0.001, 50]`.
static EMBEDDED: LazyLock<Arc<B0B1Table>> = LazyLock::new(|| {
    Arc::new(
        B0B1Table::parse(include_str!("../../data/yoo_b0b1.dat"))
            .expect("embedded B0/B1 table is malformed"),
    )
});

/// Finite-source magnification factors with derivatives on a monotonic `z` grid.
#[derive(Debug, Clone, PartialEq)]
pub struct B0B1Table {
    z: Vec<f64>,
    b0: Vec<f64>,
    b1: Vec<f64>,
    db0: Vec<f64>,
    db1: Vec<f64>,
}

impl B0B1Table {
    /// Load a table from a whitespace-delimited file.
    ///
    /// Arguments
    /// -----------------
    /// * `path`: Path of the table file.
    ///
    /// Return
    /// ----------
    /// * The table, or a [`DataError`] when the file is missing or malformed.
    ///   There is no fallback; callers are expected to treat this as fatal.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MulensError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            DataError::TableUnreadable(format!("{}: {e}", path.as_ref().display()))
        })?;
        Self::parse(&content)
    }

    /// Parse a table from its textual content. See the module docs for the format.
    pub fn parse(content: &str) -> Result<Self, MulensError> {
        let mut z = Vec::new();
        let mut b0 = Vec::new();
        let mut b1 = Vec::new();

        for (line_index, line) in content.lines().enumerate() {
            let line_number = line_index + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let mut columns = trimmed.split_whitespace().map(|token| {
                token.parse::<f64>().map_err(|_| DataError::TableMalformed {
                    line: line_number,
                    reason: format!("non-numeric column '{token}'"),
                })
            });

            let mut next_column = |name: &str| {
                columns.next().ok_or_else(|| DataError::TableMalformed {
                    line: line_number,
                    reason: format!("missing column '{name}'"),
                })?
            };

            let zi = next_column("z")?;
            let b0i = next_column("B0")?;
            let b1i = next_column("B1")?;

            if let Some(last) = z.last() {
                if zi <= *last {
                    return Err(DataError::TableMalformed {
                        line: line_number,
                        reason: format!("z column not strictly increasing ({zi} after {last})"),
                    }
                    .into());
                }
            }

            z.push(zi);
            b0.push(b0i);
            b1.push(b1i);
        }

        if z.len() < 3 {
            return Err(DataError::TableMalformed {
                line: content.lines().count(),
                reason: format!("table has {} rows, at least 3 are required", z.len()),
            }
            .into());
        }

        let db0 = differentiate(&z, &b0, 2.0);
        let db1 = differentiate(&z, &b1, WITT_MAO_COEFF);

        Ok(B0B1Table { z, b0, b1, db0, db1 })
    }

    /// Process-wide table parsed once from the embedded data file.
    ///
    /// The handle is cheap to clone and intended to be passed explicitly into every
    /// model that needs it.
    pub fn embedded() -> Arc<B0B1Table> {
        Arc::clone(&EMBEDDED)
    }

    /// Lower edge of the tabulated domain.
    pub fn z_min(&self) -> f64 {
        self.z[0]
    }

    /// Upper edge of the tabulated domain.
    pub fn z_max(&self) -> f64 {
        *self.z.last().unwrap()
    }

    /// Evaluate `(B0, B1, dB0/dz, dB1/dz)` at `z` by linear interpolation.
    ///
    /// Outside the tabulated domain the edge values are returned; the magnification
    /// regime split guards the domain, so extrapolation only happens when a caller
    /// bypasses it deliberately.
    pub fn evaluate(&self, z: f64) -> (f64, f64, f64, f64) {
        (
            interpolate(&self.z, &self.b0, z),
            interpolate(&self.z, &self.b1, z),
            interpolate(&self.z, &self.db0, z),
            interpolate(&self.z, &self.db1, z),
        )
    }
}

/// Linear interpolation on a sorted grid, clamped to the edge values.
fn interpolate(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[xs.len() - 1] {
        return ys[ys.len() - 1];
    }
    // First index with xs[i] > x; the surrounding segment is [i - 1, i].
    let i = xs.partition_point(|&node| node <= x);
    let (x0, x1) = (xs[i - 1], xs[i]);
    let (y0, y1) = (ys[i - 1], ys[i]);
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

/// Node derivatives by central difference of the linear interpolant.
///
/// The first node is clamped to the known analytic limit (`dB0 → 2`,
/// `dB1 → 2 - 3π/4` as `z → 0`); the last node copies its neighbor.
fn differentiate(z: &[f64], values: &[f64], limit_at_zero: f64) -> Vec<f64> {
    let n = z.len();
    let mut derivative = Vec::with_capacity(n);
    derivative.push(limit_at_zero);
    for &node in &z[1..n - 1] {
        let forward = interpolate(z, values, node + DERIVATIVE_STEP);
        let backward = interpolate(z, values, node - DERIVATIVE_STEP);
        derivative.push((forward - backward) / (2.0 * DERIVATIVE_STEP));
    }
    derivative.push(derivative[n - 2]);
    derivative
}
