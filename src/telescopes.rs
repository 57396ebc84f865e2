//! # Telescopes and light curves
//!
//! A [`Telescope`] owns one photometric light curve (time, flux, flux error), a site
//! description used by the parallax engine, a limb-darkening coefficient, and the
//! cached parallax shifts once they have been computed.
//!
//! ## Invariants
//!
//! - The light curve is sorted by time at construction; input ordering is free.
//! - All values are finite and flux errors are strictly positive, otherwise
//!   construction fails with a [`DataError`].
//! - Parallax shifts, once cached, have exactly the light-curve length and remember
//!   the `(mode, reference epoch)` pair they were computed for. A model evaluated
//!   with a different pair fails fast instead of using stale offsets.
//!
//! ## Units
//!
//! - `time`: Julian Date (days).
//! - `longitude`: degrees, east positive. `latitude`: degrees. `altitude`: meters.
//! - Parallax shifts: astronomical units, projected on the (North, East) sky-plane
//!   basis of the event.

use nalgebra::DVector;
use ordered_float::NotNan;

use crate::constants::{Degree, Meter, JD};
use crate::mulens_errors::{ConfigurationError, DataError, MulensError};
use crate::parallax::ParallaxModel;

/// Observing-site kind of a telescope.
///
/// The site kind selects which geometric corrections the parallax engine applies:
/// `Earth` receives the annual term only, `EarthSite` additionally supports the
/// diurnal (terrestrial) term, and `Space` resolves the spacecraft position through
/// the external ephemeris provider.
#[derive(Debug, Clone, PartialEq)]
pub enum Site {
    /// Ground-based telescope, site coordinates unknown or irrelevant.
    Earth,
    /// Ground-based telescope with geodetic coordinates, enabling the diurnal term.
    EarthSite {
        /// Geodetic longitude in degrees, east of Greenwich.
        longitude: NotNan<f64>,
        /// Geodetic latitude in degrees.
        latitude: NotNan<f64>,
        /// Altitude above the reference ellipsoid in meters.
        altitude: NotNan<f64>,
    },
    /// Space-based telescope; `body` is the satellite name resolved by the
    /// ephemeris provider lookup table.
    Space { body: String },
}

impl Site {
    /// Build an [`Site::EarthSite`], rejecting NaN coordinates.
    pub fn earth_site(
        longitude: Degree,
        latitude: Degree,
        altitude: Meter,
    ) -> Result<Self, ConfigurationError> {
        Ok(Site::EarthSite {
            longitude: NotNan::new(longitude)?,
            latitude: NotNan::new(latitude)?,
            altitude: NotNan::new(altitude)?,
        })
    }

    /// Human-readable kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Site::Earth => "Earth",
            Site::EarthSite { .. } => "Earth-with-site-coordinates",
            Site::Space { .. } => "Space",
        }
    }
}

/// Parallax shifts cached on a telescope after the engine has run.
///
/// `north[i]`/`east[i]` correspond to `telescope.time()[i]`. The `model` field
/// records the parallax mode and reference epoch the shifts were computed for,
/// so that a stale cache is detected instead of silently reused.
#[derive(Debug, Clone, PartialEq)]
pub struct ParallaxShifts {
    pub north: DVector<f64>,
    pub east: DVector<f64>,
    pub model: ParallaxModel,
}

/// A telescope with its light curve and site description.
#[derive(Debug, Clone)]
pub struct Telescope {
    /// Unique name; also used as the parameter-dictionary key suffix of the
    /// per-telescope flux parameters (`fs_<name>`, `g_<name>`).
    pub name: String,
    pub site: Site,
    /// Linear limb-darkening coefficient used by the finite-source law.
    pub gamma: f64,
    time: DVector<f64>,
    flux: DVector<f64>,
    err_flux: DVector<f64>,
    parallax_shifts: Option<ParallaxShifts>,
}

impl Telescope {
    /// Create a telescope from `(time, flux, flux error)` triples.
    ///
    /// The light curve is validated and sorted by time.
    ///
    /// Arguments
    /// -----------------
    /// * `name`: Unique telescope name.
    /// * `site`: Observing-site kind.
    /// * `lightcurve`: `(JD, flux, err_flux)` triples, in any order.
    /// * `gamma`: Linear limb-darkening coefficient.
    ///
    /// Return
    /// ----------
    /// * The telescope, or a [`DataError`] when the light curve is empty, contains
    ///   non-finite values, or has non-positive flux errors.
    pub fn new(
        name: &str,
        site: Site,
        lightcurve: &[[f64; 3]],
        gamma: f64,
    ) -> Result<Self, MulensError> {
        if lightcurve.is_empty() {
            return Err(DataError::EmptyLightCurve(name.to_string()).into());
        }
        for (index, point) in lightcurve.iter().enumerate() {
            if point.iter().any(|value| !value.is_finite()) {
                return Err(DataError::NonFiniteValue(name.to_string(), index).into());
            }
            if point[2] <= 0.0 {
                return Err(DataError::NonPositiveFluxError(name.to_string(), index).into());
            }
        }

        let mut sorted = lightcurve.to_vec();
        // All values are finite at this point, the comparison cannot fail.
        sorted.sort_by(|a, b| a[0].partial_cmp(&b[0]).unwrap());

        Ok(Telescope {
            name: name.to_string(),
            site,
            gamma,
            time: DVector::from_iterator(sorted.len(), sorted.iter().map(|p| p[0])),
            flux: DVector::from_iterator(sorted.len(), sorted.iter().map(|p| p[1])),
            err_flux: DVector::from_iterator(sorted.len(), sorted.iter().map(|p| p[2])),
            parallax_shifts: None,
        })
    }

    /// Observation timestamps in Julian Date, sorted ascending.
    pub fn time(&self) -> &DVector<f64> {
        &self.time
    }

    /// Observed fluxes, aligned with [`Telescope::time`].
    pub fn flux(&self) -> &DVector<f64> {
        &self.flux
    }

    /// Flux errors, aligned with [`Telescope::time`].
    pub fn err_flux(&self) -> &DVector<f64> {
        &self.err_flux
    }

    /// Number of photometric points.
    pub fn n_data(&self) -> usize {
        self.time.len()
    }

    /// Cached parallax shifts, if the engine has run for this telescope.
    pub fn parallax_shifts(&self) -> Option<&ParallaxShifts> {
        self.parallax_shifts.as_ref()
    }

    /// Shifts valid for `model`, or a fail-fast error when the cache is absent or
    /// was computed for a different mode/reference epoch.
    pub fn shifts_for(&self, model: ParallaxModel) -> Result<&ParallaxShifts, MulensError> {
        match &self.parallax_shifts {
            Some(shifts) if shifts.model == model => Ok(shifts),
            _ => Err(ConfigurationError::ParallaxNotComputed(self.name.clone()).into()),
        }
    }

    /// Transition the telescope to the `Computed` parallax state.
    pub(crate) fn set_parallax_shifts(&mut self, shifts: ParallaxShifts) {
        debug_assert_eq!(shifts.north.len(), self.time.len());
        debug_assert_eq!(shifts.east.len(), self.time.len());
        self.parallax_shifts = Some(shifts);
    }

    /// Drop the cached shifts, forcing recomputation on the next engine run.
    pub fn clear_parallax_shifts(&mut self) {
        self.parallax_shifts = None;
    }
}
