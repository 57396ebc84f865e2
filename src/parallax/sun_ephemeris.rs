//! # Solar ephemeris collaborator
//!
//! The parallax engine needs the geocentric position and velocity of the Sun at
//! arbitrary epochs. The dependency is expressed as the [`SunEphemeris`] trait so
//! that tests can inject a deterministic stand-in; [`LowPrecisionSun`] is the
//! default implementation, based on the Astronomical Almanac low-precision solar
//! coordinates (accurate to ~0.01 degree between 1950 and 2050), rotated to the
//! J2000 equinox with a first-order precession correction.

use nalgebra::Vector3;

use crate::constants::{RADEG, T2000, MJD};

/// Geocentric solar position provider.
///
/// Positions are in astronomical units in the equatorial mean-J2000 frame;
/// velocities in AU/day.
pub trait SunEphemeris: Sync {
    /// Geocentric position of the Sun at `mjd`.
    fn position(&self, mjd: MJD) -> Vector3<f64>;

    /// Geocentric velocity of the Sun at `mjd`, by central difference of the
    /// position unless an implementation has something better.
    fn velocity(&self, mjd: MJD) -> Vector3<f64> {
        const STEP: f64 = 0.05;
        (self.position(mjd + STEP) - self.position(mjd - STEP)) / (2.0 * STEP)
    }
}

/// Astronomical Almanac low-precision solar coordinates.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowPrecisionSun;

/// General precession in ecliptic longitude, degrees per Julian year.
const PRECESSION_DEG_PER_YEAR: f64 = 50.29 / 3600.0;

impl SunEphemeris for LowPrecisionSun {
    fn position(&self, mjd: MJD) -> Vector3<f64> {
        // Days since J2000.0.
        let n = mjd - T2000;

        // Mean longitude and mean anomaly of the Sun, degrees.
        let mean_longitude = 280.460 + 0.9856474 * n;
        let mean_anomaly = (357.528 + 0.9856003 * n) * RADEG;

        // Ecliptic longitude of date, with the equation-of-center terms.
        let mut longitude = mean_longitude
            + 1.915 * mean_anomaly.sin()
            + 0.020 * (2.0 * mean_anomaly).sin();

        // Refer the longitude to the J2000 equinox instead of the equinox of date.
        longitude -= PRECESSION_DEG_PER_YEAR * n / 365.25;
        let longitude = longitude * RADEG;

        // Sun-Earth distance in AU.
        let distance =
            1.00014 - 0.01671 * mean_anomaly.cos() - 0.00014 * (2.0 * mean_anomaly).cos();

        // Obliquity of the ecliptic, degrees.
        let obliquity = (23.439 - 4.0e-7 * n) * RADEG;

        Vector3::new(
            distance * longitude.cos(),
            distance * obliquity.cos() * longitude.sin(),
            distance * obliquity.sin() * longitude.sin(),
        )
    }
}
