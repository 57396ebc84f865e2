//! # Parallax engine
//!
//! Converts the observer's motion (Earth's orbit, Earth's rotation, a spacecraft
//! trajectory) into per-telescope shifts `(ΔN, ΔE)` of the apparent source position,
//! expressed in astronomical units on the sky-plane basis `(North, East)` of the
//! event. The trajectory model later turns these purely geometric shifts into
//! curvature through the parallax vector `(piEN, piEE)`.
//!
//! The engine runs once per telescope in an explicit precomputation phase, before
//! any fitting, and caches the shifts on the telescope together with the
//! `(mode, reference epoch)` pair they belong to.
//!
//! ## Behavior matrix
//!
//! | Site          | Annual | Terrestrial | Full                 |
//! |---------------|--------|-------------|----------------------|
//! | `Earth`       | annual | error       | error                |
//! | `EarthSite`   | annual | diurnal     | annual + diurnal     |
//! | `Space`       | annual + spacecraft offset (any enabled mode) |
//!
//! The diurnal term needs geodetic coordinates; asking for it on a bare `Earth`
//! site is a configuration error, not a silent downgrade.
//!
//! ## Invariants
//!
//! - Timestamps are corrected to the solar-system barycenter (fixed-point light
//!   travel correction) before any offset is evaluated.
//! - A failed ephemeris query aborts the affected telescope; shifts are never
//!   silently zeroed.

pub mod horizons;
pub mod sun_ephemeris;

use nalgebra::{DVector, Vector3};

use crate::constants::{Degree, Meter, AU, EARTH_MAJOR_AXIS, JD, RADEG, VLIGHT_AU};
use crate::mulens_errors::{ConfigurationError, ExternalServiceError, MulensError};
use crate::telescopes::{ParallaxShifts, Site, Telescope};
use crate::time::{gmst, jd_to_mjd_days};
use horizons::EphemerisProvider;
use sun_ephemeris::SunEphemeris;

/// Number of fixed-point iterations of the barycentric light-travel correction.
const BARYCENTRIC_ITERATIONS: usize = 3;

/// Margin in days added on both sides of the observing window when querying the
/// ephemeris provider, so that interpolation never runs off the series.
const EPHEMERIS_MARGIN: f64 = 1.0;

/// Parallax mode of a model, with the reference epoch the first-order expansion
/// is anchored to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParallaxModel {
    /// Rectilinear trajectory, no observer-motion correction.
    None,
    /// Earth's orbital motion around the Sun.
    Annual { t_ref: JD },
    /// Earth's rotation (diurnal term) only.
    Terrestrial { t_ref: JD },
    /// Annual plus diurnal terms.
    Full { t_ref: JD },
}

impl ParallaxModel {
    /// Whether the mode adds `(piEN, piEE)` to the parameter dictionary.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, ParallaxModel::None)
    }

    /// Reference epoch of the expansion, when the mode is enabled.
    pub fn t_ref(&self) -> Option<JD> {
        match *self {
            ParallaxModel::None => None,
            ParallaxModel::Annual { t_ref }
            | ParallaxModel::Terrestrial { t_ref }
            | ParallaxModel::Full { t_ref } => Some(t_ref),
        }
    }
}

/// Observer-motion engine for one event.
///
/// Holds the sky-plane basis of the target and the solar ephemeris; it is cheap
/// to build and borrows the ephemeris so that tests can inject a stand-in.
pub struct ParallaxEngine<'a> {
    model: ParallaxModel,
    target: Vector3<f64>,
    north: Vector3<f64>,
    east: Vector3<f64>,
    sun: &'a dyn SunEphemeris,
}

impl<'a> ParallaxEngine<'a> {
    /// Build the engine for a target at `(ra, dec)` in degrees.
    pub fn new(model: ParallaxModel, ra: Degree, dec: Degree, sun: &'a dyn SunEphemeris) -> Self {
        let (ra, dec) = (ra * RADEG, dec * RADEG);
        let target = Vector3::new(dec.cos() * ra.cos(), dec.cos() * ra.sin(), dec.sin());
        let east = Vector3::new(-ra.sin(), ra.cos(), 0.0);
        let north = target.cross(&east);
        ParallaxEngine {
            model,
            target,
            north,
            east,
            sun,
        }
    }

    /// Compute and cache the shifts of every telescope.
    ///
    /// Fails on the first telescope whose computation aborts; earlier telescopes
    /// keep their freshly cached shifts.
    pub fn compute_all_telescopes(
        &self,
        telescopes: &mut [Telescope],
        provider: &dyn EphemerisProvider,
    ) -> Result<(), MulensError> {
        for telescope in telescopes {
            self.compute_telescope(telescope, provider)?;
        }
        Ok(())
    }

    /// Compute and cache the shifts of one telescope according to the behavior
    /// matrix in the module docs.
    pub fn compute_telescope(
        &self,
        telescope: &mut Telescope,
        provider: &dyn EphemerisProvider,
    ) -> Result<(), MulensError> {
        let Some(t_ref) = self.model.t_ref() else {
            telescope.clear_parallax_shifts();
            return Ok(());
        };

        let time = self.to_barycentric(telescope.time());
        let t_ref = self.barycentric_epoch(t_ref);

        let (north, east) = if let Site::Space { body } = &telescope.site {
            let (annual_n, annual_e) = self.annual(&time, t_ref);
            let (space_n, space_e) = self.space(&time, body, provider)?;
            (annual_n + space_n, annual_e + space_e)
        } else {
            match self.model {
                ParallaxModel::Annual { .. } => self.annual(&time, t_ref),
                ParallaxModel::Terrestrial { .. } | ParallaxModel::Full { .. } => {
                    let Site::EarthSite {
                        longitude,
                        latitude,
                        altitude,
                    } = &telescope.site
                    else {
                        return Err(ConfigurationError::MissingSiteCoordinates(
                            telescope.name.clone(),
                            telescope.site.kind().to_string(),
                        )
                        .into());
                    };
                    let (diurnal_n, diurnal_e) = self.terrestrial(
                        &time,
                        longitude.into_inner(),
                        latitude.into_inner(),
                        altitude.into_inner(),
                    );
                    if matches!(self.model, ParallaxModel::Full { .. }) {
                        let (annual_n, annual_e) = self.annual(&time, t_ref);
                        (annual_n + diurnal_n, annual_e + diurnal_e)
                    } else {
                        (diurnal_n, diurnal_e)
                    }
                }
                // t_ref() returned Some above.
                ParallaxModel::None => unreachable!(),
            }
        };

        telescope.set_parallax_shifts(ParallaxShifts {
            north,
            east,
            model: self.model,
        });
        Ok(())
    }

    /// Barycentric light-travel correction of a timestamp vector.
    pub fn to_barycentric(&self, time: &DVector<f64>) -> DVector<f64> {
        time.map(|t| self.barycentric_epoch(t))
    }

    /// Fixed-point correction of one Julian date for the light travel time
    /// between the geocenter and the solar-system barycenter along the line of
    /// sight.
    fn barycentric_epoch(&self, t: JD) -> JD {
        let mut corrected = t;
        for _ in 0..BARYCENTRIC_ITERATIONS {
            let sun = self.sun.position(jd_to_mjd_days(corrected));
            corrected = t + sun.dot(&self.target) / VLIGHT_AU;
        }
        corrected
    }

    /// Annual term: departure of the Sun's apparent motion from the linear
    /// expansion anchored at `t_ref`, projected on `(North, East)`.
    fn annual(&self, time: &DVector<f64>, t_ref: JD) -> (DVector<f64>, DVector<f64>) {
        let sun_ref = self.sun.position(jd_to_mjd_days(t_ref));
        let velocity_ref = self.sun.velocity(jd_to_mjd_days(t_ref));

        let mut north = DVector::zeros(time.len());
        let mut east = DVector::zeros(time.len());
        for (index, &t) in time.iter().enumerate() {
            let delta =
                self.sun.position(jd_to_mjd_days(t)) - velocity_ref * (t - t_ref) - sun_ref;
            (north[index], east[index]) = self.project(&delta);
        }
        (north, east)
    }

    /// Diurnal term: the observer's geocentric position at the local sidereal
    /// angle, with reversed sign so that it composes with the annual term.
    fn terrestrial(
        &self,
        time: &DVector<f64>,
        longitude: Degree,
        latitude: Degree,
        altitude: Meter,
    ) -> (DVector<f64>, DVector<f64>) {
        let radius = (EARTH_MAJOR_AXIS + altitude) / 1000.0 / AU;
        let longitude = longitude * RADEG;
        let latitude = latitude * RADEG;

        let mut north = DVector::zeros(time.len());
        let mut east = DVector::zeros(time.len());
        for (index, &t) in time.iter().enumerate() {
            let theta = gmst(jd_to_mjd_days(t)) + longitude;
            let position = Vector3::new(
                latitude.cos() * theta.cos(),
                latitude.cos() * theta.sin(),
                latitude.sin(),
            ) * radius;
            (north[index], east[index]) = self.project(&(-position));
        }
        (north, east)
    }

    /// Spacecraft term: the geocentric satellite position interpolated from the
    /// provider's time series, with reversed sign like the diurnal term.
    fn space(
        &self,
        time: &DVector<f64>,
        body: &str,
        provider: &dyn EphemerisProvider,
    ) -> Result<(DVector<f64>, DVector<f64>), MulensError> {
        let (t_first, t_last) = (time.min(), time.max());
        let (start, end) = (t_first - EPHEMERIS_MARGIN, t_last + EPHEMERIS_MARGIN);

        let records = provider.query(body, start, end)?;
        horizons::validate_records(body, start, end, &records)?;
        if records[0].jd > t_first || records[records.len() - 1].jd < t_last {
            return Err(ExternalServiceError::MalformedPayload {
                body: body.to_string(),
                reason: format!(
                    "time series [{}, {}] does not cover the observing window [{t_first}, {t_last}]",
                    records[0].jd,
                    records[records.len() - 1].jd
                ),
            }
            .into());
        }

        let jds: Vec<f64> = records.iter().map(|r| r.jd).collect();
        let decs: Vec<f64> = records.iter().map(|r| r.dec).collect();
        let distances: Vec<f64> = records.iter().map(|r| r.distance).collect();
        // Unwrap the right ascension so that a 360° → 0° crossing interpolates
        // continuously.
        let mut ras: Vec<f64> = records.iter().map(|r| r.ra).collect();
        for index in 1..ras.len() {
            while ras[index] - ras[index - 1] > 180.0 {
                ras[index] -= 360.0;
            }
            while ras[index] - ras[index - 1] < -180.0 {
                ras[index] += 360.0;
            }
        }

        let mut north = DVector::zeros(time.len());
        let mut east = DVector::zeros(time.len());
        for (index, &t) in time.iter().enumerate() {
            let ra = linear_interp(&jds, &ras, t) * RADEG;
            let dec = linear_interp(&jds, &decs, t) * RADEG;
            let distance = linear_interp(&jds, &distances, t);
            let position =
                Vector3::new(dec.cos() * ra.cos(), dec.cos() * ra.sin(), dec.sin()) * distance;
            (north[index], east[index]) = self.project(&(-position));
        }
        Ok((north, east))
    }

    /// Project a geometric offset on the sky-plane basis.
    fn project(&self, delta: &Vector3<f64>) -> (f64, f64) {
        (delta.dot(&self.north), delta.dot(&self.east))
    }
}

/// Linear interpolation on a sorted grid; callers guarantee `x` is in range.
fn linear_interp(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[xs.len() - 1] {
        return ys[ys.len() - 1];
    }
    let i = xs.partition_point(|&node| node <= x);
    let (x0, x1) = (xs[i - 1], xs[i]);
    let (y0, y1) = (ys[i - 1], ys[i]);
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

#[cfg(test)]
mod parallax_tests {
    use super::horizons::EphemerisRecord;
    use super::sun_ephemeris::LowPrecisionSun;
    use super::*;
    use crate::constants::ERAU;

    /// Provider with the spacecraft fixed on a sky direction at constant distance.
    struct StubProvider {
        ra: f64,
        dec: f64,
        distance: f64,
    }

    impl EphemerisProvider for StubProvider {
        fn query(&self, _body: &str, start: JD, end: JD) -> Result<Vec<EphemerisRecord>, MulensError> {
            let mut records = Vec::new();
            let mut jd = start.floor();
            while jd <= end.ceil() {
                records.push(EphemerisRecord {
                    jd,
                    ra: self.ra,
                    dec: self.dec,
                    distance: self.distance,
                });
                jd += 1.0;
            }
            Ok(records)
        }
    }

    /// Provider returning a fixed record list, used for failure-path tests.
    struct CannedProvider(Vec<EphemerisRecord>);

    impl EphemerisProvider for CannedProvider {
        fn query(&self, _body: &str, _start: JD, _end: JD) -> Result<Vec<EphemerisRecord>, MulensError> {
            Ok(self.0.clone())
        }
    }

    fn ground_telescope() -> Telescope {
        let lightcurve: Vec<[f64; 3]> = (0..40)
            .map(|i| [2457480.0 + i as f64, 10.0, 0.1])
            .collect();
        Telescope::new("OGLE", Site::Earth, &lightcurve, 0.0).unwrap()
    }

    #[test]
    fn test_none_mode_clears_cache() {
        let sun = LowPrecisionSun;
        let engine = ParallaxEngine::new(ParallaxModel::None, 270.0, -30.0, &sun);
        let mut telescope = ground_telescope();
        let provider = StubProvider {
            ra: 0.0,
            dec: 0.0,
            distance: 1.0,
        };
        engine.compute_telescope(&mut telescope, &provider).unwrap();
        assert!(telescope.parallax_shifts().is_none());
    }

    #[test]
    fn test_annual_shift_vanishes_at_reference_epoch() {
        let sun = LowPrecisionSun;
        let t_ref = 2457500.0;
        let engine = ParallaxEngine::new(ParallaxModel::Annual { t_ref }, 270.0, -30.0, &sun);
        let mut telescope = ground_telescope();
        let provider = StubProvider {
            ra: 0.0,
            dec: 0.0,
            distance: 1.0,
        };
        engine.compute_telescope(&mut telescope, &provider).unwrap();

        let shifts = telescope
            .shifts_for(ParallaxModel::Annual { t_ref })
            .unwrap();
        // t_ref coincides with the observation at index 20.
        assert!(shifts.north[20].abs() < 1e-12);
        assert!(shifts.east[20].abs() < 1e-12);
        // Over a 40-day window the quadratic departure stays well below 1 AU.
        assert!(shifts.north.amax() < 0.2);
        assert!(shifts.east.amax() < 0.2);
        // And it is not identically zero away from the reference epoch.
        assert!(shifts.north[0].abs() + shifts.east[0].abs() > 1e-6);
    }

    #[test]
    fn test_terrestrial_shift_bounded_by_earth_radius() {
        let sun = LowPrecisionSun;
        let t_ref = 2457500.0;
        let engine = ParallaxEngine::new(ParallaxModel::Terrestrial { t_ref }, 270.0, -30.0, &sun);
        let lightcurve: Vec<[f64; 3]> = (0..24)
            .map(|i| [2457500.0 + i as f64 / 24.0, 10.0, 0.1])
            .collect();
        let mut telescope = Telescope::new(
            "CTIO",
            Site::earth_site(-70.8, -30.2, 2200.0).unwrap(),
            &lightcurve,
            0.0,
        )
        .unwrap();
        let provider = StubProvider {
            ra: 0.0,
            dec: 0.0,
            distance: 1.0,
        };
        engine.compute_telescope(&mut telescope, &provider).unwrap();

        let shifts = telescope
            .shifts_for(ParallaxModel::Terrestrial { t_ref })
            .unwrap();
        for index in 0..24 {
            let magnitude = shifts.north[index].hypot(shifts.east[index]);
            assert!(magnitude <= ERAU * 1.01, "magnitude = {magnitude}");
        }
        assert!(shifts.north.amax() + shifts.east.amax() > 0.0);
    }

    #[test]
    fn test_terrestrial_mode_requires_site_coordinates() {
        let sun = LowPrecisionSun;
        let engine = ParallaxEngine::new(
            ParallaxModel::Full { t_ref: 2457500.0 },
            270.0,
            -30.0,
            &sun,
        );
        let mut telescope = ground_telescope();
        let provider = StubProvider {
            ra: 0.0,
            dec: 0.0,
            distance: 1.0,
        };
        let err = engine
            .compute_telescope(&mut telescope, &provider)
            .unwrap_err();
        assert!(matches!(
            err,
            MulensError::Configuration(ConfigurationError::MissingSiteCoordinates(_, _))
        ));
        // The failed telescope keeps no cache.
        assert!(telescope.parallax_shifts().is_none());
    }

    #[test]
    fn test_space_term_along_line_of_sight_projects_to_zero() {
        let sun = LowPrecisionSun;
        let t_ref = 2457500.0;
        let model = ParallaxModel::Annual { t_ref };
        let engine = ParallaxEngine::new(model, 270.0, -30.0, &sun);

        let mut ground = ground_telescope();
        let lightcurve: Vec<[f64; 3]> = (0..40)
            .map(|i| [2457480.0 + i as f64, 10.0, 0.1])
            .collect();
        let mut satellite = Telescope::new(
            "Spitzer",
            Site::Space {
                body: "Spitzer".into(),
            },
            &lightcurve,
            0.0,
        )
        .unwrap();

        // Satellite sitting exactly on the line of sight: its offset has no
        // sky-plane component, so the shifts reduce to the annual term.
        let provider = StubProvider {
            ra: 270.0,
            dec: -30.0,
            distance: 0.01,
        };
        engine.compute_telescope(&mut ground, &provider).unwrap();
        engine.compute_telescope(&mut satellite, &provider).unwrap();

        let ground_shifts = ground.shifts_for(model).unwrap();
        let satellite_shifts = satellite.shifts_for(model).unwrap();
        for index in 0..40 {
            assert!((ground_shifts.north[index] - satellite_shifts.north[index]).abs() < 1e-12);
            assert!((ground_shifts.east[index] - satellite_shifts.east[index]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_space_failures_abort_the_telescope() {
        let sun = LowPrecisionSun;
        let model = ParallaxModel::Annual { t_ref: 2457500.0 };
        let engine = ParallaxEngine::new(model, 270.0, -30.0, &sun);
        let lightcurve = [[2457500.0, 10.0, 0.1], [2457501.0, 10.0, 0.1]];
        let record = |jd| EphemerisRecord {
            jd,
            ra: 10.0,
            dec: 5.0,
            distance: 1.0,
        };

        let cases: Vec<(CannedProvider, fn(&MulensError) -> bool)> = vec![
            (CannedProvider(vec![record(2457500.0)]), |e| {
                matches!(
                    e,
                    MulensError::ExternalService(ExternalServiceError::NotEnoughRecords { .. })
                )
            }),
            (
                CannedProvider(vec![
                    record(2457499.0),
                    record(2457503.0),
                    record(2457501.0),
                ]),
                |e| {
                    matches!(
                        e,
                        MulensError::ExternalService(ExternalServiceError::UnsortedRecords { .. })
                    )
                },
            ),
            (
                CannedProvider(vec![record(2457500.2), record(2457500.4)]),
                |e| {
                    matches!(
                        e,
                        MulensError::ExternalService(ExternalServiceError::MalformedPayload { .. })
                    )
                },
            ),
        ];

        for (provider, check) in cases {
            let mut satellite = Telescope::new(
                "Gaia",
                Site::Space { body: "Gaia".into() },
                &lightcurve,
                0.0,
            )
            .unwrap();
            let err = engine
                .compute_telescope(&mut satellite, &provider)
                .unwrap_err();
            assert!(check(&err), "unexpected error: {err}");
            assert!(satellite.parallax_shifts().is_none());
        }
    }

    #[test]
    fn test_barycentric_correction_is_small_and_order_preserving() {
        let sun = LowPrecisionSun;
        let engine = ParallaxEngine::new(
            ParallaxModel::Annual { t_ref: 2457500.0 },
            270.0,
            -30.0,
            &sun,
        );
        let time = DVector::from_vec(vec![2457480.0, 2457500.0, 2457520.0]);
        let corrected = engine.to_barycentric(&time);
        for index in 0..3 {
            // Light crosses 1 AU in ~500 s.
            assert!((corrected[index] - time[index]).abs() < 600.0 / 86400.0);
        }
        assert!(corrected[0] < corrected[1] && corrected[1] < corrected[2]);
    }
}
