//! # Microlensing light-curve model
//!
//! A [`MicrolensModel`] binds an event, a model configuration and the
//! finite-source table, and evaluates the photometric model per telescope:
//!
//! 1. source trajectory `(τ, β)` in the lens frame, including the parallax
//!    curvature when enabled;
//! 2. magnification through the PSPL or FSPL law;
//! 3. model flux `fs·A + fs·g`, with the per-telescope fluxes either taken from
//!    the optimization vector or solved by weighted linear least squares.
//!
//! The analytic flux Jacobian covers PSPL and FSPL with fitted fluxes, with or
//! without parallax; second-order effects and estimated fluxes fall back to
//! numerical differentiation in the fitting drivers.

pub mod parameters;

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use crate::constants::WITT_MAO_COEFF;
use crate::event::Event;
use crate::magnification::b0b1_table::B0B1Table;
use crate::magnification::{
    fspl_magnification, pspl_magnification, pspl_magnification_derivative,
    pspl_magnification_scalar,
};
use crate::mulens_errors::{DataError, MulensError, NumericalError};
use crate::parallax::horizons::EphemerisProvider;
use crate::parallax::sun_ephemeris::SunEphemeris;
use crate::parallax::ParallaxEngine;
use crate::telescopes::Telescope;
use parameters::{FluxParameters, ModelConfig, ModelKind, ParameterDictionary, ResolvedParameters};

/// A configured microlensing model bound to one event.
pub struct MicrolensModel {
    event: Event,
    config: ModelConfig,
    dictionary: ParameterDictionary,
    table: Arc<B0B1Table>,
}

impl MicrolensModel {
    /// Bind a configuration to an event.
    ///
    /// The parameter dictionary is frozen here; the finite-source table handle is
    /// injected explicitly so that all models of a process share one table.
    pub fn new(
        event: Event,
        config: ModelConfig,
        table: Arc<B0B1Table>,
    ) -> Result<Self, MulensError> {
        let dictionary = ParameterDictionary::build(&config, &event)?;
        Ok(MicrolensModel {
            event,
            config,
            dictionary,
            table,
        })
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn dictionary(&self) -> &ParameterDictionary {
        &self.dictionary
    }

    /// Run the parallax engine on every telescope of the event.
    ///
    /// Must be called once before any model evaluation when parallax is enabled;
    /// evaluating with stale or missing shifts fails fast.
    pub fn compute_parallax(
        &mut self,
        sun: &dyn SunEphemeris,
        provider: &dyn EphemerisProvider,
    ) -> Result<(), MulensError> {
        let engine = ParallaxEngine::new(self.config.parallax, self.event.ra, self.event.dec, sun);
        engine.compute_all_telescopes(&mut self.event.telescopes, provider)
    }

    /// Bind an optimization vector for named access.
    pub fn resolve<'a>(
        &'a self,
        vector: &'a DVector<f64>,
    ) -> Result<ResolvedParameters<'a>, MulensError> {
        self.dictionary.resolve(vector)
    }

    /// Whether the analytic flux Jacobian applies to this configuration.
    pub fn has_analytic_jacobian(&self) -> bool {
        self.config.flux_parameters == FluxParameters::Fitted
            && !self.config.has_second_order_effects()
    }

    /// Source trajectory `(τ, β)` of one telescope in the lens frame.
    ///
    /// With parallax enabled the cached shifts bend the rectilinear trajectory:
    /// `Δτ = -(piEN·ΔN + piEE·ΔE)` and `Δβ = -(piEN·ΔE - piEE·ΔN)`.
    pub fn source_trajectory(
        &self,
        telescope: &Telescope,
        params: &ResolvedParameters,
    ) -> Result<(DVector<f64>, DVector<f64>), MulensError> {
        let to = params.get("to")?;
        let uo = params.get("uo")?;
        let te = params.get("tE")?;

        let time = telescope.time();
        let mut tau = time.map(|t| (t - to) / te);
        let mut beta = DVector::from_element(time.len(), uo);

        if self.config.parallax.is_enabled() {
            let pi_en = params.get("piEN")?;
            let pi_ee = params.get("piEE")?;
            let shifts = telescope.shifts_for(self.config.parallax)?;
            for index in 0..time.len() {
                tau[index] -= pi_en * shifts.north[index] + pi_ee * shifts.east[index];
                beta[index] -= pi_en * shifts.east[index] - pi_ee * shifts.north[index];
            }
        }

        Ok((tau, beta))
    }

    /// Magnification `(A, u)` of one telescope.
    pub fn magnification(
        &self,
        telescope: &Telescope,
        params: &ResolvedParameters,
    ) -> Result<(DVector<f64>, DVector<f64>), MulensError> {
        let (tau, beta) = self.source_trajectory(telescope, params)?;
        match self.config.kind {
            ModelKind::Pspl => Ok(pspl_magnification(&tau, &beta)),
            ModelKind::Fspl => {
                let rho = params.get("rho")?;
                Ok(fspl_magnification(
                    &tau,
                    &beta,
                    rho,
                    telescope.gamma,
                    &self.table,
                ))
            }
        }
    }

    /// Model flux of one telescope, `fs·A + fs·g`.
    pub fn model_flux(
        &self,
        telescope: &Telescope,
        params: &ResolvedParameters,
    ) -> Result<DVector<f64>, MulensError> {
        let (amplification, _) = self.magnification(telescope, params)?;
        let (fs, fb) = self.fluxes(telescope, params, &amplification)?;
        Ok(amplification.map(|a| fs * a + fb))
    }

    /// Source and blend flux `(fs, fb)` of one telescope according to the flux
    /// mode.
    fn fluxes(
        &self,
        telescope: &Telescope,
        params: &ResolvedParameters,
        amplification: &DVector<f64>,
    ) -> Result<(f64, f64), MulensError> {
        match self.config.flux_parameters {
            FluxParameters::Fitted => {
                let fs = params.get(&format!("fs_{}", telescope.name))?;
                let g = params.get(&format!("g_{}", telescope.name))?;
                Ok((fs, fs * g))
            }
            FluxParameters::Estimated => self.estimate_fluxes(telescope, amplification),
        }
    }

    /// Weighted linear least-squares solution of `flux ≈ fs·A + fb`, weights
    /// `1/err²`.
    pub fn estimate_fluxes(
        &self,
        telescope: &Telescope,
        amplification: &DVector<f64>,
    ) -> Result<(f64, f64), MulensError> {
        let flux = telescope.flux();
        let err = telescope.err_flux();

        let mut s_w = 0.0;
        let mut s_wa = 0.0;
        let mut s_waa = 0.0;
        let mut s_wf = 0.0;
        let mut s_waf = 0.0;
        for index in 0..flux.len() {
            let weight = 1.0 / (err[index] * err[index]);
            let a = amplification[index];
            s_w += weight;
            s_wa += weight * a;
            s_waa += weight * a * a;
            s_wf += weight * flux[index];
            s_waf += weight * a * flux[index];
        }

        let determinant = s_w * s_waa - s_wa * s_wa;
        if determinant.abs() <= f64::EPSILON * (s_w * s_waa).abs() {
            return Err(NumericalError::DegenerateFluxEstimation(telescope.name.clone()).into());
        }

        let fs = (s_w * s_waf - s_wa * s_wf) / determinant;
        let fb = (s_wf - fs * s_wa) / s_w;
        Ok((fs, fb))
    }

    /// Analytic Jacobian `∂(model flux)/∂θ` of one telescope, one full
    /// dictionary-width row per data point. Columns of other telescopes' flux
    /// parameters are zero.
    ///
    /// Only valid for fitted fluxes without second-order effects; the fitting
    /// drivers check [`MicrolensModel::has_analytic_jacobian`] first.
    pub fn flux_jacobian(
        &self,
        telescope: &Telescope,
        params: &ResolvedParameters,
    ) -> Result<DMatrix<f64>, MulensError> {
        let to = params.get("to")?;
        let te = params.get("tE")?;
        let fs = params.get(&format!("fs_{}", telescope.name))?;
        let g = params.get(&format!("g_{}", telescope.name))?;

        let index_of = |name: &str| -> Result<usize, MulensError> {
            self.dictionary
                .index_of(name)
                .ok_or_else(|| DataError::UnknownParameter(name.to_string()).into())
        };
        let idx_to = index_of("to")?;
        let idx_uo = index_of("uo")?;
        let idx_te = index_of("tE")?;
        let idx_fs = index_of(&format!("fs_{}", telescope.name))?;
        let idx_g = index_of(&format!("g_{}", telescope.name))?;

        let (tau, beta) = self.source_trajectory(telescope, params)?;
        let parallax_columns = if self.config.parallax.is_enabled() {
            Some((
                index_of("piEN")?,
                index_of("piEE")?,
                telescope.shifts_for(self.config.parallax)?,
            ))
        } else {
            None
        };
        let rho_column = match self.config.kind {
            ModelKind::Pspl => None,
            ModelKind::Fspl => Some((index_of("rho")?, params.get("rho")?)),
        };

        let n = telescope.n_data();
        let mut jacobian = DMatrix::zeros(n, self.dictionary.len());
        let time = telescope.time();
        let gamma = telescope.gamma;

        for i in 0..n {
            let u = tau[i].hypot(beta[i]);
            let a_pspl = pspl_magnification_scalar(u);
            let dadu_pspl = pspl_magnification_derivative(u);

            // Effective magnification and its derivatives for the active law.
            let (a, dadu, dadrho) = match rho_column {
                None => (a_pspl, dadu_pspl, 0.0),
                Some((_, rho)) => {
                    let z = u / rho;
                    if z > self.table.z_max() {
                        (a_pspl, dadu_pspl, 0.0)
                    } else if z < self.table.z_min() {
                        let c = 2.0 - gamma * WITT_MAO_COEFF;
                        (
                            a_pspl * z * c,
                            dadu_pspl * z * c + a_pspl * c / rho,
                            -a_pspl * u * c / (rho * rho),
                        )
                    } else {
                        let (b0, b1, db0, db1) = self.table.evaluate(z);
                        let factor = b0 - gamma * b1;
                        let dfactor = db0 - gamma * db1;
                        (
                            a_pspl * factor,
                            dadu_pspl * factor + a_pspl * dfactor / rho,
                            -a_pspl * u * dfactor / (rho * rho),
                        )
                    }
                }
            };

            // du/dθ through the trajectory components.
            let du_dto = -tau[i] / (u * te);
            let du_duo = beta[i] / u;
            let du_dte = -tau[i] * (time[i] - to) / (u * te * te);

            jacobian[(i, idx_to)] = fs * dadu * du_dto;
            jacobian[(i, idx_uo)] = fs * dadu * du_duo;
            jacobian[(i, idx_te)] = fs * dadu * du_dte;
            if let Some((idx_rho, _)) = rho_column {
                jacobian[(i, idx_rho)] = fs * dadrho;
            }
            if let Some((idx_pien, idx_piee, shifts)) = &parallax_columns {
                let du_dpien = (-tau[i] * shifts.north[i] - beta[i] * shifts.east[i]) / u;
                let du_dpiee = (-tau[i] * shifts.east[i] + beta[i] * shifts.north[i]) / u;
                jacobian[(i, *idx_pien)] = fs * dadu * du_dpien;
                jacobian[(i, *idx_piee)] = fs * dadu * du_dpiee;
            }
            jacobian[(i, idx_fs)] = a + g;
            jacobian[(i, idx_g)] = fs;
        }

        Ok(jacobian)
    }
}

#[cfg(test)]
mod models_tests {
    use super::*;
    use crate::magnification::pspl_magnification_scalar;
    use crate::telescopes::Site;
    use approx::assert_relative_eq;

    fn simple_event(n: usize) -> Event {
        let lightcurve: Vec<[f64; 3]> = (0..n)
            .map(|i| {
                let t = 2457480.0 + 40.0 * i as f64 / (n - 1) as f64;
                [t, 10.0 + i as f64 * 0.01, 0.1]
            })
            .collect();
        let mut event = Event::new("OB150001", 269.0, -28.0);
        event.add_telescope(Telescope::new("OGLE", Site::Earth, &lightcurve, 0.4).unwrap());
        event
    }

    #[test]
    fn test_trajectory_hits_uo_at_to() {
        let model = MicrolensModel::new(
            simple_event(41),
            ModelConfig::new(ModelKind::Pspl),
            B0B1Table::embedded(),
        )
        .unwrap();
        let vector = DVector::from_vec(vec![2457500.0, 0.1, 20.0, 1.0, 0.0]);
        let params = model.resolve(&vector).unwrap();
        let telescope = &model.event().telescopes[0];
        let (tau, beta) = model.source_trajectory(telescope, &params).unwrap();
        // t = to at index 20 of the uniform 40-day grid.
        assert_relative_eq!(tau[20], 0.0, epsilon = 1e-12);
        assert_eq!(beta[20], 0.1);
        let u = tau[20].hypot(beta[20]);
        assert_relative_eq!(u, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_model_flux_fitted() {
        let model = MicrolensModel::new(
            simple_event(41),
            ModelConfig::new(ModelKind::Pspl),
            B0B1Table::embedded(),
        )
        .unwrap();
        let vector = DVector::from_vec(vec![2457500.0, 0.1, 20.0, 2.0, 0.5]);
        let params = model.resolve(&vector).unwrap();
        let telescope = &model.event().telescopes[0];
        let flux = model.model_flux(telescope, &params).unwrap();
        let a_peak = pspl_magnification_scalar(0.1);
        // fs·A + fs·g at the peak.
        assert_relative_eq!(flux[20], 2.0 * a_peak + 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_estimated_fluxes_recover_linear_model() {
        let mut event = Event::new("OB150001", 269.0, -28.0);
        let to = 2457500.0;
        let lightcurve: Vec<[f64; 3]> = (0..50)
            .map(|i| {
                let t = 2457480.0 + 40.0 * i as f64 / 49.0;
                let u = ((t - to) / 20.0).hypot(0.1);
                [t, 2.5 * pspl_magnification_scalar(u) + 0.7, 0.1]
            })
            .collect();
        event.add_telescope(Telescope::new("OGLE", Site::Earth, &lightcurve, 0.0).unwrap());

        let config = ModelConfig::new(ModelKind::Pspl)
            .with_flux_parameters(FluxParameters::Estimated);
        let model = MicrolensModel::new(event, config, B0B1Table::embedded()).unwrap();
        // Estimated fluxes: the vector carries the trajectory parameters only.
        let vector = DVector::from_vec(vec![to, 0.1, 20.0]);
        let params = model.resolve(&vector).unwrap();
        let telescope = &model.event().telescopes[0];
        let (amplification, _) = model.magnification(telescope, &params).unwrap();
        let (fs, fb) = model.estimate_fluxes(telescope, &amplification).unwrap();
        assert_relative_eq!(fs, 2.5, epsilon = 1e-9);
        assert_relative_eq!(fb, 0.7, epsilon = 1e-9);

        let flux = model.model_flux(telescope, &params).unwrap();
        for i in 0..50 {
            assert_relative_eq!(flux[i], telescope.flux()[i], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_degenerate_flux_estimation_rejected() {
        let mut event = Event::new("OB150001", 269.0, -28.0);
        event.add_telescope(
            Telescope::new(
                "OGLE",
                Site::Earth,
                &[[2457500.0, 10.0, 0.1], [2457500.0, 10.1, 0.1]],
                0.0,
            )
            .unwrap(),
        );
        let config = ModelConfig::new(ModelKind::Pspl)
            .with_flux_parameters(FluxParameters::Estimated);
        let model = MicrolensModel::new(event, config, B0B1Table::embedded()).unwrap();
        let telescope = &model.event().telescopes[0];
        // Identical timestamps give identical magnifications: the normal matrix
        // is exactly singular.
        let amplification = DVector::from_element(2, 1.5);
        assert!(matches!(
            model.estimate_fluxes(telescope, &amplification).unwrap_err(),
            MulensError::Numerical(NumericalError::DegenerateFluxEstimation(_))
        ));
    }

    #[test]
    fn test_parallax_model_requires_computed_shifts() {
        use crate::parallax::ParallaxModel;
        let config = ModelConfig::new(ModelKind::Pspl)
            .with_parallax(ParallaxModel::Annual { t_ref: 2457500.0 });
        let model =
            MicrolensModel::new(simple_event(11), config, B0B1Table::embedded()).unwrap();
        let vector = DVector::from_vec(vec![2457500.0, 0.1, 20.0, 0.0, 0.0, 1.0, 0.0]);
        let params = model.resolve(&vector).unwrap();
        let telescope = &model.event().telescopes[0];
        assert!(model.model_flux(telescope, &params).is_err());
    }

    fn numeric_flux_jacobian(
        model: &MicrolensModel,
        telescope_index: usize,
        vector: &DVector<f64>,
    ) -> DMatrix<f64> {
        let telescope = &model.event().telescopes[telescope_index];
        let n = telescope.n_data();
        let p = vector.len();
        let bounds = model.dictionary().boundaries();
        let mut jacobian = DMatrix::zeros(n, p);
        for j in 0..p {
            // Step scaled to the bound range, like the fitting fallback.
            let (low, high) = bounds[j];
            let step = 1e-6 * (high - low);
            let mut forward = vector.clone();
            forward[j] += step;
            let mut backward = vector.clone();
            backward[j] -= step;
            let f_forward = model
                .model_flux(telescope, &model.resolve(&forward).unwrap())
                .unwrap();
            let f_backward = model
                .model_flux(telescope, &model.resolve(&backward).unwrap())
                .unwrap();
            for i in 0..n {
                jacobian[(i, j)] = (f_forward[i] - f_backward[i]) / (2.0 * step);
            }
        }
        jacobian
    }

    #[test]
    fn test_pspl_analytic_jacobian_matches_numeric() {
        let model = MicrolensModel::new(
            simple_event(41),
            ModelConfig::new(ModelKind::Pspl),
            B0B1Table::embedded(),
        )
        .unwrap();
        assert!(model.has_analytic_jacobian());
        let vector = DVector::from_vec(vec![2457503.0, 0.15, 22.0, 2.0, 0.3]);
        let params = model.resolve(&vector).unwrap();
        let telescope = &model.event().telescopes[0];
        let analytic = model.flux_jacobian(telescope, &params).unwrap();
        let numeric = numeric_flux_jacobian(&model, 0, &vector);
        for i in 0..analytic.nrows() {
            for j in 0..analytic.ncols() {
                assert_relative_eq!(
                    analytic[(i, j)],
                    numeric[(i, j)],
                    max_relative = 1e-4,
                    epsilon = 1e-7
                );
            }
        }
    }

    #[test]
    fn test_parallax_analytic_jacobian_matches_numeric() {
        use crate::parallax::horizons::{EphemerisProvider, EphemerisRecord};
        use crate::parallax::sun_ephemeris::LowPrecisionSun;
        use crate::parallax::ParallaxModel;

        // Ground site with annual parallax: the provider is never queried.
        struct NoProvider;
        impl EphemerisProvider for NoProvider {
            fn query(
                &self,
                _body: &str,
                _start: f64,
                _end: f64,
            ) -> Result<Vec<EphemerisRecord>, MulensError> {
                Ok(Vec::new())
            }
        }

        let config = ModelConfig::new(ModelKind::Pspl)
            .with_parallax(ParallaxModel::Annual { t_ref: 2457500.0 });
        let mut model =
            MicrolensModel::new(simple_event(41), config, B0B1Table::embedded()).unwrap();
        model.compute_parallax(&LowPrecisionSun, &NoProvider).unwrap();
        assert!(model.has_analytic_jacobian());

        let vector = DVector::from_vec(vec![2457503.0, 0.15, 22.0, 0.3, -0.2, 2.0, 0.3]);
        let params = model.resolve(&vector).unwrap();
        let telescope = &model.event().telescopes[0];
        let analytic = model.flux_jacobian(telescope, &params).unwrap();
        let numeric = numeric_flux_jacobian(&model, 0, &vector);

        let idx_pien = model.dictionary().index_of("piEN").unwrap();
        let idx_piee = model.dictionary().index_of("piEE").unwrap();
        // The parallax columns carry signal, not zeros.
        assert!(analytic.column(idx_pien).amax() > 1e-6);
        assert!(analytic.column(idx_piee).amax() > 1e-6);
        for i in 0..analytic.nrows() {
            for j in 0..analytic.ncols() {
                assert_relative_eq!(
                    analytic[(i, j)],
                    numeric[(i, j)],
                    max_relative = 1e-4,
                    epsilon = 1e-7
                );
            }
        }
    }

    #[test]
    fn test_fspl_analytic_jacobian_matches_numeric() {
        let model = MicrolensModel::new(
            simple_event(41),
            ModelConfig::new(ModelKind::Fspl),
            B0B1Table::embedded(),
        )
        .unwrap();
        // uo/rho keeps the whole curve inside the table branch, where the
        // derivative carries both product-rule terms.
        let vector = DVector::from_vec(vec![2457500.0, 0.02, 20.0, 0.03, 2.0, 0.3]);
        let params = model.resolve(&vector).unwrap();
        let telescope = &model.event().telescopes[0];
        let analytic = model.flux_jacobian(telescope, &params).unwrap();
        let numeric = numeric_flux_jacobian(&model, 0, &vector);
        for i in 0..analytic.nrows() {
            for j in 0..analytic.ncols() {
                assert_relative_eq!(
                    analytic[(i, j)],
                    numeric[(i, j)],
                    max_relative = 5e-3,
                    epsilon = 1e-6
                );
            }
        }
    }
}
