//! # Model configuration and parameter dictionary
//!
//! The parameter dictionary maps parameter names to positions in the flat
//! optimization vector. Its layout is deterministic for a given
//! `(model configuration, event)` pair:
//!
//! 1. `to`, `uo`, `tE` — always;
//! 2. `rho` — finite-source models;
//! 3. `piEN`, `piEE` — when parallax is enabled;
//! 4. `xiEN`, `xiEE` — when xallarap is enabled;
//! 5. `dsdt`, `dalphadt` — when lens orbital motion is enabled;
//! 6. `spot` — when source spots are enabled;
//! 7. `fs_<name>`, `g_<name>` — per telescope, in event order, always contiguous
//!    and last; only when the fluxes are fitted. Estimated fluxes are solved at
//!    every evaluation and stay out of the vector.
//!
//! Every entry carries the fitting bounds used by the global search and by guess
//! clamping.

use std::collections::{HashMap, HashSet};

use nalgebra::DVector;

use crate::constants::JD;
use crate::event::Event;
use crate::mulens_errors::{ConfigurationError, DataError, MulensError};
use crate::parallax::ParallaxModel;

/// Margin in days added around the observing window for the `to` bounds.
const TO_MARGIN: f64 = 300.0;

const UO_BOUNDS: (f64, f64) = (1e-6, 2.0);
const TE_BOUNDS: (f64, f64) = (0.1, 300.0);
const RHO_BOUNDS: (f64, f64) = (1e-5, 0.1);
const PIE_BOUNDS: (f64, f64) = (-2.0, 2.0);
const XIE_BOUNDS: (f64, f64) = (-2.0, 2.0);
const MOTION_BOUNDS: (f64, f64) = (-1.0, 1.0);
const SPOT_BOUNDS: (f64, f64) = (0.0, 1.0);
const BLEND_BOUNDS: (f64, f64) = (0.0, 10.0);

/// Magnification law of the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Point-source point-lens.
    Pspl,
    /// Finite-source point-lens with linear limb darkening.
    Fspl,
}

impl ModelKind {
    /// Parse a model name such as `"PSPL"`.
    pub fn from_name(name: &str) -> Result<Self, MulensError> {
        match name {
            "PSPL" => Ok(ModelKind::Pspl),
            "FSPL" => Ok(ModelKind::Fspl),
            other => Err(ConfigurationError::UnknownModel(other.to_string()).into()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Pspl => "PSPL",
            ModelKind::Fspl => "FSPL",
        }
    }

    /// Whether the law needs `rho` and the B0/B1 table.
    pub fn is_finite_source(&self) -> bool {
        matches!(self, ModelKind::Fspl)
    }
}

/// Xallarap (source orbital motion) switch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum XallarapModel {
    None,
    /// Circular source orbit anchored at `t_ref`; adds `xiEN`, `xiEE`.
    Circular { t_ref: JD },
}

/// Lens orbital motion switch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrbitalMotionModel {
    None,
    /// First-order lens motion anchored at `t_ref`; adds `dsdt`, `dalphadt`.
    Linear { t_ref: JD },
}

/// How the per-telescope flux parameters enter the fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FluxParameters {
    /// `fs_<name>` and `g_<name>` are free parameters of the optimization vector.
    Fitted,
    /// Fluxes are solved by weighted linear least squares at every model
    /// evaluation; no flux entry appears in the dictionary.
    Estimated,
}

/// Full configuration of a microlensing model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub kind: ModelKind,
    pub parallax: ParallaxModel,
    pub xallarap: XallarapModel,
    pub orbital_motion: OrbitalMotionModel,
    pub source_spots: bool,
    pub flux_parameters: FluxParameters,
}

impl ModelConfig {
    /// Plain configuration: no second-order effect, fluxes fitted.
    pub fn new(kind: ModelKind) -> Self {
        ModelConfig {
            kind,
            parallax: ParallaxModel::None,
            xallarap: XallarapModel::None,
            orbital_motion: OrbitalMotionModel::None,
            source_spots: false,
            flux_parameters: FluxParameters::Fitted,
        }
    }

    pub fn with_parallax(mut self, parallax: ParallaxModel) -> Self {
        self.parallax = parallax;
        self
    }

    pub fn with_xallarap(mut self, xallarap: XallarapModel) -> Self {
        self.xallarap = xallarap;
        self
    }

    pub fn with_orbital_motion(mut self, orbital_motion: OrbitalMotionModel) -> Self {
        self.orbital_motion = orbital_motion;
        self
    }

    pub fn with_source_spots(mut self, source_spots: bool) -> Self {
        self.source_spots = source_spots;
        self
    }

    pub fn with_flux_parameters(mut self, flux_parameters: FluxParameters) -> Self {
        self.flux_parameters = flux_parameters;
        self
    }

    /// Whether a second-order effect beyond parallax is active. These effects
    /// rule out the analytic flux Jacobian.
    pub fn has_second_order_effects(&self) -> bool {
        !matches!(self.xallarap, XallarapModel::None)
            || !matches!(self.orbital_motion, OrbitalMotionModel::None)
            || self.source_spots
    }
}

/// Name → position mapping of the flat optimization vector, with bounds.
#[derive(Debug, Clone)]
pub struct ParameterDictionary {
    names: Vec<String>,
    index: HashMap<String, usize>,
    boundaries: Vec<(f64, f64)>,
}

impl ParameterDictionary {
    /// Build the dictionary for a `(configuration, event)` pair.
    ///
    /// Arguments
    /// -----------------
    /// * `config`: Model configuration selecting the optional blocks.
    /// * `event`: Event providing the telescope list and the observing window.
    ///
    /// Return
    /// ----------
    /// * The dictionary, or a [`ConfigurationError`] when the event has no
    ///   telescope or two telescopes share a name.
    pub fn build(config: &ModelConfig, event: &Event) -> Result<Self, MulensError> {
        let Some((t_first, t_last)) = event.time_span() else {
            return Err(ConfigurationError::NoTelescope.into());
        };

        let mut seen = HashSet::new();
        for telescope in &event.telescopes {
            if !seen.insert(telescope.name.as_str()) {
                return Err(
                    ConfigurationError::DuplicateTelescopeName(telescope.name.clone()).into(),
                );
            }
        }

        let mut dictionary = ParameterDictionary {
            names: Vec::new(),
            index: HashMap::new(),
            boundaries: Vec::new(),
        };

        dictionary.push("to", (t_first - TO_MARGIN, t_last + TO_MARGIN));
        dictionary.push("uo", UO_BOUNDS);
        dictionary.push("tE", TE_BOUNDS);
        if config.kind.is_finite_source() {
            dictionary.push("rho", RHO_BOUNDS);
        }
        if config.parallax.is_enabled() {
            dictionary.push("piEN", PIE_BOUNDS);
            dictionary.push("piEE", PIE_BOUNDS);
        }
        if !matches!(config.xallarap, XallarapModel::None) {
            dictionary.push("xiEN", XIE_BOUNDS);
            dictionary.push("xiEE", XIE_BOUNDS);
        }
        if !matches!(config.orbital_motion, OrbitalMotionModel::None) {
            dictionary.push("dsdt", MOTION_BOUNDS);
            dictionary.push("dalphadt", MOTION_BOUNDS);
        }
        if config.source_spots {
            dictionary.push("spot", SPOT_BOUNDS);
        }
        if config.flux_parameters == FluxParameters::Fitted {
            for telescope in &event.telescopes {
                let max_flux = telescope.flux().max();
                dictionary.push(&format!("fs_{}", telescope.name), (0.0, 100.0 * max_flux));
                dictionary.push(&format!("g_{}", telescope.name), BLEND_BOUNDS);
            }
        }

        Ok(dictionary)
    }

    fn push(&mut self, name: &str, bounds: (f64, f64)) {
        // Telescope names are checked for duplicates in `build`, so the key is new.
        let previous = self.index.insert(name.to_string(), self.names.len());
        debug_assert!(previous.is_none(), "duplicate parameter '{name}'");
        self.names.push(name.to_string());
        self.boundaries.push(bounds);
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Parameter names in vector order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Position of `name` in the vector, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Fitting bounds, aligned with [`ParameterDictionary::names`].
    pub fn boundaries(&self) -> &[(f64, f64)] {
        &self.boundaries
    }

    /// Check the optimization vector has exactly one entry per parameter.
    pub fn check_length(&self, vector: &DVector<f64>) -> Result<(), MulensError> {
        if vector.len() != self.len() {
            return Err(DataError::ParameterVectorLength {
                got: vector.len(),
                expected: self.len(),
            }
            .into());
        }
        Ok(())
    }

    /// Bind an optimization vector to this dictionary for named access.
    pub fn resolve<'a>(
        &'a self,
        vector: &'a DVector<f64>,
    ) -> Result<ResolvedParameters<'a>, MulensError> {
        self.check_length(vector)?;
        Ok(ResolvedParameters {
            dictionary: self,
            values: vector,
        })
    }

    /// Clamp a vector into the fitting bounds, in place.
    pub fn clamp(&self, vector: &mut DVector<f64>) {
        for (value, &(low, high)) in vector.iter_mut().zip(&self.boundaries) {
            *value = value.clamp(low, high);
        }
    }
}

/// Named view over an optimization vector, validated against its dictionary.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedParameters<'a> {
    dictionary: &'a ParameterDictionary,
    values: &'a DVector<f64>,
}

impl ResolvedParameters<'_> {
    /// Value of `name`, or [`DataError::UnknownParameter`].
    pub fn get(&self, name: &str) -> Result<f64, MulensError> {
        self.dictionary
            .index_of(name)
            .map(|index| self.values[index])
            .ok_or_else(|| DataError::UnknownParameter(name.to_string()).into())
    }

    /// Value of `name` when the parameter block is active.
    pub fn get_opt(&self, name: &str) -> Option<f64> {
        self.dictionary.index_of(name).map(|index| self.values[index])
    }
}
