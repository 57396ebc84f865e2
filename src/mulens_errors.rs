//! # Error taxonomy for mulens
//!
//! Every fallible operation in the crate surfaces a [`MulensError`]. The taxonomy
//! follows the failure domains of the library:
//!
//! - [`ConfigurationError`] — model construction problems (unknown model, duplicate
//!   telescope names, stale or missing parallax state). Raised at construction time,
//!   never deferred into the optimization loop.
//! - [`DataError`] — malformed observational input (empty light curves, non-finite
//!   fluxes) or an unusable interpolation table. Raised at construction time.
//! - [`ExternalServiceError`] — the ephemeris provider is unreachable, timed out, or
//!   returned a malformed payload. Aborts the affected telescope's parallax
//!   computation; never masked as a zero offset.
//! - [`NumericalError`] — out-of-domain interpolation or a singular covariance.
//!   Propagates during local refinement; softened to a poor finite objective value
//!   only inside the global-search loop.
//! - [`GuessEstimationError`] — the initial-guess heuristic could not produce a usable
//!   starting point. Propagated to the caller, the fit is aborted and not retried.

use thiserror::Error;

/// Model construction and configuration failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Unknown model type: {0}")]
    UnknownModel(String),

    #[error("Duplicate telescope name '{0}' collides in the parameter dictionary")]
    DuplicateTelescopeName(String),

    #[error("Telescope '{0}' has site kind '{1}' but parallax mode requires site coordinates")]
    MissingSiteCoordinates(String, String),

    #[error(
        "Parallax shifts for telescope '{0}' are not computed for the requested \
         mode/reference epoch; run the parallax engine before evaluating the model"
    )]
    ParallaxNotComputed(String),

    #[error("Event must own at least one telescope")]
    NoTelescope,

    #[error("Site coordinate is NaN: {0}")]
    NanSiteCoordinate(#[from] ordered_float::FloatIsNan),
}

/// Observational input and table-loading failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("Telescope '{0}' has an empty light curve")]
    EmptyLightCurve(String),

    #[error("Telescope '{0}' has a non-finite value at index {1}")]
    NonFiniteValue(String, usize),

    #[error("Telescope '{0}' has a non-positive flux error at index {1}")]
    NonPositiveFluxError(String, usize),

    #[error("Unable to read the B0/B1 interpolation table: {0}")]
    TableUnreadable(String),

    #[error("Malformed B0/B1 table at line {line}: {reason}")]
    TableMalformed { line: usize, reason: String },

    #[error("Parameter vector has length {got}, parameter dictionary expects {expected}")]
    ParameterVectorLength { got: usize, expected: usize },

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),
}

/// Ephemeris provider failures.
#[derive(Error, Debug)]
pub enum ExternalServiceError {
    #[error("Ephemeris request for body '{body}' failed: {source}")]
    RequestFailed {
        body: String,
        #[source]
        source: Box<ureq::Error>,
    },

    #[error("Ephemeris payload for body '{body}' is malformed: {reason}")]
    MalformedPayload { body: String, reason: String },

    #[error(
        "Ephemeris provider returned {got} record(s) for body '{body}' over \
         JD [{start}, {end}], at least 2 are required"
    )]
    NotEnoughRecords {
        body: String,
        start: f64,
        end: f64,
        got: usize,
    },

    #[error("Ephemeris time series for body '{body}' is not strictly increasing at index {index}")]
    UnsortedRecords { body: String, index: usize },
}

/// Numerical failures during model evaluation or covariance estimation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NumericalError {
    #[error("Interpolation argument {value} outside the tabulated domain [{min}, {max}]")]
    OutsideTabulatedDomain { value: f64, min: f64, max: f64 },

    #[error("Covariance matrix is singular (pseudo-inverse failed): {0}")]
    SingularCovariance(String),

    #[error("Least-squares flux estimation is degenerate for telescope '{0}'")]
    DegenerateFluxEstimation(String),
}

/// Failure of the initial-guess heuristic.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GuessEstimationError {
    #[error("No magnification detected in telescope '{0}': peak flux does not exceed baseline")]
    NoPeakDetected(String),

    #[error("Telescope '{0}' has too few points ({1}) to estimate a starting point")]
    TooFewPoints(String, usize),
}

/// Top-level error type of the crate.
#[derive(Error, Debug)]
pub enum MulensError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    ExternalService(#[from] ExternalServiceError),

    #[error(transparent)]
    Numerical(#[from] NumericalError),

    #[error(transparent)]
    GuessEstimation(#[from] GuessEstimationError),
}
