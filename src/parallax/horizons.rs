//! # Spacecraft ephemerides from the JPL Horizons API
//!
//! Space-based telescopes need their geocentric position over the observing window.
//! The dependency is expressed as the [`EphemerisProvider`] trait so that tests can
//! run against canned records; [`HorizonsClient`] is the production implementation,
//! querying `https://ssd.jpl.nasa.gov/api/horizons_file.api` in OBSERVER mode with
//! astrometric RA/DEC and range (`QUANTITIES='1,20'`) at a 1-day step.
//!
//! ## Invariants
//!
//! - A provider returns at least two records with strictly increasing Julian dates;
//!   anything else is an [`ExternalServiceError`] and the parallax computation of
//!   the affected telescope aborts. A failed query is never masked as a zero offset.

use std::time::Duration;

use itertools::Itertools;
use regex::Regex;
use ureq::Agent;

use crate::constants::JD;
use crate::mulens_errors::{ExternalServiceError, MulensError};

const HORIZONS_URL: &str = "https://ssd.jpl.nasa.gov/api/horizons_file.api";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One row of a geocentric ephemeris time series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EphemerisRecord {
    /// Julian Date of the record.
    pub jd: JD,
    /// Astrometric right ascension, degrees.
    pub ra: f64,
    /// Astrometric declination, degrees.
    pub dec: f64,
    /// Geocentric distance, astronomical units.
    pub distance: f64,
}

/// Source of geocentric spacecraft ephemerides.
pub trait EphemerisProvider {
    /// Time series for `body` covering the Julian-date window `[start, end]`.
    ///
    /// Implementations must return at least two records, sorted by strictly
    /// increasing `jd`, spanning the requested window.
    fn query(&self, body: &str, start: JD, end: JD) -> Result<Vec<EphemerisRecord>, MulensError>;
}

/// Horizons body identifier of a satellite name, defaulting to `V37` for
/// unknown names so that the API reports the failure instead of this crate
/// guessing.
pub fn horizons_body_id(name: &str) -> &'static str {
    match name.to_ascii_lowercase().as_str() {
        "geocentric" => "500",
        "kepler" => "-227",
        "spitzer" => "-79",
        "hst" => "-48",
        "gaia" => "-139479",
        "new horizons" => "-98",
        "l2" => "32",
        "tess" => "-95",
        _ => "V37",
    }
}

/// Blocking JPL Horizons client.
pub struct HorizonsClient {
    agent: Agent,
}

impl Default for HorizonsClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HorizonsClient {
    pub fn new() -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build()
            .into();
        HorizonsClient { agent }
    }

    /// Raw API response for `body` over `[start, end]`.
    fn request(&self, body: &str, start: JD, end: JD) -> Result<String, MulensError> {
        let input = format!(
            "
!$$SOF
COMMAND='{}'
OBJ_DATA='NO'
MAKE_EPHEM='YES'
EPHEM_TYPE='OBSERVER'
CENTER='500'
START_TIME='JD {start}'
STOP_TIME='JD {end}'
STEP_SIZE='1440m'
QUANTITIES='1,20'
ANG_FORMAT='DEG'
CAL_FORMAT='JD'
CSV_FORMAT='YES'
",
            horizons_body_id(body)
        );

        let mut response = self
            .agent
            .post(HORIZONS_URL)
            .send_form([("format", "text"), ("input", input.as_str())])
            .map_err(|e| ExternalServiceError::RequestFailed {
                body: body.to_string(),
                source: Box::new(e),
            })?;
        response
            .body_mut()
            .read_to_string()
            .map_err(|e| {
                ExternalServiceError::RequestFailed {
                    body: body.to_string(),
                    source: Box::new(e),
                }
                .into()
            })
    }
}

impl EphemerisProvider for HorizonsClient {
    fn query(&self, body: &str, start: JD, end: JD) -> Result<Vec<EphemerisRecord>, MulensError> {
        let response = self.request(body, start, end)?;
        let records = deserialize_observer_table(body, &response)?;
        validate_records(body, start, end, &records)?;
        Ok(records)
    }
}

/// Parse the `$$SOE`/`$$EOE` block of a Horizons OBSERVER response.
///
/// With `QUANTITIES='1,20'` and CSV formatting the data columns are
/// `JD, <flags>, RA, DEC, delta, deldot`; the solar/lunar presence flag columns
/// are blank or non-numeric, so fields are filtered by numeric parse and taken
/// positionally: the first four numeric fields of a row are
/// `(jd, ra, dec, distance)`.
fn deserialize_observer_table(
    body: &str,
    response: &str,
) -> Result<Vec<EphemerisRecord>, MulensError> {
    // Infallible: the pattern is a literal.
    let block_regex = Regex::new(r"(?s)\$\$SOE\s*\n(.*?)\$\$EOE").unwrap();
    let block = block_regex
        .captures(response)
        .and_then(|captures| captures.get(1))
        .ok_or_else(|| ExternalServiceError::MalformedPayload {
            body: body.to_string(),
            reason: "no $$SOE/$$EOE data block in the response".to_string(),
        })?
        .as_str();

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(block.as_bytes());

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| ExternalServiceError::MalformedPayload {
            body: body.to_string(),
            reason: format!("unreadable CSV row: {e}"),
        })?;
        if row.iter().all(str::is_empty) {
            continue;
        }

        let numeric: Vec<f64> = row
            .iter()
            .filter_map(|field| field.parse::<f64>().ok())
            .collect();
        let [jd, ra, dec, distance, ..] = numeric[..] else {
            return Err(ExternalServiceError::MalformedPayload {
                body: body.to_string(),
                reason: format!("expected at least 4 numeric columns in row '{}'", row.as_slice()),
            }
            .into());
        };

        records.push(EphemerisRecord { jd, ra, dec, distance });
    }

    Ok(records)
}

/// Enforce the provider contract: at least two records, strictly increasing in time.
pub(crate) fn validate_records(
    body: &str,
    start: JD,
    end: JD,
    records: &[EphemerisRecord],
) -> Result<(), MulensError> {
    if records.len() < 2 {
        return Err(ExternalServiceError::NotEnoughRecords {
            body: body.to_string(),
            start,
            end,
            got: records.len(),
        }
        .into());
    }
    for (index, (previous, next)) in records.iter().tuple_windows().enumerate() {
        if next.jd <= previous.jd {
            return Err(ExternalServiceError::UnsortedRecords {
                body: body.to_string(),
                index: index + 1,
            }
            .into());
        }
    }
    Ok(())
}
