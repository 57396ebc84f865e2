//! # Microlensing event
//!
//! An [`Event`] ties the target sky position to the ordered collection of telescopes
//! that observed it. The telescope list order is load-bearing: it fixes the layout of
//! the per-telescope flux parameters in the parameter dictionary and the concatenation
//! order of the residual vector.

use crate::constants::{Degree, JD};
use crate::telescopes::Telescope;

/// A microlensing event: target coordinates plus its telescopes.
#[derive(Debug, Clone)]
pub struct Event {
    /// Event designation, used in logs and error context.
    pub name: String,
    /// Right ascension of the target, degrees.
    pub ra: Degree,
    /// Declination of the target, degrees.
    pub dec: Degree,
    /// Ordered telescope collection.
    pub telescopes: Vec<Telescope>,
}

impl Event {
    pub fn new(name: &str, ra: Degree, dec: Degree) -> Self {
        Event {
            name: name.to_string(),
            ra,
            dec,
            telescopes: Vec::new(),
        }
    }

    /// Append a telescope; list order is preserved for the whole fit.
    pub fn add_telescope(&mut self, telescope: Telescope) {
        self.telescopes.push(telescope);
    }

    /// Earliest and latest observation time across all telescopes, if any data exist.
    pub fn time_span(&self) -> Option<(JD, JD)> {
        let mut span: Option<(JD, JD)> = None;
        for telescope in &self.telescopes {
            let time = telescope.time();
            let (first, last) = (time[0], time[time.len() - 1]);
            span = Some(match span {
                None => (first, last),
                Some((lo, hi)) => (lo.min(first), hi.max(last)),
            });
        }
        span
    }

    /// Total number of photometric points across telescopes.
    pub fn n_data(&self) -> usize {
        self.telescopes.iter().map(|t| t.n_data()).sum()
    }

    /// Lookup a telescope by name.
    pub fn telescope(&self, name: &str) -> Option<&Telescope> {
        self.telescopes.iter().find(|t| t.name == name)
    }
}
