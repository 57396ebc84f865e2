//! # Global search (differential evolution)
//!
//! `rand/1/bin` differential evolution inside the dictionary bounds, with a
//! dithered mutation factor. The objective is the `-2 ln L` likelihood; a
//! parameter vector that fails numerically or evaluates non-finite is softened
//! to a very poor finite objective so that the population simply moves away
//! from it. Configuration and data errors are never softened: a model that
//! cannot be evaluated at all (stale parallax cache, wrong vector length)
//! aborts the search.

use std::time::Instant;

use nalgebra::DVector;
use rand::Rng;

use crate::models::MicrolensModel;
use crate::mulens_errors::MulensError;

use super::{likelihood, FitResult};

/// Objective assigned to vectors the model rejects or that evaluate non-finite.
const POOR_OBJECTIVE: f64 = 1e30;

/// Binomial crossover rate.
const CROSSOVER_RATE: f64 = 0.5;

/// Dithering range of the mutation factor.
const MUTATION_RANGE: (f64, f64) = (0.5, 1.5);

/// Differential-evolution driver for one model.
pub struct DeFit<'a> {
    model: &'a MicrolensModel,
    /// Number of generations.
    pub max_iterations: usize,
    /// Population size as a multiple of the dictionary length.
    pub population_factor: usize,
}

impl<'a> DeFit<'a> {
    pub fn new(model: &'a MicrolensModel) -> Self {
        DeFit {
            model,
            max_iterations: 200,
            population_factor: 10,
        }
    }

    /// Run the search and return the best member with the final population.
    pub fn fit<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<FitResult, MulensError> {
        let start = Instant::now();
        let bounds = self.model.dictionary().boundaries().to_vec();
        let dimension = bounds.len();
        let population_size = (self.population_factor * dimension).max(4);

        let mut population: Vec<DVector<f64>> = (0..population_size)
            .map(|_| {
                DVector::from_iterator(
                    dimension,
                    bounds.iter().map(|&(low, high)| rng.random_range(low..high)),
                )
            })
            .collect();
        let mut objectives = Vec::with_capacity(population_size);
        for member in &population {
            objectives.push(softened_objective(self.model, member)?);
        }

        for _ in 0..self.max_iterations {
            for i in 0..population_size {
                let (r1, r2, r3) = distinct_indices(rng, population_size, i);
                let factor = rng.random_range(MUTATION_RANGE.0..MUTATION_RANGE.1);

                let mut trial = population[i].clone();
                let forced = rng.random_range(0..dimension);
                for j in 0..dimension {
                    if j == forced || rng.random::<f64>() < CROSSOVER_RATE {
                        let mutant = population[r1][j]
                            + factor * (population[r2][j] - population[r3][j]);
                        trial[j] = mutant.clamp(bounds[j].0, bounds[j].1);
                    }
                }

                let trial_objective = softened_objective(self.model, &trial)?;
                if trial_objective <= objectives[i] {
                    population[i] = trial;
                    objectives[i] = trial_objective;
                }
            }
        }

        // Non-empty population: the minimum exists.
        let best = objectives
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(index, _)| index)
            .unwrap_or(0);

        Ok(FitResult {
            parameters: population[best].clone(),
            objective: objectives[best],
            covariance: None,
            population: Some(population.into_iter().zip(objectives).collect()),
            duration: start.elapsed(),
        })
    }
}

/// Likelihood softened to a poor finite value on numerical failure only;
/// configuration and data errors propagate.
fn softened_objective(
    model: &MicrolensModel,
    vector: &DVector<f64>,
) -> Result<f64, MulensError> {
    match likelihood(model, vector) {
        Ok(value) if value.is_finite() => Ok(value),
        Ok(_) | Err(MulensError::Numerical(_)) => Ok(POOR_OBJECTIVE),
        Err(other) => Err(other),
    }
}

/// Three distinct population indices, all different from `current`.
fn distinct_indices<R: Rng + ?Sized>(
    rng: &mut R,
    population_size: usize,
    current: usize,
) -> (usize, usize, usize) {
    let mut pick = |taken: &[usize]| loop {
        let candidate = rng.random_range(0..population_size);
        if candidate != current && !taken.contains(&candidate) {
            return candidate;
        }
    };
    let r1 = pick(&[]);
    let r2 = pick(&[r1]);
    let r3 = pick(&[r1, r2]);
    (r1, r2, r3)
}
