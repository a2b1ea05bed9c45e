//! Effective sample size and degeneracy tracking.

use serde::{Deserialize, Serialize};

/// Effective sample size of a normalized weight vector: `1 / Σ w_i²`.
///
/// For normalized weights the result lies in [1, N]; it equals N for
/// uniform weights and approaches 1 as the mass concentrates on a single
/// particle. Returns 0.0 for an empty or all-zero vector.
pub fn effective_sample_size(weights: &[f64]) -> f64 {
    let sum_sq: f64 = weights.iter().map(|w| w * w).sum();
    if sum_sq > 0.0 {
        1.0 / sum_sq
    } else {
        0.0
    }
}

/// Per-filter diagnostic log.
///
/// Holds one ESS value per processed observation (computed after
/// reweighting, before any resampling) and a record of every resampling
/// event. Append-only.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    ess_history: Vec<f64>,
    resample_steps: Vec<usize>,
    n_particles: usize,
}

impl Diagnostics {
    pub fn new(n_particles: usize) -> Self {
        Self {
            ess_history: Vec::new(),
            resample_steps: Vec::new(),
            n_particles,
        }
    }

    pub(crate) fn record_ess(&mut self, ess: f64) {
        self.ess_history.push(ess);
    }

    pub(crate) fn record_resample(&mut self, step: usize) {
        self.resample_steps.push(step);
    }

    /// ESS per processed observation, in order.
    pub fn ess_history(&self) -> &[f64] {
        &self.ess_history
    }

    /// Number of resampling events so far.
    pub fn resample_count(&self) -> usize {
        self.resample_steps.len()
    }

    /// Steps (1-based observation counter) at which resampling fired.
    pub fn resample_steps(&self) -> &[usize] {
        &self.resample_steps
    }

    pub fn n_particles(&self) -> usize {
        self.n_particles
    }

    /// Smallest ESS seen so far.
    pub fn min_ess(&self) -> Option<f64> {
        self.ess_history.iter().copied().reduce(f64::min)
    }

    /// Most recent ESS.
    pub fn last_ess(&self) -> Option<f64> {
        self.ess_history.last().copied()
    }

    /// First step (1-based) whose ESS fell below `fraction * N`.
    pub fn first_step_below(&self, fraction: f64) -> Option<usize> {
        let threshold = fraction * self.n_particles as f64;
        self.ess_history
            .iter()
            .position(|&ess| ess < threshold)
            .map(|i| i + 1)
    }

    /// Fraction of steps whose ESS fell below `fraction * N`.
    pub fn fraction_below(&self, fraction: f64) -> f64 {
        if self.ess_history.is_empty() {
            return 0.0;
        }
        let threshold = fraction * self.n_particles as f64;
        let below = self.ess_history.iter().filter(|&&ess| ess < threshold).count();
        below as f64 / self.ess_history.len() as f64
    }

    /// Whether the latest ESS is below `fraction * N`.
    pub fn is_degenerate(&self, fraction: f64) -> bool {
        self.last_ess()
            .map(|ess| ess < fraction * self.n_particles as f64)
            .unwrap_or(false)
    }
}
