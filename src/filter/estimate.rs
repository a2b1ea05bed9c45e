//! Per-step posterior summaries and the append-only estimate history.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use super::particles::ParticleCloud;

/// Frozen posterior summary at one time step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateEstimate {
    /// Number of observations processed when the summary was taken.
    pub step: usize,
    /// Time of the last processed observation, if any.
    pub time: Option<f64>,
    /// Weighted posterior mean (length D).
    pub mean: DVector<f64>,
    /// Weighted posterior variance per dimension (length D).
    pub variance: DVector<f64>,
    /// Equal-tailed credible interval per dimension.
    pub credible_intervals: Vec<(f64, f64)>,
    /// Credible level the intervals were computed at.
    pub credible_level: f64,
    /// ESS after reweighting at this step (before any resampling).
    pub ess: f64,
    /// Whether resampling fired at this step.
    pub resampled: bool,
    /// Full particle cloud, kept only when the filter retains particles.
    pub particles: Option<ParticleCloud>,
}

impl StateEstimate {
    /// Posterior standard deviation of dimension `d`.
    pub fn std_dev(&self, d: usize) -> f64 {
        self.variance[d].max(0.0).sqrt()
    }
}

/// Append-only sequence of [`StateEstimate`] records.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EstimateHistory {
    entries: Vec<StateEstimate>,
}

impl EstimateHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, estimate: StateEstimate) {
        self.entries.push(estimate);
    }

    pub fn entries(&self) -> &[StateEstimate] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&StateEstimate> {
        self.entries.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StateEstimate> {
        self.entries.iter()
    }

    /// Posterior mean of dimension `d` at every step.
    pub fn mean_trajectory(&self, d: usize) -> Vec<f64> {
        self.entries.iter().map(|e| e.mean[d]).collect()
    }

    /// ESS at every step.
    pub fn ess_trajectory(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.ess).collect()
    }
}

impl<'a> IntoIterator for &'a EstimateHistory {
    type Item = &'a StateEstimate;
    type IntoIter = std::slice::Iter<'a, StateEstimate>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
