//! Serializable filter checkpoints for suspend/resume.

use serde::{Deserialize, Serialize};

use super::estimate::EstimateHistory;
use super::particle_filter::{FilterConfig, FilterStatus, ParticleFilter};
use super::particles::{ParticleCloud, ParticleSet};
use super::traits::StateSpaceModel;
use crate::diagnostics::Diagnostics;
use crate::resampling::validate_weights;
use crate::{Error, Result};

/// Snapshot of everything needed to resume a filter: configuration,
/// particles and weights, step counter, last observation time, history and
/// diagnostics.
///
/// The random stream is not captured. A seeded filter resumes on a stream
/// derived from its seed and step counter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterCheckpoint {
    pub config: FilterConfig,
    pub status: FilterStatus,
    pub particles: ParticleCloud,
    pub step: usize,
    pub last_time: Option<f64>,
    pub history: EstimateHistory,
    pub diagnostics: Diagnostics,
}

impl FilterCheckpoint {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl<M: StateSpaceModel> ParticleFilter<M> {
    /// Capture the filter state.
    pub fn checkpoint(&self) -> Result<FilterCheckpoint> {
        let particles = match (self.status(), self.particle_set()) {
            (FilterStatus::Uninitialized, _) | (_, None) => {
                return Err(Error::State(
                    "cannot checkpoint an uninitialized filter".to_string(),
                ))
            }
            (FilterStatus::Failed, _) => {
                return Err(Error::State(
                    "cannot checkpoint a filter after a numerical failure".to_string(),
                ))
            }
            (_, Some(particles)) => particles.cloud(),
        };

        Ok(FilterCheckpoint {
            config: self.config().clone(),
            status: self.status(),
            particles,
            step: self.step_count(),
            last_time: self.last_time(),
            history: self.history().clone(),
            diagnostics: self.diagnostics().clone(),
        })
    }

    /// Rebuild a filter from a checkpoint, re-validating its invariants.
    pub fn restore(model: M, checkpoint: FilterCheckpoint) -> Result<Self> {
        let FilterCheckpoint {
            config,
            status,
            particles,
            step,
            last_time,
            history,
            diagnostics,
        } = checkpoint;

        if matches!(status, FilterStatus::Uninitialized | FilterStatus::Failed) {
            return Err(Error::Validation(format!(
                "checkpoint status {:?} cannot be resumed",
                status
            )));
        }
        if particles.len() != config.n_particles {
            return Err(Error::Validation(format!(
                "checkpoint holds {} particles, config expects {}",
                particles.len(),
                config.n_particles
            )));
        }
        if particles.state_dim() != model.state_dim() {
            return Err(Error::Validation(format!(
                "checkpoint state dimension {} doesn't match model dimension {}",
                particles.state_dim(),
                model.state_dim()
            )));
        }
        if particles.states.iter().any(|v| !v.is_finite()) {
            return Err(Error::Validation(
                "checkpoint contains non-finite particle states".to_string(),
            ));
        }
        validate_weights(particles.weights.as_slice(), particles.len())?;
        validate_records(&history, &diagnostics, &config, model.state_dim(), step, last_time)?;

        let set = ParticleSet::with_weights(particles.states.transpose(), particles.weights);
        ParticleFilter::from_parts(model, config, set, status, history, diagnostics, step, last_time)
    }
}

/// Cross-check the history and diagnostics against the rest of a checkpoint.
///
/// Every `update` records one ESS value, while only `step` appends an
/// estimate, so the history may be shorter than the step counter but the
/// ESS record may not.
fn validate_records(
    history: &EstimateHistory,
    diagnostics: &Diagnostics,
    config: &FilterConfig,
    dim: usize,
    step: usize,
    last_time: Option<f64>,
) -> Result<()> {
    if diagnostics.n_particles() != config.n_particles {
        return Err(Error::Validation(format!(
            "checkpoint diagnostics describe {} particles, config expects {}",
            diagnostics.n_particles(),
            config.n_particles
        )));
    }
    if diagnostics.ess_history().len() != step {
        return Err(Error::Validation(format!(
            "checkpoint records {} ESS values for {} steps",
            diagnostics.ess_history().len(),
            step
        )));
    }
    if diagnostics
        .resample_steps()
        .windows(2)
        .any(|w| w[0] >= w[1])
        || diagnostics.resample_steps().iter().any(|&s| s == 0 || s > step)
    {
        return Err(Error::Validation(
            "checkpoint resample steps are not increasing steps within the run".to_string(),
        ));
    }
    if history.len() > step {
        return Err(Error::Validation(format!(
            "checkpoint history has {} entries for {} steps",
            history.len(),
            step
        )));
    }
    if let Some(t) = last_time {
        if !t.is_finite() {
            return Err(Error::Validation(
                "checkpoint last observation time is not finite".to_string(),
            ));
        }
    }

    for (i, entry) in history.iter().enumerate() {
        let consistent = entry.mean.len() == dim
            && entry.variance.len() == dim
            && entry.credible_intervals.len() == dim
            && entry
                .particles
                .as_ref()
                .map_or(true, |cloud| cloud.state_dim() == dim && cloud.len() == config.n_particles);
        if !consistent {
            return Err(Error::Validation(format!(
                "checkpoint history entry {} doesn't match state dimension {}",
                i, dim
            )));
        }
        if entry.step == 0 || entry.step > step {
            return Err(Error::Validation(format!(
                "checkpoint history entry {} has step {} outside 1..={}",
                i, entry.step, step
            )));
        }
    }
    Ok(())
}
