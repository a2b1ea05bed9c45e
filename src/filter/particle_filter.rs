//! Generic sequential importance resampling (SIR) particle filter.

use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::estimate::{EstimateHistory, StateEstimate};
use super::particles::{InitialDistribution, ParticleCloud, ParticleSet};
use super::traits::StateSpaceModel;
use crate::diagnostics::Diagnostics;
use crate::resampling::ResamplingStrategy;
use crate::utils::require_open_unit;
use crate::{Error, Result};

/// ESS fraction below which a degeneracy warning is logged.
const DEGENERACY_WARN_FRACTION: f64 = 0.01;

/// Configuration for the generic particle filter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Number of particles N (fixed for the filter's lifetime).
    pub n_particles: usize,

    /// Resample when ESS < `ess_threshold * N`.
    pub ess_threshold: f64,

    /// Resampling strategy.
    pub resampling: ResamplingStrategy,

    /// Level of the per-dimension credible intervals in each estimate.
    pub credible_level: f64,

    /// Keep a full particle cloud in every history entry.
    pub retain_particles: bool,

    /// Seed for reproducible runs; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl FilterConfig {
    /// Create a configuration with `n_particles` and default settings.
    pub fn new(n_particles: usize) -> Self {
        Self {
            n_particles,
            ess_threshold: 0.5,
            resampling: ResamplingStrategy::Systematic,
            credible_level: 0.95,
            retain_particles: false,
            seed: None,
        }
    }

    /// Same configuration with a fixed seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_particles == 0 {
            return Err(Error::InvalidConfig(
                "n_particles must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.ess_threshold) {
            return Err(Error::InvalidConfig(format!(
                "ess_threshold must lie in [0, 1], got {}",
                self.ess_threshold
            )));
        }
        require_open_unit("credible_level", self.credible_level)
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Lifecycle of a filter instance.
///
/// `Uninitialized -> Initialized -> {Predicted <-> Updated}`. A numerical
/// failure moves the filter to `Failed`, after which every operation is
/// rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterStatus {
    Uninitialized,
    Initialized,
    Predicted,
    Updated,
    Failed,
}

/// Result of a single `update` call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UpdateOutcome {
    /// ESS after reweighting, before resampling.
    pub ess: f64,
    /// Whether the population was resampled.
    pub resampled: bool,
}

/// Particle filter over a [`StateSpaceModel`].
///
/// Owns its particle buffer and weights exclusively; callers only ever get
/// copies ([`ParticleCloud`]) or summaries ([`StateEstimate`]).
#[derive(Debug)]
pub struct ParticleFilter<M: StateSpaceModel> {
    model: M,
    config: FilterConfig,
    particles: Option<ParticleSet>,
    status: FilterStatus,
    rng: SmallRng,
    history: EstimateHistory,
    diagnostics: Diagnostics,
    step: usize,
    last_time: Option<f64>,
    last_resampled: bool,
}

impl<M: StateSpaceModel> ParticleFilter<M> {
    /// Create an uninitialized filter.
    pub fn new(model: M, config: FilterConfig) -> Result<Self> {
        config.validate()?;
        if model.state_dim() == 0 {
            return Err(Error::InvalidConfig(
                "state dimension must be at least 1".to_string(),
            ));
        }

        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };

        Ok(Self {
            diagnostics: Diagnostics::new(config.n_particles),
            model,
            config,
            particles: None,
            status: FilterStatus::Uninitialized,
            rng,
            history: EstimateHistory::new(),
            step: 0,
            last_time: None,
            last_resampled: false,
        })
    }

    /// Draw N particles from `initial` and set all weights to 1/N.
    ///
    /// Must be called exactly once.
    pub fn initialize(&mut self, initial: &InitialDistribution) -> Result<()> {
        if self.status != FilterStatus::Uninitialized {
            return Err(Error::State(format!(
                "initialize called on a filter in state {:?}",
                self.status
            )));
        }

        let states = initial.sample(self.model.state_dim(), self.config.n_particles, &mut self.rng)?;
        self.particles = Some(ParticleSet::uniform(states));
        self.status = FilterStatus::Initialized;

        debug!(
            n_particles = self.config.n_particles,
            state_dim = self.model.state_dim(),
            resampling = self.config.resampling.name(),
            "particle filter initialized"
        );
        Ok(())
    }

    /// Propagate every particle through the model's transition by `dt`.
    ///
    /// Weights are untouched.
    pub fn predict(&mut self, dt: f64) -> Result<()> {
        self.ensure_ready("predict")?;
        if !dt.is_finite() || dt < 0.0 {
            return Err(Error::Validation(format!(
                "time step must be non-negative and finite, got {}",
                dt
            )));
        }

        let particles = self.particles.as_mut().ok_or_else(not_initialized)?;
        for state in particles.iter_states_mut() {
            self.model.transition(state, dt, &mut self.rng);
        }

        if !particles.all_finite() {
            self.status = FilterStatus::Failed;
            warn!(step = self.step, dt, "transition produced non-finite particle states");
            return Err(Error::Numerical(
                "transition produced non-finite particle states".to_string(),
            ));
        }

        self.status = FilterStatus::Predicted;
        Ok(())
    }

    /// Reweight particles by the likelihood of `observation`, renormalize
    /// and resample when the ESS falls below the configured threshold.
    pub fn update(&mut self, observation: &M::Observation) -> Result<UpdateOutcome> {
        self.ensure_ready("update")?;
        self.model.validate_observation(observation)?;

        let model = &self.model;
        let particles = self.particles.as_mut().ok_or_else(not_initialized)?;
        if let Err(err) = particles.reweight(|state| model.observe_log_likelihood(state, observation)) {
            self.status = FilterStatus::Failed;
            warn!(step = self.step + 1, error = %err, "particle weights collapsed");
            return Err(err);
        }

        self.step += 1;
        let n = particles.len() as f64;
        let ess = particles.ess();
        self.diagnostics.record_ess(ess);

        if ess < DEGENERACY_WARN_FRACTION * n {
            warn!(step = self.step, ess, n_particles = n, "severe weight degeneracy");
        }

        let resampled = ess < self.config.ess_threshold * n;
        if resampled {
            particles.resample(self.config.resampling, &mut self.rng)?;
            self.diagnostics.record_resample(self.step);
            debug!(
                step = self.step,
                ess,
                strategy = self.config.resampling.name(),
                "resampled particles"
            );
        }

        self.last_resampled = resampled;
        self.status = FilterStatus::Updated;
        Ok(UpdateOutcome { ess, resampled })
    }

    /// Process one timestamped observation: predict by the elapsed time,
    /// update, and append an estimate to the history.
    pub fn step(&mut self, observation: &M::Observation) -> Result<StateEstimate> {
        self.ensure_ready("step")?;
        self.model.validate_observation(observation)?;

        let time = self.model.observation_time(observation);
        if !time.is_finite() {
            return Err(Error::Validation(format!(
                "observation time must be finite, got {}",
                time
            )));
        }
        if let Some(previous) = self.last_time {
            if time <= previous {
                return Err(Error::Validation(format!(
                    "observation time {} is not after previous time {}",
                    time, previous
                )));
            }
        }

        let dt = self.model.time_step(self.last_time, time);
        self.predict(dt)?;
        self.update(observation)?;
        self.last_time = Some(time);

        let estimate = self.estimate()?;
        trace!(
            step = estimate.step,
            time,
            ess = estimate.ess,
            resampled = estimate.resampled,
            "filter step"
        );
        self.history.push(estimate.clone());
        Ok(estimate)
    }

    /// Run [`step`](Self::step) over a batch of observations and return the
    /// estimates it produced, one per observation.
    ///
    /// On a fresh filter this is the full history; the complete record
    /// across batches stays available through [`history`](Self::history).
    pub fn filter(&mut self, observations: &[M::Observation]) -> Result<Vec<StateEstimate>> {
        observations.iter().map(|obs| self.step(obs)).collect()
    }

    /// Summary of the current particle population.
    ///
    /// Pure: repeated calls without an intervening `predict`/`update`
    /// return identical results.
    pub fn estimate(&self) -> Result<StateEstimate> {
        let particles = self.ready_particles("estimate")?;
        Ok(StateEstimate {
            step: self.step,
            time: self.last_time,
            mean: particles.mean(),
            variance: particles.variance(),
            credible_intervals: particles.credible_intervals(self.config.credible_level),
            credible_level: self.config.credible_level,
            ess: self.diagnostics.last_ess().unwrap_or_else(|| particles.ess()),
            resampled: self.last_resampled,
            particles: self.config.retain_particles.then(|| particles.cloud()),
        })
    }

    /// Weighted posterior mean.
    pub fn mean(&self) -> Result<DVector<f64>> {
        Ok(self.ready_particles("mean")?.mean())
    }

    /// Weighted posterior variance per dimension.
    pub fn variance(&self) -> Result<DVector<f64>> {
        Ok(self.ready_particles("variance")?.variance())
    }

    /// Weighted posterior covariance.
    pub fn covariance(&self) -> Result<DMatrix<f64>> {
        Ok(self.ready_particles("covariance")?.covariance())
    }

    /// Copy of the current particles and weights.
    pub fn particles(&self) -> Result<ParticleCloud> {
        Ok(self.ready_particles("particles")?.cloud())
    }

    /// ESS of the current weights.
    pub fn ess(&self) -> Result<f64> {
        Ok(self.ready_particles("ess")?.ess())
    }

    /// Propagate a copy of the current population forward by `horizon`
    /// time units in increments of at most `step`.
    ///
    /// The filter's own particles and weights are not modified; only the
    /// random stream advances. Work is bounded by `ceil(horizon / step)`
    /// transitions per particle. A transition that yields non-finite states
    /// is fatal, as in `predict`.
    pub fn project(&mut self, horizon: f64, step: f64) -> Result<ParticleCloud> {
        if !horizon.is_finite() || horizon < 0.0 {
            return Err(Error::Validation(format!(
                "projection horizon must be non-negative and finite, got {}",
                horizon
            )));
        }
        if !step.is_finite() || step <= 0.0 {
            return Err(Error::Validation(format!(
                "projection step must be positive and finite, got {}",
                step
            )));
        }

        let particles = self.ready_particles("project")?;
        let dim = particles.dim();
        let mut states = particles.states_copy();
        let weights = particles.weights_copy();

        let n_steps = (horizon / step).ceil() as usize;
        let mut remaining = horizon;
        for _ in 0..n_steps {
            let dt = step.min(remaining);
            for state in states.as_mut_slice().chunks_exact_mut(dim) {
                self.model.transition(state, dt, &mut self.rng);
            }
            remaining -= dt;
        }

        if states.iter().any(|v| !v.is_finite()) {
            self.status = FilterStatus::Failed;
            warn!(step = self.step, horizon, "projection produced non-finite particle states");
            return Err(Error::Numerical(
                "projection produced non-finite particle states".to_string(),
            ));
        }

        Ok(ParticleCloud {
            states: states.transpose(),
            weights,
        })
    }

    pub fn status(&self) -> FilterStatus {
        self.status
    }

    /// Number of observations processed so far.
    pub fn step_count(&self) -> usize {
        self.step
    }

    /// Time of the last observation processed through [`step`](Self::step).
    pub fn last_time(&self) -> Option<f64> {
        self.last_time
    }

    pub fn history(&self) -> &EstimateHistory {
        &self.history
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn n_particles(&self) -> usize {
        self.config.n_particles
    }

    pub fn state_dim(&self) -> usize {
        self.model.state_dim()
    }

    fn ensure_ready(&self, operation: &str) -> Result<()> {
        match self.status {
            FilterStatus::Uninitialized => Err(Error::State(format!(
                "{} called before initialize",
                operation
            ))),
            FilterStatus::Failed => Err(Error::State(format!(
                "{} called after a fatal numerical failure",
                operation
            ))),
            _ => Ok(()),
        }
    }

    fn ready_particles(&self, operation: &str) -> Result<&ParticleSet> {
        self.ensure_ready(operation)?;
        self.particles.as_ref().ok_or_else(not_initialized)
    }

    // Internal: used by checkpoint restore
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        model: M,
        config: FilterConfig,
        particles: ParticleSet,
        status: FilterStatus,
        history: EstimateHistory,
        diagnostics: Diagnostics,
        step: usize,
        last_time: Option<f64>,
    ) -> Result<Self> {
        let mut filter = Self::new(model, config)?;
        if let Some(seed) = filter.config.seed {
            // Continue on a distinct stream rather than replaying the original one.
            filter.rng = SmallRng::seed_from_u64(seed.wrapping_add(step as u64));
        }
        filter.last_resampled = history.last().map(|e| e.resampled).unwrap_or(false);
        filter.particles = Some(particles);
        filter.status = status;
        filter.history = history;
        filter.diagnostics = diagnostics;
        filter.step = step;
        filter.last_time = last_time;
        Ok(filter)
    }

    pub(crate) fn particle_set(&self) -> Option<&ParticleSet> {
        self.particles.as_ref()
    }
}

fn not_initialized() -> Error {
    Error::State("filter has no particles; call initialize first".to_string())
}
