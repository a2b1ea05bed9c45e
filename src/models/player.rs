//! Player performance tracking.
//!
//! Latent state `[skill, form]`:
//!
//! ```text
//! skill_t = skill_{t-1} + σ_skill √Δt ε₁
//! form_t  = φ^Δt form_{t-1} + σ_form √((1 - φ^2Δt) / (1 - φ²)) ε₂
//! ```
//!
//! Skill is slow-moving ability; form is a mean-reverting deviation from it
//! (hot and cold streaks). An observed count is Poisson with log-rate
//!
//! ```text
//! η = skill + form + ln(minutes / reference_minutes) - β_opp · opponent_strength
//! ```
//!
//! so the observation model is non-linear in the state.

use nalgebra::DVector;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use statrs::function::factorial::ln_factorial;

use crate::diagnostics::Diagnostics;
use crate::filter::{
    EstimateHistory, FilterCheckpoint, FilterConfig, InitialDistribution, ParticleFilter,
    StateEstimate, StateSpaceModel,
};
use crate::utils::{require_non_negative, require_positive};
use crate::{Error, Result};

const SKILL: usize = 0;
const FORM: usize = 1;

/// Optional covariates attached to a player observation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Covariates {
    /// Minutes played; enters the rate as a log-exposure offset.
    pub minutes: Option<f64>,
    /// Opponent defensive strength (positive = harder to score against).
    pub opponent_strength: Option<f64>,
}

/// One count statistic for a player (e.g. points in a game).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerObservation {
    /// Game index or date; must strictly increase.
    pub time: f64,
    pub count: u64,
    #[serde(default)]
    pub covariates: Covariates,
}

impl PlayerObservation {
    pub fn new(time: f64, count: u64) -> Self {
        Self {
            time,
            count,
            covariates: Covariates::default(),
        }
    }

    pub fn with_covariates(time: f64, count: u64, covariates: Covariates) -> Self {
        Self { time, count, covariates }
    }
}

/// Configuration for [`PlayerPerformanceFilter`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerFilterConfig {
    /// Generic particle filter settings.
    pub filter: FilterConfig,

    /// Skill random-walk noise per unit time.
    pub skill_process_std: f64,

    /// Form innovation noise per unit time.
    pub form_process_std: f64,

    /// AR(1) coefficient φ pulling form back toward skill, in [0, 1).
    pub form_persistence: f64,

    /// Prior mean of skill (log-rate scale).
    pub initial_skill_mean: f64,

    /// Prior standard deviation of skill.
    pub initial_skill_std: f64,

    /// Prior standard deviation of form (prior mean is 0).
    pub initial_form_std: f64,

    /// Minutes that correspond to a zero exposure offset.
    pub reference_minutes: f64,

    /// Coefficient β_opp applied to opponent strength.
    pub opponent_coefficient: f64,
}

impl Default for PlayerFilterConfig {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            skill_process_std: 0.02,
            form_process_std: 0.1,
            form_persistence: 0.7,
            initial_skill_mean: 15f64.ln(),
            initial_skill_std: 1.0,
            initial_form_std: 0.25,
            reference_minutes: 36.0,
            opponent_coefficient: 0.1,
        }
    }
}

impl PlayerFilterConfig {
    pub fn validate(&self) -> Result<()> {
        self.filter.validate()?;
        require_non_negative("skill_process_std", self.skill_process_std)?;
        require_non_negative("form_process_std", self.form_process_std)?;
        if !(0.0..1.0).contains(&self.form_persistence) {
            return Err(Error::InvalidConfig(format!(
                "form_persistence must lie in [0, 1), got {}",
                self.form_persistence
            )));
        }
        if !self.initial_skill_mean.is_finite() {
            return Err(Error::InvalidConfig(
                "initial_skill_mean must be finite".to_string(),
            ));
        }
        require_non_negative("initial_skill_std", self.initial_skill_std)?;
        require_non_negative("initial_form_std", self.initial_form_std)?;
        require_positive("reference_minutes", self.reference_minutes)?;
        if !self.opponent_coefficient.is_finite() {
            return Err(Error::InvalidConfig(
                "opponent_coefficient must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Skill/form state-space model with a Poisson count observation.
#[derive(Clone, Debug)]
pub struct PlayerPerformanceModel {
    skill_process_std: f64,
    form_process_std: f64,
    form_persistence: f64,
    reference_minutes: f64,
    opponent_coefficient: f64,
}

impl PlayerPerformanceModel {
    pub fn from_config(config: &PlayerFilterConfig) -> Self {
        Self {
            skill_process_std: config.skill_process_std,
            form_process_std: config.form_process_std,
            form_persistence: config.form_persistence,
            reference_minutes: config.reference_minutes,
            opponent_coefficient: config.opponent_coefficient,
        }
    }

    /// Log-rate offset contributed by the covariates.
    pub fn covariate_offset(&self, covariates: &Covariates) -> f64 {
        let exposure = covariates
            .minutes
            .map(|m| (m / self.reference_minutes).ln())
            .unwrap_or(0.0);
        let opponent = covariates
            .opponent_strength
            .map(|s| self.opponent_coefficient * s)
            .unwrap_or(0.0);
        exposure - opponent
    }

    /// Log of the Poisson rate for `state` under `covariates`.
    pub fn log_rate(&self, state: &[f64], covariates: &Covariates) -> f64 {
        state[SKILL] + state[FORM] + self.covariate_offset(covariates)
    }
}

impl StateSpaceModel for PlayerPerformanceModel {
    type Observation = PlayerObservation;

    fn state_dim(&self) -> usize {
        2
    }

    fn transition<R: Rng + ?Sized>(&self, state: &mut [f64], dt: f64, rng: &mut R) {
        let z_skill: f64 = rng.sample(StandardNormal);
        let z_form: f64 = rng.sample(StandardNormal);

        state[SKILL] += self.skill_process_std * dt.sqrt() * z_skill;

        let decay = self.form_persistence.powf(dt);
        let phi_sq = self.form_persistence * self.form_persistence;
        // Variance of the exact AR(1) innovation accumulated over dt.
        let innovation_var = (1.0 - decay * decay) / (1.0 - phi_sq);
        state[FORM] = decay * state[FORM] + self.form_process_std * innovation_var.sqrt() * z_form;
    }

    fn observe_log_likelihood(&self, state: &[f64], observation: &PlayerObservation) -> f64 {
        let eta = self.log_rate(state, &observation.covariates);
        let k = observation.count;
        k as f64 * eta - eta.exp() - ln_factorial(k)
    }

    fn observation_time(&self, observation: &PlayerObservation) -> f64 {
        observation.time
    }

    fn validate_observation(&self, observation: &PlayerObservation) -> Result<()> {
        if let Some(minutes) = observation.covariates.minutes {
            if !minutes.is_finite() || minutes <= 0.0 {
                return Err(Error::Validation(format!(
                    "minutes played must be positive, got {}",
                    minutes
                )));
            }
        }
        if let Some(strength) = observation.covariates.opponent_strength {
            if !strength.is_finite() {
                return Err(Error::Validation(
                    "opponent strength must be finite".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Per-step summary of a player's latent skill and form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerEstimate {
    pub step: usize,
    pub time: Option<f64>,
    pub skill: f64,
    pub form: f64,
    pub skill_std: f64,
    pub form_std: f64,
    /// Credible interval for skill at the filter's credible level.
    pub skill_interval: (f64, f64),
    pub form_interval: (f64, f64),
    /// Rate implied by the posterior mean log-rate at reference exposure.
    pub expected_rate: f64,
    pub ess: f64,
    pub resampled: bool,
}

impl From<&StateEstimate> for PlayerEstimate {
    fn from(estimate: &StateEstimate) -> Self {
        let skill = estimate.mean[SKILL];
        let form = estimate.mean[FORM];
        Self {
            step: estimate.step,
            time: estimate.time,
            skill,
            form,
            skill_std: estimate.std_dev(SKILL),
            form_std: estimate.std_dev(FORM),
            skill_interval: estimate.credible_intervals[SKILL],
            form_interval: estimate.credible_intervals[FORM],
            expected_rate: (skill + form).exp(),
            ess: estimate.ess,
            resampled: estimate.resampled,
        }
    }
}

/// Particle filter tracking one player's skill and form from count data.
#[derive(Debug)]
pub struct PlayerPerformanceFilter {
    filter: ParticleFilter<PlayerPerformanceModel>,
}

impl PlayerPerformanceFilter {
    /// Build and initialize a filter from the configured prior.
    pub fn new(config: PlayerFilterConfig) -> Result<Self> {
        config.validate()?;
        let model = PlayerPerformanceModel::from_config(&config);
        let mut filter = ParticleFilter::new(model, config.filter.clone())?;
        filter.initialize(&InitialDistribution::Diagonal {
            mean: DVector::from_vec(vec![config.initial_skill_mean, 0.0]),
            std_dev: DVector::from_vec(vec![config.initial_skill_std, config.initial_form_std]),
        })?;
        Ok(Self { filter })
    }

    /// Resume from a checkpoint taken with [`checkpoint`](Self::checkpoint).
    pub fn restore(config: &PlayerFilterConfig, checkpoint: FilterCheckpoint) -> Result<Self> {
        config.validate()?;
        let model = PlayerPerformanceModel::from_config(config);
        Ok(Self {
            filter: ParticleFilter::restore(model, checkpoint)?,
        })
    }

    /// Process one observation.
    pub fn observe(&mut self, observation: &PlayerObservation) -> Result<PlayerEstimate> {
        let estimate = self.filter.step(observation)?;
        Ok(PlayerEstimate::from(&estimate))
    }

    /// Process a batch of observations in order and return one estimate per
    /// observation.
    pub fn track(&mut self, observations: &[PlayerObservation]) -> Result<Vec<PlayerEstimate>> {
        let estimates = self.filter.filter(observations)?;
        Ok(estimates.iter().map(PlayerEstimate::from).collect())
    }

    /// Track bare counts, numbering them consecutively after the last
    /// processed time. `covariates`, when given, must match `counts` in
    /// length.
    pub fn track_counts(
        &mut self,
        counts: &[u64],
        covariates: Option<&[Covariates]>,
    ) -> Result<Vec<PlayerEstimate>> {
        if let Some(cov) = covariates {
            if cov.len() != counts.len() {
                return Err(Error::Validation(format!(
                    "{} covariate records for {} counts",
                    cov.len(),
                    counts.len()
                )));
            }
        }

        let origin = self.filter.last_time().unwrap_or(0.0);
        let observations: Vec<PlayerObservation> = counts
            .iter()
            .enumerate()
            .map(|(i, &count)| PlayerObservation {
                time: origin + (i + 1) as f64,
                count,
                covariates: covariates.map(|c| c[i]).unwrap_or_default(),
            })
            .collect();
        self.track(&observations)
    }

    /// Summary of the current posterior.
    pub fn current(&self) -> Result<PlayerEstimate> {
        Ok(PlayerEstimate::from(&self.filter.estimate()?))
    }

    /// Posterior predictive mean count for the next observation with the
    /// given covariates (`E[exp(η)]` over particles, no further propagation).
    pub fn expected_count(&self, covariates: &Covariates) -> Result<f64> {
        let model = self.filter.model();
        let cloud = self.filter.particles()?;
        let offset = model.covariate_offset(covariates);
        Ok(cloud
            .states
            .row_iter()
            .zip(cloud.weights.iter())
            .map(|(row, w)| w * (row[SKILL] + row[FORM] + offset).exp())
            .sum())
    }

    /// Every per-step estimate recorded so far.
    pub fn estimates(&self) -> Vec<PlayerEstimate> {
        self.filter.history().iter().map(PlayerEstimate::from).collect()
    }

    pub fn history(&self) -> &EstimateHistory {
        self.filter.history()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        self.filter.diagnostics()
    }

    pub fn checkpoint(&self) -> Result<FilterCheckpoint> {
        self.filter.checkpoint()
    }

    /// Underlying generic filter.
    pub fn inner(&self) -> &ParticleFilter<PlayerPerformanceModel> {
        &self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterStatus;
    use approx::assert_relative_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Poisson};

    fn config(n: usize, seed: u64) -> PlayerFilterConfig {
        PlayerFilterConfig {
            filter: FilterConfig::new(n).with_seed(seed),
            ..PlayerFilterConfig::default()
        }
    }

    fn poisson_counts(log_rate: f64, n: usize, seed: u64) -> Vec<u64> {
        let mut rng = SmallRng::seed_from_u64(seed);
        let poisson = Poisson::new(log_rate.exp()).unwrap();
        (0..n).map(|_| poisson.sample(&mut rng) as u64).collect()
    }

    #[test]
    fn test_log_likelihood_matches_poisson_pmf() {
        let model = PlayerPerformanceModel::from_config(&PlayerFilterConfig::default());
        let obs = PlayerObservation::new(1.0, 3);
        // rate = e^{ln 2} = 2: P(3) = 2^3 e^{-2} / 3!
        let ll = model.observe_log_likelihood(&[2f64.ln(), 0.0], &obs);
        let expected = (8.0 * (-2.0f64).exp() / 6.0).ln();
        assert_relative_eq!(ll, expected, epsilon = 1e-10);
    }

    #[test]
    fn test_covariate_offset() {
        let model = PlayerPerformanceModel::from_config(&PlayerFilterConfig::default());
        let half_game = Covariates { minutes: Some(18.0), opponent_strength: None };
        assert_relative_eq!(model.covariate_offset(&half_game), 0.5f64.ln(), epsilon = 1e-12);

        let tough = Covariates { minutes: None, opponent_strength: Some(2.0) };
        assert_relative_eq!(model.covariate_offset(&tough), -0.2, epsilon = 1e-12);
        assert_relative_eq!(model.log_rate(&[1.0, 0.5], &tough), 1.3, epsilon = 1e-12);
    }

    #[test]
    fn test_form_reverts_without_noise() {
        let mut cfg = PlayerFilterConfig::default();
        cfg.skill_process_std = 0.0;
        cfg.form_process_std = 0.0;
        cfg.form_persistence = 0.5;
        let model = PlayerPerformanceModel::from_config(&cfg);
        let mut rng = SmallRng::seed_from_u64(1);

        let mut state = [2.0, 1.0];
        model.transition(&mut state, 1.0, &mut rng);
        assert_relative_eq!(state[SKILL], 2.0);
        assert_relative_eq!(state[FORM], 0.5, epsilon = 1e-12);

        model.transition(&mut state, 2.0, &mut rng);
        assert_relative_eq!(state[FORM], 0.125, epsilon = 1e-12);
    }

    #[test]
    fn test_form_stationary_variance() {
        let cfg = PlayerFilterConfig::default();
        let model = PlayerPerformanceModel::from_config(&cfg);
        let mut rng = SmallRng::seed_from_u64(2);

        let n = 20000;
        let mut sum_sq = 0.0;
        for _ in 0..n {
            let mut state = [0.0, 0.0];
            // A long step reaches the stationary distribution directly.
            model.transition(&mut state, 50.0, &mut rng);
            sum_sq += state[FORM] * state[FORM];
        }
        let stationary = cfg.form_process_std.powi(2) / (1.0 - cfg.form_persistence.powi(2));
        assert_relative_eq!(sum_sq / n as f64, stationary, max_relative = 0.05);
    }

    #[test]
    fn test_tracks_constant_rate() {
        let mut filter = PlayerPerformanceFilter::new(config(1000, 3)).unwrap();
        let counts = poisson_counts(3.0, 40, 4);
        let estimates = filter.track_counts(&counts, None).unwrap();

        assert_eq!(estimates.len(), 40);
        let last = estimates.last().unwrap();
        assert!((last.skill + last.form - 3.0).abs() < 0.3, "log-rate {}", last.skill + last.form);
        assert!(last.skill_interval.0 <= last.skill && last.skill <= last.skill_interval.1);
        assert!((last.expected_rate / 3f64.exp()).ln().abs() < 0.3);
        assert_eq!(last.time, Some(40.0));
    }

    #[test]
    fn test_detects_hot_streak_as_form() {
        let mut cfg = config(2000, 5);
        cfg.initial_skill_mean = 3.0;
        cfg.initial_skill_std = 0.1;
        let mut filter = PlayerPerformanceFilter::new(cfg).unwrap();

        filter.track_counts(&poisson_counts(3.0, 30, 6), None).unwrap();
        let baseline = filter.current().unwrap();

        // Three games far above the usual level.
        let streak = filter.track_counts(&[45, 48, 50], None).unwrap();
        let hot = streak.last().unwrap();
        assert!(hot.form > baseline.form + 0.2, "form {} vs {}", hot.form, baseline.form);
        assert!(hot.skill - baseline.skill < hot.form - baseline.form);
    }

    #[test]
    fn test_minutes_offset_explains_low_counts() {
        let mut cfg = config(1000, 7);
        cfg.initial_skill_mean = 3.0;
        cfg.initial_skill_std = 0.5;
        let mut full = PlayerPerformanceFilter::new(cfg.clone()).unwrap();
        let mut partial = PlayerPerformanceFilter::new(cfg).unwrap();

        // Same underlying rate; the second player only plays a third of the minutes.
        let counts_full = poisson_counts(3.0, 25, 8);
        let counts_partial = poisson_counts(3.0 + (12.0f64 / 36.0).ln(), 25, 9);
        let minutes = vec![Covariates { minutes: Some(12.0), opponent_strength: None }; 25];

        let a = full.track_counts(&counts_full, None).unwrap();
        let b = partial.track_counts(&counts_partial, Some(&minutes)).unwrap();
        let (a, b) = (a.last().unwrap(), b.last().unwrap());
        assert!(((a.skill + a.form) - (b.skill + b.form)).abs() < 0.3);

        let expected = partial.expected_count(&minutes[0]).unwrap();
        assert!((expected - 20.0 / 3.0).abs() < 3.0, "expected count {}", expected);
    }

    #[test]
    fn test_validation_errors() {
        let mut filter = PlayerPerformanceFilter::new(config(100, 10)).unwrap();
        let bad_minutes = PlayerObservation::with_covariates(
            1.0,
            10,
            Covariates { minutes: Some(0.0), opponent_strength: None },
        );
        assert!(matches!(filter.observe(&bad_minutes), Err(Error::Validation(_))));

        let covariates = vec![Covariates::default(); 2];
        assert!(matches!(
            filter.track_counts(&[1, 2, 3], Some(&covariates)),
            Err(Error::Validation(_))
        ));

        filter.observe(&PlayerObservation::new(5.0, 10)).unwrap();
        assert!(matches!(
            filter.observe(&PlayerObservation::new(4.0, 10)),
            Err(Error::Validation(_))
        ));
        assert_eq!(filter.estimates().len(), 1);
    }

    #[test]
    fn test_implausible_count_is_numerical_failure() {
        let mut cfg = config(500, 12);
        cfg.initial_skill_mean = 3.0;
        cfg.initial_skill_std = 0.2;
        let mut filter = PlayerPerformanceFilter::new(cfg).unwrap();
        filter.track_counts(&[20, 18, 22], None).unwrap();

        // Thousands of points from a ~20-point player: every likelihood underflows.
        assert!(matches!(
            filter.observe(&PlayerObservation::new(4.0, 5000)),
            Err(Error::Numerical(_))
        ));
        assert_eq!(filter.inner().status(), FilterStatus::Failed);
        assert!(matches!(
            filter.observe(&PlayerObservation::new(5.0, 20)),
            Err(Error::State(_))
        ));
        assert_eq!(filter.estimates().len(), 3);
    }

    #[test]
    fn test_prior_far_from_data_surfaces_collapse() {
        // Default prior centres near 15 per game; e^10 per game is far outside it.
        let mut filter = PlayerPerformanceFilter::new(config(1000, 13)).unwrap();
        let counts = poisson_counts(10.0, 5, 14);
        assert!(matches!(
            filter.track_counts(&counts, None),
            Err(Error::Numerical(_))
        ));
    }

    #[test]
    fn test_invalid_config() {
        let mut cfg = PlayerFilterConfig::default();
        cfg.form_persistence = 1.0;
        assert!(matches!(PlayerPerformanceFilter::new(cfg), Err(Error::InvalidConfig(_))));

        let mut cfg = PlayerFilterConfig::default();
        cfg.reference_minutes = 0.0;
        assert!(matches!(PlayerPerformanceFilter::new(cfg), Err(Error::InvalidConfig(_))));

        let mut cfg = PlayerFilterConfig::default();
        cfg.skill_process_std = -0.1;
        assert!(matches!(PlayerPerformanceFilter::new(cfg), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_track_counts_continues_time() {
        let mut filter = PlayerPerformanceFilter::new(config(200, 11)).unwrap();
        filter.track_counts(&[10, 12], None).unwrap();
        let more = filter.track_counts(&[11], None).unwrap();
        assert_eq!(more.len(), 1);
        assert_eq!(more[0].time, Some(3.0));
        assert_eq!(filter.estimates().len(), 3);
        assert_eq!(filter.diagnostics().ess_history().len(), 3);
    }
}
