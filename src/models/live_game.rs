//! Live game win probability.
//!
//! The latent state is the home-minus-away score differential `[d]`, which
//! evolves as a drifted Brownian motion on the game clock:
//!
//! ```text
//! d_t = d_{t-Δt} + μ Δt + σ √Δt ε,   μ = (r_home - r_away + hca) · scale / L
//! ```
//!
//! where `L` is the regulation length in minutes. Score updates observe the
//! differential with a small Gaussian noise that stands in for reporting lag.
//!
//! Win probability is the weighted share of particles that finish regulation
//! ahead after forward simulation over the remaining clock. Inside the final
//! `endgame_minutes` the current particles are used directly.

use nalgebra::DVector;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::diagnostics::Diagnostics;
use crate::filter::{
    EstimateHistory, FilterCheckpoint, FilterConfig, InitialDistribution, ParticleCloud,
    ParticleFilter, StateEstimate, StateSpaceModel,
};
use crate::utils::{require_non_negative, require_positive};
use crate::{Error, Result};

/// Half-width of the band around zero treated as a tie.
const TIE_BAND: f64 = 0.5;

/// A score report at a point on the game clock.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreUpdate {
    /// Elapsed game minutes.
    pub time: f64,
    pub home_score: u32,
    pub away_score: u32,
}

impl ScoreUpdate {
    pub fn new(time: f64, home_score: u32, away_score: u32) -> Self {
        Self {
            time,
            home_score,
            away_score,
        }
    }

    /// Home minus away.
    pub fn differential(&self) -> f64 {
        self.home_score as f64 - self.away_score as f64
    }
}

/// Configuration for [`LiveGameFilter`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveGameConfig {
    pub filter: FilterConfig,

    /// Home team strength rating (expected points margin per game vs. an average team).
    pub home_rating: f64,

    pub away_rating: f64,

    /// Home-court advantage in rating points.
    pub home_advantage: f64,

    /// Rating points to score-differential points per game.
    pub rating_scale: f64,

    /// Regulation length in minutes.
    pub game_length_minutes: f64,

    /// Differential volatility in points per √minute.
    pub score_volatility: f64,

    /// Standard deviation of a reported differential around the true one.
    pub observation_noise: f64,

    /// Step size of the forward simulation to the end of regulation.
    pub simulation_step_minutes: f64,

    /// Remaining clock at or below which the empirical rule replaces simulation.
    pub endgame_minutes: f64,
}

impl Default for LiveGameConfig {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            home_rating: 0.0,
            away_rating: 0.0,
            home_advantage: 2.5,
            rating_scale: 1.0,
            game_length_minutes: 48.0,
            score_volatility: 12.0 / 48f64.sqrt(),
            observation_noise: 0.5,
            simulation_step_minutes: 1.0,
            endgame_minutes: 0.5,
        }
    }
}

impl LiveGameConfig {
    pub fn new(home_rating: f64, away_rating: f64) -> Self {
        Self {
            home_rating,
            away_rating,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.filter.validate()?;
        for (name, value) in [
            ("home_rating", self.home_rating),
            ("away_rating", self.away_rating),
            ("home_advantage", self.home_advantage),
            ("rating_scale", self.rating_scale),
        ] {
            if !value.is_finite() {
                return Err(Error::InvalidConfig(format!("{} must be finite", name)));
            }
        }
        require_positive("game_length_minutes", self.game_length_minutes)?;
        require_non_negative("score_volatility", self.score_volatility)?;
        require_positive("observation_noise", self.observation_noise)?;
        require_positive("simulation_step_minutes", self.simulation_step_minutes)?;
        require_non_negative("endgame_minutes", self.endgame_minutes)?;
        Ok(())
    }

    /// Expected differential change per minute.
    pub fn drift_per_minute(&self) -> f64 {
        (self.home_rating - self.away_rating + self.home_advantage) * self.rating_scale
            / self.game_length_minutes
    }
}

/// Drifted random walk on the score differential.
#[derive(Clone, Debug)]
pub struct LiveGameModel {
    drift: f64,
    volatility: f64,
    observation_noise: f64,
    log_norm: f64,
    game_length: f64,
}

impl LiveGameModel {
    pub fn from_config(config: &LiveGameConfig) -> Self {
        let observation_noise = config.observation_noise;
        Self {
            drift: config.drift_per_minute(),
            volatility: config.score_volatility,
            observation_noise,
            log_norm: -observation_noise.ln() - 0.5 * (2.0 * std::f64::consts::PI).ln(),
            game_length: config.game_length_minutes,
        }
    }

    pub fn drift(&self) -> f64 {
        self.drift
    }

    pub fn volatility(&self) -> f64 {
        self.volatility
    }

    pub fn game_length(&self) -> f64 {
        self.game_length
    }
}

impl StateSpaceModel for LiveGameModel {
    type Observation = ScoreUpdate;

    fn state_dim(&self) -> usize {
        1
    }

    fn transition<R: Rng + ?Sized>(&self, state: &mut [f64], dt: f64, rng: &mut R) {
        let z: f64 = rng.sample(StandardNormal);
        state[0] += self.drift * dt + self.volatility * dt.sqrt() * z;
    }

    fn observe_log_likelihood(&self, state: &[f64], observation: &ScoreUpdate) -> f64 {
        let z = (observation.differential() - state[0]) / self.observation_noise;
        -0.5 * z * z + self.log_norm
    }

    fn observation_time(&self, observation: &ScoreUpdate) -> f64 {
        observation.time
    }

    /// Clock starts at tip-off, so the first update propagates from zero.
    fn time_step(&self, previous: Option<f64>, current: f64) -> f64 {
        current - previous.unwrap_or(0.0)
    }

    fn validate_observation(&self, observation: &ScoreUpdate) -> Result<()> {
        let t = observation.time;
        if !t.is_finite() || t < 0.0 || t > self.game_length {
            return Err(Error::Validation(format!(
                "score update time {} outside the game clock [0, {}]",
                t, self.game_length
            )));
        }
        Ok(())
    }
}

/// How a [`WinProbability`] was derived.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinProbabilityMethod {
    /// Particles simulated forward to the end of regulation.
    Simulation,
    /// Share of current particles ahead (late in the game).
    Empirical,
    /// Regulation is over; the reported score decides.
    Final,
}

/// Home win probability at one point of the game.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WinProbability {
    /// Game clock the probability refers to.
    pub time: f64,
    pub home_win_probability: f64,
    /// Monte Carlo standard error, `sqrt(p (1 - p) / ESS)`.
    pub standard_error: f64,
    /// Weighted mean of the (projected) final differential.
    pub differential_mean: f64,
    pub differential_std: f64,
    pub method: WinProbabilityMethod,
}

impl WinProbability {
    fn from_cloud(time: f64, cloud: &ParticleCloud, method: WinProbabilityMethod) -> Self {
        let ahead = cloud.probability(|s| s[0] >= TIE_BAND);
        let tied = cloud.probability(|s| s[0].abs() < TIE_BAND);
        let p = (ahead + 0.5 * tied).clamp(0.0, 1.0);

        let mean = cloud.weighted_mean(0);
        let var = cloud
            .states
            .column(0)
            .iter()
            .zip(cloud.weights.iter())
            .map(|(x, w)| w * (x - mean) * (x - mean))
            .sum::<f64>();

        let ess = cloud.ess();
        let standard_error = if ess > 0.0 {
            (p * (1.0 - p) / ess).sqrt()
        } else {
            0.0
        };

        Self {
            time,
            home_win_probability: p,
            standard_error,
            differential_mean: mean,
            differential_std: var.max(0.0).sqrt(),
            method,
        }
    }

    fn final_score(update: &ScoreUpdate) -> Self {
        let diff = update.differential();
        let p = if diff > 0.0 {
            1.0
        } else if diff < 0.0 {
            0.0
        } else {
            0.5
        };
        Self {
            time: update.time,
            home_win_probability: p,
            standard_error: 0.0,
            differential_mean: diff,
            differential_std: 0.0,
            method: WinProbabilityMethod::Final,
        }
    }
}

/// Particle filter over a game's score differential.
#[derive(Debug)]
pub struct LiveGameFilter {
    filter: ParticleFilter<LiveGameModel>,
    simulation_step: f64,
    endgame: f64,
    last_update: Option<ScoreUpdate>,
    win_history: Vec<WinProbability>,
}

impl LiveGameFilter {
    /// Build a filter with every particle at a 0-0 tip-off.
    pub fn new(config: LiveGameConfig) -> Result<Self> {
        config.validate()?;
        let model = LiveGameModel::from_config(&config);
        let mut filter = ParticleFilter::new(model, config.filter.clone())?;
        filter.initialize(&InitialDistribution::Point {
            state: DVector::from_element(1, 0.0),
        })?;
        Ok(Self::wrap(filter, &config))
    }

    /// Resume from a checkpoint. The win-probability history is not part of
    /// the checkpoint and starts empty.
    pub fn restore(config: &LiveGameConfig, checkpoint: FilterCheckpoint) -> Result<Self> {
        config.validate()?;
        let model = LiveGameModel::from_config(config);
        let filter = ParticleFilter::restore(model, checkpoint)?;
        Ok(Self::wrap(filter, config))
    }

    fn wrap(filter: ParticleFilter<LiveGameModel>, config: &LiveGameConfig) -> Self {
        Self {
            filter,
            simulation_step: config.simulation_step_minutes,
            endgame: config.endgame_minutes,
            last_update: None,
            win_history: Vec::new(),
        }
    }

    /// Condition on a new score and return the updated home win probability.
    ///
    /// Any error leaves the filter `Failed` or untouched, so the estimate
    /// history and the win-probability history stay in step for every
    /// update the filter can still accept.
    pub fn update_with_score(
        &mut self,
        time: f64,
        home_score: u32,
        away_score: u32,
    ) -> Result<WinProbability> {
        self.apply(ScoreUpdate::new(time, home_score, away_score))
    }

    /// Process score updates in order, returning one probability per update.
    pub fn run(&mut self, updates: &[ScoreUpdate]) -> Result<Vec<WinProbability>> {
        updates.iter().map(|u| self.apply(*u)).collect()
    }

    fn apply(&mut self, update: ScoreUpdate) -> Result<WinProbability> {
        self.filter.step(&update)?;
        self.last_update = Some(update);
        let probability = self.win_probability()?;
        self.win_history.push(probability.clone());
        Ok(probability)
    }

    /// Win probability from the current posterior without a new observation.
    ///
    /// Before any update this is the pre-game probability.
    pub fn win_probability(&mut self) -> Result<WinProbability> {
        let now = self.filter.last_time().unwrap_or(0.0);
        let remaining = (self.filter.model().game_length() - now).max(0.0);

        if remaining <= 0.0 {
            if let Some(update) = &self.last_update {
                return Ok(WinProbability::final_score(update));
            }
        }

        let (cloud, method) = if remaining <= self.endgame {
            (self.filter.particles()?, WinProbabilityMethod::Empirical)
        } else {
            (
                self.filter.project(remaining, self.simulation_step)?,
                WinProbabilityMethod::Simulation,
            )
        };
        let probability = WinProbability::from_cloud(now, &cloud, method);
        debug!(
            time = now,
            remaining,
            p = probability.home_win_probability,
            method = ?method,
            "win probability"
        );
        Ok(probability)
    }

    /// Every probability returned by `update_with_score`/`run`, in order.
    pub fn win_probability_history(&self) -> &[WinProbability] {
        &self.win_history
    }

    /// Posterior over the current differential.
    pub fn current(&self) -> Result<StateEstimate> {
        self.filter.estimate()
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

    pub fn inner(&self) -> &ParticleFilter<LiveGameModel> {
        &self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use crate::filter::FilterStatus;
    use statrs::distribution::{ContinuousCDF, Normal};

    fn config(home: f64, away: f64, n: usize, seed: u64) -> LiveGameConfig {
        LiveGameConfig {
            filter: FilterConfig::new(n).with_seed(seed),
            ..LiveGameConfig::new(home, away)
        }
    }

    /// P(final differential > 0) for the drifted random walk from `lead` at `time`.
    fn closed_form(cfg: &LiveGameConfig, time: f64, lead: f64) -> f64 {
        let remaining = cfg.game_length_minutes - time;
        let mean = lead + cfg.drift_per_minute() * remaining;
        let sd = cfg.score_volatility * remaining.sqrt();
        Normal::new(0.0, 1.0).unwrap().cdf(mean / sd)
    }

    #[test]
    fn test_drift() {
        let cfg = LiveGameConfig {
            home_advantage: 0.0,
            ..LiveGameConfig::new(5.0, 3.0)
        };
        assert_relative_eq!(cfg.drift_per_minute(), 2.0 / 48.0);
    }

    #[test]
    fn test_transition_moments() {
        let cfg = LiveGameConfig::new(8.0, 0.0);
        let model = LiveGameModel::from_config(&cfg);
        let mut rng = SmallRng::seed_from_u64(1);

        let n = 20000;
        let draws: Vec<f64> = (0..n)
            .map(|_| {
                let mut s = [3.0];
                model.transition(&mut s, 12.0, &mut rng);
                s[0]
            })
            .collect();
        let mean = draws.iter().sum::<f64>() / n as f64;
        let var = draws.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;

        assert_relative_eq!(mean, 3.0 + model.drift() * 12.0, epsilon = 0.1);
        assert_relative_eq!(var, model.volatility().powi(2) * 12.0, max_relative = 0.05);
    }

    #[test]
    fn test_pregame_probability_favors_stronger_home_team() {
        let cfg = config(6.0, 0.0, 4000, 2);
        let expected = closed_form(&cfg, 0.0, 0.0);
        let mut game = LiveGameFilter::new(cfg).unwrap();

        let p = game.win_probability().unwrap();
        assert_eq!(p.method, WinProbabilityMethod::Simulation);
        assert!(p.home_win_probability > 0.5);
        assert_relative_eq!(p.home_win_probability, expected, epsilon = 0.04);
        assert!(game.win_probability_history().is_empty());
    }

    #[test]
    fn test_simulation_matches_closed_form() {
        let cfg = config(0.0, 0.0, 4000, 3);
        let mut game = LiveGameFilter::new(cfg.clone()).unwrap();
        let p = game.update_with_score(36.0, 90, 86).unwrap();

        assert_eq!(p.method, WinProbabilityMethod::Simulation);
        assert_relative_eq!(p.home_win_probability, closed_form(&cfg, 36.0, 4.0), epsilon = 0.05);
        assert!(p.standard_error > 0.0 && p.standard_error < 0.05);
    }

    #[test]
    fn test_trailing_team_is_underdog() {
        let mut game = LiveGameFilter::new(config(0.0, 0.0, 1000, 4)).unwrap();
        let p = game.update_with_score(40.0, 80, 92).unwrap();
        assert!(p.home_win_probability < 0.1, "p = {}", p.home_win_probability);
        assert!(p.differential_mean < 0.0);
    }

    #[test]
    fn test_endgame_uses_current_particles() {
        let mut game = LiveGameFilter::new(config(0.0, 0.0, 1000, 5)).unwrap();
        let p = game.update_with_score(47.8, 101, 99).unwrap();
        assert_eq!(p.method, WinProbabilityMethod::Empirical);
        assert!(p.home_win_probability > 0.95);
    }

    #[test]
    fn test_final_score_decides() {
        let mut game = LiveGameFilter::new(config(0.0, 10.0, 500, 6)).unwrap();
        let updates = [
            ScoreUpdate::new(12.0, 25, 30),
            ScoreUpdate::new(36.0, 70, 78),
            ScoreUpdate::new(48.0, 100, 99),
        ];
        let probs = game.run(&updates).unwrap();
        assert_eq!(probs.len(), 3);
        assert!(probs[1].home_win_probability < 0.5);
        assert_eq!(probs[2].method, WinProbabilityMethod::Final);
        assert_eq!(probs[2].home_win_probability, 1.0);
        assert_eq!(game.win_probability_history().len(), 3);
        assert_eq!(game.history().len(), 3);
    }

    #[test]
    fn test_tied_final_is_even() {
        let mut game = LiveGameFilter::new(config(0.0, 0.0, 200, 7)).unwrap();
        let p = game.update_with_score(48.0, 100, 100).unwrap();
        assert_eq!(p.home_win_probability, 0.5);
        assert_eq!(p.standard_error, 0.0);
    }

    #[test]
    fn test_posterior_tracks_observed_differential() {
        let mut game = LiveGameFilter::new(config(0.0, 0.0, 1000, 8)).unwrap();
        game.update_with_score(10.0, 22, 15).unwrap();
        let est = game.current().unwrap();
        assert_relative_eq!(est.mean[0], 7.0, epsilon = 0.3);
        assert!(est.std_dev(0) < 1.0);
    }

    #[test]
    fn test_impossible_score_is_numerical_failure() {
        let mut game = LiveGameFilter::new(config(0.0, 0.0, 1000, 10)).unwrap();
        game.update_with_score(10.0, 20, 20).unwrap();

        // A 380-point swing in thirty seconds has no support under any particle.
        assert!(matches!(
            game.update_with_score(10.5, 400, 20),
            Err(Error::Numerical(_))
        ));
        assert_eq!(game.inner().status(), FilterStatus::Failed);
        assert!(matches!(game.update_with_score(11.0, 22, 20), Err(Error::State(_))));
        assert_eq!(game.win_probability_history().len(), 1);
        assert_eq!(game.history().len(), 1);
    }

    #[test]
    fn test_failed_projection_stops_the_filter() {
        let mut cfg = config(0.0, 0.0, 200, 11);
        cfg.score_volatility = 1e308;
        let mut game = LiveGameFilter::new(cfg).unwrap();

        // Tip-off needs no propagation; the simulation to the buzzer overflows.
        assert!(matches!(game.update_with_score(0.0, 0, 0), Err(Error::Numerical(_))));
        assert_eq!(game.inner().status(), FilterStatus::Failed);
        assert!(game.win_probability_history().is_empty());
        assert!(matches!(game.update_with_score(1.0, 2, 0), Err(Error::State(_))));
        assert!(matches!(game.win_probability(), Err(Error::State(_))));
    }

    #[test]
    fn test_clock_validation() {
        let mut game = LiveGameFilter::new(config(0.0, 0.0, 100, 9)).unwrap();
        assert!(matches!(game.update_with_score(49.0, 1, 0), Err(Error::Validation(_))));
        assert!(matches!(game.update_with_score(-1.0, 0, 0), Err(Error::Validation(_))));

        game.update_with_score(20.0, 40, 40).unwrap();
        assert!(matches!(game.update_with_score(20.0, 42, 40), Err(Error::Validation(_))));
        assert!(matches!(game.update_with_score(15.0, 42, 40), Err(Error::Validation(_))));
        assert_eq!(game.win_probability_history().len(), 1);
    }

    #[test]
    fn test_invalid_config() {
        let mut cfg = LiveGameConfig::default();
        cfg.observation_noise = 0.0;
        assert!(matches!(LiveGameFilter::new(cfg), Err(Error::InvalidConfig(_))));

        let mut cfg = LiveGameConfig::default();
        cfg.game_length_minutes = -48.0;
        assert!(matches!(LiveGameFilter::new(cfg), Err(Error::InvalidConfig(_))));

        let mut cfg = LiveGameConfig::default();
        cfg.home_rating = f64::NAN;
        assert!(matches!(LiveGameFilter::new(cfg), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_score_update_json() {
        let update = ScoreUpdate::new(24.0, 60, 50);
        let json = serde_json::to_string(&update).unwrap();
        assert_eq!(json, r#"{"time":24.0,"home_score":60,"away_score":50}"#);
        let back: ScoreUpdate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, update);
        assert_relative_eq!(back.differential(), 10.0);
    }
}
