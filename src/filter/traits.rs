//! State-space model trait used by the particle filter.

use rand::Rng;

use crate::Result;

/// A sequential filtering problem: how the latent state evolves and how it
/// relates to observations.
///
/// The particle filter only ever talks to a model through this trait. A
/// state is a fixed-length slice of `state_dim()` values; the filter owns
/// the storage and hands each particle to the model in place.
pub trait StateSpaceModel {
    /// Observation consumed at each time step.
    type Observation;

    /// Dimension D of the state vector.
    fn state_dim(&self) -> usize;

    /// Propagate one particle forward by `dt` time units, drawing its
    /// process noise from `rng`.
    fn transition<R: Rng + ?Sized>(&self, state: &mut [f64], dt: f64, rng: &mut R);

    /// Log-likelihood of `observation` given the particle `state`.
    ///
    /// `f64::NEG_INFINITY` means the observation is impossible under this
    /// particle. NaN or `+inf` is treated as a numerical failure.
    fn observe_log_likelihood(&self, state: &[f64], observation: &Self::Observation) -> f64;

    /// Timestamp of an observation. Observations must be fed in strictly
    /// increasing time order.
    fn observation_time(&self, observation: &Self::Observation) -> f64;

    /// Elapsed time passed to `transition` between two observations.
    ///
    /// The first observation has no predecessor; by default it advances the
    /// state by one unit.
    fn time_step(&self, previous: Option<f64>, current: f64) -> f64 {
        previous.map_or(1.0, |p| current - p)
    }

    /// Domain checks on an observation before it touches the particles.
    fn validate_observation(&self, _observation: &Self::Observation) -> Result<()> {
        Ok(())
    }
}
