//! Particle storage, initial distributions and particle cloud snapshots.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::diagnostics::effective_sample_size;
use crate::resampling::ResamplingStrategy;
use crate::utils::weighted_credible_interval;
use crate::{Error, Result};

/// Natural log of `f64::MIN_POSITIVE`. A likelihood below this underflows
/// to zero in linear space.
pub const LIKELIHOOD_UNDERFLOW_LOG: f64 = -708.396_418_532_264_1;

/// Distribution the initial particle population is drawn from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InitialDistribution {
    /// Every particle starts at the same state.
    Point { state: DVector<f64> },
    /// Independent Gaussian per dimension.
    Diagonal {
        mean: DVector<f64>,
        std_dev: DVector<f64>,
    },
    /// Multivariate Gaussian with full covariance (sampled via Cholesky).
    Gaussian {
        mean: DVector<f64>,
        covariance: DMatrix<f64>,
    },
    /// Explicit particle states, one row per particle (N x D).
    Particles { states: DMatrix<f64> },
}

impl InitialDistribution {
    /// Draw `n` states of dimension `dim`, one column per particle.
    pub(crate) fn sample<R: Rng + ?Sized>(
        &self,
        dim: usize,
        n: usize,
        rng: &mut R,
    ) -> Result<DMatrix<f64>> {
        let states = match self {
            InitialDistribution::Point { state } => {
                check_len("state", state.len(), dim)?;
                DMatrix::from_fn(dim, n, |d, _| state[d])
            }
            InitialDistribution::Diagonal { mean, std_dev } => {
                check_len("mean", mean.len(), dim)?;
                check_len("std_dev", std_dev.len(), dim)?;
                if std_dev.iter().any(|s| !s.is_finite() || *s < 0.0) {
                    return Err(Error::Validation(
                        "std_dev entries must be non-negative and finite".to_string(),
                    ));
                }
                DMatrix::from_fn(dim, n, |d, _| {
                    let z: f64 = rng.sample(StandardNormal);
                    mean[d] + std_dev[d] * z
                })
            }
            InitialDistribution::Gaussian { mean, covariance } => {
                check_len("mean", mean.len(), dim)?;
                if covariance.shape() != (dim, dim) {
                    return Err(Error::Validation(format!(
                        "covariance must be {}x{}, got {}x{}",
                        dim,
                        dim,
                        covariance.nrows(),
                        covariance.ncols()
                    )));
                }
                let chol = covariance.clone().cholesky().ok_or_else(|| {
                    Error::Validation("covariance is not positive definite".to_string())
                })?;
                let l = chol.l();
                let z = DMatrix::from_fn(dim, n, |_, _| rng.sample::<f64, _>(StandardNormal));
                let mut states = l * z;
                for mut column in states.column_iter_mut() {
                    column += mean;
                }
                states
            }
            InitialDistribution::Particles { states } => {
                if states.shape() != (n, dim) {
                    return Err(Error::Validation(format!(
                        "explicit particles must be {}x{}, got {}x{}",
                        n,
                        dim,
                        states.nrows(),
                        states.ncols()
                    )));
                }
                states.transpose()
            }
        };

        if states.iter().any(|v| !v.is_finite()) {
            return Err(Error::Validation(
                "initial distribution produced non-finite states".to_string(),
            ));
        }
        Ok(states)
    }
}

fn check_len(name: &str, got: usize, dim: usize) -> Result<()> {
    if got != dim {
        return Err(Error::Validation(format!(
            "{} has dimension {}, expected {}",
            name, got, dim
        )));
    }
    Ok(())
}

/// Owned copy of a particle population.
///
/// `states` holds one row per particle (N x D); `weights` are normalized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticleCloud {
    pub states: DMatrix<f64>,
    pub weights: DVector<f64>,
}

impl ParticleCloud {
    /// Number of particles N.
    pub fn len(&self) -> usize {
        self.states.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.states.nrows() == 0
    }

    /// State dimension D.
    pub fn state_dim(&self) -> usize {
        self.states.ncols()
    }

    /// Values of dimension `d` across all particles.
    pub fn component(&self, d: usize) -> Vec<f64> {
        self.states.column(d).iter().copied().collect()
    }

    /// Weighted mean of dimension `d`.
    pub fn weighted_mean(&self, d: usize) -> f64 {
        self.states.column(d).dot(&self.weights)
    }

    /// Total weight of the particles satisfying `predicate`.
    pub fn probability<F>(&self, mut predicate: F) -> f64
    where
        F: FnMut(&[f64]) -> bool,
    {
        let dim = self.state_dim();
        let mut row = vec![0.0; dim];
        let mut total = 0.0;
        for (i, &w) in self.weights.iter().enumerate() {
            for (d, slot) in row.iter_mut().enumerate() {
                *slot = self.states[(i, d)];
            }
            if predicate(&row) {
                total += w;
            }
        }
        total
    }

    /// ESS of the cloud weights.
    pub fn ess(&self) -> f64 {
        effective_sample_size(self.weights.as_slice())
    }
}

/// Fixed-size particle buffer owned by a filter.
///
/// States are stored D x N (column-major), so each particle is a contiguous
/// `D`-slice of the backing storage. All buffers are allocated once and
/// reused for the lifetime of the filter.
#[derive(Clone, Debug)]
pub(crate) struct ParticleSet {
    states: DMatrix<f64>,
    weights: DVector<f64>,
    scratch: DMatrix<f64>,
    indices: Vec<usize>,
    log_weights: Vec<f64>,
}

impl ParticleSet {
    /// Wrap a D x N state matrix with uniform weights.
    pub fn uniform(states: DMatrix<f64>) -> Self {
        let n = states.ncols();
        let weights = DVector::from_element(n, 1.0 / n as f64);
        Self::with_weights(states, weights)
    }

    /// Wrap a D x N state matrix with the given (already validated) weights.
    pub fn with_weights(states: DMatrix<f64>, weights: DVector<f64>) -> Self {
        let (dim, n) = states.shape();
        Self {
            scratch: DMatrix::zeros(dim, n),
            indices: vec![0; n],
            log_weights: vec![0.0; n],
            states,
            weights,
        }
    }

    pub fn len(&self) -> usize {
        self.states.ncols()
    }

    pub fn dim(&self) -> usize {
        self.states.nrows()
    }

    #[cfg(test)]
    pub fn weights(&self) -> &[f64] {
        self.weights.as_slice()
    }

    /// Particle states as contiguous `D`-slices.
    pub fn iter_states(&self) -> std::slice::ChunksExact<'_, f64> {
        let dim = self.dim();
        self.states.as_slice().chunks_exact(dim)
    }

    pub fn iter_states_mut(&mut self) -> std::slice::ChunksExactMut<'_, f64> {
        let dim = self.dim();
        self.states.as_mut_slice().chunks_exact_mut(dim)
    }

    pub fn all_finite(&self) -> bool {
        self.states.iter().all(|v| v.is_finite())
    }

    /// Multiply each weight by the particle's likelihood and renormalize.
    ///
    /// Works in the log domain with max-subtraction. Fails with `Numerical`
    /// when every particle's likelihood would underflow to zero, i.e. the
    /// best log-likelihood is below [`LIKELIHOOD_UNDERFLOW_LOG`]. Weights are
    /// left untouched when an error is returned.
    pub fn reweight<F>(&mut self, mut log_likelihood: F) -> Result<()>
    where
        F: FnMut(&[f64]) -> f64,
    {
        let dim = self.dim();
        let mut max = f64::NEG_INFINITY;
        let mut best_ll = f64::NEG_INFINITY;
        for ((lw, state), &w) in self
            .log_weights
            .iter_mut()
            .zip(self.states.as_slice().chunks_exact(dim))
            .zip(self.weights.iter())
        {
            let ll = log_likelihood(state);
            if ll.is_nan() || ll == f64::INFINITY {
                return Err(Error::Numerical(format!(
                    "observation log-likelihood is not a number: {}",
                    ll
                )));
            }
            best_ll = best_ll.max(ll);
            *lw = w.ln() + ll;
            if *lw > max {
                max = *lw;
            }
        }

        if best_ll < LIKELIHOOD_UNDERFLOW_LOG {
            return Err(Error::Numerical(format!(
                "total weight collapsed to zero: best observation log-likelihood {} underflows",
                best_ll
            )));
        }
        if !max.is_finite() {
            return Err(Error::Numerical(
                "total weight collapsed to zero: every particle assigns zero likelihood to the observation"
                    .to_string(),
            ));
        }

        let mut total = 0.0;
        for (w, &lw) in self.weights.iter_mut().zip(&self.log_weights) {
            *w = (lw - max).exp();
            total += *w;
        }
        // The maximal particle contributes exp(0) = 1, so total >= 1.
        self.weights /= total;
        Ok(())
    }

    pub fn ess(&self) -> f64 {
        effective_sample_size(self.weights.as_slice())
    }

    /// Replace the population by a resampled copy and reset weights to 1/N.
    pub fn resample<R: Rng + ?Sized>(
        &mut self,
        strategy: ResamplingStrategy,
        rng: &mut R,
    ) -> Result<()> {
        strategy.resample_into(self.weights.as_slice(), rng, &mut self.indices)?;

        let dim = self.dim();
        let source = self.states.as_slice();
        for (dst, &src) in self
            .scratch
            .as_mut_slice()
            .chunks_exact_mut(dim)
            .zip(&self.indices)
        {
            dst.copy_from_slice(&source[src * dim..(src + 1) * dim]);
        }
        std::mem::swap(&mut self.states, &mut self.scratch);

        let n = self.len();
        self.weights.fill(1.0 / n as f64);
        Ok(())
    }

    /// Weighted mean (length D).
    pub fn mean(&self) -> DVector<f64> {
        &self.states * &self.weights
    }

    /// Weighted per-dimension variance (length D).
    pub fn variance(&self) -> DVector<f64> {
        let mean = self.mean();
        let mut variance = DVector::zeros(self.dim());
        for (state, &w) in self.iter_states().zip(self.weights.iter()) {
            for (d, &x) in state.iter().enumerate() {
                let c = x - mean[d];
                variance[d] += w * c * c;
            }
        }
        variance
    }

    /// Weighted covariance (D x D).
    pub fn covariance(&self) -> DMatrix<f64> {
        let mean = self.mean();
        let mut centered = self.states.clone();
        for mut column in centered.column_iter_mut() {
            column -= &mean;
        }
        let mut weighted = centered.clone();
        for (mut column, &w) in weighted.column_iter_mut().zip(self.weights.iter()) {
            column *= w;
        }
        weighted * centered.transpose()
    }

    /// Equal-tailed weighted credible interval per dimension.
    pub fn credible_intervals(&self, level: f64) -> Vec<(f64, f64)> {
        let weights = self.weights.as_slice();
        (0..self.dim())
            .map(|d| {
                let values: Vec<f64> = self.states.row(d).iter().copied().collect();
                weighted_credible_interval(&values, weights, level).unwrap_or((f64::NAN, f64::NAN))
            })
            .collect()
    }

    /// Owned copy of the current population.
    pub fn cloud(&self) -> ParticleCloud {
        ParticleCloud {
            states: self.states.transpose(),
            weights: self.weights.clone(),
        }
    }

    /// Copy of the D x N state buffer, for forward projection.
    pub fn states_copy(&self) -> DMatrix<f64> {
        self.states.clone()
    }

    pub fn weights_copy(&self) -> DVector<f64> {
        self.weights.clone()
    }
}
