//! Resampling strategies for weighted particle sets.
//!
//! Each strategy maps a normalized weight vector of length N to N source
//! indices. Particles with large weights are duplicated, particles with
//! negligible weight tend to be dropped, and the resulting set is equally
//! weighted.
//!
//! - [`ResamplingStrategy::Systematic`] - one random offset, N evenly spaced points (default)
//! - [`ResamplingStrategy::Stratified`] - one uniform draw per stratum
//! - [`ResamplingStrategy::Multinomial`] - N independent draws

mod multinomial;
mod stratified;
mod systematic;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use multinomial::{multinomial_resample, multinomial_resample_into};
pub use stratified::{stratified_resample, stratified_resample_into};
pub use systematic::{systematic_resample, systematic_resample_into};

/// Allowed deviation of the weight sum from 1.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Enum-based strategy selection (static dispatch, serializable in configs).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplingStrategy {
    #[default]
    Systematic,
    Multinomial,
    Stratified,
}

impl ResamplingStrategy {
    /// Look up a strategy by its configuration name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "systematic" => Ok(Self::Systematic),
            "multinomial" => Ok(Self::Multinomial),
            "stratified" => Ok(Self::Stratified),
            other => Err(Error::InvalidConfig(format!(
                "Unknown resampling strategy: {}",
                other
            ))),
        }
    }

    /// Configuration name of this strategy.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Systematic => "systematic",
            Self::Multinomial => "multinomial",
            Self::Stratified => "stratified",
        }
    }

    /// Resample into a freshly allocated index vector of length `weights.len()`.
    pub fn resample<R: Rng + ?Sized>(&self, weights: &[f64], rng: &mut R) -> Result<Vec<usize>> {
        let mut out = vec![0; weights.len()];
        self.resample_into(weights, rng, &mut out)?;
        Ok(out)
    }

    /// Resample into a caller-owned index buffer.
    ///
    /// `out` must have the same length as `weights`.
    #[inline]
    pub fn resample_into<R: Rng + ?Sized>(
        &self,
        weights: &[f64],
        rng: &mut R,
        out: &mut [usize],
    ) -> Result<()> {
        match self {
            Self::Systematic => systematic_resample_into(weights, rng, out),
            Self::Multinomial => multinomial_resample_into(weights, rng, out),
            Self::Stratified => stratified_resample_into(weights, rng, out),
        }
    }
}

/// Check that `weights` is a usable probability vector and that `out` can
/// hold one index per weight.
///
/// Returns the index of the last strictly positive weight, which bounds
/// every index a strategy may emit.
pub(crate) fn validate_weights(weights: &[f64], out_len: usize) -> Result<usize> {
    if weights.is_empty() {
        return Err(Error::Validation("weight vector is empty".to_string()));
    }
    if out_len != weights.len() {
        return Err(Error::Validation(format!(
            "index buffer length {} doesn't match {} weights",
            out_len,
            weights.len()
        )));
    }

    let mut sum = 0.0;
    let mut last_positive = None;
    for (i, &w) in weights.iter().enumerate() {
        if w.is_nan() {
            return Err(Error::Validation(format!("weight {} is NaN", i)));
        }
        if w < 0.0 || !w.is_finite() {
            return Err(Error::Validation(format!("weight {} is invalid: {}", i, w)));
        }
        if w > 0.0 {
            last_positive = Some(i);
        }
        sum += w;
    }

    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(Error::Validation(format!(
            "weights must sum to 1, got {}",
            sum
        )));
    }

    // A sum of ~1 guarantees at least one positive weight.
    last_positive.ok_or_else(|| Error::Validation("all weights are zero".to_string()))
}

/// Map sorted positions in [0, 1) onto the cumulative weight distribution
/// with a single pass.
pub(crate) fn walk_sorted_positions<I>(
    weights: &[f64],
    positions: I,
    last_positive: usize,
    out: &mut [usize],
) where
    I: Iterator<Item = f64>,
{
    let last = weights.len() - 1;
    let mut j = 0;
    let mut cumulative = weights[0];
    for (slot, u) in out.iter_mut().zip(positions) {
        while u >= cumulative && j < last {
            j += 1;
            cumulative += weights[j];
        }
        *slot = j.min(last_positive);
    }
}
