//! Stratified resampling.

use rand::Rng;

use super::{validate_weights, walk_sorted_positions};
use crate::Result;

/// Stratified resampling.
///
/// Splits [0, 1) into N equal strata and draws one uniform point in each.
pub fn stratified_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Result<Vec<usize>> {
    let mut out = vec![0; weights.len()];
    stratified_resample_into(weights, rng, &mut out)?;
    Ok(out)
}

/// Stratified resampling into a caller-owned buffer of length N.
pub fn stratified_resample_into<R: Rng + ?Sized>(
    weights: &[f64],
    rng: &mut R,
    out: &mut [usize],
) -> Result<()> {
    let last_positive = validate_weights(weights, out.len())?;
    let n = weights.len();
    let step = 1.0 / n as f64;

    // Points stay sorted because each one is confined to its own stratum.
    let positions = (0..n).map(|i| (i as f64 + rng.gen::<f64>()) * step);
    walk_sorted_positions(weights, positions, last_positive, out);
    Ok(())
}
