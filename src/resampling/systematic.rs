//! Systematic (minimum variance) resampling.

use rand::Rng;

use super::{validate_weights, walk_sorted_positions};
use crate::Result;

/// Systematic resampling.
///
/// Draws a single offset `u0` in [0, 1/N) and uses the N points
/// `u0 + i/N`, walking the cumulative weights once. O(N).
pub fn systematic_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Result<Vec<usize>> {
    let mut out = vec![0; weights.len()];
    systematic_resample_into(weights, rng, &mut out)?;
    Ok(out)
}

/// Systematic resampling into a caller-owned buffer of length N.
pub fn systematic_resample_into<R: Rng + ?Sized>(
    weights: &[f64],
    rng: &mut R,
    out: &mut [usize],
) -> Result<()> {
    let last_positive = validate_weights(weights, out.len())?;
    let n = weights.len();
    let step = 1.0 / n as f64;
    let u0 = rng.gen::<f64>() * step;

    walk_sorted_positions(
        weights,
        (0..n).map(|i| u0 + i as f64 * step),
        last_positive,
        out,
    );
    Ok(())
}
