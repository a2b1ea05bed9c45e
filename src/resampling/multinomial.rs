//! Multinomial resampling.

use rand::Rng;

use super::validate_weights;
use crate::Result;

/// Multinomial resampling: N independent uniform draws, each mapped through
/// the cumulative weight distribution by binary search. O(N log N).
///
/// Highest variance of the three strategies; mostly useful as a reference.
pub fn multinomial_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Result<Vec<usize>> {
    let mut out = vec![0; weights.len()];
    multinomial_resample_into(weights, rng, &mut out)?;
    Ok(out)
}

/// Multinomial resampling into a caller-owned buffer of length N.
pub fn multinomial_resample_into<R: Rng + ?Sized>(
    weights: &[f64],
    rng: &mut R,
    out: &mut [usize],
) -> Result<()> {
    let last_positive = validate_weights(weights, out.len())?;

    let cumulative: Vec<f64> = weights
        .iter()
        .scan(0.0, |acc, &w| {
            *acc += w;
            Some(*acc)
        })
        .collect();

    for slot in out.iter_mut() {
        let u = rng.gen::<f64>();
        let j = cumulative.partition_point(|&c| c <= u);
        *slot = j.min(last_positive);
    }
    Ok(())
}
