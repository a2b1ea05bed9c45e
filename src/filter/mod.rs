//! Generic particle filter.
//!
//! This module provides:
//! - `StateSpaceModel` - transition/observation capability a concrete model implements
//! - `ParticleFilter` - predict/update/resample engine over any `StateSpaceModel`
//! - `InitialDistribution`, `ParticleCloud` - initial sampling and owned particle copies
//! - `StateEstimate`, `EstimateHistory` - frozen per-step summaries
//! - `FilterCheckpoint` - serializable snapshot for suspend/resume

mod checkpoint;
mod estimate;
mod particle_filter;
mod particles;
mod traits;

pub use checkpoint::FilterCheckpoint;
pub use estimate::{EstimateHistory, StateEstimate};
pub use particle_filter::{FilterConfig, FilterStatus, ParticleFilter, UpdateOutcome};
pub use particles::{InitialDistribution, ParticleCloud, LIKELIHOOD_UNDERFLOW_LOG};
pub use traits::StateSpaceModel;
