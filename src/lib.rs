//! # sports-pf - Particle Filters for Sports Analytics
//!
//! Sequential Monte Carlo state estimation for latent sports quantities.
//!
//! The engine tracks hidden state from noisy, time-ordered observations and
//! keeps a full particle approximation of the posterior at every step.
//!
//! ## Features
//!
//! - Generic SIR particle filter over any `StateSpaceModel`
//! - Systematic, stratified and multinomial resampling
//! - Player performance tracking (latent skill and form from count statistics)
//! - Live game win probability from score updates
//! - ESS diagnostics, checkpoint/restore and a JSON request dispatcher
//!
//! ## Example
//!
//! ```rust,no_run
//! use sports_pf_rs::{LiveGameConfig, LiveGameFilter};
//!
//! let mut game = LiveGameFilter::new(LiveGameConfig::new(5.0, 3.0)).unwrap();
//! let p = game.update_with_score(24.0, 60, 50).unwrap();
//! println!("home win probability: {:.3}", p.home_win_probability);
//! ```

// Public modules
pub mod diagnostics;
pub mod dispatch;
pub mod filter;
pub mod models;
pub mod resampling;
pub mod utils;

// Re-exports for convenience
pub use diagnostics::{effective_sample_size, Diagnostics};
pub use dispatch::{run_request, FilterKind, SportsFilter, TrackingReport, TrackingRequest};
pub use filter::{
    FilterCheckpoint, FilterConfig, FilterStatus, InitialDistribution, ParticleCloud,
    ParticleFilter, StateEstimate, StateSpaceModel,
};
pub use models::{
    Covariates, LiveGameConfig, LiveGameFilter, PlayerEstimate, PlayerFilterConfig,
    PlayerObservation, PlayerPerformanceFilter, ScoreUpdate, WinProbability,
};
pub use resampling::ResamplingStrategy;

// Error types
pub use crate::error::{Error, Result};

mod error {
    use thiserror::Error;

    /// Errors that can occur in the particle filters
    #[derive(Error, Debug)]
    pub enum Error {
        /// Malformed input: weights, state dimensions, out-of-domain or
        /// out-of-order observations.
        #[error("Validation error: {0}")]
        Validation(String),

        /// Operation invoked in the wrong lifecycle state.
        #[error("State error: {0}")]
        State(String),

        /// Weight collapse or non-finite particle values. Fatal for the
        /// filter instance.
        #[error("Numerical error: {0}")]
        Numerical(String),

        #[error("Invalid configuration: {0}")]
        InvalidConfig(String),

        #[error("Serialization error: {0}")]
        Serialization(#[from] serde_json::Error),
    }

    /// Result type for particle filter operations
    pub type Result<T> = std::result::Result<T, Error>;
}
