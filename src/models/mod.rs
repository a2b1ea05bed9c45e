//! Concrete sports state-space models.
//!
//! This module provides:
//! - `PlayerPerformanceFilter` - latent skill and form from per-game counts
//! - `LiveGameFilter` - score differential and home win probability during a game

mod live_game;
mod player;

pub use live_game::{
    LiveGameConfig, LiveGameFilter, LiveGameModel, ScoreUpdate, WinProbability,
    WinProbabilityMethod,
};
pub use player::{
    Covariates, PlayerEstimate, PlayerFilterConfig, PlayerObservation, PlayerPerformanceFilter,
    PlayerPerformanceModel,
};
