//! Request routing for the concrete filters.
//!
//! `TrackingRequest` names which filter to build (`player_performance` or
//! `live_game`), its hyperparameters and the observation sequence.
//! `run_request` executes it and returns a `TrackingReport` made of plain
//! value records. `SportsFilter` wraps both filters in one enum so callers
//! holding either kind dispatch statically.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::diagnostics::Diagnostics;
use crate::filter::{EstimateHistory, FilterCheckpoint, StateEstimate};
use crate::models::{
    LiveGameConfig, LiveGameFilter, PlayerEstimate, PlayerFilterConfig, PlayerObservation,
    PlayerPerformanceFilter, ScoreUpdate, WinProbability,
};
use crate::{Error, Result};

/// Which concrete filter a request targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    PlayerPerformance,
    LiveGame,
}

impl FilterKind {
    /// Parse a textual kind (`"player_performance"` or `"live_game"`).
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "player_performance" | "player" => Ok(FilterKind::PlayerPerformance),
            "live_game" | "game" => Ok(FilterKind::LiveGame),
            _ => Err(Error::InvalidConfig(format!(
                "Unknown filter kind '{}'. Available: player_performance, live_game",
                name
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FilterKind::PlayerPerformance => "player_performance",
            FilterKind::LiveGame => "live_game",
        }
    }
}

/// A filter run requested by the dispatcher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackingRequest {
    PlayerPerformance {
        #[serde(default)]
        config: PlayerFilterConfig,
        observations: Vec<PlayerObservation>,
    },
    LiveGame {
        #[serde(default)]
        config: LiveGameConfig,
        updates: Vec<ScoreUpdate>,
    },
}

impl TrackingRequest {
    pub fn kind(&self) -> FilterKind {
        match self {
            TrackingRequest::PlayerPerformance { .. } => FilterKind::PlayerPerformance,
            TrackingRequest::LiveGame { .. } => FilterKind::LiveGame,
        }
    }

    /// Number of observation records carried.
    pub fn len(&self) -> usize {
        match self {
            TrackingRequest::PlayerPerformance { observations, .. } => observations.len(),
            TrackingRequest::LiveGame { updates, .. } => updates.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Everything a reporting layer needs from one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackingReport {
    pub kind: FilterKind,
    /// One entry per processed observation.
    pub estimates: Vec<StateEstimate>,
    /// ESS per step, parallel to `estimates`.
    pub ess_history: Vec<f64>,
    /// 1-based steps at which the population was resampled.
    pub resample_steps: Vec<usize>,
    /// Player-level summaries (player runs only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub player_estimates: Vec<PlayerEstimate>,
    /// Win probability after each score update (game runs only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub win_probabilities: Vec<WinProbability>,
}

impl TrackingReport {
    pub fn resample_count(&self) -> usize {
        self.resample_steps.len()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn from_parts(kind: FilterKind, history: &EstimateHistory, diagnostics: &Diagnostics) -> Self {
        Self {
            kind,
            estimates: history.entries().to_vec(),
            ess_history: diagnostics.ess_history().to_vec(),
            resample_steps: diagnostics.resample_steps().to_vec(),
            player_estimates: Vec::new(),
            win_probabilities: Vec::new(),
        }
    }
}

/// Execute a request from start to finish.
pub fn run_request(request: &TrackingRequest) -> Result<TrackingReport> {
    debug!(kind = request.kind().name(), records = request.len(), "running tracking request");
    match request {
        TrackingRequest::PlayerPerformance {
            config,
            observations,
        } => {
            let mut filter = PlayerPerformanceFilter::new(config.clone())?;
            let player_estimates = filter.track(observations)?;
            Ok(TrackingReport {
                player_estimates,
                ..TrackingReport::from_parts(
                    FilterKind::PlayerPerformance,
                    filter.history(),
                    filter.diagnostics(),
                )
            })
        }
        TrackingRequest::LiveGame { config, updates } => {
            let mut filter = LiveGameFilter::new(config.clone())?;
            let win_probabilities = filter.run(updates)?;
            Ok(TrackingReport {
                win_probabilities,
                ..TrackingReport::from_parts(
                    FilterKind::LiveGame,
                    filter.history(),
                    filter.diagnostics(),
                )
            })
        }
    }
}

/// Parse a JSON request, run it, and encode the report as JSON.
pub fn run_request_json(json: &str) -> Result<String> {
    run_request(&TrackingRequest::from_json(json)?)?.to_json()
}

/// Either concrete filter, for callers that manage a mix of instances.
///
/// Uses enum dispatch instead of a `Box<dyn ...>`.
#[derive(Debug)]
pub enum SportsFilter {
    Player(PlayerPerformanceFilter),
    Game(LiveGameFilter),
}

impl From<PlayerPerformanceFilter> for SportsFilter {
    fn from(filter: PlayerPerformanceFilter) -> Self {
        SportsFilter::Player(filter)
    }
}

impl From<LiveGameFilter> for SportsFilter {
    fn from(filter: LiveGameFilter) -> Self {
        SportsFilter::Game(filter)
    }
}

impl SportsFilter {
    #[inline(always)]
    pub fn kind(&self) -> FilterKind {
        match self {
            SportsFilter::Player(_) => FilterKind::PlayerPerformance,
            SportsFilter::Game(_) => FilterKind::LiveGame,
        }
    }

    #[inline(always)]
    pub fn current(&self) -> Result<StateEstimate> {
        match self {
            SportsFilter::Player(f) => f.inner().estimate(),
            SportsFilter::Game(f) => f.current(),
        }
    }

    #[inline(always)]
    pub fn history(&self) -> &EstimateHistory {
        match self {
            SportsFilter::Player(f) => f.history(),
            SportsFilter::Game(f) => f.history(),
        }
    }

    #[inline(always)]
    pub fn diagnostics(&self) -> &Diagnostics {
        match self {
            SportsFilter::Player(f) => f.diagnostics(),
            SportsFilter::Game(f) => f.diagnostics(),
        }
    }

    #[inline(always)]
    pub fn checkpoint(&self) -> Result<FilterCheckpoint> {
        match self {
            SportsFilter::Player(f) => f.checkpoint(),
            SportsFilter::Game(f) => f.checkpoint(),
        }
    }

    /// Snapshot the run so far as a report.
    pub fn report(&self) -> TrackingReport {
        let base = TrackingReport::from_parts(self.kind(), self.history(), self.diagnostics());
        match self {
            SportsFilter::Player(f) => TrackingReport {
                player_estimates: f.estimates(),
                ..base
            },
            SportsFilter::Game(f) => TrackingReport {
                win_probabilities: f.win_probability_history().to_vec(),
                ..base
            },
        }
    }
}
