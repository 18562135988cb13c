//! Hyperparameter search previews.
//!
//! `SearchSimulator` drives a pluggable `SearchMethod` in a null environment;
//! `SignatureGrouper` folds the resulting trial plans into groups of
//! identical plans with occurrence counts.

pub mod grouping;
pub mod hparams;
pub mod method;
pub mod operation;
pub mod simulator;

pub use grouping::{Signature, SignatureGrouper, SimulationGroup};
pub use hparams::{Hyperparameter, HyperparameterSpace, Hyperparameters};
pub use method::{
    Length, RawOperation, SearchContext, SearchMethod, SearcherOp, SingleSearch, TrialId, Unit,
};
pub use operation::{Operation, OperationSequence, TrainingUnit};
pub use simulator::{SearchSimulator, Simulation};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SimulationConfig;
use crate::error::{TrialScopeResult, ValidationError};

/// Searcher section of a preview request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum SearcherConfig {
    /// One trial trained for `max_length`.
    Single {
        /// Metric the searcher would optimize.
        metric: String,
        /// Training length of the trial.
        max_length: Length,
    },
}

impl SearcherConfig {
    /// Checks the configuration describes a runnable search.
    ///
    /// # Errors
    /// - `InvalidConfig` for an empty metric name or a zero training length
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Single { metric, .. } if metric.is_empty() => Err(ValidationError::InvalidConfig {
                field: "searcher.metric".to_string(),
                reason: "must not be empty".to_string(),
            }),
            Self::Single { max_length, .. } if max_length.units == 0 => {
                Err(ValidationError::InvalidConfig {
                    field: "searcher.max_length".to_string(),
                    reason: "must be at least one unit".to_string(),
                })
            }
            Self::Single { .. } => Ok(()),
        }
    }

    /// Instantiates the search method this configuration describes.
    #[must_use]
    pub fn build(&self) -> Box<dyn SearchMethod + Send> {
        match self {
            Self::Single { max_length, .. } => Box::new(SingleSearch::new(max_length.clone())),
        }
    }
}

/// Everything a preview needs besides the seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// Which search method to simulate.
    pub searcher: SearcherConfig,
    /// Space the method samples from.
    #[serde(default)]
    pub hyperparameters: HyperparameterSpace,
}

/// Grouped result of a simulated search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchPreview {
    /// Seed the simulation ran with.
    pub seed: u64,
    /// Distinct trial plans in first-seen order.
    pub groups: Vec<SimulationGroup>,
}

/// Simulates `method` with `seed` and groups the trial plans.
///
/// # Errors
/// Any simulation error; no partial grouping is returned.
pub fn preview_search(
    method: &mut dyn SearchMethod,
    space: HyperparameterSpace,
    seed: u64,
    config: &SimulationConfig,
) -> TrialScopeResult<SearchPreview> {
    let simulation = SearchSimulator::new(seed, space)
        .with_config(config)
        .run(method)?;

    let trials = simulation.trials.len();
    let grouper: SignatureGrouper = simulation.trials.into_iter().collect();
    let groups = grouper.into_groups();
    debug!(seed, trials, groups = groups.len(), "search preview grouped");

    Ok(SearchPreview {
        seed: simulation.seed,
        groups,
    })
}
