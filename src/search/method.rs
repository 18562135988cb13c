//! Contract between the simulator and a pluggable search method.
//!
//! A search method emits `SearcherOp`s: create a trial, run an operation on
//! it, close it, or end the search. The simulator feeds validation results
//! back through `validation_completed`.

use std::fmt;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

use super::hparams::{HyperparameterSpace, Hyperparameters};
use super::operation::{Operation, TrainingUnit};

/// Identifier of a simulated trial, allocated by `SearchContext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrialId(u32);

impl TrialId {
    /// Wraps a raw trial id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for TrialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Length unit as produced by a search method.
///
/// `Custom` covers units a method may use that trial previews cannot express.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Unit {
    /// Records.
    Records,
    /// Batches.
    Batches,
    /// Epochs.
    Epochs,
    /// Any other unit name.
    Custom(String),
}

impl From<String> for Unit {
    fn from(s: String) -> Self {
        match s.as_str() {
            "records" => Self::Records,
            "batches" => Self::Batches,
            "epochs" => Self::Epochs,
            _ => Self::Custom(s),
        }
    }
}

impl From<Unit> for String {
    fn from(unit: Unit) -> Self {
        match unit {
            Unit::Records => "records".to_string(),
            Unit::Batches => "batches".to_string(),
            Unit::Epochs => "epochs".to_string(),
            Unit::Custom(s) => s,
        }
    }
}

/// A training length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Length {
    /// Unit of measure.
    pub unit: Unit,
    /// Number of units.
    pub units: u64,
}

impl Length {
    /// A length in records.
    #[must_use]
    pub const fn records(units: u64) -> Self {
        Self {
            unit: Unit::Records,
            units,
        }
    }

    /// A length in batches.
    #[must_use]
    pub const fn batches(units: u64) -> Self {
        Self {
            unit: Unit::Batches,
            units,
        }
    }

    /// A length in epochs.
    #[must_use]
    pub const fn epochs(units: u64) -> Self {
        Self {
            unit: Unit::Epochs,
            units,
        }
    }
}

/// An operation as requested by a search method, before preview mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawOperation {
    /// Train for the given length.
    Train {
        /// How long to train.
        length: Length,
    },
    /// Validate.
    Validate,
    /// Checkpoint.
    Checkpoint,
    /// An operation kind with no preview representation.
    Other {
        /// Kind name, for error reporting.
        kind: String,
    },
}

impl TryFrom<&RawOperation> for Operation {
    type Error = ValidationError;

    fn try_from(raw: &RawOperation) -> Result<Self, Self::Error> {
        match raw {
            RawOperation::Train { length } => {
                let unit = match &length.unit {
                    Unit::Records => TrainingUnit::Records,
                    Unit::Batches => TrainingUnit::Batches,
                    Unit::Epochs => TrainingUnit::Epochs,
                    Unit::Custom(unit) => {
                        return Err(ValidationError::UnsupportedLengthUnit { unit: unit.clone() })
                    }
                };
                let count = i32::try_from(length.units)
                    .map_err(|_| ValidationError::LengthOutOfRange { units: length.units })?;
                Ok(Self::Train { unit, count })
            }
            RawOperation::Validate => Ok(Self::Validate),
            RawOperation::Checkpoint => Ok(Self::Checkpoint),
            RawOperation::Other { kind } => Err(ValidationError::UnsupportedOperation {
                operation: kind.clone(),
            }),
        }
    }
}

/// An instruction from a search method to the simulator.
#[derive(Debug, Clone, PartialEq)]
pub enum SearcherOp {
    /// Start a trial with the given hyperparameters.
    Create {
        /// Trial id obtained from `SearchContext::create_trial`.
        trial: TrialId,
        /// Sampled hyperparameters.
        hparams: Hyperparameters,
    },
    /// Run one operation on a trial.
    Run {
        /// Target trial.
        trial: TrialId,
        /// Operation to run.
        op: RawOperation,
    },
    /// The trial will receive no more work.
    Close {
        /// Trial to close.
        trial: TrialId,
    },
    /// The search is finished.
    Shutdown,
}

/// Seeded state a search method may draw on.
pub struct SearchContext<'a> {
    rng: &'a mut StdRng,
    space: &'a HyperparameterSpace,
    next_trial: &'a mut u32,
}

impl<'a> SearchContext<'a> {
    pub(crate) fn new(
        rng: &'a mut StdRng,
        space: &'a HyperparameterSpace,
        next_trial: &'a mut u32,
    ) -> Self {
        Self {
            rng,
            space,
            next_trial,
        }
    }

    /// Allocates a trial id and samples its hyperparameters.
    ///
    /// Returns the id together with the `SearcherOp::Create` to emit for it.
    pub fn create_trial(&mut self) -> (TrialId, SearcherOp) {
        let trial = TrialId(*self.next_trial);
        *self.next_trial += 1;
        let hparams = self.space.sample(&mut *self.rng);
        (trial, SearcherOp::Create { trial, hparams })
    }

    /// The seeded random source shared by the whole simulation.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut *self.rng
    }
}

/// A deterministic hyperparameter search algorithm.
///
/// Implementations must derive all randomness from `SearchContext::rng` so a
/// given seed reproduces the same operations.
pub trait SearchMethod {
    /// Operations issued when the search starts.
    fn initial_operations(&mut self, ctx: &mut SearchContext<'_>) -> Vec<SearcherOp>;

    /// Called after a trial finished a validation with the given metric.
    fn validation_completed(
        &mut self,
        ctx: &mut SearchContext<'_>,
        trial: TrialId,
        metric: f64,
    ) -> Vec<SearcherOp>;

    /// Called after a trial was closed.
    fn trial_closed(&mut self, _ctx: &mut SearchContext<'_>, _trial: TrialId) -> Vec<SearcherOp> {
        Vec::new()
    }
}

/// Trains one trial for a fixed length, then validates and checkpoints it.
#[derive(Debug, Clone)]
pub struct SingleSearch {
    max_length: Length,
}

impl SingleSearch {
    /// Creates the method.
    #[must_use]
    pub const fn new(max_length: Length) -> Self {
        Self { max_length }
    }
}

impl SearchMethod for SingleSearch {
    fn initial_operations(&mut self, ctx: &mut SearchContext<'_>) -> Vec<SearcherOp> {
        let (trial, create) = ctx.create_trial();
        vec![
            create,
            SearcherOp::Run {
                trial,
                op: RawOperation::Train {
                    length: self.max_length.clone(),
                },
            },
            SearcherOp::Run {
                trial,
                op: RawOperation::Validate,
            },
        ]
    }

    fn validation_completed(
        &mut self,
        _ctx: &mut SearchContext<'_>,
        trial: TrialId,
        _metric: f64,
    ) -> Vec<SearcherOp> {
        vec![
            SearcherOp::Run {
                trial,
                op: RawOperation::Checkpoint,
            },
            SearcherOp::Close { trial },
            SearcherOp::Shutdown,
        ]
    }
}
