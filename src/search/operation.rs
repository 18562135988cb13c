//! Simulated trial operations.

use serde::{Deserialize, Serialize};

/// Unit in which a training step's length is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingUnit {
    /// Individual input records.
    Records,
    /// Mini-batches.
    Batches,
    /// Full passes over the training set.
    Epochs,
}

/// One unit of simulated trial work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Train for `count` units.
    Train {
        /// Length unit.
        unit: TrainingUnit,
        /// Number of units.
        count: i32,
    },
    /// Compute validation metrics.
    Validate,
    /// Persist a checkpoint.
    Checkpoint,
}

impl Operation {
    /// Shorthand for a training step.
    #[must_use]
    pub const fn train(unit: TrainingUnit, count: i32) -> Self {
        Self::Train { unit, count }
    }
}

/// The ordered execution plan of one simulated trial.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationSequence(Vec<Operation>);

impl OperationSequence {
    /// An empty sequence.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends an operation.
    pub fn push(&mut self, op: Operation) {
        self.0.push(op);
    }

    /// The operations in execution order.
    #[must_use]
    pub fn operations(&self) -> &[Operation] {
        &self.0
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the trial never ran anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Operation>> for OperationSequence {
    fn from(ops: Vec<Operation>) -> Self {
        Self(ops)
    }
}

impl FromIterator<Operation> for OperationSequence {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
