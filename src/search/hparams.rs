//! Hyperparameter spaces and seeded sampling.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// A concrete hyperparameter assignment for one trial.
pub type Hyperparameters = BTreeMap<String, Value>;

/// Definition of a single hyperparameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Hyperparameter {
    /// A fixed value.
    Const {
        /// The value.
        val: Value,
    },
    /// Uniform integer in `[minval, maxval]`.
    Int {
        /// Inclusive lower bound.
        minval: i64,
        /// Inclusive upper bound.
        maxval: i64,
    },
    /// Uniform float in `[minval, maxval)`.
    Double {
        /// Lower bound.
        minval: f64,
        /// Upper bound.
        maxval: f64,
    },
    /// `base` raised to a uniform exponent in `[minval, maxval)`.
    Log {
        /// Lower exponent.
        minval: f64,
        /// Upper exponent.
        maxval: f64,
        /// Base of the exponent.
        base: f64,
    },
    /// One of a fixed list of values.
    Categorical {
        /// Candidate values.
        vals: Vec<Value>,
    },
}

impl Hyperparameter {
    fn validate(&self, name: &str) -> Result<(), ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidHyperparameter {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        match self {
            Self::Const { .. } => Ok(()),
            Self::Int { minval, maxval } if minval > maxval => {
                Err(invalid("minval exceeds maxval"))
            }
            Self::Double { minval, maxval } | Self::Log { minval, maxval, .. }
                if !(minval < maxval && (maxval - minval).is_finite()) =>
            {
                Err(invalid("bounds must be finite with minval < maxval"))
            }
            Self::Log { base, .. } if !(base.is_finite() && *base > 0.0) => {
                Err(invalid("base must be positive"))
            }
            Self::Log {
                minval,
                maxval,
                base,
            } if !(base.powf(*minval).is_finite() && base.powf(*maxval).is_finite()) => {
                Err(invalid("base raised to the bounds must be finite"))
            }
            Self::Categorical { vals } if vals.is_empty() => {
                Err(invalid("no values to choose from"))
            }
            _ => Ok(()),
        }
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Value {
        match self {
            Self::Const { val } => val.clone(),
            Self::Int { minval, maxval } => Value::from(rng.gen_range(*minval..=*maxval)),
            Self::Double { minval, maxval } => Value::from(rng.gen_range(*minval..*maxval)),
            Self::Log {
                minval,
                maxval,
                base,
            } => Value::from(base.powf(rng.gen_range(*minval..*maxval))),
            Self::Categorical { vals } => vals.choose(rng).cloned().unwrap_or(Value::Null),
        }
    }
}

/// Named hyperparameter definitions, sampled in name order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HyperparameterSpace(BTreeMap<String, Hyperparameter>);

impl HyperparameterSpace {
    /// An empty space.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a definition.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, hp: Hyperparameter) -> Self {
        self.0.insert(name.into(), hp);
        self
    }

    /// Checks every definition can be sampled.
    ///
    /// # Errors
    /// - `InvalidHyperparameter` naming the first definition with unusable bounds
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.0.iter().try_for_each(|(name, hp)| hp.validate(name))
    }

    /// Draws one assignment.
    ///
    /// # Panics
    /// Panics inside `rand` on ranges `validate` rejects; validate first.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Hyperparameters {
        self.0
            .iter()
            .map(|(name, hp)| (name.clone(), hp.sample(rng)))
            .collect()
    }
}
