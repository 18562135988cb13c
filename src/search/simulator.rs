//! Runs a search method against a null training environment.
//!
//! Every operation completes instantly. Validations report a metric drawn
//! from the seeded RNG back to the method, which is the only feedback a
//! method receives. Any operation with no preview mapping aborts the whole
//! run; partial results are never returned.

use std::collections::{HashMap, HashSet, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::config::{SimulationConfig, DEFAULT_MAX_SIMULATION_EVENTS};
use crate::error::{ExecutionError, TrialScopeResult};

use super::hparams::HyperparameterSpace;
use super::method::{SearchContext, SearchMethod, SearcherOp, TrialId};
use super::operation::{Operation, OperationSequence};

/// Operation sequences produced by one simulated search, one per trial in
/// creation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Simulation {
    /// Seed the simulation ran with.
    pub seed: u64,
    /// Trial plans, in trial creation order.
    pub trials: Vec<OperationSequence>,
}

/// Deterministic driver for a `SearchMethod`.
#[derive(Debug, Clone)]
pub struct SearchSimulator {
    seed: u64,
    space: HyperparameterSpace,
    max_events: usize,
}

impl SearchSimulator {
    /// Creates a simulator for the given seed and hyperparameter space.
    #[must_use]
    pub fn new(seed: u64, space: HyperparameterSpace) -> Self {
        Self {
            seed,
            space,
            max_events: DEFAULT_MAX_SIMULATION_EVENTS,
        }
    }

    /// Applies simulation limits from configuration.
    #[must_use]
    pub fn with_config(mut self, config: &SimulationConfig) -> Self {
        self.max_events = config.max_events;
        self
    }

    /// Runs `method` until it shuts down or runs out of work.
    ///
    /// # Errors
    /// - InvalidArgument if the space is invalid or the method emits an
    ///   operation or length unit previews cannot express
    /// - `UnknownTrial` if the method addresses a trial it never created
    /// - `DuplicateTrial` or `TrialClosed` if it creates a trial twice or
    ///   keeps addressing a closed one
    /// - `SimulationLimitExceeded` if the method never converges
    pub fn run(&self, method: &mut dyn SearchMethod) -> TrialScopeResult<Simulation> {
        self.space.validate()?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut next_trial = 0u32;
        let mut trials: Vec<OperationSequence> = Vec::new();
        let mut slots: HashMap<TrialId, usize> = HashMap::new();
        let mut closed: HashSet<TrialId> = HashSet::new();

        let mut pending: VecDeque<SearcherOp> = {
            let mut ctx = SearchContext::new(&mut rng, &self.space, &mut next_trial);
            method.initial_operations(&mut ctx).into()
        };

        let mut events = 0usize;
        while let Some(op) = pending.pop_front() {
            events += 1;
            if events > self.max_events {
                return Err(ExecutionError::SimulationLimitExceeded {
                    limit_type: "searcher_events".to_string(),
                    max_value: u64::try_from(self.max_events).unwrap_or(u64::MAX),
                    actual_value: u64::try_from(events).unwrap_or(u64::MAX),
                }
                .into());
            }

            let follow_up = match op {
                SearcherOp::Create { trial, .. } => {
                    if slots.contains_key(&trial) {
                        return Err(ExecutionError::DuplicateTrial { trial }.into());
                    }
                    slots.insert(trial, trials.len());
                    trials.push(OperationSequence::new());
                    Vec::new()
                }
                SearcherOp::Run { trial, op } => {
                    let slot = *slots
                        .get(&trial)
                        .ok_or(ExecutionError::UnknownTrial { trial })?;
                    if closed.contains(&trial) {
                        return Err(ExecutionError::TrialClosed { trial }.into());
                    }
                    let op = Operation::try_from(&op)?;
                    trials[slot].push(op);

                    if op == Operation::Validate {
                        let metric: f64 = rng.gen();
                        let mut ctx = SearchContext::new(&mut rng, &self.space, &mut next_trial);
                        method.validation_completed(&mut ctx, trial, metric)
                    } else {
                        Vec::new()
                    }
                }
                SearcherOp::Close { trial } => {
                    if !slots.contains_key(&trial) {
                        return Err(ExecutionError::UnknownTrial { trial }.into());
                    }
                    if !closed.insert(trial) {
                        return Err(ExecutionError::TrialClosed { trial }.into());
                    }
                    let mut ctx = SearchContext::new(&mut rng, &self.space, &mut next_trial);
                    method.trial_closed(&mut ctx, trial)
                }
                SearcherOp::Shutdown => break,
            };
            pending.extend(follow_up);
        }

        debug!(
            seed = self.seed,
            trials = trials.len(),
            events,
            "search simulation finished"
        );
        Ok(Simulation {
            seed: self.seed,
            trials,
        })
    }
}
