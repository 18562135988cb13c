//! Entry point binding the collaborators to streams and previews.

use std::sync::Arc;

use crate::config::{SimulationConfig, StreamConfig};
use crate::error::{TrialScopeError, TrialScopeResult, ValidationError};
use crate::experiment::{ExperimentId, ExperimentState, MetricSelector};
use crate::search::{preview_search, PreviewConfig, SearchPreview};
use crate::storage::{Lifecycle, MetricStore};
use crate::stream::{MetricBatchPoller, MetricCatalogPoller};

/// Shared handle used by the transport layer to open streams and previews.
pub struct TrialScopeEngine {
    store: Arc<dyn MetricStore>,
    lifecycle: Arc<dyn Lifecycle>,
    stream_config: StreamConfig,
    simulation_config: SimulationConfig,
}

impl TrialScopeEngine {
    /// Creates an engine with default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn MetricStore>, lifecycle: Arc<dyn Lifecycle>) -> Self {
        Self {
            store,
            lifecycle,
            stream_config: StreamConfig::default(),
            simulation_config: SimulationConfig::default(),
        }
    }

    /// Replaces the stream and simulation settings.
    ///
    /// # Errors
    /// - `InvalidConfig` if either section fails validation
    pub fn with_config(
        mut self,
        stream: StreamConfig,
        simulation: SimulationConfig,
    ) -> Result<Self, ValidationError> {
        stream.validate()?;
        simulation.validate()?;
        self.stream_config = stream;
        self.simulation_config = simulation;
        Ok(self)
    }

    /// Current stream settings.
    #[must_use]
    pub const fn stream_config(&self) -> &StreamConfig {
        &self.stream_config
    }

    /// Opens a metric-name stream for an existing experiment.
    ///
    /// # Errors
    /// - NotFound if the experiment does not exist
    pub fn metric_names_stream(
        &self,
        id: ExperimentId,
    ) -> TrialScopeResult<MetricCatalogPoller> {
        self.check_experiment_exists(id)?;
        Ok(MetricCatalogPoller::new(
            Arc::clone(&self.store),
            Arc::clone(&self.lifecycle),
            id,
        )
        .with_poll_interval(self.stream_config.poll_interval()))
    }

    /// Opens a metric-batch stream for an existing experiment.
    ///
    /// The selector is validated before any store access.
    ///
    /// # Errors
    /// - InvalidArgument unless exactly one metric name is given
    /// - NotFound if the experiment does not exist
    pub fn metric_batches_stream(
        &self,
        id: ExperimentId,
        training: Option<&str>,
        validation: Option<&str>,
    ) -> TrialScopeResult<MetricBatchPoller> {
        let selector = MetricSelector::from_request(training, validation)?;
        self.check_experiment_exists(id)?;
        Ok(MetricBatchPoller::new(
            Arc::clone(&self.store),
            Arc::clone(&self.lifecycle),
            id,
            selector,
        )
        .with_poll_interval(self.stream_config.poll_interval()))
    }

    /// Simulates the configured searcher and groups identical trial plans.
    ///
    /// # Errors
    /// - InvalidArgument for an invalid searcher or hyperparameter definition,
    ///   or when the method emits an unsupported operation
    pub fn preview_search(
        &self,
        config: &PreviewConfig,
        seed: u64,
    ) -> TrialScopeResult<SearchPreview> {
        config.searcher.validate()?;
        let mut method = config.searcher.build();
        preview_search(
            method.as_mut(),
            config.hyperparameters.clone(),
            seed,
            &self.simulation_config,
        )
    }

    fn check_experiment_exists(&self, id: ExperimentId) -> TrialScopeResult<ExperimentState> {
        self.lifecycle
            .state(id)
            .map_err(|e| TrialScopeError::storage(format!("checking if experiment {id} exists"), e))
    }
}
