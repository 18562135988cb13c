//! Live stream of the batch indices at which one metric was recorded.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::DEFAULT_POLL_INTERVAL_MS;
use crate::error::{TrialScopeError, TrialScopeResult};
use crate::experiment::{ExperimentId, MetricSelector};
use crate::storage::{Lifecycle, MetricStore};

use super::catalog::terminal;
use super::session::{Delta, SessionReport, StreamSession};

/// One message of a metric-batch stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricBatchesUpdate {
    /// Batch indices not delivered before, in record end-time order.
    pub batches: Vec<i32>,
}

/// Streams the batch indices at which a selected metric was recorded.
///
/// Each poll only asks the store for records newer than the latest end time
/// already observed.
pub struct MetricBatchPoller {
    store: Arc<dyn MetricStore>,
    lifecycle: Arc<dyn Lifecycle>,
    experiment_id: ExperimentId,
    selector: MetricSelector,
    poll_interval: Duration,
}

impl MetricBatchPoller {
    /// Creates a poller for an already validated selector.
    #[must_use]
    pub fn new(
        store: Arc<dyn MetricStore>,
        lifecycle: Arc<dyn Lifecycle>,
        experiment_id: ExperimentId,
        selector: MetricSelector,
    ) -> Self {
        Self {
            store,
            lifecycle,
            experiment_id,
            selector,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    /// Creates a poller from the raw request fields.
    ///
    /// The selector is validated before anything touches the store.
    ///
    /// # Errors
    /// - InvalidArgument unless exactly one of `training` / `validation` is non-empty
    pub fn from_request(
        store: Arc<dyn MetricStore>,
        lifecycle: Arc<dyn Lifecycle>,
        experiment_id: ExperimentId,
        training: Option<&str>,
        validation: Option<&str>,
    ) -> TrialScopeResult<Self> {
        let selector = MetricSelector::from_request(training, validation)?;
        Ok(Self::new(store, lifecycle, experiment_id, selector))
    }

    /// Overrides the delay between polls.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// The metric being watched.
    #[must_use]
    pub const fn selector(&self) -> &MetricSelector {
        &self.selector
    }

    /// Runs the stream until the experiment is terminal or `cancel` fires.
    ///
    /// # Errors
    /// - NotFound if the experiment does not exist
    /// - Internal if a store query fails or `emit` rejects an update
    pub async fn run<E>(
        self,
        cancel: CancellationToken,
        mut emit: E,
    ) -> TrialScopeResult<SessionReport>
    where
        E: FnMut(MetricBatchesUpdate) -> TrialScopeResult<()>,
    {
        let id = self.experiment_id;
        let span = tracing::info_span!(
            "metric_batches_stream",
            experiment = %id,
            metric = %self.selector
        );

        let store = Arc::clone(&self.store);
        let selector = self.selector;
        let fetch = move |since: &DateTime<Utc>| {
            let records = store
                .metric_batches(id, selector.kind(), selector.name(), *since)
                .map_err(|e| {
                    TrialScopeError::storage(
                        format!("fetching batches recorded for {selector} in experiment {id}"),
                        e,
                    )
                })?;
            Ok(Delta {
                items: records.batches,
                watermark: records.watermark.unwrap_or(*since),
            })
        };

        let lifecycle = Arc::clone(&self.lifecycle);
        let is_done = move || terminal(lifecycle.as_ref(), id);

        let session = StreamSession::new(
            "metric_batches",
            DateTime::<Utc>::UNIX_EPOCH,
            fetch,
            is_done,
            self.poll_interval,
            cancel,
        );
        session
            .run(|batches| emit(MetricBatchesUpdate { batches }))
            .instrument(span)
            .await
    }
}
