//! Live stream of metric names recorded for an experiment.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::DEFAULT_POLL_INTERVAL_MS;
use crate::error::{TrialScopeError, TrialScopeResult};
use crate::experiment::{ExperimentId, MetricKind};
use crate::storage::{Lifecycle, MetricStore};

use super::session::{Delta, SessionReport, StreamSession};

/// One message of a metric-name stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricNamesUpdate {
    /// The searcher's target metric; only set on the first update.
    pub searcher_metric: String,
    /// Training metric names not delivered before.
    pub training: Vec<String>,
    /// Validation metric names not delivered before.
    pub validation: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CatalogEntry {
    kind: MetricKind,
    name: String,
}

/// Streams training and validation metric names as they first appear.
pub struct MetricCatalogPoller {
    store: Arc<dyn MetricStore>,
    lifecycle: Arc<dyn Lifecycle>,
    experiment_id: ExperimentId,
    poll_interval: Duration,
}

impl MetricCatalogPoller {
    /// Creates a poller using the default poll interval.
    #[must_use]
    pub fn new(
        store: Arc<dyn MetricStore>,
        lifecycle: Arc<dyn Lifecycle>,
        experiment_id: ExperimentId,
    ) -> Self {
        Self {
            store,
            lifecycle,
            experiment_id,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    /// Overrides the delay between polls.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
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
        E: FnMut(MetricNamesUpdate) -> TrialScopeResult<()>,
    {
        let id = self.experiment_id;
        let span = tracing::info_span!("metric_names_stream", experiment = %id);

        let mut searcher_metric = Some(self.store.searcher_metric(id).map_err(|e| {
            TrialScopeError::storage(format!("fetching searcher metric for experiment {id}"), e)
        })?);

        let store = Arc::clone(&self.store);
        let fetch = move |_: &()| {
            let names = store.metric_names(id).map_err(|e| {
                TrialScopeError::storage(format!("fetching metric names for experiment {id}"), e)
            })?;
            let training = names.training.into_iter().map(|name| CatalogEntry {
                kind: MetricKind::Training,
                name,
            });
            let validation = names.validation.into_iter().map(|name| CatalogEntry {
                kind: MetricKind::Validation,
                name,
            });
            Ok(Delta::unbounded(training.chain(validation).collect()))
        };

        let lifecycle = Arc::clone(&self.lifecycle);
        let is_done = move || terminal(lifecycle.as_ref(), id);

        let session =
            StreamSession::new("metric_names", (), fetch, is_done, self.poll_interval, cancel);
        session
            .run(|entries| {
                let mut update = MetricNamesUpdate {
                    searcher_metric: searcher_metric.take().unwrap_or_default(),
                    ..MetricNamesUpdate::default()
                };
                for entry in entries {
                    match entry.kind {
                        MetricKind::Training => update.training.push(entry.name),
                        MetricKind::Validation => update.validation.push(entry.name),
                    }
                }
                emit(update)
            })
            .instrument(span)
            .await
    }
}

/// Reads the lifecycle state and reports whether it is terminal.
pub(crate) fn terminal(lifecycle: &dyn Lifecycle, id: ExperimentId) -> TrialScopeResult<bool> {
    lifecycle
        .state(id)
        .map(|state| state.is_terminal())
        .map_err(|e| TrialScopeError::storage(format!("fetching state of experiment {id}"), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;

    use crate::experiment::ExperimentState;
    use crate::storage::{InMemoryStore, MetricRecord};

    #[tokio::test(start_paused = true)]
    async fn completed_experiment_yields_single_update_with_searcher_metric() {
        let store = Arc::new(InMemoryStore::new());
        let id = ExperimentId::new(4);
        store.create_experiment(id, "validation_error").unwrap();
        store
            .record(id, MetricRecord::training(100, Utc::now(), ["loss"]))
            .unwrap();
        store
            .record(id, MetricRecord::validation(100, Utc::now(), ["validation_error"]))
            .unwrap();
        store.set_state(id, ExperimentState::Completed).unwrap();

        let poller = MetricCatalogPoller::new(store.clone(), store.clone(), id);
        let mut updates = Vec::new();
        poller
            .run(CancellationToken::new(), |u| {
                updates.push(u);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(
            updates,
            vec![MetricNamesUpdate {
                searcher_metric: "validation_error".to_string(),
                training: vec!["loss".to_string()],
                validation: vec!["validation_error".to_string()],
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_experiment_fails_before_emitting() {
        let store = Arc::new(InMemoryStore::new());
        let poller = MetricCatalogPoller::new(store.clone(), store, ExperimentId::new(77));

        let mut updates = 0;
        let err = poller
            .run(CancellationToken::new(), |_| {
                updates += 1;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(updates, 0);
    }
}
