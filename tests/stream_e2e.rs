//! End-to-end tests for metric streams against the in-memory store.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

use trialscope::config::{SimulationConfig, StreamConfig};
use trialscope::engine::TrialScopeEngine;
use trialscope::storage::{
    BatchRecords, InMemoryStore, Lifecycle, MetricNames, MetricRecord, MetricStore, StorageError,
};
use trialscope::{ExperimentId, ExperimentState, MetricKind, SessionOutcome};

const INTERVAL: Duration = Duration::from_secs(1);

fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

type Step = Box<dyn FnOnce(&InMemoryStore) + Send>;

/// Wraps the in-memory store and applies one scripted mutation right before
/// each metric query, so every poll sees a known store state.
struct Scripted {
    inner: Arc<InMemoryStore>,
    steps: Mutex<VecDeque<Step>>,
    since: Mutex<Vec<DateTime<Utc>>>,
}

impl Scripted {
    fn new(inner: Arc<InMemoryStore>, steps: Vec<Step>) -> Self {
        Self {
            inner,
            steps: Mutex::new(steps.into()),
            since: Mutex::new(Vec::new()),
        }
    }

    fn advance(&self) {
        let step = self.steps.lock().unwrap().pop_front();
        if let Some(step) = step {
            step(&self.inner);
        }
    }
}

impl MetricStore for Scripted {
    fn metric_names(&self, experiment: ExperimentId) -> Result<MetricNames, StorageError> {
        self.advance();
        self.inner.metric_names(experiment)
    }

    fn metric_batches(
        &self,
        experiment: ExperimentId,
        kind: MetricKind,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<BatchRecords, StorageError> {
        self.advance();
        self.since.lock().unwrap().push(since);
        self.inner.metric_batches(experiment, kind, name, since)
    }

    fn searcher_metric(&self, experiment: ExperimentId) -> Result<String, StorageError> {
        self.inner.searcher_metric(experiment)
    }
}

fn engine(store: Arc<dyn MetricStore>, lifecycle: Arc<dyn Lifecycle>) -> TrialScopeEngine {
    TrialScopeEngine::new(store, lifecycle)
        .with_config(StreamConfig::with_poll_interval(INTERVAL), SimulationConfig::default())
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn names_stream_delivers_new_names_then_ends() {
    let memory = Arc::new(InMemoryStore::new());
    let id = ExperimentId::new(1);
    memory.create_experiment(id, "validation_error").unwrap();

    let steps: Vec<Step> = vec![
        Box::new(move |s| {
            s.record(id, MetricRecord::training(100, t(1), ["loss"])).unwrap();
        }),
        Box::new(move |s| {
            s.record(id, MetricRecord::training(200, t(2), ["loss", "acc"]))
                .unwrap();
            s.set_state(id, ExperimentState::Completed).unwrap();
        }),
    ];
    let scripted = Arc::new(Scripted::new(memory.clone(), steps));
    let engine = engine(scripted, memory);

    let mut updates = Vec::new();
    let report = engine
        .metric_names_stream(id)
        .unwrap()
        .run(CancellationToken::new(), |u| {
            updates.push(u);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].searcher_metric, "validation_error");
    assert_eq!(updates[0].training, vec!["loss".to_string()]);
    assert_eq!(updates[1].searcher_metric, "");
    assert_eq!(updates[1].training, vec!["acc".to_string()]);
    assert!(updates.iter().all(|u| u.validation.is_empty()));
}

#[tokio::test(start_paused = true)]
async fn batches_stream_advances_watermark() {
    let memory = Arc::new(InMemoryStore::new());
    let id = ExperimentId::new(2);
    memory.create_experiment(id, "loss").unwrap();

    let steps: Vec<Step> = vec![
        Box::new(move |s| {
            s.record(id, MetricRecord::training(100, t(10), ["loss"])).unwrap();
            s.record(id, MetricRecord::training(200, t(20), ["loss"])).unwrap();
            s.record(id, MetricRecord::validation(200, t(21), ["loss"]))
                .unwrap();
        }),
        Box::new(|_| {}),
        Box::new(move |s| {
            s.record(id, MetricRecord::training(300, t(30), ["loss"])).unwrap();
            s.set_state(id, ExperimentState::Completed).unwrap();
        }),
    ];
    let scripted = Arc::new(Scripted::new(memory.clone(), steps));
    let engine = engine(scripted.clone(), memory);

    let mut updates = Vec::new();
    engine
        .metric_batches_stream(id, Some("loss"), None)
        .unwrap()
        .run(CancellationToken::new(), |u| {
            updates.push(u.batches);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(updates, vec![vec![100, 200], vec![], vec![300]]);
    assert_eq!(
        *scripted.since.lock().unwrap(),
        vec![DateTime::<Utc>::UNIX_EPOCH, t(20), t(20)]
    );
}

#[tokio::test(start_paused = true)]
async fn invalid_selector_never_touches_the_store() {
    let memory = Arc::new(InMemoryStore::new());
    let id = ExperimentId::new(3);
    memory.create_experiment(id, "loss").unwrap();
    let engine = engine(memory.clone(), memory.clone());

    let both = engine
        .metric_batches_stream(id, Some("loss"), Some("validation_error"))
        .err()
        .unwrap();
    assert!(both.is_validation());

    let neither = engine
        .metric_batches_stream(id, Some(""), Some(""))
        .err()
        .unwrap();
    assert!(neither.is_validation());

    assert_eq!(memory.query_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn terminal_experiment_emits_at_most_one_more_update() {
    let memory = Arc::new(InMemoryStore::new());
    let id = ExperimentId::new(4);
    memory.create_experiment(id, "loss").unwrap();
    memory
        .record(id, MetricRecord::training(50, t(5), ["loss"]))
        .unwrap();
    memory.set_state(id, ExperimentState::Canceled).unwrap();
    let engine = engine(memory.clone(), memory);

    let started = tokio::time::Instant::now();
    let mut updates = Vec::new();
    let report = engine
        .metric_batches_stream(id, Some("loss"), None)
        .unwrap()
        .run(CancellationToken::new(), |u| {
            updates.push(u.batches);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(updates, vec![vec![50]]);
    assert_eq!(report.polls, 1);
    assert!(started.elapsed() < INTERVAL);
}

#[tokio::test(start_paused = true)]
async fn cancelling_one_session_leaves_others_running() {
    let memory = Arc::new(InMemoryStore::new());
    let id = ExperimentId::new(5);
    memory.create_experiment(id, "loss").unwrap();
    let engine = engine(memory.clone(), memory.clone());

    let spawn = |cancel: CancellationToken| {
        let poller = engine.metric_names_stream(id).unwrap();
        tokio::spawn(async move {
            let mut emitted = 0usize;
            let report = poller
                .run(cancel, |_| {
                    emitted += 1;
                    Ok(())
                })
                .await;
            (report.unwrap(), emitted)
        })
    };

    let first = CancellationToken::new();
    let a = spawn(first.clone());
    let b = spawn(CancellationToken::new());

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    first.cancel();
    let (report_a, emitted_a) = a.await.unwrap();
    assert_eq!(report_a.outcome, SessionOutcome::Cancelled);
    assert_eq!(emitted_a, 3);

    memory.set_state(id, ExperimentState::Completed).unwrap();
    let (report_b, emitted_b) = b.await.unwrap();
    assert_eq!(report_b.outcome, SessionOutcome::Completed);
    assert_eq!(emitted_b, 4);
}

/// Replays a fixed sequence of name snapshots, then reports the experiment
/// as completed.
struct Snapshots {
    polls: Mutex<VecDeque<Vec<String>>>,
}

impl MetricStore for Snapshots {
    fn metric_names(&self, _experiment: ExperimentId) -> Result<MetricNames, StorageError> {
        let training = self.polls.lock().unwrap().pop_front().unwrap_or_default();
        Ok(MetricNames {
            training,
            validation: Vec::new(),
        })
    }

    fn metric_batches(
        &self,
        _experiment: ExperimentId,
        _kind: MetricKind,
        _name: &str,
        _since: DateTime<Utc>,
    ) -> Result<BatchRecords, StorageError> {
        Ok(BatchRecords::default())
    }

    fn searcher_metric(&self, _experiment: ExperimentId) -> Result<String, StorageError> {
        Ok("loss".to_string())
    }
}

impl Lifecycle for Snapshots {
    fn state(&self, _experiment: ExperimentId) -> Result<ExperimentState, StorageError> {
        if self.polls.lock().unwrap().is_empty() {
            Ok(ExperimentState::Completed)
        } else {
            Ok(ExperimentState::Active)
        }
    }
}

fn name_snapshots() -> impl Strategy<Value = Vec<Vec<String>>> {
    let name = prop::sample::select(vec!["loss", "acc", "lr", "grad_norm", "f1"]);
    prop::collection::vec(
        prop::collection::vec(name.prop_map(|s| s.to_string()), 0..6),
        1..8,
    )
}

proptest! {
    #[test]
    fn deliveries_union_to_distinct_names(snapshots in name_snapshots()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        let source = Arc::new(Snapshots {
            polls: Mutex::new(snapshots.clone().into()),
        });
        let engine = engine(source.clone(), source);

        let mut delivered: Vec<String> = Vec::new();
        runtime.block_on(async {
            engine
                .metric_names_stream(ExperimentId::new(1))
                .unwrap()
                .run(CancellationToken::new(), |u| {
                    delivered.extend(u.training);
                    Ok(())
                })
                .await
                .unwrap();
        });

        let distinct: HashSet<&String> = snapshots.iter().flatten().collect();
        let unique: HashSet<&String> = delivered.iter().collect();
        prop_assert_eq!(unique.len(), delivered.len());
        prop_assert_eq!(unique, distinct);
    }
}

/// Delegates to the in-memory store, failing the n-th batch query and the
/// m-th lifecycle lookup.
struct Failing {
    inner: Arc<InMemoryStore>,
    fail_batches_on: usize,
    fail_state_on: usize,
    batch_calls: AtomicUsize,
    state_calls: AtomicUsize,
}

impl Failing {
    fn new(inner: Arc<InMemoryStore>, fail_batches_on: usize, fail_state_on: usize) -> Self {
        Self {
            inner,
            fail_batches_on,
            fail_state_on,
            batch_calls: AtomicUsize::new(0),
            state_calls: AtomicUsize::new(0),
        }
    }
}

impl MetricStore for Failing {
    fn metric_names(&self, experiment: ExperimentId) -> Result<MetricNames, StorageError> {
        self.inner.metric_names(experiment)
    }

    fn metric_batches(
        &self,
        experiment: ExperimentId,
        kind: MetricKind,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<BatchRecords, StorageError> {
        if self.batch_calls.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_batches_on {
            return Err(StorageError::BackendError("connection reset".to_string()));
        }
        self.inner.metric_batches(experiment, kind, name, since)
    }

    fn searcher_metric(&self, experiment: ExperimentId) -> Result<String, StorageError> {
        self.inner.searcher_metric(experiment)
    }
}

impl Lifecycle for Failing {
    fn state(&self, experiment: ExperimentId) -> Result<ExperimentState, StorageError> {
        if self.state_calls.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_state_on {
            return Err(StorageError::BackendError("state table locked".to_string()));
        }
        self.inner.state(experiment)
    }
}

#[tokio::test(start_paused = true)]
async fn store_failure_mid_stream_aborts_with_context() {
    let memory = Arc::new(InMemoryStore::new());
    let id = ExperimentId::new(6);
    memory.create_experiment(id, "loss").unwrap();
    memory
        .record(id, MetricRecord::training(10, t(1), ["loss"]))
        .unwrap();
    let failing = Arc::new(Failing::new(memory, 2, 0));
    let engine = engine(failing.clone(), failing);

    let mut updates = Vec::new();
    let err = engine
        .metric_batches_stream(id, Some("loss"), None)
        .unwrap()
        .run(CancellationToken::new(), |u| {
            updates.push(u.batches);
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(err.is_internal());
    let msg = err.to_string();
    assert!(msg.contains("experiment 6"), "{msg}");
    assert!(msg.contains("connection reset"), "{msg}");
    assert_eq!(updates, vec![vec![10]]);
}

#[tokio::test(start_paused = true)]
async fn lifecycle_failure_mid_stream_aborts_with_context() {
    let memory = Arc::new(InMemoryStore::new());
    let id = ExperimentId::new(7);
    memory.create_experiment(id, "loss").unwrap();
    // Lookup 1 is the existence check, 2 follows the first emission.
    let failing = Arc::new(Failing::new(memory, 0, 3));
    let engine = engine(failing.clone(), failing);

    let mut emitted = 0;
    let err = engine
        .metric_names_stream(id)
        .unwrap()
        .run(CancellationToken::new(), |_| {
            emitted += 1;
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(err.is_internal());
    let msg = err.to_string();
    assert!(msg.contains("fetching state of experiment 7"), "{msg}");
    assert!(msg.contains("state table locked"), "{msg}");
    assert_eq!(emitted, 2);
}
