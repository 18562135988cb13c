//! # TrialScope - live experiment metrics and search previews
//!
//! TrialScope watches running training experiments and streams what changes:
//! the metric names an experiment has recorded and the batch counts at which
//! a chosen metric was reported. Streams poll the metric store, deliver only
//! what is new, and end once the experiment reaches a terminal state.
//!
//! It also previews hyperparameter searches by simulating a search method
//! against a null environment and grouping identical trial plans.
//!
//! ## Core Concepts
//!
//! - **Stream session**: a poll/dedup/emit loop with a cancellation token
//! - **Watermark**: the high-water end time a batch stream has consumed
//! - **Search method**: a policy reacting to trial events with new operations
//! - **Signature**: the canonical encoding a trial plan is grouped by
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use trialscope::{ExperimentId, InMemoryStore, TrialScopeEngine};
//!
//! let store = Arc::new(InMemoryStore::new());
//! let engine = TrialScopeEngine::new(store.clone(), store);
//!
//! let poller = engine.metric_batches_stream(ExperimentId::new(1), Some("loss"), None)?;
//! poller
//!     .run(CancellationToken::new(), |update| {
//!         println!("{:?}", update.batches);
//!         Ok(())
//!     })
//!     .await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod engine;
pub mod error;
pub mod experiment;
pub mod search;
pub mod storage;
pub mod stream;

#[cfg(feature = "transport-grpc")]
pub mod transport;

pub use config::{ServerConfig, SimulationConfig, StreamConfig};
pub use engine::TrialScopeEngine;
pub use error::{ErrorKind, ExecutionError, TrialScopeError, TrialScopeResult, ValidationError};
pub use experiment::{ExperimentId, ExperimentState, MetricKind, MetricSelector};
pub use search::{
    preview_search, Operation, OperationSequence, PreviewConfig, SearchMethod, SearchPreview,
    SearchSimulator, Signature, SignatureGrouper, SimulationGroup, TrainingUnit,
};
pub use storage::{InMemoryStore, Lifecycle, MetricStore, StorageError};
pub use stream::{
    MetricBatchPoller, MetricBatchesUpdate, MetricCatalogPoller, MetricNamesUpdate, SessionOutcome,
    SessionReport, StreamSession,
};
