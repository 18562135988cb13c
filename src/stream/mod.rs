//! Incremental metric streams.
//!
//! `StreamSession` is the reusable poll/dedup/emit loop; the pollers bind it
//! to the metric store and the experiment lifecycle.

pub mod batches;
pub mod catalog;
pub mod session;

pub use batches::{MetricBatchPoller, MetricBatchesUpdate};
pub use catalog::{MetricCatalogPoller, MetricNamesUpdate};
pub use session::{Delta, SessionOutcome, SessionReport, StreamSession};
