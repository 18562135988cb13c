//! Storage contracts for TrialScope.
//!
//! The traits describe the narrow interface to the external metric store and
//! lifecycle system. `InMemoryStore` implements both for embedded use and tests.

mod memory;
mod traits;

pub use memory::{InMemoryStore, MetricRecord};
pub use traits::{BatchRecords, Lifecycle, MetricNames, MetricStore, StorageError};
