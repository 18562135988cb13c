//! Generic polling engine behind every metric stream.
//!
//! A session repeatedly asks its fetch function for the current delta, drops
//! anything already delivered, hands the remainder to the consumer, and stops
//! once the done-check reports true or the cancellation token fires. Emission
//! happens on every poll, even when nothing is new, so consumers can tell a
//! quiet stream from a dead one.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TrialScopeResult;

/// Items returned by one fetch, with the watermark to query from next time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta<T, W> {
    /// Candidate items; the session filters out the ones already delivered.
    pub items: Vec<T>,
    /// Highest position observed by this fetch.
    pub watermark: W,
}

impl<T> Delta<T, ()> {
    /// A delta for sources without a watermark.
    #[must_use]
    pub const fn unbounded(items: Vec<T>) -> Self {
        Self {
            items,
            watermark: (),
        }
    }
}

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The done-check reported true after an emission.
    Completed,
    /// The cancellation token fired.
    Cancelled,
}

/// Summary of a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    /// How the session ended.
    pub outcome: SessionOutcome,
    /// Number of fetches performed (equal to the number of emissions).
    pub polls: usize,
    /// Distinct items delivered across all emissions.
    pub delivered: usize,
}

/// A cancellable poll/dedup/emit loop.
///
/// - `fetch(&watermark)` returns the current candidate items and the new
///   watermark; the session keeps the maximum watermark seen so far.
/// - `is_done()` is evaluated after every emission.
///
/// Dedup state and the watermark live only as long as the session.
pub struct StreamSession<T, W, F, D> {
    name: &'static str,
    fetch: F,
    is_done: D,
    poll_interval: Duration,
    cancel: CancellationToken,
    seen: HashSet<T>,
    watermark: W,
    polls: usize,
}

impl<T, W, F, D> StreamSession<T, W, F, D>
where
    T: Eq + Hash + Clone,
    W: Ord + fmt::Debug,
    F: FnMut(&W) -> TrialScopeResult<Delta<T, W>>,
    D: FnMut() -> TrialScopeResult<bool>,
{
    /// Creates a session starting from `watermark`.
    ///
    /// `name` labels the session in logs.
    pub fn new(
        name: &'static str,
        watermark: W,
        fetch: F,
        is_done: D,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name,
            fetch,
            is_done,
            poll_interval,
            cancel,
            seen: HashSet::new(),
            watermark,
            polls: 0,
        }
    }

    /// Drives the session to completion, passing every update to `emit`.
    ///
    /// # Errors
    /// Returns the first error raised by `fetch`, `is_done`, or `emit`.
    /// Cancellation is not an error and yields `SessionOutcome::Cancelled`.
    pub async fn run<E>(mut self, mut emit: E) -> TrialScopeResult<SessionReport>
    where
        E: FnMut(Vec<T>) -> TrialScopeResult<()>,
    {
        match self.drive(&mut emit).await {
            Ok(outcome) => {
                let report = SessionReport {
                    outcome,
                    polls: self.polls,
                    delivered: self.seen.len(),
                };
                info!(
                    stream = self.name,
                    ?outcome,
                    polls = report.polls,
                    delivered = report.delivered,
                    "stream session finished"
                );
                Ok(report)
            }
            Err(err) => {
                warn!(
                    stream = self.name,
                    polls = self.polls,
                    error = %err,
                    "stream session aborted"
                );
                Err(err)
            }
        }
    }

    async fn drive<E>(&mut self, emit: &mut E) -> TrialScopeResult<SessionOutcome>
    where
        E: FnMut(Vec<T>) -> TrialScopeResult<()>,
    {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(SessionOutcome::Cancelled);
            }

            let fresh = self.poll_once()?;
            debug!(
                stream = self.name,
                poll = self.polls,
                new_items = fresh.len(),
                watermark = ?self.watermark,
                "stream poll"
            );
            emit(fresh)?;

            if (self.is_done)()? {
                return Ok(SessionOutcome::Completed);
            }
            if self.cancel.is_cancelled() {
                return Ok(SessionOutcome::Cancelled);
            }

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {}
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    fn poll_once(&mut self) -> TrialScopeResult<Vec<T>> {
        let delta = (self.fetch)(&self.watermark)?;
        self.polls += 1;
        if delta.watermark > self.watermark {
            self.watermark = delta.watermark;
        }

        let seen = &mut self.seen;
        Ok(delta
            .items
            .into_iter()
            .filter(|item| seen.insert(item.clone()))
            .collect())
    }
}
