//! Progress sub-ranges and a reporter that keeps writes monotonic.

use crate::error::TaskResult;
use crate::tracker::{Checkpoint, TaskTracker, TaskUpdate, Transition};
use std::sync::Arc;
use stowage_core::TaskId;

/// A reserved slice of the 0-100 progress bar.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressRange {
    pub start: u8,
    pub end: u8,
}

impl ProgressRange {
    pub const fn new(start: u8, end: u8) -> Self {
        Self { start, end }
    }

    /// A point inside the range for phases with no known total.
    pub fn midpoint(&self) -> u8 {
        self.start + self.end.saturating_sub(self.start) / 2
    }

    /// Scale `done / total` into this range. An empty total maps to the end.
    pub fn at(&self, done: u64, total: u64) -> u8 {
        if total == 0 {
            return self.end;
        }
        let span = u64::from(self.end.saturating_sub(self.start));
        let done = done.min(total);
        let offset = (span * done / total) as u8;
        self.start + offset
    }
}

pub const LISTING: ProgressRange = ProgressRange::new(0, 10);
pub const DELETING: ProgressRange = ProgressRange::new(10, 95);
pub const CLEANUP: ProgressRange = ProgressRange::new(95, 100);
pub const SIZE_COUNTING: ProgressRange = ProgressRange::new(0, 10);
pub const SIZE_SCANNING: ProgressRange = ProgressRange::new(10, 90);

/// Writes progress for one task and turns the tracker's answer into a
/// [`Checkpoint`].
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tracker: Arc<TaskTracker>,
    task_id: TaskId,
}

impl ProgressReporter {
    pub fn new(tracker: Arc<TaskTracker>, task_id: TaskId) -> Self {
        Self { tracker, task_id }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn tracker(&self) -> &Arc<TaskTracker> {
        &self.tracker
    }

    pub async fn report(&self, progress: u8, step: impl Into<String>) -> TaskResult<Checkpoint> {
        let transition = self
            .tracker
            .update(&self.task_id, TaskUpdate::new().progress(progress).step(step))
            .await?;
        Ok(match transition {
            Transition::Applied(_) => Checkpoint::Continue,
            Transition::AlreadyTerminal(_) => Checkpoint::Stop,
            Transition::Missing => Checkpoint::Lost,
        })
    }

    pub async fn checkpoint(&self) -> TaskResult<Checkpoint> {
        self.tracker.checkpoint(&self.task_id).await
    }
}
