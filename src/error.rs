use crate::pipeline::PipelineState;
use std::time::Duration;
use thiserror::Error;

/// Result type for queue and pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Boxed error returned by user transforms
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while building or running a pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Item put on a queue that has been closed
    #[error("Queue is closed")]
    Closed,

    /// Non-blocking put on a queue that is at capacity
    #[error("Queue is full")]
    Full,

    /// Blocking operation exceeded its deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Queue was cancelled while the caller was waiting on it
    #[error("Queue was cancelled")]
    Cancelled,

    /// `task_done` called more times than entries were enqueued
    #[error("task_done() called more times than entries were enqueued")]
    TaskDoneOverflow,

    /// A stage transform failed on an item
    #[error(transparent)]
    Transform(#[from] TransformError),

    /// No stages in pipeline
    #[error("Cannot build pipeline with no stages")]
    NoStages,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Submission after shutdown has begun
    #[error("Pipeline is not accepting submissions (state: {0})")]
    NotAccepting(PipelineState),

    /// Worker thread could not be spawned
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// Worker thread panicked
    #[error("Worker thread panicked: {0}")]
    ThreadPanicked(String),
}

/// A recorded failure of one stage transform on one item
#[derive(Error, Debug)]
#[error("Stage `{stage}` (#{stage_index}) worker {worker} failed: {source}")]
pub struct TransformError {
    pub stage: String,
    pub stage_index: usize,
    pub worker: usize,
    #[source]
    pub source: BoxError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_error_display_and_source() {
        let err = TransformError {
            stage: "parse".into(),
            stage_index: 1,
            worker: 0,
            source: "bad input 13".into(),
        };
        assert_eq!(
            err.to_string(),
            "Stage `parse` (#1) worker 0 failed: bad input 13"
        );
        assert!(std::error::Error::source(&err).is_some());

        let wrapped = PipelineError::from(err);
        assert!(wrapped.to_string().contains("bad input 13"));
    }

    #[test]
    fn test_not_accepting_mentions_state() {
        let err = PipelineError::NotAccepting(PipelineState::Draining);
        assert_eq!(
            err.to_string(),
            "Pipeline is not accepting submissions (state: draining)"
        );
    }
}
