//! Bounded multi-stage worker pipelines built on closable blocking queues.
//!
//! Items submitted to a [`Pipeline`] pass through a chain of stages. Every
//! stage is a pool of worker threads pulling from one [`BoundedQueue`],
//! applying a transform and pushing the result into the next stage's queue.
//!
//! # Features
//!
//! - Blocking, capacity-bounded FIFO queues with `task_done`/`join` accounting
//! - End-of-stream sentinels: one `close()` per consumer stops exactly one worker
//! - Ordered shutdown: a stage is closed only after everything upstream drained
//! - Per-item failure isolation, with an optional fail-fast policy
//! - Per-stage metrics: processed, failed, latency percentiles
//! - Typed stages: each stage may change the item type
//!
//! # Example
//!
//! ```no_run
//! use queue_pipeline::Pipeline;
//!
//! # fn main() -> queue_pipeline::Result<()> {
//! let pipeline = Pipeline::builder()
//!     .queue_capacity(100)
//!     .map("double", 2, |x: u64| x * 2)
//!     .map("increment", 2, |x: u64| x + 1)
//!     .map("stringify", 2, |x: u64| x.to_string())
//!     .build()?;
//!
//! for i in 0..1000 {
//!     pipeline.submit(i)?;
//! }
//!
//! let report = pipeline.wait_for_completion()?;
//! assert_eq!(report.outputs.len(), 1000);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod stage;
pub mod worker;

// Re-exports for convenience
pub use config::{FailurePolicy, PipelineConfig};
pub use error::{BoxError, PipelineError, Result, TransformError};
pub use metrics::{LatencyWindow, MetricsSnapshot, StageMetrics};
pub use pipeline::{
    CompletionReport, Pipeline, PipelineBuilder, PipelineState, StageReport, Submitter,
};
pub use queue::{BoundedQueue, Capacity, Iter, TryGet};
pub use stage::{MapStage, PassthroughStage, Stage, TryMapStage};
pub use worker::{WorkerReport, WorkerState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
