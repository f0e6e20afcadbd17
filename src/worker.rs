use crate::error::{BoxError, PipelineError, Result, TransformError};
use crate::metrics::StageMetrics;
use crate::queue::BoundedQueue;
use crate::stage::Stage;
use crossbeam::channel::Sender;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, warn};

/// Lifecycle of a worker thread. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Created = 0,
    Running = 1,
    /// Waiting on the input queue
    Idle = 2,
    /// Holding an item
    Processing = 3,
    Stopped = 4,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Created,
            1 => WorkerState::Running,
            2 => WorkerState::Idle,
            3 => WorkerState::Processing,
            _ => WorkerState::Stopped,
        }
    }
}

/// Shared view of one worker's [`WorkerState`], readable after the worker exits
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(WorkerState::Created as u8)))
    }

    pub fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: WorkerState) {
        // Only the owning worker writes, so a plain store keeps Stopped terminal
        if self.get() != WorkerState::Stopped {
            self.0.store(state as u8, Ordering::Release);
        }
    }
}

/// State shared by all workers of one stage
#[derive(Debug, Clone)]
pub(crate) struct StageContext {
    pub stage_name: String,
    pub stage_index: usize,
    pub metrics: StageMetrics,
    pub failures: Sender<TransformError>,
    /// Raised on the first failure when `fail_fast` is set
    pub abort: Arc<AtomicBool>,
    pub fail_fast: bool,
}

/// Per-worker totals returned when the worker thread is joined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: usize,
    pub processed: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Pulls items from one queue, transforms them and pushes the results to the next
pub(crate) struct Worker<I, O> {
    id: usize,
    stage: Arc<dyn Stage<I, O>>,
    input: BoundedQueue<I>,
    output: BoundedQueue<O>,
    ctx: StageContext,
    state: StateCell,
}

impl<I: Send + 'static, O: Send + 'static> Worker<I, O> {
    pub fn new(
        id: usize,
        stage: Arc<dyn Stage<I, O>>,
        input: BoundedQueue<I>,
        output: BoundedQueue<O>,
        ctx: StageContext,
    ) -> Self {
        Self {
            id,
            stage,
            input,
            output,
            ctx,
            state: StateCell::new(),
        }
    }

    /// Start the worker on its own named thread
    pub fn spawn(self, thread_name: String) -> Result<WorkerHandle> {
        let id = self.id;
        let state = self.state.clone();
        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || self.run())?;
        Ok(WorkerHandle { id, state, handle })
    }

    /// Process items until the input queue yields a sentinel or is cancelled
    pub fn run(self) -> WorkerReport {
        self.state.set(WorkerState::Running);
        debug!(stage = %self.ctx.stage_name, worker = self.id, "Worker started");

        let mut report = WorkerReport {
            worker: self.id,
            ..WorkerReport::default()
        };

        // Each item is acknowledged when the iterator advances past it,
        // after its result has been handed downstream
        let mut items = self.input.iter();
        loop {
            self.state.set(WorkerState::Idle);
            let Some(item) = items.next() else {
                break;
            };
            self.state.set(WorkerState::Processing);

            if self.ctx.abort.load(Ordering::Acquire) {
                report.skipped += 1;
                self.ctx.metrics.record_skipped();
                continue;
            }

            let started = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| self.stage.process(item)))
                .unwrap_or_else(|panic| {
                    Err(format!("transform panicked: {}", panic_message(panic)).into())
                });

            match outcome {
                Ok(result) => match self.output.put(result) {
                    Ok(()) => {
                        report.processed += 1;
                        self.ctx.metrics.record_processed(started.elapsed());
                    }
                    Err(PipelineError::Cancelled) => {
                        debug!(stage = %self.ctx.stage_name, worker = self.id, "Output cancelled");
                        break;
                    }
                    Err(e) => {
                        error!(
                            stage = %self.ctx.stage_name,
                            worker = self.id,
                            "Failed to forward result downstream: {e}"
                        );
                        report.failed += 1;
                        self.ctx.metrics.record_failed(started.elapsed());
                        self.record_failure(Box::new(e));
                    }
                },
                Err(source) => {
                    report.failed += 1;
                    self.ctx.metrics.record_failed(started.elapsed());
                    self.record_failure(source);
                }
            }
        }
        drop(items);

        self.state.set(WorkerState::Stopped);
        debug!(
            stage = %self.ctx.stage_name,
            worker = self.id,
            processed = report.processed,
            failed = report.failed,
            "Worker stopped"
        );
        report
    }

    fn record_failure(&self, source: BoxError) {
        let failure = TransformError {
            stage: self.ctx.stage_name.clone(),
            stage_index: self.ctx.stage_index,
            worker: self.id,
            source,
        };
        warn!("{failure}");
        if self.ctx.fail_fast && !self.ctx.abort.swap(true, Ordering::AcqRel) {
            warn!(stage = %self.ctx.stage_name, "Fail-fast: discarding remaining items");
        }
        // The receiver only goes away when the pipeline is torn down
        let _ = self.ctx.failures.send(failure);
    }
}

/// Handle to a running worker thread
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    id: usize,
    state: StateCell,
    handle: JoinHandle<WorkerReport>,
}

impl WorkerHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    /// State cell that stays readable once the handle has been joined
    pub fn state_cell(&self) -> StateCell {
        self.state.clone()
    }

    /// Wait for the worker thread to exit
    pub fn join(self) -> Result<WorkerReport> {
        self.handle
            .join()
            .map_err(|panic| PipelineError::ThreadPanicked(panic_message(panic)))
    }
}

pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
