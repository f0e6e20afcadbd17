use crate::config::{FailurePolicy, PipelineConfig};
use crate::error::{BoxError, PipelineError, Result, TransformError};
use crate::metrics::{MetricsSnapshot, StageMetrics};
use crate::queue::{BoundedQueue, Capacity};
use crate::stage::{MapStage, Stage, TryMapStage};
use crate::worker::{
    panic_message, StageContext, StateCell, Worker, WorkerHandle, WorkerReport, WorkerState,
};
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lifecycle of a pipeline. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Building,
    /// Accepting submissions
    Running,
    /// Shutdown in progress, submissions rejected
    Draining,
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Building => "building",
            PipelineState::Running => "running",
            PipelineState::Draining => "draining",
            PipelineState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Type-erased control surface of a running stage
trait StageControl: Send + Sync {
    fn name(&self) -> &str;
    fn metrics(&self) -> &StageMetrics;
    fn worker_count(&self) -> usize;
    fn worker_states(&self) -> Vec<WorkerState>;
    /// Append one sentinel to the stage's input queue
    fn close_input(&self);
    /// Wait until every entry of the input queue has been acknowledged
    fn drain_input(&self) -> Result<()>;
    fn cancel_input(&self);
    fn join_workers(&mut self) -> Result<Vec<WorkerReport>>;
}

struct RunningStage<I> {
    name: String,
    input: BoundedQueue<I>,
    workers: Vec<WorkerHandle>,
    /// One per spawned worker, kept after the handles are joined
    states: Vec<StateCell>,
    metrics: StageMetrics,
}

impl<I: Send + 'static> StageControl for RunningStage<I> {
    fn name(&self) -> &str {
        &self.name
    }

    fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }

    fn worker_count(&self) -> usize {
        self.workers.len()
    }

    fn worker_states(&self) -> Vec<WorkerState> {
        self.states.iter().map(StateCell::get).collect()
    }

    fn close_input(&self) {
        self.input.close();
    }

    fn drain_input(&self) -> Result<()> {
        self.input.join()
    }

    fn cancel_input(&self) {
        self.input.cancel();
    }

    fn join_workers(&mut self) -> Result<Vec<WorkerReport>> {
        let mut reports = Vec::with_capacity(self.workers.len());
        let mut first_error = None;
        for handle in self.workers.drain(..) {
            let worker = handle.id();
            match handle.join() {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(stage = %self.name, worker, "{e}");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(reports),
        }
    }
}

/// Everything needed to start one stage's workers
struct StageSpec<I, O> {
    name: String,
    workers: usize,
    stage: Arc<dyn Stage<I, O>>,
}

/// Spawns stages in order while a pipeline is being built
struct Launcher {
    config: PipelineConfig,
    stages: Vec<Box<dyn StageControl>>,
    failures: Sender<TransformError>,
    abort: Arc<AtomicBool>,
}

impl Launcher {
    fn spawn_stage<I, O>(
        &mut self,
        spec: StageSpec<I, O>,
        input: BoundedQueue<I>,
        output: BoundedQueue<O>,
    ) -> Result<()>
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        let stage_index = self.stages.len();
        let metrics = StageMetrics::new();
        let ctx = StageContext {
            stage_name: spec.name.clone(),
            stage_index,
            metrics: metrics.clone(),
            failures: self.failures.clone(),
            abort: Arc::clone(&self.abort),
            fail_fast: self.config.failure_policy == FailurePolicy::FailFast,
        };

        let mut running = RunningStage {
            name: spec.name.clone(),
            input: input.clone(),
            workers: Vec::with_capacity(spec.workers),
            states: Vec::with_capacity(spec.workers),
            metrics,
        };
        for id in 0..spec.workers {
            let worker = Worker::new(
                id,
                Arc::clone(&spec.stage),
                input.clone(),
                output.clone(),
                ctx.clone(),
            );
            let thread_name = format!("{}-{}-{}", self.config.thread_name_prefix, spec.name, id);
            match worker.spawn(thread_name) {
                Ok(handle) => {
                    running.states.push(handle.state_cell());
                    running.workers.push(handle);
                }
                Err(e) => {
                    // Keep the partial stage so teardown can stop what did start
                    self.stages.push(Box::new(running));
                    return Err(e);
                }
            }
        }

        debug!(stage = %spec.name, index = stage_index, workers = spec.workers, "Stage started");
        self.stages.push(Box::new(running));
        Ok(())
    }

    fn teardown(&mut self) {
        teardown_stages(&mut self.stages, None::<&BoundedQueue<()>>);
    }
}

fn teardown_stages<O>(stages: &mut [Box<dyn StageControl>], output: Option<&BoundedQueue<O>>) {
    for stage in stages.iter() {
        stage.cancel_input();
    }
    if let Some(output) = output {
        output.cancel();
    }
    for stage in stages.iter_mut() {
        if let Err(e) = stage.join_workers() {
            warn!(stage = %stage.name(), "Worker failed during teardown: {e}");
        }
    }
}

/// How long the output collector waits for an item before rechecking
/// whether the stages have finished
const COLLECT_POLL: Duration = Duration::from_millis(10);

/// Move items from the final queue into a report until end of stream.
///
/// Stops on the sentinel, on cancellation, or once `upstream_done` is set and
/// the queue is empty (an external consumer may have taken the sentinel).
fn collect_outputs<O>(output: &BoundedQueue<O>, upstream_done: &AtomicBool) -> Result<Vec<O>> {
    let mut outputs = Vec::new();
    loop {
        // Read before waiting: once set, everything upstream is already queued
        let done = upstream_done.load(Ordering::Acquire);
        match output.get_timeout(COLLECT_POLL) {
            Ok(Some(item)) => {
                outputs.push(item);
                output.task_done()?;
            }
            Ok(None) | Err(PipelineError::Cancelled) => break,
            Err(PipelineError::Timeout(_)) if done => break,
            Err(PipelineError::Timeout(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(outputs)
}

/// Starts every stage up to `O`, given the head input queue and the capacity
/// for the queue it returns
type Launch<I, O> =
    Box<dyn FnOnce(&mut Launcher, BoundedQueue<I>, Capacity) -> Result<BoundedQueue<O>> + Send>;

/// Builder for constructing pipelines. `I` is the submitted item type and
/// `O` the output type of the last stage added so far.
pub struct PipelineBuilder<I, O> {
    config: PipelineConfig,
    stage_count: usize,
    problem: Option<PipelineError>,
    launch: Launch<I, O>,
}

impl<I: Send + 'static> PipelineBuilder<I, I> {
    /// Create a new pipeline builder with default configuration
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            stage_count: 0,
            problem: None,
            launch: Box::new(|_: &mut Launcher, input: BoundedQueue<I>, _: Capacity| Ok(input)),
        }
    }
}

impl<I: Send + 'static> Default for PipelineBuilder<I, I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, O> PipelineBuilder<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Replace the whole configuration
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Capacity of every stage input queue
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = Some(capacity);
        self
    }

    /// Let stage input queues grow without limit
    pub fn unbounded_queues(mut self) -> Self {
        self.config.queue_capacity = None;
        self
    }

    /// Capacity of the final output queue, `None` for unbounded.
    ///
    /// [`Pipeline::wait_for_completion`] drains a bounded output queue while
    /// the stages shut down. A bare [`Pipeline::shutdown`] blocks once it
    /// fills up unless [`Pipeline::output`] is consumed concurrently.
    pub fn output_capacity(mut self, capacity: Option<usize>) -> Self {
        self.config.output_capacity = capacity;
        self
    }

    /// How workers react to a failed transform
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    /// Prefix of every worker thread name: `{prefix}-{stage}-{worker}`
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Append a stage served by `workers` threads
    pub fn add_stage<P, S>(self, workers: usize, stage: S) -> PipelineBuilder<I, P>
    where
        P: Send + 'static,
        S: Stage<O, P>,
    {
        let name = stage.name().to_string();
        let mut problem = self.problem;
        if workers == 0 && problem.is_none() {
            problem = Some(PipelineError::Config(format!(
                "stage `{name}` needs at least one worker"
            )));
        }

        let spec = StageSpec {
            name,
            workers,
            stage: Arc::new(stage) as Arc<dyn Stage<O, P>>,
        };
        let previous = self.launch;
        let launch: Launch<I, P> = Box::new(
            move |launcher: &mut Launcher, input: BoundedQueue<I>, capacity: Capacity| {
                let stage_capacity = Capacity::from_limit(launcher.config.queue_capacity);
                let stage_input = previous(launcher, input, stage_capacity)?;
                let output = BoundedQueue::with_capacity(capacity)?;
                launcher.spawn_stage(spec, stage_input, output.clone())?;
                Ok(output)
            },
        );

        PipelineBuilder {
            config: self.config,
            stage_count: self.stage_count + 1,
            problem,
            launch,
        }
    }

    /// Append a stage applying an infallible function
    pub fn map<P, F>(self, name: impl Into<String>, workers: usize, f: F) -> PipelineBuilder<I, P>
    where
        P: Send + 'static,
        F: Fn(O) -> P + Send + Sync + 'static,
    {
        self.add_stage(workers, MapStage::new(name, f))
    }

    /// Append a stage applying a fallible function; failures are recorded per item
    pub fn try_map<P, E, F>(
        self,
        name: impl Into<String>,
        workers: usize,
        f: F,
    ) -> PipelineBuilder<I, P>
    where
        P: Send + 'static,
        E: Into<BoxError> + 'static,
        F: Fn(O) -> std::result::Result<P, E> + Send + Sync + 'static,
    {
        self.add_stage(workers, TryMapStage::new(name, f))
    }

    /// Validate the configuration, allocate the queues and start every worker
    pub fn build(self) -> Result<Pipeline<I, O>> {
        if let Some(problem) = self.problem {
            return Err(problem);
        }
        if self.stage_count == 0 {
            return Err(PipelineError::NoStages);
        }
        self.config.validate()?;

        let (failures_tx, failures_rx) = unbounded();
        let mut launcher = Launcher {
            config: self.config.clone(),
            stages: Vec::with_capacity(self.stage_count),
            failures: failures_tx,
            abort: Arc::new(AtomicBool::new(false)),
        };

        let input = BoundedQueue::with_capacity(Capacity::from_limit(self.config.queue_capacity))?;
        let output_capacity = Capacity::from_limit(self.config.output_capacity);
        let output = match (self.launch)(&mut launcher, input.clone(), output_capacity) {
            Ok(output) => output,
            Err(e) => {
                error!("Pipeline failed to start: {e}");
                launcher.teardown();
                return Err(e);
            }
        };

        info!(
            stages = launcher.stages.len(),
            queue_capacity = ?self.config.queue_capacity,
            "Pipeline started"
        );

        Ok(Pipeline {
            input,
            output,
            stages: launcher.stages,
            state: Arc::new(Mutex::new(PipelineState::Running)),
            failures: failures_rx,
            fail_fast: self.config.failure_policy == FailurePolicy::FailFast,
            thread_name_prefix: self.config.thread_name_prefix.clone(),
            stage_reports: Vec::new(),
        })
    }
}

/// Totals for one stage after it has been drained
#[derive(Debug, Clone)]
pub struct StageReport {
    pub name: String,
    pub workers: Vec<WorkerReport>,
    pub metrics: MetricsSnapshot,
}

/// Outcome of a fully drained pipeline
#[derive(Debug)]
pub struct CompletionReport<O> {
    /// Items left in the final queue, in the order they arrived
    pub outputs: Vec<O>,
    /// Every recorded item failure
    pub failures: Vec<TransformError>,
    pub stages: Vec<StageReport>,
}

impl<O> CompletionReport<O> {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.outputs.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Cloneable handle for submitting items from producer threads
pub struct Submitter<I> {
    input: BoundedQueue<I>,
    state: Arc<Mutex<PipelineState>>,
}

impl<I> Clone for Submitter<I> {
    fn clone(&self) -> Self {
        Self {
            input: self.input.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<I> Submitter<I> {
    /// Enqueue an item into the first stage, blocking while its queue is full
    pub fn submit(&self, item: I) -> Result<()> {
        submit_to(&self.input, &self.state, item, None)
    }

    pub fn submit_timeout(&self, item: I, timeout: Duration) -> Result<()> {
        submit_to(&self.input, &self.state, item, Some(timeout))
    }
}

fn submit_to<I>(
    input: &BoundedQueue<I>,
    state: &Mutex<PipelineState>,
    item: I,
    timeout: Option<Duration>,
) -> Result<()> {
    let current = *state.lock();
    if current != PipelineState::Running {
        return Err(PipelineError::NotAccepting(current));
    }
    let result = match timeout {
        Some(timeout) => input.put_timeout(item, timeout),
        None => input.put(item),
    };
    // Shutdown closed the head queue while we were blocked on it
    result.map_err(|e| match e {
        PipelineError::Closed => PipelineError::NotAccepting(*state.lock()),
        other => other,
    })
}

/// A running multi-stage pipeline.
///
/// Items submitted to the first stage flow through every stage's worker pool
/// into the final output queue. Stage `i`'s output queue is stage `i + 1`'s
/// input queue. Shutdown closes and drains the stages strictly in order.
pub struct Pipeline<I, O> {
    input: BoundedQueue<I>,
    output: BoundedQueue<O>,
    stages: Vec<Box<dyn StageControl>>,
    state: Arc<Mutex<PipelineState>>,
    failures: Receiver<TransformError>,
    fail_fast: bool,
    thread_name_prefix: String,
    stage_reports: Vec<StageReport>,
}

impl<I: Send + 'static> Pipeline<I, I> {
    /// Start building a pipeline whose submitted items are of type `I`
    pub fn builder() -> PipelineBuilder<I, I> {
        PipelineBuilder::new()
    }
}

impl<I, O> Pipeline<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Enqueue an item into the first stage, blocking while its queue is full
    pub fn submit(&self, item: I) -> Result<()> {
        submit_to(&self.input, &self.state, item, None)
    }

    /// Like [`submit`](Self::submit), failing with [`PipelineError::Timeout`]
    /// if the first queue stays full
    pub fn submit_timeout(&self, item: I, timeout: Duration) -> Result<()> {
        submit_to(&self.input, &self.state, item, Some(timeout))
    }

    /// Cloneable submission handle for producer threads
    pub fn submitter(&self) -> Submitter<I> {
        Submitter {
            input: self.input.clone(),
            state: Arc::clone(&self.state),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    /// Live handle to the final output queue.
    ///
    /// Consumers must acknowledge what they take with `task_done` and must not
    /// rely on receiving the final sentinel, which
    /// [`wait_for_completion`](Self::wait_for_completion) may consume itself.
    pub fn output(&self) -> BoundedQueue<O> {
        self.output.clone()
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Get metrics for a specific stage
    pub fn stage_metrics(&self, index: usize) -> Option<&StageMetrics> {
        self.stages.get(index).map(|s| s.metrics())
    }

    /// Current state of every worker of a stage, `None` for an unknown index.
    ///
    /// States stay readable after shutdown, when every worker reports `Stopped`.
    pub fn worker_states(&self, index: usize) -> Option<Vec<WorkerState>> {
        self.stages.get(index).map(|s| s.worker_states())
    }

    /// Get a summary of all metrics
    pub fn metrics_summary(&self) -> String {
        let mut summary = String::from("Pipeline Metrics Summary:\n");
        for (i, stage) in self.stages.iter().enumerate() {
            summary.push_str(&format!(
                "  Stage {} ({}): {}\n",
                i,
                stage.name(),
                stage.metrics().snapshot()
            ));
        }
        summary
    }

    /// Stop accepting submissions and drain the stages in order.
    ///
    /// For each stage: close its input once per worker, wait until the input
    /// is fully acknowledged, then join its workers. A stage is only closed
    /// after everything upstream of it has been handed over. Calling this
    /// again after shutdown has begun is a no-op.
    pub fn shutdown(&mut self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != PipelineState::Running {
                return Ok(());
            }
            *state = PipelineState::Draining;
        }
        info!(stages = self.stages.len(), "Pipeline shutting down");

        let result = self.drain_stages();
        if result.is_err() {
            teardown_stages(&mut self.stages, Some(&self.output));
        }
        *self.state.lock() = PipelineState::Stopped;
        result
    }

    fn drain_stages(&mut self) -> Result<()> {
        for stage in self.stages.iter_mut() {
            for _ in 0..stage.worker_count() {
                stage.close_input();
            }
            stage.drain_input()?;
            let workers = stage.join_workers()?;
            let metrics = stage.metrics().snapshot();
            debug!(stage = %stage.name(), processed = metrics.processed, "Stage drained");
            self.stage_reports.push(StageReport {
                name: stage.name().to_string(),
                workers,
                metrics,
            });
        }
        Ok(())
    }

    /// Shut down if still running and collect every item reaching the final
    /// queue, together with every recorded item failure.
    ///
    /// A collector thread empties the final queue while the stages drain, so
    /// a bounded output capacity cannot stall the last stage.
    /// Under [`FailurePolicy::FailFast`] the first failure is returned as an error.
    pub fn wait_for_completion(mut self) -> Result<CompletionReport<O>> {
        let output = self.output.clone();
        let upstream_done = AtomicBool::new(false);
        let collector_name = format!("{}-output", self.thread_name_prefix);

        let outputs = thread::scope(|scope| -> Result<Vec<O>> {
            let collector = thread::Builder::new()
                .name(collector_name)
                .spawn_scoped(scope, || collect_outputs(&output, &upstream_done))?;

            let shutdown = self.shutdown();
            if shutdown.is_ok() {
                output.close();
            }
            upstream_done.store(true, Ordering::Release);

            let collected = collector
                .join()
                .map_err(|panic| PipelineError::ThreadPanicked(panic_message(panic)))?;
            shutdown?;
            collected
        })?;
        self.output.join()?;

        let mut failures: Vec<TransformError> = self.failures.try_iter().collect();
        info!(
            outputs = outputs.len(),
            failures = failures.len(),
            "Pipeline completed"
        );

        if self.fail_fast && !failures.is_empty() {
            return Err(PipelineError::Transform(failures.remove(0)));
        }

        Ok(CompletionReport {
            outputs,
            failures,
            stages: mem::take(&mut self.stage_reports),
        })
    }

    /// Stop immediately: cancel every queue and join every worker.
    /// Items still in flight are discarded.
    pub fn abort(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        *self.state.lock() = PipelineState::Draining;
        teardown_stages(&mut self.stages, Some(&self.output));
        *self.state.lock() = PipelineState::Stopped;
    }
}

impl<I, O> Drop for Pipeline<I, O> {
    fn drop(&mut self) {
        if *self.state.lock() != PipelineState::Stopped {
            warn!("Pipeline dropped while running; cancelling workers");
            *self.state.lock() = PipelineState::Draining;
            teardown_stages(&mut self.stages, Some(&self.output));
            *self.state.lock() = PipelineState::Stopped;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::PassthroughStage;
    use std::time::Instant;

    #[test]
    fn test_pipeline_builder() {
        let pipeline = PipelineBuilder::<u32, u32>::new()
            .add_stage(1, PassthroughStage::new())
            .map("double", 2, |x: u32| x * 2)
            .build()
            .unwrap();
        assert_eq!(pipeline.stage_count(), 2);
        assert_eq!(pipeline.stage_names(), vec!["passthrough", "double"]);
        assert_eq!(pipeline.state(), PipelineState::Running);
    }

    #[test]
    fn test_no_stages_error() {
        let result = PipelineBuilder::<u32, u32>::new().build();
        assert!(matches!(result, Err(PipelineError::NoStages)));
    }

    #[test]
    fn test_zero_workers_error() {
        let result = Pipeline::<u32, u32>::builder()
            .map("idle", 0, |x: u32| x)
            .build();
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_zero_capacity_error() {
        let result = Pipeline::<u32, u32>::builder()
            .queue_capacity(0)
            .map("id", 1, |x: u32| x)
            .build();
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_submit_after_shutdown_rejected() {
        let mut pipeline = Pipeline::builder().map("id", 1, |x: u32| x).build().unwrap();
        pipeline.submit(1).unwrap();
        pipeline.shutdown().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert!(matches!(
            pipeline.submit(2),
            Err(PipelineError::NotAccepting(PipelineState::Stopped))
        ));

        // A second shutdown is a no-op
        pipeline.shutdown().unwrap();
        let report = pipeline.wait_for_completion().unwrap();
        assert_eq!(report.outputs, vec![1]);
    }

    #[test]
    fn test_stage_queues_are_chained() {
        let pipeline = Pipeline::builder()
            .queue_capacity(4)
            .map("inc", 1, |x: u32| x + 1)
            .map("to_string", 1, |x: u32| x.to_string())
            .build()
            .unwrap();
        for i in 0..3 {
            pipeline.submit(i).unwrap();
        }
        let report = pipeline.wait_for_completion().unwrap();
        assert_eq!(report.outputs, vec!["1", "2", "3"]);
        assert_eq!(report.stages.len(), 2);
        assert_eq!(report.stages[1].metrics.processed, 3);
    }

    #[test]
    fn test_abort_stops_workers() {
        let pipeline = Pipeline::builder()
            .map("slow", 2, |x: u32| {
                std::thread::sleep(Duration::from_millis(5));
                x
            })
            .build()
            .unwrap();
        for i in 0..10 {
            pipeline.submit(i).unwrap();
        }
        let submitter = pipeline.submitter();
        pipeline.abort();
        assert!(submitter.submit(1).is_err());
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_worker_states_follow_lifecycle() {
        let release = Arc::new(AtomicBool::new(false));
        let gate = Arc::clone(&release);
        let mut pipeline = Pipeline::builder()
            .map("gated", 2, move |x: u32| {
                while !gate.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(1));
                }
                x
            })
            .build()
            .unwrap();

        assert_eq!(pipeline.worker_states(0).unwrap().len(), 2);
        assert!(pipeline.worker_states(1).is_none());

        wait_until(|| {
            pipeline
                .worker_states(0)
                .unwrap()
                .iter()
                .all(|s| *s == WorkerState::Idle)
        });

        pipeline.submit(1).unwrap();
        wait_until(|| {
            pipeline
                .worker_states(0)
                .unwrap()
                .contains(&WorkerState::Processing)
        });

        release.store(true, Ordering::SeqCst);
        pipeline.shutdown().unwrap();
        assert_eq!(
            pipeline.worker_states(0).unwrap(),
            vec![WorkerState::Stopped; 2]
        );
    }

    #[test]
    fn test_metrics_summary_lists_stages() {
        let pipeline = Pipeline::builder().map("id", 1, |x: u8| x).build().unwrap();
        let summary = pipeline.metrics_summary();
        assert!(summary.contains("Stage 0 (id)"));
        assert!(pipeline.stage_metrics(0).is_some());
        assert!(pipeline.stage_metrics(1).is_none());
    }
}
