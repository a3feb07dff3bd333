//! Concurrent build pipeline.
//!
//! A fixed pool of workers pulls [`BuildTask`]s from a bounded two-class
//! queue, consults the [`BuildCache`] by content hash, runs the external
//! [`Compiler`] on a miss and hands every [`BuildResult`] to a single result
//! loop. That loop records metrics and fans results out to callbacks.
//!
//! Lifecycle is `Created -> Started -> Stopped`. Stopping cancels the
//! workers, lets in-flight tasks finish, and abandons tasks that were never
//! dequeued. Cancelling the token handed to `start` closes the queue the
//! same way, so enqueueing afterwards fails with `Stopped`.

mod metrics;
mod queue;
mod task;

pub use metrics::BuildMetrics;
pub use task::{BuildPriority, BuildResult, BuildStatus, BuildTask, content_hash};

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use prism_config::{Backpressure, BuildConfig};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::BuildCache;
use crate::component::ComponentInfo;
use crate::error::{PipelineError, Result};
use metrics::MetricsRecorder;
use queue::TaskQueue;

/// Turns a component into build output.
///
/// Invoked on a blocking thread and concurrently from several workers.
/// Errors are opaque strings carried in [`BuildResult::error`].
pub trait Compiler: Send + Sync {
    fn compile(&self, component: &ComponentInfo) -> std::result::Result<Vec<u8>, String>;
}

impl<F> Compiler for F
where
    F: Fn(&ComponentInfo) -> std::result::Result<Vec<u8>, String> + Send + Sync,
{
    fn compile(&self, component: &ComponentInfo) -> std::result::Result<Vec<u8>, String> {
        self(component)
    }
}

pub type BuildCallback = Arc<dyn Fn(&BuildResult) + Send + Sync>;

struct Shared {
    queue: TaskQueue,
    cache: Arc<BuildCache>,
    compiler: Arc<dyn Compiler>,
    callbacks: RwLock<Vec<BuildCallback>>,
    metrics: MetricsRecorder,
}

struct Running {
    token: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    results: JoinHandle<()>,
    closer: JoinHandle<()>,
}

enum Lifecycle {
    Created,
    Started(Running),
    Stopped,
}

pub struct BuildPipeline {
    config: BuildConfig,
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

impl BuildPipeline {
    pub fn new(config: BuildConfig, cache: Arc<BuildCache>, compiler: Arc<dyn Compiler>) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: TaskQueue::new(config.queue_capacity),
                cache,
                compiler,
                callbacks: RwLock::new(Vec::new()),
                metrics: MetricsRecorder::default(),
            }),
            config,
            lifecycle: Mutex::new(Lifecycle::Created),
        }
    }

    /// Spawn the worker pool and the result loop on the current Tokio runtime.
    ///
    /// Workers observe a child of `token`: cancelling it has the same effect
    /// as [`stop`](Self::stop), minus the join. The queue is closed and
    /// later enqueues fail with [`PipelineError::Stopped`].
    pub fn start(&self, token: &CancellationToken) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Created => {}
            Lifecycle::Started(_) => return Err(PipelineError::AlreadyStarted),
            Lifecycle::Stopped => return Err(PipelineError::Stopped),
        }

        let token = token.child_token();
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        let workers = (0..self.config.workers.max(1))
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    Arc::clone(&self.shared),
                    token.clone(),
                    results_tx.clone(),
                ))
            })
            .collect();
        drop(results_tx);

        let results = tokio::spawn(run_result_loop(Arc::clone(&self.shared), results_rx));
        let closer = tokio::spawn(close_on_cancel(Arc::clone(&self.shared), token.clone()));

        tracing::debug!(workers = self.config.workers, queue_capacity = self.config.queue_capacity, "build pipeline started");
        *lifecycle = Lifecycle::Started(Running {
            token,
            workers,
            results,
            closer,
        });
        Ok(())
    }

    /// Stop the pipeline and wait for in-flight builds to be delivered.
    ///
    /// Idempotent. Callers wanting a deadline wrap this in
    /// `tokio::time::timeout`.
    pub async fn stop(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Stopped);
        let abandoned = self.shared.queue.close();

        let Lifecycle::Started(running) = previous else {
            return Ok(());
        };

        running.token.cancel();
        let mut failure = None;
        for worker in running.workers {
            if let Err(err) = worker.await {
                failure.get_or_insert_with(|| PipelineError::Join(err.to_string()));
            }
        }
        if let Err(err) = running.results.await {
            failure.get_or_insert_with(|| PipelineError::Join(err.to_string()));
        }
        if let Err(err) = running.closer.await {
            failure.get_or_insert_with(|| PipelineError::Join(err.to_string()));
        }

        if abandoned > 0 {
            tracing::info!(abandoned, "build pipeline stopped with queued tasks");
        } else {
            tracing::debug!("build pipeline stopped");
        }

        failure.map_or(Ok(()), Err)
    }

    /// `false` once stopped or once the token given to `start` was cancelled.
    pub fn is_running(&self) -> bool {
        match &*self.lifecycle.lock() {
            Lifecycle::Started(running) => !running.token.is_cancelled(),
            Lifecycle::Created | Lifecycle::Stopped => false,
        }
    }

    /// Enqueue a normal-priority build, honouring the configured backpressure.
    pub async fn build(&self, component: Arc<ComponentInfo>) -> Result<()> {
        self.enqueue(BuildTask::new(component, BuildPriority::Normal)).await
    }

    /// Enqueue an elevated-priority build, honouring the configured backpressure.
    pub async fn build_with_priority(&self, component: Arc<ComponentInfo>) -> Result<()> {
        self.enqueue(BuildTask::new(component, BuildPriority::Elevated)).await
    }

    /// Enqueue without waiting; a saturated queue always yields `QueueFull`.
    pub fn try_build(&self, component: Arc<ComponentInfo>, priority: BuildPriority) -> Result<()> {
        self.shared.queue.try_push(BuildTask::new(component, priority))
    }

    async fn enqueue(&self, task: BuildTask) -> Result<()> {
        let name = Arc::clone(&task.component);
        let outcome = match self.config.backpressure {
            Backpressure::Reject => self.shared.queue.try_push(task),
            Backpressure::Block => self.shared.queue.push_wait(task).await,
        };
        if let Err(err) = &outcome {
            tracing::warn!(component = %name.name, error = %err, "build not enqueued");
        }
        outcome
    }

    /// Register a result observer. Every callback sees every result.
    pub fn add_callback<F>(&self, callback: F)
    where
        F: Fn(&BuildResult) + Send + Sync + 'static,
    {
        self.shared.callbacks.write().push(Arc::new(callback));
    }

    pub fn metrics(&self) -> BuildMetrics {
        self.shared.metrics.snapshot(self.shared.cache.hit_rate())
    }

    pub fn cache(&self) -> &Arc<BuildCache> {
        &self.shared.cache
    }

    pub fn clear_cache(&self) {
        self.shared.cache.clear();
    }

    /// Tasks waiting to be dequeued.
    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }
}

impl Drop for BuildPipeline {
    fn drop(&mut self) {
        if let Lifecycle::Started(running) = &*self.lifecycle.lock() {
            running.token.cancel();
        }
        self.shared.queue.close();
    }
}

impl std::fmt::Debug for BuildPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildPipeline")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("queued", &self.queue_len())
            .finish_non_exhaustive()
    }
}

async fn run_worker(
    id: usize,
    shared: Arc<Shared>,
    token: CancellationToken,
    results: mpsc::UnboundedSender<BuildResult>,
) {
    while let Some(task) = shared.queue.pop(&token).await {
        let result = execute(&shared, task).await;
        if results.send(result).is_err() {
            break;
        }
    }
    tracing::trace!(worker = id, "build worker exited");
}

async fn close_on_cancel(shared: Arc<Shared>, token: CancellationToken) {
    token.cancelled().await;
    let abandoned = shared.queue.close();
    if abandoned > 0 {
        tracing::info!(abandoned, "build pipeline cancelled with queued tasks");
    }
}

async fn execute(shared: &Arc<Shared>, task: BuildTask) -> BuildResult {
    let started = Instant::now();
    let job_shared = Arc::clone(shared);
    let job_task = task.clone();

    match tokio::task::spawn_blocking(move || build_blocking(&job_shared, &job_task, started)).await {
        Ok(result) => result,
        Err(err) => BuildResult::failure(&task, String::new(), format!("build task failed: {err}"), started),
    }
}

fn build_blocking(shared: &Shared, task: &BuildTask, started: Instant) -> BuildResult {
    let hash = content_hash(&task.component);

    if let Some(output) = shared.cache.get(&hash) {
        return BuildResult::success(task, hash, output, true, started);
    }

    let compiled = catch_unwind(AssertUnwindSafe(|| shared.compiler.compile(&task.component)));
    match compiled {
        Ok(Ok(output)) => {
            let output: Arc<[u8]> = Arc::from(output);
            shared.cache.set(hash.clone(), Arc::clone(&output));
            BuildResult::success(task, hash, output, false, started)
        }
        Ok(Err(message)) => BuildResult::failure(task, hash, message, started),
        Err(panic) => {
            let message = panic_message(&*panic);
            tracing::error!(component = %task.component.name, panic = %message, "compiler panicked");
            BuildResult::failure(task, hash, format!("compiler panicked: {message}"), started)
        }
    }
}

async fn run_result_loop(shared: Arc<Shared>, mut results: mpsc::UnboundedReceiver<BuildResult>) {
    while let Some(result) = results.recv().await {
        shared.metrics.record(&result);

        match &result.error {
            None => tracing::debug!(
                component = %result.component.name,
                cache_hit = result.cache_hit,
                duration_ms = result.duration.as_millis() as u64,
                "build finished"
            ),
            Some(error) => tracing::warn!(component = %result.component.name, %error, "build failed"),
        }

        // Snapshot so callbacks may re-enter the pipeline.
        let callbacks = shared.callbacks.read().clone();
        for callback in callbacks {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(&result))) {
                tracing::error!(panic = %panic_message(&*panic), "build callback panicked");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
