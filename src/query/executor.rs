//! Bounded-parallel query execution
//!
//! A fixed-size worker pool with a bounded submission queue executes
//! [`SeriesTask`]s. For a batch of n tasks, n-1 are submitted to the pool
//! under the executor mutex while the caller runs the last one on its own
//! thread, then blocks on a counting barrier until the workers finish.
//!
//! The mutex guards only the batch-submission window; the barrier is fully
//! constructed before any task is published, and the queue's own
//! synchronization makes it visible to workers. Worker threads never take
//! the executor mutex.
//!
//! Process shutdown rejects new submissions and waits up to five seconds
//! for in-flight tasks to drain; tasks are not preempted.

use crate::config::ExecutorSettings;
use crate::error::{Error, Result};
use crate::query::task::SeriesTask;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{mpsc, Arc, OnceLock};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long shutdown waits for in-flight tasks before detaching workers
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

// ============================================================================
// Counting Barrier
// ============================================================================

/// A down-counter one thread awaits while others signal
///
/// The submitter constructs the barrier with the number of pooled tasks,
/// each worker calls [`CountingBarrier::count_down`] exactly once, and the
/// submitter blocks in [`CountingBarrier::wait`] until the count reaches
/// zero.
pub struct CountingBarrier {
    remaining: Mutex<usize>,
    zero: Condvar,
}

impl CountingBarrier {
    /// Create a barrier expecting `count` signals
    pub fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            zero: Condvar::new(),
        }
    }

    /// Record one completion; wakes the waiter when the count reaches zero
    pub fn count_down(&self) {
        let mut remaining = self.remaining.lock();
        debug_assert!(*remaining > 0, "barrier counted down past zero");
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.zero.notify_all();
        }
    }

    /// Block until every expected signal has arrived
    pub fn wait(&self) {
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            self.zero.wait(&mut remaining);
        }
    }
}

// ============================================================================
// Worker Pool
// ============================================================================

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size thread pool with a bounded queue
///
/// Submission blocks when the queue is full, providing natural backpressure
/// for large query fan-outs.
struct WorkerPool {
    sender: Mutex<Option<SyncSender<Job>>>,
    live: Arc<(Mutex<usize>, Condvar)>,
}

impl WorkerPool {
    fn new(name: &str, threads: usize, queue_size: usize) -> Self {
        let threads = threads.max(1);
        let (sender, receiver) = mpsc::sync_channel::<Job>(queue_size.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let live = Arc::new((Mutex::new(threads), Condvar::new()));

        for i in 0..threads {
            let receiver = receiver.clone();
            let live = live.clone();
            let thread_name = format!("{}-{}", name, i);
            thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || {
                    Self::worker_loop(&receiver);
                    let (count, cv) = &*live;
                    *count.lock() -= 1;
                    cv.notify_all();
                })
                .unwrap_or_else(|e| panic!("failed to spawn {}: {}", thread_name, e));
        }

        Self {
            sender: Mutex::new(Some(sender)),
            live,
        }
    }

    fn worker_loop(receiver: &Mutex<Receiver<Job>>) {
        loop {
            // one idle worker at a time parks in recv; the lock is released
            // as soon as a job is handed out
            let job = receiver.lock().recv();
            match job {
                Ok(job) => job(),
                // channel closed: drain complete, worker exits
                Err(_) => break,
            }
        }
    }

    /// Queue a job; blocks while the queue is full
    fn submit(&self, job: Job) -> Result<()> {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => sender
                .send(job)
                .map_err(|_| Error::Unavailable("worker pool is shut down".into())),
            None => Err(Error::Unavailable("worker pool is shut down".into())),
        }
    }

    /// Close the queue and wait up to `drain` for workers to finish
    fn shutdown(&self, drain: Duration) {
        // dropping the sender closes the channel; workers drain what is
        // queued and exit
        self.sender.lock().take();

        let (count, cv) = &*self.live;
        let mut remaining = count.lock();
        let deadline = std::time::Instant::now() + drain;
        while *remaining > 0 {
            if cv.wait_until(&mut remaining, deadline).timed_out() {
                warn!(workers = *remaining, "shutdown drain timed out; abandoning workers");
                return;
            }
        }
        debug!("worker pool drained");
    }
}

// ============================================================================
// Query Executor
// ============================================================================

/// Executor coordinating parallel and sequential task batches
pub struct QueryExecutor {
    pool: WorkerPool,
    /// Guards only the batch-submission window
    submit_lock: Mutex<()>,
    stopped: AtomicBool,
}

static INSTANCE: OnceLock<Arc<QueryExecutor>> = OnceLock::new();

impl QueryExecutor {
    /// Create an executor with the given pool sizing
    pub fn new(settings: &ExecutorSettings) -> Self {
        info!(
            threads = settings.thread_count,
            queue = settings.queue_size,
            "starting query executor"
        );
        Self {
            pool: WorkerPool::new("qexec", settings.thread_count, settings.queue_size),
            submit_lock: Mutex::new(()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Initialize the process-wide executor; later calls return the first
    /// instance
    pub fn init(settings: &ExecutorSettings) -> Arc<QueryExecutor> {
        INSTANCE
            .get_or_init(|| Arc::new(QueryExecutor::new(settings)))
            .clone()
    }

    /// The process-wide executor, if initialized
    pub fn instance() -> Option<Arc<QueryExecutor>> {
        INSTANCE.get().cloned()
    }

    /// Run a batch with pool parallelism
    ///
    /// All but the last task go to the pool; the caller runs the last one
    /// inline and then waits on the barrier. Single-task batches run inline
    /// without touching the pool.
    pub fn execute_parallel(&self, tasks: &[Arc<SeriesTask>]) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("executor is shutting down".into()));
        }
        let n = tasks.len();
        if n <= 1 {
            if let Some(task) = tasks.first() {
                task.perform();
            }
            return Ok(());
        }

        let barrier = Arc::new(CountingBarrier::new(n - 1));
        {
            let _guard = self.submit_lock.lock();
            for task in &tasks[..n - 1] {
                task.attach_signal(barrier.clone());
                let job_task = task.clone();
                if let Err(e) = self.pool.submit(Box::new(move || job_task.perform())) {
                    // pool refused (shutdown race): run on the caller so the
                    // barrier still reaches zero
                    warn!(error = %e, "pool submission failed, running task inline");
                    task.perform();
                }
            }
        }

        tasks[n - 1].perform();
        barrier.wait();
        Ok(())
    }

    /// Run every task on the calling thread, in submission order
    pub fn execute_sequential(&self, tasks: &[Arc<SeriesTask>]) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("executor is shutting down".into()));
        }
        for task in tasks {
            task.perform();
        }
        Ok(())
    }

    /// Reject new work and drain in-flight tasks, waiting at most five
    /// seconds
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pool.shutdown(SHUTDOWN_DRAIN);
        info!("query executor shutdown complete");
    }
}

// ============================================================================
// Tests
// ============================================================================
