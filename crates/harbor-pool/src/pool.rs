use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Instant,
};

use anyhow::Error;
use tracing::{event, instrument, Level};

use crate::{
    history::{decide, LoadHistory, Sample, Scale},
    queue::{Task, TaskQueue},
    status::load_factor,
    PoolError, PoolOptions, PoolStatus, SubmitError,
};

/// Callback invoked with the item of every finished task.
pub type Completion<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Adaptive pool of worker threads.
///
/// Workers take tasks from a FIFO queue and run them with the item they were submitted with.
/// After every task the item is handed to the completion callback, whether the job succeeded,
/// failed or panicked. A manager thread periodically grows or shrinks the number of workers
/// between the configured bounds.
pub struct WorkerPool<T> {
    shared: Arc<Shared<T>>,
    manager: Mutex<Option<JoinHandle<()>>>,
}

struct Shared<T> {
    options: PoolOptions,
    state: Mutex<PoolState<T>>,
    /// Signalled when a task is queued, an exit is requested, or on shutdown.
    not_empty: Condvar,
    /// Wakes the manager early on shutdown.
    manager_wake: Condvar,
    completion: Mutex<Option<Completion<T>>>,
    next_worker: AtomicUsize,
}

struct PoolState<T> {
    queue: TaskQueue<T>,
    live: usize,
    busy: usize,
    /// Number of idle workers asked to exit.
    exit_requested: usize,
    shutdown: bool,
    history: LoadHistory,
    last_shrink: Option<Instant>,
    workers: Vec<JoinHandle<()>>,
}

impl<T> WorkerPool<T>
where
    T: Send + 'static,
{
    /// Start a pool with `min_threads` workers and its manager.
    #[instrument("WorkerPool::new", skip_all)]
    pub fn new(options: PoolOptions) -> Result<Self, PoolError> {
        options.validate()?;
        event!(
            Level::DEBUG,
            min = options.min_threads,
            max = options.max_threads,
            "starting pool"
        );

        let state = PoolState {
            queue: TaskQueue::new(),
            live: 0,
            busy: 0,
            exit_requested: 0,
            shutdown: false,
            history: LoadHistory::new(options.history_len),
            last_shrink: None,
            workers: Vec::new(),
        };
        let shared = Arc::new(Shared {
            options,
            state: Mutex::new(state),
            not_empty: Condvar::new(),
            manager_wake: Condvar::new(),
            completion: Mutex::new(None),
            next_worker: AtomicUsize::new(0),
        });

        // If anything below fails, dropping the pool shuts down what was already started
        let pool = Self {
            shared,
            manager: Mutex::new(None),
        };

        {
            let mut state = pool.shared.lock();
            for _ in 0..pool.shared.options.min_threads {
                let handle = pool.shared.spawn_worker().map_err(PoolError::Spawn)?;
                state.workers.push(handle);
                state.live += 1;
            }
        }

        let shared = pool.shared.clone();
        let manager = thread::Builder::new()
            .name(format!("{}-manager", pool.shared.options.thread_name))
            .spawn(move || shared.run_manager())
            .map_err(PoolError::Spawn)?;
        *lock(&pool.manager) = Some(manager);

        Ok(pool)
    }

    /// Queue `job` to run on a worker with `item`.
    ///
    /// Never waits for a worker. Once the pool is shutting down the task is dropped.
    pub fn submit<F>(&self, job: F, item: T) -> Result<(), SubmitError>
    where
        F: FnOnce(&mut T) -> Result<(), Error> + Send + 'static,
    {
        let mut state = self.shared.lock();

        if state.shutdown {
            event!(Level::DEBUG, "dropping task submitted during shutdown");
            return Err(SubmitError::ShuttingDown);
        }

        state.queue.push(Task {
            job: Box::new(job),
            item,
        });
        drop(state);

        self.shared.not_empty.notify_one();

        Ok(())
    }
}

impl<T> WorkerPool<T> {
    /// Set the callback that receives items of finished tasks.
    pub fn set_completion<F>(&self, completion: F)
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        *lock(&self.shared.completion) = Some(Arc::new(completion));
    }

    /// Remove the completion callback, items of tasks finishing afterwards are dropped.
    pub fn clear_completion(&self) {
        lock(&self.shared.completion).take();
    }

    /// Take a consistent snapshot of the pool's counters.
    pub fn status(&self) -> PoolStatus {
        let state = self.shared.lock();
        let options = &self.shared.options;

        PoolStatus {
            min_threads: options.min_threads,
            max_threads: options.max_threads,
            live_threads: state.live,
            busy_threads: state.busy,
            queue_depth: state.queue.len(),
            load_factor: load_factor(state.busy, state.live),
        }
    }

    /// Stop the pool and wait for its threads.
    ///
    /// The completion callback is cleared before anything else. Workers finish the task they
    /// are running and drain what is still queued, dropping the items afterwards.
    #[instrument("WorkerPool::shutdown", skip_all)]
    pub fn shutdown(&self) {
        self.clear_completion();

        {
            let mut state = self.shared.lock();
            if !state.shutdown {
                event!(Level::DEBUG, queued = state.queue.len(), "shutting down");
                state.shutdown = true;
            }
        }
        self.shared.not_empty.notify_all();
        self.shared.manager_wake.notify_all();

        let manager = lock(&self.manager).take();
        if let Some(manager) = manager {
            join(manager);
        }

        let workers = std::mem::take(&mut self.shared.lock().workers);
        for worker in workers {
            join(worker);
        }
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        lock(&self.state)
    }
}

impl<T> Shared<T>
where
    T: Send + 'static,
{
    fn spawn_worker(self: &Arc<Self>) -> Result<JoinHandle<()>, std::io::Error> {
        let id = self.next_worker.fetch_add(1, Ordering::Relaxed);
        let shared = self.clone();

        thread::Builder::new()
            .name(format!("{}-{}", self.options.thread_name, id))
            .spawn(move || shared.run_worker())
    }

    fn run_worker(&self) {
        event!(Level::TRACE, "worker started");

        while let Some(task) = self.next_task() {
            self.execute(task);
        }

        event!(Level::TRACE, "worker exiting");
    }

    /// Wait for the next task, or `None` if this worker should exit.
    fn next_task(&self) -> Option<Task<T>> {
        let mut state = self.lock();

        loop {
            if let Some(task) = state.queue.pop() {
                state.busy += 1;
                return Some(task);
            }

            if state.shutdown {
                state.live -= 1;
                return None;
            }

            if state.exit_requested > 0 {
                state.exit_requested -= 1;

                // Re-checked per worker, concurrent exits must not drop below the floor
                if state.live > self.options.min_threads {
                    state.live -= 1;
                    return None;
                }
            }

            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn execute(&self, task: Task<T>) {
        let Task { job, mut item } = task;

        match panic::catch_unwind(AssertUnwindSafe(|| job(&mut item))) {
            Ok(Ok(())) => {}
            Ok(Err(error)) => event!(Level::WARN, "task failed: {:#}", error),
            Err(_) => event!(Level::ERROR, "task panicked"),
        }

        let completion = lock(&self.completion).clone();
        match completion {
            Some(completion) => {
                if panic::catch_unwind(AssertUnwindSafe(|| completion(item))).is_err() {
                    event!(Level::ERROR, "completion callback panicked");
                }
            }
            None => event!(Level::TRACE, "no completion callback, dropping item"),
        }

        self.lock().busy -= 1;
    }

    fn run_manager(self: &Arc<Self>) {
        event!(Level::TRACE, "manager started");
        let mut state = self.lock();

        loop {
            let (guard, _timeout) = self
                .manager_wake
                .wait_timeout_while(state, self.options.manage_interval, |state| {
                    !state.shutdown
                })
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;

            if state.shutdown {
                break;
            }

            self.manage(&mut state);
        }

        event!(Level::TRACE, "manager exiting");
    }

    fn manage(self: &Arc<Self>, state: &mut PoolState<T>) {
        state.workers.retain(|worker| !worker.is_finished());

        let sample = Sample {
            live: state.live,
            busy: state.busy,
            queued: state.queue.len(),
        };
        state.history.push(sample.load_factor());

        let cooling_down = state
            .last_shrink
            .is_some_and(|last| last.elapsed() < self.options.shrink_cooldown);

        match decide(&self.options, &state.history, sample, cooling_down) {
            Scale::Hold => {}
            Scale::Grow(count) => {
                event!(Level::DEBUG, ?sample, count, "growing pool");
                state.exit_requested = 0;
                self.grow(state, count);
            }
            Scale::Shrink(count) => {
                event!(Level::DEBUG, ?sample, count, "shrinking pool");
                state.exit_requested = count;
                state.last_shrink = Some(Instant::now());

                for _ in 0..count {
                    self.not_empty.notify_one();
                }
            }
        }
    }

    fn grow(self: &Arc<Self>, state: &mut PoolState<T>, count: usize) {
        for _ in 0..count {
            if state.live >= self.options.max_threads {
                break;
            }

            // Holding the pool lock here, so the new worker waits until the count is updated
            match self.spawn_worker() {
                Ok(handle) => {
                    state.workers.push(handle);
                    state.live += 1;
                }
                Err(error) => {
                    event!(Level::WARN, ?error, "failed to spawn worker, retrying next tick");
                    break;
                }
            }
        }
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn join(handle: JoinHandle<()>) {
    if handle.thread().id() == thread::current().id() {
        return;
    }

    if handle.join().is_err() {
        event!(Level::ERROR, "pool thread panicked");
    }
}
