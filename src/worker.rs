use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::Engine;
use crate::model::{Contestant, Problem, Status, SubmissionResult};
use crate::observer::Observer;
use crate::queue::{Task, TaskQueue};

/// Per-worker status strings, written by the owning worker and readable by
/// anyone (UIs poll this).
#[derive(Default)]
pub struct StatusBoard {
    statuses: RwLock<HashMap<usize, String>>,
}

impl StatusBoard {
    fn set(&self, worker_id: usize, status: impl Into<String>) {
        self.statuses.write().insert(worker_id, status.into());
    }

    pub fn snapshot(&self) -> HashMap<usize, String> {
        self.statuses.read().clone()
    }
}

/// Tracks how many submitted tasks are still outstanding so
/// `await_quiescence` has something to wait on.
#[derive(Default)]
struct TaskCounter {
    pending: Mutex<usize>,
    idle: Notify,
}

impl TaskCounter {
    fn add(&self, n: usize) {
        *self.pending.lock() += n;
    }

    fn finish(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(n);
        if *pending == 0 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if *self.pending.lock() == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct PoolInner {
    engine: Arc<Engine>,
    queue: Arc<TaskQueue>,
    token: CancellationToken,
    status: Arc<StatusBoard>,
    counter: Arc<TaskCounter>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Fixed-size pool of judging workers sharing one task queue. Cloning is
/// cheap; all clones drive the same pool.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Spin up `worker_count` workers. The pool's cancellation token is a
    /// child of the engine's, so an engine-wide cancel stops the pool too.
    pub fn start(worker_count: usize, engine: Arc<Engine>, observer: Arc<dyn Observer>) -> Self {
        let queue = Arc::new(TaskQueue::new());
        let token = engine.cancellation_token().child_token();
        let status = Arc::new(StatusBoard::default());
        let counter = Arc::new(TaskCounter::default());

        let mut handles = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            handles.push(tokio::spawn(worker(
                id,
                engine.clone(),
                queue.clone(),
                observer.clone(),
                token.clone(),
                status.clone(),
                counter.clone(),
            )));
        }
        log::info!("worker pool started with {worker_count} workers");

        Self {
            inner: Arc::new(PoolInner {
                engine,
                queue,
                token,
                status,
                counter,
                handles: Mutex::new(handles),
            }),
        }
    }

    /// Enqueue one contestant's run over `problems`, streaming each finished
    /// submission to `results`.
    pub fn submit_batch(
        &self,
        contestant: Arc<Contestant>,
        problems: Vec<Arc<Problem>>,
        results: mpsc::UnboundedSender<SubmissionResult>,
    ) {
        self.inner.counter.add(1);
        self.inner.queue.push(Task {
            contestant,
            problems,
            results: Some(results),
            responder: None,
        });
    }

    /// Enqueue a single submission (rejudge path). The receiver resolves
    /// with the result, or errors if the task was discarded by a cancel.
    pub fn submit(
        &self,
        contestant: Arc<Contestant>,
        problem: Arc<Problem>,
    ) -> oneshot::Receiver<SubmissionResult> {
        let (responder, receiver) = oneshot::channel();
        self.inner.counter.add(1);
        self.inner.queue.push(Task {
            contestant,
            problems: vec![problem],
            results: None,
            responder: Some(responder),
        });
        receiver
    }

    /// Block until every submitted task has completed or been discarded.
    pub async fn await_quiescence(&self) {
        self.inner.counter.wait_idle().await;
    }

    /// Stop everything: global engine cancel (kills running children), drop
    /// the queued backlog, and let workers wind down. Idempotent and
    /// non-blocking; pair with `await_quiescence` to observe completion.
    pub fn cancel_all(&self) {
        self.inner.engine.cancel();
        let drained = self.inner.queue.clear();
        self.inner.counter.finish(drained);
    }

    pub fn worker_status(&self) -> HashMap<usize, String> {
        self.inner.status.snapshot()
    }

    /// Stop the pool's workers (without touching the engine) and join them.
    pub async fn shutdown(&self) {
        self.inner.token.cancel();
        let handles: Vec<_> = self.inner.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn worker(
    id: usize,
    engine: Arc<Engine>,
    queue: Arc<TaskQueue>,
    observer: Arc<dyn Observer>,
    token: CancellationToken,
    status: Arc<StatusBoard>,
    counter: Arc<TaskCounter>,
) {
    log::info!("worker {id} initialized");
    status.set(id, "Idle");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                // Discard the backlog so nothing waits on tasks that will
                // never run.
                let drained = queue.clear();
                counter.finish(drained);
                status.set(id, "Stopped");
                break;
            }

            task = queue.pop() => {
                run_task(id, &engine, &observer, &token, &status, task).await;
                counter.finish(1);
                status.set(id, "Idle");
            }
        }
    }

    status.set(id, "Terminated");
    log::info!("worker {id} has shut down gracefully");
}

async fn run_task(
    id: usize,
    engine: &Arc<Engine>,
    observer: &Arc<dyn Observer>,
    token: &CancellationToken,
    status: &StatusBoard,
    task: Task,
) {
    let Task {
        contestant,
        problems,
        results,
        responder,
    } = task;

    let mut last_result = None;
    for problem in problems {
        if token.is_cancelled() {
            break;
        }
        status.set(id, format!("Evaluating {} - {}", contestant.id, problem.id));

        let judging_engine = engine.clone();
        let judging_observer = observer.clone();
        let judged_contestant = contestant.clone();
        let judged_problem = problem.clone();
        let handle = tokio::task::spawn_blocking(move || {
            judging_engine.evaluate_submission(
                &judged_contestant,
                &judged_problem,
                judging_observer.as_ref(),
            )
        });

        let result = match handle.await {
            Ok(result) => result,
            Err(e) => {
                log::error!(
                    "judging {} - {} panicked on worker {id}: {e}",
                    contestant.id,
                    problem.id
                );
                let mut failed = SubmissionResult::new(&contestant.id, &problem.id);
                failed.status = Status::RuntimeError;
                failed
            }
        };

        observer.on_final_result(&result);
        if let Some(sender) = &results {
            let _ = sender.send(result.clone());
        }
        last_result = Some(result);
    }

    if let Some(responder) = responder {
        if let Some(result) = last_result {
            let _ = responder.send(result);
        }
    }
}
