use std::collections::VecDeque;
use std::sync::Arc;

use std::sync::Mutex;
use tokio::sync::{Notify, mpsc, oneshot};

use crate::model::{Contestant, Problem, SubmissionResult};

/// One unit of judging work: a contestant plus the problems to judge for
/// them, in order. Keeping a contestant's problems in a single task
/// serializes their submissions on one worker, so two workers never race to
/// rebuild the same binary.
pub struct Task {
    pub contestant: Arc<Contestant>,
    pub problems: Vec<Arc<Problem>>,
    /// Streams every finished submission back to the scheduler.
    pub results: Option<mpsc::UnboundedSender<SubmissionResult>>,
    /// One-shot reply for single-submission rejudges.
    pub responder: Option<oneshot::Sender<SubmissionResult>>,
}

#[derive(Default)]
pub struct TaskQueue {
    queue: Mutex<VecDeque<Task>>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub fn push(&self, task: Task) {
        self.queue.lock().unwrap().push_back(task);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> Task {
        loop {
            if let Some(task) = self.queue.lock().unwrap().pop_front() {
                return task;
            }
            self.notify.notified().await;
        }
    }

    /// Drop every queued task; returns how many were discarded. Dropping a
    /// task also drops its channels, which tells the scheduler it will never
    /// produce results.
    pub fn clear(&self) -> usize {
        let mut queue = self.queue.lock().unwrap();
        let drained = queue.len();
        queue.clear();
        drained
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }
}
