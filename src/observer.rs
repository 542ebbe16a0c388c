use crate::model::SubmissionResult;

/// Sink for judging progress. The engine invokes these from whichever worker
/// thread is judging, never while holding an engine lock; implementations
/// must be thread-safe and should return quickly.
///
/// Per submission, ticks arrive in order with `completed` running 1..=total,
/// each partial follows the tick it reflects, and the final result follows
/// every tick and partial. `on_evaluation_finished` fires exactly once per
/// `evaluate_all`, after the last final result.
pub trait Observer: Send + Sync {
    /// One test case of `contestant_id`/`problem_id` finished.
    fn on_test_tick(&self, contestant_id: &str, problem_id: &str, completed: usize, total: usize) {
        let _ = (contestant_id, problem_id, completed, total);
    }

    /// Scores recomputed over the prefix of test cases run so far.
    fn on_partial_result(&self, result: &SubmissionResult) {
        let _ = result;
    }

    /// A submission finished (or was cut short by cancellation).
    fn on_final_result(&self, result: &SubmissionResult);

    /// The whole `evaluate_all` run is over.
    fn on_evaluation_finished(&self);
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NullObserver;

impl Observer for NullObserver {
    fn on_final_result(&self, _result: &SubmissionResult) {}

    fn on_evaluation_finished(&self) {}
}

/// Logs progress through the `log` facade; the CLI's default sink.
#[derive(Debug, Default)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn on_test_tick(&self, contestant_id: &str, problem_id: &str, completed: usize, total: usize) {
        log::debug!("{contestant_id}/{problem_id}: test case {completed}/{total}");
    }

    fn on_final_result(&self, result: &SubmissionResult) {
        log::info!(
            "{}/{}: {} ({}/{})",
            result.contestant_id,
            result.problem_id,
            result.status,
            result.score,
            result.max_score
        );
    }

    fn on_evaluation_finished(&self) {
        log::info!("evaluation finished");
    }
}
