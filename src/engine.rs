use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::judge::{self, CompilerCache, DetectorCache, ProcessRegistry};
use crate::model::{Contestant, Problem, Status, SubmissionResult, TestCaseResult};
use crate::observer::Observer;
use crate::worker::WorkerPool;

/// The judging engine. Owns the long-lived caches, the registry of live
/// child processes and the root cancellation token; contestants and problems
/// are borrowed read-only from the host for the duration of a run.
pub struct Engine {
    settings: Settings,
    token: RwLock<CancellationToken>,
    registry: Arc<ProcessRegistry>,
    compiler: CompilerCache,
    detector: DetectorCache,
}

impl Engine {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            token: RwLock::new(CancellationToken::new()),
            registry: Arc::new(ProcessRegistry::default()),
            compiler: CompilerCache::default(),
            detector: DetectorCache::default(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Current run's cancellation token; invalidated by [`Engine::reset`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.read().clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.read().is_cancelled()
    }

    /// Stop everything: flips the cancellation token and force-kills every
    /// registered child. Non-blocking and idempotent; judging loops exit at
    /// the next test-case boundary.
    pub fn cancel(&self) {
        self.token.read().cancel();
        let killed = self.registry.kill_all();
        if killed > 0 {
            log::info!("cancellation killed {killed} running child processes");
        }
    }

    /// Re-arm after a cancel and purge the compiler/detection caches.
    pub fn reset(&self) {
        *self.token.write() = CancellationToken::new();
        self.registry.rearm();
        self.compiler.reset();
        self.detector.reset();
    }

    /// Judge every contestant against every problem. `parallel` with
    /// `threads > 1` runs a worker pool (capped at the contestant count);
    /// otherwise submissions run one at a time on a single blocking task.
    /// Emits `on_evaluation_finished` exactly once, after the last final
    /// result.
    pub async fn evaluate_all(
        self: &Arc<Self>,
        contestants: &[Arc<Contestant>],
        problems: &[Arc<Problem>],
        observer: Arc<dyn Observer>,
        parallel: bool,
        threads: usize,
    ) -> HashMap<(String, String), SubmissionResult> {
        let results = if parallel && threads > 1 && !contestants.is_empty() {
            self.evaluate_all_parallel(contestants, problems, observer.clone(), threads)
                .await
        } else {
            self.evaluate_all_sequential(contestants, problems, observer.clone())
                .await
        };
        observer.on_evaluation_finished();
        results
    }

    async fn evaluate_all_sequential(
        self: &Arc<Self>,
        contestants: &[Arc<Contestant>],
        problems: &[Arc<Problem>],
        observer: Arc<dyn Observer>,
    ) -> HashMap<(String, String), SubmissionResult> {
        let engine = self.clone();
        let contestants = contestants.to_vec();
        let problems = problems.to_vec();

        let judged = tokio::task::spawn_blocking(move || {
            let mut results = HashMap::new();
            'outer: for contestant in &contestants {
                for problem in &problems {
                    if engine.is_cancelled() {
                        break 'outer;
                    }
                    let result =
                        engine.evaluate_submission(contestant, problem, observer.as_ref());
                    observer.on_final_result(&result);
                    results.insert((contestant.id.clone(), problem.id.clone()), result);
                }
            }
            results
        })
        .await;

        judged.unwrap_or_else(|e| {
            log::error!("sequential evaluation panicked: {e}");
            HashMap::new()
        })
    }

    async fn evaluate_all_parallel(
        self: &Arc<Self>,
        contestants: &[Arc<Contestant>],
        problems: &[Arc<Problem>],
        observer: Arc<dyn Observer>,
        threads: usize,
    ) -> HashMap<(String, String), SubmissionResult> {
        let worker_count = threads.min(contestants.len());
        log::info!(
            "judging {} contestants on {worker_count} workers",
            contestants.len()
        );
        let pool = WorkerPool::start(worker_count, self.clone(), observer);

        let (results_tx, mut results_rx) = mpsc::unbounded_channel();
        for contestant in contestants {
            // Only pairs with a solution become work; sequential mode covers
            // the rest with Pending results.
            let assigned: Vec<Arc<Problem>> = problems
                .iter()
                .filter(|p| contestant.has_solution_for(&p.id))
                .cloned()
                .collect();
            if assigned.is_empty() {
                continue;
            }
            pool.submit_batch(contestant.clone(), assigned, results_tx.clone());
        }
        drop(results_tx);

        // Every task holds a sender clone, so the channel closes once all
        // tasks finished or were discarded by a cancel.
        let mut results = HashMap::new();
        while let Some(result) = results_rx.recv().await {
            results.insert(
                (result.contestant_id.clone(), result.problem_id.clone()),
                result,
            );
        }

        pool.await_quiescence().await;
        pool.shutdown().await;
        results
    }

    /// Judge one submission, blocking. Emits a tick and a partial result per
    /// test case; the caller owns emitting the final result. Cancellation is
    /// honored between test cases.
    pub fn evaluate_submission(
        &self,
        contestant: &Contestant,
        problem: &Problem,
        observer: &dyn Observer,
    ) -> SubmissionResult {
        let mut result = SubmissionResult::new(&contestant.id, &problem.id);

        let Some(solution_path) = contestant.solution_path(&problem.id) else {
            log::debug!("no solution for {}/{}", contestant.id, problem.id);
            return result;
        };
        if problem.test_cases.is_empty() {
            log::warn!(
                "no test cases for problem {}, marking {} pending",
                problem.id,
                contestant.id
            );
            return result;
        }

        log::info!("evaluating {}/{}", contestant.id, problem.id);
        let settings = self.settings.problem_settings(&problem.id);

        let is_native = matches!(
            solution_path.extension().and_then(|e| e.to_str()),
            Some("c") | Some("cpp")
        );
        if is_native {
            if let Err(e) = self.compiler.compile(solution_path) {
                log::info!("compilation failed for {}/{}", contestant.id, problem.id);
                result.test_case_results.push(TestCaseResult {
                    status: Status::CompilationError,
                    error_message: e.to_string(),
                    ..Default::default()
                });
                result.status = Status::CompilationError;
                return result;
            }
        }

        let io = self.detector.detect(solution_path, Some(&problem.id));
        let weights: Vec<f64> = problem.test_cases.iter().map(|tc| tc.weight).collect();
        let total = problem.test_cases.len();

        for (index, test_case) in problem.test_cases.iter().enumerate() {
            if self.is_cancelled() {
                log::info!(
                    "cancellation observed, stopping {}/{} after {index} test cases",
                    contestant.id,
                    problem.id
                );
                break;
            }

            let tc_result =
                judge::run_test_case(&self.registry, solution_path, test_case, &settings, &io);
            log::debug!(
                "{}/{} test case {}/{}: {}",
                contestant.id,
                problem.id,
                index + 1,
                total,
                tc_result.status
            );
            result.test_case_results.push(tc_result);
            observer.on_test_tick(&contestant.id, &problem.id, index + 1, total);

            // Partial score over the prefix run so far.
            result.calculate_score(&weights[..index + 1]);
            observer.on_partial_result(&result);
        }

        let completed = result.test_case_results.len();
        result.calculate_score(&weights[..completed]);
        result
    }
}
