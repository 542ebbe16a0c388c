//! Worker-pool and observer-protocol invariants, driven with solutions whose
//! extension is unsupported: every test case classifies as Runtime Error
//! without spawning a process, so no toolchain is needed.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arbiter::config::Settings;
use arbiter::engine::Engine;
use arbiter::model::{Contestant, Problem, Status, SubmissionResult, TestCase};
use arbiter::observer::{NullObserver, Observer};
use arbiter::worker::WorkerPool;

fn make_submission(
    root: &Path,
    contestant_id: &str,
    problem_id: &str,
    cases: usize,
) -> (Arc<Contestant>, Arc<Problem>) {
    let contestant_dir = root.join(contestant_id);
    std::fs::create_dir_all(&contestant_dir).unwrap();
    let solution = contestant_dir.join(format!("{problem_id}.txt"));
    std::fs::write(&solution, "not judgeable\n").unwrap();

    let problem_dir = root.join("problems").join(problem_id);
    std::fs::create_dir_all(&problem_dir).unwrap();
    let mut test_cases = Vec::new();
    for index in 0..cases {
        let input = problem_dir.join(format!("{index}.in"));
        let output = problem_dir.join(format!("{index}.out"));
        std::fs::write(&input, "1\n").unwrap();
        std::fs::write(&output, "1\n").unwrap();
        test_cases.push(TestCase::new(input, output));
    }

    let mut solutions = HashMap::new();
    solutions.insert(problem_id.to_string(), solution);
    (
        Arc::new(Contestant {
            id: contestant_id.to_string(),
            name: contestant_id.to_string(),
            directory: contestant_dir,
            solutions,
        }),
        Arc::new(Problem {
            id: problem_id.to_string(),
            name: problem_id.to_string(),
            directory: problem_dir,
            test_cases,
        }),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejudge_submit_resolves_with_the_result() {
    let root = tempfile::tempdir().unwrap();
    let (contestant, problem) = make_submission(root.path(), "alice", "SUM", 2);

    let engine = Arc::new(Engine::new(Settings::default()));
    let pool = WorkerPool::start(2, engine, Arc::new(NullObserver));

    let receiver = pool.submit(contestant, problem);
    let result = receiver.await.expect("task was discarded");
    assert_eq!(result.status, Status::RuntimeError);
    assert_eq!(result.test_case_results.len(), 2);
    assert_eq!(result.max_score, 2.0);

    pool.await_quiescence().await;
    pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_status_reaches_idle_then_terminated() {
    let engine = Arc::new(Engine::new(Settings::default()));
    let pool = WorkerPool::start(3, engine, Arc::new(NullObserver));

    let mut statuses = HashMap::new();
    for _ in 0..100 {
        statuses = pool.worker_status();
        if statuses.len() == 3 && statuses.values().all(|s| s == "Idle") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(statuses.len(), 3);
    assert!(statuses.values().all(|s| s == "Idle"), "{statuses:?}");

    pool.shutdown().await;
    let statuses = pool.worker_status();
    assert!(
        statuses.values().all(|s| s == "Terminated"),
        "{statuses:?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_all_discards_the_backlog_promptly() {
    let root = tempfile::tempdir().unwrap();
    let engine = Arc::new(Engine::new(Settings::default()));
    let pool = WorkerPool::start(1, engine.clone(), Arc::new(NullObserver));

    let mut receivers = Vec::new();
    for index in 0..200 {
        let (contestant, problem) =
            make_submission(root.path(), &format!("c{index}"), "SUM", 1);
        receivers.push(pool.submit(contestant, problem));
    }
    pool.cancel_all();
    pool.cancel_all(); // idempotent

    tokio::time::timeout(Duration::from_secs(5), pool.await_quiescence())
        .await
        .expect("await_quiescence did not return after cancel_all");
    assert!(engine.is_cancelled());

    let mut delivered = 0;
    let mut discarded = 0;
    for receiver in receivers {
        match receiver.await {
            Ok(_) => delivered += 1,
            Err(_) => discarded += 1,
        }
    }
    assert_eq!(delivered + discarded, 200);
    assert!(discarded > 0, "cancel left no backlog to discard");

    pool.shutdown().await;
}

#[derive(Debug, Clone, PartialEq)]
enum Ev {
    Tick { completed: usize, total: usize },
    Partial { cases: usize },
    Final,
}

#[derive(Default)]
struct ProtocolRecorder {
    per_submission: Mutex<HashMap<(String, String), Vec<Ev>>>,
    finished: Mutex<usize>,
}

impl ProtocolRecorder {
    fn record(&self, contestant_id: &str, problem_id: &str, event: Ev) {
        self.per_submission
            .lock()
            .unwrap()
            .entry((contestant_id.to_string(), problem_id.to_string()))
            .or_default()
            .push(event);
    }
}

impl Observer for ProtocolRecorder {
    fn on_test_tick(&self, contestant_id: &str, problem_id: &str, completed: usize, total: usize) {
        self.record(contestant_id, problem_id, Ev::Tick { completed, total });
    }

    fn on_partial_result(&self, result: &SubmissionResult) {
        self.record(
            &result.contestant_id,
            &result.problem_id,
            Ev::Partial {
                cases: result.test_case_results.len(),
            },
        );
    }

    fn on_final_result(&self, result: &SubmissionResult) {
        self.record(&result.contestant_id, &result.problem_id, Ev::Final);
    }

    fn on_evaluation_finished(&self) {
        *self.finished.lock().unwrap() += 1;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn per_submission_event_ordering_holds_under_parallelism() {
    let root = tempfile::tempdir().unwrap();
    let cases_per_problem = 3;

    let mut contestants = Vec::new();
    let mut problems: Vec<Arc<Problem>> = Vec::new();
    for contestant_id in ["alice", "bob"] {
        let mut merged: Option<Arc<Contestant>> = None;
        for problem_id in ["P1", "P2"] {
            let (contestant, problem) = make_submission(
                &root.path().join(contestant_id),
                contestant_id,
                problem_id,
                cases_per_problem,
            );
            if !problems.iter().any(|p| p.id == problem.id) {
                problems.push(problem);
            }
            merged = Some(match merged {
                None => contestant,
                Some(existing) => {
                    let mut combined = (*existing).clone();
                    combined
                        .solutions
                        .extend(contestant.solutions.clone());
                    Arc::new(combined)
                }
            });
        }
        contestants.push(merged.unwrap());
    }

    let engine = Arc::new(Engine::new(Settings::default()));
    let recorder = Arc::new(ProtocolRecorder::default());
    let results = engine
        .evaluate_all(&contestants, &problems, recorder.clone(), true, 2)
        .await;

    assert_eq!(results.len(), 4);
    assert_eq!(*recorder.finished.lock().unwrap(), 1);

    let per_submission = recorder.per_submission.lock().unwrap();
    assert_eq!(per_submission.len(), 4);
    for ((contestant_id, problem_id), events) in per_submission.iter() {
        let expected: Vec<Ev> = (1..=cases_per_problem)
            .flat_map(|i| {
                [
                    Ev::Tick {
                        completed: i,
                        total: cases_per_problem,
                    },
                    Ev::Partial { cases: i },
                ]
            })
            .chain([Ev::Final])
            .collect();
        assert_eq!(
            events, &expected,
            "event order broken for {contestant_id}/{problem_id}"
        );
    }
}
