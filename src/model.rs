use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Outcome of a single test case or of a whole submission.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Pending,
    Correct,
    #[serde(rename = "Wrong Answer")]
    WrongAnswer,
    #[serde(rename = "Time Limit Exceeded")]
    TimeLimitExceeded,
    #[serde(rename = "Memory Limit Exceeded")]
    MemoryLimitExceeded,
    #[serde(rename = "Runtime Error")]
    RuntimeError,
    #[serde(rename = "Compilation Error")]
    CompilationError,
}

/// Non-CORRECT statuses from most to least severe. The submission status is
/// the first of these that any test case hit.
pub const STATUS_PRIORITY: [Status; 5] = [
    Status::CompilationError,
    Status::RuntimeError,
    Status::TimeLimitExceeded,
    Status::MemoryLimitExceeded,
    Status::WrongAnswer,
];

impl Default for Status {
    fn default() -> Self {
        Status::Pending
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Pending => "Pending",
            Status::Correct => "Correct",
            Status::WrongAnswer => "Wrong Answer",
            Status::TimeLimitExceeded => "Time Limit Exceeded",
            Status::MemoryLimitExceeded => "Memory Limit Exceeded",
            Status::RuntimeError => "Runtime Error",
            Status::CompilationError => "Compilation Error",
        };
        f.write_str(s)
    }
}

/// One input/expected-output pair. Order within a problem is stable and
/// determines reporting indices.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub weight: f64,
}

impl TestCase {
    pub fn new(input_path: PathBuf, output_path: PathBuf) -> Self {
        Self {
            input_path,
            output_path,
            weight: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Problem {
    pub id: String,
    pub name: String,
    pub directory: PathBuf,
    pub test_cases: Vec<TestCase>,
}

#[derive(Debug, Clone)]
pub struct Contestant {
    pub id: String,
    pub name: String,
    pub directory: PathBuf,
    /// Maps problem id to the contestant's solution source file.
    pub solutions: HashMap<String, PathBuf>,
}

impl Contestant {
    pub fn has_solution_for(&self, problem_id: &str) -> bool {
        self.solutions.contains_key(problem_id)
    }

    pub fn solution_path(&self, problem_id: &str) -> Option<&Path> {
        self.solutions.get(problem_id).map(PathBuf::as_path)
    }
}

#[derive(Serialize, Debug, Clone, Default)]
pub struct TestCaseResult {
    pub status: Status,
    /// Wall time in seconds.
    pub execution_time: f64,
    /// Peak resident set size in MB.
    pub memory_used: f64,
    pub error_message: String,
    pub input_excerpt: String,
    pub expected_output: String,
    pub actual_output: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct SubmissionResult {
    pub contestant_id: String,
    pub problem_id: String,
    pub status: Status,
    pub score: f64,
    pub max_score: f64,
    /// Mean wall time over the executed test cases, seconds.
    pub execution_time: f64,
    /// Peak memory over the executed test cases, MB.
    pub memory_used: f64,
    pub test_case_results: Vec<TestCaseResult>,
}

impl SubmissionResult {
    pub fn new(contestant_id: impl Into<String>, problem_id: impl Into<String>) -> Self {
        Self {
            contestant_id: contestant_id.into(),
            problem_id: problem_id.into(),
            status: Status::Pending,
            score: 0.0,
            max_score: 0.0,
            execution_time: 0.0,
            memory_used: 0.0,
            test_case_results: Vec::new(),
        }
    }

    /// Recomputes score, max_score, timing aggregates and the overall status
    /// from the test-case results. `weights` must line up with the results;
    /// on a length mismatch every case counts 1.0.
    pub fn calculate_score(&mut self, weights: &[f64]) {
        if self.test_case_results.is_empty() {
            self.status = Status::Pending;
            self.score = 0.0;
            self.max_score = 0.0;
            return;
        }

        let equal_weights;
        let weights = if weights.len() == self.test_case_results.len() {
            weights
        } else {
            equal_weights = vec![1.0; self.test_case_results.len()];
            &equal_weights
        };

        self.max_score = weights.iter().sum();
        self.score = self
            .test_case_results
            .iter()
            .zip(weights)
            .filter(|(tc, _)| tc.status == Status::Correct)
            .map(|(_, w)| w)
            .sum();

        let n = self.test_case_results.len() as f64;
        self.execution_time = self
            .test_case_results
            .iter()
            .map(|tc| tc.execution_time)
            .sum::<f64>()
            / n;
        self.memory_used = self
            .test_case_results
            .iter()
            .map(|tc| tc.memory_used)
            .fold(0.0, f64::max);

        self.status = if self
            .test_case_results
            .iter()
            .all(|tc| tc.status == Status::Correct)
        {
            Status::Correct
        } else {
            STATUS_PRIORITY
                .iter()
                .copied()
                .find(|s| self.test_case_results.iter().any(|tc| tc.status == *s))
                .unwrap_or(Status::WrongAnswer)
        };
    }
}
