use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::{IoMode, ProblemSettings};
use crate::model::{Status, TestCase, TestCaseResult};

use super::compile::executable_path;
use super::detect::{IoDetection, IoMethod};
use super::process::{self, ProcessRegistry, StdinSource};

const EXCERPT_LIMIT: usize = 100;

/// Run one solution against one test case and classify the outcome. Never
/// fails outward: any internal error becomes a `Runtime Error` result with
/// the underlying message.
pub fn run_test_case(
    registry: &ProcessRegistry,
    solution_path: &Path,
    test_case: &TestCase,
    settings: &ProblemSettings,
    io: &IoDetection,
) -> TestCaseResult {
    run_test_case_inner(registry, solution_path, test_case, settings, io).unwrap_or_else(|e| {
        log::warn!("test case on {} failed: {e:#}", solution_path.display());
        runtime_error(format!("{e:#}"))
    })
}

fn run_test_case_inner(
    registry: &ProcessRegistry,
    solution_path: &Path,
    test_case: &TestCase,
    settings: &ProblemSettings,
    io: &IoDetection,
) -> Result<TestCaseResult> {
    let cmd = match command_for_solution(solution_path) {
        Some(cmd) => cmd,
        None => {
            let ext = solution_path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("");
            return Ok(runtime_error(format!("Unsupported file extension: .{ext}")));
        }
    };

    if let Some(message) = incompatibility_error(io, settings.io_mode) {
        return Ok(runtime_error(message));
    }

    let input_data = std::fs::read_to_string(&test_case.input_path)
        .with_context(|| format!("reading input {}", test_case.input_path.display()))?;
    let expected_output = std::fs::read_to_string(&test_case.output_path)
        .with_context(|| format!("reading expected output {}", test_case.output_path.display()))?
        .trim()
        .to_string();

    let solution_dir = solution_path.parent().unwrap_or_else(|| Path::new("."));
    let RunConfig {
        stdin,
        staged,
        output_file,
    } = prepare_run_config(solution_dir, io, settings.io_mode, &input_data)?;

    let run = process::run_process(
        registry,
        solution_path,
        &cmd,
        stdin,
        settings.time_limit,
        solution_dir,
    )?;

    let input_excerpt = excerpt(&input_data);
    let expected_excerpt = excerpt(&expected_output);

    if run.exit_code == -1 && run.elapsed >= settings.time_limit {
        return Ok(TestCaseResult {
            status: Status::TimeLimitExceeded,
            execution_time: settings.time_limit,
            memory_used: run.peak_rss_mb,
            error_message: "Time limit exceeded".to_string(),
            input_excerpt,
            expected_output: expected_excerpt,
            actual_output: String::new(),
        });
    }

    let actual_output = recover_actual_output(&run.stdout, output_file.as_deref(), io.adaptive);
    let actual_excerpt = excerpt(&actual_output);
    drop(staged);

    if run.peak_rss_mb > settings.memory_limit {
        return Ok(TestCaseResult {
            status: Status::MemoryLimitExceeded,
            execution_time: run.elapsed,
            memory_used: run.peak_rss_mb,
            error_message: "Memory limit exceeded".to_string(),
            input_excerpt,
            expected_output: expected_excerpt,
            actual_output: actual_excerpt,
        });
    }

    if run.exit_code != 0 {
        return Ok(TestCaseResult {
            status: Status::RuntimeError,
            execution_time: run.elapsed,
            memory_used: run.peak_rss_mb,
            error_message: run.stderr,
            input_excerpt,
            expected_output: expected_excerpt,
            actual_output: actual_excerpt,
        });
    }

    let status = if outputs_match(&actual_output, &expected_output) {
        Status::Correct
    } else {
        Status::WrongAnswer
    };
    Ok(TestCaseResult {
        status,
        execution_time: run.elapsed,
        memory_used: run.peak_rss_mb,
        error_message: String::new(),
        input_excerpt,
        expected_output: expected_excerpt,
        actual_output: actual_excerpt,
    })
}

fn runtime_error(message: String) -> TestCaseResult {
    TestCaseResult {
        status: Status::RuntimeError,
        error_message: message,
        ..Default::default()
    }
}

/// Interpreter or binary invocation for a solution, by extension.
fn command_for_solution(solution_path: &Path) -> Option<Vec<String>> {
    let source = solution_path.to_string_lossy().into_owned();
    match solution_path.extension().and_then(|e| e.to_str()) {
        Some("py") => Some(vec!["python".to_string(), source]),
        Some("java") => Some(vec!["java".to_string(), source]),
        Some("c") | Some("cpp") => Some(vec![
            executable_path(solution_path).to_string_lossy().into_owned(),
        ]),
        _ => None,
    }
}

/// `Some(message)` when the detected I/O style cannot run under the forced
/// mode. Adaptive programs pass either way, they adjust at runtime.
fn incompatibility_error(io: &IoDetection, mode: IoMode) -> Option<String> {
    if io.adaptive {
        return None;
    }
    match mode {
        IoMode::Standard if io.uses_file_io() => Some(format!(
            "Program uses file I/O ({}) but standard I/O mode is enabled. Files used: Input={}, Output={}",
            io.methods_summary(),
            io.input_file.as_deref().unwrap_or("None"),
            io.output_file.as_deref().unwrap_or("None"),
        )),
        IoMode::File if !io.uses_file_io() => {
            Some("Program uses standard I/O but file I/O mode is enabled".to_string())
        }
        _ => None,
    }
}

/// Staged input files, deleted when the run is over (including early error
/// returns). The staged output file is not listed here: it must survive
/// until the result is read, and the next run deletes it before starting.
struct StagedFiles(Vec<PathBuf>);

impl Drop for StagedFiles {
    fn drop(&mut self) {
        for path in &self.0 {
            let _ = std::fs::remove_file(path);
        }
    }
}

struct RunConfig {
    stdin: StdinSource,
    staged: StagedFiles,
    output_file: Option<PathBuf>,
}

fn prepare_run_config(
    solution_dir: &Path,
    io: &IoDetection,
    mode: IoMode,
    input_data: &str,
) -> Result<RunConfig> {
    let mut staged = StagedFiles(Vec::new());
    let mut output_file = None;

    // Adaptive programs get both worlds: the input file staged AND the data
    // on stdin, since they pick a channel only at runtime.
    if io.adaptive {
        if let Some(input_name) = &io.input_file {
            let input_path = solution_dir.join(input_name);
            std::fs::write(&input_path, input_data)
                .with_context(|| format!("staging input file {}", input_path.display()))?;
            staged.0.push(input_path);
            output_file = stage_output_path(solution_dir, io)?;
        }
        return Ok(RunConfig {
            stdin: StdinSource::Piped(input_data.to_string()),
            staged,
            output_file,
        });
    }

    let file_mode = mode == IoMode::File || (mode == IoMode::Auto && io.uses_file_io());
    if file_mode {
        if let Some(input_name) = &io.input_file {
            let input_path = solution_dir.join(input_name);
            std::fs::write(&input_path, input_data)
                .with_context(|| format!("staging input file {}", input_path.display()))?;
            staged.0.push(input_path);
        }
        output_file = stage_output_path(solution_dir, io)?;

        // freopen re-reads the inherited stdin handle, so it needs a pipe
        // (an empty one); plain file readers get no stdin at all.
        let stdin = if io.has_method(IoMethod::FreopenStdin) {
            StdinSource::Piped(String::new())
        } else {
            StdinSource::Detached
        };
        return Ok(RunConfig {
            stdin,
            staged,
            output_file,
        });
    }

    Ok(RunConfig {
        stdin: StdinSource::Piped(input_data.to_string()),
        staged,
        output_file,
    })
}

/// Resolve the output path and delete any stale file from a previous run.
fn stage_output_path(solution_dir: &Path, io: &IoDetection) -> Result<Option<PathBuf>> {
    let Some(output_name) = &io.output_file else {
        return Ok(None);
    };
    let output_path = solution_dir.join(output_name);
    if output_path.exists() {
        std::fs::remove_file(&output_path)
            .with_context(|| format!("removing stale output {}", output_path.display()))?;
    }
    Ok(Some(output_path))
}

/// Pick the program's real output: a non-empty staged output file wins, but
/// adaptive programs may have written to either channel, so the longer of
/// the two is taken when both exist.
fn recover_actual_output(stdout: &str, output_file: Option<&Path>, adaptive: bool) -> String {
    let mut result = String::new();

    if let Some(path) = output_file {
        if let Ok(content) = std::fs::read_to_string(path) {
            let trimmed = content.trim();
            if !trimmed.is_empty() {
                result = trimmed.to_string();
            }
        }
    }

    if result.is_empty() || adaptive {
        let from_stdout = stdout.trim();
        if !from_stdout.is_empty() && (result.is_empty() || from_stdout.len() > result.len()) {
            result = from_stdout.to_string();
        }
    }

    result
}

/// Line-wise comparison: trailing whitespace per line is ignored, line
/// counts must match.
fn outputs_match(actual: &str, expected: &str) -> bool {
    let actual_lines: Vec<&str> = actual.trim().split('\n').collect();
    let expected_lines: Vec<&str> = expected.trim().split('\n').collect();

    actual_lines.len() == expected_lines.len()
        && actual_lines
            .iter()
            .zip(&expected_lines)
            .all(|(a, e)| a.trim() == e.trim())
}

fn excerpt(text: &str) -> String {
    if text.chars().count() > EXCERPT_LIMIT {
        let mut shortened: String = text.chars().take(EXCERPT_LIMIT).collect();
        shortened.push_str("...");
        shortened
    } else {
        text.to_string()
    }
}
