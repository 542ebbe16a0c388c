use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::model::{Contestant, Problem, TestCase};

/// Extension preference when picking a contestant's solution file.
pub const SOLUTION_EXTENSIONS: [&str; 4] = ["py", "java", "cpp", "c"];

fn subdirectories(root: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)
        .with_context(|| format!("reading directory {}", root.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Every immediate subdirectory of `root` is a problem; its name is the
/// problem id. Test cases are discovered and frozen here, before judging.
pub fn scan_problems(root: &Path) -> Result<Vec<Problem>> {
    let mut problems = Vec::new();
    for directory in subdirectories(root)? {
        let id = file_name_of(&directory);
        let test_cases = discover_test_cases(&directory, &id)?;
        if test_cases.is_empty() {
            log::warn!("no test cases found for problem {id}");
        } else {
            log::info!("problem {id}: {} test cases", test_cases.len());
        }
        problems.push(Problem {
            name: id.clone(),
            id,
            directory,
            test_cases,
        });
    }
    Ok(problems)
}

/// Every immediate subdirectory of `root` is a contestant; its name is the
/// contestant id. For each problem the solution is the first of
/// `<problem>.{py,java,cpp,c}` present.
pub fn scan_contestants(root: &Path, problems: &[Problem]) -> Result<Vec<Contestant>> {
    let mut contestants = Vec::new();
    for directory in subdirectories(root)? {
        let id = file_name_of(&directory);
        let mut solutions = HashMap::new();
        for problem in problems {
            for ext in SOLUTION_EXTENSIONS {
                let candidate = directory.join(format!("{}.{ext}", problem.id));
                if candidate.is_file() {
                    solutions.insert(problem.id.clone(), candidate);
                    break;
                }
            }
        }
        log::debug!("contestant {id}: {} solutions", solutions.len());
        contestants.push(Contestant {
            name: id.clone(),
            id,
            directory,
            solutions,
        });
    }
    Ok(contestants)
}

/// Find the test cases of one problem directory. Test subdirectories win
/// over a flat layout; within each, `<ID>.INP`/`<ID>.OUT` wins over
/// `input.txt`/`output.txt`, which wins over any other in/out-looking pair.
pub fn discover_test_cases(directory: &Path, problem_id: &str) -> Result<Vec<TestCase>> {
    let mut test_dirs: Vec<PathBuf> = subdirectories(directory)?
        .into_iter()
        .filter(|dir| {
            let name = file_name_of(dir).to_lowercase();
            name.starts_with("test")
                || name.chars().all(|c| c.is_ascii_digit())
                || name.contains("test")
        })
        .collect();
    test_dirs.sort();

    let mut cases = Vec::new();
    for test_dir in &test_dirs {
        match test_pair_in_dir(test_dir, problem_id)? {
            Some(case) => cases.push(case),
            None => log::warn!("missing input/output files in {}", test_dir.display()),
        }
    }
    if !cases.is_empty() {
        return Ok(cases);
    }

    flat_test_pairs(directory)
}

fn files_in(directory: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(directory)
        .with_context(|| format!("reading directory {}", directory.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

fn test_pair_in_dir(test_dir: &Path, problem_id: &str) -> Result<Option<TestCase>> {
    let files = files_in(test_dir)?;
    let wanted_input = format!("{problem_id}.INP").to_uppercase();
    let wanted_output = format!("{problem_id}.OUT").to_uppercase();

    // Competition format first, case-insensitively.
    let mut input = files
        .iter()
        .find(|f| file_name_of(f).to_uppercase() == wanted_input)
        .cloned();
    let mut output = files
        .iter()
        .find(|f| file_name_of(f).to_uppercase() == wanted_output)
        .cloned();

    // Then the input.txt/output.txt convention.
    if input.is_none() {
        input = files
            .iter()
            .find(|f| file_name_of(f).eq_ignore_ascii_case("input.txt"))
            .cloned();
    }
    if output.is_none() {
        output = files
            .iter()
            .find(|f| file_name_of(f).eq_ignore_ascii_case("output.txt"))
            .cloned();
    }

    // Last resort: any .INP/.IN paired with any .OUT, ignoring case.
    if input.is_none() {
        input = files
            .iter()
            .find(|f| {
                let name = file_name_of(f).to_lowercase();
                name.ends_with(".inp") || name.ends_with(".in")
            })
            .cloned();
    }
    if output.is_none() {
        output = files
            .iter()
            .find(|f| file_name_of(f).to_lowercase().ends_with(".out"))
            .cloned();
    }

    Ok(match (input, output) {
        (Some(input), Some(output)) => Some(TestCase::new(input, output)),
        _ => None,
    })
}

fn looks_like_input(name: &str) -> bool {
    name.contains("input") || name.contains("inp") || name.ends_with(".in") || name.starts_with("in")
}

fn looks_like_output(name: &str) -> bool {
    name.contains("output") || name.contains("out") || name.ends_with(".out") || name.starts_with("out")
}

/// Flat layout: pair input-looking files with output-looking files by name
/// affinity; both lists are sorted first so pairing is stable.
fn flat_test_pairs(directory: &Path) -> Result<Vec<TestCase>> {
    let files = files_in(directory)?;

    let mut input_files = Vec::new();
    let mut output_files = Vec::new();
    for file in files {
        let name = file_name_of(&file).to_lowercase();
        if looks_like_input(&name) {
            input_files.push(file);
        } else if looks_like_output(&name) {
            output_files.push(file);
        }
    }

    let mut cases = Vec::new();
    for input in input_files {
        let input_stem = file_name_of(&input)
            .rsplit_once('.')
            .map(|(stem, _)| stem.to_string())
            .unwrap_or_else(|| file_name_of(&input));
        let input_stem = input_stem.to_lowercase();

        let matched = output_files.iter().position(|output| {
            let output_stem = file_name_of(output)
                .rsplit_once('.')
                .map(|(stem, _)| stem.to_string())
                .unwrap_or_else(|| file_name_of(output))
                .to_lowercase();
            input_stem.starts_with(&output_stem)
                || output_stem.starts_with(&input_stem)
                || input_stem.replace("input", "") == output_stem.replace("output", "")
                || input_stem.replace("in", "") == output_stem.replace("out", "")
        });

        // Fall back to the first remaining output when nothing matches.
        let index = match matched {
            Some(index) => index,
            None if !output_files.is_empty() => 0,
            None => continue,
        };
        let output = output_files.remove(index);
        cases.push(TestCase::new(input, output));
    }

    Ok(cases)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "x\n").unwrap();
    }

    #[test]
    fn test_directories_with_competition_names() {
        let root = tempfile::tempdir().unwrap();
        let problem = root.path().join("SUM");
        touch(&problem.join("test01").join("SUM.INP"));
        touch(&problem.join("test01").join("SUM.OUT"));
        touch(&problem.join("test02").join("sum.inp"));
        touch(&problem.join("test02").join("sum.out"));

        let cases = discover_test_cases(&problem, "SUM").unwrap();
        assert_eq!(cases.len(), 2);
        assert!(cases[0].input_path.ends_with("test01/SUM.INP"));
        assert!(cases[1].input_path.ends_with("test02/sum.inp"));
        assert_eq!(cases[0].weight, 1.0);
    }

    #[test]
    fn test_directories_with_generic_names() {
        let root = tempfile::tempdir().unwrap();
        let problem = root.path().join("A");
        touch(&problem.join("1").join("input.txt"));
        touch(&problem.join("1").join("output.txt"));
        touch(&problem.join("2").join("INPUT.TXT"));
        touch(&problem.join("2").join("OUTPUT.TXT"));

        let cases = discover_test_cases(&problem, "A").unwrap();
        assert_eq!(cases.len(), 2);
        assert!(cases[0].input_path.ends_with("1/input.txt"));
    }

    #[test]
    fn flat_layout_pairs_by_name() {
        let root = tempfile::tempdir().unwrap();
        let problem = root.path().join("B");
        touch(&problem.join("test1.in"));
        touch(&problem.join("test1.out"));
        touch(&problem.join("test2.in"));
        touch(&problem.join("test2.out"));

        let cases = discover_test_cases(&problem, "B").unwrap();
        assert_eq!(cases.len(), 2);
        assert!(cases[0].input_path.ends_with("test1.in"));
        assert!(cases[0].output_path.ends_with("test1.out"));
        assert!(cases[1].input_path.ends_with("test2.in"));
        assert!(cases[1].output_path.ends_with("test2.out"));
    }

    #[test]
    fn incomplete_test_directory_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        let problem = root.path().join("C");
        touch(&problem.join("test01").join("C.INP"));
        touch(&problem.join("test02").join("C.INP"));
        touch(&problem.join("test02").join("C.OUT"));

        let cases = discover_test_cases(&problem, "C").unwrap();
        assert_eq!(cases.len(), 1);
        assert!(cases[0].input_path.ends_with("test02/C.INP"));
    }

    #[test]
    fn contestants_pick_first_extension_match() {
        let root = tempfile::tempdir().unwrap();
        let contestants_dir = root.path().join("contestants");
        touch(&contestants_dir.join("alice").join("SUM.cpp"));
        touch(&contestants_dir.join("alice").join("SUM.c"));
        touch(&contestants_dir.join("bob").join("SUM.py"));
        touch(&contestants_dir.join("carol").join("OTHER.c"));

        let problems = vec![Problem {
            id: "SUM".to_string(),
            name: "SUM".to_string(),
            directory: root.path().join("problems/SUM"),
            test_cases: Vec::new(),
        }];
        let contestants = scan_contestants(&contestants_dir, &problems).unwrap();
        assert_eq!(contestants.len(), 3);

        let alice = &contestants[0];
        assert_eq!(alice.id, "alice");
        assert!(alice.solution_path("SUM").unwrap().ends_with("SUM.cpp"));

        let bob = &contestants[1];
        assert!(bob.solution_path("SUM").unwrap().ends_with("SUM.py"));

        let carol = &contestants[2];
        assert!(!carol.has_solution_for("SUM"));
    }

    #[test]
    fn scan_problems_freezes_cases() {
        let root = tempfile::tempdir().unwrap();
        let problems_dir = root.path().join("problems");
        touch(&problems_dir.join("SUM").join("test01").join("SUM.INP"));
        touch(&problems_dir.join("SUM").join("test01").join("SUM.OUT"));
        touch(&problems_dir.join("EMPTY").join("readme.md"));

        let problems = scan_problems(&problems_dir).unwrap();
        assert_eq!(problems.len(), 2);
        assert_eq!(problems[0].id, "EMPTY");
        assert!(problems[0].test_cases.is_empty());
        assert_eq!(problems[1].id, "SUM");
        assert_eq!(problems[1].test_cases.len(), 1);
    }
}
