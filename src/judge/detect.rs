use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

/// File-I/O technique spotted in a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMethod {
    Ifstream,
    Ofstream,
    Fstream,
    FreopenStdin,
    FreopenStdout,
    Fopen,
}

impl IoMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            IoMethod::Ifstream => "ifstream",
            IoMethod::Ofstream => "ofstream",
            IoMethod::Fstream => "fstream",
            IoMethod::FreopenStdin => "freopen_stdin",
            IoMethod::FreopenStdout => "freopen_stdout",
            IoMethod::Fopen => "fopen",
        }
    }
}

impl fmt::Display for IoMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the detector concluded about a solution's I/O style.
///
/// Invariant: `adaptive` implies `conditional_io`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IoDetection {
    pub input_file: Option<String>,
    pub output_file: Option<String>,
    pub methods: Vec<IoMethod>,
    pub input_methods: Vec<IoMethod>,
    pub output_methods: Vec<IoMethod>,
    /// File I/O happens behind a runtime check (`if (fopen(...))` etc.).
    pub conditional_io: bool,
    /// The program falls back to stdin/stdout when its files are absent.
    pub adaptive: bool,
    pub name_macro: Option<String>,
}

impl IoDetection {
    pub fn uses_file_io(&self) -> bool {
        self.input_file.is_some()
    }

    pub fn has_method(&self, method: IoMethod) -> bool {
        self.methods.contains(&method)
    }

    /// Comma-joined method names for diagnostics.
    pub fn methods_summary(&self) -> String {
        self.methods
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

static NAME_MACRO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"#define\s+NAME\s+["']([^"']+)["']"#).unwrap());

static CONDITIONAL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"if\s*\(\s*ifstream\s*\(",
        r"if\s*\(\s*std::ifstream\s*\(",
        r"if\s*\(\s*fopen\s*\(",
        r"if\s*\(.*\.is_open\(\)\)",
        r#"if\s*\(\s*fopen\s*\(\s*NAME\s*"[^"]+"\s*,"#,
        r"if\s*\(\s*fopen\s*\(\s*NAME\s*'[^']+'\s*,",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static DOCFILE_FN: Lazy<Regex> = Lazy::new(|| Regex::new(r"void\s+docfile\s*\(\s*\)").unwrap());

static METHOD_IFSTREAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bifstream\b").unwrap());
static METHOD_OFSTREAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bofstream\b").unwrap());
static METHOD_FSTREAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bfstream\b").unwrap());
static METHOD_FOPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bfopen\b").unwrap());

static FREOPEN_STDIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"freopen\s*\([^,]+,\s*["']\w+["']\s*,\s*stdin\s*\)"#).unwrap());
static FREOPEN_STDOUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"freopen\s*\([^,]+,\s*["']\w+["']\s*,\s*stdout\s*\)"#).unwrap());

static FREOPEN_STDIN_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"freopen\s*\(\s*["']([^"']+)["'].*?,\s*["']\w+["']\s*,\s*stdin\s*\)"#).unwrap()
});
static FREOPEN_STDOUT_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"freopen\s*\(\s*["']([^"']+)["'].*?,\s*["']\w+["']\s*,\s*stdout\s*\)"#).unwrap()
});

static STREAM_INPUT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"ifstream\s+\w+\s*\(\s*["']([^"']+)["']"#,
        r#"std::ifstream\s+\w+\s*\(\s*["']([^"']+)["']"#,
        r#"ifstream\s+\w+\s*\{\s*["']([^"']+)["']"#,
        r#"fstream\s+\w+\s*\(\s*["']([^"']+)["'].*\)"#,
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static STREAM_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\.\s*open\s*\(\s*["']([^"']+)["']"#).unwrap());

static STREAM_OUTPUT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"ofstream\s+\w+\s*\(\s*["']([^"']+)["']"#,
        r#"std::ofstream\s+\w+\s*\(\s*["']([^"']+)["']"#,
        r#"ofstream\s+\w+\s*\{\s*["']([^"']+)["']"#,
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static DEFINE_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"#define\s+(\w+)\s+["']([^"']+)["']"#).unwrap());

static FOPEN_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"fopen\s*\(\s*["']([^"']+)["'].*,\s*["']([rw])["']"#).unwrap());

const INPUT_DEFINE_NAMES: [&str; 4] = ["fi", "in", "input", "inputfile"];
const OUTPUT_DEFINE_NAMES: [&str; 4] = ["fo", "out", "output", "outputfile"];

/// Classify the I/O style of a C/C++ solution. Best-effort regex scanning,
/// not a parser; other languages come back empty. Never touches the
/// filesystem beyond reading the source.
pub fn detect(source_path: &Path, problem_id: Option<&str>) -> IoDetection {
    let is_c_family = matches!(
        source_path.extension().and_then(|e| e.to_str()),
        Some("c") | Some("cpp")
    );
    if !is_c_family {
        return IoDetection::default();
    }

    match std::fs::read(source_path) {
        Ok(bytes) => detect_in_source(&String::from_utf8_lossy(&bytes), problem_id),
        Err(e) => {
            log::warn!("failed to read {} for I/O detection: {e}", source_path.display());
            IoDetection::default()
        }
    }
}

/// Same as [`detect`], over already-loaded source text.
pub fn detect_in_source(content: &str, problem_id: Option<&str>) -> IoDetection {
    let mut result = IoDetection::default();

    if let Some(captures) = NAME_MACRO.captures(content) {
        result.name_macro = Some(captures[1].to_string());
        // NAME macro plus a docfile helper means the program switches between
        // file and standard I/O on its own.
        if content.contains("docfile") {
            result.conditional_io = true;
            result.adaptive = true;
        }
    }

    detect_conditional_patterns(content, &mut result);
    detect_io_methods(content, &mut result);
    detect_file_names(content, &mut result, problem_id);

    log::debug!(
        "I/O detection: methods=[{}] input={:?} output={:?} adaptive={}",
        result.methods_summary(),
        result.input_file,
        result.output_file,
        result.adaptive
    );

    result
}

fn detect_conditional_patterns(content: &str, result: &mut IoDetection) {
    if CONDITIONAL_PATTERNS.iter().any(|p| p.is_match(content)) {
        result.conditional_io = true;
        result.adaptive = true;
    }

    if DOCFILE_FN.is_match(content) && content.contains("freopen") {
        result.conditional_io = true;
        result.adaptive = true;
    }
}

fn detect_io_methods(content: &str, result: &mut IoDetection) {
    if METHOD_IFSTREAM.is_match(content) {
        result.methods.push(IoMethod::Ifstream);
        result.input_methods.push(IoMethod::Ifstream);
    }
    if METHOD_OFSTREAM.is_match(content) {
        result.methods.push(IoMethod::Ofstream);
        result.output_methods.push(IoMethod::Ofstream);
    }
    if METHOD_FSTREAM.is_match(content) {
        result.methods.push(IoMethod::Fstream);
        result.input_methods.push(IoMethod::Fstream);
        result.output_methods.push(IoMethod::Fstream);
    }
    if FREOPEN_STDIN.is_match(content) {
        result.methods.push(IoMethod::FreopenStdin);
        result.input_methods.push(IoMethod::FreopenStdin);
    }
    if FREOPEN_STDOUT.is_match(content) {
        result.methods.push(IoMethod::FreopenStdout);
        result.output_methods.push(IoMethod::FreopenStdout);
    }
    if METHOD_FOPEN.is_match(content) {
        result.methods.push(IoMethod::Fopen);
    }
}

fn detect_file_names(content: &str, result: &mut IoDetection, problem_id: Option<&str>) {
    // Priority 1: freopen redirections name the files outright.
    if result.input_methods.contains(&IoMethod::FreopenStdin) {
        if let Some(c) = FREOPEN_STDIN_FILE.captures(content) {
            result.input_file = Some(c[1].to_string());
        }
    }
    if result.output_methods.contains(&IoMethod::FreopenStdout) {
        if let Some(c) = FREOPEN_STDOUT_FILE.captures(content) {
            result.output_file = Some(c[1].to_string());
        }
    }

    // Priority 2: stream constructor / .open() arguments.
    let uses_fstream = result.has_method(IoMethod::Fstream);
    if result.input_file.is_none() && (result.has_method(IoMethod::Ifstream) || uses_fstream) {
        result.input_file = STREAM_INPUT_PATTERNS
            .iter()
            .find_map(|p| p.captures(content))
            .or_else(|| STREAM_OPEN.captures(content))
            .map(|c| c[1].to_string());
    }
    if result.output_file.is_none() && (result.has_method(IoMethod::Ofstream) || uses_fstream) {
        result.output_file = STREAM_OUTPUT_PATTERNS
            .iter()
            .find_map(|p| p.captures(content))
            .map(|c| c[1].to_string());
    }

    // Priority 3: FI/FO-style defines common in contest code.
    if result.input_file.is_none() || result.output_file.is_none() {
        for captures in DEFINE_FILE.captures_iter(content) {
            let define_name = captures[1].to_lowercase();
            let filename = captures[2].to_string();
            if result.input_file.is_none() && INPUT_DEFINE_NAMES.contains(&define_name.as_str()) {
                result.input_file = Some(filename);
            } else if result.output_file.is_none()
                && OUTPUT_DEFINE_NAMES.contains(&define_name.as_str())
            {
                result.output_file = Some(filename);
            }
        }
    }

    // Priority 4: fopen calls, mode "r" meaning input and "w" output.
    if (result.input_file.is_none() || result.output_file.is_none())
        && result.has_method(IoMethod::Fopen)
    {
        for captures in FOPEN_CALL.captures_iter(content) {
            let filename = captures[1].to_string();
            match &captures[2] {
                "r" if result.input_file.is_none() => result.input_file = Some(filename),
                "w" if result.output_file.is_none() => result.output_file = Some(filename),
                _ => {}
            }
        }
    }

    // Priority 5: fall back to NAME.INP / <problem>.INP / input.txt, but only
    // when a matching method was actually seen. A program that only reads a
    // file most likely writes to stdout, so no output name is invented.
    let input_default_applies = result.has_method(IoMethod::Ifstream)
        || result.has_method(IoMethod::FreopenStdin)
        || result.has_method(IoMethod::Fopen);
    if result.input_file.is_none() && input_default_applies {
        result.input_file = Some(default_file_name(result, problem_id, "INP", "input.txt"));
    }

    let output_default_applies = result.has_method(IoMethod::Ofstream)
        || result.has_method(IoMethod::FreopenStdout)
        || result.has_method(IoMethod::Fopen);
    if result.output_file.is_none() && output_default_applies {
        result.output_file = Some(default_file_name(result, problem_id, "OUT", "output.txt"));
    }
}

fn default_file_name(
    result: &IoDetection,
    problem_id: Option<&str>,
    upper_ext: &str,
    fallback: &str,
) -> String {
    if let Some(name) = &result.name_macro {
        format!("{name}.{upper_ext}")
    } else if let Some(id) = problem_id {
        format!("{id}.{upper_ext}")
    } else {
        fallback.to_string()
    }
}

/// Process-lifetime detection cache keyed by solution path. Races on insert
/// are first-writer-wins; detection is pure so duplicates are identical.
#[derive(Default)]
pub struct DetectorCache {
    cache: parking_lot::Mutex<HashMap<PathBuf, Arc<IoDetection>>>,
}

impl DetectorCache {
    pub fn detect(&self, source_path: &Path, problem_id: Option<&str>) -> Arc<IoDetection> {
        if let Some(hit) = self.cache.lock().get(source_path) {
            return hit.clone();
        }
        let info = Arc::new(detect(source_path, problem_id));
        self.cache
            .lock()
            .entry(source_path.to_path_buf())
            .or_insert(info)
            .clone()
    }

    pub fn reset(&self) {
        self.cache.lock().clear();
    }
}
