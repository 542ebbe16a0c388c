use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "arbiter", version = "0.1.0", about, long_about = None)]
pub struct CliArgs {
    /// Directory whose subdirectories are contestants
    pub contestants_dir: PathBuf,

    /// Directory whose subdirectories are problems
    pub problems_dir: PathBuf,

    /// Path to a settings file (JSON); defaults apply when omitted
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<PathBuf>,

    /// Number of threads to judge concurrently (overrides the settings file)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Judge submissions one at a time on a single worker
    #[arg(long)]
    pub sequential: bool,

    /// Write the full results as JSON to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// Load the settings from the configured file, or defaults without one.
    /// `--threads` wins over the file's `thread_count`.
    pub fn load_settings(&self) -> std::io::Result<Settings> {
        let mut settings = match &self.config_path {
            Some(path) => {
                let file = std::fs::File::open(path)?;
                let reader = std::io::BufReader::new(file);
                serde_json::from_reader(reader).map_err(std::io::Error::from)?
            }
            None => Settings::default(),
        };
        if let Some(threads) = self.threads {
            settings.thread_count = threads;
        }
        Ok(settings)
    }
}

/// How a solution communicates: stdin/stdout, named files, or whichever the
/// detector decides per submission.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IoMode {
    #[default]
    Auto,
    Standard,
    File,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ProblemSettings {
    /// Per-test wall-time ceiling, seconds.
    #[serde(default = "default_time_limit")]
    pub time_limit: f64,
    /// Peak RSS ceiling, MB.
    #[serde(default = "default_memory_limit")]
    pub memory_limit: f64,
    #[serde(default)]
    pub io_mode: IoMode,
}

impl Default for ProblemSettings {
    fn default() -> Self {
        Self {
            time_limit: default_time_limit(),
            memory_limit: default_memory_limit(),
            io_mode: IoMode::default(),
        }
    }
}

fn default_time_limit() -> f64 {
    1.0
}

fn default_memory_limit() -> f64 {
    512.0
}

fn default_thread_count() -> usize {
    4
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Settings {
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,
    #[serde(default = "default_time_limit")]
    pub global_time_limit: f64,
    #[serde(default = "default_memory_limit")]
    pub global_memory_limit: f64,
    #[serde(default)]
    pub global_io_mode: IoMode,
    /// Per-problem overrides; problems not listed here inherit the globals.
    #[serde(default)]
    pub problem_settings: HashMap<String, ProblemSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            thread_count: default_thread_count(),
            global_time_limit: default_time_limit(),
            global_memory_limit: default_memory_limit(),
            global_io_mode: IoMode::default(),
            problem_settings: HashMap::new(),
        }
    }
}

impl Settings {
    /// Resolve the effective settings for one problem.
    pub fn problem_settings(&self, problem_id: &str) -> ProblemSettings {
        match self.problem_settings.get(problem_id) {
            Some(overrides) => *overrides,
            None => ProblemSettings {
                time_limit: self.global_time_limit,
                memory_limit: self.global_memory_limit,
                io_mode: self.global_io_mode,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn settings_deserialization() {
        let raw = r#"{
            "thread_count": 3,
            "global_time_limit": 2.5,
            "global_memory_limit": 256,
            "global_io_mode": "standard",
            "problem_settings": {
                "SUM": { "time_limit": 0.5, "memory_limit": 64, "io_mode": "file" }
            }
        }"#;
        let settings: Settings = serde_json::from_str(raw).unwrap();
        assert_eq!(settings.thread_count, 3);
        assert_eq!(settings.global_io_mode, IoMode::Standard);

        let sum = settings.problem_settings("SUM");
        assert_eq!(sum.time_limit, 0.5);
        assert_eq!(sum.io_mode, IoMode::File);

        let other = settings.problem_settings("PROD");
        assert_eq!(other.time_limit, 2.5);
        assert_eq!(other.memory_limit, 256.0);
        assert_eq!(other.io_mode, IoMode::Standard);
    }

    #[test]
    fn io_mode_defaults_to_auto() {
        let raw = r#"{ "problem_settings": { "A": { "time_limit": 1.5 } } }"#;
        let settings: Settings = serde_json::from_str(raw).unwrap();
        assert_eq!(settings.global_io_mode, IoMode::Auto);
        assert_eq!(settings.problem_settings("A").io_mode, IoMode::Auto);
        assert_eq!(settings.problem_settings("A").memory_limit, 512.0);
        assert_eq!(settings.thread_count, 4);
    }
}
