use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Result, anyhow, bail};
use parking_lot::Mutex;

/// Compiles C/C++ solutions once per source path. Success is memoized so a
/// contestant's binary is built at most once per run; failures are not
/// cached, a repaired toolchain or source may succeed on retry.
#[derive(Default)]
pub struct CompilerCache {
    compiled: Mutex<HashSet<PathBuf>>,
}

/// Path of the executable produced for a source file: same basename next to
/// the source, `.exe` on Windows.
pub fn executable_path(solution_path: &Path) -> PathBuf {
    let mut path = solution_path.with_extension("");
    if cfg!(windows) {
        path.set_extension("exe");
    }
    path
}

impl CompilerCache {
    /// Compile `solution_path` if its extension calls for it. Non-C/C++
    /// sources are a successful no-op. The error message is the compiler's
    /// stderr (or the spawn failure).
    pub fn compile(&self, solution_path: &Path) -> Result<()> {
        let ext = solution_path.extension().and_then(|e| e.to_str());
        let (compiler, std_flag) = match ext {
            Some("c") => ("cc", None),
            Some("cpp") => ("c++", Some("-std=c++20")),
            _ => return Ok(()),
        };

        let key = solution_path
            .canonicalize()
            .unwrap_or_else(|_| solution_path.to_path_buf());
        if self.compiled.lock().contains(&key) {
            log::debug!("compile cache hit for {}", key.display());
            return Ok(());
        }

        let executable = executable_path(solution_path);
        let mut cmd = Command::new(compiler);
        if let Some(flag) = std_flag {
            cmd.arg(flag);
        }
        cmd.arg(solution_path).arg("-o").arg(&executable);
        if cfg!(unix) {
            cmd.arg("-lm");
        }

        let output = cmd
            .output()
            .map_err(|e| anyhow!("failed to run {compiler}: {e}"))?;

        if !output.status.success() {
            bail!("{}", String::from_utf8_lossy(&output.stderr));
        }

        log::debug!("compiled {} -> {}", solution_path.display(), executable.display());
        self.compiled.lock().insert(key);
        Ok(())
    }

    pub fn reset(&self) {
        self.compiled.lock().clear();
    }
}
