use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, ensure};
use parking_lot::{Condvar, Mutex};
use tempfile::NamedTempFile;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

/// RSS polling cadence for the memory sampler.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(50);

/// The watchdog arms at this multiple of the primary timeout.
const WATCHDOG_GRACE: f64 = 1.2;

/// Piped stdin buffers above this size are spilled to a temp file and
/// redirected instead, so a full pipe cannot deadlock the child.
const STDIN_SPILL_LIMIT: usize = 1 << 20;

/// Where the child's stdin comes from.
#[derive(Debug, Clone)]
pub enum StdinSource {
    /// In-memory buffer written through a pipe.
    Piped(String),
    /// Redirected from an existing file.
    File(PathBuf),
    /// No stdin at all.
    Detached,
}

/// What one child-process run produced.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    /// Wall time in seconds; pinned to the timeout on a timed-out run.
    pub elapsed: f64,
    /// Peak resident set size observed by the sampler, MB.
    pub peak_rss_mb: f64,
    /// Process exit code; `-signal` for signal deaths, `-1` for timeouts.
    pub exit_code: i32,
}

/// Live children keyed by solution path, so cancellation can kill whatever
/// is currently running.
#[derive(Default)]
pub struct ProcessRegistry {
    children: Mutex<HashMap<PathBuf, u32>>,
    killing: AtomicBool,
}

impl ProcessRegistry {
    fn register(&self, key: &Path, pid: u32) {
        self.children.lock().insert(key.to_path_buf(), pid);
        // A child spawned while kill_all was running would otherwise slip
        // through and run to its timeout.
        if self.killing.load(Ordering::SeqCst) {
            kill_pid(pid);
        }
    }

    fn unregister(&self, key: &Path) {
        self.children.lock().remove(key);
    }

    /// Force-kill every registered child, and any that registers from now
    /// until [`ProcessRegistry::rearm`]. Returns how many were signalled.
    pub fn kill_all(&self) -> usize {
        self.killing.store(true, Ordering::SeqCst);
        let pids: Vec<u32> = self.children.lock().values().copied().collect();
        for pid in &pids {
            kill_pid(*pid);
        }
        pids.len()
    }

    /// Allow new children again after a cancelled run.
    pub fn rearm(&self) {
        self.killing.store(false, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.children.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.lock().is_empty()
    }
}

fn kill_pid(pid: u32) {
    #[cfg(unix)]
    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pid;
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    status.code().unwrap_or(-1)
}

/// Samples the child's resident set size on its own thread until told to
/// stop. Measurement is best-effort: a child that exits between polls just
/// stops producing samples.
struct MemorySampler {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<f64>,
}

impl MemorySampler {
    fn start(pid: u32) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = std::thread::spawn(move || {
            let target = sysinfo::Pid::from_u32(pid);
            let mut system = sysinfo::System::new();
            let mut peak_mb = 0.0f64;
            while !stop_flag.load(Ordering::Relaxed) {
                system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[target]), true);
                if let Some(process) = system.process(target) {
                    let rss_mb = process.memory() as f64 / (1024.0 * 1024.0);
                    peak_mb = peak_mb.max(rss_mb);
                }
                std::thread::sleep(SAMPLE_INTERVAL);
            }
            peak_mb
        });
        Self { stop, handle }
    }

    /// Signal and join; the loop wakes within one sample interval. A panicked
    /// sampler yields 0.0 rather than poisoning the run.
    fn stop(self) -> f64 {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.join().unwrap_or(0.0)
    }
}

/// Backup timer that kills the child if the primary wait somehow never
/// returns. Fires at `WATCHDOG_GRACE` times the primary timeout.
struct Watchdog {
    state: Arc<(Mutex<bool>, Condvar)>,
    fired: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Watchdog {
    fn arm(pid: u32, grace_s: f64) -> Self {
        let state = Arc::new((Mutex::new(false), Condvar::new()));
        let fired = Arc::new(AtomicBool::new(false));
        let thread_state = state.clone();
        let thread_fired = fired.clone();
        let handle = std::thread::spawn(move || {
            let (lock, cvar) = &*thread_state;
            let deadline = Instant::now() + Duration::from_secs_f64(grace_s);
            let mut disarmed = lock.lock();
            while !*disarmed {
                if cvar.wait_until(&mut disarmed, deadline).timed_out() {
                    break;
                }
            }
            if !*disarmed {
                thread_fired.store(true, Ordering::SeqCst);
                kill_pid(pid);
            }
        });
        Self {
            state,
            fired,
            handle,
        }
    }

    /// Wake the timer thread, join it, and report whether it had to kill.
    fn disarm(self) -> bool {
        let (lock, cvar) = &*self.state;
        *lock.lock() = true;
        cvar.notify_all();
        let _ = self.handle.join();
        self.fired.load(Ordering::SeqCst)
    }
}

/// Reroute an oversized piped buffer through a temp file. The returned
/// guard keeps the file alive until the run is over.
fn spill_large_stdin(stdin: StdinSource) -> Result<(StdinSource, Option<NamedTempFile>)> {
    match stdin {
        StdinSource::Piped(data) if data.len() > STDIN_SPILL_LIMIT => {
            let mut file = NamedTempFile::new().context("creating stdin spill file")?;
            file.write_all(data.as_bytes())?;
            file.flush()?;
            let path = file.path().to_path_buf();
            Ok((StdinSource::File(path), Some(file)))
        }
        other => Ok((other, None)),
    }
}

/// Run one child to completion under a timeout, capturing stdout/stderr and
/// sampling memory. Must be called from a blocking context inside a tokio
/// runtime; the process I/O re-enters the runtime through
/// `Handle::current().block_on`.
///
/// On the primary timeout the child is killed, residual output is drained,
/// the exit code is the `-1` sentinel and `elapsed` equals `timeout_s`. A
/// watchdog kill past the limit is normalized to the same shape.
pub fn run_process(
    registry: &ProcessRegistry,
    key: &Path,
    cmd: &[String],
    stdin: StdinSource,
    timeout_s: f64,
    cwd: &Path,
) -> Result<RunOutput> {
    ensure!(!cmd.is_empty(), "empty command");

    // The spill guard deletes the temp file on every exit path below.
    let (stdin, _spill) = spill_large_stdin(stdin)?;

    let start = Instant::now();
    let mut command = Command::new(&cmd[0]);
    command
        .args(&cmd[1..])
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    match &stdin {
        StdinSource::Piped(_) => command.stdin(Stdio::piped()),
        StdinSource::File(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("opening stdin file {}", path.display()))?;
            command.stdin(Stdio::from(file))
        }
        StdinSource::Detached => command.stdin(Stdio::null()),
    };

    let mut child = command.spawn()?;
    let pid = child.id().context("spawned child has no pid")?;
    registry.register(key, pid);

    let sampler = MemorySampler::start(pid);
    let watchdog = Watchdog::arm(pid, timeout_s * WATCHDOG_GRACE);

    let outcome: Result<(i32, f64, Vec<u8>, Vec<u8>)> =
        tokio::runtime::Handle::current().block_on(async {
            if let StdinSource::Piped(data) = &stdin {
                if let Some(mut pipe) = child.stdin.take() {
                    let data = data.clone();
                    // Written concurrently so a child that floods stdout
                    // before reading stdin cannot deadlock against us.
                    tokio::spawn(async move {
                        let _ = pipe.write_all(data.as_bytes()).await;
                        let _ = pipe.shutdown().await;
                    });
                }
            }

            let mut stdout_pipe = child.stdout.take().context("stdout pipe missing")?;
            let mut stderr_pipe = child.stderr.take().context("stderr pipe missing")?;
            let stdout_task = tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stdout_pipe.read_to_end(&mut buf).await;
                buf
            });
            let stderr_task = tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr_pipe.read_to_end(&mut buf).await;
                buf
            });

            let (exit_code, elapsed) =
                match timeout(Duration::from_secs_f64(timeout_s), child.wait()).await {
                    Ok(status) => {
                        let status = status?;
                        (exit_code_of(status), start.elapsed().as_secs_f64())
                    }
                    Err(_) => {
                        let _ = child.kill().await;
                        (-1, timeout_s)
                    }
                };

            // Pipes hit EOF once the child (and the stdin writer) are gone.
            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            Ok((exit_code, elapsed, stdout, stderr))
        });

    let watchdog_fired = watchdog.disarm();
    let peak_rss_mb = sampler.stop();
    registry.unregister(key);

    let (mut exit_code, mut elapsed, stdout, stderr) = outcome?;
    if watchdog_fired && elapsed >= timeout_s {
        exit_code = -1;
        elapsed = timeout_s;
    }

    Ok(RunOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        elapsed,
        peak_rss_mb,
        exit_code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".into(), "-c".into(), script.into()]
    }

    fn run_blocking(
        registry: Arc<ProcessRegistry>,
        cmd: Vec<String>,
        stdin: StdinSource,
        timeout_s: f64,
    ) -> Result<RunOutput> {
        let cwd = std::env::temp_dir();
        tokio::task::block_in_place(|| {
            run_process(&registry, Path::new("test-solution"), &cmd, stdin, timeout_s, &cwd)
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn captures_stdout() {
        let registry = Arc::new(ProcessRegistry::default());
        let out = run_blocking(registry, sh("echo hello"), StdinSource::Detached, 5.0).unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.exit_code, 0);
        assert!(out.elapsed < 5.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pipes_stdin_through() {
        let registry = Arc::new(ProcessRegistry::default());
        let out = run_blocking(
            registry,
            sh("cat"),
            StdinSource::Piped("2 3\n".into()),
            5.0,
        )
        .unwrap();
        assert_eq!(out.stdout, "2 3\n");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn large_stdin_spills_to_file() {
        let registry = Arc::new(ProcessRegistry::default());
        let big = "x".repeat(STDIN_SPILL_LIMIT + 4096);
        let out = run_blocking(registry, sh("wc -c"), StdinSource::Piped(big.clone()), 10.0)
            .unwrap();
        assert_eq!(out.stdout.trim(), big.len().to_string());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stdin_file_redirects() {
        let registry = Arc::new(ProcessRegistry::default());
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"from a file\n").unwrap();
        file.flush().unwrap();
        let out = run_blocking(
            registry,
            sh("cat"),
            StdinSource::File(file.path().to_path_buf()),
            5.0,
        )
        .unwrap();
        assert_eq!(out.stdout, "from a file\n");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timeout_pins_elapsed_and_exit_code() {
        let registry = Arc::new(ProcessRegistry::default());
        let start = Instant::now();
        let out = run_blocking(
            registry.clone(),
            sh("while :; do :; done"),
            StdinSource::Detached,
            0.3,
        )
        .unwrap();
        assert_eq!(out.exit_code, -1);
        assert_eq!(out.elapsed, 0.3);
        // The child must actually be dead, well before the watchdog margin.
        assert!(start.elapsed() < Duration::from_secs(3));
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn nonzero_exit_keeps_stderr() {
        let registry = Arc::new(ProcessRegistry::default());
        let out = run_blocking(
            registry,
            sh("echo oops >&2; exit 3"),
            StdinSource::Detached,
            5.0,
        )
        .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn registry_kill_interrupts_a_run() {
        let registry = Arc::new(ProcessRegistry::default());
        let killer = registry.clone();
        let killer_thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            killer.kill_all()
        });

        let start = Instant::now();
        let out = run_blocking(registry.clone(), sh("exec sleep 30"), StdinSource::Detached, 30.0)
            .unwrap();
        assert!(out.exit_code != 0);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(killer_thread.join().unwrap() >= 1);
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn spawn_failure_propagates() {
        let registry = Arc::new(ProcessRegistry::default());
        let err = run_blocking(
            registry.clone(),
            vec!["/nonexistent/definitely-not-a-binary".into()],
            StdinSource::Detached,
            1.0,
        );
        assert!(err.is_err());
        assert!(registry.is_empty());
    }
}
