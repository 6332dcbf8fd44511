//! One supervised worker child: spawn in its own process group, pump stdio to
//! a per-run log file on OS threads, and escalate termination
//! (SIGTERM → grace → SIGKILL) against the whole group.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// Grace period between the terminate request and the force kill.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);
const KILL_WAIT: Duration = Duration::from_secs(2);
const POLL_STEP: Duration = Duration::from_millis(100);

pub struct ChildProcess {
    child: Child,
    pumps: Vec<std::thread::JoinHandle<()>>,
}

fn pump<R: std::io::Read + Send + 'static>(
    reader: R,
    run_id: String,
    stream: &'static str,
    log_path: std::path::PathBuf,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .ok();
        let reader = BufReader::new(reader);
        for line in reader.lines() {
            let Ok(line) = line else {
                break; // pipe closed during cleanup
            };
            tracing::debug!(run_id = %run_id, stream, "{line}");
            if let Some(f) = file.as_mut() {
                let _ = writeln!(f, "{stream}: {line}");
            }
        }
    })
}

impl ChildProcess {
    /// Spawns `worker_exe <run_id>` in its own process group with piped
    /// stdio; the pumps append line-oriented output to `log_path`.
    pub fn spawn(
        worker_exe: &Path,
        run_id: &str,
        log_path: &Path,
    ) -> std::io::Result<Self> {
        let mut command = Command::new(worker_exe);
        command
            .arg(run_id)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own group, so the manager can signal the worker and anything it
            // spawned in one call.
            command.process_group(0);
        }

        let mut child = command.spawn()?;
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(pump(stdout, run_id.to_string(), "stdout", log_path.to_path_buf()));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(pump(stderr, run_id.to_string(), "stderr", log_path.to_path_buf()));
        }
        tracing::info!(run_id, pid = child.id(), "spawned worker process");
        Ok(Self { child, pumps })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Non-blocking exit check; `Some(code)` once the child has exited
    /// (`-1` when killed by a signal with no exit code).
    pub fn try_wait(&mut self) -> std::io::Result<Option<i32>> {
        Ok(self.child.try_wait()?.map(|status| status.code().unwrap_or(-1)))
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) {
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;
        let pgid = Pid::from_raw(self.child.id() as i32);
        if let Err(e) = killpg(pgid, signal) {
            // Group may already be gone; fall back to the child itself.
            tracing::debug!(pid = self.child.id(), ?signal, error = %e, "killpg failed");
        }
    }

    fn wait_with_deadline(&mut self, deadline: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if matches!(self.child.try_wait(), Ok(Some(_))) {
                return true;
            }
            std::thread::sleep(POLL_STEP);
        }
        false
    }

    /// Graceful terminate, grace period, then force kill. Blocks up to
    /// `TERMINATE_GRACE + 2s`; joins the stdio pumps afterwards.
    pub fn terminate(mut self) {
        let pid = self.child.id();
        let still_running = matches!(self.child.try_wait(), Ok(None));
        if still_running {
            tracing::info!(pid, "terminating worker process group");
            #[cfg(unix)]
            self.signal_group(nix::sys::signal::Signal::SIGTERM);
            #[cfg(not(unix))]
            let _ = self.child.kill();

            if !self.wait_with_deadline(TERMINATE_GRACE) {
                tracing::warn!(pid, "force killing worker process group");
                #[cfg(unix)]
                self.signal_group(nix::sys::signal::Signal::SIGKILL);
                #[cfg(not(unix))]
                let _ = self.child.kill();
                self.wait_with_deadline(KILL_WAIT);
            }
        }
        self.join_pumps();
    }

    /// Joins the stdio pump threads (they end when the pipes close).
    pub fn join_pumps(&mut self) {
        for pump in self.pumps.drain(..) {
            let _ = pump.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: spawning a short-lived process captures its stdout lines in
    /// the per-run log file and reaps its exit code.
    #[test]
    fn spawn_captures_output_and_exit() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("run_x.log");
        // `sh` doubles as a stand-in worker: it takes one argument and prints.
        let mut child = {
            let mut command = Command::new("sh");
            command
                .arg("-c")
                .arg("echo line one; echo line two >&2; exit 3")
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            let mut spawned = command.spawn().unwrap();
            let mut pumps = Vec::new();
            if let Some(out) = spawned.stdout.take() {
                pumps.push(pump(out, "run_x".into(), "stdout", log_path.clone()));
            }
            if let Some(err) = spawned.stderr.take() {
                pumps.push(pump(err, "run_x".into(), "stderr", log_path.clone()));
            }
            ChildProcess {
                child: spawned,
                pumps,
            }
        };

        let mut code = None;
        for _ in 0..100 {
            if let Some(c) = child.try_wait().unwrap() {
                code = Some(c);
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        child.join_pumps();
        assert_eq!(code, Some(3));

        let log = std::fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("stdout: line one"));
        assert!(log.contains("stderr: line two"));
    }

    /// **Scenario**: terminate escalates on a process that ignores nothing —
    /// a sleeping shell exits on SIGTERM within the grace period.
    #[test]
    fn terminate_sleeping_process() {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg("sleep 60")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let child = command.spawn().unwrap();
        let child = ChildProcess {
            child,
            pumps: Vec::new(),
        };
        let start = Instant::now();
        child.terminate();
        assert!(start.elapsed() < TERMINATE_GRACE);
    }
}
