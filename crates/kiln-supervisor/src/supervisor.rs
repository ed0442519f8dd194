use std::{path::PathBuf, sync::Arc, time::Duration};

use kiln_process::{ProcessState, ProcessStatus};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{ChildStdin, Command},
    sync::{Mutex, mpsc, watch},
};

use crate::{error::SupervisorError, launch::LaunchSpec, locks, logs::LogSink};

/// How a stop attempt asks the child to go away.
#[derive(Debug, Clone)]
pub struct ShutdownPolicy {
    /// Console command requesting a voluntary exit; empty skips the polite
    /// step (the child then gets SIGTERM up front).
    pub polite_command: String,
    pub grace_timeout: Duration,
    pub force_after_timeout: bool,
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        Self {
            polite_command: "stop".to_string(),
            grace_timeout: Duration::from_secs(10),
            force_after_timeout: true,
        }
    }
}

/// Bound on the post-SIGKILL wait before declaring the child orphaned.
const FORCE_KILL_WAIT: Duration = Duration::from_secs(5);
/// Extra margin restart grants the stop phase beyond the policy's own bounds.
const RESTART_GRACE_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Inner {
    state: ProcessState,
    pid: Option<u32>,
    pgid: Option<i32>,
    exit_code: Option<i32>,
    message: Option<String>,
    interactive: bool,
    working_dir: PathBuf,
    stdin: Option<ChildStdin>,
    /// Fired exactly once per lifecycle when the child reaches a terminal
    /// state; `stop()` and `restart()` wait on clones of this.
    exited: Option<watch::Receiver<bool>>,
    locks_cleaned: bool,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            state: ProcessState::Idle,
            pid: None,
            pgid: None,
            exit_code: None,
            message: None,
            interactive: true,
            working_dir: PathBuf::new(),
            stdin: None,
            exited: None,
            locks_cleaned: true,
        }
    }
}

/// Owns at most one live server child and serializes every operation on it.
///
/// All mutation goes through one async mutex, so concurrent `start()` calls
/// are decided deterministically and console writers never interleave.
#[derive(Clone, Default)]
pub struct Supervisor {
    inner: Arc<Mutex<Inner>>,
    sink: LogSink,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the log subscriber; lines arrive in delivery order.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<String> {
        self.sink.subscribe().await
    }

    /// Cursor-based polling over the buffered log history.
    pub async fn tail_logs(&self, cursor: u64, limit: usize) -> (Vec<String>, u64) {
        self.sink.tail_after(cursor, limit).await
    }

    pub async fn status(&self) -> ProcessStatus {
        let inner = self.inner.lock().await;
        ProcessStatus {
            state: inner.state,
            pid: inner.pid,
            exit_code: inner.exit_code,
            message: inner.message.clone(),
        }
    }

    /// Spawns the child described by `spec`. Fails with `AlreadyRunning`
    /// while a previous lifecycle is still active; on spawn failure the
    /// supervisor returns to `Idle`.
    pub async fn start(&self, spec: LaunchSpec) -> Result<(), SupervisorError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.state.is_active() {
                return Err(SupervisorError::AlreadyRunning);
            }
            // Claim the lifecycle before the spawn so a concurrent start is
            // rejected deterministically.
            *inner = Inner {
                state: ProcessState::Starting,
                interactive: spec.interactive,
                working_dir: spec.working_dir.clone(),
                locks_cleaned: false,
                ..Inner::default()
            };
        }

        match self.spawn(&spec).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let mut inner = self.inner.lock().await;
                inner.state = ProcessState::Idle;
                inner.message = Some(err.to_string());
                inner.locks_cleaned = true;
                Err(err)
            }
        }
    }

    async fn spawn(&self, spec: &LaunchSpec) -> Result<(), SupervisorError> {
        // The artifact can vanish between resolution and spawn; surface that
        // here instead of as a confusing child-side failure.
        if !spec.server_file.is_file() {
            return Err(SupervisorError::SpawnFailed(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("server file missing: {}", spec.server_file.display()),
            )));
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(if spec.interactive {
                std::process::Stdio::piped()
            } else {
                std::process::Stdio::null()
            })
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        #[cfg(unix)]
        {
            unsafe {
                cmd.pre_exec(|| {
                    // New session so stop() can signal the whole tree.
                    set_parent_death_signal()?;
                    if libc::setsid() == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        self.sink
            .emit(format!(
                "[kiln] exec: {} {} (cwd {})",
                spec.program.display(),
                spec.args.join(" "),
                spec.working_dir.display()
            ))
            .await;

        let mut child = cmd.spawn().map_err(SupervisorError::SpawnFailed)?;
        let pid = child.id();
        let pgid = pid.map(|p| p as i32);
        tracing::info!(?pid, program = %spec.program.display(), "server spawned");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (exit_tx, exit_rx) = watch::channel(false);

        {
            let mut inner = self.inner.lock().await;
            inner.state = ProcessState::Running;
            inner.pid = pid;
            inner.pgid = pgid;
            inner.stdin = stdin;
            inner.exited = Some(exit_rx);
        }

        // stderr is folded into the same sink so the collaborator sees one
        // combined stream, like the original launcher's merged pipe.
        if let Some(err) = stderr {
            let sink = self.sink.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    sink.emit(line).await;
                }
            });
        }

        let inner = self.inner.clone();
        let sink = self.sink.clone();
        let working_dir = spec.working_dir.clone();
        tokio::spawn(async move {
            // Pump the main output stream to EOF, then settle the exit. The
            // terminal transition below happens exactly once per lifecycle.
            if let Some(out) = stdout {
                let mut lines = BufReader::new(out).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    sink.emit(line).await;
                }
            }

            let res = child.wait().await;

            let (state, exit_code, clean_locks) = {
                let mut inner = inner.lock().await;
                inner.stdin = None;
                inner.pid = None;
                let was_stopping = matches!(inner.state, ProcessState::Stopping);
                match res {
                    Ok(status) => {
                        inner.exit_code = status.code();
                        if status.success() {
                            inner.state = ProcessState::Stopped;
                            inner.message = Some(if was_stopping {
                                "stopped".to_string()
                            } else {
                                "exited".to_string()
                            });
                        } else {
                            inner.state = ProcessState::Crashed;
                            inner.message = Some(match status.code() {
                                Some(code) => format!("exited with code {code}"),
                                None => "killed by signal".to_string(),
                            });
                        }
                    }
                    Err(err) => {
                        inner.state = ProcessState::Crashed;
                        inner.message = Some(format!("wait failed: {err}"));
                    }
                }
                // stop() owns cleanup while it is in flight; the crash and
                // natural-exit paths clean here.
                let clean = !was_stopping && !inner.locks_cleaned;
                if clean {
                    inner.locks_cleaned = true;
                }
                (inner.state, inner.exit_code, clean)
            };

            if clean_locks {
                locks::remove_session_locks(&working_dir, &sink).await;
            }

            sink.emit(format!(
                "[kiln] server exited: state={state:?} exit_code={exit_code:?}"
            ))
            .await;
            let _ = exit_tx.send(true);
        });

        Ok(())
    }

    /// Forwards one console command to the child, newline-terminated and
    /// flushed immediately. Fails with `NotInteractive` for children spawned
    /// without a stdin pipe, in any state.
    pub async fn send_command(&self, text: &str) -> Result<(), SupervisorError> {
        let text = text.trim();
        let mut inner = self.inner.lock().await;
        if !inner.interactive {
            return Err(SupervisorError::NotInteractive);
        }
        if !matches!(inner.state, ProcessState::Running) {
            return Err(SupervisorError::NotRunning);
        }
        let Some(stdin) = inner.stdin.as_mut() else {
            return Err(SupervisorError::NotRunning);
        };

        // Holding the state lock across the write keeps writers serialized.
        // A broken pipe here means the child died under us.
        stdin
            .write_all(format!("{text}\n").as_bytes())
            .await
            .map_err(SupervisorError::WriteFailed)?;
        stdin.flush().await.map_err(SupervisorError::WriteFailed)?;
        drop(inner);

        self.sink.emit(format!("> {text}")).await;
        Ok(())
    }

    /// Graceful-stop protocol: polite console command (or SIGTERM when there
    /// is no console route), bounded grace wait, then SIGKILL escalation per
    /// policy. Lock cleanup runs exactly once per lifecycle whatever the
    /// outcome. `NoActiveProcess` is the documented no-op result when
    /// nothing is running.
    pub async fn stop(&self, policy: &ShutdownPolicy) -> Result<ProcessStatus, SupervisorError> {
        let (mut exit_rx, pgid, polite) = {
            let mut inner = self.inner.lock().await;
            if !matches!(inner.state, ProcessState::Running) {
                return Err(SupervisorError::NoActiveProcess);
            }
            let Some(rx) = inner.exited.clone() else {
                return Err(SupervisorError::NoActiveProcess);
            };
            inner.state = ProcessState::Stopping;
            inner.message = Some("stopping".to_string());
            let polite = if !policy.polite_command.is_empty() && inner.interactive {
                inner.stdin.take().map(|s| (s, policy.polite_command.clone()))
            } else {
                None
            };
            (rx, inner.pgid, polite)
        };

        self.sink
            .emit(format!(
                "[kiln] stop requested (grace {}ms)",
                policy.grace_timeout.as_millis()
            ))
            .await;

        let mut polite_sent = false;
        if let Some((mut stdin, cmd)) = polite {
            let write = async {
                stdin.write_all(format!("{cmd}\n").as_bytes()).await?;
                stdin.flush().await
            };
            match write.await {
                Ok(()) => {
                    polite_sent = true;
                    self.sink.emit(format!("> {cmd}")).await;
                }
                Err(err) => {
                    self.sink
                        .emit(format!("[kiln] stop: failed to send {cmd:?}: {err}"))
                        .await;
                }
            }
            // Dropping stdin gives the child EOF as a second hint.
        }

        if !polite_sent {
            // No console route: ask the Unix way.
            terminate_group(pgid);
            self.sink.emit("[kiln] stop: sent SIGTERM").await;
        }

        let graceful = wait_for_exit(&mut exit_rx, policy.grace_timeout).await;

        let outcome = if graceful {
            Ok(())
        } else if policy.force_after_timeout {
            kill_group(pgid);
            self.sink.emit("[kiln] stop: sent SIGKILL (grace timeout)").await;
            if wait_for_exit(&mut exit_rx, FORCE_KILL_WAIT).await {
                Ok(())
            } else {
                Err(SupervisorError::ForceKillFailed)
            }
        } else {
            Err(SupervisorError::StopTimedOut)
        };

        // Cleanup is unconditional but once-per-lifecycle: the exit task
        // skips it while a stop is in flight, and the flag covers the rest.
        let (clean, working_dir) = {
            let mut inner = self.inner.lock().await;
            let clean = !inner.locks_cleaned;
            inner.locks_cleaned = true;
            (clean, inner.working_dir.clone())
        };
        if clean {
            locks::remove_session_locks(&working_dir, &self.sink).await;
        }

        match outcome {
            Ok(()) => Ok(self.status().await),
            Err(err) => {
                self.sink.emit(format!("[kiln] stop failed: {err}")).await;
                Err(err)
            }
        }
    }

    /// Stop (bounded), then start. A stop-phase failure is logged and the
    /// relaunch proceeds anyway: the launcher's contract is "always attempt
    /// a fresh launch after requesting termination".
    pub async fn restart(
        &self,
        spec: LaunchSpec,
        policy: &ShutdownPolicy,
    ) -> Result<(), SupervisorError> {
        let bound = policy.grace_timeout + FORCE_KILL_WAIT + RESTART_GRACE_MARGIN;
        match self.status().await.state {
            ProcessState::Running => {
                match tokio::time::timeout(bound, self.stop(policy)).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => {
                        self.sink
                            .emit(format!("[kiln] restart: stop failed ({err}); launching anyway"))
                            .await;
                    }
                    Err(_) => {
                        self.sink
                            .emit("[kiln] restart: stop phase timed out; launching anyway")
                            .await;
                    }
                }
            }
            ProcessState::Stopping => {
                let rx = self.inner.lock().await.exited.clone();
                if let Some(mut rx) = rx
                    && !wait_for_exit(&mut rx, bound).await
                {
                    self.sink
                        .emit("[kiln] restart: previous stop still in flight; launching anyway")
                        .await;
                }
            }
            _ => {}
        }
        self.start(spec).await
    }
}

/// Bounded wait on the exit notification; never a busy poll.
async fn wait_for_exit(rx: &mut watch::Receiver<bool>, bound: Duration) -> bool {
    matches!(
        tokio::time::timeout(bound, rx.wait_for(|done| *done)).await,
        Ok(Ok(_))
    )
}

#[cfg(target_os = "linux")]
unsafe fn set_parent_death_signal() -> std::io::Result<()> {
    // If the supervisor dies, make sure the child is terminated too.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(all(unix, not(target_os = "linux")))]
unsafe fn set_parent_death_signal() -> std::io::Result<()> {
    Ok(())
}

fn terminate_group(pgid: Option<i32>) {
    #[cfg(unix)]
    if let Some(pgid) = pgid {
        unsafe {
            libc::kill(-pgid, libc::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    let _ = pgid;
}

fn kill_group(pgid: Option<i32>) {
    #[cfg(unix)]
    if let Some(pgid) = pgid {
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = pgid;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_with_nothing_live_is_a_no_op_outcome() {
        let sup = Supervisor::new();
        let err = sup.stop(&ShutdownPolicy::default()).await.unwrap_err();
        assert!(matches!(err, SupervisorError::NoActiveProcess));
        assert_eq!(sup.status().await.state, ProcessState::Idle);
    }

    #[tokio::test]
    async fn send_command_before_any_start_is_not_running() {
        let sup = Supervisor::new();
        let err = sup.send_command("help").await.unwrap_err();
        assert!(matches!(err, SupervisorError::NotRunning));
    }

    #[test]
    fn default_policy_matches_the_launcher_contract() {
        let policy = ShutdownPolicy::default();
        assert_eq!(policy.polite_command, "stop");
        assert_eq!(policy.grace_timeout, Duration::from_secs(10));
        assert!(policy.force_after_timeout);
    }
}
