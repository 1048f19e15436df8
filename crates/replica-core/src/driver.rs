//! Sync driver
//!
//! Runs the external sync procedure for one direction and waits for it
//! under a hard wall-clock timeout. The procedure is started in its own
//! process group; on timeout, or when the calling future is dropped, the
//! whole group is killed and the direct child reaped before control
//! returns.
//!
//! At most one non-dry-run invocation per direction runs at a time. A
//! second one is turned away with [`SyncOutcome::Busy`] without launching.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::config::Settings;
use crate::error::FailureKind;

/// Which way data flows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Local store to remote store
    Forward,
    /// Remote store to local store
    Reverse,
}

impl SyncDirection {
    pub fn label(&self) -> &'static str {
        match self {
            SyncDirection::Forward => "local to remote",
            SyncDirection::Reverse => "remote to local",
        }
    }
}

impl std::fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// What the procedure is asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Collection(String),
    DryRun,
}

impl SyncMode {
    /// Arguments passed to the procedure
    pub fn args(&self) -> Vec<String> {
        match self {
            SyncMode::Full => Vec::new(),
            SyncMode::Collection(name) => vec!["--collection".to_string(), name.clone()],
            SyncMode::DryRun => vec!["--dry-run".to_string()],
        }
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, SyncMode::DryRun)
    }

    fn name(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Collection(_) => "collection",
            SyncMode::DryRun => "dry_run",
        }
    }

    fn collection(&self) -> Option<&str> {
        match self {
            SyncMode::Collection(name) => Some(name.as_str()),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Full => f.write_str("full"),
            SyncMode::Collection(name) => write!(f, "collection '{}'", name),
            SyncMode::DryRun => f.write_str("dry run"),
        }
    }
}

/// A request to run the sync procedure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncInvocation {
    pub direction: SyncDirection,
    pub mode: SyncMode,
}

impl SyncInvocation {
    pub fn full(direction: SyncDirection) -> Self {
        Self {
            direction,
            mode: SyncMode::Full,
        }
    }

    pub fn collection(direction: SyncDirection, name: impl Into<String>) -> Self {
        Self {
            direction,
            mode: SyncMode::Collection(name.into()),
        }
    }

    pub fn dry_run(direction: SyncDirection) -> Self {
        Self {
            direction,
            mode: SyncMode::DryRun,
        }
    }
}

/// How an invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The procedure ran to completion; `exit_code` is `-1` if it was
    /// terminated by a signal
    Completed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    TimedOut {
        error: String,
    },
    LaunchFailed {
        error: String,
    },
    /// Another invocation in the same direction holds the slot
    Busy {
        error: String,
    },
}

impl SyncOutcome {
    fn name(&self) -> &'static str {
        match self {
            SyncOutcome::Completed { .. } => "completed",
            SyncOutcome::TimedOut { .. } => "timed_out",
            SyncOutcome::LaunchFailed { .. } => "launch_failed",
            SyncOutcome::Busy { .. } => "busy",
        }
    }
}

/// Result of one [`SyncInvocation`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    /// Completed with exit code 0
    pub success: bool,
    pub direction: SyncDirection,
    pub mode: SyncMode,
    pub outcome: SyncOutcome,
}

impl SyncResult {
    pub fn new(invocation: SyncInvocation, outcome: SyncOutcome) -> Self {
        let success = matches!(outcome, SyncOutcome::Completed { exit_code: 0, .. });
        Self {
            success,
            direction: invocation.direction,
            mode: invocation.mode,
            outcome,
        }
    }

    /// Failure class when the procedure did not run to completion
    pub fn failure(&self) -> Option<(FailureKind, &str)> {
        match &self.outcome {
            SyncOutcome::Completed { .. } => None,
            SyncOutcome::TimedOut { error } => {
                Some((FailureKind::TimeoutExceeded, error.as_str()))
            }
            SyncOutcome::LaunchFailed { error } => {
                Some((FailureKind::LaunchFailure, error.as_str()))
            }
            SyncOutcome::Busy { error } => Some((FailureKind::SyncInProgress, error.as_str())),
        }
    }
}

#[derive(Serialize)]
struct SyncResultWire<'a> {
    success: bool,
    direction: SyncDirection,
    mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    collection: Option<&'a str>,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdout: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stderr: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

impl Serialize for SyncResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut wire = SyncResultWire {
            success: self.success,
            direction: self.direction,
            mode: self.mode.name(),
            collection: self.mode.collection(),
            outcome: self.outcome.name(),
            exit_code: None,
            stdout: None,
            stderr: None,
            error: None,
        };
        match &self.outcome {
            SyncOutcome::Completed {
                exit_code,
                stdout,
                stderr,
            } => {
                wire.exit_code = Some(*exit_code);
                wire.stdout = Some(stdout.as_str());
                wire.stderr = Some(stderr.as_str());
            }
            SyncOutcome::TimedOut { error }
            | SyncOutcome::LaunchFailed { error }
            | SyncOutcome::Busy { error } => wire.error = Some(error.as_str()),
        }
        wire.serialize(serializer)
    }
}

/// Something that can carry out a [`SyncInvocation`].
///
/// Implementations never fail: every problem is a [`SyncOutcome`].
#[async_trait]
pub trait SyncRunner: Send + Sync {
    async fn run(&self, invocation: SyncInvocation) -> SyncResult;
}

/// [`SyncRunner`] that launches the configured procedures
#[derive(Debug)]
pub struct SyncDriver {
    forward: PathBuf,
    reverse: PathBuf,
    timeout: Duration,
    forward_slot: Mutex<()>,
    reverse_slot: Mutex<()>,
}

impl SyncDriver {
    pub fn new(forward: PathBuf, reverse: PathBuf, timeout: Duration) -> Self {
        Self {
            forward,
            reverse,
            timeout,
            forward_slot: Mutex::new(()),
            reverse_slot: Mutex::new(()),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.forward_script.clone(),
            settings.reverse_script.clone(),
            settings.sync_timeout,
        )
    }

    pub fn script(&self, direction: SyncDirection) -> &Path {
        match direction {
            SyncDirection::Forward => &self.forward,
            SyncDirection::Reverse => &self.reverse,
        }
    }

    fn slot(&self, direction: SyncDirection) -> &Mutex<()> {
        match direction {
            SyncDirection::Forward => &self.forward_slot,
            SyncDirection::Reverse => &self.reverse_slot,
        }
    }
}

#[async_trait]
impl SyncRunner for SyncDriver {
    async fn run(&self, invocation: SyncInvocation) -> SyncResult {
        let direction = invocation.direction;

        let _slot = if invocation.mode.is_dry_run() {
            None
        } else {
            match self.slot(direction).try_lock() {
                Ok(guard) => Some(guard),
                Err(_) => {
                    tracing::warn!(
                        %direction,
                        mode = %invocation.mode,
                        "Sync already running, rejecting"
                    );
                    let error = format!(
                        "A {} sync is already running; wait for it to finish",
                        direction
                    );
                    return SyncResult::new(invocation, SyncOutcome::Busy { error });
                }
            }
        };

        let program = self.script(direction);
        tracing::info!(
            %direction,
            mode = %invocation.mode,
            program = %program.display(),
            "Starting sync"
        );

        let outcome = execute(program, &invocation.mode.args(), self.timeout).await;
        let result = SyncResult::new(invocation, outcome);

        if let SyncOutcome::Completed { exit_code, .. } = &result.outcome {
            tracing::info!(%direction, exit_code, success = result.success, "Sync finished");
        }
        result
    }
}

/// Run `program` to completion or until `limit` elapses
async fn execute(program: &Path, args: &[String], limit: Duration) -> SyncOutcome {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(program = %program.display(), error = %e, "Failed to launch sync");
            return SyncOutcome::LaunchFailed {
                error: format!("Failed to launch {}: {}", program.display(), e),
            };
        }
    };

    let mut group = ProcessGroup::new(child.id());
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let finished = tokio::time::timeout(limit, async {
        tokio::join!(child.wait(), read_pipe(stdout), read_pipe(stderr))
    })
    .await;

    match finished {
        Ok((Ok(status), stdout, stderr)) => {
            group.disarm();
            SyncOutcome::Completed {
                exit_code: status.code().unwrap_or(-1),
                stdout,
                stderr,
            }
        }
        Ok((Err(e), _, _)) => {
            group.kill();
            let _ = child.kill().await;
            SyncOutcome::LaunchFailed {
                error: format!("Failed to wait for {}: {}", program.display(), e),
            }
        }
        Err(_) => {
            tracing::warn!(
                program = %program.display(),
                timeout_secs = limit.as_secs(),
                "Sync timed out, killing process group"
            );
            group.kill();
            let _ = child.kill().await;
            SyncOutcome::TimedOut {
                error: format!("Sync timed out after {} seconds", limit.as_secs()),
            }
        }
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

/// Kills a child's process group when dropped, unless disarmed.
///
/// Dropping happens when the invoking future is cancelled mid-run.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid {
            tracing::warn!(pgid, "Sync abandoned, killing process group");
        }
        self.kill();
    }
}

fn kill_group(pgid: u32) {
    #[cfg(unix)]
    {
        let Ok(raw) = libc::pid_t::try_from(pgid) else {
            tracing::warn!(pgid, "Process group id out of range, not killing");
            return;
        };
        // SAFETY: killpg only sends a signal; the group was created by process_group(0)
        if unsafe { libc::killpg(raw, libc::SIGKILL) } != 0 {
            let error = std::io::Error::last_os_error();
            // ESRCH: every member already exited
            if error.raw_os_error() != Some(libc::ESRCH) {
                tracing::warn!(pgid, error = %error, "Failed to kill process group");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pgid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use replica_test_utils::write_stub_script;
    use rstest::rstest;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn driver(dir: &TempDir, forward_body: &str, reverse_body: &str, timeout: Duration) -> SyncDriver {
        let forward = write_stub_script(dir.path(), "forward.sh", forward_body);
        let reverse = write_stub_script(dir.path(), "reverse.sh", reverse_body);
        SyncDriver::new(forward, reverse, timeout)
    }

    /// Poll until `path` exists and holds a pid
    async fn wait_for_pid(path: &Path) -> u32 {
        for _ in 0..200 {
            if let Ok(text) = std::fs::read_to_string(path) {
                if let Ok(pid) = text.trim().parse() {
                    return pid;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("pid file {} never appeared", path.display());
    }

    /// Running and not a zombie
    #[cfg(target_os = "linux")]
    fn is_running(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(") ")
                .map(|(_, rest)| !rest.starts_with('Z') && !rest.starts_with('X'))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    async fn wait_until_gone(pid: u32) -> bool {
        for _ in 0..100 {
            if !is_running(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[rstest]
    #[case(SyncMode::Full, Vec::<&str>::new())]
    #[case(SyncMode::Collection("notes".to_string()), vec!["--collection", "notes"])]
    #[case(SyncMode::DryRun, vec!["--dry-run"])]
    fn test_mode_args(#[case] mode: SyncMode, #[case] expected: Vec<&str>) {
        assert_eq!(mode.args(), expected);
    }

    #[tokio::test]
    async fn test_completed_success_captures_streams() {
        let dir = TempDir::new().unwrap();
        let driver = driver(
            &dir,
            "echo \"args:$*\"\necho oops >&2\nexit 0\n",
            "exit 0\n",
            Duration::from_secs(10),
        );

        let result = driver
            .run(SyncInvocation::collection(SyncDirection::Forward, "notes"))
            .await;

        assert!(result.success);
        assert_eq!(
            result.outcome,
            SyncOutcome::Completed {
                exit_code: 0,
                stdout: "args:--collection notes\n".to_string(),
                stderr: "oops\n".to_string(),
            }
        );
        assert_eq!(result.failure(), None);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_success() {
        let dir = TempDir::new().unwrap();
        let driver = driver(&dir, "exit 0\n", "echo partial\nexit 3\n", Duration::from_secs(10));

        let result = driver.run(SyncInvocation::full(SyncDirection::Reverse)).await;

        assert!(!result.success);
        match result.outcome {
            SyncOutcome::Completed {
                exit_code, stdout, ..
            } => {
                assert_eq!(exit_code, 3);
                assert_eq!(stdout, "partial\n");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_script_is_launch_failure() {
        let dir = TempDir::new().unwrap();
        let driver = SyncDriver::new(
            dir.path().join("absent.sh"),
            dir.path().join("absent.sh"),
            Duration::from_secs(10),
        );

        let result = driver.run(SyncInvocation::dry_run(SyncDirection::Forward)).await;

        assert!(!result.success);
        let (kind, error) = result.failure().unwrap();
        assert_eq!(kind, FailureKind::LaunchFailure);
        assert!(error.contains("absent.sh"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_process_group() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("pids");
        let body = format!(
            "sleep 30 &\necho $! > {grand}\necho $$ > {own}\nwait\n",
            grand = dir.path().join("grandchild").display(),
            own = pid_file.display(),
        );
        let driver = driver(&dir, &body, "exit 0\n", Duration::from_millis(500));

        let result = driver.run(SyncInvocation::full(SyncDirection::Forward)).await;

        assert!(!result.success);
        assert!(matches!(result.outcome, SyncOutcome::TimedOut { .. }));
        assert_eq!(result.failure().map(|f| f.0), Some(FailureKind::TimeoutExceeded));

        let own = wait_for_pid(&pid_file).await;
        let grandchild = wait_for_pid(&dir.path().join("grandchild")).await;
        assert!(!is_running(own), "sync procedure still running");
        assert!(wait_until_gone(grandchild).await, "grandchild still running");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_cancellation_kills_process_group() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("pid");
        let body = format!("echo $$ > {}\nsleep 30\n", pid_file.display());
        let driver = Arc::new(driver(&dir, &body, "exit 0\n", Duration::from_secs(60)));

        let running = {
            let driver = driver.clone();
            tokio::spawn(async move { driver.run(SyncInvocation::full(SyncDirection::Forward)).await })
        };
        let pid = wait_for_pid(&pid_file).await;
        assert!(is_running(pid));

        running.abort();
        let _ = running.await;

        assert!(wait_until_gone(pid).await, "sync procedure survived cancellation");
    }

    #[tokio::test]
    async fn test_second_sync_same_direction_is_busy() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("started");
        let body = format!("echo $$ > {}\nsleep 30\n", marker.display());
        let driver = Arc::new(driver(&dir, &body, "exit 0\n", Duration::from_secs(60)));

        let first = {
            let driver = driver.clone();
            tokio::spawn(async move { driver.run(SyncInvocation::full(SyncDirection::Forward)).await })
        };
        wait_for_pid(&marker).await;

        let second = driver
            .run(SyncInvocation::collection(SyncDirection::Forward, "notes"))
            .await;
        assert_eq!(second.failure().map(|f| f.0), Some(FailureKind::SyncInProgress));
        assert!(!second.success);

        let other_direction = driver.run(SyncInvocation::full(SyncDirection::Reverse)).await;
        assert!(other_direction.success);

        first.abort();
        let _ = first.await;

        assert!(driver.slot(SyncDirection::Forward).try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_dry_run_is_never_busy() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("started");
        let body = format!(
            "if [ \"$1\" = \"--dry-run\" ]; then echo planned; exit 0; fi\necho $$ > {}\nsleep 30\n",
            marker.display()
        );
        let driver = Arc::new(driver(&dir, &body, "exit 0\n", Duration::from_secs(60)));

        let full = {
            let driver = driver.clone();
            tokio::spawn(async move { driver.run(SyncInvocation::full(SyncDirection::Forward)).await })
        };
        wait_for_pid(&marker).await;

        let dry = driver.run(SyncInvocation::dry_run(SyncDirection::Forward)).await;
        assert!(dry.success);

        full.abort();
        let _ = full.await;
    }

    #[test]
    fn test_result_wire_shape() {
        let result = SyncResult::new(
            SyncInvocation::collection(SyncDirection::Reverse, "notes"),
            SyncOutcome::Completed {
                exit_code: 0,
                stdout: "done\n".to_string(),
                stderr: String::new(),
            },
        );
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "success": true,
                "direction": "reverse",
                "mode": "collection",
                "collection": "notes",
                "outcome": "completed",
                "exit_code": 0,
                "stdout": "done\n",
                "stderr": "",
            })
        );
    }

    #[test]
    fn test_timed_out_wire_shape_has_no_exit_code() {
        let result = SyncResult::new(
            SyncInvocation::full(SyncDirection::Forward),
            SyncOutcome::TimedOut {
                error: "Sync timed out after 1800 seconds".to_string(),
            },
        );
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["outcome"], "timed_out");
        assert!(value.get("exit_code").is_none());
        assert!(value.get("collection").is_none());
    }
}
