//! Stream Collector: runs the external tool and forwards its output
//!
//! stdout and stderr each get a reader task feeding one channel. The
//! supervising loop selects over incoming lines, child exit, cancellation
//! and the kill deadline, so output keeps draining for as long as the child
//! runs. A child that fills its pipe buffers is never left waiting on us.
//! Signals go to the child's whole process group, since the tool forks
//! helpers of its own that share its pipes.
//!
//! ```text
//!  stdout ──reader──┐
//!                   ├─► mpsc ─► select! { line | exit | cancel | deadline } ─► sink
//!  stderr ──reader──┘
//! ```

use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Time between the graceful SIGTERM and the forced kill
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

const LINE_BUFFER: usize = 1024;

/// Which of the child's output streams a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Classification of a finished subprocess
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Success,
    /// Tool-reported failure with a positive exit code
    Failure(i32),
    /// Killed by the given signal
    Terminated(i32),
}

/// How a subprocess ended.
///
/// Follows the convention of a single integer code: zero or positive for a
/// normal exit, the negated signal number when killed by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubprocessResult {
    code: i32,
}

impl SubprocessResult {
    pub fn from_code(code: i32) -> Self {
        Self { code }
    }

    pub fn from_status(status: ExitStatus) -> Self {
        let code = match (status.code(), status.signal()) {
            (Some(code), _) => code,
            (None, Some(signal)) => -signal,
            // Stopped/continued states are never reported by wait()
            (None, None) => -1,
        };
        Self { code }
    }

    /// Exit code, negative for a terminating signal.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// The terminating signal, if the process was killed by one.
    pub fn signal(&self) -> Option<i32> {
        (self.code < 0).then_some(-self.code)
    }

    pub fn kind(&self) -> ExitKind {
        match self.code {
            0 => ExitKind::Success,
            code if code > 0 => ExitKind::Failure(code),
            code => ExitKind::Terminated(-code),
        }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }
}

impl fmt::Display for SubprocessResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.signal() {
            Some(signal) => write!(f, "terminated by signal {}", signal),
            None => write!(f, "exit code={}", self.code),
        }
    }
}

/// Launches one external command and supervises it to completion
#[derive(Debug, Clone)]
pub struct StreamCollector {
    program: PathBuf,
    args: Vec<String>,
    grace: Duration,
    kill_switch: CancellationToken,
}

impl StreamCollector {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            grace: DEFAULT_GRACE_PERIOD,
            kill_switch: CancellationToken::new(),
        }
    }

    /// Override the delay between SIGTERM and the forced kill.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Token that skips the grace period and kills the process group at once.
    pub fn with_kill_switch(mut self, kill_switch: CancellationToken) -> Self {
        self.kill_switch = kill_switch;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Start the process with both output streams piped to reader tasks.
    ///
    /// The child leads a new process group so that signals reach everything
    /// it forks, and so that a terminal's SIGINT is ours alone to handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] if the program cannot be executed.
    pub fn spawn(&self) -> Result<RunningProcess> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let (tx, lines) = mpsc::channel(LINE_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, Stream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, Stream::Stderr, tx));
        }

        Ok(RunningProcess {
            pid: child.id(),
            child,
            lines,
            grace: self.grace,
            kill_switch: self.kill_switch.clone(),
        })
    }

    /// [`spawn`](Self::spawn) followed by [`RunningProcess::collect`].
    pub async fn run<F>(&self, cancel: &CancellationToken, sink: F) -> Result<SubprocessResult>
    where
        F: FnMut(Stream, &str),
    {
        self.spawn()?.collect(cancel, sink).await
    }
}

/// A spawned child whose output has not yet been collected
#[derive(Debug)]
pub struct RunningProcess {
    pid: Option<u32>,
    child: Child,
    lines: mpsc::Receiver<(Stream, String)>,
    grace: Duration,
    kill_switch: CancellationToken,
}

impl RunningProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Forward every output line to `sink` until the child exits.
    ///
    /// When `cancel` fires the child's process group gets SIGTERM; if the
    /// child is still alive after the grace period the group is killed
    /// outright. Output still buffered when the child exits is drained before
    /// returning. Descendants may keep the pipes open past the child's exit:
    /// once cancelled, that drain ends at the kill deadline.
    pub async fn collect<F>(
        mut self,
        cancel: &CancellationToken,
        mut sink: F,
    ) -> Result<SubprocessResult>
    where
        F: FnMut(Stream, &str),
    {
        let mut kill_at: Option<Instant> = None;
        let mut terminating = false;
        let mut killed = false;
        let mut open = true;

        let status = loop {
            tokio::select! {
                line = self.lines.recv(), if open => match line {
                    Some((stream, line)) => sink(stream, &line),
                    None => open = false,
                },
                status = self.child.wait() => break status?,
                _ = cancel.cancelled(), if !terminating => {
                    terminating = true;
                    signal_group(self.pid, Signal::SIGTERM);
                    kill_at = Some(Instant::now() + self.grace);
                }
                _ = self.kill_switch.cancelled(), if !killed => {
                    terminating = true;
                    killed = true;
                    kill_at = None;
                    tracing::warn!(pid = ?self.pid, "kill requested; killing process group");
                    self.force_kill();
                }
                _ = sleep_until(kill_at.unwrap_or_else(Instant::now)), if kill_at.is_some() => {
                    kill_at = None;
                    killed = true;
                    tracing::warn!(pid = ?self.pid, grace = ?self.grace, "process ignored SIGTERM; killing");
                    self.force_kill();
                }
            }
        };

        let mut drain_until = match (kill_at, terminating) {
            (Some(at), _) => Some(at),
            (None, true) => Some(Instant::now() + self.grace),
            (None, false) => None,
        };
        loop {
            tokio::select! {
                line = self.lines.recv() => match line {
                    Some((stream, line)) => sink(stream, &line),
                    None => break,
                },
                _ = cancel.cancelled(), if drain_until.is_none() => {
                    signal_group(self.pid, Signal::SIGTERM);
                    drain_until = Some(Instant::now() + self.grace);
                }
                _ = self.kill_switch.cancelled(), if !killed => {
                    killed = true;
                    drain_until = Some(Instant::now());
                }
                _ = sleep_until(drain_until.unwrap_or_else(Instant::now)), if drain_until.is_some() => {
                    tracing::warn!(pid = ?self.pid, "output still open after the child exited; killing process group");
                    signal_group(self.pid, Signal::SIGKILL);
                    break;
                }
            }
        }

        Ok(SubprocessResult::from_status(status))
    }

    fn force_kill(&mut self) {
        signal_group(self.pid, Signal::SIGKILL);
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(pid = ?self.pid, error = %e, "process already gone");
        }
    }
}

impl Drop for RunningProcess {
    fn drop(&mut self) {
        // kill_on_drop reaches the child only; take its descendants with it
        if let Ok(None) = self.child.try_wait() {
            signal_group(self.pid, Signal::SIGKILL);
        }
    }
}

/// Signal the process group led by `pid`.
fn signal_group(pid: Option<u32>, sig: Signal) {
    let Some(raw) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    match signal::killpg(Pid::from_raw(raw), sig) {
        Ok(()) => tracing::debug!(pgid = raw, signal = ?sig, "signalled process group"),
        Err(Errno::ESRCH) => tracing::debug!(pgid = raw, "process group already gone"),
        Err(e) => tracing::warn!(pgid = raw, signal = ?sig, error = %e, "unable to signal process group"),
    }
}

async fn forward_lines<R>(reader: R, stream: Stream, tx: mpsc::Sender<(Stream, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(trim_line_ending(&buf)).into_owned();
                if tx.send((stream, line)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(?stream, error = %e, "output stream read failed");
                break;
            }
        }
    }
}

fn trim_line_ending(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn shell(script: &str) -> StreamCollector {
        StreamCollector::new("/bin/sh", vec!["-c".to_string(), script.to_string()])
    }

    async fn run_collecting(
        collector: &StreamCollector,
        cancel: &CancellationToken,
    ) -> (SubprocessResult, Vec<(Stream, String)>) {
        let mut lines = Vec::new();
        let result = collector
            .run(cancel, |stream, line| lines.push((stream, line.to_string())))
            .await
            .unwrap();
        (result, lines)
    }

    #[rstest]
    #[case(0, ExitKind::Success)]
    #[case(2, ExitKind::Failure(2))]
    #[case(-15, ExitKind::Terminated(15))]
    fn test_result_classification(#[case] code: i32, #[case] kind: ExitKind) {
        let result = SubprocessResult::from_code(code);
        assert_eq!(result.kind(), kind);
        assert_eq!(result.success(), code == 0);
    }

    #[test]
    fn test_result_display() {
        assert_eq!(SubprocessResult::from_code(23).to_string(), "exit code=23");
        assert_eq!(
            SubprocessResult::from_code(-9).to_string(),
            "terminated by signal 9"
        );
    }

    #[test]
    fn test_trim_line_ending() {
        assert_eq!(trim_line_ending(b"abc\r\n"), b"abc");
        assert_eq!(trim_line_ending(b"abc\n"), b"abc");
        assert_eq!(trim_line_ending(b"abc"), b"abc");
    }

    #[tokio::test]
    async fn test_exit_codes_are_reported() {
        let cancel = CancellationToken::new();

        let (ok, _) = run_collecting(&shell("exit 0"), &cancel).await;
        let (failed, _) = run_collecting(&shell("exit 2"), &cancel).await;

        assert_eq!(ok.kind(), ExitKind::Success);
        assert_eq!(failed.kind(), ExitKind::Failure(2));
    }

    #[tokio::test]
    async fn test_signal_exit_is_negative() {
        let cancel = CancellationToken::new();

        let (result, lines) = run_collecting(&shell("echo bye; kill -TERM $$; sleep 5"), &cancel).await;

        assert_eq!(result.code(), -15);
        assert_eq!(result.signal(), Some(15));
        assert_eq!(lines, vec![(Stream::Stdout, "bye".to_string())]);
    }

    #[tokio::test]
    async fn test_streams_stay_distinct_and_ordered() {
        let cancel = CancellationToken::new();

        let (_, lines) = run_collecting(
            &shell("echo one; echo oops >&2; echo two; echo three"),
            &cancel,
        )
        .await;

        let stdout: Vec<_> = lines
            .iter()
            .filter(|(s, _)| *s == Stream::Stdout)
            .map(|(_, l)| l.as_str())
            .collect();
        let stderr: Vec<_> = lines
            .iter()
            .filter(|(s, _)| *s == Stream::Stderr)
            .map(|(_, l)| l.as_str())
            .collect();
        assert_eq!(stdout, vec!["one", "two", "three"]);
        assert_eq!(stderr, vec!["oops"]);
    }

    #[tokio::test]
    async fn test_unterminated_last_line_is_drained() {
        let cancel = CancellationToken::new();

        let (_, lines) = run_collecting(&shell("printf 'a\\nb\\nc'"), &cancel).await;

        let text: Vec<_> = lines.into_iter().map(|(_, l)| l).collect();
        assert_eq!(text, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let collector = StreamCollector::new("/nonexistent/rsync", Vec::new());

        let err = collector.spawn().unwrap_err();

        assert!(matches!(err, Error::Spawn { .. }), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_cancel_sends_sigterm() {
        let cancel = CancellationToken::new();
        let collector = shell("echo started; exec sleep 30");
        let process = collector.spawn().unwrap();
        assert!(process.pid().is_some());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            process.collect(&cancel, |_, _| {}),
        )
        .await
        .expect("collector should return promptly after SIGTERM")
        .unwrap();

        assert_eq!(result.kind(), ExitKind::Terminated(15));
    }

    #[tokio::test]
    async fn test_ignored_sigterm_escalates_to_kill() {
        let cancel = CancellationToken::new();
        let collector = shell("trap '' TERM; echo ignoring; while :; do :; done")
            .with_grace_period(Duration::from_millis(300));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });
        let (result, _) = tokio::time::timeout(
            Duration::from_secs(10),
            run_collecting(&collector, &cancel),
        )
        .await
        .expect("forced kill should end the process");

        assert_eq!(result.kind(), ExitKind::Terminated(9));
    }

    #[tokio::test]
    async fn test_cancel_after_exit_changes_nothing() {
        let cancel = CancellationToken::new();

        let (result, _) = run_collecting(&shell("exit 3"), &cancel).await;
        cancel.cancel();

        assert_eq!(result.kind(), ExitKind::Failure(3));
    }

    #[tokio::test]
    async fn test_kill_switch_skips_grace_period() {
        let cancel = CancellationToken::new();
        let kill = CancellationToken::new();
        let collector = shell("trap '' TERM; echo ignoring; while :; do :; done")
            .with_kill_switch(kill.clone());

        let trigger = kill.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });
        let (result, _) = tokio::time::timeout(
            Duration::from_secs(10),
            run_collecting(&collector, &cancel),
        )
        .await
        .expect("kill switch should not wait out the 30s grace period");

        assert_eq!(result.kind(), ExitKind::Terminated(9));
    }

    #[tokio::test]
    async fn test_cancel_ends_drain_held_open_by_descendant() {
        let cancel = CancellationToken::new();
        let collector = shell("sleep 30 & echo forked; exit 0")
            .with_grace_period(Duration::from_millis(300));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });
        let (result, lines) = tokio::time::timeout(
            Duration::from_secs(8),
            run_collecting(&collector, &cancel),
        )
        .await
        .expect("a forked descendant kept the collector waiting");

        assert_eq!(result.kind(), ExitKind::Success);
        assert_eq!(lines, vec![(Stream::Stdout, "forked".to_string())]);
    }
}
