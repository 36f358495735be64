//! [`FakeTool`] shell scripts that stand in for the external sync tool.
//!
//! Scripts are run as `/bin/sh <script> ...` rather than executed directly:
//! exec'ing a file this process has just written races with concurrent
//! forks in other test threads and can fail with `ETXTBSY`.

use std::fs;
use std::path::{Path, PathBuf};

/// A generated script plus the way to invoke it.
#[derive(Debug, Clone)]
pub struct FakeTool {
    script: PathBuf,
}

impl FakeTool {
    /// Write `body` as a POSIX shell script named `name` inside `dir`.
    pub fn script(dir: &Path, name: &str, body: &str) -> Self {
        let script = dir.join(name);
        fs::write(&script, format!("#!/bin/sh\n{}\n", body))
            .expect("FakeTool::script: failed to write script");
        Self { script }
    }

    /// Prints each argument on its own line, then exits 0.
    pub fn echo_args(dir: &Path) -> Self {
        Self::script(
            dir,
            "echo-args",
            r#"for arg in "$@"; do printf '%s\n' "$arg"; done"#,
        )
    }

    /// Emits `bytes` bytes on stdout and then `bytes` on stderr, in 64-byte
    /// lines, before exiting 0.
    pub fn flood(dir: &Path, bytes: usize) -> Self {
        let line = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcde";
        Self::script(
            dir,
            "flood",
            &format!(
                "yes {line} | head -c {bytes}\nyes {line} | head -c {bytes} >&2\nexit 0",
                line = line,
                bytes = bytes
            ),
        )
    }

    /// Writes one line to each stream and exits with `code`.
    pub fn exit_with(dir: &Path, code: i32) -> Self {
        Self::script(
            dir,
            &format!("exit-{}", code),
            &format!("echo starting\necho failing >&2\nexit {}", code),
        )
    }

    /// Prints a line and then sleeps for `secs`, responding normally to
    /// SIGTERM.
    pub fn sleeper(dir: &Path, secs: u32) -> Self {
        Self::script(dir, "sleeper", &format!("echo sleeping\nexec sleep {}", secs))
    }

    /// Ignores SIGTERM and spins until killed.
    pub fn stubborn(dir: &Path) -> Self {
        Self::script(
            dir,
            "stubborn",
            "trap '' TERM\necho ignoring\ni=0\nwhile :; do i=$((i+1)); done",
        )
    }

    /// Forks a long-running helper that shares its output pipes, then waits
    /// for it.
    pub fn forking(dir: &Path, secs: u32) -> Self {
        Self::script(
            dir,
            "forking",
            &format!("sleep {} &\necho forked\nwait", secs),
        )
    }

    /// Terminates itself with SIGTERM after one line of output.
    pub fn self_terminating(dir: &Path) -> Self {
        Self::script(dir, "self-term", "echo bye\nkill -TERM $$\nsleep 5")
    }

    /// Program to execute.
    pub fn program(&self) -> PathBuf {
        PathBuf::from("/bin/sh")
    }

    /// Leading options that select the script.
    pub fn options(&self) -> Vec<String> {
        vec![self.script.to_string_lossy().into_owned()]
    }

    pub fn script_path(&self) -> &Path {
        &self.script
    }
}
