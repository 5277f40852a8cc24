//! Shared integration-test harness for spawning `mayhem` as a child process
//! and exchanging phase frames over its stdio.

#![allow(dead_code)]

use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

/// Default timeout for reading a single line from the process.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A running `mayhem run` process.
///
/// The child process is killed on drop via `kill_on_drop(true)`.
pub struct MayhemProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    stderr: BufReader<ChildStderr>,
}

impl MayhemProcess {
    /// Spawns `mayhem --quiet run <args>` with piped stdio.
    #[allow(clippy::missing_panics_doc)]
    pub fn spawn_run(args: &[&str]) -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_mayhem"))
            .arg("--quiet")
            .arg("run")
            .args(args)
            .env_remove("MAYHEM_CONFIG")
            .env_remove("MAYHEM_ROLE")
            .env_remove("MAYHEM_SEED")
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .expect("failed to spawn mayhem");

        let stdin = child.stdin.take().expect("stdin not captured");
        let stdout = child.stdout.take().expect("stdout not captured");
        let stderr = child.stderr.take().expect("stderr not captured");

        Self {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            stderr: BufReader::new(stderr),
        }
    }

    /// Writes one line to the process's stdin.
    #[allow(clippy::missing_panics_doc)]
    pub async fn send_line(&mut self, line: &str) {
        let stdin = self.stdin.as_mut().expect("stdin already closed");
        stdin
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("failed to write to stdin");
        stdin.flush().await.expect("failed to flush stdin");
    }

    /// Closes stdin, signalling EOF.
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Reads stdout lines until one satisfies `predicate`.
    ///
    /// Panics on EOF or if no matching line arrives within `timeout`.
    #[allow(clippy::missing_panics_doc)]
    pub async fn stdout_line_matching(
        &mut self,
        predicate: impl Fn(&str) -> bool,
        timeout: Duration,
    ) -> String {
        read_matching(&mut self.stdout, predicate, timeout).await
    }

    /// Reads stderr lines until one satisfies `predicate`.
    ///
    /// Panics on EOF or if no matching line arrives within `timeout`.
    #[allow(clippy::missing_panics_doc)]
    pub async fn stderr_line_matching(
        &mut self,
        predicate: impl Fn(&str) -> bool,
        timeout: Duration,
    ) -> String {
        read_matching(&mut self.stderr, predicate, timeout).await
    }

    /// Closes stdin and waits for the process to exit, returning its code.
    ///
    /// Kills the process if it does not exit within five seconds.
    #[allow(clippy::missing_panics_doc)]
    pub async fn finish(mut self) -> Option<i32> {
        self.stdin = None;
        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(status) => status.expect("failed to wait for mayhem").code(),
            Err(_) => {
                self.child.kill().await.expect("failed to kill child");
                None
            }
        }
    }

    /// Runs `mayhem <args>` to completion and returns its output.
    #[allow(clippy::missing_panics_doc)]
    pub fn spawn_command(args: &[&str]) -> Output {
        std::process::Command::new(env!("CARGO_BIN_EXE_mayhem"))
            .args(args)
            .env_remove("MAYHEM_CONFIG")
            .output()
            .expect("failed to run mayhem")
    }

    /// Returns the path to a test fixture.
    #[must_use]
    pub fn fixture_path(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }
}

async fn read_matching<R>(
    reader: &mut BufReader<R>,
    predicate: impl Fn(&str) -> bool,
    timeout: Duration,
) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let result = tokio::time::timeout(timeout, async {
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line).await.expect("read_line I/O error");
            assert!(n > 0, "unexpected EOF from mayhem");
            let trimmed = line.trim_end();
            if predicate(trimmed) {
                return trimmed.to_owned();
            }
        }
    })
    .await;
    result.expect("timed out waiting for line from mayhem")
}
