//! Background process management for long-running commands.
//!
//! Used by integration tests that drive the proxy or the tail loop as
//! a real child process and observe its output while it runs.

use std::io::{BufRead, BufReader};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

/// A background process handle. The child is killed on drop.
///
/// Stdout is wrapped in one persistent reader so repeated line waits
/// never lose buffered bytes.
pub struct BackgroundProcess {
    child: Child,
    stdout: Option<BufReader<ChildStdout>>,
}

impl BackgroundProcess {
    /// Spawn with piped stdout and stderr so output can be read while
    /// the process runs.
    pub fn spawn_piped(mut command: Command) -> std::io::Result<Self> {
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        let mut child = command.spawn()?;
        let stdout = child.stdout.take().map(BufReader::new);
        Ok(Self { child, stdout })
    }

    /// Wait for the process to exit, polling up to `timeout`.
    pub fn wait_timeout(
        &mut self,
        timeout: Duration,
    ) -> std::io::Result<Option<std::process::ExitStatus>> {
        let start = Instant::now();
        loop {
            match self.child.try_wait()? {
                Some(status) => return Ok(Some(status)),
                None => {
                    if start.elapsed() > timeout {
                        return Ok(None);
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }

    pub fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill()
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn stderr(&mut self) -> Option<&mut ChildStderr> {
        self.child.stderr.as_mut()
    }

    /// Read stdout lines until one satisfies `pred` or `max_lines`
    /// lines have been read. Returns the matching line. Blocks on the
    /// child's output, so callers should only wait for lines the
    /// child is guaranteed to produce.
    pub fn wait_for_stdout_line<F>(&mut self, max_lines: usize, pred: F) -> Option<String>
    where
        F: Fn(&str) -> bool,
    {
        let reader = self.stdout.as_mut()?;
        for _ in 0..max_lines {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => return None,
                Ok(_) => {
                    let line = line.trim_end();
                    if pred(line) {
                        return Some(line.to_string());
                    }
                }
            }
        }
        None
    }
}

impl Drop for BackgroundProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
    }
}
