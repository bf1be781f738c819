//! External command execution
//!
//! Every interaction with `ip`, `wg` and `systemctl` goes through the
//! [`CommandExecutor`] seam so the engine can be driven by a recording fake
//! in tests.

use crate::{Error, Result};
use nix::sys::stat::{umask, Mode};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Interval between child status polls while a timeout is armed
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Argument vector plus execution options of one external command
#[derive(Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub umask: Option<u32>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            umask: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feed `input` to the child's standard input
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// File mode creation mask applied in the child before exec
    pub fn umask(mut self, mask: u32) -> Self {
        self.umask = Some(mask);
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Program followed by its arguments
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

// Standard input may carry key material, so only argv is ever printed.
impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("stdin", &self.stdin.as_ref().map(|_| "<redacted>"))
            .field("umask", &self.umask)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs external commands
pub trait CommandExecutor: Send + Sync {
    /// Run a command to completion. A non-zero exit status is not an error at
    /// this level; `Err` means the command could not be run at all.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

impl<T: CommandExecutor + ?Sized> CommandExecutor for &T {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        (**self).run(spec)
    }
}

impl<T: CommandExecutor + ?Sized> CommandExecutor for std::sync::Arc<T> {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        (**self).run(spec)
    }
}

/// Executor spawning real processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandExecutor;

impl SystemCommandExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl CommandExecutor for SystemCommandExecutor {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!("Running {}", spec);

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(mask) = spec.umask {
            let mode = Mode::from_bits_truncate(mask as nix::libc::mode_t);
            // SAFETY: umask(2) is async-signal-safe and touches no allocator state.
            unsafe {
                cmd.pre_exec(move || {
                    umask(mode);
                    Ok(())
                });
            }
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Io(std::io::Error::new(e.kind(), format!("{}: {}", spec.program, e))))?;

        let feeder = match (&spec.stdin, child.stdin.take()) {
            (Some(input), Some(pipe)) => Some(feed(pipe, input.clone())),
            _ => None,
        };

        let output = match spec.timeout {
            Some(timeout) => wait_with_timeout(child, timeout)?,
            None => {
                let output = child.wait_with_output()?;
                CommandOutput {
                    exit_code: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                }
            }
        };

        // The child is reaped by now. A child that exits without reading all
        // of its input is reported by its exit status, not as a write error.
        if let Some(feeder) = feeder {
            match feeder.join() {
                Ok(Err(e)) if e.kind() != ErrorKind::BrokenPipe => return Err(e.into()),
                Ok(_) => {}
                Err(_) => warn!("stdin writer for {} panicked", spec.program),
            }
        }

        if !output.success() {
            debug!("{} exited with {}", spec.program, output.exit_code);
        }
        Ok(output)
    }
}

fn wait_with_timeout(mut child: Child, timeout: Duration) -> Result<CommandOutput> {
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);
    let deadline = Instant::now() + timeout;

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            if let Err(e) = child.kill() {
                warn!("Failed to kill timed out command: {}", e);
            }
            let _ = child.wait();
            return Err(Error::Timeout {
                seconds: timeout.as_secs(),
            });
        }
        thread::sleep(POLL_INTERVAL);
    };

    Ok(CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn feed<W>(mut pipe: W, input: String) -> thread::JoinHandle<std::io::Result<()>>
where
    W: Write + Send + 'static,
{
    thread::spawn(move || pipe.write_all(input.as_bytes()))
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(handle: Option<thread::JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_hides_stdin() {
        let spec = CommandSpec::new("wg").arg("pubkey").stdin("very-secret");
        assert_eq!(spec.to_string(), "wg pubkey");
        assert!(!format!("{:?}", spec).contains("very-secret"));
    }

    #[test]
    fn test_run_captures_output() {
        let out = SystemCommandExecutor
            .run(&CommandSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]))
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
        assert!(!out.success());
    }

    #[test]
    fn test_stdin_is_fed() {
        let out = SystemCommandExecutor
            .run(&CommandSpec::new("cat").stdin("hello"))
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "hello");
    }

    #[test]
    fn test_unread_stdin_is_not_an_error() {
        let out = SystemCommandExecutor
            .run(&CommandSpec::new("true").stdin("x".repeat(1 << 20)))
            .unwrap();
        assert!(out.success());
    }

    #[test]
    fn test_timeout_covers_unread_stdin() {
        let err = SystemCommandExecutor
            .run(
                &CommandSpec::new("sleep")
                    .arg("5")
                    .stdin("x".repeat(1 << 20))
                    .timeout(Some(Duration::from_millis(100))),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[test]
    fn test_umask_applies_in_child() {
        let out = SystemCommandExecutor
            .run(&CommandSpec::new("sh").args(["-c", "umask"]).umask(0o077))
            .unwrap();
        assert_eq!(out.stdout.trim(), "0077");
    }

    #[test]
    fn test_timeout() {
        let err = SystemCommandExecutor
            .run(
                &CommandSpec::new("sleep")
                    .arg("5")
                    .timeout(Some(Duration::from_millis(100))),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[test]
    fn test_missing_program() {
        let err = SystemCommandExecutor
            .run(&CommandSpec::new("definitely-not-a-real-binary-wgtun"))
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
