//! External process supervision.
//!
//! [`Subprocess`] spawns a program with all three standard streams piped and
//! lets the caller poll for completion instead of blocking, so the calling loop
//! can interleave stop checks and output draining. stdout and stderr are pumped
//! by one background reader thread each; `read_some_*` moves whatever those
//! threads have delivered into the local buffers without blocking.

use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{trace, warn};

/// Upper bound on how long a single [`Subprocess::is_done`] call waits.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(50);

const POLL_STEP: Duration = Duration::from_millis(5);

/// How long `close` keeps collecting output after a normal exit.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed waiting for process: {0}")]
    Wait(#[source] io::Error),

    #[error("failed to terminate process: {0}")]
    Terminate(#[source] io::Error),
}

/// A program plus its arguments.
///
/// Arguments reach the OS as separate argv entries. `Display` renders the
/// command the way it is echoed to the build log: the program followed by each
/// argument, separated by single spaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

struct PipeReader {
    rx: Receiver<Vec<u8>>,
    buffer: Vec<u8>,
    closed: bool,
}

impl PipeReader {
    fn spawn<R: Read + Send + 'static>(mut source: R, name: &str) -> Self {
        let (tx, rx) = mpsc::channel();
        let pump = move || {
            let mut chunk = [0u8; 4096];
            loop {
                match source.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(chunk[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        };
        // A failed spawn drops the sender, which the receiver sees as EOF.
        if let Err(e) = thread::Builder::new().name(name.to_string()).spawn(pump) {
            warn!("could not start {} reader: {}", name, e);
        }
        Self {
            rx,
            buffer: Vec::new(),
            closed: false,
        }
    }

    fn closed() -> Self {
        let (_, rx) = mpsc::channel();
        Self {
            rx,
            buffer: Vec::new(),
            closed: true,
        }
    }

    fn read_some(&mut self) {
        while !self.closed {
            match self.rx.try_recv() {
                Ok(bytes) => self.buffer.extend_from_slice(&bytes),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.closed = true,
            }
        }
    }

    fn drain_until_closed(&mut self, deadline: Instant) {
        while !self.closed {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.rx.recv_timeout(remaining) {
                Ok(bytes) => self.buffer.extend_from_slice(&bytes),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => self.closed = true,
            }
        }
    }

    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }
}

/// A running (or finished) external process with captured output.
pub struct Subprocess {
    program: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    output: PipeReader,
    error: PipeReader,
    status: Option<ExitStatus>,
}

impl Subprocess {
    /// Spawn `command` in `working_dir` with its own console suppressed.
    pub fn start(command: &CommandLine, working_dir: &Path) -> Result<Self, ProcessError> {
        let mut cmd = Command::new(command.program());
        cmd.args(command.get_args())
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        suppress_console(&mut cmd);

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: command.program().to_string(),
            source,
        })?;
        trace!(pid = child.id(), "started {}", command);

        let output = child
            .stdout
            .take()
            .map(|pipe| PipeReader::spawn(pipe, "cxb-stdout"))
            .unwrap_or_else(PipeReader::closed);
        let error = child
            .stderr
            .take()
            .map(|pipe| PipeReader::spawn(pipe, "cxb-stderr"))
            .unwrap_or_else(PipeReader::closed);
        let stdin = child.stdin.take();

        Ok(Self {
            program: command.program().to_string(),
            child: Some(child),
            stdin,
            output,
            error,
            status: None,
        })
    }

    /// Wait at most [`POLL_TIMEOUT`] for the process to exit.
    pub fn is_done(&mut self) -> Result<bool, ProcessError> {
        if self.status.is_some() {
            return Ok(true);
        }
        let Some(child) = self.child.as_mut() else {
            return Ok(true);
        };

        let deadline = Instant::now() + POLL_TIMEOUT;
        loop {
            if let Some(status) = child.try_wait().map_err(ProcessError::Wait)? {
                trace!("{} exited with {}", self.program, status);
                self.status = Some(status);
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            thread::sleep(POLL_STEP.min(deadline - now));
        }
    }

    /// Kill the process, block until the OS confirms the exit, then close.
    pub fn terminate(&mut self) -> Result<(), ProcessError> {
        if let Some(child) = self.child.as_mut()
            && self.status.is_none()
        {
            match child.kill() {
                Ok(()) => {}
                // Already exited between the last poll and now.
                Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
                Err(e) => return Err(ProcessError::Terminate(e)),
            }
            let status = child.wait().map_err(ProcessError::Wait)?;
            trace!("{} terminated ({})", self.program, status);
            self.status = Some(status);
        }
        self.release();
        Ok(())
    }

    /// Release the process handles once exit has been observed.
    pub fn close(&mut self) {
        if self.child.is_some() && self.status.is_some() {
            let deadline = Instant::now() + CLOSE_GRACE;
            self.output.drain_until_closed(deadline);
            self.error.drain_until_closed(deadline);
        }
        self.release();
    }

    fn release(&mut self) {
        self.stdin = None;
        self.child = None;
        self.output.read_some();
        self.error.read_some();
    }

    /// [`is_done`](Self::is_done), killing the process if its state cannot
    /// be read so it never outlives its owner unsupervised.
    pub fn poll(&mut self) -> Result<bool, ProcessError> {
        let result = self.is_done();
        self.kill_on_error(result)
    }

    fn kill_on_error<T>(&mut self, result: Result<T, ProcessError>) -> Result<T, ProcessError> {
        if result.is_err()
            && let Err(e) = self.terminate()
        {
            warn!("could not terminate {}: {}", self.program, e);
        }
        result
    }

    /// Poll until exit, draining both pipes as it goes, then close.
    pub fn soft_wait_for_exit(&mut self) -> Result<(), ProcessError> {
        while !self.poll()? {
            self.read_some_error();
            self.read_some_output();
            thread::yield_now();
        }
        self.close();
        Ok(())
    }

    pub fn read_some_output(&mut self) {
        self.output.read_some();
    }

    pub fn read_some_error(&mut self) {
        self.error.read_some();
    }

    pub fn read_output_pipe(&mut self) -> String {
        self.output.read_some();
        self.output.contents()
    }

    pub fn read_error_pipe(&mut self) -> String {
        self.error.read_some();
        self.error.contents()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }
}

#[cfg(windows)]
fn suppress_console(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn suppress_console(_cmd: &mut Command) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_display() {
        let mut cmd = CommandLine::new("g++");
        cmd.arg("-O4").args(["-c", "src/a.cpp"]).arg("-o").arg("output/src/a.o");
        assert_eq!(cmd.to_string(), "g++ -O4 -c src/a.cpp -o output/src/a.o");
        assert_eq!(cmd.program(), "g++");
        assert_eq!(cmd.get_args().len(), 5);
    }

    #[test]
    fn test_command_line_without_args() {
        assert_eq!(CommandLine::new("windres").to_string(), "windres");
    }

    #[test]
    fn test_spawn_failure_is_reported() {
        let cmd = CommandLine::new("cxb-definitely-not-a-real-program");
        let err = Subprocess::start(&cmd, Path::new(".")).err().unwrap();
        assert!(matches!(err, ProcessError::Spawn { .. }));
        assert!(err.to_string().contains("cxb-definitely-not-a-real-program"));
    }

    #[cfg(unix)]
    #[test]
    fn test_captures_output_and_error() {
        let mut cmd = CommandLine::new("sh");
        cmd.arg("-c").arg("echo out; echo err 1>&2");
        let mut process = Subprocess::start(&cmd, Path::new(".")).unwrap();
        process.soft_wait_for_exit().unwrap();

        assert_eq!(process.read_output_pipe(), "out\n");
        assert_eq!(process.read_error_pipe(), "err\n");
        assert!(process.exit_status().unwrap().success());
    }

    #[cfg(unix)]
    #[test]
    fn test_silent_process_is_not_an_error() {
        let mut process = Subprocess::start(&CommandLine::new("true"), Path::new(".")).unwrap();
        process.soft_wait_for_exit().unwrap();
        assert_eq!(process.read_output_pipe(), "");
        assert_eq!(process.read_error_pipe(), "");
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_running_process() {
        let mut cmd = CommandLine::new("sleep");
        cmd.arg("30");
        let mut process = Subprocess::start(&cmd, Path::new(".")).unwrap();
        assert!(!process.is_done().unwrap());

        let started = Instant::now();
        process.terminate().unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!process.exit_status().unwrap().success());
        assert!(process.is_done().unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_state_kills_the_process() {
        let mut cmd = CommandLine::new("sleep");
        cmd.arg("30");
        let mut process = Subprocess::start(&cmd, Path::new(".")).unwrap();

        let failed: Result<bool, ProcessError> =
            Err(ProcessError::Wait(io::Error::other("wait failed")));
        assert!(matches!(process.kill_on_error(failed), Err(ProcessError::Wait(_))));
        assert!(!process.exit_status().unwrap().success());
        assert!(process.poll().unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = Subprocess::start(&CommandLine::new("pwd"), dir.path()).unwrap();
        process.soft_wait_for_exit().unwrap();
        let reported = process.read_output_pipe();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(Path::new(reported.trim()).canonicalize().unwrap(), expected);
    }
}
