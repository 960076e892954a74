//! Shared plumbing for compile, link and unit-test tasks: the supervised
//! process loop, the panic boundary, and the bounded task pool the
//! coordinators submit work to.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace};

use crate::cancel::StopToken;
use crate::events::BuildEvents;
use crate::process::{CommandLine, ProcessError, Subprocess};

/// How long a coordinator waits for a task to finish before re-checking
/// the stop flag.
const RETIRE_POLL: Duration = Duration::from_millis(20);

pub(crate) const UNHANDLED: &str = "Unhandled exception.";

/// How a single compile or link task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Staleness check found nothing to do.
    UpToDate,
    Succeeded,
    Failed,
    /// The process was terminated (or never started) because a stop was requested.
    Canceled,
}

/// Run `command` to completion, terminating it if `stop` fires first.
/// Every non-empty stderr line is forwarded to `events` tagged with `id`.
pub(crate) fn supervise(
    command: &CommandLine,
    working_dir: &Path,
    id: u64,
    stop: &StopToken,
    events: &dyn BuildEvents,
) -> Result<TaskStatus, ProcessError> {
    let mut process = Subprocess::start(command, working_dir)?;
    let mut canceled = false;

    loop {
        if process.poll()? {
            process.close();
            break;
        } else if stop.is_stopped() {
            debug!(id, "stop requested, terminating {}", command.program());
            process.terminate()?;
            canceled = true;
            break;
        } else {
            process.read_some_output();
            process.read_some_error();
            thread::yield_now();
        }
    }

    let errors = process.read_error_pipe();
    for line in errors.lines() {
        if !line.trim().is_empty() {
            events.message(id, line);
        }
    }

    let status = if canceled {
        TaskStatus::Canceled
    } else if process.exit_status().is_some_and(|s| s.success()) {
        TaskStatus::Succeeded
    } else {
        TaskStatus::Failed
    };
    trace!(id, ?status, "task process finished");
    Ok(status)
}

/// Outermost task boundary: a panic becomes a single log line and a failure.
pub(crate) fn guard<F>(id: u64, events: &dyn BuildEvents, work: F) -> TaskStatus
where
    F: FnOnce() -> TaskStatus,
{
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(status) => status,
        Err(_) => {
            events.message(id, UNHANDLED);
            TaskStatus::Failed
        }
    }
}

/// Bounded submission of independent units of work.
///
/// Work runs on a rayon pool with exactly `bound` threads; results come back
/// over a channel. Only the owning coordinator thread submits and retires, so
/// the running count needs no lock.
pub(crate) struct TaskPool<T> {
    pool: rayon::ThreadPool,
    tx: Sender<T>,
    rx: Receiver<T>,
    bound: usize,
    running: usize,
    peak: usize,
}

impl<T: Send + 'static> TaskPool<T> {
    pub(crate) fn new(bound: usize, name: &'static str) -> Result<Self, rayon::ThreadPoolBuildError> {
        let bound = bound.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(bound)
            .thread_name(move |i| format!("{}-{}", name, i))
            .build()?;
        let (tx, rx) = mpsc::channel();
        Ok(Self {
            pool,
            tx,
            rx,
            bound,
            running: 0,
            peak: 0,
        })
    }

    pub(crate) fn has_capacity(&self) -> bool {
        self.running < self.bound
    }

    pub(crate) fn running(&self) -> usize {
        self.running
    }

    /// Highest number of simultaneously running tasks seen so far.
    pub(crate) fn peak(&self) -> usize {
        self.peak
    }

    pub(crate) fn submit<F>(&mut self, work: F)
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let tx = self.tx.clone();
        self.pool.spawn(move || {
            let _ = tx.send(work());
        });
        self.running += 1;
        self.peak = self.peak.max(self.running);
    }

    /// Collect finished results, waiting briefly for the first one.
    pub(crate) fn retire(&mut self) -> Vec<T> {
        let mut finished = Vec::new();
        if self.running == 0 {
            return finished;
        }

        match self.rx.recv_timeout(RETIRE_POLL) {
            Ok(result) => finished.push(result),
            Err(RecvTimeoutError::Timeout) => return finished,
            // Unreachable while `self.tx` is alive.
            Err(RecvTimeoutError::Disconnected) => {
                self.running = 0;
                return finished;
            }
        }
        while let Ok(result) = self.rx.try_recv() {
            finished.push(result);
        }

        self.running -= finished.len();
        finished
    }
}

/// A coordinator running on its own thread.
///
/// The owner polls [`RunHandle::is_done`] from its timer and joins once it
/// reports true, so joining never blocks the owner for long.
pub struct RunHandle<T> {
    done: Arc<AtomicBool>,
    thread: JoinHandle<T>,
}

impl<T: Send + 'static> RunHandle<T> {
    pub(crate) fn spawn<F>(name: &str, work: F) -> io::Result<Self>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        let thread = thread::Builder::new().name(name.to_string()).spawn(move || {
            let result = work();
            flag.store(true, Ordering::SeqCst);
            result
        })?;
        Ok(Self { done, thread })
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    pub fn join(self) -> thread::Result<T> {
        self.thread.join()
    }
}
