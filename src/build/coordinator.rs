//! The build scheduler: bounded parallel compiles, then the serial link steps.

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::debug;

use super::compile::{CompileSpec, CompileTask};
use super::link::{LinkSpec, LinkTask};
use super::task::{RunHandle, TaskPool, TaskStatus, UNHANDLED};
use super::hardware_concurrency;
use crate::cancel::StopToken;
use crate::config::Project;
use crate::events::BuildEvents;
use crate::project::BuildPlan;

pub const BUILD_STARTED: &str = "Build started.";
pub const BUILD_COMPLETED: &str = "Build Completed";
pub const BUILD_CANCELED: &str = "Build canceled";

pub type BuildHandle = RunHandle<BuildReport>;

/// Outcome counts for one build run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub compiled: usize,
    pub up_to_date: usize,
    /// Failed compiles and links.
    pub failed: usize,
    pub linked: usize,
    pub canceled: bool,
    /// Largest number of compile tasks running at once.
    pub peak_running: usize,
}

impl BuildReport {
    pub fn succeeded(&self) -> bool {
        !self.canceled && self.failed == 0
    }

    fn record_compile(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::UpToDate => self.up_to_date += 1,
            TaskStatus::Succeeded => self.compiled += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Canceled => {}
        }
    }

    fn record_link(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Succeeded => self.linked += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::UpToDate | TaskStatus::Canceled => {}
        }
    }
}

pub struct BuildCoordinator {
    id: u64,
    queue: VecDeque<CompileSpec>,
    target: Option<LinkSpec>,
    unit_test: Option<LinkSpec>,
    concurrency: usize,
    stop: StopToken,
    events: Arc<dyn BuildEvents>,
}

impl BuildCoordinator {
    pub fn new(id: u64, stop: StopToken, events: Arc<dyn BuildEvents>) -> Self {
        Self {
            id,
            queue: VecDeque::new(),
            target: None,
            unit_test: None,
            concurrency: hardware_concurrency(),
            stop,
            events,
        }
    }

    /// Override the running-set bound (minimum 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn add_compile(&mut self, spec: CompileSpec) {
        self.queue.push_back(spec);
    }

    pub fn make_target(&mut self, spec: LinkSpec) {
        self.target = Some(spec);
    }

    pub fn make_unit_test(&mut self, spec: LinkSpec) {
        self.unit_test = Some(spec);
    }

    /// Queue every compile of `plan` together with its link steps.
    pub fn schedule(&mut self, project: &Arc<Project>, plan: BuildPlan) {
        if let Some(target) = plan.target_link(project) {
            self.make_target(target);
        }
        if let Some(unit_test) = plan.unit_test_link(project) {
            self.make_unit_test(unit_test);
        }
        self.queue.extend(plan.compile);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Run the build on a dedicated thread.
    pub fn start(self) -> io::Result<BuildHandle> {
        RunHandle::spawn("cxb-build", move || self.run())
    }

    /// Run the build on the calling thread.
    pub fn run(mut self) -> BuildReport {
        let id = self.id;
        let events = Arc::clone(&self.events);
        events.message(id, BUILD_STARTED);

        let mut report = BuildReport::default();
        match panic::catch_unwind(AssertUnwindSafe(|| self.execute(&mut report))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => events.message(id, &e.to_string()),
            Err(_) => events.message(id, UNHANDLED),
        }

        report.canceled = self.stop.is_stopped();
        let terminal = if report.canceled {
            BUILD_CANCELED
        } else {
            BUILD_COMPLETED
        };
        events.message(id, terminal);
        debug!(?report, "build finished");
        report
    }

    fn execute(&mut self, report: &mut BuildReport) -> Result<(), rayon::ThreadPoolBuildError> {
        let mut pool = TaskPool::new(self.concurrency, "cxb-compile")?;
        let mut next_id = self.id;

        while !self.queue.is_empty() && !self.stop.is_stopped() {
            while pool.has_capacity() {
                let Some(spec) = self.queue.pop_front() else {
                    break;
                };
                next_id += 1;
                debug!(id = next_id, "dispatching {}", spec.source_file());
                let task = CompileTask::new(
                    next_id,
                    spec,
                    self.stop.clone(),
                    Arc::clone(&self.events),
                );
                pool.submit(move || task.run());
            }
            for status in pool.retire() {
                report.record_compile(status);
            }
        }

        while pool.running() > 0 {
            for status in pool.retire() {
                report.record_compile(status);
            }
        }
        report.peak_running = pool.peak();

        for spec in [self.target.take(), self.unit_test.take()].into_iter().flatten() {
            if self.stop.is_stopped() {
                break;
            }
            let task = LinkTask::new(self.id, spec, self.stop.clone(), Arc::clone(&self.events));
            report.record_link(task.run());
        }

        Ok(())
    }
}
