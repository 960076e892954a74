mod clean;
mod compdb;
mod compile;
mod coordinator;
mod depfile;
mod feedback;
mod link;
mod task;

pub use clean::clean;
pub use compdb::{CompileCommand, compile_commands, write_compile_commands};
pub use compile::{CompileError, CompileSpec, CompileTask, FileKind, can_compile};
pub use coordinator::{
    BUILD_CANCELED, BUILD_COMPLETED, BUILD_STARTED, BuildCoordinator, BuildHandle, BuildReport,
};
pub use depfile::parse_depfile;
pub use feedback::{Diagnostic, FeedbackAnalyzer, Severity};
pub use link::{
    LinkError, LinkKind, LinkSpec, LinkTask, ReferenceError, ValidatedReference,
    copy_reference_artifacts, validate_references,
};
pub use task::{RunHandle, TaskStatus};
pub use test::{
    TestCase, TestCoordinator, TestError, TestHandle, TestSummary, UnitTestTask, classify_output,
    list_tests, parse_test_list,
};

/// Default bound on concurrently running tasks.
pub fn hardware_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
