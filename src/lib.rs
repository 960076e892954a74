//! # cxbuild - build and test orchestration for C++ projects
//!
//! cxbuild compiles and links a multi-file native project by driving external
//! compiler and linker processes from a bounded worker pool, and runs the
//! project's unit-test binary one test per process in the same way.
//!
//! ## Features
//!
//! - **Incremental**: per-file staleness from compiler-generated dependency files
//! - **Parallel**: compile and test fan-out bounded by hardware parallelism
//! - **Cancellable**: a shared stop token checked by every coordinator and task
//! - **UI-agnostic**: results flow through small event-sink traits
//!
//! ## Module Organization
//!
//! - [`process`] - child process spawning, polling and termination
//! - [`build`] - compile/link tasks, the build and test coordinators
//! - [`config`] - project files (`*.cxproj`)
//! - [`project`] - the project file tree and build planning
//! - [`events`] - event sinks and the queues a UI drains

/// Compile and link tasks, build and test coordinators.
pub mod build;

/// Cooperative cancellation.
pub mod cancel;

/// Project file parsing (`*.cxproj`).
pub mod config;

/// Event sinks consumed by the coordinators.
pub mod events;

/// External process supervision.
pub mod process;

/// Project file tree and build planning.
pub mod project;

/// Terminal UI utilities (tables, test board).
pub mod ui;
