//! # cxbuild CLI Entry Point
//!
//! The `cxb` executable drives the build engine the way an IDE would: it loads
//! a project file, starts a coordinator on its own thread, and polls the
//! coordinator's queues on a short timer, printing whatever arrived.
//!
//! ## Commands
//!
//! - **Build**: `build`, `compile <file>`, `rebuild`, `clean`, `run`
//! - **Test**: `test`
//! - **Shell**: `completions <shell>`

use anyhow::{Context, Result, anyhow};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use cxbuild::build::{
    self, BUILD_CANCELED, BUILD_COMPLETED, BuildCoordinator, BuildReport, CompileSpec, Diagnostic,
    FeedbackAnalyzer, Severity, TestCoordinator,
};
use cxbuild::cancel::StopSource;
use cxbuild::config::{self, OutputKind, Project};
use cxbuild::events::{MessageQueue, TestStatus, TestUpdateQueue};
use cxbuild::project::{ProjectItem, plan_build};
use cxbuild::ui::TestBoard;

/// How often the front end drains the coordinator queues.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

const LOG_ENV: &str = "CXB_LOG";

#[derive(Parser)]
#[command(name = "cxb")]
#[command(about = "Parallel build and unit-test runner for C++ projects", version = env!("CARGO_PKG_VERSION"))]
#[command(propagate_version = true)]
struct Cli {
    /// Project file [default: the only *.cxproj in the current directory]
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    /// Maximum number of tasks running at once [default: number of CPUs]
    #[arg(short, long, global = true)]
    jobs: Option<usize>,

    /// Log scheduling and staleness decisions to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile stale files and link the project
    Build {
        /// Stop the build at the first compiler error
        #[arg(long)]
        fail_fast: bool,
    },
    /// Compile a single file without linking
    Compile {
        /// Source file, relative to the project directory
        file: String,
    },
    /// Remove all outputs, then build
    Rebuild {
        /// Stop the build at the first compiler error
        #[arg(long)]
        fail_fast: bool,
    },
    /// Remove the output folder and compile_commands.json
    Clean,
    /// Build, then run the target executable
    Run {
        /// Arguments passed to the target program
        #[arg(num_args = 0.., allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Build, then run every unit test in parallel
    Test {
        /// Only list failed tests in the summary table
        #[arg(long)]
        failed: bool,
    },
    /// Generate shell completions
    Completions { shell: Shell },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::Build { fail_fast } => {
            let project = load_project(&cli)?;
            let report = build_project(&project, cli.jobs, *fail_fast)?;
            exit_on_failure(&report);
            Ok(())
        }

        Commands::Compile { file } => {
            let project = load_project(&cli)?;
            if !build::can_compile(file) {
                return Err(anyhow!("'{}' is not a compilable file.", file));
            }
            let queue = Arc::new(MessageQueue::new());
            let stop = StopSource::new();
            let mut coordinator = coordinator(queue.clone(), &stop, cli.jobs);
            coordinator.add_compile(CompileSpec::new(project, file.clone()));
            let report = drive_build(coordinator, &queue, &stop, false)?;
            exit_on_failure(&report);
            Ok(())
        }

        Commands::Rebuild { fail_fast } => {
            let project = load_project(&cli)?;
            build::clean(&project)?;
            let report = build_project(&project, cli.jobs, *fail_fast)?;
            exit_on_failure(&report);
            Ok(())
        }

        Commands::Clean => {
            let project = load_project(&cli)?;
            if build::clean(&project)? {
                println!("{} Clean complete.", "✓".green());
            } else {
                println!("{} Nothing to clean", "!".yellow());
            }
            Ok(())
        }

        Commands::Run { args } => {
            let project = load_project(&cli)?;
            if project.settings.target != OutputKind::Executable {
                return Err(anyhow!(
                    "{} builds a {}; there is nothing to run.",
                    project.name(),
                    project.settings.target
                ));
            }
            let report = build_project(&project, cli.jobs, false)?;
            exit_on_failure(&report);

            let target = project.target_file();
            println!("{} Running {}...", "▶".green(), target.display());
            let status = Command::new(&target)
                .args(args)
                .current_dir(project.directory())
                .status()
                .with_context(|| format!("Failed to run {}", target.display()))?;
            if !status.success() {
                std::process::exit(status.code().unwrap_or(1));
            }
            Ok(())
        }

        Commands::Test { failed } => {
            let project = load_project(&cli)?;
            let report = build_project(&project, cli.jobs, false)?;
            exit_on_failure(&report);
            run_unit_tests(&project, cli.jobs, *failed)
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, bin_name, &mut std::io::stdout());
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "cxbuild=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_project(cli: &Cli) -> Result<Arc<Project>> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let path = config::find_project_file(cli.project.as_deref(), &cwd)?;
    let path = fs::canonicalize(&path)
        .with_context(|| format!("Failed to resolve {}", path.display()))?;
    let project = Project::load(&path)?;
    debug!("loaded {} from {}", project.name(), path.display());
    Ok(Arc::new(project))
}

fn coordinator(queue: Arc<MessageQueue>, stop: &StopSource, jobs: Option<usize>) -> BuildCoordinator {
    let coordinator = BuildCoordinator::new(1, stop.token(), queue);
    match jobs {
        Some(jobs) => coordinator.with_concurrency(jobs),
        None => coordinator,
    }
}

fn build_project(project: &Arc<Project>, jobs: Option<usize>, fail_fast: bool) -> Result<BuildReport> {
    let tree = ProjectItem::for_project(project)?;
    let plan = plan_build(project, &tree);
    if plan.compile.is_empty() {
        println!("{} No source files found.", "!".yellow());
    }
    if let Some(path) = build::write_compile_commands(&plan.compile)? {
        debug!("wrote {}", path.display());
    }

    println!(
        "{} Building {} ({} files)...",
        "🔨".cyan(),
        project.name().bold(),
        plan.compile.len()
    );

    let queue = Arc::new(MessageQueue::new());
    let stop = StopSource::new();
    let mut coordinator = coordinator(queue.clone(), &stop, jobs);
    coordinator.schedule(project, plan);
    drive_build(coordinator, &queue, &stop, fail_fast)
}

// --- Helper: poll a running build, printing its log as it arrives ---
fn drive_build(
    coordinator: BuildCoordinator,
    queue: &MessageQueue,
    stop: &StopSource,
    fail_fast: bool,
) -> Result<BuildReport> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message("Compiling...");

    let handle = coordinator.start().context("Failed to start build thread")?;
    let mut log = String::new();

    loop {
        let finished = handle.is_done();
        for line in queue.drain() {
            let diagnostic = Diagnostic::parse(&line);
            if fail_fast
                && diagnostic.as_ref().is_some_and(|d| d.severity == Severity::Error)
                && !stop.is_stop_requested()
            {
                debug!("first error seen, requesting stop");
                stop.request_stop();
            }
            pb.suspend(|| println!("{}", render_line(&line, diagnostic.as_ref())));
            log.push_str(&line);
            log.push('\n');
        }
        if finished {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    let report = handle
        .join()
        .map_err(|_| anyhow!("Build thread panicked"))?;
    pb.finish_and_clear();

    if !report.succeeded()
        && let Some(hint) = FeedbackAnalyzer::analyze(&log)
    {
        println!("\n{} {}", "💡 Tip:".bold().cyan(), hint);
    }
    print_report(&report);
    Ok(report)
}

fn render_line(line: &str, diagnostic: Option<&Diagnostic>) -> String {
    let text = line.split_once("> ").map_or(line, |(_, rest)| rest);
    match diagnostic.map(|d| d.severity) {
        Some(Severity::Error) => format!("{} {}", "x".red(), text.red()),
        Some(Severity::Warning) => format!("{} {}", "!".yellow(), text.yellow()),
        Some(Severity::Note) => format!("  {}", text.dimmed()),
        None if text == BUILD_COMPLETED => format!("{} {}", "✓".green(), text.green()),
        None if text == BUILD_CANCELED => format!("{} {}", "!".yellow(), text.yellow()),
        None => format!("  {}", text.dimmed()),
    }
}

fn print_report(report: &BuildReport) {
    println!(
        "   {} compiled, {} up to date, {} linked, {} failed (peak {} parallel)",
        report.compiled,
        report.up_to_date,
        report.linked,
        report.failed,
        report.peak_running
    );
}

fn exit_on_failure(report: &BuildReport) {
    if !report.succeeded() {
        std::process::exit(1);
    }
}

fn run_unit_tests(project: &Project, jobs: Option<usize>, failed_only: bool) -> Result<()> {
    let binary = project.target_unit_test_file();
    if !binary.exists() {
        println!(
            "{} No unit tests: add a *.Test.cpp file to {}.",
            "!".yellow(),
            project.name()
        );
        return Ok(());
    }
    let binary = fs::canonicalize(&binary)
        .with_context(|| format!("Failed to resolve {}", binary.display()))?;

    let tests = build::list_tests(&binary)?;
    println!("{} Running {} tests...", "🧪".magenta(), tests.len());

    let queue = Arc::new(TestUpdateQueue::new());
    let working_dir = binary.parent().unwrap_or(Path::new(".")).to_path_buf();
    let mut coordinator = TestCoordinator::new(working_dir, queue.clone());
    if let Some(jobs) = jobs {
        coordinator = coordinator.with_concurrency(jobs);
    }
    coordinator.add_tests(&binary, &tests);

    let mut board = TestBoard::new(tests);
    let handle = coordinator.start().context("Failed to start test thread")?;
    loop {
        let finished = handle.is_done();
        for update in queue.drain() {
            let status = update.status;
            let Some(test) = board.apply(&update) else {
                continue;
            };
            match status {
                TestStatus::Success => println!("   {} {}", "✓".green(), test.name()),
                TestStatus::Failed => println!(
                    "   {} {}: {}",
                    "x".red(),
                    test.name(),
                    update.description.red()
                ),
                TestStatus::Pending | TestStatus::Running => {}
            }
        }
        if finished {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }
    let summary = handle
        .join()
        .map_err(|_| anyhow!("Test thread panicked"))?;

    let table = board.table(failed_only);
    if !table.is_empty() {
        println!();
        table.print();
    }

    println!(
        "\nTest Result: {}/{} passed.",
        summary.passed,
        summary.total()
    );
    if summary.failed == 0 {
        println!("{}", "ALL TESTS PASSED ✨".green().bold());
        Ok(())
    } else {
        println!("{}", "SOME TESTS FAILED 💀".red().bold());
        std::process::exit(1);
    }
}
