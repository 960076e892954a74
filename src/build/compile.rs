//! Per-file compilation: staleness check, command construction, and the
//! compile task that runs one file through the compiler.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, warn};

use super::depfile::parse_depfile;
use super::task::{TaskStatus, guard, supervise};
use crate::cancel::StopToken;
use crate::config::{Architecture, Project, Settings};
use crate::events::BuildEvents;
use crate::process::{CommandLine, ProcessError, Subprocess};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// C++ translation unit, compiled by the C++ compiler.
    Source,
    /// Windows resource script, compiled by the resource compiler.
    Resource,
}

impl FileKind {
    pub fn from_path(file: &str) -> Option<Self> {
        let ext = Path::new(file).extension()?.to_string_lossy().to_ascii_lowercase();
        match ext.as_str() {
            "cpp" | "cc" | "cxx" => Some(FileKind::Source),
            "rc" => Some(FileKind::Resource),
            _ => None,
        }
    }
}

pub fn can_compile(file: &str) -> bool {
    FileKind::from_path(file).is_some()
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("failed to prepare {}: {source}", .path.display())]
    Prepare {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("dependency generation for {file} failed")]
    Dependencies { file: String },

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Everything needed to compile one file. Immutable once queued.
#[derive(Debug, Clone)]
pub struct CompileSpec {
    source_file: String,
    project: Arc<Project>,
    working_directory: PathBuf,
}

impl CompileSpec {
    /// `source_file` is relative to the project directory.
    pub fn new(project: Arc<Project>, source_file: impl Into<String>) -> Self {
        let source_file = source_file.into().replace('\\', "/");
        let working_directory = project.directory();
        Self {
            source_file,
            project,
            working_directory,
        }
    }

    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    pub fn kind(&self) -> Option<FileKind> {
        FileKind::from_path(&self.source_file)
    }

    /// Project-relative output path: `<output_folder>/<dir>/<stem>.<suffix>`.
    pub fn output_file(&self, suffix: &str) -> String {
        let (directory, file) = match self.source_file.rfind('/') {
            Some(slash) => (Some(&self.source_file[..slash]), &self.source_file[slash + 1..]),
            None => (None, self.source_file.as_str()),
        };
        let stem = match file.rfind('.') {
            Some(dot) => &file[..dot],
            None => file,
        };

        let mut out = format!("{}/", self.project.settings.output_folder);
        if let Some(directory) = directory.filter(|d| !d.is_empty()) {
            out.push_str(directory);
            out.push('/');
        }
        out.push_str(stem);
        out.push('.');
        out.push_str(suffix);
        out
    }

    pub fn output_path(&self, suffix: &str) -> PathBuf {
        self.working_directory.join(self.output_file(suffix))
    }

    pub fn compile_command(&self) -> CommandLine {
        let settings = &self.project.settings;
        let toolchain = &self.project.toolchain;

        if self.kind() == Some(FileKind::Resource) {
            let mut cmd = CommandLine::new(&toolchain.resource_compiler);
            cmd.arg("-i")
                .arg(&self.source_file)
                .arg("-o")
                .arg(self.output_file("o"));
            return cmd;
        }

        let mut cmd = CommandLine::new(&toolchain.compiler);
        cmd.arg(format!("-O{}", settings.optimization_level))
            .arg(warning_flag(settings));
        if settings.warnings_as_errors {
            cmd.arg("-Werror");
        }
        cmd.arg(format!("-std={}", settings.standard));
        if settings.debug_info {
            cmd.arg("-ggdb");
        }
        if settings.architecture == Architecture::X64 {
            cmd.arg("-m64");
        }
        if settings.multithreaded {
            cmd.arg("-mthreads");
        }
        cmd.arg("-c").arg(&self.source_file);
        for include in &settings.include_directories {
            cmd.arg("-I").arg(include);
        }
        cmd.arg("-o").arg(self.output_file("o"));
        cmd
    }

    /// Preprocess-only invocation that writes make-rule dependencies to the
    /// `.dep` sidecar.
    pub fn dependency_command(&self) -> CommandLine {
        let settings = &self.project.settings;
        let mut cmd = CommandLine::new(&self.project.toolchain.compiler);
        cmd.arg("-MM")
            .arg("-E")
            .arg(format!("-std={}", settings.standard))
            .arg("-c")
            .arg(&self.source_file);
        for include in &settings.include_directories {
            cmd.arg("-I").arg(include);
        }
        cmd.arg("-MF").arg(self.output_file("dep"));
        cmd
    }

    /// Make sure the output directory exists and remove a previous output.
    pub fn prepare_output(&self, suffix: &str) -> io::Result<PathBuf> {
        let output = self.output_path(suffix);
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        if output.exists() {
            fs::remove_file(&output)?;
        }
        Ok(output)
    }

    /// Whether the object file is missing or older than any dependency.
    ///
    /// Anything that prevents a confident "up to date" answer means the file
    /// gets compiled.
    pub fn needs_compile(&self) -> bool {
        if self.kind() == Some(FileKind::Resource) {
            return true;
        }

        let object = self.output_path("o");
        let Some(compiled_at) = modified(&object) else {
            return true;
        };

        let dependencies = match self.generate_dependencies() {
            Ok(dependencies) => dependencies,
            Err(e) => {
                debug!("dependency scan for {} failed: {}", self.source_file, e);
                return true;
            }
        };

        for dependency in dependencies {
            let path = self.resolve_dependency(&dependency);
            // Files that vanished since the scan are not our concern.
            if !path.exists() {
                continue;
            }
            match modified(&path) {
                Some(updated) if updated > compiled_at => {
                    debug!("{} is newer than {}", path.display(), object.display());
                    return true;
                }
                Some(_) => {}
                None => {
                    warn!("could not read modification time of {}", path.display());
                    return true;
                }
            }
        }

        false
    }

    fn generate_dependencies(&self) -> Result<Vec<String>, CompileError> {
        let depfile = self.prepare_output("dep").map_err(|source| CompileError::Prepare {
            path: self.output_path("dep"),
            source,
        })?;

        let mut process = Subprocess::start(&self.dependency_command(), &self.working_directory)?;
        process.soft_wait_for_exit()?;
        if !process.exit_status().is_some_and(|s| s.success()) {
            return Err(CompileError::Dependencies {
                file: self.source_file.clone(),
            });
        }

        let content = fs::read_to_string(&depfile).map_err(|source| CompileError::Prepare {
            path: depfile.clone(),
            source,
        })?;
        Ok(parse_depfile(&content))
    }

    fn resolve_dependency(&self, dependency: &str) -> PathBuf {
        let path = Path::new(dependency);
        if path.is_absolute() || has_drive_prefix(dependency) {
            path.to_path_buf()
        } else {
            self.working_directory.join(path)
        }
    }
}

pub(crate) fn warning_flag(settings: &Settings) -> String {
    if settings.warnings.is_empty() {
        "-w".to_string()
    } else {
        format!("-W{}", settings.warnings)
    }
}

fn has_drive_prefix(path: &str) -> bool {
    path.find(':') == Some(1)
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// One file's trip through the compiler.
pub struct CompileTask {
    id: u64,
    spec: CompileSpec,
    stop: StopToken,
    events: Arc<dyn BuildEvents>,
}

impl CompileTask {
    pub fn new(id: u64, spec: CompileSpec, stop: StopToken, events: Arc<dyn BuildEvents>) -> Self {
        Self {
            id,
            spec,
            stop,
            events,
        }
    }

    pub fn run(&self) -> TaskStatus {
        guard(self.id, self.events.as_ref(), || match self.execute() {
            Ok(status) => status,
            Err(e) => {
                self.events.message(self.id, &e.to_string());
                TaskStatus::Failed
            }
        })
    }

    fn execute(&self) -> Result<TaskStatus, CompileError> {
        // Checked here rather than by the coordinator: the dependency scan
        // spawns a process and stats every header.
        if !self.spec.needs_compile() {
            self.events.message(
                self.id,
                &format!("{} is up to date.", self.spec.source_file()),
            );
            return Ok(TaskStatus::UpToDate);
        }
        if self.stop.is_stopped() {
            return Ok(TaskStatus::Canceled);
        }

        let command = self.spec.compile_command();
        self.events.message(self.id, &command.to_string());

        self.spec
            .prepare_output("o")
            .map_err(|source| CompileError::Prepare {
                path: self.spec.output_path("o"),
                source,
            })?;

        Ok(supervise(
            &command,
            self.spec.working_directory(),
            self.id,
            &self.stop,
            self.events.as_ref(),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn project_with(settings: Settings) -> Arc<Project> {
        Arc::new(Project::new("/work/app/app.cxproj", "app", settings))
    }

    #[test]
    fn test_file_kinds() {
        assert_eq!(FileKind::from_path("a.cpp"), Some(FileKind::Source));
        assert_eq!(FileKind::from_path("src/A.CPP"), Some(FileKind::Source));
        assert_eq!(FileKind::from_path("b.cc"), Some(FileKind::Source));
        assert_eq!(FileKind::from_path("app.rc"), Some(FileKind::Resource));
        assert!(!can_compile("a.h"));
        assert!(!can_compile("Makefile"));
    }

    #[test]
    fn test_output_file_layout() {
        let project = project_with(Settings::default());
        let spec = CompileSpec::new(Arc::clone(&project), "src\\util\\strings.cpp");
        assert_eq!(spec.source_file(), "src/util/strings.cpp");
        assert_eq!(spec.output_file("o"), "output/src/util/strings.o");
        assert_eq!(spec.output_file("dep"), "output/src/util/strings.dep");

        let top = CompileSpec::new(project, "main.Test.cpp");
        assert_eq!(top.output_file("o"), "output/main.Test.o");
        assert_eq!(
            top.output_path("o"),
            PathBuf::from("/work/app/output/main.Test.o")
        );
    }

    #[test]
    fn test_compile_command_defaults() {
        let settings = Settings {
            include_directories: vec!["c:/save/code".to_string()],
            ..Settings::default()
        };
        let spec = CompileSpec::new(project_with(settings), "FileCompileSettings.cpp");
        assert_eq!(
            spec.compile_command().to_string(),
            "g++ -O4 -Wall -Werror -std=c++11 -mthreads -c FileCompileSettings.cpp \
             -I c:/save/code -o output/FileCompileSettings.o"
        );
    }

    #[test]
    fn test_compile_command_all_flags() {
        let settings = Settings {
            standard: "c++17".to_string(),
            warnings: String::new(),
            warnings_as_errors: false,
            optimization_level: "2".to_string(),
            debug_info: true,
            multithreaded: false,
            architecture: Architecture::X64,
            include_directories: vec!["include".to_string(), "../lib".to_string()],
            ..Settings::default()
        };
        let spec = CompileSpec::new(project_with(settings), "src/a.cpp");
        assert_eq!(
            spec.compile_command().to_string(),
            "g++ -O2 -w -std=c++17 -ggdb -m64 -c src/a.cpp -I include -I ../lib -o output/src/a.o"
        );
    }

    #[test]
    fn test_resource_compile_command() {
        let spec = CompileSpec::new(project_with(Settings::default()), "res/app.rc");
        assert_eq!(
            spec.compile_command().to_string(),
            "windres -i res/app.rc -o output/res/app.o"
        );
        assert!(spec.needs_compile());
    }

    #[test]
    fn test_dependency_command() {
        let settings = Settings {
            include_directories: vec!["include".to_string()],
            ..Settings::default()
        };
        let spec = CompileSpec::new(project_with(settings), "src/a.cpp");
        assert_eq!(
            spec.dependency_command().to_string(),
            "g++ -MM -E -std=c++11 -c src/a.cpp -I include -MF output/src/a.dep"
        );
    }

    #[test]
    fn test_missing_object_needs_compile() {
        let dir = tempfile::tempdir().unwrap();
        let project = Arc::new(Project::new(
            dir.path().join("app.cxproj"),
            "app",
            Settings::default(),
        ));
        let spec = CompileSpec::new(project, "a.cpp");
        assert!(spec.needs_compile());
    }

    #[test]
    fn test_failed_dependency_scan_needs_compile() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = Project::new(dir.path().join("app.cxproj"), "app", Settings::default());
        project.toolchain.compiler = "cxb-no-such-compiler".to_string();
        let spec = CompileSpec::new(Arc::new(project), "a.cpp");

        fs::create_dir_all(dir.path().join("output")).unwrap();
        fs::write(dir.path().join("output/a.o"), b"obj").unwrap();
        assert!(spec.needs_compile());
    }

    #[test]
    fn test_prepare_output_creates_dir_and_removes_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let project = Arc::new(Project::new(
            dir.path().join("app.cxproj"),
            "app",
            Settings::default(),
        ));
        let spec = CompileSpec::new(project, "deep/nested/a.cpp");

        let first = spec.prepare_output("o").unwrap();
        assert!(first.parent().unwrap().is_dir());
        fs::write(&first, b"old").unwrap();

        let second = spec.prepare_output("o").unwrap();
        assert_eq!(first, second);
        assert!(!second.exists());
    }

    #[test]
    fn test_drive_prefix_detection() {
        assert!(has_drive_prefix("C:\\MinGW\\include\\stdio.h"));
        assert!(!has_drive_prefix("src/a.h"));
    }

    #[test]
    fn test_spawn_failure_is_reported_as_message() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = Project::new(dir.path().join("app.cxproj"), "app", Settings::default());
        project.toolchain.compiler = "cxb-no-such-compiler".to_string();
        let spec = CompileSpec::new(Arc::new(project), "a.cpp");
        let queue = Arc::new(crate::events::MessageQueue::new());

        let task = CompileTask::new(2, spec, StopToken::never(), queue.clone());
        assert_eq!(task.run(), TaskStatus::Failed);

        let lines = queue.drain();
        assert!(lines[0].starts_with("2> cxb-no-such-compiler -O4"));
        assert!(lines[1].contains("failed to start 'cxb-no-such-compiler'"));
    }
}
