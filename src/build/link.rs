//! Link step: command construction, project-reference validation, and the
//! task that runs the linker once every compile has retired.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::compile::warning_flag;
use super::task::{TaskStatus, guard, supervise};
use crate::cancel::StopToken;
use crate::config::{Architecture, OutputKind, Project};
use crate::events::BuildEvents;
use crate::process::{CommandLine, ProcessError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Executable,
    SharedLibrary,
    UnitTest,
}

#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("Reference '{reference}' not found in any include directory.")]
    NotFound { reference: String },

    #[error("Reference '{reference}' could not be loaded: {message}")]
    Load { reference: String, message: String },

    #[error("Reference cycle: {}", .chain.join(" -> "))]
    Cycle { chain: Vec<String> },

    #[error(
        "Reference '{reference}' has a different {setting} ({found}) than the referencing project ({expected})."
    )]
    SettingMismatch {
        reference: String,
        setting: &'static str,
        expected: String,
        found: String,
    },

    #[error("Reference '{reference}' builds a {target}, only DLL projects can be referenced.")]
    NotSharedLibrary { reference: String, target: OutputKind },

    #[error("Reference '{reference}' has not been built: {} is missing.", .path.display())]
    MissingArtifact { reference: String, path: PathBuf },

    #[error("Failed to create {}: {source}", .path.display())]
    CreateOutput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to copy {} for reference '{reference}': {source}", .from.display())]
    Copy {
        reference: String,
        from: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("failed to prepare {}: {source}", .path.display())]
    Prepare {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A referenced shared-library project that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedReference {
    pub name: String,
    pub project_file: PathBuf,
    pub binary: PathBuf,
    pub import_library: PathBuf,
}

/// Validate every reference of `project`, transitively.
///
/// Returns the references in pre-order (a reference before its own
/// references), each project at most once.
pub fn validate_references(project: &Project) -> Result<Vec<ValidatedReference>, ReferenceError> {
    let mut chain = vec![identity(project.file_name())];
    let mut seen = HashSet::new();
    let mut validated = Vec::new();
    collect_references(project, &mut chain, &mut seen, &mut validated)?;
    Ok(validated)
}

fn collect_references(
    project: &Project,
    chain: &mut Vec<PathBuf>,
    seen: &mut HashSet<PathBuf>,
    validated: &mut Vec<ValidatedReference>,
) -> Result<(), ReferenceError> {
    for reference in &project.settings.references {
        let path = locate_reference(project, reference)?;
        let key = identity(&path);
        debug!("reference '{}' of {} resolved to {}", reference, project.name(), path.display());

        if chain.contains(&key) {
            let mut names: Vec<String> = chain.iter().map(|p| p.display().to_string()).collect();
            names.push(key.display().to_string());
            return Err(ReferenceError::Cycle { chain: names });
        }
        if seen.contains(&key) {
            continue;
        }

        let referenced = Project::load(&path).map_err(|e| ReferenceError::Load {
            reference: reference.clone(),
            message: format!("{:#}", e),
        })?;
        check_compatible(project, &referenced, reference)?;

        if referenced.settings.target != OutputKind::SharedLibrary {
            return Err(ReferenceError::NotSharedLibrary {
                reference: reference.clone(),
                target: referenced.settings.target,
            });
        }

        let binary = referenced.target_file();
        let import_library = referenced.target_import_library();
        for artifact in [&binary, &import_library] {
            if !artifact.exists() {
                return Err(ReferenceError::MissingArtifact {
                    reference: reference.clone(),
                    path: artifact.clone(),
                });
            }
        }

        seen.insert(key.clone());
        validated.push(ValidatedReference {
            name: referenced.name().to_string(),
            project_file: path,
            binary,
            import_library,
        });

        chain.push(key);
        collect_references(&referenced, chain, seen, validated)?;
        chain.pop();
    }
    Ok(())
}

/// First include directory (in order) that contains `reference` wins.
fn locate_reference(project: &Project, reference: &str) -> Result<PathBuf, ReferenceError> {
    project
        .settings
        .include_directories
        .iter()
        .map(|dir| project.resolve(dir).join(reference))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| ReferenceError::NotFound {
            reference: reference.to_string(),
        })
}

fn identity(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn check_compatible(
    project: &Project,
    referenced: &Project,
    reference: &str,
) -> Result<(), ReferenceError> {
    let ours = &project.settings;
    let theirs = &referenced.settings;

    let mismatch = |setting: &'static str, expected: String, found: String| {
        Err(ReferenceError::SettingMismatch {
            reference: reference.to_string(),
            setting,
            expected,
            found,
        })
    };

    if ours.standard != theirs.standard {
        return mismatch("standard", ours.standard.clone(), theirs.standard.clone());
    }
    if ours.architecture != theirs.architecture {
        return mismatch(
            "architecture",
            ours.architecture.to_string(),
            theirs.architecture.to_string(),
        );
    }
    if ours.debug_info != theirs.debug_info {
        return mismatch(
            "debug info",
            ours.debug_info.to_string(),
            theirs.debug_info.to_string(),
        );
    }
    if ours.multithreaded != theirs.multithreaded {
        return mismatch(
            "multithreaded",
            ours.multithreaded.to_string(),
            theirs.multithreaded.to_string(),
        );
    }
    Ok(())
}

/// Copy each reference's binary and import library next to our own output.
pub fn copy_reference_artifacts(
    project: &Project,
    references: &[ValidatedReference],
) -> Result<(), ReferenceError> {
    if references.is_empty() {
        return Ok(());
    }

    let output = project.output_directory();
    fs::create_dir_all(&output).map_err(|source| ReferenceError::CreateOutput {
        path: output.clone(),
        source,
    })?;

    for reference in references {
        for artifact in [&reference.binary, &reference.import_library] {
            let Some(file_name) = artifact.file_name() else {
                continue;
            };
            fs::copy(artifact, output.join(file_name)).map_err(|source| ReferenceError::Copy {
                reference: reference.name.clone(),
                from: artifact.clone(),
                source,
            })?;
        }
    }
    Ok(())
}

/// Everything needed for one link. At most two per build.
#[derive(Debug, Clone)]
pub struct LinkSpec {
    kind: LinkKind,
    objects: Vec<String>,
    project: Arc<Project>,
    working_directory: PathBuf,
}

impl LinkSpec {
    /// The project's own target; the kind follows the project's settings.
    pub fn target(project: Arc<Project>, objects: Vec<String>) -> Self {
        let kind = match project.settings.target {
            OutputKind::Executable => LinkKind::Executable,
            OutputKind::SharedLibrary => LinkKind::SharedLibrary,
        };
        Self::new(kind, project, objects)
    }

    pub fn unit_test(project: Arc<Project>, objects: Vec<String>) -> Self {
        Self::new(LinkKind::UnitTest, project, objects)
    }

    fn new(kind: LinkKind, project: Arc<Project>, objects: Vec<String>) -> Self {
        let working_directory = project.directory();
        Self {
            kind,
            objects,
            project,
            working_directory,
        }
    }

    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    pub fn objects(&self) -> &[String] {
        &self.objects
    }

    pub fn objects_joined(&self) -> String {
        self.objects.join(" ")
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Output binary, relative to the project directory.
    pub fn target_file(&self) -> String {
        let file = match self.kind {
            LinkKind::UnitTest => self.project.unit_test_file(),
            _ => self.project.executable_file(),
        };
        format!("./{}/{}", self.project.settings.output_folder, file)
    }

    pub fn target_path(&self) -> PathBuf {
        match self.kind {
            LinkKind::UnitTest => self.project.target_unit_test_file(),
            _ => self.project.target_file(),
        }
    }

    pub fn link_command(&self, references: &[ValidatedReference]) -> CommandLine {
        let settings = &self.project.settings;
        let mut cmd = CommandLine::new(&self.project.toolchain.compiler);

        cmd.arg(format!("-O{}", settings.optimization_level))
            .arg(warning_flag(settings))
            .arg(format!("-std={}", settings.standard));
        if settings.debug_info {
            cmd.arg("-ggdb");
        }
        if self.kind == LinkKind::SharedLibrary {
            cmd.arg("-shared").arg(format!(
                "-Wl,--out-implib,./{}/{}",
                settings.output_folder,
                self.project.import_library_file()
            ));
        }
        if settings.architecture == Architecture::X64 {
            cmd.arg("-m64");
        }
        cmd.args(self.objects.iter().cloned());
        cmd.arg("-o").arg(self.target_file());
        if settings.multithreaded {
            cmd.arg("-mthreads");
        }

        let subsystem = match self.kind {
            LinkKind::UnitTest => "console",
            _ => settings.subsystem.as_str(),
        };
        cmd.args(["-Xlinker", "--subsystem", "-Xlinker", subsystem]);

        for library in &settings.libraries {
            cmd.arg(format!("-l{}", library));
        }
        if !references.is_empty() {
            cmd.arg(format!("-L{}", settings.output_folder));
            for reference in references {
                cmd.arg(format!("-l{}", reference.name));
            }
        }
        cmd
    }

    /// Ensure the output folder exists and remove the previous binary.
    pub fn prepare(&self) -> io::Result<()> {
        fs::create_dir_all(self.project.output_directory())?;
        let target = self.target_path();
        if target.exists() {
            fs::remove_file(&target)?;
        }
        Ok(())
    }
}

pub struct LinkTask {
    id: u64,
    spec: LinkSpec,
    stop: StopToken,
    events: Arc<dyn BuildEvents>,
}

impl LinkTask {
    pub fn new(id: u64, spec: LinkSpec, stop: StopToken, events: Arc<dyn BuildEvents>) -> Self {
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

    fn execute(&self) -> Result<TaskStatus, LinkError> {
        let project = self.spec.project();
        let references = validate_references(project)?;
        copy_reference_artifacts(project, &references)?;

        if self.stop.is_stopped() {
            return Ok(TaskStatus::Canceled);
        }

        let command = self.spec.link_command(&references);
        self.events.message(self.id, &command.to_string());
        self.spec.prepare().map_err(|source| LinkError::Prepare {
            path: self.spec.target_path(),
            source,
        })?;

        Ok(supervise(
            &command,
            &self.spec.working_directory,
            self.id,
            &self.stop,
            self.events.as_ref(),
        )?)
    }
}
