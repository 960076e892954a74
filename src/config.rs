//! Project file model (`*.cxproj`, TOML).
//!
//! ```toml
//! name = "app"
//! files = ["main.cpp", "src/util.cpp", "src/util.Test.cpp"]
//!
//! [settings]
//! standard = "c++17"
//! architecture = "64-bit"
//! target = "DLL"
//! include_directories = ["..", "include"]
//! references = ["core/core.cxproj"]
//!
//! [toolchain]
//! compiler = "g++"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const PROJECT_EXTENSION: &str = "cxproj";

/// Token replaced by the project name in `output_file_name`.
pub const PROJECT_NAME_TOKEN: &str = "{ProjectName}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Architecture {
    #[default]
    #[serde(rename = "32-bit")]
    X86,
    #[serde(rename = "64-bit")]
    X64,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::X86 => f.write_str("32-bit"),
            Architecture::X64 => f.write_str("64-bit"),
        }
    }
}

/// What the project's normal link step produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OutputKind {
    #[default]
    #[serde(rename = "EXE")]
    Executable,
    #[serde(rename = "DLL")]
    SharedLibrary,
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKind::Executable => f.write_str("EXE"),
            OutputKind::SharedLibrary => f.write_str("DLL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub standard: String,
    pub subsystem: String,
    pub warnings: String,
    pub warnings_as_errors: bool,
    pub optimization_level: String,
    pub debug_info: bool,
    pub multithreaded: bool,
    pub architecture: Architecture,
    pub target: OutputKind,
    pub output_folder: String,
    pub output_file_name: String,
    pub include_directories: Vec<String>,
    pub libraries: Vec<String>,
    /// Project files of shared-library dependencies, relative to an include directory.
    pub references: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            standard: "c++11".to_string(),
            subsystem: "windows".to_string(),
            warnings: "all".to_string(),
            warnings_as_errors: true,
            optimization_level: "4".to_string(),
            debug_info: false,
            multithreaded: true,
            architecture: Architecture::default(),
            target: OutputKind::default(),
            output_folder: "output".to_string(),
            output_file_name: format!("{}.exe", PROJECT_NAME_TOKEN),
            include_directories: Vec::new(),
            libraries: Vec::new(),
            references: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    pub compiler: String,
    pub resource_compiler: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            compiler: "g++".to_string(),
            resource_compiler: "windres".to_string(),
        }
    }
}

/// On-disk shape of a project file.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ProjectFile {
    pub name: Option<String>,
    pub files: Option<Vec<String>>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub toolchain: ToolchainConfig,
}

/// A loaded project. Read-only for the build engine.
#[derive(Debug, Clone)]
pub struct Project {
    file_name: PathBuf,
    name: String,
    pub settings: Settings,
    pub toolchain: ToolchainConfig,
    /// Explicit file list; `None` means "scan the project directory".
    pub files: Option<Vec<String>>,
}

impl Project {
    /// Build a project in memory. `file_name` is the (possibly not yet
    /// existing) project file path; its directory is the project directory.
    pub fn new(file_name: impl Into<PathBuf>, name: impl Into<String>, settings: Settings) -> Self {
        Self {
            file_name: file_name.into(),
            name: name.into(),
            settings,
            toolchain: ToolchainConfig::default(),
            files: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read project file {}", path.display()))?;
        let file: ProjectFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse project file {}", path.display()))?;

        let name = match file.name {
            Some(name) => name,
            None => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .context("Project file has no name")?,
        };

        Ok(Self {
            file_name: path.to_path_buf(),
            name,
            settings: file.settings,
            toolchain: file.toolchain,
            files: file.files,
        })
    }

    pub fn file_name(&self) -> &Path {
        &self.file_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory containing the project file; all relative paths resolve here.
    pub fn directory(&self) -> PathBuf {
        match self.file_name.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub fn output_directory(&self) -> PathBuf {
        self.directory().join(&self.settings.output_folder)
    }

    /// `output_file_name` with `{ProjectName}` substituted.
    pub fn executable_file(&self) -> String {
        self.settings
            .output_file_name
            .replace(PROJECT_NAME_TOKEN, &self.name)
    }

    /// The unit-test binary name: `.Test` inserted before the last extension.
    pub fn unit_test_file(&self) -> String {
        let file = self.executable_file();
        match file.rfind('.') {
            Some(dot) => format!("{}.Test{}", &file[..dot], &file[dot..]),
            None => format!("{}.Test", file),
        }
    }

    /// Import library produced when linking a shared-library target.
    pub fn import_library_file(&self) -> String {
        format!("lib{}.a", self.name)
    }

    pub fn target_file(&self) -> PathBuf {
        self.output_directory().join(self.executable_file())
    }

    pub fn target_unit_test_file(&self) -> PathBuf {
        self.output_directory().join(self.unit_test_file())
    }

    pub fn target_import_library(&self) -> PathBuf {
        self.output_directory().join(self.import_library_file())
    }

    /// Resolve a path from the settings against the project directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.directory().join(candidate)
        }
    }
}

/// Locate the project file to operate on: an explicit path, or the only
/// `*.cxproj` in `dir`.
pub fn find_project_file(explicit: Option<&Path>, dir: &Path) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(anyhow::anyhow!(
                "Project file {} not found.",
                path.display()
            ));
        }
        return Ok(path.to_path_buf());
    }

    let mut candidates = Vec::new();
    for entry in fs::read_dir(dir).context("Failed to read current directory")? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == PROJECT_EXTENSION) {
            candidates.push(path);
        }
    }

    match candidates.len() {
        0 => Err(anyhow::anyhow!(
            "No .{} file found in {}.\n\n\
            💡 Tip: pass one explicitly with --project <file>.",
            PROJECT_EXTENSION,
            dir.display()
        )),
        1 => Ok(candidates.remove(0)),
        _ => Err(anyhow::anyhow!(
            "Several .{} files found in {}; choose one with --project <file>.",
            PROJECT_EXTENSION,
            dir.display()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_new_project() {
        let settings = Settings::default();
        assert_eq!(settings.standard, "c++11");
        assert_eq!(settings.subsystem, "windows");
        assert_eq!(settings.warnings, "all");
        assert!(settings.warnings_as_errors);
        assert_eq!(settings.optimization_level, "4");
        assert!(!settings.debug_info);
        assert!(settings.multithreaded);
        assert_eq!(settings.output_folder, "output");
        assert_eq!(settings.output_file_name, "{ProjectName}.exe");
        assert_eq!(settings.target, OutputKind::Executable);
    }

    #[test]
    fn test_parse_project_file() {
        let toml_str = r#"
name = "calc"
files = ["main.cpp", "src/calc.cpp"]

[settings]
standard = "c++17"
architecture = "64-bit"
target = "DLL"
output_file_name = "{ProjectName}.dll"
libraries = ["comctl32"]

[toolchain]
compiler = "x86_64-w64-mingw32-g++"
"#;
        let file: ProjectFile = toml::from_str(toml_str).unwrap();
        assert_eq!(file.name.as_deref(), Some("calc"));
        assert_eq!(file.files.unwrap().len(), 2);
        assert_eq!(file.settings.architecture, Architecture::X64);
        assert_eq!(file.settings.target, OutputKind::SharedLibrary);
        assert_eq!(file.settings.libraries, vec!["comctl32"]);
        // Unset keys keep their defaults.
        assert_eq!(file.settings.subsystem, "windows");
        assert_eq!(file.toolchain.compiler, "x86_64-w64-mingw32-g++");
        assert_eq!(file.toolchain.resource_compiler, "windres");
    }

    #[test]
    fn test_target_names() {
        let project = Project::new("/work/calc/calc.cxproj", "calc", Settings::default());
        assert_eq!(project.executable_file(), "calc.exe");
        assert_eq!(project.unit_test_file(), "calc.Test.exe");
        assert_eq!(project.import_library_file(), "libcalc.a");
        assert_eq!(
            project.target_file(),
            PathBuf::from("/work/calc/output/calc.exe")
        );
        assert_eq!(
            project.target_unit_test_file(),
            PathBuf::from("/work/calc/output/calc.Test.exe")
        );
    }

    #[test]
    fn test_unit_test_file_without_extension() {
        let settings = Settings {
            output_file_name: "{ProjectName}".to_string(),
            ..Settings::default()
        };
        let project = Project::new("calc.cxproj", "calc", settings);
        assert_eq!(project.unit_test_file(), "calc.Test");
        assert_eq!(project.directory(), PathBuf::from("."));
    }

    #[test]
    fn test_load_uses_file_stem_as_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("widget.cxproj");
        fs::write(&path, "[settings]\nstandard = \"c++14\"\n").unwrap();

        let project = Project::load(&path).unwrap();
        assert_eq!(project.name(), "widget");
        assert_eq!(project.settings.standard, "c++14");
        assert!(project.files.is_none());
        assert_eq!(project.directory(), dir.path());
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.cxproj");
        fs::write(&path, "[settings\n").unwrap();
        let err = Project::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse project file"));
    }

    #[test]
    fn test_find_project_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_project_file(None, dir.path()).is_err());

        fs::write(dir.path().join("one.cxproj"), "").unwrap();
        let found = find_project_file(None, dir.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "one.cxproj");

        fs::write(dir.path().join("two.cxproj"), "").unwrap();
        assert!(find_project_file(None, dir.path()).is_err());
        assert!(find_project_file(Some(&dir.path().join("two.cxproj")), dir.path()).is_ok());
    }
}
