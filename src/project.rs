//! The project's file tree and the walk that turns it into a build plan.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;
use walkdir::WalkDir;

use crate::build::{CompileSpec, LinkSpec, can_compile};
use crate::config::Project;

/// Unit-test sources are named `<name>.Test.<ext>`.
const TEST_STEM_SUFFIX: &str = ".Test";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectItem {
    /// `path` is relative to the project directory, `/`-separated.
    File { path: String },
    Folder {
        name: String,
        children: Vec<ProjectItem>,
    },
}

impl ProjectItem {
    pub fn root() -> Self {
        ProjectItem::Folder {
            name: String::new(),
            children: Vec::new(),
        }
    }

    /// Build a tree from a flat list of project-relative paths, keeping the
    /// list's order within each folder.
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut root = Self::root();
        for path in paths {
            let path = path.as_ref().replace('\\', "/");
            let folders: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
            if let Some((_, dirs)) = folders.split_last() {
                root.insert(dirs, &path);
            }
        }
        root
    }

    fn insert(&mut self, dirs: &[&str], path: &str) {
        let ProjectItem::Folder { children, .. } = self else {
            return;
        };
        let Some((first, rest)) = dirs.split_first() else {
            children.push(ProjectItem::File {
                path: path.to_string(),
            });
            return;
        };

        let existing = children
            .iter()
            .position(|c| matches!(c, ProjectItem::Folder { name, .. } if name == first));
        let index = match existing {
            Some(index) => index,
            None => {
                children.push(ProjectItem::Folder {
                    name: first.to_string(),
                    children: Vec::new(),
                });
                children.len() - 1
            }
        };
        children[index].insert(rest, path);
    }

    /// Scan the project directory, skipping the output folder and hidden
    /// directories.
    pub fn scan(project: &Project) -> Result<Self> {
        let root = project.directory();
        let output = project.output_directory();
        let mut paths = Vec::new();

        let walker = WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let hidden = entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.');
                !hidden && entry.path() != output
            });

        for entry in walker {
            let entry = entry.with_context(|| format!("Failed to scan {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&root) {
                paths.push(to_slash(relative));
            }
        }

        debug!("scanned {} files under {}", paths.len(), root.display());
        Ok(Self::from_paths(paths))
    }

    /// The explicit file list when the project has one, otherwise a scan.
    pub fn for_project(project: &Project) -> Result<Self> {
        match &project.files {
            Some(files) => Ok(Self::from_paths(files)),
            None => Self::scan(project),
        }
    }

    /// Every file in the tree, depth first.
    pub fn files(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_files(&mut out);
        out
    }

    fn collect_files<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            ProjectItem::File { path } => out.push(path),
            ProjectItem::Folder { children, .. } => {
                for child in children {
                    child.collect_files(out);
                }
            }
        }
    }
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Compile specs plus the object lists for the target and unit-test links.
#[derive(Debug, Clone, Default)]
pub struct BuildPlan {
    pub compile: Vec<CompileSpec>,
    /// Objects of the project's own target (no `*.Test.o`).
    pub objects: Vec<String>,
    /// Objects of the unit-test binary (no `main.o`).
    pub test_objects: Vec<String>,
    /// Set when at least one unit-test source exists.
    pub build_unit_test: bool,
}

impl BuildPlan {
    /// `None` when the project has nothing to link.
    pub fn target_link(&self, project: &Arc<Project>) -> Option<LinkSpec> {
        (!self.objects.is_empty())
            .then(|| LinkSpec::target(Arc::clone(project), self.objects.clone()))
    }

    pub fn unit_test_link(&self, project: &Arc<Project>) -> Option<LinkSpec> {
        self.build_unit_test
            .then(|| LinkSpec::unit_test(Arc::clone(project), self.test_objects.clone()))
    }
}

pub fn plan_build(project: &Arc<Project>, root: &ProjectItem) -> BuildPlan {
    let mut plan = BuildPlan::default();

    for file in root.files() {
        if !can_compile(file) {
            continue;
        }
        let spec = CompileSpec::new(Arc::clone(project), file);
        let object = format!("./{}", spec.output_file("o"));

        let stem = Path::new(spec.source_file())
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        if stem.ends_with(TEST_STEM_SUFFIX) {
            plan.test_objects.push(object);
            plan.build_unit_test = true;
        } else if stem == "main" {
            plan.objects.push(object);
        } else {
            plan.objects.push(object.clone());
            plan.test_objects.push(object);
        }
        plan.compile.push(spec);
    }

    plan
}
