//! Removal of a project's build outputs (`cxb clean`, and the first half of
//! `cxb rebuild`).

use anyhow::{Context, Result};
use std::fs;

use crate::build::compdb::COMPILE_COMMANDS;
use crate::config::Project;

/// Delete the output folder and the generated `compile_commands.json`.
/// Returns whether anything was removed.
pub fn clean(project: &Project) -> Result<bool> {
    let mut cleaned = false;

    let output = project.output_directory();
    if output.exists() {
        fs::remove_dir_all(&output)
            .with_context(|| format!("Failed to remove {}", output.display()))?;
        cleaned = true;
    }

    let compdb = project.directory().join(COMPILE_COMMANDS);
    if compdb.exists() {
        fs::remove_file(&compdb).context("Failed to remove compile commands")?;
        cleaned = true;
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[test]
    fn test_clean_removes_outputs_once() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("output/src")).unwrap();
        fs::write(dir.path().join("output/src/a.o"), b"obj").unwrap();
        fs::write(dir.path().join(COMPILE_COMMANDS), b"[]").unwrap();
        fs::write(dir.path().join("main.cpp"), b"int main() {}").unwrap();
        let project = Project::new(dir.path().join("app.cxproj"), "app", Settings::default());

        assert!(clean(&project).unwrap());
        assert!(!dir.path().join("output").exists());
        assert!(!dir.path().join(COMPILE_COMMANDS).exists());
        assert!(dir.path().join("main.cpp").exists());

        assert!(!clean(&project).unwrap());
    }
}
