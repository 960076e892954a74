//! `compile_commands.json` for editors and language servers.

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use super::compile::{CompileSpec, FileKind};

pub(crate) const COMPILE_COMMANDS: &str = "compile_commands.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileCommand {
    pub directory: String,
    pub command: String,
    pub file: String,
}

/// One entry per C++ source; resource scripts are left out.
pub fn compile_commands(specs: &[CompileSpec]) -> Vec<CompileCommand> {
    specs
        .par_iter()
        .filter(|spec| spec.kind() == Some(FileKind::Source))
        .map(|spec| CompileCommand {
            directory: spec.working_directory().to_string_lossy().into_owned(),
            command: spec.compile_command().to_string(),
            file: spec.source_file().to_string(),
        })
        .collect()
}

/// Write the database into the project directory of the first spec.
pub fn write_compile_commands(specs: &[CompileSpec]) -> Result<Option<PathBuf>> {
    let Some(first) = specs.first() else {
        return Ok(None);
    };
    let path = first.working_directory().join(COMPILE_COMMANDS);
    let json = serde_json::to_string_pretty(&compile_commands(specs))?;
    fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(Some(path))
}
