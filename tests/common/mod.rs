//! Shared fixtures: a fake `g++` and a fake unit-test binary written as
//! shell scripts, and throwaway projects that use them.
#![allow(dead_code)]

use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

/// Every invocation is appended to this file in the working directory.
pub const COMPILER_LOG: &str = "compiler.log";

const FAKE_COMPILER: &str = r#"#!/bin/sh
echo "$@" >> compiler.log
mm=0; src=""; out=""; mf=""; implib=""; prev=""
for arg in "$@"; do
  case "$prev" in
    -c) src="$arg" ;;
    -o) out="$arg" ;;
    -MF) mf="$arg" ;;
  esac
  case "$arg" in
    -MM) mm=1 ;;
    -Wl,--out-implib,*) implib="${arg#-Wl,--out-implib,}" ;;
  esac
  prev="$arg"
done
if [ "$mm" = 1 ]; then
  hdr="${src%.*}.h"
  if [ -f "$hdr" ]; then deps="$src $hdr"; else deps="$src"; fi
  echo "x.o: $deps" > "$mf"
  case "$src" in
    *broken_deps*) echo "$src:1:10: fatal error: gone.h: No such file or directory" >&2; exit 1 ;;
  esac
  exit 0
fi
if [ -z "$src" ]; then
  case "$out" in *slowlink*) exec sleep 30 ;; esac
fi
if [ -n "$src" ]; then
  case "$src" in *slow*) exec sleep 30 ;; esac
  if grep -q '#error' "$src"; then
    echo "$src:1:1: error: boom" >&2
    exit 1
  fi
fi
echo built > "$out"
if [ -n "$implib" ]; then echo lib > "$implib"; fi
exit 0
"#;

const FAKE_TEST_BINARY: &str = r#"#!/bin/sh
case "$1" in
  PrintTests)
    echo "calc.Test.cpp:10 CalcTest Adds"
    echo "calc.Test.cpp:20 CalcTest Subtracts"
    echo ""
    echo "calc.Test.cpp:30 CalcTest Multiplies"
    ;;
  RunSingleTest)
    if [ "$3" = "Multiplies" ]; then echo "Failed: expected 4 got 5"; else echo "Success"; fi
    ;;
esac
"#;

// Written once per test process, before any test spawns them.
static FAKES: LazyLock<PathBuf> = LazyLock::new(|| {
    let dir = std::env::temp_dir().join(format!("cxb-fakes-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    for (name, script) in [("fake-g++", FAKE_COMPILER), ("fake.Test.exe", FAKE_TEST_BINARY)] {
        let path = dir.join(name);
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
    dir
});

pub fn fake_compiler() -> PathBuf {
    FAKES.join("fake-g++")
}

pub fn fake_test_binary() -> PathBuf {
    FAKES.join("fake.Test.exe")
}

/// A long time ago, so any freshly written object is newer.
pub fn the_past() -> SystemTime {
    SystemTime::now() - Duration::from_secs(3600)
}

pub fn set_mtime(path: &Path, time: SystemTime) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(time)
        .unwrap();
}

pub struct Workspace {
    pub root: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
        }
    }

    /// Lay out `<root>/<name>/` with the given sources (all dated in the
    /// past) and a project file listing them.
    pub fn project(&self, name: &str, settings: &str, files: &[(&str, &str)]) -> PathBuf {
        let dir = self.root.path().join(name);
        fs::create_dir_all(&dir).unwrap();

        for (file, content) in files {
            let path = dir.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
            set_mtime(&path, the_past());
        }

        let listed: Vec<String> = files.iter().map(|(f, _)| format!("\"{f}\"")).collect();
        let compiler = fake_compiler();
        let project = format!(
            "name = \"{name}\"\nfiles = [{}]\n\n[settings]\n{settings}\n\n[toolchain]\n\
             compiler = \"{}\"\nresource_compiler = \"{}\"\n",
            listed.join(", "),
            compiler.display(),
            compiler.display()
        );
        let path = dir.join(format!("{name}.cxproj"));
        fs::write(&path, project).unwrap();
        path
    }
}

/// Logged invocations for one project directory, then clear the log.
pub fn take_invocations(project_dir: &Path) -> Vec<String> {
    let log = project_dir.join(COMPILER_LOG);
    let content = fs::read_to_string(&log).unwrap_or_default();
    let _ = fs::remove_file(&log);
    content.lines().map(str::to_string).collect()
}

pub fn compiles(invocations: &[String]) -> Vec<&String> {
    invocations
        .iter()
        .filter(|line| line.contains(" -c ") && !line.starts_with("-MM"))
        .collect()
}

pub fn links(invocations: &[String]) -> Vec<&String> {
    invocations
        .iter()
        .filter(|line| !line.contains(" -c "))
        .collect()
}
