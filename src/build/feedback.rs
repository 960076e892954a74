//! Compiler diagnostics in the build log, and hints for common failures.

use std::fmt;
use std::sync::LazyLock;

use colored::*;
use regex::Regex;

static DIAGNOSTIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(\d+)> )?(.+?):(\d+):(?:(\d+):)?\s*(fatal error|error|warning|note):\s*(.*)$",
    )
    .expect("diagnostic pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
            Severity::Note => f.write_str("note"),
        }
    }
}

/// A `file:line:col: severity: message` line, optionally tagged `id> `.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub task: Option<u64>,
    pub file: String,
    pub line: u32,
    pub column: Option<u32>,
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn parse(line: &str) -> Option<Self> {
        let caps = DIAGNOSTIC.captures(line.trim_end())?;
        let severity = match &caps[5] {
            "warning" => Severity::Warning,
            "note" => Severity::Note,
            _ => Severity::Error,
        };
        Some(Self {
            task: caps.get(1).and_then(|m| m.as_str().parse().ok()),
            file: caps[2].to_string(),
            line: caps[3].parse().ok()?,
            column: caps.get(4).and_then(|m| m.as_str().parse().ok()),
            severity,
            message: caps[6].to_string(),
        })
    }

    /// `file:line:col`, the way editors accept it.
    pub fn location(&self) -> String {
        match self.column {
            Some(column) => format!("{}:{}:{}", self.file, self.line, column),
            None => format!("{}:{}", self.file, self.line),
        }
    }
}

pub struct FeedbackAnalyzer;

impl FeedbackAnalyzer {
    pub fn analyze(output: &str) -> Option<String> {
        if output.contains("undefined reference to `main'")
            || output.contains("undefined reference to `WinMain")
        {
            return Some(format!(
                "Your project is missing a {} function.\nAdd an entry point or set {} in the project's [settings] if this is a library.",
                "main()".bold().yellow(),
                "target = \"DLL\"".bold().green()
            ));
        }

        if output.contains("undefined reference to") || output.contains("cannot find -l") {
            return Some(format!(
                "It looks like a {} error.\nYou might be missing an entry in {} or a project {}.",
                "Linker".bold().red(),
                "libraries".bold().yellow(),
                "reference".bold().yellow()
            ));
        }

        if output.contains("fatal error: ") && output.contains("No such file or directory") {
            return Some(format!(
                "It looks like a {} error.\nCheck the {} of the project file.",
                "Missing Header".bold().red(),
                "include_directories".bold().yellow()
            ));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged_error() {
        let d = Diagnostic::parse("3> src/a.cpp:12:5: error: 'foo' was not declared in this scope")
            .unwrap();
        assert_eq!(d.task, Some(3));
        assert_eq!(d.file, "src/a.cpp");
        assert_eq!(d.line, 12);
        assert_eq!(d.column, Some(5));
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.message, "'foo' was not declared in this scope");
        assert_eq!(d.location(), "src/a.cpp:12:5");
    }

    #[test]
    fn test_parse_windows_path_and_fatal_error() {
        let d = Diagnostic::parse("C:\\code\\b.cpp:1:10: fatal error: b.h: No such file or directory")
            .unwrap();
        assert_eq!(d.task, None);
        assert_eq!(d.file, "C:\\code\\b.cpp");
        assert_eq!(d.severity, Severity::Error);
    }

    #[test]
    fn test_parse_warning_without_column() {
        let d = Diagnostic::parse("2> c.cpp:7: warning: unused variable 'x'").unwrap();
        assert_eq!(d.column, None);
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(d.location(), "c.cpp:7");
    }

    #[test]
    fn test_non_diagnostics() {
        assert!(Diagnostic::parse("1> Build started.").is_none());
        assert!(Diagnostic::parse("2> g++ -O4 -c a.cpp -o output/a.o").is_none());
        assert!(Diagnostic::parse("In file included from a.cpp:3:").is_none());
    }

    #[test]
    fn test_linker_hint() {
        let msg = FeedbackAnalyzer::analyze("a.o:a.cpp:(.text+0x1): undefined reference to `foo()'")
            .unwrap();
        assert!(msg.contains("Linker"));
        assert!(msg.contains("libraries"));
    }

    #[test]
    fn test_include_hint() {
        let msg = FeedbackAnalyzer::analyze("fatal error: foo.h: No such file or directory").unwrap();
        assert!(msg.contains("Missing Header"));
    }

    #[test]
    fn test_main_hint() {
        let msg = FeedbackAnalyzer::analyze("undefined reference to `main'").unwrap();
        assert!(msg.contains("main()"));
        assert!(msg.contains("target = \"DLL\""));
    }
}
