//! Parser for make-rule dependency files produced by `g++ -MM -MF`.
//!
//! ```text
//! output/src/parser.o: src/parser.cpp src/parser.h \
//!  include/my\ headers/token.h
//! ```

/// Split a dependency file into the individual paths it lists, in order.
///
/// The rule target on the first line (everything up to and including `.o:`)
/// is dropped, trailing `\` continuations are joined, and `\ ` is unescaped
/// to a literal space inside a file name.
pub fn parse_depfile(content: &str) -> Vec<String> {
    let mut dependencies = Vec::new();
    let mut first_line = true;

    for raw in content.lines() {
        let mut line = raw.trim_end_matches('\r');
        if let Some(stripped) = line.strip_suffix('\\') {
            line = stripped;
        }

        if first_line {
            first_line = false;
            if let Some(colon) = line.find(".o:") {
                line = &line[colon + 3..];
            }
        }

        split_escaped(line.trim(), &mut dependencies);
    }

    dependencies
}

fn split_escaped(line: &str, out: &mut Vec<String>) {
    let mut current = String::new();
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&' ') => {
                chars.next();
                current.push(' ');
            }
            ' ' | '\t' => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }

    if !current.is_empty() {
        out.push(current);
    }
}
