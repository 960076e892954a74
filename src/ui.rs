//! Terminal output for the `cxb` front end.
//!
//! - [`Table`] renders an auto-sizing box-drawn table.
//! - [`TestBoard`] keeps the latest status of every discovered test and
//!   turns it into a table once the run is over.

use colored::*;
use console::{measure_text_width, truncate_str};

use crate::build::TestCase;
use crate::events::{TestStatus, TestUpdate};

/// Columns are never shrunk below this many characters.
const MIN_COLUMN: usize = 8;

pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn add_row(&mut self, row: Vec<String>) {
        if row.len() == self.headers.len() {
            self.rows.push(row);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn print(&self) {
        let (_, width) = console::Term::stdout().size();
        print!("{}", self.render(width as usize));
    }

    /// Lay the table out to fit `max_width` columns of terminal.
    pub fn render(&self, max_width: usize) -> String {
        if self.headers.is_empty() {
            return String::new();
        }
        let widths = self.column_widths(max_width);

        let separator = |left: &str, mid: &str, right: &str| {
            let cells: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
            format!("  {}{}{}\n", left, cells.join(mid), right)
        };
        let line = |cells: &[String], bold: bool| {
            let mut out = String::from("  │");
            for (cell, &width) in cells.iter().zip(&widths) {
                let text = truncate_str(&sanitize(cell), width, "...").into_owned();
                let padding = width.saturating_sub(measure_text_width(&text));
                let text = if bold { text.bold().to_string() } else { text };
                out.push_str(&format!(" {}{} │", text, " ".repeat(padding)));
            }
            out.push('\n');
            out
        };

        let mut out = separator("┌", "┬", "┐");
        out.push_str(&line(&self.headers, true));
        out.push_str(&separator("├", "┼", "┤"));
        for row in &self.rows {
            out.push_str(&line(row, false));
        }
        out.push_str(&separator("└", "┴", "┘"));
        out
    }

    fn column_widths(&self, max_width: usize) -> Vec<usize> {
        let mut widths: Vec<usize> = self
            .headers
            .iter()
            .map(|h| measure_text_width(h))
            .collect();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(measure_text_width(&sanitize(cell)));
            }
        }

        let overhead = 3 + 3 * widths.len();
        let available = max_width.saturating_sub(overhead);
        // Shave the widest column one character at a time until it fits.
        while widths.iter().sum::<usize>() > available {
            let Some((index, &widest)) = widths.iter().enumerate().max_by_key(|(_, w)| **w) else {
                break;
            };
            if widest <= MIN_COLUMN {
                break;
            }
            widths[index] -= 1;
        }
        widths
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\n' | '\r' | '\t' => ' ',
            _ => c,
        })
        .collect()
}

/// Latest known state of each test in a run.
pub struct TestBoard {
    tests: Vec<TestCase>,
    states: Vec<(TestStatus, String)>,
}

impl TestBoard {
    pub fn new(tests: Vec<TestCase>) -> Self {
        let states = vec![(TestStatus::Pending, String::new()); tests.len()];
        Self { tests, states }
    }

    /// Record an update; returns the affected test when the index is known.
    pub fn apply(&mut self, update: &TestUpdate) -> Option<&TestCase> {
        let state = self.states.get_mut(update.index)?;
        *state = (update.status, update.description.clone());
        self.tests.get(update.index)
    }

    pub fn status(&self, index: usize) -> Option<TestStatus> {
        self.states.get(index).map(|(status, _)| *status)
    }

    pub fn count(&self, status: TestStatus) -> usize {
        self.states.iter().filter(|(s, _)| *s == status).count()
    }

    pub fn table(&self, failed_only: bool) -> Table {
        let mut table = Table::new(&["Status", "Test", "Location", "Description"]);
        for (test, (status, description)) in self.tests.iter().zip(&self.states) {
            if failed_only && *status != TestStatus::Failed {
                continue;
            }
            table.add_row(vec![
                status_label(*status),
                test.name(),
                test.location.clone(),
                description.clone(),
            ]);
        }
        table
    }
}

pub fn status_label(status: TestStatus) -> String {
    match status {
        TestStatus::Pending => "PENDING".dimmed().to_string(),
        TestStatus::Running => "RUNNING".cyan().to_string(),
        TestStatus::Success => "PASS".green().to_string(),
        TestStatus::Failed => "FAIL".red().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(method: &str) -> TestCase {
        TestCase {
            location: format!("calc.Test.cpp:{}", method.len()),
            class_name: "CalcTest".to_string(),
            method_name: method.to_string(),
        }
    }

    #[test]
    fn test_render_fits_content() {
        let mut table = Table::new(&["Name", "Value"]);
        table.add_row(vec!["jobs".to_string(), "8".to_string()]);
        table.add_row(vec!["wrong".to_string()]);

        let rendered = table.render(120);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[3].contains("jobs"));
        assert!(!rendered.contains("wrong"));
    }

    #[test]
    fn test_render_truncates_wide_cells() {
        let mut table = Table::new(&["Description"]);
        table.add_row(vec!["x".repeat(200)]);
        let rendered = table.render(40);
        for line in rendered.lines() {
            assert!(measure_text_width(line) <= 40, "too wide: {line}");
        }
        assert!(rendered.contains("..."));
    }

    #[test]
    fn test_board_tracks_latest_status() {
        let mut board = TestBoard::new(vec![case("Adds"), case("Subtracts")]);
        assert_eq!(board.count(TestStatus::Pending), 2);

        let update = |index, status, description: &str| TestUpdate {
            index,
            status,
            description: description.to_string(),
        };
        board.apply(&update(0, TestStatus::Running, ""));
        let test = board.apply(&update(1, TestStatus::Failed, "expected 4 got 5")).unwrap();
        assert_eq!(test.method_name, "Subtracts");
        board.apply(&update(0, TestStatus::Success, ""));
        assert!(board.apply(&update(9, TestStatus::Success, "")).is_none());

        assert_eq!(board.status(0), Some(TestStatus::Success));
        assert_eq!(board.count(TestStatus::Failed), 1);

        let failed = board.table(true).render(200);
        assert!(failed.contains("CalcTest::Subtracts"));
        assert!(failed.contains("expected 4 got 5"));
        assert!(!failed.contains("CalcTest::Adds"));
    }
}
