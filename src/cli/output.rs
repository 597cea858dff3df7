//! Handles all user-facing output for the CLI.
//!
//! This module is responsible for the compile progress line, the colored
//! build report, and the stats table rendering. Centralizing output logic
//! here keeps the build graph silent and testable.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::catalog::TestId;
use crate::engines::EngineVersionId;
use crate::graph::BuildReport;
use crate::stats::StatsTable;

/// Monotone compile counter: `[ 12/240]`-style prefixes for progress
/// lines, shared across the per-engine compile workers.
pub struct Progress {
    done: AtomicUsize,
    total: usize,
}

impl Progress {
    pub fn new(total: usize) -> Progress {
        Progress {
            done: AtomicUsize::new(0),
            total,
        }
    }

    /// Increments the counter and returns the formatted prefix.
    pub fn step(&self) -> String {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        let width = self.total.to_string().len();
        format!("[{done:>width$}/{}]", self.total)
    }
}

/// One progress line per compile request, naming the test being compiled
/// and the engine version compiling it.
pub fn compile_line(prefix: &str, test: &TestId, id: &EngineVersionId) -> String {
    format!("{prefix} Compiling {test} for {id}")
}

fn stream() -> StandardStream {
    let choice = if atty::is(atty::Stream::Stdout) {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };
    StandardStream::stdout(choice)
}

fn print_colored(stdout: &mut StandardStream, color: Color, text: &str) {
    let _ = stdout.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true));
    let _ = writeln!(stdout, "{text}");
    let _ = stdout.reset();
}

/// Prints the build report: counts first, then every artifact that could
/// not be completed. An incomplete run is never presented as a clean one.
pub fn print_report(report: &BuildReport) {
    let mut stdout = stream();

    println!(
        "{} artifacts built, {} reused.",
        report.built.len(),
        report.reused.len()
    );

    if !report.failed.is_empty() {
        print_colored(
            &mut stdout,
            Color::Red,
            &format!("{} artifacts failed:", report.failed.len()),
        );
        for (key, reason) in &report.failed {
            println!("  {key}: {reason}");
        }
    }
    if !report.unbuilt.is_empty() {
        print_colored(
            &mut stdout,
            Color::Yellow,
            &format!("{} artifacts incomplete:", report.unbuilt.len()),
        );
        for (key, missing) in &report.unbuilt {
            println!("  {key} (missing {missing})");
        }
    }
    if report.is_complete() {
        print_colored(&mut stdout, Color::Green, "Build complete.");
    }
}

/// Prints the stats table, one engine version per line.
pub fn print_stats(stats: &StatsTable) {
    for (label, row) in stats {
        let incomplete = if row.incomplete > 0 {
            format!(" ({} incomplete)", row.incomplete)
        } else {
            String::new()
        };
        println!(
            "{label}: {:.2}% ({} passed, {} failed){incomplete}",
            row.percentage, row.passed, row.failed
        );
    }
}
