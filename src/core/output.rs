//! Output formatting for the command line.
//!
//! Status lines shared by every subcommand: errors in red, warnings in
//! yellow, successes with a green check mark, version ids in blue.

use crate::core::pipeline::RunSummary;
use colored::*;

/// Formats and prints an error message
///
/// # Format
/// ```text
///
/// ✕ Error: <message>
///
/// ```
pub fn print_error(message: &str) {
    println!("\n{} {}\n", "✕ Error:".red(), message.white());
}

/// Formats and prints a warning message
///
/// # Format
/// ```text
/// ! <message>
/// ```
pub fn print_warning(message: &str) {
    println!("{} {}", "!".yellow(), message.white());
}

/// Formats and prints a success message
///
/// # Format
/// ```text
///
/// ✓ <message>
/// ```
pub fn print_success(message: &str) {
    println!("\n{} {}", "✓".green(), message.white());
}

pub fn print_info(message: &str) {
    println!("\n{}\n", message.white());
}

pub fn print_section_header(header: &str) {
    println!("\n{}:\n", header.white());
}

/// Line printed when a version starts.
pub fn print_version_start(version_id: &str) {
    println!("{} {}", "Starting".bright_black(), version_id.blue());
}

/// Final status for a whole run: one line of counts, then each failure.
pub fn print_run_summary(action: &str, summary: &RunSummary) {
    let counts = format!(
        "{action}: {} completed, {} skipped, {} failed",
        summary.completed.len(),
        summary.skipped.len(),
        summary.failed.len()
    );

    if summary.is_success() {
        print_success(&counts);
        println!();
        return;
    }

    print_section_header(&counts);
    for (version, error) in &summary.failed {
        println!("  {} {}", version.blue(), error.to_string().red());
    }
    if summary.halted {
        println!("\n{}", "Stopped at the first failure (fail-fast).".yellow());
    }
    println!();
}
