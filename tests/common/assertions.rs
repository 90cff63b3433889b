//! Common assertion helpers for test output validation
//!
//! Provides predicates for the run summary line and error messages printed
//! by asset-mirror subcommands.

#![allow(dead_code)]

use predicates::prelude::*;

/// Checks the one-line summary printed at the end of every run
pub fn run_summary(action: &str, completed: usize, skipped: usize, failed: usize) -> impl Predicate<str> {
    predicates::str::contains(format!(
        "{action}: {completed} completed, {skipped} skipped, {failed} failed"
    ))
}

/// Checks for the error banner printed before a non-zero exit
pub fn reports_error(message: &str) -> impl Predicate<str> {
    predicates::str::contains("Error:").and(predicates::str::contains(message.to_string()))
}

/// Checks for the list of available subcommands in help output
pub fn lists_subcommands() -> impl Predicate<str> {
    predicates::str::contains("download")
        .and(predicates::str::contains("publish"))
        .and(predicates::str::contains("restore"))
        .and(predicates::str::contains("check"))
}
