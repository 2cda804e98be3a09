//! Console output for the gpman CLI

use colored::Colorize;
use gpman::Reporter;

/// Format an error message
pub(crate) fn error(message: &str) -> String {
    format!("{} {}", "error:".red().bold(), message)
}

/// Format a warning message
pub(crate) fn warning(message: &str) -> String {
    message.yellow().bold().to_string()
}

/// Reporter printing lines to stdout and warnings to stderr
#[derive(Debug, Default)]
pub(crate) struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn line(&mut self, line: &str) {
        println!("{line}");
    }

    fn warning(&mut self, message: &str) {
        eprintln!("{}", warning(message));
    }
}
