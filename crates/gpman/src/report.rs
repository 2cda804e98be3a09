//! Operator facing output
//!
//! Diagnostics go through `tracing`. What a run prints for the operator
//! (card info, registry listings, warnings, the lock record) goes through
//! a [`Reporter`] so the binary decides where it lands.

/// Sink for operator facing output
pub trait Reporter {
    /// A regular output line
    fn line(&mut self, line: &str);

    /// A warning the operator should notice
    fn warning(&mut self, warning: &str);
}

impl<R: Reporter + ?Sized> Reporter for &mut R {
    fn line(&mut self, line: &str) {
        (**self).line(line);
    }

    fn warning(&mut self, warning: &str) {
        (**self).warning(warning);
    }
}

/// Reporter that keeps everything in memory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryReporter {
    /// Output lines in order
    pub lines: Vec<String>,
    /// Warnings in order
    pub warnings: Vec<String>,
}

impl MemoryReporter {
    /// Whether any line contains `needle`
    pub fn printed(&self, needle: &str) -> bool {
        self.lines.iter().any(|line| line.contains(needle))
    }

    /// Whether any warning contains `needle`
    pub fn warned(&self, needle: &str) -> bool {
        self.warnings.iter().any(|warning| warning.contains(needle))
    }
}

impl Reporter for MemoryReporter {
    fn line(&mut self, line: &str) {
        self.lines.push(line.to_owned());
    }

    fn warning(&mut self, warning: &str) {
        self.warnings.push(warning.to_owned());
    }
}
