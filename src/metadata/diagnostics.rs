//! Diagnostics collected while decoding damaged or unusual structures.
//!
//! Most anomalies in a PE/CLI image are not worth aborting over, such as a reserved field with
//! a surprising value or a table whose rows run past the end of the file. The decoders record
//! these as [`Diagnostic`] entries and carry on, so the caller gets both the decoded structure
//! and an account of what was off about it.
//!
//! [`Diagnostics`] is an append-only container built on [`boxcar::Vec`]. Appending only needs
//! `&self`, so one instance can be shared through an `Arc` by any number of decoders running
//! on different threads.
//!
//! Every entry is also forwarded to the [`log`] facade at the matching level.
//!
//! # Examples
//!
//! ```rust
//! use dotlens::metadata::diagnostics::{DiagnosticCategory, Diagnostics};
//!
//! let diagnostics = Diagnostics::new();
//! diagnostics.warning(DiagnosticCategory::Header, "reserved1 is 0x1, expected 0");
//!
//! assert!(diagnostics.has_warnings());
//! assert_eq!(diagnostics.count(), 1);
//! ```

use std::fmt::{self, Write};

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticSeverity {
    /// Worth knowing, no effect on the decoded result
    Info,
    /// The structure deviates from the format
    Warning,
}

impl fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticSeverity::Info => write!(f, "INFO"),
            DiagnosticSeverity::Warning => write!(f, "WARN"),
        }
    }
}

/// The structure a diagnostic is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCategory {
    /// PE or CLI data directory slots
    Directory,
    /// Fixed header fields (CLI header, metadata root, tables stream header)
    Header,
    /// Metadata stream headers
    Stream,
    /// Metadata table presence, row counts and table extents
    Table,
}

impl fmt::Display for DiagnosticCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticCategory::Directory => write!(f, "Directory"),
            DiagnosticCategory::Header => write!(f, "Header"),
            DiagnosticCategory::Stream => write!(f, "Stream"),
            DiagnosticCategory::Table => write!(f, "Table"),
        }
    }
}

/// A single recorded anomaly.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity of the entry
    pub severity: DiagnosticSeverity,
    /// Structure the entry is about
    pub category: DiagnosticCategory,
    /// Human readable description
    pub message: String,
    /// File offset of the offending bytes, if known
    pub offset: Option<u64>,
    /// Metadata table the entry refers to, if any
    pub table: Option<u8>,
}

impl Diagnostic {
    /// Creates an entry without location information.
    pub fn new(
        severity: DiagnosticSeverity,
        category: DiagnosticCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            message: message.into(),
            offset: None,
            table: None,
        }
    }

    /// Attaches the file offset of the offending bytes.
    #[must_use]
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Attaches the id of the metadata table the entry refers to.
    #[must_use]
    pub fn with_table(mut self, table: u8) -> Self {
        self.table = Some(table);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.category, self.message)?;

        if let Some(offset) = self.offset {
            write!(f, " (offset: 0x{:08x})", offset)?;
        }

        if let Some(table) = self.table {
            write!(f, " (table: 0x{:02x})", table)?;
        }

        Ok(())
    }
}

/// Thread-safe, append-only collection of [`Diagnostic`] entries.
#[derive(Debug)]
pub struct Diagnostics {
    entries: boxcar::Vec<Diagnostic>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: boxcar::Vec::new(),
        }
    }

    /// Records an informational entry.
    pub fn info(&self, category: DiagnosticCategory, message: impl Into<String>) {
        self.push(Diagnostic::new(DiagnosticSeverity::Info, category, message));
    }

    /// Records a warning.
    pub fn warning(&self, category: DiagnosticCategory, message: impl Into<String>) {
        self.push(Diagnostic::new(
            DiagnosticSeverity::Warning,
            category,
            message,
        ));
    }

    /// Records a prepared entry and forwards it to the log.
    pub fn push(&self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            DiagnosticSeverity::Info => log::info!("{diagnostic}"),
            DiagnosticSeverity::Warning => log::warn!("{diagnostic}"),
        }

        self.entries.push(diagnostic);
    }

    /// Returns true if anything was recorded.
    pub fn has_any(&self) -> bool {
        self.entries.count() > 0
    }

    /// Returns true if at least one warning was recorded.
    pub fn has_warnings(&self) -> bool {
        self.count_of(DiagnosticSeverity::Warning) > 0
    }

    /// Number of recorded entries.
    pub fn count(&self) -> usize {
        self.entries.count()
    }

    /// Number of recorded entries with the given severity.
    pub fn count_of(&self, severity: DiagnosticSeverity) -> usize {
        self.iter().filter(|d| d.severity == severity).count()
    }

    /// Iterates the entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().map(|(_, d)| d)
    }

    /// All recorded warnings.
    pub fn warnings(&self) -> Vec<&Diagnostic> {
        self.iter()
            .filter(|d| d.severity == DiagnosticSeverity::Warning)
            .collect()
    }

    /// All entries about the given structure.
    pub fn by_category(&self, category: DiagnosticCategory) -> Vec<&Diagnostic> {
        self.iter().filter(|d| d.category == category).collect()
    }

    /// Multi-line report listing every warning.
    pub fn summary(&self) -> String {
        let mut output = String::new();

        let _ = writeln!(
            output,
            "Diagnostics: {} warning(s), {} info(s)",
            self.count_of(DiagnosticSeverity::Warning),
            self.count_of(DiagnosticSeverity::Info)
        );

        let warnings = self.warnings();
        if !warnings.is_empty() {
            let _ = writeln!(output, "\nWarnings:");
            for diag in warnings {
                let _ = writeln!(output, "  {diag}");
            }
        }

        output
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_diagnostic_creation() {
        let diag = Diagnostic::new(
            DiagnosticSeverity::Warning,
            DiagnosticCategory::Header,
            "Test message",
        );

        assert_eq!(diag.severity, DiagnosticSeverity::Warning);
        assert_eq!(diag.category, DiagnosticCategory::Header);
        assert_eq!(diag.message, "Test message");
        assert!(diag.offset.is_none());
        assert!(diag.table.is_none());
    }

    #[test]
    fn test_diagnostic_with_context() {
        let diag = Diagnostic::new(
            DiagnosticSeverity::Warning,
            DiagnosticCategory::Table,
            "Table declares 0 rows",
        )
        .with_offset(0x1000)
        .with_table(0x06);

        assert_eq!(diag.offset, Some(0x1000));
        assert_eq!(diag.table, Some(0x06));
        assert_eq!(
            diag.to_string(),
            "[WARN] Table: Table declares 0 rows (offset: 0x00001000) (table: 0x06)"
        );
    }

    #[test]
    fn test_diagnostics_container() {
        let diagnostics = Diagnostics::new();
        assert!(!diagnostics.has_any());

        diagnostics.info(DiagnosticCategory::Header, "Info message");
        assert!(diagnostics.has_any());
        assert!(!diagnostics.has_warnings());

        diagnostics.warning(DiagnosticCategory::Directory, "Warning message");
        diagnostics.warning(DiagnosticCategory::Table, "Another warning");

        assert_eq!(diagnostics.count(), 3);
        assert_eq!(diagnostics.count_of(DiagnosticSeverity::Warning), 2);
        assert_eq!(diagnostics.count_of(DiagnosticSeverity::Info), 1);
        assert_eq!(diagnostics.warnings().len(), 2);
        assert!(diagnostics.has_warnings());
    }

    #[test]
    fn test_diagnostics_thread_safety() {
        let diagnostics = Arc::new(Diagnostics::new());
        let mut handles = vec![];

        for i in 0..10 {
            let diag_clone = Arc::clone(&diagnostics);
            handles.push(thread::spawn(move || {
                diag_clone.warning(DiagnosticCategory::Table, format!("Thread {} warning", i));
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(diagnostics.count(), 10);
    }

    #[test]
    fn test_diagnostics_by_category() {
        let diagnostics = Diagnostics::new();
        diagnostics.warning(DiagnosticCategory::Header, "reserved1");
        diagnostics.warning(DiagnosticCategory::Header, "reserved2");
        diagnostics.warning(DiagnosticCategory::Table, "unknown table");

        assert_eq!(diagnostics.by_category(DiagnosticCategory::Header).len(), 2);
        assert_eq!(diagnostics.by_category(DiagnosticCategory::Table).len(), 1);
        assert!(diagnostics.by_category(DiagnosticCategory::Stream).is_empty());
    }

    #[test]
    fn test_diagnostics_summary() {
        let diagnostics = Diagnostics::new();
        diagnostics.warning(DiagnosticCategory::Header, "reserved2 is 0x0, expected 1");

        let summary = diagnostics.summary();
        assert!(summary.starts_with("Diagnostics: 1 warning(s), 0 info(s)"));
        assert!(summary.contains("Warnings:"));
        assert!(summary.contains("reserved2 is 0x0, expected 1"));
    }
}
