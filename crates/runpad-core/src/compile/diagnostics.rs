//! Diagnostics produced by restore and compilation, and the parsers that
//! turn tool output into them.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::protocol::ResultObject;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Note,
    Help,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
            Severity::Help => "help",
        }
    }

    fn parse(level: &str) -> Option<Self> {
        match level {
            "error" | "error: internal compiler error" => Some(Severity::Error),
            "warning" => Some(Severity::Warning),
            "note" => Some(Severity::Note),
            "help" => Some(Severity::Help),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One compiler, build or restore message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,

    /// Error code or lint name (e.g. `E0308`, `unused_variables`).
    pub code: Option<String>,

    pub message: String,

    pub file: Option<String>,

    /// Line number (1-indexed)
    pub line: Option<u32>,

    /// Column number (1-indexed)
    pub column: Option<u32>,
}

impl Diagnostic {
    /// An error with no location.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code: None,
            message: message.into(),
            file: None,
            line: None,
            column: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(message)
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Render as a one-level result record for consumers that only display
    /// result trees.
    pub fn to_result_object(&self) -> ResultObject {
        let header = match &self.code {
            Some(code) => format!("{}[{code}]", self.severity),
            None => self.severity.to_string(),
        };
        ResultObject {
            header: Some(header),
            value: Some(self.message.clone()),
            line_number: self.line,
            column: self.column.unwrap_or(0),
            ..ResultObject::default()
        }
    }

    /// Format the diagnostic for terminal display.
    pub fn format_terminal(&self) -> String {
        let level = match self.severity {
            Severity::Error => "\x1b[1;31merror\x1b[0m",
            Severity::Warning => "\x1b[1;33mwarning\x1b[0m",
            Severity::Note => "\x1b[1;36mnote\x1b[0m",
            Severity::Help => "\x1b[1;32mhelp\x1b[0m",
        };

        let mut output = match &self.code {
            Some(code) => format!("{level}[{code}]: {}\n", self.message),
            None => format!("{level}: {}\n", self.message),
        };

        if let Some(line) = self.line {
            output.push_str(&format!(
                "  \x1b[1;34m-->\x1b[0m {}:{}:{}\n",
                self.file.as_deref().unwrap_or("<script>"),
                line,
                self.column.unwrap_or(1)
            ));
        }

        output
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let (Some(file), Some(line)) = (&self.file, self.line) {
            write!(f, "{file}:{line}:{}: ", self.column.unwrap_or(1))?;
        }
        match &self.code {
            Some(code) => write!(f, "{}[{code}]: {}", self.severity, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// File name user-code diagnostics are reported under.
pub const SCRIPT_FILE: &str = "script";

// ============================================================================
// Build log grammar
// ============================================================================

/// `file:line:column: severity[code]: message`, one per line.
static BUILD_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<file>[^\s:][^:]*):(?P<line>\d+):(?P<column>\d+): (?P<severity>error|warning)(?:\[(?P<code>[^\]]+)\])?: (?P<message>.+)$",
    )
    .expect("build line grammar is a valid regex")
});

/// Parse one log line against the fixed build grammar.
pub fn parse_build_line(line: &str) -> Option<Diagnostic> {
    let caps = BUILD_LINE.captures(line.trim_end_matches('\r'))?;
    let severity = Severity::parse(&caps["severity"])?;

    Some(Diagnostic {
        severity,
        code: caps.name("code").map(|m| m.as_str().to_string()),
        message: caps["message"].trim().to_string(),
        file: Some(caps["file"].to_string()),
        line: caps["line"].parse().ok(),
        column: caps["column"].parse().ok(),
    })
}

/// Parse every matching line in a log. Non-matching lines are ignored.
pub fn parse_build_log(log: &str) -> Vec<Diagnostic> {
    log.lines().filter_map(parse_build_line).collect()
}

/// Parse the warnings log and the errors log of one build, warnings first.
pub fn parse_build_logs(warnings: &str, errors: &str) -> Vec<Diagnostic> {
    let mut diagnostics = parse_build_log(warnings);
    diagnostics.extend(parse_build_log(errors));
    diagnostics
}

// ============================================================================
// rustc JSON diagnostics
// ============================================================================

/// Rustc JSON diagnostic format.
#[derive(Debug, Deserialize)]
pub struct RustcDiagnostic {
    pub message: String,
    pub code: Option<RustcCode>,
    pub level: String,
    pub spans: Vec<RustcSpan>,
    pub rendered: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RustcCode {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct RustcSpan {
    pub file_name: String,
    pub line_start: u32,
    pub column_start: u32,
    pub is_primary: bool,
}

/// Cargo wraps compiler diagnostics in `compiler-message` records.
#[derive(Debug, Deserialize)]
struct CargoMessage {
    reason: String,
    message: Option<RustcDiagnostic>,
}

/// Maps rustc diagnostics on a generated file back to user lines.
///
/// The generated root file starts with `line_offset` lines of host code;
/// user line `n` sits at generated line `n + line_offset`. Diagnostics whose
/// primary span falls inside the host prelude are attributed to line 1 for
/// errors and dropped for warnings and notes.
pub struct DiagnosticMapper {
    root_file: String,
    line_offset: u32,
    /// Generated files that map one-to-one onto a user file name.
    passthrough: Vec<(String, String)>,
}

impl DiagnosticMapper {
    pub fn new(root_file: impl Into<String>, line_offset: u32) -> Self {
        Self {
            root_file: root_file.into(),
            line_offset,
            passthrough: Vec::new(),
        }
    }

    /// Report diagnostics on `generated` as `original` without line shifts.
    pub fn add_passthrough(&mut self, generated: impl Into<String>, original: impl Into<String>) {
        self.passthrough.push((generated.into(), original.into()));
    }

    /// Parse rustc (or cargo) JSON output.
    pub fn parse_rustc_output(&self, json_output: &str) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for line in json_output.lines() {
            let line = line.trim();
            if line.is_empty() || !line.starts_with('{') {
                continue;
            }

            let parsed = match serde_json::from_str::<RustcDiagnostic>(line) {
                Ok(diagnostic) => Some(diagnostic),
                Err(_) => match serde_json::from_str::<CargoMessage>(line) {
                    Ok(msg) if msg.reason == "compiler-message" => msg.message,
                    Ok(_) => None,
                    Err(e) => {
                        tracing::debug!(
                            "Failed to parse rustc JSON: {} (line: {})",
                            e,
                            truncate(line, 100)
                        );
                        None
                    }
                },
            };

            if let Some(diagnostic) = parsed.and_then(|d| self.map_diagnostic(&d)) {
                diagnostics.push(diagnostic);
            }
        }

        diagnostics
    }

    fn map_diagnostic(&self, diagnostic: &RustcDiagnostic) -> Option<Diagnostic> {
        let severity = Severity::parse(&diagnostic.level)?;

        // Summary lines ("aborting due to ...") carry no information.
        if diagnostic.spans.is_empty()
            && diagnostic.code.is_none()
            && (diagnostic.message.starts_with("aborting due to")
                || diagnostic.message.ends_with("warning emitted")
                || diagnostic.message.ends_with("warnings emitted"))
        {
            return None;
        }

        let mut mapped = Diagnostic {
            severity,
            code: diagnostic.code.as_ref().map(|c| c.code.clone()),
            message: diagnostic.message.clone(),
            file: None,
            line: None,
            column: None,
        };

        let Some(span) = diagnostic.spans.iter().find(|s| s.is_primary) else {
            return Some(mapped);
        };

        if let Some((_, original)) = self
            .passthrough
            .iter()
            .find(|(generated, _)| span.file_name.ends_with(generated.as_str()))
        {
            mapped.file = Some(original.clone());
            mapped.line = Some(span.line_start);
            mapped.column = Some(span.column_start);
            return Some(mapped);
        }

        if !span.file_name.ends_with(&self.root_file) {
            // Dependency or sysroot location; keep the message only.
            return Some(mapped);
        }

        if span.line_start <= self.line_offset {
            if severity != Severity::Error {
                return None;
            }
            mapped.file = Some(SCRIPT_FILE.to_string());
            mapped.line = Some(1);
            mapped.column = Some(1);
            return Some(mapped);
        }

        mapped.file = Some(SCRIPT_FILE.to_string());
        mapped.line = Some(span.line_start - self.line_offset);
        mapped.column = Some(span.column_start);
        Some(mapped)
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
