//! Reference and load directives embedded in snippet source.
//!
//! Directives occupy a whole line and are removed before compilation:
//!
//! ```text
//! #r "crate: serde, 1.0"      registry crate with version requirement
//! #r "crate: itertools"       any version
//! #r "framework: alloc"       toolchain sysroot crate
//! #r "/home/me/my-utils"      local crate directory
//! #load "helpers.rs"          another script file, compiled as a module
//! ```

use std::path::{Path, PathBuf};

use crate::library::{LibraryRef, LibrarySet};

/// Kind of a directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    Package,
    Framework,
    File,
    Load,
}

/// One directive found in source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub kind: DirectiveKind,

    /// Crate id, framework name or path as written.
    pub identifier: String,

    /// Version requirement for packages.
    pub version: Option<String>,

    /// Line number (1-indexed)
    pub line: u32,
}

/// Extracts directives from snippet source.
pub trait SyntaxInspector: Send + Sync {
    fn extract_directives(&self, source: &str) -> Vec<Directive>;
}

/// Line-based directive scanner for the `#r` / `#load` syntax.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectiveInspector;

impl SyntaxInspector for DirectiveInspector {
    fn extract_directives(&self, source: &str) -> Vec<Directive> {
        source
            .lines()
            .enumerate()
            .filter_map(|(idx, line)| parse_directive(line, idx as u32 + 1))
            .collect()
    }
}

/// Parse a single line as a directive.
pub fn parse_directive(line: &str, line_number: u32) -> Option<Directive> {
    let trimmed = line.trim();

    let (is_load, rest) = if let Some(rest) = trimmed.strip_prefix("#load") {
        (true, rest)
    } else if let Some(rest) = trimmed.strip_prefix("#r") {
        (false, rest)
    } else {
        return None;
    };

    // Require whitespace between keyword and literal ("#real" is not "#r").
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let literal = rest.trim().strip_prefix('"')?.strip_suffix('"')?;
    if literal.is_empty() {
        return None;
    }

    if is_load {
        return Some(Directive {
            kind: DirectiveKind::Load,
            identifier: literal.to_string(),
            version: None,
            line: line_number,
        });
    }

    let directive = if let Some(spec) = literal.strip_prefix("crate:") {
        let (id, version) = match spec.split_once([',', '@']) {
            Some((id, version)) => (id.trim(), Some(version.trim().to_string())),
            None => (spec.trim(), None),
        };
        if id.is_empty() {
            return None;
        }
        Directive {
            kind: DirectiveKind::Package,
            identifier: id.to_string(),
            version: version.filter(|v| !v.is_empty()),
            line: line_number,
        }
    } else if let Some(name) = literal.strip_prefix("framework:") {
        Directive {
            kind: DirectiveKind::Framework,
            identifier: name.trim().to_string(),
            version: None,
            line: line_number,
        }
    } else {
        Directive {
            kind: DirectiveKind::File,
            identifier: literal.to_string(),
            version: None,
            line: line_number,
        }
    };

    Some(directive)
}

/// Whether a source line is a directive.
pub fn is_directive_line(line: &str) -> bool {
    parse_directive(line, 0).is_some()
}

/// Blank out directive lines, keeping every newline so line numbers hold.
pub fn strip_directives(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    for segment in source.split_inclusive('\n') {
        let (line, newline) = match segment.strip_suffix('\n') {
            Some(line) => (line, "\n"),
            None => (segment, ""),
        };
        if !is_directive_line(line) {
            out.push_str(line);
        }
        out.push_str(newline);
    }
    out
}

/// References and loaded files named by a snippet's directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnippetReferences {
    pub libraries: LibrarySet,
    pub loads: Vec<PathBuf>,
}

/// Turn directives into library references and load paths.
///
/// Relative file paths are resolved against `base_dir` when given; without
/// one they stay relative and fail validation at restore time.
pub fn resolve_directives(directives: &[Directive], base_dir: Option<&Path>) -> SnippetReferences {
    let resolve = |p: &str| {
        let path = PathBuf::from(p);
        match base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    };

    let mut refs = SnippetReferences::default();
    for directive in directives {
        match directive.kind {
            DirectiveKind::Package => {
                refs.libraries.insert(LibraryRef::package(
                    &directive.identifier,
                    directive.version.clone().unwrap_or_else(|| "*".to_string()),
                ));
            }
            DirectiveKind::Framework => {
                refs.libraries
                    .insert(LibraryRef::framework(&directive.identifier));
            }
            DirectiveKind::File => {
                refs.libraries
                    .insert(LibraryRef::file(resolve(&directive.identifier)));
            }
            DirectiveKind::Load => {
                let path = resolve(&directive.identifier);
                if !refs.loads.contains(&path) {
                    refs.loads.push(path);
                }
            }
        }
    }
    refs
}
