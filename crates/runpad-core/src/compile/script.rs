//! Source transformation for snippets.
//!
//! Both compile strategies share the same steps: directive lines are blanked
//! (line numbers are preserved), and a trailing bare expression is wrapped in
//! an implicit `__runpad::dump` call. Script-style snippets are then placed
//! inside a generated `fn main`; program-style snippets get the bootstrap
//! module declared in front of their own code.

use proc_macro2::Span;
use syn::parse::{Parse, ParseStream};
use syn::spanned::Spanned;
use syn::{Block, Expr, Item, ReturnType, Stmt};

use crate::inspect::strip_directives;

use super::bootstrap;

/// File name of the generated script root.
pub const SCRIPT_ROOT: &str = "script.rs";

/// Macros whose trailing invocation yields no useful value.
const NON_VALUE_MACROS: &[&str] = &[
    "print",
    "println",
    "eprint",
    "eprintln",
    "assert",
    "assert_eq",
    "assert_ne",
    "debug_assert",
    "debug_assert_eq",
    "debug_assert_ne",
    "panic",
    "todo",
    "unimplemented",
    "unreachable",
];

/// Result of wrapping a trailing expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    pub source: String,
    /// User line of the dumped expression, if one was wrapped.
    pub dumped_line: Option<u32>,
}

struct ScriptBody(Vec<Stmt>);

impl Parse for ScriptBody {
    fn parse(input: ParseStream<'_>) -> syn::Result<Self> {
        Block::parse_within(input).map(ScriptBody)
    }
}

/// Wrap the trailing bare expression of a statement list.
///
/// Source that does not parse is returned unchanged so the compiler can
/// report the problem itself.
pub fn wrap_trailing_expression(source: &str) -> Transformed {
    let unchanged = || Transformed {
        source: source.to_string(),
        dumped_line: None,
    };

    let body = match syn::parse_str::<ScriptBody>(source) {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!("Script does not parse, leaving it to the compiler: {}", e);
            return unchanged();
        }
    };

    match body.0.last().and_then(dump_target) {
        Some(span) => insert_dump(source, span).unwrap_or_else(unchanged),
        None => unchanged(),
    }
}

/// Prepare `fn main` of a whole program: install the bootstrap at the top
/// of its body and wrap its trailing bare expression.
///
/// Only a `main` without a return type gets its trailing expression dumped.
/// Both insertions stay on their original lines.
pub fn wrap_main_trailing_expression(source: &str) -> Transformed {
    let unchanged = || Transformed {
        source: source.to_string(),
        dumped_line: None,
    };

    let Ok(file) = syn::parse_file(source) else {
        return unchanged();
    };

    let Some(main) = file.items.iter().find_map(|item| match item {
        Item::Fn(f) if f.sig.ident == "main" => Some(f),
        _ => None,
    }) else {
        return unchanged();
    };

    let open = main.block.brace_token.span.open().end();
    let Some(install_at) = byte_offset(source, open.line, open.column) else {
        return unchanged();
    };

    let dumped = match main.sig.output {
        ReturnType::Default => main.block.stmts.last().and_then(dump_target),
        ReturnType::Type(..) => None,
    };
    let wrapped = match dumped {
        Some(span) => insert_dump(source, span).unwrap_or_else(unchanged),
        None => unchanged(),
    };

    // The body brace precedes the trailing expression, so its offset holds.
    let mut out = wrapped.source;
    out.insert_str(install_at, &format!(" {}::install();", bootstrap::MODULE_NAME));
    Transformed {
        source: out,
        dumped_line: wrapped.dumped_line,
    }
}

/// Span of the expression to dump, if the statement is a bare value.
fn dump_target(stmt: &Stmt) -> Option<Span> {
    match stmt {
        Stmt::Expr(expr, None) if produces_value(expr) => Some(expr.span()),
        _ => None,
    }
}

fn produces_value(expr: &Expr) -> bool {
    match expr {
        Expr::Assign(_)
        | Expr::ForLoop(_)
        | Expr::While(_)
        | Expr::Loop(_)
        | Expr::Return(_)
        | Expr::Break(_)
        | Expr::Continue(_) => false,
        Expr::If(e) => e.else_branch.is_some(),
        Expr::Macro(m) => m
            .mac
            .path
            .segments
            .last()
            .is_some_and(|s| !NON_VALUE_MACROS.contains(&s.ident.to_string().as_str())),
        _ => true,
    }
}

fn insert_dump(source: &str, span: Span) -> Option<Transformed> {
    let start = span.start();
    let end = span.end();
    let start_byte = byte_offset(source, start.line, start.column)?;
    let end_byte = byte_offset(source, end.line, end.column)?;
    if start_byte >= end_byte {
        return None;
    }

    let line = start.line as u32;
    let mut out = String::with_capacity(source.len() + 48);
    out.push_str(&source[..start_byte]);
    out.push_str(bootstrap::MODULE_NAME);
    out.push_str("::dump(&(");
    out.push_str(&source[start_byte..end_byte]);
    out.push_str(&format!("), {line});"));
    out.push_str(&source[end_byte..]);

    Some(Transformed {
        source: out,
        dumped_line: Some(line),
    })
}

/// Byte offset of a 1-indexed line and 0-indexed character column.
pub fn byte_offset(source: &str, line: usize, column: usize) -> Option<usize> {
    let mut line_start = 0;
    for _ in 1..line {
        line_start += source[line_start..].find('\n')? + 1;
    }
    let rest = &source[line_start..];
    let line_text = rest.split('\n').next().unwrap_or_default();
    let within = line_text
        .char_indices()
        .nth(column)
        .map(|(i, _)| i)
        .unwrap_or(line_text.len());
    Some(line_start + within)
}

/// A generated crate root file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedRoot {
    pub source: String,
    /// Generated lines preceding user line 1.
    pub line_offset: u32,
    pub dumped_line: Option<u32>,
}

/// Inputs shared by both layouts.
#[derive(Debug, Clone, Copy)]
pub struct RootInputs<'a> {
    /// Raw user source, directives included.
    pub source: &'a str,
    /// Sysroot crates to declare with `extern crate`.
    pub frameworks: &'a [&'a str],
    /// Module names of loaded script files.
    pub modules: &'a [String],
    /// Paths imported with `use`.
    pub imports: &'a [String],
}

/// Build the crate root for a script-style snippet.
///
/// Layout: `extern crate` lines, the inline bootstrap, `mod` lines for
/// loaded files, then `fn main() {` with imports on a single line, the user
/// source, and the closing brace.
pub fn render_script_root(inputs: RootInputs<'_>) -> GeneratedRoot {
    let user = wrap_trailing_expression(&strip_directives(inputs.source));

    let mut head_lines = Vec::new();
    for name in inputs.frameworks {
        head_lines.push(format!("extern crate {name};"));
    }
    let before_bootstrap = head_lines.len() as u32;
    let mut module_lines = Vec::new();
    for module in inputs.modules {
        module_lines.push(format!("mod {module};"));
    }

    let line_offset =
        before_bootstrap + bootstrap::inline_module_lines() + module_lines.len() as u32 + 1;

    let mut main_line = format!("fn main() {{ {}::install();", bootstrap::MODULE_NAME);
    for module in inputs.modules {
        main_line.push_str(&format!(" #[allow(unused_imports)] use crate::{module}::*;"));
    }
    for import in inputs.imports {
        main_line.push_str(&format!(" #[allow(unused_imports)] use {import};"));
    }

    let mut source = String::new();
    for line in &head_lines {
        source.push_str(line);
        source.push('\n');
    }
    source.push_str(&bootstrap::inline_module(line_offset, SCRIPT_ROOT));
    for line in &module_lines {
        source.push_str(line);
        source.push('\n');
    }
    source.push_str(&main_line);
    source.push('\n');
    source.push_str(&user.source);
    if !user.source.ends_with('\n') {
        source.push('\n');
    }
    source.push_str("}\n");

    GeneratedRoot {
        source,
        line_offset,
        dumped_line: user.dumped_line,
    }
}

/// Build `src/main.rs` for a program-style snippet.
///
/// User lines keep their numbers: the bootstrap declaration is inserted on
/// the first line after any inner attributes, and everything else goes at
/// the end of the file.
pub fn render_program_main(inputs: RootInputs<'_>) -> GeneratedRoot {
    let user = wrap_main_trailing_expression(&strip_directives(inputs.source));
    let text = user.source;

    let insert_at = inner_attributes_end(&text).unwrap_or(0);
    let declaration = format!("#[macro_use] mod {}; ", bootstrap::MODULE_NAME);

    let mut source = String::with_capacity(text.len() + 256);
    source.push_str(&text[..insert_at]);
    if insert_at > 0 {
        source.push(' ');
    }
    source.push_str(&declaration);
    source.push_str(&text[insert_at..]);
    if !source.ends_with('\n') {
        source.push('\n');
    }
    for name in inputs.frameworks {
        source.push_str(&format!("extern crate {name};\n"));
    }
    for module in inputs.modules {
        source.push_str(&format!(
            "mod {module}; #[allow(unused_imports)] use {module}::*;\n"
        ));
    }
    for import in inputs.imports {
        source.push_str(&format!("#[allow(unused_imports)] use {import};\n"));
    }

    GeneratedRoot {
        source,
        line_offset: 0,
        dumped_line: user.dumped_line,
    }
}

/// Byte offset just past the last leading inner attribute (`#![...]`).
fn inner_attributes_end(source: &str) -> Option<usize> {
    let file = syn::parse_file(source).ok()?;
    let last = file
        .attrs
        .iter()
        .filter(|a| matches!(a.style, syn::AttrStyle::Inner(_)))
        .last()?;
    let end = last.span().end();
    byte_offset(source, end.line, end.column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraps_trailing_expression() {
        let out = wrap_trailing_expression("let x = 40;\nx + 2\n");
        assert_eq!(out.source, "let x = 40;\n__runpad::dump(&(x + 2), 2);\n");
        assert_eq!(out.dumped_line, Some(2));
    }

    #[test]
    fn test_multiline_expression_keeps_lines() {
        let src = "let v = vec![1, 2];\nv.iter()\n  .map(|n| n * 2)\n  .collect::<Vec<_>>()";
        let out = wrap_trailing_expression(src);
        assert_eq!(out.source.lines().count(), src.lines().count());
        assert!(out.source.starts_with("let v = vec![1, 2];\n__runpad::dump(&(v.iter()"));
        assert!(out.source.ends_with(".collect::<Vec<_>>()), 2);"));
    }

    #[test]
    fn test_statements_are_not_wrapped() {
        for src in [
            "let x = 1;",
            "let mut x = 1;\nx = 2",
            "for i in 0..3 {}",
            "if true { }",
            "println!(\"hi\")",
            "fn f() {}",
        ] {
            let out = wrap_trailing_expression(src);
            assert_eq!(out.source, src, "should not wrap {src:?}");
            assert_eq!(out.dumped_line, None);
        }
    }

    #[test]
    fn test_value_macros_and_if_else_are_wrapped() {
        assert!(wrap_trailing_expression("vec![1, 2, 3]").dumped_line.is_some());
        assert!(
            wrap_trailing_expression("if true { 1 } else { 2 }")
                .dumped_line
                .is_some()
        );
    }

    #[test]
    fn test_unparsable_source_untouched() {
        let src = "let x = ;\nx";
        assert_eq!(wrap_trailing_expression(src).source, src);
    }

    #[test]
    fn test_unicode_columns() {
        let out = wrap_trailing_expression("let s = \"héllo\"; s.len()");
        assert_eq!(
            out.source,
            "let s = \"héllo\"; __runpad::dump(&(s.len()), 1);"
        );
    }

    #[test]
    fn test_script_root_offsets_user_lines() {
        let imports = vec!["std::collections::HashMap".to_string()];
        let root = render_script_root(RootInputs {
            source: "#r \"crate: serde, 1\"\nlet x = 1;\nx",
            frameworks: &["alloc"],
            modules: &[],
            imports: &imports,
        });

        let lines: Vec<_> = root.source.lines().collect();
        let offset = root.line_offset as usize;
        assert_eq!(lines[0], "extern crate alloc;");
        assert!(lines[offset - 1].starts_with("fn main() { __runpad::install();"));
        assert!(lines[offset - 1].contains("use std::collections::HashMap;"));
        assert_eq!(lines[offset], "");
        assert_eq!(lines[offset + 1], "let x = 1;");
        assert_eq!(lines[offset + 2], "__runpad::dump(&(x), 3);");
        assert_eq!(lines.last(), Some(&"}"));
        assert!(
            root.source
                .contains(&format!("USER_LINE_OFFSET: u32 = {};", root.line_offset))
        );

        syn::parse_file(&root.source).expect("generated root must parse");
    }

    #[test]
    fn test_program_main_preserves_lines() {
        let src = "#![allow(dead_code)]\n#r \"crate: serde, 1\"\nfn main() {\n    let v = 3;\n    v * 2\n}\n";
        let modules = vec!["helpers".to_string()];
        let root = render_program_main(RootInputs {
            source: src,
            frameworks: &[],
            modules: &modules,
            imports: &[],
        });

        let lines: Vec<_> = root.source.lines().collect();
        assert_eq!(lines[0], "#![allow(dead_code)] #[macro_use] mod __runpad; ");
        assert_eq!(lines[1], "");
        assert_eq!(lines[2], "fn main() { __runpad::install();");
        assert_eq!(lines[4], "    __runpad::dump(&(v * 2), 5);");
        assert!(root.source.contains("mod helpers; #[allow(unused_imports)] use helpers::*;"));
        assert_eq!(root.dumped_line, Some(5));
    }

    #[test]
    fn test_program_main_with_result_untouched() {
        let src = "fn main() -> Result<(), String> {\n    Ok(())\n}\n";
        let root = render_program_main(RootInputs {
            source: src,
            frameworks: &[],
            modules: &[],
            imports: &[],
        });
        assert_eq!(root.dumped_line, None);
        assert!(
            root.source
                .starts_with("#[macro_use] mod __runpad; fn main() -> Result<(), String> { __runpad::install();")
        );
    }

    #[test]
    fn test_byte_offset() {
        let src = "ab\ncdé\nf";
        assert_eq!(byte_offset(src, 1, 0), Some(0));
        assert_eq!(byte_offset(src, 2, 2), Some(5));
        assert_eq!(byte_offset(src, 2, 3), Some(7));
        assert_eq!(byte_offset(src, 3, 1), Some(9));
        assert_eq!(byte_offset(src, 5, 0), None);
    }
}
