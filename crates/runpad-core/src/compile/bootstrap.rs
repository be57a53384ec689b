//! Child-side runtime compiled into every snippet.
//!
//! The bootstrap is a plain Rust module named `__runpad`. It writes protocol
//! frames on standard output, installs a panic hook that reports panics as
//! exception frames, and shadows `print!`/`println!` so console output
//! arrives as dumped text records.

/// Name of the bootstrap module inside the generated crate.
pub const MODULE_NAME: &str = "__runpad";

const OFFSET_PLACEHOLDER: &str = "@USER_LINE_OFFSET@";
const ROOT_PLACEHOLDER: &str = "@ROOT_FILE@";

const BODY_TEMPLATE: &str = r##"use std::io::{BufRead, Write};

pub const USER_LINE_OFFSET: u32 = @USER_LINE_OFFSET@;
pub const ROOT_FILE: &str = "@ROOT_FILE@";

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

pub fn frame(tag: char, payload: &str) {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let _ = writeln!(out, "{}:{}", tag, payload);
    let _ = out.flush();
}

fn record(header: Option<&str>, value: &str, line: u32) -> String {
    let header = match header {
        Some(h) => format!("\"header\":{},", escape(h)),
        None => String::new(),
    };
    let line = if line > 0 {
        format!("\"lineNumber\":{},", line)
    } else {
        String::new()
    };
    format!(
        "{{{}\"value\":{},{}\"column\":0,\"expanded\":false,\"children\":[]}}",
        header,
        escape(value),
        line
    )
}

pub fn dump<T: std::fmt::Debug + ?Sized>(value: &T, line: u32) {
    let rendered = format!("{:?}", value);
    frame('o', &record(Some(std::any::type_name::<T>()), &rendered, line));
}

pub fn dump_text(text: &str) {
    frame('o', &record(None, text, 0));
}

pub fn progress(fraction: f64) {
    if fraction.is_finite() {
        frame('p', &format!("{{\"progress\":{}}}", fraction));
    } else {
        frame('p', "{\"progress\":null}");
    }
}

pub fn read_line() -> String {
    frame('i', "");
    let mut line = String::new();
    let _ = std::io::stdin().lock().read_line(&mut line);
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    line
}

pub fn user_line(file: &str, line: u32) -> u32 {
    if file.ends_with(ROOT_FILE) && line > USER_LINE_OFFSET {
        line - USER_LINE_OFFSET
    } else {
        line
    }
}

pub fn install() {
    std::panic::set_hook(Box::new(|info| {
        let payload = info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic".to_string()
        };
        let (line, column) = match info.location() {
            Some(loc) => (user_line(loc.file(), loc.line()), loc.column()),
            None => (0, 0),
        };
        let line = if line > 0 {
            format!("\"lineNumber\":{},", line)
        } else {
            String::new()
        };
        frame(
            'e',
            &format!(
                "{{\"message\":{},\"header\":\"panic\",{}\"column\":{},\"children\":[]}}",
                escape(&message),
                line,
                column
            ),
        );
    }));
}

macro_rules! println {
    () => {
        $crate::__runpad::dump_text("")
    };
    ($($arg:tt)*) => {
        $crate::__runpad::dump_text(&format!($($arg)*))
    };
}

macro_rules! print {
    ($($arg:tt)*) => {
        $crate::__runpad::dump_text(&format!($($arg)*))
    };
}
"##;

/// Module body for a standalone `__runpad.rs` file.
///
/// `root_file` is the file name of the crate root the panic hook maps lines
/// for; `line_offset` is the number of generated lines preceding user line 1
/// in that file.
pub fn module_body(line_offset: u32, root_file: &str) -> String {
    BODY_TEMPLATE
        .replace(OFFSET_PLACEHOLDER, &line_offset.to_string())
        .replace(ROOT_PLACEHOLDER, &root_file.replace(['\\', '"'], "_"))
}

/// The bootstrap as an inline module, ready to sit at the top of a crate root.
pub fn inline_module(line_offset: u32, root_file: &str) -> String {
    let mut out = String::new();
    out.push_str("#[macro_use]\n");
    out.push_str("#[allow(dead_code, unused_macros, unused_imports)]\n");
    out.push_str("mod __runpad {\n");
    out.push_str(&module_body(line_offset, root_file));
    out.push_str("}\n");
    out
}

/// Line count of [`inline_module`]; independent of its arguments.
pub fn inline_module_lines() -> u32 {
    inline_module(0, "x").lines().count() as u32
}
