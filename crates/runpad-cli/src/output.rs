//! Terminal rendering of host events.

use runpad_core::{HostEvent, ResultObject};

use crate::colors;

/// Print one event. Dumped values go to stdout, everything else to stderr.
pub fn print_event(event: &HostEvent) {
    match event {
        HostEvent::Diagnostics { diagnostics } => {
            for diagnostic in diagnostics {
                eprint!("{}", diagnostic.format_terminal());
            }
        }
        HostEvent::Dumped { record } => print_record(record, 0),
        HostEvent::Exception { exception } => {
            let location = exception
                .object
                .line_number
                .map(|line| format!(" (line {line})"))
                .unwrap_or_default();
            eprintln!(
                "{}{}panic{}: {}{}",
                colors::BOLD,
                colors::RED,
                colors::RESET,
                exception.message,
                location
            );
        }
        HostEvent::Progress { progress } => match progress.progress {
            Some(fraction) => eprintln!(
                "{}[{:>3.0}%]{}",
                colors::CYAN,
                fraction * 100.0,
                colors::RESET
            ),
            None => eprintln!("{}[...]{}", colors::CYAN, colors::RESET),
        },
        HostEvent::InputRequested => eprint!("{}> {}", colors::DIM, colors::RESET),
        HostEvent::Disassembly { text } => {
            println!("{}Disassembly:{}", colors::BOLD, colors::RESET);
            println!("{text}");
        }
        HostEvent::RestoreCompleted {
            errors, warnings, ..
        } => {
            for diagnostic in warnings.iter().chain(errors) {
                eprint!("{}", diagnostic.format_terminal());
            }
        }
        HostEvent::RunFailed { message } => {
            eprintln!("{}Run failed:{} {}", colors::RED, colors::RESET, message);
        }
    }
}

fn print_record(record: &ResultObject, depth: usize) {
    let indent = "  ".repeat(depth);
    let value = record.value.as_deref().unwrap_or_default();
    match &record.header {
        // Console text arrives without a header.
        None => println!("{indent}{value}"),
        Some(header) => println!(
            "{indent}{}{header}{} {value}",
            colors::DIM,
            colors::RESET
        ),
    }
    for child in &record.children {
        print_record(child, depth + 1);
    }
}
