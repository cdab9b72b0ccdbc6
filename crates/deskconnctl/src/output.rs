//! Colored status messages for the terminal

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

fn print_tagged(tag: &str, color: Color, msg: &str) {
    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(color),
        Print(tag),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a success message
pub fn print_success(msg: &str) {
    print_tagged("✓ ", Color::Green, msg);
}

/// Print an informational message
pub fn print_info(msg: &str) {
    print_tagged("→ ", Color::Cyan, msg);
}

pub fn print_error(msg: &str) {
    print_tagged("✗ ", Color::Red, msg);
}
