// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Demo output formatting with colors.
//!
//! Respects NO_COLOR and FORCE_COLOR environment variables.
//! Colors are automatically disabled when output is piped.

use colored::{Color, Colorize};

/// Initialize color support based on environment.
/// Call once at startup.
pub fn init() {
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    } else if std::env::var("FORCE_COLOR").is_ok() {
        colored::control::set_override(true);
    }
}

fn timestamp() -> String {
    chrono::Utc::now().format("%H:%M:%S").to_string()
}

/// `[HH:MM:SS] ACTION   message`, action padded to eight columns.
pub fn format_line(timestamp: &str, action: &str, message: &str) -> String {
    format!("[{}] {:<8} {}", timestamp, action, message)
}

/// Print one timestamped line in `color`.
pub fn log(color: Color, action: &str, message: &str) {
    println!("{}", format_line(&timestamp(), action, message).color(color));
}

pub fn value(label: &str, value: impl std::fmt::Display) {
    println!("{} {}", label, value.to_string().bold());
}

pub fn stats(line: impl std::fmt::Display) {
    eprintln!("{} {}", "stats".dimmed(), line);
}

pub fn warning(msg: &str) {
    eprintln!("{}: {}", "warning".yellow().bold(), msg);
}
