//! Colored echo of subprocess traffic for interactive debugging.

use chrono::Local;
use owo_colors::OwoColorize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Stdin,
    Stdout,
    Stderr,
}

/// Echoes every line crossing the subprocess pipes to the bridge's stderr.
#[derive(Debug, Clone)]
pub struct TrafficEcho {
    label: String,
}

impl TrafficEcho {
    pub fn new(server_name: &str) -> Self {
        Self {
            label: format!("[{}]", server_name),
        }
    }

    pub fn line(&self, direction: Direction, line: &str) {
        eprintln!("{}", self.render(direction, line));
    }

    fn render(&self, direction: Direction, line: &str) -> String {
        let timestamp = format!("[{}]", Local::now().format("%H:%M:%S%.3f"));
        let body = serde_json::from_str::<Value>(line)
            .ok()
            .and_then(|parsed| serde_json::to_string_pretty(&parsed).ok())
            .unwrap_or_else(|| line.to_string());

        match direction {
            Direction::Stdin => format!(
                "{} {} {}\n{}",
                timestamp,
                self.label.cyan(),
                "→ STDIN:".cyan(),
                body.cyan()
            ),
            Direction::Stdout => format!(
                "{} {} {}\n{}",
                timestamp,
                self.label.green(),
                "← STDOUT:".green(),
                body.green()
            ),
            Direction::Stderr => format!(
                "{} {} {}\n{}",
                timestamp,
                self.label.red(),
                "⚠ STDERR:".red(),
                body.red()
            ),
        }
    }
}
