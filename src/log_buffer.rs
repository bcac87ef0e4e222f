use chrono::{DateTime, Local};
use tracing::{error, info};

/// Severity of a diagnostic log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Error,
}

/// One timestamped diagnostic line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub text: String,
}

impl std::fmt::Display for LogLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.text
        )
    }
}

/// Diagnostic log shown to the user, separate from tracing output.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    lines: Vec<LogLine>,
}

impl LogBuffer {
    #[must_use]
    pub const fn new() -> Self {
        Self { lines: Vec::new() }
    }

    /// Appends an informational line. Empty text is ignored.
    pub fn push(&mut self, text: impl Into<String>) {
        self.push_with_level(LogLevel::Info, text.into());
    }

    /// Appends an error line. Empty text is ignored.
    pub fn push_error(&mut self, text: impl Into<String>) {
        self.push_with_level(LogLevel::Error, text.into());
    }

    pub fn extend<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for line in lines {
            self.push(line);
        }
    }

    fn push_with_level(&mut self, level: LogLevel, text: String) {
        if text.is_empty() {
            return;
        }
        match level {
            LogLevel::Info => info!(target: "git_pending::log_buffer", "{text}"),
            LogLevel::Error => error!(target: "git_pending::log_buffer", "{text}"),
        }
        self.lines.push(LogLine {
            timestamp: Local::now(),
            level,
            text,
        });
    }

    #[must_use]
    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }

    /// Texts of all lines, without timestamps.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(|line| line.text.as_str())
    }

    #[must_use]
    pub fn contains(&self, text: &str) -> bool {
        self.texts().any(|line| line == text)
    }

    /// Removes and returns everything logged so far.
    pub fn drain(&mut self) -> Vec<LogLine> {
        std::mem::take(&mut self.lines)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignores_empty_lines() {
        let mut log = LogBuffer::new();
        log.push("");
        log.push_error(String::new());
        assert!(log.is_empty());
    }

    #[test]
    fn test_lines_are_timestamped() {
        let mut log = LogBuffer::new();
        log.push("Refreshed");
        let rendered = log.lines()[0].to_string();
        assert!(rendered.starts_with('['));
        assert!(rendered.ends_with("] Refreshed"));
    }

    #[test]
    fn test_levels_and_drain() {
        let mut log = LogBuffer::new();
        log.extend(["a", "b"]);
        log.push_error("boom");
        assert_eq!(log.len(), 3);
        assert!(log.contains("boom"));
        assert_eq!(log.lines()[2].level, LogLevel::Error);

        let drained = log.drain();
        assert_eq!(drained.len(), 3);
        assert!(log.is_empty());
    }
}
