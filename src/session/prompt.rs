//! Prompt recognition strategies and output cleanup.
//!
//! After a command is written the session reads until it recognizes the
//! device prompt. Recognition escalates through [`PromptStrategy`] stages,
//! each with its own, strictly longer, read window. Later stages accept
//! anything an earlier stage would have accepted.

use std::time::Duration;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::dialect::CliDialect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PromptStrategy {
    /// The captured hostname prompt, in any mode, on the last line.
    Exact,
    /// The dialect's generic prompt shape on the last line.
    Generic,
    /// Write a bare newline, then look for the generic prompt.
    Nudge,
    /// Trimmed output ends with `#` or `>`.
    Loose,
}

const FALLBACKS: [PromptStrategy; 3] = [
    PromptStrategy::Generic,
    PromptStrategy::Nudge,
    PromptStrategy::Loose,
];

/// Ordered strategy stages with their read windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPlan {
    stages: Vec<(PromptStrategy, Duration)>,
}

impl PromptPlan {
    /// `Exact` gets `command_timeout`; the fallbacks take `fallback_secs` in
    /// order. A missing fallback window is the previous one plus
    /// `command_timeout`, and a window not longer than its predecessor is
    /// raised to one second more.
    pub fn new(command_timeout: Duration, fallback_secs: &[u64]) -> Self {
        let mut stages = Vec::with_capacity(FALLBACKS.len() + 1);
        stages.push((PromptStrategy::Exact, command_timeout));

        let mut previous = command_timeout;
        for (idx, strategy) in FALLBACKS.into_iter().enumerate() {
            let mut window = match fallback_secs.get(idx) {
                Some(secs) => Duration::from_secs(*secs),
                None => previous + command_timeout,
            };
            if window <= previous {
                window = previous + Duration::from_secs(1);
            }
            stages.push((strategy, window));
            previous = window;
        }
        Self { stages }
    }

    pub fn stages(&self) -> &[(PromptStrategy, Duration)] {
        &self.stages
    }

    /// Longest time a single exchange can take.
    pub fn total(&self) -> Duration {
        self.stages.iter().map(|(_, window)| *window).sum()
    }
}

/// Last line of the buffer, which is where a prompt appears.
pub fn last_line(buffer: &str) -> &str {
    let trimmed = buffer.trim_end_matches(['\r', '\n']);
    match trimmed.rfind('\n') {
        Some(pos) => trimmed[pos + 1..].trim_matches('\r'),
        None => trimmed.trim_matches('\r'),
    }
}

/// Byte offset of the first complete line that echoes `command`, usually
/// `<prompt><command>`.
pub fn echo_start(buffer: &str, command: &str) -> Option<usize> {
    let command = command.trim();
    if command.is_empty() {
        return Some(0);
    }
    let mut start = 0;
    for line in buffer.split_inclusive('\n') {
        if !line.ends_with('\n') {
            return None;
        }
        if line.trim_end().ends_with(command) {
            return Some(start);
        }
        start += line.len();
    }
    None
}

/// Checks a buffer against one strategy.
pub struct PromptMatcher<'a> {
    dialect: &'a CliDialect,
    exact: Option<&'a Regex>,
}

impl<'a> PromptMatcher<'a> {
    pub fn new(dialect: &'a CliDialect, exact: Option<&'a Regex>) -> Self {
        Self { dialect, exact }
    }

    pub fn recognizes(&self, strategy: PromptStrategy, buffer: &str) -> bool {
        if buffer.is_empty() {
            return false;
        }
        match strategy {
            PromptStrategy::Exact => self
                .exact
                .is_some_and(|exact| exact.is_match(last_line(buffer))),
            PromptStrategy::Generic | PromptStrategy::Nudge => {
                self.dialect.is_prompt(last_line(buffer))
            }
            PromptStrategy::Loose => {
                let trimmed = buffer.trim_end();
                trimmed.ends_with('#') || trimmed.ends_with('>')
            }
        }
    }

    /// True when any of `strategies` recognizes the buffer.
    pub fn recognizes_any(&self, strategies: &[PromptStrategy], buffer: &str) -> bool {
        strategies.iter().any(|s| self.recognizes(*s, buffer))
    }
}

/// Strips the command echo, paging debris and the trailing prompt.
pub fn clean_output(raw: &str, command: &str, dialect: &CliDialect) -> String {
    let text = raw.replace("\r\n", "\n").replace(['\r', '\x08'], "");
    let text = dialect.strip_more(&text);
    let mut lines: Vec<&str> = text.lines().collect();

    if let Some(first) = lines.first()
        && !command.is_empty()
        && first.trim_end().ends_with(command)
    {
        lines.remove(0);
    }

    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }
    if let Some(last) = lines.last() {
        let last = last.trim();
        if dialect.is_prompt(last) || last.ends_with('#') || last.ends_with('>') {
            lines.pop();
        }
    }

    while lines.first().is_some_and(|line| line.trim().is_empty()) {
        lines.remove(0);
    }
    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialect() -> CliDialect {
        CliDialect::cisco_ios().expect("dialect")
    }

    #[test]
    fn default_plan_escalates() {
        let plan = PromptPlan::new(Duration::from_secs(30), &[60, 90, 120]);
        let stages = plan.stages();
        assert_eq!(stages[0], (PromptStrategy::Exact, Duration::from_secs(30)));
        assert_eq!(stages[1], (PromptStrategy::Generic, Duration::from_secs(60)));
        assert_eq!(stages[2], (PromptStrategy::Nudge, Duration::from_secs(90)));
        assert_eq!(stages[3], (PromptStrategy::Loose, Duration::from_secs(120)));
        assert_eq!(plan.total(), Duration::from_secs(300));
    }

    #[test]
    fn windows_are_forced_to_increase() {
        let plan = PromptPlan::new(Duration::from_secs(30), &[10, 10]);
        let windows: Vec<u64> = plan.stages().iter().map(|(_, w)| w.as_secs()).collect();
        assert_eq!(windows, vec![30, 31, 32, 62]);
    }

    #[test]
    fn strategies_accept_progressively_more() {
        let dialect = dialect();
        let exact = dialect.exact_prompt("Switch").expect("regex");
        let matcher = PromptMatcher::new(&dialect, Some(&exact));

        let own = "show clock\r\n*12:00:00\r\nSwitch#";
        let other = "show clock\r\n*12:00:00\r\nSwitch-2#";
        let odd = "show clock\r\n*12:00:00\r\n[admin@Switch ~]#";

        assert!(matcher.recognizes(PromptStrategy::Exact, own));
        assert!(!matcher.recognizes(PromptStrategy::Exact, other));
        assert!(matcher.recognizes(PromptStrategy::Generic, other));
        assert!(!matcher.recognizes(PromptStrategy::Generic, odd));
        assert!(matcher.recognizes(PromptStrategy::Loose, odd));
        assert!(!matcher.recognizes(PromptStrategy::Loose, "show clock\r\n"));
    }

    #[test]
    fn exact_needs_a_captured_hostname() {
        let dialect = dialect();
        let matcher = PromptMatcher::new(&dialect, None);
        assert!(!matcher.recognizes(PromptStrategy::Exact, "Switch#"));
        assert!(matcher.recognizes_any(&[PromptStrategy::Exact, PromptStrategy::Generic], "Switch#"));
    }

    #[test]
    fn cleaning_removes_echo_and_prompt() {
        let raw = "show clock\r\n*12:00:00.000 UTC Sat Oct 17 2026\r\nSwitch#";
        assert_eq!(
            clean_output(raw, "show clock", &dialect()),
            "*12:00:00.000 UTC Sat Oct 17 2026"
        );
    }

    #[test]
    fn cleaning_handles_paging_and_nudge_newlines() {
        let raw = "show mac\r\nline one\r\n --More-- \x08\x08\x08\x08\x08\x08\x08\x08\x08\x08line two\r\n\r\nSwitch#";
        assert_eq!(clean_output(raw, "show mac", &dialect()), "line one\nline two");
    }

    #[test]
    fn echo_start_skips_a_late_reply() {
        let late = "*12:00:00.000 UTC\r\nSwitch#\r\n";
        let buffer = format!("{late}Switch#show version\r\nCisco IOS\r\nSwitch#");
        assert_eq!(echo_start(&buffer, "show version"), Some(late.len()));
        assert_eq!(echo_start(late, "show version"), None);
        // The echo only counts once its line is complete.
        assert_eq!(echo_start("Switch#show ver", "show version"), None);
        assert_eq!(echo_start("show version\r\n", "show version"), Some(0));
    }

    #[test]
    fn last_line_skips_trailing_newlines() {
        assert_eq!(last_line("a\r\nSwitch#\r\n"), "Switch#");
        assert_eq!(last_line("Switch>"), "Switch>");
    }
}
