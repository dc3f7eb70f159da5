//! Session recordings for diagnostics.
//!
//! A [`SessionRecorder`] collects what happened on a session (logins, command
//! exchanges, prompt fallbacks, optionally every raw chunk) and exports it as
//! JSON lines. Normalized recordings drop volatile noise so they can be kept
//! as test fixtures and compared.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::PromptStrategy;
use crate::error::PollError;

/// How much a recorder keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionRecordLevel {
    Off,
    #[default]
    KeyEventsOnly,
    /// Key events plus every chunk read from the transport.
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    /// Milliseconds since the Unix epoch.
    pub ts_ms: u128,
    pub event: SessionEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    ConnectionEstablished {
        device_addr: String,
        hostname: String,
        prompt: String,
    },
    ConnectionClosed {
        reason: String,
        #[serde(default)]
        prompt_before: Option<String>,
    },
    CommandOutput {
        command: String,
        #[serde(default)]
        prompt_before: Option<String>,
        #[serde(default)]
        prompt_after: Option<String>,
        success: bool,
        content: String,
        /// Everything received, echo and prompt included.
        all: String,
    },
    /// The exact prompt was not seen in time and a later strategy took over.
    PromptFallback {
        command: String,
        strategy: PromptStrategy,
    },
    PromptChanged {
        prompt: String,
    },
    RawChunk {
        data: String,
    },
}

impl SessionEvent {
    fn is_raw(&self) -> bool {
        matches!(self, SessionEvent::RawChunk { .. })
    }
}

/// Which event kinds survive [`SessionRecorder::normalize_jsonl`].
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    pub keep_raw_chunks: bool,
    pub keep_prompt_changed: bool,
    pub keep_prompt_fallbacks: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            keep_raw_chunks: false,
            keep_prompt_changed: false,
            keep_prompt_fallbacks: true,
        }
    }
}

impl NormalizeOptions {
    fn keeps(&self, event: &SessionEvent) -> bool {
        match event {
            SessionEvent::RawChunk { .. } => self.keep_raw_chunks,
            SessionEvent::PromptChanged { .. } => self.keep_prompt_changed,
            SessionEvent::PromptFallback { .. } => self.keep_prompt_fallbacks,
            _ => true,
        }
    }
}

/// Shared, append-only event log. Clones record into the same log.
#[derive(Debug, Clone, Default)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    entries: Arc<Mutex<Vec<SessionRecordEntry>>>,
}

fn epoch_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn parse_lines(jsonl: &str) -> Result<Vec<SessionRecordEntry>, PollError> {
    jsonl
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(PollError::from))
        .collect()
}

fn write_lines(entries: &[SessionRecordEntry]) -> Result<String, PollError> {
    let lines = entries
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lines.join("\n"))
}

impl SessionRecorder {
    pub fn new(level: SessionRecordLevel) -> Self {
        Self {
            level,
            entries: Arc::default(),
        }
    }

    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SessionRecordEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn record_event(&self, event: SessionEvent) {
        let wanted = if event.is_raw() {
            SessionRecordLevel::Full
        } else {
            SessionRecordLevel::KeyEventsOnly
        };
        if self.level < wanted {
            return;
        }
        self.lock().push(SessionRecordEntry {
            ts_ms: epoch_ms(),
            event,
        });
    }

    pub fn record_raw_chunk(&self, data: impl Into<String>) {
        if self.level == SessionRecordLevel::Full {
            self.record_event(SessionEvent::RawChunk { data: data.into() });
        }
    }

    pub fn entries(&self) -> Vec<SessionRecordEntry> {
        self.lock().clone()
    }

    /// Strategies that had to take over from the exact prompt, in order.
    pub fn prompt_fallbacks(&self) -> Vec<(String, PromptStrategy)> {
        self.lock()
            .iter()
            .filter_map(|entry| match &entry.event {
                SessionEvent::PromptFallback { command, strategy } => {
                    Some((command.clone(), *strategy))
                }
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn to_jsonl(&self) -> Result<String, PollError> {
        write_lines(&self.lock())
    }

    /// Loads a recording; blank lines are skipped.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, PollError> {
        let recorder = Self::new(SessionRecordLevel::Full);
        *recorder.lock() = parse_lines(jsonl)?;
        Ok(recorder)
    }

    /// Orders a recording by timestamp (stable for equal stamps) and drops
    /// the event kinds `options` does not keep.
    pub fn normalize_jsonl(jsonl: &str, options: NormalizeOptions) -> Result<String, PollError> {
        let mut entries = parse_lines(jsonl)?;
        entries.sort_by_key(|entry| entry.ts_ms);
        entries.retain(|entry| options.keeps(&entry.event));
        write_lines(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNORDERED: &str = r#"{"ts_ms":3,"event":{"kind":"raw_chunk","data":"sw1#"}}
{"ts_ms":1,"event":{"kind":"connection_established","device_addr":"admin@10.0.0.1:22","hostname":"sw1","prompt":"sw1#"}}

{"ts_ms":2,"event":{"kind":"prompt_changed","prompt":"sw1(config)#"}}
{"ts_ms":4,"event":{"kind":"prompt_fallback","command":"show version","strategy":"nudge"}}
{"ts_ms":4,"event":{"kind":"command_output","command":"show version","success":true,"content":"ok","all":"show version\nok\nsw1#"}}
"#;

    #[test]
    fn levels_filter_events() {
        let off = SessionRecorder::new(SessionRecordLevel::Off);
        off.record_event(SessionEvent::PromptChanged {
            prompt: "sw1#".to_string(),
        });
        assert!(off.entries().is_empty());

        let key = SessionRecorder::default();
        key.record_raw_chunk("sw1#");
        key.record_event(SessionEvent::RawChunk {
            data: "sw1#".to_string(),
        });
        key.record_event(SessionEvent::PromptChanged {
            prompt: "sw1#".to_string(),
        });
        assert_eq!(key.entries().len(), 1);

        let full = SessionRecorder::new(SessionRecordLevel::Full);
        full.record_raw_chunk("sw1#");
        assert_eq!(full.entries().len(), 1);
    }

    #[test]
    fn clones_share_the_log() {
        let recorder = SessionRecorder::default();
        let worker_side = recorder.clone();
        worker_side.record_event(SessionEvent::PromptFallback {
            command: "show clock".to_string(),
            strategy: PromptStrategy::Generic,
        });
        assert_eq!(
            recorder.prompt_fallbacks(),
            vec![("show clock".to_string(), PromptStrategy::Generic)]
        );

        let jsonl = recorder.to_jsonl().expect("encode");
        assert!(jsonl.contains(r#""kind":"prompt_fallback""#));
        assert!(jsonl.contains(r#""strategy":"generic""#));
    }

    #[test]
    fn garbage_is_a_json_error() {
        let err = SessionRecorder::from_jsonl("{not json}").expect_err("garbage");
        assert!(matches!(err, PollError::Json(_)));
    }

    #[test]
    fn normalize_sorts_and_drops_noise() {
        let normalized = SessionRecorder::normalize_jsonl(UNORDERED, NormalizeOptions::default())
            .expect("normalize");
        let entries = SessionRecorder::from_jsonl(&normalized)
            .expect("reload")
            .entries();

        let kinds: Vec<&str> = entries
            .iter()
            .map(|entry| match entry.event {
                SessionEvent::ConnectionEstablished { .. } => "established",
                SessionEvent::PromptFallback { .. } => "fallback",
                SessionEvent::CommandOutput { .. } => "output",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, ["established", "fallback", "output"]);

        let everything = NormalizeOptions {
            keep_raw_chunks: true,
            keep_prompt_changed: true,
            keep_prompt_fallbacks: true,
        };
        let kept = SessionRecorder::normalize_jsonl(UNORDERED, everything).expect("normalize");
        assert_eq!(kept.lines().count(), 5);
    }
}
