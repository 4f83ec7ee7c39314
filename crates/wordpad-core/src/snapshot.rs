//! Draft persistence: the snapshot record, its debounced writer and the "last saved" indicator.

use std::cell::Cell;
use std::fmt::{self, Write as _};
use std::rc::Rc;

use chrono::{DateTime, FixedOffset, Offset, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::EditorConfig;
use crate::storage::KeyValueStore;

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable clock; clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.now.set(now);
    }

    pub fn advance(&self, by: TimeDelta) {
        let next = self
            .now
            .get()
            .checked_add_signed(by)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.now.set(next);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("draft record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("draft record is not a JSON object")]
    NotAnObject,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    pub title: String,
    pub author: String,
    pub content: String,
    pub saved_at: Option<DateTime<Utc>>,
}

impl DocumentSnapshot {
    pub fn new(
        title: impl Into<String>,
        author: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            content: content.into(),
            saved_at: None,
        }
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Reads a stored record. Fields that are missing or of the wrong type fall back to
    /// empty values; only input that is not a JSON object is an error.
    pub fn from_json(raw: &str) -> Result<Self, SnapshotError> {
        let Value::Object(map) = serde_json::from_str::<Value>(raw)? else {
            return Err(SnapshotError::NotAnObject);
        };
        let text = |key: &str| {
            map.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let saved_at = match map.get("savedAt") {
            Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            Some(Value::Number(n)) => n.as_i64().and_then(DateTime::from_timestamp_millis),
            _ => None,
        };
        Ok(Self {
            title: text("title"),
            author: text("author"),
            content: text("content"),
            saved_at,
        })
    }
}

/// The user-visible "last saved" line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveIndicator {
    saved_at: Option<DateTime<Utc>>,
    format: String,
    offset: FixedOffset,
    never_saved_label: String,
}

impl SaveIndicator {
    pub fn from_config(config: &EditorConfig) -> Self {
        let offset = config
            .indicator_utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix());
        Self {
            saved_at: None,
            format: config.indicator_format.clone(),
            offset,
            never_saved_label: config.never_saved_label.clone(),
        }
    }

    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        self.saved_at
    }

    pub fn set_saved(&mut self, at: DateTime<Utc>) {
        self.saved_at = Some(at);
    }

    pub fn reset(&mut self) {
        self.saved_at = None;
    }

    pub fn text(&self) -> String {
        let Some(at) = self.saved_at else {
            return self.never_saved_label.clone();
        };
        let local = at.with_timezone(&self.offset);
        let mut out = String::new();
        match write!(out, "{}", local.format(&self.format)) {
            Ok(()) => out,
            Err(_) => {
                warn!("Invalid indicator format {:?}", self.format);
                local.to_rfc3339()
            }
        }
    }
}

impl fmt::Display for SaveIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

/// The single outstanding debounced save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSave {
    pub deadline: DateTime<Utc>,
}

/// Persists one draft record under a fixed key, coalescing bursts of edits into one write.
pub struct DocumentSnapshotStore {
    backend: Box<dyn KeyValueStore>,
    key: String,
    delay: TimeDelta,
    pending: Option<PendingSave>,
}

impl DocumentSnapshotStore {
    pub fn new(backend: Box<dyn KeyValueStore>, config: &EditorConfig) -> Self {
        Self {
            backend,
            key: config.autosave_key.clone(),
            delay: config.autosave_delay(),
            pending: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn delay(&self) -> TimeDelta {
        self.delay
    }

    /// Restarts the quiet period: any pending save is replaced by one due `delay` after `now`.
    pub fn schedule_save(&mut self, now: DateTime<Utc>) {
        let deadline = now
            .checked_add_signed(self.delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if self.pending.replace(PendingSave { deadline }).is_some() {
            debug!("Rescheduled draft save for {deadline}");
        } else {
            debug!("Scheduled draft save for {deadline}");
        }
    }

    pub fn pending(&self) -> Option<PendingSave> {
        self.pending
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Consumes the pending save if its deadline has passed.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> bool {
        match self.pending {
            Some(pending) if now >= pending.deadline => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel_pending(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Writes `fields` stamped with `now`. Failures are logged and leave the indicator as it
    /// was.
    pub fn save(
        &mut self,
        fields: &DocumentSnapshot,
        now: DateTime<Utc>,
        indicator: &mut SaveIndicator,
    ) -> bool {
        self.pending = None;
        let record = DocumentSnapshot {
            saved_at: Some(now),
            ..fields.clone()
        };
        let json = match record.to_json() {
            Ok(json) => json,
            Err(err) => {
                warn!("Failed to serialize draft: {err}");
                return false;
            }
        };
        if let Err(err) = self.backend.set(&self.key, &json) {
            warn!("Failed to save draft: {err}");
            return false;
        }
        indicator.set_saved(now);
        debug!("Saved draft under {} ({} bytes)", self.key, json.len());
        true
    }

    /// The stored record, if there is one.
    pub fn load(&self) -> Result<Option<DocumentSnapshot>, SnapshotError> {
        self.backend
            .get(&self.key)
            .map(|raw| DocumentSnapshot::from_json(&raw))
            .transpose()
    }

    /// Reads the stored record for startup. Absent or malformed records yield an empty
    /// snapshot.
    pub fn restore(&self, indicator: &mut SaveIndicator) -> DocumentSnapshot {
        match self.load() {
            Ok(Some(snapshot)) => {
                match snapshot.saved_at {
                    Some(at) => indicator.set_saved(at),
                    None => indicator.reset(),
                }
                snapshot
            }
            Ok(None) => {
                indicator.reset();
                DocumentSnapshot::default()
            }
            Err(err) => {
                warn!("Ignoring malformed draft under {}: {err}", self.key);
                indicator.reset();
                DocumentSnapshot::default()
            }
        }
    }

    /// Removes the stored record and any pending save.
    pub fn clear(&mut self, indicator: &mut SaveIndicator) -> bool {
        self.pending = None;
        indicator.reset();
        match self.backend.remove(&self.key) {
            Ok(()) => true,
            Err(err) => {
                warn!("Failed to remove draft: {err}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn record_uses_camel_case_and_rfc3339() {
        let snapshot = DocumentSnapshot {
            saved_at: Some(at(0)),
            ..DocumentSnapshot::new("T", "A", "<p>x</p>")
        };
        assert_eq!(
            snapshot.to_json().unwrap(),
            r#"{"title":"T","author":"A","content":"<p>x</p>","savedAt":"1970-01-01T00:00:00Z"}"#
        );
    }

    #[test]
    fn from_json_defaults_missing_and_mistyped_fields() {
        let snapshot = DocumentSnapshot::from_json(r#"{"title":42,"content":"<p>x</p>"}"#).unwrap();
        assert_eq!(snapshot, DocumentSnapshot::new("", "", "<p>x</p>"));

        let millis = DocumentSnapshot::from_json(r#"{"savedAt":1000}"#).unwrap();
        assert_eq!(millis.saved_at, Some(at(1)));

        assert!(matches!(
            DocumentSnapshot::from_json("[1,2]"),
            Err(SnapshotError::NotAnObject)
        ));
        assert!(DocumentSnapshot::from_json("not json").is_err());
    }

    #[test]
    fn indicator_formats_with_offset() {
        let config = EditorConfig {
            indicator_utc_offset_minutes: 90,
            ..EditorConfig::default()
        };
        let mut indicator = SaveIndicator::from_config(&config);
        assert_eq!(indicator.text(), "Not saved yet");
        indicator.set_saved(at(0));
        assert_eq!(indicator.to_string(), "Saved at 01:30:00");
        indicator.reset();
        assert_eq!(indicator.saved_at(), None);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(at(10));
        let other = clock.clone();
        clock.advance(TimeDelta::seconds(5));
        assert_eq!(other.now(), at(15));
    }
}
