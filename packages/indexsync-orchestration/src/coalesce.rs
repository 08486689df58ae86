//! Event coalescing and mime type filtering

use indexsync_core::config::TrackingConfig;
use indexsync_storage::{ChangeEvent, ChangeType};
use std::collections::{HashMap, HashSet};

/// Last relevant event of an object within one page, plus the sequence range it stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoalescedChange {
    pub event: ChangeEvent,
    /// Lowest sequence among the events this change replaces
    pub first_sequence: u64,
    /// Highest sequence among them
    pub last_sequence: u64,
}

impl CoalescedChange {
    pub fn object_id(&self) -> &str {
        &self.event.object_id
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }
}

/// Keep only the last event per object, ordered by the object's last sequence.
///
/// A security change never hides an earlier content change of the same object.
///
/// Returns the changes and the number of superseded events.
pub fn coalesce(events: Vec<ChangeEvent>) -> (Vec<CoalescedChange>, usize) {
    let total = events.len();
    let mut by_object: HashMap<String, CoalescedChange> = HashMap::with_capacity(total);

    for event in events {
        match by_object.get_mut(&event.object_id) {
            Some(existing) => {
                existing.first_sequence = existing.first_sequence.min(event.sequence);
                if event.sequence >= existing.last_sequence {
                    existing.last_sequence = event.sequence;
                    let security_only = event.change_type == ChangeType::SecurityChanged
                        && existing.event.change_type != ChangeType::SecurityChanged;
                    if !security_only {
                        existing.event = event;
                    }
                }
            }
            None => {
                by_object.insert(
                    event.object_id.clone(),
                    CoalescedChange {
                        first_sequence: event.sequence,
                        last_sequence: event.sequence,
                        event,
                    },
                );
            }
        }
    }

    let mut changes = by_object.into_values().collect::<Vec<_>>();
    changes.sort_by_key(|c| c.last_sequence);
    let superseded = total - changes.len();
    (changes, superseded)
}

/// Comma-separated mime allow-list. An empty list allows everything.
#[derive(Debug, Clone, Default)]
pub struct MimeTypeFilter {
    allowed: HashSet<String>,
    allow_missing: bool,
}

impl MimeTypeFilter {
    pub fn new<I, S>(allowed: I, allow_missing: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(|m| m.as_ref().trim().to_ascii_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
            allow_missing,
        }
    }

    pub fn from_config(config: &TrackingConfig) -> Self {
        Self::new(config.allowed_mime_types(), config.index_without_mime_type)
    }

    pub fn is_unrestricted(&self) -> bool {
        self.allowed.is_empty()
    }

    /// Parameters such as `; charset=utf-8` are ignored.
    pub fn allows(&self, mime_type: Option<&str>) -> bool {
        if self.allowed.is_empty() {
            return true;
        }
        match mime_type {
            Some(mime) => {
                let essence = mime.split(';').next().unwrap_or(mime).trim();
                self.allowed.contains(&essence.to_ascii_lowercase())
            }
            None => self.allow_missing,
        }
    }
}
