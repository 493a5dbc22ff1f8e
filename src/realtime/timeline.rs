//! Client-side view of one conversation with optimistic sends.
//!
//! A client shows a message as soon as it is typed, under a `temp-` id, and
//! swaps it for the server copy when `receive_message` echoes it back. The
//! echo carries the `client_id` the client chose, which is the primary match.
//! Servers that do not echo ids fall back to the older heuristic: same sender,
//! and either the same body within a few seconds or both carrying media.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::data::model::Message;

/// Maximum clock distance for the fallback match.
pub const RECONCILE_WINDOW_SECS: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryId {
    Temp(String),
    Server(i64),
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryId::Temp(client_id) => write!(f, "temp-{client_id}"),
            EntryId::Server(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub id: EntryId,
    pub client_id: Option<String>,
    pub sender_id: i64,
    pub body: Option<String>,
    pub media_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub delivered: bool,
    pub read: bool,
}

impl TimelineEntry {
    fn is_pending(&self) -> bool {
        matches!(self.id, EntryId::Temp(_))
    }

    fn from_message(message: &Message) -> Self {
        Self {
            id: EntryId::Server(message.id),
            client_id: message.client_id.clone(),
            sender_id: message.sender_id,
            body: message.body.clone(),
            media_url: message.media_url.clone(),
            created_at: message.created_at,
            delivered: message.is_delivered(),
            read: message.is_read(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    ReplacedPending,
    Updated,
    Appended,
}

#[derive(Debug, Default)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn push_optimistic(
        &mut self,
        client_id: impl Into<String>,
        sender_id: i64,
        body: Option<String>,
        media_url: Option<String>,
        at: DateTime<Utc>,
    ) -> EntryId {
        let client_id = client_id.into();
        let id = EntryId::Temp(client_id.clone());
        self.insert_sorted(TimelineEntry {
            id: id.clone(),
            client_id: Some(client_id),
            sender_id,
            body,
            media_url,
            created_at: at,
            delivered: false,
            read: false,
        });
        id
    }

    /// Merges a message received from the server.
    pub fn apply_server(&mut self, message: &Message) -> Reconciled {
        let incoming = TimelineEntry::from_message(message);

        if let Some(client_id) = &message.client_id {
            if let Some(index) = self
                .entries
                .iter()
                .position(|e| e.is_pending() && e.client_id.as_ref() == Some(client_id))
            {
                // The same message may already be listed from an earlier copy
                // without a client id.
                if let Some(known) = self.entries.iter().position(|e| e.id == incoming.id) {
                    self.entries[known] = incoming;
                    self.entries.remove(index);
                } else {
                    self.replace(index, incoming);
                }
                return Reconciled::ReplacedPending;
            }
        }

        if let Some(index) = self.entries.iter().position(|e| e.id == incoming.id) {
            self.replace(index, incoming);
            return Reconciled::Updated;
        }

        if let Some(index) = self.heuristic_match(&incoming) {
            self.replace(index, incoming);
            return Reconciled::ReplacedPending;
        }

        self.insert_sorted(incoming);
        Reconciled::Appended
    }

    pub fn mark_delivered(&mut self, message_id: i64) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.id == EntryId::Server(message_id))
        {
            entry.delivered = true;
        }
    }

    pub fn mark_read(&mut self, message_ids: &[i64]) {
        for entry in &mut self.entries {
            if let EntryId::Server(id) = entry.id {
                if message_ids.contains(&id) {
                    entry.read = true;
                    entry.delivered = true;
                }
            }
        }
    }

    fn heuristic_match(&self, incoming: &TimelineEntry) -> Option<usize> {
        let window_ms = RECONCILE_WINDOW_SECS * 1000;
        self.entries.iter().position(|e| {
            if !e.is_pending() || e.sender_id != incoming.sender_id {
                return false;
            }
            let close_in_time = (incoming.created_at - e.created_at).num_milliseconds().abs() < window_ms;
            let same_text = e.body.is_some() && e.body == incoming.body;
            let both_media = e.media_url.is_some() && incoming.media_url.is_some();
            close_in_time && (same_text || both_media)
        })
    }

    fn replace(&mut self, index: usize, entry: TimelineEntry) {
        self.entries.remove(index);
        self.insert_sorted(entry);
    }

    fn insert_sorted(&mut self, entry: TimelineEntry) {
        let at = self
            .entries
            .partition_point(|e| e.created_at <= entry.created_at);
        self.entries.insert(at, entry);
    }
}
