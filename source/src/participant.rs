use crate::source::RawMessage;
use chrono::{
    DateTime,
    Utc,
};
use std::collections::HashMap;

/// A chat participant as first seen. First write wins: fields are never
/// updated after the participant enters the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Stable identity within a session. The channel id when the transport
    /// provides one, otherwise synthesized from the display name.
    pub key: String,
    pub display_name: String,
    pub profile_url: String,
    pub first_seen: DateTime<Utc>,
}

impl Participant {
    /// Derive a participant draft from a raw message. Total: missing
    /// optional fields become empty strings. Authors without a channel id
    /// get the key `no_id_<display name>`, so two id-less authors sharing a
    /// display name collapse into one participant. That is intentional.
    pub fn from_message(message: &RawMessage) -> Self {
        let key = match message.author_channel_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("no_id_{}", message.author_name),
        };

        Self {
            key,
            display_name: message.author_name.clone(),
            profile_url: message.author_profile_url.clone().unwrap_or_default(),
            first_seen: Utc::now(),
        }
    }
}

/// Session-scoped set of known participants, keyed by identity. Strictly
/// additive: nothing is ever removed or overwritten, so the size only
/// grows, reconnects included.
#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    by_key: HashMap<String, Participant>,
    order: Vec<String>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// Insert unless the key is already present. Returns whether the
    /// participant was newly inserted; an existing entry is left untouched.
    pub fn insert_if_absent(&mut self, participant: Participant) -> bool {
        if self.by_key.contains_key(&participant.key) {
            return false;
        }
        self.order.push(participant.key.clone());
        self.by_key.insert(participant.key.clone(), participant);
        true
    }

    /// Defensive copy of all participants in insertion order, safe to hand
    /// out while inserts continue.
    pub fn snapshot(&self) -> Vec<Participant> {
        self.order.iter().map(|key| self.by_key[key].clone()).collect()
    }

    pub fn get(&self, key: &str) -> Option<&Participant> {
        self.by_key.get(key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
