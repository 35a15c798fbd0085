//! The message buffer replayed to late joiners.

use relaykit_protocol::{BehaviorId, EntityId, Envelope};

/// Identity of a buffered message, used for replacement and removal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BufferKey {
    Spawn(EntityId),
    Rpc {
        entity: EntityId,
        behavior: BehaviorId,
        method: String,
    },
    SyncVar {
        entity: EntityId,
        behavior: BehaviorId,
        name: String,
    },
}

impl BufferKey {
    pub fn entity(&self) -> EntityId {
        match self {
            Self::Spawn(entity) => *entity,
            Self::Rpc { entity, .. } | Self::SyncVar { entity, .. } => *entity,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    key: BufferKey,
    envelope: Envelope,
}

/// Ordered envelopes, replayed verbatim in insertion order.
///
/// Envelopes own their bytes, so nothing here points into a receive
/// buffer.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    entries: Vec<Entry>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends after everything buffered so far.
    pub fn push(&mut self, key: BufferKey, envelope: Envelope) {
        self.entries.push(Entry { key, envelope });
    }

    /// Drops every entry with `key`, then appends.
    pub fn replace(&mut self, key: BufferKey, envelope: Envelope) {
        self.entries.retain(|entry| entry.key != key);
        self.push(key, envelope);
    }

    /// Swaps the envelope of the first entry with `key`, keeping its
    /// position. Returns `false` if there is no such entry.
    pub fn rewrite(&mut self, key: &BufferKey, envelope: Envelope) -> bool {
        match self.entries.iter_mut().find(|entry| entry.key == *key) {
            Some(entry) => {
                entry.envelope = envelope;
                true
            }
            None => false,
        }
    }

    /// Removes every entry matching `predicate`; returns how many went.
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&BufferKey) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| !predicate(&entry.key));
        before - self.entries.len()
    }

    /// Removes the spawn record and every RPC or SyncVar of `entity`.
    pub fn remove_entity(&mut self, entity: EntityId) -> usize {
        self.remove_where(|key| key.entity() == entity)
    }

    pub fn envelopes(&self) -> impl Iterator<Item = &Envelope> {
        self.entries.iter().map(|entry| &entry.envelope)
    }

    pub fn keys(&self) -> impl Iterator<Item = &BufferKey> {
        self.entries.iter().map(|entry| &entry.key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
