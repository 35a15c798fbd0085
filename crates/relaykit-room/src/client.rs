//! Registered clients.

use std::collections::{BTreeSet, HashSet};

use relaykit_protocol::{ClientId, ClientInfo, ClientProfile, EntityId};
use relaykit_transport::ConnectionId;

/// A client that completed registration.
///
/// `ready` flips once the room snapshot has been flushed to the client.
/// Until then everything addressed to it queues behind the snapshot.
#[derive(Debug)]
pub struct Client {
    id: ClientId,
    conn: ConnectionId,
    profile: ClientProfile,
    ready: bool,
    groups: HashSet<String>,
    owned: BTreeSet<EntityId>,
}

impl Client {
    pub(crate) fn new(id: ClientId, conn: ConnectionId, profile: ClientProfile) -> Self {
        Self {
            id,
            conn,
            profile,
            ready: false,
            groups: HashSet::new(),
            owned: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn conn(&self) -> ConnectionId {
        self.conn
    }

    pub fn profile(&self) -> &ClientProfile {
        &self.profile
    }

    pub fn info(&self) -> ClientInfo {
        ClientInfo {
            id: self.id,
            profile: self.profile.clone(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    /// Dynamic entities this client owns.
    pub fn owned(&self) -> &BTreeSet<EntityId> {
        &self.owned
    }

    pub(crate) fn set_profile(&mut self, profile: ClientProfile) {
        self.profile = profile;
    }

    pub(crate) fn mark_ready(&mut self) -> bool {
        !std::mem::replace(&mut self.ready, true)
    }

    pub(crate) fn join_group(&mut self, group: String) -> bool {
        self.groups.insert(group)
    }

    pub(crate) fn leave_group(&mut self, group: &str) -> bool {
        self.groups.remove(group)
    }

    pub(crate) fn own(&mut self, entity: EntityId) {
        self.owned.insert(entity);
    }

    pub(crate) fn disown(&mut self, entity: EntityId) {
        self.owned.remove(&entity);
    }
}
