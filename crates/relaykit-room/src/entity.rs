//! Replicated entities.

use relaykit_codec::OwnedChunk;
use relaykit_protocol::messages::SpawnEntityCommand;
use relaykit_protocol::{ClientId, EntityId, EntityType, PersistenceFlags};

/// One spawned entity.
///
/// The entity is stored as its current spawn record. Every ownership or
/// attribute change replaces the record with an updated copy, and the
/// same record is what late joiners replay from the message buffer.
#[derive(Debug, Clone)]
pub struct Entity {
    spawn: SpawnEntityCommand,
}

impl Entity {
    pub(crate) fn new(spawn: SpawnEntityCommand) -> Self {
        Self { spawn }
    }

    pub fn id(&self) -> EntityId {
        self.spawn.entity
    }

    /// The owning client, or `None` for master-owned entities.
    pub fn owner(&self) -> Option<ClientId> {
        self.spawn.owner
    }

    /// The owner, with master-owned entities attributed to `master`.
    pub fn effective_owner(&self, master: Option<ClientId>) -> Option<ClientId> {
        if self.is_master_owned() {
            master
        } else {
            self.spawn.owner
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.spawn.entity_type
    }

    pub fn is_master_owned(&self) -> bool {
        self.spawn.entity_type.is_master_owned()
    }

    pub fn persistence(&self) -> PersistenceFlags {
        self.spawn.persistence
    }

    pub fn attributes(&self) -> &OwnedChunk {
        &self.spawn.attributes
    }

    pub fn spawn(&self) -> &SpawnEntityCommand {
        &self.spawn
    }

    pub(crate) fn transfer(&mut self, owner: ClientId) {
        self.spawn = self.spawn.with_owner(Some(owner));
    }

    pub(crate) fn make_orphan(&mut self) {
        self.spawn = self.spawn.with_type(EntityType::Orphan);
    }

    pub(crate) fn set_attributes(&mut self, attributes: OwnedChunk) {
        self.spawn = self.spawn.with_attributes(attributes);
    }
}
