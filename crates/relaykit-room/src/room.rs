//! The room state machine.
//!
//! A [`Room`] owns its connections, clients, entities and message buffer.
//! Nothing outside the room mutates them: transport tasks queue
//! [`RoomEvent`]s through a [`RoomHandle`] and the room applies them on
//! [`Room::tick`], one at a time, in arrival order. Everything the room
//! sends during a tick is collected per connection and flushed as one
//! batch at the end of the tick.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::RwLock;
use relaykit_codec::{BufferPool, CodecError};
use relaykit_protocol::messages::*;
use relaykit_protocol::{
    encode_batch_into, Authority, BehaviorId, ClientId, ClientMessage, EntityId, EntityType, Envelope,
    Payload, PayloadRegistry, PersistenceFlags, ProtocolError, RoomId, RoomInfo, RprResult,
};
use relaykit_transport::{ConnectionId, DeliveryMode, DisconnectCode};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::buffer::{BufferKey, MessageBuffer};
use crate::client::Client;
use crate::entity::Entity;
use crate::handle::{Outbound, OutboundSender, RoomEvent, RoomHandle, Shared};
use crate::id_pool::IdPool;
use crate::{MigrationPolicy, RoomConfig, RoomError, RoomState, RpcBinds};

/// Largest batch a room writes in one packet. Fits a UDP datagram.
pub const MAX_PACKET: usize = 60 * 1024;

/// Largest request envelope a client may send. The command relayed for it
/// adds a few bytes of addressing and must still fit in [`MAX_PACKET`].
pub const MAX_REQUEST: usize = MAX_PACKET - 1024;

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

/// Why a request was not applied. Logged, and reported back to the caller
/// when the request was a query.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Rejection {
    #[error("unknown client {0}")]
    UnknownClient(ClientId),
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),
    #[error("no bind for {name} on {behavior}")]
    MethodNotFound { behavior: BehaviorId, name: String },
    #[error("invalid arguments: {0}")]
    InvalidArguments(CodecError),
    #[error("sender does not hold {required:?}")]
    Unauthorized { required: Authority },
    #[error("only the master may do this")]
    NotMaster,
    #[error("entity {0} is master-owned")]
    MasterOwned(EntityId),
    #[error("handler failed: {0}")]
    Handler(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("{0}")]
    Invalid(&'static str),
}

impl Rejection {
    pub(crate) fn result(&self) -> RprResult {
        match self {
            Self::UnknownClient(_) => RprResult::InvalidClient,
            Self::UnknownEntity(_) => RprResult::InvalidEntity,
            Self::MethodNotFound { .. } => RprResult::MethodNotFound,
            Self::InvalidArguments(_) => RprResult::InvalidArguments,
            Self::Unauthorized { .. } | Self::NotMaster | Self::MasterOwned(_) => {
                RprResult::InvalidAuthority
            }
            Self::Handler(_) => RprResult::RuntimeException,
            Self::Protocol(_) | Self::Invalid(_) => RprResult::FatalFailure,
        }
    }
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// One open connection and what is waiting to be written to it.
#[derive(Debug)]
struct Peer {
    sink: OutboundSender,
    client: Option<ClientId>,
    outbox: Vec<Envelope>,
}

/// A query that reached its target and awaits the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingQuery {
    pub(crate) target: ClientId,
    pub(crate) entity: EntityId,
}

pub struct Room {
    id: RoomId,
    config: RoomConfig,
    state: RoomState,
    pub(crate) binds: Arc<RpcBinds>,
    registry: &'static PayloadRegistry,
    pool: Arc<BufferPool>,
    events: mpsc::UnboundedReceiver<RoomEvent>,
    shared: Arc<Shared>,
    started: Instant,
    connections: HashMap<ConnectionId, Peer>,
    pub(crate) clients: BTreeMap<ClientId, Client>,
    pub(crate) entities: BTreeMap<EntityId, Entity>,
    pub(crate) master: Option<ClientId>,
    pub(crate) buffer: MessageBuffer,
    /// Keyed by `(requester, channel)`.
    pub(crate) pending: HashMap<(ClientId, u32), PendingQuery>,
    client_ids: IdPool,
    entity_ids: IdPool,
    info_dirty: bool,
}

impl Room {
    /// Creates a room in the `Starting` state and the handle that feeds it.
    pub fn new(
        id: RoomId,
        config: RoomConfig,
        binds: Arc<RpcBinds>,
    ) -> Result<(Self, RoomHandle), RoomError> {
        Self::with_pool(id, config, binds, Arc::new(BufferPool::default()))
    }

    /// Like [`Room::new`], encoding through scratch buffers from `pool`,
    /// which may be shared with other rooms.
    pub fn with_pool(
        id: RoomId,
        config: RoomConfig,
        binds: Arc<RpcBinds>,
        pool: Arc<BufferPool>,
    ) -> Result<(Self, RoomHandle), RoomError> {
        config.validate()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut room = Self {
            id,
            client_ids: IdPool::new(1, u32::from(config.capacity)),
            entity_ids: IdPool::new(1, u32::MAX),
            config,
            state: RoomState::Starting,
            binds,
            registry: relaykit_protocol::global(),
            pool,
            events: rx,
            shared: Arc::new(Shared {
                info: RwLock::new(placeholder_info(id)),
                state: RwLock::new(RoomState::Starting),
            }),
            started: Instant::now(),
            connections: HashMap::new(),
            clients: BTreeMap::new(),
            entities: BTreeMap::new(),
            master: None,
            buffer: MessageBuffer::new(),
            pending: HashMap::new(),
            info_dirty: true,
        };
        room.publish();
        let handle = RoomHandle::new(id, tx, Arc::clone(&room.shared));
        info!(room = %id, name = %room.config.name, "room created");
        Ok((room, handle))
    }

    // -- accessors ----------------------------------------------------------

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn state(&self) -> RoomState {
        self.state
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn master(&self) -> Option<ClientId> {
        self.master
    }

    pub fn client(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    pub fn clients(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// The client an entity currently answers to.
    pub fn effective_owner(&self, id: EntityId) -> Option<ClientId> {
        self.entities.get(&id)?.effective_owner(self.master)
    }

    pub fn buffer(&self) -> &MessageBuffer {
        &self.buffer
    }

    pub fn pending_queries(&self) -> usize {
        self.pending.len()
    }

    /// Milliseconds since the room was created.
    pub fn server_time(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id,
            app_id: self.config.app_id.clone(),
            version: self.config.version.clone(),
            name: self.config.name.clone(),
            capacity: self.config.capacity,
            occupancy: self.clients.len() as u16,
            visibility: self.config.visibility,
            locked: self.config.locked,
            has_password: self.config.password.is_some(),
            attributes: self.config.attributes.clone(),
        }
    }

    // -- tick ---------------------------------------------------------------

    /// Applies the events queued before this call, then flushes outboxes.
    ///
    /// Events queued while the tick runs wait for the next one. Returns how
    /// many events were handled.
    pub fn tick(&mut self) -> usize {
        if self.state == RoomState::Starting {
            self.transition(RoomState::Running);
        }
        let budget = self.events.len();
        let mut handled = 0;
        while handled < budget && self.state != RoomState::Closed {
            let Ok(event) = self.events.try_recv() else {
                break;
            };
            handled += 1;
            self.handle_event(event);
        }
        self.flush();
        self.publish();
        if handled > 0 {
            trace!(room = %self.id, handled, "tick drained events");
        }
        handled
    }

    fn handle_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Connected { conn, sink } => self.on_connected(conn, sink),
            RoomEvent::Message { conn, envelopes } => self.on_message(conn, envelopes),
            RoomEvent::Disconnected { conn } => self.on_disconnected(conn),
            RoomEvent::Run(f) => f(self),
            RoomEvent::Shutdown => self.stop(DisconnectCode::ServerClosed),
        }
    }

    fn on_connected(&mut self, conn: ConnectionId, sink: OutboundSender) {
        if self.state != RoomState::Running || self.connections.contains_key(&conn) {
            let _ = sink.send(Outbound::Close(DisconnectCode::ConnectionRejected));
            return;
        }
        debug!(room = %self.id, %conn, "connection attached");
        self.connections.insert(
            conn,
            Peer {
                sink,
                client: None,
                outbox: Vec::new(),
            },
        );
    }

    fn on_message(&mut self, conn: ConnectionId, envelopes: Vec<Envelope>) {
        for envelope in &envelopes {
            let Some(peer) = self.connections.get(&conn) else {
                return;
            };
            if envelope.is_empty() {
                continue;
            }
            if envelope.encoded_len() > MAX_REQUEST {
                debug!(room = %self.id, %conn, len = envelope.encoded_len(), "oversized request");
                self.close_connection(conn, DisconnectCode::InvalidData);
                return;
            }
            let client = peer.client;
            let message = match ClientMessage::from_envelope(self.registry, envelope) {
                Ok(message) => message,
                Err(err) => {
                    debug!(room = %self.id, %conn, error = %err, "undecodable request");
                    self.close_connection(conn, DisconnectCode::InvalidData);
                    return;
                }
            };
            match client {
                Some(sender) => self.dispatch(sender, message),
                None => self.dispatch_unregistered(conn, message),
            }
        }
    }

    fn on_disconnected(&mut self, conn: ConnectionId) {
        let Some(peer) = self.connections.remove(&conn) else {
            return;
        };
        debug!(room = %self.id, %conn, "connection lost");
        if let Some(client) = peer.client {
            self.remove_client(client);
        }
    }

    fn dispatch_unregistered(&mut self, conn: ConnectionId, message: ClientMessage<'_>) {
        match message {
            ClientMessage::Register(request) => self.register(conn, request),
            ClientMessage::TimeSync(request) => {
                let response = self.time_sync(request);
                if let Ok(envelope) = self.encode(&response) {
                    self.push(conn, envelope);
                }
            }
            other => {
                debug!(room = %self.id, %conn, kind = ?other.kind(), "request before registration dropped");
            }
        }
    }

    fn dispatch(&mut self, sender: ClientId, message: ClientMessage<'_>) {
        let kind = message.kind();
        let result = match message {
            ClientMessage::Register(_) => Err(Rejection::Invalid("already registered")),
            ClientMessage::TimeSync(request) => {
                let response = self.time_sync(request);
                self.send_to(sender, &response)
            }
            ClientMessage::UpdateProfile(request) => self.update_profile(sender, request),
            ClientMessage::JoinGroup(request) => {
                if let Some(client) = self.clients.get_mut(&sender) {
                    client.join_group(request.group);
                }
                Ok(())
            }
            ClientMessage::LeaveGroup(request) => {
                if let Some(client) = self.clients.get_mut(&sender) {
                    client.leave_group(&request.group);
                }
                Ok(())
            }
            ClientMessage::ChangeMaster(request) => self.change_master(sender, request.client),
            ClientMessage::Kick(request) => self.kick(sender, request.client),
            ClientMessage::UpdateRoom(request) => self.update_room(sender, request),
            ClientMessage::Spawn(request) => self.spawn(sender, request),
            ClientMessage::Destroy(request) => self.destroy_request(sender, request.entity),
            ClientMessage::Takeover(request) => self.takeover(sender, request.entity),
            ClientMessage::Transfer(request) => {
                self.transfer(sender, request.entity, request.client)
            }
            ClientMessage::Orphan(request) => self.orphan_request(sender, request.entity),
            ClientMessage::UpdateAttributes(request) => self.update_attributes(sender, request),
            ClientMessage::Rpc(request) => self.rpc(sender, request),
            ClientMessage::Rpr(response) => self.rpr(sender, response),
            ClientMessage::SyncVar(request) => self.sync_var(sender, request),
        };
        if let Err(rejection) = result {
            debug!(room = %self.id, client = %sender, ?kind, reason = %rejection, "request rejected");
        }
    }

    // -- registration -------------------------------------------------------

    fn register(&mut self, conn: ConnectionId, request: RegisterClientRequest) {
        let refusal = if self.config.locked {
            Some(DisconnectCode::ConnectionRejected)
        } else if self.config.password.is_some() && request.password != self.config.password {
            Some(DisconnectCode::InvalidPassword)
        } else if self.clients.len() >= usize::from(self.config.capacity) {
            Some(DisconnectCode::RoomFull)
        } else {
            None
        };
        if let Some(code) = refusal {
            info!(room = %self.id, %conn, %code, "registration refused");
            self.close_connection(conn, code);
            return;
        }
        let Some(raw) = self.client_ids.reserve() else {
            self.close_connection(conn, DisconnectCode::RoomFull);
            return;
        };
        let id = ClientId(raw as u16);
        let client = Client::new(id, conn, request.profile);
        let joined = client.info();
        self.clients.insert(id, client);
        if let Some(peer) = self.connections.get_mut(&conn) {
            peer.client = Some(id);
        }
        let master = *self.master.get_or_insert(id);
        self.info_dirty = true;
        info!(room = %self.id, client = %id, %conn, name = %joined.profile.name, %master, "client registered");

        // Snapshot first; everything else for this client queues behind it.
        let response = RegisterClientResponse {
            client: id,
            master,
            clients: self.clients.values().map(Client::info).collect(),
            room: self.info(),
            time: self.time_sync(request.time_sync),
        };
        match self.encode(&response) {
            Ok(envelope) => self.push(conn, envelope),
            Err(err) => warn!(room = %self.id, client = %id, error = %err, "snapshot encode failed"),
        }
        let replay: Vec<Envelope> = self.buffer.envelopes().cloned().collect();
        for envelope in replay {
            self.push(conn, envelope);
        }

        let _ = self.broadcast(&ClientConnectedCommand { client: joined }, |c| c.id() != id);
    }

    fn time_sync(&self, request: TimeSyncRequest) -> TimeSyncResponse {
        TimeSyncResponse {
            client_time: request.client_time,
            server_time: self.server_time(),
        }
    }

    // -- leaving ------------------------------------------------------------

    /// Removes a client and everything that depends on it, then tells the
    /// others it left. A departing master is replaced first, so orphaned
    /// entities land with the new master. Everything goes out before the
    /// disconnect notice.
    fn remove_client(&mut self, id: ClientId) {
        let Some(client) = self.clients.remove(&id) else {
            return;
        };
        info!(room = %self.id, client = %id, "client left");

        if self.master == Some(id) {
            self.master = None;
            self.elect_master();
        }
        if self.state != RoomState::Running {
            self.client_ids.free(u32::from(id.0));
            return;
        }

        for entity in client.owned().iter().copied() {
            let keep = self
                .entities
                .get(&entity)
                .is_some_and(|e| e.persistence().contains(PersistenceFlags::ORPHAN_ON_LEAVE));
            if keep {
                self.orphan(entity);
            } else {
                self.destroy(entity);
            }
        }
        self.sweep_queries_for_client(id);
        self.client_ids.free(u32::from(id.0));
        self.info_dirty = true;
        let _ = self.broadcast(&ClientDisconnectedCommand { client: id }, |_| true);
    }

    fn elect_master(&mut self) {
        match self.config.migration {
            MigrationPolicy::Continue => match self.clients.keys().next().copied() {
                Some(next) => self.set_master(next),
                None => debug!(room = %self.id, "room empty, no master"),
            },
            MigrationPolicy::Stop => {
                info!(room = %self.id, "master left, stopping room");
                self.stop(DisconnectCode::MasterLeft);
            }
        }
    }

    fn set_master(&mut self, id: ClientId) {
        self.master = Some(id);
        info!(room = %self.id, master = %id, "master changed");
        let _ = self.broadcast(&ChangeMasterCommand { master: id }, |_| true);
    }

    /// Flushes what is queued for `conn`, closes it with `code` and removes
    /// its client.
    pub(crate) fn close_connection(&mut self, conn: ConnectionId, code: DisconnectCode) {
        let Some(mut peer) = self.connections.remove(&conn) else {
            return;
        };
        let outbox = std::mem::take(&mut peer.outbox);
        write_packets(&peer.sink, &outbox, &self.pool);
        let _ = peer.sink.send(Outbound::Close(code));
        debug!(room = %self.id, %conn, %code, "connection closed");
        if let Some(client) = peer.client {
            self.remove_client(client);
        }
    }

    /// Disconnects everyone with `code` and closes the room.
    pub fn stop(&mut self, code: DisconnectCode) {
        if !self.state.can_transition_to(RoomState::Stopping) {
            return;
        }
        self.transition(RoomState::Stopping);
        for (_, mut peer) in self.connections.drain() {
            let outbox = std::mem::take(&mut peer.outbox);
            write_packets(&peer.sink, &outbox, &self.pool);
            let _ = peer.sink.send(Outbound::Close(code));
        }
        self.clients.clear();
        self.entities.clear();
        self.buffer.clear();
        self.pending.clear();
        self.master = None;
        self.events.close();
        self.info_dirty = true;
        self.transition(RoomState::Closed);
    }

    // -- master tools -------------------------------------------------------

    fn require_master(&self, sender: ClientId) -> Result<(), Rejection> {
        if self.master == Some(sender) {
            Ok(())
        } else {
            Err(Rejection::NotMaster)
        }
    }

    fn change_master(&mut self, sender: ClientId, target: ClientId) -> Result<(), Rejection> {
        self.require_master(sender)?;
        if !self.clients.contains_key(&target) {
            return Err(Rejection::UnknownClient(target));
        }
        if target != sender {
            self.set_master(target);
        }
        Ok(())
    }

    fn kick(&mut self, sender: ClientId, target: ClientId) -> Result<(), Rejection> {
        self.require_master(sender)?;
        if target == sender {
            return Err(Rejection::Invalid("the master cannot kick itself"));
        }
        let conn = self
            .clients
            .get(&target)
            .map(Client::conn)
            .ok_or(Rejection::UnknownClient(target))?;
        info!(room = %self.id, client = %target, by = %sender, "client kicked");
        self.close_connection(conn, DisconnectCode::Kicked);
        Ok(())
    }

    fn update_room(&mut self, sender: ClientId, request: UpdateRoomRequest) -> Result<(), Rejection> {
        self.require_master(sender)?;
        if let Some(locked) = request.locked {
            self.config.locked = locked;
        }
        if let Some(visibility) = request.visibility {
            self.config.visibility = visibility;
        }
        if let Some(attributes) = request.attributes {
            self.config.attributes = attributes;
        }
        self.info_dirty = true;
        let room = self.info();
        self.broadcast(&RoomUpdatedCommand { room }, |_| true)?;
        Ok(())
    }

    fn update_profile(
        &mut self,
        sender: ClientId,
        request: UpdateProfileRequest,
    ) -> Result<(), Rejection> {
        let client = self
            .clients
            .get_mut(&sender)
            .ok_or(Rejection::UnknownClient(sender))?;
        client.set_profile(request.profile);
        let info = client.info();
        self.broadcast(&ClientProfileChangedCommand { client: info }, |_| true)?;
        Ok(())
    }

    // -- entities -----------------------------------------------------------

    /// What `sender` holds over `entity` (or over the room, without one).
    pub(crate) fn authority_of(&self, sender: ClientId, entity: Option<&Entity>) -> Authority {
        let mut held = Authority::ANY;
        if self.master == Some(sender) {
            held |= Authority::MASTER;
        }
        if entity.is_some_and(|e| e.effective_owner(self.master) == Some(sender)) {
            held |= Authority::OWNER;
        }
        held
    }

    /// Looks up `id` and checks `sender` holds owner or master authority.
    fn owned_entity(&self, sender: ClientId, id: EntityId) -> Result<&Entity, Rejection> {
        let entity = self.entities.get(&id).ok_or(Rejection::UnknownEntity(id))?;
        let required = Authority::OWNER | Authority::MASTER;
        if !required.allows(self.authority_of(sender, Some(entity))) {
            return Err(Rejection::Unauthorized { required });
        }
        Ok(entity)
    }

    fn spawn(&mut self, sender: ClientId, request: SpawnEntityRequest<'_>) -> Result<(), Rejection> {
        let owner = match request.entity_type {
            EntityType::Dynamic => Some(sender),
            EntityType::SceneObject => {
                self.require_master(sender)?;
                None
            }
            EntityType::Orphan => return Err(Rejection::Invalid("orphans cannot be spawned")),
        };
        let raw = self
            .entity_ids
            .reserve()
            .ok_or(Rejection::Invalid("entity ids exhausted"))?;
        let id = EntityId(raw);
        let command = SpawnEntityCommand {
            entity: id,
            owner,
            entity_type: request.entity_type,
            token: request.token,
            requester: sender,
            resource: request.resource,
            persistence: request.persistence,
            attributes: request.attributes.to_owned_chunk(),
        };
        let envelope = match self.broadcast(&command, |_| true) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.entity_ids.free(raw);
                return Err(err);
            }
        };
        self.buffer.push(BufferKey::Spawn(id), envelope);
        if let Some(owner) = owner.and_then(|o| self.clients.get_mut(&o)) {
            owner.own(id);
        }
        debug!(room = %self.id, entity = %id, by = %sender, kind = ?command.entity_type, "entity spawned");
        self.entities.insert(id, Entity::new(command));
        Ok(())
    }

    fn destroy_request(&mut self, sender: ClientId, id: EntityId) -> Result<(), Rejection> {
        self.owned_entity(sender, id)?;
        self.destroy(id);
        Ok(())
    }

    /// Removes an entity, its buffered records and its pending queries.
    fn destroy(&mut self, id: EntityId) {
        let Some(entity) = self.entities.remove(&id) else {
            return;
        };
        if let Some(owner) = entity.owner().and_then(|o| self.clients.get_mut(&o)) {
            owner.disown(id);
        }
        self.buffer.remove_entity(id);
        self.entity_ids.free(id.0);
        self.sweep_queries_for_entity(id);
        debug!(room = %self.id, entity = %id, "entity destroyed");
        let _ = self.broadcast(&DestroyEntityCommand { entity: id }, |_| true);
    }

    fn takeover(&mut self, sender: ClientId, id: EntityId) -> Result<(), Rejection> {
        self.transfer(sender, id, sender)
    }

    fn transfer(&mut self, sender: ClientId, id: EntityId, to: ClientId) -> Result<(), Rejection> {
        let entity = self.owned_entity(sender, id)?;
        if entity.is_master_owned() {
            return Err(Rejection::MasterOwned(id));
        }
        if !self.clients.contains_key(&to) {
            return Err(Rejection::UnknownClient(to));
        }
        let previous = entity.owner();
        if previous == Some(to) {
            return Ok(());
        }
        if let Some(old) = previous.and_then(|o| self.clients.get_mut(&o)) {
            old.disown(id);
        }
        if let Some(new) = self.clients.get_mut(&to) {
            new.own(id);
        }
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.transfer(to);
        }
        self.rebuffer_spawn(id);
        debug!(room = %self.id, entity = %id, owner = %to, "ownership changed");
        self.broadcast(&ChangeOwnerCommand { entity: id, owner: to }, |_| true)?;
        Ok(())
    }

    fn orphan_request(&mut self, sender: ClientId, id: EntityId) -> Result<(), Rejection> {
        if self.owned_entity(sender, id)?.is_master_owned() {
            return Err(Rejection::MasterOwned(id));
        }
        self.orphan(id);
        Ok(())
    }

    /// Hands a Dynamic entity to the master.
    fn orphan(&mut self, id: EntityId) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        let previous = entity.owner();
        entity.make_orphan();
        if let Some(old) = previous.and_then(|o| self.clients.get_mut(&o)) {
            old.disown(id);
        }
        self.rebuffer_spawn(id);
        debug!(room = %self.id, entity = %id, "entity orphaned");
        let _ = self.broadcast(&OrphanEntityCommand { entity: id }, |_| true);
    }

    fn update_attributes(
        &mut self,
        sender: ClientId,
        request: UpdateEntityAttributesRequest<'_>,
    ) -> Result<(), Rejection> {
        self.owned_entity(sender, request.entity)?;
        let attributes = request.attributes.to_owned_chunk();
        if let Some(entity) = self.entities.get_mut(&request.entity) {
            entity.set_attributes(attributes.clone());
        }
        self.rebuffer_spawn(request.entity);
        let command = EntityAttributesCommand {
            entity: request.entity,
            attributes,
        };
        self.broadcast(&command, |c| c.id() != sender)?;
        Ok(())
    }

    /// Rewrites the buffered spawn record from the entity's current state.
    fn rebuffer_spawn(&mut self, id: EntityId) {
        let Some(entity) = self.entities.get(&id) else {
            return;
        };
        match self.encode(entity.spawn()) {
            Ok(envelope) => {
                self.buffer.rewrite(&BufferKey::Spawn(id), envelope);
            }
            Err(err) => warn!(room = %self.id, entity = %id, error = %err, "spawn record encode failed"),
        }
    }

    // -- output -------------------------------------------------------------

    pub(crate) fn encode<P: Payload>(&self, payload: &P) -> Result<Envelope, Rejection> {
        Ok(Envelope::from_payload_pooled(self.registry, payload, &self.pool)?)
    }

    fn push(&mut self, conn: ConnectionId, envelope: Envelope) {
        if let Some(peer) = self.connections.get_mut(&conn) {
            peer.outbox.push(envelope);
        }
    }

    /// Queues `payload` for one registered client.
    pub(crate) fn send_to<P: Payload>(&mut self, client: ClientId, payload: &P) -> Result<(), Rejection> {
        let conn = self
            .clients
            .get(&client)
            .map(Client::conn)
            .ok_or(Rejection::UnknownClient(client))?;
        let envelope = self.encode(payload)?;
        self.push(conn, envelope);
        Ok(())
    }

    /// Queues `payload` for every registered client passing `filter` and
    /// returns the envelope, for buffering.
    pub(crate) fn broadcast<P: Payload>(
        &mut self,
        payload: &P,
        filter: impl Fn(&Client) -> bool,
    ) -> Result<Envelope, Rejection> {
        let envelope = self.encode(payload)?;
        let targets: Vec<ConnectionId> = self
            .clients
            .values()
            .filter(|client| filter(client))
            .map(Client::conn)
            .collect();
        for conn in targets {
            self.push(conn, envelope.clone());
        }
        Ok(envelope)
    }

    /// Writes every outbox and marks freshly registered clients ready.
    fn flush(&mut self) {
        for peer in self.connections.values_mut() {
            if peer.outbox.is_empty() {
                continue;
            }
            let outbox = std::mem::take(&mut peer.outbox);
            write_packets(&peer.sink, &outbox, &self.pool);
        }
        for client in self.clients.values_mut() {
            if client.mark_ready() {
                debug!(room = %self.id, client = %client.id(), "client ready");
            }
        }
    }

    fn transition(&mut self, target: RoomState) {
        debug_assert!(self.state.can_transition_to(target), "{} -> {target}", self.state);
        info!(room = %self.id, from = %self.state, to = %target, "room state changed");
        self.state = target;
        *self.shared.state.write() = target;
    }

    fn publish(&mut self) {
        if self.info_dirty {
            *self.shared.info.write() = self.info();
            self.info_dirty = false;
        }
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("clients", &self.clients.len())
            .field("entities", &self.entities.len())
            .field("master", &self.master)
            .finish()
    }
}

/// Splits `envelopes` into packets of at most [`MAX_PACKET`] bytes.
/// Envelopes that could never fit are dropped, so one oversized command
/// does not cost the receiver its connection.
fn write_packets(sink: &OutboundSender, envelopes: &[Envelope], pool: &Arc<BufferPool>) {
    let mut batch: Vec<&Envelope> = Vec::new();
    let mut size = 0;
    for envelope in envelopes {
        let len = envelope.encoded_len();
        if len > MAX_PACKET {
            warn!(code = envelope.code, len, "envelope exceeds packet limit, dropped");
            continue;
        }
        if size + len > MAX_PACKET {
            write_packet(sink, &batch, pool);
            batch.clear();
            size = 0;
        }
        batch.push(envelope);
        size += len;
    }
    if !batch.is_empty() {
        write_packet(sink, &batch, pool);
    }
}

fn write_packet(sink: &OutboundSender, envelopes: &[&Envelope], pool: &Arc<BufferPool>) {
    let mut scratch = pool.acquire();
    match encode_batch_into(envelopes.iter().copied(), &mut scratch) {
        Ok(()) => {
            let _ = sink.send(Outbound::Packet {
                bytes: Bytes::copy_from_slice(scratch.as_slice()),
                mode: DeliveryMode::Reliable,
            });
        }
        Err(err) => warn!(error = %err, "batch encode failed"),
    }
}

fn placeholder_info(id: RoomId) -> RoomInfo {
    RoomInfo {
        id,
        app_id: String::new(),
        version: String::new(),
        name: String::new(),
        capacity: 0,
        occupancy: 0,
        visibility: Default::default(),
        locked: false,
        has_password: false,
        attributes: Default::default(),
    }
}
