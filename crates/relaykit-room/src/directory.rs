//! The lobby: creates rooms, tracks their handles and answers room queries.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use relaykit_codec::BufferPool;
use relaykit_protocol::{RoomId, RoomInfo, Visibility};

use crate::id_pool::IdPool;
use crate::runner::run_room;
use crate::{Room, RoomConfig, RoomError, RoomHandle, RpcBinds};

struct Inner {
    ids: IdPool,
    rooms: RwLock<HashMap<RoomId, RoomHandle>>,
    binds: Arc<RpcBinds>,
    pool: Arc<BufferPool>,
}

/// Shared registry of running rooms.
///
/// Cloning is cheap. Every room created here runs on its own task and is
/// removed, with its id returned to the pool, once it closes.
#[derive(Clone)]
pub struct RoomDirectory {
    inner: Arc<Inner>,
}

impl RoomDirectory {
    /// Rooms created by this directory validate RPCs against `binds`.
    pub fn new(binds: RpcBinds) -> Self {
        Self {
            inner: Arc::new(Inner {
                ids: IdPool::new(1, u32::MAX),
                rooms: RwLock::new(HashMap::new()),
                binds: Arc::new(binds),
                pool: Arc::new(BufferPool::default()),
            }),
        }
    }

    /// Creates a room and starts its loop. Must be called inside a Tokio
    /// runtime.
    pub fn create_room(&self, config: RoomConfig) -> Result<RoomInfo, RoomError> {
        config.validate()?;
        let raw = self.inner.ids.reserve().ok_or(RoomError::Exhausted("room"))?;
        let id = RoomId(raw);
        let (room, handle) = match Room::with_pool(
            id,
            config,
            Arc::clone(&self.inner.binds),
            Arc::clone(&self.inner.pool),
        ) {
            Ok(pair) => pair,
            Err(err) => {
                self.inner.ids.free(raw);
                return Err(err);
            }
        };
        let info = room.info();
        self.inner.rooms.write().insert(id, handle);

        let directory: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            run_room(room).await;
            if let Some(inner) = directory.upgrade() {
                inner.rooms.write().remove(&id);
                inner.ids.free(raw);
                tracing::info!(room = %id, "room removed from directory");
            }
        });
        Ok(info)
    }

    /// Public rooms of one application version that still admit clients,
    /// ordered by id.
    pub fn query_rooms(&self, app_id: &str, version: &str) -> Vec<RoomInfo> {
        let rooms = self.inner.rooms.read();
        let mut found: Vec<RoomInfo> = rooms
            .values()
            .filter(|handle| handle.state().accepts_connections())
            .map(RoomHandle::info)
            .filter(|info| {
                info.visibility == Visibility::Public
                    && info.app_id == app_id
                    && info.version == version
            })
            .collect();
        found.sort_by_key(|info| info.id);
        found
    }

    pub fn get(&self, id: RoomId) -> Option<RoomHandle> {
        self.inner.rooms.read().get(&id).cloned()
    }

    /// Every tracked room, private ones included.
    pub fn list(&self) -> Vec<RoomInfo> {
        let mut all: Vec<RoomInfo> = self.inner.rooms.read().values().map(RoomHandle::info).collect();
        all.sort_by_key(|info| info.id);
        all
    }

    pub fn len(&self) -> usize {
        self.inner.rooms.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.rooms.read().is_empty()
    }

    /// Asks one room to disconnect everyone and close.
    pub fn close_room(&self, id: RoomId) -> Result<(), RoomError> {
        self.get(id).ok_or(RoomError::NotFound(id))?.shutdown()
    }

    /// Asks every room to close.
    pub fn shutdown_all(&self) {
        let handles: Vec<RoomHandle> = self.inner.rooms.read().values().cloned().collect();
        for handle in handles {
            let _ = handle.shutdown();
        }
    }
}

impl std::fmt::Debug for RoomDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomDirectory")
            .field("rooms", &self.len())
            .finish()
    }
}
