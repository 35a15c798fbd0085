//! Drives a room on its own task.

use relaykit_protocol::RoomId;
use relaykit_tick::TickScheduler;
use tokio::task::JoinHandle;

use crate::{Room, RoomState};

/// Ticks `room` at its configured rate until it closes.
pub async fn run_room(mut room: Room) -> RoomId {
    let id = room.id();
    let mut ticker = TickScheduler::new(room.config().tick.clone());
    tracing::info!(room = %id, rate_hz = ticker.rate_hz(), "room loop started");

    while room.state() != RoomState::Closed {
        let info = ticker.wait_for_tick().await;
        if info.skipped > 0 {
            tracing::debug!(room = %id, tick = info.tick, skipped = info.skipped, "room fell behind");
        }
        room.tick();
        ticker.record_tick_end();
    }

    let metrics = ticker.metrics();
    tracing::info!(
        room = %id,
        ticks = metrics.ticks,
        late_ticks = metrics.late_ticks,
        "room loop stopped"
    );
    id
}

/// Spawns [`run_room`] on the current Tokio runtime.
pub fn spawn_room(room: Room) -> JoinHandle<RoomId> {
    tokio::spawn(run_room(room))
}
