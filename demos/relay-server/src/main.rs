use relaykit::prelude::*;

// ---------------------------------------------------------------------------
// Behaviors
// ---------------------------------------------------------------------------

/// Player avatars, one per client.
const PLAYER: BehaviorId = BehaviorId(1);
/// The round controller, a scene object owned by whoever is master.
const MATCH: BehaviorId = BehaviorId(2);

fn binds() -> Result<RpcBinds, RelayError> {
    let binds = RpcBinds::builder(ResolverRegistry::with_primitives())
        .rpc(PLAYER, "Move", Authority::OWNER, &[Param::of::<f32>(), Param::of::<f32>()])?
        .rpc(PLAYER, "Chat", Authority::ANY, &[Param::of::<String>()])?
        .rpc_handler(PLAYER, "Ping", Authority::ANY, &[Param::of::<u32>()], |call| {
            let nonce = call.arg::<u32>(0).copied().unwrap_or_default();
            Ok(OwnedChunk::from(relaykit::codec::to_vec(&nonce)?))
        })?
        .sync_var(PLAYER, "health", Authority::OWNER, Param::of::<i32>())?
        .rpc(MATCH, "StartRound", Authority::MASTER, &[Param::of::<u32>()])?
        .rpc(MATCH, "EndRound", Authority::MASTER, &[])?
        .sync_var(MATCH, "score", Authority::MASTER, Param::of::<u32>())?
        .build();
    Ok(binds)
}

#[tokio::main]
async fn main() -> Result<(), RelayError> {
    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    init_tracing(&config.log_filter);

    let server = RelayServer::builder()
        .config(&config)
        .binds(binds()?)
        .build()
        .await?;

    for room in server.rooms() {
        tracing::info!(
            room = %room.id,
            app_id = %room.app_id,
            name = %room.name,
            capacity = room.capacity,
            "room open"
        );
    }
    if let Some(addr) = server.ws_addr() {
        tracing::info!(%addr, "websocket clients welcome");
    }
    if let Some(addr) = server.udp_addr() {
        tracing::info!(%addr, "udp clients welcome");
    }

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binds_build() {
        let binds = binds().unwrap();
        assert_eq!(binds.method(MATCH, "StartRound").unwrap().authority(), Authority::MASTER);
        assert!(binds.method(PLAYER, "Ping").unwrap().handler().is_some());
        assert!(binds.sync_var(PLAYER, "health").is_some());
    }

    #[test]
    fn test_sample_config_parses() {
        let config = ServerConfig::from_json(include_str!("../relay.json")).unwrap();
        assert_eq!(config.rooms.len(), 3);
        assert_eq!(config.rooms[1].tick.rate_hz, 60);
        assert_eq!(config.rooms[2].visibility, Visibility::Private);
    }
}
