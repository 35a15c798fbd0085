//! RPC relay: broadcast, targeted, query and buffered calls, query replies
//! and SyncVar updates.
//!
//! Every call is checked against the room's [`RpcBinds`] before it is
//! relayed. A rejected call is dropped; a rejected query additionally
//! answers the caller with the matching [`RprResult`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use relaykit_codec::OwnedChunk;
use relaykit_protocol::messages::*;
use relaykit_protocol::{BehaviorId, BufferMode, ClientId, EntityId, RpcRequest, RprResult};
use tracing::{debug, warn};

use crate::binds::{Args, MethodBind, RpcBinds, ServerCall};
use crate::buffer::BufferKey;
use crate::room::{PendingQuery, Rejection};
use crate::Room;

/// The addressing part shared by every RPC request.
struct Call<'r> {
    entity: EntityId,
    behavior: BehaviorId,
    method: &'r str,
    args: &'r [u8],
}

impl Room {
    pub(crate) fn rpc(&mut self, sender: ClientId, request: RpcRequest<'_>) -> Result<(), Rejection> {
        match request {
            RpcRequest::Broadcast(request) => self.broadcast_rpc(sender, request),
            RpcRequest::Target(request) => self.target_rpc(sender, request),
            RpcRequest::Query(request) => {
                let channel = request.channel;
                let result = self.query_rpc(sender, request);
                if let Err(rejection) = &result {
                    self.reply(sender, RprCommand::failed(channel, rejection.result()));
                }
                result
            }
            RpcRequest::Buffer(request) => self.buffer_rpc(sender, request),
        }
    }

    /// Resolves the bind for `call` and checks that `sender` may invoke it
    /// and that the arguments decode.
    fn check_call<'b>(
        &self,
        binds: &'b RpcBinds,
        sender: ClientId,
        call: &Call<'_>,
        entity_required: bool,
    ) -> Result<(&'b MethodBind, Args), Rejection> {
        let entity = self.entities.get(&call.entity);
        if entity.is_none() && entity_required {
            return Err(Rejection::UnknownEntity(call.entity));
        }
        let bind = binds
            .method(call.behavior, call.method)
            .ok_or_else(|| Rejection::MethodNotFound {
                behavior: call.behavior,
                name: call.method.to_owned(),
            })?;
        let required = bind.authority();
        if !required.allows(self.authority_of(sender, entity)) {
            return Err(Rejection::Unauthorized { required });
        }
        let args = binds
            .decode_args(bind, call.args)
            .map_err(Rejection::InvalidArguments)?;
        Ok((bind, args))
    }

    /// Runs a server-side handler, catching handler panics.
    fn invoke(
        &self,
        bind: &MethodBind,
        sender: ClientId,
        call: &Call<'_>,
        args: Args,
    ) -> Result<OwnedChunk, Rejection> {
        let handler = bind.handler().ok_or_else(|| Rejection::MethodNotFound {
            behavior: call.behavior,
            name: call.method.to_owned(),
        })?;
        let server_call = ServerCall {
            room: self.id(),
            sender,
            entity: call.entity,
            behavior: call.behavior,
            method: call.method,
            args,
        };
        match catch_unwind(AssertUnwindSafe(|| handler(&server_call))) {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(err)) => Err(Rejection::Handler(err.0)),
            Err(_) => {
                warn!(room = %self.id(), method = call.method, behavior = %call.behavior, "rpc handler panicked");
                Err(Rejection::Handler("handler panicked".into()))
            }
        }
    }

    fn broadcast_rpc(
        &mut self,
        sender: ClientId,
        request: BroadcastRpcRequest<'_>,
    ) -> Result<(), Rejection> {
        let call = Call {
            entity: request.entity,
            behavior: request.behavior,
            method: &request.method,
            args: request.args.as_slice(),
        };
        let binds = Arc::clone(&self.binds);
        self.check_call(&binds, sender, &call, true)?;

        let command = BroadcastRpcCommand {
            sender,
            entity: request.entity,
            behavior: request.behavior,
            method: request.method.clone(),
            args: request.args.to_owned_chunk(),
        };
        let group = request.group.as_deref();
        let exclude = request.exclude;
        let envelope = self.broadcast(&command, |client| {
            Some(client.id()) != exclude && group.is_none_or(|g| client.in_group(g))
        })?;

        let key = BufferKey::Rpc {
            entity: command.entity,
            behavior: command.behavior,
            method: command.method,
        };
        match request.buffer {
            BufferMode::None => {}
            _ if group.is_some() => {
                debug!(room = %self.id(), client = %sender, "group broadcast not buffered");
            }
            BufferMode::Last => self.buffer.replace(key, envelope),
            BufferMode::All => self.buffer.push(key, envelope),
        }
        Ok(())
    }

    fn target_rpc(&mut self, sender: ClientId, request: TargetRpcRequest<'_>) -> Result<(), Rejection> {
        let call = Call {
            entity: request.entity,
            behavior: request.behavior,
            method: &request.method,
            args: request.args.as_slice(),
        };
        let binds = Arc::clone(&self.binds);
        let (bind, args) = self.check_call(&binds, sender, &call, true)?;

        if request.target.is_server() {
            self.invoke(bind, sender, &call, args)?;
            return Ok(());
        }
        let command = TargetRpcCommand {
            sender,
            entity: request.entity,
            behavior: request.behavior,
            method: request.method.clone(),
            args: request.args.to_owned_chunk(),
        };
        self.send_to(request.target, &command)
    }

    fn query_rpc(&mut self, sender: ClientId, request: QueryRpcRequest<'_>) -> Result<(), Rejection> {
        if self.pending.contains_key(&(sender, request.channel)) {
            return Err(Rejection::Invalid("query channel already pending"));
        }
        let call = Call {
            entity: request.entity,
            behavior: request.behavior,
            method: &request.method,
            args: request.args.as_slice(),
        };
        let binds = Arc::clone(&self.binds);
        let (bind, args) = self.check_call(&binds, sender, &call, true)?;

        if request.target.is_server() {
            let payload = self.invoke(bind, sender, &call, args)?;
            self.reply(
                sender,
                RprCommand {
                    channel: request.channel,
                    result: RprResult::Success,
                    payload,
                },
            );
            return Ok(());
        }
        if !self.clients.contains_key(&request.target) {
            return Err(Rejection::UnknownClient(request.target));
        }
        let command = QueryRpcCommand {
            sender,
            entity: request.entity,
            behavior: request.behavior,
            method: request.method.clone(),
            args: request.args.to_owned_chunk(),
            channel: request.channel,
        };
        self.send_to(request.target, &command)?;
        self.pending.insert(
            (sender, request.channel),
            PendingQuery {
                target: request.target,
                entity: request.entity,
            },
        );
        Ok(())
    }

    fn buffer_rpc(&mut self, sender: ClientId, request: BufferRpcRequest<'_>) -> Result<(), Rejection> {
        let call = Call {
            entity: request.entity,
            behavior: request.behavior,
            method: &request.method,
            args: request.args.as_slice(),
        };
        let binds = Arc::clone(&self.binds);
        self.check_call(&binds, sender, &call, false)?;

        let command = BroadcastRpcCommand {
            sender,
            entity: request.entity,
            behavior: request.behavior,
            method: request.method.clone(),
            args: request.args.to_owned_chunk(),
        };
        let envelope = self.encode(&command)?;
        let key = BufferKey::Rpc {
            entity: command.entity,
            behavior: command.behavior,
            method: command.method,
        };
        match request.mode {
            BufferMode::None => return Err(Rejection::Invalid("buffer request without a mode")),
            BufferMode::Last => self.buffer.replace(key, envelope),
            BufferMode::All => self.buffer.push(key, envelope),
        }
        Ok(())
    }

    /// Routes a query reply back to its requester.
    pub(crate) fn rpr(&mut self, responder: ClientId, response: RprResponse<'_>) -> Result<(), Rejection> {
        let key = (response.requester, response.channel);
        match self.pending.get(&key) {
            Some(pending) if pending.target == responder => {}
            Some(_) => return Err(Rejection::Invalid("reply from a client that was not queried")),
            None => return Err(Rejection::Invalid("no query pending on this channel")),
        }
        self.pending.remove(&key);
        self.reply(
            response.requester,
            RprCommand {
                channel: response.channel,
                result: response.result,
                payload: response.payload.to_owned_chunk(),
            },
        );
        Ok(())
    }

    pub(crate) fn sync_var(&mut self, sender: ClientId, request: SyncVarRequest<'_>) -> Result<(), Rejection> {
        let entity = self
            .entities
            .get(&request.entity)
            .ok_or(Rejection::UnknownEntity(request.entity))?;
        let binds = Arc::clone(&self.binds);
        let bind = binds
            .sync_var(request.behavior, &request.name)
            .ok_or_else(|| Rejection::MethodNotFound {
                behavior: request.behavior,
                name: request.name.clone(),
            })?;
        let required = bind.authority();
        if !required.allows(self.authority_of(sender, Some(entity))) {
            return Err(Rejection::Unauthorized { required });
        }
        binds
            .check_value(bind, request.value.as_slice())
            .map_err(Rejection::InvalidArguments)?;

        let command = SyncVarCommand {
            sender,
            entity: request.entity,
            behavior: request.behavior,
            name: request.name,
            value: request.value.to_owned_chunk(),
        };
        let envelope = self.broadcast(&command, |client| client.id() != sender)?;
        self.buffer.replace(
            BufferKey::SyncVar {
                entity: command.entity,
                behavior: command.behavior,
                name: command.name,
            },
            envelope,
        );
        Ok(())
    }

    // -- pending queries ----------------------------------------------------

    fn reply(&mut self, requester: ClientId, command: RprCommand) {
        if let Err(err) = self.send_to(requester, &command) {
            debug!(room = %self.id(), client = %requester, channel = command.channel, reason = %err, "query reply dropped");
        }
    }

    /// Drops queries `client` asked and fails the ones it was asked.
    pub(crate) fn sweep_queries_for_client(&mut self, client: ClientId) {
        let mut failed = Vec::new();
        self.pending.retain(|&(requester, channel), pending| {
            if requester == client {
                return false;
            }
            if pending.target == client {
                failed.push((requester, channel));
                return false;
            }
            true
        });
        self.fail_queries(failed);
    }

    /// Fails every query addressed to `entity`.
    pub(crate) fn sweep_queries_for_entity(&mut self, entity: EntityId) {
        let mut failed = Vec::new();
        self.pending.retain(|&(requester, channel), pending| {
            if pending.entity == entity {
                failed.push((requester, channel));
                return false;
            }
            true
        });
        self.fail_queries(failed);
    }

    fn fail_queries(&mut self, failed: Vec<(ClientId, u32)>) {
        for (requester, channel) in failed {
            self.reply(requester, RprCommand::failed(channel, RprResult::Disconnect));
        }
    }
}
