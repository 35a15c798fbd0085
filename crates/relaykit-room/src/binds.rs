//! RPC and SyncVar bind tables.
//!
//! A bind names a method (or SyncVar) on a behavior, the authority a
//! caller needs, and the types its arguments decode to. Binds are built
//! once at startup; every RPC a room relays is validated against them.
//!
//! ```
//! use relaykit_codec::{OwnedChunk, ResolverRegistry};
//! use relaykit_protocol::{Authority, BehaviorId};
//! use relaykit_room::{Param, RpcBinds};
//!
//! let player = BehaviorId(1);
//! let binds = RpcBinds::builder(ResolverRegistry::with_primitives())
//!     .rpc(player, "Jump", Authority::OWNER, &[Param::of::<f32>()])?
//!     .rpc_handler(player, "Ping", Authority::ANY, &[Param::of::<u32>()], |call| {
//!         let n = call.arg::<u32>(0).copied().unwrap_or_default();
//!         Ok(OwnedChunk::from(relaykit_codec::to_vec(&(n + 1))?))
//!     })?
//!     .sync_var(player, "health", Authority::OWNER, Param::of::<i32>())?
//!     .build();
//! assert!(binds.method(player, "Jump").is_some());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use relaykit_codec::{CodecError, NetworkReader, OwnedChunk, ResolverRegistry};
use relaykit_protocol::{Authority, BehaviorId, ClientId, EntityId, RoomId};

use crate::error::{BindError, HandlerError};

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// One parameter type of a bound method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    type_id: TypeId,
    type_name: &'static str,
}

impl Param {
    pub fn of<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

/// Arguments decoded through the resolver registry.
#[derive(Default)]
pub struct Args(Vec<Box<dyn Any + Send>>);

impl Args {
    pub fn get<T: 'static>(&self, index: usize) -> Option<&T> {
        self.0.get(index)?.downcast_ref::<T>()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Args({})", self.0.len())
    }
}

// ---------------------------------------------------------------------------
// Server-side handlers
// ---------------------------------------------------------------------------

/// A call addressed to the server rather than a client.
#[derive(Debug)]
pub struct ServerCall<'a> {
    pub room: RoomId,
    pub sender: ClientId,
    pub entity: EntityId,
    pub behavior: BehaviorId,
    pub method: &'a str,
    pub args: Args,
}

impl ServerCall<'_> {
    pub fn arg<T: 'static>(&self, index: usize) -> Option<&T> {
        self.args.get(index)
    }
}

/// Runs on the room's tick. The returned bytes become the reply payload of
/// a query; targeted calls discard them.
pub type RpcHandler =
    Arc<dyn Fn(&ServerCall<'_>) -> Result<OwnedChunk, HandlerError> + Send + Sync>;

impl From<CodecError> for HandlerError {
    fn from(err: CodecError) -> Self {
        Self(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Binds
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MethodBind {
    name: String,
    authority: Authority,
    params: Vec<Param>,
    handler: Option<RpcHandler>,
}

impl MethodBind {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn authority(&self) -> Authority {
        self.authority
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn handler(&self) -> Option<&RpcHandler> {
        self.handler.as_ref()
    }
}

impl fmt::Debug for MethodBind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodBind")
            .field("name", &self.name)
            .field("authority", &self.authority)
            .field("params", &self.params)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SyncVarBind {
    name: String,
    authority: Authority,
    value: Param,
}

impl SyncVarBind {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn authority(&self) -> Authority {
        self.authority
    }

    pub fn value(&self) -> Param {
        self.value
    }
}

#[derive(Debug, Default, Clone)]
struct BehaviorBinds {
    methods: HashMap<String, MethodBind>,
    sync_vars: HashMap<String, SyncVarBind>,
}

/// Read-only bind table shared by every room.
#[derive(Debug, Clone)]
pub struct RpcBinds {
    resolvers: Arc<ResolverRegistry>,
    behaviors: HashMap<BehaviorId, BehaviorBinds>,
}

impl RpcBinds {
    pub fn builder(resolvers: ResolverRegistry) -> RpcBindsBuilder {
        RpcBindsBuilder {
            binds: Self {
                resolvers: Arc::new(resolvers),
                behaviors: HashMap::new(),
            },
        }
    }

    /// No binds at all: every RPC is answered with `MethodNotFound`.
    pub fn empty() -> Self {
        Self::builder(ResolverRegistry::with_primitives()).build()
    }

    pub fn resolvers(&self) -> &ResolverRegistry {
        &self.resolvers
    }

    pub fn method(&self, behavior: BehaviorId, name: &str) -> Option<&MethodBind> {
        self.behaviors.get(&behavior)?.methods.get(name)
    }

    pub fn sync_var(&self, behavior: BehaviorId, name: &str) -> Option<&SyncVarBind> {
        self.behaviors.get(&behavior)?.sync_vars.get(name)
    }

    /// Decodes `bytes` as the bind's parameter list. Every byte must be
    /// consumed.
    pub fn decode_args(&self, bind: &MethodBind, bytes: &[u8]) -> Result<Args, CodecError> {
        let mut reader = NetworkReader::new(bytes);
        let mut args = Vec::with_capacity(bind.params.len());
        for param in &bind.params {
            args.push(self.resolvers.read_value(param.type_id, &mut reader)?);
        }
        if !reader.is_empty() {
            return Err(CodecError::TrailingBytes(reader.remaining()));
        }
        Ok(Args(args))
    }

    /// Checks that `bytes` is exactly one value of the SyncVar's type.
    pub fn check_value(&self, bind: &SyncVarBind, bytes: &[u8]) -> Result<(), CodecError> {
        let mut reader = NetworkReader::new(bytes);
        self.resolvers.read_value(bind.value.type_id, &mut reader)?;
        if !reader.is_empty() {
            return Err(CodecError::TrailingBytes(reader.remaining()));
        }
        Ok(())
    }
}

impl Default for RpcBinds {
    fn default() -> Self {
        Self::empty()
    }
}

/// Collects binds; every type is checked against the resolver registry as
/// it is added.
#[derive(Debug)]
pub struct RpcBindsBuilder {
    binds: RpcBinds,
}

impl RpcBindsBuilder {
    /// Binds a method that is relayed between clients.
    pub fn rpc(
        self,
        behavior: BehaviorId,
        name: &str,
        authority: Authority,
        params: &[Param],
    ) -> Result<Self, BindError> {
        self.insert_method(behavior, name, authority, params, None)
    }

    /// Binds a method with a server-side handler, invoked for calls
    /// targeted at [`ClientId::SERVER`].
    pub fn rpc_handler<F>(
        self,
        behavior: BehaviorId,
        name: &str,
        authority: Authority,
        params: &[Param],
        handler: F,
    ) -> Result<Self, BindError>
    where
        F: Fn(&ServerCall<'_>) -> Result<OwnedChunk, HandlerError> + Send + Sync + 'static,
    {
        self.insert_method(behavior, name, authority, params, Some(Arc::new(handler)))
    }

    pub fn sync_var(
        mut self,
        behavior: BehaviorId,
        name: &str,
        authority: Authority,
        value: Param,
    ) -> Result<Self, BindError> {
        self.require(value)?;
        let entry = self.binds.behaviors.entry(behavior).or_default();
        if entry.sync_vars.contains_key(name) {
            return Err(BindError::DuplicateSyncVar {
                behavior,
                name: name.to_owned(),
            });
        }
        entry.sync_vars.insert(
            name.to_owned(),
            SyncVarBind {
                name: name.to_owned(),
                authority,
                value,
            },
        );
        Ok(self)
    }

    pub fn build(self) -> RpcBinds {
        self.binds
    }

    fn insert_method(
        mut self,
        behavior: BehaviorId,
        name: &str,
        authority: Authority,
        params: &[Param],
        handler: Option<RpcHandler>,
    ) -> Result<Self, BindError> {
        for param in params {
            self.require(*param)?;
        }
        let entry = self.binds.behaviors.entry(behavior).or_default();
        if entry.methods.contains_key(name) {
            return Err(BindError::DuplicateMethod {
                behavior,
                name: name.to_owned(),
            });
        }
        entry.methods.insert(
            name.to_owned(),
            MethodBind {
                name: name.to_owned(),
                authority,
                params: params.to_vec(),
                handler,
            },
        );
        Ok(self)
    }

    fn require(&self, param: Param) -> Result<(), BindError> {
        match self.binds.resolvers.resolve(param.type_id) {
            Some(_) => Ok(()),
            None => Err(CodecError::TypeNotRegistered(param.type_name).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_bytes(n: u32, s: &str) -> Vec<u8> {
        relaykit_codec::to_vec(&(n, s)).unwrap()
    }

    #[test]
    fn test_unregistered_param_fails_at_registration() {
        struct Custom;
        let err = RpcBinds::builder(ResolverRegistry::with_primitives())
            .rpc(BehaviorId(1), "Go", Authority::ANY, &[Param::of::<Custom>()])
            .unwrap_err();
        assert!(matches!(err, BindError::Codec(CodecError::TypeNotRegistered(_))));
    }

    #[test]
    fn test_duplicate_method_is_rejected() {
        let err = RpcBinds::builder(ResolverRegistry::with_primitives())
            .rpc(BehaviorId(1), "Go", Authority::ANY, &[])
            .unwrap()
            .rpc(BehaviorId(1), "Go", Authority::OWNER, &[])
            .unwrap_err();
        assert!(matches!(err, BindError::DuplicateMethod { .. }));
    }

    #[test]
    fn test_decode_args_by_shape() {
        let binds = RpcBinds::builder(ResolverRegistry::with_primitives())
            .rpc(
                BehaviorId(1),
                "Say",
                Authority::ANY,
                &[Param::of::<u32>(), Param::of::<String>()],
            )
            .unwrap()
            .build();
        let bind = binds.method(BehaviorId(1), "Say").unwrap();

        let args = binds.decode_args(bind, &args_bytes(7, "hi")).unwrap();
        assert_eq!(args.get::<u32>(0), Some(&7));
        assert_eq!(args.get::<String>(1).map(String::as_str), Some("hi"));
        assert_eq!(args.get::<u64>(0), None);

        let mut extra = args_bytes(7, "hi");
        extra.push(0);
        assert_eq!(
            binds.decode_args(bind, &extra).unwrap_err(),
            CodecError::TrailingBytes(1)
        );
        assert!(binds.decode_args(bind, &[7]).is_err());
    }

    #[test]
    fn test_sync_var_value_check() {
        let binds = RpcBinds::builder(ResolverRegistry::with_primitives())
            .sync_var(BehaviorId(2), "hp", Authority::OWNER, Param::of::<i32>())
            .unwrap()
            .build();
        let bind = binds.sync_var(BehaviorId(2), "hp").unwrap();
        assert!(binds.check_value(bind, &relaykit_codec::to_vec(&-5i32).unwrap()).is_ok());
        assert!(binds.check_value(bind, &[]).is_err());
        assert!(binds.sync_var(BehaviorId(2), "mp").is_none());
    }
}
