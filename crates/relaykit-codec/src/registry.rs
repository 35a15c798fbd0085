//! Runtime type-resolver registry.
//!
//! Statically typed code just calls [`to_writer`](crate::to_writer) and
//! [`from_reader`](crate::from_reader). The registry exists for the places
//! that only learn a value's type at runtime, such as RPC argument lists
//! validated against a bind table. It maps a [`TypeId`] to a [`Resolver`]
//! that can write a `&dyn Any` and read back a `Box<dyn Any>`.
//!
//! Resolution checks explicit resolvers first (primitives and any
//! `Serialize + Deserialize` type registered with [`register`]), then generic
//! ones (enums by underlying integer width, lists, sets, maps, arrays and
//! nullable wrappers). Generic resolvers recurse into their element
//! resolvers, and registering one whose element type is unknown fails at
//! registration time.
//!
//! [`register`]: ResolverRegistry::register

use std::any::{type_name, Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{CodecError, NetworkReader, NetworkWriter, OwnedChunk};

type WriteFn = fn(&ResolverRegistry, &(dyn Any + Send), &mut NetworkWriter) -> Result<(), CodecError>;
type ReadFn = fn(&ResolverRegistry, &mut NetworkReader<'_>) -> Result<Box<dyn Any + Send>, CodecError>;

/// How a resolver was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolverKind {
    Explicit,
    Enum,
    List,
    Set,
    Map,
    Nullable,
    Array,
}

/// Encoder/decoder pair for one concrete type.
#[derive(Clone)]
pub struct Resolver {
    type_id: TypeId,
    type_name: &'static str,
    kind: ResolverKind,
    write: WriteFn,
    read: ReadFn,
}

impl Resolver {
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn kind(&self) -> ResolverKind {
        self.kind
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("type_name", &self.type_name)
            .field("kind", &self.kind)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Integer representation of a [`NetworkEnum`], written at fixed width.
pub trait EnumRepr: Copy + Send + 'static {
    fn write_repr(self, writer: &mut NetworkWriter);
    fn read_repr(reader: &mut NetworkReader<'_>) -> Result<Self, CodecError>;
    fn widen(self) -> i128;
}

macro_rules! impl_enum_repr {
    ($($t:ty),*) => {$(
        impl EnumRepr for $t {
            fn write_repr(self, writer: &mut NetworkWriter) {
                writer.write_raw(&self.to_le_bytes());
            }

            fn read_repr(reader: &mut NetworkReader<'_>) -> Result<Self, CodecError> {
                Ok(<$t>::from_le_bytes(reader.read_array()?))
            }

            fn widen(self) -> i128 {
                self.into()
            }
        }
    )*};
}

impl_enum_repr!(u8, u16, u32, i8, i16, i32);

/// A fieldless enum carried as its underlying integer.
///
/// ```
/// use relaykit_codec::NetworkEnum;
///
/// #[derive(Clone, Copy, Debug, PartialEq)]
/// enum Team { Red = 1, Blue = 2 }
///
/// impl NetworkEnum for Team {
///     type Repr = u8;
///     fn to_repr(self) -> u8 { self as u8 }
///     fn from_repr(repr: u8) -> Option<Self> {
///         match repr { 1 => Some(Team::Red), 2 => Some(Team::Blue), _ => None }
///     }
/// }
/// ```
pub trait NetworkEnum: Copy + Send + 'static {
    type Repr: EnumRepr;

    fn to_repr(self) -> Self::Repr;
    fn from_repr(repr: Self::Repr) -> Option<Self>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Type-resolver table, built once at startup and read-only afterwards.
#[derive(Debug, Default, Clone)]
pub struct ResolverRegistry {
    explicit: HashMap<TypeId, Resolver>,
    generic: HashMap<TypeId, Resolver>,
}

impl ResolverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the primitive types, `String` and
    /// [`OwnedChunk`].
    pub fn with_primitives() -> Self {
        let mut registry = Self::new();
        macro_rules! prims {
            ($($t:ty),*) => {$(
                registry.insert_explicit::<$t>();
            )*};
        }
        prims!(bool, u8, i8, u16, i16, u32, i32, u64, i64, f32, f64, char, String, OwnedChunk);
        registry
    }

    /// Registers an explicit resolver backed by `T`'s serde impls.
    pub fn register<T>(&mut self) -> Result<&mut Self, CodecError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        if self.explicit.contains_key(&TypeId::of::<T>()) {
            return Err(CodecError::DuplicateType(type_name::<T>()));
        }
        self.insert_explicit::<T>();
        Ok(self)
    }

    /// Registers a fieldless enum written as its fixed-width integer repr.
    pub fn register_enum<E: NetworkEnum>(&mut self) -> Result<&mut Self, CodecError> {
        self.insert_generic::<E>(ResolverKind::Enum, write_enum::<E>, read_enum::<E>)
    }

    /// Registers `Vec<T>`. `T` must already resolve.
    pub fn register_list<T: Send + 'static>(&mut self) -> Result<&mut Self, CodecError> {
        self.require::<T>()?;
        self.insert_generic::<Vec<T>>(ResolverKind::List, write_list::<T>, read_list::<T>)
    }

    /// Registers `HashSet<T>`. `T` must already resolve.
    pub fn register_set<T>(&mut self) -> Result<&mut Self, CodecError>
    where
        T: Eq + Hash + Send + 'static,
    {
        self.require::<T>()?;
        self.insert_generic::<HashSet<T>>(ResolverKind::Set, write_set::<T>, read_set::<T>)
    }

    /// Registers `HashMap<K, V>`. Both `K` and `V` must already resolve.
    pub fn register_map<K, V>(&mut self) -> Result<&mut Self, CodecError>
    where
        K: Eq + Hash + Send + 'static,
        V: Send + 'static,
    {
        self.require::<K>()?;
        self.require::<V>()?;
        self.insert_generic::<HashMap<K, V>>(ResolverKind::Map, write_map::<K, V>, read_map::<K, V>)
    }

    /// Registers `Option<T>`, written with a leading presence byte.
    pub fn register_nullable<T: Send + 'static>(&mut self) -> Result<&mut Self, CodecError> {
        self.require::<T>()?;
        self.insert_generic::<Option<T>>(
            ResolverKind::Nullable,
            write_nullable::<T>,
            read_nullable::<T>,
        )
    }

    /// Registers `[T; N]`. The length is still written, and checked on read.
    pub fn register_array<T: Send + 'static, const N: usize>(
        &mut self,
    ) -> Result<&mut Self, CodecError> {
        self.require::<T>()?;
        self.insert_generic::<[T; N]>(
            ResolverKind::Array,
            write_array::<T, N>,
            read_array::<T, N>,
        )
    }

    /// Looks up the resolver for a type id, explicit resolvers first.
    pub fn resolve(&self, type_id: TypeId) -> Option<&Resolver> {
        self.explicit
            .get(&type_id)
            .or_else(|| self.generic.get(&type_id))
    }

    pub fn resolve_type<T: 'static>(&self) -> Option<&Resolver> {
        self.resolve(TypeId::of::<T>())
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.resolve_type::<T>().is_some()
    }

    /// Writes `value` using the resolver registered for its concrete type.
    pub fn write_value(
        &self,
        value: &(dyn Any + Send),
        writer: &mut NetworkWriter,
    ) -> Result<(), CodecError> {
        let resolver = self
            .resolve((*value).type_id())
            .ok_or(CodecError::TypeNotRegistered("<dynamic value>"))?;
        (resolver.write)(self, value, writer)
    }

    /// Reads a value of the type identified by `type_id`.
    pub fn read_value(
        &self,
        type_id: TypeId,
        reader: &mut NetworkReader<'_>,
    ) -> Result<Box<dyn Any + Send>, CodecError> {
        let resolver = self
            .resolve(type_id)
            .ok_or(CodecError::TypeNotRegistered("<dynamic type>"))?;
        (resolver.read)(self, reader)
    }

    /// Typed convenience over [`write_value`](Self::write_value).
    pub fn serialize<T: Send + 'static>(
        &self,
        value: &T,
        writer: &mut NetworkWriter,
    ) -> Result<(), CodecError> {
        let resolver = self
            .resolve_type::<T>()
            .ok_or(CodecError::TypeNotRegistered(type_name::<T>()))?;
        let mark = writer.len();
        let result = (resolver.write)(self, value, writer);
        if result.is_err() {
            writer.truncate(mark);
        }
        result
    }

    /// Typed convenience over [`read_value`](Self::read_value).
    pub fn deserialize<T: Send + 'static>(
        &self,
        reader: &mut NetworkReader<'_>,
    ) -> Result<T, CodecError> {
        let boxed = self
            .resolve_type::<T>()
            .ok_or(CodecError::TypeNotRegistered(type_name::<T>()))
            .and_then(|resolver| (resolver.read)(self, reader))?;
        downcast::<T>(boxed)
    }

    fn require<T: 'static>(&self) -> Result<(), CodecError> {
        if self.contains::<T>() {
            Ok(())
        } else {
            Err(CodecError::TypeNotRegistered(type_name::<T>()))
        }
    }

    fn insert_explicit<T>(&mut self)
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        self.explicit.insert(
            TypeId::of::<T>(),
            Resolver {
                type_id: TypeId::of::<T>(),
                type_name: type_name::<T>(),
                kind: ResolverKind::Explicit,
                write: write_serde::<T>,
                read: read_serde::<T>,
            },
        );
    }

    fn insert_generic<T: 'static>(
        &mut self,
        kind: ResolverKind,
        write: WriteFn,
        read: ReadFn,
    ) -> Result<&mut Self, CodecError> {
        let type_id = TypeId::of::<T>();
        if self.generic.contains_key(&type_id) {
            return Err(CodecError::DuplicateType(type_name::<T>()));
        }
        self.generic.insert(
            type_id,
            Resolver {
                type_id,
                type_name: type_name::<T>(),
                kind,
                write,
                read,
            },
        );
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Resolver functions
// ---------------------------------------------------------------------------

fn cast<T: 'static>(value: &(dyn Any + Send)) -> Result<&T, CodecError> {
    value
        .downcast_ref::<T>()
        .ok_or(CodecError::TypeMismatch(type_name::<T>()))
}

fn downcast<T: 'static>(boxed: Box<dyn Any + Send>) -> Result<T, CodecError> {
    boxed
        .downcast::<T>()
        .map(|b| *b)
        .map_err(|_| CodecError::TypeMismatch(type_name::<T>()))
}

fn write_serde<T: Serialize + 'static>(
    _: &ResolverRegistry,
    value: &(dyn Any + Send),
    writer: &mut NetworkWriter,
) -> Result<(), CodecError> {
    crate::to_writer(cast::<T>(value)?, writer)
}

fn read_serde<T: DeserializeOwned + Send + 'static>(
    _: &ResolverRegistry,
    reader: &mut NetworkReader<'_>,
) -> Result<Box<dyn Any + Send>, CodecError> {
    Ok(Box::new(crate::from_reader::<T>(reader)?))
}

fn write_enum<E: NetworkEnum>(
    _: &ResolverRegistry,
    value: &(dyn Any + Send),
    writer: &mut NetworkWriter,
) -> Result<(), CodecError> {
    cast::<E>(value)?.to_repr().write_repr(writer);
    Ok(())
}

fn read_enum<E: NetworkEnum>(
    _: &ResolverRegistry,
    reader: &mut NetworkReader<'_>,
) -> Result<Box<dyn Any + Send>, CodecError> {
    let repr = E::Repr::read_repr(reader)?;
    let value = E::from_repr(repr).ok_or(CodecError::ValueOutOfRange(repr.widen()))?;
    Ok(Box::new(value))
}

fn write_list<T: Send + 'static>(
    registry: &ResolverRegistry,
    value: &(dyn Any + Send),
    writer: &mut NetworkWriter,
) -> Result<(), CodecError> {
    let list = cast::<Vec<T>>(value)?;
    writer.write_len(list.len())?;
    list.iter().try_for_each(|item| registry.serialize(item, writer))
}

fn read_list<T: Send + 'static>(
    registry: &ResolverRegistry,
    reader: &mut NetworkReader<'_>,
) -> Result<Box<dyn Any + Send>, CodecError> {
    // Each element takes at least one byte, so `read_len` bounds the allocation.
    let len = reader.read_len()?;
    let mut list = Vec::with_capacity(len);
    for _ in 0..len {
        list.push(registry.deserialize::<T>(reader)?);
    }
    Ok(Box::new(list))
}

fn write_set<T: Eq + Hash + Send + 'static>(
    registry: &ResolverRegistry,
    value: &(dyn Any + Send),
    writer: &mut NetworkWriter,
) -> Result<(), CodecError> {
    let set = cast::<HashSet<T>>(value)?;
    writer.write_len(set.len())?;
    set.iter().try_for_each(|item| registry.serialize(item, writer))
}

fn read_set<T: Eq + Hash + Send + 'static>(
    registry: &ResolverRegistry,
    reader: &mut NetworkReader<'_>,
) -> Result<Box<dyn Any + Send>, CodecError> {
    let len = reader.read_len()?;
    let mut set = HashSet::with_capacity(len);
    for _ in 0..len {
        set.insert(registry.deserialize::<T>(reader)?);
    }
    Ok(Box::new(set))
}

fn write_map<K, V>(
    registry: &ResolverRegistry,
    value: &(dyn Any + Send),
    writer: &mut NetworkWriter,
) -> Result<(), CodecError>
where
    K: Eq + Hash + Send + 'static,
    V: Send + 'static,
{
    let map = cast::<HashMap<K, V>>(value)?;
    writer.write_len(map.len())?;
    for (k, v) in map {
        registry.serialize(k, writer)?;
        registry.serialize(v, writer)?;
    }
    Ok(())
}

fn read_map<K, V>(
    registry: &ResolverRegistry,
    reader: &mut NetworkReader<'_>,
) -> Result<Box<dyn Any + Send>, CodecError>
where
    K: Eq + Hash + Send + 'static,
    V: Send + 'static,
{
    let len = reader.read_len()?;
    let mut map = HashMap::with_capacity(len);
    for _ in 0..len {
        let k = registry.deserialize::<K>(reader)?;
        let v = registry.deserialize::<V>(reader)?;
        map.insert(k, v);
    }
    Ok(Box::new(map))
}

fn write_nullable<T: Send + 'static>(
    registry: &ResolverRegistry,
    value: &(dyn Any + Send),
    writer: &mut NetworkWriter,
) -> Result<(), CodecError> {
    match cast::<Option<T>>(value)? {
        None => {
            writer.write_u8(0);
            Ok(())
        }
        Some(inner) => {
            writer.write_u8(1);
            registry.serialize(inner, writer)
        }
    }
}

fn read_nullable<T: Send + 'static>(
    registry: &ResolverRegistry,
    reader: &mut NetworkReader<'_>,
) -> Result<Box<dyn Any + Send>, CodecError> {
    let value: Option<T> = match reader.read_u8()? {
        0 => None,
        1 => Some(registry.deserialize::<T>(reader)?),
        other => {
            return Err(CodecError::InvalidTag {
                what: "nullable",
                value: other.into(),
            });
        }
    };
    Ok(Box::new(value))
}

fn write_array<T: Send + 'static, const N: usize>(
    registry: &ResolverRegistry,
    value: &(dyn Any + Send),
    writer: &mut NetworkWriter,
) -> Result<(), CodecError> {
    let array = cast::<[T; N]>(value)?;
    writer.write_len(N)?;
    array.iter().try_for_each(|item| registry.serialize(item, writer))
}

fn read_array<T: Send + 'static, const N: usize>(
    registry: &ResolverRegistry,
    reader: &mut NetworkReader<'_>,
) -> Result<Box<dyn Any + Send>, CodecError> {
    let len = reader.read_len()?;
    if len != N {
        return Err(CodecError::ValueOutOfRange(len as i128));
    }
    let mut items = Vec::with_capacity(N);
    for _ in 0..N {
        items.push(registry.deserialize::<T>(reader)?);
    }
    let array: [T; N] = items
        .try_into()
        .map_err(|_| CodecError::TypeMismatch(type_name::<[T; N]>()))?;
    Ok(Box::new(array))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum Team {
        Red = 1,
        Blue = 300,
    }

    impl NetworkEnum for Team {
        type Repr = u16;

        fn to_repr(self) -> u16 {
            self as u16
        }

        fn from_repr(repr: u16) -> Option<Self> {
            match repr {
                1 => Some(Team::Red),
                300 => Some(Team::Blue),
                _ => None,
            }
        }
    }

    #[test]
    fn test_generic_registration_requires_element() {
        let mut registry = ResolverRegistry::new();
        assert!(matches!(
            registry.register_list::<Team>(),
            Err(CodecError::TypeNotRegistered(_))
        ));
        registry.register_enum::<Team>().unwrap();
        registry.register_list::<Team>().unwrap();
        assert_eq!(
            registry.resolve_type::<Vec<Team>>().map(Resolver::kind),
            Some(ResolverKind::List)
        );
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ResolverRegistry::with_primitives();
        assert_eq!(
            registry.register::<u32>().unwrap_err(),
            CodecError::DuplicateType("u32")
        );
        registry.register_nullable::<u32>().unwrap();
        assert!(registry.register_nullable::<u32>().is_err());
    }

    #[test]
    fn test_enum_uses_fixed_width_repr() {
        let mut registry = ResolverRegistry::new();
        registry.register_enum::<Team>().unwrap();
        let mut w = NetworkWriter::new();
        registry.serialize(&Team::Blue, &mut w).unwrap();
        assert_eq!(w.as_slice(), &300u16.to_le_bytes());

        let mut r = NetworkReader::new(&[9, 0]);
        assert_eq!(
            registry.deserialize::<Team>(&mut r).unwrap_err(),
            CodecError::ValueOutOfRange(9)
        );
    }

    #[test]
    fn test_nested_generics_recurse() {
        let mut registry = ResolverRegistry::with_primitives();
        registry
            .register_enum::<Team>()
            .unwrap()
            .register_nullable::<Team>()
            .unwrap()
            .register_map::<String, Option<Team>>()
            .unwrap()
            .register_array::<i32, 3>()
            .unwrap()
            .register_set::<u16>()
            .unwrap();

        let map = HashMap::from([
            ("a".to_string(), Some(Team::Red)),
            ("b".to_string(), None),
        ]);
        let mut w = NetworkWriter::new();
        registry.serialize(&map, &mut w).unwrap();
        registry.serialize(&[-1i32, 0, 1], &mut w).unwrap();
        registry.serialize(&HashSet::from([5u16, 6]), &mut w).unwrap();

        let mut r = w.reader();
        assert_eq!(
            registry.deserialize::<HashMap<String, Option<Team>>>(&mut r).unwrap(),
            map
        );
        assert_eq!(registry.deserialize::<[i32; 3]>(&mut r).unwrap(), [-1, 0, 1]);
        assert_eq!(
            registry.deserialize::<HashSet<u16>>(&mut r).unwrap(),
            HashSet::from([5, 6])
        );
        assert!(r.is_empty());
    }

    #[test]
    fn test_dynamic_round_trip_by_type_id() {
        let registry = ResolverRegistry::with_primitives();
        let value: Box<dyn Any + Send> = Box::new(String::from("hello"));
        let mut w = NetworkWriter::new();
        registry.write_value(&*value, &mut w).unwrap();

        let back = registry
            .read_value(TypeId::of::<String>(), &mut w.reader())
            .unwrap();
        assert_eq!(back.downcast_ref::<String>().unwrap(), "hello");
    }

    #[test]
    fn test_array_length_is_checked() {
        let mut registry = ResolverRegistry::with_primitives();
        registry.register_array::<u8, 2>().unwrap();
        let mut r = NetworkReader::new(&[3, 1, 2, 3]);
        assert!(registry.deserialize::<[u8; 2]>(&mut r).is_err());
    }
}
