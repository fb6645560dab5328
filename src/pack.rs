//! The `Pack` trait: how a type moves through the wire.
//!
//! Primitives and standard collections get impls here; structured user
//! types get theirs from `#[derive(SnapObject)]`. Collections encode as a
//! varint count followed by their elements in natural iteration order, and
//! recurse through the graph contexts so nested shared references are
//! still tracked.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::time::{Duration, SystemTime};

use crate::descriptor::TypeKey;
use crate::error::{Result, SnapError};
use crate::meta::TypeRegistry;
use crate::obj::Obj;
use crate::reader::ReadCx;
use crate::writer::WriteCx;

/// Upper bound on up-front collection preallocation; protects against a
/// corrupt count claiming billions of elements.
const MAX_PREALLOC: usize = 4096;

/// A type that can be encoded into and decoded out of a stream.
///
/// `write_into` and `read_from` must consume and produce exactly mirrored
/// byte sequences. `type_key` is the canonical shape stamped into streams
/// and matched by surrogate rules.
pub trait Pack {
    /// The canonical key of this type.
    fn type_key() -> TypeKey
    where
        Self: Sized;

    /// Encodes `self` into the stream.
    fn write_into(&self, cx: &mut WriteCx<'_>) -> Result<()>;

    /// Decodes one value from the stream.
    fn read_from(cx: &mut ReadCx<'_>) -> Result<Self>
    where
        Self: Sized;

    /// Registers whatever this type needs in the metadata provider,
    /// recursing into element and field types. Leaf types need nothing.
    fn register_with(_registry: &TypeRegistry) -> Result<()>
    where
        Self: Sized,
    {
        Ok(())
    }

    /// Registers the entry used when instances of this type are tracked on
    /// the shared heap behind an [`Obj`]. Plain values get a value-kind
    /// entry; the derive overrides this with the object-kind one.
    fn register_heap(registry: &TypeRegistry) -> Result<()>
    where
        Self: Sized + Default + 'static,
    {
        registry.add_value_entry::<Self>()?;
        Ok(())
    }

    /// Encodes an optional value: a presence byte, then the value.
    /// [`Obj`] overrides this pair to encode straight into the reference
    /// id space, where null has a dedicated sentinel.
    fn write_opt(value: Option<&Self>, cx: &mut WriteCx<'_>) -> Result<()>
    where
        Self: Sized,
    {
        match value {
            None => cx.wire().put_u8(0),
            Some(v) => {
                cx.wire().put_u8(1)?;
                v.write_into(cx)
            }
        }
    }

    /// Decodes an optional value written by [`Pack::write_opt`].
    fn read_opt(cx: &mut ReadCx<'_>) -> Result<Option<Self>>
    where
        Self: Sized,
    {
        match cx.wire().take_u8()? {
            0 => Ok(None),
            1 => Ok(Some(Self::read_from(cx)?)),
            other => Err(SnapError::StreamCorrupted(format!(
                "invalid optional flag {other}"
            ))),
        }
    }
}

macro_rules! pack_unsigned {
    ($($ty:ty => $key:ident),* $(,)?) => {$(
        impl Pack for $ty {
            fn type_key() -> TypeKey {
                TypeKey::$key
            }

            fn write_into(&self, cx: &mut WriteCx<'_>) -> Result<()> {
                cx.wire().put_varint(u64::from(*self))
            }

            fn read_from(cx: &mut ReadCx<'_>) -> Result<Self> {
                let raw = cx.wire().take_varint()?;
                <$ty>::try_from(raw).map_err(|_| {
                    SnapError::StreamCorrupted(format!(
                        "value {raw} overflows {}", stringify!($ty)
                    ))
                })
            }
        }
    )*};
}

pack_unsigned!(u8 => U8, u16 => U16, u32 => U32);

impl Pack for u64 {
    fn type_key() -> TypeKey {
        TypeKey::U64
    }

    fn write_into(&self, cx: &mut WriteCx<'_>) -> Result<()> {
        cx.wire().put_varint(*self)
    }

    fn read_from(cx: &mut ReadCx<'_>) -> Result<Self> {
        cx.wire().take_varint()
    }
}

// Signed integers keep their width: the bit pattern is reinterpreted as
// the same-width unsigned value before varint encoding, so -1i8 costs two
// bytes, not ten.
macro_rules! pack_signed {
    ($($ty:ty => $key:ident via $uns:ty),* $(,)?) => {$(
        impl Pack for $ty {
            fn type_key() -> TypeKey {
                TypeKey::$key
            }

            fn write_into(&self, cx: &mut WriteCx<'_>) -> Result<()> {
                cx.wire().put_varint(u64::from(*self as $uns))
            }

            fn read_from(cx: &mut ReadCx<'_>) -> Result<Self> {
                let raw = cx.wire().take_varint()?;
                let narrow = <$uns>::try_from(raw).map_err(|_| {
                    SnapError::StreamCorrupted(format!(
                        "value {raw} overflows {}", stringify!($ty)
                    ))
                })?;
                Ok(narrow as $ty)
            }
        }
    )*};
}

pack_signed!(i8 => I8 via u8, i16 => I16 via u16, i32 => I32 via u32);

impl Pack for i64 {
    fn type_key() -> TypeKey {
        TypeKey::I64
    }

    fn write_into(&self, cx: &mut WriteCx<'_>) -> Result<()> {
        cx.wire().put_signed(*self)
    }

    fn read_from(cx: &mut ReadCx<'_>) -> Result<Self> {
        cx.wire().take_signed()
    }
}

impl Pack for bool {
    fn type_key() -> TypeKey {
        TypeKey::Bool
    }

    fn write_into(&self, cx: &mut WriteCx<'_>) -> Result<()> {
        cx.wire().put_u8(u8::from(*self))
    }

    fn read_from(cx: &mut ReadCx<'_>) -> Result<Self> {
        match cx.wire().take_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(SnapError::StreamCorrupted(format!(
                "invalid bool byte {other}"
            ))),
        }
    }
}

impl Pack for char {
    fn type_key() -> TypeKey {
        TypeKey::Char
    }

    fn write_into(&self, cx: &mut WriteCx<'_>) -> Result<()> {
        cx.wire().put_varint(u64::from(u32::from(*self)))
    }

    fn read_from(cx: &mut ReadCx<'_>) -> Result<Self> {
        let raw = cx.wire().take_varint()?;
        u32::try_from(raw)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| {
                SnapError::StreamCorrupted(format!("invalid char scalar {raw}"))
            })
    }
}

impl Pack for f32 {
    fn type_key() -> TypeKey {
        TypeKey::F32
    }

    fn write_into(&self, cx: &mut WriteCx<'_>) -> Result<()> {
        cx.wire().put_f32(*self)
    }

    fn read_from(cx: &mut ReadCx<'_>) -> Result<Self> {
        cx.wire().take_f32()
    }
}

impl Pack for f64 {
    fn type_key() -> TypeKey {
        TypeKey::F64
    }

    fn write_into(&self, cx: &mut WriteCx<'_>) -> Result<()> {
        cx.wire().put_f64(*self)
    }

    fn read_from(cx: &mut ReadCx<'_>) -> Result<Self> {
        cx.wire().take_f64()
    }
}

impl Pack for String {
    fn type_key() -> TypeKey {
        TypeKey::Str
    }

    fn write_into(&self, cx: &mut WriteCx<'_>) -> Result<()> {
        cx.wire().put_str(self)
    }

    fn read_from(cx: &mut ReadCx<'_>) -> Result<Self> {
        cx.wire().take_str()
    }
}

impl Pack for SystemTime {
    fn type_key() -> TypeKey {
        TypeKey::Time
    }

    fn write_into(&self, cx: &mut WriteCx<'_>) -> Result<()> {
        cx.wire().put_time(*self)
    }

    fn read_from(cx: &mut ReadCx<'_>) -> Result<Self> {
        cx.wire().take_time()
    }
}

impl Pack for Duration {
    fn type_key() -> TypeKey {
        TypeKey::Dur
    }

    fn write_into(&self, cx: &mut WriteCx<'_>) -> Result<()> {
        cx.wire().put_duration(*self)
    }

    fn read_from(cx: &mut ReadCx<'_>) -> Result<Self> {
        cx.wire().take_duration()
    }
}

impl<T: Pack> Pack for Option<T> {
    fn type_key() -> TypeKey {
        TypeKey::Opt(Box::new(T::type_key()))
    }

    fn write_into(&self, cx: &mut WriteCx<'_>) -> Result<()> {
        T::write_opt(self.as_ref(), cx)
    }

    fn read_from(cx: &mut ReadCx<'_>) -> Result<Self> {
        T::read_opt(cx)
    }

    fn register_with(registry: &TypeRegistry) -> Result<()> {
        T::register_with(registry)
    }
}

impl<T: Pack> Pack for Box<T> {
    fn type_key() -> TypeKey {
        T::type_key()
    }

    fn write_into(&self, cx: &mut WriteCx<'_>) -> Result<()> {
        (**self).write_into(cx)
    }

    fn read_from(cx: &mut ReadCx<'_>) -> Result<Self> {
        Ok(Box::new(T::read_from(cx)?))
    }

    fn register_with(registry: &TypeRegistry) -> Result<()> {
        T::register_with(registry)
    }

    // The box is invisible on the wire, so its optional form must also be
    // whatever the inner type's optional form is. An `Option<Box<Obj<T>>>`
    // thereby shares both the key and the encoding of `Option<Obj<T>>`.
    fn write_opt(value: Option<&Self>, cx: &mut WriteCx<'_>) -> Result<()> {
        T::write_opt(value.map(|b| &**b), cx)
    }

    fn read_opt(cx: &mut ReadCx<'_>) -> Result<Option<Self>> {
        Ok(T::read_opt(cx)?.map(Box::new))
    }
}

fn read_count(cx: &mut ReadCx<'_>) -> Result<usize> {
    usize::try_from(cx.wire().take_varint()?)
        .map_err(|_| SnapError::StreamCorrupted("collection count out of range".into()))
}

impl<T: Pack> Pack for Vec<T> {
    fn type_key() -> TypeKey {
        TypeKey::List(Box::new(T::type_key()))
    }

    fn write_into(&self, cx: &mut WriteCx<'_>) -> Result<()> {
        cx.ensure_collections_allowed()?;
        cx.wire().put_varint(self.len() as u64)?;
        for item in self {
            item.write_into(cx)?;
        }
        Ok(())
    }

    fn read_from(cx: &mut ReadCx<'_>) -> Result<Self> {
        cx.ensure_collections_allowed()?;
        let n = read_count(cx)?;
        let mut out = Vec::with_capacity(n.min(MAX_PREALLOC));
        for _ in 0..n {
            out.push(T::read_from(cx)?);
        }
        Ok(out)
    }

    fn register_with(registry: &TypeRegistry) -> Result<()> {
        T::register_with(registry)
    }
}

impl<T: Pack> Pack for VecDeque<T> {
    fn type_key() -> TypeKey {
        TypeKey::Deque(Box::new(T::type_key()))
    }

    fn write_into(&self, cx: &mut WriteCx<'_>) -> Result<()> {
        cx.ensure_collections_allowed()?;
        cx.wire().put_varint(self.len() as u64)?;
        for item in self {
            item.write_into(cx)?;
        }
        Ok(())
    }

    fn read_from(cx: &mut ReadCx<'_>) -> Result<Self> {
        cx.ensure_collections_allowed()?;
        let n = read_count(cx)?;
        let mut out = VecDeque::with_capacity(n.min(MAX_PREALLOC));
        for _ in 0..n {
            out.push_back(T::read_from(cx)?);
        }
        Ok(out)
    }

    fn register_with(registry: &TypeRegistry) -> Result<()> {
        T::register_with(registry)
    }
}

macro_rules! pack_map {
    ($name:ident, $($bound:tt)+) => {
        impl<K: Pack + $($bound)+, V: Pack> Pack for $name<K, V> {
            fn type_key() -> TypeKey {
                TypeKey::Map(Box::new(K::type_key()), Box::new(V::type_key()))
            }

            fn write_into(&self, cx: &mut WriteCx<'_>) -> Result<()> {
                cx.ensure_collections_allowed()?;
                cx.wire().put_varint(self.len() as u64)?;
                for (k, v) in self {
                    k.write_into(cx)?;
                    v.write_into(cx)?;
                }
                Ok(())
            }

            fn read_from(cx: &mut ReadCx<'_>) -> Result<Self> {
                cx.ensure_collections_allowed()?;
                let n = read_count(cx)?;
                let mut out = Self::new();
                for _ in 0..n {
                    let k = K::read_from(cx)?;
                    let v = V::read_from(cx)?;
                    out.insert(k, v);
                }
                Ok(out)
            }

            fn register_with(registry: &TypeRegistry) -> Result<()> {
                K::register_with(registry)?;
                V::register_with(registry)
            }
        }
    };
}

pack_map!(HashMap, Eq + Hash);
pack_map!(BTreeMap, Ord);

macro_rules! pack_set {
    ($name:ident, $($bound:tt)+) => {
        impl<T: Pack + $($bound)+> Pack for $name<T> {
            fn type_key() -> TypeKey {
                TypeKey::Set(Box::new(T::type_key()))
            }

            fn write_into(&self, cx: &mut WriteCx<'_>) -> Result<()> {
                cx.ensure_collections_allowed()?;
                cx.wire().put_varint(self.len() as u64)?;
                for item in self {
                    item.write_into(cx)?;
                }
                Ok(())
            }

            fn read_from(cx: &mut ReadCx<'_>) -> Result<Self> {
                cx.ensure_collections_allowed()?;
                let n = read_count(cx)?;
                let mut out = Self::new();
                for _ in 0..n {
                    out.insert(T::read_from(cx)?);
                }
                Ok(out)
            }

            fn register_with(registry: &TypeRegistry) -> Result<()> {
                T::register_with(registry)
            }
        }
    };
}

pack_set!(HashSet, Eq + Hash);
pack_set!(BTreeSet, Ord);

impl<T: Pack + Default + 'static> Pack for Obj<T> {
    fn type_key() -> TypeKey {
        TypeKey::Ref(Box::new(T::type_key()))
    }

    fn write_into(&self, cx: &mut WriteCx<'_>) -> Result<()> {
        cx.write_ref(self)
    }

    fn read_from(cx: &mut ReadCx<'_>) -> Result<Self> {
        cx.read_ref()
    }

    fn register_with(registry: &TypeRegistry) -> Result<()> {
        T::register_heap(registry)
    }

    // References have a null sentinel in the id space; an optional
    // reference costs no presence byte.
    fn write_opt(value: Option<&Self>, cx: &mut WriteCx<'_>) -> Result<()> {
        match value {
            None => cx.write_null_ref(),
            Some(obj) => cx.write_ref(obj),
        }
    }

    fn read_opt(cx: &mut ReadCx<'_>) -> Result<Option<Self>> {
        cx.read_opt_ref()
    }
}
