//! Type keys and stream stamps.
//!
//! A [`TypeKey`] is the canonical, language-neutral shape of a serializable
//! type. Keys render to a compact string grammar (`vec<u64>`,
//! `map<str,i64>`, `ref<Node>`, `opt<f32>`) that is embedded in full stamps
//! and parsed back on read, so the comparator can diff write-time and
//! read-time field shapes without either side loading the other's code.
//!
//! The wildcard key `*` exists only in surrogate match patterns; it never
//! appears on the wire.

use std::fmt;

use crate::codec::{WireRead, WireWrite};
use crate::config::StampMode;
use crate::error::{Result, SnapError};

/// The canonical shape of a serializable type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKey {
    /// `bool`
    Bool,
    /// `u8`
    U8,
    /// `u16`
    U16,
    /// `u32`
    U32,
    /// `u64`
    U64,
    /// `i8`
    I8,
    /// `i16`
    I16,
    /// `i32`
    I32,
    /// `i64`
    I64,
    /// `f32`
    F32,
    /// `f64`
    F64,
    /// `char`
    Char,
    /// `str`
    Str,
    /// `time`: an absolute timestamp.
    Time,
    /// `dur`: an elapsed span.
    Dur,
    /// `opt<K>`: an optional value.
    Opt(Box<TypeKey>),
    /// `vec<K>`: an ordered sequence.
    List(Box<TypeKey>),
    /// `deque<K>`: a double-ended queue, front first on the wire.
    Deque(Box<TypeKey>),
    /// `stack<K>`: a LIFO stack, top first on the wire.
    Stack(Box<TypeKey>),
    /// `map<K,V>`: a keyed dictionary.
    Map(Box<TypeKey>, Box<TypeKey>),
    /// `set<K>`: a collection of distinct values.
    Set(Box<TypeKey>),
    /// `arr<K>`: a rank-prefixed multidimensional array.
    Array(Box<TypeKey>),
    /// `ref<K>`: a shared, identity-tracked reference.
    Ref(Box<TypeKey>),
    /// A user type by identity, with generic arguments if any.
    Named(String, Vec<TypeKey>),
    /// `*`: matches any key. Patterns only.
    Wildcard,
}

impl TypeKey {
    /// Shorthand for a non-generic named key.
    pub fn named(identity: impl Into<String>) -> Self {
        Self::Named(identity.into(), Vec::new())
    }

    /// Parses a key from its string grammar.
    ///
    /// # Errors
    /// `StreamCorrupted` on any malformed input; keys normally arrive off
    /// the wire inside full stamps.
    pub fn parse(text: &str) -> Result<Self> {
        let mut parser = Parser {
            bytes: text.as_bytes(),
            pos: 0,
        };
        let key = parser.key(0)?;
        if parser.pos != parser.bytes.len() {
            return Err(malformed(text));
        }
        Ok(key)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::U8 => f.write_str("u8"),
            Self::U16 => f.write_str("u16"),
            Self::U32 => f.write_str("u32"),
            Self::U64 => f.write_str("u64"),
            Self::I8 => f.write_str("i8"),
            Self::I16 => f.write_str("i16"),
            Self::I32 => f.write_str("i32"),
            Self::I64 => f.write_str("i64"),
            Self::F32 => f.write_str("f32"),
            Self::F64 => f.write_str("f64"),
            Self::Char => f.write_str("char"),
            Self::Str => f.write_str("str"),
            Self::Time => f.write_str("time"),
            Self::Dur => f.write_str("dur"),
            Self::Opt(k) => write!(f, "opt<{k}>"),
            Self::List(k) => write!(f, "vec<{k}>"),
            Self::Deque(k) => write!(f, "deque<{k}>"),
            Self::Stack(k) => write!(f, "stack<{k}>"),
            Self::Map(k, v) => write!(f, "map<{k},{v}>"),
            Self::Set(k) => write!(f, "set<{k}>"),
            Self::Array(k) => write!(f, "arr<{k}>"),
            Self::Ref(k) => write!(f, "ref<{k}>"),
            Self::Named(name, args) => {
                f.write_str(name)?;
                if let Some((first, rest)) = args.split_first() {
                    write!(f, "<{first}")?;
                    for arg in rest {
                        write!(f, ",{arg}")?;
                    }
                    f.write_str(">")?;
                }
                Ok(())
            }
            Self::Wildcard => f.write_str("*"),
        }
    }
}

fn malformed(text: &str) -> SnapError {
    SnapError::StreamCorrupted(format!("malformed type key `{text}`"))
}

/// Sanity bound on key nesting; a corrupt stamp cannot recurse the parser
/// (or the skip logic that follows the parsed key) beyond it.
const MAX_KEY_DEPTH: usize = 64;

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Result<&'a str> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b':' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(malformed(&String::from_utf8_lossy(self.bytes)));
        }
        // Identifier bytes are all ASCII, checked above.
        std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| malformed(&String::from_utf8_lossy(self.bytes)))
    }

    fn key(&mut self, depth: usize) -> Result<TypeKey> {
        if depth > MAX_KEY_DEPTH {
            return Err(SnapError::StreamCorrupted(format!(
                "type key nests deeper than {MAX_KEY_DEPTH} levels"
            )));
        }
        if self.eat(b'*') {
            return Ok(TypeKey::Wildcard);
        }
        let name = self.ident()?;
        let mut args = Vec::new();
        if self.eat(b'<') {
            loop {
                args.push(self.key(depth + 1)?);
                if self.eat(b',') {
                    continue;
                }
                if self.eat(b'>') {
                    break;
                }
                return Err(malformed(&String::from_utf8_lossy(self.bytes)));
            }
        }
        self.assemble(name, args)
    }

    fn assemble(&self, name: &str, mut args: Vec<TypeKey>) -> Result<TypeKey> {
        let full = || String::from_utf8_lossy(self.bytes).into_owned();
        let one = |args: &mut Vec<TypeKey>| -> Result<Box<TypeKey>> {
            if args.len() != 1 {
                return Err(malformed(&full()));
            }
            Ok(Box::new(args.pop().ok_or_else(|| malformed(&full()))?))
        };
        let key = match name {
            "opt" => TypeKey::Opt(one(&mut args)?),
            "vec" => TypeKey::List(one(&mut args)?),
            "deque" => TypeKey::Deque(one(&mut args)?),
            "stack" => TypeKey::Stack(one(&mut args)?),
            "set" => TypeKey::Set(one(&mut args)?),
            "arr" => TypeKey::Array(one(&mut args)?),
            "ref" => TypeKey::Ref(one(&mut args)?),
            "map" => {
                if args.len() != 2 {
                    return Err(malformed(&full()));
                }
                let v = args.pop().ok_or_else(|| malformed(&full()))?;
                let k = args.pop().ok_or_else(|| malformed(&full()))?;
                TypeKey::Map(Box::new(k), Box::new(v))
            }
            leaf if args.is_empty() => match leaf {
                "bool" => TypeKey::Bool,
                "u8" => TypeKey::U8,
                "u16" => TypeKey::U16,
                "u32" => TypeKey::U32,
                "u64" => TypeKey::U64,
                "i8" => TypeKey::I8,
                "i16" => TypeKey::I16,
                "i32" => TypeKey::I32,
                "i64" => TypeKey::I64,
                "f32" => TypeKey::F32,
                "f64" => TypeKey::F64,
                "char" => TypeKey::Char,
                "str" => TypeKey::Str,
                "time" => TypeKey::Time,
                "dur" => TypeKey::Dur,
                other => TypeKey::named(other),
            },
            generic => TypeKey::Named(generic.to_owned(), args),
        };
        Ok(key)
    }
}

/// Structural match of a concrete `key` against a `pattern` that may
/// contain wildcards. Used by surrogate pattern rules.
pub fn key_matches(pattern: &TypeKey, key: &TypeKey) -> bool {
    match (pattern, key) {
        (TypeKey::Wildcard, _) => true,
        (TypeKey::Opt(p), TypeKey::Opt(k))
        | (TypeKey::List(p), TypeKey::List(k))
        | (TypeKey::Deque(p), TypeKey::Deque(k))
        | (TypeKey::Stack(p), TypeKey::Stack(k))
        | (TypeKey::Set(p), TypeKey::Set(k))
        | (TypeKey::Array(p), TypeKey::Array(k))
        | (TypeKey::Ref(p), TypeKey::Ref(k)) => key_matches(p, k),
        (TypeKey::Map(pk, pv), TypeKey::Map(kk, kv)) => {
            key_matches(pk, kk) && key_matches(pv, kv)
        }
        (TypeKey::Named(pn, pa), TypeKey::Named(kn, ka)) => {
            pn == kn
                && pa.len() == ka.len()
                && pa.iter().zip(ka).all(|(p, k)| key_matches(p, k))
        }
        _ => pattern == key,
    }
}

/// One field of a stamped type: its name and canonical key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name as declared.
    pub name: String,
    /// Canonical shape of the field's type.
    pub key: TypeKey,
}

impl FieldDescriptor {
    /// Builds a descriptor for one named field.
    pub fn new(name: impl Into<String>, key: TypeKey) -> Self {
        Self {
            name: name.into(),
            key,
        }
    }
}

// Stamp flag bits.
const FLAG_VALUE_KIND: u8 = 0b0000_0001;
const FLAG_HAS_RAW: u8 = 0b0000_0010;

/// The stamped description of one type: what the writer embeds in the
/// stream on a type's first appearance, and what the reader diffs against
/// its local registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    /// Stable identity string. The write and read side pair types by this
    /// name, never by in-process type ids.
    pub identity: String,
    /// Whether instances are copied inline (`true`) rather than tracked as
    /// shared objects.
    pub value_kind: bool,
    /// Whether entries of this type carry a trailing raw block.
    pub has_raw: bool,
    /// Ordered field list; sorted by name at registration time. Empty in
    /// simple stamping, where structure is not recorded.
    pub fields: Vec<FieldDescriptor>,
}

impl TypeDescriptor {
    /// Writes this descriptor as a stream stamp under `mode`.
    pub(crate) fn write_stamp(&self, mode: StampMode, wire: &mut dyn WireWrite) -> Result<()> {
        wire.put_str(&self.identity)?;
        if mode == StampMode::Simple {
            return Ok(());
        }
        let mut flags = 0u8;
        if self.value_kind {
            flags |= FLAG_VALUE_KIND;
        }
        if self.has_raw {
            flags |= FLAG_HAS_RAW;
        }
        wire.put_u8(flags)?;
        wire.put_varint(self.fields.len() as u64)?;
        for field in &self.fields {
            wire.put_str(&field.name)?;
            wire.put_str(&field.key.to_string())?;
        }
        Ok(())
    }

    /// Reads a stream stamp written under `mode`.
    pub(crate) fn read_stamp(mode: StampMode, wire: &mut dyn WireRead) -> Result<Self> {
        let identity = wire.take_str()?;
        if mode == StampMode::Simple {
            return Ok(Self {
                identity,
                value_kind: false,
                has_raw: false,
                fields: Vec::new(),
            });
        }
        let flags = wire.take_u8()?;
        let count = wire.take_varint()?;
        let mut fields = Vec::with_capacity((count as usize).min(256));
        for _ in 0..count {
            let name = wire.take_str()?;
            let key = TypeKey::parse(&wire.take_str()?)?;
            fields.push(FieldDescriptor { name, key });
        }
        Ok(Self {
            identity,
            value_kind: flags & FLAG_VALUE_KIND != 0,
            has_raw: flags & FLAG_HAS_RAW != 0,
            fields,
        })
    }
}
