//! Container shapes with dedicated wire forms: the rank-prefixed
//! multidimensional array and the LIFO stack.

use crate::descriptor::TypeKey;
use crate::error::{Result, SnapError};
use crate::meta::TypeRegistry;
use crate::pack::Pack;
use crate::reader::ReadCx;
use crate::writer::WriteCx;

/// Sanity bound on array rank; a corrupt stream cannot claim more.
const MAX_RANK: u64 = 32;

/// A dense row-major array of arbitrary rank.
///
/// The wire form is self-describing: rank, then one length per dimension,
/// then `len0 * len1 * ...` elements in row-major order. A rank of zero
/// encodes the empty array.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NdArray<T> {
    dims: Vec<usize>,
    data: Vec<T>,
}

impl<T> NdArray<T> {
    /// Builds an array from its dimensions and row-major element buffer.
    ///
    /// # Errors
    /// `Contract` when `data.len()` is not the product of `dims` (an empty
    /// `dims` requires an empty buffer).
    pub fn new(dims: Vec<usize>, data: Vec<T>) -> Result<Self> {
        let expected = if dims.is_empty() {
            0
        } else {
            checked_volume(&dims)?
        };
        if data.len() != expected {
            return Err(SnapError::Contract(format!(
                "array of dimensions {dims:?} needs {expected} elements, got {}",
                data.len()
            )));
        }
        Ok(Self { dims, data })
    }

    /// The length of each dimension.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// The element buffer in row-major order.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Element at a full coordinate, or `None` when out of bounds or of
    /// the wrong rank.
    pub fn get(&self, coords: &[usize]) -> Option<&T> {
        self.data.get(self.offset(coords)?)
    }

    /// Mutable element access, same addressing as [`NdArray::get`].
    pub fn get_mut(&mut self, coords: &[usize]) -> Option<&mut T> {
        let offset = self.offset(coords)?;
        self.data.get_mut(offset)
    }

    fn offset(&self, coords: &[usize]) -> Option<usize> {
        if coords.len() != self.dims.len() || self.dims.is_empty() {
            return None;
        }
        let mut offset = 0usize;
        for (&c, &d) in coords.iter().zip(&self.dims) {
            if c >= d {
                return None;
            }
            offset = offset.checked_mul(d)?.checked_add(c)?;
        }
        Some(offset)
    }
}

fn checked_volume(dims: &[usize]) -> Result<usize> {
    dims.iter().try_fold(1usize, |acc, &d| {
        acc.checked_mul(d)
            .ok_or_else(|| SnapError::Contract("array volume overflows usize".into()))
    })
}

impl<T: Pack> Pack for NdArray<T> {
    fn type_key() -> TypeKey {
        TypeKey::Array(Box::new(T::type_key()))
    }

    fn write_into(&self, cx: &mut WriteCx<'_>) -> Result<()> {
        cx.ensure_collections_allowed()?;
        cx.wire().put_varint(self.dims.len() as u64)?;
        for &dim in &self.dims {
            cx.wire().put_varint(dim as u64)?;
        }
        for item in &self.data {
            item.write_into(cx)?;
        }
        Ok(())
    }

    fn read_from(cx: &mut ReadCx<'_>) -> Result<Self> {
        cx.ensure_collections_allowed()?;
        let rank = cx.wire().take_varint()?;
        if rank > MAX_RANK {
            return Err(SnapError::StreamCorrupted(format!(
                "array rank {rank} exceeds the supported maximum"
            )));
        }
        let mut dims = Vec::with_capacity(rank as usize);
        for _ in 0..rank {
            let dim = usize::try_from(cx.wire().take_varint()?).map_err(|_| {
                SnapError::StreamCorrupted("array dimension out of range".into())
            })?;
            dims.push(dim);
        }
        let volume = if dims.is_empty() {
            0
        } else {
            checked_volume(&dims)
                .map_err(|_| SnapError::StreamCorrupted("array volume overflows".into()))?
        };
        let mut data = Vec::with_capacity(volume.min(4096));
        for _ in 0..volume {
            data.push(T::read_from(cx)?);
        }
        Ok(Self { dims, data })
    }

    fn register_with(registry: &TypeRegistry) -> Result<()> {
        T::register_with(registry)
    }
}

/// A LIFO stack. Iterates and serializes top-first, and deserializes back
/// to the same pop order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Stack<T> {
    // Bottom of the stack at index 0.
    items: Vec<T>,
}

impl<T> Stack<T> {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Pushes onto the top.
    pub fn push(&mut self, value: T) {
        self.items.push(value);
    }

    /// Removes and returns the top element.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop()
    }

    /// The top element without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.items.last()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the stack holds no elements.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates from the top of the stack downwards.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter().rev()
    }
}

impl<T> From<Vec<T>> for Stack<T> {
    /// The last element of the vector becomes the top of the stack.
    fn from(items: Vec<T>) -> Self {
        Self { items }
    }
}

impl<T: Pack> Pack for Stack<T> {
    fn type_key() -> TypeKey {
        TypeKey::Stack(Box::new(T::type_key()))
    }

    fn write_into(&self, cx: &mut WriteCx<'_>) -> Result<()> {
        cx.ensure_collections_allowed()?;
        cx.wire().put_varint(self.items.len() as u64)?;
        for item in self.iter() {
            item.write_into(cx)?;
        }
        Ok(())
    }

    fn read_from(cx: &mut ReadCx<'_>) -> Result<Self> {
        cx.ensure_collections_allowed()?;
        let n = usize::try_from(cx.wire().take_varint()?).map_err(|_| {
            SnapError::StreamCorrupted("collection count out of range".into())
        })?;
        // Elements arrive top-first; reverse to restore bottom-at-zero.
        let mut items = Vec::with_capacity(n.min(4096));
        for _ in 0..n {
            items.push(T::read_from(cx)?);
        }
        items.reverse();
        Ok(Self { items })
    }

    fn register_with(registry: &TypeRegistry) -> Result<()> {
        T::register_with(registry)
    }
}
