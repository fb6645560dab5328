//! Shared, mutable object handles.
//!
//! [`Obj<T>`] is the reference wrapper the engine tracks by identity: two
//! `Obj<T>` values that clone from the same origin serialize as one stream
//! object and deserialize back into one shared instance. Plain values and
//! nested structs held by value are copied inline instead and carry no
//! identity.

use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

/// A type-erased strong handle to a tracked object.
///
/// The concrete pointee is always a `RefCell<T>`, which is what makes the
/// safe `Rc::downcast` in [`downcast_handle`](crate::rt::downcast_handle)
/// possible.
pub type Handle = Rc<dyn Any>;

/// The identity key of a handle: the address of its shared cell.
///
/// Cast to a thin pointer so handles to the same allocation compare equal
/// regardless of how the `dyn Any` metadata was produced.
pub(crate) fn handle_key(handle: &Handle) -> *const () {
    Rc::as_ptr(handle) as *const ()
}

/// A shared, mutable, identity-tracked reference to a `T`.
///
/// Cloning an `Obj` clones the handle, not the value; all clones observe
/// mutations made through any of them. Fields of type `Obj<T>` are the
/// only places the serializer preserves aliasing and permits cycles.
///
/// ```
/// use snapgraph::Obj;
///
/// let a = Obj::new(vec![1, 2, 3]);
/// let b = a.clone();
/// b.borrow_mut().push(4);
/// assert_eq!(a.borrow().len(), 4);
/// assert!(Obj::ptr_eq(&a, &b));
/// ```
pub struct Obj<T: 'static> {
    pub(crate) cell: Rc<RefCell<T>>,
}

impl<T: 'static> Obj<T> {
    /// Moves a value onto the shared heap and returns a handle to it.
    pub fn new(value: T) -> Self {
        Self {
            cell: Rc::new(RefCell::new(value)),
        }
    }

    /// Immutably borrows the value.
    ///
    /// # Panics
    /// Panics if the value is currently mutably borrowed, as `RefCell`
    /// does.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.cell.borrow()
    }

    /// Mutably borrows the value.
    ///
    /// # Panics
    /// Panics if the value is currently borrowed, as `RefCell` does.
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.cell.borrow_mut()
    }

    /// Whether two handles point at the same shared instance.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.cell, &b.cell)
    }

    /// The type-erased handle used by the reference table and by dynamic
    /// surrogate rules.
    pub fn to_handle(&self) -> Handle {
        self.cell.clone() as Handle
    }

    /// Rebuilds a typed handle from an erased one.
    ///
    /// Returns `None` when the handle's pointee is not a `RefCell<T>`.
    pub fn from_handle(handle: &Handle) -> Option<Self> {
        let cell = handle.clone().downcast::<RefCell<T>>().ok()?;
        Some(Self { cell })
    }
}

impl<T: 'static> Clone for Obj<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T: Default + 'static> Default for Obj<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Obj<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.try_borrow() {
            Ok(v) => f.debug_tuple("Obj").field(&*v).finish(),
            Err(_) => f.debug_tuple("Obj").field(&"<borrowed>").finish(),
        }
    }
}

impl<T: PartialEq + 'static> PartialEq for Obj<T> {
    /// Structural equality on the pointed-to values. Use [`Obj::ptr_eq`]
    /// for identity.
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell) || *self.borrow() == *other.borrow()
    }
}
