//! Type-erased runtime entry points.
//!
//! The registry stores plain function pointers to the generic functions
//! here, monomorphized once per registered type. Everything downstream of
//! registration (record loops, desurrogation, hooks) runs through these
//! without naming concrete types.
//!
//! `write_inline` and `read_inline` are the entry points the derive macro
//! routes by-value nested objects through; they are public for the
//! generated code only.

use std::any;
use std::cell::RefCell;
use std::rc::Rc;

use crate::codec::{WireRead, WireWrite};
use crate::compare::{FieldPlan, PlanStep};
use crate::error::{Result, SnapError};
use crate::meta::Snap;
use crate::obj::{Handle, Obj};
use crate::pack::Pack;
use crate::reader::ReadCx;
use crate::writer::WriteCx;

pub(crate) fn downcast_handle<T: 'static>(handle: &Handle) -> Result<Obj<T>> {
    Obj::from_handle(handle).ok_or_else(|| {
        SnapError::Internal("tracked handle does not hold the expected type".into())
    })
}

pub(crate) fn erased_factory<T: Default + 'static>() -> Handle {
    Rc::new(RefCell::new(T::default()))
}

pub(crate) fn write_object<T: Snap>(handle: &Handle, cx: &mut WriteCx<'_>) -> Result<()> {
    downcast_handle::<T>(handle)?.borrow().write_fields(cx)
}

pub(crate) fn read_object<T: Snap>(
    handle: &Handle,
    plan: &FieldPlan,
    cx: &mut ReadCx<'_>,
) -> Result<()> {
    let obj = downcast_handle::<T>(handle)?;
    let mut value = obj.borrow_mut();
    apply_plan(&mut *value, plan, cx)
}

pub(crate) fn write_value<T: Pack + Default + 'static>(
    handle: &Handle,
    cx: &mut WriteCx<'_>,
) -> Result<()> {
    downcast_handle::<T>(handle)?.borrow().write_into(cx)
}

pub(crate) fn read_value<T: Pack + Default + 'static>(
    handle: &Handle,
    _plan: &FieldPlan,
    cx: &mut ReadCx<'_>,
) -> Result<()> {
    let value = T::read_from(cx)?;
    *downcast_handle::<T>(handle)?.borrow_mut() = value;
    Ok(())
}

/// Moves the value out of `src` into `dst`, leaving `src` defaulted.
/// The desurrogation step uses this to fill a placeholder in place so
/// every holder of the placeholder observes the rebuilt value.
pub(crate) fn assign<T: Default + 'static>(src: &Handle, dst: &Handle) -> Result<()> {
    let src = downcast_handle::<T>(src)?;
    let dst = downcast_handle::<T>(dst)?;
    let moved = std::mem::take(&mut *src.borrow_mut());
    *dst.borrow_mut() = moved;
    Ok(())
}

pub(crate) fn hook_pre<T: Snap>(handle: &Handle) -> Result<()> {
    downcast_handle::<T>(handle)?.borrow_mut().pre_serialize();
    Ok(())
}

pub(crate) fn hook_post_write<T: Snap>(handle: &Handle) -> Result<()> {
    downcast_handle::<T>(handle)?.borrow().post_serialize();
    Ok(())
}

pub(crate) fn hook_post_read<T: Snap>(handle: &Handle) -> Result<()> {
    downcast_handle::<T>(handle)?.borrow_mut().post_deserialize();
    Ok(())
}

pub(crate) fn hook_noop(_handle: &Handle) -> Result<()> {
    Ok(())
}

pub(crate) fn write_raw<T: Snap>(handle: &Handle, wire: &mut dyn WireWrite) -> Result<()> {
    downcast_handle::<T>(handle)?.borrow().write_raw(wire)
}

pub(crate) fn read_raw<T: Snap>(handle: &Handle, wire: &mut dyn WireRead) -> Result<()> {
    downcast_handle::<T>(handle)?.borrow_mut().read_raw(wire)
}

pub(crate) fn raw_noop_write(_handle: &Handle, _wire: &mut dyn WireWrite) -> Result<()> {
    Ok(())
}

pub(crate) fn raw_noop_read(_handle: &Handle, _wire: &mut dyn WireRead) -> Result<()> {
    Ok(())
}

/// Replays a compiled field plan against a value under population.
pub(crate) fn apply_plan<T: Snap>(
    value: &mut T,
    plan: &FieldPlan,
    cx: &mut ReadCx<'_>,
) -> Result<()> {
    for step in &plan.steps {
        match step {
            PlanStep::Read(name) => value.read_field(name, cx)?,
            PlanStep::Skip(key) => cx.skip_value(key)?,
        }
    }
    Ok(())
}

/// Encodes a by-value nested object: type binding, fields, raw block.
/// Inline values carry no identity and fire no lifecycle hooks.
#[doc(hidden)]
pub fn write_inline<T: Snap>(value: &T, cx: &mut WriteCx<'_>) -> Result<()> {
    let entry = cx
        .provider
        .entry_for_any(any::TypeId::of::<RefCell<T>>())
        .ok_or_else(|| {
            SnapError::Internal(format!(
                "inline type `{}` was never registered",
                T::type_key()
            ))
        })?;
    cx.bind_type(&entry.descriptor)?;
    value.write_fields(cx)?;
    if T::HAS_RAW {
        let start = cx.wire().position();
        value.write_raw(cx.wire())?;
        let delta = cx.wire().position() - start;
        cx.wire().put_varint(delta)?;
    }
    Ok(())
}

/// Decodes a by-value nested object written by [`write_inline`].
#[doc(hidden)]
pub fn read_inline<T: Snap>(cx: &mut ReadCx<'_>) -> Result<T> {
    let binding = cx.read_binding()?;
    if binding.local.any != any::TypeId::of::<RefCell<T>>() {
        return Err(SnapError::TypeStructureChanged(format!(
            "stream holds an inline `{}` where `{}` was expected",
            binding.local.descriptor.identity,
            T::type_key()
        )));
    }
    let mut value = T::default();
    apply_plan(&mut value, &binding.plan, cx)?;
    if binding.stream_has_raw {
        let start = cx.wire().position();
        value.read_raw(cx.wire())?;
        let consumed = cx.wire().position() - start;
        let declared = cx.wire().take_varint()?;
        if declared != consumed {
            return Err(SnapError::StreamCorrupted(format!(
                "raw block of `{}` consumed {consumed} bytes, stream recorded {declared}",
                binding.local.descriptor.identity
            )));
        }
    }
    Ok(value)
}
