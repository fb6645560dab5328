//! Surrogate substitution: swapping objects for stand-ins at the stream
//! boundary.
//!
//! A rule pairs a match condition on the original's [`TypeKey`] with a
//! `wrap` conversion (original to surrogate, write side) and an `unwrap`
//! conversion (surrogate back to original, read side). Substitution
//! preserves reference identity: every site that pointed at the original
//! points at the one rebuilt instance after rehydration.
//!
//! When several rules match the same key, the winner is chosen by matcher
//! class first (exact, then pattern, then predicate), then by descending
//! priority, then by registration order.

use std::any;
use std::cell::RefCell;
use std::sync::{Arc, PoisonError, RwLock};

use crate::descriptor::{key_matches, TypeKey};
use crate::error::Result;
use crate::meta::{Snap, TypeRegistry};
use crate::obj::{Handle, Obj};
use crate::pack::Pack;
use crate::rt;

type Convert = Box<dyn Fn(&Handle) -> Result<Handle> + Send + Sync>;
type RegisterTypes = Box<dyn Fn(&TypeRegistry) -> Result<()> + Send + Sync>;

/// How a rule decides whether it applies to an original type.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Applies to exactly this key.
    Exact(TypeKey),
    /// Applies to any key the pattern matches; the pattern may contain
    /// [`TypeKey::Wildcard`] at any position, covering open generics.
    Pattern(TypeKey),
    /// Applies when the predicate accepts the key. The broadest class;
    /// loses ties against exact and pattern rules.
    Predicate(fn(&TypeKey) -> bool),
}

impl Matcher {
    fn rank(&self) -> u8 {
        match self {
            Self::Exact(_) => 0,
            Self::Pattern(_) => 1,
            Self::Predicate(_) => 2,
        }
    }

    fn matches(&self, key: &TypeKey) -> bool {
        match self {
            Self::Exact(exact) => exact == key,
            Self::Pattern(pattern) => key_matches(pattern, key),
            Self::Predicate(accepts) => accepts(key),
        }
    }
}

/// One registered substitution rule.
pub(crate) struct SurrogateRule {
    matcher: Matcher,
    priority: i32,
    seq: u64,
    /// Original to surrogate, applied on the write side.
    pub(crate) wrap: Convert,
    /// Surrogate back to original, applied at the end of a read record.
    pub(crate) unwrap: Convert,
    /// Stream identity of the surrogate type; read-side entries of this
    /// identity that land on a differently-typed placeholder select the
    /// rule.
    pub(crate) surrogate_identity: String,
    /// In-process cell type of the original, when the rule is typed. Used
    /// to verify the unwrap output against the placeholder.
    pub(crate) target_any: Option<any::TypeId>,
    register_types: RegisterTypes,
}

#[derive(Default)]
struct Inner {
    rules: Vec<Arc<SurrogateRule>>,
    next_seq: u64,
}

/// The ordered collection of substitution rules for a session.
///
/// Like the [`TypeRegistry`], it is built up front and shared behind an
/// `Arc`; registration is internally locked.
#[derive(Default)]
pub struct SurrogateRegistry {
    inner: RwLock<Inner>,
}

impl SurrogateRegistry {
    /// Creates an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a typed rule substituting `S` for `T`, matching `T`
    /// exactly, at priority 0.
    pub fn register<T, S>(
        &self,
        wrap: impl Fn(&T) -> S + Send + Sync + 'static,
        unwrap: impl Fn(&S) -> T + Send + Sync + 'static,
    ) -> Result<()>
    where
        T: Pack + Default + 'static,
        S: Snap,
    {
        self.register_prioritized(Matcher::Exact(T::type_key()), 0, wrap, unwrap)
    }

    /// Registers a typed rule with an explicit matcher and priority.
    ///
    /// The matcher may be broader than `T`'s exact key, but every object
    /// it claims must actually be a `T`; a claimed object of another type
    /// fails the write with an internal downcast error.
    pub fn register_prioritized<T, S>(
        &self,
        matcher: Matcher,
        priority: i32,
        wrap: impl Fn(&T) -> S + Send + Sync + 'static,
        unwrap: impl Fn(&S) -> T + Send + Sync + 'static,
    ) -> Result<()>
    where
        T: Pack + Default + 'static,
        S: Snap,
    {
        let wrap: Convert = Box::new(move |h: &Handle| {
            let original = rt::downcast_handle::<T>(h)?;
            let surrogate = wrap(&original.borrow());
            Ok(Obj::new(surrogate).to_handle())
        });
        let unwrap: Convert = Box::new(move |h: &Handle| {
            let surrogate = rt::downcast_handle::<S>(h)?;
            let original = unwrap(&surrogate.borrow());
            Ok(Obj::new(original).to_handle())
        });
        let register_types: RegisterTypes = Box::new(|registry| {
            S::register_heap(registry)?;
            T::register_heap(registry)?;
            T::register_with(registry)
        });
        self.push(SurrogateRule {
            matcher,
            priority,
            seq: 0,
            wrap,
            unwrap,
            surrogate_identity: S::type_key().to_string(),
            target_any: Some(any::TypeId::of::<RefCell<T>>()),
            register_types,
        });
        Ok(())
    }

    /// Registers a rule whose conversions work on erased handles.
    ///
    /// For matchers spanning several original types (patterns,
    /// predicates), where no single `T` exists to type the conversions
    /// against. `wrap` receives the original's handle and must return a
    /// tracked `S`; `unwrap` receives the rebuilt surrogate and must
    /// return an object of the same type as the placeholder it replaces.
    /// Original types claimed this way must be registered by the caller.
    pub fn register_dynamic<S: Snap>(
        &self,
        matcher: Matcher,
        priority: i32,
        wrap: impl Fn(&Handle) -> Result<Handle> + Send + Sync + 'static,
        unwrap: impl Fn(&Handle) -> Result<Handle> + Send + Sync + 'static,
    ) -> Result<()> {
        let register_types: RegisterTypes = Box::new(|registry| S::register_heap(registry));
        self.push(SurrogateRule {
            matcher,
            priority,
            seq: 0,
            wrap: Box::new(wrap),
            unwrap: Box::new(unwrap),
            surrogate_identity: S::type_key().to_string(),
            target_any: None,
            register_types,
        });
        Ok(())
    }

    fn push(&self, mut rule: SurrogateRule) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        rule.seq = inner.next_seq;
        inner.next_seq += 1;
        inner.rules.push(Arc::new(rule));
        inner
            .rules
            .sort_by_key(|r| (r.matcher.rank(), std::cmp::Reverse(r.priority), r.seq));
    }

    /// First rule claiming `key`, in precedence order.
    pub(crate) fn match_write(&self, key: &TypeKey) -> Option<Arc<SurrogateRule>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .rules
            .iter()
            .find(|r| r.matcher.matches(key))
            .cloned()
    }

    /// First rule whose surrogate identity matches a stream entry that
    /// landed on a placeholder of `placeholder_any`'s type.
    pub(crate) fn match_read(
        &self,
        surrogate_identity: &str,
        placeholder_any: any::TypeId,
    ) -> Option<Arc<SurrogateRule>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .rules
            .iter()
            .find(|r| {
                r.surrogate_identity == surrogate_identity
                    && r.target_any.map_or(true, |t| t == placeholder_any)
            })
            .cloned()
    }

    /// Registers every rule's surrogate (and typed original) types with
    /// the provider. Sessions call this once at open.
    pub(crate) fn register_all(&self, registry: &TypeRegistry) -> Result<()> {
        let rules: Vec<Arc<SurrogateRule>> = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            inner.rules.clone()
        };
        for rule in rules {
            (rule.register_types)(registry)?;
        }
        Ok(())
    }
}
