//! Bound-deleter handles.
//!
//! [`Owned<T>`] pairs a pointer to a producer-allocated value with the
//! [`DeleterBinding`] the producer attached when it allocated the value. The
//! consumer never chooses how the value is freed: dropping or resetting the
//! handle invokes the bound deleter exactly once, inside the producer's
//! allocator context.
//!
//! [`Shared<T>`] is the explicit opt-in to shared ownership. Clones share one
//! atomic reference count; the deleter of the original owner runs when the last
//! clone goes away. [`WeakShared<T>`] is a back-reference that can be upgraded
//! only while at least one strong clone exists.

use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::{Arc, Weak};

use crossheap_common::{Error, OriginTag, ResourceId, Result};

use crate::interface::ReleaseTicket;
use crate::module::Module;

/// Release capability captured when a resource is allocated.
///
/// Only [`Module::bind`] and [`Module::bind_with`] create bindings, so a
/// binding always targets an allocation of the module that made it.
pub struct DeleterBinding<T: ?Sized> {
    ticket: ReleaseTicket,
    delete: Box<dyn FnOnce(NonNull<T>) + Send>,
}

impl<T: ?Sized> DeleterBinding<T> {
    pub fn id(&self) -> ResourceId {
        self.ticket.id()
    }

    pub fn origin(&self) -> OriginTag {
        self.ticket.origin()
    }

    /// Frees `ptr` through the bound deleter.
    ///
    /// The creation record is consumed first; if the registry rejects the
    /// release, the value is leaked rather than freed.
    fn invoke(self, ptr: NonNull<T>) -> Result<()> {
        let DeleterBinding { ticket, delete } = self;
        ticket.retire()?;
        delete(ptr);
        Ok(())
    }
}

/// Move-only owner of a producer-allocated value and its deleter.
pub struct Owned<T> {
    bound: Option<(NonNull<T>, DeleterBinding<T>)>,
}

// SAFETY: `Owned` owns its value exclusively; the deleter is `Send`.
unsafe impl<T: Send> Send for Owned<T> {}

// SAFETY: shared access only reaches `&T`; the deleter is used through
// `&mut self` or by value.
unsafe impl<T: Sync> Sync for Owned<T> {}

impl<T> Owned<T> {
    /// An empty handle owning nothing.
    pub const fn empty() -> Owned<T> {
        Owned { bound: None }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bound.is_none()
    }

    pub fn id(&self) -> Option<ResourceId> {
        self.bound.as_ref().map(|(_, binding)| binding.id())
    }

    pub fn origin(&self) -> Option<OriginTag> {
        self.bound.as_ref().map(|(_, binding)| binding.origin())
    }

    pub fn get(&self) -> Result<&T> {
        match &self.bound {
            // SAFETY: the pointer stays valid until the binding is invoked,
            // which requires `&mut self`.
            Some((ptr, _)) => Ok(unsafe { ptr.as_ref() }),
            None => Err(Error::dangling_use(None)),
        }
    }

    pub fn get_mut(&mut self) -> Result<&mut T> {
        match &mut self.bound {
            // SAFETY: exclusive access through `&mut self`.
            Some((ptr, _)) => Ok(unsafe { ptr.as_mut() }),
            None => Err(Error::dangling_use(None)),
        }
    }

    /// Moves the value and its binding out, leaving `self` empty.
    pub fn take(&mut self) -> Owned<T> {
        Owned {
            bound: self.bound.take(),
        }
    }

    /// Invokes the bound deleter if the handle is non-empty, then marks it empty.
    ///
    /// A no-op on an empty handle.
    pub fn reset(&mut self) -> Result<()> {
        match self.bound.take() {
            Some((ptr, binding)) => binding.invoke(ptr),
            None => Ok(()),
        }
    }

    /// Converts into shared ownership. The deleter stays bound to the producer.
    pub fn into_shared(self) -> Result<Shared<T>> {
        if self.is_empty() {
            return Err(Error::dangling_use(None));
        }
        Ok(Shared(Arc::new(SharedInner { owned: self })))
    }
}

impl<T> Default for Owned<T> {
    fn default() -> Self {
        Owned::empty()
    }
}

impl<T> Drop for Owned<T> {
    fn drop(&mut self) {
        if let Err(e) = self.reset() {
            log::error!("bound deleter failed: {e}");
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Owned<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.get() {
            Ok(value) => f
                .debug_struct("Owned")
                .field("id", &self.id())
                .field("value", value)
                .finish(),
            Err(_) => f.write_str("Owned(empty)"),
        }
    }
}

/// Reference-counted owner of a producer-allocated value.
pub struct Shared<T>(Arc<SharedInner<T>>);

struct SharedInner<T> {
    /// Never empty.
    owned: Owned<T>,
}

impl<T> Shared<T> {
    #[inline]
    pub fn get(&self) -> &T {
        self
    }

    /// Number of strong clones, including this one.
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn downgrade(&self) -> WeakShared<T> {
        WeakShared(Arc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &Shared<T>) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn id(&self) -> Option<ResourceId> {
        self.0.owned.id()
    }

    pub fn origin(&self) -> Option<OriginTag> {
        self.0.owned.origin()
    }

    /// Recovers exclusive ownership if this is the only strong clone.
    pub fn try_unwrap(self) -> std::result::Result<Owned<T>, Shared<T>> {
        match Arc::try_unwrap(self.0) {
            Ok(mut inner) => Ok(inner.owned.take()),
            Err(arc) => Err(Shared(arc)),
        }
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Shared(self.0.clone())
    }
}

impl<T> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.0.owned.bound {
            // SAFETY: `SharedInner::owned` is never emptied while the inner
            // value is shared, and mutable access is never handed out.
            Some((ptr, _)) => unsafe { ptr.as_ref() },
            None => unreachable!("shared handle without a value"),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("id", &self.id())
            .field("strong", &self.strong_count())
            .field("value", &**self)
            .finish()
    }
}

/// Non-owning back-reference to a [`Shared`] value.
pub struct WeakShared<T>(Weak<SharedInner<T>>);

impl<T> WeakShared<T> {
    /// Takes a new strong reference if the count has not reached zero.
    ///
    /// The count is incremented with compare-and-swap from a non-zero value,
    /// so an upgrade racing with the final drop either wins (and the deleter
    /// waits for the new clone) or returns `None`; it never revives a value
    /// whose deleter has started.
    pub fn upgrade(&self) -> Option<Shared<T>> {
        self.0.upgrade().map(Shared)
    }

    pub fn strong_count(&self) -> usize {
        self.0.strong_count()
    }
}

impl<T> Clone for WeakShared<T> {
    fn clone(&self) -> Self {
        WeakShared(self.0.clone())
    }
}

impl Module {
    /// Allocates `value` in this module and binds this module's deleter to it.
    pub fn bind<T: Send + 'static>(&self, value: T) -> Result<Owned<T>> {
        self.bind_with(Box::new(value), drop)
    }

    /// Binds a producer-specific destroyer to a value allocated by this module.
    ///
    /// `destroy` runs exactly once, when the returned handle (or the last
    /// clone of a [`Shared`] made from it) is released.
    pub fn bind_with<T, F>(&self, value: Box<T>, destroy: F) -> Result<Owned<T>>
    where
        T: Send + 'static,
        F: FnOnce(Box<T>) + Send + 'static,
    {
        let ticket = self.ticket("bound", std::mem::size_of::<T>() as u64)?;
        let ptr = NonNull::from(Box::leak(value));
        let delete = Box::new(move |ptr: NonNull<T>| {
            // SAFETY: `ptr` came from `Box::leak` above and the binding is
            // invoked at most once.
            destroy(unsafe { Box::from_raw(ptr.as_ptr()) })
        });
        Ok(Owned {
            bound: Some((ptr, DeleterBinding { ticket, delete })),
        })
    }

    /// Allocates `value` under shared ownership.
    pub fn bind_shared<T: Send + Sync + 'static>(&self, value: T) -> Result<Shared<T>> {
        self.bind(value)?.into_shared()
    }
}
