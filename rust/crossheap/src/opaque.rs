//! Opaque handles with a matching factory/destroyer pair.
//!
//! The producer keeps resources in a generational [`HandleTable`] and gives out
//! [`Handle`]s: plain `#[repr(C)]` data naming a slot, its generation, the
//! resource identity and the creating module's tag. A handle carries no
//! ownership and gives no access to the resource's layout; only the table that
//! issued it can reach the resource or destroy it.
//!
//! Handles are `Copy`, like the raw pointers or integers they replace at a
//! module boundary, so a consumer can present a handle twice. The table rejects
//! the second destroy with `DoubleRelease` in every configuration: through the
//! registry's tombstones when verification is enabled, and through the slot
//! generation otherwise.

use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crossheap_common::{Error, OriginTag, ResourceId, Result};
use crossheap_quota::Lease;

use crate::module::Module;

/// Untyped form of a [`Handle`], as passed through a C ABI.
///
/// All-zero is the null handle.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RawHandle {
    pub id: u64,
    pub origin: u64,
    pub index: u32,
    pub generation: u32,
}

impl RawHandle {
    pub const NULL: RawHandle = RawHandle {
        id: 0,
        origin: 0,
        index: 0,
        generation: 0,
    };

    #[inline]
    pub fn is_null(&self) -> bool {
        self.id == 0
    }
}

/// Typed reference to a resource of type `T` living in a producer's table.
#[repr(transparent)]
pub struct Handle<T> {
    raw: RawHandle,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub const NULL: Handle<T> = Handle {
        raw: RawHandle::NULL,
        _marker: PhantomData,
    };

    pub fn from_raw(raw: RawHandle) -> Handle<T> {
        Handle {
            raw,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn into_raw(self) -> RawHandle {
        self.raw
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.raw.is_null()
    }

    pub fn id(&self) -> Option<ResourceId> {
        ResourceId::from_raw(self.raw.id)
    }

    /// The tag this handle claims for its creator.
    pub fn origin(&self) -> Option<OriginTag> {
        OriginTag::from_raw(self.raw.origin)
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            return f.write_str("Handle(null)");
        }
        f.debug_struct("Handle")
            .field("id", &self.raw.id)
            .field("origin", &self.raw.origin)
            .field("index", &self.raw.index)
            .field("generation", &self.raw.generation)
            .finish()
    }
}

/// Producer-owned generational table of resources.
pub struct HandleTable<T> {
    module: Module,
    kind: &'static str,
    slots: Mutex<Slots<T>>,
}

struct Slots<T> {
    entries: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

struct Slot<T> {
    generation: u32,
    occupant: Option<Occupant<T>>,
}

struct Occupant<T> {
    id: ResourceId,
    value: T,
    _lease: Lease,
}

impl<T> HandleTable<T> {
    /// Creates an empty table allocating from `module`.
    ///
    /// `kind` names the resource shape in registry records and logs.
    pub fn new(module: &Module, kind: &'static str) -> HandleTable<T> {
        HandleTable {
            module: module.clone(),
            kind,
            slots: Mutex::new(Slots {
                entries: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn origin(&self) -> OriginTag {
        self.module.origin()
    }

    /// Number of live resources.
    pub fn len(&self) -> usize {
        self.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores `value`, charging `size_of::<T>()` bytes to the module.
    pub fn create(&self, value: T) -> Result<Handle<T>> {
        self.create_with_charge(value, std::mem::size_of::<T>() as u64)
    }

    /// Stores `value`, charging `bytes` to the module.
    ///
    /// Fails with `AllocationFailure` when the module's quota cannot cover the
    /// charge; no slot, record or charge is left behind.
    pub fn create_with_charge(&self, value: T, bytes: u64) -> Result<Handle<T>> {
        let lease = self.module.lease(self.kind, bytes)?;
        let id = ResourceId::next();
        let mut slots = self.lock();
        let index = match slots.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(slots.entries.len())
                    .map_err(|_| Error::allocation_failure(self.kind, bytes))?;
                slots.entries.push(Slot {
                    generation: 0,
                    occupant: None,
                });
                index
            }
        };
        if let Err(e) = self.module.register(id, self.kind) {
            slots.free.push(index);
            return Err(e);
        }
        let slot = &mut slots.entries[index as usize];
        slot.occupant = Some(Occupant {
            id,
            value,
            _lease: lease,
        });
        let generation = slot.generation;
        slots.live += 1;
        log::debug!("{} created {id} in slot {index}", self.origin());
        Ok(Handle::from_raw(RawHandle {
            id: id.get(),
            origin: self.origin().get(),
            index,
            generation,
        }))
    }

    /// Destroys the resource named by `handle` inside this table's module.
    ///
    /// The resource is dropped only when the handle was issued by this table,
    /// names a live slot and (with verification) its creation record matches.
    pub fn destroy(&self, handle: Handle<T>) -> Result<()> {
        self.remove(handle).map(drop)
    }

    /// Like [`destroy`](Self::destroy), but hands the value back to the producer
    /// instead of dropping it.
    pub fn remove(&self, handle: Handle<T>) -> Result<T> {
        let id = self.check_handle(&handle)?;
        let mut slots = self.lock();
        if !slots.matches(&handle, id) {
            let fallback = slots.stale_error(&handle, id);
            drop(slots);
            return Err(self.module.reject(id, fallback));
        }
        self.module.release_record(id)?;
        let index = handle.raw.index;
        let slot = &mut slots.entries[index as usize];
        let occupant = slot.occupant.take();
        slot.generation = slot.generation.wrapping_add(1);
        slots.free.push(index);
        slots.live -= 1;
        drop(slots);
        occupant
            .map(|o| o.value)
            .ok_or_else(|| Error::double_release(id))
    }

    /// Runs `f` on the resource. `f` must not call back into this table.
    pub fn with<R>(&self, handle: Handle<T>, f: impl FnOnce(&T) -> R) -> Result<R> {
        let id = self.check_handle(&handle)?;
        let slots = self.lock();
        if let Some(occupant) = slots.occupant(&handle, id) {
            return Ok(f(&occupant.value));
        }
        drop(slots);
        Err(self.dangling(id))
    }

    /// Runs `f` on the resource mutably. `f` must not call back into this table.
    pub fn with_mut<R>(&self, handle: Handle<T>, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let id = self.check_handle(&handle)?;
        let mut slots = self.lock();
        if let Some(occupant) = slots.occupant_mut(&handle, id) {
            return Ok(f(&mut occupant.value));
        }
        drop(slots);
        Err(self.dangling(id))
    }

    /// Whether `handle` names a live resource of this table.
    pub fn contains(&self, handle: Handle<T>) -> bool {
        match handle.id() {
            Some(id) => handle.origin() == Some(self.origin()) && self.lock().matches(&handle, id),
            None => false,
        }
    }

    /// Validates the handle's identity and claimed origin before any slot lookup.
    fn check_handle(&self, handle: &Handle<T>) -> Result<ResourceId> {
        let Some(id) = handle.id() else {
            return Err(Error::invalid_arg("handle", "null handle"));
        };
        let presented = self.origin();
        match handle.origin() {
            Some(claimed) if claimed == presented => Ok(id),
            claimed => {
                let expected = self
                    .module
                    .registry()
                    .and_then(|r| r.origin_of(id))
                    .or(claimed);
                let err = match expected {
                    Some(expected) => Error::origin_mismatch(id, expected, presented),
                    None => Error::unknown_handle(id),
                };
                Err(self.module.violation(err))
            }
        }
    }

    fn dangling(&self, id: ResourceId) -> Error {
        if self.module.is_verified() {
            if let Err(e) = self.module.check_live(id) {
                return e;
            }
        }
        self.module.violation(Error::dangling_use(Some(id)))
    }

    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Slots<T> {
    fn matches(&self, handle: &Handle<T>, id: ResourceId) -> bool {
        self.occupant(handle, id).is_some()
    }

    fn occupant(&self, handle: &Handle<T>, id: ResourceId) -> Option<&Occupant<T>> {
        let slot = self.entries.get(handle.raw.index as usize)?;
        if slot.generation != handle.raw.generation {
            return None;
        }
        slot.occupant.as_ref().filter(|o| o.id == id)
    }

    fn occupant_mut(&mut self, handle: &Handle<T>, id: ResourceId) -> Option<&mut Occupant<T>> {
        let slot = self.entries.get_mut(handle.raw.index as usize)?;
        if slot.generation != handle.raw.generation {
            return None;
        }
        slot.occupant.as_mut().filter(|o| o.id == id)
    }

    /// Classifies a handle that does not match its slot, without the registry.
    fn stale_error(&self, handle: &Handle<T>, id: ResourceId) -> Error {
        match self.entries.get(handle.raw.index as usize) {
            Some(slot) if slot.generation != handle.raw.generation => Error::double_release(id),
            Some(slot) if slot.occupant.is_none() => Error::double_release(id),
            _ => Error::unknown_handle(id),
        }
    }
}

impl<T> Drop for HandleTable<T> {
    fn drop(&mut self) {
        let slots = self.slots.get_mut().unwrap_or_else(PoisonError::into_inner);
        if slots.live != 0 {
            log::warn!(
                "{} table of module '{}' dropped with {} live resources",
                self.kind,
                self.module.name(),
                slots.live
            );
        }
    }
}

impl<T> std::fmt::Debug for HandleTable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleTable")
            .field("kind", &self.kind)
            .field("origin", &self.origin())
            .field("live", &self.len())
            .finish_non_exhaustive()
    }
}
