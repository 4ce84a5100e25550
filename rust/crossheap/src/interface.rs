//! Self-releasing interfaces.
//!
//! A producer hands out an object known to the consumer only through a
//! capability trait. The object carries a `release` operation implemented by
//! its producer; calling it is the only sanctioned way to dispose of the
//! object, and it consumes the reference, so the compiler rejects any later
//! use.

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};

use crossheap_common::{Error, OriginTag, ResourceId, Result};
use crossheap_quota::Lease;

use crate::module::Module;

/// Lifetime-ending operation of a resource, executed by the code that built it.
pub trait SelfRelease {
    /// Tears the object down inside its producer's allocator context.
    fn release(self: Box<Self>) -> Result<()>;

    /// Identity of the resource, if it was registered.
    fn resource_id(&self) -> Option<ResourceId> {
        None
    }
}

/// Consumer-side reference to a self-releasing object.
///
/// `Interface` dereferences to the capability trait. It must be disposed of
/// with [`Interface::release`]; dropping it instead leaks the object, since
/// the consumer has no sanctioned way of freeing it.
pub struct Interface<T: ?Sized + SelfRelease> {
    object: ManuallyDrop<Box<T>>,
}

impl<T: ?Sized + SelfRelease> Interface<T> {
    fn new(object: Box<T>) -> Interface<T> {
        Interface {
            object: ManuallyDrop::new(object),
        }
    }

    pub fn resource_id(&self) -> Option<ResourceId> {
        self.object.resource_id()
    }

    /// Hands the object back to its producer for destruction.
    pub fn release(self) -> Result<()> {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is wrapped in `ManuallyDrop` and never touched again,
        // so the object is taken out exactly once.
        let object = unsafe { ManuallyDrop::take(&mut this.object) };
        object.release()
    }
}

impl<T: ?Sized + SelfRelease> Deref for Interface<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.object
    }
}

impl<T: ?Sized + SelfRelease> DerefMut for Interface<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.object
    }
}

impl<T: ?Sized + SelfRelease> Drop for Interface<T> {
    fn drop(&mut self) {
        match self.object.resource_id() {
            Some(id) => log::error!("{id} dropped without release(); leaking it"),
            None => log::error!("interface dropped without release(); leaking it"),
        }
    }
}

impl<T: ?Sized + SelfRelease> std::fmt::Debug for Interface<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interface")
            .field("id", &self.resource_id())
            .finish_non_exhaustive()
    }
}

impl Module {
    /// Hands `object` out as an [`Interface`] of this module.
    ///
    /// With verification, the object must report the identity of a live
    /// resource created by this module (normally through the
    /// [`ReleaseTicket`] it embeds); otherwise the creation is reported as a
    /// violation and `object` is dropped in place.
    pub fn interface<T: ?Sized + SelfRelease>(&self, object: Box<T>) -> Result<Interface<T>> {
        if self.is_verified() {
            match object.resource_id() {
                Some(id) => self.check_live(id)?,
                None => {
                    return Err(self.violation(Error::invalid_operation(format!(
                        "interface from module '{}' has no creation record",
                        self.name()
                    ))));
                }
            }
        }
        Ok(Interface::new(object))
    }
}

/// Producer-side bookkeeping of one resource: its identity, the module that
/// created it, and the quota it holds.
///
/// Obtained from [`Module::ticket`] and embedded in the resource. Retiring the
/// ticket consumes the creation record as the issuing module.
pub struct ReleaseTicket {
    module: Module,
    id: ResourceId,
    lease: Option<Lease>,
}

impl ReleaseTicket {
    pub(crate) fn new(module: Module, id: ResourceId, lease: Lease) -> ReleaseTicket {
        ReleaseTicket {
            module,
            id,
            lease: Some(lease),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn origin(&self) -> OriginTag {
        self.module.origin()
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Bytes charged to the module for this resource.
    pub fn charge(&self) -> u64 {
        self.lease.as_ref().map_or(0, Lease::amount)
    }

    /// Checks that the resource has not been released.
    pub fn check_live(&self) -> Result<()> {
        self.module.check_live(self.id)
    }

    /// Consumes the creation record and returns the quota.
    ///
    /// On error the creation record stays live and the quota stays charged:
    /// the caller must leak the resource.
    pub fn retire(mut self) -> Result<()> {
        match self.module.release_record(self.id) {
            Ok(()) => {
                self.lease = None;
                Ok(())
            }
            Err(e) => {
                if let Some(lease) = self.lease.take() {
                    std::mem::forget(lease);
                }
                Err(e)
            }
        }
    }
}

impl Drop for ReleaseTicket {
    fn drop(&mut self) {
        if self.lease.is_some() {
            log::warn!(
                "{} from module '{}' dropped without release",
                self.id,
                self.module.name()
            );
        }
    }
}

impl std::fmt::Debug for ReleaseTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseTicket")
            .field("id", &self.id)
            .field("origin", &self.origin())
            .field("charge", &self.charge())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crossheap_common::ErrorKind;
    use crossheap_origin::{VerificationConfig, ViolationPolicy};

    use super::*;
    use crate::{Host, HostConfig};

    trait Counter: SelfRelease {
        fn bump(&mut self) -> u32;
    }

    struct TicketedCounter {
        ticket: ReleaseTicket,
        value: u32,
        teardowns: Arc<AtomicUsize>,
    }

    impl Counter for TicketedCounter {
        fn bump(&mut self) -> u32 {
            self.value += 1;
            self.value
        }
    }

    impl SelfRelease for TicketedCounter {
        fn release(self: Box<Self>) -> Result<()> {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
            self.ticket.retire()
        }

        fn resource_id(&self) -> Option<ResourceId> {
            Some(self.ticket.id())
        }
    }

    fn host() -> Host {
        Host::new(
            HostConfig::default()
                .with_verification(VerificationConfig::enabled(ViolationPolicy::Report)),
        )
        .unwrap()
    }

    fn make_counter(module: &Module, teardowns: &Arc<AtomicUsize>) -> Interface<dyn Counter> {
        let ticket = module.ticket("counter", 16).unwrap();
        module
            .interface(Box::new(TicketedCounter {
                ticket,
                value: 0,
                teardowns: teardowns.clone(),
            }) as Box<dyn Counter>)
            .unwrap()
    }

    struct Untracked;

    impl SelfRelease for Untracked {
        fn release(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_release_runs_producer_teardown() {
        let host = host();
        let module = host.load_module("producer").unwrap();
        let teardowns = Arc::new(AtomicUsize::new(0));

        let mut counter = make_counter(&module, &teardowns);
        assert_eq!(counter.bump(), 1);
        assert_eq!(counter.bump(), 2);
        assert!(counter.resource_id().is_some());
        counter.release().unwrap();

        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
        assert_eq!(module.in_use(), 0);
        host.verify_clean().unwrap();
    }

    #[test]
    fn test_drop_without_release_is_reported_as_leak() {
        let host = host();
        let module = host.load_module("producer").unwrap();
        let teardowns = Arc::new(AtomicUsize::new(0));

        let counter = make_counter(&module, &teardowns);
        let id = counter.resource_id().unwrap();
        drop(counter);

        assert_eq!(teardowns.load(Ordering::SeqCst), 0);
        let leaks = host.leaks();
        assert_eq!(leaks.len(), 1);
        assert_eq!(leaks[0].id, id);
        assert_eq!(leaks[0].origin, module.origin());
        assert!(host.verify_clean().is_err());
    }

    #[test]
    fn test_ticket_check_live() {
        let host = host();
        let module = host.load_module("producer").unwrap();
        let ticket = module.ticket("t", 1).unwrap();
        ticket.check_live().unwrap();
        assert_eq!(ticket.charge(), 1);
        assert_eq!(ticket.origin(), module.origin());
        ticket.retire().unwrap();
    }

    #[test]
    fn test_interface_without_record_is_rejected_when_verified() {
        let host = host();
        let module = host.load_module("producer").unwrap();
        let err = module.interface(Box::new(Untracked)).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidOperation { .. }));
        let stats = host.stats().unwrap();
        assert_eq!(stats.registered, 0);
        assert_eq!(stats.violations, 1);
        assert!(host.verify_clean().is_err());
    }

    #[test]
    fn test_interface_without_record_passes_unverified() {
        let host = Host::new(
            HostConfig::default().with_verification(VerificationConfig::disabled()),
        )
        .unwrap();
        let module = host.load_module("producer").unwrap();
        let object = module.interface(Box::new(Untracked)).unwrap();
        assert!(object.resource_id().is_none());
        object.release().unwrap();
    }

    #[test]
    fn test_interface_with_foreign_ticket_is_rejected() {
        let host = host();
        let a = host.load_module("a").unwrap();
        let b = host.load_module("b").unwrap();
        let teardowns = Arc::new(AtomicUsize::new(0));
        let object = TicketedCounter {
            ticket: a.ticket("counter", 8).unwrap(),
            value: 0,
            teardowns,
        };
        let id = object.ticket.id();
        let err = b.interface(Box::new(object)).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::OriginMismatch { .. }));
        // The rejected object still holds a's record.
        assert_eq!(a.live_resources()[0].id, id);
    }

    #[test]
    fn test_rejected_retire_keeps_quota_charged() {
        let host = host();
        let module = host.load_module("producer").unwrap();
        let ticket = module.ticket("t", 32).unwrap();
        host.registry()
            .unwrap()
            .release(ticket.id(), module.origin())
            .unwrap();

        let err = ticket.retire().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::DoubleRelease { .. }));
        assert_eq!(module.in_use(), 32);
    }
}
