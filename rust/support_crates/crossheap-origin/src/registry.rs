//! `OriginRegistry`: creation/release bookkeeping keyed by resource identity.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ahash::AHashMap;
use crossheap_common::{Error, OriginTag, ResourceId, Result};
use serde::Serialize;

use crate::config::{VerificationConfig, ViolationPolicy};

/// Creation record of a single resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Record {
    pub id: ResourceId,
    pub origin: OriginTag,
    /// Static description of the resource shape, e.g. `"opaque"` or `"bound"`.
    pub kind: &'static str,
}

/// Snapshot of the registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub registered: u64,
    pub released: u64,
    pub live: u64,
    pub violations: u64,
}

impl RegistryStats {
    /// Every registered resource has been released and nothing was misused.
    pub fn is_balanced(&self) -> bool {
        self.registered == self.released && self.live == 0 && self.violations == 0
    }
}

/// Registry of live resources and recently released identities.
///
/// Internally locked: creation and release may race from different threads.
pub struct OriginRegistry {
    state: Mutex<RegistryState>,
    policy: ViolationPolicy,
    max_tombstones: usize,
}

#[derive(Default)]
struct RegistryState {
    live: AHashMap<ResourceId, Record>,
    tombstones: AHashMap<ResourceId, Record>,
    /// Eviction order of `tombstones`, oldest first.
    tombstone_order: VecDeque<ResourceId>,
    registered: u64,
    released: u64,
    violations: u64,
}

impl OriginRegistry {
    pub fn new(config: &VerificationConfig) -> OriginRegistry {
        OriginRegistry {
            state: Mutex::new(RegistryState::default()),
            policy: config.policy,
            max_tombstones: config.max_tombstones,
        }
    }

    pub fn policy(&self) -> ViolationPolicy {
        self.policy
    }

    /// Records the creation of `id` by the allocator context `origin`.
    pub fn register(&self, id: ResourceId, origin: OriginTag, kind: &'static str) -> Result<()> {
        let outcome = {
            let mut state = self.lock();
            if state.live.contains_key(&id) || state.tombstones.contains_key(&id) {
                state.violations += 1;
                Err(Error::invalid_operation(format!("register {id} twice")))
            } else {
                state.live.insert(id, Record { id, origin, kind });
                state.registered += 1;
                Ok(())
            }
        };
        self.finish(outcome)
    }

    /// Consumes the creation record of `id`, presenting the tag of the context
    /// performing the release.
    ///
    /// On any violation the record is left as it was; the caller must not free
    /// the resource.
    pub fn release(&self, id: ResourceId, presented: OriginTag) -> Result<Record> {
        let outcome = {
            let mut state = self.lock();
            match state.live.get(&id).copied() {
                Some(record) if record.origin == presented => {
                    state.live.remove(&id);
                    state.released += 1;
                    self.bury(&mut state, record);
                    Ok(record)
                }
                Some(record) => {
                    state.violations += 1;
                    Err(Error::origin_mismatch(id, record.origin, presented))
                }
                None if state.tombstones.contains_key(&id) => {
                    state.violations += 1;
                    Err(Error::double_release(id))
                }
                None => {
                    state.violations += 1;
                    Err(Error::unknown_handle(id))
                }
            }
        };
        self.finish(outcome)
    }

    /// Checks that `id` is live and owned by `presented` without consuming it.
    pub fn check_live(&self, id: ResourceId, presented: OriginTag) -> Result<()> {
        let outcome = {
            let mut state = self.lock();
            match state.live.get(&id).copied() {
                Some(record) if record.origin == presented => Ok(()),
                Some(record) => {
                    state.violations += 1;
                    Err(Error::origin_mismatch(id, record.origin, presented))
                }
                None if state.tombstones.contains_key(&id) => {
                    state.violations += 1;
                    Err(Error::dangling_use(Some(id)))
                }
                None => {
                    state.violations += 1;
                    Err(Error::unknown_handle(id))
                }
            }
        };
        self.finish(outcome)
    }

    /// Classifies a release that the owning table could not match to a live
    /// slot, without consuming any record, and reports it as a violation.
    ///
    /// `fallback` is the table's own classification. It is used when the
    /// registry holds neither a record nor a tombstone for `id`, e.g. after
    /// the tombstone was evicted.
    pub fn reject(&self, id: ResourceId, presented: OriginTag, fallback: Error) -> Error {
        let err = {
            let mut state = self.lock();
            state.violations += 1;
            match state.live.get(&id).copied() {
                Some(record) if record.origin != presented => {
                    Error::origin_mismatch(id, record.origin, presented)
                }
                Some(_) => Error::invalid_operation(format!(
                    "release of {id} through a handle that does not match its slot"
                )),
                None if state.tombstones.contains_key(&id) => Error::double_release(id),
                None => fallback,
            }
        };
        self.escalate(err)
    }

    /// Counts and reports a violation detected outside the registry.
    pub fn report(&self, err: Error) -> Error {
        self.lock().violations += 1;
        self.escalate(err)
    }

    /// Creation-time tag of a live resource.
    pub fn origin_of(&self, id: ResourceId) -> Option<OriginTag> {
        self.lock().live.get(&id).map(|r| r.origin)
    }

    pub fn is_live(&self, id: ResourceId) -> bool {
        self.lock().live.contains_key(&id)
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.lock();
        RegistryStats {
            registered: state.registered,
            released: state.released,
            live: state.live.len() as u64,
            violations: state.violations,
        }
    }

    /// Live records, ordered by identity.
    pub fn live_records(&self) -> Vec<Record> {
        let mut records: Vec<_> = self.lock().live.values().copied().collect();
        records.sort_by_key(|r| r.id);
        records
    }

    /// Live records created by the given allocator context.
    pub fn live_records_of(&self, origin: OriginTag) -> Vec<Record> {
        let mut records = self.live_records();
        records.retain(|r| r.origin == origin);
        records
    }

    pub fn is_balanced(&self) -> bool {
        self.stats().is_balanced()
    }

    fn bury(&self, state: &mut RegistryState, record: Record) {
        if self.max_tombstones == 0 {
            return;
        }
        while state.tombstone_order.len() >= self.max_tombstones {
            if let Some(oldest) = state.tombstone_order.pop_front() {
                state.tombstones.remove(&oldest);
            }
        }
        state.tombstones.insert(record.id, record);
        state.tombstone_order.push_back(record.id);
    }

    /// Applies the violation policy once the lock has been released.
    fn finish<T>(&self, outcome: Result<T>) -> Result<T> {
        outcome.map_err(|e| self.escalate(e))
    }

    fn escalate(&self, err: Error) -> Error {
        log::error!("ownership protocol violation: {err}");
        if self.policy == ViolationPolicy::Panic {
            panic!("ownership protocol violation: {err}");
        }
        err
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for OriginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginRegistry")
            .field("policy", &self.policy)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
