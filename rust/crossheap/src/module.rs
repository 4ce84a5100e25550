//! Hosts and the modules loaded into them.
//!
//! A [`Module`] stands for one independently built component: it owns an
//! allocator context identified by an [`OriginTag`] and bounded by a byte
//! quota drawn from its [`Host`]. All allocation entry points of this crate go
//! through a module, so every resource knows which context must release it.

use std::sync::Arc;

use crossheap_common::{Error, OriginTag, ResourceId, Result};
use crossheap_origin::{OriginRegistry, Record, RegistryStats};
use crossheap_quota::{Lease, Quota};

use crate::config::HostConfig;
use crate::interface::ReleaseTicket;

/// The process-level context modules are loaded into.
pub struct Host {
    config: HostConfig,
    quota: Quota,
    registry: Option<Arc<OriginRegistry>>,
}

impl Host {
    pub fn new(config: HostConfig) -> Result<Host> {
        config
            .validate()
            .map_err(|message| Error::invalid_arg("config", message))?;
        let registry = config
            .verification
            .enabled
            .then(|| Arc::new(OriginRegistry::new(&config.verification)));
        Ok(Host {
            quota: Quota::new(config.total_quota),
            registry,
            config,
        })
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Loads a module with the configured per-module quota.
    pub fn load_module(&self, name: impl Into<String>) -> Result<Module> {
        self.load_module_with_quota(name, self.config.module_quota)
    }

    pub fn load_module_with_quota(&self, name: impl Into<String>, quota: u64) -> Result<Module> {
        let name = name.into();
        crossheap_common::verify_arg!(quota, quota <= self.config.total_quota);
        let core = ModuleCore {
            origin: OriginTag::next(),
            quota: self.quota.child(quota),
            registry: self.registry.clone(),
            name,
        };
        log::debug!("loaded module '{}' as {}", core.name, core.origin);
        Ok(Module(Arc::new(core)))
    }

    /// The verification registry, when verification is enabled.
    pub fn registry(&self) -> Option<&Arc<OriginRegistry>> {
        self.registry.as_ref()
    }

    pub fn stats(&self) -> Option<RegistryStats> {
        self.registry.as_ref().map(|r| r.stats())
    }

    /// Resources created and not yet released, across all modules.
    pub fn leaks(&self) -> Vec<Record> {
        self.registry
            .as_ref()
            .map(|r| r.live_records())
            .unwrap_or_default()
    }

    /// Confirms that every registered resource was released exactly once and
    /// that no violation was observed. Always succeeds without verification.
    pub fn verify_clean(&self) -> Result<()> {
        let Some(stats) = self.stats() else {
            return Ok(());
        };
        if stats.is_balanced() {
            Ok(())
        } else {
            for record in self.leaks() {
                log::warn!("leaked {} ({}) from {}", record.id, record.kind, record.origin);
            }
            Err(Error::invalid_operation(format!(
                "unclean shutdown: {} registered, {} released, {} live, {} violations",
                stats.registered, stats.released, stats.live, stats.violations
            )))
        }
    }

    pub fn quota_remaining(&self) -> u64 {
        self.quota.remaining()
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("quota", &self.quota)
            .field("verification", &self.registry.is_some())
            .finish_non_exhaustive()
    }
}

/// Handle to a loaded module's allocator context. Cheap to clone.
#[derive(Clone)]
pub struct Module(Arc<ModuleCore>);

struct ModuleCore {
    name: String,
    origin: OriginTag,
    quota: Quota,
    registry: Option<Arc<OriginRegistry>>,
}

impl Module {
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn origin(&self) -> OriginTag {
        self.0.origin
    }

    pub fn quota_remaining(&self) -> u64 {
        self.0.quota.remaining()
    }

    /// Bytes currently held by resources of this module.
    pub fn in_use(&self) -> u64 {
        self.0.quota.in_use()
    }

    pub fn registry(&self) -> Option<&Arc<OriginRegistry>> {
        self.0.registry.as_ref()
    }

    pub fn is_verified(&self) -> bool {
        self.0.registry.is_some()
    }

    /// Live resources created by this module, when verification is enabled.
    pub fn live_resources(&self) -> Vec<Record> {
        self.registry()
            .map(|r| r.live_records_of(self.origin()))
            .unwrap_or_default()
    }

    /// Allocates the bookkeeping for one resource: a quota lease of `bytes`,
    /// a fresh identity, and (when verified) its creation record.
    ///
    /// Nothing is left behind on failure.
    pub fn ticket(&self, kind: &'static str, bytes: u64) -> Result<ReleaseTicket> {
        let lease = self.lease(kind, bytes)?;
        let id = ResourceId::next();
        self.register(id, kind)?;
        log::debug!("{} created {id} ({kind}, {bytes} bytes)", self.0.origin);
        Ok(ReleaseTicket::new(self.clone(), id, lease))
    }

    pub(crate) fn lease(&self, what: &str, bytes: u64) -> Result<Lease> {
        self.0.quota.lease(bytes).map_err(|e| {
            log::debug!(
                "module '{}' could not satisfy {} bytes for {what}",
                self.0.name,
                e.requested
            );
            Error::allocation_failure(what, e.requested)
        })
    }

    pub(crate) fn register(&self, id: ResourceId, kind: &'static str) -> Result<()> {
        match self.registry() {
            Some(registry) => registry.register(id, self.origin(), kind),
            None => Ok(()),
        }
    }

    /// Consumes the creation record of `id` as this module.
    pub(crate) fn release_record(&self, id: ResourceId) -> Result<()> {
        if let Some(registry) = self.registry() {
            registry.release(id, self.origin())?;
        }
        log::debug!("{} released {id}", self.0.origin);
        Ok(())
    }

    /// Checks that `id` is still live and owned by this module.
    pub(crate) fn check_live(&self, id: ResourceId) -> Result<()> {
        match self.registry() {
            Some(registry) => registry.check_live(id, self.origin()),
            None => Ok(()),
        }
    }

    /// Reports a release or access that this module's own bookkeeping rejected.
    ///
    /// With verification the registry classifies it, falling back to
    /// `fallback` when it has no trace of `id`; without, `fallback` is logged
    /// and returned as is.
    pub(crate) fn reject(&self, id: ResourceId, fallback: Error) -> Error {
        match self.registry() {
            Some(registry) => registry.reject(id, self.origin(), fallback),
            None => {
                log::error!("ownership protocol violation: {fallback}");
                fallback
            }
        }
    }

    /// Reports a violation whose classification is already known.
    pub(crate) fn violation(&self, err: Error) -> Error {
        match self.registry() {
            Some(registry) => registry.report(err),
            None => {
                log::error!("ownership protocol violation: {err}");
                err
            }
        }
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.0.name)
            .field("origin", &self.0.origin)
            .field("quota", &self.0.quota)
            .finish_non_exhaustive()
    }
}
