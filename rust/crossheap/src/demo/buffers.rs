//! Byte buffers handed out as opaque handles.
//!
//! The buffer layout is private to this module; consumers only see
//! [`BufferHandle`]s and go through [`BufferFactory`] for every operation,
//! including destruction.

use crossheap_common::{Error, Result};

use crate::module::Module;
use crate::opaque::{Handle, HandleTable};

/// Opaque to consumers.
pub struct ModuleBuffer {
    bytes: Box<[u8]>,
}

pub type BufferHandle = Handle<ModuleBuffer>;

/// Factory/destroyer pair for [`ModuleBuffer`]s of one module.
pub struct BufferFactory {
    table: HandleTable<ModuleBuffer>,
}

impl BufferFactory {
    pub fn new(module: &Module) -> BufferFactory {
        BufferFactory {
            table: HandleTable::new(module, "buffer"),
        }
    }

    pub fn module(&self) -> &Module {
        self.table.module()
    }

    /// Allocates a zeroed buffer of `size` bytes, charged to the module quota.
    pub fn create(&self, size: usize) -> Result<BufferHandle> {
        crossheap_common::verify_arg!(size, size > 0);
        // Oversized requests fail before the heap is touched.
        let charge = size as u64;
        if charge > self.module().quota_remaining() {
            return Err(Error::allocation_failure("buffer", charge));
        }
        let bytes = vec![0u8; size].into_boxed_slice();
        self.table.create_with_charge(ModuleBuffer { bytes }, charge)
    }

    pub fn destroy(&self, handle: BufferHandle) -> Result<()> {
        self.table.destroy(handle)
    }

    pub fn size(&self, handle: BufferHandle) -> Result<usize> {
        self.table.with(handle, |buffer| buffer.bytes.len())
    }

    /// Copies `data` into the buffer at `offset`; fails without writing if it
    /// does not fit.
    pub fn write_at(&self, handle: BufferHandle, offset: usize, data: &[u8]) -> Result<()> {
        self.table.with_mut(handle, |buffer| {
            let range = span(offset, data.len(), buffer.bytes.len())?;
            buffer.bytes[range].copy_from_slice(data);
            Ok(())
        })?
    }

    /// Fills `out` from the buffer starting at `offset`.
    pub fn read_at(&self, handle: BufferHandle, offset: usize, out: &mut [u8]) -> Result<()> {
        self.table.with(handle, |buffer| {
            let range = span(offset, out.len(), buffer.bytes.len())?;
            out.copy_from_slice(&buffer.bytes[range]);
            Ok(())
        })?
    }

    pub fn live(&self) -> usize {
        self.table.len()
    }
}

impl std::fmt::Debug for BufferFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferFactory")
            .field("table", &self.table)
            .finish()
    }
}

fn span(offset: usize, len: usize, size: usize) -> Result<std::ops::Range<usize>> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(offset..end),
        _ => Err(Error::capacity_exceeded(offset.saturating_add(len), size)),
    }
}

#[cfg(test)]
mod tests {
    use crossheap_common::ErrorKind;
    use crossheap_origin::{VerificationConfig, ViolationPolicy};

    use super::*;
    use crate::{Host, HostConfig};

    fn host() -> Host {
        Host::new(
            HostConfig::default()
                .with_quotas(4096, 1024)
                .with_verification(VerificationConfig::enabled(ViolationPolicy::Report)),
        )
        .unwrap()
    }

    #[test]
    fn test_create_write_read_destroy() {
        let host = host();
        let module = host.load_module("buffers").unwrap();
        let factory = BufferFactory::new(&module);

        let handle = factory.create(16).unwrap();
        assert_eq!(factory.size(handle).unwrap(), 16);
        assert_eq!(module.in_use(), 16);

        factory.write_at(handle, 4, b"data").unwrap();
        let mut out = [0u8; 6];
        factory.read_at(handle, 3, &mut out).unwrap();
        assert_eq!(&out, b"\0data\0");

        factory.destroy(handle).unwrap();
        assert_eq!(factory.live(), 0);
        assert_eq!(module.in_use(), 0);
        host.verify_clean().unwrap();
    }

    #[test]
    fn test_out_of_bounds_access() {
        let host = host();
        let module = host.load_module("buffers").unwrap();
        let factory = BufferFactory::new(&module);
        let handle = factory.create(4).unwrap();

        let err = factory.write_at(handle, 2, b"abc").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::CapacityExceeded { required: 5, capacity: 4 }));
        let mut out = [0u8; 2];
        assert!(factory.read_at(handle, usize::MAX, &mut out).is_err());

        factory.destroy(handle).unwrap();
        host.verify_clean().unwrap();
    }

    #[test]
    fn test_oversized_create() {
        let host = host();
        let module = host.load_module("buffers").unwrap();
        let factory = BufferFactory::new(&module);
        let err = factory.create(2048).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::AllocationFailure { requested: 2048, .. }));
        assert!(factory.create(0).is_err());
        assert_eq!(factory.live(), 0);
        host.verify_clean().unwrap();
    }

    #[test]
    fn test_use_after_destroy() {
        let host = host();
        let module = host.load_module("buffers").unwrap();
        let factory = BufferFactory::new(&module);
        let handle = factory.create(8).unwrap();
        factory.destroy(handle).unwrap();

        let err = factory.size(handle).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::DanglingUse { .. }));
        let err = factory.destroy(handle).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::DoubleRelease { .. }));
        assert_eq!(host.stats().unwrap().violations, 2);
    }
}
