//! Origin-tag verification layer.
//!
//! Every allocation registers `(ResourceId, OriginTag)` with an [`OriginRegistry`];
//! every release presents the tag of the allocator context performing it. The
//! registry turns the otherwise silent misuses of a cross-boundary resource into
//! reportable events:
//!
//! - release with no creation record ([`ErrorKind::UnknownHandle`]),
//! - a second release of the same identity ([`ErrorKind::DoubleRelease`]),
//! - release through a different allocator context ([`ErrorKind::OriginMismatch`]),
//! - access after release ([`ErrorKind::DanglingUse`]).
//!
//! [`ErrorKind::UnknownHandle`]: crossheap_common::ErrorKind::UnknownHandle
//! [`ErrorKind::DoubleRelease`]: crossheap_common::ErrorKind::DoubleRelease
//! [`ErrorKind::OriginMismatch`]: crossheap_common::ErrorKind::OriginMismatch
//! [`ErrorKind::DanglingUse`]: crossheap_common::ErrorKind::DanglingUse

pub mod config;
pub mod registry;

pub use config::{VerificationConfig, ViolationPolicy};
pub use registry::{OriginRegistry, Record, RegistryStats};
