//! Cross-boundary resource ownership.
//!
//! A resource allocated by one module must be released by that module's
//! allocator. This crate models each module as an allocator context
//! ([`Module`]) loaded into a [`Host`], and offers four ways of handing a
//! resource to a consumer so that release always runs back inside its producer:
//!
//! - [`opaque`]: plain-data [`Handle`]s into a producer-owned generational
//!   table, with a matching create/destroy pair.
//! - [`interface`]: objects known only through a capability trait, disposed of
//!   by their own [`SelfRelease::release`].
//! - [`bound`]: move-only [`Owned`] wrappers carrying the deleter bound at
//!   creation, with an opt-in reference-counted [`Shared`] variant.
//! - [`buffer`]: no transfer at all; the consumer owns the memory and the
//!   producer writes into a capacity-checked [`BufferDescriptor`].
//!
//! Every strategy stamps its allocations with the module's
//! [`OriginTag`](crossheap_common::OriginTag); when verification is enabled the
//! host's [`OriginRegistry`](crossheap_origin::OriginRegistry) checks each release
//! against its creation record.

pub mod abi;
pub mod bound;
pub mod buffer;
pub mod config;
pub mod demo;
pub mod interface;
pub mod module;
pub mod opaque;

pub use bound::{Owned, Shared, WeakShared};
pub use buffer::{BufferDescriptor, BufferProducer};
pub use config::HostConfig;
pub use interface::{Interface, ReleaseTicket, SelfRelease};
pub use module::{Host, Module};
pub use opaque::{Handle, HandleTable, RawHandle};

pub use crossheap_common::{Error, ErrorKind, OriginTag, ResourceId, Result, Status};
pub use crossheap_origin::{RegistryStats, VerificationConfig, ViolationPolicy};
