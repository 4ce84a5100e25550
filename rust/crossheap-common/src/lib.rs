//! Core definitions relied upon by all crossheap-* crates: the error taxonomy,
//! the status codes that cross a module boundary, and the identifiers stamped
//! onto every allocation.

pub mod error;
pub mod ids;
pub mod result;
pub mod status;

pub use error::{Error, ErrorKind};
pub use ids::{OriginTag, ResourceId};
pub use result::Result;
pub use status::Status;
