//! Sample producers, one per release strategy.
//!
//! Each keeps only the behavior needed to exercise its resource lifecycle.

pub mod buffers;
pub mod imaging;
pub mod records;
pub mod text;
