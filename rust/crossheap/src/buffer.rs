//! Caller-owned buffer protocol.
//!
//! Ownership never crosses the boundary: the consumer asks the producer how
//! much room an operation needs, allocates that much itself, and lends the
//! memory to the producer through a [`BufferDescriptor`]. The producer writes
//! only through the descriptor, which refuses any write past the capacity.

use crossheap_common::{Error, Result};

/// Borrowed view of consumer memory handed to a producer for writing.
///
/// `len() <= capacity()` always holds.
pub struct BufferDescriptor<'a> {
    data: &'a mut [u8],
    len: usize,
}

impl<'a> BufferDescriptor<'a> {
    /// Describes an empty buffer whose capacity is `data.len()`.
    pub fn new(data: &'a mut [u8]) -> BufferDescriptor<'a> {
        BufferDescriptor { data, len: 0 }
    }

    /// Describes a buffer whose first `len` bytes already hold data.
    pub fn with_len(data: &'a mut [u8], len: usize) -> Result<BufferDescriptor<'a>> {
        crossheap_common::verify_arg!(len, len <= data.len());
        Ok(BufferDescriptor { data, len })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.len
    }

    /// The bytes written so far.
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Appends `bytes`, or writes nothing and fails with `CapacityExceeded`.
    pub fn push(&mut self, bytes: &[u8]) -> Result<()> {
        let end = self.reserve(bytes.len())?;
        self.data[self.len..end].copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }

    /// Lets `fill` write exactly `required` bytes into the spare capacity.
    ///
    /// Capacity is checked before `fill` runs. If `fill` fails, `len` is left
    /// unchanged (the bytes past it are unspecified).
    pub fn fill_with<F>(&mut self, required: usize, fill: F) -> Result<()>
    where
        F: FnOnce(&mut [u8]) -> Result<()>,
    {
        let end = self.reserve(required)?;
        fill(&mut self.data[self.len..end])?;
        self.len = end;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    fn reserve(&self, additional: usize) -> Result<usize> {
        match self.len.checked_add(additional) {
            Some(end) if end <= self.capacity() => Ok(end),
            _ => Err(Error::capacity_exceeded(
                self.len.saturating_add(additional),
                self.capacity(),
            )),
        }
    }
}

impl std::fmt::Debug for BufferDescriptor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferDescriptor")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Producer side of the buffer protocol.
pub trait BufferProducer {
    type Input: ?Sized;

    /// Bytes `process` will write for `input`.
    fn required_size(&self, input: &Self::Input) -> usize;

    /// Writes the output for `input` into `out` and returns the number of
    /// bytes written.
    ///
    /// Fails with `CapacityExceeded` before writing anything when
    /// `out.remaining()` is smaller than `required_size(input)`.
    fn process(&self, out: &mut BufferDescriptor<'_>, input: &Self::Input) -> Result<usize>;
}

/// Runs `producer` over `input` into memory allocated by the caller.
pub fn process_owned<P: BufferProducer + ?Sized>(producer: &P, input: &P::Input) -> Result<Vec<u8>> {
    let mut data = vec![0u8; producer.required_size(input)];
    let mut out = BufferDescriptor::new(&mut data);
    let written = producer.process(&mut out, input)?;
    data.truncate(written);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use crossheap_common::ErrorKind;

    use super::*;

    #[test]
    fn test_push_within_capacity() {
        let mut data = [0u8; 8];
        let mut out = BufferDescriptor::new(&mut data);
        assert!(out.is_empty());
        out.push(b"abc").unwrap();
        out.push(b"defgh").unwrap();
        assert_eq!(out.filled(), b"abcdefgh");
        assert_eq!(out.remaining(), 0);
        out.push(b"").unwrap();
    }

    #[test]
    fn test_push_over_capacity_writes_nothing() {
        let mut data = [0xAAu8; 4];
        let mut out = BufferDescriptor::new(&mut data);
        out.push(b"ab").unwrap();
        let err = out.push(b"cde").unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::CapacityExceeded {
                required: 5,
                capacity: 4
            }
        ));
        assert!(err.is_recoverable());
        assert_eq!(out.len(), 2);
        drop(out);
        assert_eq!(data, [b'a', b'b', 0xAA, 0xAA]);
    }

    #[test]
    fn test_fill_with_checks_before_calling() {
        let mut data = [0u8; 3];
        let mut out = BufferDescriptor::new(&mut data);
        let mut called = false;
        assert!(
            out.fill_with(4, |_| {
                called = true;
                Ok(())
            })
            .is_err()
        );
        assert!(!called);

        out.fill_with(2, |chunk| {
            chunk.copy_from_slice(b"xy");
            Ok(())
        })
        .unwrap();
        assert_eq!(out.filled(), b"xy");

        assert!(
            out.fill_with(1, |_| Err(Error::invalid_operation("fill")))
                .is_err()
        );
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_with_len() {
        let mut data = *b"keep____";
        let mut out = BufferDescriptor::with_len(&mut data, 4).unwrap();
        assert_eq!(out.filled(), b"keep");
        out.clear();
        assert_eq!(out.len(), 0);

        let mut small = [0u8; 2];
        assert!(BufferDescriptor::with_len(&mut small, 3).is_err());
    }

    #[test]
    fn test_len_never_exceeds_capacity() {
        let mut rng = fastrand::Rng::with_seed(7);
        for capacity in 0..32 {
            let mut data = vec![0u8; capacity];
            let mut out = BufferDescriptor::new(&mut data);
            for _ in 0..16 {
                let chunk = vec![1u8; rng.usize(0..8)];
                let before = out.len();
                match out.push(&chunk) {
                    Ok(()) => assert_eq!(out.len(), before + chunk.len()),
                    Err(_) => {
                        assert!(before + chunk.len() > capacity);
                        assert_eq!(out.len(), before);
                    }
                }
                assert!(out.len() <= out.capacity());
            }
        }
    }
}
