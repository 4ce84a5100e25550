//! Text producers speaking the caller-owned buffer protocol.

use crossheap_common::Result;

use crate::buffer::{BufferDescriptor, BufferProducer};

/// ASCII-uppercases its input and appends a NUL terminator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Uppercase;

impl BufferProducer for Uppercase {
    type Input = [u8];

    fn required_size(&self, input: &[u8]) -> usize {
        input.len() + 1
    }

    fn process(&self, out: &mut BufferDescriptor<'_>, input: &[u8]) -> Result<usize> {
        let required = self.required_size(input);
        out.fill_with(required, |chunk| {
            let (text, nul) = chunk.split_at_mut(input.len());
            for (dst, src) in text.iter_mut().zip(input) {
                *dst = src.to_ascii_uppercase();
            }
            nul[0] = 0;
            Ok(())
        })?;
        Ok(required)
    }
}

/// Encodes UTF-8 text as UTF-16LE code units, without a terminator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf16Le;

impl BufferProducer for Utf16Le {
    type Input = str;

    fn required_size(&self, input: &str) -> usize {
        input.encode_utf16().count() * 2
    }

    fn process(&self, out: &mut BufferDescriptor<'_>, input: &str) -> Result<usize> {
        let required = self.required_size(input);
        out.fill_with(required, |chunk| {
            for (dst, unit) in chunk.chunks_exact_mut(2).zip(input.encode_utf16()) {
                dst.copy_from_slice(&unit.to_le_bytes());
            }
            Ok(())
        })?;
        Ok(required)
    }
}
