//! Uppercase command implementation

use anyhow::Result;
use crossheap::buffer::{BufferDescriptor, BufferProducer};
use crossheap::demo::text::Uppercase;

/// Runs the producer into a consumer-allocated buffer of `capacity` bytes.
pub fn process_into(input: &[u8], capacity: usize) -> crossheap::Result<Vec<u8>> {
    let mut data = vec![0u8; capacity];
    let mut out = BufferDescriptor::new(&mut data);
    let written = Uppercase.process(&mut out, input)?;
    data.truncate(written);
    Ok(data)
}

pub fn run(text: String, capacity: Option<usize>) -> Result<()> {
    let input = text.as_bytes();
    let required = Uppercase.required_size(input);
    let capacity = capacity.unwrap_or(required);
    let output = process_into(input, capacity).map_err(|e| {
        anyhow::anyhow!("{e} (required {required} bytes, offered {capacity})")
    })?;
    let text = output.strip_suffix(&[0]).unwrap_or(&output[..]);
    println!("{}", String::from_utf8_lossy(text));
    Ok(())
}
