//! Image processors handed out as self-releasing interfaces.

use crossheap_common::{ResourceId, Result};
use serde::Deserialize;

use crate::interface::{Interface, ReleaseTicket, SelfRelease};
use crate::module::Module;

/// Capability trait consumers hold processors through.
pub trait ImageProcessor: SelfRelease + Send {
    fn name(&self) -> &str;

    /// Transforms 8-bit grayscale pixels in place.
    fn process(&mut self, pixels: &mut [u8]);

    /// Pixels processed so far.
    fn processed(&self) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorKind {
    Invert,
    Threshold(u8),
}

/// Builds a processor in `module`. The caller disposes of it with
/// [`Interface::release`].
pub fn create_processor(
    module: &Module,
    kind: ProcessorKind,
) -> Result<Interface<dyn ImageProcessor>> {
    let processor: Box<dyn ImageProcessor> = match kind {
        ProcessorKind::Invert => Box::new(Invert {
            ticket: module.ticket("processor", std::mem::size_of::<Invert>() as u64)?,
            processed: 0,
        }),
        ProcessorKind::Threshold(level) => Box::new(Threshold {
            ticket: module.ticket("processor", std::mem::size_of::<Threshold>() as u64)?,
            level,
            processed: 0,
        }),
    };
    module.interface(processor)
}

struct Invert {
    ticket: ReleaseTicket,
    processed: u64,
}

impl ImageProcessor for Invert {
    fn name(&self) -> &str {
        "invert"
    }

    fn process(&mut self, pixels: &mut [u8]) {
        for p in pixels.iter_mut() {
            *p = !*p;
        }
        self.processed += pixels.len() as u64;
    }

    fn processed(&self) -> u64 {
        self.processed
    }
}

impl SelfRelease for Invert {
    fn release(self: Box<Self>) -> Result<()> {
        log::trace!("invert processor done after {} pixels", self.processed);
        self.ticket.retire()
    }

    fn resource_id(&self) -> Option<ResourceId> {
        Some(self.ticket.id())
    }
}

struct Threshold {
    ticket: ReleaseTicket,
    level: u8,
    processed: u64,
}

impl ImageProcessor for Threshold {
    fn name(&self) -> &str {
        "threshold"
    }

    fn process(&mut self, pixels: &mut [u8]) {
        for p in pixels.iter_mut() {
            *p = if *p >= self.level { u8::MAX } else { 0 };
        }
        self.processed += pixels.len() as u64;
    }

    fn processed(&self) -> u64 {
        self.processed
    }
}

impl SelfRelease for Threshold {
    fn release(self: Box<Self>) -> Result<()> {
        self.ticket.retire()
    }

    fn resource_id(&self) -> Option<ResourceId> {
        Some(self.ticket.id())
    }
}

#[cfg(test)]
mod tests {
    use crossheap_origin::{VerificationConfig, ViolationPolicy};

    use super::*;
    use crate::{Host, HostConfig};

    fn host() -> Host {
        Host::new(
            HostConfig::default()
                .with_verification(VerificationConfig::enabled(ViolationPolicy::Report)),
        )
        .unwrap()
    }

    #[test]
    fn test_invert_and_release() {
        let host = host();
        let module = host.load_module("imaging").unwrap();
        let mut processor = create_processor(&module, ProcessorKind::Invert).unwrap();
        let mut pixels = [0u8, 10, 255];
        processor.process(&mut pixels);
        assert_eq!(pixels, [255, 245, 0]);
        assert_eq!(processor.name(), "invert");
        assert_eq!(processor.processed(), 3);
        processor.release().unwrap();
        host.verify_clean().unwrap();
    }

    #[test]
    fn test_threshold() {
        let host = host();
        let module = host.load_module("imaging").unwrap();
        let mut processor = create_processor(&module, ProcessorKind::Threshold(128)).unwrap();
        let mut pixels = [0u8, 127, 128, 200];
        processor.process(&mut pixels);
        processor.process(&mut pixels[..2]);
        assert_eq!(pixels, [0, 0, 255, 255]);
        assert_eq!(processor.processed(), 6);
        processor.release().unwrap();
        host.verify_clean().unwrap();
    }

    #[test]
    fn test_processor_used_on_another_thread() {
        let host = host();
        let module = host.load_module("imaging").unwrap();
        let mut processor = create_processor(&module, ProcessorKind::Invert).unwrap();
        let processor = std::thread::spawn(move || {
            processor.process(&mut [1, 2, 3, 4]);
            processor
        })
        .join()
        .unwrap();
        assert_eq!(processor.processed(), 4);
        processor.release().unwrap();
        host.verify_clean().unwrap();
    }

    #[test]
    fn test_kind_from_json() {
        let kind: ProcessorKind = serde_json::from_str(r#"{"threshold": 64}"#).unwrap();
        assert_eq!(kind, ProcessorKind::Threshold(64));
        let kind: ProcessorKind = serde_json::from_str(r#""invert""#).unwrap();
        assert_eq!(kind, ProcessorKind::Invert);
    }
}
