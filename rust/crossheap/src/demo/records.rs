//! Records handed out with a bound deleter.

use crossheap_common::Result;

use crate::bound::{Owned, Shared};
use crate::module::Module;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    id: u32,
    label: String,
}

impl Record {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn relabel(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }
}

/// Creates a record in `module`; dropping the handle frees it there.
pub fn make_record(module: &Module, id: u32) -> Result<Owned<Record>> {
    let owner = module.name().to_string();
    module.bind_with(Box::new(new_record(id)), move |record| {
        log::trace!("module '{owner}' disposing record {}", record.id);
    })
}

/// Creates a record under shared ownership.
pub fn make_shared_record(module: &Module, id: u32) -> Result<Shared<Record>> {
    module.bind_shared(new_record(id))
}

fn new_record(id: u32) -> Record {
    Record {
        id,
        label: format!("Resource {id}"),
    }
}
