use thiserror::Error;

use crate::ids::{OriginTag, ResourceId};
use crate::status::Status;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    /// Status code reported for this error across a module boundary.
    pub fn status(&self) -> Status {
        self.kind().status()
    }

    /// `true` for ordinary failures the caller is expected to handle.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::AllocationFailure { .. } | ErrorKind::CapacityExceeded { .. }
        )
    }

    /// `true` for misuse of the ownership protocol itself.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::DoubleRelease { .. }
                | ErrorKind::OriginMismatch { .. }
                | ErrorKind::DanglingUse { .. }
                | ErrorKind::UnknownHandle { .. }
        )
    }

    pub fn allocation_failure(what: impl Into<String>, requested: u64) -> Error {
        ErrorKind::AllocationFailure {
            what: what.into(),
            requested,
        }
        .into()
    }

    pub fn capacity_exceeded(required: usize, capacity: usize) -> Error {
        ErrorKind::CapacityExceeded { required, capacity }.into()
    }

    pub fn double_release(id: ResourceId) -> Error {
        ErrorKind::DoubleRelease { id }.into()
    }

    pub fn origin_mismatch(id: ResourceId, expected: OriginTag, presented: OriginTag) -> Error {
        ErrorKind::OriginMismatch {
            id,
            expected,
            presented,
        }
        .into()
    }

    pub fn dangling_use(id: Option<ResourceId>) -> Error {
        ErrorKind::DanglingUse { id }.into()
    }

    pub fn unknown_handle(id: ResourceId) -> Error {
        ErrorKind::UnknownHandle { id }.into()
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        ErrorKind::InvalidArgument {
            name: name.into(),
            message: message.into(),
        }
        .into()
    }

    pub fn invalid_operation(name: impl Into<String>) -> Error {
        ErrorKind::InvalidOperation { name: name.into() }.into()
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("allocation of {requested} bytes for {what} could not be satisfied")]
    AllocationFailure { what: String, requested: u64 },

    #[error("destination buffer is too small: {required} bytes required, capacity {capacity}")]
    CapacityExceeded { required: usize, capacity: usize },

    #[error("{id} released twice")]
    DoubleRelease { id: ResourceId },

    #[error("{id} was created by {expected} but released through {presented}")]
    OriginMismatch {
        id: ResourceId,
        expected: OriginTag,
        presented: OriginTag,
    },

    #[error("use of released resource {}", display_id(.id))]
    DanglingUse { id: Option<ResourceId> },

    #[error("release of {id} with no creation record")]
    UnknownHandle { id: ResourceId },

    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("invalid operation {name}")]
    InvalidOperation { name: String },
}

impl ErrorKind {
    pub fn status(&self) -> Status {
        match self {
            ErrorKind::AllocationFailure { .. } => Status::AllocationFailure,
            ErrorKind::CapacityExceeded { .. } => Status::CapacityExceeded,
            ErrorKind::DoubleRelease { .. } => Status::DoubleRelease,
            ErrorKind::OriginMismatch { .. } => Status::OriginMismatch,
            ErrorKind::DanglingUse { .. } => Status::DanglingUse,
            ErrorKind::UnknownHandle { .. } => Status::UnknownHandle,
            ErrorKind::InvalidArgument { .. } => Status::InvalidArgument,
            ErrorKind::InvalidOperation { .. } => Status::InvalidOperation,
        }
    }
}

fn display_id(id: &Option<ResourceId>) -> String {
    match id {
        Some(id) => id.to_string(),
        None => "<empty>".to_string(),
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let tag_a = OriginTag::next();
        let tag_b = OriginTag::next();
        let id = ResourceId::next();

        assert!(Error::capacity_exceeded(12, 11).is_recoverable());
        assert!(Error::allocation_failure("buffer", 64).is_recoverable());

        let mismatch = Error::origin_mismatch(id, tag_a, tag_b);
        assert!(mismatch.is_protocol_violation());
        assert!(!mismatch.is_recoverable());
        assert_eq!(mismatch.status(), Status::OriginMismatch);
        assert!(Error::double_release(id).is_protocol_violation());
    }

    #[test]
    fn test_messages() {
        let err = Error::capacity_exceeded(12, 11);
        assert_eq!(
            err.to_string(),
            "destination buffer is too small: 12 bytes required, capacity 11"
        );
        assert_eq!(
            Error::dangling_use(None).to_string(),
            "use of released resource <empty>"
        );
    }
}
