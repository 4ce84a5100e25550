//! Status codes returned across a module boundary.
//!
//! Errors never unwind across the boundary; every fallible entry point of the
//! C ABI reports one of these values instead.

use serde::Serialize;

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Status {
    Ok = 0,
    AllocationFailure = 1,
    CapacityExceeded = 2,
    DoubleRelease = 3,
    OriginMismatch = 4,
    DanglingUse = 5,
    UnknownHandle = 6,
    InvalidArgument = 7,
    InvalidOperation = 8,
}

impl Status {
    #[inline]
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    pub fn from_code(code: i32) -> Option<Status> {
        Some(match code {
            0 => Status::Ok,
            1 => Status::AllocationFailure,
            2 => Status::CapacityExceeded,
            3 => Status::DoubleRelease,
            4 => Status::OriginMismatch,
            5 => Status::DanglingUse,
            6 => Status::UnknownHandle,
            7 => Status::InvalidArgument,
            8 => Status::InvalidOperation,
            _ => return None,
        })
    }

    pub fn from_result<T>(result: &crate::Result<T>) -> Status {
        match result {
            Ok(_) => Status::Ok,
            Err(e) => e.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        for code in 0..=8 {
            let status = Status::from_code(code).unwrap();
            assert_eq!(status as i32, code);
        }
        assert_eq!(Status::from_code(9), None);
        assert_eq!(Status::from_code(-1), None);
    }
}
