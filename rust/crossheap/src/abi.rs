//! C-compatible entry points.
//!
//! Only plain data crosses this surface: pointers, sizes, [`RawHandle`]s and
//! [`Status`] codes. Memory passed in is always owned by the caller. Buffers
//! created through [`crossheap_buffer_create`] stay owned by the factory and
//! are released only through [`crossheap_buffer_destroy`] on that factory.

use crossheap_common::{Error, Result, Status};

use crate::buffer::{BufferDescriptor, BufferProducer};
use crate::demo::buffers::BufferFactory;
use crate::demo::text::Uppercase;
use crate::opaque::{Handle, RawHandle};

/// Bytes needed by [`crossheap_uppercase_process`] for the given input,
/// terminator included. Returns 0 if `input` is null while `input_len` is not.
///
/// # Safety
///
/// `input` must be null or point to `input_len` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn crossheap_uppercase_required_size(
    input: *const u8,
    input_len: usize,
) -> usize {
    // SAFETY: forwarded from the caller.
    match unsafe { input_slice(input, input_len) } {
        Ok(input) => Uppercase.required_size(input),
        Err(_) => 0,
    }
}

/// Writes the uppercased, NUL-terminated input into `out`.
///
/// On success stores the number of bytes written in `*out_len`. On failure
/// nothing is written to `out` and `*out_len` is left untouched.
///
/// # Safety
///
/// `out` must point to `capacity` writable bytes, `out_len` to a writable
/// `usize`, and `input` to `input_len` readable bytes that do not overlap
/// `out`. `input` may be null when `input_len` is 0.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn crossheap_uppercase_process(
    out: *mut u8,
    capacity: usize,
    out_len: *mut usize,
    input: *const u8,
    input_len: usize,
) -> Status {
    // SAFETY: forwarded from the caller.
    let result = unsafe { uppercase_into(out, capacity, out_len, input, input_len) };
    if let Err(e) = &result {
        log::debug!("crossheap_uppercase_process: {e}");
    }
    Status::from_result(&result)
}

unsafe fn uppercase_into(
    out: *mut u8,
    capacity: usize,
    out_len: *mut usize,
    input: *const u8,
    input_len: usize,
) -> Result<()> {
    if out.is_null() {
        return Err(Error::invalid_arg("out", "must not be null"));
    }
    if out_len.is_null() {
        return Err(Error::invalid_arg("out_len", "must not be null"));
    }
    // SAFETY: both pointers are non-null and valid per the caller contract.
    let (data, input) = unsafe {
        let input = input_slice(input, input_len)?;
        (std::slice::from_raw_parts_mut(out, capacity), input)
    };
    let mut buffer = BufferDescriptor::new(data);
    let written = Uppercase.process(&mut buffer, input)?;
    // SAFETY: checked non-null above.
    unsafe { out_len.write(written) };
    Ok(())
}

/// Allocates a zeroed buffer of `size` bytes from `factory`.
///
/// Returns [`RawHandle::NULL`] if `factory` is null, `size` is 0 or the
/// module quota cannot cover the request.
///
/// # Safety
///
/// `factory` must be null or point to a live [`BufferFactory`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn crossheap_buffer_create(
    factory: *const BufferFactory,
    size: usize,
) -> RawHandle {
    // SAFETY: forwarded from the caller.
    let result = unsafe { factory_ref(factory) }.and_then(|factory| factory.create(size));
    match result {
        Ok(handle) => handle.into_raw(),
        Err(e) => {
            log::debug!("crossheap_buffer_create: {e}");
            RawHandle::NULL
        }
    }
}

/// Releases a buffer created by [`crossheap_buffer_create`] on the same
/// factory.
///
/// A handle issued by another factory fails with `OriginMismatch`, and a
/// second destroy of the same handle with `DoubleRelease`.
///
/// # Safety
///
/// `factory` must be null or point to a live [`BufferFactory`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn crossheap_buffer_destroy(
    factory: *const BufferFactory,
    handle: RawHandle,
) -> Status {
    // SAFETY: forwarded from the caller.
    let result =
        unsafe { factory_ref(factory) }.and_then(|factory| factory.destroy(Handle::from_raw(handle)));
    if let Err(e) = &result {
        log::debug!("crossheap_buffer_destroy: {e}");
    }
    Status::from_result(&result)
}

/// Stores the size of the buffer named by `handle` in `*out_size`.
///
/// # Safety
///
/// `factory` must be null or point to a live [`BufferFactory`], and
/// `out_size` must be null or point to a writable `usize`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn crossheap_buffer_size(
    factory: *const BufferFactory,
    handle: RawHandle,
    out_size: *mut usize,
) -> Status {
    let result = if out_size.is_null() {
        Err(Error::invalid_arg("out_size", "must not be null"))
    } else {
        // SAFETY: forwarded from the caller.
        unsafe { factory_ref(factory) }
            .and_then(|factory| factory.size(Handle::from_raw(handle)))
            // SAFETY: checked non-null above.
            .map(|size| unsafe { out_size.write(size) })
    };
    if let Err(e) = &result {
        log::debug!("crossheap_buffer_size: {e}");
    }
    Status::from_result(&result)
}

unsafe fn factory_ref<'a>(factory: *const BufferFactory) -> Result<&'a BufferFactory> {
    // SAFETY: null or a live factory per the caller contract.
    unsafe { factory.as_ref() }.ok_or_else(|| Error::invalid_arg("factory", "must not be null"))
}

unsafe fn input_slice<'a>(input: *const u8, input_len: usize) -> Result<&'a [u8]> {
    if input.is_null() {
        if input_len == 0 {
            return Ok(&[]);
        }
        return Err(Error::invalid_arg("input", "must not be null"));
    }
    // SAFETY: non-null and valid for `input_len` bytes per the caller contract.
    Ok(unsafe { std::slice::from_raw_parts(input, input_len) })
}
