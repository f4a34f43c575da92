//! Raw user-memory access helpers.
//!
//! A syscall handler runs with the faulting process's own CR3 still
//! loaded -- nothing switches address spaces to service a syscall -- so a
//! user pointer is just a pointer the kernel can dereference directly.
//! There is no page-table walk here to check the address actually maps
//! (that's what the page-fault handler is for): a bad pointer faults exactly
//! as it would in user code, and `handle_page_fault` kills the process with
//! SIGSEGV immediately (`signal::fault_now`) rather than returning `EFAULT`
//! -- a syscall handler never gets control back to unwind out of, since the
//! fault happens mid-handler and the trampoline would otherwise just resume
//! straight back into it.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};

const MAX_CSTR_LEN: usize = 4096;
const MAX_VEC_ENTRIES: usize = 256;

/// Reads a NUL-terminated string out of user memory.
///
/// # Safety
/// `ptr` must be a valid user-space address for the currently-active
/// address space, or this reads until it either finds a NUL or faults.
pub unsafe fn read_cstr(ptr: u32) -> KernelResult<String> {
    if ptr == 0 {
        return Err(KernelError::InvalidArgument);
    }
    let base = ptr as *const u8;
    let mut out = Vec::new();
    for i in 0..MAX_CSTR_LEN {
        // SAFETY: forwarded to the caller; `i` stays within MAX_CSTR_LEN.
        let byte = unsafe { core::ptr::read(base.add(i)) };
        if byte == 0 {
            return String::from_utf8(out).map_err(|_| KernelError::InvalidArgument);
        }
        out.push(byte);
    }
    Err(KernelError::NameTooLong)
}

/// Reads a NUL-terminated `char **` vector (`argv`/`envp` shape) out of
/// user memory.
///
/// # Safety
/// Same contract as [`read_cstr`], applied to `ptr` and every pointer it
/// contains.
pub unsafe fn read_strvec(ptr: u32) -> KernelResult<Vec<String>> {
    if ptr == 0 {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    let mut cursor = ptr;
    for _ in 0..MAX_VEC_ENTRIES {
        // SAFETY: forwarded to the caller.
        let entry = unsafe { core::ptr::read(cursor as *const u32) };
        if entry == 0 {
            return Ok(out);
        }
        // SAFETY: forwarded to the caller.
        out.push(unsafe { read_cstr(entry) }?);
        cursor += 4;
    }
    Err(KernelError::InvalidArgument)
}

/// Borrows `len` bytes of user memory as a readable slice.
///
/// # Safety
/// `ptr..ptr+len` must be valid for the currently-active address space for
/// the lifetime of the returned slice.
pub unsafe fn user_slice<'a>(ptr: u32, len: u32) -> KernelResult<&'a [u8]> {
    if ptr == 0 && len != 0 {
        return Err(KernelError::InvalidArgument);
    }
    // SAFETY: forwarded to the caller.
    Ok(unsafe { core::slice::from_raw_parts(ptr as *const u8, len as usize) })
}

/// Borrows `len` bytes of user memory as a writable slice.
///
/// # Safety
/// Same contract as [`user_slice`], plus the range must be writable.
pub unsafe fn user_slice_mut<'a>(ptr: u32, len: u32) -> KernelResult<&'a mut [u8]> {
    if ptr == 0 && len != 0 {
        return Err(KernelError::InvalidArgument);
    }
    // SAFETY: forwarded to the caller.
    Ok(unsafe { core::slice::from_raw_parts_mut(ptr as *mut u8, len as usize) })
}

/// Writes `value` to a user-space `u32 *`.
///
/// # Safety
/// `ptr` must be a valid, writable `u32`-aligned user address.
pub unsafe fn write_u32(ptr: u32, value: u32) -> KernelResult<()> {
    if ptr == 0 {
        return Err(KernelError::InvalidArgument);
    }
    // SAFETY: forwarded to the caller.
    unsafe { core::ptr::write(ptr as *mut u32, value) };
    Ok(())
}
