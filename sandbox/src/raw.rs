//! Raw byte access to memory the sandbox may be writing concurrently.
//!
//! Every access is a byte-wise volatile operation so the compiler cannot
//! merge, elide, or repeat reads of sandbox memory. Callers have already
//! range-checked the addresses.

use std::ptr;

/// Copy `out.len()` bytes starting at `src` into `out`.
///
/// # Safety
/// `[src, src + out.len())` must be readable.
pub(crate) unsafe fn read(src: *const u8, out: &mut [u8]) {
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = ptr::read_volatile(src.add(i));
    }
}

/// Write `data` starting at `dst`.
///
/// # Safety
/// `[dst, dst + data.len())` must be writable.
pub(crate) unsafe fn write(dst: *mut u8, data: &[u8]) {
    for (i, byte) in data.iter().enumerate() {
        ptr::write_volatile(dst.add(i), *byte);
    }
}

/// Copy `n` bytes. The ranges may overlap.
///
/// # Safety
/// Both ranges must be valid for `n` bytes.
pub(crate) unsafe fn copy(src: *const u8, dst: *mut u8, n: usize) {
    if (dst as usize) > (src as usize) && (dst as usize) < (src as usize).wrapping_add(n) {
        for i in (0..n).rev() {
            ptr::write_volatile(dst.add(i), ptr::read_volatile(src.add(i)));
        }
    } else {
        for i in 0..n {
            ptr::write_volatile(dst.add(i), ptr::read_volatile(src.add(i)));
        }
    }
}

/// Set `n` bytes at `dst` to `value`.
///
/// # Safety
/// `[dst, dst + n)` must be writable.
pub(crate) unsafe fn fill(dst: *mut u8, value: u8, n: usize) {
    for i in 0..n {
        ptr::write_volatile(dst.add(i), value);
    }
}
