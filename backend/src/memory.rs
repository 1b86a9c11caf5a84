//! Bounds-checked access to a sandbox memory image by sandbox offset.
//!
//! These helpers serve code that runs on the sandbox side of the boundary
//! (guest functions of the test arena). Every access validates the whole
//! range `[addr, addr + len)` before touching memory.

use crate::error::BackendError;

/// Check that `[addr, addr + len)` lies within a region of `mem_size` bytes.
pub fn validate_range(mem_size: usize, addr: u64, len: usize) -> Result<usize, BackendError> {
    let start = usize::try_from(addr).map_err(|_| BackendError::InvalidAddress(addr))?;
    let end = start
        .checked_add(len)
        .ok_or(BackendError::InvalidAddress(addr))?;
    if end > mem_size {
        return Err(BackendError::InvalidAddress(addr));
    }
    Ok(start)
}

/// Read `len` bytes at `addr`.
pub fn read_bytes(mem: &[u8], addr: u64, len: usize) -> Result<Vec<u8>, BackendError> {
    let start = validate_range(mem.len(), addr, len)?;
    Ok(mem[start..start + len].to_vec())
}

/// Write `data` at `addr`.
pub fn write_bytes(mem: &mut [u8], addr: u64, data: &[u8]) -> Result<(), BackendError> {
    let start = validate_range(mem.len(), addr, data.len())?;
    mem[start..start + data.len()].copy_from_slice(data);
    Ok(())
}

pub fn read_u32(mem: &[u8], addr: u64) -> Result<u32, BackendError> {
    let start = validate_range(mem.len(), addr, 4)?;
    let mut word = [0u8; 4];
    word.copy_from_slice(&mem[start..start + 4]);
    Ok(u32::from_ne_bytes(word))
}

pub fn write_u32(mem: &mut [u8], addr: u64, value: u32) -> Result<(), BackendError> {
    write_bytes(mem, addr, &value.to_ne_bytes())
}

pub fn read_u64(mem: &[u8], addr: u64) -> Result<u64, BackendError> {
    let start = validate_range(mem.len(), addr, 8)?;
    let mut word = [0u8; 8];
    word.copy_from_slice(&mem[start..start + 8]);
    Ok(u64::from_ne_bytes(word))
}

pub fn write_u64(mem: &mut [u8], addr: u64, value: u64) -> Result<(), BackendError> {
    write_bytes(mem, addr, &value.to_ne_bytes())
}
