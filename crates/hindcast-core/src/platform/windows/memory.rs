//! Reads from a live target's address space.

use core::ffi::c_void;

use windows_sys::Win32::Foundation::GetLastError;
use windows_sys::Win32::System::Diagnostics::Debug::ReadProcessMemory;

use crate::error::{HindcastError, HindcastResult};
use crate::types::{Address, TargetMemory};

use super::handle;

/// [`TargetMemory`] over a process handle word.
///
/// The view does not own the handle; it must not outlive whoever does.
/// The core only reads while the target is frozen between a debug event and
/// its continue call, so every read observes a stable image.
#[derive(Debug, Clone, Copy)]
pub struct ProcessMemory
{
    h_process: u64,
}

impl ProcessMemory
{
    #[must_use]
    pub fn new(h_process: u64) -> Self
    {
        Self { h_process }
    }

    /// Read a bounded 8-bit string of exactly `length` bytes.
    pub fn read_string(&self, address: Address, length: usize) -> HindcastResult<String>
    {
        let mut buffer = vec![0u8; length];
        let read = self.read(address, &mut buffer)?;
        buffer.truncate(read);
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Read a bounded UTF-16 string of exactly `length` code units.
    pub fn read_wide_string(&self, address: Address, length: usize) -> HindcastResult<String>
    {
        let mut buffer = vec![0u8; length * 2];
        let read = self.read(address, &mut buffer)?;
        buffer.truncate(read & !1);

        let units: Vec<u16> = buffer
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }
}

impl TargetMemory for ProcessMemory
{
    fn read(&self, address: Address, buffer: &mut [u8]) -> HindcastResult<usize>
    {
        if buffer.is_empty() {
            return Ok(0);
        }

        let mut read: usize = 0;
        let ok = unsafe {
            ReadProcessMemory(
                handle(self.h_process),
                address.value() as usize as *const c_void,
                buffer.as_mut_ptr().cast(),
                buffer.len(),
                &mut read,
            )
        };

        // A partial read reports failure but still fills `read` bytes;
        // only a completely empty result is an error.
        if ok == 0 && read == 0 {
            return Err(HindcastError::RemoteRead(unsafe { GetLastError() }));
        }
        Ok(read)
    }
}
