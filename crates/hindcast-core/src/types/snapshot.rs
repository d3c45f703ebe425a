//! Atomic captures of a thread's CPU state.

use super::registers::{Wow64RegisterFile, X64RegisterFile};
use super::Address;

/// The register file of a suspended thread, in one of two widths.
///
/// The tag reflects the *target's* execution mode. A 64-bit debugger
/// inspecting a WOW64 process still sees `Wow32` here; the width of the
/// debugger itself never enters into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterFile
{
    /// Native 64-bit thread state.
    Native64(X64RegisterFile),
    /// 32-bit thread state captured through the WOW64 layer.
    Wow32(Wow64RegisterFile),
}

/// A thread snapshot: a register file plus the handles it was fetched with.
///
/// The handle words are raw OS handle values (opaque `u64`s); snapshots
/// rehydrated from a journal or built for replay carry zeroes there. Callers
/// must check [`ThreadSnapshot::is_native_64`] before touching a width
/// variant.
#[derive(Debug, Clone)]
pub struct ThreadSnapshot
{
    registers: RegisterFile,
    h_process: u64,
    h_thread: u64,
}

impl ThreadSnapshot
{
    /// Build a snapshot from an already-captured register file.
    ///
    /// Used by replay (register file decoded from the journal) and by
    /// postmortem attach (register file read out of the target).
    #[must_use]
    pub fn from_registers(registers: RegisterFile, h_process: u64, h_thread: u64) -> Self
    {
        Self {
            registers,
            h_process,
            h_thread,
        }
    }

    /// Fetch the register file of a live thread.
    ///
    /// Queries the OS for the target's word mode and populates the
    /// appropriate variant with full context flags.
    #[cfg(windows)]
    pub fn capture(h_process: u64, h_thread: u64) -> crate::error::HindcastResult<Self>
    {
        let registers = crate::platform::windows::capture_registers(h_process, h_thread)?;
        Ok(Self {
            registers,
            h_process,
            h_thread,
        })
    }

    /// True when the target thread runs in native 64-bit mode.
    #[must_use]
    pub fn is_native_64(&self) -> bool
    {
        matches!(self.registers, RegisterFile::Native64(_))
    }

    /// The tagged register file.
    #[must_use]
    pub fn registers(&self) -> &RegisterFile
    {
        &self.registers
    }

    /// The 64-bit register file, when this is a native snapshot.
    #[must_use]
    pub fn native_64(&self) -> Option<&X64RegisterFile>
    {
        match &self.registers {
            RegisterFile::Native64(file) => Some(file),
            RegisterFile::Wow32(_) => None,
        }
    }

    /// The 32-bit register file, when this is a WOW64 snapshot.
    #[must_use]
    pub fn wow_32(&self) -> Option<&Wow64RegisterFile>
    {
        match &self.registers {
            RegisterFile::Native64(_) => None,
            RegisterFile::Wow32(file) => Some(file),
        }
    }

    /// Program counter, regardless of width.
    #[must_use]
    pub fn program_counter(&self) -> Address
    {
        match &self.registers {
            RegisterFile::Native64(file) => Address::new(file.rip),
            RegisterFile::Wow32(file) => Address::new(u64::from(file.eip)),
        }
    }

    /// Stack pointer, regardless of width.
    #[must_use]
    pub fn stack_pointer(&self) -> Address
    {
        match &self.registers {
            RegisterFile::Native64(file) => Address::new(file.rsp),
            RegisterFile::Wow32(file) => Address::new(u64::from(file.esp)),
        }
    }

    /// Frame/base pointer, regardless of width.
    #[must_use]
    pub fn frame_pointer(&self) -> Address
    {
        match &self.registers {
            RegisterFile::Native64(file) => Address::new(file.rbp),
            RegisterFile::Wow32(file) => Address::new(u64::from(file.ebp)),
        }
    }

    /// Raw process handle word used for the capture (0 when synthetic).
    #[must_use]
    pub fn process_handle(&self) -> u64
    {
        self.h_process
    }

    /// Raw thread handle word used for the capture (0 when synthetic).
    #[must_use]
    pub fn thread_handle(&self) -> u64
    {
        self.h_thread
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_tag_accessors()
    {
        let mut x64 = X64RegisterFile::default();
        x64.rip = 0x1000;
        let native = ThreadSnapshot::from_registers(RegisterFile::Native64(x64), 0, 0);
        assert!(native.is_native_64());
        assert!(native.native_64().is_some());
        assert!(native.wow_32().is_none());
        assert_eq!(native.program_counter(), Address::new(0x1000));

        let mut x86 = Wow64RegisterFile::default();
        x86.eip = 0x2000;
        let wow = ThreadSnapshot::from_registers(RegisterFile::Wow32(x86), 0, 0);
        assert!(!wow.is_native_64());
        assert!(wow.wow_32().is_some());
        assert_eq!(wow.program_counter(), Address::new(0x2000));
    }
}
