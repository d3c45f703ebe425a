//! Postmortem (JIT) handoff ingestion.
//!
//! When an unhandled fault escalates, the OS crash reporter launches the
//! configured debugger and passes it a pid, an event handle duplicated into
//! the new process, and the address of a `JIT_DEBUG_INFO` block inside the
//! *target*. Everything interesting (the faulting thread id, the exception
//! record, the register file) has to be read back out of the target's
//! address space before the dispatcher can replay the fault through its
//! normal exception path.

/// The three values the OS hands a just-in-time debugger.
#[derive(Debug, Clone, Copy)]
pub struct JitHandoff
{
    /// Pid of the faulted process.
    pub process_id: u32,
    /// Raw handle word of the event to signal once the fault is resolved.
    pub event_handle: u64,
    /// Address of the `JIT_DEBUG_INFO` block in the target.
    pub jit_info_address: u64,
}

/// The `JIT_DEBUG_INFO` block, read out of the target.
#[cfg(windows)]
#[derive(Debug, Clone, Copy)]
pub struct JitDebugInfo
{
    /// Processor architecture of the faulted process.
    pub processor_architecture: u32,
    /// Id of the faulting thread.
    pub thread_id: u32,
    /// Address of the faulting instruction.
    pub exception_address: u64,
    /// Address of the exception record in the target.
    pub exception_record: u64,
    /// Address of the register file in the target.
    pub context_record: u64,
}

/// A fully ingested handoff: the parsed info block plus the exception
/// record it pointed at.
#[cfg(windows)]
pub struct JitSession
{
    pub info: JitDebugInfo,
    /// Raw handle word of the handoff event to signal.
    pub handoff_event: u64,
    /// The exception record read from the target, with the faulting address
    /// taken from the info block.
    pub exception_record: crate::types::ExceptionRecordData,
}

#[cfg(windows)]
mod windows_impl
{
    use super::{JitDebugInfo, JitHandoff, JitSession};

    use crate::error::{HindcastError, HindcastResult};
    use crate::platform::windows as os;
    use crate::types::{
        Address, ExceptionRecordData, ProcessRef, RegisterFile, TargetMemory, ThreadSnapshot,
    };

    /// Packed size of `JIT_DEBUG_INFO`.
    const JIT_DEBUG_INFO_SIZE: usize = 40;
    /// Packed size of a 64-bit exception record.
    const EXCEPTION_RECORD_SIZE: usize = 152;

    impl JitSession
    {
        /// Read the info block and the exception record out of the target.
        pub fn read(process: &ProcessRef, handoff: JitHandoff) -> HindcastResult<Self>
        {
            let memory = process.memory();

            let mut block = [0u8; JIT_DEBUG_INFO_SIZE];
            memory.read_exact(Address::new(handoff.jit_info_address), &mut block)?;

            let info = JitDebugInfo {
                processor_architecture: u32::from_le_bytes(block[4..8].try_into().expect("sized")),
                thread_id: u32::from_le_bytes(block[8..12].try_into().expect("sized")),
                exception_address: u64::from_le_bytes(block[16..24].try_into().expect("sized")),
                exception_record: u64::from_le_bytes(block[24..32].try_into().expect("sized")),
                context_record: u64::from_le_bytes(block[32..40].try_into().expect("sized")),
            };

            let mut record = [0u8; EXCEPTION_RECORD_SIZE];
            memory.read_exact(Address::new(info.exception_record), &mut record)?;

            let code = u32::from_le_bytes(record[0..4].try_into().expect("sized"));
            let parameter_count = u32::from_le_bytes(record[24..28].try_into().expect("sized")).min(15) as usize;
            let parameters = (0..parameter_count)
                .map(|slot| {
                    let start = 32 + slot * 8;
                    u64::from_le_bytes(record[start..start + 8].try_into().expect("sized"))
                })
                .collect();

            Ok(Self {
                info,
                handoff_event: handoff.event_handle,
                exception_record: ExceptionRecordData {
                    code,
                    // The info block's address is authoritative; the record's
                    // own address field can lag behind rethrow shims.
                    address: Address::new(info.exception_address),
                    parameters,
                },
            })
        }

        /// Read the faulting thread's register file out of the target.
        pub fn snapshot(&self, process: &ProcessRef) -> HindcastResult<ThreadSnapshot>
        {
            use windows_sys::Win32::System::Diagnostics::Debug::{CONTEXT, WOW64_CONTEXT};

            let memory = process.memory();
            let address = Address::new(self.context_record());

            let registers = if process.is_wow64() {
                let mut context: WOW64_CONTEXT = unsafe { core::mem::zeroed() };
                read_struct(&memory, address, &mut context)?;
                RegisterFile::Wow32(os::wow64_registers(&context))
            } else {
                let mut context: CONTEXT = unsafe { core::mem::zeroed() };
                read_struct(&memory, address, &mut context)?;
                RegisterFile::Native64(os::x64_registers(&context))
            };

            Ok(ThreadSnapshot::from_registers(
                registers,
                process.process_handle(),
                process.thread_handle(),
            ))
        }

        fn context_record(&self) -> u64
        {
            self.info.context_record
        }
    }

    /// Read a raw OS struct image from the target.
    fn read_struct<T>(memory: &dyn TargetMemory, address: Address, out: &mut T) -> HindcastResult<()>
    {
        let size = core::mem::size_of::<T>();
        let buffer =
            unsafe { core::slice::from_raw_parts_mut((out as *mut T).cast::<u8>(), size) };
        memory
            .read_exact(address, buffer)
            .map_err(|_| HindcastError::RemoteRead(0))
    }
}
