//! DbgHelp symbol engine bindings: scoped initialization, symbol and line
//! queries, name undecoration and the OS stack walker.
//!
//! DbgHelp keeps per-process state behind the process handle it was
//! initialized with, and double initialization is a bug; [`SymbolSession`]
//! makes the acquisition scoped so one unwind cannot leak into the next.

use core::ffi::c_void;

use windows_sys::Win32::Foundation::GetLastError;
use windows_sys::Win32::System::Diagnostics::Debug::{
    StackWalk64, SymCleanup, SymFromAddrW, SymFunctionTableAccess64, SymGetLineFromAddrW64,
    SymGetModuleBase64, SymInitializeW, SymSetOptions, UnDecorateSymbolNameW, IMAGEHLP_LINEW64,
    STACKFRAME64, SYMBOL_INFOW,
};

use crate::error::{HindcastError, HindcastResult};
use crate::types::{Address, RegisterFile, ThreadSnapshot};
use crate::unwind::RawFrame;

use super::handle;

/// `SYMOPT_ALLOW_ABSOLUTE_SYMBOLS`.
const SYMOPT_ALLOW_ABSOLUTE_SYMBOLS: u32 = 0x0000_0800;
/// `SYMOPT_DEFERRED_LOADS`.
const SYMOPT_DEFERRED_LOADS: u32 = 0x0000_0004;
/// `SYMOPT_INCLUDE_32BIT_MODULES`.
const SYMOPT_INCLUDE_32BIT_MODULES: u32 = 0x0000_2000;
/// `SYMOPT_LOAD_LINES`.
const SYMOPT_LOAD_LINES: u32 = 0x0000_0010;
/// `SYMOPT_UNDNAME`.
const SYMOPT_UNDNAME: u32 = 0x0000_0002;

/// `MAX_SYM_NAME`, in characters.
const MAX_SYM_NAME: usize = 2000;

/// `IMAGE_FILE_MACHINE_AMD64`.
const MACHINE_AMD64: u32 = 0x8664;
/// `IMAGE_FILE_MACHINE_I386`.
const MACHINE_I386: u32 = 0x014C;
/// `AddrModeFlat`.
const ADDR_MODE_FLAT: i32 = 3;

/// A symbol resolved at an address.
#[derive(Debug, Clone)]
pub struct SymbolHit
{
    /// Undecorated symbol name (may be empty).
    pub name: String,
    /// Distance from the symbol start to the queried address.
    pub displacement: u64,
    /// Base of the module the symbol engine attributes the symbol to.
    pub module_base: u64,
    /// Size of the symbol in bytes, 0 when unknown.
    pub size: u64,
}

/// A source line resolved at an address.
#[derive(Debug, Clone)]
pub struct LineHit
{
    /// Source file path.
    pub file: String,
    /// Line number.
    pub line: u32,
    /// Address the line record maps to.
    pub address: u64,
    /// Distance from the line start to the queried address.
    pub displacement: u64,
}

/// Scoped DbgHelp initialization for one process.
///
/// Construction configures the engine (absolute symbols, deferred loads,
/// 32-bit modules, line info, undecorated names) and calls `SymInitializeW`
/// with the optional extra search path; drop releases the per-process state
/// with `SymCleanup`.
pub struct SymbolSession
{
    h_process: u64,
}

impl SymbolSession
{
    /// Initialize the symbol engine against `h_process`.
    pub fn initialize(h_process: u64, search_path: Option<&str>) -> HindcastResult<Self>
    {
        unsafe {
            SymSetOptions(
                SYMOPT_ALLOW_ABSOLUTE_SYMBOLS
                    | SYMOPT_DEFERRED_LOADS
                    | SYMOPT_INCLUDE_32BIT_MODULES
                    | SYMOPT_LOAD_LINES
                    | SYMOPT_UNDNAME,
            );
        }

        let wide_path: Option<Vec<u16>> =
            search_path.map(|path| path.encode_utf16().chain(std::iter::once(0)).collect());
        let path_pointer = wide_path.as_ref().map_or(core::ptr::null(), |path| path.as_ptr());

        let ok = unsafe { SymInitializeW(handle(h_process), path_pointer, 1) };
        if ok == 0 {
            return Err(HindcastError::SymbolEngine(format!(
                "SymInitialize failed (code {})",
                unsafe { GetLastError() }
            )));
        }

        Ok(Self { h_process })
    }

    /// Resolve the symbol containing `address`.
    #[must_use]
    pub fn symbol_at(&self, address: Address) -> Option<SymbolHit>
    {
        // SYMBOL_INFOW is a header followed by an inline name buffer.
        const HEADER: usize = core::mem::size_of::<SYMBOL_INFOW>();
        let mut buffer = vec![0u8; HEADER + MAX_SYM_NAME * 2];

        let symbol = buffer.as_mut_ptr().cast::<SYMBOL_INFOW>();
        unsafe {
            (*symbol).SizeOfStruct = HEADER as u32;
            (*symbol).MaxNameLen = MAX_SYM_NAME as u32;
        }

        let mut displacement = 0u64;
        let ok = unsafe { SymFromAddrW(handle(self.h_process), address.value(), &mut displacement, symbol) };
        if ok == 0 {
            return None;
        }

        let name = unsafe {
            let length = (*symbol).NameLen as usize;
            let start = (*symbol).Name.as_ptr();
            let units = core::slice::from_raw_parts(start, length.min(MAX_SYM_NAME));
            String::from_utf16_lossy(units)
        };

        Some(SymbolHit {
            name,
            displacement,
            module_base: unsafe { (*symbol).ModBase },
            size: u64::from(unsafe { (*symbol).Size }),
        })
    }

    /// Resolve the source line containing `address`.
    #[must_use]
    pub fn line_at(&self, address: Address) -> Option<LineHit>
    {
        let mut line: IMAGEHLP_LINEW64 = unsafe { core::mem::zeroed() };
        line.SizeOfStruct = core::mem::size_of::<IMAGEHLP_LINEW64>() as u32;

        let mut displacement = 0u32;
        let ok = unsafe { SymGetLineFromAddrW64(handle(self.h_process), address.value(), &mut displacement, &mut line) };
        if ok == 0 {
            return None;
        }

        let file = unsafe {
            let mut length = 0usize;
            while *line.FileName.add(length) != 0 {
                length += 1;
            }
            String::from_utf16_lossy(core::slice::from_raw_parts(line.FileName, length))
        };

        Some(LineHit {
            file,
            line: line.LineNumber,
            address: line.Address,
            displacement: u64::from(displacement),
        })
    }
}

impl Drop for SymbolSession
{
    fn drop(&mut self)
    {
        unsafe {
            SymCleanup(handle(self.h_process));
        }
    }
}

/// Undecorate an MSVC-decorated symbol or type-descriptor name.
///
/// Type descriptors carry names of the form `.?AVname@space@@`; skipping
/// the leading dot yields a form the system undecorator accepts, producing
/// the `class ns::name` signature.
#[must_use]
pub fn undecorate_type_name(decorated: &str) -> Option<String>
{
    /// `UNDNAME_COMPLETE`.
    const UNDNAME_COMPLETE: u32 = 0;

    let trimmed = decorated.strip_prefix('.').unwrap_or(decorated);
    let wide: Vec<u16> = trimmed.encode_utf16().chain(std::iter::once(0)).collect();

    let mut output = vec![0u16; 1024];
    let length = unsafe {
        UnDecorateSymbolNameW(wide.as_ptr(), output.as_mut_ptr(), output.len() as u32, UNDNAME_COMPLETE)
    };
    if length == 0 {
        return None;
    }
    output.truncate(length as usize);
    Some(String::from_utf16_lossy(&output))
}

/// Walk the OS stack for the snapshot's thread.
///
/// Initializes the frame descriptor from the snapshot's PC/BP/SP and steps
/// through `StackWalk64` until it reports no next frame. A symbol session
/// should be active so function-table lookups succeed on machines without
/// frame pointers.
#[must_use]
pub fn walk_stack(snapshot: &ThreadSnapshot) -> Vec<RawFrame>
{
    let mut frame: STACKFRAME64 = unsafe { core::mem::zeroed() };
    frame.AddrPC.Mode = ADDR_MODE_FLAT;
    frame.AddrFrame.Mode = ADDR_MODE_FLAT;
    frame.AddrStack.Mode = ADDR_MODE_FLAT;
    frame.AddrPC.Offset = snapshot.program_counter().value();
    frame.AddrFrame.Offset = snapshot.frame_pointer().value();
    frame.AddrStack.Offset = snapshot.stack_pointer().value();

    // StackWalk64 mutates the context it is given; hand it an aligned copy
    // in whichever layout matches the machine type.
    let mut native = AlignedNativeContext::from_snapshot(snapshot);
    let mut wow: windows_sys::Win32::System::Diagnostics::Debug::WOW64_CONTEXT =
        unsafe { core::mem::zeroed() };
    let (machine, context_pointer): (u32, *mut c_void) = match snapshot.registers() {
        RegisterFile::Native64(_) => (MACHINE_AMD64, (&mut native.context as *mut _).cast()),
        RegisterFile::Wow32(_) => {
            fill_wow64_context(snapshot, &mut wow);
            (MACHINE_I386, (&mut wow as *mut _).cast())
        }
    };

    let mut frames = Vec::new();
    loop {
        let ok = unsafe {
            StackWalk64(
                machine,
                handle(snapshot.process_handle()),
                handle(snapshot.thread_handle()),
                &mut frame,
                context_pointer,
                None,
                Some(SymFunctionTableAccess64),
                Some(SymGetModuleBase64),
                None,
            )
        };
        if ok == 0 {
            break;
        }

        frames.push(RawFrame {
            pc: Address::new(frame.AddrPC.Offset),
            ret: Address::new(frame.AddrReturn.Offset),
        });
    }

    frames
}

/// `CONTEXT` with the 16-byte alignment the OS requires.
#[repr(align(16))]
struct AlignedNativeContext
{
    context: windows_sys::Win32::System::Diagnostics::Debug::CONTEXT,
}

impl AlignedNativeContext
{
    fn from_snapshot(snapshot: &ThreadSnapshot) -> Self
    {
        let mut context: windows_sys::Win32::System::Diagnostics::Debug::CONTEXT =
            unsafe { core::mem::zeroed() };
        if let Some(file) = snapshot.native_64() {
            context.Rip = file.rip;
            context.Rsp = file.rsp;
            context.Rbp = file.rbp;
            context.Rax = file.rax;
            context.Rbx = file.rbx;
            context.Rcx = file.rcx;
            context.Rdx = file.rdx;
            context.Rsi = file.rsi;
            context.Rdi = file.rdi;
            context.R8 = file.r8;
            context.R9 = file.r9;
            context.R10 = file.r10;
            context.R11 = file.r11;
            context.R12 = file.r12;
            context.R13 = file.r13;
            context.R14 = file.r14;
            context.R15 = file.r15;
            context.EFlags = file.rflags as u32;
        }
        Self { context }
    }
}

/// Rebuild an OS `WOW64_CONTEXT` image from a WOW64 snapshot.
fn fill_wow64_context(
    snapshot: &ThreadSnapshot,
    context: &mut windows_sys::Win32::System::Diagnostics::Debug::WOW64_CONTEXT,
)
{
    if let Some(file) = snapshot.wow_32() {
        context.Eip = file.eip;
        context.Esp = file.esp;
        context.Ebp = file.ebp;
        context.Eax = file.eax;
        context.Ebx = file.ebx;
        context.Ecx = file.ecx;
        context.Edx = file.edx;
        context.Esi = file.esi;
        context.Edi = file.edi;
        context.EFlags = file.eflags;
    }
}
