//! Win32 debug API bindings.
//!
//! Thin safe wrappers over `windows-sys`. Handle words cross the crate as
//! raw `u64`s; only this module converts them back to `HANDLE`s. Everything
//! here requires a Windows host and is compiled out elsewhere.

pub mod dbghelp;
pub mod launch;
pub mod memory;

pub use memory::ProcessMemory;

use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, HANDLE};
use windows_sys::Win32::Storage::FileSystem::GetFinalPathNameByHandleW;
use windows_sys::Win32::System::Diagnostics::Debug::{
    ContinueDebugEvent, DebugActiveProcess, DebugActiveProcessStop, DebugSetProcessKillOnExit,
    FormatMessageW, GetThreadContext, WaitForDebugEventEx, Wow64GetThreadContext, CONTEXT,
    DEBUG_EVENT, FORMAT_MESSAGE_FROM_SYSTEM, FORMAT_MESSAGE_IGNORE_INSERTS, WOW64_CONTEXT,
};
use windows_sys::Win32::System::ProcessStatus::{
    K32EnumProcessModulesEx, K32GetModuleFileNameExW, K32GetModuleInformation, LIST_MODULES_ALL,
    MODULEINFO,
};
use windows_sys::Win32::System::Threading::{
    GetExitCodeProcess, IsWow64Process, OpenProcess, OpenThread, ResumeThread, SetEvent,
    TerminateProcess, PROCESS_ALL_ACCESS, THREAD_ALL_ACCESS,
};

use crate::error::{HindcastError, HindcastResult};
use crate::types::{
    Address, ExceptionRecordData, RegisterFile, Wow64RegisterFile, X64RegisterFile,
};

/// `STILL_ACTIVE`, the exit code of a process that has not exited.
const STILL_ACTIVE: u32 = 259;
/// Full context flags for a native x64 capture.
const CONTEXT_ALL_AMD64: u32 = 0x0010_001F;
/// Full context flags for a WOW64 capture.
const WOW64_CONTEXT_ALL: u32 = 0x0001_003F;
/// `INFINITE` wait.
const INFINITE: u32 = 0xFFFF_FFFF;

/// Convert a raw handle word into an OS handle.
#[must_use]
pub(crate) fn handle(word: u64) -> HANDLE
{
    word as usize as HANDLE
}

/// Convert an OS handle into a raw handle word.
#[must_use]
pub(crate) fn handle_word(handle: HANDLE) -> u64
{
    handle as usize as u64
}

/// Close a raw handle word, ignoring null/invalid values.
pub fn close_handle(word: u64)
{
    if word != 0 && word != u64::MAX {
        unsafe {
            CloseHandle(handle(word));
        }
    }
}

/// Attach the debugger to a running process.
pub fn debug_attach(process_id: u32) -> HindcastResult<()>
{
    let ok = unsafe { DebugActiveProcess(process_id) };
    if ok == 0 {
        return Err(HindcastError::AttachRefused(unsafe { GetLastError() }));
    }
    Ok(())
}

/// Detach from the target.
pub fn debug_detach(process_id: u32)
{
    unsafe {
        DebugActiveProcessStop(process_id);
    }
}

/// Control whether the target dies when the debugger exits.
pub fn set_kill_on_exit(kill: bool)
{
    unsafe {
        DebugSetProcessKillOnExit(i32::from(kill));
    }
}

/// Open a process with full access, returning the raw handle word.
pub fn open_process(process_id: u32) -> HindcastResult<u64>
{
    let handle = unsafe { OpenProcess(PROCESS_ALL_ACCESS, 0, process_id) };
    if handle.is_null() {
        return Err(HindcastError::AttachRefused(unsafe { GetLastError() }));
    }
    Ok(handle_word(handle))
}

/// Open a thread with full access, returning the raw handle word.
pub fn open_thread(thread_id: u32) -> HindcastResult<u64>
{
    let handle = unsafe { OpenThread(THREAD_ALL_ACCESS, 0, thread_id) };
    if handle.is_null() {
        return Err(HindcastError::AttachRefused(unsafe { GetLastError() }));
    }
    Ok(handle_word(handle))
}

/// Resume a suspended thread.
pub fn resume_thread(h_thread: u64) -> HindcastResult<()>
{
    let result = unsafe { ResumeThread(handle(h_thread)) };
    if result == u32::MAX {
        return Err(HindcastError::LaunchFailed(format!(
            "cannot resume main thread (code {})",
            unsafe { GetLastError() }
        )));
    }
    Ok(())
}

/// Forcefully terminate a process.
pub fn terminate_process(h_process: u64, exit_code: u32)
{
    unsafe {
        TerminateProcess(handle(h_process), exit_code);
    }
}

/// Signal an event object (the JIT handoff event in postmortem mode).
pub fn signal_event(h_event: u64)
{
    unsafe {
        SetEvent(handle(h_event));
    }
}

/// True when the process has not exited yet.
#[must_use]
pub fn process_is_running(h_process: u64) -> bool
{
    let mut exit_code = 0u32;
    let ok = unsafe { GetExitCodeProcess(handle(h_process), &mut exit_code) };
    ok != 0 && exit_code == STILL_ACTIVE
}

/// True when the process is a 32-bit program under WOW64.
#[must_use]
pub fn process_is_wow64(h_process: u64) -> bool
{
    let mut wow64 = 0i32;
    let ok = unsafe { IsWow64Process(handle(h_process), &mut wow64) };
    ok != 0 && wow64 != 0
}

/// A translated OS debug event.
#[derive(Debug, Clone)]
pub struct OsDebugEvent
{
    pub process_id: u32,
    pub thread_id: u32,
    pub kind: OsDebugEventKind,
}

/// Kind-specific payload of a translated debug event.
#[derive(Debug, Clone)]
pub enum OsDebugEventKind
{
    Exception
    {
        record: ExceptionRecordData,
        first_chance: bool,
    },
    CreateProcess
    {
        h_file: u64,
        image_base: Address,
    },
    CreateThread
    {
        entry_point: Address,
    },
    ExitProcess
    {
        exit_code: u32,
    },
    ExitThread
    {
        exit_code: u32,
    },
    LoadDll
    {
        h_file: u64,
        base: Address,
    },
    UnloadDll
    {
        base: Address,
    },
    DebugString
    {
        address: Address,
        is_unicode: bool,
        length: u16,
    },
    Rip
    {
        error: u32,
        kind: u32,
    },
    Unknown(u32),
}

/// Block until the OS delivers the next debug event.
pub fn wait_for_debug_event() -> HindcastResult<OsDebugEvent>
{
    use windows_sys::Win32::System::Diagnostics::Debug::{
        CREATE_PROCESS_DEBUG_EVENT, CREATE_THREAD_DEBUG_EVENT, EXCEPTION_DEBUG_EVENT,
        EXIT_PROCESS_DEBUG_EVENT, EXIT_THREAD_DEBUG_EVENT, LOAD_DLL_DEBUG_EVENT,
        OUTPUT_DEBUG_STRING_EVENT, RIP_EVENT, UNLOAD_DLL_DEBUG_EVENT,
    };

    let mut event: DEBUG_EVENT = unsafe { core::mem::zeroed() };
    let ok = unsafe { WaitForDebugEventEx(&mut event, INFINITE) };
    if ok == 0 {
        return Err(HindcastError::AttachRefused(unsafe { GetLastError() }));
    }

    let kind = unsafe {
        match event.dwDebugEventCode {
            EXCEPTION_DEBUG_EVENT => {
                let info = &event.u.Exception;
                let record = &info.ExceptionRecord;
                let count = (record.NumberParameters as usize).min(record.ExceptionInformation.len());
                OsDebugEventKind::Exception {
                    record: ExceptionRecordData {
                        code: record.ExceptionCode as u32,
                        address: Address::new(record.ExceptionAddress as u64),
                        parameters: record.ExceptionInformation[..count]
                            .iter()
                            .map(|&word| word as u64)
                            .collect(),
                    },
                    first_chance: info.dwFirstChance != 0,
                }
            }
            CREATE_PROCESS_DEBUG_EVENT => {
                let info = &event.u.CreateProcessInfo;
                OsDebugEventKind::CreateProcess {
                    h_file: handle_word(info.hFile),
                    image_base: Address::new(info.lpBaseOfImage as u64),
                }
            }
            CREATE_THREAD_DEBUG_EVENT => {
                let info = &event.u.CreateThread;
                OsDebugEventKind::CreateThread {
                    entry_point: Address::new(info.lpStartAddress.map_or(0, |f| f as usize as u64)),
                }
            }
            EXIT_PROCESS_DEBUG_EVENT => OsDebugEventKind::ExitProcess {
                exit_code: event.u.ExitProcess.dwExitCode,
            },
            EXIT_THREAD_DEBUG_EVENT => OsDebugEventKind::ExitThread {
                exit_code: event.u.ExitThread.dwExitCode,
            },
            LOAD_DLL_DEBUG_EVENT => {
                let info = &event.u.LoadDll;
                OsDebugEventKind::LoadDll {
                    h_file: handle_word(info.hFile),
                    base: Address::new(info.lpBaseOfDll as u64),
                }
            }
            UNLOAD_DLL_DEBUG_EVENT => OsDebugEventKind::UnloadDll {
                base: Address::new(event.u.UnloadDll.lpBaseOfDll as u64),
            },
            OUTPUT_DEBUG_STRING_EVENT => {
                let info = &event.u.DebugString;
                OsDebugEventKind::DebugString {
                    address: Address::new(info.lpDebugStringData as u64),
                    is_unicode: info.fUnicode != 0,
                    length: info.nDebugStringLength,
                }
            }
            RIP_EVENT => OsDebugEventKind::Rip {
                error: event.u.RipInfo.dwError,
                kind: event.u.RipInfo.dwType,
            },
            other => OsDebugEventKind::Unknown(other),
        }
    };

    Ok(OsDebugEvent {
        process_id: event.dwProcessId,
        thread_id: event.dwThreadId,
        kind,
    })
}

/// Let the target continue with the given continue-status.
pub fn continue_debug_event(process_id: u32, thread_id: u32, handled: bool)
{
    /// `DBG_CONTINUE`.
    const DBG_CONTINUE: u32 = 0x0001_0002;
    /// `DBG_EXCEPTION_NOT_HANDLED`.
    const DBG_EXCEPTION_NOT_HANDLED: u32 = 0x8001_0001;

    let status = if handled { DBG_CONTINUE } else { DBG_EXCEPTION_NOT_HANDLED };
    unsafe {
        ContinueDebugEvent(process_id, thread_id, status);
    }
}

/// `CONTEXT` with the 16-byte alignment `GetThreadContext` requires.
#[repr(align(16))]
struct AlignedContext
{
    context: CONTEXT,
}

/// Fetch the register file of a live thread, width per the target's mode.
pub fn capture_registers(h_process: u64, h_thread: u64) -> HindcastResult<RegisterFile>
{
    if process_is_wow64(h_process) {
        let mut context: WOW64_CONTEXT = unsafe { core::mem::zeroed() };
        context.ContextFlags = WOW64_CONTEXT_ALL;
        let ok = unsafe { Wow64GetThreadContext(handle(h_thread), &mut context) };
        if ok == 0 {
            return Err(HindcastError::RemoteRead(unsafe { GetLastError() }));
        }
        Ok(RegisterFile::Wow32(wow64_registers(&context)))
    } else {
        let mut aligned = AlignedContext {
            context: unsafe { core::mem::zeroed() },
        };
        aligned.context.ContextFlags = CONTEXT_ALL_AMD64;
        let ok = unsafe { GetThreadContext(handle(h_thread), &mut aligned.context) };
        if ok == 0 {
            return Err(HindcastError::RemoteRead(unsafe { GetLastError() }));
        }
        Ok(RegisterFile::Native64(x64_registers(&aligned.context)))
    }
}

/// Copy the architectural registers out of a native `CONTEXT`.
pub(crate) fn x64_registers(context: &CONTEXT) -> X64RegisterFile
{
    X64RegisterFile {
        rip: context.Rip,
        rsp: context.Rsp,
        rbp: context.Rbp,
        rax: context.Rax,
        rbx: context.Rbx,
        rcx: context.Rcx,
        rdx: context.Rdx,
        rsi: context.Rsi,
        rdi: context.Rdi,
        r8: context.R8,
        r9: context.R9,
        r10: context.R10,
        r11: context.R11,
        r12: context.R12,
        r13: context.R13,
        r14: context.R14,
        r15: context.R15,
        rflags: u64::from(context.EFlags),
    }
}

/// Copy the architectural registers out of a `WOW64_CONTEXT`.
pub(crate) fn wow64_registers(context: &WOW64_CONTEXT) -> Wow64RegisterFile
{
    Wow64RegisterFile {
        eip: context.Eip,
        esp: context.Esp,
        ebp: context.Ebp,
        eax: context.Eax,
        ebx: context.Ebx,
        ecx: context.Ecx,
        edx: context.Edx,
        esi: context.Esi,
        edi: context.Edi,
        eflags: context.EFlags,
    }
}

/// Resolve the filesystem path behind a file handle delivered with a
/// create-process or load-dll event.
#[must_use]
pub fn path_from_file_handle(h_file: u64) -> Option<String>
{
    if h_file == 0 {
        return None;
    }

    let mut buffer = vec![0u16; 1024];
    let length = unsafe {
        GetFinalPathNameByHandleW(handle(h_file), buffer.as_mut_ptr(), buffer.len() as u32, 0)
    };
    if length == 0 || length as usize >= buffer.len() {
        return None;
    }
    buffer.truncate(length as usize);

    let path = String::from_utf16_lossy(&buffer);
    // GetFinalPathNameByHandleW yields the \\?\ form.
    Some(path.strip_prefix("\\\\?\\").map(str::to_string).unwrap_or(path))
}

/// A module enumerated out of a live process.
#[derive(Debug, Clone)]
pub struct EnumeratedModule
{
    pub base: Address,
    pub size: u64,
    pub path: String,
}

/// Enumerate the currently mapped modules of a process.
///
/// Postmortem attach uses this to bootstrap the module registry, since the
/// load-dll events a live attach would have produced never happened.
#[must_use]
pub fn enumerate_modules(h_process: u64) -> Vec<EnumeratedModule>
{
    let process = handle(h_process);
    let mut needed = 0u32;
    let mut probe: usize = 0;

    let ok = unsafe {
        K32EnumProcessModulesEx(
            process,
            &mut probe as *mut usize as *mut _,
            core::mem::size_of::<usize>() as u32,
            &mut needed,
            LIST_MODULES_ALL,
        )
    };
    if ok == 0 || needed == 0 {
        return Vec::new();
    }

    let count = needed as usize / core::mem::size_of::<usize>();
    let mut handles: Vec<usize> = vec![0; count];
    let ok = unsafe {
        K32EnumProcessModulesEx(
            process,
            handles.as_mut_ptr() as *mut _,
            needed,
            &mut needed,
            LIST_MODULES_ALL,
        )
    };
    if ok == 0 {
        return Vec::new();
    }

    let mut modules = Vec::with_capacity(count);
    for &module in &handles {
        let mut name = vec![0u16; 1024];
        let length = unsafe {
            K32GetModuleFileNameExW(process, module as _, name.as_mut_ptr(), name.len() as u32)
        };
        if length == 0 {
            continue;
        }
        name.truncate(length as usize);

        let mut info: MODULEINFO = unsafe { core::mem::zeroed() };
        let ok = unsafe {
            K32GetModuleInformation(process, module as _, &mut info, core::mem::size_of::<MODULEINFO>() as u32)
        };
        if ok == 0 {
            continue;
        }

        modules.push(EnumeratedModule {
            base: Address::new(info.lpBaseOfDll as u64),
            size: u64::from(info.SizeOfImage),
            path: String::from_utf16_lossy(&name),
        });
    }

    modules
}

/// Path of the main module of a process.
#[must_use]
pub fn main_module_path(h_process: u64) -> Option<String>
{
    let mut name = vec![0u16; 1024];
    let length = unsafe {
        K32GetModuleFileNameExW(
            handle(h_process),
            core::ptr::null_mut(),
            name.as_mut_ptr(),
            name.len() as u32,
        )
    };
    if length == 0 {
        return None;
    }
    name.truncate(length as usize);
    Some(String::from_utf16_lossy(&name))
}

/// Resolve an OS error code to its system message, trimmed.
#[must_use]
pub fn error_message(code: u32) -> Option<String>
{
    let mut buffer = vec![0u16; 1024];
    let length = unsafe {
        FormatMessageW(
            FORMAT_MESSAGE_FROM_SYSTEM | FORMAT_MESSAGE_IGNORE_INSERTS,
            core::ptr::null(),
            code,
            0,
            buffer.as_mut_ptr(),
            buffer.len() as u32,
            core::ptr::null(),
        )
    };
    if length == 0 {
        return None;
    }
    buffer.truncate(length as usize);
    let message = String::from_utf16_lossy(&buffer).trim().to_string();
    (!message.is_empty()).then_some(message)
}
