//! Debug event model and the observer contract.
//!
//! The dispatcher (live), the journal reader (replay) and the postmortem
//! bridge all fan events out through [`EventObserver`]. Observers register
//! before attach; fan-out is in registration order; a slow observer blocks
//! the loop. Observers must not mutate shared state and must not panic.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::types::{
    Address, EventOrigin, ModuleRegistry, ProcessRef, StackTrace, ThreadSnapshot,
};

/// OS-compatible numeric tags for the nine debug event kinds. These values
/// are written verbatim into journal records.
pub mod kind
{
    pub const EXCEPTION: u32 = 1;
    pub const CREATE_THREAD: u32 = 2;
    pub const CREATE_PROCESS: u32 = 3;
    pub const EXIT_THREAD: u32 = 4;
    pub const EXIT_PROCESS: u32 = 5;
    pub const LOAD_DLL: u32 = 6;
    pub const UNLOAD_DLL: u32 = 7;
    pub const OUTPUT_DEBUG_STRING: u32 = 8;
    pub const RIP: u32 = 9;
}

/// NT status codes the core distinguishes.
pub mod code
{
    /// Native breakpoint trap.
    pub const EXCEPTION_BREAKPOINT: u32 = 0x8000_0003;
    /// Breakpoint trap raised by a WOW64 (32-bit) thread.
    pub const STATUS_WX86_BREAKPOINT: u32 = 0x4000_001F;
    /// Native single-step trap.
    pub const EXCEPTION_SINGLE_STEP: u32 = 0x8000_0004;
    /// Single-step trap raised by a WOW64 thread.
    pub const STATUS_WX86_SINGLE_STEP: u32 = 0x4000_001E;
    /// The MSVC++ EH throw code (`'msc' | 0xE0000000`).
    pub const EH_EXCEPTION: u32 = 0xE06D_7363;
    /// The SetThreadName convention exception.
    pub const EH_THREAD_NAME: u32 = 0x406D_1388;

    /// True for either width's breakpoint trap.
    #[must_use]
    pub const fn is_breakpoint(code: u32) -> bool
    {
        matches!(code, EXCEPTION_BREAKPOINT | STATUS_WX86_BREAKPOINT)
    }
}

/// RIP event severity values (`RIP_INFO::dwType`).
pub mod rip_type
{
    /// Invalid data was passed, the program will probably fail.
    pub const SLE_ERROR: u32 = 1;
    /// Invalid data was passed, the program might fail.
    pub const SLE_MINORERROR: u32 = 2;
    /// Potentially invalid data was passed, the program will not fail.
    pub const SLE_WARNING: u32 = 3;
}

/// Process-wide immutable table of well-known exception code names.
static EXCEPTION_NAMES: Lazy<HashMap<u32, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (0xC000_0005, "EXCEPTION_ACCESS_VIOLATION"),
        (0xC000_008C, "EXCEPTION_ARRAY_BOUNDS_EXCEEDED"),
        (0x8000_0003, "EXCEPTION_BREAKPOINT"),
        (0x8000_0002, "EXCEPTION_DATATYPE_MISALIGNMENT"),
        (0xC000_008D, "EXCEPTION_FLT_DENORMAL_OPERAND"),
        (0xC000_008E, "EXCEPTION_FLT_DIVIDE_BY_ZERO"),
        (0xC000_008F, "EXCEPTION_FLT_INEXACT_RESULT"),
        (0xC000_0090, "EXCEPTION_FLT_INVALID_OPERATION"),
        (0xC000_0091, "EXCEPTION_FLT_OVERFLOW"),
        (0xC000_0092, "EXCEPTION_FLT_STACK_CHECK"),
        (0xC000_0093, "EXCEPTION_FLT_UNDERFLOW"),
        (0xC000_001D, "EXCEPTION_ILLEGAL_INSTRUCTION"),
        (0xC000_0006, "EXCEPTION_IN_PAGE_ERROR"),
        (0xC000_0094, "EXCEPTION_INT_DIVIDE_BY_ZERO"),
        (0xC000_0095, "EXCEPTION_INT_OVERFLOW"),
        (0xC000_0026, "EXCEPTION_INVALID_DISPOSITION"),
        (0xC000_0025, "EXCEPTION_NONCONTINUABLE_EXCEPTION"),
        (0xC000_0096, "EXCEPTION_PRIV_INSTRUCTION"),
        (0x8000_0004, "EXCEPTION_SINGLE_STEP"),
        (0xC000_00FD, "EXCEPTION_STACK_OVERFLOW"),
        (0xC000_0008, "EXCEPTION_INVALID_HANDLE"),
        (code::STATUS_WX86_BREAKPOINT, "STATUS_WX86_BREAKPOINT"),
        (code::STATUS_WX86_SINGLE_STEP, "STATUS_WX86_SINGLE_STEP"),
        (code::EH_THREAD_NAME, "THREAD_NAMING"),
        (code::EH_EXCEPTION, "CXX_VCPP_EH_EXCEPTION"),
    ])
});

/// Look up the canonical name of a well-known exception code.
#[must_use]
pub fn exception_name(code: u32) -> Option<&'static str>
{
    EXCEPTION_NAMES.get(&code).copied()
}

/// Payload of an exception or breakpoint event.
#[derive(Debug, Clone)]
pub struct ExceptionEvent
{
    /// Address of the faulting instruction.
    pub address: Address,
    /// The NT status code.
    pub code: u32,
    /// True when the faulting thread runs under WOW64.
    pub wow64: bool,
    /// True when the code is a breakpoint subtype (native or WOW).
    pub is_breakpoint: bool,
    /// True on the OS's first notification, before user-mode handlers ran.
    pub first_chance: bool,
    /// Canonical name of the code, when it is a well-known one.
    pub name: Option<&'static str>,
}

/// Payload of the create-process event.
#[derive(Debug, Clone)]
pub struct CreateProcessEvent
{
    /// Base address the main module is mapped at.
    pub image_base: Address,
    /// Full path of the main module, resolved from the event's file handle.
    pub path: String,
}

/// Payload of the create-thread event.
#[derive(Debug, Clone, Copy)]
pub struct CreateThreadEvent
{
    /// Address of the thread entry point.
    pub entry_point: Address,
}

/// Payload of the load-dll event.
#[derive(Debug, Clone)]
pub struct DllLoadEvent
{
    /// Base address the image is mapped at.
    pub base: Address,
    /// Full path of the image.
    pub path: String,
    /// Stable load index assigned by the module registry.
    pub load_index: i64,
}

/// Payload of the unload-dll event.
///
/// At fan-out time the module is still present in the registry; it is
/// removed immediately after all observers have run.
#[derive(Debug, Clone)]
pub struct DllUnloadEvent
{
    /// Base address being unmapped.
    pub base: Address,
    /// Full path of the image (empty when the base was never seen loading).
    pub path: String,
    /// Stable load index, or -1 when unknown.
    pub load_index: i64,
}

/// A debug string read out of the target, already whitespace-trimmed.
///
/// The width distinguishes how the bytes were encoded in the target, which
/// the journal must preserve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugText
{
    /// 8-bit (ANSI or UTF-8) string.
    Ansi(String),
    /// UTF-16 string, already converted for display.
    Wide(String),
}

impl DebugText
{
    /// The text regardless of source width.
    #[must_use]
    pub fn text(&self) -> &str
    {
        match self {
            DebugText::Ansi(text) | DebugText::Wide(text) => text,
        }
    }

    /// True for the wide variant.
    #[must_use]
    pub fn is_wide(&self) -> bool
    {
        matches!(self, DebugText::Wide(_))
    }
}

/// Payload of the RIP (system error) event.
#[derive(Debug, Clone, Copy)]
pub struct RipEvent
{
    /// Severity, one of the [`rip_type`] values (0 when unset).
    pub kind: u32,
    /// The error code being reported.
    pub error: u32,
}

/// The observer contract: one method per event kind.
///
/// All methods default to no-ops so lightweight observers implement only
/// what they need. The full sinks (text emitter, journal writer) override
/// everything.
///
/// Exceptions raised inside an observer are undefined behavior; observers
/// are contracted not to panic.
#[allow(unused_variables)]
pub trait EventObserver
{
    /// The session is attached; `process` describes the target.
    fn on_initialization(&mut self, time: i64, process: &ProcessRef) {}

    /// A breakpoint trap, with the thread state and unwound stack.
    fn on_breakpoint(
        &mut self,
        time: i64,
        event: &ExceptionEvent,
        origin: &EventOrigin,
        snapshot: &ThreadSnapshot,
        trace: &StackTrace,
        modules: &ModuleRegistry,
    )
    {
    }

    /// A non-breakpoint exception, with the thread state, unwound stack and
    /// optional language-runtime type information.
    fn on_exception(
        &mut self,
        time: i64,
        event: &ExceptionEvent,
        origin: &EventOrigin,
        snapshot: &ThreadSnapshot,
        trace: &StackTrace,
        modules: &ModuleRegistry,
        rtti: Option<&crate::rtti::RttiInfo>,
    )
    {
    }

    /// The target process came up; its main module is already registered.
    fn on_create_process(
        &mut self,
        time: i64,
        event: &CreateProcessEvent,
        origin: &EventOrigin,
        modules: &ModuleRegistry,
    )
    {
    }

    /// A thread was created in the target.
    fn on_create_thread(
        &mut self,
        time: i64,
        event: &CreateThreadEvent,
        origin: &EventOrigin,
        modules: &ModuleRegistry,
    )
    {
    }

    /// The target process exited. This is the final debug event.
    fn on_exit_process(&mut self, time: i64, exit_code: u32, origin: &EventOrigin, modules: &ModuleRegistry) {}

    /// A thread in the target exited.
    fn on_exit_thread(&mut self, time: i64, exit_code: u32, origin: &EventOrigin, modules: &ModuleRegistry) {}

    /// An image was mapped into the target.
    fn on_dll_load(&mut self, time: i64, event: &DllLoadEvent, origin: &EventOrigin, modules: &ModuleRegistry) {}

    /// An image is being unmapped. The registry still contains it.
    fn on_dll_unload(&mut self, time: i64, event: &DllUnloadEvent, origin: &EventOrigin, modules: &ModuleRegistry) {}

    /// The target sent a string to its debugger.
    fn on_debug_string(&mut self, time: i64, text: &DebugText, origin: &EventOrigin) {}

    /// A RIP system error, with a resolved message when one is available.
    fn on_rip(&mut self, time: i64, event: &RipEvent, message: Option<&str>, origin: &EventOrigin) {}

    /// The session is over; no further events will arrive.
    ///
    /// The journal writer seals its header here.
    fn on_journal_complete(&mut self, time: i64, modules: &ModuleRegistry) {}
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_exception_name_lookup()
    {
        assert_eq!(exception_name(0xC000_0005), Some("EXCEPTION_ACCESS_VIOLATION"));
        assert_eq!(exception_name(code::EH_EXCEPTION), Some("CXX_VCPP_EH_EXCEPTION"));
        assert_eq!(exception_name(0x1234_5678), None);
    }

    #[test]
    fn test_breakpoint_subtypes()
    {
        assert!(code::is_breakpoint(code::EXCEPTION_BREAKPOINT));
        assert!(code::is_breakpoint(code::STATUS_WX86_BREAKPOINT));
        assert!(!code::is_breakpoint(code::EXCEPTION_SINGLE_STEP));
        assert!(!code::is_breakpoint(0xC000_0005));
    }
}
