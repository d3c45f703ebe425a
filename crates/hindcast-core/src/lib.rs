//! # hindcast-core
//!
//! Fault-capture debugging for Win32 targets.
//!
//! This crate is not a stepping debugger: it captures the forensic state of
//! a process at the moment of a fault and renders it, live or later. Three
//! entry points share one observer pipeline:
//!
//! - **launch**: start a target suspended, attach, and record every debug
//!   event until it exits ([`debugger::EventDispatcher`]);
//! - **replay**: decode a previously recorded binary journal and re-emit
//!   its events ([`journal::JournalReader`]);
//! - **postmortem**: ingest an OS just-in-time handoff from an
//!   already-faulted process ([`postmortem`]).
//!
//! Exceptions are enriched with a thread snapshot, an unwound (and
//! optionally disassembled) stack trace, and, for MSVC++ EH throws, the
//! catchable-type chain and `what()` string recovered from the target's
//! memory.
//!
//! ## Platform support
//!
//! The live paths use the Win32 debug API and DbgHelp, and only exist on
//! Windows. The journal, module registry, recursion folding, disassembly
//! and text emission are pure and build everywhere, which is also how the
//! test suite exercises them.
//!
//! ## Why unsafe code is needed
//!
//! Debugging another process means calling OS APIs that read foreign
//! address spaces and thread state; those calls are inherently `unsafe`.
//! All of them live in the `platform` module behind safe wrappers.

#![allow(unsafe_code)]

pub mod checksum;
pub mod debugger;
pub mod disasm;
pub mod emit;
pub mod error;
pub mod events;
pub mod journal;
pub mod platform;
pub mod postmortem;
pub mod prompt;
pub mod rtti;
pub mod types;
pub mod unwind;
pub mod version;

pub use error::{HindcastError, HindcastResult};

// Re-export commonly used types
pub use debugger::{DebugOptions, DispatcherState};
#[cfg(windows)]
pub use debugger::EventDispatcher;
pub use emit::TextEmitter;
pub use events::EventObserver;
pub use journal::{JournalReader, JournalWriter, ReplayOptions};
pub use rtti::RttiInfo;
pub use types::{Address, Module, ModuleRegistry, ProcessRef, StackTrace, ThreadSnapshot};
pub use unwind::StackUnwinder;
