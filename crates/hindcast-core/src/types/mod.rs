//! Core data model: addresses, modules, processes, snapshots, stack traces.

pub mod address;
pub mod memory;
pub mod module;
pub mod process;
pub mod registers;
pub mod snapshot;
pub mod stack;

pub use address::Address;
pub use memory::TargetMemory;
pub use module::{Module, ModuleRegistry};
pub use process::{EventOrigin, ExceptionRecordData, ProcessRef};
pub use registers::{Wow64RegisterFile, X64RegisterFile};
pub use snapshot::{RegisterFile, ThreadSnapshot};
pub use stack::{DecodedInstruction, StackFrame, StackTrace};
