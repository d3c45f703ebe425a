//! The binary journal: a length-prefixed, checksummed record/replay format.
//!
//! [`writer::JournalWriter`] is an observer that serializes a live session;
//! [`reader::JournalReader`] decodes a recorded file and re-emits its events
//! through the same observer interface, so replay is indistinguishable from
//! a live session to any sink.

pub mod format;
pub mod reader;
pub mod writer;

pub use format::FileHeader;
pub use reader::{JournalReader, ReplayOptions, FILTER_NAMES};
pub use writer::JournalWriter;
