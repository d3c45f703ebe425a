//! # Error Types
//!
//! General error handling for the debugger core.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.

use thiserror::Error;

/// Main error type for debugger operations
///
/// Each variant corresponds to a failure class with a fixed recovery
/// disposition:
///
/// 1. **Attach-time errors** are fatal and reported to the user:
///    `TargetNotRunning`, `AttachRefused`, `LaunchFailed`.
/// 2. **Target-memory errors** (`RemoteRead`) are recovered locally: the
///    failing component returns `None`/empty and event dispatch continues.
/// 3. **Journal errors** are fatal to the sink (writer) or to replay
///    (reader): `JournalCorrupt`, `VersionMismatch`, `UnknownEventKind`.
/// 4. **Symbolization and disassembly errors** are local: the affected frame
///    simply lacks the enriched fields.
/// 5. **`UserAbort`** propagates out of the break prompt and terminates the
///    session; in live mode the target is killed on the way out.
#[derive(Error, Debug)]
pub enum HindcastError
{
    /// The target process exited before the debugger could attach to it.
    ///
    /// This happens when:
    /// - The launch succeeded but the process died during early startup
    /// - A postmortem handoff named a PID that no longer exists
    #[error("target process is not running")]
    TargetNotRunning,

    /// The OS refused the attach request.
    ///
    /// The payload is the OS error code. Typical causes are insufficient
    /// privileges or a target that is already being debugged.
    #[error("attach refused by the operating system (code {0})")]
    AttachRefused(u32),

    /// Failed to launch the target process suspended.
    #[error("failed to launch target: {0}")]
    LaunchFailed(String),

    /// A read from the target's address space failed.
    ///
    /// The payload is the OS error code. Components that hit this during
    /// event enrichment leave the enriched field absent and carry on;
    /// observers are contracted to tolerate absent fields.
    #[error("remote memory read failed (code {0})")]
    RemoteRead(u32),

    /// The journal stream is structurally damaged.
    ///
    /// Raised by the reader on a bad magic, a bad frame signature, a short
    /// file, or a CRC mismatch. Fatal to replay.
    #[error("journal corrupt: {0}")]
    JournalCorrupt(String),

    /// The journal was produced by an incompatible build.
    ///
    /// Only the upper 16 bits of the version word (major and minor) are
    /// compared; revision and build are ignored for compatibility.
    #[error(
        "journal version mismatch: file has {}.{}, this build requires {}.{}",
        .found >> 24, (.found >> 16) & 0xff, .required >> 24, (.required >> 16) & 0xff
    )]
    VersionMismatch
    {
        /// Version word stored in the journal header.
        found: u32,
        /// Version word of the running build.
        required: u32,
    },

    /// The journal contains an event record with an unrecognized kind tag.
    #[error("unknown event kind in journal: {0}")]
    UnknownEventKind(u32),

    /// The symbol engine failed to initialize or answer a query.
    ///
    /// Local recovery: the affected frame lacks symbol/line information.
    #[error("symbol engine failure: {0}")]
    SymbolEngine(String),

    /// The instruction decoder rejected the byte stream.
    ///
    /// Local recovery: the instruction list for the frame is truncated.
    #[error("disassembly failed: {0}")]
    Disassemble(String),

    /// The user chose `a`bort at the break prompt.
    #[error("aborted by user")]
    UserAbort,

    /// I/O error (journal files, text sinks, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, HindcastError>`
///
/// ```rust
/// use hindcast_core::error::HindcastResult;
/// fn foo() -> HindcastResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type HindcastResult<T> = std::result::Result<T, HindcastError>;
