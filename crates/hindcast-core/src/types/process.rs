//! Target process identity and per-event thread identity.

use super::Address;

/// The debugged process: identity, launch metadata and long-lived handles.
///
/// A `ProcessRef` is created at attach (or synthesized by the journal reader
/// with null handles) and is exclusively owned by the event dispatcher for
/// its lifetime. The handles are released on drop. Once the dispatcher has
/// observed the target's exit-process event, no further reads go through
/// them.
#[derive(Debug)]
pub struct ProcessRef
{
    /// Full path of the target image.
    pub path: String,
    /// Working directory the target was started in (may be empty).
    pub working_directory: String,
    /// Program arguments (argv), excluding the image path.
    pub arguments: Vec<String>,
    /// Process identifier.
    pub process_id: u32,
    /// Main thread identifier.
    pub thread_id: u32,

    h_process: u64,
    h_thread: u64,
}

impl ProcessRef
{
    /// Build a `ProcessRef` around raw OS handle words.
    ///
    /// Ownership of the handles transfers to the new value; they are closed
    /// when it drops.
    #[must_use]
    pub fn from_raw(
        path: String,
        working_directory: String,
        arguments: Vec<String>,
        process_id: u32,
        thread_id: u32,
        h_process: u64,
        h_thread: u64,
    ) -> Self
    {
        Self {
            path,
            working_directory,
            arguments,
            process_id,
            thread_id,
            h_process,
            h_thread,
        }
    }

    /// Build a handle-less `ProcessRef`, as the journal reader does when it
    /// fabricates the initialization event from the file header.
    #[must_use]
    pub fn synthetic(
        path: String,
        working_directory: String,
        arguments: Vec<String>,
        process_id: u32,
        thread_id: u32,
    ) -> Self
    {
        Self::from_raw(path, working_directory, arguments, process_id, thread_id, 0, 0)
    }

    /// Raw process handle word (0 when synthetic).
    #[must_use]
    pub fn process_handle(&self) -> u64
    {
        self.h_process
    }

    /// Raw main-thread handle word (0 when synthetic).
    #[must_use]
    pub fn thread_handle(&self) -> u64
    {
        self.h_thread
    }

    /// Replace the main-thread identity.
    ///
    /// Postmortem attach learns the faulting thread id only after reading
    /// the JIT info out of the target, so it patches it in here.
    pub fn set_thread(&mut self, thread_id: u32, h_thread: u64)
    {
        self.thread_id = thread_id;
        self.h_thread = h_thread;
    }

    /// True when the process is still alive.
    #[cfg(windows)]
    #[must_use]
    pub fn is_running(&self) -> bool
    {
        crate::platform::windows::process_is_running(self.h_process)
    }

    /// True when the target is a 32-bit program running under WOW64.
    #[cfg(windows)]
    #[must_use]
    pub fn is_wow64(&self) -> bool
    {
        crate::platform::windows::process_is_wow64(self.h_process)
    }

    /// Resume the main thread (used after a suspended launch).
    #[cfg(windows)]
    pub fn resume(&self) -> crate::error::HindcastResult<()>
    {
        crate::platform::windows::resume_thread(self.h_thread)
    }

    /// Forcefully terminate the target with `exit_code`.
    ///
    /// Postmortem attach uses this to resolve the fault before signaling the
    /// OS handoff event.
    #[cfg(windows)]
    pub fn kill(&self, exit_code: u32)
    {
        crate::platform::windows::terminate_process(self.h_process, exit_code);
    }

    /// A [`crate::types::TargetMemory`] view over this process.
    #[cfg(windows)]
    #[must_use]
    pub fn memory(&self) -> crate::platform::windows::ProcessMemory
    {
        crate::platform::windows::ProcessMemory::new(self.h_process)
    }
}

#[cfg(windows)]
impl Drop for ProcessRef
{
    fn drop(&mut self)
    {
        crate::platform::windows::close_handle(self.h_process);
        crate::platform::windows::close_handle(self.h_thread);
    }
}

/// Identity of the thread that raised one debug event.
///
/// Carries the per-event handle words alongside the ids, matching the
/// journal's packed form. Handles are opaque and are zeroed when a record is
/// read back from disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventOrigin
{
    /// Raw process handle word (0 on replay).
    pub h_process: u64,
    /// Raw thread handle word (0 on replay).
    pub h_thread: u64,
    /// Process identifier.
    pub process_id: u32,
    /// Thread identifier.
    pub thread_id: u32,
}

impl EventOrigin
{
    /// Origin with ids only, as replay produces.
    #[must_use]
    pub fn from_ids(process_id: u32, thread_id: u32) -> Self
    {
        Self {
            h_process: 0,
            h_thread: 0,
            process_id,
            thread_id,
        }
    }
}

/// Record of where in the target an exception was raised.
///
/// A normalized view over the OS exception record: enough to journal the
/// event and to hand the parameter words to the RTTI decoder.
#[derive(Debug, Clone, Default)]
pub struct ExceptionRecordData
{
    /// The NT status code of the exception.
    pub code: u32,
    /// Address of the faulting instruction.
    pub address: Address,
    /// The exception parameter words (`ExceptionInformation`), zero-extended
    /// to 64 bits for WOW64 targets.
    pub parameters: Vec<u64>,
}
