//! Suspended process launch.

use windows_sys::Win32::Foundation::GetLastError;
use windows_sys::Win32::System::Threading::{
    CreateProcessW, CREATE_SUSPENDED, PROCESS_INFORMATION, STARTUPINFOW,
};

use crate::error::{HindcastError, HindcastResult};
use crate::types::ProcessRef;

use super::handle_word;

/// Start `path` suspended so the debugger can attach before the first
/// instruction of the target runs.
///
/// The returned [`ProcessRef`] owns the process and main-thread handles;
/// the caller attaches, resumes the main thread and enters the event loop.
pub fn start_suspended(path: &str, working_directory: &str, arguments: &[String]) -> HindcastResult<ProcessRef>
{
    // CreateProcessW wants one mutable command line: quoted image path
    // followed by the raw argument strings.
    let mut command_line = format!("\"{path}\"");
    for argument in arguments {
        command_line.push(' ');
        command_line.push_str(argument);
    }

    let mut wide_command: Vec<u16> = command_line.encode_utf16().chain(std::iter::once(0)).collect();
    let wide_path: Vec<u16> = path.encode_utf16().chain(std::iter::once(0)).collect();
    let wide_workdir: Option<Vec<u16>> = (!working_directory.is_empty())
        .then(|| working_directory.encode_utf16().chain(std::iter::once(0)).collect());

    let mut startup: STARTUPINFOW = unsafe { core::mem::zeroed() };
    startup.cb = core::mem::size_of::<STARTUPINFOW>() as u32;
    let mut info: PROCESS_INFORMATION = unsafe { core::mem::zeroed() };

    let ok = unsafe {
        CreateProcessW(
            wide_path.as_ptr(),
            wide_command.as_mut_ptr(),
            core::ptr::null(),
            core::ptr::null(),
            0,
            CREATE_SUSPENDED,
            core::ptr::null(),
            wide_workdir.as_ref().map_or(core::ptr::null(), |dir| dir.as_ptr()),
            &startup,
            &mut info,
        )
    };
    if ok == 0 {
        return Err(HindcastError::LaunchFailed(format!(
            "CreateProcess failed for {path} (code {})",
            unsafe { GetLastError() }
        )));
    }

    Ok(ProcessRef::from_raw(
        path.to_string(),
        working_directory.to_string(),
        arguments.to_vec(),
        info.dwProcessId,
        info.dwThreadId,
        handle_word(info.hProcess),
        handle_word(info.hThread),
    ))
}
