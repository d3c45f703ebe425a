//! The event dispatcher: attach lifecycle, the debug event loop, and
//! observer fan-out.
//!
//! The dispatcher owns the target's [`crate::types::ProcessRef`] for its
//! lifetime and is the only component that mutates the module registry;
//! observers receive a read-only view for the duration of each callback.
//! The whole core runs on one thread; the only waiting primitive is the
//! blocking OS call that delivers the next debug event.

/// Run configuration carried by the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct DebugOptions
{
    /// Kill the target when the debugger detaches.
    pub kill_on_detach: bool,
    /// Stop at breakpoints with the break prompt.
    pub break_on_breakpoint: bool,
    /// Stop at exceptions with the break prompt.
    pub break_on_exception: bool,
    /// Restrict `break_on_exception` to first-chance exceptions.
    pub first_chance_only: bool,
    /// Recursion folding policy (0 disables folding).
    pub max_recursion: u64,
    /// Disassembly breadth policy (0 disables disassembly).
    pub max_instructions: u64,
    /// Extra directories for the symbol engine's search path.
    pub symbol_search_paths: Vec<String>,
    /// Also search next to the target's own image.
    pub symbol_search_self: bool,
}

/// Lifecycle of a dispatch session.
///
/// `attach` moves `Unattached -> Attached`; the first tick moves to
/// `Running`; observing the target's exit-process event moves to
/// `Draining`; the final fan-out ends at `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState
{
    Unattached,
    Attached,
    Running,
    Draining,
    Done,
}

/// Consumes OS debug events, enriches them and fans them out.
#[cfg(windows)]
pub struct EventDispatcher
{
    process: crate::types::ProcessRef,
    options: DebugOptions,
    observers: Vec<Box<dyn crate::events::EventObserver>>,
    modules: crate::types::ModuleRegistry,
    state: DispatcherState,
    jit: Option<crate::postmortem::JitSession>,
    live_attached: bool,
}

#[cfg(windows)]
mod live
{
    use super::{DebugOptions, DispatcherState, EventDispatcher};

    use crate::error::{HindcastError, HindcastResult};
    use crate::events::{
        code, exception_name, CreateProcessEvent, CreateThreadEvent, DebugText, DllLoadEvent,
        DllUnloadEvent, EventObserver, ExceptionEvent, RipEvent,
    };
    use crate::platform::windows::{self as os, dbghelp, OsDebugEventKind, ProcessMemory};
    use crate::postmortem::{JitHandoff, JitSession};
    use crate::prompt::break_prompt;
    use crate::rtti::RttiDecoder;
    use crate::types::{
        Address, EventOrigin, ExceptionRecordData, ModuleRegistry, ProcessRef, ThreadSnapshot,
    };
    use crate::unwind::StackUnwinder;

    impl EventDispatcher
    {
        /// Create a dispatcher for a live target.
        ///
        /// The target must be running (typically freshly launched in the
        /// suspended state).
        pub fn new(process: ProcessRef, options: DebugOptions) -> HindcastResult<Self>
        {
            if !process.is_running() {
                return Err(HindcastError::TargetNotRunning);
            }

            Ok(Self {
                process,
                options,
                observers: Vec::new(),
                modules: ModuleRegistry::new(),
                state: DispatcherState::Unattached,
                jit: None,
                live_attached: false,
            })
        }

        /// Create a dispatcher for a postmortem (JIT) handoff.
        ///
        /// Reads the JIT info out of the target and learns the faulting
        /// thread from it.
        pub fn new_postmortem(
            mut process: ProcessRef,
            options: DebugOptions,
            handoff: JitHandoff,
        ) -> HindcastResult<Self>
        {
            if !process.is_running() {
                return Err(HindcastError::TargetNotRunning);
            }

            let session = JitSession::read(&process, handoff)?;
            let h_thread = os::open_thread(session.info.thread_id)?;
            process.set_thread(session.info.thread_id, h_thread);

            Ok(Self {
                process,
                options,
                observers: Vec::new(),
                modules: ModuleRegistry::new(),
                state: DispatcherState::Unattached,
                jit: Some(session),
                live_attached: false,
            })
        }

        /// Register an observer. Fan-out is in registration order; adding
        /// observers after attach is not supported.
        pub fn add_observer(&mut self, observer: Box<dyn EventObserver>)
        {
            self.observers.push(observer);
        }

        /// The current lifecycle state.
        #[must_use]
        pub fn state(&self) -> DispatcherState
        {
            self.state
        }

        /// Attach to the target.
        ///
        /// Live mode attaches through the OS debugger port and notifies
        /// observers of initialization. Postmortem mode is one-shot: it
        /// replays the fault into the observer pipeline, signals the OS
        /// handoff event and terminates the target.
        pub fn attach(&mut self) -> HindcastResult<()>
        {
            let time = chrono::Utc::now().timestamp();

            if self.jit.is_some() {
                return self.attach_postmortem(time);
            }

            os::debug_attach(self.process.process_id)?;
            self.live_attached = true;
            if !self.options.kill_on_detach {
                os::set_kill_on_exit(false);
            }

            let process = &self.process;
            for observer in &mut self.observers {
                observer.on_initialization(time, process);
            }

            self.state = DispatcherState::Attached;
            Ok(())
        }

        /// Resume the target's main thread after a suspended launch.
        pub fn resume_target(&self) -> HindcastResult<()>
        {
            self.process.resume()
        }

        /// Run the event loop until the target exits.
        pub fn run(&mut self) -> HindcastResult<()>
        {
            while self.tick()? {}

            let time = chrono::Utc::now().timestamp();
            let modules = &self.modules;
            for observer in &mut self.observers {
                observer.on_journal_complete(time, modules);
            }
            self.state = DispatcherState::Done;
            Ok(())
        }

        /// Process one debug event. Returns false once the session drains.
        pub fn tick(&mut self) -> HindcastResult<bool>
        {
            if self.state == DispatcherState::Attached {
                self.state = DispatcherState::Running;
            }

            let event = os::wait_for_debug_event()?;
            let time = chrono::Utc::now().timestamp();

            // The debugger never swallows exceptions, even ones it could
            // not enrich.
            let is_exception = matches!(event.kind, OsDebugEventKind::Exception { .. });

            // Per-event handles; the event may refer to a process that is
            // already gone, which is not fatal to the session.
            let h_process = match os::open_process(event.process_id) {
                Ok(handle) => handle,
                Err(error) => {
                    tracing::error!("cannot open process 0x{:x}: {error}", event.process_id);
                    os::continue_debug_event(event.process_id, event.thread_id, !is_exception);
                    return Ok(true);
                }
            };
            let h_thread = match os::open_thread(event.thread_id) {
                Ok(handle) => handle,
                Err(error) => {
                    tracing::error!("cannot open thread 0x{:x}: {error}", event.thread_id);
                    os::close_handle(h_process);
                    os::continue_debug_event(event.process_id, event.thread_id, !is_exception);
                    return Ok(true);
                }
            };

            let origin = EventOrigin {
                h_process,
                h_thread,
                process_id: event.process_id,
                thread_id: event.thread_id,
            };

            let handled = !is_exception;
            let result = match event.kind {
                OsDebugEventKind::Exception { record, first_chance } => {
                    self.handle_exception(time, &origin, record, first_chance)
                }
                OsDebugEventKind::CreateProcess { h_file, image_base } => {
                    self.handle_create_process(time, &origin, h_file, image_base)
                }
                OsDebugEventKind::CreateThread { entry_point } => {
                    self.handle_create_thread(time, &origin, entry_point)
                }
                OsDebugEventKind::ExitProcess { exit_code } => {
                    self.state = DispatcherState::Draining;
                    self.handle_exit(time, &origin, exit_code, true)
                }
                OsDebugEventKind::ExitThread { exit_code } => self.handle_exit(time, &origin, exit_code, false),
                OsDebugEventKind::LoadDll { h_file, base } => self.handle_load_dll(time, &origin, h_file, base),
                OsDebugEventKind::UnloadDll { base } => self.handle_unload_dll(time, &origin, base),
                OsDebugEventKind::DebugString { address, is_unicode, length } => {
                    self.handle_debug_string(time, &origin, address, is_unicode, length)
                }
                OsDebugEventKind::Rip { error, kind } => self.handle_rip(time, &origin, error, kind),
                OsDebugEventKind::Unknown(code) => {
                    tracing::debug!("unknown debug event code {code}");
                    Ok(())
                }
            };

            os::close_handle(h_thread);
            os::close_handle(h_process);
            os::continue_debug_event(event.process_id, event.thread_id, handled);

            match result {
                Err(HindcastError::UserAbort) => {
                    // Abort in live mode takes the target down with it.
                    os::set_kill_on_exit(true);
                    Err(HindcastError::UserAbort)
                }
                Err(other) => Err(other),
                Ok(()) => Ok(self.state != DispatcherState::Draining),
            }
        }

        /// The `;`-joined symbol search path for one unwind.
        fn symbol_search_path(&self) -> Option<String>
        {
            let mut paths = self.options.symbol_search_paths.clone();
            if self.options.symbol_search_self {
                if let Some(image) = os::main_module_path(self.process.process_handle()) {
                    let directory = std::path::Path::new(&image)
                        .parent()
                        .map_or(image.clone(), |parent| parent.to_string_lossy().into_owned());
                    paths.push(directory);
                }
            }
            (!paths.is_empty()).then(|| paths.join(";"))
        }

        fn unwinder(&self) -> StackUnwinder
        {
            StackUnwinder::new(self.options.max_recursion, self.options.max_instructions)
                .with_symbol_search_path(self.symbol_search_path())
        }

        fn handle_exception(
            &mut self,
            time: i64,
            origin: &EventOrigin,
            record: ExceptionRecordData,
            first_chance: bool,
        ) -> HindcastResult<()>
        {
            let snapshot = ThreadSnapshot::capture(origin.h_process, origin.h_thread)?;
            let trace = self.unwinder().capture(&snapshot, &self.modules);

            let event = ExceptionEvent {
                address: record.address,
                code: record.code,
                wow64: !snapshot.is_native_64(),
                is_breakpoint: code::is_breakpoint(record.code),
                first_chance,
                name: exception_name(record.code),
            };

            if event.is_breakpoint {
                let modules = &self.modules;
                for observer in &mut self.observers {
                    observer.on_breakpoint(time, &event, origin, &snapshot, &trace, modules);
                }
                if self.options.break_on_breakpoint {
                    break_prompt()?;
                }
                return Ok(());
            }

            // MSVC++ EH throws carry recoverable type information.
            let memory = ProcessMemory::new(self.process.process_handle());
            let demangle = dbghelp::undecorate_type_name;
            let rtti = RttiDecoder::new(&memory, &self.modules, &demangle)
                .decode(&record, snapshot.is_native_64());

            let modules = &self.modules;
            for observer in &mut self.observers {
                observer.on_exception(time, &event, origin, &snapshot, &trace, modules, rtti.as_ref());
            }

            if self.options.break_on_exception && (!self.options.first_chance_only || first_chance) {
                break_prompt()?;
            }
            Ok(())
        }

        fn handle_create_process(
            &mut self,
            time: i64,
            origin: &EventOrigin,
            h_file: u64,
            image_base: Address,
        ) -> HindcastResult<()>
        {
            let path = os::path_from_file_handle(h_file).unwrap_or_default();
            os::close_handle(h_file);

            let memory = ProcessMemory::new(origin.h_process);
            self.modules.on_load_probed(&path, image_base, &memory);

            let event = CreateProcessEvent { image_base, path };
            let modules = &self.modules;
            for observer in &mut self.observers {
                observer.on_create_process(time, &event, origin, modules);
            }
            Ok(())
        }

        fn handle_create_thread(&mut self, time: i64, origin: &EventOrigin, entry_point: Address) -> HindcastResult<()>
        {
            let event = CreateThreadEvent { entry_point };
            let modules = &self.modules;
            for observer in &mut self.observers {
                observer.on_create_thread(time, &event, origin, modules);
            }
            Ok(())
        }

        fn handle_exit(&mut self, time: i64, origin: &EventOrigin, exit_code: u32, is_process: bool) -> HindcastResult<()>
        {
            let modules = &self.modules;
            for observer in &mut self.observers {
                if is_process {
                    observer.on_exit_process(time, exit_code, origin, modules);
                } else {
                    observer.on_exit_thread(time, exit_code, origin, modules);
                }
            }
            Ok(())
        }

        fn handle_load_dll(&mut self, time: i64, origin: &EventOrigin, h_file: u64, base: Address) -> HindcastResult<()>
        {
            let path = os::path_from_file_handle(h_file).unwrap_or_default();
            os::close_handle(h_file);

            let memory = ProcessMemory::new(origin.h_process);
            let load_index = self.modules.on_load_probed(&path, base, &memory) as i64;

            let event = DllLoadEvent { base, path, load_index };
            let modules = &self.modules;
            for observer in &mut self.observers {
                observer.on_dll_load(time, &event, origin, modules);
            }
            Ok(())
        }

        fn handle_unload_dll(&mut self, time: i64, origin: &EventOrigin, base: Address) -> HindcastResult<()>
        {
            // Fan out before removal so observers can still resolve the path.
            let path = self.modules.path_of(base).unwrap_or("").to_string();
            let event = DllUnloadEvent {
                base,
                load_index: self.modules.index_of(&path).map_or(-1, |index| index as i64),
                path,
            };

            let modules = &self.modules;
            for observer in &mut self.observers {
                observer.on_dll_unload(time, &event, origin, modules);
            }

            self.modules.on_unload(base);
            Ok(())
        }

        fn handle_debug_string(
            &mut self,
            time: i64,
            origin: &EventOrigin,
            address: Address,
            is_unicode: bool,
            length: u16,
        ) -> HindcastResult<()>
        {
            let memory = ProcessMemory::new(self.process.process_handle());
            let text = if is_unicode {
                match memory.read_wide_string(address, usize::from(length)) {
                    Ok(text) => DebugText::Wide(trim_debug_string(&text)),
                    Err(error) => {
                        tracing::debug!("cannot read debug string: {error}");
                        return Ok(());
                    }
                }
            } else {
                match memory.read_string(address, usize::from(length)) {
                    Ok(text) => DebugText::Ansi(trim_debug_string(&text)),
                    Err(error) => {
                        tracing::debug!("cannot read debug string: {error}");
                        return Ok(());
                    }
                }
            };

            for observer in &mut self.observers {
                observer.on_debug_string(time, &text, origin);
            }
            Ok(())
        }

        fn handle_rip(&mut self, time: i64, origin: &EventOrigin, error: u32, kind: u32) -> HindcastResult<()>
        {
            let event = RipEvent { kind, error };
            let message = os::error_message(error);
            for observer in &mut self.observers {
                observer.on_rip(time, &event, message.as_deref(), origin);
            }
            Ok(())
        }

        /// Postmortem attach: bootstrap the registry from the live module
        /// list, replay the fault through the observer pipeline, then
        /// resolve it for the OS crash reporter.
        fn attach_postmortem(&mut self, time: i64) -> HindcastResult<()>
        {
            let session = self.jit.take().expect("postmortem dispatcher");

            let process = &self.process;
            for observer in &mut self.observers {
                observer.on_initialization(time, process);
            }

            // The live attach would have produced load events naturally;
            // synthesize one per currently mapped module instead.
            let origin = EventOrigin {
                h_process: self.process.process_handle(),
                h_thread: self.process.thread_handle(),
                process_id: self.process.process_id,
                thread_id: self.process.thread_id,
            };
            for module in os::enumerate_modules(self.process.process_handle()) {
                let load_index = self.modules.on_load(&module.path, module.base, module.size) as i64;
                let event = DllLoadEvent {
                    base: module.base,
                    path: module.path,
                    load_index,
                };
                let modules = &self.modules;
                for observer in &mut self.observers {
                    observer.on_dll_load(time, &event, &origin, modules);
                }
            }

            let snapshot = session.snapshot(&self.process)?;
            let trace = self.unwinder().capture(&snapshot, &self.modules);

            // Never first-chance: the fault already went unhandled, that is
            // why the handoff exists.
            let record = session.exception_record;
            let event = ExceptionEvent {
                address: record.address,
                code: record.code,
                wow64: !snapshot.is_native_64(),
                is_breakpoint: code::is_breakpoint(record.code),
                first_chance: false,
                name: exception_name(record.code),
            };

            let memory = ProcessMemory::new(self.process.process_handle());
            let demangle = dbghelp::undecorate_type_name;
            let rtti = RttiDecoder::new(&memory, &self.modules, &demangle)
                .decode(&record, snapshot.is_native_64());

            let modules = &self.modules;
            for observer in &mut self.observers {
                observer.on_exception(time, &event, &origin, &snapshot, &trace, modules, rtti.as_ref());
                observer.on_journal_complete(time, modules);
            }

            // Resolve the fault, then tell the crash reporter to proceed.
            // Terminating may retrigger the JIT debugger registration, but
            // that instance finds the process gone and exits.
            self.process.kill(record.code);
            os::signal_event(session.handoff_event);

            self.state = DispatcherState::Done;
            Ok(())
        }
    }

    impl Drop for EventDispatcher
    {
        fn drop(&mut self)
        {
            // Postmortem sessions never attached through the debug port.
            if self.live_attached {
                os::debug_detach(self.process.process_id);
            }
        }
    }

    /// Strip surrounding whitespace and the trailing terminator the target
    /// included in its reported length.
    fn trim_debug_string(text: &str) -> String
    {
        text.trim_matches(|ch: char| ch == '\0' || ch.is_whitespace()).to_string()
    }
}
