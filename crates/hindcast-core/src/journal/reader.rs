//! The journal reader: validates, decodes and re-emits recorded sessions.
//!
//! Replay pushes events through the same [`EventObserver`] interface the
//! live dispatcher uses, so any sink works identically in both modes. The
//! reader maintains its own module registry from the recorded load/unload
//! events, which keeps address-to-module resolution faithful to the
//! original session at every point in the stream.

use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom};

use crate::checksum;
use crate::error::{HindcastError, HindcastResult};
use crate::events::{
    exception_name, kind, CreateProcessEvent, CreateThreadEvent, DebugText, DllLoadEvent,
    DllUnloadEvent, EventObserver, ExceptionEvent, RipEvent,
};
use crate::prompt::break_prompt;
use crate::types::{
    Address, Module, ModuleRegistry, ProcessRef, RegisterFile, StackFrame, StackTrace,
    ThreadSnapshot, Wow64RegisterFile, X64RegisterFile,
};
use crate::version;

use super::format::{
    decode_utf16, CreateProcessRecord, CreateThreadRecord, DebugStringRecord, EventPrefix,
    ExceptionRecord, ExitRecord, FieldReader, FileHeader, FrameRecord, InstructionRecord,
    LoadDllRecord, RipRecord, TraceHeader, UnloadDllRecord, EVENT_MAGIC, EVENT_PREFIX_SIZE,
    FRAME_RECORD_SIZE, HEADER_CRC_OFFSET, HEADER_SIZE, INSTRUCTION_RECORD_SIZE,
    TRACE_HEADER_SIZE,
};

/// The closed set of event names accepted by the replay filter.
pub const FILTER_NAMES: [&str; 10] = [
    "create_process",
    "create_thread",
    "exit_process",
    "exit_thread",
    "breakpoint",
    "exception",
    "load_dll",
    "unload_dll",
    "rip",
    "debug",
];

/// Replay configuration.
#[derive(Debug, Clone, Default)]
pub struct ReplayOptions
{
    /// When set, only events whose name is in the set are dispatched.
    /// Filtered events are still read in full to keep the CRC consistent.
    pub event_filter: Option<HashSet<String>>,
    /// Skip the up-front whole-file CRC pass.
    pub no_sanity_check: bool,
    /// Stop at replayed breakpoints.
    pub break_on_breakpoint: bool,
    /// Stop at replayed exceptions.
    pub break_on_exception: bool,
    /// Restrict `break_on_exception` to first-chance exceptions.
    pub first_chance_only: bool,
}

/// Reads a journal and re-emits its events to registered observers.
pub struct JournalReader<R: Read + Seek>
{
    stream: R,
    stream_size: u64,
    header: FileHeader,
    header_bytes: [u8; HEADER_SIZE],
    crc: u32,
    options: ReplayOptions,
    observers: Vec<Box<dyn EventObserver>>,
    modules: ModuleRegistry,
}

impl<R: Read + Seek> JournalReader<R>
{
    /// Open a journal stream: checks the magic and gates on the version.
    ///
    /// The lower 16 bits of the version word (revision and build) are
    /// ignored; the upper 16 must match this build exactly.
    pub fn open(mut stream: R, options: ReplayOptions) -> HindcastResult<Self>
    {
        let mut header_bytes = [0u8; HEADER_SIZE];
        stream
            .read_exact(&mut header_bytes)
            .map_err(|_| HindcastError::JournalCorrupt("file too short for a journal header".into()))?;
        let header = FileHeader::decode(&header_bytes)?;

        if !version::compatible(header.version) {
            return Err(HindcastError::VersionMismatch {
                found: header.version,
                required: version::current(),
            });
        }

        let stream_size = stream.seek(SeekFrom::End(0))?;
        stream.seek(SeekFrom::Start(HEADER_SIZE as u64))?;

        Ok(Self {
            stream,
            stream_size,
            header,
            header_bytes,
            crc: 0,
            options,
            observers: Vec::new(),
            modules: ModuleRegistry::new(),
        })
    }

    /// Register an observer. Fan-out order is registration order.
    pub fn add_observer(&mut self, observer: Box<dyn EventObserver>)
    {
        self.observers.push(observer);
    }

    /// The header of the opened journal.
    #[must_use]
    pub fn header(&self) -> &FileHeader
    {
        &self.header
    }

    /// Replay the whole journal through the observers.
    ///
    /// Unless disabled, the entire stream is first checked against the
    /// header's seal; the running CRC is then re-verified incrementally and
    /// must match again once every event has been read.
    pub fn play(&mut self) -> HindcastResult<()>
    {
        self.crc = checksum::update(0, &crc_view(&self.header_bytes));

        if !self.options.no_sanity_check {
            self.check_sanity()?;
        }

        let process = self.read_launch_metadata()?;
        for observer in &mut self.observers {
            observer.on_initialization(self.header.start_time, &process);
        }

        while self.next()? {}

        if self.crc != self.header.crc32 {
            return Err(HindcastError::JournalCorrupt(
                "not all data that was originally written has been read".into(),
            ));
        }

        let time = chrono::Utc::now().timestamp();
        let modules = &self.modules;
        for observer in &mut self.observers {
            observer.on_journal_complete(time, modules);
        }

        Ok(())
    }

    /// Stream the remainder of the file through the CRC and compare against
    /// the stored seal before any event is emitted.
    fn check_sanity(&mut self) -> HindcastResult<()>
    {
        let mut check = self.crc;
        let mut buffer = [0u8; 8192];

        loop {
            let read = self.stream.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            check = checksum::update(check, &buffer[..read]);
        }

        self.stream.seek(SeekFrom::Start(HEADER_SIZE as u64))?;

        if check != self.header.crc32 {
            return Err(HindcastError::JournalCorrupt(
                "file is damaged, was never finished or was appended to (--no-sanity-check overrides)".into(),
            ));
        }
        Ok(())
    }

    fn remaining(&mut self) -> HindcastResult<u64>
    {
        let position = self.stream.stream_position()?;
        Ok(self.stream_size.saturating_sub(position))
    }

    /// Read exactly `count` bytes, feeding the running CRC.
    fn read_bytes(&mut self, count: usize) -> HindcastResult<Vec<u8>>
    {
        if self.remaining()? < count as u64 {
            return Err(HindcastError::JournalCorrupt(
                "unexpected end of journal, expected more data".into(),
            ));
        }
        let mut buffer = vec![0u8; count];
        self.stream
            .read_exact(&mut buffer)
            .map_err(|_| HindcastError::JournalCorrupt("unexpected end of journal, expected more data".into()))?;
        self.crc = checksum::update(self.crc, &buffer);
        Ok(buffer)
    }

    fn read_wide_string(&mut self, units: u64) -> HindcastResult<String>
    {
        let bytes = self.read_bytes((units as usize) * 2)?;
        Ok(decode_utf16(&bytes))
    }

    fn read_launch_metadata(&mut self) -> HindcastResult<ProcessRef>
    {
        let path = self.read_wide_string(self.header.path_length)?;
        let working_directory = self.read_wide_string(self.header.workdir_length)?;

        let mut arguments = Vec::with_capacity(self.header.arg_count as usize);
        for _ in 0..self.header.arg_count {
            let length_bytes = self.read_bytes(4)?;
            let length = u32::from_le_bytes(length_bytes.try_into().expect("sized"));
            let bytes = self.read_bytes(length as usize)?;
            arguments.push(String::from_utf8_lossy(&bytes).into_owned());
        }

        Ok(ProcessRef::synthetic(
            path,
            working_directory,
            arguments,
            self.header.process_id,
            self.header.thread_id,
        ))
    }

    /// True when `name` passes the replay filter.
    fn selected(&self, name: &str) -> bool
    {
        match &self.options.event_filter {
            None => true,
            Some(filter) => filter.contains(name),
        }
    }

    /// Read and dispatch the next event record. Returns false at a clean
    /// end of stream.
    fn next(&mut self) -> HindcastResult<bool>
    {
        if self.remaining()? == 0 {
            return Ok(false);
        }

        let signature = self.read_bytes(4)?;
        if signature != EVENT_MAGIC {
            return Err(HindcastError::JournalCorrupt(
                "unexpected frame in journal, expected an event record".into(),
            ));
        }

        let body = self.read_bytes(EVENT_PREFIX_SIZE - 4)?;
        let mut reader = FieldReader::new(&body);
        let prefix = EventPrefix::decode_after_signature(&mut reader)?;

        match prefix.kind {
            kind::EXCEPTION => self.replay_exception(&prefix)?,
            kind::CREATE_PROCESS => self.replay_create_process(&prefix)?,
            kind::CREATE_THREAD => self.replay_create_thread(&prefix)?,
            kind::EXIT_PROCESS => self.replay_exit(&prefix, true)?,
            kind::EXIT_THREAD => self.replay_exit(&prefix, false)?,
            kind::LOAD_DLL => self.replay_dll_load(&prefix)?,
            kind::UNLOAD_DLL => self.replay_dll_unload(&prefix)?,
            kind::OUTPUT_DEBUG_STRING => self.replay_debug_string(&prefix)?,
            kind::RIP => self.replay_rip(&prefix)?,
            unknown => return Err(HindcastError::UnknownEventKind(unknown)),
        }

        Ok(true)
    }

    fn replay_exception(&mut self, prefix: &EventPrefix) -> HindcastResult<()>
    {
        let body = self.read_bytes(ExceptionRecord::FIXED_SIZE)?;
        let record = ExceptionRecord::decode(&mut FieldReader::new(&body))?;

        let registers = if record.wow64 != 0 {
            let bytes = self.read_bytes(Wow64RegisterFile::WIRE_SIZE)?;
            RegisterFile::Wow32(
                Wow64RegisterFile::from_wire(&bytes)
                    .ok_or_else(|| HindcastError::JournalCorrupt("truncated register file".into()))?,
            )
        } else {
            let bytes = self.read_bytes(X64RegisterFile::WIRE_SIZE)?;
            RegisterFile::Native64(
                X64RegisterFile::from_wire(&bytes)
                    .ok_or_else(|| HindcastError::JournalCorrupt("truncated register file".into()))?,
            )
        };
        let snapshot = ThreadSnapshot::from_registers(registers, 0, 0);

        let trace = self.read_trace()?;

        let event = ExceptionEvent {
            address: Address::new(record.address),
            code: record.code,
            wow64: record.wow64 != 0,
            is_breakpoint: record.is_breakpoint != 0,
            first_chance: record.is_first_chance != 0,
            name: exception_name(record.code),
        };

        let selected = self.selected(if event.is_breakpoint { "breakpoint" } else { "exception" });
        if !selected {
            return Ok(());
        }

        let modules = &self.modules;
        for observer in &mut self.observers {
            if event.is_breakpoint {
                observer.on_breakpoint(prefix.time, &event, &prefix.origin, &snapshot, &trace, modules);
            } else {
                observer.on_exception(prefix.time, &event, &prefix.origin, &snapshot, &trace, modules, None);
            }
        }

        if event.is_breakpoint {
            if self.options.break_on_breakpoint {
                break_prompt()?;
            }
        } else if self.options.break_on_exception
            && (!self.options.first_chance_only || event.first_chance)
        {
            break_prompt()?;
        }

        Ok(())
    }

    fn read_trace(&mut self) -> HindcastResult<StackTrace>
    {
        let header_bytes = self.read_bytes(TRACE_HEADER_SIZE)?;
        let header = TraceHeader::decode(&header_bytes)?;

        let mut trace = StackTrace {
            max_recursion: header.max_recursion,
            max_instructions: header.max_instructions,
            frames: Vec::new(),
        };

        for _ in 0..header.frame_count {
            let body = self.read_bytes(FRAME_RECORD_SIZE)?;
            let record = FrameRecord::decode(&mut FieldReader::new(&body))?;

            let name_bytes = self.read_bytes(record.name_length as usize)?;
            let source = self.read_wide_string(record.source_path_length)?;

            let mut instructions = Vec::with_capacity(record.instruction_count as usize);
            for _ in 0..record.instruction_count {
                let body = self.read_bytes(INSTRUCTION_RECORD_SIZE)?;
                let instruction = InstructionRecord::decode(&mut FieldReader::new(&body))?;

                let hex = self.read_bytes(instruction.hex_length as usize)?;
                let mnemonic = self.read_bytes(instruction.mnemonic_length as usize)?;
                let operands = self.read_bytes(instruction.operands_length as usize)?;

                instructions.push(crate::types::DecodedInstruction {
                    is_64_bit_addressing: instruction.is_64_bit_addressing != 0,
                    offset: instruction.offset,
                    size: instruction.size,
                    hex_bytes: String::from_utf8_lossy(&hex).into_owned(),
                    mnemonic: String::from_utf8_lossy(&mnemonic).into_owned(),
                    operands: String::from_utf8_lossy(&operands).into_owned(),
                });
            }

            let address = Address::new(record.address);
            let module: Option<Module> = self.modules.module_at(address).cloned();

            trace.frames.push(StackFrame {
                module,
                module_base: Address::new(record.module_base),
                program_counter: address,
                absolute_pc: Address::new(record.absolute_address),
                absolute_line_addr: Address::new(record.absolute_line_addr),
                line_addr: Address::new(record.line_addr),
                symbol_name: (record.name_length > 0)
                    .then(|| String::from_utf8_lossy(&name_bytes).into_owned()),
                source_file: (record.source_path_length > 0).then_some(source),
                source_line: record.line_number as u32,
                recursion: record.is_recursion != 0,
                recursion_count: record.recursion_count,
                instructions,
            });
        }

        Ok(trace)
    }

    fn replay_create_process(&mut self, prefix: &EventPrefix) -> HindcastResult<()>
    {
        let body = self.read_bytes(CreateProcessRecord::FIXED_SIZE)?;
        let record = CreateProcessRecord::decode(&mut FieldReader::new(&body))?;
        let path = self.read_wide_string(record.path_length)?;

        // Rebuild the registry state so later frames resolve correctly.
        self.modules.on_load(&path, Address::new(record.module_base), record.module_size);

        if !self.selected("create_process") {
            return Ok(());
        }

        let event = CreateProcessEvent {
            image_base: Address::new(record.module_base),
            path,
        };
        let modules = &self.modules;
        for observer in &mut self.observers {
            observer.on_create_process(prefix.time, &event, &prefix.origin, modules);
        }
        Ok(())
    }

    fn replay_create_thread(&mut self, prefix: &EventPrefix) -> HindcastResult<()>
    {
        let body = self.read_bytes(CreateThreadRecord::FIXED_SIZE)?;
        let record = CreateThreadRecord::decode(&mut FieldReader::new(&body))?;

        if !self.selected("create_thread") {
            return Ok(());
        }

        let event = CreateThreadEvent {
            entry_point: Address::new(record.entry_point),
        };
        let modules = &self.modules;
        for observer in &mut self.observers {
            observer.on_create_thread(prefix.time, &event, &prefix.origin, modules);
        }
        Ok(())
    }

    fn replay_exit(&mut self, prefix: &EventPrefix, is_process: bool) -> HindcastResult<()>
    {
        let body = self.read_bytes(ExitRecord::FIXED_SIZE)?;
        let record = ExitRecord::decode(&mut FieldReader::new(&body))?;

        let name = if is_process { "exit_process" } else { "exit_thread" };
        if !self.selected(name) {
            return Ok(());
        }

        let modules = &self.modules;
        for observer in &mut self.observers {
            if is_process {
                observer.on_exit_process(prefix.time, record.exit_code, &prefix.origin, modules);
            } else {
                observer.on_exit_thread(prefix.time, record.exit_code, &prefix.origin, modules);
            }
        }
        Ok(())
    }

    fn replay_dll_load(&mut self, prefix: &EventPrefix) -> HindcastResult<()>
    {
        let body = self.read_bytes(LoadDllRecord::FIXED_SIZE)?;
        let record = LoadDllRecord::decode(&mut FieldReader::new(&body))?;
        let path = self.read_wide_string(record.path_length)?;

        let load_index = self.modules.on_load(&path, Address::new(record.module_base), record.module_size);

        if !self.selected("load_dll") {
            return Ok(());
        }

        let event = DllLoadEvent {
            base: Address::new(record.module_base),
            path,
            load_index: load_index as i64,
        };
        let modules = &self.modules;
        for observer in &mut self.observers {
            observer.on_dll_load(prefix.time, &event, &prefix.origin, modules);
        }
        Ok(())
    }

    fn replay_dll_unload(&mut self, prefix: &EventPrefix) -> HindcastResult<()>
    {
        let body = self.read_bytes(UnloadDllRecord::FIXED_SIZE)?;
        let record = UnloadDllRecord::decode(&mut FieldReader::new(&body))?;
        let base = Address::new(record.module_base);

        // Observers still see the module; it leaves the registry afterwards.
        if self.selected("unload_dll") {
            let path = self.modules.path_of(base).unwrap_or("").to_string();
            let event = DllUnloadEvent {
                base,
                load_index: self.modules.index_of(&path).map_or(-1, |index| index as i64),
                path,
            };
            let modules = &self.modules;
            for observer in &mut self.observers {
                observer.on_dll_unload(prefix.time, &event, &prefix.origin, modules);
            }
        }

        self.modules.on_unload(base);
        Ok(())
    }

    fn replay_debug_string(&mut self, prefix: &EventPrefix) -> HindcastResult<()>
    {
        let body = self.read_bytes(DebugStringRecord::FIXED_SIZE)?;
        let record = DebugStringRecord::decode(&mut FieldReader::new(&body))?;

        let text = if record.is_unicode != 0 {
            DebugText::Wide(self.read_wide_string(record.length)?)
        } else {
            let bytes = self.read_bytes(record.length as usize)?;
            DebugText::Ansi(String::from_utf8_lossy(&bytes).into_owned())
        };

        if !self.selected("debug") {
            return Ok(());
        }

        for observer in &mut self.observers {
            observer.on_debug_string(prefix.time, &text, &prefix.origin);
        }
        Ok(())
    }

    fn replay_rip(&mut self, prefix: &EventPrefix) -> HindcastResult<()>
    {
        let body = self.read_bytes(RipRecord::FIXED_SIZE)?;
        let record = RipRecord::decode(&mut FieldReader::new(&body))?;

        if !self.selected("rip") {
            return Ok(());
        }

        let event = RipEvent {
            kind: record.kind,
            error: record.error,
        };
        let message = rip_message(record.error);
        for observer in &mut self.observers {
            observer.on_rip(prefix.time, &event, message.as_deref(), &prefix.origin);
        }
        Ok(())
    }
}

/// Header bytes as the CRC sees them: the `crc32` field reads as zero.
fn crc_view(header_bytes: &[u8; HEADER_SIZE]) -> [u8; HEADER_SIZE]
{
    let mut view = *header_bytes;
    view[HEADER_CRC_OFFSET..HEADER_CRC_OFFSET + 4].fill(0);
    view
}

/// Resolve a human-readable message for a RIP error code.
fn rip_message(error: u32) -> Option<String>
{
    #[cfg(windows)]
    {
        crate::platform::windows::error_message(error)
    }
    #[cfg(not(windows))]
    {
        let _ = error;
        None
    }
}
