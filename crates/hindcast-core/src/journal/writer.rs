//! The journal writer: an observer that serializes every event.
//!
//! Every byte written feeds the running CRC state, except for the final
//! header reseal on completion. If the process dies before the final
//! fan-out, the header keeps a zero CRC that will not match the stream;
//! that mismatch is the sole signal of an incomplete file.
//!
//! Write failures are fatal to this sink only: the writer logs once, goes
//! inert and lets the remaining observers continue.

use std::io::{Seek, SeekFrom, Write};

use crate::checksum;
use crate::events::{
    kind, CreateProcessEvent, CreateThreadEvent, DebugText, DllLoadEvent, DllUnloadEvent,
    EventObserver, ExceptionEvent, RipEvent,
};
use crate::types::{
    EventOrigin, ModuleRegistry, ProcessRef, RegisterFile, StackFrame, StackTrace, ThreadSnapshot,
};
use crate::version;

use super::format::{
    encode_utf16, utf16_len, CreateProcessRecord, CreateThreadRecord, DebugStringRecord,
    EventPrefix, ExceptionRecord, ExitRecord, FileHeader, FrameRecord, InstructionRecord,
    LoadDllRecord, RipRecord, TraceHeader, UnloadDllRecord,
};

/// Serializes debug events into the binary journal format.
pub struct JournalWriter<W: Write + Seek>
{
    stream: W,
    header: FileHeader,
    crc: u32,
    failed: bool,
}

impl<W: Write + Seek> JournalWriter<W>
{
    /// Wrap `stream`, which must be positioned at offset 0.
    ///
    /// Nothing is written until the initialization fan-out arrives with the
    /// launch metadata.
    pub fn new(stream: W) -> Self
    {
        Self {
            stream,
            header: FileHeader {
                version: version::current(),
                ..FileHeader::default()
            },
            crc: 0,
            failed: false,
        }
    }

    /// Write `bytes` and fold them into the running CRC.
    fn emit(&mut self, bytes: &[u8])
    {
        if self.failed {
            return;
        }
        if let Err(error) = self.stream.write_all(bytes) {
            tracing::error!("journal sink failed, dropping it: {error}");
            self.failed = true;
            return;
        }
        self.crc = checksum::update(self.crc, bytes);
    }

    fn emit_prefix(&mut self, time: i64, kind: u32, total_size: u64, origin: &EventOrigin)
    {
        let prefix = EventPrefix {
            time,
            kind,
            total_size,
            origin: *origin,
        };
        self.emit(&prefix.encode());
    }

    fn emit_register_file(&mut self, snapshot: &ThreadSnapshot)
    {
        let bytes = match snapshot.registers() {
            RegisterFile::Native64(file) => file.to_wire(),
            RegisterFile::Wow32(file) => file.to_wire(),
        };
        self.emit(&bytes);
    }

    fn emit_trace(&mut self, trace: &StackTrace, modules: &ModuleRegistry)
    {
        let header = TraceHeader {
            max_recursion: trace.max_recursion,
            max_instructions: trace.max_instructions,
            frame_count: trace.frames.len() as u64,
        };
        self.emit(&header.encode());

        for frame in &trace.frames {
            self.emit_frame(frame, modules);
        }
    }

    fn emit_frame(&mut self, frame: &StackFrame, modules: &ModuleRegistry)
    {
        let module_index = frame
            .module
            .as_ref()
            .and_then(|module| modules.index_of(&module.path))
            .map_or(-1, |index| index as i64);

        let name = frame.symbol_name.as_deref().unwrap_or("");
        let source = frame.source_file.as_deref().unwrap_or("");

        let record = FrameRecord {
            module_index,
            module_base: frame.module_base.value(),
            address: frame.program_counter.value(),
            absolute_address: frame.absolute_pc.value(),
            absolute_line_addr: frame.absolute_line_addr.value(),
            line_addr: frame.line_addr.value(),
            name_length: name.len() as u64,
            source_path_length: utf16_len(source),
            line_number: u64::from(frame.source_line),
            is_recursion: u8::from(frame.recursion),
            recursion_count: frame.recursion_count,
            instruction_count: frame.instructions.len() as u64,
        };
        self.emit(&record.encode());
        self.emit(name.as_bytes());
        self.emit(&encode_utf16(source));

        for instruction in &frame.instructions {
            let record = InstructionRecord {
                is_64_bit_addressing: u8::from(instruction.is_64_bit_addressing),
                offset: instruction.offset,
                size: instruction.size,
                hex_length: instruction.hex_bytes.len() as u64,
                mnemonic_length: instruction.mnemonic.len() as u64,
                operands_length: instruction.operands.len() as u64,
            };
            self.emit(&record.encode());
            self.emit(instruction.hex_bytes.as_bytes());
            self.emit(instruction.mnemonic.as_bytes());
            self.emit(instruction.operands.as_bytes());
        }
    }

    /// Breakpoints and exceptions share one record layout; only the
    /// `is_breakpoint` flag differs.
    fn write_exception(
        &mut self,
        time: i64,
        event: &ExceptionEvent,
        origin: &EventOrigin,
        snapshot: &ThreadSnapshot,
        trace: &StackTrace,
        modules: &ModuleRegistry,
    )
    {
        let (module_index, offset) = match modules.module_at(event.address) {
            Some(module) => {
                let index = modules.index_of(&module.path).map_or(-1, |index| index as i64);
                (index, event.address.offset_from(module.base).unwrap_or(0))
            }
            None => (-1, 0),
        };

        let record = ExceptionRecord {
            address: event.address.value(),
            offset,
            module_index,
            code: event.code,
            wow64: u8::from(event.wow64),
            is_breakpoint: u8::from(event.is_breakpoint),
            is_first_chance: u8::from(event.first_chance),
        };

        self.emit_prefix(time, kind::EXCEPTION, ExceptionRecord::TOTAL_SIZE, origin);
        self.emit(&record.encode());
        self.emit_register_file(snapshot);
        self.emit_trace(trace, modules);
    }
}

impl<W: Write + Seek> EventObserver for JournalWriter<W>
{
    fn on_initialization(&mut self, time: i64, process: &ProcessRef)
    {
        self.header.process_id = process.process_id;
        self.header.thread_id = process.thread_id;
        self.header.path_length = utf16_len(&process.path);
        self.header.workdir_length = utf16_len(&process.working_directory);
        self.header.arg_count = process.arguments.len() as u64;
        self.header.start_time = time;
        self.header.crc32 = 0;

        let header = self.header.encode();
        self.emit(&header);
        self.emit(&encode_utf16(&process.path));
        self.emit(&encode_utf16(&process.working_directory));

        for argument in &process.arguments {
            self.emit(&(argument.len() as u32).to_le_bytes());
            self.emit(argument.as_bytes());
        }
    }

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
        self.write_exception(time, event, origin, snapshot, trace, modules);
    }

    fn on_exception(
        &mut self,
        time: i64,
        event: &ExceptionEvent,
        origin: &EventOrigin,
        snapshot: &ThreadSnapshot,
        trace: &StackTrace,
        modules: &ModuleRegistry,
        _rtti: Option<&crate::rtti::RttiInfo>,
    )
    {
        self.write_exception(time, event, origin, snapshot, trace, modules);
    }

    fn on_create_process(
        &mut self,
        time: i64,
        event: &CreateProcessEvent,
        origin: &EventOrigin,
        modules: &ModuleRegistry,
    )
    {
        let (base, size) = modules
            .module_at(event.image_base)
            .map_or((event.image_base.value(), 0), |module| (module.base.value(), module.size));

        let record = CreateProcessRecord {
            path_length: utf16_len(&event.path),
            module_base: base,
            module_size: size,
        };
        self.emit_prefix(time, kind::CREATE_PROCESS, CreateProcessRecord::TOTAL_SIZE, origin);
        self.emit(&record.encode());
        self.emit(&encode_utf16(&event.path));
    }

    fn on_create_thread(
        &mut self,
        time: i64,
        event: &CreateThreadEvent,
        origin: &EventOrigin,
        modules: &ModuleRegistry,
    )
    {
        let record = match modules.module_at(event.entry_point) {
            Some(module) => CreateThreadRecord {
                entry_point: event.entry_point.value(),
                module_index: modules.index_of(&module.path).map_or(-1, |index| index as i64),
                entry_point_offset: event.entry_point.offset_from(module.base).unwrap_or(0),
            },
            None => CreateThreadRecord {
                entry_point: event.entry_point.value(),
                module_index: -1,
                entry_point_offset: 0,
            },
        };
        self.emit_prefix(time, kind::CREATE_THREAD, CreateThreadRecord::TOTAL_SIZE, origin);
        self.emit(&record.encode());
    }

    fn on_exit_process(&mut self, time: i64, exit_code: u32, origin: &EventOrigin, _modules: &ModuleRegistry)
    {
        self.emit_prefix(time, kind::EXIT_PROCESS, ExitRecord::TOTAL_SIZE, origin);
        self.emit(&ExitRecord { exit_code }.encode());
    }

    fn on_exit_thread(&mut self, time: i64, exit_code: u32, origin: &EventOrigin, _modules: &ModuleRegistry)
    {
        self.emit_prefix(time, kind::EXIT_THREAD, ExitRecord::TOTAL_SIZE, origin);
        self.emit(&ExitRecord { exit_code }.encode());
    }

    fn on_dll_load(&mut self, time: i64, event: &DllLoadEvent, origin: &EventOrigin, modules: &ModuleRegistry)
    {
        let size = modules.module_at(event.base).map_or(0, |module| module.size);
        let record = LoadDllRecord {
            module_index: event.load_index,
            module_base: event.base.value(),
            module_size: size,
            path_length: utf16_len(&event.path),
        };
        self.emit_prefix(time, kind::LOAD_DLL, LoadDllRecord::TOTAL_SIZE, origin);
        self.emit(&record.encode());
        self.emit(&encode_utf16(&event.path));
    }

    fn on_dll_unload(&mut self, time: i64, event: &DllUnloadEvent, origin: &EventOrigin, _modules: &ModuleRegistry)
    {
        self.emit_prefix(time, kind::UNLOAD_DLL, UnloadDllRecord::TOTAL_SIZE, origin);
        self.emit(&UnloadDllRecord { module_base: event.base.value() }.encode());
    }

    fn on_debug_string(&mut self, time: i64, text: &DebugText, origin: &EventOrigin)
    {
        let (is_unicode, length, bytes) = match text {
            DebugText::Ansi(text) => (0u8, text.len() as u64, text.as_bytes().to_vec()),
            DebugText::Wide(text) => (1u8, utf16_len(text), encode_utf16(text)),
        };
        let record = DebugStringRecord { is_unicode, length };
        self.emit_prefix(time, kind::OUTPUT_DEBUG_STRING, DebugStringRecord::TOTAL_SIZE, origin);
        self.emit(&record.encode());
        self.emit(&bytes);
    }

    fn on_rip(&mut self, time: i64, event: &RipEvent, _message: Option<&str>, origin: &EventOrigin)
    {
        self.emit_prefix(time, kind::RIP, RipRecord::TOTAL_SIZE, origin);
        self.emit(&RipRecord { kind: event.kind, error: event.error }.encode());
    }

    fn on_journal_complete(&mut self, _time: i64, _modules: &ModuleRegistry)
    {
        if self.failed {
            return;
        }

        // Reseal the header in place. The final CRC is the checksum of the
        // stream as written, header included, with this field zero.
        self.header.crc32 = self.crc;
        let header = self.header.encode();

        let result = self
            .stream
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.stream.write_all(&header))
            .and_then(|_| self.stream.seek(SeekFrom::End(0)))
            .and_then(|_| self.stream.flush());

        if let Err(error) = result {
            tracing::error!("failed to seal journal header: {error}");
            self.failed = true;
        }
    }
}
