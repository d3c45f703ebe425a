//! Event-to-text formatting.
//!
//! One observer implementation that renders every event as one or more
//! lines. Address formatting follows a single rule everywhere: when the
//! containing module is known the address prints as `@ <path>+0xOFFSET`,
//! otherwise as `@ 0xADDR`.

use crate::events::{
    rip_type, CreateProcessEvent, CreateThreadEvent, DebugText, DllLoadEvent, DllUnloadEvent,
    EventObserver, ExceptionEvent, RipEvent,
};
use crate::rtti::RttiInfo;
use crate::types::{
    Address, EventOrigin, ModuleRegistry, ProcessRef, RegisterFile, StackTrace, ThreadSnapshot,
};

use super::{TextSink, TextStyle};

/// Formats debug events to a [`TextSink`].
pub struct TextEmitter<S: TextSink>
{
    sink: S,
    timestamps: bool,
    print_context: bool,
}

impl<S: TextSink> TextEmitter<S>
{
    /// Create an emitter over `sink`.
    ///
    /// `timestamps` prefixes every event line with the event time;
    /// `print_context` adds a CPU-context block before stack traces.
    pub fn new(sink: S, timestamps: bool, print_context: bool) -> Self
    {
        Self {
            sink,
            timestamps,
            print_context,
        }
    }

    fn styled(&mut self, style: TextStyle, text: &str)
    {
        self.sink.set_style(style);
        self.sink.write_text(text);
    }

    fn plain(&mut self, text: &str)
    {
        self.sink.reset_style();
        self.sink.write_text(text);
    }

    fn timestamp(&mut self, time: i64)
    {
        if !self.timestamps {
            return;
        }
        let formatted = chrono::DateTime::from_timestamp(time, 0)
            .map(|utc| utc.with_timezone(&chrono::Local).format("%d/%m/%Y %H:%M:%S").to_string())
            .unwrap_or_else(|| time.to_string());
        self.styled(TextStyle::Gray, &format!("({formatted}) "));
    }

    /// ` @ <path>+0xOFFSET` when the module is known, ` @ 0xADDR` otherwise.
    fn address_descriptor(address: Address, modules: &ModuleRegistry) -> String
    {
        match modules.module_at(address) {
            Some(module) => {
                let offset = address.offset_from(module.base).unwrap_or(0);
                format!(" @ {}+0x{offset:x}", module.path)
            }
            None => format!(" @ 0x{:x}", address.value()),
        }
    }

    fn print_stack_trace(&mut self, trace: &StackTrace, modules: &ModuleRegistry)
    {
        if trace.is_empty() {
            self.styled(TextStyle::BrightRed, "no stack trace available\n");
            self.sink.reset_style();
            return;
        }

        self.styled(TextStyle::BrightMagenta, "[STACK]\n");

        let mut index: u64 = 0;
        for frame in &trace.frames {
            if frame.recursion {
                self.styled(
                    TextStyle::BrightYellow,
                    &format!("\t... recursion of {} frames ...\n", frame.recursion_count),
                );
                self.sink.reset_style();
                index += frame.recursion_count;
                continue;
            }

            let start = format!("#{index}: ");
            self.styled(TextStyle::Cyan, &format!("\t{start}"));
            self.styled(TextStyle::BrightCyan, frame.symbol_name.as_deref().unwrap_or("<unknown>"));
            self.styled(
                TextStyle::Yellow,
                &format!("{}\n", Self::address_descriptor(frame.program_counter, modules)),
            );

            let indent = format!("\t{}", " ".repeat(start.len()));
            for instruction in &frame.instructions {
                self.plain(&indent);

                let width = if instruction.is_64_bit_addressing { 16 } else { 8 };
                self.styled(TextStyle::BrightYellow, &format!("{:0width$x}", instruction.offset));
                self.styled(TextStyle::Yellow, &format!(" ({:02})", instruction.size));
                self.styled(TextStyle::Green, &format!(" {:<24}", instruction.hex_bytes));
                self.styled(TextStyle::BrightGreen, &format!(" {}", instruction.mnemonic));
                if !instruction.operands.is_empty() {
                    self.styled(TextStyle::BrightMagenta, &format!(" {}", instruction.operands));
                }
                self.plain("\n");
            }

            if let Some(file) = &frame.source_file {
                self.plain(&indent);
                self.styled(TextStyle::Green, &format!("{file}: "));
                self.styled(TextStyle::BrightGreen, &format!("line {}\n", frame.source_line));
            }

            self.sink.reset_style();
            index += 1;
        }
    }

    /// Three registers per line, width per the snapshot's tag.
    fn print_cpu_context(&mut self, snapshot: &ThreadSnapshot)
    {
        self.styled(TextStyle::BrightMagenta, "[CPUCTX]\n");

        let (registers, width): (Vec<(&'static str, u64)>, usize) = match snapshot.registers() {
            RegisterFile::Native64(file) => (file.named().to_vec(), 16),
            RegisterFile::Wow32(file) => (file.named().to_vec(), 8),
        };

        self.plain("\t");
        let count = registers.len();
        let mut in_line = 0;
        for (current, (name, value)) in registers.into_iter().enumerate() {
            self.styled(TextStyle::Green, &format!("{name:>3} = "));
            self.styled(TextStyle::BrightGreen, &format!("{value:0width$x}"));
            self.sink.reset_style();

            if in_line == 2 || current == count - 1 {
                self.plain("\n");
                in_line = 0;
                if current != count - 1 {
                    self.plain("\t");
                }
            } else {
                self.plain("  ");
                in_line += 1;
            }
        }
        self.plain("\n");
    }

    /// Colorize one demangled class signature, token by token.
    fn print_class(&mut self, signature: &str, extends: bool)
    {
        self.plain("\t");

        let characters: Vec<char> = signature.chars().collect();
        let mut position = 0;
        while position < characters.len() {
            let rest: String = characters[position..].iter().collect();
            if rest.starts_with("class ") {
                self.styled(TextStyle::Cyan, "class ");
                position += 6;
            } else if rest.starts_with("struct ") {
                self.styled(TextStyle::Cyan, "struct ");
                position += 7;
            } else if rest.starts_with("::") {
                self.styled(TextStyle::Gray, "::");
                position += 2;
            } else if matches!(characters[position], '<' | '>' | ',' | '.') {
                self.styled(TextStyle::BrightRed, &characters[position].to_string());
                if characters[position] == ',' {
                    self.plain(" ");
                }
                position += 1;
            } else {
                self.styled(TextStyle::BrightCyan, &characters[position].to_string());
                position += 1;
            }
        }

        self.styled(TextStyle::Cyan, if extends { " extends: " } else { "." });
        self.plain("\n");
    }

    /// The catchable-type chain, throw-module path and `what()` string.
    fn print_rtti(&mut self, rtti: &RttiInfo)
    {
        self.styled(TextStyle::BrightMagenta, "[RTTI]\n");

        let names = &rtti.catchable_type_names;
        for (position, name) in names.iter().enumerate() {
            self.print_class(name, position + 1 != names.len());
        }

        if let Some(path) = &rtti.throw_module_path {
            self.styled(TextStyle::Yellow, "\tthrow info source(): ");
            self.styled(TextStyle::BrightYellow, path);
            self.plain("\n");
        }

        if let Some(message) = &rtti.message {
            self.styled(TextStyle::Yellow, "\twhat(): ");
            self.styled(TextStyle::BrightYellow, message);
            self.plain("\n");
        }
    }

    fn pad_right(text: &str, width: usize) -> String
    {
        format!("{text:<width$}")
    }
}

impl<S: TextSink> EventObserver for TextEmitter<S>
{
    fn on_initialization(&mut self, time: i64, process: &ProcessRef)
    {
        self.timestamp(time);
        self.styled(
            TextStyle::Green,
            &format!("Attached to process 0x{:x}\n", process.process_id),
        );

        self.styled(TextStyle::Cyan, &Self::pad_right("Path: ", 12));
        self.styled(TextStyle::BrightCyan, &format!("{}\n", process.path));

        self.styled(TextStyle::Cyan, &Self::pad_right("WorkDir: ", 12));
        self.styled(TextStyle::BrightCyan, &format!("{}\n", process.working_directory));

        self.styled(TextStyle::Cyan, &Self::pad_right("Arguments: ", 12));
        if process.arguments.is_empty() {
            self.plain("\n");
        } else {
            self.styled(
                TextStyle::BrightCyan,
                &format!("\"{}\"\n", process.arguments.join("\" \"")),
            );
        }
        self.sink.reset_style();
    }

    fn on_breakpoint(
        &mut self,
        time: i64,
        event: &ExceptionEvent,
        _origin: &EventOrigin,
        snapshot: &ThreadSnapshot,
        trace: &StackTrace,
        modules: &ModuleRegistry,
    )
    {
        self.timestamp(time);
        self.styled(TextStyle::Green, "[BREAK] ");
        self.styled(TextStyle::BrightGreen, &format!("(0x{:x})", event.code));
        self.styled(
            TextStyle::Yellow,
            &format!("{}\n", Self::address_descriptor(event.address, modules)),
        );
        self.sink.reset_style();

        if self.print_context {
            self.print_cpu_context(snapshot);
        }
        self.print_stack_trace(trace, modules);
    }

    fn on_exception(
        &mut self,
        time: i64,
        event: &ExceptionEvent,
        _origin: &EventOrigin,
        snapshot: &ThreadSnapshot,
        trace: &StackTrace,
        modules: &ModuleRegistry,
        rtti: Option<&RttiInfo>,
    )
    {
        self.timestamp(time);
        self.styled(TextStyle::BrightRed, "[EXCEPT] ");
        self.styled(TextStyle::Red, &format!("(0x{:x})", event.code));
        self.styled(
            TextStyle::Yellow,
            &Self::address_descriptor(event.address, modules),
        );

        if event.first_chance {
            self.styled(TextStyle::Magenta, ", first chance");
        }
        if let Some(name) = event.name {
            self.plain(": ");
            self.styled(TextStyle::BrightRed, name);
        }
        self.plain("\n");
        self.sink.reset_style();

        if let Some(rtti) = rtti {
            self.print_rtti(rtti);
        }
        if self.print_context {
            self.print_cpu_context(snapshot);
        }
        self.print_stack_trace(trace, modules);
    }

    fn on_create_process(
        &mut self,
        time: i64,
        event: &CreateProcessEvent,
        origin: &EventOrigin,
        _modules: &ModuleRegistry,
    )
    {
        self.timestamp(time);
        self.styled(TextStyle::BrightGreen, "[CREATE PROCESS] ");
        self.styled(TextStyle::BrightCyan, &format!("0x{:x}", origin.process_id));
        self.plain(&format!(" {}\n", event.path));
    }

    fn on_create_thread(
        &mut self,
        time: i64,
        event: &CreateThreadEvent,
        origin: &EventOrigin,
        modules: &ModuleRegistry,
    )
    {
        self.timestamp(time);
        self.styled(TextStyle::BrightGreen, "[CREATE THREAD] ");
        self.styled(TextStyle::BrightCyan, &format!("0x{:x}", origin.thread_id));
        self.styled(
            TextStyle::Yellow,
            &format!("{}\n", Self::address_descriptor(event.entry_point, modules)),
        );
        self.sink.reset_style();
    }

    fn on_exit_process(&mut self, time: i64, exit_code: u32, origin: &EventOrigin, _modules: &ModuleRegistry)
    {
        self.timestamp(time);
        self.styled(TextStyle::Red, "[EXIT PROCESS] ");
        self.styled(TextStyle::BrightCyan, &format!("0x{:x}", origin.process_id));
        let style = if exit_code == 0 { TextStyle::BrightGreen } else { TextStyle::BrightRed };
        self.styled(style, &format!(", exit code 0x{exit_code:x}\n"));
        self.sink.reset_style();
    }

    fn on_exit_thread(&mut self, time: i64, exit_code: u32, origin: &EventOrigin, _modules: &ModuleRegistry)
    {
        self.timestamp(time);
        self.styled(TextStyle::Red, "[EXIT THREAD] ");
        self.styled(TextStyle::BrightCyan, &format!("0x{:x}", origin.thread_id));
        let style = if exit_code == 0 { TextStyle::BrightGreen } else { TextStyle::BrightRed };
        self.styled(style, &format!(", exit code 0x{exit_code:x}\n"));
        self.sink.reset_style();
    }

    fn on_dll_load(&mut self, time: i64, event: &DllLoadEvent, _origin: &EventOrigin, _modules: &ModuleRegistry)
    {
        self.timestamp(time);
        self.styled(TextStyle::Cyan, "[DLL LOAD] ");
        self.styled(TextStyle::BrightCyan, &format!("0x{:x}: ", event.base.value()));
        self.plain(&format!("{}\n", event.path));
    }

    fn on_dll_unload(&mut self, time: i64, event: &DllUnloadEvent, _origin: &EventOrigin, _modules: &ModuleRegistry)
    {
        self.timestamp(time);
        self.styled(TextStyle::Red, "[DLL UNLOAD] ");
        self.styled(TextStyle::BrightCyan, &format!("0x{:x}: ", event.base.value()));
        self.plain(&format!("{}\n", event.path));
    }

    fn on_debug_string(&mut self, time: i64, text: &DebugText, _origin: &EventOrigin)
    {
        self.timestamp(time);
        let tag = if text.is_wide() { "[DEBUGW] " } else { "[DEBUGA] " };
        self.styled(TextStyle::Yellow, tag);
        self.styled(TextStyle::BrightYellow, text.text());
        if !text.text().ends_with('\n') {
            self.plain("\n");
        } else {
            self.sink.reset_style();
        }
    }

    fn on_rip(&mut self, time: i64, event: &RipEvent, message: Option<&str>, _origin: &EventOrigin)
    {
        self.timestamp(time);
        self.styled(TextStyle::BrightRed, "[RIP] ");

        match event.kind {
            rip_type::SLE_ERROR => self.styled(TextStyle::Red, "(SLE_ERROR, program fail) "),
            rip_type::SLE_MINORERROR => self.styled(TextStyle::Yellow, "(SLE_MINORERROR, might fail) "),
            rip_type::SLE_WARNING => self.styled(TextStyle::Green, "(SLE_WARNING, will not fail) "),
            _ => {}
        }
        self.sink.reset_style();

        match message {
            Some(message) if !message.is_empty() => {
                self.plain(message);
                if !message.ends_with('\n') {
                    self.plain("\n");
                }
            }
            _ => self.plain("\n"),
        }
    }

    fn on_journal_complete(&mut self, _time: i64, _modules: &ModuleRegistry)
    {
        // Text output happens per event; nothing to finalize.
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::emit::StringSink;
    use crate::types::{StackFrame, X64RegisterFile};

    fn emitter(sink: &StringSink, print_context: bool) -> TextEmitter<StringSink>
    {
        TextEmitter::new(sink.clone(), false, print_context)
    }

    fn registry_with_module() -> ModuleRegistry
    {
        let mut modules = ModuleRegistry::new();
        modules.on_load("C:\\app\\demo.exe", Address::new(0x40_0000), 0x1_0000);
        modules
    }

    #[test]
    fn test_address_descriptor_forms()
    {
        let modules = registry_with_module();

        let known = TextEmitter::<StringSink>::address_descriptor(Address::new(0x40_1234), &modules);
        assert_eq!(known, " @ C:\\app\\demo.exe+0x1234");

        let unknown = TextEmitter::<StringSink>::address_descriptor(Address::new(0x99_0000), &modules);
        assert_eq!(unknown, " @ 0x990000");
    }

    #[test]
    fn test_recursion_marker_advances_frame_index()
    {
        let sink = StringSink::new();
        let mut emitter = emitter(&sink, false);
        let modules = ModuleRegistry::new();

        let trace = StackTrace {
            max_recursion: 4,
            max_instructions: 0,
            frames: vec![
                StackFrame {
                    program_counter: Address::new(0x1000),
                    ..StackFrame::default()
                },
                StackFrame {
                    recursion: true,
                    recursion_count: 999,
                    program_counter: Address::new(0x1000),
                    ..StackFrame::default()
                },
                StackFrame {
                    program_counter: Address::new(0x2000),
                    ..StackFrame::default()
                },
            ],
        };
        emitter.print_stack_trace(&trace, &modules);

        let text = sink.contents();
        assert!(text.contains("\t#0: <unknown> @ 0x1000"));
        assert!(text.contains("\t... recursion of 999 frames ..."));
        assert!(text.contains("\t#1000: <unknown> @ 0x2000"));
    }

    #[test]
    fn test_empty_trace_notice()
    {
        let sink = StringSink::new();
        let mut emitter = emitter(&sink, false);
        emitter.print_stack_trace(&StackTrace::default(), &ModuleRegistry::new());
        assert_eq!(sink.contents(), "no stack trace available\n");
    }

    #[test]
    fn test_cpu_context_rows_of_three()
    {
        let sink = StringSink::new();
        let mut emitter = emitter(&sink, true);

        let mut file = X64RegisterFile::default();
        file.rip = 0x1234;
        let snapshot = ThreadSnapshot::from_registers(RegisterFile::Native64(file), 0, 0);
        emitter.print_cpu_context(&snapshot);

        let text = sink.contents();
        assert!(text.starts_with("[CPUCTX]\n"));
        assert!(text.contains("RIP = 0000000000001234"));

        // 17 registers at 3 per line: six rows, then the closing blank line.
        let rows: Vec<&str> = text.lines().filter(|line| line.contains(" = ")).collect();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0].matches(" = ").count(), 3);
        assert_eq!(rows[5].matches(" = ").count(), 2);
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn test_rtti_chain_rendering()
    {
        let sink = StringSink::new();
        let mut emitter = emitter(&sink, false);

        let rtti = RttiInfo {
            catchable_type_names: vec![
                "class std::runtime_error".to_string(),
                "class std::exception".to_string(),
            ],
            message: Some("boom".to_string()),
            throw_module_path: Some("C:\\app\\demo.exe".to_string()),
        };
        emitter.print_rtti(&rtti);

        let text = sink.contents();
        assert!(text.starts_with("[RTTI]\n"));
        assert!(text.contains("\tclass std::runtime_error extends: \n"));
        assert!(text.contains("\tclass std::exception.\n"));
        assert!(text.contains("\tthrow info source(): C:\\app\\demo.exe\n"));
        assert!(text.contains("\twhat(): boom\n"));
    }

    #[test]
    fn test_debug_string_newline_handling()
    {
        let sink = StringSink::new();
        let mut emitter = emitter(&sink, false);
        let origin = EventOrigin::from_ids(1, 2);

        emitter.on_debug_string(0, &DebugText::Ansi("no newline".to_string()), &origin);
        emitter.on_debug_string(0, &DebugText::Wide("has newline\n".to_string()), &origin);

        let text = sink.contents();
        assert!(text.contains("[DEBUGA] no newline\n[DEBUGW] has newline\n"));
        assert!(!text.contains("has newline\n\n"));
    }

    #[test]
    fn test_rip_severity_labels()
    {
        let sink = StringSink::new();
        let mut emitter = emitter(&sink, false);
        let origin = EventOrigin::from_ids(1, 2);

        emitter.on_rip(0, &RipEvent { kind: rip_type::SLE_ERROR, error: 5 }, Some("denied"), &origin);
        emitter.on_rip(0, &RipEvent { kind: rip_type::SLE_WARNING, error: 0 }, None, &origin);

        let text = sink.contents();
        assert!(text.contains("[RIP] (SLE_ERROR, program fail) denied\n"));
        assert!(text.contains("[RIP] (SLE_WARNING, will not fail) \n"));
    }

    #[test]
    fn test_initialization_block()
    {
        let sink = StringSink::new();
        let mut emitter = emitter(&sink, false);

        let process = ProcessRef::synthetic(
            "C:\\app\\demo.exe".to_string(),
            "C:\\app".to_string(),
            vec!["--flag".to_string()],
            0xAB,
            0xCD,
        );
        emitter.on_initialization(0, &process);

        let text = sink.contents();
        assert!(text.contains("Attached to process 0xab\n"));
        assert!(text.contains("Path:       C:\\app\\demo.exe\n"));
        assert!(text.contains("WorkDir:    C:\\app\n"));
        assert!(text.contains("Arguments:  \"--flag\"\n"));
    }
}
