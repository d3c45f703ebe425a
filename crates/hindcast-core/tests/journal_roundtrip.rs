//! End-to-end journal tests: record a synthetic session, then verify the
//! seal, the replay output and the failure modes on damaged files.

use std::collections::HashSet;
use std::io::Cursor;

use hindcast_core::checksum;
use hindcast_core::emit::{StringSink, TextEmitter};
use hindcast_core::error::HindcastError;
use hindcast_core::events::{
    code, exception_name, CreateProcessEvent, CreateThreadEvent, DebugText, DllLoadEvent,
    DllUnloadEvent, EventObserver, ExceptionEvent, RipEvent,
};
use hindcast_core::journal::{JournalReader, JournalWriter, ReplayOptions};
use hindcast_core::types::{
    Address, DecodedInstruction, EventOrigin, ModuleRegistry, ProcessRef, RegisterFile,
    StackFrame, StackTrace, ThreadSnapshot, Wow64RegisterFile, X64RegisterFile,
};

const EXE_PATH: &str = "C:\\target\\faulty.exe";
const DLL_PATH: &str = "C:\\Windows\\System32\\helper.dll";
const EXE_BASE: u64 = 0x0001_4000_0000;
const DLL_BASE: u64 = 0x7FFB_0000_0000;

fn origin() -> EventOrigin
{
    EventOrigin {
        h_process: 0xA0,
        h_thread: 0xB0,
        process_id: 0x1234,
        thread_id: 0x2222,
    }
}

fn target_process() -> ProcessRef
{
    ProcessRef::synthetic(
        EXE_PATH.to_string(),
        "C:\\target".to_string(),
        vec!["--mode".to_string(), "fast".to_string()],
        0x1234,
        0x2222,
    )
}

fn breakpoint_snapshot() -> ThreadSnapshot
{
    let mut file = X64RegisterFile::default();
    file.rip = EXE_BASE + 0x1010;
    file.rsp = 0x0000_00D0_0000_F000;
    file.rbp = 0x0000_00D0_0000_F080;
    file.rax = 7;
    file.rflags = 0x246;
    ThreadSnapshot::from_registers(RegisterFile::Native64(file), 0, 0)
}

fn wow_snapshot() -> ThreadSnapshot
{
    let mut file = Wow64RegisterFile::default();
    file.eip = 0x0040_2000;
    file.esp = 0x0018_FF00;
    file.eflags = 0x202;
    ThreadSnapshot::from_registers(RegisterFile::Wow32(file), 0, 0)
}

fn breakpoint_trace(modules: &ModuleRegistry) -> StackTrace
{
    let pc = Address::new(EXE_BASE + 0x1010);
    StackTrace {
        max_recursion: 10,
        max_instructions: 5,
        frames: vec![
            StackFrame {
                module: modules.module_at(pc).cloned(),
                module_base: Address::new(EXE_BASE),
                program_counter: pc,
                absolute_pc: pc + 4,
                absolute_line_addr: pc + 2,
                line_addr: pc,
                symbol_name: Some("faulty::poke".to_string()),
                source_file: Some("C:\\src\\faulty\\main.cpp".to_string()),
                source_line: 42,
                recursion: false,
                recursion_count: 0,
                instructions: vec![
                    DecodedInstruction {
                        is_64_bit_addressing: true,
                        offset: pc.value(),
                        size: 1,
                        hex_bytes: "cc".to_string(),
                        mnemonic: "int3".to_string(),
                        operands: String::new(),
                    },
                    DecodedInstruction {
                        is_64_bit_addressing: true,
                        offset: pc.value() + 1,
                        size: 3,
                        hex_bytes: "4889c8".to_string(),
                        mnemonic: "mov".to_string(),
                        operands: "rax,rcx".to_string(),
                    },
                ],
            },
            StackFrame {
                recursion: true,
                recursion_count: 17,
                program_counter: Address::new(EXE_BASE + 0x1200),
                ..StackFrame::default()
            },
            StackFrame {
                module: None,
                module_base: Address::ZERO,
                program_counter: Address::new(0xDEAD_0000),
                symbol_name: None,
                source_file: None,
                ..StackFrame::default()
            },
        ],
    }
}

/// Feed one canonical session to an observer, maintaining the registry the
/// way the live dispatcher would.
fn drive_session(observer: &mut dyn EventObserver)
{
    let mut modules = ModuleRegistry::new();
    let origin = origin();
    let process = target_process();

    observer.on_initialization(1_700_000_000, &process);

    modules.on_load(EXE_PATH, Address::new(EXE_BASE), 0x8000);
    let created = CreateProcessEvent {
        image_base: Address::new(EXE_BASE),
        path: EXE_PATH.to_string(),
    };
    observer.on_create_process(1_700_000_001, &created, &origin, &modules);

    let thread = CreateThreadEvent {
        entry_point: Address::new(EXE_BASE + 0x1000),
    };
    observer.on_create_thread(1_700_000_002, &thread, &origin, &modules);

    let load_index = modules.on_load(DLL_PATH, Address::new(DLL_BASE), 0x4000) as i64;
    let loaded = DllLoadEvent {
        base: Address::new(DLL_BASE),
        path: DLL_PATH.to_string(),
        load_index,
    };
    observer.on_dll_load(1_700_000_003, &loaded, &origin, &modules);

    let breakpoint = ExceptionEvent {
        address: Address::new(EXE_BASE + 0x1010),
        code: code::EXCEPTION_BREAKPOINT,
        wow64: false,
        is_breakpoint: true,
        first_chance: true,
        name: exception_name(code::EXCEPTION_BREAKPOINT),
    };
    let trace = breakpoint_trace(&modules);
    observer.on_breakpoint(1_700_000_004, &breakpoint, &origin, &breakpoint_snapshot(), &trace, &modules);

    observer.on_debug_string(1_700_000_005, &DebugText::Ansi("checkpoint reached".to_string()), &origin);
    observer.on_debug_string(1_700_000_006, &DebugText::Wide("wide checkpoint".to_string()), &origin);

    let access_violation = ExceptionEvent {
        address: Address::new(0x0040_2000),
        code: 0xC000_0005,
        wow64: true,
        is_breakpoint: false,
        first_chance: false,
        name: exception_name(0xC000_0005),
    };
    let empty_trace = StackTrace {
        max_recursion: 10,
        max_instructions: 5,
        frames: Vec::new(),
    };
    observer.on_exception(
        1_700_000_007,
        &access_violation,
        &origin,
        &wow_snapshot(),
        &empty_trace,
        &modules,
        None,
    );

    // An error code no host resolves to a message, so live and replayed
    // output agree on every platform.
    observer.on_rip(1_700_000_008, &RipEvent { kind: 1, error: 0xDEAD_BEEF }, None, &origin);

    let unloaded = DllUnloadEvent {
        base: Address::new(DLL_BASE),
        path: DLL_PATH.to_string(),
        load_index,
    };
    observer.on_dll_unload(1_700_000_009, &unloaded, &origin, &modules);
    modules.on_unload(Address::new(DLL_BASE));

    observer.on_exit_thread(1_700_000_010, 0, &origin, &modules);
    observer.on_exit_process(1_700_000_011, 7, &origin, &modules);
    observer.on_journal_complete(1_700_000_012, &modules);
}

fn record_session() -> Vec<u8>
{
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut writer = JournalWriter::new(&mut buffer);
        drive_session(&mut writer);
    }
    buffer.into_inner()
}

fn replay(buffer: Vec<u8>, options: ReplayOptions) -> Result<String, HindcastError>
{
    let sink = StringSink::new();
    let mut reader = JournalReader::open(Cursor::new(buffer), options)?;
    reader.add_observer(Box::new(TextEmitter::new(sink.clone(), false, true)));
    reader.play()?;
    Ok(sink.contents())
}

#[test]
fn test_crc_seal_matches_reconstruction()
{
    let buffer = record_session();

    // Property: CRC32 of the stream with the crc field zeroed equals the
    // stored seal.
    let stored = u32::from_le_bytes(buffer[48..52].try_into().unwrap());
    assert_ne!(stored, 0, "seal must be patched in on completion");

    let mut zeroed = buffer.clone();
    zeroed[48..52].fill(0);
    assert_eq!(checksum::update(0, &zeroed), stored);
}

#[test]
fn test_replay_matches_live_emission()
{
    // Render the session twice: once directly, once through a journal
    // round-trip. Timestamps are disabled; the text must match exactly.
    let sink = StringSink::new();
    {
        let mut live = TextEmitter::new(sink.clone(), false, true);
        drive_session(&mut live);
    }
    let live_text = sink.contents();

    let replayed_text = replay(record_session(), ReplayOptions::default()).expect("replay should succeed");

    assert_eq!(live_text, replayed_text);

    // Spot-check the interesting lines survived the trip.
    assert!(replayed_text.contains("Attached to process 0x1234"));
    assert!(replayed_text.contains("[BREAK] (0x80000003) @ C:\\target\\faulty.exe+0x1010"));
    assert!(replayed_text.contains("#0: faulty::poke"));
    assert!(replayed_text.contains("... recursion of 17 frames ..."));
    assert!(replayed_text.contains("#18: <unknown> @ 0xdead0000"));
    assert!(replayed_text.contains("C:\\src\\faulty\\main.cpp: line 42"));
    assert!(replayed_text.contains("int3"));
    assert!(replayed_text.contains("[EXCEPT] (0xc0000005) @ 0x402000: EXCEPTION_ACCESS_VIOLATION"));
    assert!(replayed_text.contains("no stack trace available"));
    assert!(replayed_text.contains("[DEBUGA] checkpoint reached"));
    assert!(replayed_text.contains("[DEBUGW] wide checkpoint"));
    assert!(replayed_text.contains("[CPUCTX]"));
    assert!(replayed_text.contains("RIP = 0000014000001010"));
    assert!(replayed_text.contains("EIP = 00402000"));
    assert!(replayed_text.contains("[DLL UNLOAD] 0x7ffb00000000: C:\\Windows\\System32\\helper.dll"));
    assert!(replayed_text.contains("exit code 0x7"));
}

#[test]
fn test_event_filter_limits_dispatch()
{
    let filter: HashSet<String> =
        ["create_process", "breakpoint"].into_iter().map(str::to_string).collect();
    let options = ReplayOptions {
        event_filter: Some(filter),
        ..ReplayOptions::default()
    };

    let text = replay(record_session(), options).expect("filtered replay should succeed");

    assert!(text.contains("[CREATE PROCESS]"));
    assert!(text.contains("[BREAK]"));
    assert!(!text.contains("[CREATE THREAD]"));
    assert!(!text.contains("[EXCEPT]"));
    assert!(!text.contains("[DLL LOAD]"));
    assert!(!text.contains("[DEBUGA]"));
    assert!(!text.contains("[EXIT PROCESS]"));
}

#[test]
fn test_single_byte_flip_fails_sanity()
{
    let mut buffer = record_session();
    let position = buffer.len() / 2;
    buffer[position] ^= 0x01;

    let result = replay(buffer, ReplayOptions::default());
    assert!(matches!(result, Err(HindcastError::JournalCorrupt(_))));
}

#[test]
fn test_corrupt_kind_without_sanity_check_is_loud()
{
    let mut buffer = record_session();

    // Damage the kind field of the second event record; skipping the sanity
    // pass must still end in a hard error, never silent wrong output.
    let header_end = 52;
    let first = find_signature(&buffer, header_end, b"EVNT").expect("first event");
    let second = find_signature(&buffer, first + 4, b"EVNT").expect("second event");
    buffer[second + 12] = 0xAA;

    let options = ReplayOptions {
        no_sanity_check: true,
        ..ReplayOptions::default()
    };
    let result = replay(buffer, options);
    assert!(matches!(
        result,
        Err(HindcastError::UnknownEventKind(_)) | Err(HindcastError::JournalCorrupt(_))
    ));
}

#[test]
fn test_version_gate()
{
    let mut buffer = record_session();

    // Bump the minor byte of the version word: upper 16 bits no longer
    // match, the journal must be refused.
    buffer[6] = buffer[6].wrapping_add(1);
    let result = JournalReader::open(Cursor::new(buffer), ReplayOptions::default());
    assert!(matches!(result, Err(HindcastError::VersionMismatch { .. })));

    // A revision/build difference alone must be accepted.
    let mut buffer = record_session();
    buffer[4] = buffer[4].wrapping_add(3);
    buffer[5] = buffer[5].wrapping_add(1);
    // Reseal: the version word is covered by the checksum.
    let mut zeroed = buffer.clone();
    zeroed[48..52].fill(0);
    let seal = checksum::update(0, &zeroed);
    buffer[48..52].copy_from_slice(&seal.to_le_bytes());

    let result = replay(buffer, ReplayOptions::default());
    assert!(result.is_ok());
}

#[test]
fn test_bad_magic_is_corrupt()
{
    let mut buffer = record_session();
    buffer[0] = b'W';
    let result = JournalReader::open(Cursor::new(buffer), ReplayOptions::default());
    assert!(matches!(result, Err(HindcastError::JournalCorrupt(_))));
}

#[test]
fn test_truncated_journal_is_corrupt()
{
    let buffer = record_session();
    let truncated = buffer[..buffer.len() - 10].to_vec();

    let options = ReplayOptions {
        no_sanity_check: true,
        ..ReplayOptions::default()
    };
    let result = replay(truncated, options);
    assert!(matches!(result, Err(HindcastError::JournalCorrupt(_))));
}

#[test]
fn test_minimal_session_has_exact_size()
{
    // A minimal exit-only session: its journal size is fully determined by
    // the layout.
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut writer = JournalWriter::new(&mut buffer);
        let process = ProcessRef::synthetic(
            "C:\\t\\x.exe".to_string(),
            "C:\\t".to_string(),
            vec!["7".to_string()],
            1,
            2,
        );
        let origin = EventOrigin::from_ids(1, 2);
        let mut modules = ModuleRegistry::new();

        writer.on_initialization(100, &process);

        modules.on_load("C:\\t\\x.exe", Address::new(0x1000), 0x100);
        let created = CreateProcessEvent {
            image_base: Address::new(0x1000),
            path: "C:\\t\\x.exe".to_string(),
        };
        writer.on_create_process(101, &created, &origin, &modules);
        writer.on_create_thread(
            102,
            &CreateThreadEvent { entry_point: Address::new(0x1010) },
            &origin,
            &modules,
        );
        writer.on_exit_thread(103, 0, &origin, &modules);
        writer.on_exit_process(104, 7, &origin, &modules);
        writer.on_journal_complete(105, &modules);
    }
    let bytes = buffer.into_inner();

    let path_units = "C:\\t\\x.exe".encode_utf16().count();
    let workdir_units = "C:\\t".encode_utf16().count();
    let expected = 52                       // header
        + path_units * 2                    // image path
        + workdir_units * 2                 // working directory
        + (4 + 1)                           // one argv entry: length + "7"
        + (72 + path_units * 2)             // create process + path
        + 72                                // create thread
        + 52                                // exit thread
        + 52;                               // exit process
    assert_eq!(bytes.len(), expected);

    // And it must replay cleanly.
    let text = replay(bytes, ReplayOptions::default()).expect("minimal journal replays");
    assert!(text.contains("exit code 0x7"));
}

#[test]
fn test_exception_record_layout_in_stream()
{
    let buffer = record_session();

    // Find the breakpoint event: kind 1 at prefix offset +12.
    let mut offset = 52;
    let record_start = loop {
        let position = find_signature(&buffer, offset, b"EVNT").expect("breakpoint event present");
        let kind = u32::from_le_bytes(buffer[position + 12..position + 16].try_into().unwrap());
        if kind == 1 {
            break position;
        }
        offset = position + 4;
    };

    let fixed = &buffer[record_start + 48..record_start + 79];
    let address = u64::from_le_bytes(fixed[0..8].try_into().unwrap());
    let module_offset = u64::from_le_bytes(fixed[8..16].try_into().unwrap());
    let module_index = i64::from_le_bytes(fixed[16..24].try_into().unwrap());
    let code = u32::from_le_bytes(fixed[24..28].try_into().unwrap());
    let (wow64, is_breakpoint, first_chance) = (fixed[28], fixed[29], fixed[30]);

    assert_eq!(address, EXE_BASE + 0x1010);
    assert_eq!(module_offset, 0x1010);
    assert_eq!(module_index, 0, "the main image is history entry 0");
    assert_eq!(code, code::EXCEPTION_BREAKPOINT);
    assert_eq!((wow64, is_breakpoint, first_chance), (0, 1, 1));

    // The native register file follows the fixed record, then the trace.
    let registers_start = record_start + 79;
    let rip = u64::from_le_bytes(buffer[registers_start..registers_start + 8].try_into().unwrap());
    assert_eq!(rip, EXE_BASE + 0x1010);

    let trace_start = registers_start + 18 * 8;
    assert_eq!(&buffer[trace_start..trace_start + 4], b"STCK");
    let frame_count = u64::from_le_bytes(buffer[trace_start + 20..trace_start + 28].try_into().unwrap());
    assert_eq!(frame_count, 3);
}

fn find_signature(buffer: &[u8], from: usize, signature: &[u8; 4]) -> Option<usize>
{
    (from..buffer.len().saturating_sub(4)).find(|&offset| &buffer[offset..offset + 4] == signature)
}
