//! Exact byte layout of the binary journal.
//!
//! All multi-byte integers are little-endian; all records are byte-packed.
//! Strings carry no terminator: 8-bit strings are raw UTF-8 bytes, wide
//! strings are UTF-16LE with lengths counted in code units.
//!
//! A journal is a 52-byte file header, the launch metadata (image path,
//! working directory, length-prefixed argv entries), then a sequence of
//! `EVNT`-tagged records. Exception records are followed by a register file
//! and an `STCK`-tagged stack-trace sub-record. The header's `crc32` field
//! seals the file: the checksum covers every byte with that field treated
//! as zero, and is patched in place on close.

use crate::error::{HindcastError, HindcastResult};
use crate::types::EventOrigin;

/// File magic, first four bytes of every journal.
pub const FILE_MAGIC: [u8; 4] = *b"HIND";
/// Signature opening every event record.
pub const EVENT_MAGIC: [u8; 4] = *b"EVNT";
/// Signature opening every stack-trace sub-record.
pub const TRACE_MAGIC: [u8; 4] = *b"STCK";

/// Packed size of the file header.
pub const HEADER_SIZE: usize = 52;
/// Byte offset of the `crc32` field inside the header.
pub const HEADER_CRC_OFFSET: usize = 48;
/// Packed size of the fixed event-record prefix.
pub const EVENT_PREFIX_SIZE: usize = 48;
/// Packed size of the stack-trace sub-record header.
pub const TRACE_HEADER_SIZE: usize = 28;
/// Packed size of a stack-frame record (excluding its variable tail).
pub const FRAME_RECORD_SIZE: usize = 89;
/// Packed size of an instruction record (excluding its variable tail).
pub const INSTRUCTION_RECORD_SIZE: usize = 41;

/// Sequential little-endian field reader over a byte slice.
///
/// Every accessor fails with [`HindcastError::JournalCorrupt`] when the
/// slice runs short, so decoders never index out of bounds.
pub struct FieldReader<'a>
{
    bytes: &'a [u8],
    position: usize,
}

impl<'a> FieldReader<'a>
{
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self
    {
        Self { bytes, position: 0 }
    }

    fn take(&mut self, count: usize) -> HindcastResult<&'a [u8]>
    {
        let end = self.position.checked_add(count).filter(|&end| end <= self.bytes.len());
        let Some(end) = end else {
            return Err(HindcastError::JournalCorrupt("record shorter than its fixed layout".into()));
        };
        let slice = &self.bytes[self.position..end];
        self.position = end;
        Ok(slice)
    }

    pub fn u8(&mut self) -> HindcastResult<u8>
    {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> HindcastResult<u32>
    {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("sized")))
    }

    pub fn u64(&mut self) -> HindcastResult<u64>
    {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().expect("sized")))
    }

    pub fn i64(&mut self) -> HindcastResult<i64>
    {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().expect("sized")))
    }

    pub fn signature(&mut self) -> HindcastResult<[u8; 4]>
    {
        Ok(self.take(4)?.try_into().expect("sized"))
    }
}

/// The `HIND` file header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileHeader
{
    /// Packed build version, `(major<<24)|(minor<<16)|(rev<<8)|build`.
    pub version: u32,
    /// Target process id.
    pub process_id: u32,
    /// Target main-thread id.
    pub thread_id: u32,
    /// Image path length in UTF-16 code units.
    pub path_length: u64,
    /// Working-directory length in UTF-16 code units.
    pub workdir_length: u64,
    /// Number of argv entries that follow the working directory.
    pub arg_count: u64,
    /// Session start, seconds since the Unix epoch.
    pub start_time: i64,
    /// Final seal; zero while the stream is being accumulated.
    pub crc32: u32,
}

impl FileHeader
{
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE]
    {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&FILE_MAGIC);
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out[8..12].copy_from_slice(&self.process_id.to_le_bytes());
        out[12..16].copy_from_slice(&self.thread_id.to_le_bytes());
        out[16..24].copy_from_slice(&self.path_length.to_le_bytes());
        out[24..32].copy_from_slice(&self.workdir_length.to_le_bytes());
        out[32..40].copy_from_slice(&self.arg_count.to_le_bytes());
        out[40..48].copy_from_slice(&self.start_time.to_le_bytes());
        out[48..52].copy_from_slice(&self.crc32.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> HindcastResult<Self>
    {
        let mut reader = FieldReader::new(bytes);
        let magic = reader.signature()?;
        if magic != FILE_MAGIC {
            return Err(HindcastError::JournalCorrupt("bad file magic, not a journal".into()));
        }
        Ok(Self {
            version: reader.u32()?,
            process_id: reader.u32()?,
            thread_id: reader.u32()?,
            path_length: reader.u64()?,
            workdir_length: reader.u64()?,
            arg_count: reader.u64()?,
            start_time: reader.i64()?,
            crc32: reader.u32()?,
        })
    }
}

/// The fixed prefix shared by every event record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventPrefix
{
    /// Event time, seconds since the Unix epoch.
    pub time: i64,
    /// OS-compatible numeric event kind (see [`crate::events::kind`]).
    pub kind: u32,
    /// Total record size in bytes, prefix included.
    pub total_size: u64,
    /// Thread identity; handle words are opaque and zeroed on read.
    pub origin: EventOrigin,
}

impl EventPrefix
{
    #[must_use]
    pub fn encode(&self) -> [u8; EVENT_PREFIX_SIZE]
    {
        let mut out = [0u8; EVENT_PREFIX_SIZE];
        out[0..4].copy_from_slice(&EVENT_MAGIC);
        out[4..12].copy_from_slice(&self.time.to_le_bytes());
        out[12..16].copy_from_slice(&self.kind.to_le_bytes());
        out[16..24].copy_from_slice(&self.total_size.to_le_bytes());
        out[24..32].copy_from_slice(&self.origin.h_process.to_le_bytes());
        out[32..40].copy_from_slice(&self.origin.h_thread.to_le_bytes());
        out[40..44].copy_from_slice(&self.origin.process_id.to_le_bytes());
        out[44..48].copy_from_slice(&self.origin.thread_id.to_le_bytes());
        out
    }

    /// Decode the prefix body that follows an already-consumed `EVNT`
    /// signature. Handle words are discarded.
    pub fn decode_after_signature(reader: &mut FieldReader<'_>) -> HindcastResult<Self>
    {
        let time = reader.i64()?;
        let kind = reader.u32()?;
        let total_size = reader.u64()?;
        let _h_process = reader.u64()?;
        let _h_thread = reader.u64()?;
        let process_id = reader.u32()?;
        let thread_id = reader.u32()?;
        Ok(Self {
            time,
            kind,
            total_size,
            origin: EventOrigin::from_ids(process_id, thread_id),
        })
    }
}

/// Fixed fields of an exception record. A register file (width per `wow64`)
/// and an `STCK` sub-record follow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExceptionRecord
{
    pub address: u64,
    /// Offset of the faulting instruction inside its module (0 if unknown).
    pub offset: u64,
    /// Stable load index of that module, -1 if unresolved.
    pub module_index: i64,
    pub code: u32,
    pub wow64: u8,
    pub is_breakpoint: u8,
    pub is_first_chance: u8,
}

impl ExceptionRecord
{
    pub const FIXED_SIZE: usize = 31;
    /// Total record size including the event prefix.
    pub const TOTAL_SIZE: u64 = (EVENT_PREFIX_SIZE + Self::FIXED_SIZE) as u64;

    #[must_use]
    pub fn encode(&self) -> Vec<u8>
    {
        let mut out = Vec::with_capacity(Self::FIXED_SIZE);
        out.extend_from_slice(&self.address.to_le_bytes());
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.module_index.to_le_bytes());
        out.extend_from_slice(&self.code.to_le_bytes());
        out.push(self.wow64);
        out.push(self.is_breakpoint);
        out.push(self.is_first_chance);
        out
    }

    pub fn decode(reader: &mut FieldReader<'_>) -> HindcastResult<Self>
    {
        Ok(Self {
            address: reader.u64()?,
            offset: reader.u64()?,
            module_index: reader.i64()?,
            code: reader.u32()?,
            wow64: reader.u8()?,
            is_breakpoint: reader.u8()?,
            is_first_chance: reader.u8()?,
        })
    }
}

/// Fixed fields of a create-process record; the image path follows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateProcessRecord
{
    /// Image path length in UTF-16 code units.
    pub path_length: u64,
    pub module_base: u64,
    pub module_size: u64,
}

impl CreateProcessRecord
{
    pub const FIXED_SIZE: usize = 24;
    pub const TOTAL_SIZE: u64 = (EVENT_PREFIX_SIZE + Self::FIXED_SIZE) as u64;

    #[must_use]
    pub fn encode(&self) -> Vec<u8>
    {
        let mut out = Vec::with_capacity(Self::FIXED_SIZE);
        out.extend_from_slice(&self.path_length.to_le_bytes());
        out.extend_from_slice(&self.module_base.to_le_bytes());
        out.extend_from_slice(&self.module_size.to_le_bytes());
        out
    }

    pub fn decode(reader: &mut FieldReader<'_>) -> HindcastResult<Self>
    {
        Ok(Self {
            path_length: reader.u64()?,
            module_base: reader.u64()?,
            module_size: reader.u64()?,
        })
    }
}

/// Fixed fields of a create-thread record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateThreadRecord
{
    pub entry_point: u64,
    /// Stable load index of the module containing the entry point, -1 if
    /// unresolved.
    pub module_index: i64,
    pub entry_point_offset: u64,
}

impl CreateThreadRecord
{
    pub const FIXED_SIZE: usize = 24;
    pub const TOTAL_SIZE: u64 = (EVENT_PREFIX_SIZE + Self::FIXED_SIZE) as u64;

    #[must_use]
    pub fn encode(&self) -> Vec<u8>
    {
        let mut out = Vec::with_capacity(Self::FIXED_SIZE);
        out.extend_from_slice(&self.entry_point.to_le_bytes());
        out.extend_from_slice(&self.module_index.to_le_bytes());
        out.extend_from_slice(&self.entry_point_offset.to_le_bytes());
        out
    }

    pub fn decode(reader: &mut FieldReader<'_>) -> HindcastResult<Self>
    {
        Ok(Self {
            entry_point: reader.u64()?,
            module_index: reader.i64()?,
            entry_point_offset: reader.u64()?,
        })
    }
}

/// Fixed fields of exit-process and exit-thread records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitRecord
{
    pub exit_code: u32,
}

impl ExitRecord
{
    pub const FIXED_SIZE: usize = 4;
    pub const TOTAL_SIZE: u64 = (EVENT_PREFIX_SIZE + Self::FIXED_SIZE) as u64;

    #[must_use]
    pub fn encode(&self) -> Vec<u8>
    {
        self.exit_code.to_le_bytes().to_vec()
    }

    pub fn decode(reader: &mut FieldReader<'_>) -> HindcastResult<Self>
    {
        Ok(Self {
            exit_code: reader.u32()?,
        })
    }
}

/// Fixed fields of a load-dll record; the module path follows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadDllRecord
{
    pub module_index: i64,
    pub module_base: u64,
    pub module_size: u64,
    /// Module path length in UTF-16 code units.
    pub path_length: u64,
}

impl LoadDllRecord
{
    pub const FIXED_SIZE: usize = 32;
    pub const TOTAL_SIZE: u64 = (EVENT_PREFIX_SIZE + Self::FIXED_SIZE) as u64;

    #[must_use]
    pub fn encode(&self) -> Vec<u8>
    {
        let mut out = Vec::with_capacity(Self::FIXED_SIZE);
        out.extend_from_slice(&self.module_index.to_le_bytes());
        out.extend_from_slice(&self.module_base.to_le_bytes());
        out.extend_from_slice(&self.module_size.to_le_bytes());
        out.extend_from_slice(&self.path_length.to_le_bytes());
        out
    }

    pub fn decode(reader: &mut FieldReader<'_>) -> HindcastResult<Self>
    {
        Ok(Self {
            module_index: reader.i64()?,
            module_base: reader.u64()?,
            module_size: reader.u64()?,
            path_length: reader.u64()?,
        })
    }
}

/// Fixed fields of an unload-dll record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnloadDllRecord
{
    pub module_base: u64,
}

impl UnloadDllRecord
{
    pub const FIXED_SIZE: usize = 8;
    pub const TOTAL_SIZE: u64 = (EVENT_PREFIX_SIZE + Self::FIXED_SIZE) as u64;

    #[must_use]
    pub fn encode(&self) -> Vec<u8>
    {
        self.module_base.to_le_bytes().to_vec()
    }

    pub fn decode(reader: &mut FieldReader<'_>) -> HindcastResult<Self>
    {
        Ok(Self {
            module_base: reader.u64()?,
        })
    }
}

/// Fixed fields of a debug-string record; the string follows, `length`
/// units of 8-bit or 16-bit characters per `is_unicode`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugStringRecord
{
    pub is_unicode: u8,
    pub length: u64,
}

impl DebugStringRecord
{
    pub const FIXED_SIZE: usize = 9;
    pub const TOTAL_SIZE: u64 = (EVENT_PREFIX_SIZE + Self::FIXED_SIZE) as u64;

    #[must_use]
    pub fn encode(&self) -> Vec<u8>
    {
        let mut out = Vec::with_capacity(Self::FIXED_SIZE);
        out.push(self.is_unicode);
        out.extend_from_slice(&self.length.to_le_bytes());
        out
    }

    pub fn decode(reader: &mut FieldReader<'_>) -> HindcastResult<Self>
    {
        Ok(Self {
            is_unicode: reader.u8()?,
            length: reader.u64()?,
        })
    }
}

/// Fixed fields of a RIP record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RipRecord
{
    pub kind: u32,
    pub error: u32,
}

impl RipRecord
{
    pub const FIXED_SIZE: usize = 8;
    pub const TOTAL_SIZE: u64 = (EVENT_PREFIX_SIZE + Self::FIXED_SIZE) as u64;

    #[must_use]
    pub fn encode(&self) -> Vec<u8>
    {
        let mut out = Vec::with_capacity(Self::FIXED_SIZE);
        out.extend_from_slice(&self.kind.to_le_bytes());
        out.extend_from_slice(&self.error.to_le_bytes());
        out
    }

    pub fn decode(reader: &mut FieldReader<'_>) -> HindcastResult<Self>
    {
        Ok(Self {
            kind: reader.u32()?,
            error: reader.u32()?,
        })
    }
}

/// The `STCK` stack-trace sub-record header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceHeader
{
    pub max_recursion: u64,
    pub max_instructions: u64,
    pub frame_count: u64,
}

impl TraceHeader
{
    #[must_use]
    pub fn encode(&self) -> [u8; TRACE_HEADER_SIZE]
    {
        let mut out = [0u8; TRACE_HEADER_SIZE];
        out[0..4].copy_from_slice(&TRACE_MAGIC);
        out[4..12].copy_from_slice(&self.max_recursion.to_le_bytes());
        out[12..20].copy_from_slice(&self.max_instructions.to_le_bytes());
        out[20..28].copy_from_slice(&self.frame_count.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> HindcastResult<Self>
    {
        let mut reader = FieldReader::new(bytes);
        let magic = reader.signature()?;
        if magic != TRACE_MAGIC {
            return Err(HindcastError::JournalCorrupt("stack trace expected after exception record".into()));
        }
        Ok(Self {
            max_recursion: reader.u64()?,
            max_instructions: reader.u64()?,
            frame_count: reader.u64()?,
        })
    }
}

/// Fixed fields of a stack-frame record; the symbol name (UTF-8), source
/// path (UTF-16) and instruction records follow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameRecord
{
    pub module_index: i64,
    pub module_base: u64,
    pub address: u64,
    pub absolute_address: u64,
    pub absolute_line_addr: u64,
    pub line_addr: u64,
    pub name_length: u64,
    pub source_path_length: u64,
    pub line_number: u64,
    pub is_recursion: u8,
    pub recursion_count: u64,
    pub instruction_count: u64,
}

impl FrameRecord
{
    #[must_use]
    pub fn encode(&self) -> Vec<u8>
    {
        let mut out = Vec::with_capacity(FRAME_RECORD_SIZE);
        out.extend_from_slice(&self.module_index.to_le_bytes());
        out.extend_from_slice(&self.module_base.to_le_bytes());
        out.extend_from_slice(&self.address.to_le_bytes());
        out.extend_from_slice(&self.absolute_address.to_le_bytes());
        out.extend_from_slice(&self.absolute_line_addr.to_le_bytes());
        out.extend_from_slice(&self.line_addr.to_le_bytes());
        out.extend_from_slice(&self.name_length.to_le_bytes());
        out.extend_from_slice(&self.source_path_length.to_le_bytes());
        out.extend_from_slice(&self.line_number.to_le_bytes());
        out.push(self.is_recursion);
        out.extend_from_slice(&self.recursion_count.to_le_bytes());
        out.extend_from_slice(&self.instruction_count.to_le_bytes());
        out
    }

    pub fn decode(reader: &mut FieldReader<'_>) -> HindcastResult<Self>
    {
        Ok(Self {
            module_index: reader.i64()?,
            module_base: reader.u64()?,
            address: reader.u64()?,
            absolute_address: reader.u64()?,
            absolute_line_addr: reader.u64()?,
            line_addr: reader.u64()?,
            name_length: reader.u64()?,
            source_path_length: reader.u64()?,
            line_number: reader.u64()?,
            is_recursion: reader.u8()?,
            recursion_count: reader.u64()?,
            instruction_count: reader.u64()?,
        })
    }
}

/// Fixed fields of an instruction record; the hex, mnemonic and operand
/// strings (all UTF-8) follow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstructionRecord
{
    pub is_64_bit_addressing: u8,
    pub offset: u64,
    pub size: u64,
    pub hex_length: u64,
    pub mnemonic_length: u64,
    pub operands_length: u64,
}

impl InstructionRecord
{
    #[must_use]
    pub fn encode(&self) -> Vec<u8>
    {
        let mut out = Vec::with_capacity(INSTRUCTION_RECORD_SIZE);
        out.push(self.is_64_bit_addressing);
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.hex_length.to_le_bytes());
        out.extend_from_slice(&self.mnemonic_length.to_le_bytes());
        out.extend_from_slice(&self.operands_length.to_le_bytes());
        out
    }

    pub fn decode(reader: &mut FieldReader<'_>) -> HindcastResult<Self>
    {
        Ok(Self {
            is_64_bit_addressing: reader.u8()?,
            offset: reader.u64()?,
            size: reader.u64()?,
            hex_length: reader.u64()?,
            mnemonic_length: reader.u64()?,
            operands_length: reader.u64()?,
        })
    }
}

/// Encode a string as UTF-16LE bytes.
#[must_use]
pub fn encode_utf16(text: &str) -> Vec<u8>
{
    let mut out = Vec::with_capacity(text.len() * 2);
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// Length of a string in UTF-16 code units.
#[must_use]
pub fn utf16_len(text: &str) -> u64
{
    text.encode_utf16().count() as u64
}

/// Decode UTF-16LE bytes, replacing unpaired surrogates.
#[must_use]
pub fn decode_utf16(bytes: &[u8]) -> String
{
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_header_round_trip()
    {
        let header = FileHeader {
            version: crate::version::current(),
            process_id: 0x1234,
            thread_id: 0x5678,
            path_length: 10,
            workdir_length: 4,
            arg_count: 2,
            start_time: 1_700_000_000,
            crc32: 0xDEAD_BEEF,
        };
        let bytes = header.encode();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(FileHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn test_header_rejects_bad_magic()
    {
        let mut bytes = FileHeader::default().encode();
        bytes[0] = b'X';
        assert!(FileHeader::decode(&bytes).is_err());
    }

    #[test]
    fn test_prefix_zeroes_handles_on_read()
    {
        let prefix = EventPrefix {
            time: 42,
            kind: crate::events::kind::EXCEPTION,
            total_size: ExceptionRecord::TOTAL_SIZE,
            origin: EventOrigin {
                h_process: 0x1111,
                h_thread: 0x2222,
                process_id: 7,
                thread_id: 8,
            },
        };
        let bytes = prefix.encode();

        let mut reader = FieldReader::new(&bytes[4..]);
        let decoded = EventPrefix::decode_after_signature(&mut reader).unwrap();
        assert_eq!(decoded.origin.h_process, 0);
        assert_eq!(decoded.origin.h_thread, 0);
        assert_eq!(decoded.origin.process_id, 7);
        assert_eq!(decoded.origin.thread_id, 8);
        assert_eq!(decoded.total_size, 79);
    }

    #[test]
    fn test_record_sizes()
    {
        assert_eq!(ExceptionRecord::default().encode().len(), ExceptionRecord::FIXED_SIZE);
        assert_eq!(CreateProcessRecord::default().encode().len(), CreateProcessRecord::FIXED_SIZE);
        assert_eq!(CreateThreadRecord::default().encode().len(), CreateThreadRecord::FIXED_SIZE);
        assert_eq!(ExitRecord::default().encode().len(), ExitRecord::FIXED_SIZE);
        assert_eq!(LoadDllRecord::default().encode().len(), LoadDllRecord::FIXED_SIZE);
        assert_eq!(UnloadDllRecord::default().encode().len(), UnloadDllRecord::FIXED_SIZE);
        assert_eq!(DebugStringRecord::default().encode().len(), DebugStringRecord::FIXED_SIZE);
        assert_eq!(RipRecord::default().encode().len(), RipRecord::FIXED_SIZE);
        assert_eq!(FrameRecord::default().encode().len(), FRAME_RECORD_SIZE);
        assert_eq!(InstructionRecord::default().encode().len(), INSTRUCTION_RECORD_SIZE);
    }

    #[test]
    fn test_frame_record_round_trip()
    {
        let record = FrameRecord {
            module_index: -1,
            module_base: 0x1000,
            address: 0x1234,
            absolute_address: 0x1240,
            absolute_line_addr: 0x1250,
            line_addr: 0x1230,
            name_length: 5,
            source_path_length: 9,
            line_number: 120,
            is_recursion: 0,
            recursion_count: 0,
            instruction_count: 2,
        };
        let bytes = record.encode();
        let mut reader = FieldReader::new(&bytes);
        assert_eq!(FrameRecord::decode(&mut reader).unwrap(), record);
    }

    #[test]
    fn test_utf16_helpers()
    {
        assert_eq!(utf16_len("ab"), 2);
        assert_eq!(utf16_len("𝄞"), 2); // surrogate pair
        let bytes = encode_utf16("C:\\x");
        assert_eq!(bytes.len(), 8);
        assert_eq!(decode_utf16(&bytes), "C:\\x");
    }

    #[test]
    fn test_short_slice_is_corrupt_not_panic()
    {
        let mut reader = FieldReader::new(&[1, 2, 3]);
        assert!(reader.u64().is_err());
    }
}
