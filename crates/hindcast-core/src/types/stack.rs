//! Stack trace types.

use super::module::Module;
use super::Address;

/// One decoded instruction at a frame's program counter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedInstruction
{
    /// True when the instruction was decoded with 64-bit addressing.
    pub is_64_bit_addressing: bool,
    /// Address of the instruction.
    pub offset: u64,
    /// Encoded length in bytes.
    pub size: u64,
    /// Hexadecimal rendering of the instruction bytes.
    pub hex_bytes: String,
    /// The instruction mnemonic.
    pub mnemonic: String,
    /// The operands as a single formatted string (may be empty).
    pub operands: String,
}

/// One slot in a call-stack unwind.
///
/// When `recursion` is true this frame stands for an elided run of identical
/// self-calls of length `recursion_count`; only the tail frame's program
/// counter is retained and no symbol information is attached.
#[derive(Debug, Clone, Default)]
pub struct StackFrame
{
    /// The module containing the program counter, when resolvable.
    pub module: Option<Module>,
    /// Base address of that module (or of the symbol's module as reported
    /// by the symbol engine), 0 when unknown.
    pub module_base: Address,
    /// Program counter of this frame.
    pub program_counter: Address,
    /// Program counter plus the symbol displacement.
    pub absolute_pc: Address,
    /// Program counter plus the line displacement.
    pub absolute_line_addr: Address,
    /// Address the line record maps to.
    pub line_addr: Address,
    /// Resolved symbol name, if the symbol engine produced one.
    pub symbol_name: Option<String>,
    /// Source file of the line record, if available.
    pub source_file: Option<String>,
    /// Line number of the line record (0 when absent).
    pub source_line: u32,
    /// True when this is a synthetic recursion marker.
    pub recursion: bool,
    /// Number of elided self-recursive frames (0 for normal frames).
    pub recursion_count: u64,
    /// Instructions decoded at `program_counter`, bounded by policy.
    pub instructions: Vec<DecodedInstruction>,
}

/// An ordered frame list plus the policies that shaped it.
///
/// The two policy fields travel with the trace so that replaying a journal
/// reproduces the same folding and disassembly breadth the original run was
/// configured with.
#[derive(Debug, Clone, Default)]
pub struct StackTrace
{
    /// Recursion folding policy in force (0 or `u64::MAX` disables folding).
    pub max_recursion: u64,
    /// Disassembly breadth policy in force (0 disables disassembly).
    pub max_instructions: u64,
    /// The frames, innermost first.
    pub frames: Vec<StackFrame>,
}

impl StackTrace
{
    /// Number of frames in the trace.
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.frames.len()
    }

    /// True when the walk produced nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.frames.is_empty()
    }
}
