//! Stack unwinding: OS frame walk, recursion folding, symbolization and
//! bounded disassembly.
//!
//! The OS walk and the symbol queries only exist on Windows; the folding
//! algorithm and the disassembly step are pure and shared with replay and
//! the test suite.

use crate::types::Address;

/// One raw frame as reported by the OS stack walker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame
{
    /// Program counter of the frame.
    pub pc: Address,
    /// Return address the frame will resume at.
    pub ret: Address,
}

/// Output slot of the folding pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSlot
{
    /// An ordinary frame to be symbolized and emitted.
    Normal(RawFrame),
    /// An elided run of direct self-recursion.
    ///
    /// `tail` is the *last* backlogged frame; its program counter is the one
    /// retained on the synthetic frame.
    Recursion
    {
        /// Number of elided frames.
        count: u64,
        /// The final frame of the elided run.
        tail: RawFrame,
    },
}

/// Fold runs of direct self-recursion.
///
/// A frame whose program counter equals its own return address is backlogged
/// rather than emitted. The first non-recursive frame flushes the backlog:
/// a backlog of at least `max_recursion` frames collapses into a single
/// [`FrameSlot::Recursion`] carrying the tail frame, a shorter backlog is
/// emitted verbatim. A policy of 0 or `u64::MAX` disables folding entirely.
#[must_use]
pub fn fold_frames(frames: impl IntoIterator<Item = RawFrame>, max_recursion: u64) -> Vec<FrameSlot>
{
    let folding = max_recursion != 0 && max_recursion != u64::MAX;

    let mut out = Vec::new();
    let mut backlog: Vec<RawFrame> = Vec::new();

    let mut flush = |out: &mut Vec<FrameSlot>, backlog: &mut Vec<RawFrame>| {
        if backlog.is_empty() {
            return;
        }
        if backlog.len() as u64 >= max_recursion {
            out.push(FrameSlot::Recursion {
                count: backlog.len() as u64,
                tail: *backlog.last().expect("non-empty backlog"),
            });
        } else {
            out.extend(backlog.iter().copied().map(FrameSlot::Normal));
        }
        backlog.clear();
    };

    for frame in frames {
        if folding {
            if frame.pc == frame.ret {
                backlog.push(frame);
                continue;
            }
            flush(&mut out, &mut backlog);
        }
        out.push(FrameSlot::Normal(frame));
    }
    flush(&mut out, &mut backlog);

    out
}

/// Produces an ordered frame list from a thread snapshot.
///
/// The two policy fields are copied onto every produced
/// [`crate::types::StackTrace`] so that a journal replay reproduces the
/// same folding and disassembly breadth.
#[derive(Debug, Clone, Default)]
pub struct StackUnwinder
{
    max_recursion: u64,
    max_instructions: u64,
    symbol_search_path: Option<String>,
}

impl StackUnwinder
{
    /// Create an unwinder with the given policies.
    ///
    /// `max_recursion` of 0 or `u64::MAX` disables folding;
    /// `max_instructions` of 0 disables disassembly.
    #[must_use]
    pub fn new(max_recursion: u64, max_instructions: u64) -> Self
    {
        Self {
            max_recursion,
            max_instructions,
            symbol_search_path: None,
        }
    }

    /// Set the `;`-separated extra search path handed to the symbol engine.
    #[must_use]
    pub fn with_symbol_search_path(mut self, path: Option<String>) -> Self
    {
        self.symbol_search_path = path;
        self
    }

    /// The folding policy in force.
    #[must_use]
    pub fn max_recursion(&self) -> u64
    {
        self.max_recursion
    }

    /// The disassembly policy in force.
    #[must_use]
    pub fn max_instructions(&self) -> u64
    {
        self.max_instructions
    }

    /// Walk, fold, symbolize and disassemble one thread's stack.
    ///
    /// The symbol engine is initialized for the duration of this one unwind
    /// and released before returning. Symbolization failure is never fatal:
    /// affected frames simply lack names and line records.
    #[cfg(windows)]
    #[must_use]
    pub fn capture(
        &self,
        snapshot: &crate::types::ThreadSnapshot,
        modules: &crate::types::ModuleRegistry,
    ) -> crate::types::StackTrace
    {
        use crate::platform::windows::dbghelp::SymbolSession;
        use crate::platform::windows::{walk_stack, ProcessMemory};
        use crate::types::{StackFrame, StackTrace, TargetMemory};

        let mut trace = StackTrace {
            max_recursion: self.max_recursion,
            max_instructions: self.max_instructions,
            frames: Vec::new(),
        };

        let session = match SymbolSession::initialize(snapshot.process_handle(), self.symbol_search_path.as_deref())
        {
            Ok(session) => Some(session),
            Err(error) => {
                tracing::warn!("symbol engine unavailable for this unwind: {error}");
                None
            }
        };

        let raw = walk_stack(snapshot);
        let memory = ProcessMemory::new(snapshot.process_handle());

        for slot in fold_frames(raw, self.max_recursion) {
            match slot {
                FrameSlot::Recursion { count, tail } => {
                    trace.frames.push(StackFrame {
                        program_counter: tail.pc,
                        recursion: true,
                        recursion_count: count,
                        ..StackFrame::default()
                    });
                }
                FrameSlot::Normal(frame) => {
                    let mut entry = StackFrame {
                        program_counter: frame.pc,
                        ..StackFrame::default()
                    };

                    let mut symbol_size = 0u64;
                    if let Some(session) = &session {
                        if let Some(symbol) = session.symbol_at(frame.pc) {
                            entry.absolute_pc = frame.pc + symbol.displacement;
                            entry.symbol_name = (!symbol.name.is_empty()).then_some(symbol.name);
                            entry.module_base = Address::new(symbol.module_base);
                            symbol_size = symbol.size;

                            entry.module = modules.module_at(frame.pc).cloned();
                            if symbol.module_base == 0 {
                                if let Some(module) = &entry.module {
                                    entry.module_base = module.base;
                                }
                            }
                        } else {
                            entry.module = modules.module_at(frame.pc).cloned();
                            if let Some(module) = &entry.module {
                                entry.module_base = module.base;
                            }
                        }

                        if let Some(line) = session.line_at(frame.pc) {
                            entry.absolute_line_addr = frame.pc + line.displacement;
                            entry.line_addr = Address::new(line.address);
                            entry.source_file = Some(line.file);
                            entry.source_line = line.line;
                        }
                    } else {
                        entry.module = modules.module_at(frame.pc).cloned();
                        if let Some(module) = &entry.module {
                            entry.module_base = module.base;
                        }
                    }

                    if self.max_instructions > 0 {
                        let want = if symbol_size != 0 { symbol_size as usize } else { 30 };
                        let mut code = vec![0u8; want];
                        if let Ok(read) = memory.read(frame.pc, &mut code) {
                            entry.instructions = crate::disasm::decode_instructions(
                                &code[..read],
                                frame.pc.value(),
                                snapshot.is_native_64(),
                                self.max_instructions as usize,
                            );
                        }
                    }

                    trace.frames.push(entry);
                }
            }
        }

        trace
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn normal(pc: u64) -> RawFrame
    {
        RawFrame {
            pc: Address::new(pc),
            ret: Address::new(pc + 0x100),
        }
    }

    fn recursive(pc: u64) -> RawFrame
    {
        RawFrame {
            pc: Address::new(pc),
            ret: Address::new(pc),
        }
    }

    #[test]
    fn test_no_folding_passes_through()
    {
        let frames = vec![normal(0x1000), normal(0x2000)];
        let folded = fold_frames(frames.clone(), 10);
        assert_eq!(folded.len(), 2);
        assert_eq!(folded[0], FrameSlot::Normal(frames[0]));
    }

    #[test]
    fn test_short_backlog_is_emitted_verbatim()
    {
        // K = 3 < M = 10: all three recursive frames come through as normal.
        let frames = vec![recursive(0x1000), recursive(0x1000), recursive(0x1000), normal(0x2000)];
        let folded = fold_frames(frames, 10);
        assert_eq!(folded.len(), 4);
        assert!(folded.iter().take(3).all(|slot| matches!(slot, FrameSlot::Normal(_))));
    }

    #[test]
    fn test_long_backlog_collapses_with_tail_pc()
    {
        // K = 12 >= M = 10: one synthetic slot carrying the last backlogged
        // frame, then the flush frame.
        let mut frames: Vec<RawFrame> = (0..12).map(|i| recursive(0x1000 + i)).collect();
        frames.push(normal(0x9000));

        let folded = fold_frames(frames, 10);
        assert_eq!(folded.len(), 2);
        assert_eq!(
            folded[0],
            FrameSlot::Recursion {
                count: 12,
                tail: recursive(0x1000 + 11),
            }
        );
        assert_eq!(folded[1], FrameSlot::Normal(normal(0x9000)));
    }

    #[test]
    fn test_exact_threshold_collapses()
    {
        let mut frames: Vec<RawFrame> = (0..10).map(|_| recursive(0x1000)).collect();
        frames.push(normal(0x9000));

        let folded = fold_frames(frames, 10);
        assert_eq!(folded.len(), 2);
        assert!(matches!(folded[0], FrameSlot::Recursion { count: 10, .. }));
    }

    #[test]
    fn test_policy_zero_and_max_disable_folding()
    {
        let frames: Vec<RawFrame> = (0..5).map(|_| recursive(0x1000)).collect();

        for policy in [0, u64::MAX] {
            let folded = fold_frames(frames.clone(), policy);
            assert_eq!(folded.len(), 5);
            assert!(folded.iter().all(|slot| matches!(slot, FrameSlot::Normal(_))));
        }
    }

    #[test]
    fn test_two_separate_recursion_runs()
    {
        let mut frames: Vec<RawFrame> = (0..4).map(|_| recursive(0x1000)).collect();
        frames.push(normal(0x2000));
        frames.extend((0..3).map(|_| recursive(0x3000)));
        frames.push(normal(0x4000));

        let folded = fold_frames(frames, 3);
        assert_eq!(folded.len(), 4);
        assert!(matches!(folded[0], FrameSlot::Recursion { count: 4, .. }));
        assert!(matches!(folded[1], FrameSlot::Normal(_)));
        assert!(matches!(folded[2], FrameSlot::Recursion { count: 3, .. }));
        assert!(matches!(folded[3], FrameSlot::Normal(_)));
    }

    #[test]
    fn test_trailing_backlog_still_flushes()
    {
        let frames: Vec<RawFrame> = (0..6).map(|_| recursive(0x1000)).collect();
        let folded = fold_frames(frames, 4);
        assert_eq!(folded.len(), 1);
        assert!(matches!(folded[0], FrameSlot::Recursion { count: 6, .. }));
    }

    #[test]
    fn test_policies_travel_on_unwinder()
    {
        let unwinder = StackUnwinder::new(10, 5).with_symbol_search_path(Some("C:\\pdbs".into()));
        assert_eq!(unwinder.max_recursion(), 10);
        assert_eq!(unwinder.max_instructions(), 5);
    }
}
