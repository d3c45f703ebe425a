//! Instruction decoding for stack-frame enrichment.
//!
//! Wraps the `iced-x86` decoder. Decoding never touches the target: the
//! caller reads the bytes (a short read yields a partial list, which is not
//! an error) and this module turns whatever arrived into at most
//! `max_instructions` entries.

use iced_x86::{Decoder, DecoderOptions, Formatter, FormatMnemonicOptions, NasmFormatter};

use crate::types::DecodedInstruction;

/// Decode up to `max_instructions` instructions from `code`.
///
/// `ip` is the address of `code[0]` in the target; `is_64_bit` selects the
/// decoder width and is recorded on every entry. Decoding stops at the first
/// invalid byte sequence, at the end of the buffer, or at the cap, whichever
/// comes first.
#[must_use]
pub fn decode_instructions(code: &[u8], ip: u64, is_64_bit: bool, max_instructions: usize) -> Vec<DecodedInstruction>
{
    if code.is_empty() || max_instructions == 0 {
        return Vec::new();
    }

    let bitness = if is_64_bit { 64 } else { 32 };
    let mut decoder = Decoder::with_ip(bitness, code, ip, DecoderOptions::NONE);
    let mut formatter = NasmFormatter::new();

    let mut out = Vec::new();
    while decoder.can_decode() && out.len() < max_instructions {
        let instruction = decoder.decode();
        if instruction.is_invalid() {
            break;
        }

        let start = (instruction.ip() - ip) as usize;
        let bytes = &code[start..start + instruction.len()];

        let mut mnemonic = String::new();
        formatter.format_mnemonic_options(&instruction, &mut mnemonic, FormatMnemonicOptions::NONE);

        let mut operands = String::new();
        formatter.format_all_operands(&instruction, &mut operands);

        out.push(DecodedInstruction {
            is_64_bit_addressing: is_64_bit,
            offset: instruction.ip(),
            size: instruction.len() as u64,
            hex_bytes: hex(bytes),
            mnemonic,
            operands,
        });
    }

    out
}

fn hex(bytes: &[u8]) -> String
{
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests
{
    use super::*;

    // mov rax, 1; xor ecx, ecx; ret
    const CODE64: &[u8] = &[0x48, 0xC7, 0xC0, 0x01, 0x00, 0x00, 0x00, 0x31, 0xC9, 0xC3];

    #[test]
    fn test_decode_respects_cap()
    {
        let instructions = decode_instructions(CODE64, 0x1000, true, 2);
        assert_eq!(instructions.len(), 2);
    }

    #[test]
    fn test_offsets_monotonic_and_sized()
    {
        let instructions = decode_instructions(CODE64, 0x1000, true, 16);
        assert_eq!(instructions.len(), 3);

        let mut previous = 0;
        for instruction in &instructions {
            assert!(instruction.offset >= previous);
            assert!(instruction.size > 0);
            assert!(instruction.is_64_bit_addressing);
            previous = instruction.offset + instruction.size;
        }

        assert_eq!(instructions[0].offset, 0x1000);
        assert_eq!(instructions[0].hex_bytes, "48c7c001000000");
        assert_eq!(instructions[2].mnemonic, "ret");
    }

    #[test]
    fn test_truncated_buffer_yields_partial_list()
    {
        // cut inside the first instruction's immediate
        let instructions = decode_instructions(&CODE64[..4], 0x1000, true, 16);
        assert!(instructions.len() <= 1);
    }

    #[test]
    fn test_empty_input()
    {
        assert!(decode_instructions(&[], 0x1000, true, 4).is_empty());
        assert!(decode_instructions(CODE64, 0x1000, true, 0).is_empty());
    }

    #[test]
    fn test_32_bit_decoding()
    {
        // mov eax, 1; ret
        let code32 = [0xB8, 0x01, 0x00, 0x00, 0x00, 0xC3];
        let instructions = decode_instructions(&code32, 0x40_1000, false, 8);
        assert_eq!(instructions.len(), 2);
        assert!(!instructions[0].is_64_bit_addressing);
        assert_eq!(instructions[1].mnemonic, "ret");
    }
}
