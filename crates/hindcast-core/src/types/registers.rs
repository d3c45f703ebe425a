//! CPU register files in the two target widths.
//!
//! These are crate-defined plain structs rather than the OS context blobs:
//! the journal stores them field by field in a fixed little-endian layout, so
//! a recording taken on one host replays bit-identically on any other.

/// Register file of a native 64-bit thread.
///
/// Serialized as 18 consecutive little-endian `u64` values in field order:
/// `rip, rsp, rbp, rax, rbx, rcx, rdx, rsi, rdi, r8..r15, rflags`
/// (144 bytes).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct X64RegisterFile
{
    pub rip: u64,
    pub rsp: u64,
    pub rbp: u64,
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rflags: u64,
}

impl X64RegisterFile
{
    /// Size of the serialized form in bytes.
    pub const WIRE_SIZE: usize = 18 * 8;

    /// Registers in display order as `(name, value)` pairs.
    #[must_use]
    pub fn named(&self) -> [(&'static str, u64); 17]
    {
        [
            ("RIP", self.rip),
            ("RSP", self.rsp),
            ("RBP", self.rbp),
            ("RAX", self.rax),
            ("RBX", self.rbx),
            ("RCX", self.rcx),
            ("RDX", self.rdx),
            ("RSI", self.rsi),
            ("RDI", self.rdi),
            ("R8", self.r8),
            ("R9", self.r9),
            ("R10", self.r10),
            ("R11", self.r11),
            ("R12", self.r12),
            ("R13", self.r13),
            ("R14", self.r14),
            ("R15", self.r15),
        ]
    }

    /// Serialize in the fixed wire order.
    #[must_use]
    pub fn to_wire(&self) -> Vec<u8>
    {
        let fields = [
            self.rip, self.rsp, self.rbp, self.rax, self.rbx, self.rcx, self.rdx, self.rsi,
            self.rdi, self.r8, self.r9, self.r10, self.r11, self.r12, self.r13, self.r14,
            self.r15, self.rflags,
        ];
        let mut out = Vec::with_capacity(Self::WIRE_SIZE);
        for field in fields {
            out.extend_from_slice(&field.to_le_bytes());
        }
        out
    }

    /// Deserialize from the fixed wire order.
    ///
    /// `bytes` must be exactly [`X64RegisterFile::WIRE_SIZE`] long.
    #[must_use]
    pub fn from_wire(bytes: &[u8]) -> Option<Self>
    {
        if bytes.len() != Self::WIRE_SIZE {
            return None;
        }
        let mut fields = [0u64; 18];
        for (i, field) in fields.iter_mut().enumerate() {
            *field = u64::from_le_bytes(bytes[i * 8..i * 8 + 8].try_into().ok()?);
        }
        Some(Self {
            rip: fields[0],
            rsp: fields[1],
            rbp: fields[2],
            rax: fields[3],
            rbx: fields[4],
            rcx: fields[5],
            rdx: fields[6],
            rsi: fields[7],
            rdi: fields[8],
            r8: fields[9],
            r9: fields[10],
            r10: fields[11],
            r11: fields[12],
            r12: fields[13],
            r13: fields[14],
            r14: fields[15],
            r15: fields[16],
            rflags: fields[17],
        })
    }
}

/// Register file of a 32-bit thread running under WOW64.
///
/// Serialized as 10 consecutive little-endian `u32` values in field order:
/// `eip, esp, ebp, eax, ebx, ecx, edx, esi, edi, eflags` (40 bytes).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Wow64RegisterFile
{
    pub eip: u32,
    pub esp: u32,
    pub ebp: u32,
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub eflags: u32,
}

impl Wow64RegisterFile
{
    /// Size of the serialized form in bytes.
    pub const WIRE_SIZE: usize = 10 * 4;

    /// Registers in display order as `(name, value)` pairs.
    #[must_use]
    pub fn named(&self) -> [(&'static str, u64); 9]
    {
        [
            ("EIP", u64::from(self.eip)),
            ("ESP", u64::from(self.esp)),
            ("EBP", u64::from(self.ebp)),
            ("EAX", u64::from(self.eax)),
            ("EBX", u64::from(self.ebx)),
            ("ECX", u64::from(self.ecx)),
            ("EDX", u64::from(self.edx)),
            ("ESI", u64::from(self.esi)),
            ("EDI", u64::from(self.edi)),
        ]
    }

    /// Serialize in the fixed wire order.
    #[must_use]
    pub fn to_wire(&self) -> Vec<u8>
    {
        let fields = [
            self.eip, self.esp, self.ebp, self.eax, self.ebx, self.ecx, self.edx, self.esi,
            self.edi, self.eflags,
        ];
        let mut out = Vec::with_capacity(Self::WIRE_SIZE);
        for field in fields {
            out.extend_from_slice(&field.to_le_bytes());
        }
        out
    }

    /// Deserialize from the fixed wire order.
    #[must_use]
    pub fn from_wire(bytes: &[u8]) -> Option<Self>
    {
        if bytes.len() != Self::WIRE_SIZE {
            return None;
        }
        let mut fields = [0u32; 10];
        for (i, field) in fields.iter_mut().enumerate() {
            *field = u32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().ok()?);
        }
        Some(Self {
            eip: fields[0],
            esp: fields[1],
            ebp: fields[2],
            eax: fields[3],
            ebx: fields[4],
            ecx: fields[5],
            edx: fields[6],
            esi: fields[7],
            edi: fields[8],
            eflags: fields[9],
        })
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_x64_wire_round_trip()
    {
        let mut file = X64RegisterFile::default();
        file.rip = 0x0000_7FF6_1234_5678;
        file.rsp = 0x0000_00A1_0000_FF00;
        file.r15 = 0xDEAD_BEEF_CAFE_F00D;
        file.rflags = 0x246;

        let wire = file.to_wire();
        assert_eq!(wire.len(), X64RegisterFile::WIRE_SIZE);
        assert_eq!(X64RegisterFile::from_wire(&wire), Some(file));
    }

    #[test]
    fn test_wow64_wire_round_trip()
    {
        let mut file = Wow64RegisterFile::default();
        file.eip = 0x0040_1000;
        file.esp = 0x0018_FF88;
        file.eflags = 0x202;

        let wire = file.to_wire();
        assert_eq!(wire.len(), Wow64RegisterFile::WIRE_SIZE);
        assert_eq!(Wow64RegisterFile::from_wire(&wire), Some(file));
    }

    #[test]
    fn test_wire_rejects_wrong_length()
    {
        assert!(X64RegisterFile::from_wire(&[0u8; 10]).is_none());
        assert!(Wow64RegisterFile::from_wire(&[0u8; 39]).is_none());
    }
}
