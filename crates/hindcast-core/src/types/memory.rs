//! Read-only access to the target's address space.

use crate::error::{HindcastError, HindcastResult};
use super::Address;

/// Minimal memory accessor required by the registry, unwinder and RTTI
/// decoder.
///
/// The live implementation wraps `ReadProcessMemory` on a process handle;
/// tests substitute an in-memory fake. All reads observe a stable image:
/// between event receipt and the continue call the target is frozen by the
/// OS.
///
/// Only [`TargetMemory::read`] must be provided; the remaining helpers have
/// default implementations on top of it.
pub trait TargetMemory
{
    /// Read up to `buffer.len()` bytes at `address`.
    ///
    /// Returns the number of bytes actually read, which may be short when
    /// the range crosses into an unmapped page. A completely failed read
    /// yields [`HindcastError::RemoteRead`].
    fn read(&self, address: Address, buffer: &mut [u8]) -> HindcastResult<usize>;

    /// Read exactly `buffer.len()` bytes or fail.
    fn read_exact(&self, address: Address, buffer: &mut [u8]) -> HindcastResult<()>
    {
        let read = self.read(address, buffer)?;
        if read != buffer.len() {
            return Err(HindcastError::RemoteRead(0));
        }
        Ok(())
    }

    /// Read a little-endian `u16`.
    fn read_u16(&self, address: Address) -> HindcastResult<u16>
    {
        let mut buffer = [0u8; 2];
        self.read_exact(address, &mut buffer)?;
        Ok(u16::from_le_bytes(buffer))
    }

    /// Read a little-endian `u32`.
    fn read_u32(&self, address: Address) -> HindcastResult<u32>
    {
        let mut buffer = [0u8; 4];
        self.read_exact(address, &mut buffer)?;
        Ok(u32::from_le_bytes(buffer))
    }

    /// Read a little-endian `u64`.
    fn read_u64(&self, address: Address) -> HindcastResult<u64>
    {
        let mut buffer = [0u8; 8];
        self.read_exact(address, &mut buffer)?;
        Ok(u64::from_le_bytes(buffer))
    }

    /// Read a NUL-terminated byte string, scanning at most `maximum` bytes.
    ///
    /// The terminator is not included in the result. If no NUL appears
    /// within `maximum` bytes, the truncated prefix is returned.
    fn read_nul_terminated(&self, address: Address, maximum: usize) -> HindcastResult<Vec<u8>>
    {
        const CHUNK: usize = 128;

        let mut out = Vec::new();
        let mut cursor = address;

        while out.len() < maximum {
            let want = CHUNK.min(maximum - out.len());
            let mut buffer = vec![0u8; want];
            let read = self.read(cursor, &mut buffer)?;
            if read == 0 {
                break;
            }

            if let Some(nul) = buffer[..read].iter().position(|&b| b == 0) {
                out.extend_from_slice(&buffer[..nul]);
                return Ok(out);
            }

            out.extend_from_slice(&buffer[..read]);
            if read < want {
                break;
            }
            cursor = cursor + read as u64;
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use std::collections::BTreeMap;

    /// Sparse fake target built from (address, bytes) spans.
    struct FakeMemory
    {
        spans: BTreeMap<u64, Vec<u8>>,
    }

    impl TargetMemory for FakeMemory
    {
        fn read(&self, address: Address, buffer: &mut [u8]) -> HindcastResult<usize>
        {
            let addr = address.value();
            for (&base, bytes) in &self.spans {
                let end = base + bytes.len() as u64;
                if addr >= base && addr < end {
                    let offset = (addr - base) as usize;
                    let available = bytes.len() - offset;
                    let take = available.min(buffer.len());
                    buffer[..take].copy_from_slice(&bytes[offset..offset + take]);
                    return Ok(take);
                }
            }
            Err(HindcastError::RemoteRead(299))
        }
    }

    #[test]
    fn test_read_nul_terminated_stops_at_nul()
    {
        let memory = FakeMemory {
            spans: BTreeMap::from([(0x1000, b"boom\0garbage".to_vec())]),
        };
        let text = memory.read_nul_terminated(Address::new(0x1000), 64).unwrap();
        assert_eq!(text, b"boom");
    }

    #[test]
    fn test_read_nul_terminated_caps_at_maximum()
    {
        let memory = FakeMemory {
            spans: BTreeMap::from([(0x1000, b"aaaaaaaaaa".to_vec())]),
        };
        let text = memory.read_nul_terminated(Address::new(0x1000), 4).unwrap();
        assert_eq!(text, b"aaaa");
    }

    #[test]
    fn test_short_read_is_not_an_error()
    {
        let memory = FakeMemory {
            spans: BTreeMap::from([(0x1000, vec![1, 2, 3])]),
        };
        let mut buffer = [0u8; 8];
        let read = memory.read(Address::new(0x1001), &mut buffer).unwrap();
        assert_eq!(read, 2);
        assert_eq!(&buffer[..2], &[2, 3]);
    }
}
