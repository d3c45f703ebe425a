//! Language-runtime exception decoding.
//!
//! When the target faults with the MSVC++ EH throw code, the exception
//! parameters point at compiler-emitted throw metadata inside the target:
//! a `ThrowInfo` leading to an array of catchable types, each with a type
//! descriptor carrying the decorated class name. This module walks that
//! chain through the target's memory and recovers the set of types a
//! matching `catch` clause could bind to, the `what()` string when the
//! thrown object derives from `std::exception`, and the path of the image
//! that defined the throw metadata.
//!
//! The walk is identical for both target widths except for how metadata
//! pointers are materialized: 64-bit targets store image-relative 32-bit
//! offsets resolved against a throw image base carried in the parameters,
//! 32-bit targets store absolute 32-bit addresses.
//!
//! Any read failure at any step aborts the walk silently, preserving the
//! names captured so far. The decoder never fails an event.

use crate::events::code::EH_EXCEPTION;
use crate::types::{Address, ExceptionRecordData, ModuleRegistry, TargetMemory};

/// The EH magic constant expected in the first exception parameter.
pub const EH_MAGIC: u64 = 0x1993_0520;

/// Demangled substring that marks a type chain as `std::exception`-derived.
const STD_EXCEPTION: &str = "std::exception";

/// Cap on a single decorated type name read from the target.
const MAX_TYPE_NAME: usize = 1024;
/// Cap on the `what()` string read from the target.
const MAX_WHAT: usize = 1024;

/// `ThrowInfo.pCatchableTypeArray` offset.
const THROW_INFO_TYPE_ARRAY: u64 = 12;
/// `CatchableType.pType` offset.
const CATCHABLE_TYPE_DESCRIPTOR: u64 = 4;
/// Offset of the decorated name inside a 64-bit type descriptor
/// (vftable pointer + spare pointer).
const DESCRIPTOR_NAME_64: u64 = 16;
/// Offset of the decorated name inside a 32-bit type descriptor
/// (hash + spare).
const DESCRIPTOR_NAME_32: u64 = 8;

/// Recovered throw information, attached to exception events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RttiInfo
{
    /// Demangled class signatures of every catchable type, base-most last.
    pub catchable_type_names: Vec<String>,
    /// The `what()` string, when the thrown object derives from
    /// `std::exception` and the string was readable.
    pub message: Option<String>,
    /// Path of the image that defined the throw metadata.
    pub throw_module_path: Option<String>,
}

impl RttiInfo
{
    /// True when the walk produced nothing worth attaching.
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.catchable_type_names.is_empty() && self.message.is_none() && self.throw_module_path.is_none()
    }
}

/// Walks the target's throw metadata for one exception record.
///
/// The demangler is injected: live sessions pass the host's undecorator,
/// tests pass a pure stand-in. A name the demangler rejects is kept in its
/// decorated form rather than dropped.
pub struct RttiDecoder<'a>
{
    memory: &'a dyn TargetMemory,
    modules: &'a ModuleRegistry,
    demangle: &'a dyn Fn(&str) -> Option<String>,
}

impl<'a> RttiDecoder<'a>
{
    pub fn new(
        memory: &'a dyn TargetMemory,
        modules: &'a ModuleRegistry,
        demangle: &'a dyn Fn(&str) -> Option<String>,
    ) -> Self
    {
        Self {
            memory,
            modules,
            demangle,
        }
    }

    /// Decode the throw metadata behind `record`, if it is an EH throw.
    ///
    /// Applies only when the exception code is the EH code *and* the first
    /// parameter carries the EH magic; anything else yields `None`.
    /// `is_64_bit` must reflect the target's pointer width.
    #[must_use]
    pub fn decode(&self, record: &ExceptionRecordData, is_64_bit: bool) -> Option<RttiInfo>
    {
        if record.code != EH_EXCEPTION {
            return None;
        }
        if record.parameters.first().copied() != Some(EH_MAGIC) {
            return None;
        }

        let mut info = RttiInfo::default();
        if is_64_bit {
            self.walk_64(record, &mut info);
        } else {
            self.walk_32(record, &mut info);
        }

        if info.is_empty() {
            None
        } else {
            Some(info)
        }
    }

    /// 64-bit walk: metadata pointers are RVAs against the throw image base
    /// carried as the fourth exception parameter.
    fn walk_64(&self, record: &ExceptionRecordData, info: &mut RttiInfo)
    {
        let exception_object = Address::new(*record.parameters.get(1).unwrap_or(&0));
        let throw_info = Address::new(*record.parameters.get(2).unwrap_or(&0));
        let image_base = *record.parameters.get(3).unwrap_or(&0);

        if let Some(module) = self.modules.module_at(throw_info) {
            info.throw_module_path = Some(module.path.clone());
        }
        if throw_info == Address::ZERO {
            return;
        }

        let resolve = |rva: u32| -> Option<Address> {
            if rva == 0 {
                None
            } else {
                Some(Address::new(image_base.wrapping_add(u64::from(rva))))
            }
        };

        let complete = self.walk_type_array(throw_info, DESCRIPTOR_NAME_64, &resolve, info);
        if complete && chain_is_std_exception(info) {
            info.message = self.read_what(exception_object + 8, true);
        }
    }

    /// 32-bit walk: metadata pointers are absolute 32-bit addresses.
    fn walk_32(&self, record: &ExceptionRecordData, info: &mut RttiInfo)
    {
        let exception_object = Address::new(*record.parameters.get(1).unwrap_or(&0));
        let throw_info = Address::new(*record.parameters.get(2).unwrap_or(&0));

        if let Some(module) = self.modules.module_at(throw_info) {
            info.throw_module_path = Some(module.path.clone());
        }
        if throw_info == Address::ZERO {
            return;
        }

        let resolve = |va: u32| -> Option<Address> {
            if va == 0 {
                None
            } else {
                Some(Address::new(u64::from(va)))
            }
        };

        let complete = self.walk_type_array(throw_info, DESCRIPTOR_NAME_32, &resolve, info);
        if complete && chain_is_std_exception(info) {
            info.message = self.read_what(exception_object + 4, false);
        }
    }

    /// Shared chain walk. Returns true when every slot was processed; a
    /// short walk keeps whatever names accumulated but suppresses the
    /// `what()` probe.
    fn walk_type_array(
        &self,
        throw_info: Address,
        descriptor_name_offset: u64,
        resolve: &dyn Fn(u32) -> Option<Address>,
        info: &mut RttiInfo,
    ) -> bool
    {
        let Ok(array_field) = self.memory.read_u32(throw_info + THROW_INFO_TYPE_ARRAY) else {
            return false;
        };
        let Some(type_array) = resolve(array_field) else {
            return false;
        };

        let Ok(count) = self.memory.read_u32(type_array) else {
            return false;
        };

        for slot in 0..u64::from(count) {
            let Ok(slot_value) = self.memory.read_u32(type_array + 4 + slot * 4) else {
                return false;
            };
            let Some(catchable_type) = resolve(slot_value) else {
                return false;
            };

            let Ok(descriptor_field) = self.memory.read_u32(catchable_type + CATCHABLE_TYPE_DESCRIPTOR) else {
                return false;
            };
            let Some(descriptor) = resolve(descriptor_field) else {
                return false;
            };

            let Ok(raw_name) = self
                .memory
                .read_nul_terminated(descriptor + descriptor_name_offset, MAX_TYPE_NAME)
            else {
                return false;
            };
            if raw_name.is_empty() {
                return false;
            }

            let decorated = String::from_utf8_lossy(&raw_name).into_owned();
            let signature = (self.demangle)(&decorated).unwrap_or(decorated);
            info.catchable_type_names.push(signature);
        }

        true
    }

    /// Read the `what()` string through the thrown object's vtable slot.
    fn read_what(&self, pointer_slot: Address, is_64_bit: bool) -> Option<String>
    {
        let what = if is_64_bit {
            self.memory.read_u64(pointer_slot).ok()?
        } else {
            u64::from(self.memory.read_u32(pointer_slot).ok()?)
        };
        if what == 0 {
            return None;
        }

        let bytes = self.memory.read_nul_terminated(Address::new(what), MAX_WHAT).ok()?;
        if bytes.is_empty() {
            return None;
        }
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn chain_is_std_exception(info: &RttiInfo) -> bool
{
    info.catchable_type_names.iter().any(|name| name.contains(STD_EXCEPTION))
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::error::{HindcastError, HindcastResult};
    use std::collections::BTreeMap;

    /// Sparse fake target assembled from labelled spans.
    #[derive(Default)]
    struct FakeTarget
    {
        spans: BTreeMap<u64, Vec<u8>>,
    }

    impl FakeTarget
    {
        fn put(&mut self, address: u64, bytes: &[u8])
        {
            self.spans.insert(address, bytes.to_vec());
        }

        fn put_u32(&mut self, address: u64, value: u32)
        {
            self.put(address, &value.to_le_bytes());
        }

        fn put_u64(&mut self, address: u64, value: u64)
        {
            self.put(address, &value.to_le_bytes());
        }
    }

    impl TargetMemory for FakeTarget
    {
        fn read(&self, address: Address, buffer: &mut [u8]) -> HindcastResult<usize>
        {
            let addr = address.value();
            for (&base, bytes) in &self.spans {
                let end = base + bytes.len() as u64;
                if addr >= base && addr < end {
                    let offset = (addr - base) as usize;
                    let take = buffer.len().min(bytes.len() - offset);
                    buffer[..take].copy_from_slice(&bytes[offset..offset + take]);
                    return Ok(take);
                }
            }
            Err(HindcastError::RemoteRead(299))
        }
    }

    const IMAGE_BASE: u64 = 0x7FF6_0000_0000;
    const OBJECT: u64 = 0x2000_0000;
    const WHAT_TEXT: u64 = 0x2000_1000;

    /// Lay out a 64-bit throw chain for two catchable types.
    fn build_throw_chain(target: &mut FakeTarget) -> ExceptionRecordData
    {
        let throw_info = IMAGE_BASE + 0x100;
        let type_array_rva = 0x200u32;
        let catchable_a_rva = 0x300u32;
        let catchable_b_rva = 0x340u32;
        let descriptor_a_rva = 0x400u32;
        let descriptor_b_rva = 0x500u32;

        target.put_u32(throw_info + THROW_INFO_TYPE_ARRAY, type_array_rva);

        let type_array = IMAGE_BASE + u64::from(type_array_rva);
        target.put_u32(type_array, 2);
        target.put_u32(type_array + 4, catchable_a_rva);
        target.put_u32(type_array + 8, catchable_b_rva);

        target.put_u32(IMAGE_BASE + u64::from(catchable_a_rva) + CATCHABLE_TYPE_DESCRIPTOR, descriptor_a_rva);
        target.put_u32(IMAGE_BASE + u64::from(catchable_b_rva) + CATCHABLE_TYPE_DESCRIPTOR, descriptor_b_rva);

        target.put(
            IMAGE_BASE + u64::from(descriptor_a_rva) + DESCRIPTOR_NAME_64,
            b".?AVruntime_error@std@@\0",
        );
        target.put(
            IMAGE_BASE + u64::from(descriptor_b_rva) + DESCRIPTOR_NAME_64,
            b".?AVexception@std@@\0",
        );

        target.put_u64(OBJECT + 8, WHAT_TEXT);
        target.put(WHAT_TEXT, b"boom\0");

        ExceptionRecordData {
            code: EH_EXCEPTION,
            address: Address::new(IMAGE_BASE + 0x1234),
            parameters: vec![EH_MAGIC, OBJECT, throw_info, IMAGE_BASE],
        }
    }

    fn msvc_like_demangle(decorated: &str) -> Option<String>
    {
        let inner = decorated.strip_prefix(".?AV")?.strip_suffix("@@")?;
        let mut parts: Vec<&str> = inner.split('@').collect();
        parts.reverse();
        Some(format!("class {}", parts.join("::")))
    }

    #[test]
    fn test_decode_full_chain()
    {
        let mut target = FakeTarget::default();
        let record = build_throw_chain(&mut target);

        let mut modules = ModuleRegistry::new();
        modules.on_load("C:\\app\\thrower.exe", Address::new(IMAGE_BASE), 0x10_0000);

        let decoder = RttiDecoder::new(&target, &modules, &msvc_like_demangle);
        let info = decoder.decode(&record, true).expect("chain should decode");

        assert_eq!(
            info.catchable_type_names,
            vec!["class std::runtime_error", "class std::exception"]
        );
        assert_eq!(info.message.as_deref(), Some("boom"));
        assert_eq!(info.throw_module_path.as_deref(), Some("C:\\app\\thrower.exe"));
    }

    #[test]
    fn test_wrong_code_or_magic_is_inert()
    {
        let mut target = FakeTarget::default();
        let mut record = build_throw_chain(&mut target);
        let modules = ModuleRegistry::new();
        let decoder = RttiDecoder::new(&target, &modules, &msvc_like_demangle);

        record.code = 0xC000_0005;
        assert!(decoder.decode(&record, true).is_none());

        record.code = EH_EXCEPTION;
        record.parameters[0] = 0x1993_0521;
        assert!(decoder.decode(&record, true).is_none());
    }

    #[test]
    fn test_read_failure_keeps_partial_names()
    {
        let mut target = FakeTarget::default();
        let record = build_throw_chain(&mut target);

        // Remove the second descriptor's name so the walk dies mid-chain.
        target.spans.remove(&(IMAGE_BASE + 0x500 + DESCRIPTOR_NAME_64));

        let modules = ModuleRegistry::new();
        let decoder = RttiDecoder::new(&target, &modules, &msvc_like_demangle);
        let info = decoder.decode(&record, true).expect("partial result expected");

        assert_eq!(info.catchable_type_names, vec!["class std::runtime_error"]);
        // The incomplete walk must not attempt the what() probe.
        assert_eq!(info.message, None);
    }

    #[test]
    fn test_no_message_without_std_exception_base()
    {
        let mut target = FakeTarget::default();
        let record = build_throw_chain(&mut target);

        // Overwrite both names with a custom, non-std type.
        target.put(IMAGE_BASE + 0x400 + DESCRIPTOR_NAME_64, b".?AVwidget_error@app@@\0");
        target.put(IMAGE_BASE + 0x500 + DESCRIPTOR_NAME_64, b".?AVwidget_base@app@@\0");

        let modules = ModuleRegistry::new();
        let decoder = RttiDecoder::new(&target, &modules, &msvc_like_demangle);
        let info = decoder.decode(&record, true).unwrap();

        assert_eq!(info.catchable_type_names.len(), 2);
        assert_eq!(info.message, None);
    }
}
