//! Loaded-module tracking and address-to-image resolution.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::memory::TargetMemory;
use super::Address;

/// PE machine word for x86-64 images.
const IMAGE_FILE_MACHINE_AMD64: u16 = 0x8664;
/// PE machine word for x86 images.
const IMAGE_FILE_MACHINE_I386: u16 = 0x014C;

/// A mapped image (executable or shared library) in the target.
///
/// The interval `[base, base + size)` describes where the image is mapped.
/// `size` may be 0 when the image was only partially mapped at the time its
/// headers were probed; such a module never matches an address query, which
/// is the correct outcome for a mapping we could not measure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module
{
    /// Base address of the mapping.
    pub base: Address,
    /// Size of the image in memory (`SizeOfImage`), or 0 when unknown.
    pub size: u64,
    /// Full path of the image on disk.
    pub path: String,
}

impl Module
{
    /// Determine if `address` falls inside this mapping.
    #[must_use]
    pub fn contains(&self, address: Address) -> bool
    {
        address >= self.base && address.value() < self.base.value().wrapping_add(self.size)
    }
}

/// Tracks the load/unload lifecycle of every image in the target.
///
/// Three views are maintained:
///
/// - *history*: every image path in the order first seen. An image's index in
///   this list is its stable load index; it survives unload/reload and is the
///   value recorded in the journal.
/// - *active-by-base*: the currently loaded mappings, keyed by base address.
/// - *active-by-path*: the set of base addresses each path is currently
///   mapped at (an image may be mapped more than once).
///
/// Invariant: the intervals of currently active modules are pairwise
/// disjoint. The registry does not enforce this (the OS module list it
/// mirrors already guarantees it), but [`ModuleRegistry::module_at`] relies
/// on it to return a unique answer.
#[derive(Debug, Default)]
pub struct ModuleRegistry
{
    history: Vec<String>,
    index_by_path: HashMap<String, u64>,
    active_by_base: BTreeMap<u64, Module>,
    active_by_path: HashMap<String, BTreeSet<u64>>,
}

impl ModuleRegistry
{
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Record a module load with a known in-memory size.
    ///
    /// Appends `path` to the history iff it has not been seen before,
    /// activates the mapping (an already active base is left untouched) and
    /// returns the stable load index.
    pub fn on_load(&mut self, path: &str, base: Address, size: u64) -> u64
    {
        let index = match self.index_by_path.get(path) {
            Some(&index) => index,
            None => {
                let index = self.history.len() as u64;
                self.history.push(path.to_string());
                self.index_by_path.insert(path.to_string(), index);
                index
            }
        };

        self.active_by_base.entry(base.value()).or_insert_with(|| Module {
            base,
            size,
            path: path.to_string(),
        });
        self.active_by_path.entry(path.to_string()).or_default().insert(base.value());

        index
    }

    /// Record a module load whose size must be probed from the target.
    ///
    /// Reads the PE headers at `base` through `memory`; a failed probe (for
    /// instance on a partially-mapped image) degrades to size 0 rather than
    /// failing the load.
    pub fn on_load_probed(&mut self, path: &str, base: Address, memory: &dyn TargetMemory) -> u64
    {
        let size = probe_image_size(memory, base).unwrap_or(0);
        self.on_load(path, base, size)
    }

    /// Record a module unload. Only the active views change; history is
    /// never pruned.
    pub fn on_unload(&mut self, base: Address)
    {
        let Some(module) = self.active_by_base.remove(&base.value()) else {
            return;
        };

        if let Some(bases) = self.active_by_path.get_mut(&module.path) {
            bases.remove(&base.value());
            if bases.is_empty() {
                self.active_by_path.remove(&module.path);
            }
        }
    }

    /// Resolve `address` to the unique active module containing it.
    ///
    /// Linear scan; the active set is small (typically well under 200
    /// entries).
    #[must_use]
    pub fn module_at(&self, address: Address) -> Option<&Module>
    {
        self.active_by_base.values().find(|module| module.contains(address))
    }

    /// Path of the active module at `base`, if any.
    #[must_use]
    pub fn path_of(&self, base: Address) -> Option<&str>
    {
        self.active_by_base.get(&base.value()).map(|module| module.path.as_str())
    }

    /// All base addresses `path` is currently mapped at.
    #[must_use]
    pub fn bases_of(&self, path: &str) -> BTreeSet<Address>
    {
        self.active_by_path
            .get(path)
            .map(|bases| bases.iter().map(|&base| Address::new(base)).collect())
            .unwrap_or_default()
    }

    /// Stable load index of `path`, if it was ever seen.
    #[must_use]
    pub fn index_of(&self, path: &str) -> Option<u64>
    {
        self.index_by_path.get(path).copied()
    }

    /// Load index of the active module containing `address`, or -1.
    ///
    /// This is the signed form recorded in journal event records.
    #[must_use]
    pub fn index_at(&self, address: Address) -> i64
    {
        self.module_at(address)
            .and_then(|module| self.index_of(&module.path))
            .map_or(-1, |index| index as i64)
    }

    /// Every image path ever seen, in load order.
    #[must_use]
    pub fn history(&self) -> &[String]
    {
        &self.history
    }

    /// Iterate over the currently active modules, ordered by base address.
    pub fn active(&self) -> impl Iterator<Item = &Module>
    {
        self.active_by_base.values()
    }
}

/// Read `SizeOfImage` out of the target's PE headers at `base`.
///
/// The PE offset sits at image base + 0x3C; the machine word 4 bytes into
/// the NT headers selects 32/64-bit, and `SizeOfImage` sits at the same
/// offset into the optional header for both widths.
fn probe_image_size(memory: &dyn TargetMemory, base: Address) -> Option<u64>
{
    // IMAGE_NT_HEADERS layout: Signature (4) + IMAGE_FILE_HEADER (20) +
    // optional header; SizeOfImage is at optional-header offset 56.
    const SIZE_OF_IMAGE_OFFSET: u64 = 4 + 20 + 56;

    let pe_offset = memory.read_u32(base + 0x3C).ok()?;
    let nt_headers = base + u64::from(pe_offset);

    let machine = memory.read_u16(nt_headers + 4).ok()?;
    match machine {
        IMAGE_FILE_MACHINE_AMD64 | IMAGE_FILE_MACHINE_I386 => {
            memory.read_u32(nt_headers + SIZE_OF_IMAGE_OFFSET).ok().map(u64::from)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::error::{HindcastError, HindcastResult};

    #[test]
    fn test_history_index_is_stable_across_reload()
    {
        let mut registry = ModuleRegistry::new();

        let a = registry.on_load("C:\\app\\a.dll", Address::new(0x1000), 0x100);
        let b = registry.on_load("C:\\app\\b.dll", Address::new(0x2000), 0x100);
        assert_eq!((a, b), (0, 1));

        registry.on_unload(Address::new(0x1000));
        let a_again = registry.on_load("C:\\app\\a.dll", Address::new(0x9000), 0x100);
        assert_eq!(a_again, 0);
        assert_eq!(registry.history().len(), 2);
    }

    #[test]
    fn test_unload_only_touches_active_views()
    {
        let mut registry = ModuleRegistry::new();
        registry.on_load("x.dll", Address::new(0x1000), 0x100);
        registry.on_unload(Address::new(0x1000));

        assert!(registry.module_at(Address::new(0x1080)).is_none());
        assert_eq!(registry.index_of("x.dll"), Some(0));
        assert_eq!(registry.history(), ["x.dll"]);
    }

    #[test]
    fn test_module_at_respects_bounds()
    {
        let mut registry = ModuleRegistry::new();
        registry.on_load("x.dll", Address::new(0x1000), 0x100);

        assert!(registry.module_at(Address::new(0x0FFF)).is_none());
        assert_eq!(registry.module_at(Address::new(0x1000)).unwrap().path, "x.dll");
        assert_eq!(registry.module_at(Address::new(0x10FF)).unwrap().path, "x.dll");
        assert!(registry.module_at(Address::new(0x1100)).is_none());
    }

    #[test]
    fn test_zero_sized_module_never_matches()
    {
        let mut registry = ModuleRegistry::new();
        registry.on_load("broken.dll", Address::new(0x1000), 0);
        assert!(registry.module_at(Address::new(0x1000)).is_none());
    }

    #[test]
    fn test_resolution_independent_of_unrelated_loads()
    {
        let mut forward = ModuleRegistry::new();
        forward.on_load("a.dll", Address::new(0x1000), 0x100);
        forward.on_load("b.dll", Address::new(0x2000), 0x100);

        let mut reversed = ModuleRegistry::new();
        reversed.on_load("b.dll", Address::new(0x2000), 0x100);
        reversed.on_load("a.dll", Address::new(0x1000), 0x100);

        let probe = Address::new(0x1050);
        assert_eq!(
            forward.module_at(probe).map(|m| &m.path),
            reversed.module_at(probe).map(|m| &m.path)
        );
    }

    #[test]
    fn test_multiple_mappings_of_one_image()
    {
        let mut registry = ModuleRegistry::new();
        registry.on_load("dup.dll", Address::new(0x1000), 0x100);
        registry.on_load("dup.dll", Address::new(0x5000), 0x100);

        let bases = registry.bases_of("dup.dll");
        assert_eq!(bases.len(), 2);
        assert!(bases.contains(&Address::new(0x1000)));
        assert!(bases.contains(&Address::new(0x5000)));

        registry.on_unload(Address::new(0x1000));
        assert_eq!(registry.bases_of("dup.dll").len(), 1);
    }

    #[test]
    fn test_duplicate_base_load_is_skipped()
    {
        let mut registry = ModuleRegistry::new();
        registry.on_load("first.dll", Address::new(0x1000), 0x100);
        registry.on_load("second.dll", Address::new(0x1000), 0x200);

        assert_eq!(registry.module_at(Address::new(0x1010)).unwrap().path, "first.dll");
    }

    /// Fake target exposing a minimal PE image at 0x40_0000.
    struct PeImage
    {
        bytes: Vec<u8>,
    }

    impl PeImage
    {
        fn new(machine: u16, size_of_image: u32) -> Self
        {
            let mut bytes = vec![0u8; 0x200];
            bytes[0x3C..0x40].copy_from_slice(&0x80u32.to_le_bytes());
            bytes[0x84..0x86].copy_from_slice(&machine.to_le_bytes());
            bytes[0x80 + 80..0x80 + 84].copy_from_slice(&size_of_image.to_le_bytes());
            Self { bytes }
        }
    }

    impl TargetMemory for PeImage
    {
        fn read(&self, address: Address, buffer: &mut [u8]) -> HindcastResult<usize>
        {
            let offset = address
                .offset_from(Address::new(0x40_0000))
                .ok_or(HindcastError::RemoteRead(299))? as usize;
            if offset >= self.bytes.len() {
                return Err(HindcastError::RemoteRead(299));
            }
            let take = buffer.len().min(self.bytes.len() - offset);
            buffer[..take].copy_from_slice(&self.bytes[offset..offset + take]);
            Ok(take)
        }
    }

    #[test]
    fn test_pe_probe_reads_size_of_image()
    {
        let image = PeImage::new(IMAGE_FILE_MACHINE_AMD64, 0x0003_4000);
        let mut registry = ModuleRegistry::new();
        registry.on_load_probed("probed.exe", Address::new(0x40_0000), &image);

        let module = registry.module_at(Address::new(0x40_1000)).unwrap();
        assert_eq!(module.size, 0x0003_4000);
    }

    #[test]
    fn test_pe_probe_failure_degrades_to_zero()
    {
        let image = PeImage::new(0x01C0, 0x1000); // ARM machine word
        let mut registry = ModuleRegistry::new();
        registry.on_load_probed("strange.exe", Address::new(0x40_0000), &image);

        assert!(registry.module_at(Address::new(0x40_0800)).is_none());
        assert_eq!(registry.index_of("strange.exe"), Some(0));
    }
}
