//! Linear memory
//!
//! All access is bounds-checked before the underlying buffer is touched.
//! Guest accesses out of bounds trap; host accesses get a
//! [`MemoryAccessError`]. The buffer's length is always a whole number of
//! pages and only ever grows.

use std::fmt;

use super::instance::Instance;
use super::store::{Store, Stored};
use super::trap::{Trap, TrapCode};
use crate::error::{Error, GrowRejected, MemoryAccessError};
use crate::parser::module::Limits;

/// WebAssembly page size in bytes (64KiB)
pub const PAGE_SIZE: usize = 65536;

/// Maximum number of pages (2^16 pages = 4GiB total)
pub const MAX_PAGES: u32 = 65536;

/// Size bounds of a memory, in pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryLimits {
    pub min_pages: u32,
    pub max_pages: Option<u32>,
}

impl MemoryLimits {
    pub fn new(min_pages: u32, max_pages: Option<u32>) -> MemoryLimits {
        MemoryLimits { min_pages, max_pages }
    }

    pub fn is_valid(&self) -> bool {
        self.min_pages <= MAX_PAGES
            && self
                .max_pages
                .map_or(true, |max| max <= MAX_PAGES && self.min_pages <= max)
    }

    /// Whether a memory with these limits may satisfy an import declared
    /// with `declared`.
    pub fn matches(&self, declared: &MemoryLimits) -> bool {
        self.min_pages >= declared.min_pages
            && match (declared.max_pages, self.max_pages) {
                (None, _) => true,
                (Some(declared_max), Some(max)) => max <= declared_max,
                (Some(_), None) => false,
            }
    }
}

impl From<Limits> for MemoryLimits {
    fn from(limits: Limits) -> Self {
        MemoryLimits {
            min_pages: limits.min,
            max_pages: limits.max,
        }
    }
}

impl fmt::Display for MemoryLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max_pages {
            Some(max) => write!(f, "memory {{ min {} max {max} }}", self.min_pages),
            None => write!(f, "memory {{ min {} }}", self.min_pages),
        }
    }
}

/// A zero-filled buffer, or `OutOfMemory` if it cannot be allocated.
fn zeroed(bytes: usize) -> Result<Vec<u8>, Error> {
    let mut data = Vec::new();
    data.try_reserve_exact(bytes)
        .map_err(|_| Error::OutOfMemory { bytes })?;
    data.resize(bytes, 0);
    Ok(data)
}

/// The byte buffer behind a [`Memory`] handle.
#[derive(Debug)]
pub(crate) struct LinearMemory {
    data: Vec<u8>,
    current_pages: u32,
    /// Declared minimum; the memory's type never changes after creation.
    min_pages: u32,
    max_pages: Option<u32>,
}

impl LinearMemory {
    pub(crate) fn new(limits: MemoryLimits) -> Result<Self, Error> {
        if !limits.is_valid() {
            return Err(Error::InvalidLimits {
                min: limits.min_pages,
                max: limits.max_pages,
            });
        }
        Ok(LinearMemory {
            data: zeroed(limits.min_pages as usize * PAGE_SIZE)?,
            current_pages: limits.min_pages,
            min_pages: limits.min_pages,
            max_pages: limits.max_pages,
        })
    }

    pub(crate) fn size(&self) -> u32 {
        self.current_pages
    }

    pub(crate) fn limits(&self) -> MemoryLimits {
        MemoryLimits {
            min_pages: self.min_pages,
            max_pages: self.max_pages,
        }
    }

    /// Current size as limits, used when matching against an import.
    pub(crate) fn current_limits(&self) -> MemoryLimits {
        MemoryLimits {
            min_pages: self.current_pages,
            max_pages: self.max_pages,
        }
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Grow by `delta_pages`, returning the previous size in pages.
    pub(crate) fn grow(&mut self, delta_pages: u32) -> Result<u32, GrowRejected> {
        let current = self.current_pages;
        let maximum = self.max_pages.unwrap_or(MAX_PAGES);
        let rejected = GrowRejected {
            current,
            delta: delta_pages,
            maximum,
        };

        let new_pages = match current.checked_add(delta_pages) {
            Some(new_pages) if new_pages <= maximum => new_pages,
            _ => return Err(rejected),
        };

        let new_bytes = new_pages as usize * PAGE_SIZE;
        if self.data.try_reserve(new_bytes - self.data.len()).is_err() {
            return Err(rejected);
        }
        self.data.resize(new_bytes, 0);
        self.current_pages = new_pages;
        Ok(current)
    }

    /// Check a guest access of `len` bytes at `addr + offset`, computed
    /// without wrapping.
    #[inline]
    fn check_bounds(&self, addr: u32, offset: u32, len: usize) -> Result<usize, Trap> {
        let start = addr as u64 + offset as u64;
        let end = start + len as u64;
        if end > self.data.len() as u64 {
            return Err(TrapCode::OutOfBoundsMemoryAccess.into());
        }
        Ok(start as usize)
    }

    pub(crate) fn load<const N: usize>(&self, addr: u32, offset: u32) -> Result<[u8; N], Trap> {
        let start = self.check_bounds(addr, offset, N)?;
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.data[start..start + N]);
        Ok(bytes)
    }

    pub(crate) fn store<const N: usize>(&mut self, addr: u32, offset: u32, bytes: [u8; N]) -> Result<(), Trap> {
        let start = self.check_bounds(addr, offset, N)?;
        self.data[start..start + N].copy_from_slice(&bytes);
        Ok(())
    }

    /// Check that a data segment fits without writing it.
    pub(crate) fn check_range(&self, addr: u32, len: usize) -> Result<(), Trap> {
        self.check_bounds(addr, 0, len).map(|_| ())
    }

    pub(crate) fn write_bytes(&mut self, addr: u32, bytes: &[u8]) -> Result<(), Trap> {
        let start = self.check_bounds(addr, 0, bytes.len())?;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn host_range(&self, offset: usize, len: usize) -> Result<std::ops::Range<usize>, MemoryAccessError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(offset..end),
            _ => Err(MemoryAccessError {
                offset,
                len,
                size: self.data.len(),
            }),
        }
    }
}

pub(crate) struct MemoryEntity {
    pub(crate) memory: LinearMemory,
    /// The instance that defined this memory, if any.
    pub(crate) owner: Option<Instance>,
}

/// Handle to a linear memory owned by a [`Store`].
///
/// Copies of a handle refer to the same buffer. Views returned by
/// [`Memory::data`] and [`Memory::data_mut`] borrow the store, so they must
/// be fetched again after the memory grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Memory(pub(crate) Stored<MemoryEntity>);

impl Memory {
    /// Create a standalone memory, for example to pass as an import.
    pub fn new(store: &mut Store, limits: MemoryLimits) -> Result<Memory, Error> {
        store.make_memory(limits)
    }

    /// Current size in pages.
    pub fn size(&self, store: &Store) -> u32 {
        store[self.0].memory.size()
    }

    /// Current size in bytes, always `size() * PAGE_SIZE`.
    pub fn data_size(&self, store: &Store) -> usize {
        store[self.0].memory.data().len()
    }

    /// The limits the memory was created with.
    pub fn limits(&self, store: &Store) -> MemoryLimits {
        store[self.0].memory.limits()
    }

    pub fn data<'a>(&self, store: &'a Store) -> &'a [u8] {
        store[self.0].memory.data()
    }

    pub fn data_mut<'a>(&self, store: &'a mut Store) -> &'a mut [u8] {
        store[self.0].memory.data_mut()
    }

    /// Grow by `delta_pages`, returning the previous size in pages.
    /// `grow(0)` always succeeds.
    pub fn grow(&self, store: &mut Store, delta_pages: u32) -> Result<u32, GrowRejected> {
        store[self.0].memory.grow(delta_pages)
    }

    /// Copy `buffer.len()` bytes starting at `offset` into `buffer`.
    pub fn read(&self, store: &Store, offset: usize, buffer: &mut [u8]) -> Result<(), MemoryAccessError> {
        let memory = &store[self.0].memory;
        let range = memory.host_range(offset, buffer.len())?;
        buffer.copy_from_slice(&memory.data()[range]);
        Ok(())
    }

    /// Copy `bytes` into memory starting at `offset`.
    pub fn write(&self, store: &mut Store, offset: usize, bytes: &[u8]) -> Result<(), MemoryAccessError> {
        let memory = &mut store[self.0].memory;
        let range = memory.host_range(offset, bytes.len())?;
        memory.data_mut()[range].copy_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn memory(min: u32, max: Option<u32>) -> LinearMemory {
        LinearMemory::new(MemoryLimits::new(min, max)).unwrap()
    }

    #[test]
    fn test_memory_creation() {
        let mem = memory(1, None);
        assert_eq!(mem.size(), 1);
        assert_eq!(mem.data().len(), PAGE_SIZE);

        let mem = memory(1, Some(10));
        assert_eq!(mem.limits(), MemoryLimits::new(1, Some(10)));
    }

    #[test]
    fn test_unallocatable_buffer_is_an_error() {
        assert!(matches!(
            zeroed(usize::MAX),
            Err(Error::OutOfMemory { bytes: usize::MAX })
        ));
        assert_eq!(zeroed(16).unwrap(), vec![0u8; 16]);
    }

    #[rstest]
    #[case(10, Some(5))]
    #[case(MAX_PAGES + 1, None)]
    #[case(1, Some(MAX_PAGES + 1))]
    fn test_memory_creation_errors(#[case] min: u32, #[case] max: Option<u32>) {
        assert!(matches!(
            LinearMemory::new(MemoryLimits::new(min, max)),
            Err(Error::InvalidLimits { .. })
        ));
    }

    #[test]
    fn test_memory_grow() {
        let mut mem = memory(1, Some(10));

        assert_eq!(mem.grow(2), Ok(1));
        assert_eq!(mem.size(), 3);
        assert_eq!(mem.data().len(), 3 * PAGE_SIZE);

        assert_eq!(mem.grow(7), Ok(3));
        assert_eq!(mem.grow(0), Ok(10));

        assert_eq!(
            mem.grow(1),
            Err(GrowRejected {
                current: 10,
                delta: 1,
                maximum: 10
            })
        );
        assert_eq!(mem.size(), 10);
    }

    #[test]
    fn test_memory_grow_overflow() {
        let mut mem = memory(1, None);
        assert!(mem.grow(u32::MAX).is_err());
        assert_eq!(mem.size(), 1);
    }

    #[test]
    fn test_guest_bounds_checking() {
        let mut mem = memory(1, None);
        let last = PAGE_SIZE as u32 - 4;

        mem.store(last, 0, 0xdeadbeefu32.to_le_bytes()).unwrap();
        assert_eq!(u32::from_le_bytes(mem.load(last, 0).unwrap()), 0xdeadbeef);
        assert_eq!(mem.load::<1>(0, last + 3).unwrap(), [0xde]);

        let err = mem.load::<4>(last + 1, 0).unwrap_err();
        assert_eq!(err.code(), Some(TrapCode::OutOfBoundsMemoryAccess));
        // the effective address does not wrap
        assert!(mem.load::<1>(u32::MAX, u32::MAX).is_err());
        assert!(mem.store(1, u32::MAX, [0u8; 2]).is_err());
        assert!(mem.check_range(PAGE_SIZE as u32, 0).is_ok());
        assert!(mem.check_range(PAGE_SIZE as u32, 1).is_err());
    }

    #[test]
    fn test_grow_zero_initialisation() {
        let mut mem = memory(1, None);
        mem.write_bytes(0, &[1, 2, 3, 4]).unwrap();
        mem.grow(1).unwrap();

        assert_eq!(mem.load::<4>(0, 0).unwrap(), [1, 2, 3, 4]);
        assert_eq!(mem.load::<4>(PAGE_SIZE as u32, 100).unwrap(), [0; 4]);
    }

    #[test]
    fn test_host_range() {
        let mem = memory(1, None);
        assert_eq!(mem.host_range(10, 5), Ok(10..15));
        assert_eq!(
            mem.host_range(PAGE_SIZE - 1, 2),
            Err(MemoryAccessError {
                offset: PAGE_SIZE - 1,
                len: 2,
                size: PAGE_SIZE
            })
        );
        assert!(mem.host_range(usize::MAX, 2).is_err());
    }

    #[rstest]
    #[case(MemoryLimits::new(2, None), MemoryLimits::new(1, None), true)]
    #[case(MemoryLimits::new(1, None), MemoryLimits::new(2, None), false)]
    #[case(MemoryLimits::new(1, Some(3)), MemoryLimits::new(1, Some(4)), true)]
    #[case(MemoryLimits::new(1, Some(5)), MemoryLimits::new(1, Some(4)), false)]
    #[case(MemoryLimits::new(1, None), MemoryLimits::new(1, Some(4)), false)]
    fn test_limits_matching(#[case] actual: MemoryLimits, #[case] declared: MemoryLimits, #[case] ok: bool) {
        assert_eq!(actual.matches(&declared), ok);
    }
}
