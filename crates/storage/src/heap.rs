//! Growable, accountant-charged backing buffers for column data.
//!
//! A heap is exclusively owned by at most one column at a time. In-memory
//! heaps charge both committed and reserved bytes; file-backed maps charge
//! reserved address space only and are unmapped, never freed, on release.
//! Release is idempotent through the `Released` sentinel: error paths may
//! release a heap that was already released.

use std::path::Path;
use std::sync::Arc;

use memmap2::{Mmap, MmapMut, MmapOptions};

use basalt_common::error::{BasaltError, Result};
use basalt_common::memory::MemoryAccountant;

/// Access mode for file-backed heaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    /// Shared read-only mapping; writes are refused.
    ReadOnly,
    /// Private copy-on-write mapping; writes privatize pages.
    CopyOnWrite,
}

/// 8-byte-aligned growable buffer.
///
/// Backing storage is a `Vec<u64>` so fixed-width element slices handed out
/// by columns are always correctly aligned.
#[derive(Debug)]
struct AlignedBuf {
    words: Vec<u64>,
    len: usize,
}

impl AlignedBuf {
    fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(8)],
            len,
        }
    }

    fn resize(&mut self, new_len: usize) {
        self.words.resize(new_len.div_ceil(8), 0);
        self.len = new_len;
    }

    fn as_bytes(&self) -> &[u8] {
        // Narrowing u64 words to bytes never misaligns.
        unsafe { std::slice::from_raw_parts(self.words.as_ptr().cast::<u8>(), self.len) }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr().cast::<u8>(), self.len) }
    }
}

#[derive(Debug)]
enum Store {
    Memory(AlignedBuf),
    MappedRo(Mmap),
    MappedCow(MmapMut),
    /// Sentinel left behind by `release`; makes double-release a no-op.
    Released,
}

/// One contiguous backing region plus its accounting record.
///
/// Invariant: `free() <= committed() <= reserved()`.
#[derive(Debug)]
pub struct Heap {
    store: Store,
    free: usize,
    charged_committed: usize,
    charged_reserved: usize,
    acct: Arc<MemoryAccountant>,
}

impl Heap {
    /// Allocate a zero-filled in-memory heap of `size` bytes.
    ///
    /// Charges `size` against both the committed and reserved counters; a
    /// ceiling breach fails with [`BasaltError::OutOfMemory`] and leaves the
    /// counters untouched.
    pub fn alloc(acct: &Arc<MemoryAccountant>, size: usize) -> Result<Heap> {
        acct.charge(size, size)?;
        Ok(Heap {
            store: Store::Memory(AlignedBuf::zeroed(size)),
            free: 0,
            charged_committed: size,
            charged_reserved: size,
            acct: Arc::clone(acct),
        })
    }

    /// Map an existing file as a heap.
    ///
    /// Charges reserved address space only. The whole file content counts as
    /// written, so `free()` starts at the file length.
    pub fn map_file(acct: &Arc<MemoryAccountant>, path: &Path, mode: MapMode) -> Result<Heap> {
        let file = std::fs::File::open(path)?;
        let len = file.metadata()?.len() as usize;
        acct.charge(0, len)?;
        let store = match mode {
            // Safety: the mapping is dropped before the file handle goes
            // away, and basalt never truncates mapped files.
            MapMode::ReadOnly => match unsafe { Mmap::map(&file) } {
                Ok(map) => Store::MappedRo(map),
                Err(e) => {
                    acct.uncharge(0, len);
                    return Err(e.into());
                }
            },
            MapMode::CopyOnWrite => match unsafe { MmapOptions::new().map_copy(&file) } {
                Ok(map) => Store::MappedCow(map),
                Err(e) => {
                    acct.uncharge(0, len);
                    return Err(e.into());
                }
            },
        };
        Ok(Heap {
            store,
            free: len,
            charged_committed: 0,
            charged_reserved: len,
            acct: Arc::clone(acct),
        })
    }

    /// Committed size of the region in bytes (0 once released).
    #[must_use]
    pub fn size(&self) -> usize {
        match &self.store {
            Store::Memory(buf) => buf.len,
            Store::MappedRo(map) => map.len(),
            Store::MappedCow(map) => map.len(),
            Store::Released => 0,
        }
    }

    /// Offset one past the last written byte.
    #[must_use]
    pub fn free(&self) -> usize {
        self.free
    }

    /// Declare the written prefix after a bulk fill.
    pub fn set_free(&mut self, free: usize) -> Result<()> {
        if free > self.size() {
            return Err(BasaltError::InvalidCapacity(format!(
                "free offset {free} beyond heap size {}",
                self.size()
            )));
        }
        self.free = free;
        Ok(())
    }

    /// True once `release` has run.
    #[must_use]
    pub fn is_released(&self) -> bool {
        matches!(self.store, Store::Released)
    }

    /// Whole region as bytes (empty once released).
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        match &self.store {
            Store::Memory(buf) => buf.as_bytes(),
            Store::MappedRo(map) => &map[..],
            Store::MappedCow(map) => &map[..],
            Store::Released => &[],
        }
    }

    /// Write `data` at byte offset `off`, bounds-checked.
    pub fn write_at(&mut self, off: usize, data: &[u8]) -> Result<()> {
        let end = off
            .checked_add(data.len())
            .ok_or_else(|| BasaltError::InvalidCapacity("write offset overflow".to_string()))?;
        if end > self.size() {
            return Err(BasaltError::InvalidCapacity(format!(
                "write [{off}, {end}) beyond heap size {}",
                self.size()
            )));
        }
        let dst = match &mut self.store {
            Store::Memory(buf) => &mut buf.as_bytes_mut()[off..end],
            Store::MappedCow(map) => &mut map[off..end],
            Store::MappedRo(_) => {
                return Err(BasaltError::Execution(
                    "write to read-only mapped heap".to_string(),
                ));
            }
            Store::Released => {
                return Err(BasaltError::Execution("write to released heap".to_string()));
            }
        };
        dst.copy_from_slice(data);
        if end > self.free {
            self.free = end;
        }
        Ok(())
    }

    /// Grow the region to at least `new_size` bytes, possibly relocating.
    ///
    /// In-memory heaps charge the delta before resizing; copy-on-write maps
    /// privatize into a fresh in-memory region; read-only maps refuse. A
    /// failed grow leaves the heap and the counters exactly as they were.
    pub fn grow(&mut self, new_size: usize) -> Result<()> {
        if new_size <= self.size() {
            return Ok(());
        }
        match &mut self.store {
            Store::Memory(buf) => {
                let delta = new_size - buf.len;
                self.acct.charge(delta, delta)?;
                buf.resize(new_size);
                self.charged_committed += delta;
                self.charged_reserved += delta;
                Ok(())
            }
            Store::MappedCow(map) => {
                self.acct.charge(new_size, new_size)?;
                let mut buf = AlignedBuf::zeroed(new_size);
                buf.as_bytes_mut()[..map.len()].copy_from_slice(&map[..]);
                tracing::debug!(
                    old = map.len(),
                    new = new_size,
                    "privatizing copy-on-write heap on grow"
                );
                self.acct
                    .uncharge(self.charged_committed, self.charged_reserved);
                self.store = Store::Memory(buf);
                self.charged_committed = new_size;
                self.charged_reserved = new_size;
                Ok(())
            }
            Store::MappedRo(_) => Err(BasaltError::InvalidCapacity(
                "read-only mapped heap cannot grow".to_string(),
            )),
            Store::Released => Err(BasaltError::Execution(
                "grow on released heap".to_string(),
            )),
        }
    }

    /// Release the backing storage and return its accounting charges.
    ///
    /// Idempotent: the second and later calls are no-ops. Mapped regions
    /// are unmapped on drop of the map object rather than freed.
    pub fn release(&mut self) {
        if matches!(self.store, Store::Released) {
            return;
        }
        self.store = Store::Released;
        self.acct
            .uncharge(self.charged_committed, self.charged_reserved);
        self.charged_committed = 0;
        self.charged_reserved = 0;
        self.free = 0;
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        self.release();
    }
}
