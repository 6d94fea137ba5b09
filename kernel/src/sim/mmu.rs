// Simulated MMU
//
// Physical memory is a pool of byte-array frames; translation state is one
// mapping view per tag. User references go through `load`/`store`, which
// maintain the per-frame access bits and report misses as pending faults
// for the caller to raise into the bound vector, exactly as the hardware
// would interrupt the running process.

use std::collections::BTreeMap;

use spin::Mutex;

use crate::mmu::{AccessBits, FaultCause, FaultVector, Mmu, MmuError, Protection};
use crate::Pid;

/// A miss or violation detected during a user reference. Raising it calls
/// the bound fault vector on the current thread of control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingFault {
    pub cause: FaultCause,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy)]
struct Mapping {
    frame: usize,
    protection: Protection,
}

struct MmuState {
    pages: usize,
    frames: Vec<Box<[u8]>>,
    access: Vec<AccessBits>,
    views: BTreeMap<Pid, BTreeMap<usize, Mapping>>,
}

pub struct SimMmu {
    page_size: usize,
    state: Mutex<Option<MmuState>>,
    vector: Mutex<Option<FaultVector>>,
}

impl SimMmu {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            state: Mutex::new(None),
            vector: Mutex::new(None),
        }
    }

    fn translate(
        &self,
        state: &MmuState,
        tag: Pid,
        addr: usize,
        write: bool,
    ) -> Result<(usize, usize), PendingFault> {
        let page = addr / self.page_size;
        let offset = addr % self.page_size;
        if page >= state.pages {
            return Err(PendingFault {
                cause: FaultCause::AccessViolation,
                offset: addr,
            });
        }
        let Some(mapping) = state.views.get(&tag).and_then(|view| view.get(&page)) else {
            return Err(PendingFault {
                cause: FaultCause::PageFault,
                offset: addr,
            });
        };
        let needed = if write {
            Protection::WRITE
        } else {
            Protection::READ
        };
        if !mapping.protection.contains(needed) {
            return Err(PendingFault {
                cause: FaultCause::AccessViolation,
                offset: addr,
            });
        }
        Ok((mapping.frame, offset))
    }

    /// User-mode byte read through the view of `tag`.
    pub fn load(&self, tag: Pid, addr: usize) -> Result<u8, PendingFault> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().expect("MMU not initialized");
        let (frame, offset) = self.translate(state, tag, addr, false)?;
        state.access[frame] |= AccessBits::REFERENCED;
        Ok(state.frames[frame][offset])
    }

    /// User-mode byte write through the view of `tag`.
    pub fn store(&self, tag: Pid, addr: usize, byte: u8) -> Result<(), PendingFault> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().expect("MMU not initialized");
        let (frame, offset) = self.translate(state, tag, addr, true)?;
        state.access[frame] |= AccessBits::REFERENCED | AccessBits::DIRTY;
        state.frames[frame][offset] = byte;
        Ok(())
    }

    /// Deliver a fault to the bound vector on the calling thread.
    pub fn raise(&self, fault: PendingFault) {
        let vector = *self.vector.lock();
        let vector = vector.expect("fault raised with no vector bound");
        vector(fault.cause, fault.offset);
    }
}

impl Mmu for SimMmu {
    fn init(&self, mappings: usize, pages: usize, frames: usize) -> Result<(), MmuError> {
        if mappings == 0 || pages == 0 || frames == 0 || self.page_size == 0 {
            return Err(MmuError::BadDimensions);
        }
        let mut guard = self.state.lock();
        if guard.is_some() {
            return Err(MmuError::AlreadyInitialized);
        }
        *guard = Some(MmuState {
            pages,
            frames: (0..frames)
                .map(|_| vec![0u8; self.page_size].into_boxed_slice())
                .collect(),
            access: vec![AccessBits::empty(); frames],
            views: BTreeMap::new(),
        });
        Ok(())
    }

    fn shutdown(&self) {
        *self.state.lock() = None;
        *self.vector.lock() = None;
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn set_fault_vector(&self, vector: Option<FaultVector>) {
        *self.vector.lock() = vector;
    }

    fn map(
        &self,
        tag: Pid,
        page: usize,
        frame: usize,
        protection: Protection,
    ) -> Result<(), MmuError> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(MmuError::Uninitialized)?;
        if page >= state.pages {
            return Err(MmuError::InvalidPage);
        }
        if frame >= state.frames.len() {
            return Err(MmuError::InvalidFrame);
        }
        state
            .views
            .entry(tag)
            .or_default()
            .insert(page, Mapping { frame, protection });
        Ok(())
    }

    fn unmap(&self, tag: Pid, page: usize) -> Result<(), MmuError> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(MmuError::Uninitialized)?;
        let view = state.views.get_mut(&tag).ok_or(MmuError::NotMapped)?;
        if view.remove(&page).is_none() {
            return Err(MmuError::NotMapped);
        }
        if view.is_empty() {
            state.views.remove(&tag);
        }
        Ok(())
    }

    fn get_access(&self, frame: usize) -> Result<AccessBits, MmuError> {
        let guard = self.state.lock();
        let state = guard.as_ref().ok_or(MmuError::Uninitialized)?;
        state
            .access
            .get(frame)
            .copied()
            .ok_or(MmuError::InvalidFrame)
    }

    fn set_access(&self, frame: usize, bits: AccessBits) -> Result<(), MmuError> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(MmuError::Uninitialized)?;
        let slot = state.access.get_mut(frame).ok_or(MmuError::InvalidFrame)?;
        *slot = bits;
        Ok(())
    }

    fn read_mapped(&self, tag: Pid, page: usize, buf: &mut [u8]) -> Result<(), MmuError> {
        let guard = self.state.lock();
        let state = guard.as_ref().ok_or(MmuError::Uninitialized)?;
        let mapping = state
            .views
            .get(&tag)
            .and_then(|view| view.get(&page))
            .ok_or(MmuError::NotMapped)?;
        let n = buf.len().min(self.page_size);
        buf[..n].copy_from_slice(&state.frames[mapping.frame][..n]);
        Ok(())
    }

    fn write_mapped(&self, tag: Pid, page: usize, buf: &[u8]) -> Result<(), MmuError> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(MmuError::Uninitialized)?;
        let mapping = state
            .views
            .get(&tag)
            .and_then(|view| view.get(&page))
            .copied()
            .ok_or(MmuError::NotMapped)?;
        let n = buf.len().min(self.page_size);
        state.frames[mapping.frame][..n].copy_from_slice(&buf[..n]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mmu() -> SimMmu {
        let mmu = SimMmu::new(64);
        mmu.init(4, 4, 2).unwrap();
        mmu
    }

    #[test]
    fn init_rejects_zero_dimensions() {
        let mmu = SimMmu::new(64);
        assert_eq!(mmu.init(0, 4, 2), Err(MmuError::BadDimensions));
        assert_eq!(mmu.init(4, 0, 2), Err(MmuError::BadDimensions));
        mmu.init(4, 4, 2).unwrap();
        assert_eq!(mmu.init(4, 4, 2), Err(MmuError::AlreadyInitialized));
    }

    #[test]
    fn unmapped_reference_is_a_page_fault() {
        let mmu = mmu();
        let fault = mmu.load(1, 70).unwrap_err();
        assert_eq!(fault.cause, FaultCause::PageFault);
        assert_eq!(fault.offset, 70);
    }

    #[test]
    fn out_of_region_reference_is_a_violation() {
        let mmu = mmu();
        let fault = mmu.load(1, 4 * 64).unwrap_err();
        assert_eq!(fault.cause, FaultCause::AccessViolation);
    }

    #[test]
    fn views_are_independent_per_tag() {
        let mmu = mmu();
        mmu.map(1, 0, 0, Protection::RW).unwrap();
        mmu.map(2, 0, 1, Protection::RW).unwrap();
        mmu.store(1, 0, 0xAA).unwrap();
        mmu.store(2, 0, 0xBB).unwrap();
        assert_eq!(mmu.load(1, 0).unwrap(), 0xAA);
        assert_eq!(mmu.load(2, 0).unwrap(), 0xBB);
    }

    #[test]
    fn references_set_access_bits_and_privileged_copies_do_not() {
        let mmu = mmu();
        mmu.map(1, 2, 0, Protection::RW).unwrap();
        assert_eq!(mmu.get_access(0).unwrap(), AccessBits::empty());
        mmu.load(1, 2 * 64).unwrap();
        assert_eq!(mmu.get_access(0).unwrap(), AccessBits::REFERENCED);
        mmu.store(1, 2 * 64, 7).unwrap();
        assert!(mmu.get_access(0).unwrap().contains(AccessBits::DIRTY));

        mmu.set_access(0, AccessBits::empty()).unwrap();
        let mut buf = [0u8; 64];
        mmu.read_mapped(1, 2, &mut buf).unwrap();
        mmu.write_mapped(1, 2, &buf).unwrap();
        assert_eq!(mmu.get_access(0).unwrap(), AccessBits::empty());
    }

    #[test]
    fn unmap_removes_only_the_named_page() {
        let mmu = mmu();
        mmu.map(1, 0, 0, Protection::RW).unwrap();
        mmu.map(1, 1, 1, Protection::RW).unwrap();
        mmu.unmap(1, 0).unwrap();
        assert_eq!(mmu.unmap(1, 0), Err(MmuError::NotMapped));
        assert!(mmu.load(1, 64).is_ok());
    }
}
