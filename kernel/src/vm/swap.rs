// Swap store
//
// The swap disk is carved into page-sized slots. Slot i starts at sector
// i * (page_size / sector_size) from the beginning of the disk; ownership
// lives only in the in-memory descriptors and is lost across reboots. A
// page keeps its slot across page-in; the slot is released when the owner
// quits.

use lazy_static::lazy_static;
use spin::Mutex;

use crate::mmu::Mmu;
use crate::services::{DiskDriver, DiskGeometry};
use crate::vm::error::{VmError, VmResult};
use crate::vm::{frame, stats};
use crate::Pid;

#[derive(Debug, Clone, Copy, Default)]
struct SwapSlot {
    owner: Option<(Pid, usize)>,
}

struct SwapStore {
    slots: Vec<SwapSlot>,
    geometry: DiskGeometry,
    page_size: usize,
    num_pages: usize,
    num_frames: usize,
}

lazy_static! {
    static ref SWAP: Mutex<Option<SwapStore>> = Mutex::new(None);
}

/// Outcome of a page-in attempt for a page that is not resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SwapLoad {
    /// The page was read back from its slot into the frame.
    Loaded,
    /// The page has never been swapped; the caller zero-fills.
    Empty,
}

pub(crate) fn init(pages: usize, frames: usize) -> VmResult<()> {
    let mut guard = SWAP.lock();
    if guard.is_some() {
        return Err(VmError::AlreadyInitialized);
    }
    let geometry = crate::vm::disk().geometry();
    let page_size = crate::vm::mmu().page_size();
    debug_assert!(page_size % geometry.sector_size == 0);
    let slots = geometry.capacity() / page_size;
    *guard = Some(SwapStore {
        slots: vec![SwapSlot::default(); slots],
        geometry,
        page_size,
        num_pages: pages,
        num_frames: frames,
    });
    stats::update(|s| {
        s.blocks = slots;
        s.free_blocks = slots;
    });
    log::info!(
        "swap store initialized: {slots} slots of {page_size} bytes ({} tracks)",
        geometry.tracks
    );
    Ok(())
}

pub(crate) fn shutdown() {
    *SWAP.lock() = None;
}

/// Sector run of slot `idx` as `(track, first_sector, sectors)`.
fn slot_run(geometry: DiskGeometry, page_size: usize, idx: usize) -> (usize, usize, usize) {
    let byte = idx * page_size;
    let track_bytes = geometry.sector_size * geometry.sectors_per_track;
    let track = byte / track_bytes;
    let first_sector = (byte % track_bytes) / geometry.sector_size;
    (track, first_sector, page_size / geometry.sector_size)
}

pub(crate) fn find_slot(pid: Pid, page: usize) -> Option<usize> {
    SWAP.lock()
        .as_ref()?
        .slots
        .iter()
        .position(|s| s.owner == Some((pid, page)))
}

/// First-fit allocation of a free slot for `(pid, page)`.
pub(crate) fn allocate_slot(pid: Pid, page: usize) -> Option<usize> {
    let mut guard = SWAP.lock();
    let store = guard.as_mut()?;
    let idx = store.slots.iter().position(|s| s.owner.is_none())?;
    store.slots[idx].owner = Some((pid, page));
    stats::update(|s| s.free_blocks -= 1);
    Some(idx)
}

/// Undo a slot allocation whose backing write failed.
pub(crate) fn release_slot(idx: usize) {
    if let Some(store) = SWAP.lock().as_mut() {
        if let Some(slot) = store.slots.get_mut(idx) {
            if slot.owner.take().is_some() {
                stats::update(|s| s.free_blocks += 1);
            }
        }
    }
}

/// Release every slot owned by `pid`. Called at process quit with the VM
/// mutex held.
pub(crate) fn free_all(pid: Pid) {
    let mut freed = 0;
    if let Some(store) = SWAP.lock().as_mut() {
        for slot in store.slots.iter_mut() {
            if matches!(slot.owner, Some((owner, _)) if owner == pid) {
                slot.owner = None;
                freed += 1;
            }
        }
    }
    if freed > 0 {
        stats::update(|s| s.free_blocks += freed);
        log::debug!("released {freed} swap slots of pid {pid}");
    }
}

/// Read slot `idx` into `buf`. A failed transfer is fatal to the faulting
/// process, reported as `OutOfSwap`.
pub(crate) fn read_slot(idx: usize, buf: &mut [u8]) -> VmResult<()> {
    let (geometry, page_size) = {
        let guard = SWAP.lock();
        let store = guard.as_ref().ok_or(VmError::NotInitialized)?;
        (store.geometry, store.page_size)
    };
    let (track, first_sector, sectors) = slot_run(geometry, page_size, idx);
    crate::vm::disk()
        .read(track, first_sector, sectors, buf)
        .map_err(|err| {
            log::error!("swap read failed for slot {idx}: {err}");
            VmError::OutOfSwap
        })
}

/// Write `buf` to slot `idx`.
pub(crate) fn write_slot(idx: usize, buf: &[u8]) -> VmResult<()> {
    let (geometry, page_size) = {
        let guard = SWAP.lock();
        let store = guard.as_ref().ok_or(VmError::NotInitialized)?;
        (store.geometry, store.page_size)
    };
    let (track, first_sector, sectors) = slot_run(geometry, page_size, idx);
    crate::vm::disk()
        .write(track, first_sector, sectors, buf)
        .map_err(|err| {
            log::error!("swap write failed for slot {idx}: {err}");
            VmError::OutOfSwap
        })
}

/// Bring `(pid, page)` into `frame` if it has a slot. `Empty` means the
/// page has never been swapped out; `OutOfSwap` means it has no slot and
/// the pool is exhausted, so the faulting process cannot be backed.
pub(crate) fn load(pid: Pid, page: usize, frame_idx: usize) -> VmResult<SwapLoad> {
    let (page_size, num_pages, num_frames) = {
        let guard = SWAP.lock();
        let store = guard.as_ref().ok_or(VmError::NotInitialized)?;
        (store.page_size, store.num_pages, store.num_frames)
    };
    if page >= num_pages {
        return Err(VmError::InvalidPage);
    }
    if frame_idx >= num_frames {
        return Err(VmError::InvalidFrame);
    }
    match find_slot(pid, page) {
        Some(idx) => {
            let mut buf = vec![0u8; page_size];
            read_slot(idx, &mut buf)?;
            let mapping = frame::map(frame_idx)?;
            mapping.write_from(&buf)?;
            mapping.unmap()?;
            Ok(SwapLoad::Loaded)
        }
        None => {
            let has_room = SWAP
                .lock()
                .as_ref()
                .map_or(false, |store| store.slots.iter().any(|s| s.owner.is_none()));
            if has_room {
                Ok(SwapLoad::Empty)
            } else {
                Err(VmError::OutOfSwap)
            }
        }
    }
}

/// Write the current contents of `frame` out as `(pid, page)`, reusing the
/// page's slot if it already has one. On failure nothing is recorded.
pub(crate) fn save(pid: Pid, page: usize, frame_idx: usize) -> VmResult<()> {
    let page_size = {
        let guard = SWAP.lock();
        guard.as_ref().ok_or(VmError::NotInitialized)?.page_size
    };
    let mut buf = vec![0u8; page_size];
    let mapping = frame::map(frame_idx)?;
    mapping.read_into(&mut buf)?;
    mapping.unmap()?;
    let (idx, fresh) = match find_slot(pid, page) {
        Some(idx) => (idx, false),
        None => (
            allocate_slot(pid, page).ok_or(VmError::OutOfSwap)?,
            true,
        ),
    };
    if let Err(err) = write_slot(idx, &buf) {
        if fresh {
            release_slot(idx);
        }
        return Err(err);
    }
    Ok(())
}

/// Diagnostic snapshot of slot ownership.
pub fn snapshot() -> Vec<Option<(Pid, usize)>> {
    SWAP.lock()
        .as_ref()
        .map(|store| store.slots.iter().map(|s| s.owner).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_runs_follow_disk_geometry() {
        let geometry = DiskGeometry {
            sector_size: 64,
            sectors_per_track: 8,
            tracks: 4,
        };
        // 256-byte pages: 4 sectors per slot, 2 slots per track.
        assert_eq!(slot_run(geometry, 256, 0), (0, 0, 4));
        assert_eq!(slot_run(geometry, 256, 1), (0, 4, 4));
        assert_eq!(slot_run(geometry, 256, 2), (1, 0, 4));
        assert_eq!(slot_run(geometry, 256, 5), (2, 4, 4));
    }

    #[test]
    fn geometry_capacity_counts_whole_disk() {
        let geometry = DiskGeometry {
            sector_size: 64,
            sectors_per_track: 4,
            tracks: 8,
        };
        assert_eq!(geometry.capacity(), 2048);
    }
}
