// Frame table
//
// Fixed pool of physical frames with the reverse map frame -> (pid, page).
// A busy frame is either committed to an occupant or being operated on by
// exactly one pager; busy frames are skipped by the clock scan.

use lazy_static::lazy_static;
use spin::Mutex;

use crate::mmu::{AccessBits, Mmu, Protection};
use crate::services::KernelServices;
use crate::vm::error::{VmError, VmResult};
use crate::vm::{pagetable, stats};
use crate::Pid;

/// Page index used for scratch mappings, in the pager's own view. Pagers
/// never take faults of their own, so their views hold nothing else.
const SCRATCH_PAGE: usize = 0;

#[derive(Debug, Clone, Copy, Default)]
struct FrameDescriptor {
    busy: bool,
    /// The (pid, page) currently committed to this frame.
    occupant: Option<(Pid, usize)>,
    /// Live scratch mapping, as (tag, page).
    scratch: Option<(Pid, usize)>,
}

/// Diagnostic view of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub busy: bool,
    pub occupant: Option<(Pid, usize)>,
}

lazy_static! {
    static ref FRAMES: Mutex<Option<Vec<FrameDescriptor>>> = Mutex::new(None);
}

pub(crate) fn init(frames: usize) -> VmResult<()> {
    let mut guard = FRAMES.lock();
    if guard.is_some() {
        return Err(VmError::AlreadyInitialized);
    }
    *guard = Some(vec![FrameDescriptor::default(); frames]);
    stats::update(|s| s.free_frames = frames);
    log::info!("frame table initialized: {frames} frames");
    Ok(())
}

pub(crate) fn shutdown() {
    *FRAMES.lock() = None;
}

pub(crate) fn count() -> usize {
    FRAMES.lock().as_ref().map_or(0, Vec::len)
}

/// Lowest-indexed frame that is neither busy nor occupied, marked busy for
/// the caller. Does not run replacement.
pub(crate) fn allocate_free() -> Option<usize> {
    let mut guard = FRAMES.lock();
    let frames = guard.as_mut()?;
    let idx = frames
        .iter()
        .position(|f| !f.busy && f.occupant.is_none())?;
    frames[idx].busy = true;
    stats::update(|s| s.free_frames -= 1);
    Some(idx)
}

/// Commit `frame` to `(pid, page)` and clear busy.
pub(crate) fn install(frame: usize, pid: Pid, page: usize) {
    if let Some(frames) = FRAMES.lock().as_mut() {
        if let Some(d) = frames.get_mut(frame) {
            d.occupant = Some((pid, page));
            d.busy = false;
        }
    }
}

/// Hand an evicted frame to the caller: no occupant, busy until installed.
pub(crate) fn claim(frame: usize) {
    if let Some(frames) = FRAMES.lock().as_mut() {
        if let Some(d) = frames.get_mut(frame) {
            d.occupant = None;
            d.busy = true;
        }
    }
}

/// Return a frame to the free pool (pager error paths).
pub(crate) fn release(frame: usize) {
    if let Some(frames) = FRAMES.lock().as_mut() {
        if let Some(d) = frames.get_mut(frame) {
            d.occupant = None;
            d.busy = false;
            stats::update(|s| s.free_frames += 1);
        }
    }
}

pub(crate) fn occupant(frame: usize) -> Option<(Pid, usize)> {
    FRAMES
        .lock()
        .as_ref()
        .and_then(|frames| frames.get(frame))
        .and_then(|d| d.occupant)
}

pub(crate) fn is_busy(frame: usize) -> bool {
    FRAMES
        .lock()
        .as_ref()
        .and_then(|frames| frames.get(frame))
        .map_or(true, |d| d.busy)
}

/// Release every frame held by `pid`. Called at process quit, with the VM
/// mutex held; the pages are gone, so their access bits and mappings are
/// dropped as well.
pub(crate) fn free_all(pid: Pid) {
    let mmu = crate::vm::mmu();
    let Some(table) = pagetable::get(pid) else {
        return;
    };
    let mut table = table.lock();
    for (page, entry) in table.entries_mut().iter_mut().enumerate() {
        if !entry.incore {
            continue;
        }
        entry.incore = false;
        let frame = entry.frame;
        if let Some(frames) = FRAMES.lock().as_mut() {
            if let Some(d) = frames.get_mut(frame) {
                d.occupant = None;
                d.busy = false;
            }
        }
        stats::update(|s| s.free_frames += 1);
        let _ = mmu.set_access(frame, AccessBits::empty());
        let _ = mmu.unmap(pid, page);
    }
}

/// Diagnostic snapshot of the whole table.
pub fn snapshot() -> Vec<FrameInfo> {
    FRAMES
        .lock()
        .as_ref()
        .map(|frames| {
            frames
                .iter()
                .map(|d| FrameInfo {
                    busy: d.busy,
                    occupant: d.occupant,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Scratch mapping of a frame into the calling pager's view, so the pager
/// can read or write the frame's contents without touching the owning
/// process's table. Unmapped on drop if not unmapped explicitly.
#[derive(Debug)]
pub(crate) struct FrameMapping {
    frame: usize,
    tag: Pid,
    page: usize,
    released: bool,
}

pub(crate) fn map(frame: usize) -> VmResult<FrameMapping> {
    let mmu = crate::vm::mmu();
    let tag = crate::vm::kernel().current_pid();
    {
        let mut guard = FRAMES.lock();
        let frames = guard.as_mut().ok_or(VmError::NotInitialized)?;
        let d = frames.get_mut(frame).ok_or(VmError::InvalidFrame)?;
        d.scratch = Some((tag, SCRATCH_PAGE));
    }
    if let Err(err) = mmu.map(tag, SCRATCH_PAGE, frame, Protection::RW) {
        if let Some(frames) = FRAMES.lock().as_mut() {
            if let Some(d) = frames.get_mut(frame) {
                d.scratch = None;
            }
        }
        return Err(err.into());
    }
    Ok(FrameMapping {
        frame,
        tag,
        page: SCRATCH_PAGE,
        released: false,
    })
}

impl FrameMapping {
    /// Copy the frame contents out.
    pub(crate) fn read_into(&self, buf: &mut [u8]) -> VmResult<()> {
        crate::vm::mmu()
            .read_mapped(self.tag, self.page, buf)
            .map_err(Into::into)
    }

    /// Overwrite the frame contents.
    pub(crate) fn write_from(&self, buf: &[u8]) -> VmResult<()> {
        crate::vm::mmu()
            .write_mapped(self.tag, self.page, buf)
            .map_err(Into::into)
    }

    pub(crate) fn unmap(mut self) -> VmResult<()> {
        self.release()
    }

    fn release(&mut self) -> VmResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        {
            let mut guard = FRAMES.lock();
            let frames = guard.as_mut().ok_or(VmError::NotInitialized)?;
            let d = frames.get_mut(self.frame).ok_or(VmError::InvalidFrame)?;
            if d.scratch != Some((self.tag, self.page)) {
                return Err(VmError::FrameNotMapped);
            }
            d.scratch = None;
        }
        crate::vm::mmu().unmap(self.tag, self.page)?;
        Ok(())
    }
}

impl Drop for FrameMapping {
    fn drop(&mut self) {
        let _ = self.release();
    }
}
