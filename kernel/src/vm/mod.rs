// Virtual-memory lifecycle
//
// Wires the page table store, frame table, swap store and pager pool to
// the process events of the host kernel: init/destroy, fork (allocate a
// table), quit (free everything) and context switch (swap the MMU view).

pub mod error;
pub mod fault;
pub mod frame;
pub mod pagetable;
pub mod pager;
pub mod replacement;
pub mod stats;
pub mod swap;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;
use spin::RwLock;

use crate::mmu::{Mmu, MmuError, Protection};
use crate::services::{DiskDriver, KernelServices, SemId};
use crate::Pid;

use error::{VmError, VmResult};
pub use pagetable::{PageTable, PageTableEntry, PageTableRef};
pub use stats::statistics;

struct Handles {
    mmu: Arc<dyn Mmu>,
    disk: Arc<dyn DiskDriver>,
    kernel: Arc<dyn KernelServices>,
    vm_mutex: SemId,
}

lazy_static! {
    static ref HANDLES: RwLock<Option<Handles>> = RwLock::new(None);
}

static INITIALIZED: AtomicBool = AtomicBool::new(false);

pub(crate) fn mmu() -> Arc<dyn Mmu> {
    HANDLES
        .read()
        .as_ref()
        .expect("virtual memory not initialized")
        .mmu
        .clone()
}

pub(crate) fn disk() -> Arc<dyn DiskDriver> {
    HANDLES
        .read()
        .as_ref()
        .expect("virtual memory not initialized")
        .disk
        .clone()
}

pub(crate) fn kernel() -> Arc<dyn KernelServices> {
    HANDLES
        .read()
        .as_ref()
        .expect("virtual memory not initialized")
        .kernel
        .clone()
}

/// Guard for the global VM mutex. Covers the clock hand, frame busy and
/// occupancy fields, swap slot descriptors and pager-written PTE fields;
/// pagers keep it across disk I/O.
pub(crate) struct VmGuard {
    kernel: Arc<dyn KernelServices>,
    sem: SemId,
}

pub(crate) fn lock() -> VmGuard {
    let (kernel, sem) = {
        let guard = HANDLES.read();
        let handles = guard.as_ref().expect("virtual memory not initialized");
        (handles.kernel.clone(), handles.vm_mutex)
    };
    kernel.sem_down(sem);
    VmGuard { kernel, sem }
}

impl Drop for VmGuard {
    fn drop(&mut self) {
        self.kernel.sem_up(self.sem);
    }
}

/// Every entry point requires kernel mode; user-mode entry is an illegal
/// instruction.
fn check_kernel_mode(kernel: &dyn KernelServices) {
    if !kernel.kernel_mode() {
        panic!("protected VM routine invoked from user mode");
    }
}

/// Bring the subsystem up: configure the MMU, bind the fault vector, build
/// the tables and fork the pagers.
pub fn init(
    mmu: Arc<dyn Mmu>,
    disk: Arc<dyn DiskDriver>,
    kernel: Arc<dyn KernelServices>,
    mappings: usize,
    pages: usize,
    frames: usize,
    pagers: usize,
) -> VmResult<()> {
    check_kernel_mode(&*kernel);
    if INITIALIZED.load(Ordering::Acquire) {
        return Err(VmError::AlreadyInitialized);
    }
    if pagers == 0 || pagers > pager::MAX_PAGERS {
        return Err(VmError::InvalidNumPagers);
    }
    mmu.init(mappings, pages, frames).map_err(|err| match err {
        MmuError::AlreadyInitialized => VmError::AlreadyInitialized,
        _ => VmError::InvalidParams,
    })?;

    stats::reset(pages, frames);
    let vm_mutex = kernel.sem_create("vm.mutex", 1);
    *HANDLES.write() = Some(Handles {
        mmu,
        disk,
        kernel,
        vm_mutex,
    });

    pagetable::init(pages)?;
    frame::init(frames)?;
    swap::init(pages, frames)?;
    replacement::reset();
    pager::init(pagers)?;

    INITIALIZED.store(true, Ordering::Release);
    log::info!("virtual memory initialized: {pages} pages, {frames} frames, {pagers} pagers");
    Ok(())
}

/// Tear the subsystem down: stop the pagers, drop the MMU region, free the
/// tables and log the statistics block. Safe to call more than once.
pub fn destroy() {
    if !INITIALIZED.load(Ordering::Acquire) {
        return;
    }
    check_kernel_mode(&*kernel());
    if !INITIALIZED.swap(false, Ordering::AcqRel) {
        return;
    }

    pager::shutdown();
    mmu().shutdown();
    swap::shutdown();
    frame::shutdown();
    pagetable::shutdown();
    stats::log_summary();

    if let Some(handles) = HANDLES.write().take() {
        handles.kernel.sem_free(handles.vm_mutex);
    }
    log::info!("virtual memory destroyed");
}

/// Process fork hook: give `pid` a fresh, all-vacant page table. Returns
/// `None` when the subsystem is not initialized.
pub fn allocate_page_table(pid: Pid) -> Option<PageTableRef> {
    if !INITIALIZED.load(Ordering::Acquire) {
        return None;
    }
    check_kernel_mode(&*kernel());
    pagetable::allocate(pid)
}

/// Process quit hook: release the frames, swap slots and page table of
/// `pid`. Idempotent, so the quit path and a pager-side termination cannot
/// double-free.
pub fn free_page_table(pid: Pid) {
    if !INITIALIZED.load(Ordering::Acquire) {
        return;
    }
    check_kernel_mode(&*kernel());
    let _guard = lock();
    frame::free_all(pid);
    swap::free_all(pid);
    pagetable::free(pid);
}

/// Context switch hook: drop the MMU view of `old` and install the view of
/// `new` at protection RW. `switch(p, p)` re-installs p's view.
pub fn switch(old: Pid, new: Pid) {
    if !INITIALIZED.load(Ordering::Acquire) {
        return;
    }
    check_kernel_mode(&*kernel());
    let mmu = mmu();
    let _guard = lock();
    stats::update(|s| s.switches += 1);

    if let Some(table) = pagetable::get(old) {
        let table = table.lock();
        for (page, _) in table.resident_pages() {
            let _ = mmu.unmap(old, page);
        }
    }
    if let Some(table) = pagetable::get(new) {
        let table = table.lock();
        for (page, frame_idx) in table.resident_pages() {
            let _ = mmu.map(new, page, frame_idx, Protection::RW);
        }
    }
}
