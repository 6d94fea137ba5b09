// Paging statistics
//
// Counters are bumped at the authoritative site of each event: faults in
// the fault handler, new/page_ins in the pager loop, replaced/page_outs in
// the replacement engine, free counts in the frame table and swap store.

use lazy_static::lazy_static;
use spin::Mutex;

/// Statistics block read by the test harness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmStats {
    /// Size of the VM region, in pages.
    pub pages: usize,
    /// Size of physical memory, in frames.
    pub frames: usize,
    /// Size of the swap disk, in page-sized blocks.
    pub blocks: usize,
    pub free_frames: usize,
    pub free_blocks: usize,
    /// Context switches.
    pub switches: usize,
    /// Page faults, all causes.
    pub faults: usize,
    /// Faults on previously untouched pages, serviced by zero fill.
    pub new: usize,
    /// Faults that read the page back from the swap disk.
    pub page_ins: usize,
    /// Dirty evictions written to the swap disk.
    pub page_outs: usize,
    /// Pages evicted, clean or dirty.
    pub replaced: usize,
}

lazy_static! {
    static ref STATS: Mutex<VmStats> = Mutex::new(VmStats::default());
}

/// Snapshot of the statistics block.
pub fn statistics() -> VmStats {
    *STATS.lock()
}

pub(crate) fn update(f: impl FnOnce(&mut VmStats)) {
    f(&mut STATS.lock());
}

pub(crate) fn reset(pages: usize, frames: usize) {
    *STATS.lock() = VmStats {
        pages,
        frames,
        ..VmStats::default()
    };
}

pub(crate) fn log_summary() {
    let s = statistics();
    log::info!("vm statistics:");
    log::info!("  pages:      {}", s.pages);
    log::info!("  frames:     {}", s.frames);
    log::info!("  blocks:     {}", s.blocks);
    log::info!("  freeFrames: {}", s.free_frames);
    log::info!("  freeBlocks: {}", s.free_blocks);
    log::info!("  switches:   {}", s.switches);
    log::info!("  faults:     {}", s.faults);
    log::info!("  new:        {}", s.new);
    log::info!("  pageIns:    {}", s.page_ins);
    log::info!("  pageOuts:   {}", s.page_outs);
    log::info!("  replaced:   {}", s.replaced);
}
