// Clock replacement
//
// Second-chance scan over the frame table. The hand is shared by all
// pagers and survives across faults; callers hold the VM mutex for the
// whole eviction, so the read-then-clear of the reference bit cannot race
// another pager.

use lazy_static::lazy_static;
use spin::Mutex;

use crate::mmu::{AccessBits, Mmu, Protection};
use crate::vm::error::{VmError, VmResult};
use crate::vm::{frame, pagetable, stats, swap};

lazy_static! {
    static ref HAND: Mutex<usize> = Mutex::new(0);
}

pub(crate) fn reset() {
    *HAND.lock() = 0;
}

/// Select a victim frame, write its page to swap if dirty, detach it from
/// its owner and hand it to the caller marked busy.
///
/// `OutOfSwap` is returned before any victim state changes, so the fault
/// can be failed without corrupting the resident page.
pub(crate) fn evict() -> VmResult<usize> {
    let mmu = crate::vm::mmu();
    let num_frames = frame::count();
    if num_frames == 0 {
        return Err(VmError::NotInitialized);
    }

    let victim = loop {
        let idx = {
            let mut hand = HAND.lock();
            let idx = *hand;
            *hand = (idx + 1) % num_frames;
            idx
        };
        if frame::is_busy(idx) {
            continue;
        }
        let bits = mmu.get_access(idx)?;
        if bits.contains(AccessBits::REFERENCED) {
            mmu.set_access(idx, bits - AccessBits::REFERENCED)?;
        } else {
            break idx;
        }
    };

    // The victim's owner may be running on another processor context.
    // Detaching its mapping before the dirty bit is sampled means the
    // owner can no longer dirty the frame behind the write-back; a store
    // that loses this race faults and is serviced after the eviction.
    let owner = frame::occupant(victim);
    if let Some((pid, page)) = owner {
        let _ = mmu.unmap(pid, page);
    }
    let bits = mmu.get_access(victim)?;
    if bits.contains(AccessBits::DIRTY) {
        if let Some((pid, page)) = owner {
            if let Err(err) = swap::save(pid, page, victim) {
                // Failed write-back leaves the victim resident; put the
                // mapping back.
                mmu.map(pid, page, victim, Protection::RW)?;
                return Err(err);
            }
            mmu.set_access(victim, bits - AccessBits::DIRTY)?;
            stats::update(|s| s.page_outs += 1);
            log::debug!("wrote back dirty page {page} of pid {pid} from frame {victim}");
        }
    }

    if let Some((pid, page)) = owner {
        if let Some(table) = pagetable::get(pid) {
            if let Some(entry) = table.lock().entry_mut(page) {
                entry.incore = false;
            }
        }
    }

    frame::claim(victim);
    stats::update(|s| s.replaced += 1);
    log::debug!("evicted frame {victim} (was {owner:?})");
    Ok(victim)
}
