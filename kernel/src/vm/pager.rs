// Fault queue and pager pool
//
// Faults are queued on a bounded ring whose slots each own a reply
// semaphore (a single-slot rendezvous with the blocked faulter). A
// counting semaphore tracks queued work; each pager worker waits on it,
// dequeues one fault and services it under the VM mutex.

use std::sync::atomic::{AtomicBool, Ordering};

use lazy_static::lazy_static;
use spin::Mutex;

use crate::mmu::{AccessBits, FaultCause, Mmu, Protection};
use crate::services::{KernelServices, SemId};
use crate::vm::error::VmError;
use crate::vm::pagetable::PageTableEntry;
use crate::vm::swap::SwapLoad;
use crate::vm::{frame, pagetable, replacement, stats, swap};
use crate::Pid;

/// Upper bound on the pager pool size.
pub const MAX_PAGERS: usize = 3;

const FAULT_QUEUE_SLOTS: usize = 256;

/// Snapshot of one fault, taken in the interrupt handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FaultRecord {
    pub pid: Pid,
    pub offset: usize,
    pub cause: FaultCause,
}

/// Bounded FIFO ring of fault records. The slot index doubles as the
/// reply-semaphore index for the rendezvous with the faulting process.
#[derive(Debug)]
pub(crate) struct FaultQueue {
    slots: Vec<Option<FaultRecord>>,
    head: usize,
    len: usize,
}

impl FaultQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            head: 0,
            len: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Append a fault; returns the slot it landed in, or `None` when full.
    pub(crate) fn push(&mut self, fault: FaultRecord) -> Option<usize> {
        if self.len == self.slots.len() {
            return None;
        }
        let slot = (self.head + self.len) % self.slots.len();
        self.slots[slot] = Some(fault);
        self.len += 1;
        Some(slot)
    }

    /// Remove the oldest fault together with its slot index.
    pub(crate) fn pop(&mut self) -> Option<(usize, FaultRecord)> {
        if self.len == 0 {
            return None;
        }
        let slot = self.head;
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        self.slots[slot].take().map(|fault| (slot, fault))
    }
}

struct PagerPool {
    pagers: usize,
    fault_sem: SemId,
    reply: Vec<SemId>,
    running: Vec<SemId>,
    exited: Vec<SemId>,
}

lazy_static! {
    static ref POOL: Mutex<Option<PagerPool>> = Mutex::new(None);
    static ref QUEUE: Mutex<Option<FaultQueue>> = Mutex::new(None);
}

static SHUTTING_DOWN: AtomicBool = AtomicBool::new(false);

pub(crate) fn init(pagers: usize) -> Result<(), VmError> {
    if pagers == 0 || pagers > MAX_PAGERS {
        return Err(VmError::InvalidNumPagers);
    }
    if POOL.lock().is_some() {
        return Err(VmError::AlreadyInitialized);
    }
    let kernel = crate::vm::kernel();
    let mmu = crate::vm::mmu();

    SHUTTING_DOWN.store(false, Ordering::Release);
    *QUEUE.lock() = Some(FaultQueue::new(FAULT_QUEUE_SLOTS));

    let fault_sem = kernel.sem_create("vm.faults", 0);
    let reply: Vec<SemId> = (0..FAULT_QUEUE_SLOTS)
        .map(|i| kernel.sem_create(&format!("vm.reply.{i}"), 0))
        .collect();
    let running: Vec<SemId> = (0..pagers)
        .map(|i| kernel.sem_create(&format!("vm.pager.{i}.running"), 0))
        .collect();
    let exited: Vec<SemId> = (0..pagers)
        .map(|i| kernel.sem_create(&format!("vm.pager.{i}.exited"), 0))
        .collect();

    *POOL.lock() = Some(PagerPool {
        pagers,
        fault_sem,
        reply,
        running: running.clone(),
        exited,
    });

    mmu.set_fault_vector(Some(crate::vm::fault::page_fault_vector));

    for i in 0..pagers {
        kernel.spawn(&format!("pager-{i}"), Box::new(move || pager_main(i)));
    }
    for &sem in &running {
        kernel.sem_down(sem);
    }
    log::info!("pager pool started: {pagers} pagers");
    Ok(())
}

/// Stop the pool: raise the flag, post one wakeup per pager, wait for each
/// to exit, then free the queue and its semaphores.
pub(crate) fn shutdown() {
    let Some(pool) = POOL.lock().take() else {
        return;
    };
    let kernel = crate::vm::kernel();
    let mmu = crate::vm::mmu();

    SHUTTING_DOWN.store(true, Ordering::Release);
    for _ in 0..pool.pagers {
        kernel.sem_up(pool.fault_sem);
    }
    for &sem in &pool.exited {
        kernel.sem_down(sem);
    }
    mmu.set_fault_vector(None);

    kernel.sem_free(pool.fault_sem);
    for &sem in pool.reply.iter().chain(&pool.running).chain(&pool.exited) {
        kernel.sem_free(sem);
    }
    *QUEUE.lock() = None;
    log::info!("pager pool stopped");
}

/// Queue a fault and return the reply semaphore the handler must block on.
/// Queue overflow would mean more in-flight faults than processes; that is
/// a broken host kernel, so it halts.
pub(crate) fn enqueue(fault: FaultRecord) -> SemId {
    let slot = QUEUE
        .lock()
        .as_mut()
        .and_then(|q| q.push(fault))
        .expect("fault queue overflow");
    let (fault_sem, reply) = {
        let guard = POOL.lock();
        let pool = guard.as_ref().expect("pager pool not running");
        (pool.fault_sem, pool.reply[slot])
    };
    crate::vm::kernel().sem_up(fault_sem);
    reply
}

fn pager_main(index: usize) {
    let kernel = crate::vm::kernel();
    let (fault_sem, reply, running, exited) = {
        let guard = POOL.lock();
        let pool = guard.as_ref().expect("pager pool not running");
        (
            pool.fault_sem,
            pool.reply.clone(),
            pool.running[index],
            pool.exited[index],
        )
    };
    kernel.sem_up(running);
    log::debug!("pager {index} running as pid {}", kernel.current_pid());

    loop {
        kernel.sem_down(fault_sem);
        if SHUTTING_DOWN.load(Ordering::Acquire) {
            break;
        }
        let Some((slot, fault)) = QUEUE.lock().as_mut().and_then(FaultQueue::pop) else {
            continue;
        };
        service(&fault);
        kernel.sem_up(reply[slot]);
    }
    kernel.sem_up(exited);
}

fn service(fault: &FaultRecord) {
    let mmu = crate::vm::mmu();

    if fault.cause == FaultCause::AccessViolation {
        log::warn!(
            "access violation by pid {} at offset {:#x}",
            fault.pid,
            fault.offset
        );
        let _guard = crate::vm::lock();
        reap(fault.pid);
        return;
    }

    let _guard = crate::vm::lock();
    let page = fault.offset / mmu.page_size();
    let Some(table) = pagetable::get(fault.pid) else {
        // Process died before its fault was serviced.
        return;
    };

    if table.lock().entry(page).is_none() {
        log::warn!("pid {} faulted on nonexistent page {page}", fault.pid);
        reap(fault.pid);
        return;
    }

    let frame_idx = match frame::allocate_free() {
        Some(idx) => idx,
        None => match replacement::evict() {
            Ok(idx) => idx,
            Err(err) => {
                log::warn!("eviction failed servicing pid {}: {err}", fault.pid);
                reap(fault.pid);
                return;
            }
        },
    };

    match swap::load(fault.pid, page, frame_idx) {
        Ok(SwapLoad::Loaded) => {
            stats::update(|s| s.page_ins += 1);
        }
        Ok(SwapLoad::Empty) => {
            let zeros = vec![0u8; mmu.page_size()];
            let mapping = frame::map(frame_idx).expect("scratch mapping for zero fill");
            mapping.write_from(&zeros).expect("zero fill");
            mapping.unmap().expect("scratch unmap");
            stats::update(|s| s.new += 1);
        }
        Err(err) => {
            log::warn!("cannot back page {page} of pid {}: {err}", fault.pid);
            frame::release(frame_idx);
            reap(fault.pid);
            return;
        }
    }

    // Contents are final; publish the page.
    mmu.set_access(frame_idx, AccessBits::empty())
        .expect("clear access bits");
    if let Some(entry) = table.lock().entry_mut(page) {
        *entry = PageTableEntry::resident(frame_idx);
    }
    frame::install(frame_idx, fault.pid, page);
    mmu.map(fault.pid, page, frame_idx, Protection::RW)
        .expect("install mapping");
}

/// Kill a process and release everything it holds. Caller has the VM mutex.
fn reap(pid: Pid) {
    let kernel = crate::vm::kernel();
    kernel.terminate(pid);
    frame::free_all(pid);
    swap::free_all(pid);
    pagetable::free(pid);
    log::warn!("terminated pid {pid} and released its memory");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pid: Pid) -> FaultRecord {
        FaultRecord {
            pid,
            offset: 0,
            cause: FaultCause::PageFault,
        }
    }

    #[test]
    fn queue_is_fifo() {
        let mut q = FaultQueue::new(4);
        assert_eq!(q.len(), 0);
        let a = q.push(record(1)).unwrap();
        let b = q.push(record(2)).unwrap();
        assert_ne!(a, b);
        let (slot, fault) = q.pop().unwrap();
        assert_eq!(slot, a);
        assert_eq!(fault.pid, 1);
        let (slot, fault) = q.pop().unwrap();
        assert_eq!(slot, b);
        assert_eq!(fault.pid, 2);
        assert!(q.pop().is_none());
    }

    #[test]
    fn queue_slots_wrap_around() {
        let mut q = FaultQueue::new(2);
        q.push(record(1)).unwrap();
        q.push(record(2)).unwrap();
        assert!(q.push(record(3)).is_none());
        q.pop().unwrap();
        let slot = q.push(record(3)).unwrap();
        assert!(slot < q.capacity());
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop().unwrap().1.pid, 2);
        assert_eq!(q.pop().unwrap().1.pid, 3);
    }
}
