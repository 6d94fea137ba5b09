// Fault interrupt handler
//
// Runs on the stack of the faulting process. It only snapshots the fault,
// queues it and blocks on the slot's reply semaphore; it never takes the
// VM mutex and performs no MMU work. The faulting instruction is retried
// by the hardware once the handler returns.

use crate::mmu::FaultCause;
use crate::services::KernelServices;
use crate::vm::pager::{self, FaultRecord};
use crate::vm::stats;

pub(crate) fn page_fault_vector(cause: FaultCause, offset: usize) {
    let kernel = crate::vm::kernel();
    stats::update(|s| s.faults += 1);
    let pid = kernel.current_pid();
    log::trace!("fault: pid {pid} offset {offset:#x} ({cause:?})");
    let reply = pager::enqueue(FaultRecord { pid, offset, cause });
    kernel.sem_down(reply);
}
