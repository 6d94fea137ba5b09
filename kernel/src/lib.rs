//! Virtual-memory subsystem for a small multi-process teaching kernel.
//!
//! User processes share one virtual address region. Their pages are backed
//! by physical frames when resident and by a swap disk otherwise. Hardware
//! page faults are queued and serviced by a pool of pager worker processes
//! which allocate frames, run clock replacement when memory is tight, and
//! move page contents between frames and the swap disk.
//!
//! The hardware MMU, the disk driver and the process/semaphore primitives
//! of the host kernel are collaborators reached through the traits in
//! [`mmu`] and [`services`]. The [`sim`] module provides host-side
//! implementations of all three so the subsystem can run (and be tested)
//! on an ordinary machine.

pub mod mmu;
pub mod services;
pub mod sim;
pub mod vm;

/// Process identifier, assigned by the host kernel.
pub type Pid = u32;

pub use mmu::{AccessBits, FaultCause, Mmu, MmuError, Protection};
pub use services::{DiskDriver, DiskError, DiskGeometry, KernelServices, SemId};
pub use vm::error::{VmError, VmResult};
pub use vm::stats::VmStats;
