// Host simulation
//
// Glues the simulated MMU, disk and kernel services into a single-CPU
// machine. User processes are spawned as threads, but memory references
// are serialized through a CPU token; handing the token to a different
// process drives `vm::switch`. A reference that misses raises the fault
// vector on the faulting thread and retries once service completes. The
// token is released for the duration of the wait, as a blocked process
// yields a real processor: other ready processes keep running and can
// fault while earlier faults are still being serviced.

mod disk;
mod mmu;
mod services;

pub use disk::SimDisk;
pub use mmu::{PendingFault, SimMmu};
pub use services::SimServices;

use std::sync::{Arc, Mutex as StdMutex};

use crate::mmu::Mmu;
use crate::services::{DiskGeometry, KernelServices};
use crate::vm;
use crate::vm::error::VmResult;
use crate::Pid;

/// The referencing process was terminated by the kernel; the reference
/// never completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Killed;

impl core::fmt::Display for Killed {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("process terminated by the kernel")
    }
}

impl std::error::Error for Killed {}

pub struct Machine {
    pub mmu: Arc<SimMmu>,
    pub disk: Arc<SimDisk>,
    pub services: Arc<SimServices>,
    cpu: StdMutex<Option<Pid>>,
}

impl Machine {
    pub fn new(page_size: usize, geometry: DiskGeometry) -> Arc<Self> {
        Arc::new(Self {
            mmu: Arc::new(SimMmu::new(page_size)),
            disk: Arc::new(SimDisk::new(geometry)),
            services: Arc::new(SimServices::new()),
            cpu: StdMutex::new(None),
        })
    }

    pub fn page_size(&self) -> usize {
        self.mmu.page_size()
    }

    /// Bring the VM subsystem up on this machine.
    pub fn start(&self, mappings: usize, pages: usize, frames: usize, pagers: usize)
        -> VmResult<()> {
        vm::init(
            Arc::clone(&self.mmu) as Arc<dyn crate::Mmu>,
            Arc::clone(&self.disk) as Arc<dyn crate::DiskDriver>,
            Arc::clone(&self.services) as Arc<dyn crate::KernelServices>,
            mappings,
            pages,
            frames,
            pagers,
        )
    }

    /// Tear the subsystem down and reap every thread it left behind.
    pub fn stop(&self) {
        vm::destroy();
        self.services.join_all();
    }

    /// Fork a user process. The body runs with a fresh page table; the
    /// table is released when the body returns (also when the process was
    /// terminated mid-run, where the release is a no-op).
    pub fn spawn_user<F>(self: &Arc<Self>, name: &str, body: F) -> Pid
    where
        F: FnOnce(&UserProc) + Send + 'static,
    {
        let machine = Arc::clone(self);
        self.services.spawn(
            name,
            Box::new(move || {
                let pid = machine.services.current_pid();
                vm::allocate_page_table(pid).expect("VM subsystem not running");
                let proc = UserProc {
                    machine: Arc::clone(&machine),
                    pid,
                };
                body(&proc);
                vm::free_page_table(pid);
            }),
        )
    }

    /// Wait for a user process to finish.
    pub fn wait(&self, pid: Pid) {
        self.services.join(pid);
    }

    fn access(&self, pid: Pid, addr: usize, write: bool, byte: u8) -> Result<u8, Killed> {
        loop {
            let fault = {
                let mut cpu = self.cpu.lock().unwrap_or_else(|e| e.into_inner());
                if *cpu != Some(pid) {
                    let old = cpu.unwrap_or(pid);
                    vm::switch(old, pid);
                    *cpu = Some(pid);
                }
                if self.services.is_killed(pid) {
                    return Err(Killed);
                }
                let outcome = if write {
                    self.mmu.store(pid, addr, byte).map(|()| byte)
                } else {
                    self.mmu.load(pid, addr)
                };
                match outcome {
                    Ok(value) => return Ok(value),
                    Err(fault) => fault,
                }
            };
            // CPU is yielded while the handler blocks.
            self.mmu.raise(fault);
        }
    }
}

/// Handle a user-process body uses to reference the shared VM region.
pub struct UserProc {
    machine: Arc<Machine>,
    pid: Pid,
}

impl UserProc {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn page_size(&self) -> usize {
        self.machine.page_size()
    }

    pub fn read(&self, addr: usize) -> Result<u8, Killed> {
        self.machine.access(self.pid, addr, false, 0)
    }

    pub fn write(&self, addr: usize, byte: u8) -> Result<(), Killed> {
        self.machine.access(self.pid, addr, true, byte).map(|_| ())
    }

    pub fn read_bytes(&self, addr: usize, len: usize) -> Result<Vec<u8>, Killed> {
        (0..len).map(|i| self.read(addr + i)).collect()
    }

    pub fn write_bytes(&self, addr: usize, bytes: &[u8]) -> Result<(), Killed> {
        for (i, &byte) in bytes.iter().enumerate() {
            self.write(addr + i, byte)?;
        }
        Ok(())
    }
}
