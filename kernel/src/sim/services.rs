// Simulated host kernel: processes are threads, semaphores are
// mutex/condvar pairs, and the current pid rides in thread-local storage.

use std::cell::Cell;
use std::collections::BTreeSet;
use std::sync::{Condvar, Mutex as StdMutex};
use std::sync::Arc;
use std::thread::JoinHandle;

use spin::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::services::{KernelServices, SemId};
use crate::Pid;

thread_local! {
    static CURRENT_PID: Cell<Pid> = const { Cell::new(0) };
}

struct Sem {
    count: StdMutex<usize>,
    available: Condvar,
}

pub struct SimServices {
    next_pid: AtomicU32,
    kernel_mode: AtomicBool,
    sems: Mutex<Vec<Option<Arc<Sem>>>>,
    killed: Mutex<BTreeSet<Pid>>,
    threads: StdMutex<Vec<(Pid, JoinHandle<()>)>>,
}

impl SimServices {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1),
            kernel_mode: AtomicBool::new(true),
            sems: Mutex::new(Vec::new()),
            killed: Mutex::new(BTreeSet::new()),
            threads: StdMutex::new(Vec::new()),
        }
    }

    /// Flip the simulated processor mode (for exercising the kernel-mode
    /// guard).
    pub fn set_kernel_mode(&self, on: bool) {
        self.kernel_mode.store(on, Ordering::Release);
    }

    /// Whether `terminate` has been called on `pid`.
    pub fn is_killed(&self, pid: Pid) -> bool {
        self.killed.lock().contains(&pid)
    }

    /// Wait for one process to finish; panics from the process propagate.
    pub fn join(&self, pid: Pid) {
        let handle = {
            let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
            let idx = threads.iter().position(|(p, _)| *p == pid);
            idx.map(|i| threads.remove(i).1)
        };
        if let Some(handle) = handle {
            if let Err(panic) = handle.join() {
                std::panic::resume_unwind(panic);
            }
        }
    }

    /// Wait for every spawned process, pagers included. Only meaningful
    /// once the subsystem has been destroyed.
    pub fn join_all(&self) {
        loop {
            let handle = {
                let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
                threads.pop()
            };
            let Some((_, handle)) = handle else { break };
            if let Err(panic) = handle.join() {
                std::panic::resume_unwind(panic);
            }
        }
    }

    fn sem(&self, id: SemId) -> Arc<Sem> {
        self.sems
            .lock()
            .get(id)
            .cloned()
            .flatten()
            .expect("semaphore freed or never created")
    }
}

impl Default for SimServices {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelServices for SimServices {
    fn current_pid(&self) -> Pid {
        CURRENT_PID.with(Cell::get)
    }

    fn kernel_mode(&self) -> bool {
        self.kernel_mode.load(Ordering::Acquire)
    }

    fn spawn(&self, name: &str, entry: Box<dyn FnOnce() + Send>) -> Pid {
        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                CURRENT_PID.with(|c| c.set(pid));
                entry();
            })
            .expect("spawn process thread");
        self.threads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((pid, handle));
        pid
    }

    fn terminate(&self, pid: Pid) {
        self.killed.lock().insert(pid);
        log::debug!("pid {pid} marked terminated");
    }

    fn sem_create(&self, _name: &str, initial: usize) -> SemId {
        let sem = Arc::new(Sem {
            count: StdMutex::new(initial),
            available: Condvar::new(),
        });
        let mut sems = self.sems.lock();
        if let Some(free) = sems.iter().position(Option::is_none) {
            sems[free] = Some(sem);
            free
        } else {
            sems.push(Some(sem));
            sems.len() - 1
        }
    }

    fn sem_free(&self, id: SemId) {
        if let Some(slot) = self.sems.lock().get_mut(id) {
            *slot = None;
        }
    }

    fn sem_down(&self, id: SemId) {
        let sem = self.sem(id);
        let mut count = sem.count.lock().unwrap_or_else(|e| e.into_inner());
        while *count == 0 {
            count = sem
                .available
                .wait(count)
                .unwrap_or_else(|e| e.into_inner());
        }
        *count -= 1;
    }

    fn sem_up(&self, id: SemId) {
        let sem = self.sem(id);
        let mut count = sem.count.lock().unwrap_or_else(|e| e.into_inner());
        *count += 1;
        sem.available.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semaphores_count_and_block() {
        let services = Arc::new(SimServices::new());
        let sem = services.sem_create("test", 0);
        let clone = Arc::clone(&services);
        let handle = std::thread::spawn(move || {
            clone.sem_down(sem);
            clone.sem_down(sem);
        });
        services.sem_up(sem);
        services.sem_up(sem);
        handle.join().unwrap();
    }

    #[test]
    fn spawned_processes_see_their_pid() {
        let services = Arc::new(SimServices::new());
        let done = services.sem_create("done", 0);
        let clone = Arc::clone(&services);
        let pid = services.spawn(
            "child",
            Box::new(move || {
                assert_ne!(clone.current_pid(), 0);
                clone.sem_up(done);
            }),
        );
        services.sem_down(done);
        services.join(pid);
    }

    #[test]
    fn terminate_is_sticky() {
        let services = SimServices::new();
        assert!(!services.is_killed(9));
        services.terminate(9);
        assert!(services.is_killed(9));
    }
}
