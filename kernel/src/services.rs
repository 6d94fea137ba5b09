// Host kernel collaborators
//
// Process control, counting semaphores and the swap disk driver live
// outside this subsystem. They are reached through the two traits below;
// the `sim` module carries the host-side implementations.

use crate::Pid;

/// Handle to a counting semaphore owned by the host kernel.
pub type SemId = usize;

/// Process and synchronization primitives of the host kernel.
pub trait KernelServices: Send + Sync {
    /// Pid of the process running on the calling thread of control.
    fn current_pid(&self) -> Pid;

    /// Whether the caller is executing in kernel mode.
    fn kernel_mode(&self) -> bool;

    /// Fork a kernel worker process running `entry`.
    fn spawn(&self, name: &str, entry: Box<dyn FnOnce() + Send>) -> Pid;

    /// Terminate a process. The victim stops making progress; its VM
    /// resources are released by the caller.
    fn terminate(&self, pid: Pid);

    /// Create a counting semaphore with the given initial count.
    fn sem_create(&self, name: &str, initial: usize) -> SemId;

    /// Release a semaphore. No process may be blocked on it.
    fn sem_free(&self, sem: SemId);

    /// Decrement the count, blocking while it is zero.
    fn sem_down(&self, sem: SemId);

    /// Increment the count, waking one blocked process.
    fn sem_up(&self, sem: SemId);
}

/// Geometry of the swap disk, fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskGeometry {
    /// Bytes per sector.
    pub sector_size: usize,
    /// Sectors per track.
    pub sectors_per_track: usize,
    /// Number of tracks.
    pub tracks: usize,
}

impl DiskGeometry {
    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.sector_size * self.sectors_per_track * self.tracks
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskError {
    /// The sector run falls outside the disk.
    OutOfRange,
    /// The transfer failed.
    Io,
}

impl core::fmt::Display for DiskError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DiskError::OutOfRange => f.write_str("sector run out of range"),
            DiskError::Io => f.write_str("disk transfer failed"),
        }
    }
}

impl std::error::Error for DiskError {}

/// Block driver for the swap disk. Transfers whole runs of consecutive
/// sectors addressed by `(track, first_sector, sectors)`.
pub trait DiskDriver: Send + Sync {
    fn geometry(&self) -> DiskGeometry;

    fn read(&self, track: usize, first_sector: usize, sectors: usize, buf: &mut [u8])
        -> Result<(), DiskError>;

    fn write(&self, track: usize, first_sector: usize, sectors: usize, buf: &[u8])
        -> Result<(), DiskError>;
}
