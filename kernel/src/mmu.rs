// MMU hardware contract
//
// The subsystem never talks to translation hardware directly; everything
// goes through the `Mmu` trait. The hardware tracks one mapping view per
// tag (we use the owning process id as the tag) and a pair of access bits
// per physical frame.

use bitflags::bitflags;

bitflags! {
    /// Page protection bits for a mapping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protection: u8 {
        const READ  = 1 << 0;
        const WRITE = 1 << 1;
        const RW    = Self::READ.bits() | Self::WRITE.bits();
    }
}

bitflags! {
    /// Per-frame access bits maintained by the hardware.
    ///
    /// `REFERENCED` is set on any access through a mapping, `DIRTY` on a
    /// write. Software reads and clears them through `get_access` /
    /// `set_access`; it never owns them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AccessBits: u8 {
        const REFERENCED = 1 << 0;
        const DIRTY      = 1 << 1;
    }
}

/// Why the MMU raised a fault interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCause {
    /// The referenced page has no mapping in the current view.
    PageFault,
    /// The reference was outside the region or violated protection.
    AccessViolation,
}

/// Errors reported by the translation hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmuError {
    Uninitialized,
    AlreadyInitialized,
    BadDimensions,
    InvalidPage,
    InvalidFrame,
    NotMapped,
}

impl core::fmt::Display for MmuError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            MmuError::Uninitialized => "MMU not initialized",
            MmuError::AlreadyInitialized => "MMU already initialized",
            MmuError::BadDimensions => "MMU rejected region dimensions",
            MmuError::InvalidPage => "page number out of range",
            MmuError::InvalidFrame => "frame number out of range",
            MmuError::NotMapped => "page is not mapped",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for MmuError {}

/// Fault interrupt entry point. Runs on the stack of the faulting process
/// with the cause and the faulting byte offset into the region.
pub type FaultVector = fn(FaultCause, usize);

/// Contract with the translation hardware.
pub trait Mmu: Send + Sync {
    /// Bring the region up with the given dimensions.
    fn init(&self, mappings: usize, pages: usize, frames: usize) -> Result<(), MmuError>;

    /// Tear the region down and drop all mappings.
    fn shutdown(&self);

    /// Size of one page (and one frame) in bytes.
    fn page_size(&self) -> usize;

    /// Bind or unbind the fault interrupt vector.
    fn set_fault_vector(&self, vector: Option<FaultVector>);

    /// Install `page -> frame` in the view of `tag`, replacing any
    /// previous mapping of that page.
    fn map(&self, tag: crate::Pid, page: usize, frame: usize, protection: Protection)
        -> Result<(), MmuError>;

    /// Remove `page` from the view of `tag`.
    fn unmap(&self, tag: crate::Pid, page: usize) -> Result<(), MmuError>;

    /// Read the access bits of a frame.
    fn get_access(&self, frame: usize) -> Result<AccessBits, MmuError>;

    /// Overwrite the access bits of a frame.
    fn set_access(&self, frame: usize, bits: AccessBits) -> Result<(), MmuError>;

    /// Privileged whole-page read through an existing mapping. Does not
    /// disturb the access bits.
    fn read_mapped(&self, tag: crate::Pid, page: usize, buf: &mut [u8]) -> Result<(), MmuError>;

    /// Privileged whole-page write through an existing mapping. Does not
    /// disturb the access bits.
    fn write_mapped(&self, tag: crate::Pid, page: usize, buf: &[u8]) -> Result<(), MmuError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rw_covers_both_bits() {
        assert!(Protection::RW.contains(Protection::READ));
        assert!(Protection::RW.contains(Protection::WRITE));
    }

    #[test]
    fn access_bits_clear_individually() {
        let bits = AccessBits::REFERENCED | AccessBits::DIRTY;
        assert_eq!(bits - AccessBits::REFERENCED, AccessBits::DIRTY);
        assert_eq!(bits - AccessBits::DIRTY, AccessBits::REFERENCED);
    }
}
