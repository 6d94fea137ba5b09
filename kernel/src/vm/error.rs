use crate::mmu::MmuError;

/// Recoverable error codes returned to kernel callers.
///
/// Structural failures (a process without a page table, a corrupt frame
/// descriptor, a misbound fault vector) are not represented here; those
/// halt the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    NotInitialized,
    AlreadyInitialized,
    InvalidParams,
    InvalidNumPagers,
    InvalidPid,
    InvalidPage,
    InvalidFrame,
    OutOfPages,
    FrameNotMapped,
    /// The swap disk has no room (or the transfer failed); fatal to the
    /// faulting process only.
    OutOfSwap,
}

pub type VmResult<T> = Result<T, VmError>;

impl core::fmt::Display for VmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            VmError::NotInitialized => "virtual memory not initialized",
            VmError::AlreadyInitialized => "virtual memory already initialized",
            VmError::InvalidParams => "invalid region dimensions",
            VmError::InvalidNumPagers => "invalid number of pagers",
            VmError::InvalidPid => "invalid process id",
            VmError::InvalidPage => "invalid page number",
            VmError::InvalidFrame => "invalid frame number",
            VmError::OutOfPages => "no free page available",
            VmError::FrameNotMapped => "frame is not mapped",
            VmError::OutOfSwap => "out of swap space",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for VmError {}

impl From<MmuError> for VmError {
    fn from(err: MmuError) -> Self {
        match err {
            MmuError::Uninitialized => VmError::NotInitialized,
            MmuError::AlreadyInitialized => VmError::AlreadyInitialized,
            MmuError::BadDimensions => VmError::InvalidParams,
            MmuError::InvalidPage => VmError::InvalidPage,
            MmuError::InvalidFrame => VmError::InvalidFrame,
            MmuError::NotMapped => VmError::FrameNotMapped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mmu_errors_translate() {
        assert_eq!(VmError::from(MmuError::InvalidFrame), VmError::InvalidFrame);
        assert_eq!(VmError::from(MmuError::NotMapped), VmError::FrameNotMapped);
        assert_eq!(VmError::from(MmuError::BadDimensions), VmError::InvalidParams);
    }
}
