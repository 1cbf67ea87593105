//! Virtual memory collaborator
//!
//! The kernel core never touches page tables itself. Shared-memory grants
//! and the copies at the syscall boundary go through [`VmOps`], which the
//! board layer implements over the real MMU and the tests implement over a
//! flat byte array.

use bitflags::bitflags;

use crate::error::KernError;
use crate::types::ProcessId;

bitflags! {
    /// Access rights for a shared region in the receiving process
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MapAttrs: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
    }
}

/// Errors reported by the VM layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    #[error("address range not mapped in source process")]
    BadAddress,
    #[error("out of memory for mapping")]
    NoMemory,
}

impl From<VmError> for KernError {
    fn from(err: VmError) -> Self {
        match err {
            VmError::BadAddress => KernError::IllegalArgs,
            VmError::NoMemory => KernError::NoMemory,
        }
    }
}

/// Operations the IPC engine needs from the memory manager
pub trait VmOps: Send + Sync {
    /// Map `[addr, addr + size)` of `from` into `to`; returns the address
    /// of the region in `to`.
    fn share(
        &self,
        from: ProcessId,
        addr: usize,
        size: usize,
        to: ProcessId,
        attrs: MapAttrs,
    ) -> Result<usize, VmError>;

    /// Undo a mapping made by [`VmOps::share`]
    fn unshare(&self, pid: ProcessId, addr: usize, size: usize);

    /// Copy user memory of `pid` into `buf`
    fn copy_in(&self, pid: ProcessId, addr: usize, buf: &mut [u8]) -> Result<(), VmError>;

    /// Copy `buf` into user memory of `pid`
    fn copy_out(&self, pid: ProcessId, addr: usize, buf: &[u8]) -> Result<(), VmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_error_mapping() {
        assert_eq!(KernError::from(VmError::BadAddress), KernError::IllegalArgs);
        assert_eq!(KernError::from(VmError::NoMemory), KernError::NoMemory);
    }

    #[test]
    fn test_attrs() {
        let rw = MapAttrs::READ | MapAttrs::WRITE;
        assert!(rw.contains(MapAttrs::READ));
        assert!(!rw.contains(MapAttrs::EXEC));
        assert_eq!(MapAttrs::from_bits(0b11), Some(rw));
        assert_eq!(MapAttrs::from_bits(0b1000), None);
    }
}
