//! Kernel error taxonomy
//!
//! Every error here is returned synchronously in the calling thread's
//! return register as a negative code. None of them is fatal to the kernel.

/// Register value for success
pub const OK: isize = 0;

/// Errors produced by the kernel core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum KernError {
    /// Caller misuse: bad id, bad size, bad flags
    #[error("illegal arguments")]
    IllegalArgs,
    /// The object is not owned by the calling process
    #[error("access denied")]
    AccessDenied,
    /// A conflicting operation is in progress on the object
    #[error("object busy")]
    Busy,
    /// The target object or thread is gone or used up
    #[error("target dead")]
    Dead,
    /// The channel was closed or the connection orphaned
    #[error("no connection")]
    NoConnection,
    /// The timeout elapsed before the operation could complete
    #[error("timed out")]
    Timeout,
    /// A public name or requested id is already taken
    #[error("already exists")]
    AlreadyExists,
    /// A kernel table is full
    #[error("out of kernel resources")]
    NoMemory,
}

impl KernError {
    /// Negative register code for this error
    pub const fn code(self) -> isize {
        match self {
            KernError::IllegalArgs => -1,
            KernError::AccessDenied => -2,
            KernError::Busy => -3,
            KernError::Dead => -4,
            KernError::NoConnection => -5,
            KernError::Timeout => -6,
            KernError::AlreadyExists => -7,
            KernError::NoMemory => -8,
        }
    }

    /// Decode a register value; `None` for success or unknown codes
    pub const fn from_code(code: isize) -> Option<Self> {
        match code {
            -1 => Some(KernError::IllegalArgs),
            -2 => Some(KernError::AccessDenied),
            -3 => Some(KernError::Busy),
            -4 => Some(KernError::Dead),
            -5 => Some(KernError::NoConnection),
            -6 => Some(KernError::Timeout),
            -7 => Some(KernError::AlreadyExists),
            -8 => Some(KernError::NoMemory),
            _ => None,
        }
    }
}

/// Result type for kernel operations
pub type KernResult<T> = Result<T, KernError>;

/// Fold a result into the register convention (negative = error)
pub fn to_register(result: KernResult<isize>) -> isize {
    match result {
        Ok(value) => value,
        Err(err) => err.code(),
    }
}
