//! Kernel error types
//!
//! Every fallible internal API returns [`KernelResult`] and propagates with
//! `?`. The system-call boundary flattens any error to `-1`; no error is
//! converted to success on the way out.

use core::fmt;

/// Main kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// A caller-supplied value is unusable (null pointer, fd out of range,
    /// bad RTC rate, over-long path, invalid flag combination).
    InvalidArgument {
        what: &'static str,
    },
    /// A fixed table or region is full.
    ResourceExhausted {
        resource: &'static str,
    },
    /// No directory entry, process, or descriptor matches.
    NotFound {
        what: &'static str,
    },
    /// A program image failed validation (magic mismatch, wrong file type).
    BadImage {
        reason: &'static str,
    },
    /// The operation is not supported by the target object.
    Unsupported {
        operation: &'static str,
    },
    /// A subsystem was used before its `init()` ran.
    NotInitialized {
        subsystem: &'static str,
    },
}

/// Result type alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

impl KernelError {
    /// Flatten to the system-call error convention.
    pub fn to_syscall(self) -> isize {
        -1
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { what } => write!(f, "invalid argument: {}", what),
            Self::ResourceExhausted { resource } => {
                write!(f, "resource exhausted: {}", resource)
            }
            Self::NotFound { what } => write!(f, "not found: {}", what),
            Self::BadImage { reason } => write!(f, "bad program image: {}", reason),
            Self::Unsupported { operation } => write!(f, "operation not supported: {}", operation),
            Self::NotInitialized { subsystem } => {
                write!(f, "subsystem not initialized: {}", subsystem)
            }
        }
    }
}
