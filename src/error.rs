//! Error taxonomy for the parts of the public surface that can fail.
//!
//! Handle operations and collector operations never fail; only allocation
//! (`make_tracked` and friends) can, so this is a small, closed enum rather
//! than a generic error trait object.

use std::any::Any;
use std::fmt;

/// Failure modes surfaced synchronously to the caller of an allocation.
pub enum GcError {
    /// The heap could not satisfy the allocation request (block allocator
    /// or large-object mmap failed).
    OutOfMemory,
    /// The user-supplied constructor panicked. The slot that was reserved
    /// for it has already been marked `BadAlloc` and will be swept normally.
    ConstructorThrew(Box<dyn Any + Send + 'static>),
    /// An API was used in a way its contract forbids (e.g. registering more
    /// than `MAX_TYPES_NUMBER` distinct types).
    Misuse(&'static str),
    /// A checked downcast (`UnsafeHandle::as`) targeted the wrong type.
    TypeMismatch,
}

impl fmt::Debug for GcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcError::OutOfMemory => write!(f, "OutOfMemory"),
            GcError::ConstructorThrew(_) => write!(f, "ConstructorThrew(..)"),
            GcError::Misuse(msg) => write!(f, "Misuse({msg:?})"),
            GcError::TypeMismatch => write!(f, "TypeMismatch"),
        }
    }
}

impl fmt::Display for GcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcError::OutOfMemory => write!(f, "out of memory"),
            GcError::ConstructorThrew(_) => write!(f, "constructor panicked during allocation"),
            GcError::Misuse(msg) => write!(f, "misuse: {msg}"),
            GcError::TypeMismatch => write!(f, "type mismatch"),
        }
    }
}

impl std::error::Error for GcError {}

pub type Result<T> = std::result::Result<T, GcError>;
