use std::{error::Error, fmt};

/// Errors the allocator can report.
///
/// Misuse of the API (freeing a pointer twice, freeing a pointer that did not
/// come from the allocator) is *not* represented here: it is undefined
/// behaviour and never detected at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The region provider could not map `requested` bytes, or the request
    /// could not even be expressed as a region size.
    ResourceExhaustion { requested: usize },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceExhaustion { requested } => {
                write!(f, "could not obtain a memory region of {requested} bytes")
            }
        }
    }
}

impl Error for AllocError {}
