use crate::result::*;

/// Converts a size or offset from the dump into a buffer length.
///
/// Stream sizes are 32 bits on disk but can reach a full `u64` through
/// nested resources, which won't fit in a 32-bit `usize`.
pub fn usize<I: Into<u64>>(i: I) -> MdmpResult<usize> {
    let i: u64 = i.into();
    usize::try_from(i).map_err(|_| MdmpError::InsufficientAddressSpace)
}
