use crate::result::*;

/// A checked cast from u64 to usize
///
/// Entry sizes come straight from the archive,
/// so we can't assume they fit before allocating buffers for them.
pub fn usize<I: Into<u64>>(i: I) -> ZipResult<usize> {
    let i: u64 = i.into();
    usize::try_from(i).map_err(|_| ZipError::InsufficientAddressSpace)
}
