//! Bounded reads of entry payloads.

use std::cmp::min;

use crate::{block::BlockReader, entry::Entry, error::StoreError, store::BlockStore};

/// Reads from `entry`'s payload starting at `offset` into `buffer`.
///
/// The read is clamped to the entry's declared length, so it may fill less than the whole buffer.
/// Returns the number of bytes read, which is 0 when `offset` is at or past the end of the
/// payload.
pub fn read_payload<S: BlockStore>(
    reader: &BlockReader<S>,
    entry: &Entry,
    offset: u64,
    buffer: &mut [u8],
) -> Result<usize, StoreError> {
    if offset >= entry.length {
        return Ok(0);
    }

    let available = entry.length - offset;
    let to_read = min(buffer.len() as u64, available) as usize;
    reader.read(&mut buffer[..to_read], entry.data_offset + offset)
}
