//! Byte-range reads on top of a block store.

use std::cmp::min;

use crate::{error::StoreError, store::BlockStore};

/// Translates arbitrary `(offset, length)` byte ranges into whole-block fetches.
///
/// The reader holds no state besides the store, so a shared reference can be used from any
/// number of threads if the store allows it.
#[derive(Debug)]
pub struct BlockReader<S> {
    store: S,
}

impl<S: BlockStore> BlockReader<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    /// Fills `buffer` with the bytes starting at `offset` in the store.
    ///
    /// A range straddling block boundaries is assembled from as many fetches as needed.  Every
    /// fetched block must be exactly the store's block size; a short or long block, a failed
    /// fetch, or a block past the end of the store fails the whole read, as does a store that
    /// reports a block size of zero.  Nothing is retried.
    ///
    /// # Return value
    ///
    /// On success, returns `buffer.len()`.
    pub fn read(&self, buffer: &mut [u8], offset: u64) -> Result<usize, StoreError> {
        let block_size = self.store.block_size();
        if block_size == 0 {
            return Err(StoreError::ZeroBlockSize);
        }
        let count = self.store.block_count();
        let length = buffer.len();
        let mut done = 0;

        while done < length {
            let position = offset
                .checked_add(done as u64)
                .ok_or(StoreError::Overflow { offset, length })?;
            let block = position / block_size as u64;
            let inner = (position % block_size as u64) as usize;
            let chunk = min(block_size - inner, length - done);

            if block >= count {
                return Err(StoreError::OutOfRange { block, count });
            }

            let data = self
                .store
                .fetch_block(block)
                .map_err(|source| StoreError::Fetch { block, source })?;

            if data.len() != block_size {
                return Err(StoreError::BlockSize {
                    block,
                    expected: block_size,
                    actual: data.len(),
                });
            }

            buffer[done..done + chunk].copy_from_slice(&data[inner..inner + chunk]);
            done += chunk;
        }

        Ok(done)
    }
}
