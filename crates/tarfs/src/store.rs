//! Block-addressable backing stores.
//!
//! The indexer and readers only ever see a store through [`BlockStore`]: a fixed block size, a
//! block count, and the ability to fetch one whole block by number.  Two implementations are
//! provided: [`MemoryStore`] for images already in memory and [`FileStore`] for regular files and
//! block devices, read with positional reads so that a single store can serve concurrent readers.

use std::{
    borrow::Cow,
    fs::File,
    io::{Error, ErrorKind, Result},
    os::fd::OwnedFd,
    path::Path,
    sync::Arc,
};

use rustix::{
    fs::{seek, SeekFrom},
    io::{pread, Errno},
};

/// A store that can only be accessed in whole blocks of a fixed size.
///
/// Implementations must be safe to call from several threads at once if they are to be shared
/// between readers; nothing in this crate takes a lock around a fetch.
pub trait BlockStore {
    /// Size of every block in bytes.  Never zero.
    fn block_size(&self) -> usize;

    /// Number of blocks in the store.
    fn block_count(&self) -> u64;

    /// Fetches block number `block` in full.
    ///
    /// The returned buffer is expected to be exactly [`block_size()`](Self::block_size) bytes
    /// long; callers treat anything else as a corrupted store.  Fetching a block at or past
    /// [`block_count()`](Self::block_count) fails with [`ErrorKind::UnexpectedEof`].
    fn fetch_block(&self, block: u64) -> Result<Cow<'_, [u8]>>;

    /// Total size of the store in bytes.
    fn byte_len(&self) -> u64 {
        self.block_count().saturating_mul(self.block_size() as u64)
    }
}

impl<S: BlockStore + ?Sized> BlockStore for &S {
    fn block_size(&self) -> usize {
        (**self).block_size()
    }

    fn block_count(&self) -> u64 {
        (**self).block_count()
    }

    fn fetch_block(&self, block: u64) -> Result<Cow<'_, [u8]>> {
        (**self).fetch_block(block)
    }
}

impl<S: BlockStore + ?Sized> BlockStore for Arc<S> {
    fn block_size(&self) -> usize {
        (**self).block_size()
    }

    fn block_count(&self) -> u64 {
        (**self).block_count()
    }

    fn fetch_block(&self, block: u64) -> Result<Cow<'_, [u8]>> {
        (**self).fetch_block(block)
    }
}

fn check_block_size(block_size: usize) -> Result<()> {
    if block_size == 0 {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "block size must be non-zero",
        ));
    }
    Ok(())
}

fn past_end(block: u64, count: u64) -> Error {
    Error::new(
        ErrorKind::UnexpectedEof,
        format!("block {block} is past the end of the store ({count} blocks)"),
    )
}

/// A store backed by an in-memory image.
///
/// The image is zero-padded up to a whole number of blocks when the store is created.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    data: Box<[u8]>,
    block_size: usize,
}

impl MemoryStore {
    /// Creates a store over `data`, divided into blocks of `block_size` bytes.
    ///
    /// Fails with [`ErrorKind::InvalidInput`] if `block_size` is zero.
    pub fn new(data: impl Into<Vec<u8>>, block_size: usize) -> Result<Self> {
        check_block_size(block_size)?;
        let mut data = data.into();
        data.resize(data.len().next_multiple_of(block_size), 0);
        Ok(Self {
            data: data.into_boxed_slice(),
            block_size,
        })
    }

    /// The padded image.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl BlockStore for MemoryStore {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        (self.data.len() / self.block_size) as u64
    }

    fn fetch_block(&self, block: u64) -> Result<Cow<'_, [u8]>> {
        usize::try_from(block)
            .ok()
            .and_then(|block| self.data.chunks_exact(self.block_size).nth(block))
            .map(Cow::Borrowed)
            .ok_or_else(|| past_end(block, self.block_count()))
    }
}

/// A store backed by a file descriptor: a regular file or a block device.
///
/// Blocks are read with `pread()`, so reads never depend on the descriptor's file position.
/// If the file size is not a multiple of the block size, the final block is zero-filled.
#[derive(Debug)]
pub struct FileStore {
    fd: OwnedFd,
    block_size: usize,
    len: u64,
}

impl FileStore {
    /// Opens the file at `path` read-only.
    pub fn open(path: impl AsRef<Path>, block_size: usize) -> Result<Self> {
        Self::from_fd(File::open(path)?, block_size)
    }

    /// Wraps an already-open descriptor.
    ///
    /// The size is determined by seeking to the end, which works for block devices as well as
    /// regular files.
    pub fn from_fd(fd: impl Into<OwnedFd>, block_size: usize) -> Result<Self> {
        check_block_size(block_size)?;
        let fd = fd.into();
        let len = seek(&fd, SeekFrom::End(0))?;
        Ok(Self {
            fd,
            block_size,
            len,
        })
    }

    /// Size of the underlying file in bytes, before padding to whole blocks.
    pub fn file_len(&self) -> u64 {
        self.len
    }
}

impl BlockStore for FileStore {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.len.div_ceil(self.block_size as u64)
    }

    fn fetch_block(&self, block: u64) -> Result<Cow<'_, [u8]>> {
        let count = self.block_count();
        if block >= count {
            return Err(past_end(block, count));
        }

        let start = block * self.block_size as u64;
        let mut buffer = vec![0u8; self.block_size];
        let mut filled = 0;

        while filled < buffer.len() {
            match pread(&self.fd, &mut buffer[filled..], start + filled as u64) {
                // short final block: the rest stays zeroed
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(Errno::INTR) => continue,
                Err(errno) => return Err(errno.into()),
            }
        }

        Ok(Cow::Owned(buffer))
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_memory_store_pads_to_whole_blocks() {
        let store = MemoryStore::new(b"hello world".to_vec(), 4).unwrap();
        assert_eq!(store.block_size(), 4);
        assert_eq!(store.block_count(), 3);
        assert_eq!(store.byte_len(), 12);
        assert_eq!(&*store.fetch_block(0).unwrap(), b"hell");
        assert_eq!(&*store.fetch_block(2).unwrap(), b"rld\0");
    }

    #[test]
    fn test_memory_store_empty() {
        let store = MemoryStore::new(Vec::<u8>::new(), 512).unwrap();
        assert_eq!(store.block_count(), 0);
        assert_eq!(
            store.fetch_block(0).unwrap_err().kind(),
            ErrorKind::UnexpectedEof
        );
    }

    #[test]
    fn test_zero_block_size_is_rejected() {
        assert_eq!(
            MemoryStore::new(b"x".to_vec(), 0).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );

        let file = tempfile::tempfile().unwrap();
        assert_eq!(
            FileStore::from_fd(file, 0).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_file_store() {
        let mut file = tempfile::tempfile().unwrap();
        let content: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        file.write_all(&content).unwrap();

        let store = FileStore::from_fd(file, 512).unwrap();
        assert_eq!(store.file_len(), 1000);
        assert_eq!(store.block_count(), 2);

        assert_eq!(&*store.fetch_block(0).unwrap(), &content[..512]);

        // the final block is short on disk and comes back zero-filled
        let last = store.fetch_block(1).unwrap();
        assert_eq!(last.len(), 512);
        assert_eq!(&last[..488], &content[512..]);
        assert!(last[488..].iter().all(|&b| b == 0));

        assert_eq!(
            store.fetch_block(2).unwrap_err().kind(),
            ErrorKind::UnexpectedEof
        );
    }

    #[test]
    fn test_store_through_references() {
        let store = Arc::new(MemoryStore::new(vec![7u8; 16], 8).unwrap());
        let by_ref = &*store;
        assert_eq!(by_ref.block_count(), 2);
        assert_eq!(store.block_count(), 2);
        assert_eq!(&*BlockStore::fetch_block(&store, 1).unwrap(), &[7u8; 8]);
    }
}
