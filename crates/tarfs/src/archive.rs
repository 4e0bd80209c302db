//! The archive facade: open, look up, list and read.

use std::{
    ffi::{OsStr, OsString},
    os::unix::ffi::OsStrExt,
};

use crate::{
    block::BlockReader,
    entry::{join_path, Entry, EntryKind, S_IFDIR},
    error::Result,
    header::path_components,
    index::{ArchiveIndex, Truncation, ROOT_IDENTITY},
    options::OpenOptions,
    payload::read_payload,
    store::BlockStore,
};

/// Mode reported for the archive root and for implied directories.
pub const ROOT_MODE: u32 = S_IFDIR | 0o555;

/// One item of a directory listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry<'a> {
    pub name: &'a OsStr,
    pub identity: u64,
    pub kind: EntryKind,
}

/// The result of resolving a path.
#[derive(Debug, Clone)]
pub enum Node<'a> {
    /// The root or a directory that exists only as the parent of other entries.  Carries the
    /// normalized path.
    Directory(OsString),
    Entry(&'a Entry),
}

impl<'a> Node<'a> {
    pub fn entry(&self) -> Option<&'a Entry> {
        match self {
            Node::Entry(entry) => Some(*entry),
            Node::Directory(_) => None,
        }
    }

    pub fn is_dir(&self) -> bool {
        match self {
            Node::Entry(entry) => entry.kind.is_dir(),
            Node::Directory(_) => true,
        }
    }

    /// The node's path relative to the archive root.
    pub fn path(&self) -> OsString {
        match self {
            Node::Entry(entry) => entry.full_path(),
            Node::Directory(path) => path.clone(),
        }
    }

    /// The identity of an entry, or [`ROOT_IDENTITY`] for the root.  Implied directories have
    /// none.
    pub fn identity(&self) -> Option<u64> {
        match self {
            Node::Entry(entry) => Some(entry.identity),
            Node::Directory(path) if path.is_empty() => Some(ROOT_IDENTITY),
            Node::Directory(_) => None,
        }
    }
}

/// A tar archive indexed on top of a block store.
///
/// The index is built in full when the archive is opened and never changes afterwards, so an
/// `Archive` over a `Sync` store can be shared between threads and read from concurrently.
#[derive(Debug)]
pub struct Archive<S> {
    reader: BlockReader<S>,
    index: ArchiveIndex,
}

impl<S: BlockStore> Archive<S> {
    /// Opens an archive with default options.
    pub fn open(store: S) -> Result<Self> {
        Self::open_with(store, OpenOptions::default())
    }

    /// Opens an archive, indexing every header in the store.
    ///
    /// An empty store, or one that doesn't start with a tar header, opens successfully with no
    /// entries.  The open fails if the store can't be read, or, with
    /// [`OpenOptions::strict`], if a header is malformed.
    pub fn open_with(store: S, options: OpenOptions) -> Result<Self> {
        let reader = BlockReader::new(store);
        let index = ArchiveIndex::build(&reader, &options)?;
        Ok(Self { reader, index })
    }

    /// Releases the index and returns the store.
    pub fn close(self) -> S {
        self.reader.into_inner()
    }

    pub fn index(&self) -> &ArchiveIndex {
        &self.index
    }

    pub fn store(&self) -> &S {
        self.reader.store()
    }

    pub fn entries(&self) -> &[Entry] {
        self.index.entries()
    }

    pub fn truncation(&self) -> Option<&Truncation> {
        self.index.truncation()
    }

    pub fn lookup(&self, directory: impl AsRef<OsStr>, name: impl AsRef<OsStr>) -> Option<&Entry> {
        let found = self.index.find_by_path(&directory, &name);
        log::trace!(
            "lookup({:?}, {:?}) -> {:?}",
            directory.as_ref(),
            name.as_ref(),
            found.map(|entry| entry.identity)
        );
        found
    }

    pub fn lookup_by_identity(&self, identity: u64) -> Option<&Entry> {
        self.index.find_by_identity(identity)
    }

    /// Lists the entries directly inside `directory`, in archive order.
    pub fn list_children(&self, directory: impl AsRef<OsStr>) -> Vec<DirEntry<'_>> {
        self.index
            .children_of(directory)
            .map(|entry| DirEntry {
                name: &entry.name,
                identity: entry.identity,
                kind: entry.kind,
            })
            .collect()
    }

    /// Directories inside `directory` that only exist as the parent of other entries.
    ///
    /// These never appear in [`list_children()`](Self::list_children), which only returns
    /// entries.
    pub fn implied_directories(&self, directory: impl AsRef<OsStr>) -> Vec<&OsStr> {
        self.index.implied_subdirectories(directory)
    }

    /// Reads from `entry`'s payload; see [`read_payload`].
    pub fn read(&self, entry: &Entry, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        Ok(read_payload(&self.reader, entry, offset, buffer)?)
    }

    /// Reads up to `length` bytes of `entry`'s payload starting at `offset`.
    pub fn read_to_vec(&self, entry: &Entry, offset: u64, length: usize) -> Result<Vec<u8>> {
        let available = entry.length.saturating_sub(offset);
        let mut buffer = vec![0u8; length.min(usize::try_from(available).unwrap_or(usize::MAX))];
        let count = self.read(entry, offset, &mut buffer)?;
        buffer.truncate(count);
        Ok(buffer)
    }

    /// Resolves a relative path one component at a time.
    ///
    /// Empty and `.` components are ignored, so `""`, `"."` and `"/"` all name the root.
    /// Symlinks are not followed and `..` is never resolved.  Returns `None` if some component
    /// does not exist or is not a directory.
    pub fn resolve(&self, path: impl AsRef<OsStr>) -> Option<Node<'_>> {
        let mut current = Node::Directory(OsString::new());

        for component in path_components(path.as_ref().as_bytes()) {
            if component == b".." {
                return None;
            }

            let directory = match &current {
                Node::Directory(path) => path.clone(),
                Node::Entry(entry) if entry.kind.is_dir() => entry.full_path(),
                Node::Entry(_) => return None,
            };

            let name = OsStr::from_bytes(component);
            current = match self.lookup(&directory, name) {
                Some(entry) => Node::Entry(entry),
                None => {
                    let path = join_path(&directory, name);
                    if !self.index.is_directory(&path) {
                        return None;
                    }
                    Node::Directory(path)
                }
            };
        }

        Some(current)
    }
}
