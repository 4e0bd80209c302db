//! Building and querying the in-memory entry index.
//!
//! The index owns every [`Entry`] in archive order.  Two lookup structures refer to entries by
//! position: one keyed by identity and one grouping entries by their containing directory.  The
//! directory grouping also records directories that only exist implicitly, as the parent of some
//! entry, so that path walks work on archives that omit directory headers.

use std::{
    collections::HashMap,
    ffi::OsStr,
    os::unix::ffi::OsStrExt,
    slice,
};

use crate::{
    block::BlockReader,
    entry::{join_path, Entry},
    error::{DecodeError, Error, Result},
    header::{decode, sector_padding, DecodedHeader, Header, HEADER_SIZE},
    options::OpenOptions,
    store::BlockStore,
};

/// Identity reserved for the archive root, which has no header of its own.
pub const ROOT_IDENTITY: u64 = 1;

/// Identity of the first indexed entry.
pub const FIRST_IDENTITY: u64 = 2;

/// Where and why indexing stopped early.
#[derive(Debug)]
pub struct Truncation {
    /// Offset of the header that could not be decoded.
    pub offset: u64,
    pub error: DecodeError,
}

#[derive(Debug, Default)]
struct DirectoryGroup {
    /// Latest entry for each name.
    names: HashMap<Box<OsStr>, usize>,
    /// Every entry in this directory, in archive order.
    order: Vec<usize>,
    /// Names of child directories, in the order they were first seen.
    subdirectories: Vec<Box<OsStr>>,
}

/// The immutable index of an archive's entries.
#[derive(Debug)]
pub struct ArchiveIndex {
    entries: Vec<Entry>,
    by_identity: HashMap<u64, usize>,
    directories: HashMap<Box<OsStr>, DirectoryGroup>,
    truncation: Option<Truncation>,
}

impl Default for ArchiveIndex {
    fn default() -> Self {
        let mut directories = HashMap::new();
        directories.insert(OsStr::new("").into(), DirectoryGroup::default());
        Self {
            entries: vec![],
            by_identity: HashMap::new(),
            directories,
            truncation: None,
        }
    }
}

/// Decodes the header at `offset` and checks that its payload lies within the store.
fn decode_at(
    block: &[u8; HEADER_SIZE],
    offset: u64,
    store_len: u64,
    options: &OpenOptions,
) -> std::result::Result<Option<DecodedHeader>, DecodeError> {
    let Some(decoded) = decode(Header::from_bytes(block), options.verify_checksums)? else {
        return Ok(None);
    };

    let data_offset = offset + HEADER_SIZE as u64;
    match data_offset.checked_add(decoded.length) {
        Some(end) if end <= store_len => Ok(Some(decoded)),
        _ => Err(DecodeError::PayloadPastEnd {
            data_offset,
            length: decoded.length,
            store_len,
        }),
    }
}

impl ArchiveIndex {
    /// Indexes the archive by walking its headers from the start of the store.
    ///
    /// Walking stops at the first block without tar magic, or when less than a header's worth of
    /// store remains.  A header that carries the magic but cannot be decoded also stops the walk:
    /// the entries before it are kept and the failure is recorded as the index's
    /// [`truncation()`](Self::truncation), unless `options.strict` is set, in which case it is
    /// returned as [`Error::Decode`].  Store failures are always returned.
    pub fn build<S: BlockStore>(reader: &BlockReader<S>, options: &OpenOptions) -> Result<Self> {
        let store_len = reader.store().byte_len();
        let mut index = Self::default();
        let mut next_identity = FIRST_IDENTITY;
        let mut offset = 0u64;
        let mut block = [0u8; HEADER_SIZE];

        while store_len.saturating_sub(offset) >= HEADER_SIZE as u64 {
            reader.read(&mut block, offset)?;

            let decoded = match decode_at(&block, offset, store_len, options) {
                Ok(Some(decoded)) => decoded,
                Ok(None) => {
                    log::debug!("end of archive at offset {offset}");
                    break;
                }
                Err(source) if options.strict => return Err(Error::Decode { offset, source }),
                Err(error) => {
                    log::warn!("archive truncated at offset {offset}: {error}");
                    index.truncation = Some(Truncation { offset, error });
                    break;
                }
            };

            let header_offset = offset;
            let end = header_offset + HEADER_SIZE as u64 + decoded.length;
            offset = end + sector_padding(end);

            if decoded.name.is_empty() {
                log::trace!("skipping root header at offset {header_offset}");
                continue;
            }

            log::trace!(
                "{header_offset}: {:?} {:?} ({} bytes) -> {next_identity}",
                join_path(&decoded.directory, &decoded.name),
                decoded.kind,
                decoded.length,
            );

            index.insert(Entry::new(decoded, next_identity, header_offset));
            next_identity += 1;
        }

        log::debug!(
            "indexed {} entries in {} directories",
            index.entries.len(),
            index.directories.len()
        );

        Ok(index)
    }

    fn insert(&mut self, entry: Entry) {
        let position = self.entries.len();

        self.add_directory(&entry.directory);
        if entry.kind.is_dir() {
            self.add_directory(&entry.full_path());
        }

        let group = self
            .directories
            .entry(entry.directory.clone())
            .or_default();
        group.names.insert(entry.name.clone(), position);
        group.order.push(position);

        self.by_identity.insert(entry.identity, position);
        self.entries.push(entry);
    }

    /// Records `path` and any of its ancestors that aren't known yet.
    fn add_directory(&mut self, path: &OsStr) {
        let mut path = path.as_bytes();

        if self.directories.contains_key(OsStr::from_bytes(path)) {
            return;
        }
        self.directories
            .insert(OsStr::from_bytes(path).into(), DirectoryGroup::default());

        loop {
            let (parent, name) = match path.iter().rposition(|&b| b == b'/') {
                Some(pos) => (&path[..pos], &path[pos + 1..]),
                None => (&b""[..], path),
            };

            let known = self.directories.contains_key(OsStr::from_bytes(parent));
            self.directories
                .entry(OsStr::from_bytes(parent).into())
                .or_default()
                .subdirectories
                .push(OsStr::from_bytes(name).into());

            if known {
                break;
            }
            path = parent;
        }
    }

    pub fn find_by_identity(&self, identity: u64) -> Option<&Entry> {
        self.by_identity
            .get(&identity)
            .map(|&position| &self.entries[position])
    }

    /// Finds the entry named `name` in `directory`.
    ///
    /// Both are compared byte for byte.  If the archive contains the same path more than once,
    /// the last occurrence wins.
    pub fn find_by_path(
        &self,
        directory: impl AsRef<OsStr>,
        name: impl AsRef<OsStr>,
    ) -> Option<&Entry> {
        self.directories
            .get(directory.as_ref())?
            .names
            .get(name.as_ref())
            .map(|&position| &self.entries[position])
    }

    /// Every entry whose containing directory is exactly `directory`, in archive order.
    ///
    /// Repeated paths are all included.  An unknown directory has no children.
    pub fn children_of(&self, directory: impl AsRef<OsStr>) -> Children<'_> {
        let positions = match self.directories.get(directory.as_ref()) {
            Some(group) => group.order.iter(),
            None => [].iter(),
        };
        Children {
            entries: &self.entries,
            positions,
        }
    }

    /// Child directories of `directory` that have no header of their own.
    pub fn implied_subdirectories(&self, directory: impl AsRef<OsStr>) -> Vec<&OsStr> {
        let Some(group) = self.directories.get(directory.as_ref()) else {
            return vec![];
        };
        group
            .subdirectories
            .iter()
            .filter(|name| !group.names.contains_key(&***name))
            .map(|name| &**name)
            .collect()
    }

    /// Whether `path` is a directory, either explicitly or as the parent of some entry.
    ///
    /// The root, `""`, is always a directory.
    pub fn is_directory(&self, path: impl AsRef<OsStr>) -> bool {
        self.directories.contains_key(path.as_ref())
    }

    /// All entries in archive order.
    pub fn iter(&self) -> slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The header that stopped indexing early, if any.
    pub fn truncation(&self) -> Option<&Truncation> {
        self.truncation.as_ref()
    }
}

impl<'a> IntoIterator for &'a ArchiveIndex {
    type Item = &'a Entry;
    type IntoIter = slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the entries of one directory.  See [`ArchiveIndex::children_of`].
#[derive(Debug, Clone)]
pub struct Children<'a> {
    entries: &'a [Entry],
    positions: slice::Iter<'a, usize>,
}

impl<'a> Iterator for Children<'a> {
    type Item = &'a Entry;

    fn next(&mut self) -> Option<Self::Item> {
        self.positions.next().map(|&position| &self.entries[position])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.positions.size_hint()
    }
}

impl ExactSizeIterator for Children<'_> {}
