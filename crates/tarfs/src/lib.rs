//! Read-only access to the contents of tar archives, without extracting them.
//!
//! An archive is indexed once, when it is opened: every header is decoded in a single pass over a
//! block-addressable [`BlockStore`] and the resulting entries are kept in an immutable
//! [`ArchiveIndex`].  After that, entries can be looked up by `(directory, name)` or by their
//! numeric identity, directories can be listed, and payloads can be read at arbitrary offsets.
//! Reads go straight to the store, one block at a time.
//!
//! Only the classic single-header format is modelled (UStar, star and GNU headers, with the UStar
//! name prefix).  PAX extended headers, GNU long names and sparse files are not interpreted.
//!
//! # Example
//!
//! ```no_run
//! use tarfs::{Archive, FileStore};
//!
//! let archive = Archive::open(FileStore::open("archive.tar", 512)?)?;
//!
//! for child in archive.list_children("") {
//!     println!("{:?} {:?} {}", child.kind, child.name, child.identity);
//! }
//!
//! if let Some(entry) = archive.lookup("etc", "hostname") {
//!     let contents = archive.read_to_vec(entry, 0, 4096)?;
//!     println!("{}", String::from_utf8_lossy(&contents));
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(unsafe_code)]
#![deny(missing_debug_implementations)]

pub mod archive;
pub mod block;
pub mod entry;
pub mod error;
pub mod header;
pub mod index;
pub mod options;
pub mod payload;
pub mod store;

pub use archive::{Archive, DirEntry, Node, ROOT_MODE};
pub use entry::{Entry, EntryKind};
pub use error::{DecodeError, Error, Result, StoreError};
pub use index::{ArchiveIndex, Truncation, FIRST_IDENTITY, ROOT_IDENTITY};
pub use options::OpenOptions;
pub use store::{BlockStore, FileStore, MemoryStore};
