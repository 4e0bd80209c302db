//! Indexed archive members.

use std::{
    ffi::{OsStr, OsString},
    os::unix::ffi::OsStrExt,
    path::Path,
};

use crate::header::{DecodedHeader, Header, HEADER_SIZE};

pub const S_IFMT: u32 = 0o170000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFIFO: u32 = 0o010000;
pub const S_IFLNK: u32 = 0o120000;

const WRITE_BITS: u32 = 0o222;

/// What kind of filesystem object an entry describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Regular file (type `'0'`, `'\0'` or the contiguous-file type `'7'`).
    RegularFile,
    /// Directory (type `'5'`, or any path ending in `/`).
    Directory,
    /// Symbolic link (type `'2'`).
    Symlink,
    /// Character device (type `'3'`).
    CharDevice,
    /// Block device (type `'4'`).
    BlockDevice,
    /// FIFO (type `'6'`).
    Fifo,
    /// Anything else, including hard links.  Read like a regular file.
    Other(u8),
}

impl EntryKind {
    pub fn from_typeflag(typeflag: u8) -> Self {
        match typeflag {
            b'0' | b'\0' | b'7' => EntryKind::RegularFile,
            b'5' => EntryKind::Directory,
            b'2' => EntryKind::Symlink,
            b'3' => EntryKind::CharDevice,
            b'4' => EntryKind::BlockDevice,
            b'6' => EntryKind::Fifo,
            other => EntryKind::Other(other),
        }
    }

    /// The `S_IFMT` bits a host should report for this kind.
    pub fn file_type_bits(self) -> u32 {
        match self {
            EntryKind::RegularFile | EntryKind::Other(_) => S_IFREG,
            EntryKind::Directory => S_IFDIR,
            EntryKind::Symlink => S_IFLNK,
            EntryKind::CharDevice => S_IFCHR,
            EntryKind::BlockDevice => S_IFBLK,
            EntryKind::Fifo => S_IFIFO,
        }
    }

    pub fn is_dir(self) -> bool {
        self == EntryKind::Directory
    }

    pub fn is_symlink(self) -> bool {
        self == EntryKind::Symlink
    }

    /// Whether the payload holds file contents, which is true of regular files and of
    /// unrecognised types.
    pub fn has_contents(self) -> bool {
        matches!(self, EntryKind::RegularFile | EntryKind::Other(_))
    }

    /// A one-character code in the style of `ls -l`.
    pub fn as_char(self) -> char {
        match self {
            EntryKind::RegularFile | EntryKind::Other(_) => '-',
            EntryKind::Directory => 'd',
            EntryKind::Symlink => 'l',
            EntryKind::CharDevice => 'c',
            EntryKind::BlockDevice => 'b',
            EntryKind::Fifo => 'p',
        }
    }
}

/// One member of an indexed archive.
///
/// The attribute fields are decoded once when the archive is indexed.  The raw header is kept so
/// that fields without a dedicated attribute (link target, owner names, device numbers) can be
/// read later.
#[derive(Debug)]
pub struct Entry {
    pub header: Header,
    /// Path of the containing directory, empty at the top level.
    pub directory: Box<OsStr>,
    pub name: Box<OsStr>,
    pub header_offset: u64,
    pub data_offset: u64,
    pub length: u64,
    pub identity: u64,
    pub kind: EntryKind,
    /// Permission bits exactly as stored in the header.
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
}

impl Entry {
    pub(crate) fn new(decoded: DecodedHeader, identity: u64, header_offset: u64) -> Self {
        let DecodedHeader {
            header,
            directory,
            name,
            length,
            kind,
            mode,
            uid,
            gid,
            atime,
            mtime,
            ctime,
        } = decoded;

        Self {
            header,
            directory,
            name,
            header_offset,
            // headers are a whole sector, so the payload follows directly
            data_offset: header_offset + HEADER_SIZE as u64,
            length,
            identity,
            kind,
            mode,
            uid,
            gid,
            atime,
            mtime,
            ctime,
        }
    }

    /// The entry's path relative to the archive root, without a leading `/`.
    pub fn full_path(&self) -> OsString {
        join_path(&self.directory, &self.name)
    }

    pub fn size(&self) -> u64 {
        self.length
    }

    /// The link target, for symlinks only.
    pub fn symlink_target(&self) -> Option<&Path> {
        self.kind
            .is_symlink()
            .then(|| Path::new(OsStr::from_bytes(self.header.link_name_bytes())))
    }

    /// Device numbers, for character and block devices only.
    pub fn device(&self) -> Option<(u32, u32)> {
        match self.kind {
            EntryKind::CharDevice | EntryKind::BlockDevice => self.header.device(),
            _ => None,
        }
    }

    pub fn username(&self) -> &OsStr {
        OsStr::from_bytes(self.header.username())
    }

    pub fn groupname(&self) -> &OsStr {
        OsStr::from_bytes(self.header.groupname())
    }

    /// Mode bits for a read-only mount: the file type bits plus the stored permissions with all
    /// write bits cleared.
    pub fn host_mode(&self) -> u32 {
        self.kind.file_type_bits() | (self.mode & !S_IFMT & !WRITE_BITS)
    }
}

/// Joins a directory path and a name with `/`, leaving top-level names unprefixed.
pub fn join_path(directory: &OsStr, name: &OsStr) -> OsString {
    if directory.is_empty() {
        return name.to_os_string();
    }
    let mut path = OsString::with_capacity(directory.len() + 1 + name.len());
    path.push(directory);
    path.push("/");
    path.push(name);
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::decode;

    fn entry(path: &str, entry_type: tar::EntryType, mode: u32) -> Entry {
        let mut header = tar::Header::new_ustar();
        header.set_path(path).unwrap();
        header.set_size(0);
        header.set_mode(mode);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        header.set_entry_type(entry_type);
        if entry_type == tar::EntryType::Symlink {
            header.set_link_name("../target").unwrap();
        }
        header.set_cksum();
        let decoded = decode(Header::from_bytes(header.as_bytes()), true)
            .unwrap()
            .unwrap();
        Entry::new(decoded, 7, 1024)
    }

    #[test]
    fn test_kind_table() {
        assert_eq!(EntryKind::from_typeflag(b'0'), EntryKind::RegularFile);
        assert_eq!(EntryKind::from_typeflag(0), EntryKind::RegularFile);
        assert_eq!(EntryKind::from_typeflag(b'7'), EntryKind::RegularFile);
        assert_eq!(EntryKind::from_typeflag(b'5'), EntryKind::Directory);
        assert_eq!(EntryKind::from_typeflag(b'2'), EntryKind::Symlink);
        assert_eq!(EntryKind::from_typeflag(b'3'), EntryKind::CharDevice);
        assert_eq!(EntryKind::from_typeflag(b'4'), EntryKind::BlockDevice);
        assert_eq!(EntryKind::from_typeflag(b'6'), EntryKind::Fifo);
        assert_eq!(EntryKind::from_typeflag(b'1'), EntryKind::Other(b'1'));
        assert_eq!(EntryKind::Other(b'1').file_type_bits(), S_IFREG);
        assert!(EntryKind::Other(b'x').has_contents());
        assert!(!EntryKind::Directory.has_contents());
    }

    #[test]
    fn test_entry_offsets() {
        let entry = entry("a/b.txt", tar::EntryType::Regular, 0o644);
        assert_eq!(entry.identity, 7);
        assert_eq!(entry.header_offset, 1024);
        assert_eq!(entry.data_offset, 1536);
        assert_eq!(entry.full_path(), "a/b.txt");
    }

    #[test]
    fn test_host_mode_masks_write_bits() {
        let file = entry("f", tar::EntryType::Regular, 0o4755);
        assert_eq!(file.mode, 0o4755);
        assert_eq!(file.host_mode(), S_IFREG | 0o4555);

        let dir = entry("d/", tar::EntryType::Directory, 0o777);
        assert_eq!(dir.host_mode(), S_IFDIR | 0o555);
    }

    #[test]
    fn test_symlink_target() {
        let link = entry("dir/link", tar::EntryType::Symlink, 0o777);
        assert_eq!(link.symlink_target(), Some(Path::new("../target")));
        assert_eq!(link.full_path(), "dir/link");

        let file = entry("file", tar::EntryType::Regular, 0o644);
        assert_eq!(file.symlink_target(), None);
        assert_eq!(file.device(), None);
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path(OsStr::new(""), OsStr::new("x")), "x");
        assert_eq!(join_path(OsStr::new("a/b"), OsStr::new("x")), "a/b/x");
    }
}
