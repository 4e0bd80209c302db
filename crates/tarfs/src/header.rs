//! Decoding of single 512-byte tar header records.
//!
//! Only the classic fixed-field header is understood.  Three variants of it are distinguished by
//! their magic:
//!
//! | Offset | Size | UStar    | star     | GNU      |
//! |--------|------|----------|----------|----------|
//! | 345    | 12   | prefix   | prefix   | atime    |
//! | 357    | 12   | prefix   | prefix   | ctime    |
//! | 369    | 107  | prefix   | prefix   | (unused) |
//! | 476    | 12   | prefix   | atime    | (unused) |
//! | 488    | 12   | prefix   | ctime    | (unused) |
//! | 508    | 4    | (unused) | "tar\0"  | (unused) |
//!
//! UStar and star headers both carry `"ustar\0"` at offset 257; star headers are recognised by the
//! additional `"tar\0"` at offset 508.  GNU headers carry `"ustar "`.  A block with any other magic
//! is not a header at all, which is how the end of an archive is detected.

use std::{
    borrow::Cow,
    ffi::OsStr,
    fmt,
    os::unix::ffi::OsStrExt,
};

use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::{entry::EntryKind, error::DecodeError};

/// Size of a tar header record in bytes.
pub const HEADER_SIZE: usize = 512;

/// Alignment of headers and payloads within an archive.
pub const SECTOR_SIZE: u64 = 512;

/// Magic of POSIX (UStar and star) headers.
pub const USTAR_MAGIC: &[u8; 6] = b"ustar\0";

/// Magic of GNU headers.
pub const GNU_MAGIC: &[u8; 6] = b"ustar ";

/// Secondary magic at the end of star headers.
pub const STAR_XMAGIC: &[u8; 4] = b"tar\0";

/// The header variants we know how to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderFormat {
    /// POSIX.1-1988 UStar: 155-byte prefix, no access or change times.
    Ustar,
    /// star: 131-byte prefix followed by access and change times.
    Star,
    /// GNU tar: no prefix, access and change times at offset 345.
    Gnu,
}

/// A raw tar header record.
///
/// The named fields follow the star layout; see the module documentation for how the other
/// variants reuse the tail of the record.
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct Header {
    pub name: [u8; 100],
    pub mode: [u8; 8],
    pub uid: [u8; 8],
    pub gid: [u8; 8],
    pub size: [u8; 12],
    pub mtime: [u8; 12],
    pub checksum: [u8; 8],
    pub typeflag: u8,
    pub linkname: [u8; 100],
    pub magic: [u8; 6],
    pub version: [u8; 2],
    pub uname: [u8; 32],
    pub gname: [u8; 32],
    pub devmajor: [u8; 8],
    pub devminor: [u8; 8],
    pub prefix: [u8; 131],
    pub atime: [u8; 12],
    pub ctime: [u8; 12],
    pub mfill: [u8; 8],
    pub xmagic: [u8; 4],
}

const _: () = assert!(size_of::<Header>() == HEADER_SIZE);

impl Default for Header {
    fn default() -> Self {
        Self::new_zeroed()
    }
}

impl Header {
    /// Views a 512-byte record as a header.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> &Header {
        zerocopy::transmute_ref!(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HEADER_SIZE] {
        zerocopy::transmute_ref!(self)
    }

    /// Identifies the header variant from its magic, or `None` if this is not a header.
    pub fn format(&self) -> Option<HeaderFormat> {
        if self.magic == *GNU_MAGIC {
            Some(HeaderFormat::Gnu)
        } else if self.magic == *USTAR_MAGIC {
            if self.xmagic == *STAR_XMAGIC {
                Some(HeaderFormat::Star)
            } else {
                Some(HeaderFormat::Ustar)
            }
        } else {
            None
        }
    }

    /// The declared payload length.
    pub fn entry_size(&self) -> Result<u64, DecodeError> {
        parse_numeric(&self.size).ok_or_else(|| DecodeError::invalid_number("size", &self.size))
    }

    /// The permission bits as stored, without file type bits.
    pub fn mode(&self) -> Result<u32, DecodeError> {
        parse_numeric(&self.mode)
            .and_then(|mode| u32::try_from(mode).ok())
            .ok_or_else(|| DecodeError::invalid_number("mode", &self.mode))
    }

    pub fn uid(&self) -> Result<u64, DecodeError> {
        parse_numeric(&self.uid).ok_or_else(|| DecodeError::invalid_number("uid", &self.uid))
    }

    pub fn gid(&self) -> Result<u64, DecodeError> {
        parse_numeric(&self.gid).ok_or_else(|| DecodeError::invalid_number("gid", &self.gid))
    }

    pub fn mtime(&self) -> Option<u64> {
        parse_numeric(&self.mtime)
    }

    /// The access time, for the variants that record one.
    pub fn atime(&self) -> Option<u64> {
        match self.format()? {
            HeaderFormat::Star => parse_numeric(&self.atime),
            HeaderFormat::Gnu => parse_numeric(&self.prefix[0..12]),
            HeaderFormat::Ustar => None,
        }
    }

    /// The status change time, for the variants that record one.
    pub fn ctime(&self) -> Option<u64> {
        match self.format()? {
            HeaderFormat::Star => parse_numeric(&self.ctime),
            HeaderFormat::Gnu => parse_numeric(&self.prefix[12..24]),
            HeaderFormat::Ustar => None,
        }
    }

    /// The path prefix, empty for GNU headers.
    pub fn prefix_bytes(&self) -> &[u8] {
        match self.format() {
            Some(HeaderFormat::Star) => truncate_null(&self.prefix),
            Some(HeaderFormat::Ustar) => truncate_null(&self.as_bytes()[345..500]),
            Some(HeaderFormat::Gnu) | None => &[],
        }
    }

    /// The full path as stored: prefix and name joined with `/` if there is a prefix.
    pub fn path_bytes(&self) -> Cow<'_, [u8]> {
        let name = truncate_null(&self.name);
        let prefix = self.prefix_bytes();
        if prefix.is_empty() {
            Cow::Borrowed(name)
        } else {
            Cow::Owned([prefix, b"/", name].concat())
        }
    }

    pub fn link_name_bytes(&self) -> &[u8] {
        truncate_null(&self.linkname)
    }

    pub fn username(&self) -> &[u8] {
        truncate_null(&self.uname)
    }

    pub fn groupname(&self) -> &[u8] {
        truncate_null(&self.gname)
    }

    /// Device major and minor numbers, if both fields hold valid numbers.
    pub fn device(&self) -> Option<(u32, u32)> {
        let major = parse_octal(&self.devmajor)?;
        let minor = parse_octal(&self.devminor)?;
        Some((u32::try_from(major).ok()?, u32::try_from(minor).ok()?))
    }

    /// Sum of all header bytes, with the checksum field counted as spaces.
    pub fn compute_checksum(&self) -> u64 {
        let bytes = self.as_bytes();
        let sum: u64 = bytes[..148]
            .iter()
            .chain(&bytes[156..])
            .map(|&b| u64::from(b))
            .sum();
        sum + 8 * u64::from(b' ')
    }

    pub fn verify_checksum(&self) -> Result<(), DecodeError> {
        let expected = parse_octal(&self.checksum);
        let computed = self.compute_checksum();
        if expected == Some(computed) {
            Ok(())
        } else {
            Err(DecodeError::ChecksumMismatch { expected, computed })
        }
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("path", &String::from_utf8_lossy(&self.path_bytes()))
            .field("typeflag", &char::from(self.typeflag))
            .field("size", &self.entry_size().ok())
            .field("mode", &self.mode().ok().map(|m| format!("{m:04o}")))
            .field("format", &self.format())
            .finish_non_exhaustive()
    }
}

/// Parses an octal ASCII field.
///
/// Leading spaces are skipped and the field ends at the first NUL; only spaces may follow the
/// digits.  An empty field is not a number.
///
/// ```
/// use tarfs::header::parse_octal;
///
/// assert_eq!(parse_octal(b"0000644\0"), Some(0o644));
/// assert_eq!(parse_octal(b"   123 \0"), Some(0o123));
/// assert_eq!(parse_octal(b"\0\0\0\0"), None);
/// assert_eq!(parse_octal(b"12x4"), None);
/// ```
pub fn parse_octal(field: &[u8]) -> Option<u64> {
    let field = truncate_null(field);
    let start = field.iter().position(|&b| b != b' ')?;
    let digits = &field[start..];
    let end = digits.iter().position(|&b| b == b' ').unwrap_or(digits.len());
    let (digits, rest) = digits.split_at(end);

    if rest.iter().any(|&b| b != b' ') {
        return None;
    }

    digits.iter().try_fold(0u64, |value, &b| {
        if !(b'0'..=b'7').contains(&b) {
            return None;
        }
        value.checked_mul(8)?.checked_add(u64::from(b - b'0'))
    })
}

/// Parses a numeric field that is either octal ASCII or GNU base-256.
///
/// Base-256 values are flagged by `0x80` in the first byte and stored big-endian in the remaining
/// bits.  Negative base-256 values (first byte `0xff`) are rejected.
pub fn parse_numeric(field: &[u8]) -> Option<u64> {
    match field.first() {
        Some(0xff) => None,
        Some(&first) if first & 0x80 != 0 => field[1..]
            .iter()
            .try_fold(u64::from(first & 0x7f), |value, &b| {
                value.checked_mul(256)?.checked_add(u64::from(b))
            }),
        _ => parse_octal(field),
    }
}

/// Truncates a fixed-width field at its first NUL.
pub fn truncate_null(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(pos) => &bytes[..pos],
        None => bytes,
    }
}

/// Zero-padding needed after `offset` to reach the next sector boundary.
pub fn sector_padding(offset: u64) -> u64 {
    (SECTOR_SIZE - offset % SECTOR_SIZE) % SECTOR_SIZE
}

/// Splits a path into its components, dropping empty and `.` components.
pub fn path_components(path: &[u8]) -> impl Iterator<Item = &[u8]> {
    path.split(|&b| b == b'/')
        .filter(|component| !component.is_empty() && *component != b".")
}

/// A header decoded into the attributes an index entry needs.
///
/// `name` is empty for a header that names the archive root (such as `./`); such headers carry no
/// entry of their own.
#[derive(Debug)]
pub struct DecodedHeader {
    pub header: Header,
    pub directory: Box<OsStr>,
    pub name: Box<OsStr>,
    pub length: u64,
    pub kind: EntryKind,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
}

/// Decodes one header record.
///
/// Returns `Ok(None)` if the record does not carry tar magic.  A record that does, but has a
/// malformed mandatory field (or a bad checksum, when `verify_checksum` is set), is an error.
pub fn decode(header: &Header, verify_checksum: bool) -> Result<Option<DecodedHeader>, DecodeError> {
    if header.format().is_none() {
        return Ok(None);
    }

    if verify_checksum {
        header.verify_checksum()?;
    }

    let length = header.entry_size()?;
    let mode = header.mode()?;
    let uid = header.uid()?;
    let gid = header.gid()?;

    let mtime = header.mtime().unwrap_or(0);
    let atime = header.atime().unwrap_or(mtime);
    let ctime = header.ctime().unwrap_or(mtime);

    let path = header.path_bytes();
    let mut kind = EntryKind::from_typeflag(header.typeflag);
    if path.ends_with(b"/") {
        kind = EntryKind::Directory;
    }

    let components: Vec<&[u8]> = path_components(&path).collect();
    let (directory, name) = match components.split_last() {
        Some((name, parents)) => (parents.join(&b'/'), name.to_vec()),
        None => (vec![], vec![]),
    };

    Ok(Some(DecodedHeader {
        header: *header,
        directory: OsStr::from_bytes(&directory).into(),
        name: OsStr::from_bytes(&name).into(),
        length,
        kind,
        mode,
        uid,
        gid,
        atime,
        mtime,
        ctime,
    }))
}

#[cfg(test)]
mod test {
    use super::*;

    /// Builds a header with the `tar` crate, the way real archivers lay them out.
    fn ustar(path: &str, size: u64, entry_type: tar::EntryType) -> Header {
        let mut header = tar::Header::new_ustar();
        header.set_path(path).unwrap();
        header.set_size(size);
        header.set_mode(0o644);
        header.set_uid(1000);
        header.set_gid(100);
        header.set_mtime(1_700_000_000);
        header.set_entry_type(entry_type);
        header.set_cksum();
        *Header::from_bytes(header.as_bytes())
    }

    #[test]
    fn test_parse_octal() {
        assert_eq!(parse_octal(b"0000644\0"), Some(0o644));
        assert_eq!(parse_octal(b"  644   "), Some(0o644));
        assert_eq!(parse_octal(b"00000000005 "), Some(5));
        assert_eq!(parse_octal(b"0\0garbage"), Some(0));
        assert_eq!(parse_octal(b""), None);
        assert_eq!(parse_octal(b"        "), None);
        assert_eq!(parse_octal(b"0008"), None);
        assert_eq!(parse_octal(b"64 4"), None);
        assert_eq!(parse_octal(b"-1"), None);
        assert_eq!(parse_octal(b"7777777777777777777777777"), None);
    }

    #[test]
    fn test_parse_numeric_base256() {
        let mut field = [0u8; 12];
        field[0] = 0x80;
        field[11] = 7;
        assert_eq!(parse_numeric(&field), Some(7));

        field[7] = 1;
        assert_eq!(parse_numeric(&field), Some((1 << 32) + 7));

        field[0] = 0xff;
        assert_eq!(parse_numeric(&field), None);

        assert_eq!(parse_numeric(b"0000755\0"), Some(0o755));
        assert_eq!(parse_numeric(b""), None);
    }

    #[test]
    fn test_sector_padding() {
        assert_eq!(sector_padding(0), 0);
        assert_eq!(sector_padding(1), 511);
        assert_eq!(sector_padding(512), 0);
        assert_eq!(sector_padding(517), 507);
    }

    #[test]
    fn test_path_components() {
        let components: Vec<&[u8]> = path_components(b"./a//b/./c/").collect();
        assert_eq!(components, vec![&b"a"[..], b"b", b"c"]);
        assert_eq!(path_components(b"./").count(), 0);
    }

    #[test]
    fn test_header_layout() {
        let header = ustar("dir/file.txt", 5, tar::EntryType::Regular);
        assert_eq!(header.format(), Some(HeaderFormat::Ustar));
        assert_eq!(header.typeflag, b'0');
        assert_eq!(&*header.path_bytes(), b"dir/file.txt");
        assert_eq!(header.username(), b"");
        assert_eq!(header.entry_size().unwrap(), 5);
        assert_eq!(header.mode().unwrap(), 0o644);
        assert_eq!(header.uid().unwrap(), 1000);
        assert_eq!(header.gid().unwrap(), 100);
        assert_eq!(header.mtime(), Some(1_700_000_000));
        assert_eq!(header.atime(), None);
        header.verify_checksum().unwrap();
    }

    #[test]
    fn test_not_a_header() {
        assert!(decode(&Header::default(), false).unwrap().is_none());
        assert!(decode(&Header::default(), true).unwrap().is_none());

        let mut header = ustar("file", 0, tar::EntryType::Regular);
        header.magic = *b"nope\0\0";
        assert!(decode(&header, false).unwrap().is_none());
    }

    #[test]
    fn test_decode_regular() {
        let decoded = decode(&ustar("dir/sub/file.txt", 5, tar::EntryType::Regular), true)
            .unwrap()
            .unwrap();
        assert_eq!(&*decoded.directory, OsStr::new("dir/sub"));
        assert_eq!(&*decoded.name, OsStr::new("file.txt"));
        assert_eq!(decoded.length, 5);
        assert_eq!(decoded.kind, EntryKind::RegularFile);
        assert_eq!(decoded.mode, 0o644);
        assert_eq!(decoded.mtime, 1_700_000_000);
        assert_eq!(decoded.atime, 1_700_000_000);
        assert_eq!(decoded.ctime, 1_700_000_000);
    }

    #[test]
    fn test_decode_trailing_slash_is_directory() {
        // old archivers mark directories with a regular typeflag and a trailing slash
        let mut header = ustar("a/b", 0, tar::EntryType::Regular);
        header.name[3] = b'/';
        let decoded = decode(&header, false).unwrap().unwrap();
        assert_eq!(decoded.kind, EntryKind::Directory);
        assert_eq!(&*decoded.directory, OsStr::new("a"));
        assert_eq!(&*decoded.name, OsStr::new("b"));
    }

    #[test]
    fn test_decode_top_level_and_root() {
        let decoded = decode(&ustar("./top", 0, tar::EntryType::Regular), false)
            .unwrap()
            .unwrap();
        assert_eq!(&*decoded.directory, OsStr::new(""));
        assert_eq!(&*decoded.name, OsStr::new("top"));

        let decoded = decode(&ustar("./", 0, tar::EntryType::Directory), false)
            .unwrap()
            .unwrap();
        assert!(decoded.name.is_empty());
        assert!(decoded.directory.is_empty());
    }

    #[test]
    fn test_decode_ustar_prefix() {
        let long = format!("{}/{}", "p".repeat(120), "n".repeat(90));
        let header = ustar(&long, 0, tar::EntryType::Regular);
        assert!(!header.prefix_bytes().is_empty());
        assert_eq!(&*header.path_bytes(), long.as_bytes());

        let decoded = decode(&header, true).unwrap().unwrap();
        assert_eq!(decoded.directory.as_bytes(), "p".repeat(120).as_bytes());
        assert_eq!(decoded.name.as_bytes(), "n".repeat(90).as_bytes());
    }

    #[test]
    fn test_decode_star_times() {
        let mut header = ustar("file", 0, tar::EntryType::Regular);
        header.xmagic = *STAR_XMAGIC;
        header.prefix = [0; 131];
        header.prefix[..3].copy_from_slice(b"pre");
        header.atime[..11].copy_from_slice(b"00000000012");
        header.ctime[..11].copy_from_slice(b"00000000013");
        assert_eq!(header.format(), Some(HeaderFormat::Star));

        let decoded = decode(&header, false).unwrap().unwrap();
        assert_eq!(decoded.atime, 0o12);
        assert_eq!(decoded.ctime, 0o13);
        assert_eq!(&*decoded.directory, OsStr::new("pre"));

        // unparsable times fall back to mtime
        header.atime = *b"garbage!!!!\0";
        let decoded = decode(&header, false).unwrap().unwrap();
        assert_eq!(decoded.atime, 1_700_000_000);
        assert_eq!(decoded.ctime, 0o13);
    }

    #[test]
    fn test_decode_gnu_times() {
        let mut header = tar::Header::new_gnu();
        header.set_path("gnu/file").unwrap();
        header.set_size(3);
        header.set_mode(0o600);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(100);
        let gnu = header.as_gnu_mut().unwrap();
        gnu.set_atime(200);
        gnu.set_ctime(300);
        header.set_cksum();

        let header = Header::from_bytes(header.as_bytes());
        assert_eq!(header.format(), Some(HeaderFormat::Gnu));
        assert!(header.prefix_bytes().is_empty());

        let decoded = decode(header, true).unwrap().unwrap();
        assert_eq!(&*decoded.directory, OsStr::new("gnu"));
        assert_eq!(decoded.mtime, 100);
        assert_eq!(decoded.atime, 200);
        assert_eq!(decoded.ctime, 300);
    }

    #[test]
    fn test_decode_bad_mtime_is_zero() {
        let mut header = ustar("file", 0, tar::EntryType::Regular);
        header.mtime = *b"xxxxxxxxxxx\0";
        let decoded = decode(&header, false).unwrap().unwrap();
        assert_eq!(decoded.mtime, 0);
        assert_eq!(decoded.atime, 0);
        assert_eq!(decoded.ctime, 0);
    }

    #[test]
    fn test_decode_invalid_mandatory_fields() {
        for (field, offset) in [("mode", 100), ("uid", 108), ("gid", 116), ("size", 124)] {
            let mut bytes = *ustar("file", 0, tar::EntryType::Regular).as_bytes();
            bytes[offset..offset + 4].copy_from_slice(b"zzzz");
            match decode(Header::from_bytes(&bytes), false) {
                Err(DecodeError::InvalidNumber { field: name, .. }) => assert_eq!(name, field),
                other => panic!("unexpected result for {field}: {other:?}"),
            }
        }

        let mut header = ustar("file", 0, tar::EntryType::Regular);
        header.size = [0; 12];
        assert!(matches!(
            decode(&header, false),
            Err(DecodeError::InvalidNumber { field: "size", .. })
        ));
    }

    #[test]
    fn test_checksum_verification() {
        let mut header = ustar("file", 0, tar::EntryType::Regular);
        header.name[0] = b'g';
        assert!(decode(&header, false).unwrap().is_some());
        assert!(matches!(
            decode(&header, true),
            Err(DecodeError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_device_and_link_fields() {
        let mut header = tar::Header::new_ustar();
        header.set_path("dev/null").unwrap();
        header.set_size(0);
        header.set_mode(0o666);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        header.set_entry_type(tar::EntryType::Char);
        header.set_device_major(1).unwrap();
        header.set_device_minor(3).unwrap();
        header.set_username("root").unwrap();
        header.set_groupname("wheel").unwrap();
        header.set_cksum();
        let header = Header::from_bytes(header.as_bytes());
        assert_eq!(header.device(), Some((1, 3)));
        assert_eq!(header.username(), b"root");
        assert_eq!(header.groupname(), b"wheel");
        assert_eq!(
            decode(header, true).unwrap().unwrap().kind,
            EntryKind::CharDevice
        );

        let mut link = tar::Header::new_ustar();
        link.set_path("link").unwrap();
        link.set_size(0);
        link.set_mode(0o777);
        link.set_uid(0);
        link.set_gid(0);
        link.set_mtime(0);
        link.set_entry_type(tar::EntryType::Symlink);
        link.set_link_name("target/file").unwrap();
        link.set_cksum();
        let link = Header::from_bytes(link.as_bytes());
        assert_eq!(link.link_name_bytes(), b"target/file");
        assert_eq!(decode(link, true).unwrap().unwrap().kind, EntryKind::Symlink);
    }
}
