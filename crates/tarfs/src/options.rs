//! Options controlling how an archive is indexed.

/// Options for [`Archive::open_with`](crate::Archive::open_with).
///
/// # Example
///
/// ```
/// use tarfs::OpenOptions;
///
/// // Tolerate truncated archives, skip checksums
/// let options = OpenOptions::default();
///
/// // Refuse anything that doesn't decode cleanly
/// let careful = OpenOptions::new().verify_checksums(true).strict(true);
/// assert!(careful.is_strict());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Reject headers whose checksum field does not match their contents.
    ///
    /// Default: `false`.
    pub verify_checksums: bool,

    /// Fail the open on a malformed header instead of truncating the archive there.
    ///
    /// Default: `false`.
    pub strict: bool,
}

impl OpenOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }
}
