//! tarfsctl - Browse tar archives without extracting them.
//!
//! The archive is indexed once with the `tarfs` library and then queried: directory listings,
//! file contents and entry attributes all come straight from the archive bytes.

use std::{
    collections::HashSet,
    ffi::{OsStr, OsString},
    io::Write,
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use tarfs::{
    entry::join_path, Archive, BlockStore, Entry, EntryKind, FileStore, Node, OpenOptions,
    ROOT_MODE,
};

/// Browse tar archives without extracting them.
#[derive(Parser, Debug)]
#[command(name = "tarfsctl", version, about)]
struct Cli {
    /// Block size used to read the archive.
    #[arg(long, default_value_t = 512, value_parser = clap::value_parser!(u32).range(1..))]
    block_size: u32,

    /// Fail on malformed headers instead of ignoring the rest of the archive.
    #[arg(long)]
    strict: bool,

    /// Reject headers with a bad checksum.
    #[arg(long)]
    verify_checksums: bool,

    /// The subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory in the archive.
    Ls {
        /// The archive.
        archive: PathBuf,
        /// Directory (or file) within the archive; the root if omitted.
        path: Option<String>,
    },

    /// Write a file's contents to stdout.
    Cat {
        /// The archive.
        archive: PathBuf,
        /// File within the archive.
        path: String,
    },

    /// Show the attributes of an entry.
    Stat {
        /// The archive.
        archive: PathBuf,
        /// Entry within the archive; the root if omitted.
        path: Option<String>,
    },

    /// Recursively list every path in the archive.
    Tree {
        /// The archive.
        archive: PathBuf,
    },
}

impl Cli {
    fn options(&self) -> OpenOptions {
        OpenOptions::new()
            .strict(self.strict)
            .verify_checksums(self.verify_checksums)
    }

    fn open(&self, path: &Path) -> Result<Archive<FileStore>> {
        let store = FileStore::open(path, self.block_size as usize)
            .with_context(|| format!("Failed to open {path:?}"))?;
        let archive = Archive::open_with(store, self.options())
            .with_context(|| format!("Failed to index {path:?}"))?;
        log::debug!("{path:?}: {} entries", archive.entries().len());
        Ok(archive)
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match &cli.command {
        Command::Ls { archive, path } => {
            cmd_ls(&mut out, &cli.open(archive)?, path.as_deref().unwrap_or(""))
        }
        Command::Cat { archive, path } => cmd_cat(&mut out, &cli.open(archive)?, path),
        Command::Stat { archive, path } => {
            cmd_stat(&mut out, &cli.open(archive)?, path.as_deref().unwrap_or(""))
        }
        Command::Tree { archive } => cmd_tree(&mut out, &cli.open(archive)?),
    }
}

/// Print escaped path bytes: backslashes, control characters and non-ASCII bytes are escaped.
fn print_escaped(out: &mut impl Write, s: &[u8]) -> std::io::Result<()> {
    for &c in s {
        match c {
            b'\\' => write!(out, "\\\\")?,
            b'\n' => write!(out, "\\n")?,
            b'\t' => write!(out, "\\t")?,
            c if !c.is_ascii_graphic() && c != b' ' => write!(out, "\\x{c:02x}")?,
            c => out.write_all(&[c])?,
        }
    }
    Ok(())
}

fn resolve<'a, S: BlockStore>(archive: &'a Archive<S>, path: &str) -> Result<Node<'a>> {
    archive
        .resolve(path)
        .with_context(|| format!("No such file or directory: {path}"))
}

/// One `ls -l`-style line: type, permissions, owner, size, name.
fn write_entry_line(out: &mut impl Write, entry: &Entry, name: &OsStr) -> Result<()> {
    write!(
        out,
        "{}{:04o} {:>5} {:>5} {:>10} ",
        entry.kind.as_char(),
        entry.host_mode() & 0o7777,
        entry.uid,
        entry.gid,
        entry.length
    )?;
    print_escaped(out, name.as_bytes())?;
    if entry.kind.is_dir() {
        write!(out, "/")?;
    }
    if let Some(target) = entry.symlink_target() {
        write!(out, " -> ")?;
        print_escaped(out, target.as_os_str().as_bytes())?;
    }
    writeln!(out)?;
    Ok(())
}

fn write_implied_line(out: &mut impl Write, name: &OsStr) -> Result<()> {
    write!(out, "d{:04o} {:>5} {:>5} {:>10} ", ROOT_MODE & 0o7777, "-", "-", "-")?;
    print_escaped(out, name.as_bytes())?;
    writeln!(out, "/")?;
    Ok(())
}

/// List a directory: its entries in archive order, then directories implied by deeper paths.
fn cmd_ls<S: BlockStore>(out: &mut impl Write, archive: &Archive<S>, path: &str) -> Result<()> {
    let node = resolve(archive, path)?;

    let directory = match node {
        Node::Entry(entry) if !entry.kind.is_dir() => {
            return write_entry_line(out, entry, &entry.name);
        }
        node => node.path(),
    };

    for child in archive.list_children(&directory) {
        if let Some(entry) = archive.lookup_by_identity(child.identity) {
            write_entry_line(out, entry, child.name)?;
        }
    }
    for name in archive.implied_directories(&directory) {
        write_implied_line(out, name)?;
    }

    Ok(())
}

/// Copy a file's payload to `out`.
fn cmd_cat<S: BlockStore>(out: &mut impl Write, archive: &Archive<S>, path: &str) -> Result<()> {
    let entry = match resolve(archive, path)? {
        Node::Entry(entry) if entry.kind.has_contents() => entry,
        Node::Entry(entry) if entry.kind == EntryKind::Symlink => {
            bail!("{path}: is a symlink")
        }
        Node::Entry(entry) if !entry.kind.is_dir() => bail!("{path}: not a regular file"),
        _ => bail!("{path}: is a directory"),
    };

    let mut buffer = vec![0u8; 64 * 1024];
    let mut offset = 0;
    loop {
        let count = archive
            .read(entry, offset, &mut buffer)
            .with_context(|| format!("Failed to read {path} at offset {offset}"))?;
        if count == 0 {
            break;
        }
        out.write_all(&buffer[..count])?;
        offset += count as u64;
    }

    Ok(())
}

fn cmd_stat<S: BlockStore>(out: &mut impl Write, archive: &Archive<S>, path: &str) -> Result<()> {
    let node = resolve(archive, path)?;

    write!(out, "Path: /")?;
    print_escaped(out, node.path().as_bytes())?;
    writeln!(out)?;

    let identity = node.identity();
    let Node::Entry(entry) = node else {
        match identity {
            Some(identity) => writeln!(out, "Identity: {identity}")?,
            None => writeln!(out, "Identity: - (implied)")?,
        }
        writeln!(out, "Kind: Directory")?;
        writeln!(out, "Mode: {ROOT_MODE:07o}")?;
        return Ok(());
    };

    writeln!(out, "Identity: {}", entry.identity)?;
    writeln!(out, "Kind: {:?}", entry.kind)?;
    writeln!(out, "Mode: {:07o} (stored {:04o})", entry.host_mode(), entry.mode)?;
    writeln!(out, "Size: {}", entry.size())?;
    write!(out, "Owner: {}", entry.uid)?;
    if !entry.username().is_empty() {
        write!(out, " ({})", entry.username().to_string_lossy())?;
    }
    write!(out, ", group {}", entry.gid)?;
    if !entry.groupname().is_empty() {
        write!(out, " ({})", entry.groupname().to_string_lossy())?;
    }
    writeln!(out)?;
    writeln!(out, "Access: {}", entry.atime)?;
    writeln!(out, "Modify: {}", entry.mtime)?;
    writeln!(out, "Change: {}", entry.ctime)?;
    writeln!(
        out,
        "Offsets: header {}, data {}",
        entry.header_offset, entry.data_offset
    )?;
    if let Some(target) = entry.symlink_target() {
        write!(out, "Target: ")?;
        print_escaped(out, target.as_os_str().as_bytes())?;
        writeln!(out)?;
    }
    if let Some((major, minor)) = entry.device() {
        writeln!(out, "Device: {major},{minor}")?;
    }

    Ok(())
}

/// Walk directory tree and print every path, depth first, directories with a trailing `/`.
fn walk<S: BlockStore>(
    out: &mut impl Write,
    archive: &Archive<S>,
    directory: &OsStr,
    visited: &mut HashSet<OsString>,
) -> Result<()> {
    if !visited.insert(directory.to_os_string()) {
        return Ok(());
    }

    let children = archive.list_children(directory);
    let implied = archive.implied_directories(directory);

    for child in children {
        let path = join_path(directory, child.name);
        write!(out, "/")?;
        print_escaped(out, path.as_bytes())?;
        if child.kind.is_dir() {
            writeln!(out, "/")?;
            walk(out, archive, &path, visited)?;
        } else {
            writeln!(out)?;
        }
    }

    for name in implied {
        let path = join_path(directory, name);
        write!(out, "/")?;
        print_escaped(out, path.as_bytes())?;
        writeln!(out, "/")?;
        walk(out, archive, &path, visited)?;
    }

    Ok(())
}

fn cmd_tree<S: BlockStore>(out: &mut impl Write, archive: &Archive<S>) -> Result<()> {
    walk(out, archive, OsStr::new(""), &mut HashSet::new())
}
