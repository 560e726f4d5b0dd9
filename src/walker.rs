//! Recursive directory traversal with a type mask and a path filter.
//!
//! The type mask only decides which entries are handed to the visitor;
//! every directory that survives the filter is descended into. The filter
//! is evaluated on each full path independently and a filtered directory is
//! neither visited nor descended into.

use std::fs::{self, FileType};
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::sync::Arc;

use bitflags::bitflags;
use tracing::trace;
use walkdir::WalkDir;

use crate::error::{Result, WatchError};

bitflags! {
    /// Object types a walk visitor is called for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FileTypes: u8 {
        const FILE = 1 << 0;
        const DIR = 1 << 1;
        const SYMLINK = 1 << 2;
        const FIFO = 1 << 3;
        const SOCKET = 1 << 4;
        const CHAR_DEVICE = 1 << 5;
        const BLOCK_DEVICE = 1 << 6;

        const ALL = Self::FILE.bits()
            | Self::DIR.bits()
            | Self::SYMLINK.bits()
            | Self::FIFO.bits()
            | Self::SOCKET.bits()
            | Self::CHAR_DEVICE.bits()
            | Self::BLOCK_DEVICE.bits();
    }
}

impl FileTypes {
    /// The single type bit describing `ft`.
    pub fn of(ft: &FileType) -> FileTypes {
        if ft.is_dir() {
            FileTypes::DIR
        } else if ft.is_file() {
            FileTypes::FILE
        } else if ft.is_symlink() {
            FileTypes::SYMLINK
        } else if ft.is_fifo() {
            FileTypes::FIFO
        } else if ft.is_socket() {
            FileTypes::SOCKET
        } else if ft.is_char_device() {
            FileTypes::CHAR_DEVICE
        } else if ft.is_block_device() {
            FileTypes::BLOCK_DEVICE
        } else {
            FileTypes::empty()
        }
    }

    /// Parse a type name as accepted on the command line.
    pub fn from_cli_name(name: &str) -> Option<FileTypes> {
        match name {
            "file" | "f" => Some(FileTypes::FILE),
            "dir" | "d" => Some(FileTypes::DIR),
            "symlink" | "l" => Some(FileTypes::SYMLINK),
            "fifo" | "p" => Some(FileTypes::FIFO),
            "socket" | "s" => Some(FileTypes::SOCKET),
            "char" | "c" => Some(FileTypes::CHAR_DEVICE),
            "block" | "b" => Some(FileTypes::BLOCK_DEVICE),
            "all" => Some(FileTypes::ALL),
            _ => None,
        }
    }
}

/// Path predicate; returning true excludes the path.
pub type PathFilter = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// Filter that excludes nothing.
pub fn no_filter(_: &Path) -> bool {
    false
}

/// Build a filter excluding any path whose full path or file name matches
/// one of the glob `patterns`.
pub fn pattern_filter(patterns: &[String]) -> Result<PathFilter> {
    let compiled = patterns
        .iter()
        .map(|p| {
            glob::Pattern::new(p).map_err(|e| WatchError::Pattern {
                pattern: p.clone(),
                reason: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Arc::new(move |path: &Path| {
        let name = path.file_name().and_then(|n| n.to_str());
        compiled
            .iter()
            .any(|p| p.matches_path(path) || name.is_some_and(|n| p.matches(n)))
    }))
}

/// Walk the tree below `root`, calling `visit` for each entry whose type is
/// in `types` and which `filter` does not exclude.
///
/// `visit` is never called for `root` itself. Entries that cannot be stat'ed
/// are skipped. The first error from `visit`, or from listing `root` or any
/// subdirectory, stops the walk and is returned; earlier visits stand.
pub fn walk<F, V>(root: &Path, types: FileTypes, filter: F, mut visit: V) -> Result<()>
where
    F: Fn(&Path) -> bool,
    V: FnMut(&Path) -> Result<()>,
{
    let meta =
        fs::metadata(root).map_err(|e| WatchError::system("cannot open directory", root, e))?;
    if !meta.is_dir() {
        return Err(WatchError::system(
            "cannot open directory",
            root,
            io::Error::from_raw_os_error(libc::ENOTDIR),
        ));
    }

    let mut entries = WalkDir::new(root).min_depth(1).follow_links(true).into_iter();

    while let Some(next) = entries.next() {
        let entry = match next {
            Ok(entry) => entry,
            Err(err) => {
                if err.loop_ancestor().is_some() {
                    trace!("[walker] skipping symlink loop at {:?}", err.path());
                    continue;
                }
                // Dangling links and vanished entries can't be stat'ed; skip.
                if let Some(path) = err.path() {
                    if fs::metadata(path).is_err() {
                        continue;
                    }
                }
                let path = err.path().unwrap_or(root).to_path_buf();
                let source = err
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::other("directory walk failed"));
                return Err(WatchError::System {
                    context: "cannot open directory",
                    path: Some(path),
                    source,
                });
            }
        };

        let path = entry.path();
        let is_dir = entry.file_type().is_dir();

        if filter(path) {
            if is_dir {
                entries.skip_current_dir();
            }
            continue;
        }

        if types.intersects(FileTypes::of(&entry.file_type())) {
            visit(path)?;
        }
    }

    Ok(())
}
