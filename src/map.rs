//! Map a whole file into memory.

use std::fs::OpenOptions;
use std::io;
use std::ops::Deref;
use std::path::Path;

use memmap2::{Mmap, MmapMut, MmapOptions};

use crate::error::{Result, WatchError};

/// Access requested for a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    ReadOnly,
    ReadWrite,
}

impl MapMode {
    /// Derive the mode from `open(2)` flags.
    ///
    /// # Panics
    ///
    /// Panics unless the access mode is `O_RDONLY` or `O_RDWR`.
    pub fn from_open_flags(flags: libc::c_int) -> MapMode {
        match flags & libc::O_ACCMODE {
            libc::O_RDONLY => MapMode::ReadOnly,
            libc::O_RDWR => MapMode::ReadWrite,
            other => panic!("file map needs O_RDONLY or O_RDWR access, got {other:#o}"),
        }
    }
}

#[derive(Debug)]
enum Mapping {
    Read(Mmap),
    Write(MmapMut),
}

/// A shared mapping of an entire file.
#[derive(Debug)]
pub struct FileMap {
    mapping: Mapping,
}

/// Open `path` and map its full length.
///
/// The file descriptor is closed before returning whether or not the
/// mapping succeeded.
pub fn map(path: impl AsRef<Path>, mode: MapMode) -> Result<FileMap> {
    let path = path.as_ref();
    let file = OpenOptions::new()
        .read(true)
        .write(mode == MapMode::ReadWrite)
        .open(path)
        .map_err(|e| WatchError::system("cannot open", path, e))?;

    let len = file
        .metadata()
        .map_err(|e| WatchError::system("cannot stat", path, e))?
        .len();
    let len = usize::try_from(len).map_err(|_| {
        WatchError::system("cannot map", path, io::Error::from_raw_os_error(libc::EFBIG))
    })?;

    let mut options = MmapOptions::new();
    options.len(len);

    // SAFETY: the mapping is shared with the file; concurrent truncation by
    // another process is the caller's concern, as with any mmap.
    let mapping = match mode {
        MapMode::ReadOnly => unsafe { options.map(&file) }.map(Mapping::Read),
        MapMode::ReadWrite => unsafe { options.map_mut(&file) }.map(Mapping::Write),
    }
    .map_err(|e| WatchError::system("cannot map", path, e))?;

    Ok(FileMap { mapping })
}

impl FileMap {
    pub fn len(&self) -> usize {
        self.deref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mode(&self) -> MapMode {
        match self.mapping {
            Mapping::Read(_) => MapMode::ReadOnly,
            Mapping::Write(_) => MapMode::ReadWrite,
        }
    }

    /// Writable view; `None` for read-only maps.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match &mut self.mapping {
            Mapping::Read(_) => None,
            Mapping::Write(m) => Some(&mut m[..]),
        }
    }

    /// Flush outstanding writes of a read-write map to the file.
    pub fn flush(&self) -> Result<()> {
        match &self.mapping {
            Mapping::Read(_) => Ok(()),
            Mapping::Write(m) => m.flush().map_err(|source| WatchError::System {
                context: "cannot flush mapping",
                path: None,
                source,
            }),
        }
    }

    /// Unmap, reporting a failed `munmap(2)`.
    pub fn unmap(self) -> Result<()> {
        let (ptr, len) = (self.deref().as_ptr(), self.len());
        if len == 0 {
            // Zero-length maps are left to the owner's Drop.
            return Ok(());
        }

        // The mapping starts at offset zero, so the region handed out by
        // mmap is exactly [ptr, ptr + len).
        std::mem::forget(self);
        // SAFETY: `ptr`/`len` describe a live mapping that nothing else will
        // unmap, since its owner was forgotten above.
        if unsafe { libc::munmap(ptr as *mut libc::c_void, len) } < 0 {
            return Err(WatchError::last_os("cannot unmap", None));
        }
        Ok(())
    }
}

impl Deref for FileMap {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.mapping {
            Mapping::Read(m) => &m[..],
            Mapping::Write(m) => &m[..],
        }
    }
}

impl AsRef<[u8]> for FileMap {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_map_read_only() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data");
        fs::write(&path, b"hello map").unwrap();

        let mut mapped = map(&path, MapMode::ReadOnly).unwrap();
        assert_eq!(&mapped[..], b"hello map");
        assert_eq!(mapped.len(), 9);
        assert_eq!(mapped.mode(), MapMode::ReadOnly);
        assert!(mapped.as_mut_slice().is_none());
        mapped.unmap().unwrap();
    }

    #[test]
    fn test_map_read_write_persists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data");
        fs::write(&path, b"abc").unwrap();

        let mut mapped = map(&path, MapMode::ReadWrite).unwrap();
        mapped.as_mut_slice().unwrap()[0] = b'X';
        mapped.flush().unwrap();
        mapped.unmap().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"Xbc");
    }

    #[test]
    fn test_map_missing_file_is_system_error() {
        let err = map("/no/such/file", MapMode::ReadOnly).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn test_map_directory_is_system_error() {
        let temp = TempDir::new().unwrap();

        let err = map(temp.path(), MapMode::ReadOnly).unwrap_err();
        assert!(err.is_system(), "got {err:?}");

        let err = map(temp.path(), MapMode::ReadWrite).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EISDIR));
    }

    #[test]
    fn test_mode_from_open_flags() {
        assert_eq!(MapMode::from_open_flags(libc::O_RDONLY), MapMode::ReadOnly);
        assert_eq!(
            MapMode::from_open_flags(libc::O_RDWR | libc::O_CLOEXEC),
            MapMode::ReadWrite
        );
    }

    #[test]
    #[should_panic(expected = "O_RDONLY or O_RDWR")]
    fn test_write_only_flags_are_a_precondition_violation() {
        MapMode::from_open_flags(libc::O_WRONLY);
    }
}
