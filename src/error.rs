//! Error types for the watch subsystem.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from registry, walker, tree watch and map operations.
#[derive(Error, Debug)]
pub enum WatchError {
    /// An OS call failed.
    #[error("{context}{}: {source}", path_suffix(.path))]
    System {
        context: &'static str,
        path: Option<PathBuf>,
        #[source]
        source: io::Error,
    },

    #[error("Failed to load config: {reason}")]
    Config { reason: String },

    #[error("Invalid ignore pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" {}", p.display()),
        None => String::new(),
    }
}

impl WatchError {
    /// System error for an operation on `path`.
    pub fn system(context: &'static str, path: impl AsRef<Path>, source: io::Error) -> Self {
        WatchError::System {
            context,
            path: Some(path.as_ref().to_path_buf()),
            source,
        }
    }

    /// System error built from the calling thread's `errno`.
    pub(crate) fn last_os(context: &'static str, path: Option<&Path>) -> Self {
        WatchError::System {
            context,
            path: path.map(Path::to_path_buf),
            source: io::Error::last_os_error(),
        }
    }

    /// The OS error code, if this is a system error carrying one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            WatchError::System { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, WatchError::System { .. })
    }
}

impl From<figment::Error> for WatchError {
    fn from(e: figment::Error) -> Self {
        WatchError::Config {
            reason: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_error_carries_code_and_path() {
        let err = WatchError::system(
            "cannot watch",
            "/nope",
            io::Error::from_raw_os_error(libc::ENOENT),
        );
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
        assert!(err.is_system());
        let msg = err.to_string();
        assert!(msg.starts_with("cannot watch /nope: "), "got {msg}");
    }

    #[test]
    fn test_config_error_has_no_code() {
        let err = WatchError::Config {
            reason: "bad".into(),
        };
        assert_eq!(err.raw_os_error(), None);
        assert!(!err.is_system());
    }
}
