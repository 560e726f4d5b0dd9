//! Directory change notification over a single shared inotify channel.
//!
//! - [`registry`]: low-level watches multiplexed over one descriptor
//! - [`walker`]: recursive traversal with type and path filters
//! - [`dir_watch`]: recursive tree watches with create/modify/delete handlers
//! - [`map`]: whole-file memory maps
//! - [`runtime`]: tokio integration for the shared channel

pub mod config;
pub mod dir_watch;
pub mod error;
pub mod logging;
pub mod map;
pub mod registry;
pub mod runtime;
pub mod walker;

pub use config::Settings;
pub use dir_watch::{DirHandler, DirWatch, DirWatchBuilder, FnHandler};
pub use error::{Result, WatchError};
pub use map::{FileMap, MapMode};
pub use registry::{EventMask, RawEvent, Registry, Watch};
pub use walker::{FileTypes, PathFilter, walk};
