//! Recursive directory tree watches.
//!
//! A [`DirWatch`] owns one low-level [`Watch`] on its root and, when
//! recursive, one per live unfiltered subdirectory. Raw events from any of
//! them are translated into the three [`DirHandler`] callbacks, and the set
//! of low-level watches is kept in step with the directory tree as
//! subdirectories appear, move and vanish.
//!
//! ```text
//! Registry ──event──> translator (Weak<Inner>)
//!                        ├─ IGNORED / MOVE_SELF on root   -> on_delete(None), destroy
//!                        ├─ IGNORED / MOVE_SELF on subdir -> drop that watch
//!                        ├─ CREATE / MOVED_TO             -> on_create, watch new subtree
//!                        ├─ MODIFY                        -> on_modify
//!                        └─ DELETE / MOVED_FROM           -> on_delete(path)
//! ```

mod handler;

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::error::{Result, WatchError};
use crate::registry::{EventMask, RawEvent, Registry, Watch};
use crate::walker::{self, FileTypes, PathFilter};

pub use handler::{DirHandler, FnHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Active,
    Destroyed,
}

struct TreeState {
    status: Status,
    root: Option<Arc<Watch>>,
    subdirs: Vec<Arc<Watch>>,
}

struct Inner {
    root: PathBuf,
    recursive: bool,
    filter: PathFilter,
    handler: Mutex<Box<dyn DirHandler>>,
    registry: &'static Registry,
    state: Mutex<TreeState>,
}

/// A watch on a directory and, optionally, everything below it.
///
/// Cloning yields another handle to the same watch. The watch is torn down
/// when [`close`](DirWatch::close) is called, when its root goes away, or
/// when the last handle is dropped.
#[derive(Clone)]
pub struct DirWatch {
    inner: Arc<Inner>,
}

/// Builder for [`DirWatch`].
pub struct DirWatchBuilder {
    root: PathBuf,
    recursive: bool,
    filter: PathFilter,
    handler: Box<dyn DirHandler>,
    registry: &'static Registry,
}

impl DirWatchBuilder {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            recursive: true,
            filter: Arc::new(walker::no_filter),
            handler: Box::new(()),
            registry: Registry::global(),
        }
    }

    /// Watch subdirectories too. Defaults to true.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Exclude paths for which `filter` returns true.
    pub fn filter(mut self, filter: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Arc::new(filter);
        self
    }

    /// Exclude paths matching any of the glob `patterns`.
    pub fn ignore_patterns(mut self, patterns: &[String]) -> Result<Self> {
        self.filter = walker::pattern_filter(patterns)?;
        Ok(self)
    }

    pub fn handler(mut self, handler: impl DirHandler + 'static) -> Self {
        self.handler = Box::new(handler);
        self
    }

    #[cfg(test)]
    pub(crate) fn registry(mut self, registry: &'static Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Install the watches.
    ///
    /// Fails if the root cannot be stat'ed, is not a directory, cannot be
    /// watched, or if the initial walk cannot list a subdirectory.
    /// Subdirectories that cannot be watched are only warned about.
    pub fn build(self) -> Result<DirWatch> {
        let meta = fs::metadata(&self.root)
            .map_err(|e| WatchError::system("cannot watch directory", &self.root, e))?;
        if !meta.is_dir() {
            return Err(WatchError::system(
                "cannot watch directory",
                &self.root,
                io::Error::from_raw_os_error(libc::ENOTDIR),
            ));
        }

        let inner = Arc::new(Inner {
            root: self.root,
            recursive: self.recursive,
            filter: self.filter,
            handler: Mutex::new(self.handler),
            registry: self.registry,
            state: Mutex::new(TreeState {
                status: Status::Active,
                root: None,
                subdirs: Vec::new(),
            }),
        });

        let root_watch = inner.add_watch(&inner.root)?;
        inner.state.lock().root = Some(root_watch);

        // Dropping `watch` on error releases whatever was installed.
        let watch = DirWatch { inner };
        if watch.inner.recursive {
            watch.inner.watch_subtree(&watch.inner.root)?;
        }

        crate::log_event!(
            "watch",
            "watching",
            "{} ({} directories)",
            watch.inner.root.display(),
            watch.watch_count()
        );
        Ok(watch)
    }
}

impl Inner {
    fn add_watch(self: &Arc<Self>, path: &Path) -> Result<Arc<Watch>> {
        let tree = Arc::downgrade(self);
        self.registry
            .register(path, EventMask::DIR_EVENTS, move |watch, event| {
                translate(&tree, watch, event)
            })
    }

    /// Watch one subdirectory; failure is a warning only.
    fn add_subdir(self: &Arc<Self>, path: &Path) {
        match self.add_watch(path) {
            Ok(watch) => {
                let mut state = self.state.lock();
                if state.status == Status::Active {
                    state.subdirs.push(watch);
                } else {
                    drop(state);
                    self.registry.release(&watch);
                }
            }
            Err(e) => warn!("[watch] {}: unable to watch directory: {e}", path.display()),
        }
    }

    /// Watch every unfiltered directory below `dir`.
    fn watch_subtree(self: &Arc<Self>, dir: &Path) -> Result<()> {
        walker::walk(dir, FileTypes::DIR, |p| (self.filter)(p), |p| {
            self.add_subdir(p);
            Ok(())
        })
    }

    fn is_active(&self) -> bool {
        self.state.lock().status == Status::Active
    }

    fn is_root(&self, watch: &Arc<Watch>) -> bool {
        self.state
            .lock()
            .root
            .as_ref()
            .is_some_and(|root| Arc::ptr_eq(root, watch))
    }

    /// Let go of one low-level watch. If another registered entry still
    /// holds the same kernel descriptor, only the bookkeeping goes.
    fn drop_watch(&self, watch: &Watch) {
        if self.registry.shares_descriptor(watch) {
            self.registry.forget(watch);
        } else {
            self.registry.release(watch);
        }
    }

    /// Drop `source` and every owned watch below its path.
    ///
    /// With `ignored` set the kernel has already removed that descriptor, so
    /// every entry still carrying it is forgotten as well.
    fn drop_subtree(&self, source: &Arc<Watch>, ignored: Option<i32>) {
        let carries_ignored = |w: &Watch| ignored.is_some_and(|wd| w.wd() == Some(wd));

        let gone: Vec<Arc<Watch>> = {
            let mut state = self.state.lock();
            let (gone, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.subdirs)
                .into_iter()
                .partition(|w| {
                    Arc::ptr_eq(w, source)
                        || w.path().starts_with(source.path())
                        || carries_ignored(w.as_ref())
                });
            state.subdirs = kept;
            gone
        };

        for watch in &gone {
            if carries_ignored(watch.as_ref()) {
                self.registry.forget(watch);
            } else {
                self.drop_watch(watch);
            }
        }
    }

    /// Release every owned watch and mark the tree destroyed. Idempotent.
    fn destroy(&self) {
        let owned: Vec<Arc<Watch>> = {
            let mut state = self.state.lock();
            state.status = Status::Destroyed;
            let root = state.root.take();
            root.into_iter().chain(state.subdirs.drain(..)).collect()
        };
        for watch in &owned {
            self.drop_watch(watch);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Route one raw event from any of the tree's watches.
fn translate(tree: &Weak<Inner>, source: &Arc<Watch>, event: &RawEvent) {
    let Some(inner) = tree.upgrade() else {
        return;
    };
    if !inner.is_active() {
        return;
    }
    let watch = DirWatch { inner };
    let inner = &watch.inner;

    if event.mask.intersects(EventMask::IGNORED | EventMask::MOVE_SELF) {
        crate::debug_event!("watch", "ceasing", "{}", source.path().display());

        if inner.is_root(source) {
            inner.handler.lock().on_delete(&watch, None);
            inner.destroy();
        } else {
            let ignored = event.mask.contains(EventMask::IGNORED).then_some(event.wd);
            inner.drop_subtree(source, ignored);
        }
        return;
    }

    let Some(name) = event.name() else {
        trace!("[watch] unnamed event {:?} on {}", event.mask, source.path().display());
        return;
    };
    let path = source.path().join(name);

    if (inner.filter)(&path) {
        return;
    }

    if event.mask.intersects(EventMask::CREATE | EventMask::MOVED_TO) {
        inner.handler.lock().on_create(&watch, &path);

        // A directory moved in may already be populated.
        if inner.recursive && fs::metadata(&path).is_ok_and(|m| m.is_dir()) {
            inner.add_subdir(&path);
            if let Err(e) = inner.watch_subtree(&path) {
                warn!("[watch] {}: unable to watch subtree: {e}", path.display());
            }
        }
    } else if event.mask.contains(EventMask::MODIFY) {
        inner.handler.lock().on_modify(&watch, &path);
    } else if event.mask.intersects(EventMask::DELETE | EventMask::MOVED_FROM) {
        inner.handler.lock().on_delete(&watch, Some(&path));
    }
}

impl DirWatch {
    pub fn builder(root: impl Into<PathBuf>) -> DirWatchBuilder {
        DirWatchBuilder::new(root.into())
    }

    /// Watch `root` with no filter.
    pub fn new(
        root: impl Into<PathBuf>,
        recursive: bool,
        handler: impl DirHandler + 'static,
    ) -> Result<Self> {
        Self::builder(root).recursive(recursive).handler(handler).build()
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn is_recursive(&self) -> bool {
        self.inner.recursive
    }

    /// False once the root has gone away or the watch was closed.
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Paths of the owned low-level watches, root first.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let state = self.inner.state.lock();
        state
            .root
            .iter()
            .chain(state.subdirs.iter())
            .map(|w| w.path().to_path_buf())
            .collect()
    }

    pub fn watch_count(&self) -> usize {
        let state = self.inner.state.lock();
        state.root.iter().count() + state.subdirs.len()
    }

    /// Tear down every owned watch without calling any handler.
    pub fn close(&self) {
        self.inner.destroy();
    }
}

impl fmt::Debug for DirWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirWatch")
            .field("root", &self.inner.root)
            .field("recursive", &self.inner.recursive)
            .field("active", &self.is_active())
            .field("watches", &self.watch_count())
            .finish()
    }
}
