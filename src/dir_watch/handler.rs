//! Handler trait for directory tree watches.

use std::path::Path;

use super::DirWatch;

/// Receives the three semantic events of a [`DirWatch`].
///
/// Every method defaults to doing nothing, so implementors only write the
/// ones they care about. User state lives in the implementing type.
pub trait DirHandler: Send {
    /// A file or directory appeared under the tree, by creation or by being
    /// moved in.
    fn on_create(&mut self, _watch: &DirWatch, _path: &Path) {}

    /// A file under the tree was written to.
    fn on_modify(&mut self, _watch: &DirWatch, _path: &Path) {}

    /// A path was removed or moved out of the tree.
    ///
    /// `path` is `None` when the watched root itself went away; the watch is
    /// destroyed right after this returns.
    fn on_delete(&mut self, _watch: &DirWatch, _path: Option<&Path>) {}
}

impl DirHandler for () {}

type PathFn = Box<dyn FnMut(&DirWatch, &Path) + Send>;
type DeleteFn = Box<dyn FnMut(&DirWatch, Option<&Path>) + Send>;

/// A [`DirHandler`] assembled from optional closures.
#[derive(Default)]
pub struct FnHandler {
    create: Option<PathFn>,
    modify: Option<PathFn>,
    delete: Option<DeleteFn>,
}

impl FnHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_create(mut self, f: impl FnMut(&DirWatch, &Path) + Send + 'static) -> Self {
        self.create = Some(Box::new(f));
        self
    }

    pub fn with_modify(mut self, f: impl FnMut(&DirWatch, &Path) + Send + 'static) -> Self {
        self.modify = Some(Box::new(f));
        self
    }

    pub fn with_delete(mut self, f: impl FnMut(&DirWatch, Option<&Path>) + Send + 'static) -> Self {
        self.delete = Some(Box::new(f));
        self
    }
}

impl DirHandler for FnHandler {
    fn on_create(&mut self, watch: &DirWatch, path: &Path) {
        if let Some(f) = self.create.as_mut() {
            f(watch, path);
        }
    }

    fn on_modify(&mut self, watch: &DirWatch, path: &Path) {
        if let Some(f) = self.modify.as_mut() {
            f(watch, path);
        }
    }

    fn on_delete(&mut self, watch: &DirWatch, path: Option<&Path>) {
        if let Some(f) = self.delete.as_mut() {
            f(watch, path);
        }
    }
}
