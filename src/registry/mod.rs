//! Watch registry over a single shared inotify channel.
//!
//! Every low-level [`Watch`] in the process is registered against one
//! notification descriptor. The registry decodes the byte stream read from
//! that descriptor and hands each record to the first watch whose kernel
//! descriptor matches.
//!
//! # Architecture
//!
//! ```text
//! Registry::global()
//!   - lazily opened Inotify channel
//!   - list of Arc<Watch> (insertion ordered)
//!   - pending byte buffer (incomplete records)
//!         |
//!    demux pass: decode -> find first wd match -> unlock -> callback
//! ```
//!
//! Callbacks run with no registry lock held, so they may register and
//! release watches. They must not start another demultiplex pass.

pub mod event;
mod sys;

use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::error::{Result, WatchError};

pub use event::{EventMask, RawEvent};
use sys::Inotify;

/// Callback bound to a low-level watch.
pub type WatchCallback = Box<dyn Fn(&Arc<Watch>, &RawEvent) + Send + Sync>;

const NO_WD: i32 = -1;

/// One registration of (path, mask) against the shared channel.
///
/// The descriptor is valid only while the watch is registered; after
/// [`Registry::release`] or [`Registry::forget`] it reads as `None`.
pub struct Watch {
    path: PathBuf,
    mask: EventMask,
    wd: AtomicI32,
    callback: WatchCallback,
}

impl Watch {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mask(&self) -> EventMask {
        self.mask
    }

    /// Kernel watch descriptor, if still registered.
    pub fn wd(&self) -> Option<i32> {
        let wd = self.wd.load(Ordering::SeqCst);
        (wd >= 0).then_some(wd)
    }

    pub fn is_active(&self) -> bool {
        self.wd().is_some()
    }
}

impl fmt::Debug for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watch")
            .field("path", &self.path)
            .field("mask", &self.mask)
            .field("wd", &self.wd())
            .finish_non_exhaustive()
    }
}

/// The notification channel and its list of registered watches.
pub struct Registry {
    /// Opened on first use; a failed open is retried on the next call.
    channel: Mutex<Option<Arc<Inotify>>>,
    watches: Mutex<Vec<Arc<Watch>>>,
    /// Bytes of an incomplete record. Held for a whole pass.
    pending: Mutex<Vec<u8>>,
}

static GLOBAL: LazyLock<Registry> = LazyLock::new(Registry::new);

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            channel: Mutex::new(None),
            watches: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    fn channel(&self) -> Result<Arc<Inotify>> {
        let mut slot = self.channel.lock();
        if let Some(channel) = slot.as_ref() {
            return Ok(channel.clone());
        }

        let channel = Arc::new(Inotify::init().map_err(|source| WatchError::System {
            context: "cannot open notification channel",
            path: None,
            source,
        })?);
        crate::debug_event!("registry", "channel opened", "fd {}", channel.as_raw_fd());
        *slot = Some(channel.clone());
        Ok(channel)
    }

    /// Raw channel descriptor for hosts that poll it themselves.
    pub fn fd(&self) -> Result<RawFd> {
        Ok(self.channel()?.as_raw_fd())
    }

    /// Begin watching `path` for `mask`, calling `callback` for each event.
    ///
    /// # Panics
    ///
    /// Panics if `mask` is empty.
    pub fn register<F>(
        &self,
        path: impl AsRef<Path>,
        mask: EventMask,
        callback: F,
    ) -> Result<Arc<Watch>>
    where
        F: Fn(&Arc<Watch>, &RawEvent) + Send + Sync + 'static,
    {
        assert!(!mask.is_empty(), "watch mask must not be empty");
        let path = path.as_ref();
        let channel = self.channel()?;

        let mut watches = self.watches.lock();
        let wd = channel
            .add_watch(path, mask)
            .map_err(|e| WatchError::system("cannot watch", path, e))?;

        let watch = Arc::new(Watch {
            path: path.to_path_buf(),
            mask,
            wd: AtomicI32::new(wd),
            callback: Box::new(callback),
        });
        watches.push(watch.clone());
        drop(watches);

        trace!("[registry] watching {} (wd {wd})", path.display());
        Ok(watch)
    }

    /// Stop watching and unlink `watch` from the list. Idempotent.
    pub fn release(&self, watch: &Watch) {
        self.unlink(watch, true);
    }

    /// Unlink `watch` without touching the kernel registration.
    ///
    /// For use when another entry still owns the same descriptor.
    pub fn forget(&self, watch: &Watch) {
        self.unlink(watch, false);
    }

    fn unlink(&self, watch: &Watch, remove_from_kernel: bool) {
        let mut watches = self.watches.lock();
        let wd = watch.wd.swap(NO_WD, Ordering::SeqCst);
        if wd < 0 {
            return;
        }

        if remove_from_kernel {
            let channel = self.channel.lock().clone();
            if let Some(channel) = channel {
                // EINVAL here means the kernel already dropped it.
                if let Err(e) = channel.rm_watch(wd) {
                    trace!("[registry] rm_watch {wd} for {}: {e}", watch.path.display());
                }
            }
        }

        let removed = watches
            .iter()
            .position(|w| std::ptr::eq(w.as_ref(), watch))
            .map(|pos| watches.remove(pos));
        drop(watches);
        // Dropped outside the lock: the callback may own the last reference
        // to something whose teardown releases more watches.
        drop(removed);
    }

    /// True if some other registered entry carries `watch`'s descriptor.
    pub fn shares_descriptor(&self, watch: &Watch) -> bool {
        let Some(wd) = watch.wd() else {
            return false;
        };
        self.watches
            .lock()
            .iter()
            .any(|w| !std::ptr::eq(w.as_ref(), watch) && w.wd() == Some(wd))
    }

    /// Feed raw channel bytes through the decoder and dispatch every
    /// complete record. Incomplete trailing bytes are kept for later.
    ///
    /// Returns the number of events delivered to a watch.
    pub fn demux(&self, bytes: &[u8]) -> usize {
        let mut pending = self.pending.lock();
        pending.extend_from_slice(bytes);
        self.drain(&mut pending)
    }

    fn drain(&self, pending: &mut Vec<u8>) -> usize {
        let (events, used) = event::decode(pending);
        pending.drain(..used);

        let mut delivered = 0;
        for event in &events {
            if self.dispatch(event) {
                delivered += 1;
            }
        }
        delivered
    }

    fn dispatch(&self, event: &RawEvent) -> bool {
        if event.mask.contains(EventMask::Q_OVERFLOW) {
            warn!("[registry] kernel event queue overflowed, events were lost");
            return false;
        }

        // Only the first match: the kernel keeps a single mask per inode, so
        // later entries with the same wd are stale duplicates.
        let target = self
            .watches
            .lock()
            .iter()
            .find(|w| event.wd >= 0 && w.wd() == Some(event.wd))
            .cloned();

        match target {
            Some(watch) => {
                (watch.callback)(&watch, event);
                true
            }
            None => {
                trace!("[registry] dropping event {:?} for unknown wd {}", event.mask, event.wd);
                false
            }
        }
    }

    /// Read and dispatch whatever the channel has ready; `WouldBlock` if
    /// nothing was readable.
    pub(crate) fn read_pass(&self) -> io::Result<usize> {
        let channel = self.channel().map_err(io::Error::other)?;
        let mut pending = self.pending.lock();
        channel.read_available(&mut pending)?;
        Ok(self.drain(&mut pending))
    }

    /// Non-blocking demultiplex pass over the shared channel.
    pub fn process_events(&self) -> Result<usize> {
        match self.read_pass() {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(source) => Err(WatchError::System {
                context: "cannot read notification channel",
                path: None,
                source,
            }),
        }
    }

    /// Wait up to `timeout` for the channel to become readable, then run one
    /// pass. Returns 0 on timeout.
    pub fn poll_events(&self, timeout: Duration) -> Result<usize> {
        let channel = self.channel()?;
        let ready = channel.wait_readable(timeout).map_err(|source| WatchError::System {
            context: "cannot poll notification channel",
            path: None,
            source,
        })?;
        if ready { self.process_events() } else { Ok(0) }
    }

    /// Number of registered watches.
    pub fn len(&self) -> usize {
        self.watches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.lock().is_empty()
    }

    /// Paths of all registered watches, in registration order.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.watches.lock().iter().map(|w| w.path.clone()).collect()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("open", &self.channel.lock().is_some())
            .field("watches", &self.len())
            .finish()
    }
}

/// Register a watch on the process-wide registry.
pub fn register<F>(path: impl AsRef<Path>, mask: EventMask, callback: F) -> Result<Arc<Watch>>
where
    F: Fn(&Arc<Watch>, &RawEvent) + Send + Sync + 'static,
{
    Registry::global().register(path, mask, callback)
}

/// Release a watch registered on the process-wide registry.
pub fn release(watch: &Watch) {
    Registry::global().release(watch)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;
    use tempfile::TempDir;

    /// A registry with its own channel, isolated from other tests.
    pub(crate) fn isolated() -> &'static Registry {
        Box::leak(Box::new(Registry::new()))
    }

    /// Pump `registry` until `done` holds or two seconds pass.
    pub(crate) fn pump_until(registry: &Registry, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            registry.poll_events(Duration::from_millis(20)).unwrap();
        }
        done()
    }

    /// Pump whatever arrives within a short quiet period.
    pub(crate) fn settle(registry: &Registry) {
        while registry.poll_events(Duration::from_millis(100)).unwrap() > 0 {}
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Arc<Watch>, &RawEvent) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move |_: &Arc<Watch>, _: &RawEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_register_missing_path_is_system_error() {
        let registry = isolated();
        let err = registry
            .register("/definitely/not/here", EventMask::CREATE, |_, _| {})
            .unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
        assert!(registry.is_empty());
    }

    #[test]
    #[should_panic(expected = "watch mask must not be empty")]
    fn test_register_empty_mask_panics() {
        let temp = TempDir::new().unwrap();
        let _ = isolated().register(temp.path(), EventMask::empty(), |_, _| {});
    }

    #[test]
    fn test_event_dispatched_with_name() {
        let temp = TempDir::new().unwrap();
        let registry = isolated();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let watch = registry
            .register(temp.path(), EventMask::CREATE, move |w, ev| {
                sink.lock().push((w.path().to_path_buf(), ev.name.clone()));
            })
            .unwrap();
        assert!(watch.is_active());

        fs::write(temp.path().join("a.txt"), b"x").unwrap();
        assert!(pump_until(registry, || !seen.lock().is_empty()));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, temp.path());
        assert_eq!(seen[0].1, Some(OsString::from("a.txt")));
    }

    #[test]
    fn test_release_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let registry = isolated();
        let watch = registry.register(temp.path(), EventMask::CREATE, |_, _| {}).unwrap();
        assert_eq!(registry.len(), 1);

        registry.release(&watch);
        assert!(!watch.is_active());
        assert!(registry.is_empty());

        registry.release(&watch);
        assert!(registry.is_empty());
        assert_eq!(watch.wd(), None);
    }

    #[test]
    fn test_released_watch_gets_no_events() {
        let temp = TempDir::new().unwrap();
        let registry = isolated();
        let (count, cb) = counter();
        let watch = registry.register(temp.path(), EventMask::CREATE, cb).unwrap();
        registry.release(&watch);

        fs::write(temp.path().join("late"), b"").unwrap();
        settle(registry);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_first_match_only_for_shared_descriptor() {
        let temp = TempDir::new().unwrap();
        let registry = isolated();
        let (first, cb1) = counter();
        let (second, cb2) = counter();

        let a = registry.register(temp.path(), EventMask::CREATE, cb1).unwrap();
        let b = registry.register(temp.path(), EventMask::CREATE, cb2).unwrap();
        assert_eq!(a.wd(), b.wd());
        assert!(registry.shares_descriptor(&a));
        assert!(registry.shares_descriptor(&b));

        fs::write(temp.path().join("one"), b"").unwrap();
        assert!(pump_until(registry, || first.load(Ordering::SeqCst) == 1));
        settle(registry);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);

        // Forgetting the first entry leaves the kernel watch to the second.
        registry.forget(&a);
        assert!(!registry.shares_descriptor(&b));
        fs::write(temp.path().join("two"), b"").unwrap();
        assert!(pump_until(registry, || second.load(Ordering::SeqCst) == 1));
        assert_eq!(first.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_demux_buffers_partial_records() {
        let temp = TempDir::new().unwrap();
        let registry = isolated();
        let (count, cb) = counter();
        let watch = registry.register(temp.path(), EventMask::MODIFY, cb).unwrap();

        let bytes = RawEvent {
            wd: watch.wd().unwrap(),
            mask: EventMask::MODIFY,
            cookie: 0,
            name: Some(OsString::from("file")),
        }
        .encode(16);

        assert_eq!(registry.demux(&bytes[..10]), 0);
        assert_eq!(registry.demux(&bytes[10..20]), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(registry.demux(&bytes[20..]), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unmatched_events_are_dropped() {
        let registry = isolated();
        let bytes = RawEvent {
            wd: 4242,
            mask: EventMask::CREATE,
            cookie: 0,
            name: Some(OsString::from("x")),
        }
        .encode(0);
        assert_eq!(registry.demux(&bytes), 0);
    }

    #[test]
    fn test_callback_may_register_during_dispatch() {
        let temp = TempDir::new().unwrap();
        let sub = temp.path().join("sub");
        fs::create_dir(&sub).unwrap();
        let registry = isolated();

        let target = sub.clone();
        let watch = registry
            .register(temp.path(), EventMask::MODIFY, move |_, _| {
                registry.register(&target, EventMask::CREATE, |_, _| {}).unwrap();
            })
            .unwrap();

        let bytes = RawEvent {
            wd: watch.wd().unwrap(),
            mask: EventMask::MODIFY,
            cookie: 0,
            name: Some(OsString::from("f")),
        }
        .encode(0);
        assert_eq!(registry.demux(&bytes), 1);
        assert_eq!(registry.watched_paths(), vec![temp.path().to_path_buf(), sub]);
    }
}
