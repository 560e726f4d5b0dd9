//! Drive the registry from a tokio reactor.
//!
//! The channel descriptor is registered for readability; each wakeup runs
//! one demultiplex pass on the reactor thread. Callbacks therefore run
//! inside the driving task and should not block for long.

use std::os::fd::{AsRawFd, RawFd};

use tokio::io::unix::AsyncFd;
use tracing::trace;

use crate::error::{Result, WatchError};
use crate::registry::Registry;

/// Borrowed view of the channel descriptor; the registry keeps ownership.
struct ChannelFd(RawFd);

impl AsRawFd for ChannelFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

fn channel_error(context: &'static str, source: std::io::Error) -> WatchError {
    WatchError::System {
        context,
        path: None,
        source,
    }
}

/// Dispatch events from `registry` whenever its channel is readable.
///
/// Runs until reading the channel fails; combine with `tokio::select!` to
/// stop it.
pub async fn run(registry: &Registry) -> Result<()> {
    let fd = registry.fd()?;
    let async_fd = AsyncFd::new(ChannelFd(fd))
        .map_err(|e| channel_error("cannot register notification channel", e))?;

    loop {
        let mut guard = async_fd
            .readable()
            .await
            .map_err(|e| channel_error("cannot poll notification channel", e))?;

        match guard.try_io(|_| registry.read_pass()) {
            Ok(Ok(delivered)) => trace!("[runtime] delivered {delivered} events"),
            Ok(Err(e)) => return Err(channel_error("cannot read notification channel", e)),
            Err(_would_block) => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::EventMask;
    use crate::registry::tests::isolated;
    use std::ffi::OsString;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_run_dispatches_on_readability() {
        let temp = TempDir::new().unwrap();
        let registry = isolated();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let _watch = registry
            .register(temp.path(), EventMask::CREATE, move |_, ev| {
                let _ = tx.send(ev.name.clone());
            })
            .unwrap();
        std::fs::write(temp.path().join("ping"), b"").unwrap();

        let name = tokio::select! {
            res = run(registry) => panic!("driver stopped: {res:?}"),
            _ = tokio::time::sleep(Duration::from_secs(2)) => panic!("no event delivered"),
            name = rx.recv() => name,
        };
        assert_eq!(name.flatten(), Some(OsString::from("ping")));
    }
}
