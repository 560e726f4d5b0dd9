//! Watch command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use dirwatch::{DirHandler, DirWatch, Registry, Settings, runtime};
use tokio::sync::Notify;

/// Prints one line per event and signals when the root goes away.
struct PrintHandler {
    gone: Arc<Notify>,
}

impl DirHandler for PrintHandler {
    fn on_create(&mut self, _: &DirWatch, path: &Path) {
        println!("created  {}", path.display());
    }

    fn on_modify(&mut self, _: &DirWatch, path: &Path) {
        println!("modified {}", path.display());
    }

    fn on_delete(&mut self, watch: &DirWatch, path: Option<&Path>) {
        match path {
            Some(path) => println!("deleted  {}", path.display()),
            None => {
                println!("deleted  {} (watch ended)", watch.root().display());
                self.gone.notify_one();
            }
        }
    }
}

/// Run watch command - stream events until Ctrl-C or the root vanishes.
pub async fn run_watch(
    settings: &Settings,
    path: PathBuf,
    no_recursive: bool,
    ignore: Vec<String>,
) -> anyhow::Result<()> {
    let patterns = if ignore.is_empty() {
        settings.watch.ignore_patterns.clone()
    } else {
        ignore
    };
    let recursive = settings.watch.recursive && !no_recursive;
    let gone = Arc::new(Notify::new());

    let watch = DirWatch::builder(&path)
        .recursive(recursive)
        .ignore_patterns(&patterns)?
        .handler(PrintHandler { gone: gone.clone() })
        .build()
        .with_context(|| format!("cannot watch {}", path.display()))?;

    eprintln!(
        "Watching {} ({} directories). Press Ctrl-C to stop.",
        watch.root().display(),
        watch.watch_count()
    );

    tokio::select! {
        res = runtime::run(Registry::global()) => res?,
        _ = gone.notified() => {}
        _ = tokio::signal::ctrl_c() => {
            dirwatch::log_event!("watch", "interrupted");
        }
    }

    watch.close();
    Ok(())
}
