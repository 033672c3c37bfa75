// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! File system watcher for the origin directory

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::{keys, ConfigProvider};
use crate::jobs::JobDispatcher;
use crate::Result;

/// Events emitted by the watcher
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// A new file was created
    FileCreated(PathBuf),
    /// Watcher error
    Error(String),
}

/// File system watcher
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    event_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
}

impl FileWatcher {
    /// Create a new file watcher
    pub fn new() -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let config = Config::default().with_poll_interval(Duration::from_secs(2));

        // notify calls this from its own thread
        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            config,
        )?;

        Ok(Self { watcher, event_rx: rx })
    }

    /// Add a directory to watch
    pub fn watch(&mut self, path: &Path) -> Result<()> {
        // Create directory if it doesn't exist
        if !path.exists() {
            std::fs::create_dir_all(path)?;
            info!("Created watch directory: {:?}", path);
        }

        // Files dropped into subfolders are not inventory entries
        self.watcher.watch(path, RecursiveMode::NonRecursive)?;
        info!("Watching: {:?}", path);

        Ok(())
    }

    /// Wait for the next relevant event
    ///
    /// Returns `None` once the underlying watcher is gone.
    pub async fn next_event(&mut self) -> Option<WatchEvent> {
        loop {
            match self.event_rx.recv().await? {
                Ok(event) => {
                    if let Some(converted) = Self::convert_event(event) {
                        return Some(converted);
                    }
                }
                Err(e) => return Some(WatchEvent::Error(e.to_string())),
            }
        }
    }

    fn convert_event(event: Event) -> Option<WatchEvent> {
        // Removals and edits are picked up by the next synchronization
        match event.kind {
            EventKind::Create(_) => Some(WatchEvent::FileCreated(event.paths.first()?.clone())),
            _ => None,
        }
    }
}

/// Check if a file should be processed
pub fn should_process(path: &Path) -> bool {
    let filename = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };

    // Skip hidden files, including our own atomic-write temporaries
    if filename.starts_with('.') {
        return false;
    }

    // Skip temporary files
    let temp_extensions = [".tmp", ".part", ".crdownload", ".partial", ".download"];
    if temp_extensions.iter().any(|ext| filename.ends_with(ext)) {
        return false;
    }

    // Skip system files
    let skip_names = ["desktop.ini", "thumbs.db", ".ds_store"];
    if skip_names.iter().any(|n| filename.eq_ignore_ascii_case(n)) {
        return false;
    }

    true
}

/// Wait for file to be stable (not being written)
pub async fn wait_for_stable(path: &Path, max_wait: Duration) -> bool {
    let check_interval = Duration::from_millis(500);
    let start = std::time::Instant::now();

    let mut last_size = match std::fs::metadata(path) {
        Ok(m) => m.len(),
        Err(_) => return false,
    };

    loop {
        tokio::time::sleep(check_interval).await;

        // Check if we've exceeded max wait time
        if start.elapsed() > max_wait {
            warn!("File stability check timed out for {:?}", path);
            return true;
        }

        // Check if file still exists
        let current_size = match std::fs::metadata(path) {
            Ok(m) => m.len(),
            Err(_) => return false,
        };

        // If size hasn't changed, file is stable
        if current_size == last_size {
            return true;
        }

        last_size = current_size;
        debug!("File {:?} still being written, size: {}", path, current_size);
    }
}

/// Request a synchronization whenever a new file settles in the origin
///
/// Runs until `shutdown` flips to true or the watcher stops.
pub async fn watch_origin(
    dispatcher: JobDispatcher,
    stable_wait: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let origin = dispatcher.pipeline().config().get_path(keys::ORIGIN_DIRECTORY)?;

    let mut watcher = FileWatcher::new()?;
    watcher.watch(&origin)?;

    // Pick up anything that arrived while we were not running
    dispatcher.request_synchronize()?;

    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => break,
            event = watcher.next_event() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            WatchEvent::FileCreated(path) if should_process(&path) => {
                let dispatcher = dispatcher.clone();
                // Each arrival settles on its own task
                tokio::spawn(async move {
                    if !wait_for_stable(&path, stable_wait).await {
                        debug!("File disappeared during stability check: {:?}", path);
                        return;
                    }
                    // Directories are not inventory entries
                    if !path.is_file() {
                        return;
                    }
                    match dispatcher.request_synchronize() {
                        Ok(handle) => debug!("{:?} triggered synchronization {}", path, handle.id),
                        Err(e) => error!("Failed to request synchronization: {}", e),
                    }
                });
            }
            WatchEvent::Error(e) => warn!("Watch error: {}", e),
            _ => {}
        }
    }

    info!("Stopped watching {:?}", origin);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_process() {
        assert!(should_process(Path::new("/in/invoice_2024.pdf")));
        assert!(should_process(Path::new("README")));
        assert!(!should_process(Path::new("/in/.hidden")));
        assert!(!should_process(Path::new("/in/.model.json.1234.tmp")));
        assert!(!should_process(Path::new("/in/movie.mkv.part")));
        assert!(!should_process(Path::new("/in/Thumbs.db")));
        assert!(!should_process(Path::new("/")));
    }

    #[tokio::test]
    async fn test_wait_for_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("done.txt");
        std::fs::write(&path, "contents").unwrap();

        assert!(wait_for_stable(&path, Duration::from_secs(5)).await);
        assert!(!wait_for_stable(&dir.path().join("missing"), Duration::from_secs(1)).await);
    }

    #[test]
    fn test_convert_event_kinds() {
        let path = PathBuf::from("/in/a.txt");
        let created = Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(path.clone());
        assert_eq!(
            FileWatcher::convert_event(created),
            Some(WatchEvent::FileCreated(path))
        );

        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/in/b.txt"));
        assert_eq!(FileWatcher::convert_event(access), None);

        let removed = Event::new(EventKind::Remove(notify::event::RemoveKind::File))
            .add_path(PathBuf::from("/in/c.txt"));
        assert_eq!(FileWatcher::convert_event(removed), None);

        let bare = Event::new(EventKind::Create(notify::event::CreateKind::Any));
        assert_eq!(FileWatcher::convert_event(bare), None);
    }
}
