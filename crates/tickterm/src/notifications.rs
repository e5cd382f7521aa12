//! Drop-box for out-of-band messages: each `*.txt` file in the directory is
//! delivered once, in name order, and then removed. Writers should create
//! the file under another name and rename it into place.
//!
//! Arrivals are picked up from filesystem events; a slow poll catches
//! anything the watcher missed, or everything if it could not be set up.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use notify::Event;
use notify::EventKind;
use notify::RecommendedWatcher;
use notify::RecursiveMode;
use notify::Watcher;
use notify::event::ModifyKind;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct NotificationWatcher {
    dir: PathBuf,
    poll_interval: Duration,
}

impl NotificationWatcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reads and removes every pending notification. Empty files are removed
    /// without being delivered.
    pub async fn drain(&self) -> Vec<String> {
        let mut paths = match pending_files(&self.dir).await {
            Ok(paths) => paths,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "failed to list notifications");
                return Vec::new();
            }
        };
        paths.sort();

        let mut messages = Vec::new();
        for path in paths {
            let text = match tokio::fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read notification");
                    continue;
                }
            };
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "failed to remove notification");
            }
            let text = text.trim();
            if text.is_empty() {
                debug!(path = %path.display(), "skipping empty notification");
                continue;
            }
            info!(path = %path.display(), "notification received");
            messages.push(text.to_string());
        }
        messages
    }

    /// Delivers pending notifications immediately, then again on every
    /// arrival event or poll, until the receiver goes away or the task is
    /// aborted.
    pub fn spawn(self, tx: mpsc::Sender<String>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let (wake_tx, mut wake_rx) = mpsc::unbounded_channel();
            let _watcher = self.watch(wake_tx);
            loop {
                for message in self.drain().await {
                    if tx.send(message).await.is_err() {
                        return;
                    }
                }
                tokio::select! {
                    _ = tx.closed() => return,
                    Some(()) = wake_rx.recv() => {
                        while wake_rx.try_recv().is_ok() {}
                    }
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        })
    }

    fn watch(&self, wake: mpsc::UnboundedSender<()>) -> Option<RecommendedWatcher> {
        let handler = move |res: notify::Result<Event>| match res {
            Ok(event) if is_arrival(&event) => {
                let _ = wake.send(());
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "notification watch error"),
        };
        let mut watcher = match notify::recommended_watcher(handler) {
            Ok(watcher) => watcher,
            Err(e) => {
                warn!(error = %e, "notification watcher unavailable, polling only");
                return None;
            }
        };
        if let Err(e) = watcher.watch(&self.dir, RecursiveMode::NonRecursive) {
            warn!(dir = %self.dir.display(), error = %e, "cannot watch notifications, polling only");
            return None;
        }
        Some(watcher)
    }
}

/// A `*.txt` file created or renamed into the directory.
fn is_arrival(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_)))
        && event
            .paths
            .iter()
            .any(|p| p.extension().is_some_and(|ext| ext == "txt"))
}

async fn pending_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "txt") && path.is_file() {
            paths.push(path);
        }
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_drain_in_name_order_and_removes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("002-b.txt"), "second\n").unwrap();
        std::fs::write(dir.path().join("001-a.txt"), "  first  ").unwrap();
        std::fs::write(dir.path().join("003-empty.txt"), "\n").unwrap();
        std::fs::write(dir.path().join("notes.md"), "not a notification").unwrap();

        let watcher = NotificationWatcher::new(dir.path());
        assert_eq!(watcher.drain().await, vec!["first", "second"]);
        assert!(!dir.path().join("003-empty.txt").exists());
        assert!(dir.path().join("notes.md").exists());
        assert!(watcher.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_dir_is_quiet() {
        let dir = TempDir::new().unwrap();
        let watcher = NotificationWatcher::new(dir.path().join("absent"));
        assert!(watcher.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_events_deliver_without_waiting_for_poll() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let handle = NotificationWatcher::new(dir.path())
            .with_poll_interval(Duration::from_secs(3600))
            .spawn(tx);
        tokio::time::sleep(Duration::from_millis(100)).await;

        std::fs::write(dir.path().join("ci.partial"), "CI is green").unwrap();
        std::fs::rename(dir.path().join("ci.partial"), dir.path().join("ci.txt")).unwrap();
        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(message.as_deref(), Some("CI is green"));
        handle.abort();
    }

    #[tokio::test]
    async fn test_poll_covers_dir_created_late() {
        let dir = TempDir::new().unwrap();
        let inbox = dir.path().join("notifications");
        let (tx, mut rx) = mpsc::channel(4);
        let handle = NotificationWatcher::new(&inbox)
            .with_poll_interval(Duration::from_millis(20))
            .spawn(tx);
        tokio::time::sleep(Duration::from_millis(50)).await;

        std::fs::create_dir_all(&inbox).unwrap();
        std::fs::write(inbox.join("late.txt"), "deploy done").unwrap();
        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(message.as_deref(), Some("deploy done"));
        handle.abort();
    }

    #[test]
    fn test_only_txt_arrivals_wake() {
        let created = |name: &str| {
            Event::new(EventKind::Create(notify::event::CreateKind::File)).add_path(PathBuf::from(name))
        };
        assert!(is_arrival(&created("/n/a.txt")));
        assert!(!is_arrival(&created("/n/a.partial")));
        let removed =
            Event::new(EventKind::Remove(notify::event::RemoveKind::File)).add_path(PathBuf::from("/n/a.txt"));
        assert!(!is_arrival(&removed));
    }

    #[tokio::test]
    async fn test_spawn_delivers_new_files() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let handle = NotificationWatcher::new(dir.path())
            .with_poll_interval(Duration::from_millis(20))
            .spawn(tx);

        std::fs::write(dir.path().join("ping.partial"), "build finished").unwrap();
        std::fs::rename(dir.path().join("ping.partial"), dir.path().join("ping.txt")).unwrap();
        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(message.as_deref(), Some("build finished"));
        handle.abort();
    }
}
