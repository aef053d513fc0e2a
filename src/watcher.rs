//! Folder-watch primitive: `create(folder, on_change)` then `start()` / `stop()`.

use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// Called with the event kind (`add`, `change`, `unlink`) and the affected path.
/// May run on a watcher thread outside the async runtime.
pub type ChangeCallback = Arc<dyn Fn(&str, &Path) + Send + Sync>;

pub trait FolderWatch: Send {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self);
}

pub trait WatcherFactory: Send + Sync {
    fn create(&self, folder: &Path, on_change: ChangeCallback) -> Box<dyn FolderWatch>;
}

fn event_label(kind: &EventKind) -> Option<&'static str> {
    match kind {
        EventKind::Access(_) => None,
        EventKind::Create(_) => Some("add"),
        EventKind::Remove(_) => Some("unlink"),
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => Some("change"),
    }
}

/// Recursive watcher on top of notify's platform backend.
pub struct NotifyFolderWatch {
    folder: PathBuf,
    on_change: ChangeCallback,
    poll_interval: Duration,
    watcher: Option<RecommendedWatcher>,
}

impl FolderWatch for NotifyFolderWatch {
    fn start(&mut self) -> Result<()> {
        if self.watcher.is_some() {
            return Ok(());
        }
        let on_change = self.on_change.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let Some(label) = event_label(&event.kind) else {
                        return;
                    };
                    for path in &event.paths {
                        on_change(label, path);
                    }
                }
                Err(err) => tracing::warn!(error = %err, "folder watcher error"),
            },
            NotifyConfig::default().with_poll_interval(self.poll_interval),
        )?;
        watcher.watch(&self.folder, RecursiveMode::Recursive)?;
        tracing::debug!(folder = %self.folder.display(), "folder watcher started");
        self.watcher = Some(watcher);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(err) = watcher.unwatch(&self.folder) {
                tracing::debug!(folder = %self.folder.display(), error = %err, "unwatch failed");
            }
        }
    }
}

impl Drop for NotifyFolderWatch {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Clone)]
pub struct NotifyWatcherFactory {
    poll_interval: Duration,
}

impl Default for NotifyWatcherFactory {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
        }
    }
}

impl WatcherFactory for NotifyWatcherFactory {
    fn create(&self, folder: &Path, on_change: ChangeCallback) -> Box<dyn FolderWatch> {
        Box::new(NotifyFolderWatch {
            folder: folder.to_path_buf(),
            on_change,
            poll_interval: self.poll_interval,
            watcher: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};

    #[test]
    fn access_events_are_dropped() {
        assert_eq!(event_label(&EventKind::Access(AccessKind::Any)), None);
        assert_eq!(event_label(&EventKind::Create(CreateKind::File)), Some("add"));
        assert_eq!(event_label(&EventKind::Modify(ModifyKind::Any)), Some("change"));
        assert_eq!(event_label(&EventKind::Remove(RemoveKind::File)), Some("unlink"));
    }

    #[test]
    fn missing_folder_fails_to_start() {
        let factory = NotifyWatcherFactory::default();
        let mut watch = factory.create(
            Path::new("/definitely/not/a/real/folder/for/watching"),
            Arc::new(|_, _| {}),
        );
        assert!(watch.start().is_err());
        watch.stop();
    }
}
