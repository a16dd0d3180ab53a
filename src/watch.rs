//! Filesystem event source
//!
//! Bridges `notify`'s callback-based watcher into the async pipeline: the
//! watcher thread translates raw notifications into [`RawEvent`]s and
//! blocking-sends them into a bounded tokio channel. Dropping the returned
//! handle stops intake.

use std::path::{Path, PathBuf};

use notify::event::{CreateKind, EventKind as NotifyKind, ModifyKind, RenameMode};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{EventKind, RawEvent};

/// Keeps the platform watcher alive; drop to stop producing events.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
}

/// Install a recursive watcher on `root`, feeding translated events into
/// `tx`. The notify callback runs on the watcher's own thread, hence the
/// blocking send.
pub fn spawn(root: &Path, tx: mpsc::Sender<RawEvent>) -> Result<WatchHandle> {
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for raw in translate(event) {
                    if tx.blocking_send(raw).is_err() {
                        // Pipeline is shutting down; nothing to deliver to
                        return;
                    }
                }
            }
            Err(e) => tracing::warn!("watch error: {e}"),
        },
        notify::Config::default(),
    )?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    tracing::info!(root = %root.display(), "watching directory tree");

    Ok(WatchHandle { _watcher: watcher })
}

/// Translate one notify event into pipeline events. Kinds the pipeline does
/// not care about (access, metadata-only on directories, ...) are dropped.
fn translate(event: Event) -> Vec<RawEvent> {
    let mut out = Vec::new();
    match event.kind {
        NotifyKind::Create(kind) => {
            for path in event.paths {
                let raw = match kind {
                    CreateKind::Folder => RawEvent::new(EventKind::DirCreated, path),
                    CreateKind::File => RawEvent::new(EventKind::Created, path),
                    // Backend did not say; probe the filesystem
                    _ => {
                        if is_dir(&path) {
                            RawEvent::new(EventKind::DirCreated, path)
                        } else {
                            RawEvent::new(EventKind::Created, path)
                        }
                    }
                };
                out.push(raw);
            }
        }
        NotifyKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => {
                for path in event.paths {
                    out.push(RawEvent::new(EventKind::Removed, path));
                }
            }
            RenameMode::To => {
                for path in event.paths {
                    out.push(moved_to(path));
                }
            }
            RenameMode::Both => {
                // Convention: paths[0] is the vacated source, paths[1] the
                // destination
                let mut paths = event.paths.into_iter();
                if let Some(from) = paths.next() {
                    out.push(RawEvent::new(EventKind::Removed, from));
                }
                if let Some(to) = paths.next() {
                    out.push(moved_to(to));
                }
            }
            _ => {
                // Ambiguous rename reports; existence decides the side
                for path in event.paths {
                    if path.exists() {
                        out.push(moved_to(path));
                    } else {
                        out.push(RawEvent::new(EventKind::Removed, path));
                    }
                }
            }
        },
        NotifyKind::Modify(_) => {
            for path in event.paths {
                // Content changes inside a directory arrive as events on the
                // children; the directory itself has nothing to upload
                if !is_dir(&path) {
                    out.push(RawEvent::new(EventKind::Modified, path));
                }
            }
        }
        NotifyKind::Remove(_) => {
            for path in event.paths {
                out.push(RawEvent::new(EventKind::Removed, path));
            }
        }
        _ => {}
    }
    out
}

fn moved_to(path: PathBuf) -> RawEvent {
    if is_dir(&path) {
        RawEvent::new(EventKind::DirMovedTo, path)
    } else {
        RawEvent::new(EventKind::MovedTo, path)
    }
}

fn is_dir(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn translates_file_create() {
        let events = translate(
            Event::new(NotifyKind::Create(CreateKind::File)).add_path("/data/a.txt".into()),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Created);
        assert_eq!(events[0].path, Path::new("/data/a.txt"));
    }

    #[test]
    fn translates_folder_create() {
        let events = translate(
            Event::new(NotifyKind::Create(CreateKind::Folder)).add_path("/data/logs".into()),
        );
        assert_eq!(events[0].kind, EventKind::DirCreated);
    }

    #[test]
    fn ambiguous_create_probes_filesystem() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();

        let events =
            translate(Event::new(NotifyKind::Create(CreateKind::Any)).add_path(sub.clone()));
        assert_eq!(events[0].kind, EventKind::DirCreated);
    }

    #[test]
    fn rename_both_splits_into_remove_and_move() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("new.txt");
        std::fs::write(&dest, b"x").unwrap();

        let events = translate(
            Event::new(NotifyKind::Modify(ModifyKind::Name(RenameMode::Both)))
                .add_path(dir.path().join("old.txt"))
                .add_path(dest.clone()),
        );
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Removed);
        assert_eq!(events[1].kind, EventKind::MovedTo);
        assert_eq!(events[1].path, dest);
    }

    #[test]
    fn remove_translates_to_removed() {
        let events = translate(
            Event::new(NotifyKind::Remove(notify::event::RemoveKind::File))
                .add_path("/data/a.txt".into()),
        );
        assert_eq!(events[0].kind, EventKind::Removed);
    }

    #[test]
    fn access_events_are_dropped() {
        let events = translate(
            Event::new(NotifyKind::Access(notify::event::AccessKind::Read))
                .add_path("/data/a.txt".into()),
        );
        assert!(events.is_empty());
    }
}
