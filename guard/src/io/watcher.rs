//! Filesystem watching for the verification loop.
//!
//! Raw `notify` events are filtered (event kind, ignore dirs, watch globs)
//! and forwarded as [`WatchMsg`] values over an mpsc channel; the loop thread
//! owns all debounce timing.

use std::path::{Component, Path, PathBuf};
use std::sync::mpsc::Sender;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::warn;

/// Directory names excluded from watching (version control, build output,
/// and the guard's own state).
const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".guard",
    "target",
    "node_modules",
    "build",
    "coverage",
];

/// Messages consumed by a project's verification loop thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchMsg {
    /// A watched file changed (path relative to the project root).
    Changed(PathBuf),
    /// Tear the loop down.
    Stop,
}

/// Keeps the underlying `notify` watcher alive; dropping it stops event
/// delivery.
pub struct ProjectWatcher {
    _watcher: RecommendedWatcher,
}

/// Watch `root` recursively, forwarding relevant change events to `tx`.
pub fn watch_project(root: &Path, watch_globs: &[String], tx: Sender<WatchMsg>) -> Result<ProjectWatcher> {
    let filter = EventFilter::new(root, watch_globs)?;

    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| match res {
            Ok(event) => {
                for path in filter.relevant_paths(&event) {
                    // Receiver gone means the loop stopped; nothing to do.
                    let _ = tx.send(WatchMsg::Changed(path));
                }
            }
            Err(err) => warn!(err = %err, "filesystem watcher error"),
        },
        notify::Config::default(),
    )
    .context("create file watcher")?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .with_context(|| format!("watch path {}", root.display()))?;

    Ok(ProjectWatcher { _watcher: watcher })
}

struct EventFilter {
    root: PathBuf,
    watch: GlobSet,
    watch_all: bool,
}

impl EventFilter {
    fn new(root: &Path, watch_globs: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in watch_globs {
            builder
                .add(Glob::new(pattern).with_context(|| format!("invalid glob '{pattern}'"))?);
        }
        Ok(Self {
            root: root.to_path_buf(),
            watch: builder.build().context("compile watch globs")?,
            watch_all: watch_globs.is_empty(),
        })
    }

    fn relevant_paths(&self, event: &Event) -> Vec<PathBuf> {
        if !is_change_event(event) {
            return Vec::new();
        }
        event
            .paths
            .iter()
            .filter_map(|path| self.relativize(path))
            .filter(|rel| !is_ignored(rel))
            .filter(|rel| self.watch_all || self.watch.is_match(rel))
            .collect()
    }

    fn relativize(&self, path: &Path) -> Option<PathBuf> {
        match path.strip_prefix(&self.root) {
            Ok(rel) => Some(rel.to_path_buf()),
            Err(_) => Some(path.to_path_buf()),
        }
    }
}

fn is_change_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn is_ignored(rel: &Path) -> bool {
    rel.components().any(|component| match component {
        Component::Normal(name) => IGNORED_DIRS
            .iter()
            .any(|ignored| name == std::ffi::OsStr::new(ignored)),
        _ => false,
    })
}
