//! Filesystem watching for incremental graph rebuilds

pub mod watcher;

pub use watcher::{DEFAULT_DEBOUNCE, FileWatcher, GraphUpdate, WatchEvent, WatcherService};
