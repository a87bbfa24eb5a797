mod fanotify_source;
mod fork_observer;

pub use fanotify_source::FanotifySource;
pub use fork_observer::ForkObserver;

use std::path::PathBuf;

/// Normalized file-access event. Ids are dense (1..N) and assigned at
/// emission; an event is only emitted when at least one flag is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub id: u32,
    pub pid: i32,
    pub path: PathBuf,
    pub read: bool,
    pub write: bool,
    pub open: bool,
}
