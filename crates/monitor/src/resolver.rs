#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Expand the observed path set to every filesystem entry under the mount
/// point that shares an inode with an observed path.
///
/// The expansion is deliberately generous: extra hardlink/symlink aliases
/// the target never touched are fine (the image builder wants the whole
/// alias set), omitting an alias the target did touch is not. Paths whose
/// stat fails are dropped silently; the target may have removed them.
pub fn resolve(observed: &BTreeSet<PathBuf>, mount_point: &Path) -> BTreeSet<PathBuf> {
    let mut inodes = HashSet::new();
    for path in observed {
        match std::fs::metadata(path) {
            Ok(meta) => {
                inodes.insert(meta.ino());
            }
            Err(err) => {
                trace!(path = %path.display(), %err, "observed path vanished");
            }
        }
    }

    let root_dev = match std::fs::metadata(mount_point) {
        Ok(meta) => meta.dev(),
        Err(err) => {
            warn!(mount = %mount_point.display(), %err, "cannot stat mount point");
            return BTreeSet::new();
        }
    };

    let mut by_inode: HashMap<u64, Vec<PathBuf>> = HashMap::new();
    let walker = WalkDir::new(mount_point)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| {
            // prune foreign mounts at directory boundaries
            !entry.file_type().is_dir()
                || entry
                    .metadata()
                    .map(|meta| meta.dev() == root_dev)
                    .unwrap_or(false)
        });
    for entry in walker.filter_map(|entry| entry.ok()) {
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        // bind-mounted leaves sit on another device even under this root
        if meta.dev() != root_dev {
            continue;
        }
        by_inode
            .entry(meta.ino())
            .or_default()
            .push(entry.path().to_path_buf());
    }

    let mut resolved = BTreeSet::new();
    for inode in &inodes {
        if let Some(paths) = by_inode.get(inode) {
            resolved.extend(paths.iter().cloned());
        }
    }

    debug!(
        observed = observed.len(),
        resolved = resolved.len(),
        "path set resolved"
    );
    resolved
}
