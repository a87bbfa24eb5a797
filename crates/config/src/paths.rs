#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Paths {
    /// Mount point the notification source is marked against. Observation
    /// does not cross into other mounts.
    pub mount_point: PathBuf,

    /// Root of the artifact store. Copies land under `<artifact_dir>/files`,
    /// the report at `<artifact_dir>/creport.json`.
    pub artifact_dir: PathBuf,

    /// Leftover sockets from the legacy IPC transport, removed on startup.
    pub stale_ipc: Vec<PathBuf>,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            mount_point: PathBuf::from("/"),
            artifact_dir: PathBuf::from("/opt/dockerslim/artifacts"),
            stale_ipc: vec![
                PathBuf::from("/tmp/docker-slim-launcher.cmds.ipc"),
                PathBuf::from("/tmp/docker-slim-launcher.events.ipc"),
            ],
        }
    }
}
