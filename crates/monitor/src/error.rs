#![forbid(unsafe_code)]

use std::path::PathBuf;

/// Errors surfaced by the engine. Only the startup variants are fatal for a
/// run; everything recoverable is logged and handled at the call site.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to initialize the kernel notification source: {0}")]
    NotifyInit(#[source] nix::Error),

    #[error("Failed to mark mount point {path:?} for notifications: {source}")]
    NotifyMark {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("Failed to open mount point {path:?}: {source}")]
    MountOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to bind control socket {addr}: {source}")]
    ChannelBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Missing target command line")]
    MissingTarget,

    #[error("Failed to spawn target {path:?}: {source}")]
    TargetSpawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Event aggregation ended without delivering a report")]
    ReportLost,

    #[error("Failed to serialize report: {0}")]
    SerializeReport(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
