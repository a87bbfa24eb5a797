//! Event-capture and artifact-assembly engine.
//!
//! The engine is injected into a target container next to the application it
//! observes. It marks the container's mount point for kernel file
//! notifications, launches the target, aggregates every file access into a
//! [`MonitorReport`], and on request from the host assembles a
//! content-preserving artifact tree plus a JSON report a downstream image
//! builder consumes.

pub mod aggregator;
pub mod artifacts;
pub mod control;
pub mod controller;
pub mod error;
pub mod observation;
pub mod procinfo;
pub mod report;
pub mod resolver;

pub use aggregator::Aggregator;
pub use artifacts::{ArtifactProps, ArtifactStore, FileKind};
pub use control::{Command, CommandServer, EventPublisher};
pub use controller::{RunController, RuntimeHandles};
pub use error::Error;
pub use observation::{FanotifySource, FileEvent, ForkObserver};
pub use report::{FileRecord, MonitorReport, ProcessRecord};
