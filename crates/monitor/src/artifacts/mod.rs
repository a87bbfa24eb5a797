#![forbid(unsafe_code)]

mod datatype;
mod mode;

use crate::error::Error;
use crate::report::MonitorReport;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::os::unix::fs::{DirBuilderExt, MetadataExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    File,
    Symlink,
    Dir,
    Unknown,
}

/// Per-path record emitted in the final report. Field order matches the
/// wire contract of the downstream image builder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactProps {
    pub file_type: FileKind,
    pub file_path: PathBuf,
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_ref: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<BTreeMap<String, bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_type: Option<String>,
}

#[derive(Serialize)]
struct RunReport<'a> {
    monitor: &'a MonitorReport,
    image: ImageReport<'a>,
}

#[derive(Serialize)]
struct ImageReport<'a> {
    files: Vec<&'a ArtifactProps>,
}

/// Classifies the resolved path set, mirrors file content into the staging
/// tree and writes `creport.json`. Single writer during finalization.
pub struct ArtifactStore<'a> {
    store_root: PathBuf,
    report: &'a MonitorReport,
    raw_names: BTreeSet<PathBuf>,
    artifacts: BTreeMap<PathBuf, ArtifactProps>,
    // symlink targets outside the input set; parked, intentionally never
    // drained (multi-hop targets stay link_ref-only)
    resolve: BTreeSet<PathBuf>,
}

impl<'a> ArtifactStore<'a> {
    pub fn new(
        store_root: impl Into<PathBuf>,
        report: &'a MonitorReport,
        raw_names: BTreeSet<PathBuf>,
    ) -> Self {
        Self {
            store_root: store_root.into(),
            report,
            raw_names,
            artifacts: BTreeMap::new(),
            resolve: BTreeSet::new(),
        }
    }

    /// Classify every resolved path and compute its props. Paths that
    /// vanished since resolution are skipped with a log line.
    pub fn prepare(&mut self) {
        let names: Vec<PathBuf> = self.raw_names.iter().cloned().collect();
        for path in &names {
            self.prepare_artifact(path);
        }
        debug!(
            prepared = self.artifacts.len(),
            parked_links = self.resolve.len(),
            "artifacts prepared"
        );
    }

    fn prepare_artifact(&mut self, path: &Path) {
        let meta = match std::fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(err) => {
                warn!(path = %path.display(), %err, "artifact vanished before prepare");
                return;
            }
        };

        let mut props = ArtifactProps {
            file_type: FileKind::Unknown,
            file_path: path.to_path_buf(),
            mode: mode::symbolic(meta.mode()),
            link_ref: None,
            flags: self.artifact_flags(path),
            data_type: None,
            file_size: meta.len(),
            sha1_hash: None,
            app_type: None,
        };

        let file_type = meta.file_type();
        if file_type.is_file() {
            props.file_type = FileKind::File;
            props.sha1_hash = file_digest(path)
                .map_err(|err| debug!(path = %path.display(), %err, "digest failed"))
                .ok();
            props.data_type = datatype::classify(path);
        } else if file_type.is_symlink() {
            let target = match std::fs::read_link(path) {
                Ok(target) => target,
                Err(err) => {
                    warn!(path = %path.display(), %err, "cannot read symlink target");
                    return;
                }
            };
            if !self.raw_names.contains(&target) {
                self.resolve.insert(target.clone());
            }
            props.file_type = FileKind::Symlink;
            props.link_ref = Some(target);
        } else if file_type.is_dir() {
            warn!(path = %path.display(), "directory reached the artifact set");
            props.file_type = FileKind::Dir;
        } else {
            warn!(path = %path.display(), "unsupported artifact type");
        }

        self.artifacts.insert(path.to_path_buf(), props);
    }

    /// `R`/`W`/`X` aggregated across every process that touched the path.
    fn artifact_flags(&self, path: &Path) -> Option<BTreeMap<String, bool>> {
        let mut flags = BTreeMap::new();
        for files in self.report.process_files.values() {
            if let Some(record) = files.get(path) {
                if record.reads > 0 {
                    flags.insert("R".to_string(), true);
                }
                if record.writes > 0 {
                    flags.insert("W".to_string(), true);
                }
                if record.execs > 0 {
                    flags.insert("X".to_string(), true);
                }
            }
        }
        (!flags.is_empty()).then_some(flags)
    }

    /// Mirror regular files and symlinks into `<store_root>/files/`.
    /// Per-artifact failures are logged and skipped; the run never aborts
    /// here.
    pub fn save(&self) {
        for (path, props) in &self.artifacts {
            let result = match props.file_type {
                FileKind::File => self.copy_file(path),
                FileKind::Symlink => match &props.link_ref {
                    Some(target) => self.place_symlink(path, target),
                    None => Ok(()),
                },
                FileKind::Dir | FileKind::Unknown => Ok(()),
            };
            if let Err(err) = result {
                warn!(path = %path.display(), %err, "artifact skipped");
            }
        }
    }

    fn staged_path(&self, path: &Path) -> PathBuf {
        let relative = path.strip_prefix("/").unwrap_or(path);
        self.store_root.join("files").join(relative)
    }

    fn copy_file(&self, src: &Path) -> std::io::Result<()> {
        let dst = self.staged_path(src);
        if let Some(parent) = dst.parent() {
            permissive_dirs(parent)?;
        }
        // fs::copy carries the permission bits over
        std::fs::copy(src, &dst)?;
        Ok(())
    }

    fn place_symlink(&self, src: &Path, target: &Path) -> std::io::Result<()> {
        let dst = self.staged_path(src);
        if let Some(parent) = dst.parent() {
            permissive_dirs(parent)?;
        }
        std::os::unix::fs::symlink(target, &dst)
    }

    /// Write `creport.json` under the store root, files sorted ascending by
    /// path.
    pub fn write_report(&self) -> Result<PathBuf, Error> {
        permissive_dirs(&self.store_root)?;

        let report = RunReport {
            monitor: self.report,
            image: ImageReport {
                files: self.artifacts.values().collect(),
            },
        };
        let path = self.store_root.join("creport.json");
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&path, json)?;

        info!(path = %path.display(), "report saved");
        Ok(path)
    }

    pub fn artifacts(&self) -> &BTreeMap<PathBuf, ArtifactProps> {
        &self.artifacts
    }
}

fn permissive_dirs(path: &Path) -> std::io::Result<()> {
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o777)
        .create(path)
}

fn file_digest(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha1::new();
    std::io::copy(&mut file, &mut hasher)?;

    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    Ok(hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_matches_known_vector() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"abc").unwrap();
        assert_eq!(
            file_digest(file.path()).unwrap(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn file_kind_renders_as_plain_names() {
        assert_eq!(serde_json::to_value(FileKind::File).unwrap(), "File");
        assert_eq!(serde_json::to_value(FileKind::Symlink).unwrap(), "Symlink");
        assert_eq!(serde_json::to_value(FileKind::Dir).unwrap(), "Dir");
        assert_eq!(serde_json::to_value(FileKind::Unknown).unwrap(), "Unknown");
    }

    #[test]
    fn empty_flags_are_omitted() {
        let props = ArtifactProps {
            file_type: FileKind::File,
            file_path: "/etc/hostname".into(),
            mode: "-rw-r--r--".into(),
            link_ref: None,
            flags: None,
            data_type: Some("ASCII text".into()),
            file_size: 4,
            sha1_hash: Some("a".repeat(40)),
            app_type: None,
        };
        let value = serde_json::to_value(&props).unwrap();
        assert!(value.get("flags").is_none());
        assert!(value.get("link_ref").is_none());
        assert!(value.get("app_type").is_none());
        assert_eq!(value["file_type"], "File");
    }
}
