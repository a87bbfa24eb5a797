#![forbid(unsafe_code)]

mod channels;
mod error;
mod paths;
mod timing;

pub use channels::Channels;
pub use error::Error;
pub use paths::Paths;
pub use timing::Timing;

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Runtime settings for the sensor. The shipped launcher runs on
/// `Settings::default()`; the loaders exist for tests and embedders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Settings {
    pub channels: Channels,
    pub paths: Paths,
    pub timing: Timing,
}

impl Settings {
    /// Load settings from a TOML file. Missing fields are filled with defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        let settings: Settings = toml_edit::de::from_str(&text)?;
        Ok(settings)
    }

    /// Save settings to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let toml = toml_edit::ser::to_string_pretty(self)?;
        std::fs::write(path, toml)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.toml");

        let settings = Settings::default();
        settings.save(&path).unwrap();
        let loaded = Settings::load(&path).unwrap();

        assert_eq!(settings, loaded);
    }

    #[test]
    fn defaults_match_contract() {
        let settings = Settings::default();
        assert_eq!(settings.channels.command_addr, "0.0.0.0:65501");
        assert_eq!(settings.channels.event_addr, "0.0.0.0:65502");
        assert_eq!(settings.channels.publish_attempts, 3);
        assert_eq!(settings.paths.mount_point, Path::new("/"));
        assert_eq!(
            settings.paths.artifact_dir,
            Path::new("/opt/dockerslim/artifacts")
        );
        assert_eq!(settings.timing.startup_grace, Duration::from_secs(3));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[channels]\ncommand_addr = \"127.0.0.1:7501\"\n").unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.channels.command_addr, "127.0.0.1:7501");
        assert_eq!(loaded.channels.event_addr, "0.0.0.0:65502");
        assert_eq!(loaded.timing.heartbeat, Duration::from_secs(5));
    }
}
