use anyhow::Context;
use m4af::config::MuxerConfig;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::PathBuf};

const APP_NAME: &str = "m4af-remux";

/// Defaults read from the configuration file. Command-line flags override
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(flatten)]
    pub muxer: MuxerConfig,
    /// Encoder delay, in samples.
    pub delay: u32,
    /// Trailing padding, in samples.
    pub padding: u32,
    /// Write a `©too` tag naming this program.
    pub tool_tag: bool,
    /// Tags added to every file, by generic name (eg. `artist`).
    pub tags: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            muxer: MuxerConfig::default(),
            delay: 0,
            padding: 0,
            tool_tag: true,
            tags: BTreeMap::new(),
        }
    }
}

/// Loads settings from `path`, or from the per-user configuration file.
/// A missing file is created with the defaults.
///
/// # Errors
///
/// The file could not be read, parsed or created.
pub fn load(path: Option<PathBuf>) -> anyhow::Result<Settings> {
    match path {
        Some(path) => confy::load_path(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => confy::load(APP_NAME, Some("config")).context("Failed to load configuration"),
    }
}

/// # Errors
///
/// The file could not be written.
pub fn store(path: Option<PathBuf>, settings: Settings) -> anyhow::Result<()> {
    match path {
        Some(path) => confy::store_path(&path, settings)
            .with_context(|| format!("Failed to store configuration to {}", path.display())),
        None => confy::store(APP_NAME, Some("config"), settings)
            .context("Failed to store configuration"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use m4af::config::GaplessMode;

    #[test]
    fn missing_keys_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m4af-remux.toml");
        std::fs::write(&path, "gapless = \"iso\"\n\n[tags]\nartist = \"Someone\"\n").unwrap();
        let settings = load(Some(path)).unwrap();
        assert_eq!(settings.muxer.gapless, GaplessMode::Iso);
        assert_eq!(settings.muxer.timescale, 44100);
        assert!(settings.tool_tag);
        assert_eq!(settings.tags["artist"], "Someone");
    }

    #[test]
    fn store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m4af-remux.toml");
        let mut settings = Settings::default();
        settings.muxer.optimize = true;
        settings.delay = 2112;
        store(Some(path.clone()), settings.clone()).unwrap();
        assert_eq!(load(Some(path)).unwrap(), settings);
    }
}
