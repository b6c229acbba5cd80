//! Named presets stored as JSON under the user's data directory
//!
//! Layout: `<data_dir>/xwaifu/presets/<name>/config.json`

use anyhow::{bail, Context, Result};
use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::OverlayConfig;
use crate::constants::{paths, permissions};

pub struct PresetStore {
    root: PathBuf,
}

impl PresetStore {
    /// Store rooted at the default presets directory
    pub fn new() -> Result<Self> {
        let mut root = dirs::data_dir()
            .context("Failed to determine data directory (is HOME set?)")?;
        root.push(paths::APP_DIR);
        root.push(paths::PRESETS_DIR);
        Ok(Self::with_root(root))
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
            bail!("Invalid preset name '{}'", name.escape_debug());
        }
        Ok(())
    }

    pub fn preset_path(&self, name: &str) -> Result<PathBuf> {
        Self::validate_name(name)?;
        Ok(self.root.join(name).join(paths::PRESET_FILENAME))
    }

    /// Write `config` under `name`, replacing any existing preset of that name
    pub fn save(&self, name: &str, config: &OverlayConfig) -> Result<PathBuf> {
        let path = self.preset_path(name)?;
        if let Some(parent) = path.parent() {
            DirBuilder::new()
                .recursive(true)
                .mode(permissions::PRESET_DIR_MODE)
                .create(parent)
                .with_context(|| format!("Failed to create preset directory {:?}", parent))?;
        }

        let json = serde_json::to_string_pretty(config)
            .context("Failed to serialize preset to JSON")?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(permissions::PRESET_FILE_MODE)
            .open(&path)
            .with_context(|| format!("Failed to create preset file {:?}", path))?;
        // mode() only applies to newly created files
        file.set_permissions(fs::Permissions::from_mode(permissions::PRESET_FILE_MODE))
            .with_context(|| format!("Failed to set permissions on {:?}", path))?;
        file.write_all(json.as_bytes())
            .with_context(|| format!("Failed to write preset to {:?}", path))?;

        info!(preset = %name, path = %path.display(), "Saved preset");
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<OverlayConfig> {
        let path = self.preset_path(name)?;
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                bail!("No preset named '{}' (looked for {})", name, path.display())
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read preset {:?}", path));
            }
        };
        let config: OverlayConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse preset {:?}", path))?;
        config.validate()
            .with_context(|| format!("Preset '{}' is invalid", name))?;

        debug!(preset = %name, config = ?config, "Loaded preset");
        Ok(config)
    }

    /// Names of all saved presets, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {:?}", self.root));
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("Failed to read entry in {:?}", self.root))?;
            if !entry.path().join(paths::PRESET_FILENAME).is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example() -> OverlayConfig {
        OverlayConfig {
            image: PathBuf::from("img.png"),
            alpha: 0.5,
            geometry: Some("100x100".to_string()),
            fade: false,
            auto_width: false,
            auto_height: false,
        }
    }

    #[test]
    fn test_save_then_load_replays_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let store = PresetStore::with_root(dir.path());

        store.save("test", &example()).unwrap();
        let loaded = store.load("test").unwrap();

        assert_eq!(loaded, example());
        assert_eq!(loaded.to_args(), ["-a", "0.5", "-g", "100x100", "--", "img.png"]);
    }

    #[test]
    fn test_preset_layout_and_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let store = PresetStore::with_root(dir.path());

        let path = store.save("desk", &example()).unwrap();
        assert_eq!(path, dir.path().join("desk").join("config.json"));

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_save_overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = PresetStore::with_root(dir.path());

        let mut config = example();
        config.geometry = Some("1000x1000+500+500".to_string());
        store.save("test", &config).unwrap();
        store.save("test", &example()).unwrap();

        assert_eq!(store.load("test").unwrap(), example());
    }

    #[test]
    fn test_load_missing_preset() {
        let dir = tempfile::tempdir().unwrap();
        let store = PresetStore::with_root(dir.path());
        let err = store.load("nope").unwrap_err();
        assert!(err.to_string().contains("No preset named 'nope'"));
    }

    #[test]
    fn test_load_rejects_malformed_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let store = PresetStore::with_root(dir.path());

        fs::create_dir_all(dir.path().join("broken")).unwrap();
        fs::write(dir.path().join("broken/config.json"), "sh -c 'rm -rf ~'").unwrap();
        assert!(store.load("broken").is_err());

        fs::create_dir_all(dir.path().join("bright")).unwrap();
        fs::write(dir.path().join("bright/config.json"), r#"{"image": "a.png", "alpha": 3.0}"#).unwrap();
        assert!(store.load("bright").is_err());
    }

    #[test]
    fn test_rejects_path_like_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = PresetStore::with_root(dir.path());
        for name in ["", ".", "..", "../escape", "a/b"] {
            assert!(store.save(name, &example()).is_err(), "name {name:?} accepted");
        }
    }

    #[test]
    fn test_list_presets() {
        let dir = tempfile::tempdir().unwrap();
        let store = PresetStore::with_root(dir.path().join("presets"));
        assert!(store.list().unwrap().is_empty());

        store.save("zeta", &example()).unwrap();
        store.save("alpha", &example()).unwrap();
        fs::create_dir_all(store.root().join("empty")).unwrap();

        assert_eq!(store.list().unwrap(), vec!["alpha", "zeta"]);
    }
}
