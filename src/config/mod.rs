//! Overlay configuration
//!
//! [`OverlayConfig`] is the single record describing one overlay: it is
//! built from the command line, saved as a preset, and replayed from one.

pub mod preset;

pub use preset::PresetStore;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::PathBuf;

use crate::geometry::AutoDimension;

fn default_alpha() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Image shown by the overlay
    pub image: PathBuf,

    /// Translucency, 0.0 (invisible) to 1.0 (opaque)
    #[serde(default = "default_alpha")]
    pub alpha: f64,

    /// X11 geometry string, e.g. `300x200-0+0`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<String>,

    /// Hide while the pointer hovers over the overlay
    #[serde(default)]
    pub fade: bool,

    /// Derive width from height to keep the aspect ratio
    #[serde(default)]
    pub auto_width: bool,

    /// Derive height from width to keep the aspect ratio
    #[serde(default)]
    pub auto_height: bool,
}

impl OverlayConfig {
    pub fn new(image: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            alpha: default_alpha(),
            geometry: None,
            fade: false,
            auto_width: false,
            auto_height: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.alpha) {
            bail!("Invalid alpha value {} (must be between 0.0 and 1.0)", self.alpha);
        }
        if self.auto_width && self.auto_height {
            bail!("Automatic width and automatic height cannot both be enabled");
        }
        Ok(())
    }

    pub fn auto_dimension(&self) -> AutoDimension {
        if self.auto_width {
            AutoDimension::Width
        } else if self.auto_height {
            AutoDimension::Height
        } else {
            AutoDimension::None
        }
    }

    /// Command-line arguments that reproduce this configuration.
    ///
    /// The image follows `--` and is passed through as-is, so paths that
    /// start with `-` or are not UTF-8 survive the round trip.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if self.alpha != default_alpha() {
            args.push("-a".into());
            args.push(self.alpha.to_string().into());
        }
        if self.fade {
            args.push("-f".into());
        }
        if let Some(geometry) = &self.geometry {
            args.push("-g".into());
            args.push(geometry.into());
        }
        if self.auto_width {
            args.push("-r".into());
        }
        if self.auto_height {
            args.push("-R".into());
        }
        args.push("--".into());
        args.push(self.image.as_os_str().to_owned());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_args_minimal() {
        let config = OverlayConfig::new("waifu.png");
        assert_eq!(config.to_args(), ["--", "waifu.png"]);
    }

    #[test]
    fn test_to_args_all_flags() {
        let config = OverlayConfig {
            image: PathBuf::from("/tmp/img.png"),
            alpha: 0.25,
            geometry: Some("300x200-0-0".to_string()),
            fade: true,
            auto_width: false,
            auto_height: true,
        };
        assert_eq!(
            config.to_args(),
            ["-a", "0.25", "-f", "-g", "300x200-0-0", "-R", "--", "/tmp/img.png"]
        );
    }

    #[test]
    fn test_to_args_keeps_raw_image_path() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let raw = OsStr::from_bytes(b"\xffwaifu.png");
        let config = OverlayConfig::new(raw);
        assert_eq!(config.to_args().last().map(OsString::as_os_str), Some(raw));
    }

    #[test]
    fn test_validate_alpha_range() {
        let mut config = OverlayConfig::new("a.png");
        assert!(config.validate().is_ok());
        config.alpha = 0.0;
        assert!(config.validate().is_ok());
        config.alpha = 1.5;
        assert!(config.validate().is_err());
        config.alpha = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_both_auto_flags() {
        let mut config = OverlayConfig::new("a.png");
        config.auto_width = true;
        assert!(config.validate().is_ok());
        assert_eq!(config.auto_dimension(), AutoDimension::Width);
        config.auto_height = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: OverlayConfig = serde_json::from_str(r#"{"image": "x.png"}"#).unwrap();
        assert_eq!(config, OverlayConfig::new("x.png"));
    }
}
