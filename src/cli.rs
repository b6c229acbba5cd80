// Command line interface
// Parses the flags and decides which action the process performs

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;

use crate::config::OverlayConfig;

/// xwaifu - show an image as an always-on-top overlay on an X11 desktop
#[derive(Parser, Debug)]
#[command(name = "xwaifu")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Image file to display
    #[arg(value_name = "IMAGE_FILE")]
    pub image: Option<PathBuf>,

    /// Set image translucency (0.0 - 1.0)
    #[arg(short = 'a', value_name = "ALPHA", value_parser = parse_alpha)]
    pub alpha: Option<f64>,

    /// Save the other options as preset NAME and exit
    #[arg(short = 'c', value_name = "NAME")]
    pub create_preset: Option<String>,

    /// Hide image when hovered over
    #[arg(short = 'f')]
    pub fade: bool,

    /// Set window position and/or size, e.g. 300x200-0+0
    #[arg(short = 'g', value_name = "GEOMETRY", allow_hyphen_values = true)]
    pub geometry: Option<String>,

    /// Stop the overlay recorded in ./running_procs
    #[arg(short = 'k')]
    pub kill: bool,

    /// Run the saved preset NAME
    #[arg(short = 'l', value_name = "NAME", conflicts_with = "create_preset")]
    pub load_preset: Option<String>,

    /// Set image width automatically
    #[arg(short = 'r', conflicts_with = "auto_height")]
    pub auto_width: bool,

    /// Set image height automatically
    #[arg(short = 'R')]
    pub auto_height: bool,

    /// Print the names of saved presets and exit
    #[arg(long)]
    pub list_presets: bool,

    /// Stay attached to the terminal instead of running in the background
    #[arg(long)]
    pub foreground: bool,

    /// Set on the re-spawned background process
    #[arg(long, hide = true)]
    pub detached: bool,
}

/// How the overlay process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launch {
    /// Re-spawn in the background and exit
    Daemon,
    /// Run in this process
    Foreground,
    /// This process is the background child
    Detached,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Kill,
    ListPresets,
    SavePreset { name: String, config: OverlayConfig },
    LoadPreset { name: String, launch: Launch },
    Run { config: OverlayConfig, launch: Launch },
}

/// Parse alpha value and ensure it's within valid range
fn parse_alpha(s: &str) -> Result<f64, String> {
    let alpha: f64 = s.parse().map_err(|_| "Invalid alpha value")?;
    if !(0.0..=1.0).contains(&alpha) {
        return Err("Alpha must be between 0.0 and 1.0".to_string());
    }
    Ok(alpha)
}

impl Args {
    fn launch(&self) -> Launch {
        if self.detached {
            Launch::Detached
        } else if self.foreground {
            Launch::Foreground
        } else {
            Launch::Daemon
        }
    }

    fn overlay_config(&self) -> Result<OverlayConfig> {
        let Some(image) = self.image.clone() else {
            bail!("No image provided.\nUsage: xwaifu [-fhrR] [-a ALPHA] [-g GEOMETRY] IMAGE_FILE");
        };
        let config = OverlayConfig {
            image,
            alpha: self.alpha.unwrap_or(1.0),
            geometry: self.geometry.clone(),
            fade: self.fade,
            auto_width: self.auto_width,
            auto_height: self.auto_height,
        };
        config.validate()?;
        Ok(config)
    }

    /// Kill and preset handling short-circuit the normal overlay startup
    pub fn into_action(self) -> Result<Action> {
        if self.kill {
            return Ok(Action::Kill);
        }
        if self.list_presets {
            return Ok(Action::ListPresets);
        }
        if let Some(name) = &self.create_preset {
            return Ok(Action::SavePreset {
                name: name.clone(),
                config: self.overlay_config()?,
            });
        }
        if let Some(name) = &self.load_preset {
            return Ok(Action::LoadPreset {
                name: name.clone(),
                launch: self.launch(),
            });
        }
        Ok(Action::Run {
            config: self.overlay_config()?,
            launch: self.launch(),
        })
    }
}
