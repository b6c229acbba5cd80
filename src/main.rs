#![forbid(unsafe_code)]

mod cli;
mod config;
mod constants;
mod geometry;
mod hover;
mod instance;
mod overlay;
mod render;
mod x11_utils;

use anyhow::{Context, Result};
use clap::Parser;
use nix::unistd::Pid;
use signal_hook::consts::{SIGINT, SIGTERM};
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{error, info, Level as TraceLevel};
use tracing_subscriber::FmtSubscriber;
use x11rb::connection::Connection;

use cli::{Action, Args, Launch};
use config::{OverlayConfig, PresetStore};
use geometry::{ParsedGeometry, Size};
use instance::InstanceRecord;
use overlay::{InputMode, OverlayWindow};
use x11_utils::{AppContext, CachedAtoms};

fn init_logging() -> Result<()> {
    // Parse log level from environment variable
    let log_level = match std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")
}

fn run_overlay(config: &OverlayConfig, launch: Launch) -> Result<()> {
    if launch == Launch::Detached {
        instance::detach_session()?;
    }
    config.validate()?;

    let image = render::load_image(&config.image)?;
    info!(
        path = %config.image.display(),
        width = image.width(),
        height = image.height(),
        "Image loaded"
    );

    let (conn, screen_num) = x11rb::connect(None)
        .context("Couldn't open X display. Is DISPLAY set correctly?")?;
    let screen = &conn.setup().roots[screen_num];
    info!(
        screen = screen_num,
        width = screen.width_in_pixels,
        height = screen.height_in_pixels,
        "Connected to X11 server"
    );

    let parsed = match &config.geometry {
        Some(geometry) => geometry::parse_geometry(geometry)?,
        None => ParsedGeometry::default(),
    };
    let geometry = geometry::resolve(
        &parsed,
        Size::new(image.width(), image.height()),
        Size::new(screen.width_in_pixels as u32, screen.height_in_pixels as u32),
        config.auto_dimension(),
    )?;
    info!(geometry = ?geometry, "Resolved overlay geometry");

    let record = InstanceRecord::default();
    if launch == Launch::Daemon {
        // The detached child redoes the setup with the same configuration
        let pid = instance::daemonize(&record, config.to_args())?;
        println!("Overlay running in the background (pid {pid})");
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGTERM, SIGINT] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .context(format!("Failed to register handler for signal {}", signal))?;
    }

    // Pre-cache atoms once at startup (eliminates roundtrip overhead)
    let atoms = CachedAtoms::new(&conn)
        .context("Failed to cache X11 atoms at startup")?;
    let ctx = AppContext {
        conn: &conn,
        screen,
        atoms: &atoms,
    };

    let mode = if config.fade { InputMode::Hover } else { InputMode::ClickThrough };
    let mut overlay = OverlayWindow::new(&ctx, geometry, mode)
        .context("Failed to create overlay window")?;
    overlay.set_background(&image, config.alpha)
        .context("Failed to render overlay background")?;
    drop(image);

    hover::run(&ctx, &mut overlay, &shutdown)?;

    if launch == Launch::Detached {
        record.release(Pid::this())?;
    }
    Ok(())
}

fn dispatch(action: Action) -> Result<()> {
    match action {
        Action::Kill => instance::terminate(&InstanceRecord::default()),
        Action::ListPresets => {
            for name in PresetStore::new()?.list()? {
                println!("{name}");
            }
            Ok(())
        }
        Action::SavePreset { name, config } => {
            let path = PresetStore::new()?.save(&name, &config)?;
            println!("Preset '{}' saved to {}", name, path.display());
            Ok(())
        }
        Action::LoadPreset { name, launch } => {
            let config = PresetStore::new()?.load(&name)?;
            info!(preset = %name, args = ?config.to_args(), "Running preset");
            run_overlay(&config, launch)
        }
        Action::Run { config, launch } => run_overlay(&config, launch),
    }
}

fn main() -> ExitCode {
    if let Err(err) = init_logging() {
        eprintln!("Error: {err:#}");
        return ExitCode::FAILURE;
    }

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            if let Err(e) = err.print() {
                error!(error = %e, "Failed to print usage");
            }
            // --help and --version are not failures
            return if err.use_stderr() { ExitCode::FAILURE } else { ExitCode::SUCCESS };
        }
    };

    match args.into_action().and_then(dispatch) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
