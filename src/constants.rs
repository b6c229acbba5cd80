//! Application-wide constants
//!
//! Magic numbers and string literals used throughout the application,
//! kept in one place so the X11, filesystem and CLI layers agree on them.

/// X11 protocol and rendering constants
pub mod x11 {
    /// ARGB color depth (32-bit: 8 bits each for Alpha, Red, Green, Blue)
    pub const ARGB_DEPTH: u8 = 32;

    /// Depth of the shape mask bitmap
    pub const MASK_DEPTH: u8 = 1;

    /// Bytes per pixel of a depth-32 ZPixmap
    pub const ARGB_BYTES_PER_PIXEL: usize = 4;

    /// `_NET_WM_STATE` client message action that adds a state
    pub const NET_WM_STATE_ADD: u32 = 1;

    /// Source indication for EWMH client messages (1 = normal application)
    pub const SOURCE_APPLICATION: u32 = 1;

    /// Fixed size of the PutImage request header in bytes
    pub const PUT_IMAGE_HEADER_SIZE: usize = 24;
}

/// Window identification
pub mod window {
    /// `_NET_WM_NAME` / `WM_NAME` of the overlay window
    pub const NAME: &str = "xwaifu";

    /// `WM_CLASS` value: instance and class, each NUL terminated
    pub const WM_CLASS: &[u8] = b"xwaifu\0xwaifu\0";
}

/// Image compositing constants
pub mod render {
    /// Alpha at or above this value marks a pixel as part of the window shape
    pub const MASK_ALPHA_THRESHOLD: u8 = 128;
}

/// Hover fade behavior
pub mod hover {
    use std::time::Duration;

    /// Interval between pointer samples while the overlay is hidden
    pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
}

/// Filesystem paths
pub mod paths {
    /// Application directory under the XDG data dir
    pub const APP_DIR: &str = "xwaifu";

    /// Preset directory under the application directory
    pub const PRESETS_DIR: &str = "presets";

    /// Preset file name inside each preset directory
    pub const PRESET_FILENAME: &str = "config.json";

    /// Running-instance record, relative to the working directory
    pub const INSTANCE_RECORD: &str = "running_procs";

    /// Format string for a process executable link
    pub const PROC_EXE_FORMAT: &str = "/proc/{}/exe";
}

/// Preset file permissions
pub mod permissions {
    /// Owner read/write only
    pub const PRESET_FILE_MODE: u32 = 0o600;

    /// Owner-only preset directories
    pub const PRESET_DIR_MODE: u32 = 0o700;
}
