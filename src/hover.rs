//! Hover fade: hide the overlay while the pointer is over it
//!
//! The overlay is unmapped on pointer-enter. While hidden it cannot receive
//! leave events, so the pointer is sampled on a fixed cadence until it is
//! outside the overlay's rectangle again.

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::xproto::Window;
use x11rb::rust_connection::RustConnection;

use crate::constants::hover::POLL_INTERVAL;
use crate::geometry::Geometry;
use crate::overlay::OverlayWindow;
use crate::x11_utils::AppContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoverState {
    Visible,
    HiddenPolling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoverAction {
    Hide,
    Show,
}

#[derive(Debug)]
pub struct HoverTracker {
    state: HoverState,
    area: Geometry,
}

impl HoverTracker {
    pub fn new(area: Geometry) -> Self {
        Self {
            state: HoverState::Visible,
            area,
        }
    }

    pub fn state(&self) -> HoverState {
        self.state
    }

    /// Pointer entered the overlay
    pub fn on_enter(&mut self) -> Option<HoverAction> {
        match self.state {
            HoverState::Visible => {
                self.state = HoverState::HiddenPolling;
                Some(HoverAction::Hide)
            }
            HoverState::HiddenPolling => None,
        }
    }

    /// Pointer sampled at absolute coordinates while hidden
    pub fn on_sample(&mut self, x: i32, y: i32) -> Option<HoverAction> {
        if self.state == HoverState::HiddenPolling && !self.area.contains(x, y) {
            self.state = HoverState::Visible;
            Some(HoverAction::Show)
        } else {
            None
        }
    }
}

fn handle_event(tracker: &mut HoverTracker, window: Window, event: &Event) -> Option<HoverAction> {
    match event {
        Event::EnterNotify(event) if event.event == window => {
            debug!(x = event.root_x, y = event.root_y, "Pointer entered overlay");
            tracker.on_enter()
        }
        Event::Error(err) => {
            debug!(error = ?err, "X11 error event");
            None
        }
        other => {
            trace!(event = ?other, "Ignoring event");
            None
        }
    }
}

/// Block until the connection is readable or `timeout` elapses; signals just wake us up
fn wait_readable(conn: &RustConnection, timeout: Duration) -> Result<()> {
    let mut fds = [PollFd::new(conn.stream().as_fd(), PollFlags::POLLIN)];
    let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
    match poll(&mut fds, PollTimeout::from(millis)) {
        Ok(_) | Err(Errno::EINTR) => Ok(()),
        Err(e) => Err(e).context("Failed to wait for X11 events"),
    }
}

fn apply(overlay: &mut OverlayWindow, action: HoverAction) -> Result<()> {
    match action {
        HoverAction::Hide => overlay.set_visible(false),
        HoverAction::Show => overlay.set_visible(true),
    }
}

/// Drive the overlay until `shutdown` is set
pub fn run(ctx: &AppContext, overlay: &mut OverlayWindow, shutdown: &AtomicBool) -> Result<()> {
    let mut tracker = HoverTracker::new(overlay.geometry);
    let mut next_sample: Option<Instant> = None;
    info!("Overlay running");

    while !shutdown.load(Ordering::Relaxed) {
        if let Some(due) = next_sample
            && Instant::now() >= due
        {
            let (x, y) = overlay.query_pointer()?;
            trace!(x = x, y = y, "Sampled pointer");
            next_sample = match tracker.on_sample(x, y) {
                Some(action) => {
                    apply(overlay, action)?;
                    None
                }
                None => Some(due + POLL_INTERVAL),
            };
        }

        while let Some(event) = ctx.conn.poll_for_event()
            .context("Failed to read X11 event")?
        {
            if let Some(action) = handle_event(&mut tracker, overlay.window, &event) {
                apply(overlay, action)?;
                // First check happens right away, then on the poll cadence
                next_sample = Some(Instant::now());
            }
        }

        let timeout = next_sample
            .map_or(POLL_INTERVAL, |due| due.saturating_duration_since(Instant::now()));
        wait_readable(ctx.conn, timeout)?;
    }

    info!("Shutdown requested, closing overlay");
    Ok(())
}
