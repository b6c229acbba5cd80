use anyhow::{Context, Result};
use image::RgbaImage;
use tracing::{debug, error, info};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::properties::{WmSizeHints, WmSizeHintsSpecification};
use x11rb::protocol::shape::{self, ConnectionExt as ShapeExt, SK, SO};
use x11rb::protocol::xproto::*;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as WrapperExt;

use crate::constants::{window, x11};
use crate::geometry::{Geometry, Size};
use crate::render::{self, Background};
use crate::x11_utils::{add_wm_state, find_argb_visual, pixel_layout, put_image_rows, AppContext, GcGuard, PixmapGuard};

/// How the overlay reacts to the pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// Empty input shape: clicks reach the windows below
    ClickThrough,
    /// Pointer-enter notifications drive the hover fade
    Hover,
}

#[derive(Debug)]
pub struct OverlayWindow<'a> {
    pub window: Window,
    pub geometry: Geometry,
    pub visible: bool,
    colormap: Colormap,
    conn: &'a RustConnection,
}

impl<'a> OverlayWindow<'a> {
    /// Create the ARGB window; returns it together with its colormap
    fn create_window(ctx: &AppContext, geometry: Geometry) -> Result<(Window, Colormap)> {
        let visual = find_argb_visual(ctx.screen)?;

        let colormap = ctx.conn.generate_id()
            .context("Failed to generate X11 colormap ID")?;
        ctx.conn.create_colormap(ColormapAlloc::NONE, colormap, ctx.screen.root, visual)
            .context("Failed to create colormap for ARGB visual")?;

        let window = ctx.conn.generate_id()
            .context("Failed to generate X11 window ID")?;
        ctx.conn.create_window(
            x11::ARGB_DEPTH,
            window,
            ctx.screen.root,
            geometry.x,
            geometry.y,
            geometry.width,
            geometry.height,
            0,
            WindowClass::INPUT_OUTPUT,
            visual,
            &CreateWindowAux::new()
                .colormap(colormap)
                .border_pixel(0)
                .background_pixel(0),
        )
        .context(format!("Failed to create overlay window at {:?}", geometry))?;

        Ok((window, colormap))
    }

    /// Setup window properties (dock type, name, class, fixed size)
    fn setup_window_properties(ctx: &AppContext, window: Window, geometry: Geometry) -> Result<()> {
        ctx.conn.change_property32(
            PropMode::REPLACE,
            window,
            ctx.atoms.net_wm_window_type,
            AtomEnum::ATOM,
            &[ctx.atoms.net_wm_window_type_dock],
        )
        .context("Failed to set _NET_WM_WINDOW_TYPE")?;

        ctx.conn.change_property8(
            PropMode::REPLACE,
            window,
            ctx.atoms.net_wm_name,
            ctx.atoms.utf8_string,
            window::NAME.as_bytes(),
        )
        .context("Failed to set _NET_WM_NAME")?;

        ctx.conn.change_property8(
            PropMode::REPLACE,
            window,
            ctx.atoms.wm_name,
            AtomEnum::STRING,
            window::NAME.as_bytes(),
        )
        .context("Failed to set WM_NAME")?;

        ctx.conn.change_property8(
            PropMode::REPLACE,
            window,
            ctx.atoms.wm_class,
            AtomEnum::STRING,
            window::WM_CLASS,
        )
        .context("Failed to set WM_CLASS")?;

        let (x, y) = (geometry.x as i32, geometry.y as i32);
        let (width, height) = (geometry.width as i32, geometry.height as i32);
        let mut hints = WmSizeHints::new();
        hints.position = Some((WmSizeHintsSpecification::UserSpecified, x, y));
        hints.size = Some((WmSizeHintsSpecification::UserSpecified, width, height));
        hints.min_size = Some((width, height));
        hints.max_size = Some((width, height));
        hints.set_normal_hints(ctx.conn, window)
            .context("Failed to set WM_NORMAL_HINTS")?;

        Ok(())
    }

    fn setup_input(ctx: &AppContext, window: Window, mode: InputMode) -> Result<()> {
        match mode {
            InputMode::ClickThrough => {
                ctx.conn.shape_rectangles(
                    SO::SET,
                    SK::INPUT,
                    ClipOrdering::UNSORTED,
                    window,
                    0,
                    0,
                    &[],
                )
                .context("Failed to clear the overlay input shape")?;
            }
            InputMode::Hover => {
                ctx.conn.change_window_attributes(
                    window,
                    &ChangeWindowAttributesAux::new()
                        .event_mask(EventMask::STRUCTURE_NOTIFY | EventMask::ENTER_WINDOW),
                )
                .context("Failed to select pointer-enter events")?;
            }
        }
        Ok(())
    }

    pub fn new(ctx: &AppContext<'a>, geometry: Geometry, mode: InputMode) -> Result<Self> {
        if ctx.conn
            .extension_information(shape::X11_EXTENSION_NAME)
            .context("Failed to query SHAPE extension")?
            .is_none()
        {
            anyhow::bail!("The X server does not support the SHAPE extension");
        }

        info!(
            x = geometry.x,
            y = geometry.y,
            width = geometry.width,
            height = geometry.height,
            mode = ?mode,
            "Creating overlay window"
        );
        let (window, colormap) = Self::create_window(ctx, geometry)?;

        // From here on Drop cleans up the window and colormap
        let mut overlay = Self {
            window,
            geometry,
            visible: false,
            colormap,
            conn: ctx.conn,
        };

        Self::setup_window_properties(ctx, window, geometry)?;
        overlay.set_visible(true)?;
        add_wm_state(ctx, window, ctx.atoms.net_wm_state_above)?;
        add_wm_state(ctx, window, ctx.atoms.net_wm_state_sticky)?;
        Self::setup_input(ctx, window, mode)?;

        ctx.conn.flush()
            .context("Failed to flush X11 connection after creating overlay")?;
        info!(window = window, "Mapped overlay window");
        Ok(overlay)
    }

    /// Render `image` at the window size and install it as the window background
    pub fn set_background(&self, image: &RgbaImage, alpha: f64) -> Result<()> {
        let size = Size::new(self.geometry.width as u32, self.geometry.height as u32);
        let layout = pixel_layout(self.conn.setup());
        let background = render::compose(image, size, alpha, &layout);
        debug!(
            width = size.width,
            height = size.height,
            masked = background.mask.is_some(),
            "Composed overlay background"
        );

        let pixmap = self.upload_pixels(&background)?;
        if let Some(mask) = self.upload_mask(&background)? {
            self.conn.shape_mask(SO::SET, SK::BOUNDING, self.window, 0, 0, mask.pixmap)
                .context("Failed to apply bounding shape mask")?;
        }

        self.conn.change_window_attributes(
            self.window,
            &ChangeWindowAttributesAux::new().background_pixmap(pixmap.pixmap),
        )
        .context("Failed to set overlay background pixmap")?;
        self.conn.clear_area(false, self.window, 0, 0, 0, 0)
            .context("Failed to clear overlay window")?;
        self.conn.flush()
            .context("Failed to flush X11 connection after setting background")?;
        Ok(())
    }

    fn upload_pixels(&self, background: &Background) -> Result<PixmapGuard<'a>> {
        let pixmap = PixmapGuard::new(self.conn, x11::ARGB_DEPTH, self.window, background.size)?;
        let gc = GcGuard::new(self.conn, pixmap.pixmap)?;
        put_image_rows(
            self.conn,
            pixmap.pixmap,
            gc.gc,
            x11::ARGB_DEPTH,
            self.geometry.width,
            background.stride(),
            &background.pixels,
        )
        .context("Failed to upload overlay pixels")?;
        Ok(pixmap)
    }

    fn upload_mask(&self, background: &Background) -> Result<Option<PixmapGuard<'a>>> {
        let Some(mask) = &background.mask else {
            return Ok(None);
        };
        let pixmap = PixmapGuard::new(self.conn, x11::MASK_DEPTH, self.window, background.size)?;
        let gc = GcGuard::new(self.conn, pixmap.pixmap)?;
        put_image_rows(
            self.conn,
            pixmap.pixmap,
            gc.gc,
            x11::MASK_DEPTH,
            self.geometry.width,
            mask.stride,
            &mask.data,
        )
        .context("Failed to upload overlay shape mask")?;
        Ok(Some(pixmap))
    }

    pub fn set_visible(&mut self, visible: bool) -> Result<()> {
        if visible == self.visible {
            return Ok(());
        }
        self.visible = visible;
        if visible {
            self.conn.map_window(self.window)
                .context(format!("Failed to map overlay window {}", self.window))?;
        } else {
            self.conn.unmap_window(self.window)
                .context(format!("Failed to unmap overlay window {}", self.window))?;
        }
        self.conn.flush()
            .context("Failed to flush X11 connection after visibility change")?;
        debug!(window = self.window, visible = visible, "Overlay visibility changed");
        Ok(())
    }

    /// Absolute pointer position on the overlay's screen
    pub fn query_pointer(&self) -> Result<(i32, i32)> {
        let reply = self.conn.query_pointer(self.window)
            .context("Failed to send pointer query")?
            .reply()
            .context("Failed to get pointer position")?;
        Ok((reply.root_x as i32, reply.root_y as i32))
    }
}

impl Drop for OverlayWindow<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.conn.destroy_window(self.window) {
            error!("Failed to destroy overlay window {}: {}", self.window, e);
        }

        if let Err(e) = self.conn.free_colormap(self.colormap) {
            error!("Failed to free colormap {}: {}", self.colormap, e);
        }

        if let Err(e) = self.conn.flush() {
            error!("Failed to flush X11 connection during cleanup: {}", e);
        }
    }
}
