use anyhow::{Context, Result};
use tracing::{debug, error};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::xproto::*;
use x11rb::rust_connection::RustConnection;

use crate::constants::x11;
use crate::geometry::Size;
use crate::render::{Order, PixelLayout};

/// Application context holding immutable shared state
pub struct AppContext<'a> {
    pub conn: &'a RustConnection,
    pub screen: &'a Screen,
    pub atoms: &'a CachedAtoms,
}

/// Pre-cached X11 atoms to avoid repeated roundtrips
pub struct CachedAtoms {
    pub wm_name: Atom,
    pub wm_class: Atom,
    pub utf8_string: Atom,
    pub net_wm_name: Atom,
    pub net_wm_state: Atom,
    pub net_wm_state_above: Atom,
    pub net_wm_state_sticky: Atom,
    pub net_wm_window_type: Atom,
    pub net_wm_window_type_dock: Atom,
}

fn intern(conn: &RustConnection, name: &str) -> Result<Atom> {
    Ok(conn
        .intern_atom(false, name.as_bytes())
        .context(format!("Failed to intern {} atom", name))?
        .reply()
        .context(format!("Failed to get reply for {} atom", name))?
        .atom)
}

impl CachedAtoms {
    pub fn new(conn: &RustConnection) -> Result<Self> {
        // Do all intern_atom roundtrips once at startup
        Ok(Self {
            wm_name: AtomEnum::WM_NAME.into(),
            wm_class: AtomEnum::WM_CLASS.into(),
            utf8_string: intern(conn, "UTF8_STRING")?,
            net_wm_name: intern(conn, "_NET_WM_NAME")?,
            net_wm_state: intern(conn, "_NET_WM_STATE")?,
            net_wm_state_above: intern(conn, "_NET_WM_STATE_ABOVE")?,
            net_wm_state_sticky: intern(conn, "_NET_WM_STATE_STICKY")?,
            net_wm_window_type: intern(conn, "_NET_WM_WINDOW_TYPE")?,
            net_wm_window_type_dock: intern(conn, "_NET_WM_WINDOW_TYPE_DOCK")?,
        })
    }
}

/// Find a 32-bit TrueColor visual so the window can carry an alpha channel
#[tracing::instrument(skip(screen))]
pub fn find_argb_visual(screen: &Screen) -> Result<Visualid> {
    screen
        .allowed_depths
        .iter()
        .filter(|depth| depth.depth == x11::ARGB_DEPTH)
        .flat_map(|depth| depth.visuals.iter())
        .find(|visual| visual.class == VisualClass::TRUE_COLOR)
        .map(|visual| {
            debug!(visual = visual.visual_id, "using ARGB visual");
            visual.visual_id
        })
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Could not find a {}-bit TrueColor visual. Is a compositing-capable X server running?",
                x11::ARGB_DEPTH
            )
        })
}

/// Image layout the server expects for PutImage
pub fn pixel_layout(setup: &Setup) -> PixelLayout {
    let order = |o: ImageOrder| {
        if o == ImageOrder::MSB_FIRST {
            Order::MsbFirst
        } else {
            Order::LsbFirst
        }
    };
    let bitmap_scanline_pad = setup
        .pixmap_formats
        .iter()
        .find(|format| format.depth == 1)
        .map_or(setup.bitmap_format_scanline_pad, |format| format.scanline_pad);

    PixelLayout {
        byte_order: order(setup.image_byte_order),
        bit_order: order(setup.bitmap_format_bit_order),
        bitmap_scanline_pad,
    }
}

/// Ask the window manager to add a `_NET_WM_STATE` entry
pub fn add_wm_state(ctx: &AppContext, window: Window, state: Atom) -> Result<()> {
    let event = ClientMessageEvent {
        response_type: CLIENT_MESSAGE_EVENT,
        format: 32,
        sequence: 0,
        window,
        type_: ctx.atoms.net_wm_state,
        data: ClientMessageData::from([
            x11::NET_WM_STATE_ADD,
            state,
            0, // No second property
            x11::SOURCE_APPLICATION,
            0,
        ]),
    };

    ctx.conn
        .send_event(
            false,
            ctx.screen.root,
            EventMask::SUBSTRUCTURE_NOTIFY | EventMask::SUBSTRUCTURE_REDIRECT,
            event,
        )
        .context(format!("Failed to send _NET_WM_STATE event for window {}", window))?;
    Ok(())
}

/// Split `total_rows` into `(first_row, rows)` bands of at most `rows_per_band`
fn image_bands(total_rows: usize, rows_per_band: usize) -> Result<Vec<(i16, u16)>> {
    let rows_per_band = rows_per_band.max(1);
    (0..total_rows)
        .step_by(rows_per_band)
        .map(|first| {
            let rows = rows_per_band.min(total_rows - first);
            match (i16::try_from(first), u16::try_from(rows)) {
                (Ok(first), Ok(rows)) => Ok((first, rows)),
                _ => Err(anyhow::anyhow!(
                    "Image band at row {} ({} rows) is outside the X11 coordinate range",
                    first,
                    rows
                )),
            }
        })
        .collect()
}

/// Upload a ZPixmap in horizontal bands that fit the maximum request size
pub fn put_image_rows(
    conn: &RustConnection,
    drawable: Drawable,
    gc: Gcontext,
    depth: u8,
    width: u16,
    stride: usize,
    data: &[u8],
) -> Result<()> {
    if stride == 0 {
        return Ok(());
    }
    let budget = conn
        .maximum_request_bytes()
        .saturating_sub(x11::PUT_IMAGE_HEADER_SIZE);
    let rows_per_band = (budget / stride).max(1);

    for (first, rows) in image_bands(data.len() / stride, rows_per_band)? {
        let start = first as usize * stride;
        let chunk = &data[start..start + rows as usize * stride];
        conn.put_image(
            ImageFormat::Z_PIXMAP,
            drawable,
            gc,
            width,
            rows,
            0,
            first,
            0,
            depth,
            chunk,
        )
        .context(format!("Failed to upload image rows from {} to drawable {}", first, drawable))?;
    }
    Ok(())
}

/// Server-side pixmap freed on drop
pub struct PixmapGuard<'a> {
    conn: &'a RustConnection,
    pub pixmap: Pixmap,
}

impl<'a> PixmapGuard<'a> {
    pub fn new(conn: &'a RustConnection, depth: u8, drawable: Drawable, size: Size) -> Result<Self> {
        let pixmap = conn.generate_id().context("Failed to generate ID for pixmap")?;
        conn.create_pixmap(depth, pixmap, drawable, size.width as u16, size.height as u16)
            .context(format!("Failed to create depth-{} pixmap", depth))?;
        Ok(Self { conn, pixmap })
    }
}

impl Drop for PixmapGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.conn.free_pixmap(self.pixmap) {
            error!("Failed to free pixmap {}: {}", self.pixmap, e);
        }
    }
}

/// Graphics context freed on drop
pub struct GcGuard<'a> {
    conn: &'a RustConnection,
    pub gc: Gcontext,
}

impl<'a> GcGuard<'a> {
    pub fn new(conn: &'a RustConnection, drawable: Drawable) -> Result<Self> {
        let gc = conn.generate_id().context("Failed to generate ID for graphics context")?;
        conn.create_gc(gc, drawable, &CreateGCAux::new())
            .context(format!("Failed to create graphics context for drawable {}", drawable))?;
        Ok(Self { conn, gc })
    }
}

impl Drop for GcGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.conn.free_gc(self.gc) {
            error!("Failed to free GC {}: {}", self.gc, e);
        }
    }
}
