//! Code Publisher
//!
//! Renders the endpoint's externally reachable base URL as a QR code. The PNG
//! is written to `<state-dir>/server-qr.png` and handed back to the caller so
//! the Exchange Endpoint can serve it from memory at `/qr`. A fresh code is
//! rendered for every handshake since the tunnel subdomain changes per run.

use std::io::Cursor;
use std::path::PathBuf;

use bytes::Bytes;
use image::{imageops, ImageBuffer, ImageFormat, Luma};
use qrcode::render::unicode::Dense1x2;
use qrcode::{EcLevel, QrCode};
use tracing::{debug, info};

use crate::types::{HandoffError, Result};

/// File name of the rendered code inside the state directory
pub const QR_FILE_NAME: &str = "server-qr.png";

/// Encoding parameters
#[derive(Debug, Clone, Copy)]
pub struct QrOptions {
    /// Error-correction level
    pub ec_level: EcLevel,
    /// Pixels per module
    pub scale: u32,
    /// Quiet zone around the symbol, in modules
    pub margin: u32,
}

impl Default for QrOptions {
    fn default() -> Self {
        Self {
            ec_level: EcLevel::M,
            scale: 8,
            margin: 4,
        }
    }
}

/// A rendered code, on disk and in memory
#[derive(Debug, Clone)]
pub struct ImageHandle {
    pub base_url: String,
    pub path: PathBuf,
    pub png: Bytes,
    /// Side length in pixels
    pub width: u32,
}

pub struct QrPublisher {
    out_dir: PathBuf,
    options: QrOptions,
}

impl QrPublisher {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self::with_options(out_dir, QrOptions::default())
    }

    pub fn with_options(out_dir: impl Into<PathBuf>, options: QrOptions) -> Self {
        Self {
            out_dir: out_dir.into(),
            options,
        }
    }

    /// Render `base_url` and persist it for `/qr`
    pub async fn publish(&self, base_url: &str) -> Result<ImageHandle> {
        let (png, width) = render_png(base_url, &self.options)?;

        tokio::fs::create_dir_all(&self.out_dir).await?;
        let path = self.out_dir.join(QR_FILE_NAME);
        tokio::fs::write(&path, &png).await?;

        info!(url = %base_url, path = %path.display(), width, "QR code published");
        Ok(ImageHandle {
            base_url: base_url.to_string(),
            path,
            png: Bytes::from(png),
            width,
        })
    }
}

/// Encode a URL as PNG bytes; returns the bytes and the image width
pub fn render_png(data: &str, options: &QrOptions) -> Result<(Vec<u8>, u32)> {
    let code = QrCode::with_error_correction_level(data.as_bytes(), options.ec_level)
        .map_err(|e| HandoffError::Internal(format!("QR encoding failed: {}", e)))?;

    let scale = options.scale.max(1);
    let symbol = code
        .render::<Luma<u8>>()
        .quiet_zone(false)
        .module_dimensions(scale, scale)
        .build();

    let pad = options.margin * scale;
    let width = symbol.width() + 2 * pad;
    let height = symbol.height() + 2 * pad;
    let mut canvas: ImageBuffer<Luma<u8>, Vec<u8>> =
        ImageBuffer::from_pixel(width, height, Luma([255u8]));
    imageops::overlay(&mut canvas, &symbol, pad as i64, pad as i64);

    let mut png = Vec::new();
    canvas
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| HandoffError::Internal(format!("PNG encoding failed: {}", e)))?;

    debug!(version = ?code.version(), bytes = png.len(), "Rendered QR code");
    Ok((png, width))
}

/// Unicode rendering for printing in a terminal
pub fn render_terminal(data: &str) -> Result<String> {
    let code = QrCode::new(data.as_bytes())
        .map_err(|e| HandoffError::Internal(format!("QR encoding failed: {}", e)))?;
    Ok(code
        .render::<Dense1x2>()
        .dark_color(Dense1x2::Light)
        .light_color(Dense1x2::Dark)
        .build())
}
