//! ESC/POS thermal sticker printer.
//!
//! A sticker is a centered header line, the payload re-encoded as a QR code
//! raster, and an optional caption. Text lines are rendered by the printer's
//! built-in font; only the QR code travels as an image.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::{imageops, GrayImage, Luma};
use music_butler_core::{
    ButlerError, ClassifiedUri, PrintSink, PrinterConfig, SinkError, StickerLabel,
};
use qrcode::{EcLevel, QrCode};

const ESC: u8 = 0x1b;
const GS: u8 = 0x1d;
/// Luma values below this print as black dots.
const INK_THRESHOLD: u8 = 128;

#[derive(Debug, thiserror::Error)]
pub enum PrinterError {
    #[error("cannot encode QR code: {0}")]
    Qr(#[from] qrcode::types::QrError),
    #[error("QR code needs {needed}px but the paper is {available}px wide")]
    TooWide { needed: u32, available: u32 },
    #[error("printer i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PrinterError> for SinkError {
    fn from(value: PrinterError) -> Self {
        SinkError::print(value.to_string())
    }
}

/// Fixed sticker geometry.
#[derive(Debug, Clone)]
pub struct StickerLayout {
    pub width_px: u32,
    pub qr_size_px: u32,
    pub header: String,
}

impl StickerLayout {
    pub fn from_config(config: &PrinterConfig) -> Self {
        Self {
            width_px: config.width_px,
            qr_size_px: config.qr_size_px.min(config.width_px),
            header: config.header.clone(),
        }
    }

    /// Renders the payload as a QR code centered on a paper-wide canvas.
    pub fn render(&self, payload: &str) -> Result<GrayImage, PrinterError> {
        let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::M)?;
        let qr = code
            .render::<Luma<u8>>()
            .quiet_zone(true)
            .max_dimensions(self.qr_size_px, self.qr_size_px)
            .build();
        if qr.width() > self.width_px {
            return Err(PrinterError::TooWide {
                needed: qr.width(),
                available: self.width_px,
            });
        }

        let mut canvas = GrayImage::from_pixel(self.width_px, qr.height(), Luma([255]));
        let x = (self.width_px - qr.width()) / 2;
        imageops::overlay(&mut canvas, &qr, i64::from(x), 0);
        Ok(canvas)
    }

    /// Complete ESC/POS job for one sticker.
    pub fn job(&self, payload: &str, label: Option<&StickerLabel>) -> Result<Vec<u8>, PrinterError> {
        let image = self.render(payload)?;

        let mut job = Vec::with_capacity(image.as_raw().len() / 8 + 128);
        job.extend_from_slice(&[ESC, b'@']);
        job.extend_from_slice(&[ESC, b'a', 1]);
        if !self.header.is_empty() {
            push_text_line(&mut job, &self.header);
        }
        job.extend(raster_command(&image));
        job.push(b'\n');
        if let Some(label) = label {
            push_text_line(&mut job, &label.title);
            if let Some(subtitle) = &label.subtitle {
                push_text_line(&mut job, subtitle);
            }
        }
        job.extend_from_slice(&[ESC, b'd', 3]);
        job.extend_from_slice(&[GS, b'V', 66, 0]);
        Ok(job)
    }
}

/// `GS v 0` raster bit image, one bit per dot, most significant bit first.
pub fn raster_command(image: &GrayImage) -> Vec<u8> {
    let width_bytes = image.width().div_ceil(8);
    let height = image.height();

    let mut out = Vec::with_capacity(8 + (width_bytes * height) as usize);
    out.extend_from_slice(&[GS, b'v', b'0', 0]);
    out.extend_from_slice(&(width_bytes as u16).to_le_bytes());
    out.extend_from_slice(&(height as u16).to_le_bytes());

    for y in 0..height {
        for byte in 0..width_bytes {
            let mut bits = 0u8;
            for bit in 0..8 {
                let x = byte * 8 + bit;
                if x < image.width() && image.get_pixel(x, y).0[0] < INK_THRESHOLD {
                    bits |= 0x80 >> bit;
                }
            }
            out.push(bits);
        }
    }
    out
}

/// Printer fonts only cover ASCII reliably.
fn push_text_line(job: &mut Vec<u8>, text: &str) {
    job.extend(text.chars().map(|c| {
        if c.is_ascii() && !c.is_ascii_control() {
            c as u8
        } else {
            b'?'
        }
    }));
    job.push(b'\n');
}

/// Thermal printer behind a raw device node such as `/dev/usb/lp0`.
///
/// The node is opened for each job and closed when the job is written, so
/// no handle outlives a print.
#[derive(Debug, Clone)]
pub struct EscPosPrinter {
    device: PathBuf,
    layout: StickerLayout,
}

impl EscPosPrinter {
    /// Checks that the device node is writable.
    pub fn open(config: &PrinterConfig) -> music_butler_core::Result<Self> {
        if !config.enabled {
            return Err(ButlerError::hardware("printer", "disabled in configuration"));
        }
        OpenOptions::new()
            .write(true)
            .open(&config.device)
            .map_err(|err| {
                ButlerError::hardware(
                    "printer",
                    format!("cannot open {}: {err}", config.device.display()),
                )
            })?;

        tracing::info!(device = %config.device.display(), "printer connected");
        Ok(Self {
            device: config.device.clone(),
            layout: StickerLayout::from_config(config),
        })
    }
}

fn write_job(device: &Path, job: &[u8]) -> Result<(), PrinterError> {
    let mut file = OpenOptions::new().write(true).open(device)?;
    file.write_all(job)?;
    file.flush()?;
    Ok(())
}

#[async_trait]
impl PrintSink for EscPosPrinter {
    async fn print_sticker(
        &self,
        classified: &ClassifiedUri,
        label: Option<&StickerLabel>,
    ) -> Result<(), SinkError> {
        let job = self.layout.job(&classified.raw, label)?;
        let device = self.device.clone();
        tracing::debug!(bytes = job.len(), device = %device.display(), "sending sticker");

        tokio::task::spawn_blocking(move || write_job(&device, &job))
            .await
            .map_err(|err| SinkError::print(format!("print task failed: {err}")))??;
        Ok(())
    }
}
