//! Frame sources and the QR code reader.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use music_butler_core::{ButlerError, CameraConfig, CodeReader, Frame, FrameSource, Result};

/// Captures stills by running a capture command that writes one encoded
/// image (JPEG or PNG) to stdout.
#[derive(Debug, Clone)]
pub struct CommandCamera {
    program: String,
    args: Vec<String>,
}

impl CommandCamera {
    /// Takes a test shot; a camera that cannot deliver one is unavailable.
    pub fn open(config: &CameraConfig) -> Result<Self> {
        let camera = Self {
            program: config.program.clone(),
            args: config.args.clone(),
        };
        let frame = camera
            .capture()
            .map_err(|err| ButlerError::hardware("camera", err.to_string()))?;
        tracing::info!(
            program = %camera.program,
            width = frame.width(),
            height = frame.height(),
            "camera initialized"
        );
        Ok(camera)
    }

    fn capture(&self) -> Result<Frame> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ButlerError::msg(format!(
                "`{}` exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        decode_frame(&output.stdout)
    }
}

impl FrameSource for CommandCamera {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.capture().map(Some)
    }
}

fn decode_frame(bytes: &[u8]) -> Result<Frame> {
    image::load_from_memory(bytes)
        .map(|image| image.to_luma8())
        .map_err(|err| ButlerError::msg(format!("cannot decode frame: {err}")))
}

/// Replays still images from a directory once, in file name order. Used for
/// bench runs without a camera attached.
#[derive(Debug, Clone)]
pub struct DirectoryCamera {
    frames: Vec<PathBuf>,
    next: usize,
}

impl DirectoryCamera {
    pub fn open(dir: &Path) -> Result<Self> {
        let mut frames = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg")
                });
            if is_image {
                frames.push(path);
            }
        }
        if frames.is_empty() {
            return Err(ButlerError::hardware(
                "camera",
                format!("no png or jpeg frames in {}", dir.display()),
            ));
        }
        frames.sort();
        tracing::info!(frames = frames.len(), dir = %dir.display(), "replaying frames");
        Ok(Self { frames, next: 0 })
    }
}

impl FrameSource for DirectoryCamera {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.frames.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        let bytes = std::fs::read(path)?;
        decode_frame(&bytes).map(Some)
    }
}

/// Pure-Rust QR decoder. Returns the first grid that decodes cleanly.
#[derive(Debug, Default, Clone, Copy)]
pub struct QrReader;

impl CodeReader for QrReader {
    fn decode(&mut self, frame: &Frame) -> Option<String> {
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            frame.width() as usize,
            frame.height() as usize,
            |x, y| frame.get_pixel(x as u32, y as u32).0[0],
        );
        prepared.detect_grids().into_iter().find_map(|grid| match grid.decode() {
            Ok((_, content)) => Some(content),
            Err(err) => {
                tracing::trace!(error = ?err, "unreadable code in frame");
                None
            }
        })
    }
}
