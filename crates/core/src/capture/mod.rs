use std::time::Instant;

use image::GrayImage;

use crate::Result;

/// Greyscale still handed from the frame source to the code reader.
pub type Frame = GrayImage;

/// Yields successive still images. Implementations may block on hardware
/// and release their device handle on drop.
pub trait FrameSource: Send {
    /// Returns the next frame, or `None` when no frame was available this
    /// round. Errors are reported and the scan loop carries on.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Decodes a QR payload from a frame. A frame without a code yields `None`.
pub trait CodeReader: Send {
    fn decode(&mut self, frame: &Frame) -> Option<String>;
}

/// A non-empty decode result, consumed once by the dispatch pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEvent {
    pub raw_payload: String,
    pub observed_at: Instant,
}

impl ScanEvent {
    pub fn new(raw_payload: impl Into<String>) -> Self {
        Self::at(raw_payload, Instant::now())
    }

    pub fn at(raw_payload: impl Into<String>, observed_at: Instant) -> Self {
        Self {
            raw_payload: raw_payload.into(),
            observed_at,
        }
    }
}
