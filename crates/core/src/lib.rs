//! Core library for the Music Butler QR jukebox.
//!
//! A camera feeds decoded QR payloads through a fixed pipeline: the
//! [`Classifier`] recognizes content references, the [`DebounceGate`] drops
//! a code that is still being held up to the lens, and the [`Dispatcher`]
//! hands the result to the playback or print sink depending on the current
//! [`Mode`]. Hardware and network backends are reached only through the
//! traits in [`sink`] and [`capture`], so everything here runs against
//! deterministic fakes in tests.

pub mod capture;
pub mod classify;
pub mod config;
pub mod debounce;
pub mod dispatch;
pub mod error;
pub mod input;
pub mod mode;
pub mod runtime;
pub mod sink;
pub mod volume;

#[cfg(test)]
mod testing;

pub use capture::{CodeReader, Frame, FrameSource, ScanEvent};
pub use classify::{ClassifiedUri, Classifier, UriKind};
pub use config::{
    AppConfig, CameraConfig, EncoderConfig, GrammarConfig, PrinterConfig, ScannerConfig,
    SpotifyConfig, VolumeConfig, MAX_RASTER_WIDTH_PX,
};
pub use debounce::DebounceGate;
pub use dispatch::{ButlerState, DispatchOutcome, Dispatcher, IgnoreReason};
pub use error::{ButlerError, Result, SinkError};
pub use input::{ButlerEvent, InputEvent};
pub use mode::{Mode, ModeState};
pub use runtime::{spawn_scanner, Controller, RunSummary};
pub use sink::{LabelSource, NowPlaying, PlaybackSink, PlaybackState, PrintSink, StickerLabel};
pub use volume::{VolumeController, VolumeLevel};
