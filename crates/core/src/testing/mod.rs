//! Deterministic collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    ButlerError, ClassifiedUri, CodeReader, Frame, FrameSource, LabelSource, NowPlaying,
    PlaybackSink, PlaybackState, PrintSink, Result, SinkError, StickerLabel, VolumeLevel,
};

#[derive(Debug, Default)]
pub(crate) struct FakePlayback {
    played: Mutex<Vec<String>>,
    volumes: Mutex<Vec<VolumeLevel>>,
    failure: Mutex<Option<String>>,
    now_playing: Mutex<Option<NowPlaying>>,
    playing: Mutex<bool>,
}

impl FakePlayback {
    pub(crate) fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }

    pub(crate) fn volumes(&self) -> Vec<VolumeLevel> {
        self.volumes.lock().unwrap().clone()
    }

    pub(crate) fn fail_next_play(&self, reason: &str) {
        *self.failure.lock().unwrap() = Some(reason.to_string());
    }

    pub(crate) fn set_now_playing(&self, now: NowPlaying) {
        *self.now_playing.lock().unwrap() = Some(now);
    }
}

#[async_trait]
impl PlaybackSink for FakePlayback {
    async fn play(&self, classified: &ClassifiedUri) -> std::result::Result<(), SinkError> {
        if let Some(reason) = self.failure.lock().unwrap().take() {
            return Err(SinkError::playback(reason));
        }
        self.played.lock().unwrap().push(classified.raw.clone());
        *self.playing.lock().unwrap() = true;
        Ok(())
    }

    async fn set_volume(&self, level: VolumeLevel) -> std::result::Result<(), SinkError> {
        self.volumes.lock().unwrap().push(level);
        Ok(())
    }

    async fn toggle_pause(
        &self,
        fallback: Option<&ClassifiedUri>,
    ) -> std::result::Result<PlaybackState, SinkError> {
        let mut playing = self.playing.lock().unwrap();
        if *playing {
            *playing = false;
            return Ok(PlaybackState::Paused);
        }
        match fallback {
            Some(_) => {
                *playing = true;
                Ok(PlaybackState::Playing)
            }
            None => Err(SinkError::playback("nothing to resume")),
        }
    }

    async fn now_playing(&self) -> std::result::Result<Option<NowPlaying>, SinkError> {
        Ok(self.now_playing.lock().unwrap().clone())
    }
}

type PrintRecord = (String, Option<StickerLabel>);

#[derive(Debug, Default)]
pub(crate) struct FakePrinter {
    printed: Mutex<Vec<PrintRecord>>,
    failure: Mutex<Option<String>>,
}

impl FakePrinter {
    pub(crate) fn printed(&self) -> Vec<PrintRecord> {
        self.printed.lock().unwrap().clone()
    }

    pub(crate) fn fail_next(&self, reason: &str) {
        *self.failure.lock().unwrap() = Some(reason.to_string());
    }
}

#[async_trait]
impl PrintSink for FakePrinter {
    async fn print_sticker(
        &self,
        classified: &ClassifiedUri,
        label: Option<&StickerLabel>,
    ) -> std::result::Result<(), SinkError> {
        if let Some(reason) = self.failure.lock().unwrap().take() {
            return Err(SinkError::print(reason));
        }
        self.printed
            .lock()
            .unwrap()
            .push((classified.raw.clone(), label.cloned()));
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct FakeLabels {
    label: StickerLabel,
}

impl FakeLabels {
    pub(crate) fn new(title: &str, subtitle: Option<&str>) -> Self {
        Self {
            label: StickerLabel::new(title, subtitle),
        }
    }
}

#[async_trait]
impl LabelSource for FakeLabels {
    async fn label(&self, _classified: &ClassifiedUri) -> std::result::Result<StickerLabel, SinkError> {
        Ok(self.label.clone())
    }
}

/// Frame source that yields one blank frame per scripted payload, then
/// reports an error once the script runs dry.
#[derive(Debug)]
pub(crate) struct ScriptedCamera {
    remaining: usize,
}

impl ScriptedCamera {
    pub(crate) fn new(frames: usize) -> Self {
        Self { remaining: frames }
    }
}

impl FrameSource for ScriptedCamera {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.remaining == 0 {
            return Err(ButlerError::hardware("camera", "script exhausted"));
        }
        self.remaining -= 1;
        Ok(Some(Frame::new(1, 1)))
    }
}

/// Code reader returning scripted payloads in order; `None` entries model
/// frames without a code.
#[derive(Debug)]
pub(crate) struct ScriptedReader {
    payloads: VecDeque<Option<String>>,
}

impl ScriptedReader {
    pub(crate) fn new<'a>(payloads: impl IntoIterator<Item = Option<&'a str>>) -> Self {
        Self {
            payloads: payloads
                .into_iter()
                .map(|payload| payload.map(str::to_string))
                .collect(),
        }
    }
}

impl CodeReader for ScriptedReader {
    fn decode(&mut self, _frame: &Frame) -> Option<String> {
        self.payloads.pop_front().flatten()
    }
}
