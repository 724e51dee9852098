//! The control loop.
//!
//! Every producer (frame pump, keyboard, knob) feeds one bounded channel of
//! [`ButlerEvent`]s. A single [`Controller`] owns all mutable state and
//! awaits each event to completion before receiving the next one, so at
//! most one dispatch is in flight at any time.

use std::ops::ControlFlow;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    ButlerEvent, ButlerState, CodeReader, DispatchOutcome, Dispatcher, FrameSource, InputEvent,
    Mode, PlaybackState, ScanEvent, VolumeConfig,
};

/// Pause after a failed frame acquisition.
const FRAME_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Outcome counters reported when the loop exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub played: usize,
    pub printed: usize,
    pub ignored: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Played(_) => self.played += 1,
            DispatchOutcome::Printed(_) => self.printed += 1,
            DispatchOutcome::Ignored(_) => self.ignored += 1,
        }
    }
}

/// Single consumer of the event channel.
#[derive(Debug)]
pub struct Controller {
    dispatcher: Dispatcher,
    state: ButlerState,
    key_step: i64,
    knob_step: i64,
    shutdown: CancellationToken,
    summary: RunSummary,
}

impl Controller {
    pub fn new(
        dispatcher: Dispatcher,
        state: ButlerState,
        volume: &VolumeConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            dispatcher,
            state,
            key_step: i64::from(volume.key_step),
            knob_step: i64::from(volume.knob_step),
            shutdown,
            summary: RunSummary::default(),
        }
    }

    pub fn state(&self) -> &ButlerState {
        &self.state
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    /// Pushes the starting volume to the playback device.
    pub async fn apply_initial_volume(&self) {
        let level = self.state.volume.level();
        if let Err(err) = self.dispatcher.playback().set_volume(level).await {
            tracing::warn!(error = %err, %level, "could not apply initial volume");
        }
    }

    /// Consumes events until `Quit`, cancellation, or every producer hangs
    /// up. Cancels the shutdown token on the way out so producers stop too.
    pub async fn run(mut self, mut events: mpsc::Receiver<ButlerEvent>) -> RunSummary {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            if self.handle(event).await.is_break() {
                break;
            }
        }

        self.shutdown.cancel();
        events.close();
        tracing::info!(
            played = self.summary.played,
            printed = self.summary.printed,
            ignored = self.summary.ignored,
            "control loop stopped"
        );
        self.summary
    }

    pub async fn handle(&mut self, event: ButlerEvent) -> ControlFlow<()> {
        match event {
            ButlerEvent::Scan(scan) => {
                let outcome = self.dispatcher.on_scan(&mut self.state, scan).await;
                self.record(outcome);
            }
            ButlerEvent::Input(input) => return self.handle_input(input).await,
        }
        ControlFlow::Continue(())
    }

    async fn handle_input(&mut self, input: InputEvent) -> ControlFlow<()> {
        match input {
            InputEvent::VolumeUp => self.change_volume(self.key_step).await,
            InputEvent::VolumeDown => self.change_volume(-self.key_step).await,
            InputEvent::Turn(detents) => {
                self.change_volume(i64::from(detents).saturating_mul(self.knob_step))
                    .await
            }
            InputEvent::ModeToggle => self.toggle_mode(),
            InputEvent::PlayPause => self.toggle_pause().await,
            InputEvent::PrintCurrent => {
                if self.dispatcher.can_print() {
                    let outcome = self.dispatcher.print_now_playing(&self.state).await;
                    self.record(outcome);
                } else {
                    tracing::warn!("printer not available, cannot print");
                }
            }
            InputEvent::Quit => {
                tracing::info!("quit requested");
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn change_volume(&mut self, delta: i64) {
        let before = self.state.volume.level();
        let level = self.state.volume.apply_delta(delta);
        if level == before {
            return;
        }
        tracing::info!(%level, "volume changed");
        if let Err(err) = self.dispatcher.playback().set_volume(level).await {
            tracing::warn!(error = %err, %level, "could not apply volume");
        }
    }

    fn toggle_mode(&mut self) {
        if self.state.mode.current() == Mode::Play && !self.dispatcher.can_print() {
            tracing::warn!("printer not available, staying in play mode");
            return;
        }
        let mode = self.state.mode.toggle();
        tracing::info!(%mode, "switched mode");
    }

    async fn toggle_pause(&mut self) {
        let fallback = self.state.last_played.as_ref();
        match self.dispatcher.playback().toggle_pause(fallback).await {
            Ok(PlaybackState::Playing) => tracing::info!("resumed"),
            Ok(PlaybackState::Paused) => tracing::info!("paused"),
            Err(err) => tracing::warn!(error = %err, "could not toggle playback"),
        }
    }

    fn record(&mut self, outcome: DispatchOutcome) {
        match &outcome {
            DispatchOutcome::Played(uri) => {
                tracing::info!(kind = %uri.kind, id = %uri.id, "now playing")
            }
            DispatchOutcome::Printed(uri) => {
                tracing::info!(kind = %uri.kind, id = %uri.id, "sticker printed")
            }
            DispatchOutcome::Ignored(reason) => tracing::debug!(%reason, "scan ignored"),
        }
        self.summary.record(&outcome);
    }
}

/// Runs the frame pump on a blocking thread: acquire, decode, forward.
///
/// `blocking_send` waits while the channel is full, so a slow dispatch
/// holds back acquisition instead of piling up scans. The frame source is
/// dropped, releasing the device, when the pump exits for any reason.
pub fn spawn_scanner(
    source: Box<dyn FrameSource>,
    reader: Box<dyn CodeReader>,
    events: mpsc::Sender<ButlerEvent>,
    frame_interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        scan_loop(source, reader, &events, frame_interval, &shutdown);
        tracing::debug!("frame pump stopped");
    })
}

fn scan_loop(
    mut source: Box<dyn FrameSource>,
    mut reader: Box<dyn CodeReader>,
    events: &mpsc::Sender<ButlerEvent>,
    frame_interval: Duration,
    shutdown: &CancellationToken,
) {
    while !shutdown.is_cancelled() {
        let pause = match source.next_frame() {
            Ok(Some(frame)) => {
                if let Some(payload) = reader.decode(&frame).filter(|p| !p.is_empty()) {
                    tracing::trace!(%payload, "decoded code");
                    if events.blocking_send(ScanEvent::new(payload).into()).is_err() {
                        return;
                    }
                }
                frame_interval
            }
            Ok(None) => frame_interval,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read from camera");
                frame_interval.max(FRAME_ERROR_BACKOFF)
            }
        };
        std::thread::sleep(pause);
    }
}
