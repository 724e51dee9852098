use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    AppConfig, ClassifiedUri, Classifier, DebounceGate, LabelSource, Mode, ModeState,
    PlaybackSink, PrintSink, ScanEvent, SinkError, VolumeController,
};

/// Mutable state owned by the control loop and lent to the dispatcher for
/// each event.
#[derive(Debug, Clone)]
pub struct ButlerState {
    pub debounce: DebounceGate,
    pub mode: ModeState,
    pub volume: VolumeController,
    /// Last reference that started playing successfully.
    pub last_played: Option<ClassifiedUri>,
}

impl ButlerState {
    pub fn new(cooldown: Duration, initial_volume: u8) -> Self {
        Self {
            debounce: DebounceGate::new(cooldown),
            mode: ModeState::new(),
            volume: VolumeController::new(i64::from(initial_volume)),
            last_played: None,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.scanner.cooldown(), config.volume.initial)
    }
}

/// Why a scan or request produced no effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Unrecognized,
    Debounced,
    PlaybackFailed,
    PrintFailed,
    NothingPlaying,
}

impl IgnoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unrecognized => "unrecognized",
            Self::Debounced => "debounced",
            Self::PlaybackFailed => "playback_failed",
            Self::PrintFailed => "print_failed",
            Self::NothingPlaying => "nothing_playing",
        }
    }
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Played(ClassifiedUri),
    Printed(ClassifiedUri),
    Ignored(IgnoreReason),
}

/// Routes classified, debounced scans to the playback or print sink
/// depending on the current mode.
///
/// The order is fixed: classify, then debounce, then consult the mode.
/// Garbage scans never consume the cooldown window and switching modes
/// mid-cooldown does not bypass it.
#[derive(Clone)]
pub struct Dispatcher {
    classifier: Classifier,
    playback: Arc<dyn PlaybackSink>,
    printer: Option<Arc<dyn PrintSink>>,
    labels: Option<Arc<dyn LabelSource>>,
}

impl Dispatcher {
    pub fn new(classifier: Classifier, playback: Arc<dyn PlaybackSink>) -> Self {
        Self {
            classifier,
            playback,
            printer: None,
            labels: None,
        }
    }

    pub fn with_printer(mut self, printer: Arc<dyn PrintSink>) -> Self {
        self.printer = Some(printer);
        self
    }

    pub fn with_labels(mut self, labels: Arc<dyn LabelSource>) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn can_print(&self) -> bool {
        self.printer.is_some()
    }

    pub fn playback(&self) -> &Arc<dyn PlaybackSink> {
        &self.playback
    }

    /// Runs one scan through the pipeline. Sink failures are reported in the
    /// outcome; the debounce acceptance stands either way so a jammed code
    /// cannot retry faster than the cooldown.
    pub async fn on_scan(&self, state: &mut ButlerState, event: ScanEvent) -> DispatchOutcome {
        let classified = self.classifier.classify(&event.raw_payload);
        if !classified.is_known() {
            tracing::info!(payload = %event.raw_payload, "ignoring unrecognized code");
            return DispatchOutcome::Ignored(IgnoreReason::Unrecognized);
        }

        if !state.debounce.accept(&event.raw_payload, event.observed_at) {
            tracing::debug!(payload = %event.raw_payload, "same code still in cooldown");
            return DispatchOutcome::Ignored(IgnoreReason::Debounced);
        }

        let mode = state.mode.current();
        tracing::info!(kind = %classified.kind, id = %classified.id, %mode, "dispatching scan");
        match mode {
            Mode::Play => self.play(state, classified).await,
            Mode::Print => self.print(classified).await,
        }
    }

    /// Prints a sticker for what the device is playing, falling back to the
    /// last reference this dispatcher started. Not debounced.
    pub async fn print_now_playing(&self, state: &ButlerState) -> DispatchOutcome {
        let current = match self.playback.now_playing().await {
            Ok(now) => now.and_then(|now| now.printable().cloned()),
            Err(err) => {
                tracing::warn!(error = %err, "could not query current playback");
                None
            }
        };

        match current.or_else(|| state.last_played.clone()) {
            Some(classified) => self.print(classified).await,
            None => {
                tracing::info!("nothing playing to print");
                DispatchOutcome::Ignored(IgnoreReason::NothingPlaying)
            }
        }
    }

    async fn play(&self, state: &mut ButlerState, classified: ClassifiedUri) -> DispatchOutcome {
        match self.playback.play(&classified).await {
            Ok(()) => {
                state.last_played = Some(classified.clone());
                DispatchOutcome::Played(classified)
            }
            Err(err) => {
                report_failure(&err, &classified);
                DispatchOutcome::Ignored(IgnoreReason::PlaybackFailed)
            }
        }
    }

    async fn print(&self, classified: ClassifiedUri) -> DispatchOutcome {
        let Some(printer) = &self.printer else {
            tracing::warn!(id = %classified.id, "no printer available");
            return DispatchOutcome::Ignored(IgnoreReason::PrintFailed);
        };

        let label = match &self.labels {
            Some(labels) => match labels.label(&classified).await {
                Ok(label) => Some(label),
                Err(err) => {
                    tracing::warn!(error = %err, "printing without a caption");
                    None
                }
            },
            None => None,
        };

        match printer.print_sticker(&classified, label.as_ref()).await {
            Ok(()) => DispatchOutcome::Printed(classified),
            Err(err) => {
                report_failure(&err, &classified);
                DispatchOutcome::Ignored(IgnoreReason::PrintFailed)
            }
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("classifier", &self.classifier)
            .field("can_print", &self.can_print())
            .finish()
    }
}

fn report_failure(err: &SinkError, classified: &ClassifiedUri) {
    tracing::warn!(
        sink = err.sink,
        reason = %err.reason,
        kind = %classified.kind,
        id = %classified.id,
        "sink call failed"
    );
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::testing::{FakeLabels, FakePlayback, FakePrinter};
    use crate::{NowPlaying, UriKind};

    const PLAYLIST: &str = "spotify:playlist:37i9dQZF1DX4WYpdgoIcn6";

    struct Harness {
        dispatcher: Dispatcher,
        state: ButlerState,
        playback: Arc<FakePlayback>,
        printer: Arc<FakePrinter>,
    }

    fn harness() -> Harness {
        let playback = Arc::new(FakePlayback::default());
        let printer = Arc::new(FakePrinter::default());
        let dispatcher = Dispatcher::new(Classifier::default(), playback.clone())
            .with_printer(printer.clone());
        Harness {
            dispatcher,
            state: ButlerState::new(Duration::from_secs(3), 70),
            playback,
            printer,
        }
    }

    fn scan(payload: &str, at: Instant) -> ScanEvent {
        ScanEvent::at(payload, at)
    }

    #[tokio::test]
    async fn plays_playlist_in_play_mode() {
        let mut h = harness();
        let outcome = h.dispatcher.on_scan(&mut h.state, scan(PLAYLIST, Instant::now())).await;

        let DispatchOutcome::Played(classified) = outcome else {
            panic!("expected playback, got {outcome:?}");
        };
        assert_eq!(classified.kind, UriKind::Playlist);
        assert_eq!(classified.id, "37i9dQZF1DX4WYpdgoIcn6");
        assert_eq!(h.playback.played(), vec![PLAYLIST.to_string()]);
        assert_eq!(h.state.last_played, Some(classified));
    }

    #[tokio::test]
    async fn repeat_within_cooldown_is_debounced() {
        let mut h = harness();
        let start = Instant::now();

        h.dispatcher.on_scan(&mut h.state, scan(PLAYLIST, start)).await;
        let second = h
            .dispatcher
            .on_scan(&mut h.state, scan(PLAYLIST, start + Duration::from_secs(1)))
            .await;
        assert_eq!(second, DispatchOutcome::Ignored(IgnoreReason::Debounced));
        assert_eq!(h.playback.played().len(), 1);

        let third = h
            .dispatcher
            .on_scan(&mut h.state, scan(PLAYLIST, start + Duration::from_secs(4)))
            .await;
        assert!(matches!(third, DispatchOutcome::Played(_)));
        assert_eq!(h.playback.played().len(), 2);
    }

    #[tokio::test]
    async fn unrecognized_codes_touch_no_sink_and_no_cooldown() {
        let mut h = harness();
        let now = Instant::now();

        let outcome = h.dispatcher.on_scan(&mut h.state, scan("not-a-real-code", now)).await;
        assert_eq!(outcome, DispatchOutcome::Ignored(IgnoreReason::Unrecognized));
        assert!(h.playback.played().is_empty());
        assert!(h.printer.printed().is_empty());
        assert_eq!(h.state.debounce.last_payload(), None);

        h.state.mode.toggle();
        let outcome = h.dispatcher.on_scan(&mut h.state, scan("not-a-real-code", now)).await;
        assert_eq!(outcome, DispatchOutcome::Ignored(IgnoreReason::Unrecognized));
        assert!(h.printer.printed().is_empty());
    }

    #[tokio::test]
    async fn prints_track_in_print_mode() {
        let mut h = harness();
        h.state.mode.toggle();

        let outcome = h
            .dispatcher
            .on_scan(&mut h.state, scan("spotify:track:abc123", Instant::now()))
            .await;

        let DispatchOutcome::Printed(classified) = outcome else {
            panic!("expected a sticker, got {outcome:?}");
        };
        assert_eq!(classified.kind, UriKind::Track);
        assert_eq!(classified.id, "abc123");
        assert!(h.playback.played().is_empty());
        assert_eq!(h.printer.printed(), vec![("spotify:track:abc123".to_string(), None)]);
    }

    #[tokio::test]
    async fn modes_never_cross_sinks() {
        let payloads = [
            "spotify:track:a",
            "spotify:album:b",
            "https://open.spotify.com/playlist/c",
            "garbage",
        ];

        let mut h = harness();
        for payload in payloads {
            h.dispatcher.on_scan(&mut h.state, scan(payload, Instant::now())).await;
        }
        assert!(h.printer.printed().is_empty());
        assert_eq!(h.playback.played().len(), 3);

        let mut h = harness();
        h.state.mode.toggle();
        for payload in payloads {
            h.dispatcher.on_scan(&mut h.state, scan(payload, Instant::now())).await;
        }
        assert!(h.playback.played().is_empty());
        assert_eq!(h.printer.printed().len(), 3);
    }

    #[tokio::test]
    async fn mode_switch_does_not_bypass_cooldown() {
        let mut h = harness();
        let start = Instant::now();

        h.dispatcher.on_scan(&mut h.state, scan(PLAYLIST, start)).await;
        h.state.mode.toggle();
        let outcome = h
            .dispatcher
            .on_scan(&mut h.state, scan(PLAYLIST, start + Duration::from_millis(500)))
            .await;

        assert_eq!(outcome, DispatchOutcome::Ignored(IgnoreReason::Debounced));
        assert!(h.printer.printed().is_empty());
    }

    #[tokio::test]
    async fn failed_playback_still_consumes_cooldown() {
        let mut h = harness();
        h.playback.fail_next_play("device offline");
        let start = Instant::now();

        let first = h.dispatcher.on_scan(&mut h.state, scan(PLAYLIST, start)).await;
        assert_eq!(first, DispatchOutcome::Ignored(IgnoreReason::PlaybackFailed));
        assert_eq!(h.state.last_played, None);
        assert_eq!(h.state.mode.current(), Mode::Play);

        let retry = h
            .dispatcher
            .on_scan(&mut h.state, scan(PLAYLIST, start + Duration::from_secs(1)))
            .await;
        assert_eq!(retry, DispatchOutcome::Ignored(IgnoreReason::Debounced));
    }

    #[tokio::test]
    async fn failed_print_is_reported() {
        let mut h = harness();
        h.state.mode.toggle();
        h.printer.fail_next("out of paper");

        let outcome = h
            .dispatcher
            .on_scan(&mut h.state, scan("spotify:album:xyz", Instant::now()))
            .await;
        assert_eq!(outcome, DispatchOutcome::Ignored(IgnoreReason::PrintFailed));
    }

    #[tokio::test]
    async fn print_mode_without_printer_fails_softly() {
        let playback = Arc::new(FakePlayback::default());
        let dispatcher = Dispatcher::new(Classifier::default(), playback.clone());
        let mut state = ButlerState::new(Duration::from_secs(3), 70);
        state.mode.toggle();

        assert!(!dispatcher.can_print());
        let outcome = dispatcher
            .on_scan(&mut state, scan("spotify:album:xyz", Instant::now()))
            .await;
        assert_eq!(outcome, DispatchOutcome::Ignored(IgnoreReason::PrintFailed));
        assert!(playback.played().is_empty());
    }

    #[tokio::test]
    async fn captions_stickers_from_label_source() {
        let mut h = harness();
        let labels = Arc::new(FakeLabels::new("Chill Vibes", Some("(Playlist)")));
        h.dispatcher = h.dispatcher.clone().with_labels(labels);
        h.state.mode.toggle();

        h.dispatcher.on_scan(&mut h.state, scan(PLAYLIST, Instant::now())).await;

        let printed = h.printer.printed();
        assert_eq!(printed.len(), 1);
        let label = printed[0].1.clone().unwrap();
        assert_eq!(label.title, "Chill Vibes");
        assert_eq!(label.subtitle.as_deref(), Some("(Playlist)"));
    }

    #[tokio::test]
    async fn prints_now_playing_context() {
        let h = harness();
        h.playback.set_now_playing(NowPlaying {
            context: Some(Classifier::default().classify("spotify:album:live")),
            track_album: None,
        });

        let outcome = h.dispatcher.print_now_playing(&h.state).await;
        let DispatchOutcome::Printed(classified) = outcome else {
            panic!("expected a sticker, got {outcome:?}");
        };
        assert_eq!(classified.id, "live");
    }

    #[tokio::test]
    async fn print_now_playing_falls_back_to_last_played() {
        let mut h = harness();
        h.dispatcher.on_scan(&mut h.state, scan(PLAYLIST, Instant::now())).await;

        let outcome = h.dispatcher.print_now_playing(&h.state).await;
        assert!(matches!(outcome, DispatchOutcome::Printed(ref c) if c.raw == PLAYLIST));
    }

    #[tokio::test]
    async fn print_now_playing_with_nothing_playing() {
        let h = harness();
        let outcome = h.dispatcher.print_now_playing(&h.state).await;
        assert_eq!(outcome, DispatchOutcome::Ignored(IgnoreReason::NothingPlaying));
        assert!(h.printer.printed().is_empty());
    }
}
