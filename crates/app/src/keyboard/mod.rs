use music_butler_core::{ButlerEvent, InputEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Maps every recognized key on a line of terminal input to an event.
pub fn parse_line(line: &str) -> Vec<InputEvent> {
    line.chars().filter_map(InputEvent::from_key).collect()
}

/// Forwards key presses typed on stdin (one line at a time) to the
/// controller. Stops on shutdown, end of input, or when the controller
/// hangs up.
pub fn spawn_keyboard(
    events: mpsc::Sender<ButlerEvent>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => {
                    for event in parse_line(&line) {
                        if events.send(event.into()).await.is_err() {
                            return;
                        }
                    }
                }
                Ok(None) => {
                    tracing::debug!("keyboard input closed");
                    break;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "keyboard input failed");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_keys_per_line() {
        assert_eq!(
            parse_line("++m x q"),
            vec![
                InputEvent::VolumeUp,
                InputEvent::VolumeUp,
                InputEvent::ModeToggle,
                InputEvent::PlayPause,
                InputEvent::PlayPause,
                InputEvent::Quit,
            ]
        );
        assert!(parse_line("").is_empty());
    }
}
