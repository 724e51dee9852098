use std::time::{Duration, Instant};

/// Suppresses repeated dispatch of the identical payload within a cooldown
/// window.
///
/// This is not a rate limiter: a different payload is accepted immediately
/// regardless of timing.
#[derive(Debug, Clone)]
pub struct DebounceGate {
    cooldown: Duration,
    last_payload: Option<String>,
    last_accepted_at: Option<Instant>,
}

impl DebounceGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_payload: None,
            last_accepted_at: None,
        }
    }

    /// Returns `true` and records the payload when it should be dispatched.
    pub fn accept(&mut self, payload: &str, now: Instant) -> bool {
        if let Some(remaining) = self.remaining(payload, now) {
            tracing::trace!(payload, ?remaining, "suppressing repeated scan");
            return false;
        }

        self.last_payload = Some(payload.to_string());
        self.last_accepted_at = Some(now);
        true
    }

    /// Time left before `payload` would be accepted again, or `None` when it
    /// would be accepted right now.
    pub fn remaining(&self, payload: &str, now: Instant) -> Option<Duration> {
        match (&self.last_payload, self.last_accepted_at) {
            (Some(last), Some(at)) if last == payload => {
                let elapsed = now.saturating_duration_since(at);
                (elapsed < self.cooldown).then(|| self.cooldown - elapsed)
            }
            _ => None,
        }
    }

    pub fn last_payload(&self) -> Option<&str> {
        self.last_payload.as_deref()
    }
}
