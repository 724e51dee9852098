//! Adafruit Seesaw rotary encoder on I2C.
//!
//! Turning the knob changes the volume, a single press toggles play/pause
//! and a double press prints a sticker for what is playing. The encoder is
//! optional: when it cannot be opened the appliance keeps running on the
//! keyboard alone.

use std::time::{Duration, Instant};

use music_butler_core::{ButlerEvent, EncoderConfig, InputEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const READ_ERROR_BACKOFF: Duration = Duration::from_millis(100);
/// GPIO pin of the Seesaw wired to the knob's push button.
const BUTTON_PIN: u32 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    Single,
    Double,
}

/// Tells single presses from double presses.
///
/// A press is reported as single only once the double-press window has
/// passed with the button released, so a double press never also yields a
/// single one.
#[derive(Debug, Clone)]
pub struct PressTracker {
    window: Duration,
    held: bool,
    pending: Option<Instant>,
}

impl PressTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            held: false,
            pending: None,
        }
    }

    pub fn update(&mut self, pressed: bool, now: Instant) -> Option<Gesture> {
        let rising = pressed && !self.held;
        self.held = pressed;

        if rising {
            return match self.pending.replace(now) {
                Some(first) if now.duration_since(first) < self.window => {
                    self.pending = None;
                    Some(Gesture::Double)
                }
                // The earlier press expired between polls.
                Some(_) => Some(Gesture::Single),
                None => None,
            };
        }

        match self.pending {
            Some(first) if !self.held && now.duration_since(first) >= self.window => {
                self.pending = None;
                Some(Gesture::Single)
            }
            _ => None,
        }
    }
}

/// One poll of the encoder hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderReading {
    /// Absolute knob position in detents, clockwise positive.
    pub position: i32,
    pub pressed: bool,
}

impl EncoderReading {
    /// Decodes the big-endian position and GPIO bulk registers. The button
    /// pulls its pin low when pressed.
    pub fn from_registers(position: [u8; 4], pins: [u8; 4]) -> Self {
        Self {
            // Seesaw counts counter-clockwise turns up.
            position: i32::from_be_bytes(position).wrapping_neg(),
            pressed: u32::from_be_bytes(pins) & (1 << BUTTON_PIN) == 0,
        }
    }
}

/// Turns successive readings into input events.
#[derive(Debug, Clone)]
pub struct EncoderState {
    last_position: Option<i32>,
    presses: PressTracker,
}

impl EncoderState {
    pub fn new(double_press: Duration) -> Self {
        Self {
            last_position: None,
            presses: PressTracker::new(double_press),
        }
    }

    pub fn observe(&mut self, reading: EncoderReading, now: Instant) -> Vec<InputEvent> {
        let mut events = Vec::new();
        if let Some(last) = self.last_position.replace(reading.position) {
            let delta = reading.position.wrapping_sub(last);
            if delta != 0 {
                events.push(InputEvent::Turn(delta));
            }
        }
        match self.presses.update(reading.pressed, now) {
            Some(Gesture::Single) => events.push(InputEvent::PlayPause),
            Some(Gesture::Double) => events.push(InputEvent::PrintCurrent),
            None => {}
        }
        events
    }
}

/// Polls the encoder on a blocking thread until shutdown. Returns `None`
/// when the encoder is disabled; a device that fails to open only logs a
/// warning.
pub fn spawn_encoder(
    config: &EncoderConfig,
    events: mpsc::Sender<ButlerEvent>,
    shutdown: CancellationToken,
) -> Option<JoinHandle<()>> {
    if !config.enabled {
        tracing::info!("rotary encoder disabled in configuration");
        return None;
    }
    let config = config.clone();

    Some(tokio::task::spawn_blocking(move || {
        let mut device = match seesaw::SeesawEncoder::open(&config) {
            Ok(device) => device,
            Err(err) => {
                tracing::warn!(error = %err, "rotary encoder not available, keyboard controls still work");
                return;
            }
        };
        poll_loop(
            || device.reading(),
            EncoderState::new(config.double_press()),
            &events,
            config.poll_interval(),
            &shutdown,
        );
        tracing::debug!("encoder stopped");
    }))
}

fn poll_loop<E: std::fmt::Display>(
    mut read: impl FnMut() -> Result<EncoderReading, E>,
    mut state: EncoderState,
    events: &mpsc::Sender<ButlerEvent>,
    interval: Duration,
    shutdown: &CancellationToken,
) {
    while !shutdown.is_cancelled() {
        let pause = match read() {
            Ok(reading) => {
                for event in state.observe(reading, Instant::now()) {
                    if events.blocking_send(event.into()).is_err() {
                        return;
                    }
                }
                interval
            }
            Err(err) => {
                tracing::warn!(error = %err, "rotary encoder read failed");
                interval.max(READ_ERROR_BACKOFF)
            }
        };
        std::thread::sleep(pause);
    }
}

#[cfg(target_os = "linux")]
mod seesaw {
    use std::time::Duration;

    use i2cdev::core::I2CDevice;
    use i2cdev::linux::{LinuxI2CDevice, LinuxI2CError};
    use music_butler_core::{ButlerError, EncoderConfig};

    use super::{EncoderReading, BUTTON_PIN};

    const STATUS_BASE: u8 = 0x00;
    const STATUS_HW_ID: u8 = 0x01;
    const GPIO_BASE: u8 = 0x01;
    const GPIO_DIRCLR_BULK: u8 = 0x03;
    const GPIO_BULK: u8 = 0x04;
    const GPIO_BULK_SET: u8 = 0x05;
    const GPIO_PULLENSET: u8 = 0x0b;
    const ENCODER_BASE: u8 = 0x11;
    const ENCODER_POSITION: u8 = 0x30;
    /// The Seesaw needs time between a register select and the read.
    const READ_DELAY: Duration = Duration::from_millis(8);

    pub struct SeesawEncoder {
        device: LinuxI2CDevice,
    }

    impl SeesawEncoder {
        /// Checks that the board answers and configures the button pin as
        /// a pulled-up input.
        pub fn open(config: &EncoderConfig) -> music_butler_core::Result<Self> {
            let unavailable = |err: LinuxI2CError| {
                ButlerError::hardware(
                    "encoder",
                    format!(
                        "{} at {:#04x}: {err}",
                        config.bus.display(),
                        config.address
                    ),
                )
            };

            let device = LinuxI2CDevice::new(&config.bus, config.address).map_err(unavailable)?;
            let mut encoder = Self { device };

            let mut hw_id = [0u8; 1];
            encoder
                .read(STATUS_BASE, STATUS_HW_ID, &mut hw_id)
                .map_err(unavailable)?;
            let mask = (1u32 << BUTTON_PIN).to_be_bytes();
            for func in [GPIO_DIRCLR_BULK, GPIO_PULLENSET, GPIO_BULK_SET] {
                encoder.write(GPIO_BASE, func, &mask).map_err(unavailable)?;
            }

            tracing::info!(hw_id = hw_id[0], bus = %config.bus.display(), "rotary encoder connected");
            Ok(encoder)
        }

        pub fn reading(&mut self) -> Result<EncoderReading, LinuxI2CError> {
            let mut position = [0u8; 4];
            self.read(ENCODER_BASE, ENCODER_POSITION, &mut position)?;
            let mut pins = [0u8; 4];
            self.read(GPIO_BASE, GPIO_BULK, &mut pins)?;
            Ok(EncoderReading::from_registers(position, pins))
        }

        fn write(&mut self, base: u8, func: u8, data: &[u8]) -> Result<(), LinuxI2CError> {
            let mut frame = Vec::with_capacity(2 + data.len());
            frame.extend_from_slice(&[base, func]);
            frame.extend_from_slice(data);
            self.device.write(&frame)
        }

        fn read(&mut self, base: u8, func: u8, out: &mut [u8]) -> Result<(), LinuxI2CError> {
            self.device.write(&[base, func])?;
            std::thread::sleep(READ_DELAY);
            self.device.read(out)
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod seesaw {
    use music_butler_core::{ButlerError, EncoderConfig};

    use super::EncoderReading;

    pub struct SeesawEncoder;

    impl SeesawEncoder {
        pub fn open(_config: &EncoderConfig) -> music_butler_core::Result<Self> {
            Err(ButlerError::hardware("encoder", "I2C is only supported on Linux"))
        }

        pub fn reading(&mut self) -> Result<EncoderReading, ButlerError> {
            Err(ButlerError::hardware("encoder", "I2C is only supported on Linux"))
        }
    }
}
