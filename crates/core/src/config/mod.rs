use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ButlerError, Result};

/// Client id shipped in the sample configuration. Running with it is a
/// configuration error, not an authorization failure.
const PLACEHOLDER_CLIENT_ID: &str = "YOUR_CLIENT_ID_HERE";
/// Widest raster a `GS v 0` command can address on common 80mm printers:
/// 128 bytes of dots per row.
pub const MAX_RASTER_WIDTH_PX: u32 = 1024;

/// Top-level configuration structure for the application.
///
/// Loaded once at startup and treated as read-only afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scanner: ScannerConfig,
    pub grammar: GrammarConfig,
    pub volume: VolumeConfig,
    pub spotify: SpotifyConfig,
    pub printer: PrinterConfig,
    pub camera: CameraConfig,
    pub encoder: EncoderConfig,
}

impl AppConfig {
    /// Reads and validates a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            ButlerError::config(format!("cannot read `{}`: {err}", path.display()))
        })?;
        Self::from_toml(&raw)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let client_id = self.spotify.client_id.trim();
        if client_id.is_empty() || client_id == PLACEHOLDER_CLIENT_ID {
            return Err(ButlerError::config(
                "spotify.client_id is not set; create an app at https://developer.spotify.com/dashboard",
            ));
        }
        if self.scanner.cooldown_secs <= 0.0
            || Duration::try_from_secs_f64(self.scanner.cooldown_secs).is_err()
        {
            return Err(ButlerError::config(format!(
                "scanner.cooldown_secs must be a positive number of seconds, got {}",
                self.scanner.cooldown_secs
            )));
        }
        if self.scanner.queue_depth == 0 {
            return Err(ButlerError::config("scanner.queue_depth must be at least 1"));
        }
        if self.volume.initial > 100 {
            return Err(ButlerError::config(format!(
                "volume.initial must be within 0..=100, got {}",
                self.volume.initial
            )));
        }
        for (key, value) in [
            ("printer.width_px", self.printer.width_px),
            ("printer.qr_size_px", self.printer.qr_size_px),
        ] {
            if value == 0 || value > MAX_RASTER_WIDTH_PX {
                return Err(ButlerError::config(format!(
                    "{key} must be within 1..={MAX_RASTER_WIDTH_PX}, got {value}"
                )));
            }
        }
        if self.encoder.poll_interval_ms == 0 {
            return Err(ButlerError::config("encoder.poll_interval_ms must be at least 1"));
        }
        if self.grammar.schemes.is_empty() && self.grammar.link_hosts.is_empty() {
            return Err(ButlerError::config(
                "grammar needs at least one scheme or link host",
            ));
        }
        Ok(())
    }
}

/// Scan loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Window during which a repeat of the last accepted payload is dropped.
    pub cooldown_secs: f64,
    /// Pause between frame acquisitions.
    pub frame_interval_ms: u64,
    /// Capacity of the event channel feeding the controller.
    pub queue_depth: usize,
}

impl ScannerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_secs)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 3.0,
            frame_interval_ms: 33,
            queue_depth: 16,
        }
    }
}

/// Recognized URI grammars, expressed as data rather than code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrammarConfig {
    /// Scheme tokens accepted in `scheme:type:id` payloads.
    pub schemes: Vec<String>,
    /// Hosts accepted in link payloads such as `https://host/type/id`.
    pub link_hosts: Vec<String>,
    /// Type tokens that may be classified. Anything else stays unknown.
    pub kinds: Vec<String>,
}

impl Default for GrammarConfig {
    fn default() -> Self {
        Self {
            schemes: vec!["spotify".to_string()],
            link_hosts: vec![
                "open.spotify.com".to_string(),
                "play.spotify.com".to_string(),
            ],
            kinds: vec![
                "track".to_string(),
                "album".to_string(),
                "playlist".to_string(),
            ],
        }
    }
}

/// Volume stepping for keys and the rotary knob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    pub initial: u8,
    pub key_step: i32,
    pub knob_step: i32,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            initial: 70,
            key_step: 5,
            knob_step: 2,
        }
    }
}

/// Credentials and device preferences for the Spotify playback sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Refresh token used when the token cache is absent.
    pub refresh_token: Option<String>,
    pub token_cache: PathBuf,
    /// Redirect URI registered for the app; the authorization flow reads the
    /// code from the callback URL the browser lands on.
    pub redirect_uri: String,
    /// Preferred Spotify Connect device, matched case-insensitively by name.
    pub device_name: Option<String>,
    pub api_base: String,
    pub accounts_base: String,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: None,
            token_cache: PathBuf::from(".spotify_cache"),
            redirect_uri: "http://127.0.0.1:8888/callback".to_string(),
            device_name: None,
            api_base: "https://api.spotify.com/v1".to_string(),
            accounts_base: "https://accounts.spotify.com".to_string(),
        }
    }
}

/// Thermal sticker printer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterConfig {
    pub enabled: bool,
    pub device: PathBuf,
    pub width_px: u32,
    pub qr_size_px: u32,
    pub header: String,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: PathBuf::from("/dev/usb/lp0"),
            width_px: 384,
            qr_size_px: 280,
            header: "MUSIC BUTLER".to_string(),
        }
    }
}

/// Still-capture command producing one encoded frame on stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            program: "rpicam-still".to_string(),
            args: [
                "--nopreview",
                "--immediate",
                "--width",
                "640",
                "--height",
                "480",
                "--encoding",
                "jpg",
                "--output",
                "-",
            ]
            .iter()
            .map(|arg| arg.to_string())
            .collect(),
        }
    }
}

/// Seesaw I2C rotary encoder with a push button. Optional: the appliance
/// runs without it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub enabled: bool,
    pub bus: PathBuf,
    pub address: u16,
    pub poll_interval_ms: u64,
    /// A second press within this window counts as a double press.
    pub double_press_ms: u64,
}

impl EncoderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn double_press(&self) -> Duration {
        Duration::from_millis(self.double_press_ms)
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bus: PathBuf::from("/dev/i2c-1"),
            address: 0x36,
            poll_interval_ms: 10,
            double_press_ms: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_defaults_for_missing_sections() {
        let config = AppConfig::from_toml(
            r#"
            [spotify]
            client_id = "abc"
            client_secret = "def"
            "#,
        )
        .unwrap();

        assert_eq!(config.scanner.cooldown(), Duration::from_secs(3));
        assert_eq!(config.volume.initial, 70);
        assert_eq!(config.grammar.schemes, vec!["spotify".to_string()]);
        assert_eq!(config.printer.width_px, 384);
    }

    #[test]
    fn rejects_placeholder_client_id() {
        let err = AppConfig::from_toml(
            r#"
            [spotify]
            client_id = "YOUR_CLIENT_ID_HERE"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ButlerError::Config(_)));
    }

    #[test]
    fn rejects_out_of_range_initial_volume() {
        let err = AppConfig::from_toml(
            r#"
            [spotify]
            client_id = "abc"
            [volume]
            initial = 130
            "#,
        )
        .unwrap_err();
        assert!(format!("{err}").contains("volume.initial"));
    }

    #[test]
    fn rejects_cooldown_beyond_duration_range() {
        for cooldown in ["1e20", "-1.0", "0.0", "nan"] {
            let raw = format!("[spotify]\nclient_id = \"abc\"\n[scanner]\ncooldown_secs = {cooldown}\n");
            let err = AppConfig::from_toml(&raw).unwrap_err();
            assert!(
                format!("{err}").contains("scanner.cooldown_secs"),
                "{cooldown} was accepted"
            );
        }
    }

    #[test]
    fn accepted_cooldown_builds_dispatch_state() {
        let config = AppConfig::from_toml(
            "[spotify]\nclient_id = \"abc\"\n[scanner]\ncooldown_secs = 86400.0\n",
        )
        .unwrap();
        let state = crate::ButlerState::from_config(&config);
        assert_eq!(state.volume.level().percent(), 70);
    }

    #[test]
    fn rejects_raster_wider_than_printer_command() {
        let err = AppConfig::from_toml(
            r#"
            [spotify]
            client_id = "abc"
            [printer]
            width_px = 70000
            "#,
        )
        .unwrap_err();
        assert!(format!("{err}").contains("printer.width_px"));

        let err = AppConfig::from_toml(
            r#"
            [spotify]
            client_id = "abc"
            [printer]
            qr_size_px = 0
            "#,
        )
        .unwrap_err();
        assert!(format!("{err}").contains("printer.qr_size_px"));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("butler.toml");
        std::fs::write(
            &path,
            "[spotify]\nclient_id = \"abc\"\n[scanner]\ncooldown_secs = 1.5\n",
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.scanner.cooldown(), Duration::from_millis(1500));
    }

    #[test]
    fn example_config_needs_credentials() {
        let raw = include_str!("../../../../music-butler.example.toml");
        let parsed: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(parsed.camera.program, "rpicam-still");

        let err = AppConfig::from_toml(raw).unwrap_err();
        assert!(format!("{err}").contains("spotify.client_id"));
    }

    #[test]
    fn reports_missing_file_as_config_error() {
        let err = AppConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(format!("{err}").contains("not/here.toml"));
    }
}
