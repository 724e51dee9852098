//! Spotify Web API backend: playback on a Spotify Connect device and
//! sticker captions.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use music_butler_core::{
    ClassifiedUri, Classifier, LabelSource, NowPlaying, PlaybackSink, PlaybackState, SinkError,
    SpotifyConfig, StickerLabel, UriKind, VolumeLevel,
};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use url::Url;

/// Access tokens are refreshed this long before they actually expire.
const EXPIRY_MARGIN_SECS: u64 = 60;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Permissions requested during authorization.
pub const SCOPES: &str = "user-read-playback-state,user-modify-playback-state,playlist-read-private";

#[derive(Debug, thiserror::Error)]
pub enum SpotifyError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("spotify answered {status}: {message}")]
    Api { status: StatusCode, message: String },
    #[error("no refresh token; run `music-butler auth` or set spotify.refresh_token")]
    MissingRefreshToken,
    #[error("invalid callback URL: {0}")]
    Callback(String),
    #[error("authorization denied: {0}")]
    Denied(String),
    #[error("no Spotify Connect device found; is the speaker service running?")]
    NoDevice,
    #[error("nothing to resume")]
    NothingToResume,
    #[error("cannot play `{0}` content")]
    Unsupported(UriKind),
    #[error("token cache `{path}`: {source}")]
    Cache {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed response: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<SpotifyError> for SinkError {
    fn from(value: SpotifyError) -> Self {
        SinkError::playback(value.to_string())
    }
}

/// Token cache in the JSON layout spotipy writes, so an existing
/// `.spotify_cache` can be reused as is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCache {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub expires_at: u64,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenCache {
    pub fn is_fresh(&self, now: u64) -> bool {
        !self.access_token.is_empty() && self.expires_at > now + EXPIRY_MARGIN_SECS
    }

    fn from_response(body: TokenResponse, now: u64, previous_refresh: Option<&str>) -> Self {
        Self {
            access_token: body.access_token,
            token_type: body.token_type,
            expires_in: body.expires_in,
            scope: body.scope,
            expires_at: now + body.expires_in,
            refresh_token: body
                .refresh_token
                .or_else(|| previous_refresh.map(str::to_string)),
        }
    }

    pub fn load(path: &Path) -> Result<Option<Self>, SpotifyError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SpotifyError::Cache {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn store(&self, path: &Path) -> Result<(), SpotifyError> {
        let raw = serde_json::to_string(self)?;
        std::fs::write(path, raw).map_err(|source| SpotifyError::Cache {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    scope: String,
    expires_in: u64,
    refresh_token: Option<String>,
}

/// A Spotify Connect output device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Device {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_restricted: bool,
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    devices: Vec<Device>,
}

/// Picks the output device: the configured name first, then whichever
/// device is active, then the first controllable one.
pub fn choose_device<'a>(devices: &'a [Device], preferred: Option<&str>) -> Option<&'a Device> {
    let usable = || {
        devices
            .iter()
            .filter(|device| device.id.is_some() && !device.is_restricted)
    };

    if let Some(name) = preferred {
        if let Some(device) = usable().find(|device| device.name.eq_ignore_ascii_case(name)) {
            return Some(device);
        }
        tracing::warn!(device = name, "preferred device not found");
    }
    usable()
        .find(|device| device.is_active)
        .or_else(|| usable().next())
}

/// Provider reference for a classified payload, regardless of whether it
/// was scanned as a URI or as a link.
pub fn content_uri(classified: &ClassifiedUri) -> String {
    format!("spotify:{}:{}", classified.kind, classified.id)
}

/// Request body for starting playback: tracks play as a single-item queue,
/// albums and playlists as a context.
pub fn play_body(classified: &ClassifiedUri) -> Result<Value, SpotifyError> {
    match classified.kind {
        UriKind::Track => Ok(json!({ "uris": [content_uri(classified)] })),
        UriKind::Album | UriKind::Playlist => {
            Ok(json!({ "context_uri": content_uri(classified) }))
        }
        UriKind::Unknown => Err(SpotifyError::Unsupported(UriKind::Unknown)),
    }
}

/// Builds a sticker caption from a track, album or playlist object.
pub fn label_from_json(kind: UriKind, body: &Value) -> Option<StickerLabel> {
    let name = body.get("name")?.as_str()?;
    let subtitle = match kind {
        UriKind::Playlist => Some("(Playlist)".to_string()),
        UriKind::Album | UriKind::Track => body
            .pointer("/artists/0/name")
            .and_then(Value::as_str)
            .map(str::to_string),
        UriKind::Unknown => return None,
    };
    Some(StickerLabel::new(name, subtitle.as_deref()))
}

/// Interprets `GET /me/player`. Paused playback counts as nothing playing.
pub fn now_playing_from_json(body: &Value) -> Option<NowPlaying> {
    if !body.get("is_playing").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }
    let classifier = Classifier::default();
    let context = body
        .pointer("/context/uri")
        .and_then(Value::as_str)
        .map(|uri| classifier.classify(uri));
    let track_album = body
        .pointer("/item/album/uri")
        .and_then(Value::as_str)
        .map(|uri| classifier.classify(uri));
    Some(NowPlaying {
        context,
        track_album,
    })
}

/// Page the user opens in a browser to grant the app access.
pub fn authorize_url(config: &SpotifyConfig) -> Result<Url, SpotifyError> {
    Url::parse_with_params(
        &format!("{}/authorize", config.accounts_base),
        &[
            ("client_id", config.client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("scope", SCOPES),
        ],
    )
    .map_err(|err| SpotifyError::Callback(format!("bad accounts_base: {err}")))
}

/// Pulls the authorization code out of the URL the browser was redirected
/// to after the user agreed.
pub fn code_from_callback(callback: &str) -> Result<String, SpotifyError> {
    let callback = callback.trim();
    let url = Url::parse(callback)
        .map_err(|err| SpotifyError::Callback(format!("`{callback}`: {err}")))?;

    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" if !value.is_empty() => code = Some(value.into_owned()),
            "error" => return Err(SpotifyError::Denied(value.into_owned())),
            _ => {}
        }
    }
    code.ok_or_else(|| SpotifyError::Callback("no authorization code in the query".to_string()))
}

/// Trades an authorization code for tokens and writes them to the token
/// cache, where `SpotifyClient::connect` picks them up.
pub async fn exchange_code(config: &SpotifyConfig, code: &str) -> Result<TokenCache, SpotifyError> {
    let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
    let response = http
        .post(format!("{}/api/token", config.accounts_base))
        .basic_auth(&config.client_id, Some(&config.client_secret))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", config.redirect_uri.as_str()),
        ])
        .send()
        .await?;
    let body: TokenResponse = check(response).await?.json().await?;

    let cache = TokenCache::from_response(body, unix_now(), None);
    cache.store(&config.token_cache)?;
    tracing::info!(cache = %config.token_cache.display(), "spotify token stored");
    Ok(cache)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// Web API client holding the OAuth token for the lifetime of the process.
#[derive(Debug)]
pub struct SpotifyClient {
    http: Client,
    config: SpotifyConfig,
    token: Mutex<Option<TokenCache>>,
}

impl SpotifyClient {
    /// Loads cached credentials and verifies them by fetching a token.
    pub async fn connect(config: &SpotifyConfig) -> Result<Self, SpotifyError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let cached = TokenCache::load(&config.token_cache)?;
        if cached.is_none() && config.refresh_token.is_none() {
            return Err(SpotifyError::MissingRefreshToken);
        }

        let client = Self {
            http,
            config: config.clone(),
            token: Mutex::new(cached),
        };
        client.access_token().await?;
        tracing::info!("spotify api connected");
        Ok(client)
    }

    async fn access_token(&self) -> Result<String, SpotifyError> {
        let mut slot = self.token.lock().await;
        if let Some(token) = slot.as_ref().filter(|token| token.is_fresh(unix_now())) {
            return Ok(token.access_token.clone());
        }

        let refresh_token = slot
            .as_ref()
            .and_then(|token| token.refresh_token.clone())
            .or_else(|| self.config.refresh_token.clone())
            .ok_or(SpotifyError::MissingRefreshToken)?;

        tracing::debug!("refreshing spotify access token");
        let fresh = self.refresh(&refresh_token).await?;
        if let Err(err) = fresh.store(&self.config.token_cache) {
            tracing::warn!(error = %err, "could not update token cache");
        }
        let access = fresh.access_token.clone();
        *slot = Some(fresh);
        Ok(access)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenCache, SpotifyError> {
        let response = self
            .http
            .post(format!("{}/api/token", self.config.accounts_base))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;
        let body: TokenResponse = check(response).await?.json().await?;
        Ok(TokenCache::from_response(body, unix_now(), Some(refresh_token)))
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, SpotifyError> {
        let token = self.access_token().await?;
        Ok(self
            .http
            .request(method, format!("{}{path}", self.config.api_base))
            .bearer_auth(token))
    }

    /// Sends a request and returns the JSON body, or `None` for `204`.
    async fn send(&self, request: RequestBuilder) -> Result<Option<Value>, SpotifyError> {
        let response = check(request.send().await?).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    pub async fn devices(&self) -> Result<Vec<Device>, SpotifyError> {
        let request = self.request(Method::GET, "/me/player/devices").await?;
        match self.send(request).await? {
            Some(body) => Ok(serde_json::from_value::<DeviceList>(body)?.devices),
            None => Ok(Vec::new()),
        }
    }

    async fn device_id(&self) -> Result<String, SpotifyError> {
        let devices = self.devices().await?;
        choose_device(&devices, self.config.device_name.as_deref())
            .and_then(|device| device.id.clone())
            .ok_or(SpotifyError::NoDevice)
    }

    async fn player(&self) -> Result<Option<Value>, SpotifyError> {
        let request = self.request(Method::GET, "/me/player").await?;
        self.send(request).await
    }

    async fn start(&self, body: Option<Value>) -> Result<(), SpotifyError> {
        let device_id = self.device_id().await?;
        let mut request = self
            .request(Method::PUT, "/me/player/play")
            .await?
            .query(&[("device_id", device_id.as_str())]);
        if let Some(body) = body {
            request = request.json(&body);
        }
        self.send(request).await?;
        Ok(())
    }
}

async fn check(response: Response) -> Result<Response, SpotifyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|body| {
            body.pointer("/error/message")
                .or_else(|| body.get("error_description"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or(text);
    Err(SpotifyError::Api { status, message })
}

#[async_trait]
impl PlaybackSink for SpotifyClient {
    async fn play(&self, classified: &ClassifiedUri) -> Result<(), SinkError> {
        let body = play_body(classified)?;
        self.start(Some(body)).await?;
        Ok(())
    }

    async fn set_volume(&self, level: VolumeLevel) -> Result<(), SinkError> {
        let device_id = self.device_id().await?;
        let percent = level.percent().to_string();
        let request = self
            .request(Method::PUT, "/me/player/volume")
            .await?
            .query(&[
                ("volume_percent", percent.as_str()),
                ("device_id", device_id.as_str()),
            ]);
        self.send(request).await?;
        Ok(())
    }

    async fn toggle_pause(
        &self,
        fallback: Option<&ClassifiedUri>,
    ) -> Result<PlaybackState, SinkError> {
        let player = self.player().await?;
        let is_playing = player
            .as_ref()
            .and_then(|body| body.get("is_playing"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let has_item = player
            .as_ref()
            .and_then(|body| body.get("item"))
            .is_some_and(|item| !item.is_null());

        if is_playing {
            let device_id = self.device_id().await?;
            let request = self
                .request(Method::PUT, "/me/player/pause")
                .await?
                .query(&[("device_id", device_id.as_str())]);
            self.send(request).await?;
            return Ok(PlaybackState::Paused);
        }

        if has_item {
            self.start(None).await?;
        } else {
            let fallback = fallback.ok_or(SpotifyError::NothingToResume)?;
            self.start(Some(play_body(fallback)?)).await?;
        }
        Ok(PlaybackState::Playing)
    }

    async fn now_playing(&self) -> Result<Option<NowPlaying>, SinkError> {
        Ok(self.player().await?.as_ref().and_then(now_playing_from_json))
    }
}

#[async_trait]
impl LabelSource for SpotifyClient {
    async fn label(&self, classified: &ClassifiedUri) -> Result<StickerLabel, SinkError> {
        let to_label_error = |err: SpotifyError| SinkError::new("label", err.to_string());
        let path = match classified.kind {
            UriKind::Track => format!("/tracks/{}", classified.id),
            UriKind::Album => format!("/albums/{}", classified.id),
            UriKind::Playlist => format!("/playlists/{}", classified.id),
            UriKind::Unknown => return Err(to_label_error(SpotifyError::Unsupported(UriKind::Unknown))),
        };

        let mut request = self.request(Method::GET, &path).await.map_err(to_label_error)?;
        if classified.kind == UriKind::Playlist {
            request = request.query(&[("fields", "name,owner(display_name)")]);
        }
        let body = self
            .send(request)
            .await
            .map_err(to_label_error)?
            .unwrap_or(Value::Null);
        label_from_json(classified.kind, &body)
            .ok_or_else(|| SinkError::new("label", "response has no name"))
    }
}
