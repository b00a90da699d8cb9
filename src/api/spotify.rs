use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use url::Url;

use super::paging::{collect_paged, Page};
use super::token::TokenManager;
use super::PlaylistApi;
use crate::error::{decode_api_error, Error, Result};
use crate::models::{FullTrack, PlaylistTrackItem, SimplifiedPlaylist, SnapshotResponse, User};

pub const DEFAULT_BASE_URL: &str = "https://api.spotify.com/v1/";

pub const PLAYLIST_PAGE_SIZE: usize = 50;
pub const TRACK_PAGE_SIZE: usize = 100;

/// Provider constants: the add-tracks endpoint takes at most 100 URIs per
/// request, and rate-limit retries are capped at 5 attempts.
pub const DEFAULT_WRITE_BATCH_SIZE: usize = 100;
pub const DEFAULT_RATE_LIMIT_RETRIES: u32 = 5;

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(5);

/// Spotify Web API client. Explicitly constructed: each instance owns its
/// HTTP client, token manager and base URL; there is no shared global
/// state.
pub struct SpotifyClient {
    http: Client,
    base_url: Url,
    user_agent: Option<String>,
    tokens: TokenManager,
    write_batch_size: usize,
    rate_limit_retries: u32,
}

impl SpotifyClient {
    pub fn new(tokens: TokenManager) -> Self {
        let base_url = Url::parse(DEFAULT_BASE_URL).expect("default base url parses");
        Self {
            http: Client::new(),
            base_url,
            user_agent: None,
            tokens,
            write_batch_size: DEFAULT_WRITE_BATCH_SIZE,
            rate_limit_retries: DEFAULT_RATE_LIMIT_RETRIES,
        }
    }

    pub fn with_base_url(mut self, raw: &str) -> Result<Self> {
        self.base_url = Url::parse(raw)?;
        Ok(self)
    }

    pub fn with_http_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    pub fn with_write_batch_size(mut self, size: usize) -> Self {
        self.write_batch_size = size.max(1);
        self
    }

    pub fn with_rate_limit_retries(mut self, retries: u32) -> Self {
        self.rate_limit_retries = retries;
        self
    }

    pub async fn get_me(&self) -> Result<User> {
        self.do_json(Method::GET, &["me"], &[], None).await
    }

    pub async fn list_current_user_playlists(
        &self,
        max: Option<usize>,
    ) -> Result<Vec<SimplifiedPlaylist>> {
        collect_paged(PLAYLIST_PAGE_SIZE, max, |limit, offset| async move {
            self.do_json::<Page<SimplifiedPlaylist>>(
                Method::GET,
                &["me", "playlists"],
                &[("limit", limit.to_string()), ("offset", offset.to_string())],
                None,
            )
            .await
        })
        .await
    }

    pub async fn list_playlist_tracks(
        &self,
        playlist_id: &str,
        max: Option<usize>,
    ) -> Result<Vec<FullTrack>> {
        let playlist_id = playlist_id.trim();
        if playlist_id.is_empty() {
            return Err(Error::InvalidInput("playlist id is required".into()));
        }

        let items = collect_paged(TRACK_PAGE_SIZE, max, |limit, offset| async move {
            self.do_json::<Page<PlaylistTrackItem>>(
                Method::GET,
                &["playlists", playlist_id, "tracks"],
                &[("limit", limit.to_string()), ("offset", offset.to_string())],
                None,
            )
            .await
        })
        .await?;

        // Entries can carry null tracks; drop those and anything without
        // a URI.
        Ok(items
            .into_iter()
            .filter_map(|it| it.track)
            .filter(|t| !t.uri.is_empty())
            .collect())
    }

    /// Create a playlist for the current user. Posting to /me/playlists
    /// avoids user-id mismatch errors.
    pub async fn create_playlist(
        &self,
        name: &str,
        description: &str,
        public: bool,
    ) -> Result<SimplifiedPlaylist> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("name is required".into()));
        }
        let body = json!({
            "name": name,
            "public": public,
            "description": description,
        });
        self.do_json(Method::POST, &["me", "playlists"], &[], Some(body))
            .await
    }

    /// Add track URIs in sequential batches, returning the last batch's
    /// snapshot id.
    pub async fn add_tracks_to_playlist(
        &self,
        playlist_id: &str,
        uris: &[String],
    ) -> Result<String> {
        let playlist_id = playlist_id.trim();
        if playlist_id.is_empty() {
            return Err(Error::InvalidInput("playlist id is required".into()));
        }
        let clean: Vec<&str> = uris
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .collect();
        if clean.is_empty() {
            return Err(Error::InvalidInput("at least one track uri is required".into()));
        }

        let mut last_snapshot = String::new();
        for chunk in clean.chunks(self.write_batch_size) {
            let body = json!({ "uris": chunk });
            let resp: SnapshotResponse = self
                .do_json(
                    Method::POST,
                    &["playlists", playlist_id, "tracks"],
                    &[],
                    Some(body),
                )
                .await?;
            last_snapshot = resp.snapshot_id;
        }
        Ok(last_snapshot)
    }

    pub async fn get_playlist(&self, playlist_id: &str) -> Result<SimplifiedPlaylist> {
        let playlist_id = playlist_id.trim();
        if playlist_id.is_empty() {
            return Err(Error::InvalidInput("playlist id is required".into()));
        }
        self.do_json(Method::GET, &["playlists", playlist_id], &[], None)
            .await
    }

    /// Spotify has no hard delete; removing the current user's follow
    /// effectively deletes a playlist they own.
    /// Uses: DELETE /playlists/{playlist_id}/followers
    pub async fn delete_playlist(&self, playlist_id: &str) -> Result<()> {
        let playlist_id = playlist_id.trim();
        if playlist_id.is_empty() {
            return Err(Error::InvalidInput("playlist id is required".into()));
        }
        self.do_empty(
            Method::DELETE,
            &["playlists", playlist_id, "followers"],
            &[],
            None,
        )
        .await
    }

    pub async fn remove_tracks_from_playlist(
        &self,
        playlist_id: &str,
        uris: &[String],
    ) -> Result<String> {
        let playlist_id = playlist_id.trim();
        if playlist_id.is_empty() {
            return Err(Error::InvalidInput("playlist id is required".into()));
        }
        let tracks: Vec<serde_json::Value> = uris
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .map(|u| json!({ "uri": u }))
            .collect();
        if tracks.is_empty() {
            return Err(Error::InvalidInput("at least one track uri is required".into()));
        }

        let body = json!({ "tracks": tracks });
        let resp: SnapshotResponse = self
            .do_json(
                Method::DELETE,
                &["playlists", playlist_id, "tracks"],
                &[],
                Some(body),
            )
            .await?;
        Ok(resp.snapshot_id)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config("api base url cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn do_json<T>(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let bytes = self.dispatch(method, segments, query, body.as_ref()).await?;
        if bytes.is_empty() {
            return Ok(T::default());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn do_empty(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<()> {
        self.dispatch(method, segments, query, body.as_ref()).await?;
        Ok(())
    }

    /// The resilient exchange: authenticate, send, recover the first 401
    /// with one forced refresh, back off on 429 up to the retry cap, and
    /// map any other non-2xx to a structured ApiError.
    async fn dispatch(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<Vec<u8>> {
        let mut url = self.endpoint(segments)?;
        if !query.is_empty() {
            let mut q = url.query_pairs_mut();
            for (k, v) in query {
                q.append_pair(k, v);
            }
        }

        let mut refreshed = false;
        let mut rate_retries: u32 = 0;
        loop {
            let access_token = self.tokens.access_token().await?;

            let mut req = self
                .http
                .request(method.clone(), url.clone())
                .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
                .header(header::ACCEPT, "application/json");
            if let Some(ua) = &self.user_agent {
                req = req.header(header::USER_AGENT, ua);
            }
            if let Some(b) = body {
                req = req.json(b);
            }

            let resp = req.send().await?;
            let status = resp.status();

            if status == StatusCode::UNAUTHORIZED && !refreshed {
                // One forced refresh per logical call; when the refresh
                // itself fails the 401 surfaces below.
                if self.tokens.force_refresh().await.is_ok() {
                    refreshed = true;
                    continue;
                }
            }

            if status == StatusCode::TOO_MANY_REQUESTS && rate_retries < self.rate_limit_retries {
                let wait =
                    retry_after_duration(resp.headers().get(header::RETRY_AFTER), rate_retries);
                rate_retries += 1;
                debug!(
                    "rate limited, waiting {:?} before retry {}/{}",
                    wait, rate_retries, self.rate_limit_retries
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let bytes = resp.bytes().await?.to_vec();
            if !status.is_success() {
                return Err(decode_api_error(&bytes, status.as_u16()).into());
            }
            return Ok(bytes);
        }
    }
}

/// Wait duration for a 429: the Retry-After header (seconds) when
/// parseable, else exponential backoff from 250ms capped at 5s.
fn retry_after_duration(header: Option<&header::HeaderValue>, attempt: u32) -> Duration {
    if let Some(v) = header.and_then(|v| v.to_str().ok()) {
        if let Ok(secs) = v.trim().parse::<u64>() {
            return Duration::from_secs(secs);
        }
    }
    let d = BACKOFF_BASE * 2u32.saturating_pow(attempt);
    d.min(BACKOFF_CAP)
}

#[async_trait]
impl PlaylistApi for SpotifyClient {
    async fn get_me(&self) -> Result<User> {
        SpotifyClient::get_me(self).await
    }

    async fn list_current_user_playlists(
        &self,
        max: Option<usize>,
    ) -> Result<Vec<SimplifiedPlaylist>> {
        SpotifyClient::list_current_user_playlists(self, max).await
    }

    async fn list_playlist_tracks(
        &self,
        playlist_id: &str,
        max: Option<usize>,
    ) -> Result<Vec<FullTrack>> {
        SpotifyClient::list_playlist_tracks(self, playlist_id, max).await
    }

    async fn create_playlist(
        &self,
        name: &str,
        description: &str,
        public: bool,
    ) -> Result<SimplifiedPlaylist> {
        SpotifyClient::create_playlist(self, name, description, public).await
    }

    async fn add_tracks_to_playlist(&self, playlist_id: &str, uris: &[String]) -> Result<String> {
        SpotifyClient::add_tracks_to_playlist(self, playlist_id, uris).await
    }

    async fn get_playlist(&self, playlist_id: &str) -> Result<SimplifiedPlaylist> {
        SpotifyClient::get_playlist(self, playlist_id).await
    }

    async fn delete_playlist(&self, playlist_id: &str) -> Result<()> {
        SpotifyClient::delete_playlist(self, playlist_id).await
    }

    async fn remove_tracks_from_playlist(
        &self,
        playlist_id: &str,
        uris: &[String],
    ) -> Result<String> {
        SpotifyClient::remove_tracks_from_playlist(self, playlist_id, uris).await
    }
}
