use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::error::{Error, Result};
use crate::models::{Artist, SimplifiedPlaylist};

static OPEN_TRACK_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^https?://open\.spotify\.com/track/([A-Za-z0-9]+)(?:\?.*)?$")
        .expect("track url regex compiles")
});
static OPEN_PLAYLIST_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^https?://open\.spotify\.com/playlist/([A-Za-z0-9]+)(?:\?.*)?$")
        .expect("playlist url regex compiles")
});
static PLAYLIST_URI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^spotify:playlist:([A-Za-z0-9]+)$").expect("playlist uri regex compiles")
});

/// Join artist names into a comma-separated string for display.
pub fn join_artist_names(artists: &[Artist]) -> String {
    artists
        .iter()
        .filter(|a| !a.name.is_empty())
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convert a track id, spotify:track: URI, or open.spotify.com URL into a
/// track URI. Other URLs are rejected.
pub fn normalize_track_uri(s: &str) -> Result<String> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidInput("empty track value".into()));
    }
    if s.to_lowercase().starts_with("spotify:track:") {
        return Ok(s.to_string());
    }
    if let Some(caps) = OPEN_TRACK_URL_RE.captures(s) {
        return Ok(format!("spotify:track:{}", &caps[1]));
    }
    // Anything that still parses as an absolute URL is some other link.
    if Url::parse(s).is_ok() {
        return Err(Error::InvalidInput(format!("unsupported track url: {}", s)));
    }
    // Treat as raw track id.
    Ok(format!("spotify:track:{}", s))
}

/// Convert a playlist id, spotify:playlist: URI, or open.spotify.com URL
/// into a playlist id. Other URLs are rejected.
pub fn normalize_playlist_id(s: &str) -> Result<String> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidInput("empty playlist id".into()));
    }
    if let Some(caps) = PLAYLIST_URI_RE.captures(s) {
        return Ok(caps[1].to_string());
    }
    if let Some(caps) = OPEN_PLAYLIST_URL_RE.captures(s) {
        return Ok(caps[1].to_string());
    }
    if Url::parse(s).is_ok() {
        return Err(Error::InvalidInput(format!(
            "unsupported playlist url: {}",
            s
        )));
    }
    // Treat as raw playlist id.
    Ok(s.to_string())
}

/// Case-insensitive substring filter on playlist names. An empty filter
/// passes everything through.
pub fn filter_playlists_by_name(
    playlists: Vec<SimplifiedPlaylist>,
    filter: &str,
) -> Vec<SimplifiedPlaylist> {
    let want = filter.trim().to_lowercase();
    if want.is_empty() {
        return playlists;
    }
    playlists
        .into_iter()
        .filter(|p| p.name.to_lowercase().contains(&want))
        .collect()
}
