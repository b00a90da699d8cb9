use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackCount {
    #[serde(default)]
    pub total: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimplifiedPlaylist {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub collaborative: bool,
    #[serde(default)]
    pub owner: User,
    #[serde(default)]
    pub tracks: TrackCount,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Artist {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Album {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FullTrack {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub album: Album,
}

/// Playlist track entries can carry a null track (removed or unavailable
/// items); those deserialize to None and are filtered out by the client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaylistTrackItem {
    #[serde(default)]
    pub track: Option<FullTrack>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnapshotResponse {
    #[serde(default)]
    pub snapshot_id: String,
}

/// Controls merge behavior. Deduplicate removes repeated track URIs while
/// preserving first-seen order.
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub deduplicate: bool,
    pub public: bool,
    pub description: String,
}

/// Outcome of a merge. `verified == false` with a non-empty
/// `missing_uris` means the merge itself succeeded but the provider had
/// not surfaced every written track after the verification retries.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeResult {
    pub new_playlist_id: String,
    pub track_count: usize,
    pub duplicates_removed: usize,
    pub verified: bool,
    pub missing_uris: Vec<String>,
}

/// Outcome of verifying a playlist's contents against an expected set.
#[derive(Debug, Clone, Default)]
pub struct Verification {
    pub ok: bool,
    pub missing_uris: Vec<String>,
}
