use std::collections::HashMap;

use async_trait::async_trait;
use tracing::info;

use super::PlaylistApi;
use crate::error::{ApiError, Result};
use crate::models::{Artist, FullTrack, SimplifiedPlaylist, User};

/// In-memory PlaylistApi used in tests. Playlists are seeded up front;
/// deterministic ids and snapshot tokens make assertions simple. Knobs
/// inject write/delete failures and model eventually-consistent reads
/// (URIs hidden forever, or until the nth read of their playlist).
pub struct MockApi {
    state: std::sync::Mutex<State>,
}

#[derive(Default)]
struct State {
    playlists: Vec<SimplifiedPlaylist>,
    tracks: HashMap<String, Vec<FullTrack>>,
    deleted: Vec<String>,
    next_id: u32,
    snapshots: u32,
    reads: HashMap<String, u32>,
    fail_add_tracks: Option<ApiError>,
    fail_delete: Option<ApiError>,
    hidden_uris: Vec<(String, String)>,
    delayed_uris: HashMap<(String, String), u32>,
}

fn track(uri: &str) -> FullTrack {
    FullTrack {
        id: uri.rsplit(':').next().unwrap_or_default().to_string(),
        name: format!("Track {}", uri),
        uri: uri.to_string(),
        artists: vec![Artist {
            id: "mock-artist".into(),
            name: "Mock Artist".into(),
        }],
        album: Default::default(),
    }
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            state: std::sync::Mutex::new(State {
                next_id: 1,
                ..Default::default()
            }),
        }
    }

    /// Seed a playlist with the given track URIs.
    pub fn with_playlist(self, id: &str, name: &str, uris: &[&str]) -> Self {
        {
            let mut s = self.lock();
            s.playlists.push(SimplifiedPlaylist {
                id: id.to_string(),
                name: name.to_string(),
                tracks: crate::models::TrackCount {
                    total: uris.len() as u32,
                },
                ..Default::default()
            });
            s.tracks
                .insert(id.to_string(), uris.iter().map(|u| track(u)).collect());
        }
        self
    }

    /// Every add-tracks call fails with this error.
    pub fn fail_add_tracks(self, err: ApiError) -> Self {
        self.lock().fail_add_tracks = Some(err);
        self
    }

    /// Every delete call fails with this error.
    pub fn fail_delete(self, err: ApiError) -> Self {
        self.lock().fail_delete = Some(err);
        self
    }

    /// The URI is accepted by writes but never shows up in reads of the
    /// given playlist. Created playlists get deterministic ids
    /// ("mock-playlist-1", ...) so the knob can target them up front.
    pub fn hide_uri(self, playlist_id: &str, uri: &str) -> Self {
        self.lock()
            .hidden_uris
            .push((playlist_id.to_string(), uri.to_string()));
        self
    }

    /// The URI only shows up starting with the nth read (1-based) of the
    /// given playlist, modeling an eventually-consistent write.
    pub fn delay_uri(self, playlist_id: &str, uri: &str, visible_from_read: u32) -> Self {
        self.lock()
            .delayed_uris
            .insert((playlist_id.to_string(), uri.to_string()), visible_from_read);
        self
    }

    pub fn has_playlist(&self, id: &str) -> bool {
        self.lock().playlists.iter().any(|p| p.id == id)
    }

    /// URIs currently stored for a playlist (ignores visibility knobs).
    pub fn tracks_of(&self, id: &str) -> Vec<String> {
        self.lock()
            .tracks
            .get(id)
            .map(|ts| ts.iter().map(|t| t.uri.clone()).collect())
            .unwrap_or_default()
    }

    /// Ids passed to delete_playlist, in order.
    pub fn deleted(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("mock state lock poisoned")
    }
}

impl Default for MockApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlaylistApi for MockApi {
    async fn get_me(&self) -> Result<User> {
        Ok(User {
            id: "mock-user".into(),
            display_name: "Mock User".into(),
        })
    }

    async fn list_current_user_playlists(
        &self,
        max: Option<usize>,
    ) -> Result<Vec<SimplifiedPlaylist>> {
        let mut pls = self.lock().playlists.clone();
        if let Some(m) = max {
            pls.truncate(m);
        }
        Ok(pls)
    }

    async fn list_playlist_tracks(
        &self,
        playlist_id: &str,
        max: Option<usize>,
    ) -> Result<Vec<FullTrack>> {
        let mut s = self.lock();
        let read_n = {
            let n = s.reads.entry(playlist_id.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        let tracks = s.tracks.get(playlist_id).ok_or(ApiError {
            status: 404,
            message: "Not found".into(),
        })?;
        let mut out: Vec<FullTrack> = tracks
            .iter()
            .filter(|t| {
                !s.hidden_uris
                    .iter()
                    .any(|(p, u)| p == playlist_id && *u == t.uri)
            })
            .filter(|t| {
                s.delayed_uris
                    .iter()
                    .find(|((p, u), _)| p == playlist_id && *u == t.uri)
                    .map_or(true, |(_, &from)| read_n >= from)
            })
            .cloned()
            .collect();
        if let Some(m) = max {
            out.truncate(m);
        }
        Ok(out)
    }

    async fn create_playlist(
        &self,
        name: &str,
        description: &str,
        public: bool,
    ) -> Result<SimplifiedPlaylist> {
        let mut s = self.lock();
        let id = format!("mock-playlist-{}", s.next_id);
        s.next_id += 1;
        info!("MockApi: create_playlist {} ({})", name, id);
        let pl = SimplifiedPlaylist {
            id: id.clone(),
            name: name.to_string(),
            description: description.to_string(),
            public,
            ..Default::default()
        };
        s.playlists.push(pl.clone());
        s.tracks.insert(id, Vec::new());
        Ok(pl)
    }

    async fn add_tracks_to_playlist(&self, playlist_id: &str, uris: &[String]) -> Result<String> {
        let mut s = self.lock();
        if let Some(err) = &s.fail_add_tracks {
            return Err(err.clone().into());
        }
        let new_tracks: Vec<FullTrack> = uris.iter().map(|u| track(u)).collect();
        s.tracks
            .entry(playlist_id.to_string())
            .or_default()
            .extend(new_tracks);
        s.snapshots += 1;
        info!(
            "MockApi: add_tracks {} -> {} tracks",
            playlist_id,
            uris.len()
        );
        Ok(format!("snap-{}", s.snapshots))
    }

    async fn get_playlist(&self, playlist_id: &str) -> Result<SimplifiedPlaylist> {
        self.lock()
            .playlists
            .iter()
            .find(|p| p.id == playlist_id)
            .cloned()
            .ok_or_else(|| {
                ApiError {
                    status: 404,
                    message: "Not found".into(),
                }
                .into()
            })
    }

    async fn delete_playlist(&self, playlist_id: &str) -> Result<()> {
        let mut s = self.lock();
        if let Some(err) = &s.fail_delete {
            return Err(err.clone().into());
        }
        info!("MockApi: delete_playlist {}", playlist_id);
        s.playlists.retain(|p| p.id != playlist_id);
        s.tracks.remove(playlist_id);
        s.deleted.push(playlist_id.to_string());
        Ok(())
    }

    async fn remove_tracks_from_playlist(
        &self,
        playlist_id: &str,
        uris: &[String],
    ) -> Result<String> {
        let mut s = self.lock();
        if let Some(tracks) = s.tracks.get_mut(playlist_id) {
            tracks.retain(|t| !uris.contains(&t.uri));
        }
        s.snapshots += 1;
        Ok(format!("snap-{}", s.snapshots))
    }
}
