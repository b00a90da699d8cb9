pub mod callback;
pub mod mock;
pub mod oauth;
pub mod paging;
pub mod pkce;
pub mod spotify;
pub mod token;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{FullTrack, SimplifiedPlaylist, User};

/// Capability set consumed by the merge engine and the CLI: exactly the
/// operations they need, nothing else.
/// Implementations: spotify::SpotifyClient and mock::MockApi (tests).
#[async_trait]
pub trait PlaylistApi: Send + Sync {
    /// Profile of the authenticated user.
    async fn get_me(&self) -> Result<User>;

    /// The current user's playlists; `None` fetches everything.
    async fn list_current_user_playlists(
        &self,
        max: Option<usize>,
    ) -> Result<Vec<SimplifiedPlaylist>>;

    /// Tracks of a playlist in API order; `None` fetches everything.
    async fn list_playlist_tracks(
        &self,
        playlist_id: &str,
        max: Option<usize>,
    ) -> Result<Vec<FullTrack>>;

    /// Create a playlist for the current user and return it.
    async fn create_playlist(
        &self,
        name: &str,
        description: &str,
        public: bool,
    ) -> Result<SimplifiedPlaylist>;

    /// Add track URIs (batching handled by the implementation); returns
    /// the last confirmation snapshot id.
    async fn add_tracks_to_playlist(&self, playlist_id: &str, uris: &[String]) -> Result<String>;

    async fn get_playlist(&self, playlist_id: &str) -> Result<SimplifiedPlaylist>;

    /// Remove the playlist from the current user's library.
    async fn delete_playlist(&self, playlist_id: &str) -> Result<()>;

    /// Remove track URIs; returns the confirmation snapshot id.
    async fn remove_tracks_from_playlist(
        &self,
        playlist_id: &str,
        uris: &[String],
    ) -> Result<String>;
}

/// Shared handles work wherever the trait is expected.
#[async_trait]
impl<T: PlaylistApi + ?Sized> PlaylistApi for std::sync::Arc<T> {
    async fn get_me(&self) -> Result<User> {
        (**self).get_me().await
    }

    async fn list_current_user_playlists(
        &self,
        max: Option<usize>,
    ) -> Result<Vec<SimplifiedPlaylist>> {
        (**self).list_current_user_playlists(max).await
    }

    async fn list_playlist_tracks(
        &self,
        playlist_id: &str,
        max: Option<usize>,
    ) -> Result<Vec<FullTrack>> {
        (**self).list_playlist_tracks(playlist_id, max).await
    }

    async fn create_playlist(
        &self,
        name: &str,
        description: &str,
        public: bool,
    ) -> Result<SimplifiedPlaylist> {
        (**self).create_playlist(name, description, public).await
    }

    async fn add_tracks_to_playlist(&self, playlist_id: &str, uris: &[String]) -> Result<String> {
        (**self).add_tracks_to_playlist(playlist_id, uris).await
    }

    async fn get_playlist(&self, playlist_id: &str) -> Result<SimplifiedPlaylist> {
        (**self).get_playlist(playlist_id).await
    }

    async fn delete_playlist(&self, playlist_id: &str) -> Result<()> {
        (**self).delete_playlist(playlist_id).await
    }

    async fn remove_tracks_from_playlist(
        &self,
        playlist_id: &str,
        uris: &[String],
    ) -> Result<String> {
        (**self).remove_tracks_from_playlist(playlist_id, uris).await
    }
}
