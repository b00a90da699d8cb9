use std::collections::HashSet;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use crate::api::PlaylistApi;
use crate::error::{ApiError, Error, Result};
use crate::models::{MergeOptions, MergeResult, SimplifiedPlaylist, Verification};

/// The provider is eventually consistent: a freshly written playlist can
/// read back incomplete for a short while, so verification retries a few
/// times before reporting tracks as missing.
pub const VERIFY_ATTEMPTS: u32 = 3;
pub const VERIFY_RETRY_PAUSE: Duration = Duration::from_millis(200);

/// High-level playlist operations over any PlaylistApi implementation.
pub struct PlaylistService<C> {
    api: C,
}

impl<C: PlaylistApi> PlaylistService<C> {
    pub fn new(api: C) -> Self {
        Self { api }
    }

    /// Playlists of the current user whose name matches the regex.
    /// Zero matches is reported as `Error::NoPlaylistsMatched` so callers
    /// can short-circuit instead of treating an empty list as success.
    pub async fn find_playlists_by_pattern(
        &self,
        pattern: &str,
    ) -> Result<Vec<SimplifiedPlaylist>> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(Error::InvalidInput("pattern is required".into()));
        }
        let re = Regex::new(pattern)?;

        let pls = self.api.list_current_user_playlists(None).await?;
        let out: Vec<SimplifiedPlaylist> =
            pls.into_iter().filter(|p| re.is_match(&p.name)).collect();
        if out.is_empty() {
            return Err(Error::NoPlaylistsMatched);
        }
        Ok(out)
    }

    /// Combine the tracks of the source playlists into one new playlist.
    ///
    /// Sources are read in the order given, preserving within-source
    /// track order; collection happens before anything is created so a
    /// read failure has no side effects. After a failed write the freshly
    /// created destination is deleted best-effort. Verification misses do
    /// not fail the merge; they come back in the result so the caller can
    /// decide (e.g. keep the sources).
    pub async fn merge_playlists(
        &self,
        source_ids: &[String],
        target_name: &str,
        opts: &MergeOptions,
    ) -> Result<MergeResult> {
        let target_name = target_name.trim();
        if target_name.is_empty() {
            return Err(Error::InvalidInput("target name is required".into()));
        }
        let sources: Vec<&str> = source_ids
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        if sources.is_empty() {
            return Err(Error::InvalidInput(
                "at least one source playlist is required".into(),
            ));
        }

        let mut uris: Vec<String> = Vec::new();
        for id in &sources {
            let tracks = self.api.list_playlist_tracks(id, None).await?;
            for t in tracks {
                if !t.uri.is_empty() {
                    uris.push(t.uri);
                }
            }
        }

        let mut duplicates_removed = 0;
        if opts.deduplicate {
            let (kept, dupes) = deduplicate(uris);
            uris = kept;
            duplicates_removed = dupes;
        }

        let pl = self
            .api
            .create_playlist(target_name, &opts.description, opts.public)
            .await?;
        debug!(
            "created destination playlist {} with {} tracks pending",
            pl.id,
            uris.len()
        );

        if !uris.is_empty() {
            if let Err(e) = self.api.add_tracks_to_playlist(&pl.id, &uris).await {
                self.rollback(&pl.id).await;
                return Err(e);
            }
        }

        let verification = match self.verify_playlist_contents(&pl.id, &uris).await {
            Ok(v) => v,
            Err(e) => {
                self.rollback(&pl.id).await;
                return Err(e);
            }
        };

        Ok(MergeResult {
            new_playlist_id: pl.id,
            track_count: uris.len(),
            duplicates_removed,
            verified: verification.ok,
            missing_uris: verification.missing_uris,
        })
    }

    /// Re-read the playlist and compare against the expected URI set,
    /// retrying to ride out eventual consistency. Missing URIs are
    /// reported in first-seen order.
    pub async fn verify_playlist_contents(
        &self,
        playlist_id: &str,
        expected_uris: &[String],
    ) -> Result<Verification> {
        let playlist_id = playlist_id.trim();
        if playlist_id.is_empty() {
            return Err(Error::InvalidInput("playlist id is required".into()));
        }

        let mut expected: Vec<&str> = Vec::new();
        let mut expected_set: HashSet<&str> = HashSet::new();
        for u in expected_uris {
            let u = u.trim();
            if !u.is_empty() && expected_set.insert(u) {
                expected.push(u);
            }
        }
        if expected.is_empty() {
            return Ok(Verification {
                ok: true,
                missing_uris: Vec::new(),
            });
        }

        let mut missing: Vec<String> = Vec::new();
        for attempt in 0..VERIFY_ATTEMPTS {
            let tracks = self.api.list_playlist_tracks(playlist_id, None).await?;
            let seen: HashSet<&str> = tracks
                .iter()
                .map(|t| t.uri.as_str())
                .filter(|u| !u.is_empty())
                .collect();

            missing = expected
                .iter()
                .filter(|u| !seen.contains(**u))
                .map(|u| u.to_string())
                .collect();
            if missing.is_empty() {
                return Ok(Verification {
                    ok: true,
                    missing_uris: Vec::new(),
                });
            }
            if attempt + 1 < VERIFY_ATTEMPTS {
                debug!(
                    "verification attempt {} found {} missing uris, retrying",
                    attempt + 1,
                    missing.len()
                );
                tokio::time::sleep(VERIFY_RETRY_PAUSE).await;
            }
        }

        Ok(Verification {
            ok: false,
            missing_uris: missing,
        })
    }

    /// Delete playlists one by one, stopping at the first failure. A
    /// provider 403 becomes the distinguishable permission-denied
    /// condition; everything else propagates as-is.
    pub async fn delete_playlists(&self, playlist_ids: &[String]) -> Result<()> {
        for id in playlist_ids {
            let id = id.trim();
            if id.is_empty() {
                continue;
            }
            if let Err(e) = self.api.delete_playlist(id).await {
                if matches!(e, Error::Api(ApiError { status: 403, .. })) {
                    return Err(Error::PermissionDenied { id: id.to_string() });
                }
                return Err(e);
            }
        }
        Ok(())
    }

    async fn rollback(&self, playlist_id: &str) {
        // Best-effort: a rollback failure leaves the half-built playlist
        // behind but must not mask the original error.
        if let Err(e) = self.api.delete_playlist(playlist_id).await {
            warn!("rollback of playlist {} failed: {}", playlist_id, e);
        }
    }
}

/// Remove repeated URIs keeping the first occurrence, preserving order.
/// Blank entries are dropped without counting as duplicates.
fn deduplicate(input: Vec<String>) -> (Vec<String>, usize) {
    let mut seen: HashSet<String> = HashSet::with_capacity(input.len());
    let mut out: Vec<String> = Vec::with_capacity(input.len());
    let mut dupes = 0;
    for u in input {
        let u = u.trim().to_string();
        if u.is_empty() {
            continue;
        }
        if seen.contains(&u) {
            dupes += 1;
            continue;
        }
        seen.insert(u.clone());
        out.push(u);
    }
    (out, dupes)
}
