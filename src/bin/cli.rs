use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::subscriber as tracing_subscriber_global;
use tracing_log::LogTracer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use mixdown::api::oauth::{open_in_browser, LoginFlow, OAuthClient};
use mixdown::api::spotify::SpotifyClient;
use mixdown::api::token::{FileTokenStore, TokenManager, TokenStore};
use mixdown::config::{Config, APP_NAME, DEFAULT_PLAYLIST_LIMIT, DEFAULT_TRACK_LIMIT};
use mixdown::helpers;
use mixdown::models::{FullTrack, MergeOptions, SimplifiedPlaylist};
use mixdown::playlist::PlaylistService;
use mixdown::Error;

#[derive(Parser)]
#[command(name = "mixdown", version, about = "Bulk Spotify playlist operations")]
struct Cli {
    /// Path to config TOML (defaults to the user config dir)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in to Spotify (OAuth PKCE)
    Login {
        /// Seconds to wait for the browser redirect
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Print the authorization URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },
    /// Show the current user
    Me,
    /// Playlist operations
    Playlists {
        #[command(subcommand)]
        sub: PlaylistCommands,
    },
    /// Validate config file and exit
    ConfigValidate,
}

#[derive(Subcommand)]
enum PlaylistCommands {
    /// List playlists (requires login)
    List {
        /// Filter by playlist name substring (case-insensitive)
        #[arg(long, default_value = "")]
        filter: String,

        /// Max playlists to print (0 = no limit)
        #[arg(long, default_value_t = DEFAULT_PLAYLIST_LIMIT)]
        limit: usize,
    },
    /// List tracks in a playlist
    Tracks {
        /// Playlist id, URI, or open.spotify.com URL
        playlist: String,

        /// Max tracks to print (0 = no limit)
        #[arg(long, default_value_t = DEFAULT_TRACK_LIMIT)]
        limit: usize,

        /// Only print track URIs
        #[arg(long)]
        uris: bool,
    },
    /// Create a new playlist for the current user
    Create {
        #[arg(long)]
        name: String,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long)]
        public: bool,
    },
    /// Add tracks to a playlist
    Add {
        /// Playlist id, URI, or open.spotify.com URL
        playlist: String,

        /// Track ids, URIs, or open.spotify.com URLs
        #[arg(required = true)]
        tracks: Vec<String>,
    },
    /// Merge playlists matching a regex into a new playlist
    Merge {
        /// Regex pattern to match playlist names
        #[arg(long)]
        pattern: String,

        /// Name of the new merged playlist
        #[arg(long)]
        name: String,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long)]
        public: bool,

        /// Remove duplicate track URIs
        #[arg(long)]
        deduplicate: bool,

        /// Offer to delete source playlists after a verified merge
        #[arg(long)]
        delete_sources: bool,

        /// Show what would be merged without making changes
        #[arg(long)]
        dry_run: bool,

        /// Skip confirmation prompts
        #[arg(long)]
        yes: bool,
    },
    /// Delete playlists whose names match a regex
    Delete {
        #[arg(long)]
        pattern: String,

        /// List matching playlists but do not delete anything
        #[arg(long)]
        dry_run: bool,

        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(p) => Config::from_path(p)
            .with_context(|| format!("loading config from {}", p.display()))?,
        None => Config::load_default().context("loading config")?,
    };

    // Initialize the log->tracing bridge and structured logging. Logs go
    // to stderr, plus a daily-rotated file when log_dir is configured.
    let _ = LogTracer::init();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, _guard) = match cfg.log_dir.as_ref() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mixdown.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(non_blocking)), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(fmt::layer().with_writer(std::io::stderr));
    tracing_subscriber_global::set_global_default(subscriber)
        .expect("failed to set global tracing subscriber");

    match cli.command {
        Commands::Login {
            timeout_secs,
            no_browser,
        } => {
            let timeout = timeout_secs.unwrap_or(cfg.login_timeout_secs);
            login(&cfg, timeout, no_browser).await?;
        }
        Commands::Me => {
            let client = new_client(&cfg)?;
            let me = client.get_me().await.context("get current user")?;
            println!("{}\t{}", me.id, me.display_name);
        }
        Commands::Playlists { sub } => run_playlists(&cfg, sub).await?,
        Commands::ConfigValidate => match &cli.config {
            Some(p) => match Config::from_path(p) {
                Ok(_) => println!("OK"),
                Err(e) => {
                    eprintln!("Config validation failed: {}", e);
                    std::process::exit(2);
                }
            },
            None => match Config::load_default() {
                Ok(_) => println!("OK"),
                Err(e) => {
                    eprintln!("Config validation failed: {}", e);
                    std::process::exit(2);
                }
            },
        },
    }

    Ok(())
}

async fn login(cfg: &Config, timeout_secs: u64, no_browser: bool) -> Result<()> {
    let flow = LoginFlow::start(cfg.oauth()).await?;

    println!(
        "Open this URL in your browser and authorize the application:\n\n{}\n",
        flow.authorize_url()
    );
    if !no_browser {
        if let Err(e) = open_in_browser(flow.authorize_url()) {
            tracing::warn!("could not open browser: {}", e);
        }
    }

    let token = flow.finish(Duration::from_secs(timeout_secs)).await?;
    let store = FileTokenStore::new(APP_NAME)?;
    store.save(&token)?;
    println!("Logged in. Token saved to {}", store.path().display());
    Ok(())
}

async fn run_playlists(cfg: &Config, cmd: PlaylistCommands) -> Result<()> {
    match cmd {
        PlaylistCommands::List { filter, limit } => {
            let client = new_client(cfg)?;
            // Fetch everything when filtering so the filter sees all names.
            let fetch_max = if filter.trim().is_empty() && limit > 0 {
                Some(limit)
            } else {
                None
            };
            let pls = client
                .list_current_user_playlists(fetch_max)
                .await
                .context("list playlists")?;
            let filtered = helpers::filter_playlists_by_name(pls, &filter);
            for p in filtered.iter().take(if limit > 0 { limit } else { usize::MAX }) {
                println!("{}", format_playlist_row(p));
            }
        }
        PlaylistCommands::Tracks {
            playlist,
            limit,
            uris,
        } => {
            let client = new_client(cfg)?;
            let playlist_id = helpers::normalize_playlist_id(&playlist)?;
            let max = if limit > 0 { Some(limit) } else { None };
            let tracks = client
                .list_playlist_tracks(&playlist_id, max)
                .await
                .context("list tracks")?;
            for t in &tracks {
                if uris {
                    println!("{}", t.uri);
                } else {
                    println!("{}", format_track_row(t));
                }
            }
        }
        PlaylistCommands::Create {
            name,
            description,
            public,
        } => {
            let client = new_client(cfg)?;
            let pl = client
                .create_playlist(&name, &description, public)
                .await
                .context("create playlist")?;
            println!("{}\t{}", pl.id, pl.name);
        }
        PlaylistCommands::Add { playlist, tracks } => {
            let client = new_client(cfg)?;
            let playlist_id = helpers::normalize_playlist_id(&playlist)?;
            let mut track_uris = Vec::with_capacity(tracks.len());
            for t in &tracks {
                track_uris.push(helpers::normalize_track_uri(t)?);
            }
            let snapshot = client
                .add_tracks_to_playlist(&playlist_id, &track_uris)
                .await
                .context("add tracks")?;
            println!("{}", snapshot);
        }
        PlaylistCommands::Merge {
            pattern,
            name,
            description,
            public,
            deduplicate,
            delete_sources,
            dry_run,
            yes,
        } => {
            let svc = PlaylistService::new(new_client(cfg)?);

            let matched = match svc.find_playlists_by_pattern(&pattern).await {
                Err(Error::NoPlaylistsMatched) => {
                    bail!("no playlists matched pattern {:?}", pattern)
                }
                other => other.context("find playlists")?,
            };

            println!("Matched {} playlist(s):", matched.len());
            for p in &matched {
                println!("{}", format_playlist_row(p));
            }

            if !yes && !confirm("Proceed with merge?")? {
                bail!("cancelled");
            }
            if dry_run {
                println!("Dry run: no changes made");
                return Ok(());
            }

            let source_ids: Vec<String> = matched
                .iter()
                .filter(|p| !p.id.is_empty())
                .map(|p| p.id.clone())
                .collect();

            println!("Merging...");
            let res = svc
                .merge_playlists(
                    &source_ids,
                    &name,
                    &MergeOptions {
                        deduplicate,
                        public,
                        description,
                    },
                )
                .await
                .context("merge playlists")?;

            println!("Created playlist: {}", res.new_playlist_id);
            println!(
                "Tracks added: {} (duplicates removed: {})",
                res.track_count, res.duplicates_removed
            );
            if res.verified {
                println!("Verification: OK");
            } else {
                println!(
                    "Verification: FAILED (missing {} track(s))",
                    res.missing_uris.len()
                );
                for u in res.missing_uris.iter().take(10) {
                    println!("- {}", u);
                }
                bail!("verification failed");
            }

            if delete_sources && (yes || confirm("Delete source playlists?")?) {
                svc.delete_playlists(&source_ids)
                    .await
                    .context("delete source playlists")?;
                println!("Deleted source playlists");
            }
        }
        PlaylistCommands::Delete {
            pattern,
            dry_run,
            yes,
        } => {
            let svc = PlaylistService::new(new_client(cfg)?);

            let matched = match svc.find_playlists_by_pattern(&pattern).await {
                Err(Error::NoPlaylistsMatched) => {
                    println!("No playlists matched pattern {:?}.", pattern);
                    return Ok(());
                }
                other => other.context("find playlists")?,
            };

            println!("Matched {} playlist(s):", matched.len());
            for p in &matched {
                println!("{}", format_playlist_row(p));
            }
            if dry_run {
                println!("Dry run: no playlists were deleted.");
                return Ok(());
            }
            if !yes && !confirm("Delete these playlists?")? {
                bail!("cancelled");
            }

            let ids: Vec<String> = matched.iter().map(|p| p.id.clone()).collect();
            svc.delete_playlists(&ids)
                .await
                .context("delete playlists")?;
            println!("Deleted {} playlist(s).", ids.len());
        }
    }
    Ok(())
}

/// Client wired the way every authenticated command needs it: file token
/// store, OAuth refresher, leeway from config.
fn new_client(cfg: &Config) -> Result<SpotifyClient> {
    let store = FileTokenStore::new(APP_NAME)?;
    let refresher = OAuthClient::new(cfg.oauth());
    let manager = TokenManager::new(
        store,
        Duration::from_secs(cfg.token_leeway_secs),
        Some(Box::new(refresher)),
    );
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.http_timeout_secs))
        .build()
        .context("build http client")?;
    Ok(SpotifyClient::new(manager)
        .with_http_client(http)
        .with_user_agent(Config::user_agent()))
}

fn format_playlist_row(p: &SimplifiedPlaylist) -> String {
    format!("{}\t{}\t{} tracks", p.id, p.name, p.tracks.total)
}

fn format_track_row(t: &FullTrack) -> String {
    format!(
        "{}\t{} - {}",
        t.uri,
        t.name,
        helpers::join_artist_names(&t.artists)
    )
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N]: ", prompt);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let s = line.trim().to_lowercase();
    Ok(s == "y" || s == "yes")
}
