use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::api::oauth::OAuthConfig;
use crate::error::{Error, Result};

pub const APP_NAME: &str = "mixdown";

/// CLI display defaults.
pub const DEFAULT_PLAYLIST_LIMIT: usize = 50;
pub const DEFAULT_TRACK_LIMIT: usize = 100;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub tls_cert_file: Option<PathBuf>,
    #[serde(default)]
    pub tls_key_file: Option<PathBuf>,

    /// How long `mixdown login` waits for the browser redirect.
    #[serde(default = "default_login_timeout")]
    pub login_timeout_secs: u64,
    /// Refresh this many seconds before the token actually expires.
    #[serde(default = "default_token_leeway")]
    pub token_leeway_secs: u64,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// When set, logs additionally go to a daily-rotated file here.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_redirect_uri() -> String {
    "http://localhost:8888/callback".into()
}

fn default_scopes() -> Vec<String> {
    vec![
        "playlist-read-private",
        "playlist-read-collaborative",
        "playlist-modify-private",
        "playlist-modify-public",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_login_timeout() -> u64 { 120 }
fn default_token_leeway() -> u64 { 60 }
fn default_http_timeout() -> u64 { 30 }

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes(),
            tls_cert_file: None,
            tls_key_file: None,
            login_timeout_secs: default_login_timeout(),
            token_leeway_secs: default_token_leeway(),
            http_timeout_secs: default_http_timeout(),
            log_dir: None,
        }
    }
}

impl Config {
    pub fn from_path(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        let mut cfg: Config = toml::from_str(&s)?;
        cfg.apply_env_overrides();
        cfg.normalize();
        Ok(cfg)
    }

    /// Load from the default location; a missing file yields defaults so
    /// env-only setups work.
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path()?;
        let mut cfg = if path.exists() {
            let s = std::fs::read_to_string(&path)?;
            toml::from_str(&s)?
        } else {
            Config::default()
        };
        cfg.apply_env_overrides();
        cfg.normalize();
        Ok(cfg)
    }

    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("cannot determine user config dir".into()))?;
        Ok(dir.join(APP_NAME).join("config.toml"))
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SPOTIFY_CLIENT_ID") {
            if !v.trim().is_empty() {
                self.client_id = v.trim().to_string();
            }
        }
        if let Ok(v) = std::env::var("SPOTIFY_REDIRECT_URI") {
            if !v.trim().is_empty() {
                self.redirect_uri = v.trim().to_string();
            }
        }
        if let Ok(v) = std::env::var("SPOTIFY_SCOPES") {
            let scopes = split_scopes(&v);
            if !scopes.is_empty() {
                self.scopes = scopes;
            }
        }
        if let Ok(v) = std::env::var("SPOTIFY_TLS_CERT_FILE") {
            if !v.trim().is_empty() {
                self.tls_cert_file = Some(PathBuf::from(v.trim()));
            }
        }
        if let Ok(v) = std::env::var("SPOTIFY_TLS_KEY_FILE") {
            if !v.trim().is_empty() {
                self.tls_key_file = Some(PathBuf::from(v.trim()));
            }
        }
    }

    fn normalize(&mut self) {
        self.client_id = self.client_id.trim().to_string();
        self.redirect_uri = self.redirect_uri.trim().to_string();
        if self.redirect_uri.is_empty() {
            self.redirect_uri = default_redirect_uri();
        }
        if self.scopes.is_empty() {
            self.scopes = default_scopes();
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.client_id.trim().is_empty()
    }

    pub fn user_agent() -> String {
        format!("{}/{}", APP_NAME, env!("CARGO_PKG_VERSION"))
    }

    pub fn oauth(&self) -> OAuthConfig {
        OAuthConfig {
            client_id: self.client_id.clone(),
            redirect_uri: self.redirect_uri.clone(),
            scopes: self.scopes.clone(),
            user_agent: Some(Self::user_agent()),
            tls_cert_file: self.tls_cert_file.clone(),
            tls_key_file: self.tls_key_file.clone(),
            ..OAuthConfig::default()
        }
    }
}

/// Scopes from the environment can be space- or comma-separated.
fn split_scopes(s: &str) -> Vec<String> {
    s.split(|c| c == ' ' || c == ',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}
