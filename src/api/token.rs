use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// OAuth token as persisted between runs. `expires_at` is epoch seconds;
/// empty strings mean "absent". An empty access token is the "not
/// authenticated" state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub expires_at: i64,
    #[serde(default)]
    pub refresh_token: String,
}

impl Token {
    pub fn is_zero(&self) -> bool {
        self.access_token.is_empty()
    }

    /// A zero token is always expired.
    pub fn expired(&self, leeway: Duration) -> bool {
        if self.is_zero() {
            return true;
        }
        Utc::now().timestamp() + leeway.as_secs() as i64 >= self.expires_at
    }
}

/// Injected persistence for the token. `load` returns a zero token (not
/// an error) when nothing has been stored yet.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Token>;
    fn save(&self, token: &Token) -> Result<()>;
}

/// Token store backed by `token.json` under the user config dir.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(app_name: &str) -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("cannot determine user config dir".into()))?;
        let base = dir.join(app_name);
        std::fs::create_dir_all(&base)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&base, std::fs::Permissions::from_mode(0o700));
        }
        Ok(Self {
            path: base.join("token.json"),
        })
    }

    /// Store at an explicit path (tests, non-standard layouts).
    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Token> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Token::default()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn save(&self, token: &Token) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(token)?;
        // Write-then-rename keeps a reader from ever seeing a torn file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600));
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-memory store. Clones share state, which lets tests hand one copy to
/// a TokenManager and keep another to inspect what got saved.
#[derive(Clone, Default)]
pub struct MemoryTokenStore {
    inner: Arc<std::sync::Mutex<Token>>,
}

impl MemoryTokenStore {
    pub fn new(token: Token) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(token)),
        }
    }

    pub fn get(&self) -> Token {
        self.inner.lock().expect("token store lock poisoned").clone()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Token> {
        Ok(self.get())
    }

    fn save(&self, token: &Token) -> Result<()> {
        *self.inner.lock().expect("token store lock poisoned") = token.clone();
        Ok(())
    }
}

/// Exchanges a refresh token for a fresh token pair. Implemented by
/// `api::oauth::OAuthClient` in production and by counting stubs in tests.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh_token(&self, refresh_token: &str) -> Result<Token>;
}

/// Single source of truth for "what access token do I use right now".
///
/// The whole load / check expiry / refresh / persist sequence runs under
/// one mutex, so concurrent callers block instead of racing duplicate
/// refresh calls against a provider that may rotate refresh tokens.
pub struct TokenManager {
    store: Box<dyn TokenStore>,
    leeway: Duration,
    refresher: Option<Box<dyn TokenRefresher>>,
    lock: tokio::sync::Mutex<()>,
}

impl TokenManager {
    pub fn new<S: TokenStore + 'static>(
        store: S,
        leeway: Duration,
        refresher: Option<Box<dyn TokenRefresher>>,
    ) -> Self {
        Self {
            store: Box::new(store),
            leeway,
            refresher,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Current access token, refreshing first when within the leeway
    /// window of expiry.
    pub async fn access_token(&self) -> Result<String> {
        let _guard = self.lock.lock().await;

        let t = self.store.load()?;
        if t.is_zero() {
            return Err(Error::NotLoggedIn);
        }
        if !t.expired(self.leeway) {
            return Ok(t.access_token);
        }
        if t.refresh_token.is_empty() {
            return Err(Error::MissingRefreshToken);
        }
        debug!("access token expired, refreshing");
        self.refresh_and_save(&t.refresh_token).await
    }

    /// Refresh regardless of expiry. Used to recover from a 401 on a
    /// token the provider no longer accepts; intentionally skips the
    /// expiry check even when the stored token still looks valid.
    pub async fn force_refresh(&self) -> Result<String> {
        let _guard = self.lock.lock().await;

        let t = self.store.load()?;
        if t.is_zero() {
            return Err(Error::NotLoggedIn);
        }
        if t.refresh_token.is_empty() {
            return Err(Error::MissingRefreshToken);
        }
        debug!("forcing token refresh");
        self.refresh_and_save(&t.refresh_token).await
    }

    async fn refresh_and_save(&self, refresh_token: &str) -> Result<String> {
        let refresher = self.refresher.as_ref().ok_or(Error::NoRefresher)?;
        let nt = refresher.refresh_token(refresh_token).await?;
        self.store.save(&nt)?;
        Ok(nt.access_token)
    }
}
