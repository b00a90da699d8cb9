use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use mixdown::api::token::{
    FileTokenStore, MemoryTokenStore, Token, TokenManager, TokenRefresher, TokenStore,
};
use mixdown::Error;

struct CountingRefresher {
    calls: Arc<AtomicUsize>,
    delay: Duration,
    next: Token,
}

#[async_trait]
impl TokenRefresher for CountingRefresher {
    async fn refresh_token(&self, _refresh_token: &str) -> mixdown::Result<Token> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.next.clone())
    }
}

fn token(access: &str, expires_in_secs: i64, refresh: &str) -> Token {
    Token {
        access_token: access.into(),
        token_type: "Bearer".into(),
        scope: String::new(),
        expires_at: Utc::now().timestamp() + expires_in_secs,
        refresh_token: refresh.into(),
    }
}

fn counting(delay: Duration, next: Token) -> (Arc<AtomicUsize>, Box<dyn TokenRefresher>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let r = CountingRefresher {
        calls: calls.clone(),
        delay,
        next,
    };
    (calls, Box::new(r))
}

#[tokio::test]
async fn zero_token_yields_not_logged_in() {
    let store = MemoryTokenStore::new(Token::default());
    let m = TokenManager::new(store, Duration::ZERO, None);

    assert!(matches!(m.access_token().await, Err(Error::NotLoggedIn)));
    assert!(matches!(m.force_refresh().await, Err(Error::NotLoggedIn)));
}

#[tokio::test]
async fn valid_token_is_returned_unchanged() {
    let store = MemoryTokenStore::new(token("ok", 30, "r"));
    let (calls, refresher) = counting(Duration::ZERO, token("new", 3600, "r"));
    let m = TokenManager::new(store, Duration::ZERO, Some(refresher));

    let got = m.access_token().await.expect("access token");
    assert_eq!(got, "ok");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn leeway_triggers_proactive_refresh() {
    // Expiring in 30s with a 60s leeway counts as expired.
    let store = MemoryTokenStore::new(token("old", 30, "r"));
    let (calls, refresher) = counting(Duration::ZERO, token("new", 3600, "r2"));
    let m = TokenManager::new(store.clone(), Duration::from_secs(60), Some(refresher));

    let got = m.access_token().await.expect("access token");
    assert_eq!(got, "new");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // Refreshed token was persisted.
    assert_eq!(store.get().access_token, "new");
    assert_eq!(store.get().refresh_token, "r2");
}

#[tokio::test]
async fn expired_without_refresh_token_errors() {
    let store = MemoryTokenStore::new(token("old", -10, ""));
    let (calls, refresher) = counting(Duration::ZERO, token("new", 3600, "r"));
    let m = TokenManager::new(store, Duration::ZERO, Some(refresher));

    assert!(matches!(
        m.access_token().await,
        Err(Error::MissingRefreshToken)
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn expired_without_refresher_errors() {
    let store = MemoryTokenStore::new(token("old", -10, "r"));
    let m = TokenManager::new(store, Duration::ZERO, None);

    assert!(matches!(m.access_token().await, Err(Error::NoRefresher)));
}

#[tokio::test]
async fn force_refresh_ignores_validity() {
    // Still valid for an hour; force_refresh refreshes anyway.
    let store = MemoryTokenStore::new(token("ok", 3600, "r"));
    let (calls, refresher) = counting(Duration::ZERO, token("forced", 3600, "r"));
    let m = TokenManager::new(store.clone(), Duration::ZERO, Some(refresher));

    let got = m.force_refresh().await.expect("force refresh");
    assert_eq!(got, "forced");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.get().access_token, "forced");
}

#[tokio::test]
async fn concurrent_callers_trigger_exactly_one_refresh() {
    let store = MemoryTokenStore::new(token("old", -10, "r"));
    let (calls, refresher) = counting(Duration::from_millis(50), token("new", 3600, "r"));
    let m = Arc::new(TokenManager::new(store, Duration::ZERO, Some(refresher)));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let m = m.clone();
        handles.push(tokio::spawn(async move { m.access_token().await }));
    }
    for h in handles {
        let got = h.await.expect("join").expect("access token");
        assert_eq!(got, "new");
    }
    // The first caller refreshed and saved; the rest saw the fresh token.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn file_store_absent_loads_zero_token() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let store = FileTokenStore::at(dir.path().join("token.json"));
    let t = store.load().expect("load");
    assert!(t.is_zero());
}

#[test]
fn file_store_roundtrip() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let store = FileTokenStore::at(dir.path().join("token.json"));

    let t = token("saved", 3600, "refresh");
    store.save(&t).expect("save");
    let loaded = store.load().expect("load");
    assert_eq!(loaded, t);

    // Overwrite works too (the save path is tmp+rename).
    let t2 = token("saved2", 60, "refresh2");
    store.save(&t2).expect("save again");
    assert_eq!(store.load().expect("load").access_token, "saved2");
}

#[test]
fn file_store_corrupt_json_is_an_error() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let path = dir.path().join("token.json");
    std::fs::write(&path, b"{not json").expect("write");
    let store = FileTokenStore::at(path);
    assert!(store.load().is_err());
}

#[test]
fn zero_token_is_always_expired() {
    assert!(Token::default().expired(Duration::ZERO));
    assert!(!token("x", 3600, "").expired(Duration::ZERO));
    assert!(token("x", 30, "").expired(Duration::from_secs(60)));
}
