use std::time::Duration;

use mockito::{Matcher, Server};
use serde_json::json;
use tokio::sync::mpsc::error::TryRecvError;
use url::Url;

use mixdown::api::callback::{CallbackEvent, CallbackReceiver};
use mixdown::api::oauth::{LoginFlow, OAuthClient, OAuthConfig};
use mixdown::Error;

fn cfg(redirect: &str) -> OAuthConfig {
    OAuthConfig {
        client_id: "cid".into(),
        redirect_uri: redirect.into(),
        scopes: vec!["playlist-read-private".into(), "playlist-modify-private".into()],
        ..Default::default()
    }
}

#[tokio::test]
async fn callback_rejects_state_mismatch() {
    let (receiver, mut rx) =
        CallbackReceiver::bind("127.0.0.1", 0, "/callback", "good-state", None)
            .await
            .expect("bind");
    let addr = receiver.local_addr();

    let resp = reqwest::get(format!(
        "http://{}/callback?code=abc&state=evil-state",
        addr
    ))
    .await
    .expect("request");
    assert_eq!(resp.status(), 400);
    assert!(resp.text().await.unwrap().contains("invalid state"));

    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    receiver.shutdown().await;
}

#[tokio::test]
async fn callback_surfaces_provider_error() {
    let (receiver, mut rx) = CallbackReceiver::bind("127.0.0.1", 0, "/callback", "st", None)
        .await
        .expect("bind");
    let addr = receiver.local_addr();

    let resp = reqwest::get(format!(
        "http://{}/callback?error=access_denied&state=st",
        addr
    ))
    .await
    .expect("request");
    assert_eq!(resp.status(), 400);

    match rx.recv().await {
        Some(CallbackEvent::Error(e)) => assert_eq!(e, "access_denied"),
        other => panic!("expected error event, got {:?}", other),
    }
    receiver.shutdown().await;
}

#[tokio::test]
async fn callback_delivers_code_once_and_drops_duplicates() {
    let (receiver, mut rx) = CallbackReceiver::bind("127.0.0.1", 0, "/callback", "st", None)
        .await
        .expect("bind");
    let addr = receiver.local_addr();
    let url = format!("http://{}/callback?code=abc&state=st", addr);

    // Browsers re-request; both get a friendly page, only one event lands.
    let resp1 = reqwest::get(&url).await.expect("first request");
    assert_eq!(resp1.status(), 200);
    assert!(resp1.text().await.unwrap().contains("Login complete"));

    let resp2 = reqwest::get(&url).await.expect("second request");
    assert_eq!(resp2.status(), 200);

    match rx.recv().await {
        Some(CallbackEvent::Code(code)) => assert_eq!(code, "abc"),
        other => panic!("expected code event, got {:?}", other),
    }
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    receiver.shutdown().await;
}

#[tokio::test]
async fn callback_missing_code_is_rejected() {
    let (receiver, mut rx) = CallbackReceiver::bind("127.0.0.1", 0, "/callback", "st", None)
        .await
        .expect("bind");
    let addr = receiver.local_addr();

    let resp = reqwest::get(format!("http://{}/callback?state=st", addr))
        .await
        .expect("request");
    assert_eq!(resp.status(), 400);
    assert!(resp.text().await.unwrap().contains("missing code"));
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    receiver.shutdown().await;
}

#[tokio::test]
async fn callback_other_paths_get_404_without_events() {
    let (receiver, mut rx) = CallbackReceiver::bind("127.0.0.1", 0, "/callback", "st", None)
        .await
        .expect("bind");
    let addr = receiver.local_addr();

    let resp = reqwest::get(format!("http://{}/favicon.ico", addr))
        .await
        .expect("request");
    assert_eq!(resp.status(), 404);
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    receiver.shutdown().await;
}

#[tokio::test]
async fn login_flow_validates_config() {
    let mut c = cfg("http://127.0.0.1:0/callback");
    c.client_id = String::new();
    assert!(matches!(
        LoginFlow::start(c).await,
        Err(Error::Config(_))
    ));

    let c = cfg("ftp://127.0.0.1/callback");
    assert!(matches!(
        LoginFlow::start(c).await,
        Err(Error::Config(_))
    ));

    let mut c = cfg("http://127.0.0.1:0/callback");
    c.redirect_uri = String::new();
    assert!(matches!(
        LoginFlow::start(c).await,
        Err(Error::Config(_))
    ));

    // https without certificate material is a configuration error.
    let c = cfg("https://127.0.0.1:0/callback");
    assert!(matches!(
        LoginFlow::start(c).await,
        Err(Error::Config(_))
    ));
}

#[tokio::test]
async fn login_flow_builds_authorize_url_and_rewrites_port_zero() {
    let flow = LoginFlow::start(cfg("http://127.0.0.1:0/callback"))
        .await
        .expect("start");

    let auth = Url::parse(flow.authorize_url()).expect("authorize url");
    let q: std::collections::HashMap<String, String> = auth
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    assert_eq!(q.get("client_id").map(String::as_str), Some("cid"));
    assert_eq!(q.get("response_type").map(String::as_str), Some("code"));
    assert_eq!(
        q.get("code_challenge_method").map(String::as_str),
        Some("S256")
    );
    assert!(!q.get("code_challenge").unwrap().is_empty());
    assert!(!q.get("state").unwrap().is_empty());
    assert_eq!(
        q.get("scope").map(String::as_str),
        Some("playlist-read-private playlist-modify-private")
    );

    // ":0" got rewritten to the real port, hostname preserved.
    let redirect = Url::parse(flow.redirect_uri()).expect("redirect uri");
    assert_eq!(redirect.host_str(), Some("127.0.0.1"));
    assert_ne!(redirect.port(), Some(0));
    assert_eq!(q.get("redirect_uri").map(String::as_str), Some(flow.redirect_uri()));

    // Tear down so the test doesn't leak the listener.
    let err = flow.finish(Duration::from_millis(50)).await.expect_err("no redirect");
    assert!(matches!(err, Error::LoginTimeout));
}

#[tokio::test]
async fn login_flow_times_out_waiting_for_redirect() {
    let flow = LoginFlow::start(cfg("http://127.0.0.1:0/callback"))
        .await
        .expect("start");
    let err = flow
        .finish(Duration::from_millis(100))
        .await
        .expect_err("should time out");
    assert!(matches!(err, Error::LoginTimeout));
}

#[tokio::test]
async fn login_flow_propagates_provider_error() {
    let flow = LoginFlow::start(cfg("http://127.0.0.1:0/callback"))
        .await
        .expect("start");

    let auth = Url::parse(flow.authorize_url()).expect("authorize url");
    let state = auth
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .expect("state");

    let cb = format!("{}?error=access_denied&state={}", flow.redirect_uri(), state);
    let resp = reqwest::get(&cb).await.expect("callback request");
    assert_eq!(resp.status(), 400);

    let err = flow
        .finish(Duration::from_secs(5))
        .await
        .expect_err("should fail");
    match err {
        Error::AuthDenied(e) => assert!(e.contains("access_denied")),
        other => panic!("expected AuthDenied, got {:?}", other),
    }
}

#[test]
fn login_flow_end_to_end_exchanges_the_code() {
    let mut server = Server::new();

    let m = server
        .mock("POST", "/api/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            Matcher::UrlEncoded("client_id".into(), "cid".into()),
            Matcher::UrlEncoded("code".into(), "abc".into()),
            Matcher::Regex("code_verifier=".into()),
            Matcher::Regex("redirect_uri=".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "access_token": "at",
                "token_type": "Bearer",
                "scope": "playlist-read-private",
                "expires_in": 3600,
                "refresh_token": "rt"
            })
            .to_string(),
        )
        .create();

    let rt = tokio::runtime::Runtime::new().expect("rt");
    rt.block_on(async {
        let mut c = cfg("http://127.0.0.1:0/callback");
        c.token_url = format!("{}/api/token", server.url());

        let flow = LoginFlow::start(c).await.expect("start");
        let auth = Url::parse(flow.authorize_url()).expect("authorize url");
        let state = auth
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .expect("state");

        // Simulate the provider redirecting the browser back to us.
        let cb = format!("{}?code=abc&state={}", flow.redirect_uri(), state);
        let resp = reqwest::get(&cb).await.expect("callback request");
        assert_eq!(resp.status(), 200);

        let token = flow.finish(Duration::from_secs(5)).await.expect("finish");
        assert_eq!(token.access_token, "at");
        assert_eq!(token.refresh_token, "rt");
        assert!(token.expires_at > chrono::Utc::now().timestamp());
    });
    m.assert();
}

#[test]
fn exchange_reports_provider_error_envelope() {
    let mut server = Server::new();
    let _m = server
        .mock("POST", "/api/token")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"invalid_grant","error_description":"Invalid authorization code"}"#)
        .create();

    let mut c = OAuthConfig {
        client_id: "cid".into(),
        ..Default::default()
    };
    c.token_url = format!("{}/api/token", server.url());
    let client = OAuthClient::new(c);

    let rt = tokio::runtime::Runtime::new().expect("rt");
    let err = rt
        .block_on(client.exchange_code("http://localhost/cb", "bad", "verifier"))
        .expect_err("should fail");
    match err {
        Error::TokenExchange(msg) => {
            assert!(msg.contains("invalid_grant"));
            assert!(msg.contains("Invalid authorization code"));
        }
        other => panic!("expected TokenExchange, got {:?}", other),
    }
}

#[test]
fn exchange_requires_access_token_in_response() {
    let mut server = Server::new();
    let _m = server
        .mock("POST", "/api/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"token_type":"Bearer","expires_in":3600}"#)
        .create();

    let mut c = OAuthConfig {
        client_id: "cid".into(),
        ..Default::default()
    };
    c.token_url = format!("{}/api/token", server.url());
    let client = OAuthClient::new(c);

    let rt = tokio::runtime::Runtime::new().expect("rt");
    let err = rt
        .block_on(client.exchange_code("http://localhost/cb", "abc", "verifier"))
        .expect_err("should fail");
    assert!(matches!(err, Error::TokenExchange(_)));
}

#[test]
fn refresh_inherits_refresh_token_when_response_omits_it() {
    let mut server = Server::new();
    let m = server
        .mock("POST", "/api/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            Matcher::UrlEncoded("refresh_token".into(), "old-refresh".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "access_token": "new-access",
                "token_type": "Bearer",
                "expires_in": 3600
            })
            .to_string(),
        )
        .create();

    let mut c = OAuthConfig {
        client_id: "cid".into(),
        ..Default::default()
    };
    c.token_url = format!("{}/api/token", server.url());
    let client = OAuthClient::new(c);

    let rt = tokio::runtime::Runtime::new().expect("rt");
    let token = rt
        .block_on(client.refresh("old-refresh"))
        .expect("refresh");

    assert_eq!(token.access_token, "new-access");
    // The provider did not rotate it, so the request's token carries over.
    assert_eq!(token.refresh_token, "old-refresh");
    m.assert();
}

#[test]
fn refresh_with_empty_token_fails_without_network() {
    // No server at all: the call must not get that far.
    let client = OAuthClient::new(OAuthConfig {
        client_id: "cid".into(),
        token_url: "http://127.0.0.1:1/api/token".into(),
        ..Default::default()
    });

    let rt = tokio::runtime::Runtime::new().expect("rt");
    let err = rt.block_on(client.refresh("")).expect_err("should fail");
    assert!(matches!(err, Error::MissingRefreshToken));
}

#[test]
fn refresh_reports_provider_error_envelope() {
    let mut server = Server::new();
    let _m = server
        .mock("POST", "/api/token")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"invalid_client","error_description":"Revoked"}"#)
        .create();

    let mut c = OAuthConfig {
        client_id: "cid".into(),
        ..Default::default()
    };
    c.token_url = format!("{}/api/token", server.url());
    let client = OAuthClient::new(c);

    let rt = tokio::runtime::Runtime::new().expect("rt");
    let err = rt
        .block_on(client.refresh("some-refresh"))
        .expect_err("should fail");
    match err {
        Error::TokenRefresh(msg) => assert!(msg.contains("invalid_client")),
        other => panic!("expected TokenRefresh, got {:?}", other),
    }
}
