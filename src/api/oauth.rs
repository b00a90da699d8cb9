use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::mpsc;
use url::Url;

use crate::api::callback::{CallbackEvent, CallbackReceiver};
use crate::api::pkce::{random_url_safe, Pkce};
use crate::api::token::{Token, TokenRefresher};
use crate::error::{Error, Result};

pub const AUTH_URL: &str = "https://accounts.spotify.com/authorize";
pub const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Everything the login flow and the refresher need. Endpoint URLs are
/// plain fields (defaulting to the Spotify endpoints) so tests can point
/// a client at a mock server without ambient state.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub user_agent: Option<String>,
    pub tls_cert_file: Option<PathBuf>,
    pub tls_key_file: Option<PathBuf>,
    pub auth_url: String,
    pub token_url: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            redirect_uri: String::new(),
            scopes: Vec::new(),
            user_agent: None,
            tls_cert_file: None,
            tls_key_file: None,
            auth_url: AUTH_URL.into(),
            token_url: TOKEN_URL.into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    scope: String,
    #[serde(default)]
    expires_in: i64,
    #[serde(default)]
    refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

/// Talks to the provider's token endpoint: code exchange and refresh.
pub struct OAuthClient {
    http: Client,
    cfg: OAuthConfig,
}

impl OAuthClient {
    pub fn new(cfg: OAuthConfig) -> Self {
        Self {
            http: Client::new(),
            cfg,
        }
    }

    pub fn with_http_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.cfg
    }

    /// Exchange an authorization code for a token pair
    /// (grant_type=authorization_code with the PKCE verifier).
    pub async fn exchange_code(
        &self,
        redirect_uri: &str,
        code: &str,
        verifier: &str,
    ) -> Result<Token> {
        let form = [
            ("client_id", self.cfg.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", verifier),
        ];
        let (status, body) = self.send_token_request(&form).await?;

        if !(200..300).contains(&status) {
            let te: TokenErrorResponse = serde_json::from_slice(&body).unwrap_or_default();
            if !te.error.is_empty() {
                return Err(Error::TokenExchange(format!(
                    "{} ({})",
                    te.error, te.error_description
                )));
            }
            return Err(Error::TokenExchange(format!("http {}", status)));
        }

        let tr: TokenResponse = serde_json::from_slice(&body)?;
        if tr.access_token.is_empty() {
            return Err(Error::TokenExchange("missing access_token in response".into()));
        }
        Ok(Token {
            access_token: tr.access_token,
            token_type: tr.token_type,
            scope: tr.scope,
            expires_at: Utc::now().timestamp() + tr.expires_in,
            refresh_token: tr.refresh_token,
        })
    }

    /// Refresh a token pair. Fails without a network call when the
    /// refresh token is empty. Providers don't always rotate the refresh
    /// token; when the response omits one, the request's token carries
    /// over.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Token> {
        if refresh_token.is_empty() {
            return Err(Error::MissingRefreshToken);
        }
        let form = [
            ("client_id", self.cfg.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let (status, body) = self.send_token_request(&form).await?;

        if !(200..300).contains(&status) {
            let te: TokenErrorResponse = serde_json::from_slice(&body).unwrap_or_default();
            if !te.error.is_empty() {
                return Err(Error::TokenRefresh(format!(
                    "{} ({})",
                    te.error, te.error_description
                )));
            }
            return Err(Error::TokenRefresh(format!("http {}", status)));
        }

        let tr: TokenResponse = serde_json::from_slice(&body)?;
        if tr.access_token.is_empty() {
            return Err(Error::TokenRefresh(
                "missing access_token in refresh response".into(),
            ));
        }
        let new_refresh = if tr.refresh_token.is_empty() {
            refresh_token.to_string()
        } else {
            tr.refresh_token
        };
        Ok(Token {
            access_token: tr.access_token,
            token_type: tr.token_type,
            scope: tr.scope,
            expires_at: Utc::now().timestamp() + tr.expires_in,
            refresh_token: new_refresh,
        })
    }

    async fn send_token_request(&self, form: &[(&str, &str)]) -> Result<(u16, Vec<u8>)> {
        let mut req = self.http.post(&self.cfg.token_url).form(form);
        if let Some(ua) = &self.cfg.user_agent {
            req = req.header(reqwest::header::USER_AGENT, ua);
        }
        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await?.to_vec();
        Ok((status, body))
    }
}

#[async_trait]
impl TokenRefresher for OAuthClient {
    async fn refresh_token(&self, refresh_token: &str) -> Result<Token> {
        self.refresh(refresh_token).await
    }
}

/// One PKCE login attempt:
/// validate config, generate PKCE pair + state, bind the callback
/// receiver, build the authorization URL. The caller hands the URL to the
/// browser (or prints it) and then awaits `finish`.
pub struct LoginFlow {
    oauth: OAuthClient,
    receiver: CallbackReceiver,
    events: mpsc::Receiver<CallbackEvent>,
    authorize_url: String,
    redirect_uri: String,
    verifier: String,
}

impl LoginFlow {
    pub async fn start(cfg: OAuthConfig) -> Result<Self> {
        if cfg.client_id.trim().is_empty() {
            return Err(Error::Config("client id is required".into()));
        }
        if cfg.redirect_uri.trim().is_empty() {
            return Err(Error::Config("redirect uri is required".into()));
        }

        let redirect = Url::parse(&cfg.redirect_uri)?;
        match redirect.scheme() {
            "http" | "https" => {}
            s => {
                return Err(Error::Config(format!(
                    "redirect uri scheme must be http or https (got {:?})",
                    s
                )))
            }
        }
        let host = redirect
            .host_str()
            .ok_or_else(|| {
                Error::Config(format!(
                    "redirect uri must include host (got {:?})",
                    cfg.redirect_uri
                ))
            })?
            .to_string();
        let tls = if redirect.scheme() == "https" {
            match (&cfg.tls_cert_file, &cfg.tls_key_file) {
                (Some(c), Some(k)) => Some((c.clone(), k.clone())),
                _ => {
                    return Err(Error::Config(
                        "https redirect requires tls_cert_file and tls_key_file".into(),
                    ))
                }
            }
        } else {
            None
        };

        let pkce = Pkce::new()?;
        let state = random_url_safe(24)?;

        let port = redirect
            .port()
            .unwrap_or(if redirect.scheme() == "https" { 443 } else { 80 });
        let (receiver, events) = CallbackReceiver::bind(
            &host,
            port,
            redirect.path(),
            &state,
            tls.as_ref().map(|(c, k)| (c.as_path(), k.as_path())),
        )
        .await?;

        // Only rewrite when the caller explicitly asked for ":0"; keep the
        // configured hostname so a registered redirect still matches.
        let mut redirect_uri = cfg.redirect_uri.clone();
        if redirect.port() == Some(0) {
            let mut rewritten = redirect.clone();
            rewritten
                .set_port(Some(receiver.local_addr().port()))
                .map_err(|_| Error::Config("cannot set redirect port".into()))?;
            redirect_uri = rewritten.to_string();
        }

        let mut authorize = Url::parse(&cfg.auth_url)?;
        {
            let mut q = authorize.query_pairs_mut();
            q.append_pair("client_id", &cfg.client_id)
                .append_pair("response_type", "code")
                .append_pair("redirect_uri", &redirect_uri)
                .append_pair("state", &state)
                .append_pair("code_challenge_method", "S256")
                .append_pair("code_challenge", &pkce.challenge);
            if !cfg.scopes.is_empty() {
                q.append_pair("scope", &cfg.scopes.join(" "));
            }
        }

        Ok(Self {
            oauth: OAuthClient::new(cfg),
            receiver,
            events,
            authorize_url: authorize.to_string(),
            redirect_uri,
            verifier: pkce.verifier,
        })
    }

    pub fn authorize_url(&self) -> &str {
        &self.authorize_url
    }

    /// Redirect URI as sent to the provider (port-rewritten when ":0" was
    /// configured).
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Wait for the browser redirect, then exchange the code. The
    /// listener is torn down on every path: code, provider error, or
    /// timeout.
    pub async fn finish(mut self, timeout: Duration) -> Result<Token> {
        let outcome = tokio::select! {
            _ = tokio::time::sleep(timeout) => Err(Error::LoginTimeout),
            ev = self.events.recv() => match ev {
                Some(CallbackEvent::Code(code)) => Ok(code),
                Some(CallbackEvent::Error(e)) => Err(Error::AuthDenied(e)),
                None => Err(Error::AuthDenied("callback listener closed unexpectedly".into())),
            },
        };
        self.receiver.shutdown().await;

        let code = outcome?;
        self.oauth
            .exchange_code(&self.redirect_uri, &code, &self.verifier)
            .await
    }
}

/// Hand a URL to the system browser. Failure is non-fatal to the login
/// flow; callers print the authorization URL as a fallback.
pub fn open_in_browser(url: &str) -> Result<()> {
    webbrowser::open(url)?;
    Ok(())
}
