//! Credential gate and OAuth flow
//!
//! Decides whether a stored token bundle is usable, refreshes it silently
//! when possible, and falls back to browser-based consent via a loopback
//! callback listener. Every successful refresh persists the new bundle
//! before it is handed out.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};

/// Scopes requested during consent
///
/// `gmail.modify` covers read, search, and label changes (archive);
/// `gmail.send` exists for the live integration harness.
pub const SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/gmail.send",
];

/// Tokens expiring within this window are treated as already expired
const EXPIRY_SKEW_SECONDS: i64 = 60;

/// Stored credential material
///
/// Never mutated in place: a refresh produces a new bundle that replaces the
/// stored one. Endpoint and client fields are captured at creation so
/// refresh works without re-reading the OAuth client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBundle {
    /// Bearer token for Gmail API calls
    pub access_token: String,
    /// Refresh token, absent when Google did not grant offline access
    pub refresh_token: Option<String>,
    /// Scopes granted with this bundle
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Access token expiry; `None` means no known expiry
    pub expires_at: Option<DateTime<Utc>>,
    /// Token endpoint used for refresh
    pub token_uri: String,
    /// OAuth client ID this bundle was issued to
    pub client_id: String,
    /// OAuth client secret paired with `client_id`
    pub client_secret: String,
}

/// Usability of a token bundle at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessState {
    /// Access token usable now
    Valid,
    /// Expired, but a refresh token is present
    NeedsRefresh,
    /// Expired with no refresh token; only interactive consent helps
    Unusable,
}

impl TokenBundle {
    /// Classify this bundle's usability at `now`
    pub fn access_state(&self, now: DateTime<Utc>) -> AccessState {
        if !self.is_expired(now) {
            AccessState::Valid
        } else if self.refresh_token.is_some() {
            AccessState::NeedsRefresh
        } else {
            AccessState::Unusable
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now + Duration::seconds(EXPIRY_SKEW_SECONDS),
            None => false,
        }
    }

    /// Whether this bundle's granted scopes cover all required ones
    pub fn covers_scopes(&self, required: &[&str]) -> bool {
        required
            .iter()
            .all(|scope| self.scopes.iter().any(|granted| granted == scope))
    }
}

/// Opaque durable secret storage for the token bundle
///
/// Single value, last-write-wins. The production implementation is a JSON
/// file under the config directory.
pub trait TokenStore: Send + Sync {
    /// Load the stored bundle, `None` if absent or unreadable
    fn load(&self) -> AppResult<Option<TokenBundle>>;
    /// Replace the stored bundle
    fn save(&self, bundle: &TokenBundle) -> AppResult<()>;
}

/// File-backed token store
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> AppResult<Option<TokenBundle>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AppError::Internal(format!(
                    "failed reading token file {}: {e}",
                    self.path.display()
                )));
            }
        };

        // An unreadable bundle is treated as absent: the caller falls back
        // to interactive consent rather than erroring out permanently.
        Ok(serde_json::from_str(&raw).ok())
    }

    fn save(&self, bundle: &TokenBundle) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Internal(format!(
                    "failed creating config directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let serialized = serde_json::to_string_pretty(bundle)
            .map_err(|e| AppError::Internal(format!("failed serializing token bundle: {e}")))?;
        fs::write(&self.path, serialized).map_err(|e| {
            AppError::Internal(format!(
                "failed writing token file {}: {e}",
                self.path.display()
            ))
        })
    }
}

/// OAuth client configuration from Google Cloud Console
#[derive(Debug)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: SecretString,
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecretsEntry>,
    web: Option<ClientSecretsEntry>,
}

#[derive(Debug, Deserialize)]
struct ClientSecretsEntry {
    client_id: String,
    client_secret: String,
}

impl ClientSecrets {
    /// Load `credentials.json` (installed-app or web client format)
    ///
    /// # Errors
    ///
    /// `CredentialsFileMissing` when the file does not exist; this is
    /// reported to the user, not retried.
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            return Err(AppError::CredentialsFileMissing(path.to_path_buf()));
        }

        let raw = fs::read_to_string(path).map_err(|e| {
            AppError::AuthFlow(format!("failed reading {}: {e}", path.display()))
        })?;
        let file: ClientSecretsFile = serde_json::from_str(&raw)
            .map_err(|e| AppError::AuthFlow(format!("malformed credentials file: {e}")))?;
        let entry = file.installed.or(file.web).ok_or_else(|| {
            AppError::AuthFlow("credentials file has no 'installed' or 'web' client".to_owned())
        })?;

        Ok(Self {
            client_id: entry.client_id,
            client_secret: SecretString::new(entry.client_secret.into()),
        })
    }
}

/// Token endpoint response (code exchange and refresh)
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
}

/// Credential gate
///
/// Wraps the token store with the decision logic of when a refresh or a
/// full interactive consent is needed. Refresh-then-persist is serialized
/// behind a mutex so concurrent tool calls observing an expired token do
/// not race each other into duplicate consent flows.
pub struct Authenticator {
    config: Arc<ServerConfig>,
    store: Arc<dyn TokenStore>,
    http: reqwest::Client,
    refresh_lock: Mutex<()>,
}

impl Authenticator {
    pub fn new(
        config: Arc<ServerConfig>,
        store: Arc<dyn TokenStore>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            config,
            store,
            http,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Whether a token bundle is stored at all
    ///
    /// Existence only; no validity check.
    pub fn is_authenticated(&self) -> bool {
        matches!(self.store.load(), Ok(Some(_)))
    }

    /// Produce an access token usable right now
    ///
    /// Refreshes and persists first when the stored bundle is expired.
    ///
    /// # Errors
    ///
    /// - `NotAuthenticated` when no bundle is stored
    /// - `ServiceUnavailable` when the bundle is unusable or refresh fails
    pub async fn access_token(&self) -> AppResult<String> {
        let bundle = self.store.load()?.ok_or(AppError::NotAuthenticated)?;
        match bundle.access_state(Utc::now()) {
            AccessState::Valid => Ok(bundle.access_token),
            AccessState::NeedsRefresh => {
                let _guard = self.refresh_lock.lock().await;
                // Another call may have refreshed while we waited on the lock.
                let current = self.store.load()?.ok_or(AppError::NotAuthenticated)?;
                if current.access_state(Utc::now()) == AccessState::Valid {
                    return Ok(current.access_token);
                }

                let refreshed = self.refresh_and_persist(&current).await.map_err(|e| {
                    warn!(error = %e, "silent token refresh failed");
                    AppError::ServiceUnavailable
                })?;
                Ok(refreshed.access_token)
            }
            AccessState::Unusable => Err(AppError::ServiceUnavailable),
        }
    }

    /// Run the full authenticate flow, returning a usable bundle
    ///
    /// Stored-valid bundles with covering scopes skip consent entirely.
    /// Expired-but-refreshable bundles are refreshed silently; only when
    /// that fails (or scopes are missing) does the browser consent flow run.
    pub async fn authenticate(&self) -> AppResult<TokenBundle> {
        if let Some(bundle) = self.store.load()? {
            let covers = bundle.covers_scopes(&SCOPES);
            match bundle.access_state(Utc::now()) {
                AccessState::Valid if covers => return Ok(bundle),
                AccessState::NeedsRefresh if covers => {
                    let _guard = self.refresh_lock.lock().await;
                    match self.refresh_and_persist(&bundle).await {
                        Ok(fresh) => return Ok(fresh),
                        Err(e) => warn!(error = %e, "refresh failed; falling back to consent"),
                    }
                }
                _ => {}
            }
        }

        let secrets = ClientSecrets::load(&self.config.credentials_path)?;
        let bundle = self.interactive_consent(&secrets).await?;
        self.store.save(&bundle)?;
        Ok(bundle)
    }

    /// Refresh the access token and persist the new bundle
    ///
    /// The bundle is persisted before being returned; a bundle whose persist
    /// failed is never handed out.
    async fn refresh_and_persist(&self, bundle: &TokenBundle) -> AppResult<TokenBundle> {
        let refreshed = self.refresh(bundle).await?;
        self.store.save(&refreshed)?;
        Ok(refreshed)
    }

    async fn refresh(&self, bundle: &TokenBundle) -> AppResult<TokenBundle> {
        let refresh_token = bundle
            .refresh_token
            .as_deref()
            .ok_or(AppError::ServiceUnavailable)?;

        let response = self
            .http
            .post(&bundle.token_uri)
            .form(&[
                ("client_id", bundle.client_id.as_str()),
                ("client_secret", bundle.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| AppError::AuthFlow(format!("token refresh request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::AuthFlow(format!("failed reading refresh response: {e}")))?;
        if !status.is_success() {
            return Err(AppError::AuthFlow(format!(
                "token refresh rejected with status {status}"
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AppError::AuthFlow(format!("malformed refresh response: {e}")))?;

        Ok(assemble_bundle(
            token,
            // Google omits the refresh token on refresh responses.
            Some(refresh_token.to_owned()),
            &bundle.scopes,
            bundle.token_uri.clone(),
            bundle.client_id.clone(),
            bundle.client_secret.clone(),
        ))
    }

    /// Browser-based consent with a loopback callback listener
    async fn interactive_consent(&self, secrets: &ClientSecrets) -> AppResult<TokenBundle> {
        let (listener, port) =
            bind_loopback(self.config.oauth_port_start, self.config.oauth_port_end)?;
        let redirect_uri = format!("http://localhost:{port}");
        let scope = SCOPES.join(" ");
        let consent_url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            self.config.auth_url,
            urlencoding::encode(&secrets.client_id),
            urlencoding::encode(&redirect_uri),
            urlencoding::encode(&scope),
        );

        info!(url = %consent_url, "opening browser for Gmail consent");
        if let Err(e) = open::that(&consent_url) {
            warn!(error = %e, "failed to open browser; visit the consent URL manually");
        }

        let code = tokio::task::spawn_blocking(move || wait_for_callback(&listener))
            .await
            .map_err(|e| AppError::Internal(format!("callback listener task failed: {e}")))??;

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("client_id", secrets.client_id.as_str()),
                ("client_secret", secrets.client_secret.expose_secret()),
                ("code", code.as_str()),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::AuthFlow(format!("code exchange request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::AuthFlow(format!("failed reading exchange response: {e}")))?;
        if !status.is_success() {
            return Err(AppError::AuthFlow(format!(
                "code exchange rejected with status {status}"
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AppError::AuthFlow(format!("malformed exchange response: {e}")))?;
        let requested_scopes: Vec<String> = SCOPES.iter().map(|s| (*s).to_owned()).collect();

        Ok(assemble_bundle(
            token,
            None,
            &requested_scopes,
            self.config.token_url.clone(),
            secrets.client_id.clone(),
            secrets.client_secret.expose_secret().to_owned(),
        ))
    }
}

/// Build a bundle from a token endpoint response
///
/// `fallback_refresh_token` and `fallback_scopes` fill fields the response
/// omitted.
fn assemble_bundle(
    token: TokenResponse,
    fallback_refresh_token: Option<String>,
    fallback_scopes: &[String],
    token_uri: String,
    client_id: String,
    client_secret: String,
) -> TokenBundle {
    let scopes = token
        .scope
        .map(|s| s.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_else(|| fallback_scopes.to_vec());

    TokenBundle {
        access_token: token.access_token,
        refresh_token: token.refresh_token.or(fallback_refresh_token),
        scopes,
        expires_at: token
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs)),
        token_uri,
        client_id,
        client_secret,
    }
}

/// Bind the loopback callback listener on the first free port in range
fn bind_loopback(start: u16, end: u16) -> AppResult<(TcpListener, u16)> {
    for port in start..=end {
        if let Ok(listener) = TcpListener::bind(("127.0.0.1", port)) {
            return Ok((listener, port));
        }
    }
    Err(AppError::AuthFlow(format!(
        "could not bind a loopback port in range {start}..{end}"
    )))
}

/// Block until the OAuth redirect arrives, returning the authorization code
fn wait_for_callback(listener: &TcpListener) -> AppResult<String> {
    let (mut stream, _) = listener
        .accept()
        .map_err(|e| AppError::AuthFlow(format!("callback accept failed: {e}")))?;

    let mut reader = BufReader::new(&stream);
    let mut request_line = String::new();
    reader
        .read_line(&mut request_line)
        .map_err(|e| AppError::AuthFlow(format!("callback read failed: {e}")))?;

    let (code, error) = callback_params(&request_line);

    let (status, message) = if code.is_some() {
        ("200 OK", "Authentication successful! You can close this window.")
    } else {
        ("400 Bad Request", "Authentication failed. Please try again.")
    };
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body><h1>{message}</h1></body></html>"
    );
    let _ = stream.write_all(response.as_bytes());

    if let Some(err) = error {
        return Err(AppError::AuthFlow(format!("consent denied: {err}")));
    }
    code.ok_or_else(|| AppError::AuthFlow("no authorization code received".to_owned()))
}

/// Extract `code` and `error` query parameters from the request line
///
/// Format: `GET /?code=AUTH_CODE&scope=... HTTP/1.1`
fn callback_params(request_line: &str) -> (Option<String>, Option<String>) {
    let query = request_line
        .split_whitespace()
        .nth(1)
        .and_then(|path| path.split_once('?'))
        .map(|(_, query)| query);
    let Some(query) = query else {
        return (None, None);
    };

    let mut code = None;
    let mut error = None;
    for param in query.split('&') {
        if let Some((key, value)) = param.split_once('=') {
            let decoded = urlencoding::decode(value)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| value.to_owned());
            match key {
                "code" => code = Some(decoded),
                "error" => error = Some(decoded),
                _ => {}
            }
        }
    }
    (code, error)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{
        AccessState, ClientSecrets, FileTokenStore, SCOPES, TokenBundle, TokenStore,
        callback_params,
    };
    use crate::errors::AppError;

    fn bundle(expires_in_secs: i64, refresh_token: Option<&str>) -> TokenBundle {
        TokenBundle {
            access_token: "access".to_owned(),
            refresh_token: refresh_token.map(str::to_owned),
            scopes: SCOPES.iter().map(|s| (*s).to_owned()).collect(),
            expires_at: Some(Utc::now() + Duration::seconds(expires_in_secs)),
            token_uri: "https://oauth2.googleapis.com/token".to_owned(),
            client_id: "client".to_owned(),
            client_secret: "secret".to_owned(),
        }
    }

    #[test]
    fn unexpired_bundle_is_valid() {
        assert_eq!(
            bundle(3_600, Some("refresh")).access_state(Utc::now()),
            AccessState::Valid
        );
    }

    #[test]
    fn expired_bundle_with_refresh_token_needs_refresh() {
        assert_eq!(
            bundle(-10, Some("refresh")).access_state(Utc::now()),
            AccessState::NeedsRefresh
        );
    }

    #[test]
    fn expired_bundle_without_refresh_token_is_unusable() {
        assert_eq!(
            bundle(-10, None).access_state(Utc::now()),
            AccessState::Unusable
        );
    }

    #[test]
    fn expiry_skew_counts_nearly_expired_tokens_as_expired() {
        assert_eq!(
            bundle(30, Some("refresh")).access_state(Utc::now()),
            AccessState::NeedsRefresh
        );
    }

    #[test]
    fn bundle_without_expiry_is_valid() {
        let mut b = bundle(0, None);
        b.expires_at = None;
        assert_eq!(b.access_state(Utc::now()), AccessState::Valid);
    }

    #[test]
    fn covers_scopes_requires_every_required_scope() {
        let b = bundle(3_600, None);
        assert!(b.covers_scopes(&SCOPES));
        assert!(!b.covers_scopes(&["https://www.googleapis.com/auth/gmail.labels"]));

        let mut partial = b;
        partial.scopes.pop();
        assert!(!partial.covers_scopes(&SCOPES));
    }

    #[test]
    fn file_store_roundtrips_bundle() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = FileTokenStore::new(dir.path().join("nested").join("token.json"));

        assert!(store.load().expect("load").is_none());

        let original = bundle(3_600, Some("refresh"));
        store.save(&original).expect("save");
        let loaded = store.load().expect("load").expect("bundle present");
        assert_eq!(loaded.access_token, original.access_token);
        assert_eq!(loaded.refresh_token, original.refresh_token);
        assert_eq!(loaded.scopes, original.scopes);
    }

    #[test]
    fn file_store_treats_malformed_bundle_as_absent() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("token.json");
        std::fs::write(&path, "{not json").expect("seed file");

        let store = FileTokenStore::new(path);
        assert!(store.load().expect("load").is_none());
    }

    #[test]
    fn missing_credentials_file_is_reported() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let err = ClientSecrets::load(&dir.path().join("credentials.json"))
            .expect_err("must report missing file");
        assert!(matches!(err, AppError::CredentialsFileMissing(_)));
        assert!(err.to_string().contains("credentials.json not found"));
    }

    #[test]
    fn loads_installed_app_credentials() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("credentials.json");
        std::fs::write(
            &path,
            r#"{"installed": {"client_id": "id-123", "client_secret": "s3cret"}}"#,
        )
        .expect("seed file");

        let secrets = ClientSecrets::load(&path).expect("load secrets");
        assert_eq!(secrets.client_id, "id-123");
    }

    #[test]
    fn callback_params_extracts_code() {
        let (code, error) = callback_params("GET /?code=abc%2Fdef&scope=x HTTP/1.1");
        assert_eq!(code.as_deref(), Some("abc/def"));
        assert!(error.is_none());
    }

    #[test]
    fn callback_params_extracts_error() {
        let (code, error) = callback_params("GET /?error=access_denied HTTP/1.1");
        assert!(code.is_none());
        assert_eq!(error.as_deref(), Some("access_denied"));
    }

    #[test]
    fn callback_params_handles_missing_query() {
        assert_eq!(callback_params("GET /favicon.ico HTTP/1.1"), (None, None));
    }
}
