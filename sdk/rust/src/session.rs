//! Per-service session state.
//!
//! A [`Session`] holds the bearer token, the selected authentication app,
//! the consistency bookkeeping and the transient state of a challenge
//! response login. It is shared by every schema and object of a service.

use mrs_core::{ConsistencyTracker, ResourceMetadata, ResourceObject};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Outcome of a login attempt.
///
/// Rejected credentials are reported here rather than as errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl LoginResult {
    /// A successful login with its token.
    pub fn success(auth_app: impl Into<String>, jwt: impl Into<String>) -> Self {
        Self {
            auth_app: Some(auth_app.into()),
            jwt: Some(jwt.into()),
            ..Default::default()
        }
    }

    /// A rejected login.
    pub fn failure(auth_app: Option<String>, code: u16, message: impl Into<String>) -> Self {
        Self {
            auth_app,
            jwt: None,
            error_code: Some(code),
            error_message: Some(message.into()),
        }
    }

    /// Whether a token was obtained.
    pub fn is_success(&self) -> bool {
        self.jwt.is_some() && self.error_code.is_none()
    }
}

/// Server reply to the first message of a challenge response login.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthChallenge {
    pub nonce: String,
    pub iterations: u32,
    pub salt: Vec<u8>,
    #[serde(default)]
    pub session: Option<String>,
}

/// Transcript of an in-flight challenge response login.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginState {
    pub user_name: Option<String>,
    pub client_first: Option<String>,
    pub server_first: Option<String>,
    pub client_final: Option<String>,
    pub challenge: Option<AuthChallenge>,
}

#[derive(Debug, Default)]
struct SessionState {
    access_token: Option<String>,
    auth_app: Option<String>,
    tracker: ConsistencyTracker,
    login: LoginState,
}

/// Shared, internally synchronized session.
#[derive(Debug, Default)]
pub struct Session {
    state: RwLock<SessionState>,
}

impl Session {
    /// An anonymous session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an earlier login, for example one performed by a host
    /// application.
    pub fn from_login(login: &LoginResult) -> Self {
        let session = Self::new();
        {
            let mut state = session.state.write();
            state.access_token = login.jwt.clone();
            state.auth_app = login.auth_app.clone();
        }
        session
    }

    /// The bearer token, if signed in.
    pub fn access_token(&self) -> Option<String> {
        self.state.read().access_token.clone()
    }

    /// Whether a bearer token is held.
    pub fn is_authenticated(&self) -> bool {
        self.state.read().access_token.is_some()
    }

    /// The authentication app of the current login.
    pub fn auth_app(&self) -> Option<String> {
        self.state.read().auth_app.clone()
    }

    /// Sets the authentication app.
    pub fn set_auth_app(&self, auth_app: impl Into<String>) {
        self.state.write().auth_app = Some(auth_app.into());
    }

    /// Sets the bearer token.
    pub fn set_access_token(&self, token: impl Into<String>) {
        self.state.write().access_token = Some(token.into());
    }

    /// Drops the bearer token.
    pub fn clear_access_token(&self) {
        self.state.write().access_token = None;
    }

    /// The last GTID seen on a write.
    pub fn gtid(&self) -> Option<String> {
        self.state.read().tracker.gtid().map(str::to_string)
    }

    /// The `$asof` value for a request.
    pub fn as_of(&self, read_own_writes: bool) -> Option<String> {
        self.state
            .read()
            .tracker
            .as_of(read_own_writes)
            .map(str::to_string)
    }

    /// Records the GTID of a write.
    pub fn observe_gtid(&self, gtid: Option<&str>) {
        self.state.write().tracker.observe_gtid(gtid);
    }

    /// Records the GTID found in `_metadata`.
    pub fn observe_metadata(&self, metadata: Option<&ResourceMetadata>) {
        self.state.write().tracker.observe_metadata(metadata);
    }

    /// Remembers the ETag of a resource.
    pub fn record_etag<T>(&self, resource: &ResourceObject<T>) {
        self.state.write().tracker.record_etag(resource);
    }

    /// The ETag last seen for a resource URL.
    pub fn etag_for(&self, url: &str) -> Option<String> {
        self.state
            .read()
            .tracker
            .etag_for(url)
            .map(str::to_string)
    }

    /// Where the login handshake currently stands.
    pub fn login_state(&self) -> LoginState {
        self.state.read().login.clone()
    }

    pub(crate) fn set_login_state(&self, login: LoginState) {
        self.state.write().login = login;
    }

    /// Forgets the token, the auth app, the consistency bookkeeping and any
    /// handshake in progress.
    pub fn reset(&self) {
        let mut state = self.state.write();
        state.access_token = None;
        state.auth_app = None;
        state.tracker.clear();
        state.login = LoginState::default();
    }
}
