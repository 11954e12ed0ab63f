//! Authentication.
//!
//! Two flows lead to a bearer token:
//!
//! - delegated: username and password are posted in one request and the
//!   selected app checks them;
//! - native: a challenge response handshake where the password never leaves
//!   the client (see [`crate::scram`]).
//!
//! Rejected credentials are reported through [`LoginResult`], not as errors.

use crate::error::{ErrorCode, MrsError, MrsResult};
use crate::gateway::{to_pretty_json, FetchOptions};
use crate::http::HttpResponse;
use crate::scram;
use crate::service::MrsService;
use crate::session::{AuthChallenge, LoginResult, LoginState};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Vendor id of the built-in MRS authentication.
pub const MRS_VENDOR_ID: &str = "0x30000000000000000000000000000000";

/// An authentication app of the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthApp {
    pub name: String,
    #[serde(rename = "vendorId", alias = "vendor_id")]
    pub vendor_id: String,
}

impl AuthApp {
    pub fn is_native(&self) -> bool {
        self.vendor_id == MRS_VENDOR_ID
    }
}

/// Reply of the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
}

impl AuthStatus {
    pub fn unauthorized() -> Self {
        Self {
            status: "unauthorized".to_string(),
            user: None,
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.status == "authorized"
    }
}

/// Arguments of [`MrsService::authenticate`].
#[derive(Debug, Clone, Default)]
pub struct AuthenticateOptions {
    pub auth_app: String,
    pub username: String,
    pub password: String,
    /// Looked up through the auth app listing when absent.
    pub vendor_id: Option<String>,
}

impl AuthenticateOptions {
    pub fn new(
        auth_app: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            auth_app: auth_app.into(),
            username: username.into(),
            password: password.into(),
            vendor_id: None,
        }
    }

    pub fn vendor_id(mut self, vendor_id: impl Into<String>) -> Self {
        self.vendor_id = Some(vendor_id.into());
        self
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
}

impl MrsService {
    fn auth_endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.config().auth_path, name)
    }

    /// Lists the authentication apps of the service.
    pub async fn get_auth_apps(&self) -> MrsResult<Vec<AuthApp>> {
        let config = self.config();
        let response = self
            .gateway
            .do_fetch(
                &self.auth_endpoint("authApps"),
                FetchOptions::get()
                    .timeout(config.auth_apps_timeout)
                    .error_msg("Failed to fetch Authentication Apps.")
                    .unchecked(),
            )
            .await?;

        if !response.is_success() {
            let mut message = format!(
                "Failed to fetch Authentication Apps.\n\n\
                 Please ensure MySQL Router is running and the REST endpoint {}{}/authApps is accessible. ({}:{})",
                config.url, config.auth_path, response.status, response.status_text
            );
            if let Ok(info) = serde_json::from_str::<Value>(&response.body) {
                message.push_str(&format!("\n\n{}\n", to_pretty_json(&info)));
            }
            return Err(MrsError::new(ErrorCode::HttpError, message).with_status(response.status));
        }

        response.parse()
    }

    /// The current authentication status. Failures read as unauthorized.
    pub async fn authentication_status(&self) -> AuthStatus {
        let result = self
            .gateway
            .fetch_json::<AuthStatus>(
                &self.auth_endpoint("status"),
                FetchOptions::get().error_msg("Failed to authenticate."),
            )
            .await;
        match result {
            Ok(status) => status,
            Err(error) => {
                debug!(code = %error.code, "status check failed");
                AuthStatus::unauthorized()
            }
        }
    }

    /// Signs in with the flow matching the app's vendor.
    pub async fn authenticate(&self, options: AuthenticateOptions) -> MrsResult<LoginResult> {
        let AuthenticateOptions {
            auth_app,
            username,
            password,
            vendor_id,
        } = options;

        if auth_app.is_empty() {
            return Ok(no_auth_app());
        }

        let vendor_id = match vendor_id {
            Some(vendor_id) => Some(vendor_id),
            None => self
                .get_auth_apps()
                .await?
                .into_iter()
                .find(|app| app.name == auth_app)
                .map(|app| app.vendor_id),
        };
        let Some(vendor_id) = vendor_id else {
            return Ok(LoginResult::failure(
                Some(auth_app.clone()),
                1,
                format!("The authentication app \"{}\" does not exist.", auth_app),
            ));
        };

        if vendor_id == MRS_VENDOR_ID {
            self.send_client_first(&auth_app, &username).await?;
            self.send_client_final(&password).await
        } else {
            self.verify_credentials(&auth_app, &username, &password).await
        }
    }

    /// Delegated login in a single request.
    pub async fn verify_credentials(
        &self,
        auth_app: &str,
        username: &str,
        password: &str,
    ) -> MrsResult<LoginResult> {
        if auth_app.is_empty() {
            return Ok(no_auth_app());
        }

        let body = json!({
            "username": username,
            "password": password,
            "authApp": auth_app,
            "sessionType": "bearer",
        });
        let response = self
            .gateway
            .do_fetch(
                &self.auth_endpoint("login"),
                FetchOptions::post()
                    .body(body)
                    .error_msg("The sign in failed.")
                    .unchecked(),
            )
            .await?;

        Ok(self.complete_login(auth_app, &response))
    }

    /// First message of the native handshake. Stores the transcript in the
    /// session for [`MrsService::send_client_final`].
    pub async fn send_client_first(&self, auth_app: &str, user: &str) -> MrsResult<AuthChallenge> {
        let session = self.session();
        session.set_auth_app(auth_app);

        let nonce = scram::client_nonce();
        let body = json!({
            "authApp": auth_app,
            "user": user,
            "nonce": nonce,
            "sessionType": "bearer",
        });
        let challenge: AuthChallenge = self
            .gateway
            .fetch_json(
                &self.auth_endpoint("login"),
                FetchOptions::post()
                    .body(body)
                    .error_msg("The sign in failed."),
            )
            .await?;

        session.set_login_state(LoginState {
            user_name: Some(user.to_string()),
            client_first: Some(scram::client_first(user, &nonce)),
            server_first: Some(scram::server_first(
                &challenge.nonce,
                &challenge.salt,
                challenge.iterations,
            )),
            client_final: Some(scram::client_final(&challenge.nonce)),
            challenge: Some(challenge.clone()),
        });

        Ok(challenge)
    }

    /// Second message of the native handshake: proves knowledge of the
    /// password.
    pub async fn send_client_final(&self, password: &str) -> MrsResult<LoginResult> {
        let session = self.session();
        let auth_app = session.auth_app();
        let LoginState {
            client_first: Some(client_first),
            server_first: Some(server_first),
            client_final: Some(client_final),
            challenge: Some(challenge),
            ..
        } = session.login_state()
        else {
            return Ok(no_password(auth_app));
        };
        let Some(auth_app) = auth_app else {
            return Ok(no_password(None));
        };
        if password.is_empty() {
            return Ok(no_password(Some(auth_app)));
        }

        let auth_message = format!("{},{},{}", client_first, server_first, client_final);
        let client_proof = scram::client_proof(
            password,
            &challenge.salt,
            challenge.iterations,
            &auth_message,
        )?;

        let body = json!({
            "clientProof": client_proof,
            "nonce": challenge.nonce,
            "state": "response",
        });
        let response = self
            .gateway
            .do_fetch(
                &self.auth_endpoint("login"),
                FetchOptions::post()
                    .body(body)
                    .error_msg("The sign in failed.")
                    .unchecked(),
            )
            .await?;

        session.set_login_state(LoginState::default());
        Ok(self.complete_login(&auth_app, &response))
    }

    fn complete_login(&self, auth_app: &str, response: &HttpResponse) -> LoginResult {
        let session = self.session();

        if !response.is_success() {
            session.clear_access_token();
            warn!(auth_app, status = response.status, "sign in rejected");
            let message = if response.status == 401 {
                "The sign in failed. Please check your username and password.".to_string()
            } else {
                format!("The sign in failed. Error code: {}", response.status)
            };
            return LoginResult::failure(Some(auth_app.to_string()), response.status, message);
        }

        match response.parse::<LoginResponse>() {
            Ok(login) => {
                session.set_access_token(&login.access_token);
                session.set_auth_app(auth_app);
                info!(auth_app, "signed in");
                LoginResult::success(auth_app, login.access_token)
            }
            Err(error) => LoginResult::failure(
                Some(auth_app.to_string()),
                2,
                format!("The sign in failed. Server Error: {}", error.message),
            ),
        }
    }

    /// Ends the session on the server and forgets all session state.
    pub async fn logout(&self) -> MrsResult<()> {
        let session = self.session();
        if !session.is_authenticated() {
            return Err(MrsError::auth("No user is currently authenticated"));
        }

        self.gateway
            .do_fetch(
                &self.auth_endpoint("logout"),
                FetchOptions::post().error_msg("Failed to sign out."),
            )
            .await?;

        session.reset();
        info!("signed out");
        Ok(())
    }
}

fn no_auth_app() -> LoginResult {
    LoginResult::failure(None, 1, "No authentication app selected.")
}

fn no_password(auth_app: Option<String>) -> LoginResult {
    LoginResult::failure(auth_app, 1, "No password given.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockFetcher;
    use crate::service::ServiceConfig;
    use std::sync::Arc;

    fn service() -> (MrsService, Arc<MockFetcher>) {
        let mock = Arc::new(MockFetcher::new());
        let service =
            MrsService::with_fetcher(ServiceConfig::new("http://localhost:8080/svc"), mock.clone());
        (service, mock)
    }

    #[tokio::test]
    async fn test_delegated_login() {
        let (service, mock) = service();
        mock.push_json(json!({ "accessToken": "jwt-1" }));

        let result = service
            .verify_credentials("MySQL", "bob", "secret")
            .await
            .unwrap();
        assert_eq!(result, LoginResult::success("MySQL", "jwt-1"));
        assert_eq!(service.session().access_token().as_deref(), Some("jwt-1"));

        let request = mock.last_request().unwrap();
        assert_eq!(request.url, "http://localhost:8080/svc/authentication/login");
        assert_eq!(
            request.json_body().unwrap(),
            json!({ "username": "bob", "password": "secret", "authApp": "MySQL", "sessionType": "bearer" })
        );
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_values() {
        let (service, mock) = service();
        service.session().set_access_token("old");
        mock.push(HttpResponse::new(401, ""))
            .push(HttpResponse::new(500, ""))
            .push(HttpResponse::new(200, "not json"));

        let result = service.verify_credentials("MySQL", "bob", "x").await.unwrap();
        assert_eq!(result.error_code, Some(401));
        assert_eq!(
            result.error_message.as_deref(),
            Some("The sign in failed. Please check your username and password.")
        );
        assert!(!service.session().is_authenticated());

        let result = service.verify_credentials("MySQL", "bob", "x").await.unwrap();
        assert_eq!(result.error_code, Some(500));
        assert_eq!(
            result.error_message.as_deref(),
            Some("The sign in failed. Error code: 500")
        );

        let result = service.verify_credentials("MySQL", "bob", "x").await.unwrap();
        assert_eq!(result.error_code, Some(2));
        assert!(result
            .error_message
            .unwrap()
            .starts_with("The sign in failed. Server Error:"));
    }

    #[tokio::test]
    async fn test_missing_app_and_password() {
        let (service, mock) = service();

        let result = service.verify_credentials("", "bob", "x").await.unwrap();
        assert_eq!(result.error_code, Some(1));
        assert_eq!(result.error_message.as_deref(), Some("No authentication app selected."));

        let result = service.send_client_final("secret").await.unwrap();
        assert_eq!(result.error_code, Some(1));
        assert_eq!(result.error_message.as_deref(), Some("No password given."));
        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test]
    async fn test_native_handshake() {
        let (service, mock) = service();
        mock.push_json(json!({ "nonce": "SERVERNONCE", "iterations": 3, "salt": [1, 2, 3, 4] }))
            .push_json(json!({ "accessToken": "jwt-native" }));

        let result = service
            .authenticate(AuthenticateOptions::new("MRS", "alice", "pw").vendor_id(MRS_VENDOR_ID))
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.jwt.as_deref(), Some("jwt-native"));

        let requests = mock.requests();
        let first = requests[0].json_body().unwrap();
        let nonce = first["nonce"].as_str().unwrap().to_string();
        assert_eq!(nonce.len(), 20);
        assert_eq!(first["authApp"], "MRS");
        assert_eq!(first["user"], "alice");
        assert_eq!(first["sessionType"], "bearer");

        let auth_message = format!(
            "n=alice,r={},r=SERVERNONCE,s=AQIDBA==,i=3,r=SERVERNONCE",
            nonce
        );
        let expected = scram::client_proof("pw", &[1, 2, 3, 4], 3, &auth_message).unwrap();
        assert_eq!(
            requests[1].json_body().unwrap(),
            json!({ "clientProof": expected, "nonce": "SERVERNONCE", "state": "response" })
        );
        assert_eq!(service.session().login_state(), LoginState::default());
    }

    #[tokio::test]
    async fn test_vendor_lookup() {
        let (service, mock) = service();
        mock.push_json(json!([
            { "name": "MRS", "vendorId": MRS_VENDOR_ID },
            { "name": "MySQL", "vendorId": "0x31000000000000000000000000000000" }
        ]))
        .push_json(json!({ "accessToken": "t" }));

        let result = service
            .authenticate(AuthenticateOptions::new("MySQL", "bob", "pw"))
            .await
            .unwrap();
        assert!(result.is_success());
        let requests = mock.requests();
        assert_eq!(requests[0].url, "http://localhost:8080/svc/authentication/authApps");
        assert_eq!(requests[1].json_body().unwrap()["username"], "bob");

        mock.push_json(json!([]));
        let result = service
            .authenticate(AuthenticateOptions::new("Other", "bob", "pw"))
            .await
            .unwrap();
        assert_eq!(result.error_code, Some(1));
    }

    #[tokio::test]
    async fn test_auth_apps_failure_message() {
        let (service, mock) = service();
        mock.push(HttpResponse::new(503, r#"{"reason":"down"}"#));

        let err = service.get_auth_apps().await.unwrap_err();
        assert_eq!(err.status, Some(503));
        assert_eq!(
            err.message,
            "Failed to fetch Authentication Apps.\n\nPlease ensure MySQL Router is running and the REST endpoint \
             http://localhost:8080/svc/authentication/authApps is accessible. (503:Service Unavailable)\n\n{\n    \"reason\": \"down\"\n}\n"
        );
    }

    #[tokio::test]
    async fn test_status_degrades_to_unauthorized() {
        let (service, mock) = service();
        mock.push_json(json!({ "status": "authorized", "user": { "name": "bob" } }))
            .push(HttpResponse::new(500, ""));

        assert!(service.authentication_status().await.is_authorized());
        assert_eq!(service.authentication_status().await, AuthStatus::unauthorized());
    }

    #[tokio::test]
    async fn test_logout() {
        let (service, mock) = service();
        let err = service.logout().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AuthError);
        assert_eq!(err.message, "No user is currently authenticated");

        service.session().set_access_token("t");
        service.session().observe_gtid(Some("G:1"));
        mock.push_json(json!({}));
        service.logout().await.unwrap();

        let request = mock.last_request().unwrap();
        assert_eq!(request.url, "http://localhost:8080/svc/authentication/logout");
        assert_eq!(request.header_value("Authorization"), Some("Bearer t"));
        assert!(!service.session().is_authenticated());
        assert_eq!(service.session().gtid(), None);
    }
}
