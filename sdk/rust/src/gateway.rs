//! The single chokepoint for network calls.
//!
//! [`Gateway::do_fetch`] resolves the request path against the service URL,
//! attaches the bearer token, applies the timeout and turns failures into
//! [`MrsError`]s with messages that name the endpoint.

use crate::error::{ErrorCode, MrsError, MrsResult, ResultExt};
use crate::http::{Fetch, HttpRequest, HttpResponse, Method};
use crate::service::ServiceConfig;
use crate::session::Session;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Error message used when a call site does not provide one.
pub const DEFAULT_ERROR_MSG: &str = "Failed to fetch data.";

/// Per-call options.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub method: Method,
    pub body: Option<Value>,
    pub timeout: Option<Duration>,
    pub error_msg: Option<String>,
    /// When false, non-2xx responses are returned instead of raised.
    pub auto_response_check: bool,
    pub headers: Vec<(String, String)>,
}

impl FetchOptions {
    /// Options for a request with the given method.
    pub fn new(method: Method) -> Self {
        Self {
            method,
            body: None,
            timeout: None,
            error_msg: None,
            auto_response_check: true,
            headers: Vec::new(),
        }
    }

    /// A GET request.
    pub fn get() -> Self {
        Self::new(Method::Get)
    }

    /// A POST request.
    pub fn post() -> Self {
        Self::new(Method::Post)
    }

    /// A PUT request.
    pub fn put() -> Self {
        Self::new(Method::Put)
    }

    /// A DELETE request.
    pub fn delete() -> Self {
        Self::new(Method::Delete)
    }

    /// Sets the JSON body.
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serializes `body` as the request body.
    pub fn json<T: Serialize + ?Sized>(self, body: &T) -> MrsResult<Self> {
        let body = serde_json::to_value(body).map_mrs_err(ErrorCode::SerializeError)?;
        Ok(self.body(body))
    }

    /// Overrides the configured timeout for this request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Message prefixed to errors of this request.
    pub fn error_msg(mut self, error_msg: impl Into<String>) -> Self {
        self.error_msg = Some(error_msg.into());
        self
    }

    /// Hands non-2xx responses back to the caller.
    pub fn unchecked(mut self) -> Self {
        self.auto_response_check = false;
        self
    }

    /// Adds a header to this request only.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Resolves, authenticates and sends requests for one service.
pub struct Gateway {
    config: ServiceConfig,
    fetcher: Arc<dyn Fetch>,
    session: Arc<Session>,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn new(config: ServiceConfig, fetcher: Arc<dyn Fetch>, session: Arc<Session>) -> Self {
        Self {
            config,
            fetcher,
            session,
        }
    }

    /// The service configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The session whose token is attached to requests.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// The absolute URL of a service relative path.
    pub fn url_for(&self, input: &str) -> String {
        format!("{}{}", self.config.url, input)
    }

    /// Sends a request. See the module documentation.
    pub async fn do_fetch(&self, input: &str, options: FetchOptions) -> MrsResult<HttpResponse> {
        let url = self.url_for(input);
        let error_msg = options.error_msg.as_deref().unwrap_or(DEFAULT_ERROR_MSG);

        let mut request = HttpRequest::new(options.method, &url);
        for (name, value) in &self.config.headers {
            request = request.header(name, value);
        }
        if let Some(token) = self.session.access_token() {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        if let Some(body) = &options.body {
            let body = serde_json::to_string(body).map_mrs_err(ErrorCode::SerializeError)?;
            request = request.header("Content-Type", "application/json").body(body);
        }
        for (name, value) in &options.headers {
            request = request.header(name, value);
        }

        let timeout = options.timeout.unwrap_or(self.config.timeout);
        debug!(method = %options.method, url = %url, "sending request");

        let response = match tokio::time::timeout(timeout, self.fetcher.fetch(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => {
                return Err(
                    network_failure(error.code, error_msg, &url, &error.message).with_source(error)
                );
            }
            Err(_) => {
                warn!(url = %url, timeout_ms = timeout.as_millis() as u64, "request timed out");
                return Err(network_failure(
                    ErrorCode::Timeout,
                    error_msg,
                    &url,
                    &format!("The operation timed out after {} ms.", timeout.as_millis()),
                ));
            }
        };

        if response.is_success() || !options.auto_response_check {
            return Ok(response);
        }

        warn!(status = response.status, url = %url, "request failed");
        Err(response_error(&response, &url, error_msg))
    }

    /// Sends a request and parses the JSON body.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        input: &str,
        options: FetchOptions,
    ) -> MrsResult<T> {
        self.do_fetch(input, options).await?.parse()
    }
}

fn network_failure(code: ErrorCode, error_msg: &str, url: &str, detail: &str) -> MrsError {
    MrsError::new(
        code,
        format!(
            "{}\n\nPlease check if MySQL Router is running and the REST endpoint {} does exist.\n\n{}",
            error_msg, url, detail
        ),
    )
}

fn response_error(response: &HttpResponse, url: &str, error_msg: &str) -> MrsError {
    if response.status == 401 {
        return MrsError::new(
            ErrorCode::NotAuthenticated,
            format!(
                "Not authenticated. Please authenticate first before accessing the path {}.",
                url
            ),
        )
        .with_status(401);
    }

    let code = ErrorCode::from_status(response.status);
    let Ok(info) = serde_json::from_str::<Value>(&response.body) else {
        return MrsError::new(
            code,
            format!("{}. {} ({})", response.status, error_msg, response.status_text),
        )
        .with_status(response.status);
    };

    let message = match info.get("message").and_then(Value::as_str) {
        Some(message) => message.to_string(),
        None => format!(
            "{}. {} ({})\n\n{}\n",
            response.status,
            error_msg,
            response.status_text,
            to_pretty_json(&info)
        ),
    };
    MrsError::new(code, message)
        .with_status(response.status)
        .with_extension("response", info)
}

/// Pretty prints with a four space indent.
pub(crate) fn to_pretty_json(value: &Value) -> String {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    match value.serialize(&mut serializer) {
        Ok(()) => String::from_utf8(buffer).unwrap_or_else(|_| value.to_string()),
        Err(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockFetcher;
    use serde_json::json;

    fn gateway(mock: &Arc<MockFetcher>) -> Gateway {
        Gateway::new(
            ServiceConfig::new("http://localhost:8444/svc"),
            mock.clone(),
            Arc::new(Session::new()),
        )
    }

    #[tokio::test]
    async fn test_bearer_header_only_when_authenticated() {
        let mock = Arc::new(MockFetcher::new());
        mock.push_json(json!({})).push_json(json!({}));
        let gateway = gateway(&mock);

        gateway.do_fetch("/db/t", FetchOptions::get()).await.unwrap();
        gateway.session().set_access_token("abc");
        gateway
            .do_fetch("/db/t", FetchOptions::post().body(json!({ "a": 1 })))
            .await
            .unwrap();

        let requests = mock.requests();
        assert_eq!(requests[0].url, "http://localhost:8444/svc/db/t");
        assert_eq!(requests[0].header_value("Authorization"), None);
        assert_eq!(requests[0].body, None);
        assert_eq!(requests[1].header_value("Authorization"), Some("Bearer abc"));
        assert_eq!(requests[1].body.as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(
            requests[1].header_value("Content-Type"),
            Some("application/json")
        );
    }

    #[tokio::test]
    async fn test_unauthenticated_response() {
        let mock = Arc::new(MockFetcher::new());
        mock.push(HttpResponse::new(401, ""));

        let err = gateway(&mock)
            .do_fetch("/db/t", FetchOptions::get())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotAuthenticated);
        assert_eq!(
            err.message,
            "Not authenticated. Please authenticate first before accessing the path http://localhost:8444/svc/db/t."
        );
    }

    #[tokio::test]
    async fn test_server_message_is_surfaced_verbatim() {
        let mock = Arc::new(MockFetcher::new());
        mock.push(HttpResponse::new(400, r#"{"message":"Invalid filter"}"#));

        let err = gateway(&mock)
            .do_fetch("/db/t", FetchOptions::get())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::HttpError);
        assert_eq!(err.status, Some(400));
        assert_eq!(err.message, "Invalid filter");
        assert_eq!(err.extension("response").unwrap()["message"], "Invalid filter");
    }

    #[tokio::test]
    async fn test_generic_error_messages() {
        let mock = Arc::new(MockFetcher::new());
        mock.push(HttpResponse::new(500, "<html>"))
            .push(HttpResponse::new(404, r#"{"what":1}"#));
        let gateway = gateway(&mock);

        let err = gateway
            .do_fetch("/db/t", FetchOptions::get().error_msg("Failed to fetch items."))
            .await
            .unwrap_err();
        assert_eq!(
            err.message,
            "500. Failed to fetch items. (Internal Server Error)"
        );

        let err = gateway
            .do_fetch("/db/t", FetchOptions::get())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(
            err.message,
            "404. Failed to fetch data. (Not Found)\n\n{\n    \"what\": 1\n}\n"
        );
    }

    #[tokio::test]
    async fn test_unchecked_returns_failures() {
        let mock = Arc::new(MockFetcher::new());
        mock.push(HttpResponse::new(401, ""));

        let response = gateway(&mock)
            .do_fetch("/auth/login", FetchOptions::post().unchecked())
            .await
            .unwrap();
        assert_eq!(response.status, 401);
    }

    #[tokio::test]
    async fn test_transport_failure_names_endpoint() {
        let mock = Arc::new(MockFetcher::new());
        mock.push_error(MrsError::network("Connection refused"));

        let err = gateway(&mock)
            .do_fetch("/db/t", FetchOptions::get())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NetworkError);
        assert_eq!(
            err.message,
            "Failed to fetch data.\n\nPlease check if MySQL Router is running and the REST endpoint http://localhost:8444/svc/db/t does exist.\n\nConnection refused"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let mock = Arc::new(MockFetcher::new());
        mock.push_delayed(Duration::from_secs(9), HttpResponse::json(&json!({})))
            .push_delayed(Duration::from_secs(9), HttpResponse::json(&json!({})));
        let gateway = gateway(&mock);

        let err = gateway
            .do_fetch("/db/t", FetchOptions::get())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);
        assert!(err.message.contains("timed out after 8000 ms"));
        assert!(err.message.contains("http://localhost:8444/svc/db/t"));

        // A per-call timeout overrides the default.
        let response = gateway
            .do_fetch("/db/t", FetchOptions::get().timeout(Duration::from_secs(10)))
            .await
            .unwrap();
        assert!(response.is_success());
    }
}
