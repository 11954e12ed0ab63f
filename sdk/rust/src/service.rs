//! Service, schema and object handles.
//!
//! ```no_run
//! use mrs_sdk::{MrsService, ServiceConfig};
//!
//! let service = MrsService::new(ServiceConfig::new("http://localhost:8080/myService"));
//! let actors = service.schema("/sakila").object("/actor", ["actorId"]);
//! assert_eq!(actors.path(), "/sakila/actor");
//! ```

use crate::error::MrsResult;
use crate::gateway::{FetchOptions, Gateway};
use crate::http::{Fetch, TcpFetcher};
use crate::routine::{MrsFunction, MrsProcedure};
use crate::session::{LoginResult, Session};
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base URL of the service, for example `http://localhost:8080/myService`.
    pub url: String,
    /// Path of the authentication endpoints, relative to `url`.
    pub auth_path: String,
    /// Default request timeout.
    pub timeout: Duration,
    /// Timeout for listing the authentication apps.
    pub auth_apps_timeout: Duration,
    /// Headers sent with every request.
    pub headers: IndexMap<String, String>,
    /// A login performed elsewhere, used to seed the session.
    pub login: Option<LoginResult>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth_path: "/authentication".to_string(),
            timeout: Duration::from_millis(8000),
            auth_apps_timeout: Duration::from_millis(3000),
            headers: IndexMap::new(),
            login: None,
        }
    }
}

impl ServiceConfig {
    /// Creates a new config with a URL. A trailing slash is dropped.
    pub fn new(url: impl Into<String>) -> Self {
        let mut url = url.into();
        while url.ends_with('/') {
            url.pop();
        }
        Self {
            url,
            ..Default::default()
        }
    }

    /// Sets the authentication path.
    pub fn auth_path(mut self, auth_path: impl Into<String>) -> Self {
        self.auth_path = auth_path.into();
        self
    }

    /// Sets the default request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the timeout for listing the authentication apps.
    pub fn auth_apps_timeout(mut self, timeout: Duration) -> Self {
        self.auth_apps_timeout = timeout;
        self
    }

    /// Adds a default header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Seeds the session with an existing login.
    pub fn login(mut self, login: LoginResult) -> Self {
        self.login = Some(login);
        self
    }
}

/// Entry point for one MRS service.
#[derive(Debug, Clone)]
pub struct MrsService {
    pub(crate) gateway: Arc<Gateway>,
}

impl MrsService {
    /// Creates a service that talks plain HTTP over TCP.
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_fetcher(config, Arc::new(TcpFetcher::new()))
    }

    /// Creates a service on top of a custom network primitive.
    pub fn with_fetcher(config: ServiceConfig, fetcher: Arc<dyn Fetch>) -> Self {
        let session = match &config.login {
            Some(login) => Session::from_login(login),
            None => Session::new(),
        };
        Self {
            gateway: Arc::new(Gateway::new(config, fetcher, Arc::new(session))),
        }
    }

    /// The configuration this service was built with.
    pub fn config(&self) -> &ServiceConfig {
        self.gateway.config()
    }

    /// Login state and consistency bookkeeping shared by all handles.
    pub fn session(&self) -> &Arc<Session> {
        self.gateway.session()
    }

    /// The transport gateway every request goes through.
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// A schema of this service, for example `/sakila`.
    pub fn schema(&self, path: impl Into<String>) -> MrsSchema {
        MrsSchema {
            gateway: self.gateway.clone(),
            path: path.into(),
        }
    }

    /// The service metadata.
    pub async fn get_metadata(&self) -> MrsResult<Value> {
        get_metadata(&self.gateway, "").await
    }
}

/// A schema, the parent of objects and routines.
#[derive(Debug, Clone)]
pub struct MrsSchema {
    gateway: Arc<Gateway>,
    path: String,
}

impl MrsSchema {
    /// Path relative to the service URL.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// A table or view. `primary_keys` name the fields that form the
    /// resource id, in declaration order.
    pub fn object<I, S>(&self, path: &str, primary_keys: I) -> MrsObject
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MrsObject {
            gateway: self.gateway.clone(),
            path: format!("{}{}", self.path, path),
            primary_keys: primary_keys.into_iter().map(Into::into).collect(),
        }
    }

    /// A stored function of this schema.
    pub fn function(&self, path: &str) -> MrsFunction {
        MrsFunction::new(self.gateway.clone(), format!("{}{}", self.path, path))
    }

    /// A stored procedure of this schema.
    pub fn procedure(&self, path: &str) -> MrsProcedure {
        MrsProcedure::new(self.gateway.clone(), format!("{}{}", self.path, path))
    }

    /// The schema metadata.
    pub async fn get_metadata(&self) -> MrsResult<Value> {
        get_metadata(&self.gateway, &self.path).await
    }
}

/// A REST object backed by a table or view.
#[derive(Debug, Clone)]
pub struct MrsObject {
    pub(crate) gateway: Arc<Gateway>,
    pub(crate) path: String,
    pub(crate) primary_keys: Vec<String>,
}

impl MrsObject {
    /// Path relative to the service URL.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Fields that form the resource id.
    pub fn primary_keys(&self) -> &[String] {
        &self.primary_keys
    }

    /// The object metadata.
    pub async fn get_metadata(&self) -> MrsResult<Value> {
        get_metadata(&self.gateway, &self.path).await
    }
}

async fn get_metadata(gateway: &Gateway, path: &str) -> MrsResult<Value> {
    gateway
        .fetch_json(
            &format!("{}/_metadata", path),
            FetchOptions::get().error_msg("Failed to fetch metadata."),
        )
        .await
}
