//! MySQL REST Service SDK
//!
//! This crate talks to MRS endpoints: it signs in, reads and writes REST
//! objects, calls stored routines and watches long running tasks.
//!
//! # Reading and writing
//!
//! ```no_run
//! use mrs_core::{Comparison, DelegationFilter};
//! use mrs_sdk::{AuthenticateOptions, MrsService, QueryOptions, ServiceConfig};
//!
//! # async fn demo() -> mrs_sdk::MrsResult<()> {
//! let service = MrsService::new(ServiceConfig::new("http://localhost:8080/myService"));
//! let login = service
//!     .authenticate(AuthenticateOptions::new("MRS", "alice", "secret"))
//!     .await?;
//! assert!(login.is_success());
//!
//! let actors = service.schema("/sakila").object("/actor", ["actorId"]);
//! let created = actors
//!     .create(&serde_json::json!({ "firstName": "Ann", "lastName": "Lee" }))
//!     .await?;
//!
//! // Sees the row just written, whatever replica answers.
//! let filter = DelegationFilter::new().field("lastName", Comparison::Like("L%".into()));
//! let page = actors
//!     .query::<serde_json::Value>(QueryOptions::new().filter(filter).read_own_writes(true))
//!     .fetch()
//!     .await?;
//! # let _ = (created, page);
//! # Ok(())
//! # }
//! ```
//!
//! # Tasks
//!
//! ```no_run
//! use mrs_sdk::{MrsService, ServiceConfig, TaskOptions};
//! use std::time::Duration;
//!
//! # async fn demo() -> mrs_sdk::MrsResult<()> {
//! let service = MrsService::new(ServiceConfig::new("http://localhost:8080/myService"));
//! let report = service.schema("/sakila").procedure("/longReport");
//! let result = report
//!     .call_task(&(), TaskOptions::new().timeout(Duration::from_secs(60)))
//!     .await?;
//! # let _ = result;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod error;
pub mod gateway;
pub mod http;
pub mod mock;
pub mod query;
pub mod routine;
pub mod scram;
pub mod service;
pub mod session;
pub mod task;

pub use auth::{AuthApp, AuthStatus, AuthenticateOptions, MRS_VENDOR_ID};
pub use error::{ErrorCode, MrsError, MrsResult, ResultExt};
pub use gateway::{FetchOptions, Gateway, DEFAULT_ERROR_MSG};
pub use http::{Fetch, HttpRequest, HttpResponse, Method, TcpFetcher};
pub use query::{DeleteOptions, DeleteResult, ObjectQuery, QueryOptions, UpdateOptions};
pub use routine::{FunctionResponse, MrsFunction, MrsProcedure, ProcedureResponse};
pub use service::{MrsObject, MrsSchema, MrsService, ServiceConfig};
pub use session::{AuthChallenge, LoginResult, LoginState, Session};
pub use task::{
    ProgressCallback, Task, TaskOptions, TaskSnapshot, TaskStatus, TaskWatcher,
    DEFAULT_REFRESH_RATE, MIN_REFRESH_RATE,
};

// Core types that appear in this crate's signatures.
pub use mrs_core::{
    CollectionResponse, Cursor, DataFilter, DelegationFilter, Facade, FieldSelection, JsonObject,
    OrderBy, ResourceMetadata, ResourceObject, SortOrder,
};
