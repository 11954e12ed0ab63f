//! Stored function and procedure calls.

use crate::error::{ErrorCode, MrsError, MrsResult, ResultExt};
use crate::gateway::{FetchOptions, Gateway};
use crate::task::{Task, TaskOptions};
use mrs_core::{JsonObject, ResourceMetadata, ResourceObject};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Reply of a function call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionResponse<R> {
    pub result: R,
    #[serde(default, rename = "_metadata")]
    pub metadata: Option<ResourceMetadata>,
}

/// Reply of a procedure call. Every result set is wrapped like a resource,
/// its column metadata available through [`ResourceObject::metadata`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcedureResponse {
    pub out_parameters: Option<JsonObject>,
    pub result_sets: Vec<ResourceObject<JsonObject>>,
    pub metadata: Option<ResourceMetadata>,
}

impl ProcedureResponse {
    /// Parses a procedure reply. Task results carry the out parameters at
    /// the top level instead of under `outParameters`.
    pub fn from_json(value: Value) -> MrsResult<Self> {
        let Value::Object(mut object) = value else {
            return Err(MrsError::invalid_response(
                "Procedure response is not a JSON object",
            ));
        };

        let metadata = match object.remove("_metadata") {
            Some(Value::Null) | None => None,
            Some(metadata) => {
                Some(serde_json::from_value(metadata).map_mrs_err(ErrorCode::DeserializeError)?)
            }
        };
        let result_sets = object
            .remove("resultSets")
            .or_else(|| object.remove("result_sets"));
        let out_parameters = object
            .remove("outParameters")
            .or_else(|| object.remove("out_parameters"));

        let (result_sets, out_parameters) = match result_sets {
            Some(Value::Array(sets)) => {
                let sets = sets
                    .into_iter()
                    .map(ResourceObject::from_json)
                    .collect::<Result<Vec<_>, _>>()?;
                (sets, out_parameters)
            }
            Some(other) => {
                return Err(MrsError::invalid_response(format!(
                    "Expected resultSets to be an array, got {}",
                    other
                )));
            }
            None => {
                let rest = out_parameters.or_else(|| {
                    (!object.is_empty()).then(|| Value::Object(object))
                });
                (Vec::new(), rest)
            }
        };

        let out_parameters = match out_parameters {
            Some(Value::Object(out)) => Some(out),
            Some(Value::Null) | None => None,
            Some(other) => {
                return Err(MrsError::invalid_response(format!(
                    "Expected outParameters to be an object, got {}",
                    other
                )));
            }
        };

        Ok(Self {
            out_parameters,
            result_sets,
            metadata,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskStartResponse {
    #[serde(alias = "task_id")]
    task_id: String,
    #[serde(default)]
    message: Option<String>,
}

/// Shared plumbing of functions and procedures.
#[derive(Debug, Clone)]
struct Routine {
    gateway: Arc<Gateway>,
    path: String,
}

impl Routine {
    /// PUT with the parameters as body. Absent parameters are sent as `{}`.
    async fn call(&self, params: &impl Serialize) -> MrsResult<Value> {
        let mut body = serde_json::to_value(params).map_mrs_err(ErrorCode::SerializeError)?;
        if body.is_null() {
            body = Value::Object(JsonObject::new());
        }
        let response: Value = self
            .gateway
            .fetch_json(
                &self.path,
                FetchOptions::put().body(body).error_msg("Failed to call item."),
            )
            .await?;

        let metadata = response
            .get("_metadata")
            .and_then(|m| serde_json::from_value::<ResourceMetadata>(m.clone()).ok());
        self.gateway.session().observe_metadata(metadata.as_ref());
        Ok(response)
    }

    async fn start_task(&self, params: &impl Serialize) -> MrsResult<Task> {
        let response = self.call(params).await?;
        let start: TaskStartResponse =
            serde_json::from_value(response).map_mrs_err(ErrorCode::InvalidResponse)?;
        if let Some(message) = &start.message {
            tracing::debug!(task_id = %start.task_id, message = %message, "task started");
        }
        Ok(Task::new(self.gateway.clone(), self.path.clone(), start.task_id))
    }
}

/// A stored function.
#[derive(Debug, Clone)]
pub struct MrsFunction {
    routine: Routine,
}

impl MrsFunction {
    pub(crate) fn new(gateway: Arc<Gateway>, path: String) -> Self {
        Self {
            routine: Routine { gateway, path },
        }
    }

    /// Path relative to the service URL.
    pub fn path(&self) -> &str {
        &self.routine.path
    }

    /// Calls the function. Pass `&()` when it takes no parameters.
    pub async fn call<R: DeserializeOwned>(
        &self,
        params: &impl Serialize,
    ) -> MrsResult<FunctionResponse<R>> {
        let response = self.routine.call(params).await?;
        serde_json::from_value(response).map_mrs_err(ErrorCode::DeserializeError)
    }

    /// Starts the function as an asynchronous task.
    pub async fn start_task(&self, params: &impl Serialize) -> MrsResult<Task> {
        self.routine.start_task(params).await
    }

    /// Starts the function as a task and waits for its result.
    pub async fn call_task<R: DeserializeOwned>(
        &self,
        params: &impl Serialize,
        options: TaskOptions,
    ) -> MrsResult<R> {
        let task = self.start_task(params).await?;
        let data = task.run(options).await?;
        let response: FunctionResponse<R> =
            serde_json::from_value(data).map_mrs_err(ErrorCode::DeserializeError)?;
        Ok(response.result)
    }
}

/// A stored procedure.
#[derive(Debug, Clone)]
pub struct MrsProcedure {
    routine: Routine,
}

impl MrsProcedure {
    pub(crate) fn new(gateway: Arc<Gateway>, path: String) -> Self {
        Self {
            routine: Routine { gateway, path },
        }
    }

    /// Path relative to the service URL.
    pub fn path(&self) -> &str {
        &self.routine.path
    }

    /// Calls the procedure and returns its result sets and out parameters.
    pub async fn call(&self, params: &impl Serialize) -> MrsResult<ProcedureResponse> {
        let response = self.routine.call(params).await?;
        ProcedureResponse::from_json(response)
    }

    /// Starts the routine as an asynchronous task.
    pub async fn start_task(&self, params: &impl Serialize) -> MrsResult<Task> {
        self.routine.start_task(params).await
    }

    /// Runs the procedure as a task and returns its result.
    pub async fn call_task(
        &self,
        params: &impl Serialize,
        options: TaskOptions,
    ) -> MrsResult<ProcedureResponse> {
        let task = self.start_task(params).await?;
        ProcedureResponse::from_json(task.run(options).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockFetcher;
    use crate::service::{MrsService, ServiceConfig};
    use mrs_core::Facade;
    use serde_json::json;

    fn service(mock: &Arc<MockFetcher>) -> MrsService {
        MrsService::with_fetcher(ServiceConfig::new("http://localhost/svc"), mock.clone())
    }

    #[tokio::test]
    async fn test_function_call() {
        let mock = Arc::new(MockFetcher::new());
        mock.push_json(json!({ "result": 42, "_metadata": { "gtid": "G:1" } }))
            .push_json(json!({ "result": "ok" }));
        let service = service(&mock);
        let sum = service.schema("/db").function("/sum");

        let response: FunctionResponse<i64> = sum.call(&json!({ "a": 40, "b": 2 })).await.unwrap();
        assert_eq!(response.result, 42);
        assert_eq!(service.session().gtid().as_deref(), Some("G:1"));

        let request = mock.last_request().unwrap();
        assert_eq!(request.method, crate::http::Method::Put);
        assert_eq!(request.url, "http://localhost/svc/db/sum");
        assert_eq!(request.json_body().unwrap(), json!({ "a": 40, "b": 2 }));

        let response: FunctionResponse<String> = sum.call(&()).await.unwrap();
        assert_eq!(response.result, "ok");
        assert_eq!(mock.last_request().unwrap().body.as_deref(), Some("{}"));
        assert_eq!(service.session().gtid().as_deref(), Some("G:1"));
    }

    #[tokio::test]
    async fn test_procedure_result_sets_are_wrapped() {
        let mock = Arc::new(MockFetcher::new());
        mock.push_json(json!({
            "resultSets": [{
                "type": "items0",
                "items": [{ "id": 1 }],
                "_metadata": { "columns": [{ "name": "id", "type": "INT" }] }
            }],
            "outParameters": { "total": 1 },
            "_metadata": { "gtid": "G:5" }
        }));

        let response = service(&mock)
            .schema("/db")
            .procedure("/report")
            .call(&json!({ "since": 2020 }))
            .await
            .unwrap();

        assert_eq!(response.out_parameters, Some(json!({ "total": 1 }).as_object().unwrap().clone()));
        assert_eq!(response.metadata.unwrap().gtid.as_deref(), Some("G:5"));
        let set = &response.result_sets[0];
        assert_eq!(set.keys(), ["type", "items"]);
        assert_eq!(set.metadata().extra["columns"][0]["name"], "id");
    }

    #[test]
    fn test_task_result_out_parameters_at_root() {
        let response = ProcedureResponse::from_json(json!({ "total": 3 })).unwrap();
        assert!(response.result_sets.is_empty());
        assert_eq!(response.out_parameters.unwrap()["total"], 3);

        let err = ProcedureResponse::from_json(json!({ "resultSets": 1 })).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidResponse);
    }

    #[tokio::test]
    async fn test_start_task() {
        let mock = Arc::new(MockFetcher::new());
        mock.push_json(json!({ "taskId": "T-1", "message": "Request accepted." }));

        let task = service(&mock)
            .schema("/db")
            .procedure("/long")
            .start_task(&())
            .await
            .unwrap();
        assert_eq!(task.id(), "T-1");
        assert_eq!(task.path(), "/db/long/T-1");
    }
}
