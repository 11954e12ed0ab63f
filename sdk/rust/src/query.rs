//! Reads and writes on REST objects.
//!
//! ```no_run
//! # async fn demo(actors: mrs_sdk::MrsObject) -> mrs_sdk::MrsResult<()> {
//! use mrs_core::{DelegationFilter, SortOrder};
//! use mrs_sdk::QueryOptions;
//!
//! let options = QueryOptions::new()
//!     .filter(DelegationFilter::new().eq("lastName", "NOLTE"))
//!     .order_by("firstName", SortOrder::Asc)
//!     .take(10);
//! let page = actors.query::<serde_json::Value>(options).fetch().await?;
//! for actor in &page {
//!     println!("{}", actor.data());
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{ErrorCode, MrsError, MrsResult, ResultExt};
use crate::gateway::{FetchOptions, Gateway};
use crate::service::MrsObject;
use mrs_core::{
    CollectionResponse, Cursor, DataFilter, FieldSelection, JsonObject, OrderBy,
    RequestPredicate, ResourceMetadata, ResourceObject, SortOrder,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Options of a read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub filter: Option<DataFilter>,
    pub select: Option<FieldSelection>,
    pub order_by: Option<OrderBy>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
    /// Cursor pagination. Disables `skip`.
    pub cursor: Option<Cursor>,
    pub read_own_writes: bool,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the items returned.
    pub fn filter(mut self, filter: impl Into<DataFilter>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Fields to include or exclude.
    pub fn select(mut self, select: FieldSelection) -> Self {
        self.select = Some(select);
        self
    }

    /// Appends a sort column.
    pub fn order_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.order_by
            .get_or_insert_with(OrderBy::new)
            .insert(field.into(), order);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Page size.
    pub fn take(mut self, take: u64) -> Self {
        self.take = Some(take);
        self
    }

    /// Adds a cursor field with the last value seen.
    pub fn cursor(mut self, field: impl Into<String>, last: impl Into<Value>) -> Self {
        self.cursor
            .get_or_insert_with(Cursor::new)
            .insert(field.into(), last.into());
        self
    }

    /// Sends the last known GTID so the read sees earlier writes.
    pub fn read_own_writes(mut self, read_own_writes: bool) -> Self {
        self.read_own_writes = read_own_writes;
        self
    }
}

/// A prepared read.
#[derive(Debug, Clone)]
pub struct ObjectQuery<T> {
    gateway: Arc<Gateway>,
    path: String,
    options: QueryOptions,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ObjectQuery<T> {
    /// The options this query was built with.
    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// The path and query string of the GET request.
    pub fn request_path(&self) -> String {
        request_path(&self.gateway, &self.path, &self.options)
    }
}

impl<T: DeserializeOwned> ObjectQuery<T> {
    /// Fetches one page.
    pub async fn fetch(&self) -> MrsResult<CollectionResponse<T>> {
        fetch_page(&self.gateway, &self.path, &self.options).await
    }

    /// Fetches the first matching item.
    pub async fn fetch_one(&self) -> MrsResult<Option<ResourceObject<T>>> {
        let mut options = self.options.clone();
        options.take = Some(1);
        let page = fetch_page(&self.gateway, &self.path, &options).await?;
        Ok(page.into_items().into_iter().next())
    }
}

impl<T: DeserializeOwned + Serialize> ObjectQuery<T> {
    /// Fetches every page until the server reports no more items.
    pub async fn fetch_all(&self) -> MrsResult<CollectionResponse<T>> {
        self.fetch_all_with_progress(|_| {}).await
    }

    /// Like [`ObjectQuery::fetch_all`], calling `progress` with the items
    /// gathered so far after each page.
    pub async fn fetch_all_with_progress<F>(&self, mut progress: F) -> MrsResult<CollectionResponse<T>>
    where
        F: FnMut(&[ResourceObject<T>]),
    {
        let mut options = self.options.clone();
        let mut all = CollectionResponse::default();
        loop {
            let page = fetch_page(&self.gateway, &self.path, &options).await?;
            let has_more = page.has_more();
            advance(&mut options, &page)?;
            all.extend_with(page);
            progress(all.items());
            if !has_more {
                return Ok(all);
            }
            debug!(path = %self.path, fetched = all.len(), "fetching next page");
        }
    }
}

/// Moves the cursor or the offset past the items of `page`.
fn advance<T: Serialize>(options: &mut QueryOptions, page: &CollectionResponse<T>) -> MrsResult<()> {
    match options.cursor.as_mut() {
        Some(cursor) if !cursor.is_empty() => {
            let Some(last) = page.items().last() else {
                return Ok(());
            };
            let last = serde_json::to_value(last.data()).map_mrs_err(ErrorCode::SerializeError)?;
            for (field, value) in cursor.iter_mut() {
                if let Some(next) = last.get(field) {
                    *value = next.clone();
                }
            }
        }
        _ => {
            let skip = options.skip.unwrap_or(0);
            options.skip = Some(skip + page.len() as u64);
        }
    }
    Ok(())
}

fn request_path(gateway: &Gateway, path: &str, options: &QueryOptions) -> String {
    let predicate = RequestPredicate::from_filter(options.filter.as_ref())
        .with_order_by(options.order_by.as_ref())
        .with_as_of(gateway.session().as_of(options.read_own_writes).as_deref())
        .with_cursor(options.cursor.as_ref());

    let mut query = url::form_urlencoded::Serializer::new(String::new());
    let mut empty = true;
    if let Some(q) = predicate.compile() {
        query.append_pair("q", &q);
        empty = false;
    }
    if let Some(f) = options.select.as_ref().and_then(|s| s.project().to_query_value()) {
        query.append_pair("f", &f);
        empty = false;
    }
    if let Some(limit) = options.take {
        query.append_pair("limit", &limit.to_string());
        empty = false;
    }
    if let Some(offset) = options.skip.filter(|_| !predicate.has_cursor()) {
        query.append_pair("offset", &offset.to_string());
        empty = false;
    }

    if empty {
        path.to_string()
    } else {
        format!("{}?{}", path, query.finish())
    }
}

async fn fetch_page<T: DeserializeOwned>(
    gateway: &Gateway,
    path: &str,
    options: &QueryOptions,
) -> MrsResult<CollectionResponse<T>> {
    let input = request_path(gateway, path, options);
    let body: Value = gateway
        .fetch_json(&input, FetchOptions::get().error_msg("Failed to fetch items."))
        .await?;
    let page = CollectionResponse::<T>::from_json(body)?;
    for item in &page {
        gateway.session().record_etag(item);
    }
    Ok(page)
}

/// Options of an update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// ETag the update is conditional on. Defaults to the one last seen for
    /// the resource.
    pub etag: Option<String>,
}

impl UpdateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// ETag to send instead of the one last seen.
    pub fn etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }
}

/// Options of a bulk delete. The filter is mandatory.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOptions {
    pub filter: DataFilter,
    pub read_own_writes: bool,
}

impl DeleteOptions {
    /// Deletes the items matching `filter`.
    pub fn new(filter: impl Into<DataFilter>) -> Self {
        Self {
            filter: filter.into(),
            read_own_writes: false,
        }
    }

    /// Sends the last known GTID so the delete sees earlier writes.
    pub fn read_own_writes(mut self, read_own_writes: bool) -> Self {
        self.read_own_writes = read_own_writes;
        self
    }
}

/// Reply of a bulk delete.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub items_deleted: u64,
    #[serde(default, rename = "_metadata")]
    pub metadata: Option<ResourceMetadata>,
}

impl MrsObject {
    /// Prepares a read.
    pub fn query<T>(&self, options: QueryOptions) -> ObjectQuery<T> {
        ObjectQuery {
            gateway: self.gateway.clone(),
            path: self.path.clone(),
            options,
            _marker: PhantomData,
        }
    }

    /// Inserts a new resource.
    pub async fn create<T>(&self, data: &T) -> MrsResult<ResourceObject<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let body = to_object(data)?;
        let response: Value = self
            .gateway
            .fetch_json(
                &self.path,
                FetchOptions::post()
                    .body(Value::Object(body))
                    .error_msg("Failed to create item."),
            )
            .await?;
        self.track(response)
    }

    /// Replaces the resource identified by the primary key fields of `data`.
    pub async fn update<T>(&self, data: &T, options: UpdateOptions) -> MrsResult<ResourceObject<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut body = to_object(data)?;
        let resource_id = body
            .iter()
            .filter(|(key, _)| self.primary_keys.iter().any(|pk| pk == *key))
            .map(|(_, value)| resource_id_component(value))
            .collect::<Vec<_>>()
            .join(",");
        let input = format!("{}/{}", self.path, resource_id);

        let etag = options
            .etag
            .or_else(|| self.gateway.session().etag_for(&self.gateway.url_for(&input)));

        let mut fetch = FetchOptions::put().error_msg("Failed to update item.");
        if let Some(etag) = etag {
            let metadata = body
                .entry("_metadata")
                .or_insert_with(|| Value::Object(JsonObject::new()));
            if let Value::Object(metadata) = metadata {
                metadata.insert("etag".to_string(), Value::from(etag.clone()));
            }
            fetch = fetch.header("If-Match", etag);
        }

        let response: Value = self
            .gateway
            .fetch_json(&input, fetch.body(Value::Object(body)))
            .await?;
        self.track(response)
    }

    /// Deletes every resource matching the filter.
    pub async fn delete(&self, options: DeleteOptions) -> MrsResult<DeleteResult> {
        let session = self.gateway.session();
        let q = RequestPredicate::from_filter(Some(&options.filter))
            .with_as_of(session.as_of(options.read_own_writes).as_deref())
            .compile()
            .unwrap_or_else(|| "{}".to_string());
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("q", &q)
            .finish();

        let result: DeleteResult = self
            .gateway
            .fetch_json(
                &format!("{}?{}", self.path, query),
                FetchOptions::delete().error_msg("Failed to delete items."),
            )
            .await?;
        session.observe_metadata(result.metadata.as_ref());
        Ok(result)
    }

    fn track<T: DeserializeOwned>(&self, response: Value) -> MrsResult<ResourceObject<T>> {
        let resource = ResourceObject::<T>::from_json(response)?;
        let session = self.gateway.session();
        session.observe_metadata(Some(resource.metadata()));
        session.record_etag(&resource);
        Ok(resource)
    }
}

fn to_object<T: Serialize>(data: &T) -> MrsResult<JsonObject> {
    match serde_json::to_value(data).map_mrs_err(ErrorCode::SerializeError)? {
        Value::Object(object) => Ok(object),
        _ => Err(MrsError::serialize("Resource data must serialize to a JSON object")),
    }
}

/// One primary key value as a path segment. Separators such as `,` and `/`
/// are percent-encoded so they cannot split the resource id.
fn resource_id_component(value: &Value) -> String {
    let raw = match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    url::form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockFetcher;
    use crate::service::{MrsService, ServiceConfig};
    use mrs_core::{Comparison, DelegationFilter};
    use serde_json::json;

    fn object(mock: &Arc<MockFetcher>) -> MrsObject {
        MrsService::with_fetcher(ServiceConfig::new("http://localhost/svc"), mock.clone())
            .schema("/db")
            .object("/actor", ["id"])
    }

    fn q_param(request: &crate::http::HttpRequest) -> Option<String> {
        request
            .query_pairs()
            .into_iter()
            .find(|(k, _)| k == "q")
            .map(|(_, v)| v)
    }

    #[test]
    fn test_request_path_parameter_order() {
        let mock = Arc::new(MockFetcher::new());
        let query = object(&mock).query::<Value>(
            QueryOptions::new()
                .skip(20)
                .take(10)
                .select(FieldSelection::paths(["id", "name"]))
                .filter(DelegationFilter::new().eq("id", 3)),
        );
        let path = query.request_path();
        let (base, query_string) = path.split_once('?').unwrap();
        assert_eq!(base, "/db/actor");
        let keys: Vec<_> = url::form_urlencoded::parse(query_string.as_bytes())
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        assert_eq!(keys, [r#"q={"id":3}"#, "f=id,name", "limit=10", "offset=20"]);
    }

    #[test]
    fn test_no_parameters() {
        let mock = Arc::new(MockFetcher::new());
        assert_eq!(
            object(&mock).query::<Value>(QueryOptions::new()).request_path(),
            "/db/actor"
        );
    }

    #[test]
    fn test_cursor_disables_offset() {
        let mock = Arc::new(MockFetcher::new());
        let path = object(&mock)
            .query::<Value>(QueryOptions::new().skip(5).cursor("id", 10))
            .request_path();
        assert!(!path.contains("offset"));
        let pairs: Vec<_> = url::form_urlencoded::parse(path.split_once('?').unwrap().1.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            [("q".to_string(), r#"{"id":{"$gt":10},"$orderby":{"id":"ASC"}}"#.to_string())]
        );
    }

    #[tokio::test]
    async fn test_fetch_wraps_items_and_records_etags() {
        let mock = Arc::new(MockFetcher::new());
        mock.push_json(json!({
            "items": [{
                "id": 1,
                "name": "a",
                "links": [{ "rel": "self", "href": "http://localhost/svc/db/actor/1" }],
                "_metadata": { "etag": "E1" }
            }],
            "limit": 25, "offset": 0, "count": 1, "hasMore": false,
            "links": []
        }));
        let actors = object(&mock);

        let page = actors.query::<JsonObject>(QueryOptions::new()).fetch().await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page.items()[0].etag(), Some("E1"));
        assert_eq!(
            serde_json::to_value(&page).unwrap(),
            json!([{ "id": 1, "name": "a" }])
        );
        assert_eq!(
            actors.gateway.session().etag_for("http://localhost/svc/db/actor/1").as_deref(),
            Some("E1")
        );
    }

    #[tokio::test]
    async fn test_fetch_one_forces_limit() {
        let mock = Arc::new(MockFetcher::new());
        mock.push_json(json!({ "items": [{ "id": 7 }], "limit": 1, "offset": 0, "hasMore": true }));

        let first = object(&mock)
            .query::<Value>(QueryOptions::new().take(50))
            .fetch_one()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.data(), &json!({ "id": 7 }));
        assert!(mock.last_request().unwrap().url.ends_with("?limit=1"));
    }

    #[tokio::test]
    async fn test_fetch_all_follows_has_more() {
        let mock = Arc::new(MockFetcher::new());
        mock.push_json(json!({ "items": [{ "id": 1 }, { "id": 2 }], "limit": 2, "offset": 0, "hasMore": true }))
            .push_json(json!({ "items": [{ "id": 3 }], "limit": 2, "offset": 2, "hasMore": false }));

        let mut seen = Vec::new();
        let all = object(&mock)
            .query::<Value>(QueryOptions::new().take(2))
            .fetch_all_with_progress(|items| seen.push(items.len()))
            .await
            .unwrap();

        assert_eq!(all.len(), 3);
        assert_eq!(all.count(), 3);
        assert!(!all.has_more());
        assert_eq!(seen, [2, 3]);
        let urls: Vec<_> = mock.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            [
                "http://localhost/svc/db/actor?limit=2",
                "http://localhost/svc/db/actor?limit=2&offset=2"
            ]
        );
    }

    #[tokio::test]
    async fn test_fetch_all_advances_cursor() {
        let mock = Arc::new(MockFetcher::new());
        mock.push_json(json!({ "items": [{ "id": 4 }, { "id": 9 }], "hasMore": true }))
            .push_json(json!({ "items": [], "hasMore": false }));

        object(&mock)
            .query::<Value>(QueryOptions::new().cursor("id", 0))
            .fetch_all()
            .await
            .unwrap();

        let requests = mock.requests();
        assert_eq!(q_param(&requests[0]).unwrap(), r#"{"id":{"$gt":0},"$orderby":{"id":"ASC"}}"#);
        assert_eq!(q_param(&requests[1]).unwrap(), r#"{"id":{"$gt":9},"$orderby":{"id":"ASC"}}"#);
    }

    #[tokio::test]
    async fn test_read_own_writes_after_create() {
        let mock = Arc::new(MockFetcher::new());
        mock.push_json(json!({ "id": 1, "name": "x", "_metadata": { "gtid": "3E11FA47:23" } }))
            .set_fallback(crate::http::HttpResponse::json(&json!({ "items": [], "hasMore": false })));
        let actors = object(&mock);

        let created = actors
            .create(&json!({ "name": "x" }))
            .await
            .unwrap();
        assert_eq!(created.gtid(), Some("3E11FA47:23"));
        assert_eq!(mock.requests()[0].json_body().unwrap(), json!({ "name": "x" }));

        let filter = DelegationFilter::new().field("name", Comparison::Like("x%".into()));
        actors
            .query::<Value>(QueryOptions::new().filter(filter.clone()).read_own_writes(true))
            .fetch()
            .await
            .unwrap();
        actors
            .query::<Value>(QueryOptions::new().filter(filter))
            .fetch()
            .await
            .unwrap();

        let requests = mock.requests();
        assert_eq!(
            q_param(&requests[1]).unwrap(),
            r#"{"name":{"$like":"x%"},"$asof":"3E11FA47:23"}"#
        );
        assert_eq!(q_param(&requests[2]).unwrap(), r#"{"name":{"$like":"x%"}}"#);
    }

    #[tokio::test]
    async fn test_update_sends_etag() {
        let mock = Arc::new(MockFetcher::new());
        mock.push_json(json!({ "id": 5, "name": "n", "_metadata": { "etag": "E2", "gtid": "G:2" } }));
        let actors = object(&mock);

        let updated = actors
            .update(&json!({ "name": "n", "id": 5 }), UpdateOptions::new().etag("E1"))
            .await
            .unwrap();
        assert_eq!(updated.etag(), Some("E2"));
        assert_eq!(actors.gateway.session().gtid().as_deref(), Some("G:2"));

        let request = mock.last_request().unwrap();
        assert_eq!(request.url, "http://localhost/svc/db/actor/5");
        assert_eq!(request.header_value("If-Match"), Some("E1"));
        assert_eq!(
            request.json_body().unwrap(),
            json!({ "name": "n", "id": 5, "_metadata": { "etag": "E1" } })
        );
    }

    #[tokio::test]
    async fn test_update_composite_key_without_etag() {
        let mock = Arc::new(MockFetcher::new());
        mock.push_json(json!({ "a": "x", "b": 2 }));
        let object = MrsService::with_fetcher(ServiceConfig::new("http://localhost/svc"), mock.clone())
            .schema("/db")
            .object("/pair", ["b", "a"]);

        object
            .update(&json!({ "a": "x", "b": 2, "c": true }), UpdateOptions::new())
            .await
            .unwrap();

        let request = mock.last_request().unwrap();
        assert_eq!(request.url, "http://localhost/svc/db/pair/x,2");
        assert_eq!(request.header_value("If-Match"), None);
        assert_eq!(request.json_body().unwrap(), json!({ "a": "x", "b": 2, "c": true }));
    }

    #[test]
    fn test_resource_id_components_are_escaped() {
        assert_eq!(resource_id_component(&json!(42)), "42");
        assert_eq!(resource_id_component(&json!("plain-id_1.x")), "plain-id_1.x");
        assert_eq!(resource_id_component(&json!("a/b?c#d,e f")), "a%2Fb%3Fc%23d%2Ce%20f");
        assert_eq!(resource_id_component(&json!("1+1")), "1%2B1");
        assert_eq!(resource_id_component(&json!("Zo\u{eb}")), "Zo%C3%AB");
        assert_eq!(resource_id_component(&Value::Null), "");
    }

    #[tokio::test]
    async fn test_update_escapes_string_keys() {
        let mock = Arc::new(MockFetcher::new());
        mock.push_json(json!({ "code": "a/b,c", "n": 1 }));
        let object = MrsService::with_fetcher(ServiceConfig::new("http://localhost/svc"), mock.clone())
            .schema("/db")
            .object("/codes", ["code"]);

        object
            .update(&json!({ "code": "a/b,c", "n": 1 }), UpdateOptions::new())
            .await
            .unwrap();
        assert_eq!(
            mock.last_request().unwrap().url,
            "http://localhost/svc/db/codes/a%2Fb%2Cc"
        );
    }

    #[tokio::test]
    async fn test_delete_with_as_of() {
        let mock = Arc::new(MockFetcher::new());
        mock.push_json(json!({ "itemsDeleted": 2, "_metadata": { "gtid": "G:9" } }))
            .push_json(json!({ "itemsDeleted": 0 }));
        let actors = object(&mock);
        actors.gateway.session().observe_gtid(Some("G:8"));

        let result = actors
            .delete(DeleteOptions::new(DelegationFilter::new().eq("id", 1)).read_own_writes(true))
            .await
            .unwrap();
        assert_eq!(result.items_deleted, 2);
        assert_eq!(q_param(&mock.last_request().unwrap()).unwrap(), r#"{"id":1,"$asof":"G:8"}"#);
        assert_eq!(actors.gateway.session().gtid().as_deref(), Some("G:9"));

        actors
            .delete(DeleteOptions::new(DelegationFilter::new().is_null("name")))
            .await
            .unwrap();
        let request = mock.last_request().unwrap();
        assert_eq!(request.method, crate::http::Method::Delete);
        assert_eq!(q_param(&request).unwrap(), r#"{"name":{"$null":null}}"#);
        assert_eq!(actors.gateway.session().gtid().as_deref(), Some("G:9"));
    }

    #[tokio::test]
    async fn test_create_rejects_non_objects() {
        let mock = Arc::new(MockFetcher::new());
        let err = object(&mock).create(&json!([1, 2])).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SerializeError);
        assert_eq!(mock.request_count(), 0);
    }
}
