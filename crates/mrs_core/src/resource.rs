//! Resource documents with hypermedia kept out of sight.
//!
//! Every document the service returns carries `links` and `_metadata` next
//! to the domain fields, and collections add `count`, `limit`, `offset` and
//! `hasMore`. The types here keep that bookkeeping readable through named
//! accessors while keys, lookups, serialization and mutation only ever see
//! the domain data.

use crate::error::{json_type_name, CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::ops::{Deref, DerefMut};

/// A JSON object.
pub type JsonObject = Map<String, Value>;

/// Key of the link list.
pub const LINKS: &str = "links";
/// Key of the resource metadata.
pub const METADATA: &str = "_metadata";

/// Keys hidden on a single resource.
pub const RESOURCE_HYPERMEDIA: &[&str] = &[LINKS, METADATA];

/// Relation between two resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub rel: String,
    pub href: String,
}

/// `_metadata` of a resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gtid: Option<String>,
    #[serde(flatten)]
    pub extra: JsonObject,
}

/// Restricted view over a document.
pub trait Facade {
    /// Visible keys, in document order.
    fn keys(&self) -> Vec<&str>;

    fn contains_key(&self, key: &str) -> bool;

    fn get(&self, key: &str) -> Option<&Value>;

    /// Assigns a field. Bookkeeping fields refuse with a named error.
    fn set(&mut self, key: &str, value: Value) -> CoreResult<Option<Value>>;

    /// Deletes a field. Bookkeeping fields refuse with a named error.
    fn remove(&mut self, key: &str) -> CoreResult<Option<Value>>;

    /// The visible data as JSON.
    fn to_json(&self) -> Value;
}

/// A single resource: domain data `T` plus its hypermedia.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceObject<T = JsonObject> {
    data: T,
    links: Vec<Link>,
    metadata: ResourceMetadata,
}

impl<T> ResourceObject<T> {
    pub fn new(data: T, links: Vec<Link>, metadata: ResourceMetadata) -> Self {
        Self {
            data,
            links,
            metadata,
        }
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut T {
        &mut self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn metadata(&self) -> &ResourceMetadata {
        &self.metadata
    }

    pub fn etag(&self) -> Option<&str> {
        self.metadata.etag.as_deref()
    }

    pub fn gtid(&self) -> Option<&str> {
        self.metadata.gtid.as_deref()
    }

    /// The `href` of the `self` link.
    pub fn self_link(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|link| link.rel == "self")
            .map(|link| link.href.as_str())
    }
}

impl<T: DeserializeOwned> ResourceObject<T> {
    /// Splits a raw document into domain data and hypermedia.
    pub fn from_json(value: Value) -> CoreResult<Self> {
        let map = match value {
            Value::Object(map) => map,
            other => return Err(CoreError::NotAnObject(json_type_name(&other))),
        };

        let mut links = Value::Null;
        let mut metadata = Value::Null;
        let mut rest = Map::new();
        for (key, value) in map {
            match key.as_str() {
                LINKS => links = value,
                METADATA => metadata = value,
                _ => {
                    rest.insert(key, value);
                }
            }
        }

        let links = if links.is_null() {
            Vec::new()
        } else {
            serde_json::from_value(links).map_err(invalid_document)?
        };
        let metadata = if metadata.is_null() {
            ResourceMetadata::default()
        } else {
            serde_json::from_value(metadata).map_err(invalid_document)?
        };
        let data = serde_json::from_value(Value::Object(rest)).map_err(invalid_document)?;

        Ok(Self {
            data,
            links,
            metadata,
        })
    }
}

fn invalid_document(error: serde_json::Error) -> CoreError {
    CoreError::InvalidDocument(error.to_string())
}

impl<T> Deref for ResourceObject<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

impl<T> DerefMut for ResourceObject<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.data
    }
}

impl<T: Serialize> Serialize for ResourceObject<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.data.serialize(serializer)
    }
}

impl Facade for ResourceObject<JsonObject> {
    fn keys(&self) -> Vec<&str> {
        self.data
            .keys()
            .map(String::as_str)
            .filter(|k| !RESOURCE_HYPERMEDIA.contains(k))
            .collect()
    }

    fn contains_key(&self, key: &str) -> bool {
        !RESOURCE_HYPERMEDIA.contains(&key) && self.data.contains_key(key)
    }

    fn get(&self, key: &str) -> Option<&Value> {
        if RESOURCE_HYPERMEDIA.contains(&key) {
            return None;
        }
        self.data.get(key)
    }

    fn set(&mut self, key: &str, value: Value) -> CoreResult<Option<Value>> {
        if RESOURCE_HYPERMEDIA.contains(&key) {
            return Err(CoreError::ReadOnlyField(key.to_string()));
        }
        Ok(self.data.insert(key.to_string(), value))
    }

    fn remove(&mut self, key: &str) -> CoreResult<Option<Value>> {
        if RESOURCE_HYPERMEDIA.contains(&key) {
            return Err(CoreError::UndeletableField(key.to_string()));
        }
        // Rebuild to keep the remaining fields in document order.
        let mut removed = None;
        let data = std::mem::take(&mut self.data);
        for (k, v) in data {
            if k == key {
                removed = Some(v);
            } else {
                self.data.insert(k, v);
            }
        }
        Ok(removed)
    }

    fn to_json(&self) -> Value {
        Value::Object(self.data.clone())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCollection {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    limit: u64,
    #[serde(default)]
    offset: u64,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    links: Vec<Link>,
}

/// A page of resources.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionResponse<T = JsonObject> {
    items: Vec<ResourceObject<T>>,
    count: u64,
    limit: u64,
    offset: u64,
    has_more: bool,
    links: Vec<Link>,
}

impl<T> CollectionResponse<T> {
    pub fn new(
        items: Vec<ResourceObject<T>>,
        limit: u64,
        offset: u64,
        has_more: bool,
        links: Vec<Link>,
    ) -> Self {
        Self {
            count: items.len() as u64,
            items,
            limit,
            offset,
            has_more,
            links,
        }
    }

    pub fn items(&self) -> &[ResourceObject<T>] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut [ResourceObject<T>] {
        &mut self.items
    }

    pub fn into_items(self) -> Vec<ResourceObject<T>> {
        self.items
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResourceObject<T>> {
        self.items.iter()
    }

    /// Appends another page: items are concatenated, counts summed and the
    /// pagination state taken from `page`.
    pub fn extend_with(&mut self, page: CollectionResponse<T>) {
        self.count += page.count;
        self.items.extend(page.items);
        self.limit = page.limit;
        self.offset = page.offset;
        self.has_more = page.has_more;
        self.links = page.links;
    }
}

impl<T> Default for CollectionResponse<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            count: 0,
            limit: 25,
            offset: 0,
            has_more: false,
            links: Vec::new(),
        }
    }
}

impl<T: DeserializeOwned> CollectionResponse<T> {
    /// Parses a collection document and wraps every item.
    pub fn from_json(value: Value) -> CoreResult<Self> {
        if !value.is_object() {
            return Err(CoreError::NotAnObject(json_type_name(&value)));
        }
        let raw: RawCollection = serde_json::from_value(value).map_err(invalid_document)?;
        let items = raw
            .items
            .into_iter()
            .map(ResourceObject::from_json)
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Self {
            count: raw.count.unwrap_or(items.len() as u64),
            items,
            limit: raw.limit,
            offset: raw.offset,
            has_more: raw.has_more,
            links: raw.links,
        })
    }
}

impl<T> IntoIterator for CollectionResponse<T> {
    type Item = ResourceObject<T>;
    type IntoIter = std::vec::IntoIter<ResourceObject<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a CollectionResponse<T> {
    type Item = &'a ResourceObject<T>;
    type IntoIter = std::slice::Iter<'a, ResourceObject<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// A collection serializes as its item list.
impl<T: Serialize> Serialize for CollectionResponse<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.items.len()))?;
        for item in &self.items {
            seq.serialize_element(item)?;
        }
        seq.end()
    }
}

/// A collection has no domain fields of its own; every key is bookkeeping.
impl Facade for CollectionResponse<JsonObject> {
    fn keys(&self) -> Vec<&str> {
        Vec::new()
    }

    fn contains_key(&self, _key: &str) -> bool {
        false
    }

    fn get(&self, _key: &str) -> Option<&Value> {
        None
    }

    fn set(&mut self, key: &str, _value: Value) -> CoreResult<Option<Value>> {
        Err(CoreError::ReadOnlyField(key.to_string()))
    }

    fn remove(&mut self, key: &str) -> CoreResult<Option<Value>> {
        Err(CoreError::UndeletableField(key.to_string()))
    }

    fn to_json(&self) -> Value {
        Value::Array(self.items.iter().map(Facade::to_json).collect())
    }
}
