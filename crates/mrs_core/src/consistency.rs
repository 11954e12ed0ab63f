//! Read-your-writes and collision bookkeeping.

use crate::resource::{ResourceMetadata, ResourceObject};
use indexmap::IndexMap;

/// Number of ETags kept before the least recently seen ones are dropped.
pub const DEFAULT_ETAG_CAPACITY: usize = 4096;

/// Last known GTID of a session and the ETags of resources it has seen.
#[derive(Debug, Clone)]
pub struct ConsistencyTracker {
    gtid: Option<String>,
    etags: IndexMap<String, String>,
    etag_capacity: usize,
}

impl Default for ConsistencyTracker {
    fn default() -> Self {
        Self::with_etag_capacity(DEFAULT_ETAG_CAPACITY)
    }
}

impl ConsistencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker remembering at most `capacity` ETags.
    pub fn with_etag_capacity(capacity: usize) -> Self {
        Self {
            gtid: None,
            etags: IndexMap::new(),
            etag_capacity: capacity,
        }
    }

    pub fn gtid(&self) -> Option<&str> {
        self.gtid.as_deref()
    }

    /// Records the GTID of a write response. A response without one leaves
    /// the last known GTID in place.
    pub fn observe_gtid(&mut self, gtid: Option<&str>) {
        if let Some(gtid) = gtid {
            self.gtid = Some(gtid.to_string());
        }
    }

    /// Records the GTID found in a response's `_metadata`.
    pub fn observe_metadata(&mut self, metadata: Option<&ResourceMetadata>) {
        self.observe_gtid(metadata.and_then(|m| m.gtid.as_deref()));
    }

    /// The `$asof` value for a request.
    pub fn as_of(&self, read_own_writes: bool) -> Option<&str> {
        if read_own_writes {
            self.gtid()
        } else {
            None
        }
    }

    /// Remembers the ETag of a resource under its `self` link, evicting the
    /// least recently seen entry once the capacity is reached.
    pub fn record_etag<T>(&mut self, resource: &ResourceObject<T>) {
        if let (Some(href), Some(etag)) = (resource.self_link(), resource.etag()) {
            self.etags.shift_remove(href);
            self.etags.insert(href.to_string(), etag.to_string());
            while self.etags.len() > self.etag_capacity {
                self.etags.shift_remove_index(0);
            }
        }
    }

    /// The ETag last seen for a resource URL.
    pub fn etag_for(&self, url: &str) -> Option<&str> {
        self.etags.get(url).map(String::as_str)
    }

    pub fn etag_count(&self) -> usize {
        self.etags.len()
    }

    pub fn clear(&mut self) {
        self.gtid = None;
        self.etags.clear();
    }
}
