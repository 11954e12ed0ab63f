//! Core building blocks for the MRS client.
//!
//! This crate provides the synchronous pieces every request is built from:
//! - `filter`: Structured filter expressions
//! - `compile`: Filter serialization with null operator expansion
//! - `predicate`: Merging filters with ordering, `$asof` and cursors
//! - `projection`: Field selection for the `f` parameter
//! - `resource`: Resource documents with hidden hypermedia
//! - `consistency`: GTID and ETag bookkeeping

pub mod compile;
pub mod consistency;
pub mod error;
pub mod filter;
pub mod predicate;
pub mod projection;
pub mod resource;

pub use compile::{compile, expand_null_operators, stringify, FilterVisitor, JsonEmitter};
pub use consistency::{ConsistencyTracker, DEFAULT_ETAG_CAPACITY};
pub use error::{CoreError, CoreResult};
pub use filter::{
    Between, BinaryOperator, Comparison, ComparisonExpr, DataFilter, DelegationFilter,
    FieldFilter, FieldOperand, HighOrderFilter,
};
pub use predicate::{Cursor, OrderBy, RequestPredicate, SortOrder};
pub use projection::{FieldSelection, FieldToggle, Projection};
pub use resource::{
    CollectionResponse, Facade, JsonObject, Link, ResourceMetadata, ResourceObject,
};
