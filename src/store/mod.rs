//! Document store access.
//!
//! Stages only see the [`DocumentStore`] trait: five logical operations over
//! named collections. [`MemoryStore`] evaluates plans in process;
//! [`MongoStore`] pushes them down to MongoDB.

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

use crate::error::EtlResult;
use crate::plan::{AggregationPlan, SortKey};
use crate::record::Record;
use async_trait::async_trait;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Replace the whole contents of `collection` with `records`.
    async fn replace_collection(&self, collection: &str, records: Vec<Record>) -> EtlResult<()>;

    /// Number of records in `collection` (0 if it does not exist).
    async fn count(&self, collection: &str) -> EtlResult<u64>;

    /// Any one record of `collection`.
    async fn find_one(&self, collection: &str) -> EtlResult<Option<Record>>;

    /// Run `plan` over `source` and replace `out` with the result.
    async fn aggregate(&self, source: &str, plan: &AggregationPlan, out: &str) -> EtlResult<()>;

    /// Every record of `collection`, in stored order.
    async fn find_all(&self, collection: &str) -> EtlResult<Vec<Record>>;

    /// Every record of `collection` ordered by `sort` (stored order if empty).
    async fn find_sorted(&self, collection: &str, sort: &[SortKey]) -> EtlResult<Vec<Record>>;
}
