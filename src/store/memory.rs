//! In-process document store.

use super::DocumentStore;
use crate::error::{EtlError, EtlResult};
use crate::plan::{execute, sort_records, AggregationPlan, SortKey};
use crate::record::Record;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Collections held in memory.
///
/// Each collection is an immutable snapshot behind an `Arc`; replacing a
/// collection swaps the snapshot under the write lock, so readers see either
/// the old or the new contents, never a mix.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Arc<Vec<Record>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self, collection: &str) -> EtlResult<Arc<Vec<Record>>> {
        let guard = self
            .collections
            .read()
            .map_err(|_| EtlError::store(collection, "lock poisoned"))?;
        Ok(guard.get(collection).cloned().unwrap_or_default())
    }

    fn swap(&self, collection: &str, records: Vec<Record>) -> EtlResult<()> {
        let mut guard = self
            .collections
            .write()
            .map_err(|_| EtlError::store(collection, "lock poisoned"))?;
        guard.insert(collection.to_string(), Arc::new(records));
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn replace_collection(&self, collection: &str, records: Vec<Record>) -> EtlResult<()> {
        self.swap(collection, records)
    }

    async fn count(&self, collection: &str) -> EtlResult<u64> {
        Ok(self.snapshot(collection)?.len() as u64)
    }

    async fn find_one(&self, collection: &str) -> EtlResult<Option<Record>> {
        Ok(self.snapshot(collection)?.first().cloned())
    }

    async fn aggregate(&self, source: &str, plan: &AggregationPlan, out: &str) -> EtlResult<()> {
        let input = self.snapshot(source)?;
        // A failing plan leaves `out` untouched
        let output = execute(plan, &input)?;
        self.swap(out, output)
    }

    async fn find_all(&self, collection: &str) -> EtlResult<Vec<Record>> {
        Ok(self.snapshot(collection)?.as_ref().clone())
    }

    async fn find_sorted(&self, collection: &str, sort: &[SortKey]) -> EtlResult<Vec<Record>> {
        let mut records = self.find_all(collection).await?;
        sort_records(&mut records, sort);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatePolicy, FieldConfig};
    use crate::plan::sales_by_month_plan;
    use serde_json::json;

    fn rec(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_replace_does_not_accumulate() {
        let store = MemoryStore::new();
        store
            .replace_collection("raw", vec![rec(json!({"a": 1})), rec(json!({"a": 2}))])
            .await
            .unwrap();
        store.replace_collection("raw", vec![rec(json!({"a": 3}))]).await.unwrap();

        assert_eq!(store.count("raw").await.unwrap(), 1);
        assert_eq!(store.find_all("raw").await.unwrap(), vec![rec(json!({"a": 3}))]);
    }

    #[tokio::test]
    async fn test_missing_collection_is_empty() {
        let store = MemoryStore::new();
        assert_eq!(store.count("nope").await.unwrap(), 0);
        assert!(store.find_one("nope").await.unwrap().is_none());
        assert!(store.find_all("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_aggregate_keeps_previous_output() {
        let store = MemoryStore::new();
        let previous = vec![rec(json!({"_id": "2010-12", "total_sales": 1.0}))];
        store.replace_collection("gold", previous.clone()).await.unwrap();
        store
            .replace_collection(
                "clean",
                vec![rec(json!({"InvoiceDate": "garbage", "UnitPrice": 1.0, "Quantity": 1}))],
            )
            .await
            .unwrap();

        let plan = sales_by_month_plan(&FieldConfig::default(), DatePolicy::Fail);
        assert!(store.aggregate("clean", &plan, "gold").await.is_err());
        assert_eq!(store.find_all("gold").await.unwrap(), previous);
    }

    #[tokio::test]
    async fn test_find_sorted_ignores_stored_order() {
        let store = MemoryStore::new();
        let stored = vec![
            rec(json!({"_id": "Spain", "total_sales": 10.0})),
            rec(json!({"_id": "France", "total_sales": 90.0})),
            rec(json!({"_id": "Belgium", "total_sales": 10.0})),
        ];
        store.replace_collection("gold", stored.clone()).await.unwrap();

        let sorted = store
            .find_sorted("gold", &[SortKey::desc("total_sales"), SortKey::asc("_id")])
            .await
            .unwrap();
        let ids: Vec<&str> = sorted.iter().map(|r| r["_id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["France", "Belgium", "Spain"]);

        assert_eq!(store.find_sorted("gold", &[]).await.unwrap(), stored);
    }
}
