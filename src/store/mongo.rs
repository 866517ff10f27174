//! MongoDB-backed document store.

use super::DocumentStore;
use crate::error::{EtlError, EtlResult};
use crate::plan::{sort_document, AggregationPlan, SortKey};
use crate::record::Record;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::error::{Error as DriverError, ErrorKind};
use mongodb::{Client, Collection, Database};

/// Suffix of the collection used to stage a replacement before the swap.
const STAGING_SUFFIX: &str = "__staging";

/// Server code for a failed type conversion (`ConversionFailure`).
const CONVERSION_FAILURE: i32 = 241;

pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    /// Connect and ping, so an unreachable server fails here rather than in
    /// the first stage.
    pub async fn connect(uri: &str, database: &str) -> EtlResult<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| EtlError::Connection(e.to_string()))?;
        let db = client.database(database);

        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| EtlError::Connection(e.to_string()))?;

        tracing::info!("Connected to MongoDB database {}", database);
        Ok(Self { client, db })
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }

    /// Atomically rename `from` over `to`, dropping the old `to`.
    async fn swap_in(&self, from: &str, to: &str) -> EtlResult<()> {
        let db_name = self.db.name();
        self.client
            .database("admin")
            .run_command(doc! {
                "renameCollection": format!("{}.{}", db_name, from),
                "to": format!("{}.{}", db_name, to),
                "dropTarget": true,
            })
            .await
            .map_err(|e| driver_error(to, e))?;
        Ok(())
    }
}

fn driver_error(collection: &str, err: DriverError) -> EtlError {
    match err.kind.as_ref() {
        ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) => EtlError::Connection(err.to_string()),
        _ => EtlError::store(collection, err),
    }
}

/// Like [`driver_error`], but a date conversion failure inside a plan with a
/// strict date format becomes [`EtlError::DateParse`].
fn aggregate_error(collection: &str, err: DriverError, date_format: Option<&str>) -> EtlError {
    if let (ErrorKind::Command(command), Some(format)) = (err.kind.as_ref(), date_format) {
        if let Some(date_error) = conversion_failure(command.code, &command.message, format) {
            return date_error;
        }
    }
    driver_error(collection, err)
}

fn conversion_failure(code: i32, message: &str, format: &str) -> Option<EtlError> {
    if code != CONVERSION_FAILURE {
        return None;
    }
    // "Error parsing date string '13/45/2010 8:26'; ..."
    let value = quoted(message).unwrap_or(message);
    Some(EtlError::DateParse {
        value: value.to_string(),
        format: format.to_string(),
    })
}

fn quoted(message: &str) -> Option<&str> {
    let start = message.find('\'')? + 1;
    let len = message[start..].find('\'')?;
    Some(&message[start..start + len])
}

fn to_document(collection: &str, record: &Record) -> EtlResult<Document> {
    bson::to_document(record).map_err(|e| EtlError::store(collection, e))
}

fn to_record(document: Document) -> Record {
    match Bson::Document(document).into_relaxed_extjson() {
        serde_json::Value::Object(map) => map,
        // A BSON document always maps to a JSON object
        _ => Record::new(),
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn replace_collection(&self, collection: &str, records: Vec<Record>) -> EtlResult<()> {
        let staging_name = format!("{}{}", collection, STAGING_SUFFIX);
        let staging = self.collection(&staging_name);
        staging.drop().await.map_err(|e| driver_error(&staging_name, e))?;

        if records.is_empty() {
            self.db
                .create_collection(&staging_name)
                .await
                .map_err(|e| driver_error(&staging_name, e))?;
        } else {
            let docs = records
                .iter()
                .map(|r| to_document(collection, r))
                .collect::<EtlResult<Vec<_>>>()?;
            staging
                .insert_many(docs)
                .await
                .map_err(|e| driver_error(&staging_name, e))?;
        }

        self.swap_in(&staging_name, collection).await
    }

    async fn count(&self, collection: &str) -> EtlResult<u64> {
        self.collection(collection)
            .count_documents(doc! {})
            .await
            .map_err(|e| driver_error(collection, e))
    }

    async fn find_one(&self, collection: &str) -> EtlResult<Option<Record>> {
        let found = self
            .collection(collection)
            .find_one(doc! {})
            .await
            .map_err(|e| driver_error(collection, e))?;
        Ok(found.map(to_record))
    }

    async fn aggregate(&self, source: &str, plan: &AggregationPlan, out: &str) -> EtlResult<()> {
        let mut pipeline = plan.to_mongo();
        // `$out` replaces the target atomically when the pipeline succeeds
        pipeline.push(doc! { "$out": out });
        let date_format = plan.strict_date_format();

        let cursor = self
            .collection(source)
            .aggregate(pipeline)
            .await
            .map_err(|e| aggregate_error(source, e, date_format))?;
        let _: Vec<Document> = cursor
            .try_collect()
            .await
            .map_err(|e| aggregate_error(out, e, date_format))?;
        Ok(())
    }

    async fn find_all(&self, collection: &str) -> EtlResult<Vec<Record>> {
        let cursor = self
            .collection(collection)
            .find(doc! {})
            .await
            .map_err(|e| driver_error(collection, e))?;
        let docs: Vec<Document> = cursor.try_collect().await.map_err(|e| driver_error(collection, e))?;
        Ok(docs.into_iter().map(to_record).collect())
    }

    async fn find_sorted(&self, collection: &str, sort: &[SortKey]) -> EtlResult<Vec<Record>> {
        let coll = self.collection(collection);
        let mut find = coll.find(doc! {});
        if !sort.is_empty() {
            find = find.sort(sort_document(sort));
        }
        let cursor = find
            .await
            .map_err(|e| driver_error(collection, e))?;
        let docs: Vec<Document> = cursor.try_collect().await.map_err(|e| driver_error(collection, e))?;
        Ok(docs.into_iter().map(to_record).collect())
    }
}
