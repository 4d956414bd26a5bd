//! MongoDB driver
//!
//! One document per bucket: the key columns as top-level fields and the
//! value map under `data`. Increments use `$inc` on `data.<path>` with an
//! upsert, so no read-modify-write is needed.

use super::{Driver, Identifier, JoinedIdentifier, StoredKey, WriteOp};
use crate::stats::error::{StatsError, StatsResult};
use crate::stats::packer::pack;
use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::bson::{doc, to_bson, Bson, Document};
use mongodb::options::{ClientOptions, IndexOptions, UpdateOptions};
use mongodb::{Client, Collection, IndexModel};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Connection parameters for the document store
#[derive(Debug, Clone)]
pub struct MongoOptions {
    pub uri: String,
    pub database: String,
    pub collection: String,
    pub timeout: Duration,
}

pub struct MongoDriver {
    collection: Collection<Document>,
    collection_name: String,
    mode: JoinedIdentifier,
    separator: String,
}

fn filter_document(stored: &StoredKey) -> Document {
    let mut filter = doc! { "key": stored.key.clone() };
    if let Some(granularity) = &stored.granularity {
        filter.insert("granularity", granularity.clone());
    }
    if let Some(at) = stored.at {
        filter.insert("at", at);
    }
    filter
}

fn stored_key_of(document: &Document) -> Option<StoredKey> {
    Some(StoredKey {
        key: document.get_str("key").ok()?.to_string(),
        granularity: document.get_str("granularity").ok().map(str::to_string),
        at: match document.get("at") {
            Some(Bson::Int64(at)) => Some(*at),
            Some(Bson::Int32(at)) => Some(i64::from(*at)),
            _ => None,
        },
    })
}

/// Build the update for one write; `None` when there is nothing to write.
fn update_document(op: WriteOp, values: &Map<String, Value>) -> StatsResult<Option<Document>> {
    let mut inc = Document::new();
    let mut set = Document::new();
    for (path, value) in pack(values) {
        let field = format!("data.{}", path);
        let bson = to_bson(&value).map_err(|e| StatsError::Serialization(e.to_string()))?;
        match (op, &value) {
            (WriteOp::Increment, Value::Number(_)) => {
                inc.insert(field, bson);
            }
            _ => {
                set.insert(field, bson);
            }
        }
    }

    let mut update = Document::new();
    if !inc.is_empty() {
        update.insert("$inc", inc);
    }
    if !set.is_empty() {
        update.insert("$set", set);
    }
    Ok(if update.is_empty() { None } else { Some(update) })
}

fn data_of(document: &Document) -> Map<String, Value> {
    match document.get_document("data") {
        Ok(data) => match Bson::Document(data.clone()).into_relaxed_extjson() {
            Value::Object(map) => map,
            _ => Map::new(),
        },
        Err(_) => Map::new(),
    }
}

impl MongoDriver {
    /// Connect and ping; fails fast when the server is unreachable.
    pub async fn connect(
        options: &MongoOptions,
        mode: JoinedIdentifier,
        separator: &str,
    ) -> StatsResult<Self> {
        let mut client_options = ClientOptions::parse(&options.uri).await?;
        client_options.connect_timeout = Some(options.timeout);
        client_options.server_selection_timeout = Some(options.timeout);
        client_options.app_name = Some(env!("CARGO_PKG_NAME").to_string());

        let client = Client::with_options(client_options)?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await?;

        let collection = client
            .database(&options.database)
            .collection::<Document>(&options.collection);

        Ok(Self {
            collection,
            collection_name: options.collection.clone(),
            mode,
            separator: separator.to_string(),
        })
    }

    async fn apply(
        &self,
        op: WriteOp,
        identifiers: &[Identifier],
        values: &Map<String, Value>,
    ) -> StatsResult<()> {
        let update = match update_document(op, values)? {
            Some(update) => update,
            None => return Ok(()),
        };
        let options = UpdateOptions::builder().upsert(true).build();

        for identifier in identifiers {
            let stored = identifier.join(self.mode, &self.separator);
            self.collection
                .update_one(filter_document(&stored), update.clone(), options.clone())
                .await?;
        }

        debug!(collection = %self.collection_name, count = identifiers.len(), ?op, "mongo write");
        Ok(())
    }
}

#[async_trait]
impl Driver for MongoDriver {
    fn name(&self) -> &'static str {
        "mongo"
    }

    fn target(&self) -> String {
        self.collection_name.clone()
    }

    async fn inc(&self, identifiers: &[Identifier], values: &Map<String, Value>) -> StatsResult<()> {
        self.apply(WriteOp::Increment, identifiers, values).await
    }

    async fn set(&self, identifiers: &[Identifier], values: &Map<String, Value>) -> StatsResult<()> {
        self.apply(WriteOp::Set, identifiers, values).await
    }

    async fn get(&self, identifiers: &[Identifier]) -> StatsResult<Vec<Map<String, Value>>> {
        if identifiers.is_empty() {
            return Ok(Vec::new());
        }

        let stored: Vec<StoredKey> = identifiers
            .iter()
            .map(|id| id.join(self.mode, &self.separator))
            .collect();
        let clauses: Vec<Document> = stored.iter().map(filter_document).collect();

        let mut found: HashMap<StoredKey, Map<String, Value>> = HashMap::new();
        let mut cursor = self.collection.find(doc! { "$or": clauses }, None).await?;
        while let Some(document) = cursor.try_next().await? {
            if let Some(key) = stored_key_of(&document) {
                found.insert(key, data_of(&document));
            }
        }

        Ok(stored
            .iter()
            .map(|key| found.remove(key).unwrap_or_default())
            .collect())
    }

    async fn setup(&self) -> StatsResult<()> {
        let keys = match self.mode {
            JoinedIdentifier::Full => doc! { "key": 1 },
            JoinedIdentifier::Partial => doc! { "key": 1, "at": 1 },
            JoinedIdentifier::Separated => doc! { "key": 1, "granularity": 1, "at": 1 },
        };
        let index = IndexModel::builder()
            .keys(keys)
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.collection.create_index(index, None).await?;
        Ok(())
    }
}
