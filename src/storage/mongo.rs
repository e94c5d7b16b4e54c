use anyhow::{Result, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::{Client, Collection, options::{ClientOptions, ReplaceOptions}};
use mongodb::bson::{doc, Document};
use serde::{Serialize, Deserialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::crawler::task::{ResultData, TaskDetails};
use crate::storage::Pipeline;

/// Stored shape of a crawled page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageDocument {
    pub url: String,
    pub route: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: String,
    pub status_code: Option<u16>,
    pub raw_content: String,
    pub data: HashMap<String, Value>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PageDocument {
    pub fn from_result(result: &ResultData, details: &TaskDetails) -> Self {
        Self {
            url: result.url().to_string(),
            route: details.route.clone(),
            name: details.name.clone(),
            description: details.description.clone(),
            mime_type: result.content.mime_type.clone(),
            status_code: result.content.status_code,
            raw_content: result.raw_text().to_string(),
            data: result.data.clone(),
            started_at: details.started_at,
            finished_at: details.finished_at,
        }
    }
}

/// Upserts each accepted page into a MongoDB collection, keyed by URL
pub struct MongoPipeline {
    collection: Collection<Document>,
}

impl MongoPipeline {
    pub async fn new(connection_string: &str, database_name: &str, collection: &str) -> Result<Self> {
        let client_options = ClientOptions::parse(connection_string)
            .await
            .context(format!("Failed to parse MongoDB connection string: {}", connection_string))?;

        let client = Client::with_options(client_options)
            .context("Failed to create MongoDB client")?;

        let database = client.database(database_name);

        database.list_collection_names(None)
            .await
            .context("Failed to connect to MongoDB")?;

        debug!("Connected to MongoDB database: {}", database_name);

        Ok(Self {
            collection: database.collection(collection),
        })
    }
}

#[async_trait]
impl Pipeline for MongoPipeline {
    fn name(&self) -> &str {
        "mongodb"
    }

    async fn save_to(&self, result: &ResultData, details: &TaskDetails) -> Result<()> {
        let page = PageDocument::from_result(result, details);

        let document = mongodb::bson::to_document(&page)
            .context("Failed to convert page to BSON document")?;

        let filter = doc! {
            "url": &page.url,
        };

        self.collection.replace_one(filter, document, ReplaceOptions::builder().upsert(true).build())
            .await
            .context("Failed to store page in MongoDB")?;

        debug!("Stored page for URL: {}", page.url);

        Ok(())
    }
}
