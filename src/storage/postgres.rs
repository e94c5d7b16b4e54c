use anyhow::{Result, Context};
use async_trait::async_trait;
use sqlx::{Pool, Postgres, postgres::PgPoolOptions};
use sqlx::types::Json;
use serde_json::Value;
use tracing::debug;

use crate::crawler::task::{ResultData, TaskDetails};
use crate::storage::Pipeline;

/// Upserts each accepted page into a PostgreSQL table with a JSONB data column
pub struct PostgresPipeline {
    pool: Pool<Postgres>,

    /// Schema-qualified table name
    table: String,
}

/// Schema and table names are interpolated into SQL, so only plain identifiers pass
fn check_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());

    if !valid {
        anyhow::bail!("Invalid SQL identifier: {:?}", name);
    }

    Ok(())
}

fn row_data(result: &ResultData, details: &TaskDetails) -> Value {
    serde_json::json!({
        "name": details.name,
        "description": details.description,
        "mime_type": result.content.mime_type,
        "status_code": result.content.status_code,
        "started_at": details.started_at,
        "finished_at": details.finished_at,
        "data": result.data,
    })
}

impl PostgresPipeline {
    pub async fn new(connection_string: &str, schema_name: &str, table_name: &str) -> Result<Self> {
        check_identifier(schema_name)?;
        check_identifier(table_name)?;

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        let pipeline = Self {
            pool,
            table: format!("{}.{}", schema_name, table_name),
        };

        pipeline.ensure_table(schema_name).await?;

        debug!("Connected to PostgreSQL, storing pages in {}", pipeline.table);

        Ok(pipeline)
    }

    async fn ensure_table(&self, schema_name: &str) -> Result<()> {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema_name))
            .execute(&self.pool)
            .await
            .context(format!("Failed to create schema: {}", schema_name))?;

        let query = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                url TEXT PRIMARY KEY,
                route TEXT NOT NULL,
                content TEXT NOT NULL,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            self.table
        );

        sqlx::query(&query)
            .execute(&self.pool)
            .await
            .context(format!("Failed to create pages table: {}", self.table))?;

        Ok(())
    }
}

#[async_trait]
impl Pipeline for PostgresPipeline {
    fn name(&self) -> &str {
        "postgresql"
    }

    async fn save_to(&self, result: &ResultData, details: &TaskDetails) -> Result<()> {
        let query = format!(
            "INSERT INTO {} (url, route, content, data, created_at, updated_at)
             VALUES ($1, $2, $3, $4, NOW(), NOW())
             ON CONFLICT (url) DO UPDATE
             SET route = $2, content = $3, data = $4, updated_at = NOW()",
            self.table
        );

        sqlx::query(&query)
            .bind(result.url())
            .bind(&details.route)
            .bind(result.raw_text())
            .bind(Json(row_data(result, details)))
            .execute(&self.pool)
            .await
            .context("Failed to store page in PostgreSQL")?;

        debug!("Stored page for URL: {}", result.url());

        Ok(())
    }
}
