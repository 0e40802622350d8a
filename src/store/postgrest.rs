//! Supabase backing store over the PostgREST HTTP API
//!
//! Every operation is one HTTP request. The conditional task update is a
//! single `PATCH` with all three filters in the query string, so PostgREST
//! applies it as one `UPDATE ... WHERE` statement.

use super::{DeviceRow, FilterValue, RowKey, Store, StoreError, StoreResult, Table, TaskSelector};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// PostgREST store configuration
#[derive(Debug, Clone)]
pub struct PostgrestConfig {
    /// Project URL, e.g. `https://abc.supabase.co`
    pub base_url: String,
    pub api_key: String,
    /// Non-default Postgres schema, sent as `Accept-Profile`/`Content-Profile`
    pub schema: Option<String>,
    pub timeout: Duration,
}

impl Default for PostgrestConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            schema: None,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Row shape returned by `select=id`
#[derive(Debug, Deserialize)]
struct KeyRow {
    id: RowKey,
}

/// Error body PostgREST returns on 4xx/5xx
#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    message: Option<String>,
    code: Option<String>,
    details: Option<String>,
}

/// Store backed by a Supabase project's REST endpoint
pub struct PostgrestStore {
    config: PostgrestConfig,
    client: Client,
}

impl PostgrestStore {
    /// Create a new PostgREST store
    pub fn new(config: PostgrestConfig) -> Result<Self, StoreError> {
        if config.api_key.is_empty() {
            return Err(StoreError::NotConfigured(
                "Supabase API key is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        Ok(Self { config, client })
    }

    /// Build the REST URL for a table (pure function)
    fn table_url(base_url: &str, table: Table) -> String {
        format!("{}/rest/v1/{}", base_url.trim_end_matches('/'), table)
    }

    /// Build an `eq.` filter (pure function)
    fn eq_filter(value: &FilterValue) -> String {
        format!("eq.{}", value.to_query_literal())
    }

    /// Build an `in.(...)` filter; text keys are double-quoted (pure function)
    fn in_filter(keys: &[RowKey]) -> String {
        let items: Vec<String> = keys
            .iter()
            .map(|key| match key {
                RowKey::Int(v) => v.to_string(),
                RowKey::Text(v) => {
                    format!("\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\""))
                }
            })
            .collect();
        format!("in.({})", items.join(","))
    }

    fn authorized(&self, builder: RequestBuilder, writes: bool) -> RequestBuilder {
        let builder = builder
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key);

        match &self.config.schema {
            Some(schema) if writes => builder.header("Content-Profile", schema),
            Some(schema) => builder.header("Accept-Profile", schema),
            None => builder,
        }
    }

    async fn send(&self, table: Table, builder: RequestBuilder) -> StoreResult<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Self::check_status(table, response).await
    }

    /// Map non-2xx responses to `StoreError::Api`
    async fn check_status(table: Table, response: Response) -> StoreResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = Self::parse_error_body(&body);
        warn!(table = %table, status = status.as_u16(), "Store request rejected");

        Err(StoreError::Api {
            table: table.to_string(),
            status: status.as_u16(),
            message,
        })
    }

    /// Extract a readable message from a PostgREST error body (pure function)
    fn parse_error_body(body: &str) -> String {
        match serde_json::from_str::<PostgrestErrorBody>(body) {
            Ok(err) => {
                let mut message = err.message.unwrap_or_else(|| "unknown error".to_string());
                if let Some(code) = err.code {
                    message = format!("{message} (code {code})");
                }
                if let Some(details) = err.details {
                    message = format!("{message}: {details}");
                }
                message
            }
            Err(_) if body.is_empty() => "empty response body".to_string(),
            Err(_) => body.to_string(),
        }
    }

    async fn read_keys(table: Table, response: Response) -> StoreResult<Vec<RowKey>> {
        let rows: Vec<KeyRow> = response.json().await.map_err(|e| {
            StoreError::InvalidResponse(format!("Failed to parse {table} rows: {e}"))
        })?;
        Ok(rows.into_iter().map(|row| row.id).collect())
    }
}

#[async_trait]
impl Store for PostgrestStore {
    async fn upsert_device(&self, row: &DeviceRow) -> StoreResult<()> {
        let url = Self::table_url(&self.config.base_url, Table::Devices);
        debug!(device_id = %row.id, "Store -> upserting device status");

        let request = self.authorized(self.client.post(&url), true)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(row);

        self.send(Table::Devices, request).await?;
        Ok(())
    }

    async fn select_keys(
        &self,
        table: Table,
        column: &str,
        value: &FilterValue,
    ) -> StoreResult<Vec<RowKey>> {
        let url = Self::table_url(&self.config.base_url, table);
        debug!(table = %table, column = column, value = %value, "Store -> selecting keys");

        let filter = Self::eq_filter(value);
        let request = self
            .authorized(self.client.get(&url), false)
            .query(&[("select", "id"), (column, filter.as_str())]);

        let response = self.send(table, request).await?;
        Self::read_keys(table, response).await
    }

    async fn mark_tasks_solved(&self, selector: &TaskSelector) -> StoreResult<u64> {
        let url = Self::table_url(&self.config.base_url, Table::Task);
        let post_filter = Self::in_filter(&selector.post_keys);
        let game_filter = Self::eq_filter(&FilterValue::Key(selector.game_key.clone()));
        let character_filter =
            Self::eq_filter(&FilterValue::Key(selector.character_key.clone()));

        debug!(
            posts = %post_filter,
            game = %selector.game_key,
            character = %selector.character_key,
            "Store -> marking tasks solved"
        );

        let request = self
            .authorized(self.client.patch(&url), true)
            .query(&[
                ("post", post_filter.as_str()),
                ("game", game_filter.as_str()),
                ("character", character_filter.as_str()),
                ("select", "id"),
            ])
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({ "solved": true }));

        let response = self.send(Table::Task, request).await?;
        let updated = Self::read_keys(Table::Task, response).await?;
        Ok(updated.len() as u64)
    }

    async fn ping(&self) -> StoreResult<()> {
        let url = Self::table_url(&self.config.base_url, Table::Devices);
        let request = self
            .authorized(self.client.get(&url), false)
            .query(&[("select", "id"), ("limit", "1")]);

        self.send(Table::Devices, request).await?;
        Ok(())
    }
}
