//! Minimal PostgREST client for the Supabase project holding player stats

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Server-side client. The service_role key bypasses RLS, never ship it to clients.
#[derive(Clone)]
pub struct SupabaseClient {
    http: Client,
    rest_base: String,
    service_role_key: String,
}

impl SupabaseClient {
    pub fn new(base_url: &str, service_role_key: &str) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            http,
            rest_base: format!("{}/rest/v1", base_url.trim_end_matches('/')),
            service_role_key: service_role_key.to_string(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.rest_base, table)
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
    }

    /// Rows of `table` matching PostgREST `params` (`("player_id", "eq.<id>")`, `("order", ..)`)
    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<T>, SupabaseError> {
        debug!(table, ?params, "Supabase select");
        let response = self
            .request(self.http.get(self.table_url(table)))
            .query(params)
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        checked(response)
            .await?
            .json()
            .await
            .map_err(SupabaseError::Parse)
    }

    /// At most one row; `None` when nothing matches
    pub async fn select_one<T: DeserializeOwned>(
        &self,
        table: &str,
        params: &[(&str, String)],
    ) -> Result<Option<T>, SupabaseError> {
        let mut params = params.to_vec();
        params.push(("limit", "1".to_string()));
        let mut rows: Vec<T> = self.select(table, &params).await?;
        Ok(rows.pop())
    }

    /// Insert `row`, merging into the existing row on `on_conflict`
    pub async fn upsert<T: Serialize>(
        &self,
        table: &str,
        row: &T,
        on_conflict: &str,
    ) -> Result<(), SupabaseError> {
        debug!(table, on_conflict, "Supabase upsert");
        let response = self
            .request(self.http.post(self.table_url(table)))
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(row)
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        checked(response).await.map(|_| ())
    }
}

async fn checked(response: Response) -> Result<Response, SupabaseError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SupabaseError::Api { status, body })
}

#[derive(Debug, thiserror::Error)]
pub enum SupabaseError {
    #[error("HTTP request failed: {0}")]
    Request(reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: StatusCode, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(reqwest::Error),
}
