//! PostgREST-style HTTP adapter for [`RemoteClient`].
//!
//! Rows live under `{base_url}/rest/v1/{table}`. The server is expected to
//! assign `id`, `seq` and timestamps and to bump `version` on every write.

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use super::{RemoteClient, RemoteError, RemoteRecord, RemoteResult, Session};
use crate::config::RemoteConfig;
use crate::error::Result;
use crate::models::{EntityTable, Payload, SyncCursor};
use crate::util::compact_text;

const REST_PREFIX: &str = "rest/v1";

#[derive(Clone)]
pub struct HttpRemoteClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpRemoteClient {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| RemoteError::Transient(format!("failed to build HTTP client: {error}")))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    fn table_url(&self, table: EntityTable) -> String {
        format!("{}/{REST_PREFIX}/{}", self.base_url, table.as_str())
    }

    fn authorized(&self, request: RequestBuilder, session: &Session) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&session.access_token)
            .header(reqwest::header::ACCEPT, "application/json")
    }

    /// Send a write that returns the affected rows and expect exactly one.
    async fn write_one(
        &self,
        request: RequestBuilder,
        session: &Session,
        what: &str,
    ) -> RemoteResult<RemoteRecord> {
        let request = self
            .authorized(request, session)
            .header("Prefer", "return=representation");
        let rows: Vec<RemoteRecord> = decode(send(request).await?).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| RemoteError::Rejected(format!("{what}: no matching row")))
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn list_since(
        &self,
        session: &Session,
        table: EntityTable,
        cursor: Option<SyncCursor>,
        limit: usize,
    ) -> RemoteResult<Vec<RemoteRecord>> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("owner_id", format!("eq.{}", session.owner_id)),
            ("order", "updated_at.asc,seq.asc".to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("or", cursor_filter(cursor)));
        }

        let request = self
            .authorized(self.client.get(self.table_url(table)), session)
            .query(&query);
        let rows: Vec<RemoteRecord> = decode(send(request).await?).await?;
        tracing::debug!(table = %table, rows = rows.len(), "Listed remote rows");
        Ok(rows)
    }

    async fn insert(
        &self,
        session: &Session,
        table: EntityTable,
        fields: &Payload,
    ) -> RemoteResult<RemoteRecord> {
        let mut body = fields.clone();
        body.insert("owner_id".to_string(), Value::String(session.owner_id.clone()));

        let request = self.client.post(self.table_url(table)).json(&body);
        self.write_one(request, session, "insert").await
    }

    async fn update_by_id(
        &self,
        session: &Session,
        table: EntityTable,
        remote_id: &str,
        fields: &Payload,
    ) -> RemoteResult<RemoteRecord> {
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&row_filter(session, remote_id))
            .json(fields);
        self.write_one(request, session, &format!("update {table}/{remote_id}"))
            .await
    }

    async fn mark_deleted(
        &self,
        session: &Session,
        table: EntityTable,
        remote_id: &str,
    ) -> RemoteResult<RemoteRecord> {
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&row_filter(session, remote_id))
            .json(&serde_json::json!({ "is_deleted": true }));
        self.write_one(request, session, &format!("delete {table}/{remote_id}"))
            .await
    }
}

fn row_filter(session: &Session, remote_id: &str) -> [(&'static str, String); 2] {
    [
        ("id", format!("eq.{remote_id}")),
        ("owner_id", format!("eq.{}", session.owner_id)),
    ]
}

/// Rows strictly after `cursor` in `(updated_at, seq)` order.
fn cursor_filter(cursor: SyncCursor) -> String {
    let at = cursor
        .updated_at
        .to_rfc3339_opts(SecondsFormat::Micros, true);
    format!(
        "(updated_at.gt.\"{at}\",and(updated_at.eq.\"{at}\",seq.gt.{}))",
        cursor.seq
    )
}

async fn send(request: RequestBuilder) -> RemoteResult<Response> {
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &body))
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> RemoteResult<T> {
    response.json::<T>().await.map_err(|error| {
        RemoteError::Transient(format!("invalid response body: {error}"))
    })
}

fn transport_error(error: reqwest::Error) -> RemoteError {
    RemoteError::Transient(error.to_string())
}

/// Server-side and throttling failures are worth retrying; any other 4xx is final.
/// An expired token is retried too, so queued work survives until the session is refreshed.
fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    let message = parse_api_error(status, body);
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::UNAUTHORIZED
    {
        RemoteError::Transient(message)
    } else {
        RemoteError::Rejected(message)
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    error: Option<String>,
    details: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return match payload.details {
                Some(details) if !details.trim().is_empty() => format!(
                    "{} ({}): {}",
                    message.trim(),
                    status.as_u16(),
                    compact_text(&details)
                ),
                _ => format!("{} ({})", message.trim(), status.as_u16()),
            };
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}
