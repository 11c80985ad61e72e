//! PostgREST client for the hosted backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::realtime;
use super::{RealtimeMessage, RemoteError, RemoteStore, Subscription};
use crate::table::{Row, SyncTable};

/// Default timeout applied to every REST request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for the hosted backend.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Project URL (e.g., "https://xyz.example.co" or "http://localhost:54321")
    pub url: String,
    /// Public API key sent with every request
    pub api_key: String,
    /// Session token of the signed-in user; requests fall back to the API key
    pub access_token: Option<String>,
    pub request_timeout: Duration,
}

impl RemoteConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            access_token: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Token for the `Authorization` header.
    pub fn bearer(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.api_key)
    }

    /// Base URL for HTTP requests, without a trailing slash.
    pub fn http_base_url(&self) -> String {
        // Convert ws(s) to http(s) if needed
        let base_url = if self.url.starts_with("ws://") {
            self.url.replace("ws://", "http://")
        } else if self.url.starts_with("wss://") {
            self.url.replace("wss://", "https://")
        } else if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            format!("http://{}", self.url)
        } else {
            self.url.clone()
        };

        base_url.trim_end_matches('/').to_string()
    }

    /// Base URL for the realtime websocket, without a trailing slash.
    pub fn ws_base_url(&self) -> String {
        let http = self.http_base_url();
        if let Some(rest) = http.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = http.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            http
        }
    }
}

/// Error body returned by PostgREST.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

fn error_from_response(status: u16, body: &str) -> RemoteError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => {
            let mut message = parsed
                .message
                .unwrap_or_else(|| format!("Server returned status {}", status));
            if let Some(details) = parsed.details {
                message.push_str(&format!(": {}", details));
            }
            if let Some(hint) = parsed.hint {
                message.push_str(&format!(" (hint: {})", hint));
            }
            RemoteError::http(status, parsed.code, message)
        }
        Err(_) if body.trim().is_empty() => {
            RemoteError::http(status, None, format!("Server returned status {}", status))
        }
        Err(_) => RemoteError::http(status, None, body.trim().to_string()),
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::timeout(e.to_string())
    } else if e.is_decode() {
        RemoteError::decode(e.to_string())
    } else {
        RemoteError::network(e.to_string())
    }
}

/// [`RemoteStore`] backed by the backend's REST and realtime endpoints.
#[derive(Debug, Clone)]
pub struct RestRemote {
    config: RemoteConfig,
    client: reqwest::Client,
}

impl RestRemote {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn table_url(&self, table: SyncTable) -> String {
        format!("{}/rest/v1/{}", self.config.http_base_url(), table.name())
    }

    fn row_url(&self, table: SyncTable, id: &str) -> String {
        format!("{}?id=eq.{}", self.table_url(table), urlencoding::encode(id))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = request
            .header("apikey", &self.config.api_key)
            .bearer_auth(self.config.bearer())
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(error_from_response(status, &body))
    }

    async fn fetch_rows(&self, url: String) -> Result<Vec<Row>, RemoteError> {
        let response = self.send(self.client.get(url)).await?;
        response
            .json::<Vec<Row>>()
            .await
            .map_err(|e| RemoteError::decode(e.to_string()))
    }
}

#[async_trait]
impl RemoteStore for RestRemote {
    async fn select(&self, table: SyncTable) -> Result<Vec<Row>, RemoteError> {
        self.fetch_rows(format!("{}?select=*", self.table_url(table)))
            .await
    }

    async fn select_one(&self, table: SyncTable, id: &str) -> Result<Option<Row>, RemoteError> {
        let rows = self
            .fetch_rows(format!("{}&select=*", self.row_url(table, id)))
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn insert(&self, table: SyncTable, row: &Row) -> Result<(), RemoteError> {
        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=minimal")
            .json(row);
        self.send(request).await?;
        Ok(())
    }

    async fn update(&self, table: SyncTable, id: &str, fields: &Row) -> Result<(), RemoteError> {
        let request = self
            .client
            .patch(self.row_url(table, id))
            .header("Prefer", "return=minimal")
            .json(fields);
        self.send(request).await?;
        Ok(())
    }

    async fn delete(&self, table: SyncTable, id: &str) -> Result<(), RemoteError> {
        self.send(self.client.delete(self.row_url(table, id))).await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        tables: &[SyncTable],
        sink: mpsc::UnboundedSender<RealtimeMessage>,
    ) -> Result<Subscription, RemoteError> {
        let url = realtime::socket_url(&self.config);
        let task = tokio::spawn(realtime::run(
            url,
            self.config.bearer().to_string(),
            tables.to_vec(),
            sink,
        ));
        Ok(Subscription::new(task))
    }
}
