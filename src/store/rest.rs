use crate::error::{FeedError, PersistenceError};
use crate::events::Reading;
use crate::persistence::PersistenceGateway;
use crate::store::record::{InsertRow, StoredReading};
use crate::store::{BackendCredentials, ReadingStore};
use log::debug;
use reqwest::{Client, RequestBuilder};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// REST client for the readings table
///
/// Talks to a PostgREST-style endpoint at `{url}/rest/v1/{table}`. Reads
/// serve the poll feed, writes serve the persistence worker.
pub struct RestStore {
    client: Client,
    credentials: BackendCredentials,
    schema: String,
    table: String,
    user_id: Option<String>,
}

impl RestStore {
    /// Create a new REST store
    ///
    /// # Arguments
    ///
    /// * `credentials` - Backend URL and API key
    /// * `schema` - Database schema holding the table
    /// * `table` - Readings table name
    /// * `request_timeout` - Per-request HTTP timeout
    pub fn new(
        credentials: BackendCredentials,
        schema: impl Into<String>,
        table: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, FeedError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| FeedError::RequestFailed(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            credentials,
            schema: schema.into(),
            table: table.into(),
            user_id: None,
        })
    }

    /// Restrict reads to one user's rows
    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    fn table_url(&self) -> String {
        format!(
            "{}/rest/v1/{}",
            self.credentials.url.trim_end_matches('/'),
            self.table
        )
    }

    /// URL for the most recent `limit` rows, newest first
    pub fn recent_url(&self, limit: usize) -> String {
        let mut url = format!(
            "{}?select=*&order=timestamp.desc&limit={}",
            self.table_url(),
            limit
        );
        if let Some(user_id) = &self.user_id {
            url.push_str(&format!("&user_id=eq.{}", user_id));
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request
            .header("apikey", &self.credentials.key)
            .header("Authorization", format!("Bearer {}", self.credentials.key));
        if self.schema == "public" {
            request
        } else {
            request
                .header("Accept-Profile", &self.schema)
                .header("Content-Profile", &self.schema)
        }
    }
}

impl ReadingStore for RestStore {
    fn fetch_recent<'a>(
        &'a self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StoredReading>, FeedError>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.recent_url(limit);
            debug!("Fetching recent readings from {}", url);

            let response = self.authorize(self.client.get(&url)).send().await?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(FeedError::BadStatus { status, body });
            }

            response
                .json::<Vec<StoredReading>>()
                .await
                .map_err(|e| FeedError::DecodeError(e.to_string()))
        })
    }
}

impl PersistenceGateway for RestStore {
    fn save<'a>(
        &'a self,
        user_id: &'a str,
        reading: &'a Reading,
    ) -> Pin<Box<dyn Future<Output = Result<(), PersistenceError>> + Send + 'a>> {
        Box::pin(async move {
            let row = InsertRow::new(user_id, reading);

            let response = self
                .authorize(self.client.post(self.table_url()))
                .header("Prefer", "return=minimal")
                .json(&row)
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(PersistenceError::Rejected { status, body });
            }

            Ok(())
        })
    }
}
