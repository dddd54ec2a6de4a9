//! PostgREST client for the household inventory backend
//!
//! This crate exposes the handful of reads and writes the expiry countdown
//! needs from a Supabase project:
//!
//! - inventory items by expiry range, and the newest items without a typed expiry
//! - household members
//! - device tokens from the `user_tokens` table and the `users.fcm_tokens` map
//! - notification records, read by id and merge-written by id

mod model;
mod query;

use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use thiserror::Error;
use url::Url;

pub use model::{ItemRecord, NotificationDocument};
pub use query::{Query, SortOrder};

use model::{TokenMapRow, TokenRow, UserIdRow};

pub const ITEMS_TABLE: &str = "raw_materials";
pub const USERS_TABLE: &str = "users";
pub const TOKENS_TABLE: &str = "user_tokens";
pub const NOTIFICATIONS_TABLE: &str = "notifications";

/// Rows requested per page. Matches the default `max_rows` of a Supabase
/// project, so a full page is never cut short by the server.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Removes one key from `users.fcm_tokens` server side
pub const REMOVE_MAP_TOKEN_RPC: &str = "remove_fcm_token";

/// Error body returned by PostgREST
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PostgrestApiErrorDetails {
    pub code: Option<String>,
    pub message: Option<String>,
    pub details: Option<String>,
    pub hint: Option<String>,
}

impl fmt::Display for PostgrestApiErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(code) = &self.code {
            parts.push(format!("Code: {}", code));
        }
        if let Some(message) = &self.message {
            parts.push(format!("Message: {}", message));
        }
        if let Some(details) = &self.details {
            parts.push(format!("Details: {}", details));
        }
        if let Some(hint) = &self.hint {
            parts.push(format!("Hint: {}", hint));
        }
        write!(f, "{}", parts.join(", "))
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("API error: {details} (Status: {status})")]
    ApiError {
        details: PostgrestApiErrorDetails,
        status: reqwest::StatusCode,
    },

    #[error("API error (unparsed): {message} (Status: {status})")]
    UnparsedApiError {
        message: String,
        status: reqwest::StatusCode,
    },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Supabase REST client scoped to the inventory tables
#[derive(Clone)]
pub struct StoreClient {
    base_url: String,
    http_client: Client,
    headers: HeaderMap,
    page_size: usize,
}

impl StoreClient {
    /// Create a client. `api_key` is sent both as `apikey` and as the bearer
    /// token, so a service-role key bypasses row level security.
    pub fn new(base_url: &str, api_key: &str, http_client: Client) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("apikey", header_value(api_key)?);
        headers.insert(
            "Authorization",
            header_value(&format!("Bearer {}", api_key))?,
        );
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            headers,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Rows per page for the item scans. Must not exceed the project's
    /// `max_rows`, or pages come back short and paging stops early.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Every item whose typed expiry lies in `[start, end]`, fetched page
    /// by page
    pub async fn items_expiring_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ItemRecord>> {
        let query = Query::new()
            .select("*")
            .gte("expiry_ts", &timestamp(start))
            .lte("expiry_ts", &timestamp(end))
            .order("expiry_ts", SortOrder::Ascending)
            .order("path", SortOrder::Ascending);
        self.select_pages(ITEMS_TABLE, &query, None).await
    }

    /// The newest `limit` items that have no typed expiry
    pub async fn recent_legacy_items(&self, limit: usize) -> Result<Vec<ItemRecord>> {
        let query = Query::new()
            .select("*")
            .is_null("expiry_ts")
            .order("created_at", SortOrder::Descending)
            .order("path", SortOrder::Ascending);
        self.select_pages(ITEMS_TABLE, &query, Some(limit)).await
    }

    /// Ids of every user whose `family_id` matches
    pub async fn family_member_ids(&self, family_id: &str) -> Result<Vec<String>> {
        let query = Query::new().select("id").eq("family_id", family_id);
        let rows: Vec<UserIdRow> = self.select(USERS_TABLE, &query).await?;
        Ok(rows.into_iter().map(|row| row.id).collect())
    }

    /// Tokens registered in the `user_tokens` table
    pub async fn collection_tokens(&self, user_id: &str) -> Result<Vec<String>> {
        let query = Query::new().select("token").eq("user_id", user_id);
        let rows: Vec<TokenRow> = self.select(TOKENS_TABLE, &query).await?;
        Ok(rows
            .into_iter()
            .map(|row| row.token)
            .filter(|token| !token.is_empty())
            .collect())
    }

    /// Keys of the user's `fcm_tokens` map. A missing user has no tokens.
    pub async fn map_tokens(&self, user_id: &str) -> Result<Vec<String>> {
        let query = Query::new().select("fcm_tokens").eq("id", user_id).limit(1);
        let rows: Vec<TokenMapRow> = self.select(USERS_TABLE, &query).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.fcm_tokens)
            .map(|map| map.into_iter().map(|(token, _)| token).filter(|t| !t.is_empty()).collect())
            .unwrap_or_default())
    }

    pub async fn delete_collection_token(&self, user_id: &str, token: &str) -> Result<()> {
        let query = Query::new().eq("user_id", user_id).eq("token", token);
        let url = self.table_url(TOKENS_TABLE, &query)?;
        debug!("Deleting token row for user {}", user_id);

        let response = self
            .http_client
            .delete(url)
            .headers(self.headers.clone())
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    pub async fn delete_map_token(&self, user_id: &str, token: &str) -> Result<()> {
        let url = self.rpc_url(REMOVE_MAP_TOKEN_RPC)?;
        debug!("Removing fcm_tokens entry for user {}", user_id);

        let response = self
            .http_client
            .post(url)
            .headers(self.headers.clone())
            .json(&json!({ "p_user_id": user_id, "p_token": token }))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    /// Read one notification by its household-scoped id
    pub async fn get_notification(
        &self,
        family_id: &str,
        id: &str,
    ) -> Result<Option<NotificationDocument>> {
        let query = Query::new()
            .select("*")
            .eq("family_id", family_id)
            .eq("id", id)
            .limit(1);
        let rows: Vec<NotificationDocument> = self.select(NOTIFICATIONS_TABLE, &query).await?;
        Ok(rows.into_iter().next())
    }

    /// Upsert a notification. Columns absent from `document` keep their
    /// stored values.
    pub async fn merge_notification(&self, document: &NotificationDocument) -> Result<()> {
        if document.id.is_empty() || document.family_id.is_empty() {
            return Err(StoreError::InvalidParameters(
                "notification id and family_id are required".to_string(),
            ));
        }

        let query = Query::new().on_conflict("family_id,id");
        let url = self.table_url(NOTIFICATIONS_TABLE, &query)?;

        let mut headers = self.headers.clone();
        headers.insert(
            HeaderName::from_static("prefer"),
            HeaderValue::from_static("resolution=merge-duplicates,return=minimal"),
        );

        let response = self
            .http_client
            .post(url)
            .headers(headers)
            .json(document)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, query: &Query) -> Result<Vec<T>> {
        let url = self.table_url(table, query)?;

        let response = self
            .http_client
            .get(url)
            .headers(self.headers.clone())
            .send()
            .await?;
        let response = check_status(response).await?;

        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| StoreError::DeserializationError(e.to_string()))
    }

    /// Pages through `query` until a short page comes back or `limit` rows
    /// have been read. `query` must be ordered on a unique key.
    async fn select_pages<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query,
        limit: Option<usize>,
    ) -> Result<Vec<T>> {
        let mut rows: Vec<T> = Vec::new();
        loop {
            let wanted = match limit {
                Some(limit) if rows.len() >= limit => break,
                Some(limit) => (limit - rows.len()).min(self.page_size),
                None => self.page_size,
            };
            let page_query = query.clone().limit(wanted).offset(rows.len());
            let page: Vec<T> = self.select(table, &page_query).await?;
            let received = page.len();
            debug!("{} page at offset {}: {} rows", table, rows.len(), received);
            rows.extend(page);
            if received < wanted {
                break;
            }
        }
        Ok(rows)
    }

    fn table_url(&self, table: &str, query: &Query) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/rest/v1/{}", self.base_url, table))?;
        if !query.pairs().is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query.pairs() {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn rpc_url(&self, function: &str) -> Result<Url> {
        Ok(Url::parse(&format!(
            "{}/rest/v1/rpc/{}",
            self.base_url, function
        ))?)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| StoreError::InvalidParameters("invalid header value".to_string()))
}

fn timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error response".to_string());

    match serde_json::from_str::<PostgrestApiErrorDetails>(&error_text) {
        Ok(details) => Err(StoreError::ApiError { details, status }),
        Err(_) => Err(StoreError::UnparsedApiError {
            message: error_text,
            status,
        }),
    }
}
