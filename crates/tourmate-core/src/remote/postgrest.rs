//! REST client for a PostgREST-style backend (Supabase and friends).
//!
//! Rows live under `{base}/rest/v1/{table}`; password sign-in goes through
//! `{base}/auth/v1/token`. Every failure is classified into a
//! [`RemoteError`] before it leaves this module.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{Filter, Query, RemoteClient, RemoteError, RemoteIdentity, Row, SessionData};
use crate::models::Collection;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Token lifetime assumed when the auth response omits `expires_in`.
const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// Backend client. Requests carry the anon key, plus the session's bearer
/// token once signed in.
pub struct PostgrestClient {
    client: Client,
    base_url: String,
    anon_key: String,
    session: RwLock<Option<SessionData>>,
}

impl PostgrestClient {
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            session: RwLock::new(None),
        })
    }

    pub fn set_session(&self, data: Option<SessionData>) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = data;
    }

    pub fn session_data(&self) -> Option<SessionData> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Exchange an email and password for a session and adopt it.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SessionData, RemoteError> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.base_url);
        let body = serde_json::json!({ "email": email, "password": password });

        let response = self
            .send_with_retry(&url, || {
                self.client
                    .post(&url)
                    .header("apikey", &self.anon_key)
                    .json(&body)
            })
            .await?;

        let token: TokenResponse = response.json().await?;
        let ttl = token.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        let data = SessionData {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            user_id: token.user.id,
            email: token.user.email.or_else(|| Some(email.to_string())),
            expires_at: Utc::now() + chrono::Duration::seconds(ttl),
        };
        debug!(user_id = %data.user_id, "Signed in to backend");
        self.set_session(Some(data.clone()));
        Ok(data)
    }

    pub fn sign_out(&self) {
        self.set_session(None);
    }

    fn rest_url(&self, collection: Collection) -> String {
        format!("{}/rest/v1/{}", self.base_url, collection.table_name())
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, RemoteError> {
        let bearer = self
            .session_data()
            .filter(|s| !s.is_expired())
            .map(|s| s.access_token)
            .unwrap_or_else(|| self.anon_key.clone());

        let mut headers = header::HeaderMap::new();
        headers.insert(
            "apikey",
            header::HeaderValue::from_str(&self.anon_key)
                .map_err(|e| RemoteError::Unauthorized(format!("Invalid API key: {}", e)))?,
        );
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", bearer))
                .map_err(|e| RemoteError::Unauthorized(format!("Invalid token: {}", e)))?,
        );
        Ok(headers)
    }

    /// Send a request, retrying with exponential backoff while rate limited.
    async fn send_with_retry<F>(&self, url: &str, build: F) -> Result<Response, RemoteError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = build().send().await?;
            let status = response.status();

            if status.is_success() {
                return Ok(response);
            }
            if status.as_u16() == 429 {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(RemoteError::Transient("Rate limited".to_string()));
                }
                warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::from_body(status.as_u16(), &body));
        }
    }

    async fn rows(response: Response) -> Result<Vec<Row>, RemoteError> {
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Array(rows)) => Ok(rows),
            Ok(row @ Value::Object(_)) => Ok(vec![row]),
            Ok(other) => Err(RemoteError::Unknown(format!("Unexpected response: {}", other))),
            Err(e) => Err(RemoteError::Unknown(format!("Invalid response: {}", e))),
        }
    }

    async fn first_row(response: Response) -> Result<Row, RemoteError> {
        Self::rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::Unknown("Write returned no rows".to_string()))
    }
}

// ===== Query encoding =====

/// Render a value as it appears after `eq.` in a filter.
fn filter_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn filter_param(filter: &Filter) -> (String, String) {
    let op = if filter.value.is_null() {
        "is.null".to_string()
    } else {
        format!("eq.{}", filter_value(&filter.value))
    };
    (filter.column.clone(), op)
}

/// `select=` clause with embedded joins, e.g.
/// `*,destinations!entity_id(name,location)`.
fn select_clause(query: &Query) -> String {
    let mut parts: Vec<String> = match query.columns {
        Some(ref cols) => cols.clone(),
        None => vec!["*".to_string()],
    };
    for join in &query.joins {
        parts.push(format!(
            "{}!{}({})",
            join.collection.table_name(),
            join.local_column,
            join.columns.join(",")
        ));
    }
    parts.join(",")
}

fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), select_clause(query))];
    params.extend(query.filters.iter().map(filter_param));
    if !query.order.is_empty() {
        let order = query
            .order
            .iter()
            .map(|o| format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }))
            .collect::<Vec<_>>()
            .join(",");
        params.push(("order".to_string(), order));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

#[async_trait]
impl RemoteClient for PostgrestClient {
    async fn session(&self) -> Option<RemoteIdentity> {
        self.session_data()
            .filter(|s| !s.is_expired())
            .map(|s| RemoteIdentity {
                user_id: s.user_id,
                email: s.email,
            })
    }

    async fn query(&self, query: &Query) -> Result<Vec<Row>, RemoteError> {
        let url = self.rest_url(query.collection);
        let headers = self.auth_headers()?;
        let params = query_params(query);

        let response = self
            .send_with_retry(&url, || {
                self.client.get(&url).headers(headers.clone()).query(&params)
            })
            .await?;
        Self::rows(response).await
    }

    async fn insert(&self, collection: Collection, record: Row) -> Result<Row, RemoteError> {
        let url = self.rest_url(collection);
        let headers = self.auth_headers()?;
        let body = Value::Array(vec![record]);

        let response = self
            .send_with_retry(&url, || {
                self.client
                    .post(&url)
                    .headers(headers.clone())
                    .header("Prefer", "return=representation")
                    .json(&body)
            })
            .await?;
        Self::first_row(response).await
    }

    async fn upsert(
        &self,
        collection: Collection,
        record: Row,
        on_conflict: &str,
    ) -> Result<Row, RemoteError> {
        let url = self.rest_url(collection);
        let headers = self.auth_headers()?;
        let body = Value::Array(vec![record]);

        let response = self
            .send_with_retry(&url, || {
                self.client
                    .post(&url)
                    .headers(headers.clone())
                    .header("Prefer", "resolution=merge-duplicates,return=representation")
                    .query(&[("on_conflict", on_conflict)])
                    .json(&body)
            })
            .await?;
        Self::first_row(response).await
    }

    async fn update(
        &self,
        collection: Collection,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>, RemoteError> {
        let url = self.rest_url(collection);
        let headers = self.auth_headers()?;
        let params: Vec<(String, String)> = filters.iter().map(filter_param).collect();

        let response = self
            .send_with_retry(&url, || {
                self.client
                    .patch(&url)
                    .headers(headers.clone())
                    .header("Prefer", "return=representation")
                    .query(&params)
                    .json(&patch)
            })
            .await?;
        Self::rows(response).await
    }

    async fn delete(&self, collection: Collection, filters: &[Filter]) -> Result<usize, RemoteError> {
        let url = self.rest_url(collection);
        let headers = self.auth_headers()?;
        let params: Vec<(String, String)> = filters.iter().map(filter_param).collect();

        let response = self
            .send_with_retry(&url, || {
                self.client
                    .delete(&url)
                    .headers(headers.clone())
                    .header("Prefer", "return=representation")
                    .query(&params)
            })
            .await?;
        Ok(Self::rows(response).await?.len())
    }
}
