//! HTTP client for the immudb REST gateway.

use super::ImmutableKv;
use crate::{LedgerError, LedgerResult};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::RwLock;
use std::time::Duration;

/// Connection parameters for [`ImmudbRestClient`].
#[derive(Debug, Clone)]
pub struct ImmudbSettings {
    /// Gateway base URL, e.g. `http://localhost:8080`.
    pub url: String,
    pub username: String,
    pub password: String,
    pub database: String,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct TxHeader {
    #[serde(deserialize_with = "int_or_string")]
    id: u64,
}

#[derive(Debug, Deserialize)]
struct VerifiableEntry {
    entry: StoredEntry,
}

#[derive(Debug, Deserialize)]
struct StoredEntry {
    #[serde(default)]
    value: String,
}

/// immudb REST gateway client (`/api` routes).
pub struct ImmudbRestClient {
    client: Client,
    base_url: String,
    settings: ImmudbSettings,
    token: RwLock<Option<String>>,
}

impl ImmudbRestClient {
    pub fn new(settings: ImmudbSettings) -> LedgerResult<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| LedgerError::backend("build immudb client", e))?;
        Ok(Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            settings,
            token: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    fn current_token(&self) -> LedgerResult<String> {
        self.token
            .read()
            .map_err(|_| LedgerError::Backend("immudb token lock poisoned".to_string()))?
            .clone()
            .ok_or_else(|| LedgerError::Backend("immudb session is not open".to_string()))
    }

    fn store_token(&self, token: Option<String>) -> LedgerResult<()> {
        *self
            .token
            .write()
            .map_err(|_| LedgerError::Backend("immudb token lock poisoned".to_string()))? = token;
        Ok(())
    }

    fn transport_error(&self, operation: &'static str, err: reqwest::Error) -> LedgerError {
        if err.is_timeout() {
            return LedgerError::Timeout {
                operation,
                millis: u64::try_from(self.settings.timeout.as_millis()).unwrap_or(u64::MAX),
            };
        }
        LedgerError::backend(operation, err)
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
        body: &B,
    ) -> LedgerResult<T> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(self.current_token()?)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(operation, e))?;
        handle_response(operation, response).await
    }
}

#[async_trait]
impl ImmutableKv for ImmudbRestClient {
    async fn open_session(&self) -> LedgerResult<()> {
        let login = json!({
            "user": STANDARD.encode(&self.settings.username),
            "password": STANDARD.encode(&self.settings.password),
        });
        let response = self
            .client
            .post(self.url("/login"))
            .json(&login)
            .send()
            .await
            .map_err(|e| self.transport_error("immudb login", e))?;
        let session: TokenResponse = handle_response("immudb login", response).await?;

        let response = self
            .client
            .get(self.url(&format!("/db/use/{}", self.settings.database)))
            .bearer_auth(&session.token)
            .send()
            .await
            .map_err(|e| self.transport_error("immudb use database", e))?;
        let database: TokenResponse = handle_response("immudb use database", response).await?;

        self.store_token(Some(database.token))
    }

    async fn set(&self, key: &str, value: &[u8]) -> LedgerResult<u64> {
        let body = json!({
            "KVs": [{
                "key": STANDARD.encode(key),
                "value": STANDARD.encode(value),
            }]
        });
        let header: TxHeader = self.post("immudb set", "/db/set", &body).await?;
        Ok(header.id)
    }

    async fn verified_get(&self, key: &str) -> LedgerResult<Option<Vec<u8>>> {
        let body = json!({ "keyRequest": { "key": STANDARD.encode(key) } });
        match self
            .post::<_, VerifiableEntry>("immudb verified get", "/db/verifiable/get", &body)
            .await
        {
            Ok(found) => STANDARD
                .decode(found.entry.value)
                .map(Some)
                .map_err(|e| LedgerError::Serialization(format!("immudb value is not base64: {e}"))),
            Err(LedgerError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn close_session(&self) -> LedgerResult<()> {
        if self.current_token().is_err() {
            return Ok(());
        }
        let _: serde_json::Value = self.post("immudb logout", "/logout", &json!({})).await?;
        self.store_token(None)
    }
}

async fn handle_response<T: DeserializeOwned>(
    operation: &str,
    response: reqwest::Response,
) -> LedgerResult<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| LedgerError::Serialization(format!("{operation}: {e}")));
    }
    let message = response.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND || message.contains("key not found") {
        return Err(LedgerError::NotFound(format!("{operation}: {message}")));
    }
    Err(LedgerError::Backend(format!(
        "{operation}: HTTP {}: {message}",
        status.as_u16()
    )))
}

/// grpc-gateway renders 64-bit integers as JSON strings.
fn int_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Int(value) => Ok(value),
        Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(url: &str) -> ImmudbSettings {
        ImmudbSettings {
            url: url.to_string(),
            username: "immudb".to_string(),
            password: "immudb".to_string(),
            database: "defaultdb".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn routes_live_under_api_prefix() {
        let client = ImmudbRestClient::new(settings("http://localhost:8080/")).unwrap();
        assert_eq!(client.url("/db/set"), "http://localhost:8080/api/db/set");
    }

    #[test]
    fn tx_header_accepts_string_and_number_ids() {
        let header: TxHeader = serde_json::from_str(r#"{"id":"42","ts":"1"}"#).unwrap();
        assert_eq!(header.id, 42);
        let header: TxHeader = serde_json::from_str(r#"{"id":7}"#).unwrap();
        assert_eq!(header.id, 7);
    }

    #[tokio::test]
    async fn requests_require_an_open_session() {
        let client = ImmudbRestClient::new(settings("http://localhost:8080")).unwrap();
        let err = client.set("k", b"v").await.unwrap_err();
        assert!(matches!(err, LedgerError::Backend(ref msg) if msg.contains("not open")));
        client.close_session().await.unwrap();
    }
}
