use futures::future::BoxFuture;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{error::ReportError, report::Warehouse};

/// Header carrying the session token on every authenticated request
pub const SESSION_HEADER: &str = "X-Metabase-Session";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub display_name: String,
}

/// Result of a native query: column metadata plus the rows, positionally aligned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
}

/// Metabase answers a failed native query with 202 and `status: "failed"`,
/// so the body has to be checked as well as the status code.
#[derive(Debug, Deserialize)]
struct DatasetResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    data: Option<DatasetData>,
}

#[derive(Debug, Deserialize)]
struct DatasetData {
    #[serde(default)]
    rows: Vec<Vec<Value>>,
    #[serde(default)]
    results_metadata: Option<ResultsMetadata>,
}

#[derive(Debug, Deserialize)]
struct ResultsMetadata {
    columns: Vec<Column>,
}

impl TryFrom<DatasetResponse> for Dataset {
    type Error = ReportError;

    fn try_from(value: DatasetResponse) -> Result<Self, Self::Error> {
        let error_text = |error: Option<Value>| match error {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => "no error message".to_string(),
        };
        if value.status.as_deref() == Some("failed") {
            return Err(ReportError::Fetch(format!(
                "query failed: {}",
                error_text(value.error)
            )));
        }
        match value.data {
            Some(DatasetData {
                rows,
                results_metadata: Some(metadata),
            }) => Ok(Dataset {
                columns: metadata.columns,
                rows,
            }),
            _ => Err(ReportError::Fetch(format!(
                "response has no results metadata (status {}): {}",
                value.status.as_deref().unwrap_or("unknown"),
                error_text(value.error)
            ))),
        }
    }
}

/// A native (SQL) query against one Metabase database.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeQuery {
    pub database: i64,
    pub query: String,
}

impl NativeQuery {
    /// Body of the `POST /api/dataset` request
    pub fn to_payload(&self) -> Value {
        json!({
            "database": self.database,
            "native": {
                "query": self.query,
                "template-tags": {},
            },
            "parameters": {},
            "type": "native",
        })
    }
}

/// Where the per-warehouse datasets come from.
pub trait DatasetSource: Send + Sync {
    fn fetch<'a>(
        &'a self,
        warehouse: &'a Warehouse,
        query: &'a NativeQuery,
    ) -> BoxFuture<'a, Result<Dataset, ReportError>>;
}

pub struct MetabaseClient {
    client: reqwest::Client,
    base_url: String,
}

impl MetabaseClient {
    pub fn new(base_url: &str) -> Self {
        MetabaseClient {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Exchange the credentials for a session.  There is no retry, a failure
    /// here ends the run.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<MetabaseSession, ReportError> {
        let url = format!("{}/api/session", self.base_url);
        debug!("Requesting Metabase session from {}", url);
        let response = self
            .client
            .post(&url)
            .json(&json!({"username": username, "password": password}))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ReportError::Auth(e.to_string()))?;
        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| ReportError::Auth(format!("unexpected session response: {}", e)))?;
        info!("Metabase session acquired for user {}", username);

        Ok(MetabaseSession {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: session.id,
        })
    }
}

/// An authenticated Metabase session.  The token is never refreshed and lives
/// for a single run.
pub struct MetabaseSession {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl MetabaseSession {
    pub async fn dataset(&self, query: &NativeQuery) -> Result<Dataset, ReportError> {
        let url = format!("{}/api/dataset", self.base_url);
        let response = self
            .client
            .post(url)
            .header(SESSION_HEADER, &self.token)
            .json(&query.to_payload())
            .send()
            .await
            .map_err(|e| ReportError::Fetch(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ReportError::Fetch(format!("reading response: {}", e)))?;
        if !status.is_success() {
            return Err(ReportError::Fetch(format!("{}: {}", status, body.trim())));
        }
        let response: DatasetResponse = serde_json::from_str(&body)
            .map_err(|e| ReportError::Fetch(format!("invalid dataset response: {}", e)))?;
        Dataset::try_from(response)
    }
}

impl DatasetSource for MetabaseSession {
    fn fetch<'a>(
        &'a self,
        warehouse: &'a Warehouse,
        query: &'a NativeQuery,
    ) -> BoxFuture<'a, Result<Dataset, ReportError>> {
        Box::pin(async move {
            debug!("Querying database {} for {}", query.database, warehouse.name);
            self.dataset(query).await.map_err(|e| match e {
                ReportError::Fetch(msg) => {
                    ReportError::Fetch(format!("{}: {}", warehouse.name, msg))
                }
                other => other,
            })
        })
    }
}
