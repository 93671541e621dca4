//! HTTP transactional-commit client for the graph store.
//!
//! Speaks the store's `POST /db/<name>/tx/commit` contract: a JSON body with
//! `statements: [{statement, parameters}]`, answered with per-statement
//! `columns` + `data[].row` arrays and an `errors` list. Wire types are
//! private to this module.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, trace};

use crate::error::AppError;
use crate::graph::Record;

#[derive(Debug, Clone)]
pub struct HttpGraphClient {
    client: Client,
    uri: String,
    user: String,
    password: Option<String>,
}

impl HttpGraphClient {
    pub fn new(
        uri: String,
        user: String,
        password: Option<String>,
        timeout_seconds: u64,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| AppError::Graph(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, uri, user, password })
    }

    pub async fn run(&self, statement: &str, parameters: Value) -> Result<Vec<Record>, AppError> {
        let payload = TxRequest {
            statements: vec![Statement {
                statement: statement.to_string(),
                parameters: if parameters.is_null() {
                    Value::Object(serde_json::Map::new())
                } else {
                    parameters
                },
            }],
        };

        debug!(statement_len = statement.len(), "running graph statement");
        if tracing::enabled!(tracing::Level::TRACE) {
            trace!(%statement, "full graph statement");
        }

        let response = self
            .client
            .post(&self.uri)
            .basic_auth(&self.user, self.password.as_deref())
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!(uri = %self.uri, error = %e, "graph HTTP request failed");
                AppError::Graph(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Graph(format!("HTTP {status}: {body}")));
        }

        let parsed = response
            .json::<TxResponse>()
            .await
            .map_err(|e| AppError::Graph(format!("failed to parse response body: {e}")))?;

        if let Some(first) = parsed.errors.first() {
            return Err(AppError::Graph(format!("{}: {}", first.code, first.message)));
        }

        let result = match parsed.results.into_iter().next() {
            Some(r) => r,
            None => return Ok(Vec::new()),
        };

        let mut records = Vec::with_capacity(result.data.len());
        for row in result.data {
            let mut record = Record::new();
            for (column, value) in result.columns.iter().zip(row.row.into_iter()) {
                record.insert(column.clone(), value);
            }
            records.push(record);
        }
        Ok(records)
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct TxRequest {
    statements: Vec<Statement>,
}

#[derive(Debug, Serialize)]
struct Statement {
    statement: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<TxRow>,
}

#[derive(Debug, Deserialize)]
struct TxRow {
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_rows_zip_with_columns() {
        let body = r#"{
            "results": [{
                "columns": ["timestamp", "chat_content"],
                "data": [
                    {"row": ["2025-03-01 10:00:00 UTC Saturday", [{"user_query": "hi"}]]},
                    {"row": ["2025-03-02 10:00:00 UTC Sunday", []]}
                ]
            }],
            "errors": []
        }"#;
        let parsed: TxResponse = serde_json::from_str(body).expect("parse");
        assert!(parsed.errors.is_empty());
        let result = &parsed.results[0];
        assert_eq!(result.columns.len(), 2);
        assert_eq!(result.data.len(), 2);
        assert_eq!(result.data[0].row[0], "2025-03-01 10:00:00 UTC Saturday");
    }

    #[test]
    fn error_entries_deserialize() {
        let body = r#"{"results": [], "errors": [{"code": "Neo.ClientError.Statement.SyntaxError", "message": "bad query"}]}"#;
        let parsed: TxResponse = serde_json::from_str(body).expect("parse");
        assert_eq!(parsed.errors[0].code, "Neo.ClientError.Statement.SyntaxError");
    }
}
