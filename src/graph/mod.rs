//! Property-graph store boundary.
//!
//! The store is external; this module only speaks its query/parameter
//! contract: a statement string plus a parameter map in, an ordered sequence
//! of record maps out. Queries are always parameter-bound — caller-supplied
//! values (filenames, dates, search text, vectors) never appear in statement
//! text.

mod http;
mod scripted;

use serde_json::Value;

use crate::config::GraphConfig;
use crate::error::AppError;

pub use http::HttpGraphClient;
pub use scripted::ScriptedGraph;

/// One result row: column name → value.
pub type Record = serde_json::Map<String, Value>;

/// All available graph store backends.
///
/// `Scripted` serves tests and offline runs the way the dummy reasoning
/// provider does; production talks to the HTTP transactional endpoint.
#[derive(Debug, Clone)]
pub enum GraphClient {
    Http(HttpGraphClient),
    Scripted(ScriptedGraph),
}

impl GraphClient {
    pub fn build(config: &GraphConfig, password: Option<String>) -> Result<Self, AppError> {
        Ok(GraphClient::Http(HttpGraphClient::new(
            config.uri.clone(),
            config.user.clone(),
            password,
            config.timeout_seconds,
        )?))
    }

    /// Run one statement with bound parameters, returning its rows in order.
    pub async fn run(&self, statement: &str, parameters: Value) -> Result<Vec<Record>, AppError> {
        match self {
            GraphClient::Http(c) => c.run(statement, parameters).await,
            GraphClient::Scripted(c) => c.run(statement, parameters).await,
        }
    }
}
