//! Chunk identity & store adapter.
//!
//! Typed operations over the graph client: idempotent upserts for User, File
//! and Chunk nodes, the relationship links between them, and the structured
//! and similarity lookups the retrieval tools run. Every statement binds
//! caller-supplied values as parameters; the only query-text variation is the
//! choice between fixed clause fragments (role scope, optional filters).

mod chats;
mod users;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

use crate::error::AppError;
use crate::graph::{GraphClient, Record};

pub use chats::{ChatExchange, ChatSession, ChatTurn};
pub use users::UserDetails;

// ── Identity ─────────────────────────────────────────────────────────────────

/// Access role attached to every stored user.
///
/// Anything that is not recognizably `Admin` scopes like a plain `User` —
/// unknown roles must never widen visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessRole {
    Admin,
    User,
}

impl AccessRole {
    pub fn parse(s: &str) -> Self {
        match s {
            "Admin" => AccessRole::Admin,
            _ => AccessRole::User,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessRole::Admin => "Admin",
            AccessRole::User => "User",
        }
    }

    /// The username scope this role is allowed to query under.
    pub fn scope<'a>(&self, username: &'a str) -> Scope<'a> {
        match self {
            AccessRole::Admin => Scope::All,
            AccessRole::User => Scope::User(username),
        }
    }
}

/// Username restriction applied to every lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    All,
    User(&'a str),
}

/// Deterministic chunk key: hash of origin filename + owning username +
/// ordinal. Stable across re-ingestion, so re-inserts are idempotent.
pub fn chunk_fingerprint(origin_filename: &str, username: &str, ordinal: u32) -> String {
    sha256_hex(&format!("{origin_filename}{username}{ordinal}"))
}

/// Chat turn key: hash of the user's first name + the turn timestamp.
pub fn chat_turn_id(first_name: &str, timestamp: &str) -> String {
    sha256_hex(&format!("{first_name}{timestamp}"))
}

pub fn password_digest(password: &str) -> String {
    sha256_hex(password)
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Current UTC instant, RFC-3339 with second precision.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ── Store types ──────────────────────────────────────────────────────────────

/// One chunk ready for persistence: fingerprint id plus node properties
/// (text, embedding, ordinal, metadata).
#[derive(Debug, Clone)]
pub struct ChunkRow {
    pub id: String,
    pub props: Map<String, Value>,
}

/// File node upsert payload. `image_data` is the optional base64 preview
/// payload carried by image-bearing files.
#[derive(Debug, Clone)]
pub struct FileUpsert {
    pub name: String,
    pub username: String,
    pub format: String,
    pub summary: String,
    pub timestamp: String,
    pub image_data: Option<String>,
}

/// One structured file-search row: the File node's properties plus the
/// concatenated text of its chunks in `chunk_no` order.
#[derive(Debug, Clone)]
pub struct FileRow {
    pub details: Map<String, Value>,
    pub contents: String,
}

/// One chunk-similarity hit.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub content: String,
    pub chunk_no: i64,
    pub origin_filename: String,
    pub chunk_create_ts: String,
    pub score: f64,
}

/// Optional date bounds (`yyyy-MM-dd`, inclusive) applied to lookups.
/// Validation happens at the tool layer; the store treats these as opaque
/// bound parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateWindow<'a> {
    pub from: Option<&'a str>,
    pub till: Option<&'a str>,
}

// ── Store ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GraphStore {
    client: GraphClient,
}

impl GraphStore {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &GraphClient {
        &self.client
    }

    /// One-time index setup; `IF NOT EXISTS` makes repeated calls harmless.
    pub async fn ensure_indexes(&self) -> Result<(), AppError> {
        const INDEXES: &[&str] = &[
            "CREATE INDEX file_name_index IF NOT EXISTS FOR (f:File) ON (f.name)",
            "CREATE INDEX file_date_index IF NOT EXISTS FOR (f:File) ON (f.date)",
            "CREATE INDEX file_timestamp_index IF NOT EXISTS FOR (f:File) ON (f.timestamp)",
            "CREATE INDEX chunk_origin_filename_index IF NOT EXISTS FOR (c:Chunk) ON (c.origin_filename)",
            "CREATE INDEX chunk_page_index IF NOT EXISTS FOR (c:Chunk) ON (c.page)",
            "CREATE INDEX chat_username_index IF NOT EXISTS FOR (c:Chat) ON (c.username)",
            "CREATE INDEX chat_timestamp_index IF NOT EXISTS FOR (c:Chat) ON (c.timestamp)",
        ];
        for statement in INDEXES {
            self.client.run(statement, Value::Null).await?;
        }
        Ok(())
    }

    /// Remove every chunk of `(file_name, username)`. Called once per file
    /// ingestion, before the first write pass — re-uploading a name replaces
    /// its chunks wholesale.
    pub async fn delete_file_chunks(
        &self,
        file_name: &str,
        username: &str,
    ) -> Result<(), AppError> {
        self.client
            .run(
                "MATCH (c:Chunk {origin_filename: $file_name, username: $username}) DETACH DELETE c",
                json!({"file_name": file_name, "username": username}),
            )
            .await?;
        Ok(())
    }

    /// Upsert a batch of chunks keyed by fingerprint.
    pub async fn upsert_chunks(&self, rows: &[ChunkRow]) -> Result<(), AppError> {
        if rows.is_empty() {
            return Ok(());
        }
        let rows: Vec<Value> = rows
            .iter()
            .map(|r| json!({"id": r.id, "props": r.props}))
            .collect();
        self.client
            .run(
                "UNWIND $rows AS row \
                 MERGE (c:Chunk {id: row.id}) \
                 ON CREATE SET c += row.props \
                 ON MATCH SET c += row.props",
                json!({"rows": rows}),
            )
            .await?;
        Ok(())
    }

    /// Upsert the File node and link it to its chunks. One statement handles
    /// both create and re-upload.
    pub async fn upsert_file(&self, file: &FileUpsert) -> Result<(), AppError> {
        let mut props = Map::new();
        props.insert("timestamp".into(), json!(file.timestamp));
        props.insert("date".into(), json!(&file.timestamp[..10.min(file.timestamp.len())]));
        props.insert("type".into(), json!(file.format));
        props.insert("summary".into(), json!(file.summary));
        props.insert("username".into(), json!(file.username));
        if let Some(data) = &file.image_data {
            props.insert("data".into(), json!(data));
        }

        self.client
            .run(
                "MERGE (f:File {name: $file_name, username: $username}) \
                 ON CREATE SET f += $props \
                 ON MATCH SET f += $props \
                 WITH f \
                 MATCH (c:Chunk {origin_filename: $file_name, username: $username}) \
                 MERGE (f)-[:CHUNKED_INTO]->(c)",
                json!({"file_name": file.name, "username": file.username, "props": props}),
            )
            .await?;
        Ok(())
    }

    /// Link the owning user to an uploaded file.
    pub async fn link_user_file(&self, file_name: &str, username: &str) -> Result<(), AppError> {
        self.client
            .run(
                "MATCH (f:File {name: $file_name, username: $username}) \
                 MATCH (u:User {username: $username}) \
                 MERGE (u)-[:UPLOADED_FILE]->(f)",
                json!({"file_name": file_name, "username": username}),
            )
            .await?;
        Ok(())
    }

    /// Structured file lookup: newest files in scope, each with its chunks
    /// concatenated in ordinal order.
    pub async fn files_structured(
        &self,
        scope: Scope<'_>,
        file_names: Option<&[String]>,
        window: DateWindow<'_>,
        limit: i64,
    ) -> Result<Vec<FileRow>, AppError> {
        let mut query = String::from("MATCH (u:User)-[:UPLOADED_FILE]->(f:File) ");
        let mut params = Map::new();
        push_scope(&mut query, &mut params, scope, "u.username");

        if let Some(names) = file_names {
            query.push_str("AND f.name IN $file_names ");
            params.insert("file_names".into(), json!(names));
        }
        push_window(&mut query, &mut params, window, "f.timestamp");

        query.push_str(
            "WITH f ORDER BY f.timestamp DESC \
             LIMIT $limit \
             MATCH (f)-[:CHUNKED_INTO]->(c:Chunk) \
             WITH f, c ORDER BY c.chunk_no ASC \
             WITH f, COLLECT(c.text) AS texts \
             RETURN f AS file_details, REDUCE(s = '', p IN texts | s + ' ' + p) AS file_contents",
        );
        params.insert("limit".into(), json!(limit));

        let records = self.client.run(&query, Value::Object(params)).await?;
        Ok(records
            .into_iter()
            .map(|mut record| FileRow {
                details: record
                    .remove("file_details")
                    .and_then(|v| v.as_object().cloned())
                    .unwrap_or_default(),
                contents: record
                    .remove("file_contents")
                    .and_then(|v| v.as_str().map(String::from))
                    .unwrap_or_default(),
            })
            .collect())
    }

    /// Nearest-neighbour lookup over chunk embeddings, scoped by username
    /// unless the caller's role relaxes it.
    pub async fn chunks_by_similarity(
        &self,
        scope: Scope<'_>,
        file_names: Option<&[String]>,
        window: DateWindow<'_>,
        query_embedding: &[f32],
        limit: i64,
    ) -> Result<Vec<ChunkHit>, AppError> {
        let mut query = String::from("MATCH (c:Chunk) ");
        let mut params = Map::new();
        push_scope(&mut query, &mut params, scope, "c.username");

        if let Some(names) = file_names {
            query.push_str("AND c.origin_filename IN $file_names ");
            params.insert("file_names".into(), json!(names));
        }
        push_window(&mut query, &mut params, window, "c.chunk_create_ts");

        query.push_str(
            "WITH c, vector.similarity.cosine(c.embedding, $query_embedding) AS similarity_score \
             ORDER BY similarity_score DESC LIMIT $limit \
             RETURN c.text AS content, c.chunk_no AS chunk_no, \
                    c.origin_filename AS origin_filename, \
                    c.chunk_create_ts AS chunk_create_ts, similarity_score",
        );
        params.insert("query_embedding".into(), json!(query_embedding));
        params.insert("limit".into(), json!(limit));

        let records = self.client.run(&query, Value::Object(params)).await?;
        Ok(records.iter().map(chunk_hit_from).collect())
    }
}

fn chunk_hit_from(record: &Record) -> ChunkHit {
    ChunkHit {
        content: str_field(record, "content"),
        chunk_no: record.get("chunk_no").and_then(Value::as_i64).unwrap_or(0),
        origin_filename: str_field(record, "origin_filename"),
        chunk_create_ts: str_field(record, "chunk_create_ts"),
        score: record
            .get("similarity_score")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
    }
}

pub(crate) fn str_field(record: &Record, key: &str) -> String {
    record
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Append the role-scope clause. Fragments are fixed strings; the username
/// travels as a parameter.
fn push_scope(query: &mut String, params: &mut Map<String, Value>, scope: Scope<'_>, column: &str) {
    match scope {
        Scope::All => query.push_str("WHERE 1=1 "),
        Scope::User(username) => {
            query.push_str(&format!("WHERE {column} = $username "));
            params.insert("username".into(), json!(username));
        }
    }
}

/// Append inclusive date-bound clauses. Both bounds apply when both are set.
fn push_window(
    query: &mut String,
    params: &mut Map<String, Value>,
    window: DateWindow<'_>,
    column: &str,
) {
    if let Some(from) = window.from {
        query.push_str(&format!("AND {column} >= $date_from "));
        params.insert("date_from".into(), json!(from));
    }
    if let Some(till) = window.till {
        query.push_str(&format!("AND {column} <= $date_till "));
        params.insert("date_till".into(), json!(till));
    }
}
