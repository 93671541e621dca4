//! Chat persistence and lookup.
//!
//! A session is a singly-linked list of Chat nodes: the root hangs off its
//! User via `CONVERSED`, later turns attach to their predecessor via
//! `FOLLOWED_BY`. Lookups return whole sessions — the root timestamp plus the
//! full reconstructed turn chain.

use serde_json::{Map, Value, json};

use crate::error::AppError;
use crate::graph::Record;
use crate::store::{DateWindow, GraphStore, Scope, str_field};

/// One completed user/agent exchange, ready for persistence.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub id: String,
    pub user_first_name: String,
    pub username: String,
    pub user_timezone: String,
    pub user_query: String,
    pub agent_response: String,
    pub timestamp: String,
}

impl ChatTurn {
    /// The text embedded for similarity search: every field except the id.
    pub fn embedding_text(&self) -> String {
        json!({
            "user_first_name": self.user_first_name,
            "username": self.username,
            "user_timezone": self.user_timezone,
            "user_query": self.user_query,
            "agent_response": self.agent_response,
            "timestamp": self.timestamp,
        })
        .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct ChatExchange {
    pub user_query: String,
    pub agent_response: String,
}

/// One session as returned by lookups: root timestamp, reconstructed turns
/// (oldest reachable ancestor first), and the similarity score when the
/// lookup was vector-based.
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub timestamp: String,
    pub turns: Vec<ChatExchange>,
    pub score: Option<f64>,
}

impl GraphStore {
    /// Persist one completed turn. A turn without a predecessor becomes a
    /// session root under its user; later turns chain off the previous turn.
    pub async fn save_chat(
        &self,
        turn: &ChatTurn,
        prev_chat_id: Option<&str>,
        embedding: &[f32],
    ) -> Result<(), AppError> {
        let props = json!({
            "id": turn.id,
            "user_first_name": turn.user_first_name,
            "username": turn.username,
            "user_timezone": turn.user_timezone,
            "user_query": turn.user_query,
            "agent_response": turn.agent_response,
            "timestamp": turn.timestamp,
            "embedding": embedding,
        });

        match prev_chat_id {
            None => {
                self.client()
                    .run(
                        "CREATE (c:Chat $props) \
                         WITH c \
                         MATCH (u:User {username: $username}) \
                         CREATE (u)-[:CONVERSED]->(c)",
                        json!({"props": props, "username": turn.username}),
                    )
                    .await?;
            }
            Some(prev_id) => {
                self.client()
                    .run(
                        "CREATE (c1:Chat $props) \
                         WITH c1 \
                         MATCH (c2:Chat {id: $prev_chat_id}) \
                         CREATE (c2)-[:FOLLOWED_BY]->(c1)",
                        json!({"props": props, "prev_chat_id": prev_id}),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Structured session lookup: newest session roots in scope, each with
    /// its full turn chain.
    pub async fn chats_structured(
        &self,
        scope: Scope<'_>,
        window: DateWindow<'_>,
        limit: i64,
    ) -> Result<Vec<ChatSession>, AppError> {
        let (mut query, mut params) = chat_match(scope, window);
        query.push_str(
            "WITH c ORDER BY c.timestamp DESC \
             LIMIT $limit \
             MATCH (c)-[:FOLLOWED_BY*0..]->(d:Chat) \
             WITH c.timestamp AS timestamp, \
                  {user_query: d.user_query, agent_response: d.agent_response} AS turn \
             WITH timestamp, COLLECT(turn) AS chat_content \
             RETURN timestamp, chat_content",
        );
        params.insert("limit".into(), json!(limit));

        let records = self.client().run(&query, Value::Object(params)).await?;
        Ok(records.iter().map(|r| session_from(r, false)).collect())
    }

    /// Vector session lookup: cosine similarity over session-root embeddings,
    /// each hit expanded to its full turn chain.
    pub async fn chats_by_similarity(
        &self,
        scope: Scope<'_>,
        window: DateWindow<'_>,
        query_embedding: &[f32],
        limit: i64,
    ) -> Result<Vec<ChatSession>, AppError> {
        let (mut query, mut params) = chat_match(scope, window);
        query.push_str(
            "WITH c, vector.similarity.cosine(c.embedding, $query_embedding) AS similarity_score \
             ORDER BY similarity_score DESC LIMIT $limit \
             MATCH (c)-[:FOLLOWED_BY*0..]->(d:Chat) \
             WITH c.timestamp AS timestamp, similarity_score, \
                  {user_query: d.user_query, agent_response: d.agent_response} AS turn \
             WITH timestamp, similarity_score, COLLECT(turn) AS chat_content \
             RETURN timestamp, similarity_score, chat_content",
        );
        params.insert("query_embedding".into(), json!(query_embedding));
        params.insert("limit".into(), json!(limit));

        let records = self.client().run(&query, Value::Object(params)).await?;
        Ok(records.iter().map(|r| session_from(r, true)).collect())
    }

    /// The user's most recent sessions, for session bootstrap display.
    pub async fn recent_sessions(
        &self,
        username: &str,
        limit: i64,
    ) -> Result<Vec<ChatSession>, AppError> {
        self.chats_structured(Scope::User(username), DateWindow::default(), limit)
            .await
    }
}

fn chat_match(scope: Scope<'_>, window: DateWindow<'_>) -> (String, Map<String, Value>) {
    let mut query = String::from("MATCH (u:User)-[:CONVERSED]->(c:Chat) ");
    let mut params = Map::new();
    match scope {
        Scope::All => query.push_str("WHERE 1=1 "),
        Scope::User(username) => {
            query.push_str("WHERE u.username = $username ");
            params.insert("username".into(), json!(username));
        }
    }
    if let Some(from) = window.from {
        query.push_str("AND c.timestamp >= $date_from ");
        params.insert("date_from".into(), json!(from));
    }
    if let Some(till) = window.till {
        query.push_str("AND c.timestamp <= $date_till ");
        params.insert("date_till".into(), json!(till));
    }
    (query, params)
}

fn session_from(record: &Record, scored: bool) -> ChatSession {
    let turns = record
        .get("chat_content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .map(|turn| ChatExchange {
                    user_query: turn
                        .get("user_query")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    agent_response: turn
                        .get("agent_response")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    ChatSession {
        timestamp: str_field(record, "timestamp"),
        turns,
        score: if scored {
            record.get("similarity_score").and_then(Value::as_f64)
        } else {
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphClient, ScriptedGraph};

    fn scripted_store() -> (ScriptedGraph, GraphStore) {
        let scripted = ScriptedGraph::new();
        let store = GraphStore::new(GraphClient::Scripted(scripted.clone()));
        (scripted, store)
    }

    fn sample_turn() -> ChatTurn {
        ChatTurn {
            id: "abc123".into(),
            user_first_name: "Alice".into(),
            username: "alice".into(),
            user_timezone: "UTC".into(),
            user_query: "what did the report say?".into(),
            agent_response: "revenue grew".into(),
            timestamp: "2025-03-01 10:00:00 UTC Saturday".into(),
        }
    }

    #[tokio::test]
    async fn root_turn_links_to_user() {
        let (scripted, store) = scripted_store();
        store.save_chat(&sample_turn(), None, &[0.0; 4]).await.unwrap();

        let (query, params) = &scripted.calls()[0];
        assert!(query.contains("CONVERSED"));
        assert!(!query.contains("FOLLOWED_BY"));
        assert_eq!(params["username"], "alice");
        assert_eq!(params["props"]["id"], "abc123");
    }

    #[tokio::test]
    async fn follow_up_turn_links_to_predecessor() {
        let (scripted, store) = scripted_store();
        store
            .save_chat(&sample_turn(), Some("prev789"), &[0.0; 4])
            .await
            .unwrap();

        let (query, params) = &scripted.calls()[0];
        assert!(query.contains("FOLLOWED_BY"));
        assert!(!query.contains("CONVERSED"));
        assert_eq!(params["prev_chat_id"], "prev789");
    }

    #[tokio::test]
    async fn embedding_text_excludes_id() {
        let text = sample_turn().embedding_text();
        assert!(!text.contains("abc123"));
        assert!(text.contains("revenue grew"));
    }

    #[tokio::test]
    async fn sessions_parse_turn_chains() {
        let record: Record = serde_json::from_str(
            r#"{
                "timestamp": "2025-03-01 10:00:00 UTC Saturday",
                "chat_content": [
                    {"user_query": "hi", "agent_response": "hello"},
                    {"user_query": "bye", "agent_response": "goodbye"}
                ]
            }"#,
        )
        .unwrap();
        let scripted = ScriptedGraph::with_results(vec![vec![record]]);
        let store = GraphStore::new(GraphClient::Scripted(scripted));

        let sessions = store.recent_sessions("alice", 3).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].turns.len(), 2);
        assert_eq!(sessions[0].turns[1].agent_response, "goodbye");
        assert!(sessions[0].score.is_none());
    }

    #[tokio::test]
    async fn similarity_lookup_binds_vector_and_scope() {
        let (scripted, store) = scripted_store();
        store
            .chats_by_similarity(Scope::User("alice"), DateWindow::default(), &[0.5, 0.5], 10)
            .await
            .unwrap();

        let (query, params) = &scripted.calls()[0];
        assert!(query.contains("vector.similarity.cosine"));
        assert!(query.contains("u.username = $username"));
        assert!(params["query_embedding"].is_array());
        assert_eq!(params["limit"], 10);
    }
}
