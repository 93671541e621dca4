//! Previous-chat search: recent sessions or similarity over past exchanges.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::embedding::EmbeddingClient;
use crate::error::AppError;
use crate::store::{ChatSession, DateWindow, GraphStore};
use crate::tools::{CallerContext, ToolOutput, validate_date};

const DEFAULT_LIMIT: i64 = 10;
const MAX_LIMIT: i64 = 10;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ChatSearchArgs {
    #[serde(default)]
    filter_date_from: Option<String>,
    #[serde(default)]
    filter_date_till: Option<String>,
    #[serde(default)]
    similarity_search_message: Option<String>,
    #[serde(default)]
    limit_by: Option<i64>,
}

pub(crate) async fn run(
    store: &GraphStore,
    embedder: &EmbeddingClient,
    ctx: &CallerContext,
    args: ChatSearchArgs,
) -> Result<ToolOutput, AppError> {
    if let Some(from) = &args.filter_date_from {
        validate_date("filter_date_from", from)?;
    }
    if let Some(till) = &args.filter_date_till {
        validate_date("filter_date_till", till)?;
    }

    let limit = args.limit_by.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let scope = ctx.role.scope(&ctx.username);
    let window = DateWindow {
        from: args.filter_date_from.as_deref(),
        till: args.filter_date_till.as_deref(),
    };

    match &args.similarity_search_message {
        None => {
            let sessions = store.chats_structured(scope, window, limit).await?;
            let readable: Vec<Value> = sessions
                .into_iter()
                .map(|session| {
                    json!({
                        "timestamp": session.timestamp,
                        "chat_content": turns_json(&session),
                    })
                })
                .collect();
            Ok(ToolOutput { readable: json!(readable), metadata: None })
        }
        Some(query) => {
            let query_embedding = embedder.embed(query).await?;
            let sessions = store
                .chats_by_similarity(scope, window, &query_embedding, limit)
                .await?;
            let readable: Vec<Value> = sessions
                .into_iter()
                .map(|session| {
                    json!({
                        "chat": {
                            "full_chat": turns_json(&session),
                            "timestamp": session.timestamp,
                        },
                        "similarity_score": session.score,
                    })
                })
                .collect();
            Ok(ToolOutput { readable: json!(readable), metadata: None })
        }
    }
}

fn turns_json(session: &ChatSession) -> Vec<Value> {
    session
        .turns
        .iter()
        .map(|turn| {
            json!({
                "user_query": turn.user_query,
                "agent_response": turn.agent_response,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::FixedEmbedder;
    use crate::graph::{GraphClient, Record, ScriptedGraph};
    use crate::store::AccessRole;

    fn ctx(role: AccessRole) -> CallerContext {
        CallerContext { username: "alice".into(), role }
    }

    fn args(json_text: &str) -> ChatSearchArgs {
        serde_json::from_str(json_text).unwrap()
    }

    fn session_record() -> Record {
        serde_json::from_str(
            r#"{
                "timestamp": "2025-03-01 10:00:00 UTC Saturday",
                "chat_content": [{"user_query": "hi", "agent_response": "hello"}]
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn structured_lookup_returns_sessions() {
        let scripted = ScriptedGraph::with_results(vec![vec![session_record()]]);
        let store = GraphStore::new(GraphClient::Scripted(scripted.clone()));
        let embedder = EmbeddingClient::Fixed(FixedEmbedder::default());

        let out = run(&store, &embedder, &ctx(AccessRole::User), args("{}")).await.unwrap();
        assert_eq!(out.readable[0]["chat_content"][0]["agent_response"], "hello");

        let (query, params) = &scripted.calls()[0];
        assert!(query.contains("u.username = $username"));
        assert_eq!(params["limit"], 10);
    }

    #[tokio::test]
    async fn admin_lookup_is_unscoped() {
        let scripted = ScriptedGraph::new();
        let store = GraphStore::new(GraphClient::Scripted(scripted.clone()));
        let embedder = EmbeddingClient::Fixed(FixedEmbedder::default());

        run(&store, &embedder, &ctx(AccessRole::Admin), args("{}")).await.unwrap();
        let (query, params) = &scripted.calls()[0];
        assert!(query.contains("WHERE 1=1"));
        assert!(params.get("username").is_none());
    }

    #[tokio::test]
    async fn similarity_lookup_wraps_sessions_with_scores() {
        let mut record = session_record();
        record.insert("similarity_score".into(), json!(0.91));
        let scripted = ScriptedGraph::with_results(vec![vec![record]]);
        let store = GraphStore::new(GraphClient::Scripted(scripted.clone()));
        let embedder = EmbeddingClient::Fixed(FixedEmbedder::default());

        let out = run(
            &store,
            &embedder,
            &ctx(AccessRole::User),
            args(r#"{"similarity_search_message": "that budget discussion"}"#),
        )
        .await
        .unwrap();

        assert_eq!(out.readable[0]["similarity_score"], 0.91);
        assert_eq!(out.readable[0]["chat"]["full_chat"][0]["user_query"], "hi");
        assert!(scripted.calls()[0].0.contains("vector.similarity.cosine"));
    }

    #[tokio::test]
    async fn malformed_till_date_is_rejected_before_query() {
        let scripted = ScriptedGraph::new();
        let store = GraphStore::new(GraphClient::Scripted(scripted.clone()));
        let embedder = EmbeddingClient::Fixed(FixedEmbedder::default());

        let err = run(
            &store,
            &embedder,
            &ctx(AccessRole::User),
            args(r#"{"filter_date_till": "2025-13-99x"}"#),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Rejected(_)));
        assert_eq!(scripted.call_count(), 0);
    }
}
