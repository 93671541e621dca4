//! Integration tests for the ingestion pipeline and retrieval loop,
//! running against the scripted graph client and dummy providers.
//!
//! Run with:
//!   cargo test --test test_pipeline

use std::io::Write;
use std::path::PathBuf;

use serde_json::{Value, json};

use docent::chat::Assistant;
use docent::config::{ChatConfig, IngestConfig};
use docent::embedding::{EmbeddingClient, FixedEmbedder};
use docent::graph::{GraphClient, Record, ScriptedGraph};
use docent::ingest::charts::{ChartDetail, chart_segment};
use docent::ingest::decompose::text_segments;
use docent::ingest::{FileOutcome, Ingestor};
use docent::llm::{DummyClient, LlmClient, LlmReply, ToolCall};
use docent::store::{AccessRole, GraphStore, UserDetails, chunk_fingerprint};
use docent::tools::Toolbox;

// ── helpers ──────────────────────────────────────────────────────────────────

fn text_reply(s: &str) -> LlmReply {
    LlmReply { text: Some(s.to_string()), tool_calls: Vec::new() }
}

fn tool_reply(name: &str, arguments: &str) -> LlmReply {
    LlmReply {
        text: None,
        tool_calls: vec![ToolCall { id: "call_1".into(), name: name.into(), arguments: arguments.into() }],
    }
}

fn ingestor(llm: DummyClient, graph: ScriptedGraph) -> Ingestor {
    Ingestor::new(
        GraphStore::new(GraphClient::Scripted(graph)),
        LlmClient::Dummy(llm),
        EmbeddingClient::Fixed(FixedEmbedder::default()),
        &IngestConfig { chunk_chars: 2000, summary_prompt_budget: 32_000 },
    )
}

fn two_charts_json() -> &'static str {
    r#"[
        {"title": "Sales", "type": "line_chart", "description": "monthly sales", "relative_position": "top"},
        {"title": "Share", "type": "pie_chart", "description": "share by region", "relative_position": "bottom"}
    ]"#
}

fn image_ingest_script() -> DummyClient {
    DummyClient::scripted(vec![
        text_reply(two_charts_json()),           // chart listing
        text_reply("Month,Sales\nJan,1"),        // enrichment, chart 1
        text_reply("Region,Share\nEU,40"),       // enrichment, chart 2
        text_reply("Two charts.\nSales data."),  // batch summary
    ])
}

fn png_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".png").tempfile().expect("tempfile");
    file.write_all(&[0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a]).expect("write");
    file
}

// ── chunk identity & ordinals ────────────────────────────────────────────────

#[test]
fn ordinals_run_across_image_and_text_passes_without_gaps() {
    // A pdf-shaped composition: one image contributing 2 chart chunks, then
    // 4500 chars of body text producing 3 chunks of <= 2000 chars.
    let charts: Vec<ChartDetail> = serde_json::from_str(two_charts_json()).unwrap();
    let mut ordinal = 1u32;
    let mut chunk_nos = Vec::new();

    for chart in &charts {
        let segment =
            chart_segment(chart, ordinal, Some((1, 0)), "report.pdf", "alice", "pdf").unwrap();
        chunk_nos.push(segment.meta["chunk_no"].as_u64().unwrap());
        ordinal += 1;
    }
    let (body, _) = text_segments(&"x".repeat(4500), 2000, ordinal, "report.pdf", "alice", "pdf");
    for segment in &body {
        chunk_nos.push(segment.meta["chunk_no"].as_u64().unwrap());
    }

    assert_eq!(chunk_nos, vec![1, 2, 3, 4, 5]);
}

#[test]
fn fingerprints_are_stable_and_distinct_per_ordinal() {
    let first: Vec<String> =
        (1..=5).map(|i| chunk_fingerprint("report.pdf", "alice", i)).collect();
    let second: Vec<String> =
        (1..=5).map(|i| chunk_fingerprint("report.pdf", "alice", i)).collect();
    assert_eq!(first, second);

    let unique: std::collections::HashSet<&String> = first.iter().collect();
    assert_eq!(unique.len(), 5);
}

// ── ingestion end-to-end (scripted providers) ────────────────────────────────

#[tokio::test]
async fn image_ingestion_writes_one_file_node_and_ordered_chunks() {
    let graph = ScriptedGraph::new();
    let file = png_file();
    let outcome = ingestor(image_ingest_script(), graph.clone())
        .process_file(file.path(), "alice")
        .await;

    let summary = match &outcome {
        FileOutcome::Processed(s) => s,
        other => panic!("expected processed outcome, got {other:?}"),
    };
    assert_eq!(summary.format, "png");

    let calls = graph.calls();
    assert_eq!(calls.len(), 4, "delete + chunk upsert + file upsert + user link");
    assert!(calls[0].0.contains("DETACH DELETE"));

    let rows = calls[1].1["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    for (idx, row) in rows.iter().enumerate() {
        let ordinal = idx as u32 + 1;
        assert_eq!(row["id"], chunk_fingerprint(summary.name.as_str(), "alice", ordinal).as_str());
        assert_eq!(row["props"]["chunk_no"], ordinal);
        assert_eq!(row["props"]["username"], "alice");
    }
    // Enriched CSV data rode along into the chunk body.
    assert!(rows[0]["props"]["text"].as_str().unwrap().contains("Month,Sales"));

    assert!(calls[2].0.contains("MERGE (f:File"));
    assert!(calls[2].1["props"]["data"].is_string());
    assert!(calls[3].0.contains("UPLOADED_FILE"));
}

#[tokio::test]
async fn reingesting_the_same_file_reuses_fingerprints_and_deletes_first() {
    let file = png_file();

    let first_graph = ScriptedGraph::new();
    ingestor(image_ingest_script(), first_graph.clone())
        .process_file(file.path(), "alice")
        .await;
    let second_graph = ScriptedGraph::new();
    ingestor(image_ingest_script(), second_graph.clone())
        .process_file(file.path(), "alice")
        .await;

    let first_calls = first_graph.calls();
    let second_calls = second_graph.calls();

    // Delete-then-recreate both times, same chunk identities and count.
    assert!(second_calls[0].0.contains("DETACH DELETE"));
    let ids = |calls: &[(String, Value)]| -> Vec<Value> {
        calls[1].1["rows"]
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row["id"].clone())
            .collect()
    };
    assert_eq!(ids(&first_calls), ids(&second_calls));
    assert_eq!(first_calls[1].1["rows"].as_array().unwrap().len(), 2);
    // The File node goes through the same MERGE — upsert, not duplicate.
    assert_eq!(first_calls[2].0, second_calls[2].0);
}

#[tokio::test]
async fn batch_outcomes_cover_every_input_in_order() {
    let graph = ScriptedGraph::new();
    let file = png_file();
    let paths = vec![
        PathBuf::from("/tmp/notes.zip"),
        file.path().to_path_buf(),
        PathBuf::from("/nonexistent/missing.png"),
    ];

    let outcomes = ingestor(image_ingest_script(), graph.clone())
        .process_given_files(&paths, "alice")
        .await;

    assert_eq!(outcomes.len(), 3);
    assert!(matches!(outcomes[0], FileOutcome::Skipped { .. }));
    assert!(matches!(outcomes[1], FileOutcome::Processed(_)));
    assert!(matches!(outcomes[2], FileOutcome::Failed { .. }));
}

// ── retrieval through the conversation loop ──────────────────────────────────

fn assistant(llm: DummyClient, graph: ScriptedGraph, role: AccessRole) -> Assistant {
    let store = GraphStore::new(GraphClient::Scripted(graph));
    let embedder = EmbeddingClient::Fixed(FixedEmbedder::default());
    Assistant::new(
        LlmClient::Dummy(llm),
        Toolbox::new(store.clone(), embedder.clone()),
        store,
        embedder,
        UserDetails {
            username: "alice".into(),
            first_name: "Alice".into(),
            last_name: "Smith".into(),
            role,
        },
        &ChatConfig { history_budget: 30_000, max_steps: 25, recent_sessions: 3 },
    )
}

fn chunk_hit_record() -> Record {
    serde_json::from_str(
        r#"{
            "content": "Q3 revenue grew 12%",
            "chunk_no": 4,
            "origin_filename": "report.pdf",
            "chunk_create_ts": "2025-03-01T10:00:00Z",
            "similarity_score": 0.88
        }"#,
    )
    .unwrap()
}

#[tokio::test]
async fn similarity_tool_call_is_scoped_to_caller_and_named_file() {
    let graph = ScriptedGraph::with_results(vec![vec![chunk_hit_record()]]);
    let llm = DummyClient::scripted(vec![
        tool_reply(
            "file-filter-search",
            r#"{"similarity_search_message": "Q3 revenue", "filter_file_name": ["report.pdf"]}"#,
        ),
        text_reply("Q3 revenue grew 12%."),
    ]);
    let mut assistant = assistant(llm, graph.clone(), AccessRole::User);

    let outcome = assistant
        .converse("what was Q3 revenue?", &[], false, "English (US)")
        .await
        .unwrap();
    assert_eq!(outcome.answer, "Q3 revenue grew 12%.");

    let calls = graph.calls();
    // First store call is the vector search; the last persists the turn.
    let (query, params) = &calls[0];
    assert!(query.contains("vector.similarity.cosine"));
    assert!(query.contains("c.username = $username"));
    assert_eq!(params["username"], "alice");
    assert_eq!(params["file_names"], json!(["report.pdf"]));
    assert!(!query.contains("alice"), "caller values must be parameter-bound");

    assert!(calls.last().unwrap().0.contains("CONVERSED"));

    // The tool result the model saw carries the hit's provenance.
    let tool_msg = assistant
        .history()
        .iter()
        .find(|m| m.tool_name.as_deref() == Some("file-filter-search"))
        .unwrap();
    let payload: Value = serde_json::from_str(&tool_msg.content).unwrap();
    assert_eq!(payload["readable"][0]["chunk"]["origin_filename"], "report.pdf");
    assert_eq!(payload["readable"][0]["similarity_score"], 0.88);
}

#[tokio::test]
async fn admin_caller_searches_unscoped() {
    let graph = ScriptedGraph::new();
    let llm = DummyClient::scripted(vec![
        tool_reply("previous-chat-filter-search", "{}"),
        text_reply("no prior chats found"),
    ]);
    let mut assistant = assistant(llm, graph.clone(), AccessRole::Admin);

    assistant.converse("what did we discuss?", &[], false, "English (US)").await.unwrap();

    let (query, params) = &graph.calls()[0];
    assert!(query.contains("WHERE 1=1"));
    assert!(params.get("username").is_none());
}
