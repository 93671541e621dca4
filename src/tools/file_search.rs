//! File-context search: structured lookup or chunk-level similarity search.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::embedding::EmbeddingClient;
use crate::error::AppError;
use crate::store::{DateWindow, GraphStore};
use crate::tools::{CallerContext, ToolOutput, validate_date};

const DEFAULT_LIMIT: i64 = 4;
const MAX_LIMIT: i64 = 10;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct FileSearchArgs {
    #[serde(default)]
    filter_file_name: Option<Vec<String>>,
    #[serde(default)]
    filter_date_from: Option<String>,
    #[serde(default)]
    filter_date_till: Option<String>,
    #[serde(default)]
    similarity_search_message: Option<String>,
    #[serde(default)]
    limit_by: Option<i64>,
    #[serde(default)]
    show_image: Option<bool>,
}

pub(crate) async fn run(
    store: &GraphStore,
    embedder: &EmbeddingClient,
    ctx: &CallerContext,
    args: FileSearchArgs,
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
        // Structured lookup: newest matching files, chunks concatenated.
        None => {
            let rows = store
                .files_structured(scope, args.filter_file_name.as_deref(), window, limit)
                .await?;

            // Image payloads travel out-of-band; the readable rows never
            // carry the raw data.
            let metadata = if args.show_image.unwrap_or(false) {
                let mut image_data = Map::new();
                for row in &rows {
                    if let (Some(name), Some(data)) = (
                        row.details.get("name").and_then(Value::as_str),
                        row.details.get("data").and_then(Value::as_str),
                    ) {
                        image_data.insert(name.to_string(), json!(data));
                    }
                }
                Some(json!({"image_data": image_data}))
            } else {
                None
            };

            let readable: Vec<Value> = rows
                .into_iter()
                .map(|mut row| {
                    row.details.remove("data");
                    row.details.remove("embedding");
                    json!({"file_details": row.details, "file_contents": row.contents})
                })
                .collect();

            Ok(ToolOutput { readable: json!(readable), metadata })
        }

        // Similarity lookup over chunk embeddings. Filenames act as a
        // membership filter on the vector search; image retrieval is not
        // available on this path.
        Some(query) => {
            let query_embedding = embedder.embed(query).await?;
            let hits = store
                .chunks_by_similarity(
                    scope,
                    args.filter_file_name.as_deref(),
                    window,
                    &query_embedding,
                    limit,
                )
                .await?;

            let readable: Vec<Value> = hits
                .into_iter()
                .map(|hit| {
                    json!({
                        "chunk": {
                            "content": hit.content,
                            "chunk_no": hit.chunk_no,
                            "origin_filename": hit.origin_filename,
                            "chunk_create_ts": hit.chunk_create_ts,
                        },
                        "similarity_score": hit.score,
                    })
                })
                .collect();

            Ok(ToolOutput { readable: json!(readable), metadata: None })
        }
    }
}
