//! Ingestion orchestration.
//!
//! Drives decomposition, chart description, and chunk persistence per file,
//! fanning out across files on a bounded pool. Every input path gets exactly
//! one tagged [`FileOutcome`] — processed, skipped (with a reason), or failed
//! — so callers never have to infer failures from a shortened result list.

pub mod charts;
pub mod decompose;

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use futures_util::stream;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::config::IngestConfig;
use crate::embedding::EmbeddingClient;
use crate::error::AppError;
use crate::llm::LlmClient;
use crate::store::{ChunkRow, FileUpsert, GraphStore, chunk_fingerprint, now_iso8601};

use charts::{ChartDescriber, chart_segment};
use decompose::{
    Segment, SourceFormat, data_url, extract_excel_text, extract_pdf_text, extract_word_text,
    file_basename, image_file_base64, render_pdf_pages, text_segments,
};

/// Width of the bounded worker pool used for file and chart fan-out.
pub fn pool_width() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// Per-file result record returned to the caller on success.
#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub format: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Extension outside the supported set.
    UnsupportedType(String),
    /// Decomposition produced no text segments.
    NoContent,
    /// Vision pass found no charts on an image file.
    NoChartData,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::UnsupportedType(ext) => write!(f, "unsupported file type: .{ext}"),
            SkipReason::NoContent => write!(f, "no extractable content"),
            SkipReason::NoChartData => write!(f, "no chart data found"),
        }
    }
}

/// Tagged per-file ingestion result. The output list of
/// [`Ingestor::process_given_files`] always matches the input length.
#[derive(Debug, Clone)]
pub enum FileOutcome {
    Processed(FileSummary),
    Skipped { name: String, reason: SkipReason },
    Failed { name: String, error: String },
}

impl FileOutcome {
    pub fn name(&self) -> &str {
        match self {
            FileOutcome::Processed(s) => &s.name,
            FileOutcome::Skipped { name, .. } => name,
            FileOutcome::Failed { name, .. } => name,
        }
    }

    pub fn summary(&self) -> Option<&FileSummary> {
        match self {
            FileOutcome::Processed(s) => Some(s),
            _ => None,
        }
    }
}

pub struct Ingestor {
    store: GraphStore,
    llm: LlmClient,
    embedder: EmbeddingClient,
    describer: ChartDescriber,
    chunk_chars: usize,
    summary_prompt_budget: usize,
}

impl Ingestor {
    pub fn new(
        store: GraphStore,
        llm: LlmClient,
        embedder: EmbeddingClient,
        config: &IngestConfig,
    ) -> Self {
        let describer = ChartDescriber::new(llm.clone());
        Self {
            store,
            llm,
            embedder,
            describer,
            chunk_chars: config.chunk_chars,
            summary_prompt_budget: config.summary_prompt_budget,
        }
    }

    /// Ingest a batch of files for one user, one bounded task per file.
    /// Outcomes come back in input order, one per path.
    pub async fn process_given_files(
        &self,
        paths: &[PathBuf],
        username: &str,
    ) -> Vec<FileOutcome> {
        stream::iter(paths.iter().map(|path| self.process_file(path, username)))
            .buffered(pool_width())
            .collect()
            .await
    }

    /// Ingest one file. Failures are captured in the outcome — one bad file
    /// never aborts its batch.
    pub async fn process_file(&self, path: &Path, username: &str) -> FileOutcome {
        let name = file_basename(path);
        match self.ingest_file(path, &name, username).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(file = %name, error = %e, "file ingestion failed");
                FileOutcome::Failed { name, error: e.to_string() }
            }
        }
    }

    async fn ingest_file(
        &self,
        path: &Path,
        name: &str,
        username: &str,
    ) -> Result<FileOutcome, AppError> {
        let Some((format, ext)) = SourceFormat::from_path(path) else {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default()
                .to_lowercase();
            return Ok(FileOutcome::Skipped {
                name: name.to_string(),
                reason: SkipReason::UnsupportedType(ext),
            });
        };

        match format {
            SourceFormat::Pdf => self.ingest_pdf(path, name, username, &ext).await,
            SourceFormat::Word => {
                let full_text = extract_word_text(path)?;
                self.ingest_plain_text(name, username, &ext, &full_text).await
            }
            SourceFormat::Excel => {
                let full_text = extract_excel_text(path)?;
                self.ingest_plain_text(name, username, &ext, &full_text).await
            }
            SourceFormat::Image => self.ingest_image(path, name, username, &ext).await,
        }
    }

    /// PDF: chart-describe every rendered page first, then chunk the full
    /// document text, ordinals running on across both passes. Existing chunks
    /// are deleted exactly once, before the first write; every pass appends.
    async fn ingest_pdf(
        &self,
        path: &Path,
        name: &str,
        username: &str,
        ext: &str,
    ) -> Result<FileOutcome, AppError> {
        // A failed page render degrades to a text-only ingestion; the pages
        // are a chart source, not the document of record.
        let pages = match render_pdf_pages(path) {
            Ok(pages) => pages,
            Err(e) => {
                warn!(file = %name, error = %e, "page rendering failed, continuing with text only");
                Vec::new()
            }
        };

        let mut ordinal: u32 = 1;
        let mut image_batches: Vec<(String, String, Vec<Segment>)> = Vec::new();

        for (page_idx, page_b64) in pages.iter().enumerate() {
            let page_no = page_idx as u32;
            let image_name = format!("{name}_image{page_no}");
            let url = data_url("png", page_b64);

            let found = self.describer.describe(&image_name, &url).await;
            if found.is_empty() {
                continue;
            }
            let enriched = self.describer.enrich(found, &image_name, &url).await;

            let listing = serde_json::to_string(&enriched)
                .map_err(|e| AppError::Ingest(format!("failed to serialize chart listing: {e}")))?;
            let mut segments = Vec::with_capacity(enriched.len());
            for chart in &enriched {
                segments.push(chart_segment(chart, ordinal, Some((page_no, 0)), name, username, ext)?);
                ordinal += 1;
            }
            image_batches.push((page_b64.clone(), listing, segments));
        }

        let full_text = extract_pdf_text(path)?;
        let (body_segments, _) =
            text_segments(&full_text, self.chunk_chars, ordinal, name, username, ext);

        if image_batches.is_empty() && body_segments.is_empty() {
            return Ok(FileOutcome::Skipped {
                name: name.to_string(),
                reason: SkipReason::NoContent,
            });
        }

        self.store.delete_file_chunks(name, username).await?;

        let mut image_summary = String::new();
        for (page_b64, listing, segments) in &image_batches {
            let summary = self
                .persist_batch(name, username, ext, listing, segments, Some(page_b64.as_str()))
                .await?;
            image_summary.push_str(&summary);
        }

        let mut summary = if body_segments.is_empty() {
            String::new()
        } else {
            self.persist_batch(name, username, ext, &full_text, &body_segments, None)
                .await?
        };
        if !image_summary.is_empty() {
            summary.push_str("File contains image, summary of those: ");
            summary.push_str(&image_summary);
        }

        info!(file = %name, chunks = ordinal - 1 + body_segments.len() as u32, "pdf ingested");
        Ok(FileOutcome::Processed(FileSummary {
            name: name.to_string(),
            format: ext.to_string(),
            summary,
        }))
    }

    /// Word/Excel: one text pass, chunks numbered from 1.
    async fn ingest_plain_text(
        &self,
        name: &str,
        username: &str,
        ext: &str,
        full_text: &str,
    ) -> Result<FileOutcome, AppError> {
        let (segments, _) = text_segments(full_text, self.chunk_chars, 1, name, username, ext);
        if segments.is_empty() {
            return Ok(FileOutcome::Skipped {
                name: name.to_string(),
                reason: SkipReason::NoContent,
            });
        }

        self.store.delete_file_chunks(name, username).await?;
        let summary = self
            .persist_batch(name, username, ext, full_text, &segments, None)
            .await?;

        info!(file = %name, chunks = segments.len(), "document ingested");
        Ok(FileOutcome::Processed(FileSummary {
            name: name.to_string(),
            format: ext.to_string(),
            summary,
        }))
    }

    /// Standalone image: a single-page document made entirely of chart chunks.
    async fn ingest_image(
        &self,
        path: &Path,
        name: &str,
        username: &str,
        ext: &str,
    ) -> Result<FileOutcome, AppError> {
        let (payload_b64, image_ext) = image_file_base64(path)?;
        let url = data_url(&image_ext, &payload_b64);

        let found = self.describer.describe(name, &url).await;
        if found.is_empty() {
            return Ok(FileOutcome::Skipped {
                name: name.to_string(),
                reason: SkipReason::NoChartData,
            });
        }
        let enriched = self.describer.enrich(found, name, &url).await;

        let listing = serde_json::to_string(&enriched)
            .map_err(|e| AppError::Ingest(format!("failed to serialize chart listing: {e}")))?;
        let mut segments = Vec::with_capacity(enriched.len());
        for (idx, chart) in enriched.iter().enumerate() {
            segments.push(chart_segment(chart, idx as u32 + 1, None, name, username, ext)?);
        }

        self.store.delete_file_chunks(name, username).await?;
        let summary = self
            .persist_batch(name, username, ext, &listing, &segments, Some(payload_b64.as_str()))
            .await?;

        info!(file = %name, chunks = segments.len(), "image ingested");
        Ok(FileOutcome::Processed(FileSummary {
            name: name.to_string(),
            format: ext.to_string(),
            summary,
        }))
    }

    /// Persist one batch: summarize it, embed every segment, upsert chunks
    /// under their fingerprints, upsert the File node, link File→Chunk and
    /// User→File. Returns the batch summary.
    pub(crate) async fn persist_batch(
        &self,
        file_name: &str,
        username: &str,
        format: &str,
        summary_source: &str,
        segments: &[Segment],
        image_data: Option<&str>,
    ) -> Result<String, AppError> {
        let summary = self.summarize(summary_source).await?;

        let texts: Vec<String> = segments.iter().map(|s| s.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        let rows: Vec<ChunkRow> = segments
            .iter()
            .zip(embeddings)
            .map(|(segment, embedding)| {
                let ordinal = segment
                    .meta
                    .get("chunk_no")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32;
                let mut props = segment.meta.clone();
                props.insert("text".into(), json!(segment.text));
                props.insert("embedding".into(), json!(embedding));
                ChunkRow { id: chunk_fingerprint(file_name, username, ordinal), props }
            })
            .collect();
        self.store.upsert_chunks(&rows).await?;

        self.store
            .upsert_file(&FileUpsert {
                name: file_name.to_string(),
                username: username.to_string(),
                format: format.to_string(),
                summary: summary.clone(),
                timestamp: now_iso8601(),
                image_data: image_data.map(String::from),
            })
            .await?;
        self.store.link_user_file(file_name, username).await?;

        Ok(summary)
    }

    /// Two-line batch summary via the reasoning provider; the prompt is capped
    /// to bound cost and latency.
    async fn summarize(&self, text: &str) -> Result<String, AppError> {
        let prompt = format!(
            "You are given a text below from a file, summarise from the content and get \
             a 2 line context of the file. Keep your response in 2 lines. If text is in \
             other language than English mention that and keep the context summary in \
             English only:\n{text}"
        );
        let prompt = truncate_chars(&prompt, self.summary_prompt_budget);
        self.llm.complete(None, prompt).await
    }
}

/// Cut `s` to at most `max` characters, char-boundary safe.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::embedding::FixedEmbedder;
    use crate::graph::{GraphClient, ScriptedGraph};
    use crate::llm::{DummyClient, LlmReply};
    use std::io::Write;

    fn ingest_config() -> IngestConfig {
        IngestConfig { chunk_chars: 2000, summary_prompt_budget: 32_000 }
    }

    fn text_reply(s: &str) -> LlmReply {
        LlmReply { text: Some(s.to_string()), tool_calls: Vec::new() }
    }

    fn ingestor_with(llm: DummyClient, graph: ScriptedGraph) -> Ingestor {
        Ingestor::new(
            GraphStore::new(GraphClient::Scripted(graph)),
            LlmClient::Dummy(llm),
            EmbeddingClient::Fixed(FixedEmbedder::default()),
            &ingest_config(),
        )
    }

    #[tokio::test]
    async fn unsupported_extension_is_tagged_not_dropped() {
        let graph = ScriptedGraph::new();
        let ingestor = ingestor_with(DummyClient::echo(), graph.clone());

        let paths = vec![PathBuf::from("/tmp/archive.zip"), PathBuf::from("/tmp/noext")];
        let outcomes = ingestor.process_given_files(&paths, "alice").await;

        assert_eq!(outcomes.len(), paths.len());
        assert!(matches!(
            &outcomes[0],
            FileOutcome::Skipped { reason: SkipReason::UnsupportedType(ext), .. } if ext == "zip"
        ));
        assert!(matches!(&outcomes[1], FileOutcome::Skipped { .. }));
        // Nothing touched the store.
        assert_eq!(graph.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_file_becomes_failed_outcome() {
        let ingestor = ingestor_with(DummyClient::echo(), ScriptedGraph::new());
        let outcomes = ingestor
            .process_given_files(&[PathBuf::from("/nonexistent/chart.png")], "alice")
            .await;
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(&outcomes[0], FileOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn image_ingestion_deletes_once_then_appends() {
        let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        file.write_all(&[0x89, 0x50, 0x4e, 0x47]).unwrap();

        let chart_json = r#"[{"title": "Sales", "type": "pie_chart", "description": "share by region", "relative_position": "center"}]"#;
        let llm = DummyClient::scripted(vec![
            text_reply(chart_json),            // chart listing
            text_reply("Region,Share\nEU,40"), // tabular enrichment
            text_reply("A pie chart of regional share.\nSingle page."), // summary
        ]);
        let graph = ScriptedGraph::new();
        let ingestor = ingestor_with(llm, graph.clone());

        let outcome = ingestor.process_file(file.path(), "alice").await;
        let summary = outcome.summary().expect("processed");
        assert_eq!(summary.format, "png");
        assert!(summary.summary.contains("pie chart"));

        let calls = graph.calls();
        // delete, chunk upsert, file upsert, user link — in that order.
        assert_eq!(calls.len(), 4);
        assert!(calls[0].0.contains("DETACH DELETE"));
        assert!(calls[1].0.contains("MERGE (c:Chunk"));
        assert!(calls[2].0.contains("MERGE (f:File"));
        assert!(calls[3].0.contains("UPLOADED_FILE"));

        let name = outcome.name();
        assert_eq!(
            calls[1].1["rows"][0]["id"],
            chunk_fingerprint(name, "alice", 1).as_str()
        );
        let props = &calls[1].1["rows"][0]["props"];
        assert_eq!(props["chunk_no"], 1);
        assert!(props["embedding"].is_array());
        assert!(props["text"].as_str().unwrap().contains("pie_chart"));
        // Image payload lands on the File node.
        assert!(calls[2].1["props"]["data"].is_string());
    }

    #[tokio::test]
    async fn image_with_no_charts_is_skipped_without_writes() {
        let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        file.write_all(&[0x89, 0x50]).unwrap();

        let llm = DummyClient::scripted(vec![
            text_reply("[]"),
            text_reply("[]"),
            text_reply("[]"),
        ]);
        let graph = ScriptedGraph::new();
        let ingestor = ingestor_with(llm, graph.clone());

        let outcome = ingestor.process_file(file.path(), "alice").await;
        assert!(matches!(
            outcome,
            FileOutcome::Skipped { reason: SkipReason::NoChartData, .. }
        ));
        assert_eq!(graph.call_count(), 0);
    }

    #[tokio::test]
    async fn persist_batch_fingerprints_follow_segment_ordinals() {
        let llm = DummyClient::scripted(vec![text_reply("two lines.\nabout text.")]);
        let graph = ScriptedGraph::new();
        let ingestor = ingestor_with(llm, graph.clone());

        let (segments, next) =
            text_segments(&"z".repeat(4500), 2000, 3, "report.pdf", "alice", "pdf");
        assert_eq!(next, 6);
        ingestor
            .persist_batch("report.pdf", "alice", "pdf", "source", &segments, None)
            .await
            .unwrap();

        let calls = graph.calls();
        let rows = calls[0].1["rows"].as_array().unwrap();
        assert_eq!(rows.len(), 3);
        for (row, ordinal) in rows.iter().zip(3u32..) {
            assert_eq!(row["id"], chunk_fingerprint("report.pdf", "alice", ordinal).as_str());
        }
    }

    #[test]
    fn truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("ééé", 2), "éé");
    }
}
