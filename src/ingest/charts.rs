//! Chart extraction from raster images.
//!
//! A vision call lists the charts present on an image as structured
//! descriptions; a second call per chart extracts its tabular data as CSV.
//! Malformed output is retried with the error fed back as corrective context;
//! exhausted retries degrade to "no chart data" rather than failing the file.

use futures_util::StreamExt;
use futures_util::stream;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::AppError;
use crate::ingest::decompose::{Segment, segment_meta};
use crate::ingest::pool_width;
use crate::llm::LlmClient;

/// Vision-call attempts per image before giving up.
const MAX_ATTEMPTS: usize = 3;

/// The chart-type taxonomy the vision prompt is constrained to.
pub const CHART_TYPES: [&str; 18] = [
    "area_map",
    "combo",
    "donut",
    "gauge",
    "multi_row_card",
    "ribbon",
    "scatter",
    "table",
    "bar_chart",
    "card_chart",
    "column_chart",
    "funnel",
    "line_chart",
    "map",
    "pie_chart",
    "treemap",
    "waterfall",
    "other",
];

/// One chart found on an image. `data` is filled by the enrichment pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartDetail {
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub chart_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub relative_position: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChartDescriber {
    llm: LlmClient,
}

impl ChartDescriber {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    /// List the charts on one image.
    ///
    /// Up to [`MAX_ATTEMPTS`] vision calls; each failure's message is appended
    /// to the next prompt as corrective context. Returns an empty list once
    /// attempts are exhausted — the caller proceeds without chart data.
    pub async fn describe(&self, image_name: &str, image_data_url: &str) -> Vec<ChartDetail> {
        let mut error_message = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            let mut prompt = listing_prompt();
            if !error_message.is_empty() {
                prompt.push_str(&format!(
                    "\nOn last try you had following error {error_message}, please correct it"
                ));
            }

            match self.llm.describe_image(&prompt, image_data_url).await {
                Ok(text) => match parse_chart_list(&text) {
                    Ok(charts) => {
                        debug!(image = image_name, charts = charts.len(), attempt, "charts described");
                        return charts;
                    }
                    Err(e) => {
                        warn!(image = image_name, attempt, error = %e, "chart listing was not valid JSON");
                        error_message = e;
                    }
                },
                Err(e) => {
                    warn!(image = image_name, attempt, error = %e, "chart listing call failed");
                    error_message = e.to_string();
                }
            }
        }

        warn!(image = image_name, "chart extraction exhausted retries, continuing without chart data");
        Vec::new()
    }

    /// Fill each chart's `data` with CSV extracted by an independent call.
    /// Calls run concurrently on a bounded pool; results keep input order.
    /// A failed enrichment leaves that chart's `data` empty.
    pub async fn enrich(
        &self,
        charts: Vec<ChartDetail>,
        image_name: &str,
        image_data_url: &str,
    ) -> Vec<ChartDetail> {
        stream::iter(charts.into_iter().map(|chart| {
            let llm = self.llm.clone();
            let url = image_data_url.to_string();
            let name = image_name.to_string();
            async move {
                let prompt = tabular_prompt(&chart);
                match llm.describe_image(&prompt, &url).await {
                    Ok(csv) => ChartDetail { data: Some(csv), ..chart },
                    Err(e) => {
                        warn!(image = %name, title = %chart.title, error = %e, "chart data extraction failed");
                        chart
                    }
                }
            }
        }))
        .buffered(pool_width())
        .collect()
        .await
    }
}

/// Turn one chart into a persistable segment. `page_image` carries the
/// `(page, image index)` pair for PDF-embedded images; standalone image files
/// pass `None` and get no composite position id.
pub fn chart_segment(
    chart: &ChartDetail,
    ordinal: u32,
    page_image: Option<(u32, u32)>,
    origin_filename: &str,
    username: &str,
    format: &str,
) -> Result<Segment, AppError> {
    let text = serde_json::to_string(chart)
        .map_err(|e| AppError::Ingest(format!("failed to serialize chart detail: {e}")))?;

    let mut extra: Vec<(&str, Value)> = vec![
        ("title", json!(chart.title)),
        ("chart_type", json!(chart.chart_type)),
        ("description", json!(chart.description)),
        ("relative_position", json!(chart.relative_position)),
    ];
    if let Some(data) = &chart.data {
        extra.push(("data", json!(data)));
    }
    if let Some((page, image_index)) = page_image {
        extra.push(("page", json!(page)));
        extra.push(("image_id", json!(format!("{page}.{image_index}.{ordinal}"))));
    }

    Ok(Segment {
        meta: segment_meta(ordinal, origin_filename, username, format, &extra),
        text,
    })
}

fn listing_prompt() -> String {
    format!(
        "You are a helpful assistant specialized on images that contain charts. \
         You are to find presence of these types of charts on given image: {}. \
         For each type of chart you find add a new element on your output JSON list. \
         Each element will have 4 keys: title, type, description, relative_position. \
         In description attribute include all the minimum to maximum limits you see \
         for each axis. Output only the JSON message nothing else. Example output: \
         [{{\"title\": \"This Year Sales and Last Year Sales by FiscalMonth\", \
         \"type\":\"area_map\", \"description\":\"This is a line and area chart comparing \
         sales for 'This Year' (in blue) and 'Last Year' (in red) by fiscal month from \
         January to August. The X-axis represents months from Jan till Aug. The Y-axis \
         represents sales in millions of dollars (from $2M to $4M)\", \
         \"relative_position\":\"top left\"}}]",
        CHART_TYPES.join(", ")
    )
}

fn tabular_prompt(chart: &ChartDetail) -> String {
    let detail = serde_json::to_string(chart).unwrap_or_default();
    format!(
        "You are a helpful assistant specialized on extracting data from images in \
         comma separated format. You are given an image that contains charts in it. \
         According to following instructions fetch the corresponding chart details \
         from the image and output it as CSV, example: \
         Month,This Year Sales ($M),Last Year Sales ($M)\n\
         Jan,1.5,2.0\nFeb,2.5,2.5\nMar,3.8,2.8\nApr,2.7,3.3\n\
         Chart details: {detail}"
    )
}

fn parse_chart_list(text: &str) -> Result<Vec<ChartDetail>, String> {
    serde_json::from_str(strip_code_fences(text)).map_err(|e| e.to_string())
}

/// Models often wrap JSON in a markdown code fence despite instructions.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
