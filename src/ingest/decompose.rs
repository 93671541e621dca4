//! Format-specific document decomposition.
//!
//! Turns a source file on disk into an ordered sequence of text segments with
//! positional metadata, independent of downstream storage. PDF text comes
//! from `pdf-extract`, page rasters from `pdf2image`, Word documents go
//! through a pandoc plain-text conversion, and Excel workbooks are read with
//! `calamine`.

use std::path::Path;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use pdf2image::image::ImageEncoder;
use pdf2image::image::codecs::png::PngEncoder;
use serde_json::{Map, Value, json};

use crate::error::AppError;
use crate::store::now_iso8601;

/// The fixed set of ingestible formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Pdf,
    Word,
    Excel,
    Image,
}

impl SourceFormat {
    /// Classify by file extension (case-insensitive). `None` for anything
    /// outside the supported set.
    pub fn from_path(path: &Path) -> Option<(Self, String)> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        let format = match ext.as_str() {
            "pdf" => SourceFormat::Pdf,
            "doc" | "docx" => SourceFormat::Word,
            "xlsx" => SourceFormat::Excel,
            "png" | "jpeg" | "jpg" => SourceFormat::Image,
            _ => return None,
        };
        Some((format, ext))
    }
}

/// One unit of extracted content plus its node properties.
#[derive(Debug, Clone)]
pub struct Segment {
    pub text: String,
    pub meta: Map<String, Value>,
}

/// Pure character-count splitter: `limit` characters per piece, no overlap,
/// no boundary search. Pieces that trim to nothing are dropped.
pub fn split_chars(text: &str, limit: usize) -> Vec<String> {
    if limit == 0 {
        return Vec::new();
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;

    for ch in text.chars() {
        current.push(ch);
        count += 1;
        if count == limit {
            if !current.trim().is_empty() {
                pieces.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
            count = 0;
        }
    }
    if !current.trim().is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Split `full_text` into segments numbered from `start_ordinal`, returning
/// the segments and the next free ordinal.
pub fn text_segments(
    full_text: &str,
    chunk_chars: usize,
    start_ordinal: u32,
    origin_filename: &str,
    username: &str,
    format: &str,
) -> (Vec<Segment>, u32) {
    let mut ordinal = start_ordinal;
    let mut segments = Vec::new();
    for piece in split_chars(full_text, chunk_chars) {
        segments.push(Segment {
            meta: segment_meta(ordinal, origin_filename, username, format, &[]),
            text: piece,
        });
        ordinal += 1;
    }
    (segments, ordinal)
}

/// Standard segment metadata; `extra` carries format-specific pairs.
/// Empty-string values are pruned before persistence.
pub fn segment_meta(
    ordinal: u32,
    origin_filename: &str,
    username: &str,
    format: &str,
    extra: &[(&str, Value)],
) -> Map<String, Value> {
    let mut meta = Map::new();
    meta.insert("chunk_no".into(), json!(ordinal));
    meta.insert("chunk_create_ts".into(), json!(now_iso8601()));
    meta.insert("origin_filename".into(), json!(origin_filename));
    meta.insert("format".into(), json!(format));
    meta.insert("username".into(), json!(username));
    for (key, value) in extra {
        meta.insert((*key).to_string(), value.clone());
    }
    meta.retain(|_, v| v.as_str() != Some(""));
    meta
}

/// The trailing path component, with both separator conventions handled.
pub fn file_basename(path: &Path) -> String {
    let raw = path.to_string_lossy();
    raw.rsplit(['/', '\\']).next().unwrap_or(&raw).to_string()
}

// ── Extraction ───────────────────────────────────────────────────────────────

/// Full plain text of a PDF.
pub fn extract_pdf_text(path: &Path) -> Result<String, AppError> {
    pdf_extract::extract_text(path)
        .map_err(|e| AppError::Ingest(format!("pdf text extraction failed for {}: {e}", path.display())))
}

/// Render each PDF page once and return base64-encoded PNGs, page-ordered.
pub fn render_pdf_pages(path: &Path) -> Result<Vec<String>, AppError> {
    let data = std::fs::read(path)?;
    let pdf = pdf2image::PDF::from_bytes(data)
        .map_err(|e| AppError::Ingest(format!("cannot open pdf {}: {e}", path.display())))?;
    let pages = pdf
        .render(pdf2image::Pages::All, None)
        .map_err(|e| AppError::Ingest(format!("pdf render failed for {}: {e}", path.display())))?;

    pages.into_iter().map(encode_png_base64).collect()
}

fn encode_png_base64(img: pdf2image::image::DynamicImage) -> Result<String, AppError> {
    let rgb = img.to_rgb8();
    let mut encoded = Vec::new();
    PngEncoder::new(&mut encoded)
        .write_image(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            pdf2image::image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| AppError::Ingest(format!("failed to encode page image: {e}")))?;
    Ok(BASE64_STANDARD.encode(encoded))
}

/// Plain text of a Word document via pandoc.
pub fn extract_word_text(path: &Path) -> Result<String, AppError> {
    let mut pandoc = pandoc::new();
    pandoc.add_input(path);
    pandoc.set_output(pandoc::OutputKind::Pipe);
    pandoc.set_output_format(pandoc::OutputFormat::Plain, Vec::new());

    match pandoc
        .execute()
        .map_err(|e| AppError::Ingest(format!("pandoc conversion failed for {}: {e}", path.display())))?
    {
        pandoc::PandocOutput::ToBuffer(text) => Ok(text),
        _ => Err(AppError::Ingest("pandoc returned no buffered output".into())),
    }
}

/// Plain text of every sheet in an Excel workbook: cells joined by spaces,
/// rows by newlines, sheets prefixed with their name.
pub fn extract_excel_text(path: &Path) -> Result<String, AppError> {
    use calamine::{Reader, open_workbook_auto};

    let mut workbook = open_workbook_auto(path)
        .map_err(|e| AppError::Ingest(format!("cannot open workbook {}: {e}", path.display())))?;

    let mut text = String::new();
    for sheet_name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| AppError::Ingest(format!("cannot read sheet '{sheet_name}': {e}")))?;
        text.push_str(&sheet_name);
        text.push('\n');
        for row in range.rows() {
            let line: Vec<String> = row.iter().map(|cell| cell.to_string()).collect();
            text.push_str(&line.join(" "));
            text.push('\n');
        }
    }
    Ok(text)
}

/// Read an image file and return its base64 payload plus extension.
pub fn image_file_base64(path: &Path) -> Result<(String, String), AppError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("png")
        .to_lowercase();
    let bytes = std::fs::read(path)?;
    Ok((BASE64_STANDARD.encode(bytes), ext))
}

/// Inline `data:` URL for a vision call.
pub fn data_url(ext: &str, base64_payload: &str) -> String {
    format!("data:image/{ext};base64,{base64_payload}")
}
