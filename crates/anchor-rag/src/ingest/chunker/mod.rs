//! Chunking strategies
//!
//! A profile picks the strategy; the dispatcher feeds loader items
//! through it and yields ordered `RawChunk`s. Chunk ids are assigned
//! later by the pipeline, which knows the doc id.

pub mod chars;
pub mod structured;
pub mod token;

use crate::config::{AssetsConfig, ChunkerConfig, ChunkerKind, Profile};
use crate::ingest::loader::DocItem;

/// Chunker output before ids and embeddings exist
#[derive(Debug, Clone, Default)]
pub struct RawChunk {
    pub text: String,
    /// 1-based index among text chunks of the document; 0 for figures
    pub local_index: usize,
    pub is_figure: bool,
    pub figure_id: Option<String>,
    pub image_name: Option<String>,
    pub image_data: Option<Vec<u8>>,
    pub parent_local_index: Option<usize>,
    pub block_type: Option<String>,
    pub section_path: Option<String>,
    pub page: Option<u32>,
    pub slide_number: Option<u32>,
    pub sheet_name: Option<String>,
    pub doc_title: Option<String>,
    pub content_type: Option<String>,
}

/// Figure emission flags, resolved from the assets config
#[derive(Debug, Clone, Copy, Default)]
pub struct FigureOptions {
    pub inline_placeholders: bool,
    pub figure_chunks: bool,
}

impl From<&AssetsConfig> for FigureOptions {
    fn from(assets: &AssetsConfig) -> Self {
        Self {
            inline_placeholders: assets.inline_placeholders,
            figure_chunks: assets.figure_chunks,
        }
    }
}

/// Chunk loader items per the profile's strategy. Structured strategies
/// apply to the office items they understand; everything else falls back
/// to the fixed-window chunkers.
pub fn chunk_items(items: &[DocItem], profile: &Profile, figures: FigureOptions) -> Vec<RawChunk> {
    let chunker = &profile.chunker;
    let max_tokens = profile.effective_max_tokens();

    match chunker.kind {
        ChunkerKind::StructuredDocx => {
            let (docx_items, rest): (Vec<&DocItem>, Vec<&DocItem>) = items
                .iter()
                .partition(|item| item.content_type.contains("wordprocessingml"));
            let mut chunks = structured::chunk_structured_docx(
                &docx_items,
                chunker.admin_sections.as_ref(),
                max_tokens,
                figures,
                false,
            );
            append_fixed(&mut chunks, &rest, chunker);
            chunks
        }
        ChunkerKind::TocSectionDocx => {
            let (docx_items, rest): (Vec<&DocItem>, Vec<&DocItem>) = items
                .iter()
                .partition(|item| item.content_type.contains("wordprocessingml"));
            let mut chunks = structured::chunk_structured_docx(
                &docx_items,
                chunker.admin_sections.as_ref(),
                max_tokens,
                figures,
                true,
            );
            append_fixed(&mut chunks, &rest, chunker);
            chunks
        }
        ChunkerKind::StructuredPdf => {
            let (pdf_items, rest): (Vec<&DocItem>, Vec<&DocItem>) = items
                .iter()
                .partition(|item| item.content_type.contains("pdf"));
            let mut chunks = structured::chunk_structured_pdf(&pdf_items, max_tokens);
            append_fixed(&mut chunks, &rest, chunker);
            chunks
        }
        ChunkerKind::Char | ChunkerKind::Token => {
            let mut chunks = Vec::new();
            let all: Vec<&DocItem> = items.iter().collect();
            append_fixed(&mut chunks, &all, chunker);
            chunks
        }
    }
}

/// Fixed-window chunking for items a structured strategy did not claim.
fn append_fixed(chunks: &mut Vec<RawChunk>, items: &[&DocItem], chunker: &ChunkerConfig) {
    let mut local_index = chunks.iter().filter(|c| !c.is_figure).count();
    for item in items {
        if item.block_type.as_deref() == Some("image") {
            continue;
        }
        let preserve_rows = item.sheet_name.is_some();
        let pieces = match chunker.kind {
            ChunkerKind::Token => token::chunk_tokens(
                &item.text,
                chunker.size,
                chunker.overlap_fraction(),
            ),
            _ => match (&chunker.separator, preserve_rows) {
                (Some(separator), false) => {
                    chars::chunk_chars_by_separator(&item.text, chunker.size, separator)
                }
                _ => chars::chunk_chars(&item.text, chunker.size, chunker.overlap_chars()),
            },
        };
        for text in pieces {
            local_index += 1;
            chunks.push(RawChunk {
                text,
                local_index,
                block_type: item.block_type.clone(),
                section_path: item.section_path.clone(),
                page: item.page,
                slide_number: item.slide_number,
                sheet_name: item.sheet_name.clone(),
                content_type: Some(item.content_type.clone()),
                ..RawChunk::default()
            });
        }
    }
}

/// When every chunk starts with the same first line, treat it as a
/// repeated document title: strip it from all but the first chunk and
/// record it as metadata.
pub fn strip_repeated_doc_title(chunks: &mut [RawChunk]) -> Option<String> {
    let text_chunks: Vec<usize> = chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.is_figure)
        .map(|(i, _)| i)
        .collect();
    if text_chunks.len() < 2 {
        return None;
    }

    let mut first_lines = Vec::new();
    for &idx in &text_chunks {
        let line = chunks[idx].text.lines().next()?.trim().to_string();
        if line.is_empty() {
            return None;
        }
        first_lines.push(line);
    }
    let candidate = first_lines[0].clone();
    if !first_lines.iter().all(|line| *line == candidate) {
        return None;
    }

    for (pos, &idx) in text_chunks.iter().enumerate() {
        chunks[idx].doc_title = Some(candidate.clone());
        if pos == 0 {
            continue;
        }
        let body: String = chunks[idx]
            .text
            .lines()
            .skip(1)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();
        chunks[idx].text = body;
    }
    Some(candidate)
}
