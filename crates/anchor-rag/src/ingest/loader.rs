//! Format-aware document loading
//!
//! Each loader turns one file into an ordered list of `DocItem`s carrying
//! text plus format-specific metadata. Chunkers downstream decide how
//! items become chunks; loaders never chunk.

use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};

/// One ordered unit of loader output
#[derive(Debug, Clone, Default)]
pub struct DocItem {
    pub text: String,
    pub content_type: String,
    pub source: String,
    /// paragraph | heading | image | table | notes
    pub block_type: Option<String>,
    pub heading_level: Option<u8>,
    pub page: Option<u32>,
    pub slide_number: Option<u32>,
    pub sheet_name: Option<String>,
    pub section_path: Option<String>,
    /// Inline image payload, present only for block_type == "image"
    pub image_name: Option<String>,
    pub image_data: Option<Vec<u8>>,
}

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_HTML: &str = "text/html";
pub const MIME_TXT: &str = "text/plain";

/// Route a file to its loader by extension.
pub fn route_and_load(path: &Path, extract_images: bool) -> Result<Vec<DocItem>> {
    let source = path.to_string_lossy().into_owned();
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let data = std::fs::read(path)
        .map_err(|e| Error::internal(format!("cannot read {}: {}", source, e)))?;

    match extension.as_str() {
        "pdf" => load_pdf(&data, &source),
        "docx" => load_docx(&data, &source, extract_images),
        "pptx" => load_pptx(&data, &source),
        "xlsx" => load_xlsx(&data, &source),
        "html" | "htm" => load_html(&data, &source),
        "txt" | "md" | "markdown" => load_txt(&data, &source),
        other => Err(Error::UnsupportedMime(format!(
            "no loader for extension '{}' ({})",
            other, source
        ))),
    }
}

/// PDF: one item per page.
fn load_pdf(data: &[u8], source: &str) -> Result<Vec<DocItem>> {
    let doc = lopdf::Document::load_mem(data)
        .map_err(|e| Error::bad_request(format!("cannot parse PDF {}: {}", source, e)))?;

    let mut items = Vec::new();
    for (&page_number, _) in doc.get_pages().iter() {
        let text = match doc.extract_text(&[page_number]) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("pdf {} page {}: extraction failed: {}", source, page_number, e);
                continue;
            }
        };
        if text.trim().is_empty() {
            continue;
        }
        items.push(DocItem {
            text,
            content_type: MIME_PDF.to_string(),
            source: source.to_string(),
            block_type: Some("page".to_string()),
            page: Some(page_number),
            ..DocItem::default()
        });
    }
    if items.is_empty() {
        return Err(Error::bad_request(format!(
            "no extractable text in PDF {}",
            source
        )));
    }
    Ok(items)
}

/// DOCX: one item per paragraph, with heading levels preserved so the
/// structured chunkers can rebuild the section tree. Inline images become
/// `block_type=image` items in paragraph order when extraction is on.
fn load_docx(data: &[u8], source: &str, extract_images: bool) -> Result<Vec<DocItem>> {
    let docx = docx_rs::read_docx(data)
        .map_err(|e| Error::bad_request(format!("cannot parse DOCX {}: {}", source, e)))?;

    let mut media = if extract_images {
        docx_media_files(data)?
    } else {
        Vec::new()
    };
    let mut media_cursor = 0usize;

    let mut items = Vec::new();
    for child in docx.document.children {
        let paragraph = match child {
            docx_rs::DocumentChild::Paragraph(p) => p,
            docx_rs::DocumentChild::Table(_) => continue,
            _ => continue,
        };

        let heading_level = paragraph
            .property
            .style
            .as_ref()
            .and_then(|style| heading_level_from_style(&style.val));

        let mut text = String::new();
        let mut images_in_paragraph = 0usize;
        for child in paragraph.children {
            if let docx_rs::ParagraphChild::Run(run) = child {
                for run_child in run.children {
                    match run_child {
                        docx_rs::RunChild::Text(t) => text.push_str(&t.text),
                        docx_rs::RunChild::Tab(_) => text.push(' '),
                        docx_rs::RunChild::Drawing(_) => images_in_paragraph += 1,
                        _ => {}
                    }
                }
            }
        }

        let trimmed = text.trim();
        if !trimmed.is_empty() {
            items.push(DocItem {
                text: trimmed.to_string(),
                content_type: MIME_DOCX.to_string(),
                source: source.to_string(),
                block_type: Some(
                    if heading_level.is_some() {
                        "heading"
                    } else {
                        "paragraph"
                    }
                    .to_string(),
                ),
                heading_level,
                ..DocItem::default()
            });
        }

        if extract_images {
            for _ in 0..images_in_paragraph {
                if media_cursor >= media.len() {
                    break;
                }
                let (name, bytes) = std::mem::take(&mut media[media_cursor]);
                media_cursor += 1;
                items.push(DocItem {
                    text: String::new(),
                    content_type: MIME_DOCX.to_string(),
                    source: source.to_string(),
                    block_type: Some("image".to_string()),
                    image_name: Some(name),
                    image_data: Some(bytes),
                    ..DocItem::default()
                });
            }
        }
    }
    Ok(items)
}

fn heading_level_from_style(style: &str) -> Option<u8> {
    let lowered = style.to_lowercase().replace(' ', "");
    let digits: String = lowered
        .strip_prefix("heading")
        .or_else(|| lowered.strip_prefix("titre"))
        .or_else(|| lowered.strip_prefix("ttulo"))
        .map(|rest| rest.chars().take_while(|c| c.is_ascii_digit()).collect())?;
    digits.parse::<u8>().ok().filter(|level| (1..=9).contains(level))
}

/// Media entries of a DOCX archive, in `word/media` order.
fn docx_media_files(data: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let cursor = std::io::Cursor::new(data);
    let mut archive = zip::ZipArchive::new(cursor)
        .map_err(|e| Error::bad_request(format!("DOCX is not a zip archive: {}", e)))?;

    let mut names: Vec<String> = archive
        .file_names()
        .filter(|name| name.starts_with("word/media/"))
        .map(str::to_string)
        .collect();
    names.sort();

    let mut media = Vec::new();
    for name in names {
        let mut file = archive
            .by_name(&name)
            .map_err(|e| Error::internal(format!("zip entry {}: {}", name, e)))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let short = name.rsplit('/').next().unwrap_or(&name).to_string();
        media.push((short, bytes));
    }
    Ok(media)
}

/// PPTX: one item per slide; speaker notes are appended to the slide text.
fn load_pptx(data: &[u8], source: &str) -> Result<Vec<DocItem>> {
    let cursor = std::io::Cursor::new(data);
    let mut archive = zip::ZipArchive::new(cursor)
        .map_err(|e| Error::bad_request(format!("cannot parse PPTX {}: {}", source, e)))?;

    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|name| name.starts_with("ppt/slides/slide") && name.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    slide_names.sort_by_key(|name| slide_ordinal(name, "ppt/slides/slide"));

    let mut items = Vec::new();
    for name in slide_names {
        let slide_number = slide_ordinal(&name, "ppt/slides/slide");
        let mut xml = String::new();
        if archive
            .by_name(&name)
            .ok()
            .and_then(|mut f| f.read_to_string(&mut xml).ok())
            .is_none()
        {
            continue;
        }
        let mut text = extract_drawingml_text(&xml);

        let notes_name = format!("ppt/notesSlides/notesSlide{}.xml", slide_number);
        let mut notes_xml = String::new();
        if archive
            .by_name(&notes_name)
            .ok()
            .and_then(|mut f| f.read_to_string(&mut notes_xml).ok())
            .is_some()
        {
            let notes = extract_drawingml_text(&notes_xml);
            if !notes.trim().is_empty() {
                text.push_str("\nNotes: ");
                text.push_str(notes.trim());
            }
        }

        if text.trim().is_empty() {
            continue;
        }
        items.push(DocItem {
            text,
            content_type: MIME_PPTX.to_string(),
            source: source.to_string(),
            block_type: Some("slide".to_string()),
            slide_number: Some(slide_number),
            ..DocItem::default()
        });
    }
    Ok(items)
}

fn slide_ordinal(name: &str, prefix: &str) -> u32 {
    name.trim_start_matches(prefix)
        .trim_end_matches(".xml")
        .parse()
        .unwrap_or(0)
}

/// Text runs (`<a:t>`) of a DrawingML part, paragraph breaks preserved.
fn extract_drawingml_text(xml: &str) -> String {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parts: Vec<String> = Vec::new();
    let mut in_text = false;
    let mut current = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => {
                in_text = true;
                current.clear();
            }
            Ok(Event::Text(e)) => {
                if in_text {
                    if let Ok(text) = e.unescape() {
                        current.push_str(&text);
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" && in_text {
                    if !current.trim().is_empty() {
                        parts.push(current.trim().to_string());
                    }
                    in_text = false;
                } else if name.as_ref() == b"p" && !parts.is_empty() {
                    parts.push("\n".to_string());
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }

    parts
        .join(" ")
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// XLSX: one summary item per sheet, rows joined with ` | ` so the
/// cleaner keeps the table structure.
fn load_xlsx(data: &[u8], source: &str) -> Result<Vec<DocItem>> {
    let cursor = std::io::Cursor::new(data.to_vec());
    let mut workbook = calamine::open_workbook_auto_from_rs(cursor)
        .map_err(|e| Error::bad_request(format!("cannot parse XLSX {}: {}", source, e)))?;

    use calamine::Reader;
    let mut items = Vec::new();
    for sheet_name in workbook.sheet_names().to_vec() {
        let range = match workbook.worksheet_range(&sheet_name) {
            Ok(range) => range,
            Err(e) => {
                tracing::warn!("xlsx {} sheet {}: {}", source, sheet_name, e);
                continue;
            }
        };
        let mut text = format!("Sheet: {}\n", sheet_name);
        let mut rows = 0usize;
        for row in range.rows() {
            let cells: Vec<String> = row
                .iter()
                .map(|cell| match cell {
                    calamine::Data::Empty => String::new(),
                    calamine::Data::String(s) => s.clone(),
                    calamine::Data::Float(f) => f.to_string(),
                    calamine::Data::Int(i) => i.to_string(),
                    calamine::Data::Bool(b) => b.to_string(),
                    calamine::Data::DateTime(dt) => dt.to_string(),
                    _ => String::new(),
                })
                .collect();
            if cells.iter().all(String::is_empty) {
                continue;
            }
            text.push_str(&cells.join(" | "));
            text.push('\n');
            rows += 1;
        }
        if rows == 0 {
            continue;
        }
        items.push(DocItem {
            text,
            content_type: MIME_XLSX.to_string(),
            source: source.to_string(),
            block_type: Some("table".to_string()),
            sheet_name: Some(sheet_name),
            ..DocItem::default()
        });
    }
    Ok(items)
}

/// HTML: items split at h1-h3 boundaries, each carrying the heading trail
/// as `section_path`.
fn load_html(data: &[u8], source: &str) -> Result<Vec<DocItem>> {
    let html = String::from_utf8_lossy(data);
    let document = scraper::Html::parse_document(&html);
    let body_selector =
        scraper::Selector::parse("body").map_err(|e| Error::internal(format!("selector: {}", e)))?;
    let block_selector = scraper::Selector::parse("h1, h2, h3, p, li, pre, td")
        .map_err(|e| Error::internal(format!("selector: {}", e)))?;

    let body = match document.select(&body_selector).next() {
        Some(body) => body,
        None => return Ok(Vec::new()),
    };

    let mut items: Vec<DocItem> = Vec::new();
    let mut trail: Vec<String> = Vec::new();
    let mut section_text = String::new();

    let flush =
        |items: &mut Vec<DocItem>, trail: &[String], section_text: &mut String| {
            if section_text.trim().is_empty() {
                section_text.clear();
                return;
            }
            items.push(DocItem {
                text: section_text.trim().to_string(),
                content_type: MIME_HTML.to_string(),
                source: source.to_string(),
                block_type: Some("section".to_string()),
                section_path: if trail.is_empty() {
                    None
                } else {
                    Some(trail.join(" > "))
                },
                ..DocItem::default()
            });
            section_text.clear();
        };

    for element in body.select(&block_selector) {
        let tag = element.value().name();
        let text = element.text().collect::<Vec<_>>().join(" ");
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        match tag {
            "h1" | "h2" | "h3" => {
                flush(&mut items, &trail, &mut section_text);
                let level = tag.as_bytes()[1] - b'0';
                trail.truncate(level.saturating_sub(1) as usize);
                trail.push(text.to_string());
            }
            _ => {
                section_text.push_str(text);
                section_text.push('\n');
            }
        }
    }
    flush(&mut items, &trail, &mut section_text);
    Ok(items)
}

/// TXT / Markdown: whole document as a single item.
fn load_txt(data: &[u8], source: &str) -> Result<Vec<DocItem>> {
    let text = String::from_utf8_lossy(data).into_owned();
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![DocItem {
        text,
        content_type: MIME_TXT.to_string(),
        source: source.to_string(),
        block_type: Some("paragraph".to_string()),
        ..DocItem::default()
    }])
}
