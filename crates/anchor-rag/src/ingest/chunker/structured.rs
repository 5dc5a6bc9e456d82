//! Structured (heading-driven) chunkers for office formats
//!
//! DOCX sections are cut at the deepest available heading level: level 3
//! when present, else level 2 within each level-1 procedure. Every
//! section chunk is prefixed with `Procedure:`, `Section:` and `Path:`
//! lines. Numeric heading prefixes are preserved verbatim, never
//! synthesised.

use regex::Regex;
use std::sync::OnceLock;

use super::{token, FigureOptions, RawChunk};
use crate::config::AdminSectionsConfig;
use crate::ingest::loader::DocItem;

fn numeric_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+(?:\.\d+)*)[\s.):-]").unwrap())
}

fn all_caps_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9 ,.:;()\-/]{3,60}$").unwrap())
}

/// One event of the flattened DOCX stream
#[derive(Debug)]
enum DocxEvent {
    Heading { level: u8, text: String },
    Paragraph(String),
    Image { name: String, data: Vec<u8> },
}

/// A body element of a section, in document order
#[derive(Debug)]
enum BodyPart {
    Text(String),
    Image { name: String, data: Vec<u8> },
}

/// A section cut at the boundary heading level
#[derive(Debug)]
struct Section {
    procedure: String,
    heading: String,
    /// Ancestor headings between procedure and section, exclusive
    ancestors: Vec<String>,
    body: Vec<BodyPart>,
}

/// Compiled admin-section filter state
struct AdminFilter {
    exclude: Vec<Regex>,
    stop: Option<Regex>,
    stopped: bool,
}

impl AdminFilter {
    fn new(config: Option<&AdminSectionsConfig>) -> Option<Self> {
        let config = config?;
        let exclude: Vec<Regex> = config
            .heading_regex
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect();
        let stop = config
            .stop_excluding_after_heading_regex
            .as_ref()
            .and_then(|pattern| Regex::new(pattern).ok());
        if exclude.is_empty() && stop.is_none() {
            return None;
        }
        Some(Self {
            exclude,
            stop,
            stopped: false,
        })
    }

    /// Returns true when the section must be dropped. Seeing the stop
    /// heading re-enables inclusion permanently, starting with that
    /// section.
    fn drops(&mut self, heading: &str) -> bool {
        if let Some(stop) = &self.stop {
            if !self.stopped && stop.is_match(heading) {
                self.stopped = true;
            }
        }
        if self.stopped {
            return false;
        }
        self.exclude.iter().any(|re| re.is_match(heading))
    }
}

fn items_to_events(items: &[&DocItem]) -> Vec<DocxEvent> {
    let mut events = Vec::new();
    for item in items {
        match item.block_type.as_deref() {
            Some("image") => {
                if let (Some(name), Some(data)) = (&item.image_name, &item.image_data) {
                    events.push(DocxEvent::Image {
                        name: name.clone(),
                        data: data.clone(),
                    });
                }
            }
            Some("heading") => {
                if let Some(level) = item.heading_level {
                    events.push(DocxEvent::Heading {
                        level,
                        text: item.text.clone(),
                    });
                } else {
                    events.push(DocxEvent::Paragraph(item.text.clone()));
                }
            }
            _ => {
                if !item.text.trim().is_empty() {
                    events.push(DocxEvent::Paragraph(item.text.clone()));
                }
            }
        }
    }
    events
}

/// Split events into sections. A level-1 heading opens a procedure; the
/// boundary level inside a procedure prefers 3, then 2.
fn build_sections(events: Vec<DocxEvent>) -> Vec<Section> {
    // Procedure extents with their contained events
    let mut procedures: Vec<(String, Vec<DocxEvent>)> = Vec::new();
    let mut current_label = String::new();
    let mut current_events: Vec<DocxEvent> = Vec::new();
    for event in events {
        match event {
            DocxEvent::Heading { level: 1, text } => {
                if !current_events.is_empty() || !current_label.is_empty() {
                    procedures.push((current_label.clone(), std::mem::take(&mut current_events)));
                }
                current_label = text;
            }
            other => current_events.push(other),
        }
    }
    if !current_events.is_empty() || !current_label.is_empty() {
        procedures.push((current_label, current_events));
    }

    let mut sections = Vec::new();
    for (procedure, events) in procedures {
        let has_level3 = events
            .iter()
            .any(|e| matches!(e, DocxEvent::Heading { level: 3, .. }));
        let has_level2 = events
            .iter()
            .any(|e| matches!(e, DocxEvent::Heading { level: 2, .. }));
        let boundary: Option<u8> = if has_level3 {
            Some(3)
        } else if has_level2 {
            Some(2)
        } else {
            None
        };

        let mut ancestors: Vec<String> = Vec::new();
        let mut heading = procedure.clone();
        let mut body: Vec<BodyPart> = Vec::new();

        let mut flush =
            |sections: &mut Vec<Section>, heading: &str, ancestors: &[String], body: &mut Vec<BodyPart>| {
                if body.is_empty() {
                    return;
                }
                sections.push(Section {
                    procedure: procedure.clone(),
                    heading: heading.to_string(),
                    ancestors: ancestors.to_vec(),
                    body: std::mem::take(body),
                });
            };

        for event in events {
            match event {
                DocxEvent::Heading { level, text } => match boundary {
                    Some(boundary_level) if level == boundary_level => {
                        flush(&mut sections, &heading, &ancestors, &mut body);
                        heading = text;
                    }
                    Some(boundary_level) if level < boundary_level => {
                        flush(&mut sections, &heading, &ancestors, &mut body);
                        ancestors = vec![text.clone()];
                        heading = text;
                    }
                    _ => {
                        // Deeper than the boundary: keep as body text so the
                        // heading text is not lost.
                        body.push(BodyPart::Text(text));
                    }
                },
                DocxEvent::Paragraph(text) => body.push(BodyPart::Text(text)),
                DocxEvent::Image { name, data } => body.push(BodyPart::Image { name, data }),
            }
        }
        flush(&mut sections, &heading, &ancestors, &mut body);
    }
    sections
}

/// Resolve the `Path:` line. The TOC variant resolves ancestors from
/// numeric heading prefixes when present.
fn section_path(section: &Section, toc_titles: Option<&Vec<(String, String)>>) -> String {
    if let Some(titles) = toc_titles {
        if let Some(caps) = numeric_prefix_re().captures(&section.heading) {
            let number = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let mut components = Vec::new();
            let parts: Vec<&str> = number.split('.').collect();
            for depth in 1..parts.len() {
                let ancestor_number = parts[..depth].join(".");
                if let Some((_, title)) = titles
                    .iter()
                    .find(|(num, _)| *num == ancestor_number)
                {
                    components.push(title.clone());
                }
            }
            components.push(section.heading.clone());
            return components.join("|");
        }
    }

    let mut components = Vec::new();
    if !section.procedure.is_empty() {
        components.push(section.procedure.clone());
    }
    for ancestor in &section.ancestors {
        if ancestor != &section.procedure && ancestor != &section.heading {
            components.push(ancestor.clone());
        }
    }
    components.push(section.heading.clone());
    components.join("|")
}

/// Heading titles keyed by their numeric prefix, for TOC path resolution.
fn collect_numbered_headings(items: &[&DocItem]) -> Vec<(String, String)> {
    let mut titles = Vec::new();
    for item in items {
        if item.block_type.as_deref() != Some("heading") {
            continue;
        }
        if let Some(caps) = numeric_prefix_re().captures(&item.text) {
            let number = caps.get(1).map(|m| m.as_str()).unwrap_or_default().to_string();
            if !titles.iter().any(|(num, _)| *num == number) {
                titles.push((number, item.text.clone()));
            }
        }
    }
    titles
}

/// Structured DOCX chunker. `toc_paths` switches on TOC-resolved numeric
/// paths (the toc_section variant); sectioning itself is identical.
pub fn chunk_structured_docx(
    items: &[&DocItem],
    admin: Option<&AdminSectionsConfig>,
    max_tokens: usize,
    figures: FigureOptions,
    toc_paths: bool,
) -> Vec<RawChunk> {
    let content_type = items.first().map(|item| item.content_type.clone());
    let toc_titles = if toc_paths {
        Some(collect_numbered_headings(items))
    } else {
        None
    };

    let sections = build_sections(items_to_events(items));
    let mut filter = AdminFilter::new(admin);

    let mut chunks: Vec<RawChunk> = Vec::new();
    let mut local_index = 0usize;
    let mut figure_counter = 0usize;

    for section in sections {
        if let Some(filter) = filter.as_mut() {
            if filter.drops(&section.heading) {
                continue;
            }
        }

        let path = section_path(&section, toc_titles.as_ref());
        let mut prefix = String::new();
        if !section.procedure.is_empty() {
            prefix.push_str(&format!("Procedure: {}\n", section.procedure));
        }
        if !section.heading.is_empty() {
            prefix.push_str(&format!("Section: {}\n", section.heading));
        }
        if !path.is_empty() {
            prefix.push_str(&format!("Path: {}\n", path));
        }

        // Assemble the body; figure markers go inline where the image sat.
        let mut body_lines: Vec<String> = Vec::new();
        let mut pending_figures: Vec<(String, String, Vec<u8>)> = Vec::new();
        for part in &section.body {
            match part {
                BodyPart::Text(text) => body_lines.push(text.clone()),
                BodyPart::Image { name, data } => {
                    figure_counter += 1;
                    let figure_id = format!("fig_{:03}", figure_counter);
                    if figures.inline_placeholders {
                        body_lines.push(format!("[FIGURE:{}]", figure_id));
                    }
                    if figures.figure_chunks {
                        pending_figures.push((figure_id, name.clone(), data.clone()));
                    }
                }
            }
        }
        let body = body_lines.join("\n");
        if body.trim().is_empty() && pending_figures.is_empty() {
            continue;
        }

        let bodies: Vec<String> = if max_tokens > 0 && token::token_count(&body) > max_tokens {
            token::chunk_tokens(&body, max_tokens, 0.0)
        } else {
            vec![body]
        };

        let mut section_first_index = None;
        for body in bodies {
            if body.trim().is_empty() {
                continue;
            }
            local_index += 1;
            if section_first_index.is_none() {
                section_first_index = Some(local_index);
            }
            chunks.push(RawChunk {
                text: format!("{}{}", prefix, body),
                local_index,
                block_type: Some("section".to_string()),
                section_path: Some(path.clone()),
                content_type: content_type.clone(),
                ..RawChunk::default()
            });
        }

        for (figure_id, image_name, image_data) in pending_figures {
            chunks.push(RawChunk {
                text: format!("Figure: {}", image_name),
                is_figure: true,
                figure_id: Some(figure_id),
                image_name: Some(image_name),
                image_data: Some(image_data),
                parent_local_index: section_first_index,
                block_type: Some("image".to_string()),
                section_path: Some(path.clone()),
                content_type: content_type.clone(),
                ..RawChunk::default()
            });
        }
    }
    chunks
}

/// Structured PDF chunker: per-page blocks grouped under detected
/// ALL-CAPS headings, packed up to the token budget.
pub fn chunk_structured_pdf(items: &[&DocItem], max_tokens: usize) -> Vec<RawChunk> {
    let mut chunks = Vec::new();
    let mut local_index = 0usize;

    for item in items {
        let mut heading: Option<String> = None;
        let mut buffer: Vec<String> = Vec::new();
        let mut buffer_tokens = 0usize;

        let mut flush = |chunks: &mut Vec<RawChunk>,
                         local_index: &mut usize,
                         heading: &Option<String>,
                         buffer: &mut Vec<String>,
                         buffer_tokens: &mut usize| {
            if buffer.is_empty() {
                return;
            }
            let mut text = String::new();
            if let Some(heading) = heading {
                text.push_str(&format!("Section: {}\n", heading));
            }
            text.push_str(&buffer.join("\n\n"));
            *local_index += 1;
            chunks.push(RawChunk {
                text,
                local_index: *local_index,
                block_type: Some("section".to_string()),
                section_path: heading.clone(),
                page: item.page,
                content_type: Some(item.content_type.clone()),
                ..RawChunk::default()
            });
            buffer.clear();
            *buffer_tokens = 0;
        };

        for block in item.text.split("\n\n") {
            let block = block.trim();
            if block.is_empty() {
                continue;
            }
            let first_line = block.lines().next().unwrap_or_default().trim();
            let is_heading = block.lines().count() == 1
                && all_caps_heading_re().is_match(first_line)
                && first_line.chars().any(|c| c.is_alphabetic());

            if is_heading {
                flush(&mut chunks, &mut local_index, &heading, &mut buffer, &mut buffer_tokens);
                heading = Some(first_line.to_string());
                continue;
            }

            let block_tokens = token::token_count(block);
            if max_tokens > 0 && buffer_tokens + block_tokens > max_tokens && !buffer.is_empty() {
                flush(&mut chunks, &mut local_index, &heading, &mut buffer, &mut buffer_tokens);
            }
            buffer.push(block.to_string());
            buffer_tokens += block_tokens;
        }
        flush(&mut chunks, &mut local_index, &heading, &mut buffer, &mut buffer_tokens);
    }
    chunks
}
