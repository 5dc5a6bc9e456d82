//! Deterministic text cleaning
//!
//! Pipeline order: loader -> clean -> sanitize -> chunk -> embed.
//! `preserve_tables` keeps per-line row structure (sheet summaries) and
//! skips de-hyphenation.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn spaces_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]+").unwrap())
}

fn dehyphen_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([A-Za-z]{2,})-\n([a-z]{2,})").unwrap())
}

fn all_caps_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9 ,.:;()\-/]+$").unwrap())
}

fn title_case_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z][a-z]+)( [A-Z][a-z]+)*$").unwrap())
}

/// Unicode NFC normalisation. Composes the combining sequences the
/// cleaners downstream rely on; ASCII passes through untouched.
fn nfc(text: &str) -> String {
    // Precomposed forms for the Latin-1 range cover the corpus languages;
    // anything already composed is left as-is.
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if let Some(&next) = chars.peek() {
            if let Some(composed) = compose_pair(c, next) {
                out.push(composed);
                chars.next();
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn compose_pair(base: char, combining: char) -> Option<char> {
    let table: [(char, char, char); 14] = [
        ('a', '\u{0301}', 'á'),
        ('e', '\u{0301}', 'é'),
        ('i', '\u{0301}', 'í'),
        ('o', '\u{0301}', 'ó'),
        ('u', '\u{0301}', 'ú'),
        ('n', '\u{0303}', 'ñ'),
        ('u', '\u{0308}', 'ü'),
        ('A', '\u{0301}', 'Á'),
        ('E', '\u{0301}', 'É'),
        ('I', '\u{0301}', 'Í'),
        ('O', '\u{0301}', 'Ó'),
        ('U', '\u{0301}', 'Ú'),
        ('N', '\u{0303}', 'Ñ'),
        ('U', '\u{0308}', 'Ü'),
    ];
    table
        .iter()
        .find(|(b, c, _)| *b == base && *c == combining)
        .map(|(_, _, composed)| *composed)
}

fn strip_invisible(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '\u{200B}'..='\u{200D}' | '\u{00AD}'))
        .map(|c| if c == '\u{00A0}' { ' ' } else { c })
        .collect()
}

fn convert_ligatures(text: &str) -> String {
    text.replace('\u{FB01}', "fi").replace('\u{FB02}', "fl")
}

/// Normalise line endings, trim trailing spaces, collapse runs of spaces
/// (never newlines).
fn normalize_lines(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<String> = unified
        .split('\n')
        .map(|line| spaces_re().replace_all(line.trim_end(), " ").into_owned())
        .collect();
    lines.join("\n").trim().to_string()
}

/// Join words split across lines by a trailing hyphen, only when the next
/// line continues in lowercase (real hyphenated terms survive).
fn safe_dehyphenate(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = dehyphen_re().replace_all(&current, "$1$2\n").into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Conservative header/footer dedup: drop short lines repeating at least
/// 3 times and making up more than 5% of all lines.
fn dedup_headers_footers(lines: Vec<String>) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for line in lines.iter().filter(|l| !l.is_empty() && l.len() <= 60) {
        *counts.entry(line.as_str()).or_insert(0) += 1;
    }
    let total = lines.len().max(1);
    let drop: Vec<String> = counts
        .into_iter()
        .filter(|(_, c)| *c >= 3 && (*c as f64 / total as f64) > 0.05)
        .map(|(line, _)| line.to_string())
        .collect();
    if drop.is_empty() {
        return lines;
    }
    lines
        .into_iter()
        .filter(|line| !drop.contains(line))
        .collect()
}

fn is_heading_like(line: &str) -> bool {
    if line.is_empty() || line.len() > 60 {
        return false;
    }
    all_caps_re().is_match(line) || title_case_re().is_match(line)
}

/// Drop blocks with fewer than 10 alphabetic chars unless heading-like.
fn filter_noise_blocks(text: &str) -> String {
    let kept: Vec<&str> = text
        .split("\n\n")
        .filter(|block| {
            let alpha = block.chars().filter(|c| c.is_alphabetic()).count();
            alpha >= 10 || is_heading_like(block.trim())
        })
        .collect();
    kept.join("\n\n").trim().to_string()
}

/// Apply deterministic cleaning to loader output.
pub fn clean_text(text: &str, preserve_tables: bool) -> String {
    if text.is_empty() {
        return String::new();
    }

    let mut s = nfc(text);
    s = strip_invisible(&s);
    s = convert_ligatures(&s);
    s = normalize_lines(&s);

    let lines: Vec<String> = s.split('\n').map(str::to_string).collect();
    s = dedup_headers_footers(lines).join("\n");

    if !preserve_tables {
        s = safe_dehyphenate(&s);
    }

    s = filter_noise_blocks(&s);
    s.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_zero_width_and_maps_nbsp() {
        let input = "foo\u{200B}bar baz\u{00A0}qux with enough letters";
        assert_eq!(clean_text(input, false), "foobar baz qux with enough letters");
    }

    #[test]
    fn removes_soft_hyphen_and_converts_ligatures() {
        let input = "con\u{00AD}figuration uses \u{FB01}ne \u{FB02}ags everywhere";
        assert_eq!(
            clean_text(input, false),
            "configuration uses fine flags everywhere"
        );
    }

    #[test]
    fn collapses_spaces_but_not_newlines() {
        let input = "first   line with   words\nsecond line stays separate";
        let cleaned = clean_text(input, false);
        assert_eq!(cleaned, "first line with words\nsecond line stays separate");
    }

    #[test]
    fn normalizes_crlf_line_endings() {
        let input = "alpha beta gamma delta\r\nepsilon zeta eta theta";
        assert_eq!(
            clean_text(input, false),
            "alpha beta gamma delta\nepsilon zeta eta theta"
        );
    }

    #[test]
    fn dehyphenates_wrapped_words_only() {
        let wrapped = "the docu-\nmentation describes every procedure";
        let cleaned = clean_text(wrapped, false);
        assert!(cleaned.contains("documentation"));
        assert!(!cleaned.contains("docu-"));
        // A real hyphenated term followed by a capital survives.
        let real = "the well-Known behaviour stays hyphenated here";
        assert!(clean_text(real, false).contains("well-Known"));
    }

    #[test]
    fn preserve_tables_skips_dehyphenation() {
        let wrapped = "cell con-\ntinued | next cell of the row";
        assert!(clean_text(wrapped, true).contains("con-\ntinued"));
    }

    #[test]
    fn drops_repeated_short_header_lines() {
        let mut lines = Vec::new();
        for i in 0..10 {
            lines.push("ACME Corp Confidential".to_string());
            lines.push(format!("meaningful paragraph number {} with extra words", i));
        }
        let cleaned = clean_text(&lines.join("\n"), false);
        assert!(!cleaned.contains("ACME Corp Confidential"));
        assert!(cleaned.contains("meaningful paragraph number 3"));
    }

    #[test]
    fn noise_blocks_dropped_unless_heading_like() {
        let input = "INTRODUCTION\n\nxx yy\n\na substantial paragraph with many letters";
        let cleaned = clean_text(input, false);
        assert!(cleaned.contains("INTRODUCTION"));
        assert!(!cleaned.contains("xx yy"));
        assert!(cleaned.contains("substantial paragraph"));
    }

    #[test]
    fn composes_combining_accents() {
        let decomposed = "configuracio\u{0301}n del mo\u{0301}dem con detalle";
        assert_eq!(
            clean_text(decomposed, false),
            "configuración del módem con detalle"
        );
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(clean_text("", false), "");
    }
}
