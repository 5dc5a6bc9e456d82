//! Pattern-driven PII sanitiser used by both pipelines
//!
//! `off` passes text through, `shadow` detects and counts without
//! touching the text, `on` replaces matched spans with placeholders.
//! Counters are identical between shadow and on for the same input.

pub mod pack;

use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{PlaceholderMode, SanitizeMode, SanitizerConfig};
use crate::error::Result;
use pack::{CompiledPack, GroupSelector, PackPattern, PackRule, Validator};

/// Per-label redaction counts for one document
pub type Counters = BTreeMap<String, usize>;

/// Stateless text transformer; cheap to clone and share.
#[derive(Clone)]
pub struct Sanitizer {
    inner: Arc<SanitizerInner>,
}

struct SanitizerInner {
    config: SanitizerConfig,
    /// Compiled packs keyed by (config_dir, profile); first load compiles
    /// once under the write lock, later readers hit the map.
    cache: RwLock<HashMap<(PathBuf, String), Arc<CompiledPack>>>,
    audit: Mutex<()>,
}

impl Sanitizer {
    pub fn new(config: SanitizerConfig) -> Self {
        Self {
            inner: Arc::new(SanitizerInner {
                config,
                cache: RwLock::new(HashMap::new()),
                audit: Mutex::new(()),
            }),
        }
    }

    pub fn mode(&self) -> SanitizeMode {
        self.inner.config.mode
    }

    /// Sanitize one document. Returns the processed (or original) text and
    /// per-label counters.
    pub fn sanitize(&self, text: &str, doc_id: &str) -> Result<(String, Counters)> {
        let config = &self.inner.config;
        if config.mode == SanitizeMode::Off {
            return Ok((text.to_string(), Counters::new()));
        }

        let pack = self.load_pack()?;
        let mut counters = Counters::new();
        let mut processed = text.to_string();
        for rule in &pack.rules {
            match self.apply_rule(&processed, rule, &pack, &mut counters) {
                Some(next) => processed = next,
                None => {
                    tracing::warn!(
                        "sanitizer label '{}' failed for doc {}; label skipped",
                        rule.label,
                        doc_id
                    );
                }
            }
        }

        if config.audit_enabled && !counters.is_empty() {
            self.append_audit(doc_id, &counters);
        }

        match config.mode {
            SanitizeMode::Shadow => Ok((text.to_string(), counters)),
            _ => Ok((processed, counters)),
        }
    }

    /// Apply every pattern of a label, replacing right-to-left so match
    /// offsets stay valid. Returns None when the label must be skipped for
    /// this document; an aborted rule contributes no counts, so counters
    /// only ever report replacements that actually happened.
    fn apply_rule(
        &self,
        text: &str,
        rule: &PackRule,
        pack: &CompiledPack,
        counters: &mut Counters,
    ) -> Option<String> {
        let mut current = text.to_string();
        let mut rule_counts = 0usize;
        for pattern in &rule.patterns {
            let mut replacements: Vec<(usize, usize, String)> = Vec::new();
            for captures in pattern.regex.captures_iter(&current) {
                let full = captures.get(0)?;
                let full_text = full.as_str();
                if pack.allow_tokens.contains(full_text.trim()) {
                    continue;
                }

                let target = match &pattern.group_value {
                    None => full,
                    Some(GroupSelector::Index(idx)) => match captures.get(*idx) {
                        Some(group) => group,
                        None => return None,
                    },
                    Some(GroupSelector::Name(name)) => match captures.name(name) {
                        Some(group) => group,
                        None => return None,
                    },
                };

                if !self.validates(pattern, target.as_str()) {
                    continue;
                }

                let placeholder = self.placeholder(&rule.label, target.as_str(), pack);
                replacements.push((target.start(), target.end(), placeholder));
                rule_counts += 1;
            }

            for (start, end, placeholder) in replacements.into_iter().rev() {
                current.replace_range(start..end, &placeholder);
            }
        }
        if rule_counts > 0 {
            *counters.entry(rule.label.clone()).or_insert(0) += rule_counts;
        }
        Some(current)
    }

    fn validates(&self, pattern: &PackPattern, value: &str) -> bool {
        match pattern.validator {
            None => true,
            Some(Validator::Luhn) => pack::luhn_ok(value),
        }
    }

    fn placeholder(&self, label: &str, value: &str, pack: &CompiledPack) -> String {
        let label_upper = label.to_uppercase();
        match self.inner.config.placeholder_mode {
            PlaceholderMode::Redact => pack.placeholder_format.replace("{TYPE}", &label_upper),
            PlaceholderMode::Pseudonym => pack
                .placeholder_format_pseudonym
                .replace("{TYPE}", &label_upper)
                .replace("{HASH}", &self.hash_token(value)),
        }
    }

    fn hash_token(&self, value: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.inner.config.hash_salt.as_bytes());
        hasher.update(value.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..10].to_string()
    }

    fn load_pack(&self) -> Result<Arc<CompiledPack>> {
        let key = (
            self.inner.config.config_dir.clone(),
            self.inner.config.profile.clone(),
        );
        if let Some(pack) = self.inner.cache.read().get(&key) {
            return Ok(pack.clone());
        }
        let mut cache = self.inner.cache.write();
        if let Some(pack) = cache.get(&key) {
            return Ok(pack.clone());
        }
        let pack = Arc::new(pack::load_pack(&key.0, &key.1)?);
        cache.insert(key, pack.clone());
        Ok(pack)
    }

    /// One JSON line per sanitised document with non-zero counters.
    fn append_audit(&self, doc_id: &str, counters: &Counters) {
        let config = &self.inner.config;
        let line = serde_json::json!({
            "doc_id": doc_id,
            "profile": config.profile,
            "mode": config.mode,
            "redactions": counters,
        });
        let _guard = self.inner.audit.lock();
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.audit_path)
            .and_then(|mut file| writeln!(file, "{}", line));
        if let Err(e) = result {
            tracing::warn!("sanitizer audit write failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pack_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("default.patterns.json"),
            r#"{
                "pii": {
                    "EMAIL": {"pattern": "[\\w.+-]+@[\\w.-]+\\.[a-z]{2,}"},
                    "IMEI": {"pattern": "\\b\\d{15}\\b", "validator": "luhn"},
                    "PHONE": {"pattern": "tel: (\\d{7})", "group_value": 1}
                },
                "allowlist": {"tokens": ["noc@example.com"]},
                "placeholder": {"format": "[{TYPE}]", "format_pseudonym": "[{TYPE}:{HASH}]"}
            }"#,
        )
        .unwrap();
        dir
    }

    fn sanitizer(dir: &TempDir, mode: SanitizeMode, placeholder: PlaceholderMode) -> Sanitizer {
        Sanitizer::new(SanitizerConfig {
            mode,
            profile: "default".to_string(),
            config_dir: dir.path().to_path_buf(),
            placeholder_mode: placeholder,
            hash_salt: "pepper".to_string(),
            audit_enabled: false,
            audit_path: dir.path().join("audit.log"),
        })
    }

    #[test]
    fn off_mode_is_passthrough() {
        let dir = pack_dir();
        let s = sanitizer(&dir, SanitizeMode::Off, PlaceholderMode::Redact);
        let (out, counters) = s.sanitize("mail me at a@b.co", "d1").unwrap();
        assert_eq!(out, "mail me at a@b.co");
        assert!(counters.is_empty());
    }

    #[test]
    fn on_mode_redacts_and_counts() {
        let dir = pack_dir();
        let s = sanitizer(&dir, SanitizeMode::On, PlaceholderMode::Redact);
        let (out, counters) = s
            .sanitize("write a@b.co or c@d.org today", "d1")
            .unwrap();
        assert_eq!(out, "write [EMAIL] or [EMAIL] today");
        assert_eq!(counters.get("EMAIL"), Some(&2));
    }

    #[test]
    fn shadow_returns_original_with_same_counters_as_on() {
        let dir = pack_dir();
        let input = "ping a@b.co and tel: 1234567";
        let shadow = sanitizer(&dir, SanitizeMode::Shadow, PlaceholderMode::Redact);
        let on = sanitizer(&dir, SanitizeMode::On, PlaceholderMode::Redact);
        let (shadow_text, shadow_counts) = shadow.sanitize(input, "d1").unwrap();
        let (on_text, on_counts) = on.sanitize(input, "d1").unwrap();
        assert_eq!(shadow_text, input);
        assert_ne!(on_text, input);
        assert_eq!(shadow_counts, on_counts);
    }

    #[test]
    fn allowlist_token_is_skipped() {
        let dir = pack_dir();
        let s = sanitizer(&dir, SanitizeMode::On, PlaceholderMode::Redact);
        let (out, counters) = s
            .sanitize("contact noc@example.com or x@y.io", "d1")
            .unwrap();
        assert_eq!(out, "contact noc@example.com or [EMAIL]");
        assert_eq!(counters.get("EMAIL"), Some(&1));
    }

    #[test]
    fn luhn_validator_filters_card_like_numbers() {
        let dir = pack_dir();
        let s = sanitizer(&dir, SanitizeMode::On, PlaceholderMode::Redact);
        // 490154203237518 passes Luhn; 490154203237519 does not.
        let (out, counters) = s
            .sanitize("imei 490154203237518 vs 490154203237519", "d1")
            .unwrap();
        assert_eq!(out, "imei [IMEI] vs 490154203237519");
        assert_eq!(counters.get("IMEI"), Some(&1));
    }

    #[test]
    fn group_value_replaces_only_the_group() {
        let dir = pack_dir();
        let s = sanitizer(&dir, SanitizeMode::On, PlaceholderMode::Redact);
        let (out, _) = s.sanitize("call tel: 5551234 now", "d1").unwrap();
        assert_eq!(out, "call tel: [PHONE] now");
    }

    #[test]
    fn redaction_is_idempotent() {
        let dir = pack_dir();
        let s = sanitizer(&dir, SanitizeMode::On, PlaceholderMode::Redact);
        let (once, _) = s.sanitize("mail a@b.co", "d1").unwrap();
        let (twice, counters) = s.sanitize(&once, "d1").unwrap();
        assert_eq!(once, twice);
        assert!(counters.is_empty());
    }

    #[test]
    fn pseudonym_is_stable_for_same_salt() {
        let dir = pack_dir();
        let s = sanitizer(&dir, SanitizeMode::On, PlaceholderMode::Pseudonym);
        let (first, _) = s.sanitize("a@b.co", "d1").unwrap();
        let (second, _) = s.sanitize("a@b.co", "d2").unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("[EMAIL:"));
    }

    #[test]
    fn aborted_rule_leaves_no_phantom_counts() {
        // Group 1 participates in the first alternative only; a "phone:"
        // match aborts the rule after a "mail:" match already landed.
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("default.patterns.json"),
            r#"{
                "pii": {
                    "CONTACT": {"pattern": "mail: ([\\w.@]+)|phone: \\d+", "group_value": 1}
                },
                "placeholder": {"format": "[{TYPE}]", "format_pseudonym": "[{TYPE}:{HASH}]"}
            }"#,
        )
        .unwrap();
        let s = sanitizer(&dir, SanitizeMode::On, PlaceholderMode::Redact);
        let input = "mail: a@b.co then phone: 5551234";
        let (out, counters) = s.sanitize(input, "d1").unwrap();
        // The label is skipped for this document: text untouched and no
        // counts reported for replacements that never happened.
        assert_eq!(out, input);
        assert!(counters.is_empty());
    }

    #[test]
    fn audit_line_written_when_enabled() {
        let dir = pack_dir();
        let audit_path = dir.path().join("audit.log");
        let s = Sanitizer::new(SanitizerConfig {
            mode: SanitizeMode::On,
            profile: "default".to_string(),
            config_dir: dir.path().to_path_buf(),
            placeholder_mode: PlaceholderMode::Redact,
            hash_salt: "pepper".to_string(),
            audit_enabled: true,
            audit_path: audit_path.clone(),
        });
        s.sanitize("a@b.co", "doc-9").unwrap();
        let raw = std::fs::read_to_string(audit_path).unwrap();
        let line: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(line["doc_id"], "doc-9");
        assert_eq!(line["redactions"]["EMAIL"], 1);
    }
}
