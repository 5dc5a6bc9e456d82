//! Typed configuration for the QA backend
//!
//! All knobs live in one `AppConfig` loaded (and validated) once at startup;
//! downstream code consumes strongly-typed fields instead of digging through
//! dynamic maps.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Distance metric of a vector index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distance {
    DotProduct,
    Cosine,
}

impl Distance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DotProduct => "dot_product",
            Self::Cosine => "cosine",
        }
    }

    /// Native ordering of raw scores: dot product is a similarity
    /// (descending), cosine here is a distance (ascending).
    pub fn higher_is_better(&self) -> bool {
        matches!(self, Self::DotProduct)
    }
}

/// How decision thresholds interpret scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreMode {
    Normalized,
    Raw,
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub retrieval: RetrievalConfig,
    pub prompts: PromptsConfig,
    pub embeddings: EmbeddingsConfig,
    pub llm: LlmConfig,
    pub sanitizer: SanitizerConfig,
    pub ingest: IngestConfig,
    pub assets: AssetsConfig,
    pub evaluation: EvaluationConfig,
    pub store: StoreConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            retrieval: RetrievalConfig::default(),
            prompts: PromptsConfig::default(),
            embeddings: EmbeddingsConfig::default(),
            llm: LlmConfig::default(),
            sanitizer: SanitizerConfig::default(),
            ingest: IngestConfig::default(),
            assets: AssetsConfig::default(),
            evaluation: EvaluationConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "cannot read config {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: Self =
            toml::from_str(&raw).map_err(|e| Error::Config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate invariants that cannot be expressed in the type system.
    /// Called once at startup; failures are fatal.
    pub fn validate(&self) -> Result<()> {
        let r = &self.retrieval;
        if r.threshold_high < r.threshold_low {
            return Err(Error::Config(format!(
                "retrieval.threshold_high ({}) < retrieval.threshold_low ({})",
                r.threshold_high, r.threshold_low
            )));
        }
        if r.score_mode == ScoreMode::Raw {
            match r.distance {
                Distance::DotProduct => {
                    if r.raw_dot_low.is_none() || r.raw_dot_high.is_none() {
                        return Err(Error::Config(
                            "retrieval.raw_dot_low/high are required for score_mode=raw with distance=dot_product"
                                .into(),
                        ));
                    }
                }
                Distance::Cosine => {
                    if r.raw_cosine_low.is_none() || r.raw_cosine_high.is_none() {
                        return Err(Error::Config(
                            "retrieval.raw_cosine_low/high are required for score_mode=raw with distance=cosine"
                                .into(),
                        ));
                    }
                }
            }
        }
        if r.top_k == 0 {
            return Err(Error::Config("retrieval.top_k must be positive".into()));
        }

        let e = &self.embeddings;
        if e.profiles.is_empty() {
            return Err(Error::Config("embeddings.profiles must not be empty".into()));
        }
        if !e.profiles.contains_key(&e.active_profile) {
            return Err(Error::UnknownProfile(e.active_profile.clone()));
        }
        for (name, profile) in &e.profiles {
            profile
                .validate()
                .map_err(|err| Error::Config(format!("profile '{}': {}", name, err)))?;
        }
        for (key, domain) in &e.domains {
            if domain.index_name.is_empty() || domain.alias_name.is_empty() {
                return Err(Error::Config(format!(
                    "embeddings.domains.{} requires index_name and alias_name",
                    key
                )));
            }
        }
        if e.alias.name.is_empty() {
            return Err(Error::Config("embeddings.alias.name is required".into()));
        }
        if e.batching.batch_size == 0 {
            return Err(Error::Config("embeddings.batching.batch_size must be positive".into()));
        }
        Ok(())
    }

    /// Resolve a profile by name, defaulting to the active profile.
    pub fn resolve_profile(&self, name: Option<&str>) -> Result<(String, &Profile)> {
        let key = name.unwrap_or(&self.embeddings.active_profile);
        match self.embeddings.profiles.get(key) {
            Some(profile) => Ok((key.to_string(), profile)),
            None => Err(Error::UnknownProfile(key.to_string())),
        }
    }

    /// Alias targeted by retrieval for an optional domain key.
    pub fn retrieval_alias(&self, domain_key: Option<&str>) -> Result<String> {
        match domain_key {
            None => Ok(self.embeddings.alias.name.clone()),
            Some(key) => self
                .embeddings
                .domains
                .get(key)
                .map(|d| d.alias_name.clone())
                .ok_or_else(|| Error::UnknownDomain(key.to_string())),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
    /// Wall-clock deadline for a single /chat request
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
            request_timeout_secs: 60,
        }
    }
}

/// Retrieval and mode-decision settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub distance: Distance,
    pub score_mode: ScoreMode,
    /// Normalized-similarity thresholds
    pub threshold_low: f32,
    pub threshold_high: f32,
    /// Raw-score thresholds, required when score_mode=raw
    pub raw_dot_low: Option<f32>,
    pub raw_dot_high: Option<f32>,
    pub raw_cosine_low: Option<f32>,
    pub raw_cosine_high: Option<f32>,
    pub short_query: ShortQueryConfig,
    pub hybrid: HybridConfig,
    /// Metadata key used for context deduplication
    pub dedupe_by: String,
    /// Maximum chunks kept per document during diversification
    pub cap_per_doc: usize,
    /// MMR trade-off between relevance and diversity; None disables MMR
    pub mmr_lambda: Option<f32>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 8,
            distance: Distance::DotProduct,
            score_mode: ScoreMode::Normalized,
            threshold_low: 0.2,
            threshold_high: 0.45,
            raw_dot_low: None,
            raw_dot_high: None,
            raw_cosine_low: None,
            raw_cosine_high: None,
            short_query: ShortQueryConfig::default(),
            hybrid: HybridConfig::default(),
            dedupe_by: "doc_id".to_string(),
            cap_per_doc: 2,
            mmr_lambda: Some(0.3),
        }
    }
}

/// Tighter thresholds for questions with few alphabetic tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShortQueryConfig {
    pub max_tokens: usize,
    pub threshold_low: Option<f32>,
    pub threshold_high: Option<f32>,
}

impl Default for ShortQueryConfig {
    fn default() -> Self {
        Self {
            max_tokens: 2,
            threshold_low: None,
            threshold_high: None,
        }
    }
}

/// Context assembly limits and evidence gates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridConfig {
    pub max_context_chars: usize,
    pub max_chunks: usize,
    /// Chunks shorter than this (chars) never enter the context
    pub min_tokens_per_chunk: usize,
    pub min_similarity_for_hybrid: f32,
    pub min_chunks_for_hybrid: usize,
    pub min_total_context_chars: usize,
    /// Chunk types retrieved but never sent to the LLM
    pub exclude_chunk_types_from_llm: Vec<String>,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            max_context_chars: 8000,
            max_chunks: 6,
            min_tokens_per_chunk: 200,
            min_similarity_for_hybrid: 0.0,
            min_chunks_for_hybrid: 0,
            min_total_context_chars: 0,
            exclude_chunk_types_from_llm: vec!["figure".to_string()],
        }
    }
}

/// System prompts per answer mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    pub rag: String,
    pub hybrid: String,
    pub fallback: String,
    /// Exact token a grounded model emits when the context is insufficient
    pub no_context_token: String,
    pub max_output_tokens: u32,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            rag: "Answer using only the provided context. If the information is \
                  not in the context, say that no evidence was found."
                .to_string(),
            hybrid: "Answer using the provided context where possible. If the \
                     context is insufficient to answer safely, reply with the \
                     single token: __NO_CONTEXT__"
                .to_string(),
            fallback: "You are a helpful technical assistant. Answer concisely."
                .to_string(),
            no_context_token: "__NO_CONTEXT__".to_string(),
            max_output_tokens: 600,
        }
    }
}

/// Embedding service, profiles, index targets and batching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    /// Embedding HTTP endpoint base URL
    pub endpoint: String,
    pub model: String,
    pub dimension: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub active_profile: String,
    pub alias: AliasConfig,
    pub domains: BTreeMap<String, DomainConfig>,
    pub profiles: BTreeMap<String, Profile>,
    pub batching: BatchingConfig,
    pub dedupe: DedupeConfig,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert("legacy_profile".to_string(), Profile::default());
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimension: 768,
            timeout_secs: 60,
            max_retries: 2,
            active_profile: "legacy_profile".to_string(),
            alias: AliasConfig::default(),
            domains: BTreeMap::new(),
            profiles,
            batching: BatchingConfig::default(),
            dedupe: DedupeConfig::default(),
        }
    }
}

/// Stable alias read by retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AliasConfig {
    pub name: String,
    /// Informational: last physical index the alias was rotated to
    pub active_index: Option<String>,
}

impl Default for AliasConfig {
    fn default() -> Self {
        Self {
            name: "DOCS".to_string(),
            active_index: None,
        }
    }
}

/// Per-domain routing override for ingest and retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    pub index_name: String,
    pub alias_name: String,
}

/// Named ingestion profile
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub chunker: ChunkerConfig,
    pub distance_metric: Distance,
    /// Base name for physical tables; versions are `<alias>_vN`
    pub index_name: String,
    /// Alias override; defaults to embeddings.alias.name
    pub alias_name: Option<String>,
    /// Metadata keys copied from the manifest into chunk metadata
    pub metadata_keep: Vec<String>,
    /// Overrides embeddings.dedupe.by_hash when set
    pub dedupe: Option<bool>,
    pub max_input_tokens: usize,
    pub ocr: bool,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            distance_metric: Distance::DotProduct,
            index_name: "DOCS".to_string(),
            alias_name: None,
            metadata_keep: vec![
                "source".to_string(),
                "content_type".to_string(),
                "checksum_sha256".to_string(),
            ],
            dedupe: None,
            max_input_tokens: 512,
            ocr: false,
        }
    }
}

impl Profile {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.index_name.is_empty() {
            return Err("index_name is required".into());
        }
        self.chunker.validate()
    }

    /// Effective token ceiling for a chunk of this profile
    pub fn effective_max_tokens(&self) -> usize {
        let base = self
            .max_input_tokens
            .saturating_sub(self.chunker.token_safety_margin)
            .max(1);
        match self.chunker.max_tokens {
            Some(limit) if limit > 0 => limit.min(base),
            _ => base,
        }
    }
}

/// Chunking strategy of a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkerKind {
    Char,
    Token,
    StructuredDocx,
    StructuredPdf,
    TocSectionDocx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    pub kind: ChunkerKind,
    /// Window size: characters for char, tokens for token
    pub size: usize,
    /// Overlap: absolute characters when >= 1.0, else a fraction of `size`
    pub overlap: f64,
    pub separator: Option<String>,
    pub max_tokens: Option<usize>,
    pub token_safety_margin: usize,
    pub admin_sections: Option<AdminSectionsConfig>,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            kind: ChunkerKind::Char,
            size: 2000,
            overlap: 100.0,
            separator: None,
            max_tokens: None,
            token_safety_margin: 64,
            admin_sections: None,
        }
    }
}

impl ChunkerConfig {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.size == 0 {
            return Err("chunker.size must be positive".into());
        }
        if self.overlap < 0.0 {
            return Err("chunker.overlap must be non-negative".into());
        }
        if let Some(admin) = &self.admin_sections {
            for pattern in admin
                .heading_regex
                .iter()
                .chain(admin.stop_excluding_after_heading_regex.iter())
            {
                regex::Regex::new(pattern)
                    .map_err(|e| format!("invalid admin_sections regex '{}': {}", pattern, e))?;
            }
        }
        Ok(())
    }

    /// Character overlap resolved against the window size
    pub fn overlap_chars(&self) -> usize {
        if self.overlap >= 1.0 {
            self.overlap as usize
        } else {
            (self.size as f64 * self.overlap) as usize
        }
    }

    /// Fractional overlap for token windows, clamped to [0, 0.5]
    pub fn overlap_fraction(&self) -> f64 {
        let fraction = if self.overlap >= 1.0 {
            self.overlap / self.size.max(1) as f64
        } else {
            self.overlap
        };
        fraction.clamp(0.0, 0.5)
    }
}

/// Heading filter that drops administrative front matter
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AdminSectionsConfig {
    pub heading_regex: Vec<String>,
    /// Once a heading matches, later sections are included again permanently
    pub stop_excluding_after_heading_regex: Option<String>,
}

/// Embedding request batching and throttling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    pub batch_size: usize,
    pub workers: usize,
    pub rate_limit_per_min: Option<u32>,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            workers: 1,
            rate_limit_per_min: None,
        }
    }
}

/// Chunk dedupe behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupeConfig {
    pub by_hash: bool,
    /// Lowercase + trim before hashing (the only supported normalization)
    pub hash_normalization: bool,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            by_hash: true,
            hash_normalization: true,
        }
    }
}

/// Chat model endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub primary: ChatEndpoint,
    pub fallback: ChatEndpoint,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            primary: ChatEndpoint::default(),
            fallback: ChatEndpoint {
                model: "phi3".to_string(),
                ..ChatEndpoint::default()
            },
        }
    }
}

/// One chat-completion endpoint with bounded generation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatEndpoint {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for ChatEndpoint {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            temperature: 0.3,
            timeout_secs: 120,
            max_retries: 2,
        }
    }
}

/// Sanitiser runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizerConfig {
    /// off | shadow | on
    pub mode: SanitizeMode,
    pub profile: String,
    pub config_dir: PathBuf,
    /// redact | pseudonym
    pub placeholder_mode: PlaceholderMode,
    pub hash_salt: String,
    pub audit_enabled: bool,
    pub audit_path: PathBuf,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            mode: SanitizeMode::Off,
            profile: "default".to_string(),
            config_dir: PathBuf::from("./config/sanitize"),
            placeholder_mode: PlaceholderMode::Redact,
            hash_salt: "changeme".to_string(),
            audit_enabled: true,
            audit_path: PathBuf::from("sanitizer.log"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanitizeMode {
    Off,
    Shadow,
    On,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderMode {
    Redact,
    Pseudonym,
}

/// Upload staging limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub staging_dir: PathBuf,
    pub max_upload_mb: u64,
    pub allow_mime: Vec<String>,
}

impl IngestConfig {
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb.max(1) * 1024 * 1024
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from("./data/staging"),
            max_upload_mb: 100,
            allow_mime: vec![
                "application/pdf".to_string(),
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
                    .to_string(),
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
                    .to_string(),
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet".to_string(),
                "text/plain".to_string(),
                "text/html".to_string(),
            ],
        }
    }
}

/// Figure asset extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub root: PathBuf,
    pub docx_image_extraction: bool,
    pub inline_placeholders: bool,
    pub figure_chunks: bool,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/assets"),
            docx_image_extraction: false,
            inline_placeholders: false,
            figure_chunks: false,
        }
    }
}

/// Golden-query evaluation settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EvaluationConfig {
    pub golden_path: Option<PathBuf>,
    pub gates: EvalGates,
}

/// Promotion gates applied after evaluation
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EvalGates {
    pub min_hit_rate: Option<f64>,
    pub min_mrr: Option<f64>,
    pub min_phrase_hit_rate: Option<f64>,
}

/// Vector store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/vectors.db"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn raw_mode_requires_metric_thresholds() {
        let mut config = AppConfig::default();
        config.retrieval.score_mode = ScoreMode::Raw;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.retrieval.raw_dot_low = Some(0.3);
        config.retrieval.raw_dot_high = Some(0.6);
        config.validate().unwrap();
    }

    #[test]
    fn unknown_active_profile_is_fatal() {
        let mut config = AppConfig::default();
        config.embeddings.active_profile = "missing".to_string();
        assert!(matches!(
            config.validate(),
            Err(Error::UnknownProfile(name)) if name == "missing"
        ));
    }

    #[test]
    fn domain_alias_resolution() {
        let mut config = AppConfig::default();
        config.embeddings.domains.insert(
            "legal".to_string(),
            DomainConfig {
                index_name: "LEGAL".to_string(),
                alias_name: "LEGAL_DOCS".to_string(),
            },
        );
        assert_eq!(config.retrieval_alias(None).unwrap(), "DOCS");
        assert_eq!(config.retrieval_alias(Some("legal")).unwrap(), "LEGAL_DOCS");
        assert!(matches!(
            config.retrieval_alias(Some("nope")),
            Err(Error::UnknownDomain(_))
        ));
    }

    #[test]
    fn overlap_resolves_absolute_and_fractional() {
        let mut chunker = ChunkerConfig {
            size: 2000,
            overlap: 100.0,
            ..ChunkerConfig::default()
        };
        assert_eq!(chunker.overlap_chars(), 100);

        chunker.overlap = 0.15;
        assert_eq!(chunker.overlap_chars(), 300);
        assert!((chunker.overlap_fraction() - 0.15).abs() < 1e-9);

        chunker.overlap = 0.9;
        assert!((chunker.overlap_fraction() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn effective_max_tokens_honours_safety_margin() {
        let mut profile = Profile::default();
        profile.max_input_tokens = 512;
        profile.chunker.token_safety_margin = 64;
        assert_eq!(profile.effective_max_tokens(), 448);

        profile.chunker.max_tokens = Some(300);
        assert_eq!(profile.effective_max_tokens(), 300);

        profile.chunker.max_tokens = Some(4096);
        assert_eq!(profile.effective_max_tokens(), 448);
    }

    #[test]
    fn toml_round_trip_with_partial_file() {
        let raw = r#"
            [retrieval]
            top_k = 12
            threshold_low = 0.2
            threshold_high = 0.45

            [retrieval.short_query]
            max_tokens = 2
            threshold_high = 0.95

            [embeddings]
            active_profile = "legacy_profile"

            [embeddings.alias]
            name = "MY_DEMO"

            [embeddings.profiles.legacy_profile]
            index_name = "MY_DEMO"
        "#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.retrieval.top_k, 12);
        assert_eq!(config.embeddings.alias.name, "MY_DEMO");
        assert_eq!(config.retrieval.short_query.threshold_high, Some(0.95));
    }
}
