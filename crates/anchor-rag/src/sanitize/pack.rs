//! Sanitiser pack format: labelled PII patterns, allowlist and
//! placeholder formats, loaded from `<config_dir>/<profile>.patterns.json`.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{Error, Result};

/// Group selector inside a pattern: numeric index or capture name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupSelector {
    Index(usize),
    Name(String),
}

/// One compiled pattern of a label
#[derive(Debug)]
pub struct PackPattern {
    pub regex: Regex,
    pub group_value: Option<GroupSelector>,
    pub validator: Option<Validator>,
}

/// Optional match validator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validator {
    Luhn,
}

/// A label with its patterns, in pack order
#[derive(Debug)]
pub struct PackRule {
    pub label: String,
    pub patterns: Vec<PackPattern>,
}

/// Fully compiled pack
#[derive(Debug)]
pub struct CompiledPack {
    pub rules: Vec<PackRule>,
    pub allow_tokens: BTreeSet<String>,
    pub placeholder_format: String,
    pub placeholder_format_pseudonym: String,
}

#[derive(Debug, Deserialize)]
struct RawPack {
    #[serde(default)]
    pii: serde_json::Map<String, Value>,
    #[serde(default)]
    allowlist: RawAllowlist,
    #[serde(default)]
    placeholder: RawPlaceholder,
}

#[derive(Debug, Default, Deserialize)]
struct RawAllowlist {
    #[serde(default)]
    tokens: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawPlaceholder {
    #[serde(default = "default_format")]
    format: String,
    #[serde(default = "default_format_pseudonym")]
    format_pseudonym: String,
}

impl Default for RawPlaceholder {
    fn default() -> Self {
        Self {
            format: default_format(),
            format_pseudonym: default_format_pseudonym(),
        }
    }
}

fn default_format() -> String {
    "[{TYPE}]".to_string()
}

fn default_format_pseudonym() -> String {
    "[{TYPE}:{HASH}]".to_string()
}

/// Load and compile a pack. Invalid regexes are fatal here, never at
/// sanitise time.
pub fn load_pack(config_dir: &Path, profile: &str) -> Result<CompiledPack> {
    let path = config_dir.join(format!("{}.patterns.json", profile));
    let raw = std::fs::read_to_string(&path).map_err(|e| {
        Error::Config(format!(
            "sanitize pack not found: {}: {}",
            path.display(),
            e
        ))
    })?;
    let pack: RawPack = serde_json::from_str(&raw)
        .map_err(|e| Error::Config(format!("invalid sanitize pack {}: {}", path.display(), e)))?;

    let mut rules = Vec::new();
    for (label, spec) in &pack.pii {
        let spec_obj = match spec.as_object() {
            Some(obj) => obj,
            None => continue,
        };
        if spec_obj
            .get("enabled")
            .and_then(Value::as_bool)
            .map(|enabled| !enabled)
            .unwrap_or(false)
        {
            continue;
        }

        let mut patterns = Vec::new();
        if let Some(pattern) = spec_obj.get("pattern").and_then(Value::as_str) {
            patterns.push(compile_pattern(
                label,
                pattern,
                spec_obj.get("flags").and_then(Value::as_str),
                spec_obj.get("group_value"),
                spec_obj.get("validator").and_then(Value::as_str),
            )?);
        }
        if let Some(list) = spec_obj.get("patterns").and_then(Value::as_array) {
            for entry in list {
                match entry {
                    Value::String(pattern) => {
                        patterns.push(compile_pattern(label, pattern, None, None, None)?);
                    }
                    Value::Object(obj) => {
                        let pattern = obj
                            .get("pattern")
                            .and_then(Value::as_str)
                            .ok_or_else(|| {
                                Error::Config(format!(
                                    "sanitize label '{}': patterns entry missing 'pattern'",
                                    label
                                ))
                            })?;
                        patterns.push(compile_pattern(
                            label,
                            pattern,
                            obj.get("flags").and_then(Value::as_str),
                            obj.get("group_value"),
                            obj.get("validator").and_then(Value::as_str),
                        )?);
                    }
                    _ => {
                        return Err(Error::Config(format!(
                            "sanitize label '{}': patterns entries must be strings or objects",
                            label
                        )))
                    }
                }
            }
        }
        if !patterns.is_empty() {
            rules.push(PackRule {
                label: label.clone(),
                patterns,
            });
        }
    }

    Ok(CompiledPack {
        rules,
        allow_tokens: pack.allowlist.tokens.into_iter().collect(),
        placeholder_format: pack.placeholder.format,
        placeholder_format_pseudonym: pack.placeholder.format_pseudonym,
    })
}

fn compile_pattern(
    label: &str,
    pattern: &str,
    flags: Option<&str>,
    group_value: Option<&Value>,
    validator: Option<&str>,
) -> Result<PackPattern> {
    let with_flags = match flags {
        Some(flags) if !flags.is_empty() => {
            let allowed: String = flags.chars().filter(|c| "imsx".contains(*c)).collect();
            if allowed.is_empty() {
                pattern.to_string()
            } else {
                format!("(?{}){}", allowed, pattern)
            }
        }
        _ => pattern.to_string(),
    };
    let regex = Regex::new(&with_flags).map_err(|e| {
        Error::Config(format!(
            "sanitize label '{}': invalid regex '{}': {}",
            label, pattern, e
        ))
    })?;

    let group_value = match group_value {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => n.as_u64().map(|n| GroupSelector::Index(n as usize)),
        Some(Value::String(name)) => Some(GroupSelector::Name(name.clone())),
        Some(other) => {
            return Err(Error::Config(format!(
                "sanitize label '{}': group_value must be an int or string, got {}",
                label, other
            )))
        }
    };

    let validator = match validator {
        None => None,
        Some("luhn") => Some(Validator::Luhn),
        Some(other) => {
            return Err(Error::Config(format!(
                "sanitize label '{}': unknown validator '{}'",
                label, other
            )))
        }
    };

    Ok(PackPattern {
        regex,
        group_value,
        validator,
    })
}

/// Luhn checksum over the digits of `value`; non-digits are ignored.
pub fn luhn_ok(value: &str) -> bool {
    let digits: Vec<u32> = value.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.is_empty() {
        return false;
    }
    let parity = digits.len() % 2;
    let checksum: u32 = digits
        .iter()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == parity {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    checksum % 10 == 0
}
