use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    String,
    Number,
    Date,
    Boolean,
}

/// A named extraction rule applied to raw text by the field extractor (C3).
///
/// Invariant: `extraction_pattern` must compile as a regex and `name` must be
/// unique within the enclosing snapshot; both are enforced at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfiguration {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub source_field: String,
    pub extraction_pattern: String,
    #[serde(default)]
    pub stored: bool,
    #[serde(default)]
    pub indexed: bool,
    #[serde(default)]
    pub tokenized: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, thiserror::Error)]
pub enum FieldConfigError {
    #[error("field configuration {name:?}: pattern does not compile: {source}")]
    BadPattern { name: String, source: regex::Error },
}

impl FieldConfiguration {
    /// Compile the extraction pattern, surfacing a `FieldConfigError` if it is invalid.
    /// Called once when a configuration snapshot is published, not per event.
    pub fn compile(&self) -> Result<Regex, FieldConfigError> {
        Regex::new(&self.extraction_pattern).map_err(|source| FieldConfigError::BadPattern {
            name: self.name.clone(),
            source,
        })
    }
}

/// A validated set of field configurations with unique names and pre-compiled
/// patterns, ready to be published as an immutable snapshot.
#[derive(Clone)]
pub struct CompiledFieldConfigurations {
    pub entries: Vec<(FieldConfiguration, Regex)>,
}

impl CompiledFieldConfigurations {
    pub fn compile(configs: Vec<FieldConfiguration>) -> Result<Self, FieldConfigError> {
        let mut seen = std::collections::HashSet::new();
        let mut entries = Vec::with_capacity(configs.len());
        for cfg in configs {
            if !seen.insert(cfg.name.clone()) {
                // Duplicate names collapse to "last one wins" at the config-store layer;
                // here we simply skip repeats so a bad snapshot never loses distinctness.
                continue;
            }
            let re = cfg.compile()?;
            entries.push((cfg, re));
        }
        Ok(Self { entries })
    }

    pub fn enabled(&self) -> impl Iterator<Item = &(FieldConfiguration, Regex)> {
        self.entries.iter().filter(|(c, _)| c.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_pattern_is_rejected() {
        let fc = FieldConfiguration {
            name: "bad".into(),
            field_type: FieldType::String,
            source_field: "message".into(),
            extraction_pattern: "(unclosed".into(),
            stored: true,
            indexed: true,
            tokenized: false,
            enabled: true,
        };
        assert!(fc.compile().is_err());
    }

    #[test]
    fn duplicate_names_collapse() {
        let mk = |n: &str| FieldConfiguration {
            name: n.into(),
            field_type: FieldType::String,
            source_field: "message".into(),
            extraction_pattern: ".*".into(),
            stored: true,
            indexed: true,
            tokenized: false,
            enabled: true,
        };
        let compiled = CompiledFieldConfigurations::compile(vec![mk("x"), mk("x")]).unwrap();
        assert_eq!(compiled.entries.len(), 1);
    }
}
