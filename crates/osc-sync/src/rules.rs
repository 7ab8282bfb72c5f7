//! Optional YAML rule files under `<workspace_root>/rules/`.

use std::path::Path;

use anyhow::{Context, Result};
use osc_core::EncodingRepair;
use serde::Deserialize;
use tracing::info;

use crate::matcher::{default_overrides, NameOverride};

pub const OVERRIDES_FILE: &str = "municipality_overrides.yaml";
pub const ENCODING_FIXES_FILE: &str = "encoding_fixes.yaml";

#[derive(Debug, Clone, Deserialize)]
struct OverridesFile {
    #[serde(default)]
    overrides: Vec<NameOverride>,
}

#[derive(Debug, Clone, Deserialize)]
struct EncodingFixesFile {
    #[serde(default)]
    fixes: Vec<EncodingFix>,
}

#[derive(Debug, Clone, Deserialize)]
struct EncodingFix {
    corrupted: String,
    repaired: String,
}

/// Rule tables injected into the matcher and the repair filter.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub overrides: Vec<NameOverride>,
    pub encoding_fixes: Vec<(String, String)>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            overrides: default_overrides(),
            encoding_fixes: Vec::new(),
        }
    }
}

impl RuleSet {
    /// Reads both rule files when present. A missing overrides file keeps the built-in
    /// overrides; file entries are added after them.
    pub fn from_workspace_root(root: &Path) -> Result<Self> {
        let rules_dir = root.join("rules");
        let mut rules = Self::default();

        if let Some(file) = read_optional::<OverridesFile>(&rules_dir.join(OVERRIDES_FILE))? {
            info!(count = file.overrides.len(), "municipality overrides loaded");
            rules.overrides.extend(file.overrides);
        }
        let fixes_path = rules_dir.join(ENCODING_FIXES_FILE);
        if let Some(file) = read_optional::<EncodingFixesFile>(&fixes_path)? {
            info!(count = file.fixes.len(), "encoding fixes loaded");
            rules
                .encoding_fixes
                .extend(file.fixes.into_iter().map(|f| (f.corrupted, f.repaired)));
        }
        Ok(rules)
    }

    pub fn encoding_repair(&self) -> EncodingRepair {
        EncodingRepair::with_extra_fixes(self.encoding_fixes.clone())
    }
}

fn read_optional<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let parsed =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_rule_files_keep_defaults() {
        let dir = tempdir().expect("tempdir");
        let rules = RuleSet::from_workspace_root(dir.path()).expect("rules");
        assert_eq!(rules.overrides, default_overrides());
        assert!(rules.encoding_fixes.is_empty());
    }

    #[test]
    fn rule_files_extend_defaults() {
        let dir = tempdir().expect("tempdir");
        let rules_dir = dir.path().join("rules");
        std::fs::create_dir_all(&rules_dir).unwrap();
        std::fs::write(
            rules_dir.join(OVERRIDES_FILE),
            "overrides:\n  - source: \"Itapejara D'Oeste\"\n    target: \"Itapejara d'Oeste\"\n",
        )
        .unwrap();
        std::fs::write(
            rules_dir.join(ENCODING_FIXES_FILE),
            // C1 controls are not printable YAML, so the corrupted form is escaped
            "fixes:\n  - corrupted: \"Paran\\u00C3\\u0083\\u00C2\\u00A1\"\n    repaired: \"Paraná\"\n",
        )
        .unwrap();

        let rules = RuleSet::from_workspace_root(dir.path()).expect("rules");
        assert_eq!(rules.overrides.len(), default_overrides().len() + 1);
        assert_eq!(rules.encoding_fixes.len(), 1);
        assert_eq!(rules.encoding_repair().repair("Paran\u{c3}\u{83}\u{c2}\u{a1}"), "Paraná");
    }

    #[test]
    fn malformed_rule_file_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let rules_dir = dir.path().join("rules");
        std::fs::create_dir_all(&rules_dir).unwrap();
        std::fs::write(rules_dir.join(OVERRIDES_FILE), "overrides: [ {source: 1").unwrap();
        assert!(RuleSet::from_workspace_root(dir.path()).is_err());
    }
}
