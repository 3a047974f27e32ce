// 🧭 Region Crosswalk - resolve geometry labels to statistics labels
//
// Resolution order for every geometry-side label:
//   1. exact match on normalized text
//   2. manual override rules, in order
//   3. the feature's own raw label, flagged unresolved for audit
//
// The resolver is total: every label comes back with *some* label.

use crate::normalize::normalize;
use crate::records::UNASSIGNED_GROUP;
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

// ============================================================================
// OVERRIDE RULES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRule {
    /// Rule ID for tracking in audit reports
    pub id: String,

    /// Pattern over normalized text (supports wildcards with *)
    pub pattern: String,

    /// Statistics-side label the pattern maps to
    pub canonical: String,

    /// Why the rule exists (misspelling, alias, ...)
    #[serde(default)]
    pub description: Option<String>,

    /// Priority (higher = evaluated first, ties keep list order)
    #[serde(default)]
    pub priority: i32,
}

impl OverrideRule {
    pub fn new(id: &str, pattern: &str, canonical: &str) -> Self {
        OverrideRule {
            id: id.to_string(),
            pattern: pattern.to_string(),
            canonical: canonical.to_string(),
            description: None,
            priority: 0,
        }
    }

    /// Check if the pattern matches an already-normalized label.
    ///
    /// Without `*` the whole label must equal the pattern; a substring hit is
    /// not enough, since "campinas" must not swallow "campinas do sul".
    pub fn matches(&self, normalized_label: &str) -> bool {
        let pattern = normalize(&self.pattern);

        if !pattern.contains('*') {
            return pattern == normalized_label;
        }

        let parts: Vec<&str> = pattern.split('*').collect();
        let first = parts[0];
        let last = parts[parts.len() - 1];

        if !normalized_label.starts_with(first) || !normalized_label.ends_with(last) {
            return false;
        }
        if first.len() + last.len() > normalized_label.len() {
            return false;
        }

        // Middle parts must appear in order between prefix and suffix
        let end = normalized_label.len() - last.len();
        let mut pos = first.len();
        for part in &parts[1..parts.len() - 1] {
            if part.is_empty() {
                continue;
            }
            match normalized_label[pos..end].find(part) {
                Some(found) => pos += found + part.len(),
                None => return false,
            }
        }

        true
    }
}

/// Ordered, inspectable list of override rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OverrideRules {
    rules: Vec<OverrideRule>,
}

impl OverrideRules {
    pub fn new() -> Self {
        OverrideRules { rules: Vec::new() }
    }

    /// Known spelling mismatches between the boundary files and the crosswalk
    pub fn with_defaults() -> Self {
        let mut sbc = OverrideRule::new(
            "sao-bernardo-spelling",
            "sao bernardo do campo",
            "SAO BERNADO DO CAMPO",
        );
        sbc.description =
            Some("Crosswalk spells the superintendence without the second 'r'".to_string());

        OverrideRules::from_rules(vec![sbc])
    }

    /// Load rules from a JSON array file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read override rules: {:?}", path.as_ref()))?;

        let rules: Vec<OverrideRule> =
            serde_json::from_str(&content).context("Failed to parse override rules JSON")?;

        Ok(OverrideRules::from_rules(rules))
    }

    pub fn from_rules(mut rules: Vec<OverrideRule>) -> Self {
        // Stable: equal priorities keep their written order
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        OverrideRules { rules }
    }

    pub fn push(&mut self, rule: OverrideRule) {
        self.rules.push(rule);
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn iter(&self) -> impl Iterator<Item = &OverrideRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// ============================================================================
// RESOLUTION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionMethod {
    /// Normalized text matched a statistics label directly
    Exact,

    /// An override rule redirected the label
    Override { rule_id: String },

    /// Nothing matched; the raw label is used as-is
    Fallback,
}

impl ResolutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionMethod::Exact => "exact",
            ResolutionMethod::Override { .. } => "override",
            ResolutionMethod::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// Label as written in the geometry source
    pub raw_label: String,

    /// Label used downstream (statistics label, or raw label on fallback)
    pub label: String,

    pub method: ResolutionMethod,
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        self.method != ResolutionMethod::Fallback
    }
}

// ============================================================================
// CROSSWALK
// ============================================================================

#[derive(Debug, Clone)]
pub struct RegionCrosswalk {
    /// normalized text → canonical statistics label
    index: BTreeMap<String, String>,

    rules: OverrideRules,

    /// Distinct statistics labels that normalize identically (kept, loser)
    collisions: Vec<(String, String)>,
}

impl RegionCrosswalk {
    /// Build the normalized index from statistics-side group labels
    pub fn new<I, S>(statistics_labels: I, rules: OverrideRules) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let labels: BTreeSet<String> = statistics_labels
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let mut index: BTreeMap<String, String> = BTreeMap::new();
        let mut collisions = Vec::new();

        for label in labels {
            let key = normalize(&label);
            match index.get(&key) {
                Some(kept) => {
                    warn!(kept = %kept, dropped = %label, "statistics labels collide after normalization");
                    collisions.push((kept.clone(), label));
                }
                None => {
                    index.insert(key, label);
                }
            }
        }

        RegionCrosswalk {
            index,
            rules,
            collisions,
        }
    }

    /// Resolve one geometry-side label. Never fails.
    pub fn resolve(&self, raw_label: &str) -> Resolution {
        let key = normalize(raw_label);

        if let Some(label) = self.index.get(&key) {
            return Resolution {
                raw_label: raw_label.to_string(),
                label: label.clone(),
                method: ResolutionMethod::Exact,
            };
        }

        for rule in self.rules.iter() {
            if !rule.matches(&key) {
                continue;
            }
            match self.index.get(&normalize(&rule.canonical)) {
                Some(label) => {
                    debug!(rule = %rule.id, raw = %raw_label, label = %label, "override rule applied");
                    return Resolution {
                        raw_label: raw_label.to_string(),
                        label: label.clone(),
                        method: ResolutionMethod::Override {
                            rule_id: rule.id.clone(),
                        },
                    };
                }
                None => {
                    warn!(rule = %rule.id, target = %rule.canonical, "override target is not a statistics label; skipping rule");
                }
            }
        }

        warn!(raw = %raw_label, "no statistics label matches; keeping raw label");
        let label = match raw_label.trim() {
            "" => UNASSIGNED_GROUP.to_string(),
            trimmed => trimmed.to_string(),
        };
        Resolution {
            raw_label: raw_label.to_string(),
            label,
            method: ResolutionMethod::Fallback,
        }
    }

    /// Resolve a batch of labels into an audit report
    pub fn resolve_all<I, S>(&self, raw_labels: I) -> CrosswalkReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let resolutions = raw_labels
            .into_iter()
            .map(|raw| self.resolve(raw.as_ref()))
            .collect();

        CrosswalkReport {
            resolutions,
            collisions: self.collisions.clone(),
        }
    }

    pub fn statistics_labels(&self) -> impl Iterator<Item = &String> {
        self.index.values()
    }

    pub fn collisions(&self) -> &[(String, String)] {
        &self.collisions
    }
}

// ============================================================================
// AUDIT REPORT
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrosswalkReport {
    pub resolutions: Vec<Resolution>,
    pub collisions: Vec<(String, String)>,
}

impl CrosswalkReport {
    pub fn unresolved(&self) -> impl Iterator<Item = &Resolution> {
        self.resolutions.iter().filter(|r| !r.is_resolved())
    }

    pub fn count(&self, method: &str) -> usize {
        self.resolutions
            .iter()
            .filter(|r| r.method.as_str() == method)
            .count()
    }

    /// raw label → resolved label, for joining geometry to statistics
    pub fn label_for(&self, raw_label: &str) -> Option<&str> {
        self.resolutions
            .iter()
            .find(|r| r.raw_label == raw_label)
            .map(|r| r.label.as_str())
    }

    pub fn summary(&self) -> String {
        format!(
            "Crosswalk: {} labels ({} exact, {} override, {} unresolved), {} index collisions",
            self.resolutions.len(),
            self.count("exact"),
            self.count("override"),
            self.count("fallback"),
            self.collisions.len()
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
