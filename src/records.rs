// 📦 Input records - the immutable snapshot every pipeline stage reads
//
// All of these are produced by the loader once per run and never mutated.

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

/// Group assigned to regions that have no crosswalk entry
pub const UNASSIGNED_GROUP: &str = "(unassigned)";

/// Deaths counted per (year, region)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MortalityRecord {
    pub year: i32,
    pub region_code: String,
    pub death_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationRecord {
    pub year: i32,
    pub region_code: String,
    pub population: u64,
}

/// Fine region → coarse administrative group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrosswalkEntry {
    pub region_code: String,
    pub group_label: String,
}

/// One boundary feature, keyed by region code (fine) or free-text label (coarse)
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryFeature {
    pub label_or_code: String,

    /// Human-readable name when the source carries one (e.g. municipality name)
    pub name: Option<String>,

    pub geometry: MultiPolygon<f64>,
}

impl GeometryFeature {
    pub fn new(label_or_code: &str, geometry: MultiPolygon<f64>) -> Self {
        GeometryFeature {
            label_or_code: label_or_code.to_string(),
            name: None,
            geometry,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }
}

/// Grouping level of an aggregated table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GroupLevel {
    /// Fine-grained: one key per region code (municipality)
    Region,

    /// Coarse: one key per crosswalk group label (superintendence)
    Group,
}

impl GroupLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupLevel::Region => "region",
            GroupLevel::Group => "group",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            GroupLevel::Region => "Municípios",
            GroupLevel::Group => "Superintendências",
        }
    }
}

/// Canonical spelling of a region code.
///
/// Codes often arrive as floats from spreadsheet exports ("3548708.0");
/// integral values are rewritten in integer form so both sides join.
pub fn canonical_code(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(int_part) = trimmed.strip_suffix(".0") {
        if !int_part.is_empty() && int_part.chars().all(|c| c.is_ascii_digit()) {
            return int_part.to_string();
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_code() {
        assert_eq!(canonical_code("3548708"), "3548708");
        assert_eq!(canonical_code(" 3548708.0 "), "3548708");
        assert_eq!(canonical_code("3548708.5"), "3548708.5");
        assert_eq!(canonical_code(".0"), ".0");
        assert_eq!(canonical_code("SP-01"), "SP-01");
    }
}
