// ❌ Error types - fatal conditions raised before or while loading inputs
//
// Everything recoverable (missing cells, unresolved labels, degenerate ranges)
// is handled in place by the pipeline and never reaches this enum.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AtlasError {
    /// A required input file could not be found at any candidate location
    #[error("Missing required input '{name}'; tried: {}", display_paths(.attempted))]
    MissingInput { name: String, attempted: Vec<PathBuf> },

    /// A CSV source lacks a configured column
    #[error("Column '{column}' not found in {source_name} (available: {available})")]
    MissingColumn {
        source_name: String,
        column: String,
        available: String,
    },

    /// A numeric field could not be parsed
    #[error("Invalid {field} value '{value}' in {source_name} at line {line}")]
    InvalidNumber {
        source_name: String,
        field: String,
        value: String,
        line: u64,
    },

    /// The configuration is unusable as written
    #[error("Invalid config: {message}")]
    InvalidConfig { message: String },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_input_lists_every_attempt() {
        let err = AtlasError::MissingInput {
            name: "population".to_string(),
            attempted: vec![
                PathBuf::from("data/pop.csv"),
                PathBuf::from("/etc/atlas/data/pop.csv"),
            ],
        };

        let message = err.to_string();
        assert!(message.contains("population"));
        assert!(message.contains("data/pop.csv, /etc/atlas/data/pop.csv"));
    }
}
