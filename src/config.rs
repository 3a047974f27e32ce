// ⚙️ Configuration - where the inputs live and how to read them
//
// Every field has a default matching the Infosiga / IBGE / CETRAN exports,
// so a config file only needs to list what differs.

use crate::aggregate::YearWindow;
use crate::error::AtlasError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextEncoding {
    Utf8,
    Latin1,
}

// ============================================================================
// SOURCES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MortalitySource {
    pub path: PathBuf,
    pub delimiter: char,
    pub encoding: TextEncoding,
    pub year_column: String,
    pub region_column: String,
    pub severity_column: String,
    pub vehicle_column: String,

    /// Only events with this injury severity are counted
    pub severity: String,

    /// Only victims in this vehicle type are counted
    pub vehicle_type: String,
}

impl Default for MortalitySource {
    fn default() -> Self {
        MortalitySource {
            path: PathBuf::from("data/infosiga/pessoas_2022-2025.csv"),
            delimiter: ';',
            encoding: TextEncoding::Latin1,
            year_column: "ano_obito".to_string(),
            region_column: "cod_ibge".to_string(),
            severity_column: "gravidade_lesao".to_string(),
            vehicle_column: "tipo_veiculo_vitima".to_string(),
            severity: "FATAL".to_string(),
            vehicle_type: "MOTOCICLETA".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationSource {
    pub path: PathBuf,
    pub delimiter: char,
    pub encoding: TextEncoding,
    pub year_column: String,
    pub region_column: String,
    pub population_column: String,
}

impl Default for PopulationSource {
    fn default() -> Self {
        PopulationSource {
            path: PathBuf::from("data/estimativa_pop_idade_sexo_esp.csv"),
            delimiter: ';',
            encoding: TextEncoding::Latin1,
            year_column: "ano".to_string(),
            region_column: "cod_ibge".to_string(),
            population_column: "populacao".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrosswalkSource {
    pub path: PathBuf,
    pub delimiter: char,
    pub encoding: TextEncoding,
    pub region_column: String,
    pub group_column: String,
}

impl Default for CrosswalkSource {
    fn default() -> Self {
        CrosswalkSource {
            path: PathBuf::from("data/base_cetran.csv"),
            delimiter: ';',
            encoding: TextEncoding::Utf8,
            region_column: "CD_MUN".to_string(),
            group_column: "Superintendência".to_string(),
        }
    }
}

/// GeoJSON FeatureCollection of boundary polygons
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundarySource {
    pub path: PathBuf,

    /// Property holding the region code or group label
    pub key_property: String,

    /// Property holding a display name, if any
    pub name_property: Option<String>,
}

impl Default for BoundarySource {
    fn default() -> Self {
        BoundarySource {
            path: PathBuf::from("data/municipios_sp.geojson"),
            key_property: "code_muni".to_string(),
            name_property: Some("name_muni".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub sqlite: bool,
    pub geojson: bool,
    pub csv: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            dir: PathBuf::from("out"),
            sqlite: true,
            geojson: true,
            csv: true,
        }
    }
}

// ============================================================================
// ATLAS CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    pub mortality: MortalitySource,
    pub population: PopulationSource,
    pub crosswalk: CrosswalkSource,
    pub boundaries: BoundarySource,

    /// Pre-built coarse boundaries; when absent, groups are dissolved
    pub group_boundaries: Option<BoundarySource>,

    pub years: YearWindow,

    /// JSON file of override rules; built-in defaults when absent
    pub overrides: Option<PathBuf>,

    pub output: OutputConfig,

    /// Directory of the config file, for resolving relative paths
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl AtlasConfig {
    /// Load from a JSON file; relative paths resolve against its directory
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: AtlasConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config JSON: {:?}", path))?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AtlasError> {
        if self.years.count == 0 {
            return Err(AtlasError::InvalidConfig {
                message: "years.count must be at least 1".to_string(),
            });
        }
        YearWindow::new(self.years.first, self.years.count)?;

        for (name, delimiter) in [
            ("mortality", self.mortality.delimiter),
            ("population", self.population.delimiter),
            ("crosswalk", self.crosswalk.delimiter),
        ] {
            if !delimiter.is_ascii() {
                return Err(AtlasError::InvalidConfig {
                    message: format!("{name} delimiter '{delimiter}' is not ASCII"),
                });
            }
        }

        Ok(())
    }

    /// Candidate locations for a configured path, in lookup order
    pub fn candidates(&self, path: &Path) -> Vec<PathBuf> {
        let mut out = vec![path.to_path_buf()];
        if path.is_relative() {
            if let Some(base) = &self.base_dir {
                let joined = base.join(path);
                if joined != out[0] {
                    out.push(joined);
                }
            }
        }
        out
    }

    /// First existing candidate, or a fatal error listing every attempt
    pub fn resolve_input(&self, name: &str, path: &Path) -> Result<PathBuf, AtlasError> {
        let attempted = self.candidates(path);
        attempted
            .iter()
            .find(|p| p.is_file())
            .cloned()
            .ok_or_else(|| AtlasError::MissingInput {
                name: name.to_string(),
                attempted,
            })
    }

    /// Output directory, resolved against the config directory
    pub fn output_dir(&self) -> PathBuf {
        match &self.base_dir {
            Some(base) if self.output.dir.is_relative() => base.join(&self.output.dir),
            _ => self.output.dir.clone(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
