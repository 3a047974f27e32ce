// 📂 Loader - CSV and GeoJSON inputs → immutable input snapshot
//
// All file I/O happens here, once, before the pipeline runs. Required inputs
// are resolved up front so a run fails fast with every attempted path.

use crate::aggregate::YearWindow;
use crate::config::{
    AtlasConfig, BoundarySource, CrosswalkSource, MortalitySource, PopulationSource, TextEncoding,
};
use crate::error::AtlasError;
use crate::pipeline::InputSnapshot;
use crate::records::{
    canonical_code, CrosswalkEntry, GeometryFeature, MortalityRecord, PopulationRecord,
};
use anyhow::{Context, Result};
use geojson::{FeatureCollection, GeoJson};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

// ============================================================================
// RAW TABLES
// ============================================================================

/// Decode file bytes; Latin-1 maps each byte to the code point of equal value
pub fn decode(bytes: &[u8], encoding: TextEncoding) -> Result<String> {
    match encoding {
        TextEncoding::Utf8 => {
            let text = String::from_utf8(bytes.to_vec()).context("File is not valid UTF-8")?;
            Ok(text.trim_start_matches('\u{feff}').to_string())
        }
        TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
    }
}

/// Delimited text table with a header row
pub struct RawTable {
    name: String,
    headers: Vec<String>,
    rows: Vec<csv::StringRecord>,
}

impl RawTable {
    pub fn read(path: &Path, name: &str, delimiter: char, encoding: TextEncoding) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read {name} file: {:?}", path))?;
        let text = decode(&bytes, encoding)
            .with_context(|| format!("Failed to decode {name} file: {:?}", path))?;
        Self::parse(&text, name, delimiter)
    }

    pub fn parse(text: &str, name: &str, delimiter: char) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter as u8)
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers = rdr
            .headers()
            .with_context(|| format!("Failed to read {name} header"))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for result in rdr.records() {
            rows.push(result.with_context(|| format!("Failed to parse {name} row"))?);
        }

        Ok(RawTable {
            name: name.to_string(),
            headers,
            rows,
        })
    }

    pub fn column(&self, column: &str) -> Result<usize, AtlasError> {
        self.headers
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| AtlasError::MissingColumn {
                source_name: self.name.clone(),
                column: column.to_string(),
                available: self.headers.join(", "),
            })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn cell<'a>(&self, row: &'a csv::StringRecord, index: usize) -> &'a str {
        row.get(index).map(str::trim).unwrap_or("")
    }

    /// Line number for error messages (header is line 1)
    fn line_of(row: &csv::StringRecord, fallback: usize) -> u64 {
        row.position().map(|p| p.line()).unwrap_or(fallback as u64 + 2)
    }

    fn number_error(&self, field: &str, value: &str, line: u64) -> AtlasError {
        AtlasError::InvalidNumber {
            source_name: self.name.clone(),
            field: field.to_string(),
            value: value.to_string(),
            line,
        }
    }
}

/// Non-negative whole number, accepting spreadsheet floats like "1234.0"
pub fn parse_count(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(n) = value.parse::<u64>() {
        return Some(n);
    }
    match value.parse::<f64>() {
        Ok(f) if f.is_finite() && f >= 0.0 && f.fract() == 0.0 => Some(f as u64),
        _ => None,
    }
}

fn parse_year(value: &str) -> Option<i32> {
    canonical_code(value).parse::<i32>().ok()
}

// ============================================================================
// SOURCES
// ============================================================================

/// Count qualifying events per (year, region) from the individual-victim table
pub fn count_deaths(table: &RawTable, source: &MortalitySource, window: YearWindow) -> Result<Vec<MortalityRecord>> {
    let year_col = table.column(&source.year_column)?;
    let region_col = table.column(&source.region_column)?;
    let severity_col = table.column(&source.severity_column)?;
    let vehicle_col = table.column(&source.vehicle_column)?;

    let mut counts: BTreeMap<(i32, String), u64> = BTreeMap::new();
    let mut skipped = 0usize;

    for row in &table.rows {
        let severity = table.cell(row, severity_col);
        let vehicle = table.cell(row, vehicle_col);
        if !severity.eq_ignore_ascii_case(&source.severity)
            || !vehicle.eq_ignore_ascii_case(&source.vehicle_type)
        {
            continue;
        }

        let Some(year) = parse_year(table.cell(row, year_col)) else {
            skipped += 1;
            continue;
        };
        if !window.contains(year) {
            continue;
        }

        let region = canonical_code(table.cell(row, region_col));
        if region.is_empty() {
            skipped += 1;
            continue;
        }

        *counts.entry((year, region)).or_insert(0) += 1;
    }

    if skipped > 0 {
        warn!(skipped, "qualifying events without a usable year or region code");
    }

    let records: Vec<MortalityRecord> = counts
        .into_iter()
        .map(|((year, region_code), death_count)| MortalityRecord {
            year,
            region_code,
            death_count,
        })
        .collect();

    info!("Mortality: {} (year, region) counts from {} rows", records.len(), table.len());
    Ok(records)
}

/// Population per (year, region), summing the age/sex breakdown rows
pub fn sum_population(table: &RawTable, source: &PopulationSource) -> Result<Vec<PopulationRecord>> {
    let year_col = table.column(&source.year_column)?;
    let region_col = table.column(&source.region_column)?;
    let pop_col = table.column(&source.population_column)?;

    let mut totals: BTreeMap<(i32, String), u64> = BTreeMap::new();

    for (i, row) in table.rows.iter().enumerate() {
        let line = RawTable::line_of(row, i);
        let raw_year = table.cell(row, year_col);
        let year = parse_year(raw_year)
            .ok_or_else(|| table.number_error(&source.year_column, raw_year, line))?;

        let region = canonical_code(table.cell(row, region_col));
        if region.is_empty() {
            debug!(line, "population row without region code");
            continue;
        }

        let raw_pop = table.cell(row, pop_col);
        let population = if raw_pop.is_empty() {
            0
        } else {
            parse_count(raw_pop)
                .ok_or_else(|| table.number_error(&source.population_column, raw_pop, line))?
        };

        *totals.entry((year, region)).or_insert(0) += population;
    }

    let records: Vec<PopulationRecord> = totals
        .into_iter()
        .map(|((year, region_code), population)| PopulationRecord {
            year,
            region_code,
            population,
        })
        .collect();

    info!("Population: {} (year, region) totals from {} rows", records.len(), table.len());
    Ok(records)
}

pub fn read_crosswalk(table: &RawTable, source: &CrosswalkSource) -> Result<Vec<CrosswalkEntry>> {
    let region_col = table.column(&source.region_column)?;
    let group_col = table.column(&source.group_column)?;

    let entries: Vec<CrosswalkEntry> = table
        .rows
        .iter()
        .filter_map(|row| {
            let region_code = canonical_code(table.cell(row, region_col));
            let group_label = table.cell(row, group_col).to_string();
            if region_code.is_empty() || group_label.is_empty() {
                return None;
            }
            Some(CrosswalkEntry {
                region_code,
                group_label,
            })
        })
        .collect();

    info!("Crosswalk: {} entries", entries.len());
    Ok(entries)
}

/// Text of a GeoJSON property; numbers are written without a trailing ".0"
fn property_text(feature: &geojson::Feature, property: &str) -> Option<String> {
    match feature.property(property)? {
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(match n.as_i64() {
            Some(i) => i.to_string(),
            None => canonical_code(&n.to_string()),
        }),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn to_multipolygon(geometry: &geojson::Geometry) -> Option<geo::MultiPolygon<f64>> {
    match geo::Geometry::<f64>::try_from(geometry.value.clone()).ok()? {
        geo::Geometry::Polygon(p) => Some(geo::MultiPolygon(vec![p])),
        geo::Geometry::MultiPolygon(mp) => Some(mp),
        _ => None,
    }
}

/// Parse a boundary FeatureCollection. `codes` canonicalizes the key as a
/// region code (fine layer); otherwise it is kept as free text.
pub fn parse_boundaries(text: &str, source: &BoundarySource, codes: bool) -> Result<Vec<GeometryFeature>> {
    let geojson: GeoJson = text.parse().context("Failed to parse boundary GeoJSON")?;
    let collection =
        FeatureCollection::try_from(geojson).context("Boundary GeoJSON is not a FeatureCollection")?;

    let mut features = Vec::with_capacity(collection.features.len());
    let mut skipped = 0usize;

    for feature in &collection.features {
        let key = property_text(feature, &source.key_property).map(|k| {
            if codes {
                canonical_code(&k)
            } else {
                k
            }
        });
        let geometry = feature.geometry.as_ref().and_then(to_multipolygon);

        match (key, geometry) {
            (Some(key), Some(geometry)) => {
                let mut out = GeometryFeature::new(&key, geometry);
                if let Some(name_property) = &source.name_property {
                    out.name = property_text(feature, name_property);
                }
                features.push(out);
            }
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!(skipped, "boundary features without key or polygon geometry");
    }
    Ok(features)
}

pub fn load_boundaries(path: &Path, source: &BoundarySource, codes: bool) -> Result<Vec<GeometryFeature>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read boundaries: {:?}", path))?;
    let features = parse_boundaries(&text, source, codes)
        .with_context(|| format!("Invalid boundaries file: {:?}", path))?;
    info!("Boundaries: {} features from {:?}", features.len(), path);
    Ok(features)
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Load every configured input into one immutable snapshot
pub fn load_snapshot(config: &AtlasConfig) -> Result<InputSnapshot> {
    // Resolve everything first: a missing file fails before any parsing
    let mortality_path = config.resolve_input("mortality", &config.mortality.path)?;
    let population_path = config.resolve_input("population", &config.population.path)?;
    let crosswalk_path = config.resolve_input("crosswalk", &config.crosswalk.path)?;
    let boundaries_path = config.resolve_input("boundaries", &config.boundaries.path)?;
    let group_boundaries_path = match &config.group_boundaries {
        Some(source) => Some(config.resolve_input("group boundaries", &source.path)?),
        None => None,
    };

    let m = &config.mortality;
    let mortality_table = RawTable::read(&mortality_path, "mortality", m.delimiter, m.encoding)?;
    let mortality = count_deaths(&mortality_table, m, config.years)?;

    let p = &config.population;
    let population_table = RawTable::read(&population_path, "population", p.delimiter, p.encoding)?;
    let population = sum_population(&population_table, p)?;

    let c = &config.crosswalk;
    let crosswalk_table = RawTable::read(&crosswalk_path, "crosswalk", c.delimiter, c.encoding)?;
    let crosswalk = read_crosswalk(&crosswalk_table, c)?;

    let regions = load_boundaries(&boundaries_path, &config.boundaries, true)?;
    let group_boundaries = match (&config.group_boundaries, group_boundaries_path) {
        (Some(source), Some(path)) => Some(load_boundaries(&path, source, false)?),
        _ => None,
    };

    Ok(InputSnapshot::new(
        mortality,
        population,
        crosswalk,
        regions,
        group_boundaries,
    ))
}

// ============================================================================
// TESTS
// ============================================================================
