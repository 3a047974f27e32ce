// 📤 Export - consolidated datasets to SQLite, CSV and GeoJSON
//
// Three sinks, all fed from the same ConsolidatedDataset:
// - SQLite: per-year stats, per-group series (geometry as GeoJSON text) and
//           one row of run metadata per build
// - CSV:    the display table (code, name, group, deaths per year, mean rate,
//           rate delta %, deaths delta %)
// - GeoJSON: choropleth layer with a `fill` color per feature plus the legend

use crate::color::{ColorScale, LegendBucket};
use crate::config::OutputConfig;
use crate::pipeline::{ConsolidatedDataset, ConsolidatedRow, Pipeline};
use crate::records::GroupLevel;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, JsonValue};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

// ============================================================================
// VALUE FIELDS
// ============================================================================

/// Numeric column of a consolidated row, for coloring and tooltips
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueField {
    MeanRate,
    DeltaPct,
    DeathsDeltaPct,
    Rate(i32),
    Deaths(i32),
    Population(i32),
}

impl ValueField {
    pub fn key(&self) -> String {
        match self {
            ValueField::MeanRate => "mean_rate".to_string(),
            ValueField::DeltaPct => "delta_pct".to_string(),
            ValueField::DeathsDeltaPct => "deaths_delta_pct".to_string(),
            ValueField::Rate(year) => format!("rate_{year}"),
            ValueField::Deaths(year) => format!("deaths_{year}"),
            ValueField::Population(year) => format!("population_{year}"),
        }
    }

    pub fn value(&self, row: &ConsolidatedRow) -> f64 {
        match self {
            ValueField::MeanRate => row.mean_rate,
            ValueField::DeltaPct => row.delta_pct,
            ValueField::DeathsDeltaPct => row.deaths_delta_pct,
            ValueField::Rate(year) => row.rate_in(*year),
            ValueField::Deaths(year) => row.deaths_in(*year) as f64,
            ValueField::Population(year) => row.population.get(year).copied().unwrap_or(0) as f64,
        }
    }

    /// Default tooltip: deaths per year, mean rate and both deltas
    pub fn tooltip_defaults(dataset: &ConsolidatedDataset) -> Vec<ValueField> {
        let mut fields: Vec<ValueField> = dataset.window.years().map(ValueField::Deaths).collect();
        fields.push(ValueField::MeanRate);
        fields.push(ValueField::DeltaPct);
        fields.push(ValueField::DeathsDeltaPct);
        fields
    }
}

// ============================================================================
// DISPLAY TABLE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayRow {
    pub code: String,
    pub name: String,
    pub group: String,
    pub deaths: Vec<u64>,
    pub mean_rate: f64,
    pub delta_pct: f64,

    /// Change in deaths between the first and last year of the window
    pub deaths_delta_pct: f64,
}

/// Rows of the display table, highest mean rate first
pub fn display_rows(dataset: &ConsolidatedDataset) -> Vec<DisplayRow> {
    let years: Vec<i32> = dataset.window.years().collect();
    let mut rows: Vec<DisplayRow> = dataset
        .rows
        .iter()
        .map(|row| DisplayRow {
            code: row.group_key.clone(),
            name: row.display_name.clone(),
            group: row.parent_group.clone().unwrap_or_default(),
            deaths: years.iter().map(|y| row.deaths_in(*y)).collect(),
            mean_rate: row.mean_rate,
            delta_pct: row.delta_pct,
            deaths_delta_pct: row.deaths_delta_pct,
        })
        .collect();

    rows.sort_by(|a, b| {
        b.mean_rate
            .total_cmp(&a.mean_rate)
            .then_with(|| a.code.cmp(&b.code))
    });
    rows
}

pub fn display_headers(dataset: &ConsolidatedDataset) -> Vec<String> {
    let mut headers = vec!["code".to_string(), "name".to_string(), "group".to_string()];
    headers.extend(dataset.window.years().map(|y| format!("deaths_{y}")));
    headers.push("mean_rate".to_string());
    headers.push("delta_pct".to_string());
    headers.push("deaths_delta_pct".to_string());
    headers
}

pub fn write_table_csv<W: Write>(writer: W, dataset: &ConsolidatedDataset) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(display_headers(dataset))?;

    let rows = display_rows(dataset);
    for row in &rows {
        let mut record = vec![row.code.clone(), row.name.clone(), row.group.clone()];
        record.extend(row.deaths.iter().map(u64::to_string));
        record.push(format!("{:.2}", row.mean_rate));
        record.push(format!("{:.2}", row.delta_pct));
        record.push(format!("{:.2}", row.deaths_delta_pct));
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(rows.len())
}

// ============================================================================
// CHOROPLETH
// ============================================================================

/// GeoJSON layer colored by one value field, with its legend
#[derive(Debug, Clone)]
pub struct Choropleth {
    pub field: ValueField,
    pub collection: FeatureCollection,
    pub legend: Vec<LegendBucket>,
}

impl Choropleth {
    /// FeatureCollection with the legend attached as a foreign member
    pub fn to_geojson_string(&self) -> Result<String> {
        let mut collection = self.collection.clone();
        let mut members = collection.foreign_members.take().unwrap_or_default();
        members.insert("value_field".to_string(), JsonValue::from(self.field.key()));
        members.insert("legend".to_string(), serde_json::to_value(&self.legend)?);
        collection.foreign_members = Some(members);
        Ok(collection.to_string())
    }
}

/// One feature per row that has geometry; rows without geometry are skipped
pub fn render_choropleth(
    dataset: &ConsolidatedDataset,
    field: ValueField,
    scale: &ColorScale,
    tooltip_fields: &[ValueField],
) -> Choropleth {
    let mut skipped = 0usize;

    let features: Vec<Feature> = dataset
        .rows
        .iter()
        .filter_map(|row| {
            let Some(geometry) = &row.geometry else {
                skipped += 1;
                return None;
            };

            let value = field.value(row);
            let mut properties = JsonObject::new();
            properties.insert("key".to_string(), JsonValue::from(row.group_key.clone()));
            properties.insert("name".to_string(), JsonValue::from(row.display_name.clone()));
            if let Some(group) = &row.parent_group {
                properties.insert("group".to_string(), JsonValue::from(group.clone()));
            }
            properties.insert(field.key(), JsonValue::from(value));
            properties.insert("fill".to_string(), JsonValue::from(scale.color_for(value)));
            for tooltip in tooltip_fields {
                properties.insert(tooltip.key(), JsonValue::from(tooltip.value(row)));
            }
            if let Some(method) = &row.resolution {
                properties.insert("resolution".to_string(), JsonValue::from(method.as_str()));
            }

            Some(Feature {
                bbox: None,
                geometry: Some(Geometry::new(geojson::Value::from(geometry))),
                id: Some(geojson::feature::Id::String(row.group_key.clone())),
                properties: Some(properties),
                foreign_members: None,
            })
        })
        .collect();

    if skipped > 0 {
        debug!(skipped, level = dataset.level.as_str(), "rows without geometry left off the map");
    }

    Choropleth {
        field,
        collection: FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        },
        legend: scale.legend(),
    }
}

// ============================================================================
// SQLITE
// ============================================================================

/// Metadata recorded once per build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub fingerprint: String,
    pub first_year: i32,
    pub year_count: u32,
}

impl RunInfo {
    pub fn for_pipeline(pipeline: &Pipeline) -> Self {
        let window = pipeline.settings().window;
        RunInfo {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            fingerprint: pipeline.fingerprint().to_string(),
            first_year: window.first,
            year_count: window.count,
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS runs (
            run_id TEXT PRIMARY KEY,
            generated_at TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            first_year INTEGER NOT NULL,
            year_count INTEGER NOT NULL,
            crate_version TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS group_stats (
            run_id TEXT NOT NULL REFERENCES runs(run_id),
            level TEXT NOT NULL,
            group_key TEXT NOT NULL,
            year INTEGER NOT NULL,
            deaths INTEGER NOT NULL,
            population INTEGER NOT NULL,
            rate REAL NOT NULL,
            PRIMARY KEY (run_id, level, group_key, year)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS group_series (
            run_id TEXT NOT NULL REFERENCES runs(run_id),
            level TEXT NOT NULL,
            group_key TEXT NOT NULL,
            display_name TEXT NOT NULL,
            parent_group TEXT,
            mean_rate REAL NOT NULL,
            delta_pct REAL NOT NULL,
            deaths_delta_pct REAL NOT NULL,
            resolution TEXT,
            geometry TEXT,
            PRIMARY KEY (run_id, level, group_key)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_group_stats_year ON group_stats(level, year)",
        [],
    )?;

    Ok(())
}

pub fn insert_run(conn: &Connection, run: &RunInfo) -> Result<()> {
    conn.execute(
        "INSERT INTO runs (run_id, generated_at, fingerprint, first_year, year_count, crate_version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            run.run_id.to_string(),
            run.generated_at.to_rfc3339(),
            run.fingerprint,
            run.first_year,
            run.year_count,
            crate::VERSION,
        ],
    )?;
    Ok(())
}

/// Insert one dataset under a run; returns the number of series rows
pub fn insert_dataset(conn: &mut Connection, run_id: &Uuid, dataset: &ConsolidatedDataset) -> Result<usize> {
    let run_id = run_id.to_string();
    let level = dataset.level.as_str();
    let tx = conn.transaction()?;

    {
        let mut stats = tx.prepare(
            "INSERT INTO group_stats (run_id, level, group_key, year, deaths, population, rate)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        let mut series = tx.prepare(
            "INSERT INTO group_series (
                run_id, level, group_key, display_name, parent_group,
                mean_rate, delta_pct, deaths_delta_pct, resolution, geometry
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;

        for row in &dataset.rows {
            for year in dataset.window.years() {
                stats.execute(params![
                    run_id,
                    level,
                    row.group_key,
                    year,
                    row.deaths_in(year) as i64,
                    row.population.get(&year).copied().unwrap_or(0) as i64,
                    row.rate_in(year),
                ])?;
            }

            let geometry = row
                .geometry
                .as_ref()
                .map(|g| Geometry::new(geojson::Value::from(g)).to_string());

            series.execute(params![
                run_id,
                level,
                row.group_key,
                row.display_name,
                row.parent_group,
                row.mean_rate,
                row.delta_pct,
                row.deaths_delta_pct,
                row.resolution.as_ref().map(|m| m.as_str()),
                geometry,
            ])?;
        }
    }

    tx.commit()?;
    Ok(dataset.rows.len())
}

pub fn count_series(conn: &Connection, run_id: &Uuid, level: GroupLevel) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM group_series WHERE run_id = ?1 AND level = ?2",
        params![run_id.to_string(), level.as_str()],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn write_sqlite(path: &Path, run: &RunInfo, datasets: &[&ConsolidatedDataset]) -> Result<()> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("Failed to open SQLite output: {:?}", path))?;
    setup_database(&conn)?;
    insert_run(&conn, run)?;

    for dataset in datasets {
        let n = insert_dataset(&mut conn, &run.run_id, dataset)
            .with_context(|| format!("Failed to write {} dataset", dataset.level.as_str()))?;
        info!(rows = n, level = dataset.level.as_str(), "dataset written to SQLite");
    }

    Ok(())
}

// ============================================================================
// WRITE ALL OUTPUTS
// ============================================================================

/// Write every enabled output for both levels; returns the files written
pub fn write_outputs(pipeline: &Pipeline, output: &OutputConfig, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create output dir: {:?}", dir))?;

    let regions = pipeline.dataset(GroupLevel::Region);
    let groups = pipeline.dataset(GroupLevel::Group);
    let mut written = Vec::new();

    if output.sqlite {
        let path = dir.join("atlas.sqlite");
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("Failed to replace {:?}", path))?;
        }
        let run = RunInfo::for_pipeline(pipeline);
        write_sqlite(&path, &run, &[regions.as_ref(), groups.as_ref()])?;
        written.push(path);
    }

    for dataset in [regions.as_ref(), groups.as_ref()] {
        let level = dataset.level.as_str();

        if output.csv {
            let path = dir.join(format!("{level}_table.csv"));
            let file = File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;
            write_table_csv(file, dataset)?;
            written.push(path);
        }

        if output.geojson {
            let path = dir.join(format!("{level}_choropleth.geojson"));
            let choropleth = render_choropleth(
                dataset,
                ValueField::MeanRate,
                &dataset.mean_rate_scale(),
                &ValueField::tooltip_defaults(dataset),
            );
            fs::write(&path, choropleth.to_geojson_string()?)
                .with_context(|| format!("Failed to write {:?}", path))?;
            written.push(path);
        }
    }

    info!(files = written.len(), "outputs written to {:?}", dir);
    Ok(written)
}

// ============================================================================
// TESTS
// ============================================================================
