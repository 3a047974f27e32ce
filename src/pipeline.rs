// 🔁 Pipeline - explicit stages over one immutable input snapshot
//
// Each stage is a pure function of (snapshot, settings). Results are memoized
// in a StageCache keyed by (stage, fingerprint), so two views asking for the
// same aggregate share one computation. Swapping the snapshot or settings
// changes the fingerprint and evicts everything computed from the old one.

use crate::aggregate::{Aggregator, GroupMembership, GroupTable, YearWindow};
use crate::color::ColorScale;
use crate::crosswalk::{CrosswalkReport, OverrideRules, RegionCrosswalk, ResolutionMethod};
use crate::geometry::{GeometryAssembler, GeometryLayer};
use crate::records::{
    CrosswalkEntry, GeometryFeature, GroupLevel, MortalityRecord, PopulationRecord,
};
use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, info};

// ============================================================================
// FINGERPRINT
// ============================================================================

/// SHA-256 identity of a snapshot + settings pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn short(&self) -> String {
        self.to_string()[..12].to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

fn hash_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_geometry(hasher: &mut Sha256, geometry: &MultiPolygon<f64>) {
    hasher.update((geometry.0.len() as u64).to_le_bytes());
    for polygon in &geometry.0 {
        let rings = std::iter::once(polygon.exterior()).chain(polygon.interiors());
        for ring in rings {
            hasher.update((ring.0.len() as u64).to_le_bytes());
            for c in &ring.0 {
                hasher.update(c.x.to_le_bytes());
                hasher.update(c.y.to_le_bytes());
            }
        }
    }
}

fn hash_features(hasher: &mut Sha256, features: &[GeometryFeature]) {
    hasher.update((features.len() as u64).to_le_bytes());
    for f in features {
        hash_str(hasher, &f.label_or_code);
        hash_str(hasher, f.name.as_deref().unwrap_or(""));
        hash_geometry(hasher, &f.geometry);
    }
}

// ============================================================================
// INPUT SNAPSHOT
// ============================================================================

/// Everything the pipeline reads, loaded once and never mutated
#[derive(Debug, Clone)]
pub struct InputSnapshot {
    pub mortality: Vec<MortalityRecord>,
    pub population: Vec<PopulationRecord>,
    pub crosswalk: Vec<CrosswalkEntry>,
    pub regions: Vec<GeometryFeature>,
    pub group_boundaries: Option<Vec<GeometryFeature>>,
    digest: Fingerprint,
}

impl InputSnapshot {
    pub fn new(
        mortality: Vec<MortalityRecord>,
        population: Vec<PopulationRecord>,
        crosswalk: Vec<CrosswalkEntry>,
        regions: Vec<GeometryFeature>,
        group_boundaries: Option<Vec<GeometryFeature>>,
    ) -> Self {
        let mut hasher = Sha256::new();

        hasher.update((mortality.len() as u64).to_le_bytes());
        for r in &mortality {
            hasher.update(r.year.to_le_bytes());
            hash_str(&mut hasher, &r.region_code);
            hasher.update(r.death_count.to_le_bytes());
        }
        hasher.update((population.len() as u64).to_le_bytes());
        for r in &population {
            hasher.update(r.year.to_le_bytes());
            hash_str(&mut hasher, &r.region_code);
            hasher.update(r.population.to_le_bytes());
        }
        hasher.update((crosswalk.len() as u64).to_le_bytes());
        for e in &crosswalk {
            hash_str(&mut hasher, &e.region_code);
            hash_str(&mut hasher, &e.group_label);
        }
        hash_features(&mut hasher, &regions);
        match &group_boundaries {
            Some(features) => {
                hasher.update([1u8]);
                hash_features(&mut hasher, features);
            }
            None => hasher.update([0u8]),
        }

        InputSnapshot {
            mortality,
            population,
            crosswalk,
            regions,
            group_boundaries,
            digest: Fingerprint(hasher.finalize().into()),
        }
    }

    pub fn digest(&self) -> Fingerprint {
        self.digest
    }
}

/// Knobs that change stage outputs
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub window: YearWindow,
    pub overrides: OverrideRules,
}

impl PipelineSettings {
    fn digest(&self) -> Vec<u8> {
        // Serializing plain data structs cannot fail
        serde_json::to_vec(self).unwrap_or_default()
    }
}

// ============================================================================
// STAGE CACHE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Crosswalk,
    Table(GroupLevel),
    Geometry(GroupLevel),
    Dataset(GroupLevel),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub entries: usize,
}

/// Memoized stage outputs keyed by (stage, input fingerprint)
#[derive(Default)]
pub struct StageCache {
    entries: HashMap<(Stage, Fingerprint), Rc<dyn Any>>,
    hits: usize,
    misses: usize,
}

impl StageCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get<T: 'static>(&mut self, key: &(Stage, Fingerprint)) -> Option<Rc<T>> {
        let found = self.entries.get(key).cloned()?.downcast::<T>().ok()?;
        self.hits += 1;
        Some(found)
    }

    fn insert<T: 'static>(&mut self, key: (Stage, Fingerprint), value: Rc<T>) {
        self.misses += 1;
        self.entries.insert(key, value);
    }

    /// Drop every entry not computed from `current`
    pub fn retain_fingerprint(&mut self, current: Fingerprint) {
        self.entries.retain(|(_, fp), _| *fp == current);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
        }
    }
}

// ============================================================================
// CONSOLIDATED DATASET
// ============================================================================

/// One output row per group key: statistics, geometry and labels together
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidatedRow {
    pub group_key: String,
    pub display_name: String,
    pub parent_group: Option<String>,
    pub deaths: BTreeMap<i32, u64>,
    pub population: BTreeMap<i32, u64>,
    pub rates: BTreeMap<i32, f64>,
    pub mean_rate: f64,
    pub delta_pct: f64,
    pub deaths_delta_pct: f64,
    pub geometry: Option<MultiPolygon<f64>>,

    /// Set when the key came through the crosswalk from a geometry label
    pub resolution: Option<ResolutionMethod>,
}

impl ConsolidatedRow {
    pub fn deaths_in(&self, year: i32) -> u64 {
        self.deaths.get(&year).copied().unwrap_or(0)
    }

    pub fn rate_in(&self, year: i32) -> f64 {
        self.rates.get(&year).copied().unwrap_or(0.0)
    }

    pub fn total_deaths(&self) -> u64 {
        self.deaths.values().sum()
    }
}

#[derive(Debug, Clone)]
pub struct ConsolidatedDataset {
    pub level: GroupLevel,
    pub window: YearWindow,
    pub rows: Vec<ConsolidatedRow>,
}

impl ConsolidatedDataset {
    pub fn row(&self, key: &str) -> Option<&ConsolidatedRow> {
        self.rows.iter().find(|r| r.group_key == key)
    }

    pub fn keys(&self) -> BTreeSet<&str> {
        self.rows.iter().map(|r| r.group_key.as_str()).collect()
    }

    /// Color scale over the observed mean-rate range
    pub fn mean_rate_scale(&self) -> ColorScale {
        ColorScale::from_values(self.rows.iter().map(|r| r.mean_rate))
    }

    pub fn summary(&self) -> String {
        let with_geometry = self.rows.iter().filter(|r| r.geometry.is_some()).count();
        format!(
            "{}: {} rows ({} with geometry), {} deaths {}-{}",
            self.level.title(),
            self.rows.len(),
            with_geometry,
            self.rows.iter().map(|r| r.total_deaths()).sum::<u64>(),
            self.window.first,
            self.window.last()
        )
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    snapshot: InputSnapshot,
    settings: PipelineSettings,
    fingerprint: Fingerprint,
    cache: RefCell<StageCache>,
}

impl Pipeline {
    pub fn new(snapshot: InputSnapshot, settings: PipelineSettings) -> Self {
        let fingerprint = Self::fingerprint_of(&snapshot, &settings);
        info!(fingerprint = %fingerprint.short(), "pipeline ready");
        Pipeline {
            snapshot,
            settings,
            fingerprint,
            cache: RefCell::new(StageCache::new()),
        }
    }

    fn fingerprint_of(snapshot: &InputSnapshot, settings: &PipelineSettings) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(snapshot.digest().0);
        hasher.update(settings.digest());
        Fingerprint(hasher.finalize().into())
    }

    /// Swap in a new snapshot; cached stages from the old one are evicted
    pub fn replace_snapshot(&mut self, snapshot: InputSnapshot) {
        self.snapshot = snapshot;
        self.refresh();
    }

    pub fn replace_settings(&mut self, settings: PipelineSettings) {
        self.settings = settings;
        self.refresh();
    }

    fn refresh(&mut self) {
        let next = Self::fingerprint_of(&self.snapshot, &self.settings);
        if next != self.fingerprint {
            info!(from = %self.fingerprint.short(), to = %next.short(), "inputs changed; evicting cached stages");
            self.fingerprint = next;
        }
        self.cache.get_mut().retain_fingerprint(next);
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn snapshot(&self) -> &InputSnapshot {
        &self.snapshot
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.borrow().stats()
    }

    /// Compute once per (stage, fingerprint). The borrow is released while
    /// `compute` runs, since stages call other stages.
    fn memoized<T: 'static>(&self, stage: Stage, compute: impl FnOnce() -> T) -> Rc<T> {
        let key = (stage, self.fingerprint);
        if let Some(hit) = self.cache.borrow_mut().get::<T>(&key) {
            debug!(?stage, "stage cache hit");
            return hit;
        }

        let value = Rc::new(compute());
        self.cache.borrow_mut().insert(key, value.clone());
        value
    }

    // ------------------------------------------------------------------------
    // Stages
    // ------------------------------------------------------------------------

    /// Crosswalk over the statistics-side group labels
    pub fn crosswalk(&self) -> Rc<RegionCrosswalk> {
        self.memoized(Stage::Crosswalk, || {
            RegionCrosswalk::new(
                self.snapshot.crosswalk.iter().map(|e| e.group_label.as_str()),
                self.settings.overrides.clone(),
            )
        })
    }

    pub fn table(&self, level: GroupLevel) -> Rc<GroupTable> {
        self.memoized(Stage::Table(level), || {
            Aggregator::new(self.settings.window).aggregate(
                level,
                &self.snapshot.mortality,
                &self.snapshot.population,
                &self.snapshot.crosswalk,
            )
        })
    }

    /// Geometry layer plus the crosswalk audit when a pre-built coarse layer
    /// was relabeled
    pub fn geometry(&self, level: GroupLevel) -> Rc<(GeometryLayer, Option<CrosswalkReport>)> {
        self.memoized(Stage::Geometry(level), || match level {
            GroupLevel::Region => (GeometryAssembler::regions(&self.snapshot.regions), None),
            GroupLevel::Group => match &self.snapshot.group_boundaries {
                Some(features) => {
                    let (layer, report) = GeometryAssembler::relabel(features, &self.crosswalk());
                    (layer, Some(report))
                }
                None => {
                    // Only regions that appear in the statistics are dissolved
                    let table = self.table(GroupLevel::Region);
                    let regions = self.geometry(GroupLevel::Region);
                    let observed = GeometryLayer {
                        level: GroupLevel::Region,
                        features: regions
                            .0
                            .features
                            .iter()
                            .filter(|(code, _)| table.series_for(code).is_some())
                            .map(|(code, g)| (code.clone(), g.clone()))
                            .collect(),
                    };
                    let membership = GroupMembership::from_entries(&self.snapshot.crosswalk);
                    (GeometryAssembler::dissolve_groups(&observed, &membership), None)
                }
            },
        })
    }

    /// Audit of geometry-label resolution (empty when groups were dissolved)
    pub fn crosswalk_report(&self) -> CrosswalkReport {
        self.geometry(GroupLevel::Group)
            .1
            .clone()
            .unwrap_or_default()
    }

    /// One row per statistics key with its geometry attached. Unmatched
    /// features of a pre-built coarse layer are kept as zero rows.
    pub fn dataset(&self, level: GroupLevel) -> Rc<ConsolidatedDataset> {
        self.memoized(Stage::Dataset(level), || {
            let table = self.table(level);
            let geometry = self.geometry(level);
            let membership = GroupMembership::from_entries(&self.snapshot.crosswalk);
            let keep_unmatched = geometry.1.is_some();
            consolidate(&table, &geometry.0, &membership, keep_unmatched)
        })
    }

    pub fn color_scale(&self, level: GroupLevel) -> ColorScale {
        self.dataset(level).mean_rate_scale()
    }
}

/// Join a zero-filled table with a geometry layer by group key.
///
/// Rows are the table keys; keys present only in the table get no geometry.
/// With `keep_unmatched`, keys present only in the layer are added with zero
/// statistics, otherwise they are dropped.
pub fn consolidate(
    table: &GroupTable,
    layer: &GeometryLayer,
    membership: &GroupMembership,
    keep_unmatched: bool,
) -> ConsolidatedDataset {
    let mut keys: BTreeSet<&String> = table.keys().collect();
    if keep_unmatched {
        keys.extend(layer.keys());
    } else {
        let dropped = layer.keys().filter(|k| !keys.contains(k)).count();
        if dropped > 0 {
            debug!(dropped, level = table.level.as_str(), "geometry without statistics left out");
        }
    }
    let years: Vec<i32> = table.window.years().collect();

    let rows: Vec<ConsolidatedRow> = keys
        .into_iter()
        .map(|key| {
            let feature = layer.get(key);
            let series = table.series_for(key);

            let mut deaths = BTreeMap::new();
            let mut population = BTreeMap::new();
            let mut rates = BTreeMap::new();
            for &year in &years {
                let stat = table.stat(key, year);
                deaths.insert(year, stat.map(|s| s.deaths).unwrap_or(0));
                population.insert(year, stat.map(|s| s.population).unwrap_or(0));
                rates.insert(year, stat.map(|s| s.rate).unwrap_or(0.0));
            }

            let (display_name, parent_group) = match table.level {
                GroupLevel::Region => (
                    feature
                        .and_then(|f| f.name.clone())
                        .unwrap_or_else(|| key.clone()),
                    Some(membership.group_of(key).to_string()),
                ),
                GroupLevel::Group => (key.clone(), None),
            };

            ConsolidatedRow {
                group_key: key.clone(),
                display_name,
                parent_group,
                deaths,
                population,
                rates,
                mean_rate: series.map(|s| s.mean_rate).unwrap_or(0.0),
                delta_pct: series.map(|s| s.delta_pct).unwrap_or(0.0),
                deaths_delta_pct: series.map(|s| s.deaths_delta_pct).unwrap_or(0.0),
                geometry: feature.map(|f| f.geometry.clone()),
                resolution: feature.and_then(|f| f.resolution.clone()),
            }
        })
        .collect();

    let dataset = ConsolidatedDataset {
        level: table.level,
        window: table.window,
        rows,
    };
    info!("{}", dataset.summary());
    dataset
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::UNASSIGNED_GROUP;
    use geo::{polygon, Area};

    fn square(x: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: x, y: 0.0),
            (x: x + size, y: 0.0),
            (x: x + size, y: size),
            (x: x, y: size),
        ]])
    }

    fn deaths(year: i32, code: &str, n: u64) -> MortalityRecord {
        MortalityRecord { year, region_code: code.to_string(), death_count: n }
    }

    fn pop(year: i32, code: &str, n: u64) -> PopulationRecord {
        PopulationRecord { year, region_code: code.to_string(), population: n }
    }

    fn member(code: &str, group: &str) -> CrosswalkEntry {
        CrosswalkEntry { region_code: code.to_string(), group_label: group.to_string() }
    }

    fn snapshot(group_boundaries: Option<Vec<GeometryFeature>>) -> InputSnapshot {
        InputSnapshot::new(
            vec![deaths(2022, "1", 10), deaths(2024, "1", 20), deaths(2023, "2", 5)],
            vec![
                pop(2022, "1", 100_000),
                pop(2024, "1", 100_000),
                pop(2022, "2", 50_000),
                pop(2023, "3", 10_000),
            ],
            vec![
                member("1", "SAO BERNADO DO CAMPO"),
                member("2", "SAO BERNADO DO CAMPO"),
                member("4", "CAMPINAS"),
            ],
            vec![
                GeometryFeature::new("1", square(0.0, 1.0)).with_name("São Bernardo do Campo"),
                GeometryFeature::new("2", square(2.0, 1.0)).with_name("Diadema"),
                GeometryFeature::new("5", square(4.0, 1.0)).with_name("Ilhabela"),
            ],
            group_boundaries,
        )
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            window: YearWindow::default(),
            overrides: OverrideRules::with_defaults(),
        }
    }

    #[test]
    fn test_region_dataset_follows_statistics_keys() {
        let pipeline = Pipeline::new(snapshot(None), settings());
        let dataset = pipeline.dataset(GroupLevel::Region);

        // stats keys 1,2,3,4; geometry-only 5 is dropped
        let keys: Vec<&str> = dataset.keys().into_iter().collect();
        assert_eq!(keys, vec!["1", "2", "3", "4"]);
        assert!(dataset.row("5").is_none());

        let sbc = dataset.row("1").unwrap();
        assert_eq!(sbc.display_name, "São Bernardo do Campo");
        assert_eq!(sbc.parent_group.as_deref(), Some("SAO BERNADO DO CAMPO"));
        assert_eq!(sbc.rate_in(2022), 10.0);
        assert_eq!(sbc.rate_in(2024), 20.0);
        assert!((sbc.delta_pct - 100.0).abs() < 1e-9);

        let no_geometry = dataset.row("3").unwrap();
        assert!(no_geometry.geometry.is_none());
        assert_eq!(no_geometry.display_name, "3");
        assert_eq!(no_geometry.parent_group.as_deref(), Some(UNASSIGNED_GROUP));
    }

    #[test]
    fn test_group_dataset_dissolves_members() {
        let pipeline = Pipeline::new(snapshot(None), settings());
        let dataset = pipeline.dataset(GroupLevel::Group);

        let sbc = dataset.row("SAO BERNADO DO CAMPO").unwrap();
        assert_eq!(sbc.deaths_in(2022), 10);
        assert_eq!(sbc.deaths_in(2023), 5);
        assert_eq!(sbc.population[&2022], 150_000);
        let area = sbc.geometry.as_ref().unwrap().unsigned_area();
        assert!((area - 2.0).abs() < 1e-9);

        // CAMPINAS has a crosswalk entry but no data or geometry
        let campinas = dataset.row("CAMPINAS").unwrap();
        assert!(campinas.geometry.is_none());
        assert_eq!(campinas.total_deaths(), 0);

        // region 3 (population only) has no group; geometry-only 5 is not dissolved in
        let unassigned = dataset.row(UNASSIGNED_GROUP).unwrap();
        assert!(unassigned.geometry.is_none());
    }

    #[test]
    fn test_dataset_keys_match_table_keys() {
        let snapshot = InputSnapshot::new(
            vec![deaths(2022, "1", 3)],
            vec![pop(2022, "1", 1_000)],
            vec![member("1", "G")],
            vec![
                GeometryFeature::new("1", square(0.0, 1.0)),
                GeometryFeature::new("99", square(5.0, 1.0)),
            ],
            None,
        );
        let pipeline = Pipeline::new(snapshot, settings());

        for level in [GroupLevel::Region, GroupLevel::Group] {
            let dataset = pipeline.dataset(level);
            let table = pipeline.table(level);
            let dataset_keys: Vec<&str> = dataset.keys().into_iter().collect();
            let table_keys: Vec<&str> = table.keys().map(String::as_str).collect();
            assert_eq!(dataset_keys, table_keys);
        }

        assert_eq!(pipeline.dataset(GroupLevel::Region).keys().into_iter().collect::<Vec<_>>(), vec!["1"]);
        let groups = pipeline.dataset(GroupLevel::Group);
        assert_eq!(groups.keys().into_iter().collect::<Vec<_>>(), vec!["G"]);
        let area = groups.row("G").unwrap().geometry.as_ref().unwrap().unsigned_area();
        assert!((area - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_prebuilt_layer_merges_misspelled_group() {
        let prebuilt = vec![
            GeometryFeature::new("SAO BERNARDO DO CAMPO", square(0.0, 3.0)),
            GeometryFeature::new("Campinas", square(10.0, 1.0)),
            GeometryFeature::new("Serra do Mar", square(20.0, 1.0)),
        ];
        let pipeline = Pipeline::new(snapshot(Some(prebuilt)), settings());
        let dataset = pipeline.dataset(GroupLevel::Group);

        assert!(dataset.row("SAO BERNARDO DO CAMPO").is_none());
        let sbc = dataset.row("SAO BERNADO DO CAMPO").unwrap();
        assert_eq!(sbc.deaths_in(2022), 10);
        assert!(sbc.geometry.is_some());
        assert!(matches!(sbc.resolution, Some(ResolutionMethod::Override { .. })));

        // Unmatched geometry is retained with zero statistics
        let serra = dataset.row("Serra do Mar").unwrap();
        assert_eq!(serra.mean_rate, 0.0);
        assert_eq!(serra.resolution, Some(ResolutionMethod::Fallback));

        let report = pipeline.crosswalk_report();
        assert_eq!(report.unresolved().count(), 1);
    }

    #[test]
    fn test_stages_are_memoized() {
        let pipeline = Pipeline::new(snapshot(None), settings());

        let first = pipeline.table(GroupLevel::Group);
        let second = pipeline.table(GroupLevel::Group);
        assert!(Rc::ptr_eq(&first, &second));

        let _ = pipeline.dataset(GroupLevel::Group);
        let _ = pipeline.dataset(GroupLevel::Group);
        let stats = pipeline.cache_stats();
        assert!(stats.hits >= 2);
    }

    #[test]
    fn test_replacing_snapshot_invalidates_cache() {
        let mut pipeline = Pipeline::new(snapshot(None), settings());
        let before = pipeline.table(GroupLevel::Region);
        let old_fingerprint = pipeline.fingerprint();

        // Same content: fingerprint and cache survive
        pipeline.replace_snapshot(snapshot(None));
        assert_eq!(pipeline.fingerprint(), old_fingerprint);
        assert!(Rc::ptr_eq(&before, &pipeline.table(GroupLevel::Region)));

        // Different content: recomputed
        let mut changed = snapshot(None);
        changed.mortality.push(deaths(2022, "9", 1));
        let changed = InputSnapshot::new(
            changed.mortality,
            changed.population,
            changed.crosswalk,
            changed.regions,
            None,
        );
        pipeline.replace_snapshot(changed);
        assert_ne!(pipeline.fingerprint(), old_fingerprint);
        let after = pipeline.table(GroupLevel::Region);
        assert!(!Rc::ptr_eq(&before, &after));
        assert!(after.series_for("9").is_some());
        assert_eq!(pipeline.cache_stats().entries, 1);
    }

    #[test]
    fn test_settings_change_fingerprint() {
        let mut pipeline = Pipeline::new(snapshot(None), settings());
        let before = pipeline.fingerprint();
        pipeline.replace_settings(PipelineSettings {
            window: YearWindow::new(2023, 2).unwrap(),
            overrides: OverrideRules::with_defaults(),
        });
        assert_ne!(pipeline.fingerprint(), before);
        assert_eq!(pipeline.table(GroupLevel::Region).window.first, 2023);
    }

    #[test]
    fn test_color_scale_uses_dataset_range() {
        let pipeline = Pipeline::new(snapshot(None), settings());
        let scale = pipeline.color_scale(GroupLevel::Region);
        assert_eq!(scale.min(), 0.0);
        assert!(scale.max() > 0.0);
    }
}
