// 📊 Aggregator - per-group, per-year deaths, population and rates
//
// Relational steps, done explicitly:
//   1. key union: every group key seen in mortality, population or crosswalk
//   2. hash-join on (year, group_key) for deaths and population
//   3. zero-fill over keys × window years (nothing is dropped)
//   4. fixed-window series: mean rate and first→last delta
//
// Division policy:
//   rate  = deaths / population × 100000, or 0 when population is 0
//   delta = (last − first) / (first, or 1 when first is 0) × 100
//
// The substituted baseline of 1 means a delta from a zero first year is
// not a true percentage (0 → 5 reads as "500%"). Applied consistently.

use crate::error::AtlasError;
use crate::records::{CrosswalkEntry, GroupLevel, MortalityRecord, PopulationRecord, UNASSIGNED_GROUP};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{info, warn};

/// Deaths are expressed per this many inhabitants
pub const RATE_SCALE: f64 = 100_000.0;

// ============================================================================
// YEAR WINDOW
// ============================================================================

/// Fixed window of consecutive years, e.g. 2022..=2024
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct YearWindow {
    pub first: i32,
    pub count: u32,
}

impl YearWindow {
    pub fn new(first: i32, count: u32) -> Result<Self, AtlasError> {
        if count == 0 {
            return Err(AtlasError::InvalidConfig {
                message: "year window must cover at least one year".to_string(),
            });
        }
        if Self::checked_last(first, count).is_none() {
            return Err(AtlasError::InvalidConfig {
                message: format!("year window {first} + {count} years overflows"),
            });
        }
        Ok(YearWindow { first, count })
    }

    fn checked_last(first: i32, count: u32) -> Option<i32> {
        let span = i32::try_from(count.checked_sub(1)?).ok()?;
        first.checked_add(span)
    }

    /// Last year of the window; saturates for windows built without `new`
    pub fn last(&self) -> i32 {
        Self::checked_last(self.first, self.count.max(1)).unwrap_or(i32::MAX)
    }

    pub fn years(&self) -> impl Iterator<Item = i32> {
        self.first..=self.last()
    }

    pub fn contains(&self, year: i32) -> bool {
        year >= self.first && year <= self.last()
    }
}

impl Default for YearWindow {
    fn default() -> Self {
        YearWindow {
            first: 2022,
            count: 3,
        }
    }
}

// ============================================================================
// RATE POLICY
// ============================================================================

/// Deaths per 100k inhabitants; 0 when there is no population.
pub fn rate(deaths: u64, population: u64) -> f64 {
    if population == 0 {
        return 0.0;
    }
    deaths as f64 / population as f64 * RATE_SCALE
}

/// Percentage change with a baseline of 1 substituted for a zero first value.
pub fn delta_pct(first: f64, last: f64) -> f64 {
    let baseline = if first != 0.0 { first } else { 1.0 };
    (last - first) / baseline * 100.0
}

// ============================================================================
// GROUP MEMBERSHIP
// ============================================================================

/// region_code → group_label, derived from the crosswalk table
#[derive(Debug, Clone, Default)]
pub struct GroupMembership {
    by_region: HashMap<String, String>,
}

impl GroupMembership {
    pub fn from_entries(entries: &[CrosswalkEntry]) -> Self {
        let mut by_region: HashMap<String, String> = HashMap::new();

        for entry in entries {
            let group = entry.group_label.trim();
            if group.is_empty() {
                continue;
            }
            match by_region.get(&entry.region_code) {
                Some(existing) if existing != group => {
                    warn!(
                        region = %entry.region_code,
                        kept = %existing,
                        ignored = %group,
                        "region listed under two groups; first entry wins"
                    );
                }
                Some(_) => {}
                None => {
                    by_region.insert(entry.region_code.clone(), group.to_string());
                }
            }
        }

        GroupMembership { by_region }
    }

    /// Group of a region; regions missing from the crosswalk are unassigned.
    pub fn group_of(&self, region_code: &str) -> &str {
        self.by_region
            .get(region_code)
            .map(String::as_str)
            .unwrap_or(UNASSIGNED_GROUP)
    }

    pub fn contains(&self, region_code: &str) -> bool {
        self.by_region.contains_key(region_code)
    }

    pub fn groups(&self) -> BTreeSet<&str> {
        self.by_region.values().map(String::as_str).collect()
    }
}

// ============================================================================
// OUTPUT TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedStat {
    pub group_key: String,
    pub year: i32,
    pub deaths: u64,
    pub population: u64,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSeries {
    pub group_key: String,
    pub mean_rate: f64,
    pub rate_first: f64,
    pub rate_last: f64,
    pub delta_pct: f64,
    pub deaths_first: u64,
    pub deaths_last: u64,
    pub deaths_delta_pct: f64,
}

/// Zero-filled aggregate for one grouping level: keys × window years
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupTable {
    pub level: GroupLevel,
    pub window: YearWindow,

    /// Sorted by (group_key, year)
    pub stats: Vec<AggregatedStat>,

    pub series: BTreeMap<String, RateSeries>,
}

impl GroupTable {
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.series.keys()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn stat(&self, group_key: &str, year: i32) -> Option<&AggregatedStat> {
        // `stats` is sorted by (group_key, year)
        self.stats
            .binary_search_by(|s| s.group_key.as_str().cmp(group_key).then(s.year.cmp(&year)))
            .ok()
            .map(|i| &self.stats[i])
    }

    pub fn stats_for<'a>(&'a self, group_key: &'a str) -> impl Iterator<Item = &'a AggregatedStat> {
        self.stats.iter().filter(move |s| s.group_key == group_key)
    }

    pub fn series_for(&self, group_key: &str) -> Option<&RateSeries> {
        self.series.get(group_key)
    }

    /// (min, max) of the mean rate column; (0, 0) for an empty table
    pub fn mean_rate_range(&self) -> (f64, f64) {
        value_range(self.series.values().map(|s| s.mean_rate))
    }

    pub fn total_deaths(&self) -> u64 {
        self.stats.iter().map(|s| s.deaths).sum()
    }

    pub fn summary(&self) -> String {
        let (min, max) = self.mean_rate_range();
        format!(
            "{} table: {} keys × {} years ({}-{}), {} deaths, mean rate {:.2}..{:.2}",
            self.level.as_str(),
            self.len(),
            self.window.count,
            self.window.first,
            self.window.last(),
            self.total_deaths(),
            min,
            max
        )
    }
}

/// Min and max of finite values; (0, 0) when there are none
pub fn value_range<I: IntoIterator<Item = f64>>(values: I) -> (f64, f64) {
    values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<(f64, f64)>, v| match acc {
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            None => Some((v, v)),
        })
        .unwrap_or((0.0, 0.0))
}

// ============================================================================
// AGGREGATOR
// ============================================================================

pub struct Aggregator {
    window: YearWindow,
}

impl Aggregator {
    pub fn new(window: YearWindow) -> Self {
        Aggregator { window }
    }

    pub fn window(&self) -> YearWindow {
        self.window
    }

    /// Build the zero-filled table for one grouping level
    pub fn aggregate(
        &self,
        level: GroupLevel,
        mortality: &[MortalityRecord],
        population: &[PopulationRecord],
        crosswalk: &[CrosswalkEntry],
    ) -> GroupTable {
        let membership = GroupMembership::from_entries(crosswalk);
        let key_of = |code: &str| -> String {
            match level {
                GroupLevel::Region => code.to_string(),
                GroupLevel::Group => membership.group_of(code).to_string(),
            }
        };

        let keys = self.key_union(level, mortality, population, crosswalk, &membership);

        // Hash-join inputs on (year, group_key)
        let mut deaths: HashMap<(i32, String), u64> = HashMap::new();
        for record in mortality.iter().filter(|r| self.window.contains(r.year)) {
            *deaths.entry((record.year, key_of(&record.region_code))).or_insert(0) +=
                record.death_count;
        }

        let mut people: HashMap<(i32, String), u64> = HashMap::new();
        for record in population.iter().filter(|r| self.window.contains(r.year)) {
            *people.entry((record.year, key_of(&record.region_code))).or_insert(0) +=
                record.population;
        }

        let unassigned = keys.contains(UNASSIGNED_GROUP) && level == GroupLevel::Group;
        if unassigned {
            warn!("some regions have no crosswalk entry; aggregated under {UNASSIGNED_GROUP}");
        }

        let mut stats = Vec::with_capacity(keys.len() * self.window.count as usize);
        let mut series = BTreeMap::new();

        for key in keys {
            let per_year: Vec<AggregatedStat> = self
                .window
                .years()
                .map(|year| {
                    let lookup = (year, key.clone());
                    let d = deaths.get(&lookup).copied().unwrap_or(0);
                    let p = people.get(&lookup).copied().unwrap_or(0);
                    AggregatedStat {
                        group_key: key.clone(),
                        year,
                        deaths: d,
                        population: p,
                        rate: rate(d, p),
                    }
                })
                .collect();

            series.insert(key.clone(), self.series(&key, &per_year));
            stats.extend(per_year);
        }

        let table = GroupTable {
            level,
            window: self.window,
            stats,
            series,
        };
        info!("{}", table.summary());
        table
    }

    /// Every key seen in any source, for the given level
    fn key_union(
        &self,
        level: GroupLevel,
        mortality: &[MortalityRecord],
        population: &[PopulationRecord],
        crosswalk: &[CrosswalkEntry],
        membership: &GroupMembership,
    ) -> BTreeSet<String> {
        let codes = mortality
            .iter()
            .map(|r| r.region_code.as_str())
            .chain(population.iter().map(|r| r.region_code.as_str()));

        match level {
            GroupLevel::Region => codes
                .chain(crosswalk.iter().map(|e| e.region_code.as_str()))
                .map(str::to_string)
                .collect(),
            GroupLevel::Group => codes
                .map(|code| membership.group_of(code))
                .chain(membership.groups())
                .map(str::to_string)
                .collect(),
        }
    }

    fn series(&self, key: &str, per_year: &[AggregatedStat]) -> RateSeries {
        let n = per_year.len().max(1) as f64;
        let mean_rate = per_year.iter().map(|s| s.rate).sum::<f64>() / n;

        let first = per_year.first();
        let last = per_year.last();
        let rate_first = first.map(|s| s.rate).unwrap_or(0.0);
        let rate_last = last.map(|s| s.rate).unwrap_or(0.0);
        let deaths_first = first.map(|s| s.deaths).unwrap_or(0);
        let deaths_last = last.map(|s| s.deaths).unwrap_or(0);

        RateSeries {
            group_key: key.to_string(),
            mean_rate,
            rate_first,
            rate_last,
            delta_pct: delta_pct(rate_first, rate_last),
            deaths_first,
            deaths_last,
            deaths_delta_pct: delta_pct(deaths_first as f64, deaths_last as f64),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn deaths(year: i32, code: &str, n: u64) -> MortalityRecord {
        MortalityRecord {
            year,
            region_code: code.to_string(),
            death_count: n,
        }
    }

    fn pop(year: i32, code: &str, n: u64) -> PopulationRecord {
        PopulationRecord {
            year,
            region_code: code.to_string(),
            population: n,
        }
    }

    fn member(code: &str, group: &str) -> CrosswalkEntry {
        CrosswalkEntry {
            region_code: code.to_string(),
            group_label: group.to_string(),
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_region_a_scenario() {
        let aggregator = Aggregator::new(YearWindow::default());
        let mortality = vec![deaths(2022, "A", 10), deaths(2024, "A", 20)];
        let population = vec![pop(2022, "A", 100_000), pop(2024, "A", 100_000)];

        let table = aggregator.aggregate(GroupLevel::Region, &mortality, &population, &[]);

        assert_eq!(table.stat("A", 2022).unwrap().rate, 10.0);
        assert_eq!(table.stat("A", 2024).unwrap().rate, 20.0);

        let series = table.series_for("A").unwrap();
        assert!(approx(series.delta_pct, 100.0));
        assert!(approx(series.deaths_delta_pct, 100.0));
        // 2023 has no data and counts as a zero-rate year
        assert!(approx(series.mean_rate, 10.0));
    }

    #[test]
    fn test_region_b_missing_population_is_zero_rate() {
        let aggregator = Aggregator::new(YearWindow::default());
        let mortality = vec![deaths(2023, "B", 4)];
        let population = vec![pop(2022, "B", 50_000), pop(2024, "B", 50_000)];

        let table = aggregator.aggregate(GroupLevel::Region, &mortality, &population, &[]);
        let stat = table.stat("B", 2023).unwrap();

        assert_eq!(stat.population, 0);
        assert_eq!(stat.deaths, 4);
        assert_eq!(stat.rate, 0.0);
        assert!(table.stats.iter().all(|s| s.rate.is_finite() && s.rate >= 0.0));
    }

    #[test]
    fn test_rate_matches_formula() {
        let aggregator = Aggregator::new(YearWindow::default());
        let mortality = vec![deaths(2022, "X", 7), deaths(2023, "Y", 3)];
        let population = vec![pop(2022, "X", 350_000), pop(2023, "Y", 0)];

        let table = aggregator.aggregate(GroupLevel::Region, &mortality, &population, &[]);

        for s in &table.stats {
            if s.population == 0 {
                assert_eq!(s.rate, 0.0);
            } else {
                assert!(approx(s.rate, s.deaths as f64 / s.population as f64 * 100_000.0));
            }
        }
        assert!(approx(table.stat("X", 2022).unwrap().rate, 2.0));
    }

    #[test]
    fn test_zero_baseline_delta_uses_one() {
        assert!(approx(delta_pct(0.0, 5.0), 500.0));
        assert!(approx(delta_pct(0.0, 0.0), 0.0));
        assert!(approx(delta_pct(10.0, 5.0), -50.0));
    }

    #[test]
    fn test_key_union_covers_every_source() {
        let aggregator = Aggregator::new(YearWindow::default());
        let mortality = vec![deaths(2022, "M", 1)];
        let population = vec![pop(2022, "P", 10)];
        let crosswalk = vec![member("C", "G1"), member("P", "G2")];

        let regions = aggregator.aggregate(GroupLevel::Region, &mortality, &population, &crosswalk);
        let keys: Vec<&String> = regions.keys().collect();
        assert_eq!(keys, vec!["C", "M", "P"]);
        assert_eq!(regions.stats.len(), 3 * 3);

        let groups = aggregator.aggregate(GroupLevel::Group, &mortality, &population, &crosswalk);
        let keys: Vec<&String> = groups.keys().collect();
        // "M" has no crosswalk entry and lands in the unassigned group
        assert_eq!(keys, vec![UNASSIGNED_GROUP, "G1", "G2"]);
        assert_eq!(groups.stat(UNASSIGNED_GROUP, 2022).unwrap().deaths, 1);
    }

    #[test]
    fn test_group_level_sums_members() {
        let aggregator = Aggregator::new(YearWindow::new(2022, 1).unwrap());
        let mortality = vec![deaths(2022, "1", 3), deaths(2022, "2", 7)];
        let population = vec![pop(2022, "1", 40_000), pop(2022, "2", 60_000)];
        let crosswalk = vec![member("1", "North"), member("2", "North")];

        let table = aggregator.aggregate(GroupLevel::Group, &mortality, &population, &crosswalk);
        let stat = table.stat("North", 2022).unwrap();

        assert_eq!(stat.deaths, 10);
        assert_eq!(stat.population, 100_000);
        assert!(approx(stat.rate, 10.0));
    }

    #[test]
    fn test_records_outside_window_are_ignored_but_keyed() {
        let aggregator = Aggregator::new(YearWindow::default());
        let mortality = vec![deaths(2019, "OLD", 9)];

        let table = aggregator.aggregate(GroupLevel::Region, &mortality, &[], &[]);

        assert_eq!(table.len(), 1);
        assert_eq!(table.total_deaths(), 0);
        assert!(table.stat("OLD", 2019).is_none());
    }

    #[test]
    fn test_first_crosswalk_entry_wins() {
        let membership = GroupMembership::from_entries(&[member("1", "A"), member("1", "B")]);
        assert_eq!(membership.group_of("1"), "A");
        assert_eq!(membership.group_of("2"), UNASSIGNED_GROUP);
    }

    #[test]
    fn test_window_rejects_empty() {
        assert!(YearWindow::new(2022, 0).is_err());
        let w = YearWindow::new(2022, 3).unwrap();
        assert_eq!(w.years().collect::<Vec<_>>(), vec![2022, 2023, 2024]);
        assert_eq!(w.last(), 2024);
    }

    #[test]
    fn test_window_rejects_overflow() {
        assert!(YearWindow::new(i32::MAX, 2).is_err());
        assert!(YearWindow::new(0, u32::MAX).is_err());
        assert!(YearWindow::new(i32::MAX, 1).is_ok());

        // Deserialized windows bypass `new`; `last` must not wrap
        let raw = YearWindow { first: i32::MAX - 1, count: 10 };
        assert_eq!(raw.last(), i32::MAX);
        assert!(raw.contains(i32::MAX));
    }

    #[test]
    fn test_stat_lookup_by_key_and_year() {
        let aggregator = Aggregator::new(YearWindow::new(2022, 2).unwrap());
        let mortality: Vec<MortalityRecord> = (0..50)
            .map(|i| MortalityRecord { year: 2022 + (i % 2), region_code: format!("{i:03}"), death_count: i as u64 })
            .collect();
        let table = aggregator.aggregate(GroupLevel::Region, &mortality, &[], &[]);

        assert_eq!(table.stat("007", 2023).map(|s| s.deaths), Some(7));
        assert_eq!(table.stat("007", 2022).map(|s| s.deaths), Some(0));
        assert_eq!(table.stat("048", 2022).map(|s| s.deaths), Some(48));
        assert!(table.stat("007", 2024).is_none());
        assert!(table.stat("missing", 2022).is_none());
    }

    #[test]
    fn test_value_range() {
        assert_eq!(value_range(vec![]), (0.0, 0.0));
        assert_eq!(value_range(vec![3.0, f64::NAN, 1.0, 2.0]), (1.0, 3.0));
    }
}
