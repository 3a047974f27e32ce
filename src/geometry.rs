// 🗺️ Geometry Assembler - one geometry per group key per level
//
// Three ways to get there:
// - regions:  dedupe fine features by region code (first occurrence wins)
// - dissolve: union fine features that share a crosswalk group
// - relabel:  take a pre-built coarse layer, resolve each label through the
//             crosswalk, and carry the polygons as they are (no union)

use crate::aggregate::GroupMembership;
use crate::crosswalk::{CrosswalkReport, RegionCrosswalk, ResolutionMethod};
use crate::records::{GeometryFeature, GroupLevel};
use geo::{Area, BooleanOps, MultiPolygon};
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledGeometry {
    pub key: String,

    /// Display name carried over from the source, if any
    pub name: Option<String>,

    pub geometry: MultiPolygon<f64>,

    /// Number of source features folded into this geometry
    pub members: usize,

    /// How the key was obtained when it came through the crosswalk
    pub resolution: Option<ResolutionMethod>,
}

impl AssembledGeometry {
    pub fn area(&self) -> f64 {
        self.geometry.unsigned_area()
    }
}

/// Geometries for one grouping level, keyed by group key
#[derive(Debug, Clone)]
pub struct GeometryLayer {
    pub level: GroupLevel,
    pub features: BTreeMap<String, AssembledGeometry>,
}

impl GeometryLayer {
    pub fn get(&self, key: &str) -> Option<&AssembledGeometry> {
        self.features.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.features.keys()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Union of every geometry into one multipolygon
pub fn dissolve<'a, I>(geometries: I) -> MultiPolygon<f64>
where
    I: IntoIterator<Item = &'a MultiPolygon<f64>>,
{
    let mut iter = geometries.into_iter();
    let Some(first) = iter.next() else {
        return MultiPolygon(Vec::new());
    };

    iter.fold(first.clone(), |acc, next| acc.union(next))
}

pub struct GeometryAssembler;

impl GeometryAssembler {
    /// One representative geometry per region code; later duplicates are
    /// assumed congruent and dropped.
    pub fn regions(features: &[GeometryFeature]) -> GeometryLayer {
        let mut out: BTreeMap<String, AssembledGeometry> = BTreeMap::new();
        let mut duplicates = 0usize;

        for feature in features {
            if out.contains_key(&feature.label_or_code) {
                duplicates += 1;
                continue;
            }
            out.insert(
                feature.label_or_code.clone(),
                AssembledGeometry {
                    key: feature.label_or_code.clone(),
                    name: feature.name.clone(),
                    geometry: feature.geometry.clone(),
                    members: 1,
                    resolution: None,
                },
            );
        }

        if duplicates > 0 {
            debug!(duplicates, "dropped repeated region geometries");
        }
        info!("Region geometry: {} features", out.len());

        GeometryLayer {
            level: GroupLevel::Region,
            features: out,
        }
    }

    /// Dissolve region geometries into their crosswalk groups
    pub fn dissolve_groups(regions: &GeometryLayer, membership: &GroupMembership) -> GeometryLayer {
        let mut members: BTreeMap<String, Vec<&MultiPolygon<f64>>> = BTreeMap::new();
        for (code, region) in &regions.features {
            members
                .entry(membership.group_of(code).to_string())
                .or_default()
                .push(&region.geometry);
        }

        let features: BTreeMap<String, AssembledGeometry> = members
            .into_iter()
            .map(|(group, geoms)| {
                let count = geoms.len();
                let geometry = dissolve(geoms);
                (
                    group.clone(),
                    AssembledGeometry {
                        key: group.clone(),
                        name: Some(group),
                        geometry,
                        members: count,
                        resolution: None,
                    },
                )
            })
            .collect();

        info!("Group geometry: {} dissolved groups", features.len());

        GeometryLayer {
            level: GroupLevel::Group,
            features,
        }
    }

    /// Relabel a pre-built coarse layer through the crosswalk. Features that
    /// resolve to the same label are carried together, not unioned.
    pub fn relabel(
        features: &[GeometryFeature],
        crosswalk: &RegionCrosswalk,
    ) -> (GeometryLayer, CrosswalkReport) {
        let report = crosswalk.resolve_all(features.iter().map(|f| f.label_or_code.as_str()));
        let mut out: BTreeMap<String, AssembledGeometry> = BTreeMap::new();

        for (feature, resolution) in features.iter().zip(&report.resolutions) {
            match out.get_mut(&resolution.label) {
                Some(existing) => {
                    existing.geometry.0.extend(feature.geometry.0.iter().cloned());
                    existing.members += 1;
                }
                None => {
                    out.insert(
                        resolution.label.clone(),
                        AssembledGeometry {
                            key: resolution.label.clone(),
                            name: Some(resolution.label.clone()),
                            geometry: feature.geometry.clone(),
                            members: 1,
                            resolution: Some(resolution.method.clone()),
                        },
                    );
                }
            }
        }

        info!("{}", report.summary());

        (
            GeometryLayer {
                level: GroupLevel::Group,
                features: out,
            },
            report,
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crosswalk::OverrideRules;
    use crate::records::CrosswalkEntry;
    use geo::{polygon, Polygon};

    fn square(x: f64, y: f64, size: f64) -> MultiPolygon<f64> {
        let p: Polygon<f64> = polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
            (x: x, y: y),
        ];
        MultiPolygon(vec![p])
    }

    fn entry(code: &str, group: &str) -> CrosswalkEntry {
        CrosswalkEntry {
            region_code: code.to_string(),
            group_label: group.to_string(),
        }
    }

    #[test]
    fn test_regions_first_occurrence_wins() {
        let features = vec![
            GeometryFeature::new("1", square(0.0, 0.0, 1.0)).with_name("Primeiro"),
            GeometryFeature::new("1", square(5.0, 5.0, 2.0)).with_name("Segundo"),
            GeometryFeature::new("2", square(3.0, 0.0, 1.0)),
        ];

        let layer = GeometryAssembler::regions(&features);

        assert_eq!(layer.len(), 2);
        let first = layer.get("1").unwrap();
        assert_eq!(first.name.as_deref(), Some("Primeiro"));
        assert!((first.area() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_dissolve_disjoint_area_is_sum() {
        let a = square(0.0, 0.0, 1.0);
        let b = square(10.0, 10.0, 2.0);
        let c = square(-5.0, 3.0, 0.5);

        let merged = dissolve([&a, &b, &c]);
        let expected = a.unsigned_area() + b.unsigned_area() + c.unsigned_area();

        assert!((merged.unsigned_area() - expected).abs() < 1e-9);
        assert_eq!(merged.0.len(), 3);
    }

    #[test]
    fn test_dissolve_adjacent_squares() {
        let merged = dissolve([&square(0.0, 0.0, 1.0), &square(1.0, 0.0, 1.0)]);
        assert!((merged.unsigned_area() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_dissolve_empty() {
        assert!(dissolve(std::iter::empty()).0.is_empty());
    }

    #[test]
    fn test_dissolve_groups_by_crosswalk() {
        let regions = GeometryAssembler::regions(&[
            GeometryFeature::new("1", square(0.0, 0.0, 1.0)),
            GeometryFeature::new("2", square(2.0, 0.0, 1.0)),
            GeometryFeature::new("3", square(4.0, 0.0, 1.0)),
            GeometryFeature::new("4", square(6.0, 0.0, 1.0)),
        ]);
        let membership = GroupMembership::from_entries(&[
            entry("1", "Norte"),
            entry("2", "Norte"),
            entry("3", "Sul"),
        ]);

        let groups = GeometryAssembler::dissolve_groups(&regions, &membership);

        assert_eq!(groups.len(), 3);
        let norte = groups.get("Norte").unwrap();
        assert_eq!(norte.members, 2);
        assert!((norte.area() - 2.0).abs() < 1e-9);
        assert!(groups.get(crate::records::UNASSIGNED_GROUP).is_some());
    }

    #[test]
    fn test_relabel_prebuilt_layer() {
        let crosswalk = RegionCrosswalk::new(
            vec!["SAO BERNADO DO CAMPO", "CAMPINAS"],
            OverrideRules::with_defaults(),
        );
        let features = vec![
            GeometryFeature::new("SAO BERNARDO DO CAMPO", square(0.0, 0.0, 1.0)),
            GeometryFeature::new("Campinas", square(3.0, 0.0, 1.0)),
            GeometryFeature::new("Ilha Perdida", square(6.0, 0.0, 1.0)),
            GeometryFeature::new("campinas", square(9.0, 0.0, 1.0)),
        ];

        let (layer, report) = GeometryAssembler::relabel(&features, &crosswalk);

        assert_eq!(report.resolutions.len(), 4);
        assert_eq!(layer.len(), 3);
        assert!(layer.get("SAO BERNADO DO CAMPO").is_some());
        assert!(layer.get("SAO BERNARDO DO CAMPO").is_none());

        let campinas = layer.get("CAMPINAS").unwrap();
        assert_eq!(campinas.members, 2);
        assert_eq!(campinas.geometry.0.len(), 2);

        let lost = layer.get("Ilha Perdida").unwrap();
        assert_eq!(lost.resolution, Some(ResolutionMethod::Fallback));
    }
}
