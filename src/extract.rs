//! Green space and water extraction.
//!
//! The extract is read in three passes over an [`ElementSource`]: relations
//! first, then ways, then nodes. Each pass only keeps what the classified
//! elements need, so memory grows with the matched subset and not with the
//! size of the extract.

use geo::{Coord, LineString, MultiPolygon};
use log::{debug, info};
use std::collections::{HashMap, HashSet};

use crate::classify::{self, Category};
use crate::error::Result;
use crate::geometry;
use crate::osm::{self, ElementKind, FeatureGeometry, Member, OsmElement, OsmId, Tags};
use crate::osm_reader::ElementSource;
use crate::progress::ProgressObserver;

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedFeature {
    pub id: OsmId,
    pub kind: ElementKind,
    pub category: Category,
    pub geometry: FeatureGeometry,
}

struct TaggedWay {
    id: OsmId,
    refs: Vec<OsmId>,
    tags: Tags,
    category: Category,
}

struct TaggedRelation {
    id: OsmId,
    members: Vec<Member>,
    category: Category,
}

/// Classified elements of an extract together with the node coordinates and
/// member ways needed to build their geometries.
pub struct OsmIndex {
    nodes: HashMap<OsmId, Coord<f64>>,
    member_ways: HashMap<OsmId, Vec<OsmId>>,
    ways: Vec<TaggedWay>,
    relations: Vec<TaggedRelation>,
}

impl OsmIndex {
    pub fn build(source: &dyn ElementSource, progress: &dyn ProgressObserver) -> Result<Self> {
        let mut relations = Vec::new();
        let mut wanted_ways = HashSet::new();
        progress.start("OSM relations", None);
        source.scan(ElementKind::Relation, &mut |element| {
            progress.advance(1);
            let OsmElement::Relation { id, members, tags } = element else {
                return;
            };
            if !osm::is_area_relation(&tags) {
                return;
            }
            if let Some(category) = classify::classify(&tags) {
                wanted_ways.extend(
                    members
                        .iter()
                        .filter(|m| m.kind == ElementKind::Way)
                        .map(|m| m.id),
                );
                relations.push(TaggedRelation {
                    id,
                    members,
                    category,
                });
            }
        })?;
        progress.finish();

        let mut ways = Vec::new();
        let mut member_ways = HashMap::new();
        let mut wanted_nodes = HashSet::new();
        progress.start("OSM ways", None);
        source.scan(ElementKind::Way, &mut |element| {
            progress.advance(1);
            let OsmElement::Way { id, refs, tags } = element else {
                return;
            };
            let category = classify::classify(&tags);
            let is_member = wanted_ways.contains(&id);
            if category.is_none() && !is_member {
                return;
            }
            wanted_nodes.extend(refs.iter().copied());
            if is_member {
                member_ways.insert(id, refs.clone());
            }
            if let Some(category) = category {
                ways.push(TaggedWay {
                    id,
                    refs,
                    tags,
                    category,
                });
            }
        })?;
        progress.finish();

        let mut nodes = HashMap::with_capacity(wanted_nodes.len());
        progress.start("OSM nodes", None);
        source.scan(ElementKind::Node, &mut |element| {
            progress.advance(1);
            if let OsmElement::Node { id, lon, lat } = element {
                if wanted_nodes.contains(&id) {
                    nodes.insert(id, Coord { x: lon, y: lat });
                }
            }
        })?;
        progress.finish();

        info!(
            "Indexed {} classified ways, {} classified relations, {} nodes",
            ways.len(),
            relations.len(),
            nodes.len()
        );
        Ok(Self {
            nodes,
            member_ways,
            ways,
            relations,
        })
    }

    pub fn into_features(self) -> FeatureIter {
        FeatureIter {
            nodes: self.nodes,
            member_ways: self.member_ways,
            ways: self.ways.into_iter(),
            relations: self.relations.into_iter(),
        }
    }
}

/// Lazily derives geometries, ways first and then relations. Elements whose
/// geometry cannot be built are skipped.
pub struct FeatureIter {
    nodes: HashMap<OsmId, Coord<f64>>,
    member_ways: HashMap<OsmId, Vec<OsmId>>,
    ways: std::vec::IntoIter<TaggedWay>,
    relations: std::vec::IntoIter<TaggedRelation>,
}

impl FeatureIter {
    fn relation_geometry(&self, relation: &TaggedRelation) -> Option<FeatureGeometry> {
        let members = relation
            .members
            .iter()
            .filter(|m| m.kind == ElementKind::Way)
            .filter_map(|m| {
                let coords = self
                    .member_ways
                    .get(&m.id)
                    .and_then(|refs| osm::resolve(refs, &self.nodes));
                if coords.is_none() {
                    debug!("Relation {} misses member way {}", relation.id, m.id);
                }
                coords.map(|coords| (m.role.clone(), coords))
            })
            .collect();
        osm::assemble_multipolygon(members).map(FeatureGeometry::Area)
    }
}

impl Iterator for FeatureIter {
    type Item = ClassifiedFeature;

    fn next(&mut self) -> Option<Self::Item> {
        for way in self.ways.by_ref() {
            match osm::way_geometry(&way.refs, &way.tags, &self.nodes) {
                Some(geometry) => {
                    return Some(ClassifiedFeature {
                        id: way.id,
                        kind: ElementKind::Way,
                        category: way.category,
                        geometry,
                    })
                }
                None => debug!("Skipping way {} without geometry", way.id),
            }
        }

        while let Some(relation) = self.relations.next() {
            match self.relation_geometry(&relation) {
                Some(geometry) => {
                    return Some(ClassifiedFeature {
                        id: relation.id,
                        kind: ElementKind::Relation,
                        category: relation.category,
                        geometry,
                    })
                }
                None => debug!("Skipping relation {} without closed rings", relation.id),
            }
        }

        None
    }
}

pub fn features(source: &dyn ElementSource, progress: &dyn ProgressObserver) -> Result<FeatureIter> {
    Ok(OsmIndex::build(source, progress)?.into_features())
}

#[derive(Debug, Default)]
pub struct ExtractedAreas {
    pub green: Vec<ClassifiedFeature>,
    pub water: Vec<ClassifiedFeature>,
}

impl ExtractedAreas {
    pub fn push(&mut self, feature: ClassifiedFeature) {
        match feature.category {
            Category::Green => self.green.push(feature),
            Category::Water => self.water.push(feature),
        }
    }

    /// Unions each bucket into a single layer. Line features carry no area
    /// and are counted but left out.
    pub fn unify(self) -> UnifiedAreas {
        let (green, green_lines) = unify_bucket(self.green);
        let (water, water_lines) = unify_bucket(self.water);
        UnifiedAreas {
            green,
            water,
            lines_dropped: green_lines + water_lines,
        }
    }
}

fn unify_bucket(features: Vec<ClassifiedFeature>) -> (Option<MultiPolygon<f64>>, usize) {
    let mut areas = Vec::new();
    let mut lines: Vec<LineString<f64>> = Vec::new();
    for feature in features {
        match feature.geometry {
            FeatureGeometry::Area(area) => areas.push(area),
            FeatureGeometry::Line(line) => lines.push(line),
        }
    }
    if areas.is_empty() {
        return (None, lines.len());
    }
    (Some(geometry::union_all(areas)), lines.len())
}

/// One unified layer per category, `None` when nothing area-like matched.
#[derive(Debug)]
pub struct UnifiedAreas {
    pub green: Option<MultiPolygon<f64>>,
    pub water: Option<MultiPolygon<f64>>,
    pub lines_dropped: usize,
}

impl UnifiedAreas {
    pub fn layer(&self, category: Category) -> Option<&MultiPolygon<f64>> {
        match category {
            Category::Green => self.green.as_ref(),
            Category::Water => self.water.as_ref(),
        }
    }
}

pub fn extract_areas(
    source: &dyn ElementSource,
    progress: &dyn ProgressObserver,
) -> Result<ExtractedAreas> {
    let mut areas = ExtractedAreas::default();
    for feature in features(source, progress)? {
        areas.push(feature);
    }
    info!(
        "Found {} green areas and {} water areas",
        areas.green.len(),
        areas.water.len()
    );
    Ok(areas)
}
