//! OSM element model and geometry derivation.

use geo::{Coord, Intersects, LineString, MultiPolygon, Polygon};
use log::debug;
use std::collections::{BTreeMap, HashMap};

pub type OsmId = i64;
pub type Tags = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Node,
    Way,
    Relation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub kind: ElementKind,
    pub id: OsmId,
    pub role: String,
}

/// Decoded element. Node tags are not kept: a single node never yields a
/// geometry that could be classified.
#[derive(Debug, Clone, PartialEq)]
pub enum OsmElement {
    Node {
        id: OsmId,
        lon: f64,
        lat: f64,
    },
    Way {
        id: OsmId,
        refs: Vec<OsmId>,
        tags: Tags,
    },
    Relation {
        id: OsmId,
        members: Vec<Member>,
        tags: Tags,
    },
}

impl OsmElement {
    pub fn kind(&self) -> ElementKind {
        match self {
            OsmElement::Node { .. } => ElementKind::Node,
            OsmElement::Way { .. } => ElementKind::Way,
            OsmElement::Relation { .. } => ElementKind::Relation,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureGeometry {
    Area(MultiPolygon<f64>),
    Line(LineString<f64>),
}

pub fn is_closed(refs: &[OsmId]) -> bool {
    refs.len() >= 4 && refs.first() == refs.last()
}

/// Closed ways describe areas unless tagged `area=no`.
pub fn is_area_way(refs: &[OsmId], tags: &Tags) -> bool {
    is_closed(refs) && tags.get("area").map(String::as_str) != Some("no")
}

pub fn is_area_relation(tags: &Tags) -> bool {
    tags.get("type").map(String::as_str) == Some("multipolygon")
}

/// Coordinates of all referenced nodes, `None` if any is unknown.
pub fn resolve(refs: &[OsmId], nodes: &HashMap<OsmId, Coord<f64>>) -> Option<Vec<Coord<f64>>> {
    refs.iter().map(|id| nodes.get(id).copied()).collect()
}

/// Polygon for area-like ways, line for the rest. `None` when the way has
/// missing nodes or too few of them.
pub fn way_geometry(
    refs: &[OsmId],
    tags: &Tags,
    nodes: &HashMap<OsmId, Coord<f64>>,
) -> Option<FeatureGeometry> {
    let coords = resolve(refs, nodes)?;
    if is_area_way(refs, tags) {
        let polygon = Polygon::new(LineString::new(coords), vec![]);
        Some(FeatureGeometry::Area(MultiPolygon::new(vec![polygon])))
    } else if coords.len() >= 2 {
        Some(FeatureGeometry::Line(LineString::new(coords)))
    } else {
        None
    }
}

fn is_ring(coords: &[Coord<f64>]) -> bool {
    coords.len() >= 4 && coords.first() == coords.last()
}

/// Joins way segments end to end into closed rings. Segments that cannot be
/// closed are dropped.
pub fn glue_rings(mut parts: Vec<Vec<Coord<f64>>>) -> Vec<LineString<f64>> {
    let mut rings = Vec::new();
    parts.retain(|part| {
        if is_ring(part) {
            rings.push(LineString::new(part.clone()));
            false
        } else {
            part.len() >= 2
        }
    });

    while let Some(mut current) = parts.pop() {
        let mut reversed = false;
        loop {
            if is_ring(&current) {
                rings.push(LineString::new(current));
                break;
            }

            let glue = current[current.len() - 1];
            if let Some(idx) = parts
                .iter()
                .position(|part| part[0] == glue || part[part.len() - 1] == glue)
            {
                let mut append = parts.swap_remove(idx);
                if append[0] != glue {
                    append.reverse();
                }
                current.extend(append.into_iter().skip(1));
            } else if !reversed {
                reversed = true;
                current.reverse();
            } else {
                debug!("Dropping unclosed ring of {} points", current.len());
                break;
            }
        }
    }

    rings
}

/// Builds a multipolygon from member way coordinates tagged with their role.
/// Inner rings go to the first outer ring they touch; members with an empty
/// role count as outer.
pub fn assemble_multipolygon(members: Vec<(String, Vec<Coord<f64>>)>) -> Option<MultiPolygon<f64>> {
    let (inner, outer): (Vec<_>, Vec<_>) = members
        .into_iter()
        .partition(|(role, _)| role == "inner");

    let outer = glue_rings(outer.into_iter().map(|(_, coords)| coords).collect());
    if outer.is_empty() {
        return None;
    }
    let inner = glue_rings(inner.into_iter().map(|(_, coords)| coords).collect());

    let mut holes: Vec<Vec<LineString<f64>>> = vec![Vec::new(); outer.len()];
    for ring in inner {
        let first = ring.0[0];
        if let Some(idx) = outer
            .iter()
            .position(|shell| Polygon::new(shell.clone(), vec![]).intersects(&first))
        {
            holes[idx].push(ring);
        }
    }

    Some(MultiPolygon::new(
        outer
            .into_iter()
            .zip(holes)
            .map(|(shell, holes)| Polygon::new(shell, holes))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;

    fn c(x: f64, y: f64) -> Coord<f64> {
        Coord { x, y }
    }

    fn nodes() -> HashMap<OsmId, Coord<f64>> {
        HashMap::from([
            (1, c(0.0, 0.0)),
            (2, c(1.0, 0.0)),
            (3, c(1.0, 1.0)),
            (4, c(0.0, 1.0)),
        ])
    }

    #[test]
    fn closed_way_is_area() {
        let geometry = way_geometry(&[1, 2, 3, 4, 1], &Tags::new(), &nodes()).unwrap();
        match geometry {
            FeatureGeometry::Area(area) => assert!((area.unsigned_area() - 1.0).abs() < 1e-12),
            other => panic!("expected area, got {other:?}"),
        }
    }

    #[test]
    fn area_no_keeps_line() {
        let tags = Tags::from([("area".to_string(), "no".to_string())]);
        assert!(matches!(
            way_geometry(&[1, 2, 3, 4, 1], &tags, &nodes()),
            Some(FeatureGeometry::Line(_))
        ));
    }

    #[test]
    fn open_way_is_line_and_missing_nodes_skip() {
        assert!(matches!(
            way_geometry(&[1, 2, 3], &Tags::new(), &nodes()),
            Some(FeatureGeometry::Line(_))
        ));
        assert!(way_geometry(&[1, 99], &Tags::new(), &nodes()).is_none());
        assert!(way_geometry(&[1], &Tags::new(), &nodes()).is_none());
    }

    #[test]
    fn glues_segments_in_any_direction() {
        let rings = glue_rings(vec![
            vec![c(0.0, 0.0), c(2.0, 0.0)],
            vec![c(2.0, 2.0), c(2.0, 0.0)],
            vec![c(2.0, 2.0), c(0.0, 2.0), c(0.0, 0.0)],
        ]);
        assert_eq!(rings.len(), 1);
        let polygon = Polygon::new(rings[0].clone(), vec![]);
        assert!((polygon.unsigned_area() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn unclosable_segments_are_dropped() {
        let rings = glue_rings(vec![vec![c(0.0, 0.0), c(1.0, 0.0)], vec![c(5.0, 5.0), c(6.0, 5.0)]]);
        assert!(rings.is_empty());
    }

    #[test]
    fn multipolygon_with_hole() {
        let outer = vec![c(0.0, 0.0), c(4.0, 0.0), c(4.0, 4.0), c(0.0, 4.0), c(0.0, 0.0)];
        let inner = vec![c(1.0, 1.0), c(2.0, 1.0), c(2.0, 2.0), c(1.0, 2.0), c(1.0, 1.0)];
        let island = vec![c(10.0, 10.0), c(11.0, 10.0), c(11.0, 11.0), c(10.0, 10.0)];

        let multi = assemble_multipolygon(vec![
            ("outer".into(), outer),
            ("inner".into(), inner),
            ("".into(), island),
        ])
        .unwrap();

        assert_eq!(multi.0.len(), 2);
        assert!((multi.unsigned_area() - (16.0 - 1.0 + 0.5)).abs() < 1e-12);
    }

    #[test]
    fn multipolygon_needs_an_outer_ring() {
        let inner = vec![c(1.0, 1.0), c(2.0, 1.0), c(2.0, 2.0), c(1.0, 1.0)];
        assert!(assemble_multipolygon(vec![("inner".into(), inner)]).is_none());
    }
}
