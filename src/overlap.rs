use geo::{Area, BooleanOps, BoundingRect, Intersects, MultiPolygon};

use crate::geometry;

// Relative area change below which a difference counts as a no-op
const AREA_EPSILON: f64 = 1e-9;

/// Makes the collection non-overlapping by cutting every polygon back to the
/// area no later polygon claims.
///
/// For each `i` in order and each `j > i`, polygon `i` becomes `i − j`
/// whenever the two share area. Polygon `j` is still untouched at that point
/// (it is only cut once the outer loop reaches it), so each polygon loses
/// exactly what its successors cover in their original extent. Polygons may
/// end up empty. Pairs that only touch keep their original geometry.
pub fn remove_overlaps(mut polygons: Vec<MultiPolygon<f64>>) -> Vec<MultiPolygon<f64>> {
    let bounds = polygons.iter().map(|p| p.bounding_rect()).collect::<Vec<_>>();

    for i in 0..polygons.len() {
        for j in (i + 1)..polygons.len() {
            let (Some(a), Some(b)) = (bounds[i], bounds[j]) else {
                continue;
            };
            if !a.intersects(&b) || !polygons[i].intersects(&polygons[j]) {
                continue;
            }

            let before = polygons[i].unsigned_area();
            let cut = polygons[i].difference(&polygons[j]);
            if before - cut.unsigned_area() > AREA_EPSILON * before {
                polygons[i] = cut;
            }
        }
    }

    polygons
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoverageSummary {
    pub polygons: usize,
    /// Polygons left without any area.
    pub consumed: usize,
    /// Sum of geodesic areas in square metres.
    pub total_area_m2: f64,
}

pub fn coverage_summary(polygons: &[MultiPolygon<f64>]) -> CoverageSummary {
    let areas = polygons.iter().map(geometry::area_m2).collect::<Vec<_>>();
    CoverageSummary {
        polygons: polygons.len(),
        consumed: areas.iter().filter(|&&a| a <= 0.0).count(),
        total_area_m2: areas.iter().sum(),
    }
}
