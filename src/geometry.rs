use geo::{BooleanOps, GeodesicArea, Geometry, MultiPolygon};

/// Polygonal geometries as a multipolygon, anything else is `None`.
pub fn to_multipolygon(geometry: Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(polygon) => Some(MultiPolygon::new(vec![polygon])),
        Geometry::MultiPolygon(multi) => Some(multi),
        Geometry::GeometryCollection(collection) => {
            let polygons = collection
                .into_iter()
                .filter_map(to_multipolygon)
                .flat_map(|multi| multi.0)
                .collect::<Vec<_>>();
            if polygons.is_empty() {
                None
            } else {
                Some(MultiPolygon::new(polygons))
            }
        }
        _ => None,
    }
}

/// Union of all polygons, merged pairwise so each boolean operation works on
/// operands of similar size.
pub fn union_all(mut layers: Vec<MultiPolygon<f64>>) -> MultiPolygon<f64> {
    if layers.is_empty() {
        return MultiPolygon::new(vec![]);
    }

    while layers.len() > 1 {
        let mut merged = Vec::with_capacity(layers.len() / 2 + 1);
        let mut iter = layers.into_iter();
        while let Some(first) = iter.next() {
            match iter.next() {
                Some(second) => merged.push(first.union(&second)),
                None => merged.push(first),
            }
        }
        layers = merged;
    }

    layers.pop().unwrap_or_else(|| MultiPolygon::new(vec![]))
}

/// Geodesic area in square metres on the WGS84 ellipsoid.
pub fn area_m2(geometry: &MultiPolygon<f64>) -> f64 {
    geometry.geodesic_area_unsigned()
}
