use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};

use crate::osm::Tags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Water,
    Green,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Water => "water",
            Category::Green => "green",
        }
    }
}

/// Tag rule set: a key present with any value, or a key with one of the
/// listed values.
struct TagRules {
    any_value: HashSet<&'static str>,
    values: HashMap<&'static str, HashSet<&'static str>>,
}

impl TagRules {
    fn new() -> Self {
        Self {
            any_value: HashSet::new(),
            values: HashMap::new(),
        }
    }

    fn any(mut self, key: &'static str) -> Self {
        self.any_value.insert(key);
        self
    }

    fn one_of(mut self, key: &'static str, values: &[&'static str]) -> Self {
        self.values
            .entry(key)
            .or_default()
            .extend(values.iter().copied());
        self
    }

    fn matches(&self, tags: &Tags) -> bool {
        self.any_value.iter().any(|key| tags.contains_key(*key))
            || self.values.iter().any(|(key, allowed)| {
                tags.get(*key)
                    .map_or(false, |value| allowed.contains(value.as_str()))
            })
    }
}

lazy_static! {
    static ref WATER: TagRules = TagRules::new()
        .one_of("natural", &["water"])
        .any("waterway")
        .one_of("landuse", &["reservoir", "basin"])
        .one_of("water", &["lake", "river", "pond"]);
    static ref GREEN: TagRules = TagRules::new()
        .one_of(
            "landuse",
            &["grass", "meadow", "forest", "greenfield", "cemetery", "recreation_ground"],
        )
        .one_of(
            "leisure",
            &["park", "garden", "playground", "sports_centre", "pitch", "golf_course"],
        )
        .one_of("natural", &["wood"])
        .one_of("amenity", &["grave_yard"]);
}

pub fn is_water(tags: &Tags) -> bool {
    WATER.matches(tags)
}

pub fn is_green(tags: &Tags) -> bool {
    GREEN.matches(tags)
}

/// Water takes precedence over green; `None` for everything else.
pub fn classify(tags: &Tags) -> Option<Category> {
    if is_water(tags) {
        Some(Category::Water)
    } else if is_green(tags) {
        Some(Category::Green)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn water_rules() {
        for pairs in [
            vec![("natural", "water")],
            vec![("waterway", "stream")],
            vec![("waterway", "anything")],
            vec![("landuse", "reservoir")],
            vec![("landuse", "basin")],
            vec![("water", "pond")],
        ] {
            assert_eq!(classify(&tags(&pairs)), Some(Category::Water), "{pairs:?}");
        }
    }

    #[test]
    fn green_rules() {
        for pairs in [
            vec![("leisure", "park")],
            vec![("leisure", "golf_course")],
            vec![("landuse", "cemetery")],
            vec![("landuse", "recreation_ground")],
            vec![("natural", "wood")],
            vec![("amenity", "grave_yard")],
        ] {
            assert_eq!(classify(&tags(&pairs)), Some(Category::Green), "{pairs:?}");
        }
    }

    #[test]
    fn water_wins_over_green() {
        let both = tags(&[("leisure", "park"), ("natural", "water")]);
        assert_eq!(classify(&both), Some(Category::Water));
        assert!(is_green(&both));
    }

    #[test]
    fn tag_order_does_not_matter() {
        let forward = tags(&[("name", "See"), ("leisure", "park"), ("water", "lake")]);
        let backward = tags(&[("water", "lake"), ("leisure", "park"), ("name", "See")]);
        assert_eq!(classify(&forward), classify(&backward));
    }

    #[test]
    fn unrelated_tags_are_discarded() {
        assert_eq!(classify(&tags(&[("highway", "footway")])), None);
        assert_eq!(classify(&tags(&[("natural", "tree")])), None);
        assert_eq!(classify(&tags(&[("landuse", "residential")])), None);
        assert_eq!(classify(&Tags::new()), None);
    }
}
