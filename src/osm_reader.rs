//! Streaming element sources for OSM extracts.
//!
//! Each [`ElementSource::scan`] makes one pass over the input and hands out
//! the elements of a single kind, so a caller can collect relations, then
//! ways, then only the nodes those ways need.

use osmpbf::{Element, ElementReader, RelMemberType};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::osm::{ElementKind, Member, OsmElement, Tags};

pub trait ElementSource {
    fn scan(&self, kind: ElementKind, visit: &mut dyn FnMut(OsmElement)) -> Result<()>;
}

/// Picks the reader by file name: `.osm` and `.xml` are read as OSM XML,
/// everything else as PBF.
pub fn open_source(path: &Path) -> Result<Box<dyn ElementSource>> {
    if !path.exists() {
        return Err(Error::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "OSM extract not found"),
        ));
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if name.ends_with(".osm") || name.ends_with(".xml") {
        Ok(Box::new(XmlSource::new(path)))
    } else {
        Ok(Box::new(PbfSource::new(path)))
    }
}

impl ElementSource for [OsmElement] {
    fn scan(&self, kind: ElementKind, visit: &mut dyn FnMut(OsmElement)) -> Result<()> {
        self.iter()
            .filter(|element| element.kind() == kind)
            .cloned()
            .for_each(visit);
        Ok(())
    }
}

impl ElementSource for Vec<OsmElement> {
    fn scan(&self, kind: ElementKind, visit: &mut dyn FnMut(OsmElement)) -> Result<()> {
        self.as_slice().scan(kind, visit)
    }
}

pub struct PbfSource {
    path: PathBuf,
}

impl PbfSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn collect_tags<'a>(tags: impl Iterator<Item = (&'a str, &'a str)>) -> Tags {
    tags.map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

impl ElementSource for PbfSource {
    fn scan(&self, kind: ElementKind, visit: &mut dyn FnMut(OsmElement)) -> Result<()> {
        let reader = ElementReader::from_path(&self.path)?;
        reader.for_each(|element| match (kind, element) {
            (ElementKind::Node, Element::Node(n)) => visit(OsmElement::Node {
                id: n.id(),
                lon: n.lon(),
                lat: n.lat(),
            }),
            (ElementKind::Node, Element::DenseNode(n)) => visit(OsmElement::Node {
                id: n.id(),
                lon: n.lon(),
                lat: n.lat(),
            }),
            (ElementKind::Way, Element::Way(w)) => visit(OsmElement::Way {
                id: w.id(),
                refs: w.refs().collect(),
                tags: collect_tags(w.tags()),
            }),
            (ElementKind::Relation, Element::Relation(r)) => {
                let members = r
                    .members()
                    .map(|m| Member {
                        kind: match m.member_type {
                            RelMemberType::Node => ElementKind::Node,
                            RelMemberType::Way => ElementKind::Way,
                            RelMemberType::Relation => ElementKind::Relation,
                        },
                        id: m.member_id,
                        role: m.role().unwrap_or_default().to_string(),
                    })
                    .collect();
                visit(OsmElement::Relation {
                    id: r.id(),
                    members,
                    tags: collect_tags(r.tags()),
                })
            }
            _ => {}
        })?;
        Ok(())
    }
}

pub struct XmlSource {
    path: PathBuf,
}

impl XmlSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn attr(e: &BytesStart, name: &[u8]) -> Result<Option<String>> {
    for attribute in e.attributes() {
        let attribute = attribute.map_err(quick_xml::Error::from)?;
        if attribute.key.as_ref() == name {
            return Ok(Some(attribute.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn parsed<T: std::str::FromStr>(e: &BytesStart, name: &[u8]) -> Result<Option<T>> {
    Ok(attr(e, name)?.and_then(|raw| raw.parse().ok()))
}

fn member_kind(raw: &str) -> Option<ElementKind> {
    match raw {
        "node" => Some(ElementKind::Node),
        "way" => Some(ElementKind::Way),
        "relation" => Some(ElementKind::Relation),
        _ => None,
    }
}

/// Element under construction. `None` while inside an element that is
/// malformed or of another kind than the one being scanned.
fn open_element(e: &BytesStart, kind: ElementKind) -> Result<Option<OsmElement>> {
    let element = match (e.name().as_ref(), kind) {
        (b"node", ElementKind::Node) => {
            match (parsed(e, b"id")?, parsed(e, b"lon")?, parsed(e, b"lat")?) {
                (Some(id), Some(lon), Some(lat)) => Some(OsmElement::Node { id, lon, lat }),
                _ => None,
            }
        }
        (b"way", ElementKind::Way) => parsed(e, b"id")?.map(|id| OsmElement::Way {
            id,
            refs: Vec::new(),
            tags: Tags::new(),
        }),
        (b"relation", ElementKind::Relation) => {
            parsed(e, b"id")?.map(|id| OsmElement::Relation {
                id,
                members: Vec::new(),
                tags: Tags::new(),
            })
        }
        _ => None,
    };
    Ok(element)
}

fn add_child(e: &BytesStart, element: &mut OsmElement) -> Result<()> {
    match (e.name().as_ref(), element) {
        (b"tag", OsmElement::Way { tags, .. } | OsmElement::Relation { tags, .. }) => {
            if let (Some(k), Some(v)) = (attr(e, b"k")?, attr(e, b"v")?) {
                tags.insert(k, v);
            }
        }
        (b"nd", OsmElement::Way { refs, .. }) => {
            if let Some(node) = parsed(e, b"ref")? {
                refs.push(node);
            }
        }
        (b"member", OsmElement::Relation { members, .. }) => {
            let kind = attr(e, b"type")?.as_deref().and_then(member_kind);
            if let (Some(kind), Some(id)) = (kind, parsed(e, b"ref")?) {
                members.push(Member {
                    kind,
                    id,
                    role: attr(e, b"role")?.unwrap_or_default(),
                });
            }
        }
        _ => {}
    }
    Ok(())
}

fn is_element(name: &[u8]) -> bool {
    matches!(name, b"node" | b"way" | b"relation")
}

impl ElementSource for XmlSource {
    fn scan(&self, kind: ElementKind, visit: &mut dyn FnMut(OsmElement)) -> Result<()> {
        let mut reader = Reader::from_file(&self.path)?;
        reader.trim_text(true);

        let mut buf = Vec::new();
        let mut current: Option<OsmElement> = None;

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) if is_element(e.name().as_ref()) => {
                    current = open_element(&e, kind)?;
                }
                Event::Empty(e) if is_element(e.name().as_ref()) => {
                    if let Some(element) = open_element(&e, kind)? {
                        visit(element);
                    }
                }
                Event::Start(e) | Event::Empty(e) => {
                    if let Some(element) = current.as_mut() {
                        add_child(&e, element)?;
                    }
                }
                Event::End(e) if is_element(e.name().as_ref()) => {
                    if let Some(element) = current.take() {
                        visit(element);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        Ok(())
    }
}
