//! RDF (Turtle) metadata extractor.
//!
//! Triples are parsed with `oxttl` and grouped by subject. Predicate IRIs are
//! shortened to `prefix:local` names through [`NAMESPACES`], so the field
//! tables below are written against DCAT, Dublin Core, schema.org, FOAF,
//! vCard, LOCN, GeoSPARQL and W3C geo names. The dataset subject is the first
//! one typed as a dataset, else the first with a title, else the first seen.

use std::collections::HashMap;

use oxrdf::{Subject, Term};
use oxttl::{TurtleParseError, TurtleParser};

use super::geometry::parse_geometry;
use super::{strip_bom, Corners, MetadataDraft, MetadataExtractor};
use crate::error::{ExtractError, ParseError, SourceLocation};
use crate::models::DocumentFormat;
use crate::validation::ValidationMode;

const NAMESPACES: [(&str, &str); 15] = [
    ("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
    ("rdfs", "http://www.w3.org/2000/01/rdf-schema#"),
    ("dct", "http://purl.org/dc/terms/"),
    ("dc", "http://purl.org/dc/elements/1.1/"),
    ("dctype", "http://purl.org/dc/dcmitype/"),
    ("dcat", "http://www.w3.org/ns/dcat#"),
    ("schema", "http://schema.org/"),
    ("schema", "https://schema.org/"),
    ("foaf", "http://xmlns.com/foaf/0.1/"),
    ("vcard", "http://www.w3.org/2006/vcard/ns#"),
    ("locn", "http://www.w3.org/ns/locn#"),
    ("gsp", "http://www.opengis.net/ont/geosparql#"),
    ("geo", "http://www.w3.org/2003/01/geo/wgs84_pos#"),
    ("skos", "http://www.w3.org/2004/02/skos/core#"),
    ("time", "http://www.w3.org/2006/time#"),
];

const DATASET_TYPES: &[&str] = &["dcat:Dataset", "schema:Dataset", "dctype:Dataset"];

const TITLE: &[&str] = &["dct:title", "dc:title", "schema:name", "rdfs:label"];
const ABSTRACT: &[&str] = &[
    "dct:description",
    "dc:description",
    "schema:description",
    "dct:abstract",
];
const KEYWORDS: &[&str] = &["dcat:keyword", "schema:keywords", "dc:subject", "dct:subject"];
const AGENTS: &[&str] = &[
    "dcat:contactPoint",
    "dct:publisher",
    "dc:publisher",
    "schema:publisher",
    "dct:creator",
    "dc:creator",
    "schema:creator",
];
const AGENT_NAME: &[&str] = &[
    "foaf:name",
    "vcard:fn",
    "vcard:organization-name",
    "schema:name",
    "rdfs:label",
];
const EMAIL: &[&str] = &["vcard:hasEmail", "foaf:mbox", "schema:email"];
const METADATA_DATE: &[&str] = &[
    "dct:modified",
    "schema:dateModified",
    "dct:issued",
    "schema:datePublished",
    "dct:created",
    "dc:date",
];
const LANGUAGE: &[&str] = &["dct:language", "dc:language", "schema:inLanguage"];
const TOPIC: &[&str] = &["dcat:theme", "schema:about"];
const LABEL: &[&str] = &["skos:prefLabel", "rdfs:label", "schema:name", "foaf:name"];
const TEMPORAL: &[&str] = &["dct:temporal", "schema:temporalCoverage"];
const START_DATE: &[&str] = &["dcat:startDate", "schema:startDate"];
const END_DATE: &[&str] = &["dcat:endDate", "schema:endDate"];
const SPATIAL: &[&str] = &["dct:spatial", "schema:spatialCoverage"];
const GEOMETRY_LITERAL: &[&str] = &["dcat:bbox", "locn:geometry", "gsp:asWKT", "schema:box"];
const GEOMETRY_NODE: &[&str] = &["gsp:hasGeometry", "schema:geo", "locn:geometry"];
const DISTRIBUTION: &[&str] = &["dcat:distribution", "schema:distribution"];
const DOWNLOAD: &[&str] = &["dcat:downloadURL", "schema:contentUrl", "dcat:accessURL"];
const LANDING: &[&str] = &["dcat:landingPage", "foaf:homepage", "schema:url"];

pub struct RdfExtractor {
    mode: ValidationMode,
}

impl RdfExtractor {
    pub fn new(mode: ValidationMode) -> Self {
        Self { mode }
    }
}

impl MetadataExtractor for RdfExtractor {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Rdf
    }

    fn mode(&self) -> ValidationMode {
        self.mode
    }

    fn describe(&self) -> &'static str {
        "RDF (Turtle)"
    }

    fn map_document(&self, raw: &str) -> Result<MetadataDraft, ExtractError> {
        let graph = Graph::parse(raw)?;
        let mut draft = MetadataDraft::default();
        if let Some(subject) = graph.dataset_subject() {
            map_subject(&graph, subject, &mut draft);
        }
        Ok(draft)
    }
}

/// Well-formedness check used by the fetcher.
pub fn check_syntax(bytes: &[u8]) -> Result<(), ParseError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| ParseError::new(DocumentFormat::Rdf, "document is not valid UTF-8"))?;
    Graph::parse(text).map(|_| ())
}

fn map_subject(graph: &Graph, subject: &str, draft: &mut MetadataDraft) {
    draft.set_title(graph.text(subject, TITLE));
    draft.set_abstract(graph.text(subject, ABSTRACT));

    for object in graph.objects(subject, KEYWORDS) {
        if let Some(keyword) = graph.label_of(object) {
            draft.add_keyword(&keyword);
        }
    }

    for agent in graph.objects(subject, AGENTS) {
        match agent {
            Object::Literal(name) => draft.set_contact_organization(Some(name.clone())),
            Object::Resource(node) => {
                draft.set_contact_organization(graph.text(node, AGENT_NAME));
                draft.set_contact_email(graph.text_or_iri(node, EMAIL));
            }
        }
    }
    draft.set_contact_email(graph.text_or_iri(subject, &["schema:email"]));

    draft.set_metadata_date(graph.text(subject, METADATA_DATE).as_deref());
    draft.set_language(graph.text_or_iri(subject, LANGUAGE).map(|v| last_segment(&v)));
    draft.set_topic_category(
        graph
            .objects(subject, TOPIC)
            .into_iter()
            .find_map(|o| graph.label_of(o).or_else(|| o.iri().map(last_segment))),
    );

    for temporal in graph.objects(subject, TEMPORAL) {
        match temporal {
            Object::Literal(interval) => draft.set_temporal_interval(Some(interval)),
            Object::Resource(node) => {
                draft.set_temporal_start(graph.text(node, START_DATE).as_deref());
                draft.set_temporal_end(graph.text(node, END_DATE).as_deref());
            }
        }
    }

    let mut places = vec![subject];
    places.extend(
        graph
            .objects(subject, SPATIAL)
            .into_iter()
            .filter_map(Object::iri),
    );
    draft.set_corners(places.into_iter().find_map(|p| graph.corners(p, 2)));

    for distribution in graph.objects(subject, DISTRIBUTION) {
        if let Some(node) = distribution.iri() {
            draft.set_download_url(graph.text_or_iri(node, DOWNLOAD));
        }
    }
    draft.set_download_url(graph.text_or_iri(subject, &["dcat:downloadURL"]));
    draft.set_landing_page_url(graph.text_or_iri(subject, LANDING));
}

fn last_segment(value: &str) -> String {
    if value.starts_with("http://") || value.starts_with("https://") {
        let trimmed = value.trim_end_matches(['/', '#']);
        let segment = trimmed.rsplit(['/', '#']).next().unwrap_or(trimmed);
        return segment.to_string();
    }
    value.to_string()
}

// ═══════════════════════════════════════════════════════════════════════
// Graph
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
enum Object {
    /// IRI or `_:` blank node label.
    Resource(String),
    Literal(String),
}

impl Object {
    fn iri(&self) -> Option<&str> {
        match self {
            Object::Resource(r) => Some(r),
            Object::Literal(_) => None,
        }
    }
}

/// Triples grouped by subject, predicates shortened to `prefix:local`.
#[derive(Debug, Default)]
struct Graph {
    subjects: Vec<String>,
    statements: HashMap<String, Vec<(String, Object)>>,
}

impl Graph {
    fn parse(raw: &str) -> Result<Self, ParseError> {
        let text = strip_bom(raw);
        let mut graph = Graph::default();
        for triple in TurtleParser::new().for_reader(text.as_bytes()) {
            let triple = triple.map_err(|err| turtle_error(err, text))?;
            let subject = match &triple.subject {
                Subject::NamedNode(n) => n.as_str().to_string(),
                Subject::BlankNode(b) => format!("_:{}", b.as_str()),
                #[allow(unreachable_patterns)]
                _ => continue,
            };
            let object = match &triple.object {
                Term::NamedNode(n) => Object::Resource(n.as_str().to_string()),
                Term::BlankNode(b) => Object::Resource(format!("_:{}", b.as_str())),
                Term::Literal(l) => Object::Literal(l.value().to_string()),
                #[allow(unreachable_patterns)]
                _ => continue,
            };
            let predicate = shorten(triple.predicate.as_str());
            graph.insert(subject, predicate, object);
        }
        Ok(graph)
    }

    fn insert(&mut self, subject: String, predicate: String, object: Object) {
        if !self.statements.contains_key(&subject) {
            self.subjects.push(subject.clone());
        }
        self.statements
            .entry(subject)
            .or_default()
            .push((predicate, object));
    }

    fn dataset_subject(&self) -> Option<&str> {
        let typed = self.subjects.iter().find(|s| {
            self.objects(s, &["rdf:type"]).iter().any(|o| {
                o.iri()
                    .map(shorten)
                    .is_some_and(|t| DATASET_TYPES.contains(&t.as_str()))
            })
        });
        typed
            .or_else(|| self.subjects.iter().find(|s| self.text(s, TITLE).is_some()))
            .or_else(|| self.subjects.first())
            .map(String::as_str)
    }

    /// Objects of `subject` for `predicates`, in predicate priority order.
    fn objects(&self, subject: &str, predicates: &[&str]) -> Vec<&Object> {
        let Some(statements) = self.statements.get(subject) else {
            return Vec::new();
        };
        predicates
            .iter()
            .flat_map(|p| {
                statements
                    .iter()
                    .filter(move |(pred, _)| pred == p)
                    .map(|(_, o)| o)
            })
            .collect()
    }

    /// Literal value, or the label of a resource.
    fn label_of(&self, object: &Object) -> Option<String> {
        match object {
            Object::Literal(v) => Some(v.trim().to_string()).filter(|v| !v.is_empty()),
            Object::Resource(node) => self
                .objects(node, LABEL)
                .into_iter()
                .find_map(|o| match o {
                    Object::Literal(v) => Some(v.trim().to_string()).filter(|v| !v.is_empty()),
                    Object::Resource(_) => None,
                }),
        }
    }

    fn text(&self, subject: &str, predicates: &[&str]) -> Option<String> {
        self.objects(subject, predicates)
            .into_iter()
            .find_map(|o| self.label_of(o))
    }

    /// Like [`text`](Self::text), but a bare IRI counts as a value.
    fn text_or_iri(&self, subject: &str, predicates: &[&str]) -> Option<String> {
        self.objects(subject, predicates).into_iter().find_map(|o| {
            self.label_of(o).or_else(|| {
                o.iri()
                    .filter(|iri| !iri.starts_with("_:"))
                    .map(str::to_string)
            })
        })
    }

    /// Bounding box attached to `node`: a WKT/box literal, a W3C geo point,
    /// or either of those on a nested geometry node.
    fn corners(&self, node: &str, depth: u8) -> Option<Corners> {
        if let Some(c) = self
            .objects(node, GEOMETRY_LITERAL)
            .into_iter()
            .find_map(|o| match o {
                Object::Literal(v) => parse_geometry(v),
                Object::Resource(_) => None,
            })
        {
            return Some(c);
        }
        let number = |preds: &[&str]| -> Option<f64> { self.text(node, preds)?.parse().ok() };
        if let (Some(lat), Some(lon)) = (
            number(&["geo:lat", "schema:latitude"]),
            number(&["geo:long", "schema:longitude"]),
        ) {
            return Some(Corners::point(lon, lat));
        }
        if depth == 0 {
            return None;
        }
        self.objects(node, GEOMETRY_NODE)
            .into_iter()
            .filter_map(Object::iri)
            .find_map(|child| self.corners(child, depth - 1))
    }
}

fn shorten(iri: &str) -> String {
    NAMESPACES
        .iter()
        .find_map(|(prefix, ns)| {
            iri.strip_prefix(ns)
                .map(|local| format!("{}:{}", prefix, local))
        })
        .unwrap_or_else(|| iri.to_string())
}

fn turtle_error(err: TurtleParseError, text: &str) -> ParseError {
    match err {
        TurtleParseError::Syntax(syntax) => {
            let start = syntax.location().start;
            ParseError::new(DocumentFormat::Rdf, syntax.to_string()).at(SourceLocation {
                line: start.line + 1,
                column: start.column + 1,
            })
        }
        TurtleParseError::Io(io) => ParseError::new(DocumentFormat::Rdf, io.to_string())
            .at(SourceLocation::from_offset(text, text.len())),
    }
}
